use anyhow::Context;
use chrono::{Local, Utc};
use clap::Parser;
use futures_util::future::join_all;
use log::{error, info, warn};
use pod_chat_rust::mock::{MockHistory, MockMutations, message_at};
use pod_chat_rust::store::{FileThreadStore, MemoryThreadStore, ThreadSnapshotStore};
use pod_chat_rust::types::events::{HistoryEventKind, ThreadEvent};
use pod_chat_rust::{ChatCache, JumpAnchor, PageOutcome, SyncConfig};
use podcore::{ConversationSummary, Direction, Message, ReceiptState};
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

// Walks a simulated conversation through paging, a jump and a pin toggle.
//
// Usage:
//   cargo run                                  # in-memory thread store
//   cargo run -- --store ./cache               # persist summaries to disk
//   cargo run -- -m 200 --page-size 20 -j 42   # bigger history, jump to 42

#[derive(Parser, Debug)]
#[command(about = "Chat history cache demo")]
struct Args {
    /// Messages in the simulated conversation.
    #[arg(short, long, default_value_t = 60)]
    messages: i64,
    /// Conversations in the thread list.
    #[arg(short, long, default_value_t = 4)]
    threads: i64,
    #[arg(long, default_value_t = 10)]
    page_size: usize,
    /// Message to jump to once the newest pages are loaded.
    #[arg(short, long, default_value_t = 5)]
    jump_to: i64,
    /// Directory for the thread summary cache.
    #[arg(long)]
    store: Option<PathBuf>,
    /// Simulated SDK latency in milliseconds.
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,
}

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to build tokio runtime: {e}");
            return;
        }
    };

    if let Err(e) = rt.block_on(run(args)) {
        error!("Demo failed: {e:#}");
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    const THREAD: i64 = 1;

    let store: Arc<dyn ThreadSnapshotStore> = match &args.store {
        Some(path) => Arc::new(
            FileThreadStore::new(path)
                .await
                .with_context(|| format!("opening store at {}", path.display()))?,
        ),
        None => Arc::new(MemoryThreadStore::new()),
    };
    let history = Arc::new(
        MockHistory::with_messages(THREAD, (1..=args.messages).map(|id| message_at(THREAD, id)))
            .with_delay(Duration::from_millis(args.latency_ms)),
    );
    let config = SyncConfig::default()
        .with_page_size(args.page_size)
        .with_jump_page_size(args.page_size);
    let cache = ChatCache::new(config, history.clone(), Arc::new(MockMutations::new()), store);

    let restored = cache.load().await?;
    if restored == 0 {
        let now = Utc::now();
        let page = (1..=args.threads.max(1))
            .map(|id| {
                let last_activity = now - chrono::Duration::hours(id);
                ConversationSummary::new(id, format!("thread {id}"), last_activity)
            })
            .collect();
        cache.threads().upsert_page(page).await;
    }

    let mut thread_events = cache.events().threads.subscribe();
    let mut history_events = cache.events().history.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = thread_events.recv().await {
            if let ThreadEvent::Reordered(order) = event.as_ref() {
                info!(target: "Events", "Thread order is now {order:?}");
            }
        }
    });
    tokio::spawn(async move {
        while let Ok(event) = history_events.recv().await {
            match &event.kind {
                HistoryEventKind::PageApplied { kind, inserted, .. } => {
                    info!(target: "Events", "{kind} added {inserted} messages");
                }
                HistoryEventKind::StaleResponse(key) => {
                    warn!(target: "Events", "Dropped stale page {key}");
                }
                _ => {}
            }
        }
    });

    let conversation = cache.open_conversation(THREAD);

    // Two scrolls at once: the second is dropped while the first is in flight.
    let scrolls = join_all([
        conversation.request_more(Direction::Top),
        conversation.request_more(Direction::Top),
    ])
    .await;
    for outcome in scrolls {
        match outcome? {
            PageOutcome::Applied(page) => info!("Loaded {} messages", page.inserted),
            other => info!("Scroll result: {other:?}"),
        }
    }
    conversation.request_more(Direction::Top).await?;

    let target = message_at(THREAD, args.jump_to.clamp(1, args.messages.max(1)));
    if let Some(time) = target.time {
        let outcome = conversation
            .jump_to(JumpAnchor::Time {
                message_id: target.id,
                time,
            })
            .await?;
        info!("Jump to message {}: {outcome:?}", target.id);
    }

    let live = Message::new(args.messages + 1, THREAD, Utc::now()).with_text("just arrived");
    history.push(live.clone()).await;
    cache.on_new_message(live).await;
    cache.on_receipt(THREAD, target.id, ReceiptState::Seen).await;

    let pin = rand::rng().random_range(1..=args.threads.max(1));
    match cache.threads().toggle_pin(pin).await {
        Ok(Some(mutation)) => info!("Applied {mutation} to thread {pin}"),
        Ok(None) => warn!("Thread {pin} is not cached"),
        Err(e) => warn!("Pin failed: {e}"),
    }

    for section in conversation.snapshot().await {
        println!("-- {} ({} messages)", section.day(), section.rows().len());
        for row in section.rows() {
            let marker = if row.is_highlighted() { ">" } else { " " };
            println!("{marker} #{:<4} {:?} {}", row.id(), row.icon(), row.message().text);
        }
    }
    for summary in cache.threads().snapshot().await {
        println!(
            "{:>3} {:<10} pinned={} unread={}",
            summary.id, summary.title, summary.pinned, summary.unread_count
        );
    }
    Ok(())
}
