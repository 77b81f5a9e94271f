//! Ordered, mutable snapshot of the user's conversations.
//!
//! Flag toggles are applied optimistically, sent to the server, and either
//! confirmed (re-asserted, re-sorted, written through to the local store)
//! or reverted when the server declines. Mutations are applied one at a
//! time; readers always see a consistent list. Flag changes also wait for
//! each other's server round trip, other updates do not.

use crate::config::SyncConfig;
use crate::types::events::{EventBus, ThreadEvent};
use chrono::Utc;
use log::{debug, info, warn};
use podcore::request::{RequestIdGenerator, SessionId};
use podcore::sdk::{SdkError, ThreadMutationService};
use podcore::store::error::StoreError;
use podcore::store::traits::ThreadSnapshotStore;
use podcore::types::thread::sort_summaries;
use podcore::{
    ConversationSummary, LastMessage, Message, MessageId, ThreadFlag, ThreadId, ThreadMutation,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("server rejected {mutation} on thread {thread_id}: {source}")]
    MutationRejected {
        thread_id: ThreadId,
        mutation: ThreadMutation,
        #[source]
        source: SdkError,
    },
    #[error("{mutation} on thread {thread_id} timed out")]
    Timeout {
        thread_id: ThreadId,
        mutation: ThreadMutation,
    },
    #[error("local store error: {0}")]
    Store(#[from] StoreError),
}

pub struct ThreadListCache {
    threads: RwLock<Vec<ConversationSummary>>,
    // Held for every read-modify-write of the list, never across the SDK.
    writer: Mutex<()>,
    // Serializes flag changes across their server round trip.
    toggles: Mutex<()>,
    mutations: Arc<dyn ThreadMutationService>,
    store: Arc<dyn ThreadSnapshotStore>,
    events: Arc<EventBus>,
    request_ids: RequestIdGenerator,
    config: SyncConfig,
}

impl ThreadListCache {
    pub fn new(
        mutations: Arc<dyn ThreadMutationService>,
        store: Arc<dyn ThreadSnapshotStore>,
        events: Arc<EventBus>,
        config: SyncConfig,
    ) -> Self {
        Self {
            threads: RwLock::new(Vec::new()),
            writer: Mutex::new(()),
            toggles: Mutex::new(()),
            mutations,
            store,
            events,
            request_ids: RequestIdGenerator::new(SessionId::new()),
            config,
        }
    }

    /// Cold start: replaces the in-memory list with the stored snapshot.
    pub async fn load(&self) -> Result<usize, ThreadError> {
        let _writer = self.writer.lock().await;
        let mut loaded = self.store.load_threads().await?;
        sort_summaries(&mut loaded);
        let count = loaded.len();
        *self.threads.write().await = loaded;
        info!(target: "ThreadList", "Loaded {count} cached threads");
        self.emit_order().await;
        Ok(count)
    }

    pub async fn get(&self, thread_id: ThreadId) -> Option<ConversationSummary> {
        self.threads
            .read()
            .await
            .iter()
            .find(|s| s.id == thread_id)
            .cloned()
    }

    /// All threads in display order.
    pub async fn snapshot(&self) -> Vec<ConversationSummary> {
        self.threads.read().await.clone()
    }

    pub async fn visible(&self) -> Vec<ConversationSummary> {
        self.threads
            .read()
            .await
            .iter()
            .filter(|s| !s.archived)
            .cloned()
            .collect()
    }

    pub async fn archived(&self) -> Vec<ConversationSummary> {
        self.threads
            .read()
            .await
            .iter()
            .filter(|s| s.archived)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.threads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.threads.read().await.is_empty()
    }

    pub async fn toggle_archive(
        &self,
        thread_id: ThreadId,
    ) -> Result<Option<ThreadMutation>, ThreadError> {
        self.toggle(thread_id, ThreadFlag::Archive).await
    }

    pub async fn toggle_mute(
        &self,
        thread_id: ThreadId,
    ) -> Result<Option<ThreadMutation>, ThreadError> {
        self.toggle(thread_id, ThreadFlag::Mute).await
    }

    pub async fn toggle_pin(
        &self,
        thread_id: ThreadId,
    ) -> Result<Option<ThreadMutation>, ThreadError> {
        self.toggle(thread_id, ThreadFlag::Pin).await
    }

    /// Flips `flag` on `thread_id`. Returns `Ok(None)` if the thread is not
    /// cached.
    pub async fn toggle(
        &self,
        thread_id: ThreadId,
        flag: ThreadFlag,
    ) -> Result<Option<ThreadMutation>, ThreadError> {
        let _toggle = self.toggles.lock().await;

        let (mutation, optimistic) = {
            let _writer = self.writer.lock().await;
            let mut threads = self.threads.write().await;
            let Some(summary) = threads.iter_mut().find(|s| s.id == thread_id) else {
                debug!(
                    target: "ThreadList",
                    "Ignoring {flag:?} toggle for unknown thread {thread_id}"
                );
                return Ok(None);
            };
            let mutation = ThreadMutation::toggle(flag, summary.flag(flag));
            summary.set_flag(flag, mutation.value());
            (mutation, summary.clone())
        };
        self.events.emit_thread(ThreadEvent::Updated(optimistic));

        let key = self.request_ids.next_key();
        debug!(target: "ThreadList", "Sending {mutation} for thread {thread_id} ({key})");
        let sent = timeout(
            self.config.mutation_timeout,
            self.mutations.apply(thread_id, mutation, key),
        )
        .await;

        match sent {
            Ok(Ok(())) => {
                let _writer = self.writer.lock().await;
                self.apply_confirmation(thread_id, mutation).await;
                Ok(Some(mutation))
            }
            Ok(Err(error)) => {
                warn!(
                    target: "ThreadList",
                    "Server rejected {mutation} on thread {thread_id}: {error}"
                );
                self.revert(thread_id, mutation).await;
                self.events.emit_thread(ThreadEvent::MutationRejected {
                    thread_id,
                    mutation,
                    error: error.clone(),
                });
                Err(ThreadError::MutationRejected {
                    thread_id,
                    mutation,
                    source: error,
                })
            }
            Err(_) => {
                warn!(target: "ThreadList", "{mutation} on thread {thread_id} timed out");
                self.revert(thread_id, mutation).await;
                Err(ThreadError::Timeout {
                    thread_id,
                    mutation,
                })
            }
        }
    }

    /// Server acknowledgement of `mutation`, possibly pushed by the SDK
    /// outside of a local toggle. Idempotent.
    pub async fn on_mutation_confirmed(
        &self,
        thread_id: ThreadId,
        mutation: ThreadMutation,
    ) -> bool {
        let _writer = self.writer.lock().await;
        self.apply_confirmation(thread_id, mutation).await
    }

    async fn apply_confirmation(&self, thread_id: ThreadId, mutation: ThreadMutation) -> bool {
        let (summary, order, moved) = {
            let mut threads = self.threads.write().await;
            let Some(summary) = threads.iter_mut().find(|s| s.id == thread_id) else {
                return false;
            };
            summary.confirm(mutation, Utc::now());
            let summary = summary.clone();
            let before: Vec<ThreadId> = threads.iter().map(|s| s.id).collect();
            sort_summaries(&mut threads);
            let order: Vec<ThreadId> = threads.iter().map(|s| s.id).collect();
            let moved = before != order;
            (summary, order, moved)
        };
        if let Err(e) = self.store.save_thread(&summary).await {
            warn!(target: "ThreadList", "Failed to persist thread {thread_id}: {e}");
        }
        self.events.emit_thread(ThreadEvent::Updated(summary));
        if moved {
            self.events.emit_thread(ThreadEvent::Reordered(order));
        }
        true
    }

    async fn revert(&self, thread_id: ThreadId, mutation: ThreadMutation) {
        let _writer = self.writer.lock().await;
        let reverted = {
            let mut threads = self.threads.write().await;
            threads.iter_mut().find(|s| s.id == thread_id).map(|summary| {
                summary.set_flag(mutation.flag(), !mutation.value());
                summary.clone()
            })
        };
        if let Some(summary) = reverted {
            // Other updates may have persisted the optimistic flag meanwhile.
            if let Err(e) = self.store.save_thread(&summary).await {
                warn!(target: "ThreadList", "Failed to persist thread {thread_id}: {e}");
            }
            self.events.emit_thread(ThreadEvent::Updated(summary));
        }
    }

    /// Re-sorts the list. Only needed after external edits; every mutating
    /// operation keeps the order itself.
    pub async fn sort(&self) {
        let _writer = self.writer.lock().await;
        sort_summaries(&mut self.threads.write().await);
        self.emit_order().await;
    }

    /// Merges one page of the server's thread list.
    pub async fn upsert_page(&self, page: Vec<ConversationSummary>) -> usize {
        let _writer = self.writer.lock().await;
        let count = page.len();
        let merged = {
            let mut threads = self.threads.write().await;
            let mut merged = Vec::with_capacity(count);
            for incoming in page {
                match threads.iter_mut().find(|s| s.id == incoming.id) {
                    Some(existing) => {
                        // Keep the local pin time if the server didn't send one.
                        let pinned_at = incoming.pinned_at.or(existing.pinned_at);
                        *existing = incoming;
                        if existing.pinned {
                            existing.pinned_at = pinned_at;
                        }
                        merged.push(existing.clone());
                    }
                    None => {
                        merged.push(incoming.clone());
                        threads.push(incoming);
                    }
                }
            }
            sort_summaries(&mut threads);
            merged
        };
        for summary in &merged {
            if let Err(e) = self.store.save_thread(summary).await {
                warn!(target: "ThreadList", "Failed to persist thread {}: {e}", summary.id);
            }
        }
        self.emit_order().await;
        count
    }

    /// Drops a deleted conversation.
    pub async fn remove(&self, thread_id: ThreadId) -> Option<ConversationSummary> {
        let _writer = self.writer.lock().await;
        let removed = {
            let mut threads = self.threads.write().await;
            let pos = threads.iter().position(|s| s.id == thread_id)?;
            threads.remove(pos)
        };
        if let Err(e) = self.store.delete_thread(thread_id).await {
            warn!(target: "ThreadList", "Failed to delete thread {thread_id} from store: {e}");
        }
        self.events.emit_thread(ThreadEvent::Removed(thread_id));
        Some(removed)
    }

    pub async fn clear(&self) -> Result<(), ThreadError> {
        let _writer = self.writer.lock().await;
        self.threads.write().await.clear();
        self.store.clear().await?;
        self.events.emit_thread(ThreadEvent::Cleared);
        Ok(())
    }

    /// Bumps a thread for a newly received or sent message.
    pub async fn on_new_message(&self, message: &Message) -> bool {
        let Some(time) = message.time else {
            warn!(target: "ThreadList", "Ignoring message {} without timestamp", message.id);
            return false;
        };
        let _writer = self.writer.lock().await;
        let summary = {
            let mut threads = self.threads.write().await;
            let Some(summary) = threads.iter_mut().find(|s| s.id == message.thread_id) else {
                return false;
            };
            summary.last_message = Some(LastMessage {
                id: message.id,
                text: message.text.clone(),
                time,
            });
            if time > summary.last_activity {
                summary.last_activity = time;
            }
            if !message.is_from_me {
                summary.unread_count = summary.unread_count.saturating_add(1);
            }
            let summary = summary.clone();
            sort_summaries(&mut threads);
            summary
        };
        if let Err(e) = self.store.save_thread(&summary).await {
            warn!(target: "ThreadList", "Failed to persist thread {}: {e}", summary.id);
        }
        self.events.emit_thread(ThreadEvent::Updated(summary));
        self.emit_order().await;
        true
    }

    /// Records that the user has seen everything up to `message_id`.
    pub async fn on_seen(&self, thread_id: ThreadId, message_id: MessageId) -> bool {
        let _writer = self.writer.lock().await;
        let summary = {
            let mut threads = self.threads.write().await;
            let Some(summary) = threads.iter_mut().find(|s| s.id == thread_id) else {
                return false;
            };
            if summary.last_seen_message_id >= Some(message_id) {
                return false;
            }
            summary.last_seen_message_id = Some(message_id);
            if summary.last_message.as_ref().is_none_or(|m| m.id <= message_id) {
                summary.unread_count = 0;
            }
            summary.clone()
        };
        if let Err(e) = self.store.save_thread(&summary).await {
            warn!(target: "ThreadList", "Failed to persist thread {thread_id}: {e}");
        }
        self.events.emit_thread(ThreadEvent::Updated(summary));
        true
    }

    /// Records the newest message the peer's device has received.
    pub async fn on_delivered(&self, thread_id: ThreadId, message_id: MessageId) -> bool {
        let _writer = self.writer.lock().await;
        let mut threads = self.threads.write().await;
        let Some(summary) = threads.iter_mut().find(|s| s.id == thread_id) else {
            return false;
        };
        if summary.last_delivered_message_id >= Some(message_id) {
            return false;
        }
        summary.last_delivered_message_id = Some(message_id);
        let summary = summary.clone();
        drop(threads);
        if let Err(e) = self.store.save_thread(&summary).await {
            warn!(target: "ThreadList", "Failed to persist thread {thread_id}: {e}");
        }
        self.events.emit_thread(ThreadEvent::Updated(summary));
        true
    }

    async fn emit_order(&self) {
        let order = self.threads.read().await.iter().map(|s| s.id).collect();
        self.events.emit_thread(ThreadEvent::Reordered(order));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockMutations;
    use crate::store::MemoryThreadStore;
    use chrono::{DateTime, TimeZone};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    async fn cache_with(
        threads: Vec<ConversationSummary>,
    ) -> (ThreadListCache, Arc<MockMutations>, Arc<MemoryThreadStore>) {
        let mutations = Arc::new(MockMutations::new());
        let store = Arc::new(MemoryThreadStore::new());
        for thread in &threads {
            store.save_thread(thread).await.unwrap();
        }
        let cache = ThreadListCache::new(
            mutations.clone(),
            store.clone(),
            Arc::new(EventBus::new()),
            SyncConfig::default(),
        );
        cache.load().await.unwrap();
        (cache, mutations, store)
    }

    #[tokio::test]
    async fn toggle_on_unknown_thread_is_a_noop() {
        let (cache, mutations, _) =
            cache_with(vec![ConversationSummary::new(1, "a", at(1))]).await;
        assert!(cache.toggle_mute(42).await.unwrap().is_none());
        assert!(mutations.calls().await.is_empty());
    }

    #[tokio::test]
    async fn mutation_keys_are_unique() {
        let (cache, mutations, _) =
            cache_with(vec![ConversationSummary::new(1, "a", at(1))]).await;
        cache.toggle_mute(1).await.unwrap();
        cache.toggle_mute(1).await.unwrap();
        let keys = mutations.keys().await;
        assert_eq!(keys.len(), 2);
        assert_ne!(keys[0], keys[1]);
    }

    #[tokio::test]
    async fn new_message_bumps_thread_and_unread() {
        let (cache, _, store) = cache_with(vec![
            ConversationSummary::new(1, "a", at(5)),
            ConversationSummary::new(2, "b", at(3)),
        ])
        .await;
        let message = Message::new(77, 2, at(9)).with_text("hi");
        assert!(cache.on_new_message(&message).await);

        let ids: Vec<_> = cache.snapshot().await.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![2, 1]);
        let b = cache.get(2).await.unwrap();
        assert_eq!(b.unread_count, 1);
        assert_eq!(b.last_message.as_ref().map(|m| m.id), Some(77));
        assert_eq!(store.get(2).await.unwrap().unread_count, 1);

        assert!(cache.on_seen(2, 77).await);
        assert_eq!(cache.get(2).await.unwrap().unread_count, 0);
        assert!(!cache.on_seen(2, 70).await);
    }

    #[tokio::test]
    async fn upsert_keeps_local_pin_time() {
        let mut pinned = ConversationSummary::new(1, "a", at(1));
        pinned.pinned = true;
        pinned.pinned_at = Some(at(2));
        let (cache, _, store) = cache_with(vec![pinned]).await;

        let mut from_server = ConversationSummary::new(1, "renamed", at(4));
        from_server.pinned = true;
        cache
            .upsert_page(vec![from_server, ConversationSummary::new(2, "b", at(6))])
            .await;

        let a = cache.get(1).await.unwrap();
        assert_eq!(a.title, "renamed");
        assert_eq!(a.pinned_at, Some(at(2)));
        assert_eq!(store.get(1).await.unwrap().pinned_at, Some(at(2)));
        assert_eq!(store.get(1).await.unwrap().title, "renamed");
        let ids: Vec<_> = cache.snapshot().await.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn remove_drops_thread_from_cache_and_store() {
        let (cache, _, store) =
            cache_with(vec![ConversationSummary::new(1, "a", at(1))]).await;
        assert!(cache.remove(1).await.is_some());
        assert!(cache.is_empty().await);
        assert!(store.get(1).await.is_none());
        assert!(cache.remove(1).await.is_none());
    }
}
