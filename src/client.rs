//! Entry point that wires the SDK collaborators into the caches.

use crate::config::SyncConfig;
use crate::pagination::PaginationController;
use crate::threads::{ThreadError, ThreadListCache};
use crate::types::events::EventBus;
use dashmap::DashMap;
use log::{debug, info};
use podcore::sdk::{HistorySource, ThreadMutationService};
use podcore::store::traits::ThreadSnapshotStore;
use podcore::{Message, MessageId, ReceiptState, ThreadId};
use std::sync::Arc;

/// Owns the thread list and one pagination controller per open
/// conversation. Everything it hands out shares the same SDK handles and
/// event bus.
pub struct ChatCache {
    config: SyncConfig,
    history: Arc<dyn HistorySource>,
    threads: Arc<ThreadListCache>,
    conversations: DashMap<ThreadId, Arc<PaginationController>>,
    events: Arc<EventBus>,
}

impl ChatCache {
    pub fn new(
        config: SyncConfig,
        history: Arc<dyn HistorySource>,
        mutations: Arc<dyn ThreadMutationService>,
        store: Arc<dyn ThreadSnapshotStore>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let threads = Arc::new(ThreadListCache::new(
            mutations,
            store,
            events.clone(),
            config.clone(),
        ));
        Self {
            config,
            history,
            threads,
            conversations: DashMap::new(),
            events,
        }
    }

    /// Loads the cached thread list from the local store.
    pub async fn load(&self) -> Result<usize, ThreadError> {
        self.threads.load().await
    }

    pub fn threads(&self) -> &Arc<ThreadListCache> {
        &self.threads
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Starts a fresh viewing session for `thread_id`, replacing any
    /// previous one. Responses addressed to the old session go stale.
    pub fn open_conversation(&self, thread_id: ThreadId) -> Arc<PaginationController> {
        let controller = Arc::new(PaginationController::new(
            thread_id,
            self.history.clone(),
            self.config.clone(),
            self.events.clone(),
        ));
        if self
            .conversations
            .insert(thread_id, controller.clone())
            .is_some()
        {
            debug!(target: "ChatCache", "Reopened thread {thread_id}, old session dropped");
        } else {
            info!(target: "ChatCache", "Opened thread {thread_id}");
        }
        controller
    }

    pub fn conversation(&self, thread_id: ThreadId) -> Option<Arc<PaginationController>> {
        self.conversations
            .get(&thread_id)
            .map(|entry| entry.value().clone())
    }

    pub fn close_conversation(&self, thread_id: ThreadId) -> bool {
        self.conversations.remove(&thread_id).is_some()
    }

    pub fn open_count(&self) -> usize {
        self.conversations.len()
    }

    /// Routes a live message to the thread list and, if open, its window.
    pub async fn on_new_message(&self, message: Message) {
        self.threads.on_new_message(&message).await;
        if let Some(conversation) = self.conversation(message.thread_id) {
            conversation.append_live(message).await;
        }
    }

    pub async fn on_receipt(
        &self,
        thread_id: ThreadId,
        message_id: MessageId,
        receipt: ReceiptState,
    ) {
        match receipt {
            ReceiptState::Seen => {
                self.threads.on_seen(thread_id, message_id).await;
            }
            ReceiptState::Delivered => {
                self.threads.on_delivered(thread_id, message_id).await;
            }
            _ => {}
        }
        if let Some(conversation) = self.conversation(thread_id) {
            conversation.apply_receipt(message_id, receipt).await;
        }
    }

    pub async fn on_message_deleted(&self, thread_id: ThreadId, message_id: MessageId) {
        if let Some(conversation) = self.conversation(thread_id) {
            conversation.remove_message(message_id).await;
        }
    }

    /// Forgets a deleted conversation everywhere.
    pub async fn on_thread_deleted(&self, thread_id: ThreadId) {
        self.close_conversation(thread_id);
        self.threads.remove(thread_id).await;
    }
}
