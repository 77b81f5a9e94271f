use async_trait::async_trait;
use podcore::store::error::Result;
use podcore::store::traits::ThreadSnapshotStore;
use podcore::{ConversationSummary, ThreadId};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Volatile thread store, for tests and sessions without a disk cache.
#[derive(Default)]
pub struct MemoryThreadStore {
    threads: Mutex<HashMap<ThreadId, ConversationSummary>>,
}

impl MemoryThreadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, thread_id: ThreadId) -> Option<ConversationSummary> {
        self.threads.lock().await.get(&thread_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.threads.lock().await.len()
    }
}

#[async_trait]
impl ThreadSnapshotStore for MemoryThreadStore {
    async fn load_threads(&self) -> Result<Vec<ConversationSummary>> {
        Ok(self.threads.lock().await.values().cloned().collect())
    }

    async fn save_thread(&self, summary: &ConversationSummary) -> Result<()> {
        self.threads
            .lock()
            .await
            .insert(summary.id, summary.clone());
        Ok(())
    }

    async fn delete_thread(&self, thread_id: ThreadId) -> Result<()> {
        self.threads.lock().await.remove(&thread_id);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.threads.lock().await.clear();
        Ok(())
    }
}
