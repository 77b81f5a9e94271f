use crate::store::error::Result;
use crate::types::thread::{ConversationSummary, ThreadId};
use async_trait::async_trait;

/// Local cache of thread summaries.
///
/// Loaded once on cold start and written through on every confirmed change.
#[async_trait]
pub trait ThreadSnapshotStore: Send + Sync {
    async fn load_threads(&self) -> Result<Vec<ConversationSummary>>;
    async fn save_thread(&self, summary: &ConversationSummary) -> Result<()>;
    async fn delete_thread(&self, thread_id: ThreadId) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}
