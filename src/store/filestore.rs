use async_trait::async_trait;
use log::warn;
use podcore::store::error::{Result, StoreError};
use podcore::store::traits::ThreadSnapshotStore;
use podcore::{ConversationSummary, ThreadId};
use serde::{Serialize, de::DeserializeOwned};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Thread summaries as one JSON file per thread under `<base>/threads`.
pub struct FileThreadStore {
    base_path: PathBuf,
}

impl FileThreadStore {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = path.into();
        let store = Self { base_path };
        fs::create_dir_all(store.threads_dir()).await?;
        Ok(store)
    }

    fn threads_dir(&self) -> PathBuf {
        self.base_path.join("threads")
    }

    fn thread_path(&self, thread_id: ThreadId) -> PathBuf {
        self.threads_dir().join(format!("{thread_id}.json"))
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>> {
        match fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let data = serde_json::to_vec_pretty(value)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        // Readers never observe a half-written file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl ThreadSnapshotStore for FileThreadStore {
    async fn load_threads(&self) -> Result<Vec<ConversationSummary>> {
        let mut threads = Vec::new();
        let mut entries = fs::read_dir(self.threads_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Corrupt files are skipped, not fatal.
            match self.read_json::<ConversationSummary>(&path).await {
                Ok(Some(summary)) => threads.push(summary),
                Ok(None) => {}
                Err(e) => warn!(target: "Store", "Skipping {}: {e}", path.display()),
            }
        }
        Ok(threads)
    }

    async fn save_thread(&self, summary: &ConversationSummary) -> Result<()> {
        self.write_json(&self.thread_path(summary.id), summary).await
    }

    async fn delete_thread(&self, thread_id: ThreadId) -> Result<()> {
        match fs::remove_file(self.thread_path(thread_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn clear(&self) -> Result<()> {
        match fs::remove_dir_all(self.threads_dir()).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Io(e)),
        }
        fs::create_dir_all(self.threads_dir()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    #[tokio::test]
    async fn survives_a_restart() {
        let dir = TempDir::new().unwrap();
        let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        {
            let store = FileThreadStore::new(dir.path()).await.unwrap();
            let mut summary = ConversationSummary::new(7, "team", when);
            summary.pinned = true;
            summary.pinned_at = Some(when);
            store.save_thread(&summary).await.unwrap();
            store
                .save_thread(&ConversationSummary::new(8, "other", when))
                .await
                .unwrap();
            store.delete_thread(8).await.unwrap();
            store.delete_thread(8).await.unwrap();
        }

        let reopened = FileThreadStore::new(dir.path()).await.unwrap();
        let threads = reopened.load_threads().await.unwrap();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].id, 7);
        assert_eq!(threads[0].pinned_at, Some(when));
    }

    #[tokio::test]
    async fn corrupt_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let store = FileThreadStore::new(dir.path()).await.unwrap();
        store
            .save_thread(&ConversationSummary::new(1, "ok", Utc::now()))
            .await
            .unwrap();
        fs::write(dir.path().join("threads/2.json"), b"{not json")
            .await
            .unwrap();

        let threads = store.load_threads().await.unwrap();
        assert_eq!(threads.len(), 1);

        store.clear().await.unwrap();
        assert!(store.load_threads().await.unwrap().is_empty());
    }
}
