//! Test Dedup Database Manager
//!
//! Provides isolated dedup indexes for testing:
//! - Temporary databases that are automatically cleaned up
//! - Reopening the same file to check persistence

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sift_core::dedup::{DedupIndex, DedupResult};
use sift_core::{CandidateChunk, SqliteContentHashStore};
use tempfile::TempDir;

/// Manager for test dedup databases
///
/// Creates an isolated SQLite index for each test to prevent interference.
/// The temporary directory is removed when the manager is dropped.
///
/// # Example
///
/// ```rust,ignore
/// let db = TestDedupManager::new_temp();
/// let result = db.index.deduplicate_chunks_at_index("ws", chunks, None).await;
/// ```
pub struct TestDedupManager {
    /// The dedup index over `store`
    pub index: DedupIndex,
    /// The underlying store
    pub store: Arc<SqliteContentHashStore>,
    /// Temporary directory (kept alive to prevent premature deletion)
    _temp_dir: Option<TempDir>,
    db_path: PathBuf,
}

impl TestDedupManager {
    /// Create a new dedup database in a temporary directory
    pub fn new_temp() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("test_dedup.db");
        let mut manager = Self::new_at_path(db_path);
        manager._temp_dir = Some(temp_dir);
        manager
    }

    /// Create a dedup database at a specific path
    ///
    /// The database is NOT automatically deleted.
    pub fn new_at_path(path: PathBuf) -> Self {
        let store = Arc::new(
            SqliteContentHashStore::new(Some(path.clone())).expect("Failed to create test store"),
        );
        Self {
            index: DedupIndex::new(store.clone()),
            store,
            _temp_dir: None,
            db_path: path,
        }
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Drop the connections and open the same file again
    pub fn reopen(&mut self) {
        let store = Arc::new(
            SqliteContentHashStore::new(Some(self.db_path.clone()))
                .expect("Failed to reopen test store"),
        );
        self.index = DedupIndex::new(store.clone());
        self.store = store;
    }

    /// Partition then record the unique chunks, the way an indexer would
    pub async fn ingest(
        &self,
        workspace_id: &str,
        source_id: &str,
        chunks: Vec<CandidateChunk>,
        reindex: bool,
    ) -> DedupResult {
        let exclude = reindex.then_some(source_id);
        let result = self
            .index
            .deduplicate_chunks_at_index(workspace_id, chunks, exclude)
            .await;
        self.index
            .record_indexed_chunks(workspace_id, source_id, &result.unique)
            .await
            .expect("Failed to record chunks");
        result
    }

    /// Number of hashes held for a workspace
    pub async fn count(&self, workspace_id: &str) -> usize {
        self.index.indexed_count(workspace_id).await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_database_is_isolated() {
        let a = TestDedupManager::new_temp();
        let b = TestDedupManager::new_temp();
        assert_ne!(a.path(), b.path());

        a.ingest("ws", "doc", vec![CandidateChunk::new("hello world")], false)
            .await;
        assert_eq!(a.count("ws").await, 1);
        assert_eq!(b.count("ws").await, 0);
    }

    #[tokio::test]
    async fn test_reopen_keeps_hashes() {
        let mut db = TestDedupManager::new_temp();
        db.ingest("ws", "doc", vec![CandidateChunk::new("persisted")], false)
            .await;
        db.reopen();
        assert_eq!(db.count("ws").await, 1);
    }
}
