//! Storage Module
//!
//! Persistence for the content dedup index: a keyed
//! `(workspace_id, content_hash)` store behind the [`ContentHashStore`]
//! trait, with a SQLite implementation.

mod migrations;
mod sqlite;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use migrations::{apply_migrations, get_current_version, Migration, MIGRATIONS};
pub use sqlite::{SqliteContentHashStore, LOOKUP_CHUNK_SIZE};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
    /// A connection mutex was poisoned
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
    /// Backend not reachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    /// A blocking database task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// RECORDS
// ============================================================================

/// One indexed chunk's content identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentHashRecord {
    pub workspace_id: String,
    pub content_hash: String,
    pub source_id: String,
    pub chunk_index: i64,
    /// Leading characters of the normalized content, for inspection
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
}

/// Keyed `(workspace_id, content_hash)` persistence
#[async_trait]
pub trait ContentHashStore: Send + Sync {
    /// Which of `hashes` exist in the workspace, ignoring those owned by
    /// `exclude_source_id`
    async fn existing_hashes(
        &self,
        workspace_id: &str,
        hashes: &[String],
        exclude_source_id: Option<&str>,
    ) -> Result<HashSet<String>>;

    /// Idempotent insert-or-refresh; returns rows written
    async fn upsert(&self, records: &[ContentHashRecord]) -> Result<usize>;

    /// Drop every record of one source; returns rows removed
    async fn delete_source(&self, workspace_id: &str, source_id: &str) -> Result<usize>;

    /// Drop every record of a workspace; returns rows removed
    async fn delete_workspace(&self, workspace_id: &str) -> Result<usize>;

    /// Records held for a workspace
    async fn count(&self, workspace_id: &str) -> Result<usize>;
}
