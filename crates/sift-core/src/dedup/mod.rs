//! Content Dedup Index
//!
//! Ingest-time deduplication scoped to a workspace. Chunks are identified
//! by a SHA-256 over their normalized content, so whitespace, case and
//! quote-style variants of the same text collide on purpose.
//!
//! The index is consulted before chunks are written to the vector store
//! and updated after a successful write:
//!
//! ```text
//! deduplicate_chunks_at_index -> write unique chunks -> record_indexed_chunks
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::chunk::CandidateChunk;
use crate::storage::{ContentHashRecord, ContentHashStore, Result};

/// Characters of normalized content kept as a record fingerprint
pub const FINGERPRINT_CHARS: usize = 64;

// ============================================================================
// HASHING
// ============================================================================

fn normalize_quote(c: char) -> char {
    match c {
        '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' | '`' | '\u{00B4}' => '\'',
        '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' | '\u{00AB}'
        | '\u{00BB}' => '"',
        other => other,
    }
}

/// Lowercase, straighten quotes, collapse whitespace, trim
pub fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .map(|word| {
            word.chars()
                .map(normalize_quote)
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex SHA-256 of the normalized content
pub fn generate_content_hash(content: &str) -> String {
    let digest = Sha256::digest(normalize_content(content).as_bytes());
    hex::encode(digest)
}

/// Leading characters of the normalized content
pub fn content_fingerprint(content: &str) -> String {
    normalize_content(content)
        .chars()
        .take(FINGERPRINT_CHARS)
        .collect()
}

// ============================================================================
// RESULT TYPES
// ============================================================================

/// A chunk together with its content hash
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashedChunk {
    pub chunk: CandidateChunk,
    pub content_hash: String,
}

/// Why a chunk was classified as duplicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    /// Already present in the persisted index
    Indexed,
    /// Repeats an earlier chunk of the same batch
    InBatch,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateChunk {
    pub chunk: CandidateChunk,
    pub content_hash: String,
    pub reason: DuplicateReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupStats {
    pub total: usize,
    pub unique: usize,
    pub duplicates_indexed: usize,
    pub duplicates_in_batch: usize,
    /// False when the persisted index could not be consulted
    pub store_available: bool,
}

/// Partition of a batch into unique and duplicate chunks
#[derive(Debug, Clone, Serialize)]
pub struct DedupResult {
    pub unique: Vec<HashedChunk>,
    pub duplicates: Vec<DuplicateChunk>,
    pub stats: DedupStats,
}

// ============================================================================
// INDEX
// ============================================================================

/// Workspace-scoped dedup index over a [`ContentHashStore`]
#[derive(Clone)]
pub struct DedupIndex {
    store: Arc<dyn ContentHashStore>,
}

impl DedupIndex {
    pub fn new(store: Arc<dyn ContentHashStore>) -> Self {
        Self { store }
    }

    /// Hashes from `hashes` already indexed in the workspace, ignoring
    /// those owned by `exclude_source_id`
    pub async fn exists_many(
        &self,
        workspace_id: &str,
        hashes: &[String],
        exclude_source_id: Option<&str>,
    ) -> Result<HashSet<String>> {
        self.store
            .existing_hashes(workspace_id, hashes, exclude_source_id)
            .await
    }

    /// Split `chunks` into unique and duplicate before any vector-store write.
    ///
    /// Pass the id of a source being re-indexed as `exclude_source_id` so its
    /// previous version does not count against it. If the store cannot be
    /// reached only in-batch repeats are detected.
    pub async fn deduplicate_chunks_at_index(
        &self,
        workspace_id: &str,
        chunks: Vec<CandidateChunk>,
        exclude_source_id: Option<&str>,
    ) -> DedupResult {
        let hashed: Vec<(CandidateChunk, String)> = chunks
            .into_iter()
            .map(|chunk| {
                let hash = generate_content_hash(&chunk.content);
                (chunk, hash)
            })
            .collect();

        let mut stats = DedupStats {
            total: hashed.len(),
            store_available: true,
            ..DedupStats::default()
        };

        let mut lookup: Vec<String> = Vec::with_capacity(hashed.len());
        let mut seen_lookup = HashSet::new();
        for (_, hash) in &hashed {
            if seen_lookup.insert(hash.as_str()) {
                lookup.push(hash.clone());
            }
        }

        let indexed = match self
            .exists_many(workspace_id, &lookup, exclude_source_id)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    stage = "dedup_lookup",
                    workspace_id = %workspace_id,
                    error = %e,
                    "dedup index unavailable, checking within batch only"
                );
                stats.store_available = false;
                HashSet::new()
            }
        };

        let mut unique = Vec::new();
        let mut duplicates = Vec::new();
        let mut in_batch: HashSet<String> = HashSet::new();

        for (chunk, content_hash) in hashed {
            let reason = if indexed.contains(&content_hash) {
                Some(DuplicateReason::Indexed)
            } else if !in_batch.insert(content_hash.clone()) {
                Some(DuplicateReason::InBatch)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    match reason {
                        DuplicateReason::Indexed => stats.duplicates_indexed += 1,
                        DuplicateReason::InBatch => stats.duplicates_in_batch += 1,
                    }
                    duplicates.push(DuplicateChunk {
                        chunk,
                        content_hash,
                        reason,
                    });
                }
                None => unique.push(HashedChunk {
                    chunk,
                    content_hash,
                }),
            }
        }
        stats.unique = unique.len();

        tracing::debug!(
            workspace_id = %workspace_id,
            total = stats.total,
            unique = stats.unique,
            duplicates_indexed = stats.duplicates_indexed,
            duplicates_in_batch = stats.duplicates_in_batch,
            "dedup partition"
        );

        DedupResult {
            unique,
            duplicates,
            stats,
        }
    }

    /// Record chunks after they were written to the vector store.
    ///
    /// Idempotent; a chunk without a source id is recorded under
    /// `fallback_source_id`.
    pub async fn record_indexed_chunks(
        &self,
        workspace_id: &str,
        fallback_source_id: &str,
        chunks: &[HashedChunk],
    ) -> Result<usize> {
        let now = Utc::now();
        let records: Vec<ContentHashRecord> = chunks
            .iter()
            .enumerate()
            .map(|(i, hashed)| {
                let meta = &hashed.chunk.metadata;
                ContentHashRecord {
                    workspace_id: workspace_id.to_string(),
                    content_hash: hashed.content_hash.clone(),
                    source_id: meta
                        .source_id
                        .clone()
                        .unwrap_or_else(|| fallback_source_id.to_string()),
                    chunk_index: meta.position.unwrap_or(i as i64),
                    fingerprint: content_fingerprint(&hashed.chunk.content),
                    created_at: now,
                }
            })
            .collect();

        let written = self.store.upsert(&records).await?;
        tracing::debug!(
            workspace_id = %workspace_id,
            records = records.len(),
            written,
            "recorded indexed chunks"
        );
        Ok(written)
    }

    /// Forget every hash owned by a source (document deleted)
    pub async fn remove_source(&self, workspace_id: &str, source_id: &str) -> Result<usize> {
        self.store.delete_source(workspace_id, source_id).await
    }

    /// Forget a whole workspace
    pub async fn remove_workspace(&self, workspace_id: &str) -> Result<usize> {
        self.store.delete_workspace(workspace_id).await
    }

    pub async fn indexed_count(&self, workspace_id: &str) -> Result<usize> {
        self.store.count(workspace_id).await
    }
}

impl std::fmt::Debug for DedupIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupIndex").finish_non_exhaustive()
    }
}
