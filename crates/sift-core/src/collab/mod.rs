//! External collaborators
//!
//! The ranking engine never owns a vector store, a sparse index or an LLM.
//! It talks to them through these object-safe async traits, held as
//! `Arc<dyn ...>` by the engine. Every method is a suspension point.

mod memory;

pub use memory::{InMemorySparseIndex, InMemoryVectorStore};

use std::ops::RangeInclusive;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunk::CandidateChunk;

// ============================================================================
// ERRORS
// ============================================================================

/// Failure reported by an external collaborator
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    /// Collaborator not configured or not reachable
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    /// The call itself failed
    #[error("request failed: {0}")]
    Request(String),
    /// The call did not finish in time
    #[error("timed out after {0} ms")]
    Timeout(u64),
    /// The call was cancelled by the caller
    #[error("cancelled")]
    Cancelled,
    /// The collaborator answered with something unusable
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Collaborator result type
pub type Result<T> = std::result::Result<T, CollaboratorError>;

// ============================================================================
// VECTOR STORE
// ============================================================================

/// Filter passed through to the vector store
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilter {
    pub workspace_id: Option<String>,
    /// Restrict to these sources (empty = all)
    pub source_ids: Vec<String>,
}

impl SearchFilter {
    pub fn for_workspace(workspace_id: impl Into<String>) -> Self {
        Self {
            workspace_id: Some(workspace_id.into()),
            source_ids: Vec::new(),
        }
    }

    /// True when a chunk passes the filter
    pub fn matches(&self, chunk: &CandidateChunk) -> bool {
        let workspace_ok = match (&self.workspace_id, &chunk.metadata.workspace_id) {
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
            (None, _) => true,
        };
        let source_ok = self.source_ids.is_empty()
            || chunk
                .metadata
                .source_id
                .as_ref()
                .is_some_and(|s| self.source_ids.contains(s));
        workspace_ok && source_ok
    }
}

/// Dense vector store
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// First-pass candidates, best first, each carrying `semantic_score`
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<CandidateChunk>>;

    /// Points of one source, optionally restricted to a position range
    async fn scroll_source(
        &self,
        workspace_id: &str,
        source_id: &str,
        positions: Option<RangeInclusive<i64>>,
    ) -> Result<Vec<CandidateChunk>>;

    /// Hydrate points by id (used for sparse-only hits)
    async fn retrieve_points(&self, ids: &[String]) -> Result<Vec<CandidateChunk>>;
}

// ============================================================================
// SPARSE / HYBRID SEARCH
// ============================================================================

/// Options for a hybrid search call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HybridSearchOptions {
    pub limit: usize,
    /// Dense weight; sparse gets `1 - alpha`
    pub alpha: f32,
}

/// One fused hit from the hybrid collaborator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HybridHit {
    pub id: String,
    pub rrf_score: f32,
    pub dense_rank: Option<usize>,
    pub sparse_rank: Option<usize>,
    /// Point id in the vector store, when it differs from `id`
    pub vector_store_id: Option<String>,
}

impl HybridHit {
    /// Id to hydrate this hit by
    pub fn point_id(&self) -> &str {
        self.vector_store_id.as_deref().unwrap_or(&self.id)
    }
}

/// Keyword-weighted search fused with the dense results
#[async_trait]
pub trait SparseSearch: Send + Sync {
    async fn hybrid_search(
        &self,
        workspace_id: &str,
        query: &str,
        dense_results: &[CandidateChunk],
        options: HybridSearchOptions,
    ) -> Result<Vec<HybridHit>>;
}

// ============================================================================
// LLM-BACKED ENHANCEMENTS
// ============================================================================

/// Query rewriting collaborator
#[async_trait]
pub trait QueryEnhancer: Send + Sync {
    /// Paraphrases of the query (at most 3 are used)
    async fn expand_query(&self, query: &str) -> Result<Vec<String>>;

    /// A synthetic passage answering the query (HyDE probe)
    async fn hypothetical_document(&self, query: &str) -> Result<String>;
}

/// Rewrites a document into a query-relevant extract
#[async_trait]
pub trait Compressor: Send + Sync {
    async fn extract(&self, query: &str, document: &str) -> Result<String>;
}

/// Scores a single (query, document) pair, typically via an LLM prompt
#[async_trait]
pub trait RelevanceJudge: Send + Sync {
    /// Relevance in `[0, 1]`
    async fn judge(&self, query: &str, document: &str) -> Result<f32>;
}
