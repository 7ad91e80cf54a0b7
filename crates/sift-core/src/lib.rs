//! # Sift Core
//!
//! Hybrid retrieval ranking for retrieval-augmented generation. Turns a
//! first-pass candidate set of text chunks into a final, deduplicated,
//! quality-filtered and optionally reranked grounding set.
//!
//! - **BM25**: Okapi BM25 with IDF estimated over the candidate set itself
//! - **Multi-signal RRF**: semantic, keyword, title and heading ranks fused
//!   with Reciprocal Rank Fusion (k = 60)
//! - **Strategies**: focused, multi-aspect, deep, broad and context-only
//!   retrieval pipelines selected per query intent
//! - **Context Expansion**: neighbouring chunks of the same source
//! - **Quality Filter**: junk, tiny and off-topic code chunks dropped
//! - **Cross-Encoder Rerank**: pluggable providers, never fails a query
//! - **Dedup Index**: workspace-scoped content hashes checked at ingest
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sift_core::{CallOptions, CandidateChunk, InMemoryVectorStore, RetrievalEngine, Strategy};
//!
//! let store = Arc::new(InMemoryVectorStore::new(vec![
//!     CandidateChunk::new("Tokio is an asynchronous runtime").with_source("tokio.md", 0),
//! ]));
//! let engine = RetrievalEngine::builder(store).build();
//! let outcome = engine
//!     .execute_named("focused", "what is tokio", &CallOptions::default())
//!     .await?;
//! for doc in &outcome.documents {
//!     println!("{:.3} {}", doc.effective_score(), doc.content);
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): compile SQLite into the binary
//! - `remote-rerank` (default): HTTP cross-encoder provider via reqwest

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod cache;
pub mod chunk;
pub mod collab;
pub mod config;
pub mod dedup;
pub mod retrieval;
pub mod search;
pub mod storage;
pub mod text;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Chunk model
pub use chunk::{
    content_key, dedupe_chunks, BlockType, CandidateChunk, ChunkId, ChunkMetadata, ExpansionType,
    RankedEntry,
};

// Text helpers
pub use text::{
    estimate_tokens, heading_path_similarity, normalize_for_match, title_similarity, tokenize,
};

// Ranking
pub use search::{
    bm25_score, fuse, fuse_chunks, weighted_rank_fusion, Bm25Corpus, Bm25Params,
    CachedQueryEnhancer, CrossEncoderProvider, CrossEncoderReranker, FusionConfig,
    LexicalOverlapProvider, LlmJudgeProvider, RerankOptions, RerankOutcome, RerankerConfig,
    TemplateQueryEnhancer, DEFAULT_RRF_K,
};

#[cfg(feature = "remote-rerank")]
pub use search::HttpRerankProvider;

// Retrieval pipeline
pub use retrieval::{
    filter_low_quality_chunks, CallOptions, Degradation, DegradationReason, QualityFilterOptions,
    QualityReport, RetrievalEngine, RetrievalEngineBuilder, RetrievalError, RetrievalMetrics,
    RetrievalOutcome, Strategy, StrategyConfig, StrategyOverride,
};

// Collaborators
pub use collab::{
    CollaboratorError, Compressor, InMemorySparseIndex, InMemoryVectorStore, QueryEnhancer,
    RelevanceJudge, SearchFilter, SparseSearch, VectorStore,
};

// Dedup
pub use dedup::{
    content_fingerprint, generate_content_hash, normalize_content, DedupIndex, DedupResult,
    DedupStats, DuplicateReason,
};
pub use storage::{ContentHashStore, SqliteContentHashStore, StorageError};

// Configuration
pub use config::{ConfigError, SiftConfig};

pub use cache::{CacheSettings, TtlCache};

// Tokens threaded through call options
pub use tokio_util::sync::CancellationToken;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        CallOptions, CandidateChunk, CancellationToken, CrossEncoderReranker, DedupIndex,
        InMemoryVectorStore, RetrievalEngine, RetrievalError, SiftConfig, Strategy,
    };
}
