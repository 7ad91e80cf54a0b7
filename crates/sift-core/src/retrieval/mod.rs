//! Retrieval strategy execution
//!
//! The executor turns a first-pass candidate set into the final grounding
//! set: hybrid merge, fusion, reranking, quality filtering, context
//! expansion and compression, as selected by the strategy. Optional stages
//! degrade through [`ResilientCall`]; only the base retrieval can fail a call.

mod compression;
mod executor;
mod expansion;
pub mod heuristics;
mod quality;
mod resilient;
mod strategy;

pub use compression::{compress_documents, CompressionConfig, CompressionResult};
pub use executor::{diversify_by_source, RetrievalEngine, RetrievalEngineBuilder};
pub use expansion::{expand_with_siblings, ExpansionOptions, ExpansionResult};
pub use quality::{
    chunk_tokens, filter_low_quality_chunks, is_code_chunk, QualityFilterOptions, QualityReport,
    DEFAULT_MIN_TOKENS,
};
pub use resilient::{Degradation, DegradationReason, ResilientCall};
pub use strategy::{
    CallOptions, RetrievalMetrics, RetrievalOutcome, Strategy, StrategyConfig, StrategyOverride,
};

use crate::collab::CollaboratorError;

/// Retrieval error types
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The mandatory first-pass retrieval failed
    #[error("Base retrieval failed: {0}")]
    BaseRetrieval(#[from] CollaboratorError),
    /// The caller cancelled before candidates were available
    #[error("Retrieval cancelled")]
    Cancelled,
    /// Strategy name not recognised
    #[error("Unknown retrieval strategy: {0}")]
    UnknownStrategy(String),
}

/// Retrieval result type
pub type Result<T> = std::result::Result<T, RetrievalError>;
