//! Search and ranking
//!
//! - BM25 keyword scoring over the candidate set
//! - Reciprocal Rank Fusion of semantic, keyword, title and heading signals
//! - Cross-encoder reranking with provider fallback
//! - HyDE-style query enhancement and its caches

pub mod bm25;
pub mod fusion;
mod hyde;
mod reranker;

pub use bm25::{bm25_score, idf, Bm25Corpus, Bm25Params, DEFAULT_B, DEFAULT_K1};
pub use fusion::{fuse, fuse_chunks, weighted_rank_fusion, FusionConfig, DEFAULT_RRF_K};

pub use hyde::{
    classify_intent, hypothetical_passage, paraphrase_variants, CachedQueryEnhancer, QueryIntent,
    TemplateQueryEnhancer, MAX_QUERY_VARIANTS,
};

#[cfg(feature = "remote-rerank")]
pub use reranker::HttpRerankProvider;
pub use reranker::{
    CrossEncoderProvider, CrossEncoderReranker, LexicalOverlapProvider, LlmJudgeProvider,
    RerankOptions, RerankOutcome, RerankerConfig, RerankerError, DEFAULT_RERANK_COUNT,
    DEFAULT_RERANK_TIMEOUT_MS, FALLBACK_PROVIDER, JUDGE_BATCH_SIZE,
};
