//! Retrieval strategies, their configuration and per-call metrics

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::quality::QualityReport;
use super::resilient::Degradation;
use super::RetrievalError;
use crate::chunk::CandidateChunk;
use crate::collab::SearchFilter;

// ============================================================================
// STRATEGY
// ============================================================================

/// Retrieval strategy, chosen upstream from the query intent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Single retrieval, fused and filtered
    Focused,
    /// One retrieval per compared entity, or paraphrase union
    MultiAspect,
    /// Paraphrases plus a hypothetical-answer probe
    Deep,
    /// Wide paraphrase union, diversified across sources
    Broad,
    /// Answer from the conversation context already held
    ContextOnly,
    NoRetrieval,
    Decline,
}

impl Strategy {
    pub const ALL: [Strategy; 7] = [
        Strategy::Focused,
        Strategy::MultiAspect,
        Strategy::Deep,
        Strategy::Broad,
        Strategy::ContextOnly,
        Strategy::NoRetrieval,
        Strategy::Decline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Focused => "focused",
            Strategy::MultiAspect => "multi_aspect",
            Strategy::Deep => "deep",
            Strategy::Broad => "broad",
            Strategy::ContextOnly => "context_only",
            Strategy::NoRetrieval => "no_retrieval",
            Strategy::Decline => "decline",
        }
    }

    /// Strategy never touches a collaborator
    pub fn is_empty(&self) -> bool {
        matches!(self, Strategy::NoRetrieval | Strategy::Decline)
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Strategy {
    type Err = RetrievalError;

    /// Case-insensitive, `-` and `_` interchangeable. Unknown names are errors.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "focused" => Ok(Strategy::Focused),
            "multi_aspect" => Ok(Strategy::MultiAspect),
            "deep" => Ok(Strategy::Deep),
            "broad" => Ok(Strategy::Broad),
            "context_only" => Ok(Strategy::ContextOnly),
            "no_retrieval" => Ok(Strategy::NoRetrieval),
            "decline" => Ok(Strategy::Decline),
            _ => Err(RetrievalError::UnknownStrategy(s.to_string())),
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Per-strategy knobs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    /// Final result size
    pub top_k: usize,
    /// Documents kept by the cross-encoder
    pub rerank_top_k: usize,
    /// First-pass fetch size = max(topK, rerankTopK) * multiplier
    pub candidate_multiplier: usize,
    pub use_query_expansion: bool,
    #[serde(rename = "useHyDE")]
    pub use_hyde: bool,
    pub use_compression: bool,
    pub use_reranking: bool,
    pub diversify_results: bool,
    pub split_comparison: bool,
    /// Merge sparse/hybrid results into the dense list
    pub use_hybrid: bool,
    /// Dense weight of the hybrid merge
    pub hybrid_alpha: f32,
    /// Run the four-signal RRF fusion
    pub use_rrf: bool,
    pub use_context_expansion: bool,
    pub min_rerank_score: Option<f32>,
}

impl StrategyConfig {
    /// Baseline settings for each strategy
    pub fn defaults_for(strategy: Strategy) -> Self {
        let base = StrategyConfig {
            top_k: 5,
            rerank_top_k: 5,
            candidate_multiplier: 2,
            use_query_expansion: false,
            use_hyde: false,
            use_compression: false,
            use_reranking: false,
            diversify_results: false,
            split_comparison: false,
            use_hybrid: false,
            hybrid_alpha: 0.5,
            use_rrf: false,
            use_context_expansion: false,
            min_rerank_score: None,
        };
        match strategy {
            Strategy::Focused => StrategyConfig {
                use_hybrid: true,
                use_rrf: true,
                use_context_expansion: true,
                ..base
            },
            Strategy::MultiAspect => StrategyConfig {
                top_k: 8,
                rerank_top_k: 8,
                use_query_expansion: true,
                use_reranking: true,
                split_comparison: true,
                ..base
            },
            Strategy::Deep => StrategyConfig {
                top_k: 8,
                rerank_top_k: 8,
                use_query_expansion: true,
                use_hyde: true,
                use_reranking: true,
                use_compression: true,
                ..base
            },
            Strategy::Broad => StrategyConfig {
                top_k: 12,
                rerank_top_k: 12,
                use_query_expansion: true,
                diversify_results: true,
                ..base
            },
            Strategy::ContextOnly => StrategyConfig {
                top_k: 0,
                rerank_top_k: 0,
                ..base
            },
            Strategy::NoRetrieval | Strategy::Decline => StrategyConfig {
                top_k: 0,
                rerank_top_k: 0,
                candidate_multiplier: 0,
                ..base
            },
        }
    }

    /// Number of candidates to request from the vector store
    pub fn fetch_k(&self) -> usize {
        self.top_k.max(self.rerank_top_k) * self.candidate_multiplier.max(1)
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::defaults_for(Strategy::Focused)
    }
}

/// Partial override of a strategy's defaults, as found in config files
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct StrategyOverride {
    pub top_k: Option<usize>,
    pub rerank_top_k: Option<usize>,
    pub candidate_multiplier: Option<usize>,
    pub use_query_expansion: Option<bool>,
    #[serde(rename = "useHyDE")]
    pub use_hyde: Option<bool>,
    pub use_compression: Option<bool>,
    pub use_reranking: Option<bool>,
    pub diversify_results: Option<bool>,
    pub split_comparison: Option<bool>,
    pub use_hybrid: Option<bool>,
    pub hybrid_alpha: Option<f32>,
    pub use_rrf: Option<bool>,
    pub use_context_expansion: Option<bool>,
    pub min_rerank_score: Option<f32>,
}

impl StrategyOverride {
    pub fn apply(&self, base: StrategyConfig) -> StrategyConfig {
        StrategyConfig {
            top_k: self.top_k.unwrap_or(base.top_k),
            rerank_top_k: self.rerank_top_k.unwrap_or(base.rerank_top_k),
            candidate_multiplier: self.candidate_multiplier.unwrap_or(base.candidate_multiplier),
            use_query_expansion: self.use_query_expansion.unwrap_or(base.use_query_expansion),
            use_hyde: self.use_hyde.unwrap_or(base.use_hyde),
            use_compression: self.use_compression.unwrap_or(base.use_compression),
            use_reranking: self.use_reranking.unwrap_or(base.use_reranking),
            diversify_results: self.diversify_results.unwrap_or(base.diversify_results),
            split_comparison: self.split_comparison.unwrap_or(base.split_comparison),
            use_hybrid: self.use_hybrid.unwrap_or(base.use_hybrid),
            hybrid_alpha: self.hybrid_alpha.unwrap_or(base.hybrid_alpha),
            use_rrf: self.use_rrf.unwrap_or(base.use_rrf),
            use_context_expansion: self.use_context_expansion.unwrap_or(base.use_context_expansion),
            min_rerank_score: self.min_rerank_score.or(base.min_rerank_score),
        }
    }
}

// ============================================================================
// CALL OPTIONS / OUTCOME
// ============================================================================

/// Per-call inputs supplied by the orchestrator
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub filter: SearchFilter,
    pub workspace_id: Option<String>,
    /// Named entities of a comparison query
    pub entities: Vec<String>,
    /// Chunks already held by the conversation
    pub conversation_context: Vec<CandidateChunk>,
    pub cancel: CancellationToken,
}

impl CallOptions {
    pub fn for_workspace(workspace_id: impl Into<String>) -> Self {
        let workspace_id = workspace_id.into();
        Self {
            filter: SearchFilter::for_workspace(workspace_id.clone()),
            workspace_id: Some(workspace_id),
            ..Default::default()
        }
    }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = entities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_context(mut self, context: Vec<CandidateChunk>) -> Self {
        self.conversation_context = context;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// What one strategy execution did
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalMetrics {
    pub strategy: String,
    pub retrieval_calls: usize,
    pub candidates_retrieved: usize,
    pub after_dedup: usize,
    pub after_rerank: usize,
    pub after_filter: usize,
    pub final_count: usize,
    pub siblings_added: usize,
    pub docs_compressed: usize,
    pub reranker_provider: Option<String>,
    pub rerank_success: Option<bool>,
    pub quality: Option<QualityReport>,
    /// Optional stages that fell back
    pub degraded: Vec<Degradation>,
    pub elapsed_ms: u64,
}

impl RetrievalMetrics {
    /// Metrics of a strategy that did no work
    pub fn zero(strategy: Strategy) -> Self {
        Self {
            strategy: strategy.to_string(),
            ..Default::default()
        }
    }
}

/// Result of one strategy execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalOutcome {
    pub documents: Vec<CandidateChunk>,
    pub metrics: RetrievalMetrics,
    pub strategy_name: Strategy,
}
