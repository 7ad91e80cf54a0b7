//! Cross-Encoder Reranking
//!
//! ## Two-Stage Retrieval
//!
//! 1. Stage 1: fused first-pass candidates (fast, high recall)
//! 2. Stage 2: a cross-encoder scores each (query, chunk) pair (slower, precise)
//!
//! Providers are pluggable: a remote rerank API, an LLM judge scored in
//! batches of 5, or local term-overlap scoring. `CrossEncoderReranker::rerank`
//! never fails: on timeout or any provider error it returns the original
//! order tagged `provider = "fallback"`, `success = false`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::{CacheSettings, TtlCache};
use crate::chunk::{content_key, CandidateChunk};
use crate::collab::RelevanceJudge;
use crate::text::tokenize;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default provider timeout
pub const DEFAULT_RERANK_TIMEOUT_MS: u64 = 10_000;

/// Default number of results after reranking
pub const DEFAULT_RERANK_COUNT: usize = 10;

/// LLM judge calls awaited together
pub const JUDGE_BATCH_SIZE: usize = 5;

/// Provider name reported when reranking degraded
pub const FALLBACK_PROVIDER: &str = "fallback";

// ============================================================================
// TYPES
// ============================================================================

/// Reranker error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum RerankerError {
    /// Provider call failed
    #[error("Reranking failed: {0}")]
    Provider(String),
    /// Provider did not answer in time
    #[error("Reranking timed out after {0} ms")]
    Timeout(u64),
    /// Provider answered with the wrong shape
    #[error("Invalid reranker response: {0}")]
    InvalidResponse(String),
}

/// Options for one rerank call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankOptions {
    /// Keep at most this many documents
    pub top_n: usize,
    /// Drop documents scoring below this (never empties the list)
    pub min_score: Option<f32>,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_RERANK_COUNT,
            min_score: None,
        }
    }
}

/// Result of a rerank call
#[derive(Debug, Clone)]
pub struct RerankOutcome {
    pub documents: Vec<CandidateChunk>,
    /// Name of the provider that produced the order, or `"fallback"`
    pub provider: String,
    pub processing_time_ms: u64,
    pub success: bool,
    /// Served from the result cache
    pub cached: bool,
}

/// Configuration for reranking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RerankerConfig {
    pub timeout_ms: u64,
    pub default_top_n: usize,
    pub min_score: Option<f32>,
    pub cache: CacheSettings,
    /// Remote endpoint (Cohere/Jina-style `/rerank`)
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_RERANK_TIMEOUT_MS,
            default_top_n: DEFAULT_RERANK_COUNT,
            min_score: None,
            cache: CacheSettings {
                capacity: 200,
                ttl_secs: 300,
            },
            endpoint: None,
            api_key: None,
            model: None,
        }
    }
}

// ============================================================================
// PROVIDERS
// ============================================================================

/// A cross-encoder scoring backend
#[async_trait]
pub trait CrossEncoderProvider: Send + Sync {
    /// Name reported in rerank outcomes
    fn name(&self) -> &str;

    /// One relevance score per document, aligned with the input
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankerError>;
}

/// Term-overlap scoring, BM25-shaped, with no model or network
#[derive(Debug, Clone, Default)]
pub struct LexicalOverlapProvider;

impl LexicalOverlapProvider {
    fn relevance(query_terms: &[String], document: &str) -> f32 {
        let doc_terms = tokenize(document);
        let doc_len = doc_terms.len() as f32;
        if doc_len == 0.0 || query_terms.is_empty() {
            return 0.0;
        }

        let k1 = 1.2_f32;
        let b = 0.75_f32;
        let avg_doc_len = 100.0_f32;

        let mut score = 0.0;
        for term in query_terms {
            let tf = doc_terms.iter().filter(|t| *t == term).count() as f32;
            if tf > 0.0 {
                let numerator = tf * (k1 + 1.0);
                let denominator = tf + k1 * (1.0 - b + b * (doc_len / avg_doc_len));
                score += numerator / denominator;
            }
        }
        score / query_terms.len() as f32
    }
}

#[async_trait]
impl CrossEncoderProvider for LexicalOverlapProvider {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankerError> {
        let query_terms = tokenize(query);
        Ok(documents
            .iter()
            .map(|doc| Self::relevance(&query_terms, doc))
            .collect())
    }
}

/// Scores each pair through an LLM judge, `JUDGE_BATCH_SIZE` calls at a time.
/// Each batch is awaited before the next one starts.
pub struct LlmJudgeProvider {
    judge: Arc<dyn RelevanceJudge>,
}

impl LlmJudgeProvider {
    pub fn new(judge: Arc<dyn RelevanceJudge>) -> Self {
        Self { judge }
    }
}

#[async_trait]
impl CrossEncoderProvider for LlmJudgeProvider {
    fn name(&self) -> &str {
        "llm"
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankerError> {
        let mut scores = Vec::with_capacity(documents.len());
        for batch in documents.chunks(JUDGE_BATCH_SIZE) {
            let results =
                futures::future::join_all(batch.iter().map(|doc| self.judge.judge(query, doc)))
                    .await;
            for result in results {
                let score = result.map_err(|e| RerankerError::Provider(e.to_string()))?;
                scores.push(score.clamp(0.0, 1.0));
            }
        }
        Ok(scores)
    }
}

/// Remote rerank API (`POST {endpoint}` with `{model, query, documents, top_n}`)
#[cfg(feature = "remote-rerank")]
pub struct HttpRerankProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

#[cfg(feature = "remote-rerank")]
#[derive(Debug, Deserialize)]
struct RemoteRerankResponse {
    results: Vec<RemoteRerankResult>,
}

#[cfg(feature = "remote-rerank")]
#[derive(Debug, Deserialize)]
struct RemoteRerankResult {
    index: usize,
    relevance_score: f32,
}

#[cfg(feature = "remote-rerank")]
impl HttpRerankProvider {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
        }
    }

    /// Build from config, if an endpoint is configured
    pub fn from_config(config: &RerankerConfig) -> Option<Self> {
        let endpoint = config.endpoint.clone()?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| "rerank-english-v3.0".to_string());
        Some(Self::new(endpoint, config.api_key.clone(), model))
    }
}

#[cfg(feature = "remote-rerank")]
#[async_trait]
impl CrossEncoderProvider for HttpRerankProvider {
    fn name(&self) -> &str {
        "remote"
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, RerankerError> {
        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
            "top_n": documents.len(),
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RerankerError::Provider(e.to_string()))?;
        let parsed: RemoteRerankResponse = response
            .json()
            .await
            .map_err(|e| RerankerError::InvalidResponse(e.to_string()))?;

        let mut scores = vec![0.0; documents.len()];
        for result in parsed.results {
            let slot = scores.get_mut(result.index).ok_or_else(|| {
                RerankerError::InvalidResponse(format!("index {} out of range", result.index))
            })?;
            *slot = result.relevance_score;
        }
        Ok(scores)
    }
}

// ============================================================================
// RERANKER SERVICE
// ============================================================================

/// Cross-encoder reranking stage with timeout, fallback and result cache
pub struct CrossEncoderReranker {
    provider: Option<Arc<dyn CrossEncoderProvider>>,
    config: RerankerConfig,
    cache: TtlCache<String, Vec<f32>>,
}

impl CrossEncoderReranker {
    pub fn new(provider: Option<Arc<dyn CrossEncoderProvider>>, config: RerankerConfig) -> Self {
        let cache = TtlCache::from_settings(config.cache);
        Self {
            provider,
            config,
            cache,
        }
    }

    /// Reranker without a provider: every call falls back
    pub fn disabled() -> Self {
        Self::new(None, RerankerConfig::default())
    }

    pub fn config(&self) -> &RerankerConfig {
        &self.config
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn cache_key(query: &str, docs: &[CandidateChunk]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        for doc in docs {
            hasher.update([0u8]);
            hasher.update(doc.identity().0.as_bytes());
            hasher.update([0u8]);
            hasher.update(content_key(&doc.content).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    fn fallback(mut docs: Vec<CandidateChunk>, top_n: usize, started: Instant) -> RerankOutcome {
        docs.truncate(top_n);
        RerankOutcome {
            documents: docs,
            provider: FALLBACK_PROVIDER.to_string(),
            processing_time_ms: started.elapsed().as_millis() as u64,
            success: false,
            cached: false,
        }
    }

    fn apply_scores(
        docs: Vec<CandidateChunk>,
        scores: &[f32],
        options: RerankOptions,
    ) -> Vec<CandidateChunk> {
        let mut scored: Vec<CandidateChunk> = docs
            .into_iter()
            .zip(scores.iter().copied())
            .map(|(mut doc, score)| {
                doc.metadata.rerank_score = Some(score);
                doc
            })
            .collect();
        scored.sort_by(|a, b| {
            b.metadata
                .rerank_score
                .unwrap_or(0.0)
                .total_cmp(&a.metadata.rerank_score.unwrap_or(0.0))
        });

        if let Some(min_score) = options.min_score {
            let best = scored.first().cloned();
            scored.retain(|d| d.metadata.rerank_score.unwrap_or(0.0) >= min_score);
            if scored.is_empty()
                && let Some(best) = best
            {
                scored.push(best);
            }
        }

        scored.truncate(options.top_n);
        scored
    }

    /// Rerank `docs` for `query`. Never fails.
    pub async fn rerank(
        &self,
        query: &str,
        docs: Vec<CandidateChunk>,
        options: RerankOptions,
    ) -> RerankOutcome {
        let started = Instant::now();
        let options = RerankOptions {
            min_score: options.min_score.or(self.config.min_score),
            ..options
        };

        if docs.is_empty() {
            return RerankOutcome {
                documents: docs,
                provider: self
                    .provider
                    .as_ref()
                    .map(|p| p.name().to_string())
                    .unwrap_or_else(|| FALLBACK_PROVIDER.to_string()),
                processing_time_ms: 0,
                success: self.provider.is_some(),
                cached: false,
            };
        }

        let Some(provider) = self.provider.as_ref() else {
            tracing::debug!("no cross-encoder provider configured; keeping original order");
            return Self::fallback(docs, options.top_n, started);
        };

        let key = Self::cache_key(query, &docs);
        if let Some(scores) = self.cache.get(&key)
            && scores.len() == docs.len()
        {
            let documents = Self::apply_scores(docs, &scores, options);
            return RerankOutcome {
                documents,
                provider: provider.name().to_string(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                success: true,
                cached: true,
            };
        }

        let texts: Vec<String> = docs.iter().map(|d| d.content.clone()).collect();
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let result = match tokio::time::timeout(timeout, provider.score(query, &texts)).await {
            Ok(Ok(scores)) if scores.len() == docs.len() => Ok(scores),
            Ok(Ok(scores)) => Err(RerankerError::InvalidResponse(format!(
                "expected {} scores, got {}",
                docs.len(),
                scores.len()
            ))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RerankerError::Timeout(self.config.timeout_ms)),
        };

        match result {
            Ok(scores) => {
                self.cache.insert(key, scores.clone());
                let documents = Self::apply_scores(docs, &scores, options);
                let elapsed = started.elapsed().as_millis() as u64;
                tracing::debug!(
                    provider = provider.name(),
                    kept = documents.len(),
                    elapsed_ms = elapsed,
                    "cross-encoder rerank complete"
                );
                RerankOutcome {
                    documents,
                    provider: provider.name().to_string(),
                    processing_time_ms: elapsed,
                    success: true,
                    cached: false,
                }
            }
            Err(e) => {
                tracing::warn!(
                    stage = "cross_encoder",
                    provider = provider.name(),
                    error = %e,
                    "rerank failed; keeping original order"
                );
                Self::fallback(docs, options.top_n, started)
            }
        }
    }
}

impl std::fmt::Debug for CrossEncoderReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossEncoderReranker")
            .field("provider", &self.provider.as_ref().map(|p| p.name().to_string()))
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
