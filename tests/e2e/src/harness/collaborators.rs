//! Failure-injecting collaborators
//!
//! Each wraps or replaces a real collaborator so tests can force the
//! degraded paths of the engine: failing or slow searches, hanging
//! cross-encoders, broken query enhancement and misbehaving compressors.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sift_core::collab::{Compressor, QueryEnhancer, Result, SearchFilter, VectorStore};
use sift_core::search::{CrossEncoderProvider, RerankerError};
use sift_core::{CandidateChunk, CollaboratorError, InMemoryVectorStore};

// ============================================================================
// VECTOR STORE
// ============================================================================

/// In-memory vector store with scripted failures and call counters
///
/// # Example
///
/// ```rust,ignore
/// let store = FlakyVectorStore::new(chunks)
///     .failing_queries_containing("async-std")
///     .failing_scroll();
/// ```
pub struct FlakyVectorStore {
    inner: InMemoryVectorStore,
    fail_search: bool,
    fail_queries_containing: Option<String>,
    fail_scroll: bool,
    hang_scroll_for: Option<String>,
    search_delay: Option<Duration>,
    searches: AtomicUsize,
    scrolls: AtomicUsize,
}

impl FlakyVectorStore {
    pub fn new(chunks: Vec<CandidateChunk>) -> Self {
        Self {
            inner: InMemoryVectorStore::new(chunks),
            fail_search: false,
            fail_queries_containing: None,
            fail_scroll: false,
            hang_scroll_for: None,
            search_delay: None,
            searches: AtomicUsize::new(0),
            scrolls: AtomicUsize::new(0),
        }
    }

    /// Every similarity search fails
    pub fn failing_search(mut self) -> Self {
        self.fail_search = true;
        self
    }

    /// Searches whose query contains `needle` fail
    pub fn failing_queries_containing(mut self, needle: impl Into<String>) -> Self {
        self.fail_queries_containing = Some(needle.into());
        self
    }

    /// Sibling lookups fail
    pub fn failing_scroll(mut self) -> Self {
        self.fail_scroll = true;
        self
    }

    /// Sibling lookups of `source_id` never answer
    pub fn hanging_scroll_for(mut self, source_id: impl Into<String>) -> Self {
        self.hang_scroll_for = Some(source_id.into());
        self
    }

    /// Every similarity search waits this long first
    pub fn with_search_delay(mut self, delay: Duration) -> Self {
        self.search_delay = Some(delay);
        self
    }

    pub fn search_calls(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    pub fn scroll_calls(&self) -> usize {
        self.scrolls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryVectorStore {
        &self.inner
    }
}

#[async_trait]
impl VectorStore for FlakyVectorStore {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<CandidateChunk>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.search_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_search {
            return Err(CollaboratorError::Unavailable("vector store offline".into()));
        }
        if let Some(needle) = &self.fail_queries_containing
            && query.contains(needle.as_str())
        {
            return Err(CollaboratorError::Request(format!("query rejected: {query}")));
        }
        self.inner.similarity_search(query, k, filter).await
    }

    async fn scroll_source(
        &self,
        workspace_id: &str,
        source_id: &str,
        positions: Option<RangeInclusive<i64>>,
    ) -> Result<Vec<CandidateChunk>> {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
        if self.hang_scroll_for.as_deref() == Some(source_id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_scroll {
            return Err(CollaboratorError::Request("scroll failed".into()));
        }
        self.inner.scroll_source(workspace_id, source_id, positions).await
    }

    async fn retrieve_points(&self, ids: &[String]) -> Result<Vec<CandidateChunk>> {
        self.inner.retrieve_points(ids).await
    }
}

// ============================================================================
// CROSS-ENCODERS
// ============================================================================

/// Never answers
pub struct HangingCrossEncoder;

#[async_trait]
impl CrossEncoderProvider for HangingCrossEncoder {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn score(
        &self,
        _query: &str,
        documents: &[String],
    ) -> std::result::Result<Vec<f32>, RerankerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![0.0; documents.len()])
    }
}

/// Always errors
pub struct FailingCrossEncoder;

#[async_trait]
impl CrossEncoderProvider for FailingCrossEncoder {
    fn name(&self) -> &str {
        "failing"
    }

    async fn score(
        &self,
        _query: &str,
        _documents: &[String],
    ) -> std::result::Result<Vec<f32>, RerankerError> {
        Err(RerankerError::Provider("model unavailable".into()))
    }
}

// ============================================================================
// QUERY ENHANCERS
// ============================================================================

/// Fixed paraphrases and passage, with call counting
pub struct ScriptedEnhancer {
    variants: Vec<String>,
    passage: String,
    calls: AtomicUsize,
}

impl ScriptedEnhancer {
    pub fn new<I, S>(variants: I, passage: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            variants: variants.into_iter().map(Into::into).collect(),
            passage: passage.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Expansion and HyDE calls that reached this enhancer
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryEnhancer for ScriptedEnhancer {
    async fn expand_query(&self, _query: &str) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.variants.clone())
    }

    async fn hypothetical_document(&self, _query: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.passage.clone())
    }
}

/// Every enhancement fails
pub struct FailingEnhancer;

#[async_trait]
impl QueryEnhancer for FailingEnhancer {
    async fn expand_query(&self, _query: &str) -> Result<Vec<String>> {
        Err(CollaboratorError::Request("llm quota exceeded".into()))
    }

    async fn hypothetical_document(&self, _query: &str) -> Result<String> {
        Err(CollaboratorError::Request("llm quota exceeded".into()))
    }
}

/// Answers only after `delay`
pub struct SlowEnhancer {
    pub delay: Duration,
}

#[async_trait]
impl QueryEnhancer for SlowEnhancer {
    async fn expand_query(&self, query: &str) -> Result<Vec<String>> {
        tokio::time::sleep(self.delay).await;
        Ok(vec![format!("{query} explained")])
    }

    async fn hypothetical_document(&self, query: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("An answer about {query}."))
    }
}

// ============================================================================
// COMPRESSORS
// ============================================================================

/// Keeps the first sentence of each document
pub struct SummaryCompressor;

#[async_trait]
impl Compressor for SummaryCompressor {
    async fn extract(&self, _query: &str, document: &str) -> Result<String> {
        let first = document
            .split_inclusive('.')
            .next()
            .unwrap_or(document)
            .trim()
            .to_string();
        Ok(first)
    }
}

/// Hangs on its first document, then behaves like [`SummaryCompressor`]
#[derive(Default)]
pub struct StallingCompressor {
    calls: AtomicUsize,
}

#[async_trait]
impl Compressor for StallingCompressor {
    async fn extract(&self, query: &str, document: &str) -> Result<String> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        SummaryCompressor.extract(query, document).await
    }
}

/// Returns more text than it was given
pub struct GrowingCompressor;

#[async_trait]
impl Compressor for GrowingCompressor {
    async fn extract(&self, _query: &str, document: &str) -> Result<String> {
        Ok(format!("{document} {document}"))
    }
}
