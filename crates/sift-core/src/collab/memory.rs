//! In-memory reference collaborators
//!
//! Used by the CLI and the test suites. Similarity is a bag-of-words cosine
//! over normalized tokens: a lexical stand-in for embeddings, which this
//! crate never computes.

use std::collections::HashMap;
use std::ops::RangeInclusive;

use async_trait::async_trait;

use super::{
    CollaboratorError, HybridHit, HybridSearchOptions, Result, SearchFilter, SparseSearch,
    VectorStore,
};
use crate::chunk::CandidateChunk;
use crate::search::bm25::{Bm25Corpus, Bm25Params};
use crate::search::fusion::{weighted_rank_fusion, DEFAULT_RRF_K};
use crate::text::tokenize;

fn term_vector(text: &str) -> HashMap<String, f32> {
    let mut tf = HashMap::new();
    for token in tokenize(text) {
        *tf.entry(token).or_insert(0.0) += 1.0;
    }
    tf
}

fn cosine(a: &HashMap<String, f32>, b: &HashMap<String, f32>) -> f32 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().filter_map(|(t, x)| b.get(t).map(|y| x * y)).sum();
    let norm_a = a.values().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.values().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ============================================================================
// VECTOR STORE
// ============================================================================

/// Vector store over a fixed set of chunks
#[derive(Debug, Clone, Default)]
pub struct InMemoryVectorStore {
    chunks: Vec<CandidateChunk>,
}

impl InMemoryVectorStore {
    /// Store the chunks, assigning point ids to those without one
    pub fn new(chunks: Vec<CandidateChunk>) -> Self {
        let chunks = chunks
            .into_iter()
            .enumerate()
            .map(|(i, mut chunk)| {
                if chunk.id.is_none() {
                    chunk.id = Some(match chunk.address() {
                        Some((source, position)) => format!("{source}#{position}"),
                        None => format!("pt-{i}"),
                    });
                }
                chunk
            })
            .collect();
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[CandidateChunk] {
        &self.chunks
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<CandidateChunk>> {
        let query_vec = term_vector(query);
        let mut scored: Vec<(f32, &CandidateChunk)> = self
            .chunks
            .iter()
            .filter(|c| filter.matches(c))
            .map(|c| (cosine(&query_vec, &term_vector(&c.content)), c))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, chunk)| {
                let mut chunk = chunk.clone();
                chunk.metadata.semantic_score = Some(score);
                chunk
            })
            .collect())
    }

    async fn scroll_source(
        &self,
        workspace_id: &str,
        source_id: &str,
        positions: Option<RangeInclusive<i64>>,
    ) -> Result<Vec<CandidateChunk>> {
        let mut points: Vec<CandidateChunk> = self
            .chunks
            .iter()
            .filter(|c| c.metadata.workspace_id.as_deref() == Some(workspace_id))
            .filter(|c| c.metadata.source_id.as_deref() == Some(source_id))
            .filter(|c| match (&positions, c.metadata.position) {
                (Some(range), Some(pos)) => range.contains(&pos),
                (Some(_), None) => false,
                (None, _) => true,
            })
            .cloned()
            .collect();
        points.sort_by_key(|c| c.metadata.position);
        Ok(points)
    }

    async fn retrieve_points(&self, ids: &[String]) -> Result<Vec<CandidateChunk>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.chunks.iter().find(|c| c.id.as_deref() == Some(id.as_str())))
            .cloned()
            .collect())
    }
}

// ============================================================================
// SPARSE INDEX
// ============================================================================

/// BM25 keyword index fused with the dense results by alpha-weighted RRF
#[derive(Debug, Clone)]
pub struct InMemorySparseIndex {
    store: InMemoryVectorStore,
    params: Bm25Params,
    rrf_k: f32,
}

impl InMemorySparseIndex {
    pub fn new(store: InMemoryVectorStore) -> Self {
        Self {
            store,
            params: Bm25Params::default(),
            rrf_k: DEFAULT_RRF_K,
        }
    }

    pub fn with_params(mut self, params: Bm25Params, rrf_k: f32) -> Self {
        self.params = params;
        self.rrf_k = rrf_k;
        self
    }
}

#[async_trait]
impl SparseSearch for InMemorySparseIndex {
    async fn hybrid_search(
        &self,
        workspace_id: &str,
        query: &str,
        dense_results: &[CandidateChunk],
        options: HybridSearchOptions,
    ) -> Result<Vec<HybridHit>> {
        if query.trim().is_empty() {
            return Err(CollaboratorError::Request("empty query".to_string()));
        }

        let filter = SearchFilter::for_workspace(workspace_id);
        let pool: Vec<&CandidateChunk> = self
            .store
            .chunks()
            .iter()
            .filter(|c| filter.matches(c))
            .collect();
        let texts: Vec<&str> = pool.iter().map(|c| c.content.as_str()).collect();
        let corpus = Bm25Corpus::new(&texts, self.params);

        let sparse: Vec<String> = corpus
            .rank(query)
            .into_iter()
            .take(options.limit)
            .filter_map(|(i, _)| pool[i].id.clone())
            .collect();
        let dense: Vec<String> = dense_results.iter().filter_map(|c| c.id.clone()).collect();

        Ok(weighted_rank_fusion(&dense, &sparse, options.alpha, self.rrf_k)
            .into_iter()
            .take(options.limit)
            .map(|(id, rrf_score, dense_rank, sparse_rank)| HybridHit {
                vector_store_id: Some(id.clone()),
                id,
                rrf_score,
                dense_rank,
                sparse_rank,
            })
            .collect())
    }
}
