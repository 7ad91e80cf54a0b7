//! Reciprocal Rank Fusion (semantic + BM25 + title + heading path)
//!
//! Merges up to four rankings of the same candidate set with
//! `score(d) = sum of 1/(k + rank(d))` over every signal `d` participates in.
//! Absence from a signal contributes nothing; it is not a worst rank.
//!
//! RRF is robust to differing score scales, rewards agreement between
//! signals, and `k` (60) dampens the influence of the very top ranks.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::chunk::{CandidateChunk, ChunkId, RankedEntry};
use crate::search::bm25::{Bm25Corpus, Bm25Params};
use crate::text::{heading_path_similarity, title_similarity};

/// Default RRF constant
pub const DEFAULT_RRF_K: f32 = 60.0;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Thresholds and bonuses for the fusion engine
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct FusionConfig {
    /// RRF constant
    pub k: f32,
    /// Title similarity must exceed this to contribute (weak matches are noise)
    pub title_threshold: f32,
    /// Near-exact title match threshold
    pub title_bonus_threshold: f32,
    pub title_bonus: f32,
    pub heading_threshold: f32,
    pub heading_bonus_threshold: f32,
    pub heading_bonus: f32,
    /// Set from the top-level `bm25` section, never read from `fusion`
    #[serde(skip)]
    pub bm25: Bm25Params,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_RRF_K,
            title_threshold: 0.3,
            title_bonus_threshold: 0.8,
            title_bonus: 0.05,
            heading_threshold: 0.3,
            heading_bonus_threshold: 0.6,
            heading_bonus: 0.03,
            bm25: Bm25Params::default(),
        }
    }
}

// ============================================================================
// FUSION ENGINE
// ============================================================================

/// Assign 1-based ranks to the items with a participating score.
/// Stable: equal scores keep input order.
fn ranks_by_score(scores: &[f32], participates: impl Fn(f32) -> bool) -> Vec<Option<usize>> {
    let mut order: Vec<usize> = (0..scores.len()).filter(|&i| participates(scores[i])).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut ranks = vec![None; scores.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        ranks[idx] = Some(rank + 1);
    }
    ranks
}

fn rrf(k: f32, rank: Option<usize>) -> f32 {
    rank.map(|r| 1.0 / (k + r as f32)).unwrap_or(0.0)
}

/// Fuse the supplied semantic order with BM25, title and heading-path signals.
///
/// Candidates are expected in semantic order (best first). Repeated
/// identities are collapsed before ranking, keeping the first occurrence.
/// Identical inputs always produce identical output.
pub fn fuse(query: &str, candidates: Vec<CandidateChunk>, config: &FusionConfig) -> Vec<RankedEntry> {
    let mut seen: HashSet<ChunkId> = HashSet::new();
    let chunks: Vec<CandidateChunk> = candidates
        .into_iter()
        .filter(|c| seen.insert(c.identity()))
        .collect();

    if chunks.is_empty() {
        return Vec::new();
    }

    let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
    let corpus = Bm25Corpus::new(&texts, config.bm25);
    let bm25_scores = corpus.scores(query);

    let title_sims: Vec<f32> = chunks
        .iter()
        .map(|c| {
            c.metadata
                .document_title
                .as_deref()
                .map(|t| title_similarity(query, t))
                .unwrap_or(0.0)
        })
        .collect();
    let heading_sims: Vec<f32> = chunks
        .iter()
        .map(|c| heading_path_similarity(query, &c.metadata.heading_path))
        .collect();

    let bm25_ranks = ranks_by_score(&bm25_scores, |s| s > 0.0);
    let title_ranks = ranks_by_score(&title_sims, |s| s > config.title_threshold);
    let heading_ranks = ranks_by_score(&heading_sims, |s| s > config.heading_threshold);

    let mut entries: Vec<RankedEntry> = chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let semantic_rank = Some(i + 1);
            let mut fused = rrf(config.k, semantic_rank)
                + rrf(config.k, bm25_ranks[i])
                + rrf(config.k, title_ranks[i])
                + rrf(config.k, heading_ranks[i]);
            if title_ranks[i].is_some() && title_sims[i] > config.title_bonus_threshold {
                fused += config.title_bonus;
            }
            if heading_ranks[i].is_some() && heading_sims[i] > config.heading_bonus_threshold {
                fused += config.heading_bonus;
            }

            RankedEntry {
                chunk,
                semantic_rank,
                bm25_rank: bm25_ranks[i],
                title_rank: title_ranks[i],
                heading_rank: heading_ranks[i],
                bm25_score: bm25_scores[i],
                title_similarity: title_sims[i],
                heading_similarity: heading_sims[i],
                fused_score: fused,
            }
        })
        .collect();

    // sort_by is stable: ties preserve the semantic order
    entries.sort_by(|a, b| b.fused_score.total_cmp(&a.fused_score));
    entries
}

/// Fuse and hand back plain chunks carrying their fused score
pub fn fuse_chunks(query: &str, candidates: Vec<CandidateChunk>, config: &FusionConfig) -> Vec<CandidateChunk> {
    fuse(query, candidates, config)
        .into_iter()
        .map(RankedEntry::into_chunk)
        .collect()
}

// ============================================================================
// DENSE + SPARSE MERGE
// ============================================================================

/// Alpha-weighted RRF of a dense and a sparse ranking.
///
/// `score(d) = alpha/(k + dense_rank) + (1 - alpha)/(k + sparse_rank)`,
/// ranks 1-based, missing ranks contribute nothing. Returns
/// `(key, score, dense_rank, sparse_rank)` sorted by score; ties keep
/// dense-first insertion order.
pub fn weighted_rank_fusion(
    dense: &[String],
    sparse: &[String],
    alpha: f32,
    k: f32,
) -> Vec<(String, f32, Option<usize>, Option<usize>)> {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut order: Vec<String> = Vec::new();
    let mut ranks: HashMap<String, (Option<usize>, Option<usize>)> = HashMap::new();

    for (i, key) in dense.iter().enumerate() {
        let entry = ranks.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            (None, None)
        });
        entry.0.get_or_insert(i + 1);
    }
    for (i, key) in sparse.iter().enumerate() {
        let entry = ranks.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            (None, None)
        });
        entry.1.get_or_insert(i + 1);
    }

    let mut results: Vec<(String, f32, Option<usize>, Option<usize>)> = order
        .into_iter()
        .map(|key| {
            let (d, s) = ranks.get(&key).copied().unwrap_or((None, None));
            let score = alpha * rrf(k, d) + (1.0 - alpha) * rrf(k, s);
            (key, score, d, s)
        })
        .collect();
    results.sort_by(|a, b| b.1.total_cmp(&a.1));
    results
}

// ============================================================================
// TESTS
// ============================================================================
