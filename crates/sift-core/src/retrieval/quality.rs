//! Chunk quality filter
//!
//! Post-rank, pure, no I/O. Three rules, applied in order:
//!
//! 1. structural junk is always dropped
//! 2. chunks under `min_tokens` are dropped, unless the chunk is the only
//!    one in the batch under its top-level heading
//! 3. code chunks are dropped when the query is not about programming
//!
//! The output is never empty for non-empty input: if every chunk is
//! rejected, the highest-scoring input chunk is returned alone.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::heuristics::{is_junk, is_programming_query, looks_like_code};
use crate::chunk::{BlockType, CandidateChunk};
use crate::text::estimate_tokens;

/// Minimum chunk size, in tokens
pub const DEFAULT_MIN_TOKENS: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct QualityFilterOptions {
    pub min_tokens: usize,
    /// Rule 3 toggle
    pub filter_irrelevant_code: bool,
}

impl Default for QualityFilterOptions {
    fn default() -> Self {
        Self {
            min_tokens: DEFAULT_MIN_TOKENS,
            filter_irrelevant_code: true,
        }
    }
}

/// Counts from one filter pass
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub input: usize,
    pub kept: usize,
    pub dropped_junk: usize,
    pub dropped_tiny: usize,
    pub dropped_code: usize,
    /// Everything was rejected and the best input chunk was kept
    pub fell_back: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Keep,
    Junk,
    Tiny,
    IrrelevantCode,
}

/// Token count, preferring the chunker's precomputed value
pub fn chunk_tokens(chunk: &CandidateChunk) -> usize {
    chunk
        .metadata
        .token_count
        .unwrap_or_else(|| estimate_tokens(&chunk.content))
}

/// Chunk is code by block type, explicit flag, or content shape
pub fn is_code_chunk(chunk: &CandidateChunk) -> bool {
    chunk.metadata.block_type == BlockType::Code
        || chunk.metadata.is_code
        || looks_like_code(&chunk.content)
}

/// Apply the quality rules to a ranked list, preserving order
pub fn filter_low_quality_chunks(
    chunks: Vec<CandidateChunk>,
    query: Option<&str>,
    options: &QualityFilterOptions,
) -> (Vec<CandidateChunk>, QualityReport) {
    let mut report = QualityReport {
        input: chunks.len(),
        ..Default::default()
    };
    if chunks.is_empty() {
        return (chunks, report);
    }

    let mut heading_counts: HashMap<&str, usize> = HashMap::new();
    for chunk in &chunks {
        if let Some(heading) = chunk.top_level_heading() {
            *heading_counts.entry(heading).or_default() += 1;
        }
    }

    let drop_code = options.filter_irrelevant_code
        && query.is_some_and(|q| !q.trim().is_empty() && !is_programming_query(q));

    let verdicts: Vec<Verdict> = chunks
        .iter()
        .map(|chunk| {
            if is_junk(&chunk.content) {
                return Verdict::Junk;
            }
            if chunk_tokens(chunk) < options.min_tokens {
                let sole_representative = chunk
                    .top_level_heading()
                    .is_some_and(|h| heading_counts.get(h).copied() == Some(1));
                if !sole_representative {
                    return Verdict::Tiny;
                }
            }
            if drop_code && is_code_chunk(chunk) {
                return Verdict::IrrelevantCode;
            }
            Verdict::Keep
        })
        .collect();

    for verdict in &verdicts {
        match verdict {
            Verdict::Junk => report.dropped_junk += 1,
            Verdict::Tiny => report.dropped_tiny += 1,
            Verdict::IrrelevantCode => report.dropped_code += 1,
            Verdict::Keep => {}
        }
    }

    if verdicts.iter().all(|v| *v != Verdict::Keep) {
        // first chunk wins ties
        let best = chunks
            .iter()
            .enumerate()
            .fold(None::<(usize, f32)>, |best, (i, c)| {
                let score = c.effective_score();
                match best {
                    Some((_, top)) if top >= score => best,
                    _ => Some((i, score)),
                }
            })
            .map(|(i, _)| i)
            .unwrap_or(0);
        tracing::debug!(input = report.input, "quality filter rejected every chunk; keeping best");
        report.fell_back = true;
        report.kept = 1;
        let kept: Vec<CandidateChunk> = chunks.into_iter().skip(best).take(1).collect();
        return (kept, report);
    }

    let kept: Vec<CandidateChunk> = chunks
        .into_iter()
        .zip(verdicts)
        .filter(|(_, v)| *v == Verdict::Keep)
        .map(|(c, _)| c)
        .collect();
    report.kept = kept.len();
    (kept, report)
}
