//! Context expansion with sibling chunks
//!
//! For each accepted candidate with a known source and position, fetch the
//! neighbouring chunks of the same source within `window_size` and add them
//! to the result, capped per source. Store failures and lookups that
//! exceed `lookup_timeout_ms` only skip the candidate that caused them.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::chunk::{content_key, CandidateChunk, ExpansionType};
use crate::collab::VectorStore;

/// Default budget of one sibling lookup
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ExpansionOptions {
    /// Positions on each side of a candidate to fetch
    pub window_size: i64,
    /// Cap on originals plus siblings per source
    pub max_chunks_per_source: usize,
    /// Only candidates scoring at least this are expanded
    pub min_score_for_expansion: Option<f32>,
    /// Budget of one sibling lookup
    pub lookup_timeout_ms: u64,
}

impl Default for ExpansionOptions {
    fn default() -> Self {
        Self {
            window_size: 1,
            max_chunks_per_source: 5,
            min_score_for_expansion: None,
            lookup_timeout_ms: DEFAULT_LOOKUP_TIMEOUT_MS,
        }
    }
}

/// Expanded chunk list and what happened along the way
#[derive(Debug, Clone, Default)]
pub struct ExpansionResult {
    pub chunks: Vec<CandidateChunk>,
    pub siblings_added: usize,
    /// Candidates whose lookup failed or timed out
    pub lookup_failures: usize,
    /// Stopped early on cancellation
    pub cancelled: bool,
}

/// Add sibling chunks around each eligible candidate.
///
/// Output: addressable chunks sorted by source then position, followed by
/// the chunks without a source or position in their original order.
pub async fn expand_with_siblings(
    store: &dyn VectorStore,
    chunks: Vec<CandidateChunk>,
    workspace_id: &str,
    options: &ExpansionOptions,
    cancel: &CancellationToken,
) -> ExpansionResult {
    let window = options.window_size.max(0);
    let lookup_timeout = Duration::from_millis(options.lookup_timeout_ms);
    let mut result = ExpansionResult::default();

    let mut addressable: Vec<CandidateChunk> = Vec::new();
    let mut loose: Vec<CandidateChunk> = Vec::new();
    for mut chunk in chunks {
        chunk.metadata.expansion_type = Some(ExpansionType::Original);
        if chunk.address().is_some() {
            addressable.push(chunk);
        } else {
            loose.push(chunk);
        }
    }

    let mut per_source: HashMap<String, usize> = HashMap::new();
    let mut positions: HashSet<(String, i64)> = HashSet::new();
    let mut contents: HashSet<String> = HashSet::new();
    for chunk in addressable.iter().chain(loose.iter()) {
        contents.insert(content_key(&chunk.content));
        if let Some((source, position)) = chunk.address() {
            *per_source.entry(source.to_string()).or_default() += 1;
            positions.insert((source.to_string(), position));
        }
    }

    let mut siblings: Vec<CandidateChunk> = Vec::new();
    if window > 0 {
        for original in &addressable {
            let Some((source, position)) = original.address() else {
                continue;
            };
            let score = original.effective_score();
            if options
                .min_score_for_expansion
                .is_some_and(|min| score < min)
            {
                tracing::debug!(source_id = source, position, score, "below expansion threshold");
                continue;
            }
            if per_source.get(source).copied().unwrap_or(0) >= options.max_chunks_per_source {
                continue;
            }

            let range = (position - window)..=(position + window);
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    result.cancelled = true;
                    break;
                }
                res = tokio::time::timeout(
                    lookup_timeout,
                    store.scroll_source(workspace_id, source, Some(range)),
                ) => res,
            };
            let mut neighbours = match fetched {
                Ok(Ok(points)) => points,
                Ok(Err(e)) => {
                    tracing::warn!(
                        stage = "context_expansion",
                        source_id = source,
                        position,
                        error = %e,
                        "sibling lookup failed; candidate left unexpanded"
                    );
                    result.lookup_failures += 1;
                    continue;
                }
                Err(_) => {
                    tracing::warn!(
                        stage = "context_expansion",
                        source_id = source,
                        position,
                        timeout_ms = options.lookup_timeout_ms,
                        "sibling lookup timed out; candidate left unexpanded"
                    );
                    result.lookup_failures += 1;
                    continue;
                }
            };

            // nearest first, preceding before following at equal distance
            neighbours.retain(|n| n.metadata.position.is_some());
            neighbours.sort_by_key(|n| {
                let p = n.metadata.position.unwrap_or(position);
                ((p - position).abs(), p > position)
            });

            for mut neighbour in neighbours {
                let Some(p) = neighbour.metadata.position else {
                    continue;
                };
                if p == position
                    || neighbour.metadata.source_id.as_deref() != Some(source)
                    || positions.contains(&(source.to_string(), p))
                    || contents.contains(&content_key(&neighbour.content))
                {
                    continue;
                }
                let count = per_source.entry(source.to_string()).or_default();
                if *count >= options.max_chunks_per_source {
                    break;
                }
                *count += 1;

                positions.insert((source.to_string(), p));
                contents.insert(content_key(&neighbour.content));
                neighbour.metadata.expansion_type = Some(if p < position {
                    ExpansionType::SiblingBefore
                } else {
                    ExpansionType::SiblingAfter
                });
                neighbour.score = Some(score);
                siblings.push(neighbour);
            }
        }
    }

    result.siblings_added = siblings.len();
    addressable.extend(siblings);
    addressable.sort_by(|a, b| {
        a.metadata
            .source_id
            .cmp(&b.metadata.source_id)
            .then(a.metadata.position.cmp(&b.metadata.position))
    });
    addressable.extend(loose);
    result.chunks = addressable;
    result
}
