//! Contextual compression
//!
//! Sends the first few documents to the compression collaborator and keeps
//! an extract only when it is usable. The original text always survives
//! in `metadata.original_content`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::heuristics::is_disclaimer;
use crate::chunk::CandidateChunk;
use crate::collab::Compressor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CompressionConfig {
    /// Documents sent to the compressor, from the top of the list
    pub max_documents: usize,
    /// Extracts longer than this multiple of the original are rejected
    pub max_growth: f32,
    /// Per-document call timeout
    pub timeout_ms: u64,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_documents: 5,
            max_growth: 1.2,
            timeout_ms: 5_000,
        }
    }
}

/// Compressed list and how many documents were actually rewritten
#[derive(Debug, Clone, Default)]
pub struct CompressionResult {
    pub documents: Vec<CandidateChunk>,
    pub compressed: usize,
    pub rejected: usize,
    pub failed: usize,
}

enum Extract {
    Accepted(String),
    Rejected,
    Failed,
}

fn judge_extract(original: &str, extract: &str, max_growth: f32) -> bool {
    let trimmed = extract.trim();
    if trimmed.is_empty() || is_disclaimer(trimmed) {
        return false;
    }
    let limit = (original.chars().count() as f32 * max_growth).floor() as usize;
    trimmed.chars().count() <= limit
}

/// Rewrite the first `max_documents` docs into query-relevant extracts.
/// Calls run concurrently; failed or unusable extracts keep the original.
pub async fn compress_documents(
    compressor: &dyn Compressor,
    mut docs: Vec<CandidateChunk>,
    query: &str,
    config: &CompressionConfig,
) -> CompressionResult {
    let take = config.max_documents.min(docs.len());
    let timeout = Duration::from_millis(config.timeout_ms);

    let extracts = futures::future::join_all(docs.iter().take(take).map(|doc| async move {
        match tokio::time::timeout(timeout, compressor.extract(query, &doc.content)).await {
            Ok(Ok(text)) if judge_extract(&doc.content, &text, config.max_growth) => {
                Extract::Accepted(text.trim().to_string())
            }
            Ok(Ok(_)) => Extract::Rejected,
            Ok(Err(e)) => {
                tracing::warn!(stage = "compression", error = %e, "extract failed; keeping original");
                Extract::Failed
            }
            Err(_) => {
                tracing::warn!(stage = "compression", timeout_ms = config.timeout_ms, "extract timed out");
                Extract::Failed
            }
        }
    }))
    .await;

    let mut result = CompressionResult::default();
    for doc in docs.iter_mut() {
        if doc.metadata.original_content.is_none() {
            doc.metadata.original_content = Some(doc.content.clone());
        }
    }
    for (doc, extract) in docs.iter_mut().zip(extracts) {
        match extract {
            Extract::Accepted(text) => {
                doc.content = text;
                result.compressed += 1;
            }
            Extract::Rejected => result.rejected += 1,
            Extract::Failed => result.failed += 1,
        }
    }

    result.documents = docs;
    result
}
