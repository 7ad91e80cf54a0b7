//! Chunk module - candidate text chunks and their ranking state
//!
//! A [`CandidateChunk`] is produced per query by the vector store (or
//! hydrated from sparse hits), lives for one request, and is never shared
//! between requests. [`RankedEntry`] wraps a chunk with the per-signal ranks
//! of a single fusion call.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::text::normalize_for_match;

// ============================================================================
// BLOCK TYPES
// ============================================================================

/// Structural kind of the block a chunk was cut from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    #[default]
    Text,
    Heading,
    List,
    Table,
    Code,
    Quote,
    Other,
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockType::Text => write!(f, "text"),
            BlockType::Heading => write!(f, "heading"),
            BlockType::List => write!(f, "list"),
            BlockType::Table => write!(f, "table"),
            BlockType::Code => write!(f, "code"),
            BlockType::Quote => write!(f, "quote"),
            BlockType::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for BlockType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "paragraph" => Ok(BlockType::Text),
            "heading" => Ok(BlockType::Heading),
            "list" => Ok(BlockType::List),
            "table" => Ok(BlockType::Table),
            "code" => Ok(BlockType::Code),
            "quote" => Ok(BlockType::Quote),
            "other" => Ok(BlockType::Other),
            _ => Err(format!("Unknown block type: {}", s)),
        }
    }
}

/// How a chunk entered the result set during context expansion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionType {
    /// Retrieved by the ranking pipeline itself
    Original,
    /// Adjacent chunk preceding an original
    SiblingBefore,
    /// Adjacent chunk following an original
    SiblingAfter,
}

impl std::fmt::Display for ExpansionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpansionType::Original => write!(f, "original"),
            ExpansionType::SiblingBefore => write!(f, "sibling_before"),
            ExpansionType::SiblingAfter => write!(f, "sibling_after"),
        }
    }
}

// ============================================================================
// CANDIDATE CHUNK
// ============================================================================

/// Metadata attached to a candidate chunk
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ChunkMetadata {
    /// Source document the chunk belongs to
    pub source_id: Option<String>,
    /// Title of the source document
    pub document_title: Option<String>,
    /// Section breadcrumb, outermost heading first
    pub heading_path: Vec<String>,
    pub block_type: BlockType,
    /// Position of the chunk inside its source (chunk index)
    pub position: Option<i64>,
    pub workspace_id: Option<String>,
    /// Similarity reported by the vector store
    pub semantic_score: Option<f32>,
    /// Precomputed token count, preferred over the length estimate
    pub token_count: Option<usize>,
    /// Explicit code flag set by the chunker
    pub is_code: bool,
    /// Entity this chunk was retrieved for (multi-aspect comparisons)
    pub comparison_entity: Option<String>,
    pub expansion_type: Option<ExpansionType>,
    /// Cross-encoder relevance score
    pub rerank_score: Option<f32>,
    /// Text before compression rewrote `content`
    pub original_content: Option<String>,
    /// Anything else the upstream collaborator attached
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A text chunk considered for grounding an answer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CandidateChunk {
    /// Point id in the vector store, when known
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    /// Score assigned by the latest ranking stage (fused or merged score)
    #[serde(default)]
    pub score: Option<f32>,
}

impl CandidateChunk {
    /// Create a chunk with empty metadata
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Builder-style source/position assignment
    pub fn with_source(mut self, source_id: impl Into<String>, position: i64) -> Self {
        self.metadata.source_id = Some(source_id.into());
        self.metadata.position = Some(position);
        self
    }

    /// Builder-style heading path assignment
    pub fn with_heading_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.metadata.heading_path = path.into_iter().map(Into::into).collect();
        self
    }

    /// Builder-style document title assignment
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.document_title = Some(title.into());
        self
    }

    /// Builder-style workspace assignment
    pub fn with_workspace(mut self, workspace_id: impl Into<String>) -> Self {
        self.metadata.workspace_id = Some(workspace_id.into());
        self
    }

    /// Builder-style semantic score assignment
    pub fn with_semantic_score(mut self, score: f32) -> Self {
        self.metadata.semantic_score = Some(score);
        self
    }

    /// Stable identity used to merge signals and drop repeats within one call.
    ///
    /// `source_id#position` when both are known, else the store point id,
    /// else a hash of the normalized content.
    pub fn identity(&self) -> ChunkId {
        if let (Some(source), Some(position)) =
            (self.metadata.source_id.as_deref(), self.metadata.position)
        {
            return ChunkId(format!("{source}#{position}"));
        }
        if let Some(id) = self.id.as_deref() {
            return ChunkId(format!("id:{id}"));
        }
        ChunkId(format!("sha256:{}", content_key(&self.content)))
    }

    /// Best available relevance score
    pub fn effective_score(&self) -> f32 {
        self.metadata
            .rerank_score
            .or(self.score)
            .or(self.metadata.semantic_score)
            .unwrap_or(0.0)
    }

    /// Top-level heading, if the chunk was authored under one
    pub fn top_level_heading(&self) -> Option<&str> {
        self.metadata.heading_path.first().map(String::as_str)
    }

    /// (source, position) pair when the chunk is addressable in its source
    pub fn address(&self) -> Option<(&str, i64)> {
        match (self.metadata.source_id.as_deref(), self.metadata.position) {
            (Some(source), Some(position)) => Some((source, position)),
            _ => None,
        }
    }
}

/// Identity of a chunk within one ranking call
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkId(pub String);

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 of accent/case/whitespace-normalized text, hex encoded
pub fn content_key(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_for_match(content).as_bytes());
    hex::encode(hasher.finalize())
}

/// Drop chunks whose identity (or normalized content) already appeared.
/// First occurrence wins, order is preserved.
pub fn dedupe_chunks(chunks: Vec<CandidateChunk>) -> Vec<CandidateChunk> {
    let mut seen_ids = std::collections::HashSet::new();
    let mut seen_content = std::collections::HashSet::new();
    chunks
        .into_iter()
        .filter(|chunk| {
            let fresh_id = seen_ids.insert(chunk.identity());
            let fresh_content = seen_content.insert(content_key(&chunk.content));
            fresh_id && fresh_content
        })
        .collect()
}

// ============================================================================
// RANKED ENTRY
// ============================================================================

/// A chunk plus the per-signal ranks of one fusion call.
///
/// Ranks are 1-based; `None` means the chunk did not participate in that
/// signal. Fused scores are only comparable within the call that made them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub chunk: CandidateChunk,
    pub semantic_rank: Option<usize>,
    pub bm25_rank: Option<usize>,
    pub title_rank: Option<usize>,
    pub heading_rank: Option<usize>,
    pub bm25_score: f32,
    pub title_similarity: f32,
    pub heading_similarity: f32,
    pub fused_score: f32,
}

impl RankedEntry {
    /// Consume the entry, stamping the fused score onto the chunk
    pub fn into_chunk(self) -> CandidateChunk {
        let mut chunk = self.chunk;
        chunk.score = Some(self.fused_score);
        chunk
    }
}

// ============================================================================
// TESTS
// ============================================================================
