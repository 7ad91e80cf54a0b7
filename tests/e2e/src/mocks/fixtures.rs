//! Test Data Factory
//!
//! Provides utilities for generating realistic chunk corpora:
//! - Documentation-style chunks with titles, headings and positions
//! - Pre-built scenarios for common test cases
//! - Deterministic filler text

use std::collections::HashMap;

use sift_core::CandidateChunk;

/// Workspace every scenario chunk belongs to
pub const TEST_WORKSPACE: &str = "ws-docs";

/// Factory for creating test chunks
///
/// # Example
///
/// ```rust,ignore
/// let scenario = TestCorpusFactory::create_docs_scenario();
/// let store = InMemoryVectorStore::new(scenario.chunks);
/// ```
pub struct TestCorpusFactory;

/// Scenario containing related test data
#[derive(Debug, Clone)]
pub struct CorpusScenario {
    /// Chunks of every document in the scenario
    pub chunks: Vec<CandidateChunk>,
    /// Description of the scenario
    pub description: String,
    /// Metadata for test assertions
    pub metadata: HashMap<String, String>,
}

const TOKIO_SECTIONS: [(&str, &str); 4] = [
    ("Runtime", "The tokio runtime drives futures on a work-stealing scheduling loop."),
    ("Tasks", "Tokio spawns tasks onto the runtime and scheduling stays cooperative."),
    ("Timers", "The tokio runtime exposes timers so scheduling can honour deadlines."),
    ("Channels", "Tokio channels connect tasks that run on the runtime."),
];

const ASYNC_STD_SECTIONS: [(&str, &str); 4] = [
    ("Runtime", "The async-std runtime mirrors the standard library with async scheduling."),
    ("Tasks", "async-std spawns tasks with a global executor and simple scheduling."),
    ("Files", "async-std wraps file handles so reads never block the executor."),
    ("Networking", "async-std provides listeners and streams for networking."),
];

const SQLITE_SECTIONS: [(&str, &str); 4] = [
    ("WAL", "SQLite WAL mode lets readers continue while a writer commits pages."),
    ("Pragmas", "SQLite pragmas tune the page cache and the busy timeout."),
    ("Indexes", "SQLite indexes speed up lookups by workspace and content hash."),
    ("Backups", "SQLite backups copy the database file through the online backup API."),
];

impl TestCorpusFactory {
    // ========================================================================
    // SINGLE CHUNK CREATION
    // ========================================================================

    /// A documentation chunk: lead sentence plus filler, long enough to
    /// pass the quality filter
    pub fn section(
        source_id: &str,
        title: &str,
        position: i64,
        heading: &str,
        lead: &str,
    ) -> CandidateChunk {
        let content = format!("{lead} {}", Self::lorem_content(60, position as usize));
        CandidateChunk::new(content)
            .with_source(source_id, position)
            .with_title(title)
            .with_heading_path([title, heading])
            .with_workspace(TEST_WORKSPACE)
    }

    /// All sections of one document
    pub fn document(source_id: &str, title: &str, sections: &[(&str, &str)]) -> Vec<CandidateChunk> {
        sections
            .iter()
            .enumerate()
            .map(|(i, (heading, lead))| Self::section(source_id, title, i as i64, heading, lead))
            .collect()
    }

    /// A table-of-contents placeholder chunk
    pub fn junk_chunk(source_id: &str) -> CandidateChunk {
        CandidateChunk::new("[[_TOC_]]")
            .with_source(source_id, 0)
            .with_workspace(TEST_WORKSPACE)
    }

    // ========================================================================
    // SCENARIOS
    // ========================================================================

    /// Three documentation sources of four chunks each, plus a junk page
    pub fn create_docs_scenario() -> CorpusScenario {
        let mut chunks = Vec::new();
        chunks.extend(Self::document("tokio-guide", "Tokio Guide", &TOKIO_SECTIONS));
        chunks.extend(Self::document(
            "async-std-guide",
            "async-std Guide",
            &ASYNC_STD_SECTIONS,
        ));
        chunks.extend(Self::document("sqlite-notes", "SQLite Notes", &SQLITE_SECTIONS));
        chunks.push(Self::junk_chunk("toc-page"));

        let mut metadata = HashMap::new();
        metadata.insert("sources".to_string(), "4".to_string());
        metadata.insert("chunks_per_document".to_string(), "4".to_string());

        CorpusScenario {
            chunks,
            description: "Runtime guides and storage notes with one junk page".to_string(),
            metadata,
        }
    }

    /// Chunks repeated with whitespace, case and quote-style variations
    pub fn create_variant_batch() -> Vec<CandidateChunk> {
        let texts = [
            "It's the \"same\" paragraph about ownership.",
            "it\u{2019}s   the \u{201C}SAME\u{201D} paragraph\nabout ownership.",
            "A genuinely different paragraph about borrowing.",
            "  IT'S THE \"SAME\" PARAGRAPH ABOUT OWNERSHIP.  ",
        ];
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| CandidateChunk::new(*t).with_source("rust-book", i as i64))
            .collect()
    }

    // ========================================================================
    // UTILITY METHODS
    // ========================================================================

    /// Generate deterministic filler text
    pub fn lorem_content(words: usize, seed: usize) -> String {
        const WORDS: [&str; 20] = [
            "lorem", "ipsum", "dolor", "sit", "amet",
            "consectetur", "adipiscing", "elit", "sed", "do",
            "eiusmod", "tempor", "incididunt", "ut", "labore",
            "et", "dolore", "magna", "aliqua", "enim",
        ];

        (0..words)
            .map(|i| WORDS[(seed + i * 7) % WORDS.len()])
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Source ids of `chunks`, in order
    pub fn sources(chunks: &[CandidateChunk]) -> Vec<String> {
        chunks
            .iter()
            .map(|c| c.metadata.source_id.clone().unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::retrieval::{filter_low_quality_chunks, QualityFilterOptions};

    #[test]
    fn test_docs_scenario_shape() {
        let scenario = TestCorpusFactory::create_docs_scenario();
        assert_eq!(scenario.chunks.len(), 13);
        assert!(scenario
            .chunks
            .iter()
            .all(|c| c.metadata.workspace_id.as_deref() == Some(TEST_WORKSPACE)));
    }

    #[test]
    fn test_sections_pass_quality_filter() {
        let scenario = TestCorpusFactory::create_docs_scenario();
        let (kept, report) = filter_low_quality_chunks(
            scenario.chunks,
            None,
            &QualityFilterOptions::default(),
        );
        assert_eq!(kept.len(), 12);
        assert_eq!(report.dropped_junk + report.dropped_tiny, 1);
    }

    #[test]
    fn test_lorem_is_deterministic() {
        assert_eq!(
            TestCorpusFactory::lorem_content(10, 3),
            TestCorpusFactory::lorem_content(10, 3)
        );
    }
}
