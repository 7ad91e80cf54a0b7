//! HyDE-style Query Enhancement
//!
//! Two pieces:
//!
//! - [`TemplateQueryEnhancer`]: a local enhancer. It classifies query intent
//!   and fills templates to produce paraphrases plus a short hypothetical
//!   passage. No LLM is involved.
//! - [`CachedQueryEnhancer`]: wraps any [`QueryEnhancer`] with two
//!   bounded TTL caches (expansions and hypothetical documents) keyed by the
//!   normalized query text. The caches belong to the instance.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{CacheSettings, TtlCache};
use crate::collab::{QueryEnhancer, Result};
use crate::text::normalize_for_match;

/// Paraphrases handed to strategies, at most
pub const MAX_QUERY_VARIANTS: usize = 3;

/// Query intent classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// "What is X?" / "Explain X"
    Definition,
    /// "How to X?" / "Steps to X"
    HowTo,
    /// "Why does X?" / "Reason for X"
    Reasoning,
    /// "When did X?" / temporal queries
    Temporal,
    /// "X vs Y" / "difference between"
    Comparison,
    /// "Find X" / "X related to Y"
    Lookup,
    /// Code or technical terms
    Technical,
}

/// Classify query intent from the raw query string
pub fn classify_intent(query: &str) -> QueryIntent {
    let lower = query.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();

    if lower.contains("how to") || lower.starts_with("how do") || lower.starts_with("steps") {
        return QueryIntent::HowTo;
    }
    if lower.starts_with("what is")
        || lower.starts_with("what are")
        || lower.starts_with("define")
        || lower.starts_with("explain")
    {
        return QueryIntent::Definition;
    }
    if words.iter().any(|w| *w == "vs" || *w == "versus" || *w == "vs.")
        || lower.contains("difference between")
        || lower.starts_with("compare")
    {
        return QueryIntent::Comparison;
    }
    if lower.starts_with("why") || lower.contains("reason") || lower.contains("because") {
        return QueryIntent::Reasoning;
    }
    if lower.starts_with("when") || lower.contains("date") || lower.contains("timeline") {
        return QueryIntent::Temporal;
    }
    if query.contains('(')
        || query.contains('{')
        || query.contains("fn ")
        || query.contains("class ")
        || query.contains("::")
    {
        return QueryIntent::Technical;
    }

    if words.len() >= 2 {
        QueryIntent::Lookup
    } else {
        QueryIntent::Technical
    }
}

fn clean_query(query: &str) -> &str {
    query.trim().trim_end_matches('?').trim_end_matches('.').trim()
}

/// Paraphrase variants for a query (original excluded), at most three
pub fn paraphrase_variants(query: &str) -> Vec<String> {
    let clean = clean_query(query);
    if clean.is_empty() {
        return Vec::new();
    }

    let variants = match classify_intent(query) {
        QueryIntent::Definition => vec![
            format!("{clean} is a concept that involves"),
            format!("The definition of {clean}"),
            format!("{clean} refers to"),
        ],
        QueryIntent::HowTo => vec![
            format!("The steps to {clean} are as follows"),
            format!("To accomplish {clean}, you need to"),
            format!("A guide for {clean}"),
        ],
        QueryIntent::Reasoning => vec![
            format!("The reason {clean} is because"),
            format!("{clean} happens due to the following factors"),
            format!("The explanation for {clean}"),
        ],
        QueryIntent::Temporal => vec![
            format!("{clean} occurred at a specific time"),
            format!("The timeline of {clean}"),
        ],
        QueryIntent::Comparison => vec![
            format!("Differences and similarities: {clean}"),
            format!("Comparison of {clean}"),
        ],
        QueryIntent::Lookup => vec![
            format!("Information about {clean}"),
            format!("Key facts about {clean}"),
            format!("{clean} details"),
        ],
        QueryIntent::Technical => vec![
            format!("{clean} implementation details"),
            format!("Code pattern for {clean}"),
        ],
    };

    variants.into_iter().take(MAX_QUERY_VARIANTS).collect()
}

/// A short passage shaped like an answer to the query
pub fn hypothetical_passage(query: &str) -> String {
    let clean = clean_query(query);
    match classify_intent(query) {
        QueryIntent::Definition => {
            format!("{clean} is defined as follows. {clean} describes the concept, its purpose and how it is used.")
        }
        QueryIntent::HowTo => format!(
            "To {clean}, follow these steps. First prepare the prerequisites, then configure {clean}, and finally verify the result."
        ),
        QueryIntent::Reasoning => {
            format!("{clean} because of several factors. The main reason behind {clean} is explained below.")
        }
        QueryIntent::Temporal => format!("{clean} happened on the following date, as recorded in the timeline."),
        QueryIntent::Comparison => {
            format!("When comparing {clean}, the key differences are in scope, cost and behaviour.")
        }
        QueryIntent::Lookup | QueryIntent::Technical => {
            format!("This section covers {clean}, including the relevant details and examples.")
        }
    }
}

// ============================================================================
// TEMPLATE ENHANCER
// ============================================================================

/// Local query enhancer built from intent templates
#[derive(Debug, Clone, Default)]
pub struct TemplateQueryEnhancer;

#[async_trait]
impl QueryEnhancer for TemplateQueryEnhancer {
    async fn expand_query(&self, query: &str) -> Result<Vec<String>> {
        Ok(paraphrase_variants(query))
    }

    async fn hypothetical_document(&self, query: &str) -> Result<String> {
        Ok(hypothetical_passage(query))
    }
}

// ============================================================================
// CACHING WRAPPER
// ============================================================================

/// Caches an enhancer's answers by normalized query text.
/// Failures are never cached.
pub struct CachedQueryEnhancer {
    inner: Arc<dyn QueryEnhancer>,
    expansions: TtlCache<String, Vec<String>>,
    hypotheticals: TtlCache<String, String>,
}

impl CachedQueryEnhancer {
    pub fn new(
        inner: Arc<dyn QueryEnhancer>,
        expansion_cache: CacheSettings,
        hyde_cache: CacheSettings,
    ) -> Self {
        Self {
            inner,
            expansions: TtlCache::from_settings(expansion_cache),
            hypotheticals: TtlCache::from_settings(hyde_cache),
        }
    }

    /// Number of cached (expansion, hypothetical) entries
    pub fn cache_sizes(&self) -> (usize, usize) {
        (self.expansions.len(), self.hypotheticals.len())
    }
}

#[async_trait]
impl QueryEnhancer for CachedQueryEnhancer {
    async fn expand_query(&self, query: &str) -> Result<Vec<String>> {
        let key = normalize_for_match(query);
        if let Some(hit) = self.expansions.get(&key) {
            tracing::trace!(query = %key, "query expansion cache hit");
            return Ok(hit);
        }
        let mut variants = self.inner.expand_query(query).await?;
        variants.truncate(MAX_QUERY_VARIANTS);
        self.expansions.insert(key, variants.clone());
        Ok(variants)
    }

    async fn hypothetical_document(&self, query: &str) -> Result<String> {
        let key = normalize_for_match(query);
        if let Some(hit) = self.hypotheticals.get(&key) {
            return Ok(hit);
        }
        let passage = self.inner.hypothetical_document(query).await?;
        self.hypotheticals.insert(key, passage.clone());
        Ok(passage)
    }
}

impl std::fmt::Debug for CachedQueryEnhancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedQueryEnhancer")
            .field("expansions", &self.expansions)
            .field("hypotheticals", &self.hypotheticals)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
