//! Text similarity helpers
//!
//! Pure functions shared by the BM25 scorer, the fusion engine and the
//! quality filter. Matching is accent- and case-insensitive: text is NFD
//! decomposed and combining marks are dropped before lowercasing.

use std::collections::HashSet;

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Words ignored by title and heading similarity
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "of", "on", "or", "our", "that", "the", "this", "to", "we", "what",
    "when", "where", "which", "who", "why", "with", "you", "your",
];

/// Titles found verbatim in the query score at least this much
const PHRASE_CONTAINMENT_FLOOR: f32 = 0.85;

/// Ancestor headings count slightly less than the most specific one
const ANCESTOR_HEADING_DISCOUNT: f32 = 0.9;

/// Lowercase, strip diacritics, collapse whitespace and trim
pub fn normalize_for_match(text: &str) -> String {
    let stripped: String = text.nfd().filter(|c| !is_combining_mark(*c)).collect();
    stripped
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split normalized text into exact-match tokens (no stemming)
pub fn tokenize(text: &str) -> Vec<String> {
    normalize_for_match(text)
        .split(' ')
        .map(|token| token.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Rough token estimate for text without a precomputed count
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

fn content_terms(text: &str) -> HashSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Similarity between a query and a document title, in `[0, 1]`.
///
/// Dice coefficient over distinct non-stopword tokens, 1.0 on normalized
/// equality, floored at 0.85 when a multi-word title appears verbatim in
/// the query.
pub fn title_similarity(query: &str, title: &str) -> f32 {
    let query_norm = normalize_for_match(query);
    let title_norm = normalize_for_match(title);
    if query_norm.is_empty() || title_norm.is_empty() {
        return 0.0;
    }
    if query_norm == title_norm {
        return 1.0;
    }

    let query_terms = content_terms(&query_norm);
    let title_terms = content_terms(&title_norm);
    let dice = if query_terms.is_empty() || title_terms.is_empty() {
        0.0
    } else {
        let shared = query_terms.intersection(&title_terms).count() as f32;
        2.0 * shared / (query_terms.len() + title_terms.len()) as f32
    };

    let title_words = tokenize(&title_norm);
    let contained = title_words.len() >= 2 && {
        let query_words = tokenize(&query_norm).join(" ");
        let phrase = title_words.join(" ");
        format!(" {query_words} ").contains(&format!(" {phrase} "))
    };

    if contained {
        dice.max(PHRASE_CONTAINMENT_FLOOR)
    } else {
        dice
    }
}

/// Similarity between a query and a heading breadcrumb, in `[0, 1]`
pub fn heading_path_similarity(query: &str, heading_path: &[String]) -> f32 {
    if heading_path.is_empty() {
        return 0.0;
    }
    let last = heading_path.len() - 1;
    let per_heading = heading_path
        .iter()
        .enumerate()
        .map(|(i, heading)| {
            let sim = title_similarity(query, heading);
            if i == last { sim } else { sim * ANCESTOR_HEADING_DISCOUNT }
        })
        .fold(0.0_f32, f32::max);
    let whole_path = title_similarity(query, &heading_path.join(" "));
    per_heading.max(whole_path)
}

// ============================================================================
// TESTS
// ============================================================================
