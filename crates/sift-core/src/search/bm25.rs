//! Okapi BM25 over a per-query candidate set
//!
//! Global corpus statistics are not available to a stateless ranking call,
//! so IDF is estimated from the candidate set itself:
//! `idf = ln(1 + (N - df + 0.5) / (df + 0.5))` with `df` clamped to `[1, N]`.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::text::tokenize;

/// Default term-frequency saturation
pub const DEFAULT_K1: f32 = 1.5;

/// Default length-normalization strength
pub const DEFAULT_B: f32 = 0.75;

/// BM25 tuning parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: DEFAULT_K1,
            b: DEFAULT_B,
        }
    }
}

/// Inverse document frequency estimated from the candidate set
pub fn idf(doc_freq: usize, corpus_size: usize) -> f32 {
    let n = corpus_size.max(1) as f32;
    let df = doc_freq.clamp(1, corpus_size.max(1)) as f32;
    (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
}

/// Score one document against a query.
///
/// Returns 0 when either string is empty or no query term occurs in the
/// document. Without a document-frequency map every term gets `df = 1`.
pub fn bm25_score(
    query: &str,
    document: &str,
    avg_doc_len: f32,
    doc_freqs: Option<&HashMap<String, usize>>,
    corpus_size: usize,
    params: Bm25Params,
) -> f32 {
    let doc_tokens = tokenize(document);
    if doc_tokens.is_empty() {
        return 0.0;
    }
    let query_terms = unique_terms(query);
    score_tokens(&query_terms, &doc_tokens, avg_doc_len, doc_freqs, corpus_size, params)
}

fn unique_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn score_tokens(
    query_terms: &[String],
    doc_tokens: &[String],
    avg_doc_len: f32,
    doc_freqs: Option<&HashMap<String, usize>>,
    corpus_size: usize,
    params: Bm25Params,
) -> f32 {
    if query_terms.is_empty() || doc_tokens.is_empty() {
        return 0.0;
    }

    let doc_len = doc_tokens.len() as f32;
    let avg = if avg_doc_len > 0.0 { avg_doc_len } else { doc_len };
    let length_norm = 1.0 - params.b + params.b * (doc_len / avg);

    let mut score = 0.0;
    for term in query_terms {
        let tf = doc_tokens.iter().filter(|t| *t == term).count() as f32;
        if tf == 0.0 {
            continue;
        }
        let df = doc_freqs.and_then(|m| m.get(term)).copied().unwrap_or(1);
        let numerator = tf * (params.k1 + 1.0);
        let denominator = tf + params.k1 * length_norm;
        score += idf(df, corpus_size) * numerator / denominator;
    }
    score
}

// ============================================================================
// CANDIDATE-SET CORPUS
// ============================================================================

/// Tokenized candidate set with its document frequencies and average length
#[derive(Debug, Clone)]
pub struct Bm25Corpus {
    documents: Vec<Vec<String>>,
    doc_freqs: HashMap<String, usize>,
    avg_doc_len: f32,
    params: Bm25Params,
}

impl Bm25Corpus {
    /// Build corpus statistics for one ranking call
    pub fn new<S: AsRef<str>>(texts: &[S], params: Bm25Params) -> Self {
        let documents: Vec<Vec<String>> = texts.iter().map(|t| tokenize(t.as_ref())).collect();

        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        for doc in &documents {
            let distinct: HashSet<&String> = doc.iter().collect();
            for term in distinct {
                *doc_freqs.entry(term.clone()).or_default() += 1;
            }
        }

        let total: usize = documents.iter().map(Vec::len).sum();
        let avg_doc_len = if documents.is_empty() {
            0.0
        } else {
            total as f32 / documents.len() as f32
        };

        Self {
            documents,
            doc_freqs,
            avg_doc_len,
            params,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn avg_doc_len(&self) -> f32 {
        self.avg_doc_len
    }

    pub fn doc_freqs(&self) -> &HashMap<String, usize> {
        &self.doc_freqs
    }

    /// Score every document, in input order
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let terms = unique_terms(query);
        self.documents
            .iter()
            .map(|doc| {
                score_tokens(
                    &terms,
                    doc,
                    self.avg_doc_len,
                    Some(&self.doc_freqs),
                    self.documents.len(),
                    self.params,
                )
            })
            .collect()
    }

    /// Score a single document
    pub fn score(&self, query: &str, index: usize) -> f32 {
        let Some(doc) = self.documents.get(index) else {
            return 0.0;
        };
        score_tokens(
            &unique_terms(query),
            doc,
            self.avg_doc_len,
            Some(&self.doc_freqs),
            self.documents.len(),
            self.params,
        )
    }

    /// Documents with a positive score, best first; ties keep input order
    pub fn rank(&self, query: &str) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self
            .scores(query)
            .into_iter()
            .enumerate()
            .filter(|(_, s)| *s > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

// ============================================================================
// TESTS
// ============================================================================
