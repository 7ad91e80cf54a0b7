//! Lexical heuristics used by the quality filter and compression stage
//!
//! Kept as data tables so they can be tuned and tested in isolation.

use std::sync::LazyLock;

use regex::Regex;

use crate::text::tokenize;

/// Structural junk: table-of-contents and breadcrumb markers,
/// horizontal-rule-only text, "link to page" placeholders
const JUNK_PATTERNS: &[&str] = &[
    r"(?i)^\s*(table of contents|contents|toc)\s*:?\s*$",
    r"(?i)^\s*\[\[?_?toc_?\]?\]\s*$",
    r"(?i)^\s*(you are here|breadcrumbs?)\s*:",
    r"(?i)^\s*(home|docs?)\s*(>|»|/)\s*\S.*(>|»|/)",
    r"^\s*([-*_=]\s*){3,}\s*$",
    r"(?i)^\s*\[?link to (page|this page|another page)\]?\s*\.?\s*$",
    r"(?i)^\s*\(?link to page:?[^)]*\)?\s*$",
];

/// Query words that mark a programming question
pub const PROGRAMMING_VOCABULARY: &[&str] = &[
    "api", "array", "async", "bash", "bug", "class", "cli", "code", "compile", "config",
    "css", "curl", "debug", "deploy", "docker", "endpoint", "error", "exception", "function",
    "git", "html", "http", "implement", "import", "java", "javascript", "json", "kubernetes",
    "library", "method", "module", "npm", "python", "query", "regex", "rust", "script", "sdk",
    "snippet", "sql", "stack", "syntax", "terminal", "typescript", "variable", "webhook", "yaml",
];

/// Query shapes that mark a programming question
const PROGRAMMING_QUERY_PATTERNS: &[&str] = &[
    r"[A-Za-z_]\w*\(\)",
    r"\w+::\w+",
    r"\w+\.\w+\(",
    r"`[^`]+`",
    r"\b[a-z]+_[a-z_]+\b",
    r"\b[a-z]+[A-Z][A-Za-z]+\b",
    r"(?i)\bhow (do|can) i (call|use|install|configure|run)\b",
];

/// Line openers typical of source code
const CODE_LINE_PREFIXES: &[&str] = &[
    "fn ", "pub ", "let ", "const ", "var ", "def ", "class ", "import ", "from ", "return ",
    "if (", "for (", "while (", "function ", "#include", "package ", "use ", "public ",
    "private ", "export ", "SELECT ", "select ", "$ ",
];

/// LLM refusals and meta-commentary that must not replace a document
const DISCLAIMER_PATTERNS: &[&str] = &[
    r"(?i)\b(i'm sorry|i am sorry|i apologize)\b",
    r"(?i)\bas an ai\b",
    r"(?i)\bi (cannot|can't|am unable to)\b",
    r"(?i)\b(no relevant (information|content)|not relevant to the (query|question))\b",
    r"(?i)\bthe (document|text|passage) does not (contain|mention)\b",
    r"(?i)^\s*(n/a|none|nothing relevant)\.?\s*$",
];

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::error!(pattern = p, error = %e, "invalid heuristic pattern");
                None
            }
        })
        .collect()
}

static JUNK: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(JUNK_PATTERNS));
static QUERY_CODE: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(PROGRAMMING_QUERY_PATTERNS));
static DISCLAIMERS: LazyLock<Vec<Regex>> = LazyLock::new(|| compile(DISCLAIMER_PATTERNS));

/// Chunk is structural junk
pub fn is_junk(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return true;
    }
    JUNK.iter().any(|re| re.is_match(trimmed))
}

/// Query asks about programming
pub fn is_programming_query(query: &str) -> bool {
    if QUERY_CODE.iter().any(|re| re.is_match(query)) {
        return true;
    }
    tokenize(query)
        .iter()
        .any(|t| PROGRAMMING_VOCABULARY.contains(&t.as_str()))
}

/// Content looks like source code: a fenced block, or at least three
/// non-empty lines of which half or more end in `;`, `{`, `}` or open with
/// a code keyword
pub fn looks_like_code(content: &str) -> bool {
    if content.contains("```") {
        return true;
    }
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() < 3 {
        return false;
    }
    let code_lines = lines
        .iter()
        .filter(|line| {
            line.ends_with(';')
                || line.ends_with('{')
                || line.ends_with('}')
                || CODE_LINE_PREFIXES.iter().any(|p| line.starts_with(p))
        })
        .count();
    code_lines * 2 >= lines.len()
}

/// Compressor output is a refusal or meta-commentary
pub fn is_disclaimer(text: &str) -> bool {
    DISCLAIMERS.iter().any(|re| re.is_match(text))
}
