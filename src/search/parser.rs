//! Search query parser.
//!
//! Extracts quoted phrases (highest priority) and bare terms with per-term
//! `*` (prefix) and `~` (fuzzy) flags, classifies query complexity, and
//! builds the FTS5 MATCH expression. Fuzzy terms degrade to prefix terms:
//! the underlying FTS engine has no edit-distance support.

use once_cell::sync::Lazy;
use regex::Regex;

static PHRASE_RE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r#""([^"]+)""#).unwrap()
});

/// Recommended result limit for simple queries.
pub const SIMPLE_QUERY_LIMIT: usize = 1000;

/// Recommended result limit for complex queries.
pub const COMPLEX_QUERY_LIMIT: usize = 100;

/// Query complexity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryComplexity {
    /// Few operators; joined by implicit AND for precision.
    Simple,
    /// Operator-heavy; joined by OR to preserve recall.
    Complex,
}

impl QueryComplexity {
    /// Identifier used in responses and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Complex => "complex",
        }
    }
}

/// A single parsed term with its flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTerm {
    /// Term text with flag characters stripped.
    pub text: String,
    /// Trailing `*`: prefix match requested.
    pub prefix: bool,
    /// Trailing `~`: fuzzy match requested (approximated as prefix).
    pub fuzzy: bool,
}

/// A parsed search query.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    /// Quoted phrases, in order of appearance.
    pub phrases: Vec<String>,
    /// Bare terms, in order of appearance.
    pub terms: Vec<QueryTerm>,
    /// Complexity classification.
    pub complexity: QueryComplexity,
    /// Planner cost estimate; higher means a more expensive plan.
    pub estimated_cost: f64,
}

impl ParsedQuery {
    /// Recommended FTS result limit for this query's complexity.
    #[must_use]
    pub const fn recommended_limit(&self) -> usize {
        match self.complexity {
            QueryComplexity::Simple => SIMPLE_QUERY_LIMIT,
            QueryComplexity::Complex => COMPLEX_QUERY_LIMIT,
        }
    }

    /// All searchable token texts: phrases first, then terms.
    #[must_use]
    pub fn token_texts(&self) -> Vec<&str> {
        self.phrases
            .iter()
            .map(String::as_str)
            .chain(self.terms.iter().map(|t| t.text.as_str()))
            .collect()
    }
}

/// Parses a raw query string.
#[must_use]
pub fn parse_query(raw: &str) -> ParsedQuery {
    let mut phrases = Vec::new();
    for capture in PHRASE_RE.captures_iter(raw) {
        if let Some(phrase) = capture.get(1) {
            let trimmed = phrase.as_str().trim();
            if !trimmed.is_empty() {
                phrases.push(trimmed.to_string());
            }
        }
    }
    let remainder = PHRASE_RE.replace_all(raw, " ");

    let mut terms = Vec::new();
    let mut booleans = 0_usize;
    for token in remainder.split_whitespace() {
        if matches!(token, "AND" | "OR" | "NOT") {
            booleans += 1;
            continue;
        }
        let mut text = token;
        let mut prefix = false;
        let mut fuzzy = false;
        while let Some(stripped) = text.strip_suffix('*') {
            prefix = true;
            text = stripped;
        }
        while let Some(stripped) = text.strip_suffix('~') {
            fuzzy = true;
            text = stripped;
        }
        let cleaned: String = text
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        if cleaned.is_empty() {
            continue;
        }
        terms.push(QueryTerm {
            text: cleaned,
            prefix,
            fuzzy,
        });
    }

    let wildcards = terms.iter().filter(|t| t.prefix).count();
    let fuzzies = terms.iter().filter(|t| t.fuzzy).count();
    let operator_signals = wildcards + fuzzies + phrases.len() + booleans;
    let complexity = if operator_signals <= 2 {
        QueryComplexity::Simple
    } else {
        QueryComplexity::Complex
    };

    #[allow(clippy::cast_precision_loss)]
    let estimated_cost = 1.0
        + 2.0 * phrases.len() as f64
        + 1.5 * fuzzies as f64
        + 1.0 * wildcards as f64
        + 2.0 * booleans as f64
        + 0.1 * terms.len() as f64;

    ParsedQuery {
        phrases,
        terms,
        complexity,
        estimated_cost,
    }
}

/// Builds the FTS5 MATCH expression for a parsed query.
///
/// Phrases stay quoted. Simple queries join tokens with implicit AND for
/// precision; complex queries join with OR so an over-constrained query
/// still recalls. Returns `None` when nothing survived parsing.
#[must_use]
pub fn build_match_expression(parsed: &ParsedQuery) -> Option<String> {
    let mut pieces: Vec<String> = Vec::new();
    for phrase in &parsed.phrases {
        pieces.push(format!("\"{}\"", escape_fts(phrase)));
    }
    for term in &parsed.terms {
        let quoted = format!("\"{}\"", escape_fts(&term.text));
        if term.prefix || term.fuzzy {
            pieces.push(format!("{quoted}*"));
        } else {
            pieces.push(quoted);
        }
    }
    if pieces.is_empty() {
        return None;
    }
    let joiner = match parsed.complexity {
        QueryComplexity::Simple => " ",
        QueryComplexity::Complex => " OR ",
    };
    Some(pieces.join(joiner))
}

/// Doubles internal quotes so user text cannot escape the FTS string.
fn escape_fts(text: &str) -> String {
    text.replace('"', "\"\"")
}
