//! Search intent analysis and query suggestions.
//!
//! Keyword tables map a query onto one of four intents with a bounded
//! confidence; a complexity classifier and a context-hint extractor feed the
//! planner and the suggestion generator.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum suggestions returned by one analysis.
const MAX_SUGGESTIONS: usize = 10;

/// What the caller is trying to do with a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchIntentKind {
    /// Locate one specific entity.
    Find,
    /// Skim a set of entities.
    Browse,
    /// Follow connections outward.
    Explore,
    /// Confirm a remembered fact.
    Verify,
}

impl SearchIntentKind {
    /// Identifier used in responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::Browse => "browse",
            Self::Explore => "explore",
            Self::Verify => "verify",
        }
    }

    /// Parses an intent name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "find" => Some(Self::Find),
            "browse" => Some(Self::Browse),
            "explore" => Some(Self::Explore),
            "verify" => Some(Self::Verify),
            _ => None,
        }
    }
}

/// Query complexity report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityClass {
    /// Short, operator-free.
    Simple,
    /// Mid-length.
    Moderate,
    /// Long or operator-heavy.
    Complex,
}

impl ComplexityClass {
    /// Identifier used in responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }
}

/// Structural hints found in the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextHint {
    /// Question form ("who", "what", trailing `?`).
    Question,
    /// Quoted phrase present.
    ExactPhrase,
    /// `*` wildcard present.
    Wildcard,
    /// Explicit AND/OR/NOT present.
    Boolean,
}

/// Result of intent analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAnalysis {
    /// Detected intent.
    pub intent: SearchIntentKind,
    /// Confidence in `[0.5, 0.9]`.
    pub confidence: f64,
    /// Up to ten alternative query strings.
    pub suggestions: Vec<String>,
    /// Complexity classification.
    pub complexity: ComplexityClass,
    /// Structural hints.
    pub context_hints: Vec<ContextHint>,
}

struct IntentSignal {
    keyword: &'static str,
    intent: SearchIntentKind,
    confidence: f64,
}

static INTENT_SIGNALS: Lazy<Vec<IntentSignal>> = Lazy::new(|| {
    let table: &[(&str, SearchIntentKind, f64)] = &[
        ("find", SearchIntentKind::Find, 0.9),
        ("where is", SearchIntentKind::Find, 0.85),
        ("locate", SearchIntentKind::Find, 0.85),
        ("get", SearchIntentKind::Find, 0.6),
        ("show me", SearchIntentKind::Find, 0.7),
        ("lookup", SearchIntentKind::Find, 0.8),
        ("browse", SearchIntentKind::Browse, 0.9),
        ("list", SearchIntentKind::Browse, 0.8),
        ("all", SearchIntentKind::Browse, 0.55),
        ("everything", SearchIntentKind::Browse, 0.7),
        ("overview", SearchIntentKind::Browse, 0.75),
        ("explore", SearchIntentKind::Explore, 0.9),
        ("related", SearchIntentKind::Explore, 0.8),
        ("similar", SearchIntentKind::Explore, 0.75),
        ("connected", SearchIntentKind::Explore, 0.75),
        ("connections", SearchIntentKind::Explore, 0.8),
        ("verify", SearchIntentKind::Verify, 0.9),
        ("check", SearchIntentKind::Verify, 0.75),
        ("confirm", SearchIntentKind::Verify, 0.85),
        ("did i", SearchIntentKind::Verify, 0.7),
        ("is there", SearchIntentKind::Verify, 0.65),
    ];
    table
        .iter()
        .map(|&(keyword, intent, confidence)| IntentSignal {
            keyword,
            intent,
            confidence,
        })
        .collect()
});

static SPELLING_FIXES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("teh", "the"),
        ("recieve", "receive"),
        ("adress", "address"),
        ("calender", "calendar"),
        ("seperate", "separate"),
        ("definately", "definitely"),
        ("occured", "occurred"),
        ("untill", "until"),
    ])
});

static SYNONYMS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        ("meeting", &["appointment", "call", "discussion"] as &[&str]),
        ("task", &["todo", "action item", "ticket"]),
        ("person", &["contact", "colleague"]),
        ("project", &["initiative", "effort"]),
        ("note", &["memo", "record"]),
        ("idea", &["thought", "proposal"]),
        ("problem", &["issue", "bug"]),
    ])
});

static RELATED_TERMS: Lazy<HashMap<&'static str, &'static [&'static str]>> = Lazy::new(|| {
    HashMap::from([
        ("deadline", &["due date", "milestone"] as &[&str]),
        ("decision", &["choice", "conclusion"]),
        ("budget", &["cost", "estimate"]),
        ("design", &["architecture", "plan"]),
        ("review", &["feedback", "retrospective"]),
    ])
});

/// Analyzes a query: intent, confidence, suggestions, complexity, hints.
///
/// `current_entities` feeds contextual expansions ("alpha" → "alpha Projects
/// board") when an active entity shares a token with the query.
#[must_use]
pub fn analyze_intent(query: &str, current_entities: &[String]) -> IntentAnalysis {
    let lower = query.trim().to_lowercase();

    let (intent, mut confidence) = detect(&lower);

    // Length heuristics: short queries are usually lookups, long ones carry
    // more signal about what the caller wants
    let word_count = lower.split_whitespace().count();
    if word_count <= 2 {
        confidence -= 0.1;
    } else if word_count >= 6 {
        confidence += 0.1;
    }
    let confidence = confidence.clamp(0.5, 0.9);

    IntentAnalysis {
        intent,
        confidence,
        suggestions: build_suggestions(&lower, current_entities),
        complexity: classify_complexity(&lower),
        context_hints: extract_hints(query),
    }
}

fn detect(lower: &str) -> (SearchIntentKind, f64) {
    let mut best: Option<(SearchIntentKind, f64)> = None;
    for signal in INTENT_SIGNALS.iter() {
        if lower.contains(signal.keyword) {
            let replace = best.is_none_or(|(_, confidence)| signal.confidence > confidence);
            if replace {
                best = Some((signal.intent, signal.confidence));
            }
        }
    }
    best.unwrap_or((SearchIntentKind::Find, 0.5))
}

fn classify_complexity(lower: &str) -> ComplexityClass {
    let words = lower.split_whitespace().count();
    let has_operators = lower.contains('"')
        || lower.contains('*')
        || lower.contains(" and ")
        || lower.contains(" or ")
        || lower.contains(" not ");
    if has_operators || words > 6 {
        ComplexityClass::Complex
    } else if words >= 3 {
        ComplexityClass::Moderate
    } else {
        ComplexityClass::Simple
    }
}

fn extract_hints(query: &str) -> Vec<ContextHint> {
    let lower = query.to_lowercase();
    let mut hints = Vec::new();
    let question_lead = ["who", "what", "when", "where", "why", "how"]
        .iter()
        .any(|lead| lower.starts_with(lead));
    if question_lead || lower.contains('?') {
        hints.push(ContextHint::Question);
    }
    if query.contains('"') {
        hints.push(ContextHint::ExactPhrase);
    }
    if query.contains('*') {
        hints.push(ContextHint::Wildcard);
    }
    let upper_bool = query.contains("AND") || query.contains("OR") || query.contains("NOT");
    if upper_bool {
        hints.push(ContextHint::Boolean);
    }
    hints
}

fn build_suggestions(lower: &str, current_entities: &[String]) -> Vec<String> {
    let mut suggestions = Vec::new();

    // Spelling corrections from the fixed dictionary
    let words: Vec<&str> = lower.split_whitespace().collect();
    for (index, word) in words.iter().enumerate() {
        if let Some(fix) = SPELLING_FIXES.get(word) {
            let mut corrected = words.clone();
            corrected[index] = fix;
            push_unique(&mut suggestions, corrected.join(" "));
        }
    }

    // Contextual expansions from the active entity set
    for entity in current_entities {
        let entity_lower = entity.to_lowercase();
        let shares_token = words
            .iter()
            .any(|word| word.len() > 2 && entity_lower.contains(word));
        if shares_token && entity_lower != lower {
            push_unique(&mut suggestions, entity.clone());
        }
    }

    // Semantic swaps from the synonym table
    for (index, word) in words.iter().enumerate() {
        if let Some(alternatives) = SYNONYMS.get(word) {
            for alternative in *alternatives {
                let mut swapped = words.clone();
                swapped[index] = alternative;
                push_unique(&mut suggestions, swapped.join(" "));
            }
        }
    }

    // Related-term substitutions
    for (index, word) in words.iter().enumerate() {
        if let Some(related) = RELATED_TERMS.get(word) {
            for term in *related {
                let mut swapped = words.clone();
                swapped[index] = term;
                push_unique(&mut suggestions, swapped.join(" "));
            }
        }
    }

    suggestions.truncate(MAX_SUGGESTIONS);
    suggestions
}

fn push_unique(suggestions: &mut Vec<String>, candidate: String) {
    if suggestions.len() < MAX_SUGGESTIONS && !suggestions.contains(&candidate) {
        suggestions.push(candidate);
    }
}
