//! Relevance scoring: base FTS rank plus multiplicative boosts.
//!
//! Scores are deterministic given identical inputs and a fixed aging
//! snapshot: every boost is a pure function of the entity row, the query,
//! and the optional search context.

use super::intent::SearchIntentKind;
use crate::aging::AgingConfig;
use crate::models::Entity;
use crate::normalize_name;
use serde::{Deserialize, Serialize};

const SECONDS_PER_DAY: i64 = 86_400;

/// Upper bound on a final relevance score.
pub const MAX_SCORE: f64 = 10.0;

/// Coarse user-context classification for context-aware boosting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserContextKind {
    /// Work-related session.
    Work,
    /// Personal session.
    Personal,
    /// No signal either way.
    Neutral,
}

impl UserContextKind {
    const fn boost(self) -> f64 {
        match self {
            Self::Work => 1.3,
            Self::Personal => 1.2,
            Self::Neutral => 1.0,
        }
    }
}

/// Optional conversational context accompanying a search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchContext {
    /// Entity the conversation is currently centered on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_entity: Option<String>,
    /// Coarse user-context classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<UserContextKind>,
    /// Free-text conversation context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_context: Option<String>,
    /// Recent search strings, newest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent_searches: Vec<String>,
}

/// Everything the scorer needs besides the entity itself.
pub struct RankingInputs<'a> {
    /// Normalized (lowercased, trimmed) query string.
    pub query: &'a str,
    /// Optional conversational context.
    pub search_context: Option<&'a SearchContext>,
    /// Detected or caller-supplied intent.
    pub intent: Option<SearchIntentKind>,
    /// Content-type filter, if the caller asked for one.
    pub content_type: Option<&'a str>,
    /// Aging model for the prominence boost.
    pub aging: &'a AgingConfig,
    /// Scoring timestamp.
    pub now: i64,
}

/// Scores one entity given its FTS rank position (0-based).
#[must_use]
pub fn score_entity(entity: &Entity, rank_position: usize, inputs: &RankingInputs<'_>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let mut score = 1.0 / (rank_position as f64 + 1.0);

    let name = normalize_name(&entity.name);
    let query = inputs.query;

    // Name affinity: the strongest signal
    if name == query {
        score *= 10.0;
    } else if name.starts_with(query) {
        score *= 5.0;
    } else if name.contains(query) {
        score *= 3.0;
    }

    if entity.entity_type.contains(query) {
        score *= 2.0;
    }

    // Recency of last mutation
    let age_days = (inputs.now - entity.updated_at) / SECONDS_PER_DAY;
    if age_days <= 7 {
        score *= 1.2;
    } else if age_days > 365 {
        score *= 0.8;
    }

    if entity.observations.len() > 5 {
        score *= 1.1;
    }

    if let Some(context) = inputs.search_context {
        score *= context_boost(entity, &name, context);
    }

    if let Some(content_type) = inputs.content_type
        && entity
            .observations
            .iter()
            .any(|obs| obs.content_type() == content_type)
    {
        score *= 1.2;
    }

    score *= inputs
        .aging
        .search_boost(entity.prominence_score, entity.forgotten);

    if let Some(intent) = inputs.intent {
        score *= intent_boost(entity, &name, query, intent);
    }

    score.clamp(0.0, MAX_SCORE)
}

fn context_boost(entity: &Entity, name: &str, context: &SearchContext) -> f64 {
    let mut boost = 1.0;

    if let Some(current) = &context.current_entity {
        let current = normalize_name(current);
        if current == name {
            boost *= 2.0;
        } else if !current.is_empty() && (name.contains(&current) || current.contains(name)) {
            boost *= 1.5;
        }
    }

    if let Some(user_context) = context.user_context {
        boost *= user_context.boost();
    }

    if let Some(conversation) = &context.conversation_context {
        let conversation = conversation.to_lowercase();
        if conversation.contains(name) {
            boost *= 1.4;
        }
        let text = entity.searchable_text().to_lowercase();
        if conversation
            .split_whitespace()
            .any(|word| word.len() > 3 && text.contains(word))
        {
            boost *= 1.2;
        }
    }

    if context
        .recent_searches
        .iter()
        .any(|search| overlaps(&search.to_lowercase(), name))
    {
        boost *= 1.3;
    }

    boost
}

fn overlaps(search: &str, name: &str) -> bool {
    search
        .split_whitespace()
        .any(|token| token.len() > 2 && name.contains(token))
}

fn intent_boost(entity: &Entity, name: &str, query: &str, intent: SearchIntentKind) -> f64 {
    match intent {
        SearchIntentKind::Find => {
            if name == query {
                1.5
            } else {
                1.0
            }
        },
        SearchIntentKind::Browse | SearchIntentKind::Explore => {
            // Richer entities are better browsing anchors
            #[allow(clippy::cast_precision_loss)]
            let richness = entity.observations.len().min(20) as f64;
            0.02_f64.mul_add(richness, 1.0)
        },
        SearchIntentKind::Verify => {
            if name.contains(query) {
                1.3
            } else {
                1.0
            }
        },
    }
}

/// Sorts scored results: score descending, then shorter entity name, then
/// lexicographic. Fully deterministic.
pub fn sort_results<T>(results: &mut [(T, f64)], name_of: impl Fn(&T) -> &str) {
    results.sort_by(|(a, score_a), (b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| name_of(a).len().cmp(&name_of(b).len()))
            .then_with(|| name_of(a).cmp(name_of(b)))
    });
}
