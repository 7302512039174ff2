//! Result highlighting.
//!
//! Produces at most one human-readable snippet per field: name, type, the
//! first matching textual observation (±50 char window), context notes, and
//! a content-type summary for entities carrying non-text blocks.

use super::ranking::{SearchContext, UserContextKind};
use crate::models::Entity;
use crate::normalize_name;
use std::collections::BTreeMap;

/// Characters of context kept on each side of an observation match.
const SNIPPET_WINDOW: usize = 50;

/// Builds the highlight list for one result.
#[must_use]
pub fn build_highlights(
    entity: &Entity,
    query: &str,
    search_context: Option<&SearchContext>,
) -> Vec<String> {
    let mut highlights = Vec::new();
    let query = normalize_name(query);

    if !query.is_empty() && normalize_name(&entity.name).contains(&query) {
        highlights.push(format!("Name: {}", entity.name));
    }
    if !query.is_empty() && entity.entity_type.contains(&query) {
        highlights.push(format!("Type: {}", entity.entity_type));
    }

    if let Some(snippet) = observation_snippet(entity, &query) {
        highlights.push(snippet);
    }

    if let Some(context) = search_context {
        if let Some(current) = &context.current_entity {
            let current_norm = normalize_name(current);
            let name_norm = normalize_name(&entity.name);
            if !current_norm.is_empty()
                && (name_norm.contains(&current_norm) || current_norm.contains(&name_norm))
            {
                highlights.push(format!("Active context: {current}"));
            }
        }
        if let Some(user_context) = context.user_context {
            let label = match user_context {
                UserContextKind::Work => "work",
                UserContextKind::Personal => "personal",
                UserContextKind::Neutral => "neutral",
            };
            highlights.push(format!("User context: {label}"));
        }
    }

    if let Some(summary) = content_type_summary(entity) {
        highlights.push(summary);
    }

    highlights
}

/// Finds the first textual observation containing the query and cuts a
/// window around the match.
fn observation_snippet(entity: &Entity, query: &str) -> Option<String> {
    if query.is_empty() {
        return None;
    }
    for observation in &entity.observations {
        let Some(text) = observation.as_text() else {
            continue;
        };
        let lower = text.to_lowercase();
        if let Some(position) = lower.find(query) {
            return Some(format!("Observation: {}", window(text, position, query.len())));
        }
    }
    None
}

fn window(text: &str, position: usize, match_len: usize) -> String {
    let start = position.saturating_sub(SNIPPET_WINDOW);
    let end = (position + match_len + SNIPPET_WINDOW).min(text.len());
    let start = floor_char_boundary(text, start);
    let end = floor_char_boundary(text, end);

    let mut snippet = String::new();
    if start > 0 {
        snippet.push('…');
    }
    snippet.push_str(&text[start..end]);
    if end < text.len() {
        snippet.push('…');
    }
    snippet
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Summarizes the content-block mix when non-text blocks are present.
fn content_type_summary(entity: &Entity) -> Option<String> {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for observation in &entity.observations {
        *counts.entry(observation.content_type()).or_insert(0) += 1;
    }
    let non_text = counts.iter().any(|(kind, _)| *kind != "text");
    if !non_text {
        return None;
    }
    let parts: Vec<String> = counts
        .iter()
        .map(|(kind, count)| format!("{count} {kind}"))
        .collect();
    Some(format!("Content: {}", parts.join(", ")))
}
