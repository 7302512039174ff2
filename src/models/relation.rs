//! Relation types.

use crate::normalize_name;
use serde::{Deserialize, Serialize};

/// A directed, labeled edge between two entities of the same context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Normalized source entity name.
    pub from: String,
    /// Normalized target entity name.
    pub to: String,
    /// Normalized relation type.
    pub relation_type: String,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Optional edge strength.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
}

impl Relation {
    /// Returns the identity triple of this relation.
    #[must_use]
    pub fn key(&self) -> RelationKey {
        RelationKey {
            from: self.from.clone(),
            to: self.to.clone(),
            relation_type: self.relation_type.clone(),
        }
    }
}

/// The normalized identity triple of a relation.
///
/// Uniqueness within a context is defined over this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationKey {
    /// Normalized source entity name.
    pub from: String,
    /// Normalized target entity name.
    pub to: String,
    /// Normalized relation type.
    pub relation_type: String,
}

/// Input for creating or deleting a relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationInput {
    /// Source entity name (any casing; normalized on commit).
    pub from: String,
    /// Target entity name (any casing; normalized on commit).
    pub to: String,
    /// Relation type (any casing; normalized on commit).
    pub relation_type: String,
    /// Optional edge strength.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
}

impl RelationInput {
    /// Creates a relation input.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation_type: relation_type.into(),
            strength: None,
        }
    }

    /// Returns the normalized identity triple for this input.
    #[must_use]
    pub fn normalized_key(&self) -> RelationKey {
        RelationKey {
            from: normalize_name(&self.from),
            to: normalize_name(&self.to),
            relation_type: normalize_name(&self.relation_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_key() {
        let input = RelationInput::new("  Alice ", "BOB", "Friend Of");
        let key = input.normalized_key();
        assert_eq!(key.from, "alice");
        assert_eq!(key.to, "bob");
        assert_eq!(key.relation_type, "friend of");
    }

    #[test]
    fn test_strength_omitted_when_none() {
        let rel = Relation {
            from: "a".to_string(),
            to: "b".to_string(),
            relation_type: "knows".to_string(),
            created_at: 1,
            strength: None,
        };
        let json = serde_json::to_value(&rel).unwrap();
        assert!(json.get("strength").is_none());
    }
}
