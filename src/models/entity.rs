//! Entity and observation types.

use crate::normalize_name;
use serde::{Deserialize, Serialize};

/// A rich content block attached to an entity.
///
/// Observations are an ordered sequence owned by exactly one entity; they do
/// not exist independently. Serialized with an explicit `type` discriminator
/// so exports stay self-describing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Observation {
    /// Plain text content. The only variant mirrored into the FTS index.
    Text {
        /// The text body.
        text: String,
    },
    /// Inline image content.
    Image {
        /// Base64-encoded image bytes.
        data_b64: String,
        /// MIME type, e.g. `image/png`.
        mime_type: String,
    },
    /// Inline audio content.
    Audio {
        /// Base64-encoded audio bytes.
        data_b64: String,
        /// MIME type, e.g. `audio/wav`.
        mime_type: String,
    },
    /// A link to an external resource.
    ResourceLink {
        /// Resource URI.
        uri: String,
        /// Optional display title.
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// Optional description.
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// An embedded binary resource.
    Resource {
        /// Base64-encoded resource bytes.
        data_b64: String,
        /// MIME type.
        mime_type: String,
        /// Optional display title.
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// Optional description.
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl Observation {
    /// Convenience constructor for a text observation.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Returns the text body if this is a text observation.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Returns the content-type tag used by search filters and highlights.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Audio { .. } => "audio",
            Self::ResourceLink { .. } => "resource_link",
            Self::Resource { .. } => "resource",
        }
    }
}

/// A stored entity: a named, typed record with ordered observations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    /// Original (display) name as first created.
    pub name: String,
    /// Free-form entity type, stored lowercased.
    pub entity_type: String,
    /// Ordered observation sequence.
    pub observations: Vec<Observation>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last mutation timestamp (Unix epoch seconds). Always `>= created_at`.
    pub updated_at: i64,
    /// Last read timestamp (Unix epoch seconds). Always `>= created_at`.
    pub last_accessed: i64,
    /// Number of reads since creation.
    pub access_count: u64,
    /// Caller-assigned importance factor, default 1.0.
    pub importance_weight: f64,
    /// Current prominence score, kept inside the configured bounds.
    pub prominence_score: f64,
    /// Whether the aging sweep has flagged this entity as forgotten.
    ///
    /// Forgotten entities stay stored and searchable; they just lose their
    /// prominence boost.
    #[serde(default)]
    pub forgotten: bool,
}

impl Entity {
    /// Returns the normalized identity key of this entity.
    #[must_use]
    pub fn name_normalized(&self) -> String {
        normalize_name(&self.name)
    }

    /// Concatenated searchable text of the textual observations.
    ///
    /// This is exactly the string mirrored into the FTS `content` column.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        self.observations
            .iter()
            .filter_map(Observation::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Input for creating or upserting an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityInput {
    /// Entity name (display form; identity is the normalized form).
    pub name: String,
    /// Free-form entity type.
    pub entity_type: String,
    /// Initial observations, in order.
    #[serde(default)]
    pub observations: Vec<Observation>,
    /// Optional importance weight override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance_weight: Option<f64>,
}

impl EntityInput {
    /// Creates an input with no observations.
    #[must_use]
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            observations: Vec::new(),
            importance_weight: None,
        }
    }

    /// Appends a text observation.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.observations.push(Observation::text(text));
        self
    }
}

/// Whether an upsert created a new row or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// A new entity row was inserted.
    Created,
    /// An existing entity was merged into (type overwritten, observations
    /// appended).
    Updated,
}

/// Per-entity result of `create_entities`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertResult {
    /// The entity name as submitted.
    pub name: String,
    /// Created or updated.
    pub outcome: UpsertOutcome,
    /// The post-commit entity state.
    pub entity: Entity,
}

/// A batch item for `add_observations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationAdd {
    /// Target entity name.
    pub entity_name: String,
    /// Observations to append, in order.
    pub contents: Vec<Observation>,
}

/// Per-entity result of `add_observations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddObservationsResult {
    /// Target entity name.
    pub entity_name: String,
    /// Number of observations appended.
    pub added: usize,
    /// Total observations on the entity after the append.
    pub total: usize,
}

/// A batch item for `delete_observations`.
///
/// Each listed observation removes exactly the first matching occurrence on
/// the entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteObservationsRequest {
    /// Target entity name.
    pub entity_name: String,
    /// Observations to remove (first match each).
    pub observations: Vec<Observation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_tagged_serialization() {
        let obs = Observation::text("hello");
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["text"], "hello");

        let obs = Observation::ResourceLink {
            uri: "https://example.com".to_string(),
            title: Some("Example".to_string()),
            description: None,
        };
        let json = serde_json::to_value(&obs).unwrap();
        assert_eq!(json["type"], "resource_link");
        assert_eq!(json["uri"], "https://example.com");
        assert!(json.get("description").is_none());
    }

    #[test]
    fn test_observation_roundtrip() {
        let obs = Observation::Image {
            data_b64: "aGVsbG8=".to_string(),
            mime_type: "image/png".to_string(),
        };
        let json = serde_json::to_string(&obs).unwrap();
        let back: Observation = serde_json::from_str(&json).unwrap();
        assert_eq!(obs, back);
    }

    #[test]
    fn test_searchable_text_skips_binary_blocks() {
        let entity = Entity {
            name: "Alice".to_string(),
            entity_type: "person".to_string(),
            observations: vec![
                Observation::text("first"),
                Observation::Image {
                    data_b64: "eA==".to_string(),
                    mime_type: "image/png".to_string(),
                },
                Observation::text("second"),
            ],
            created_at: 0,
            updated_at: 0,
            last_accessed: 0,
            access_count: 0,
            importance_weight: 1.0,
            prominence_score: 1.0,
            forgotten: false,
        };
        assert_eq!(entity.searchable_text(), "first\nsecond");
        assert_eq!(entity.name_normalized(), "alice");
    }
}
