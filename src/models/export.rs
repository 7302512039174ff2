//! The versioned export document.

use super::{Observation, Relation};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Current export document version.
pub const EXPORT_FORMAT_VERSION: u32 = 3;

/// An entity as it appears in an export document.
///
/// Export strips the volatile access-tracking fields; prominence is
/// recomputed by the importing side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedEntity {
    /// Display name.
    pub name: String,
    /// Entity type.
    pub entity_type: String,
    /// Ordered observations (may be omitted by export options).
    #[serde(default)]
    pub observations: Vec<Observation>,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Last update timestamp (Unix epoch seconds).
    pub updated_at: i64,
    /// Importance weight.
    #[serde(default = "default_importance")]
    pub importance_weight: f64,
}

const fn default_importance() -> f64 {
    1.0
}

/// A relation as it appears in an export document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedRelation {
    /// Normalized source entity name.
    pub from: String,
    /// Normalized target entity name.
    pub to: String,
    /// Normalized relation type.
    pub relation_type: String,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: i64,
    /// Optional edge strength.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
}

impl From<&Relation> for ExportedRelation {
    fn from(rel: &Relation) -> Self {
        Self {
            from: rel.from.clone(),
            to: rel.to.clone(),
            relation_type: rel.relation_type.clone(),
            created_at: rel.created_at,
            strength: rel.strength,
        }
    }
}

/// Aggregate counts and vocabularies over the whole export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportMetadata {
    /// Total entities across all exported contexts.
    pub total_entities: usize,
    /// Total relations across all exported contexts.
    pub total_relations: usize,
    /// Total observations across all exported entities.
    pub total_observations: usize,
    /// Exported context names, sorted.
    pub contexts: Vec<String>,
    /// Distinct entity types, sorted.
    pub entity_types: Vec<String>,
    /// Distinct relation types, sorted.
    pub relation_types: Vec<String>,
}

/// One context's worth of exported data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextExport {
    /// Context name.
    pub name: String,
    /// Exported entities.
    pub entities: Vec<ExportedEntity>,
    /// Exported relations.
    pub relations: Vec<ExportedRelation>,
    /// Context metadata record, if included.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// The `MemoryExport` document, version 3.
///
/// `checksum` is the SHA-256 of the canonical JSON serialization of the
/// document with the checksum field set to the empty string; see
/// [`MemoryExport::seal`] and [`MemoryExport::verify_checksum`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryExport {
    /// Format version; this writer emits [`EXPORT_FORMAT_VERSION`].
    pub version: u32,
    /// When the export was produced.
    pub export_date: DateTime<Utc>,
    /// Identifier of the producing server.
    pub source_server: String,
    /// Version string of the producing server.
    pub source_version: String,
    /// Optional tag naming the intended consumer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_server: Option<String>,
    /// Aggregate metadata.
    pub metadata: ExportMetadata,
    /// Per-context payloads, keyed and ordered by context name.
    pub contexts: BTreeMap<String, ContextExport>,
    /// SHA-256 over the checksum-less document.
    pub checksum: String,
}

impl MemoryExport {
    /// Computes the canonical checksum of this document.
    ///
    /// The checksum field itself is excluded by zeroing it before hashing;
    /// `BTreeMap` ordering keeps the serialization deterministic.
    pub fn compute_checksum(&self) -> Result<String> {
        let mut unsealed = self.clone();
        unsealed.checksum = String::new();
        let bytes = serde_json::to_vec(&unsealed).map_err(|e| Error::OperationFailed {
            operation: "serialize_export".to_string(),
            cause: e.to_string(),
        })?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Fills in the checksum field.
    pub fn seal(&mut self) -> Result<()> {
        self.checksum = self.compute_checksum()?;
        Ok(())
    }

    /// Verifies the embedded checksum against the document body.
    pub fn verify_checksum(&self) -> Result<()> {
        let actual = self.compute_checksum()?;
        if actual == self.checksum {
            Ok(())
        } else {
            Err(Error::BackupCorrupted(format!(
                "checksum mismatch: expected {}, computed {actual}",
                self.checksum
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_export() -> MemoryExport {
        let mut contexts = BTreeMap::new();
        contexts.insert(
            "personal".to_string(),
            ContextExport {
                name: "personal".to_string(),
                entities: vec![ExportedEntity {
                    name: "Alice".to_string(),
                    entity_type: "person".to_string(),
                    observations: vec![Observation::text("likes rust")],
                    created_at: 100,
                    updated_at: 100,
                    importance_weight: 1.0,
                }],
                relations: Vec::new(),
                metadata: None,
            },
        );
        MemoryExport {
            version: EXPORT_FORMAT_VERSION,
            export_date: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            source_server: "engram".to_string(),
            source_version: "0.4.2".to_string(),
            target_server: None,
            metadata: ExportMetadata {
                total_entities: 1,
                total_relations: 0,
                total_observations: 1,
                contexts: vec!["personal".to_string()],
                entity_types: vec!["person".to_string()],
                relation_types: Vec::new(),
            },
            contexts,
            checksum: String::new(),
        }
    }

    #[test]
    fn test_seal_then_verify() {
        let mut export = sample_export();
        export.seal().unwrap();
        assert!(!export.checksum.is_empty());
        export.verify_checksum().unwrap();
    }

    #[test]
    fn test_tampering_breaks_checksum() {
        let mut export = sample_export();
        export.seal().unwrap();
        export.metadata.total_entities = 99;
        let err = export.verify_checksum().unwrap_err();
        assert_eq!(err.kind(), "backup_corrupted");
    }

    #[test]
    fn test_checksum_deterministic() {
        let mut a = sample_export();
        let mut b = sample_export();
        a.seal().unwrap();
        b.seal().unwrap();
        assert_eq!(a.checksum, b.checksum);
    }
}
