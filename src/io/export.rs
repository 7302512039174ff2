//! Memory export: document assembly and rendering.

use crate::context::ContextRegistry;
use crate::models::{
    ContextExport, EXPORT_FORMAT_VERSION, Entity, ExportMetadata, ExportedEntity, ExportedRelation,
    MemoryExport,
};
use crate::{Error, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::BTreeSet;
use std::io::Write as _;

/// Output renderings for an export document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// Pretty-printed JSON document.
    Json,
    /// One JSON object per line: envelope first, then entities, then
    /// relations.
    JsonLines,
    /// `base64(gzip(json))` with a configurable level 0–9.
    Compressed {
        /// gzip level, clamped to 0–9.
        level: u32,
    },
}

impl ExportFormat {
    /// Parses a format name.
    #[must_use]
    pub fn parse(name: &str, level: Option<u32>) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "json" => Some(Self::Json),
            "jsonl" | "jsonlines" => Some(Self::JsonLines),
            "compressed" | "gzip" => Some(Self::Compressed {
                level: level.unwrap_or(6).min(9),
            }),
            _ => None,
        }
    }
}

/// Options controlling what an export contains.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Export one context, or all when `None`.
    pub context: Option<String>,
    /// Include context metadata records.
    pub include_metadata: bool,
    /// Include observation blocks.
    pub include_observations: bool,
    /// Include relations.
    pub include_relations: bool,
    /// Keep only entities updated at or after this timestamp.
    pub date_from: Option<i64>,
    /// Keep only entities updated at or before this timestamp.
    pub date_to: Option<i64>,
    /// Keep only these entity types (normalized), when set.
    pub entity_types: Option<Vec<String>>,
    /// Document version override.
    pub target_version: Option<u32>,
    /// Rendering format.
    pub format: ExportFormat,
    /// Optional tag naming the intended consumer.
    pub target_server: Option<String>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            context: None,
            include_metadata: true,
            include_observations: true,
            include_relations: true,
            date_from: None,
            date_to: None,
            entity_types: None,
            target_version: None,
            format: ExportFormat::Json,
            target_server: None,
        }
    }
}

impl ExportOptions {
    /// Restricts the export to one context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Sets the rendering format.
    #[must_use]
    pub const fn with_format(mut self, format: ExportFormat) -> Self {
        self.format = format;
        self
    }

    /// Restricts to entities updated inside `[from, to]`.
    #[must_use]
    pub const fn with_date_range(mut self, from: Option<i64>, to: Option<i64>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    fn keeps(&self, entity: &Entity) -> bool {
        if let Some(from) = self.date_from
            && entity.updated_at < from
        {
            return false;
        }
        if let Some(to) = self.date_to
            && entity.updated_at > to
        {
            return false;
        }
        if let Some(types) = &self.entity_types
            && !types.iter().any(|t| t == &entity.entity_type)
        {
            return false;
        }
        true
    }
}

/// Builds a sealed export document from the registry.
pub fn build_export(registry: &ContextRegistry, options: &ExportOptions) -> Result<MemoryExport> {
    let selected: Vec<String> = match &options.context {
        Some(name) => {
            if registry.get(name).is_none() {
                return Err(Error::InvalidContext(format!("unknown context '{name}'")));
            }
            vec![name.clone()]
        },
        None => registry.list().into_iter().map(|m| m.name).collect(),
    };

    let mut contexts = std::collections::BTreeMap::new();
    let mut metadata = ExportMetadata::default();
    let mut entity_types: BTreeSet<String> = BTreeSet::new();
    let mut relation_types: BTreeSet<String> = BTreeSet::new();

    for name in &selected {
        let Some(context) = registry.get(name) else {
            continue;
        };
        let store = context.store();

        let mut entities = Vec::new();
        for entity in store.all_entities()? {
            if !options.keeps(&entity) {
                continue;
            }
            entity_types.insert(entity.entity_type.clone());
            metadata.total_observations += if options.include_observations {
                entity.observations.len()
            } else {
                0
            };
            entities.push(ExportedEntity {
                name: entity.name,
                entity_type: entity.entity_type,
                observations: if options.include_observations {
                    entity.observations
                } else {
                    Vec::new()
                },
                created_at: entity.created_at,
                updated_at: entity.updated_at,
                importance_weight: entity.importance_weight,
            });
        }

        let relations: Vec<ExportedRelation> = if options.include_relations {
            let kept: BTreeSet<String> = entities
                .iter()
                .map(|e| crate::normalize_name(&e.name))
                .collect();
            store
                .all_relations()?
                .iter()
                .filter(|r| kept.contains(&r.from) && kept.contains(&r.to))
                .map(|r| {
                    relation_types.insert(r.relation_type.clone());
                    ExportedRelation::from(r)
                })
                .collect()
        } else {
            Vec::new()
        };

        metadata.total_entities += entities.len();
        metadata.total_relations += relations.len();
        metadata.contexts.push(name.clone());

        let context_metadata = if options.include_metadata {
            serde_json::to_value(context.metadata()).ok()
        } else {
            None
        };

        contexts.insert(
            name.clone(),
            ContextExport {
                name: name.clone(),
                entities,
                relations,
                metadata: context_metadata,
            },
        );
    }

    metadata.entity_types = entity_types.into_iter().collect();
    metadata.relation_types = relation_types.into_iter().collect();

    let mut export = MemoryExport {
        version: options.target_version.unwrap_or(EXPORT_FORMAT_VERSION),
        export_date: Utc::now(),
        source_server: "engram".to_string(),
        source_version: env!("CARGO_PKG_VERSION").to_string(),
        target_server: options.target_server.clone(),
        metadata,
        contexts,
        checksum: String::new(),
    };
    export.seal()?;

    metrics::counter!("exports_total").increment(1);
    Ok(export)
}

/// Renders a sealed document in the requested format.
pub fn render_export(export: &MemoryExport, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(export).map_err(|e| Error::OperationFailed {
                operation: "render_export_json".to_string(),
                cause: e.to_string(),
            })
        },
        ExportFormat::JsonLines => render_jsonl(export),
        ExportFormat::Compressed { level } => {
            let json = serde_json::to_string(export).map_err(|e| Error::OperationFailed {
                operation: "render_export_json".to_string(),
                cause: e.to_string(),
            })?;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
            encoder
                .write_all(json.as_bytes())
                .and_then(|()| encoder.finish())
                .map(|compressed| BASE64.encode(compressed))
                .map_err(|e| Error::OperationFailed {
                    operation: "render_export_compressed".to_string(),
                    cause: e.to_string(),
                })
        },
    }
}

/// JSON Lines: an envelope line, then one line per entity and relation.
fn render_jsonl(export: &MemoryExport) -> Result<String> {
    let to_line = |value: &serde_json::Value| -> Result<String> {
        serde_json::to_string(value).map_err(|e| Error::OperationFailed {
            operation: "render_export_jsonl".to_string(),
            cause: e.to_string(),
        })
    };

    let mut lines = Vec::new();
    let envelope = serde_json::json!({
        "version": export.version,
        "export_date": export.export_date,
        "source_server": export.source_server,
        "source_version": export.source_version,
        "target_server": export.target_server,
        "metadata": export.metadata,
        "checksum": export.checksum,
    });
    lines.push(to_line(&envelope)?);

    for (context_name, context) in &export.contexts {
        for entity in &context.entities {
            let value = serde_json::json!({"context": context_name, "entity": entity});
            lines.push(to_line(&value)?);
        }
        for relation in &context.relations {
            let value = serde_json::json!({"context": context_name, "relation": relation});
            lines.push(to_line(&value)?);
        }
    }
    Ok(lines.join("\n"))
}
