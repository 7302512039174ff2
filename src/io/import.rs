//! Memory import: parsing, validation, and mode-aware application.

use crate::context::{Context, ContextRegistry};
use crate::models::{
    EXPORT_FORMAT_VERSION, EntityInput, ExportedEntity, MemoryExport, Observation, ObservationAdd,
    RelationInput,
};
use crate::storage::WriteOp;
use crate::{Error, Result, normalize_name};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Read as _;
use std::sync::Arc;

/// Import application modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Add new entities; merge non-duplicate observations into existing.
    #[default]
    Merge,
    /// Clear the target context first, then insert everything.
    Replace,
    /// Only touch entities that already exist; skip new ones.
    Update,
    /// Never modify existing data; add strictly new entities and relations.
    Append,
}

impl ImportMode {
    /// Parses a mode name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "merge" => Some(Self::Merge),
            "replace" => Some(Self::Replace),
            "update" => Some(Self::Update),
            "append" => Some(Self::Append),
            _ => None,
        }
    }
}

/// What to do when an imported entity name already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Leave the existing entity alone (observations still dedupe-merge in
    /// `merge` mode).
    #[default]
    Skip,
    /// Replace the existing entity with the imported one.
    Overwrite,
    /// Import under a numeric-suffixed name until unique.
    Rename,
}

impl ConflictResolution {
    /// Parses a resolution name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "skip" => Some(Self::Skip),
            "overwrite" => Some(Self::Overwrite),
            "rename" => Some(Self::Rename),
            _ => None,
        }
    }
}

/// Content-kind filter applied to imported observations.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ContentFilter {
    /// Keep text blocks.
    #[serde(default = "yes")]
    pub text: bool,
    /// Keep image blocks.
    #[serde(default = "yes")]
    pub images: bool,
    /// Keep audio blocks.
    #[serde(default = "yes")]
    pub audio: bool,
    /// Keep resource and resource-link blocks.
    #[serde(default = "yes")]
    pub resources: bool,
}

const fn yes() -> bool {
    true
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self {
            text: true,
            images: true,
            audio: true,
            resources: true,
        }
    }
}

impl ContentFilter {
    fn keeps(self, observation: &Observation) -> bool {
        match observation {
            Observation::Text { .. } => self.text,
            Observation::Image { .. } => self.images,
            Observation::Audio { .. } => self.audio,
            Observation::ResourceLink { .. } | Observation::Resource { .. } => self.resources,
        }
    }
}

/// Compatibility and content-migration controls.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrationOptions {
    /// Preserve original creation/update timestamps.
    #[serde(default)]
    pub preserve_ids: bool,
    /// Stamp imported entities with the import time instead.
    #[serde(default)]
    pub update_timestamps: bool,
    /// Entity-type renames applied during import.
    #[serde(default)]
    pub remap_entity_types: BTreeMap<String, String>,
    /// Relation-type renames applied during import.
    #[serde(default)]
    pub remap_relation_types: BTreeMap<String, String>,
    /// Content-kind filter.
    #[serde(default)]
    pub filter_content: ContentFilter,
}

/// Options controlling one import.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImportOptions {
    /// Application mode.
    #[serde(default)]
    pub mode: ImportMode,
    /// Name-conflict policy.
    #[serde(default)]
    pub conflict_resolution: ConflictResolution,
    /// Plan only; no writes. Returns the counts the real run would produce.
    #[serde(default)]
    pub dry_run: bool,
    /// Verify structure and checksum before applying anything.
    #[serde(default)]
    pub validate_before_import: bool,
    /// Split entity application into chunks of this size.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Emit per-batch progress logs.
    #[serde(default)]
    pub progress: bool,
    /// Producing server version, for compatibility shims.
    #[serde(default)]
    pub source_version: Option<String>,
    /// Producing server name.
    #[serde(default)]
    pub source_server: Option<String>,
    /// Migration controls.
    #[serde(default)]
    pub migration: MigrationOptions,
}

/// Per-kind import counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    /// Entities newly created.
    pub entities_imported: usize,
    /// Existing entities that changed.
    pub entities_updated: usize,
    /// Entities left untouched.
    pub entities_skipped: usize,
    /// Relations newly created.
    pub relations_imported: usize,
    /// Relations skipped (duplicates or missing endpoints).
    pub relations_skipped: usize,
    /// Observation blocks appended.
    pub observations_imported: usize,
    /// Decompressed/compressed size ratio for compressed documents.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<f64>,
}

/// Result of one import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    /// Whether the import ran to completion.
    pub success: bool,
    /// Counters.
    pub summary: ImportSummary,
    /// Per-item issues that did not abort the import.
    pub warnings: Vec<String>,
}

/// A parsed document plus parse-level facts.
#[derive(Debug)]
pub struct ParsedDocument {
    /// The reassembled export.
    pub export: MemoryExport,
    /// Whether the checksum covers this rendering (JSON Lines drops context
    /// metadata, so its checksum is advisory only).
    pub verifiable: bool,
    /// Decompressed/compressed ratio when the input was compressed.
    pub compression_ratio: Option<f64>,
}

/// Parses a document in any supported rendering.
///
/// Sniffing order: plain JSON, JSON Lines, then base64(gzip(json)) — with
/// the reversed legacy order accepted as well.
pub fn parse_document(text: &str) -> Result<ParsedDocument> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidBackupFormat("empty document".to_string()));
    }

    if trimmed.starts_with('{') {
        if let Ok(export) = serde_json::from_str::<MemoryExport>(trimmed) {
            return Ok(ParsedDocument {
                export,
                verifiable: true,
                compression_ratio: None,
            });
        }
        if let Some(export) = parse_jsonl(trimmed)? {
            return Ok(ParsedDocument {
                export,
                verifiable: false,
                compression_ratio: None,
            });
        }
        return Err(Error::InvalidBackupFormat(
            "document is neither a MemoryExport nor JSON Lines".to_string(),
        ));
    }

    // Compressed rendering: base64 wrapping gzip
    let decoded = BASE64
        .decode(trimmed.as_bytes())
        .map_err(|e| Error::InvalidBackupFormat(format!("not valid base64: {e}")))?;
    let json = if decoded.starts_with(&[0x1f, 0x8b]) {
        let mut decoder = GzDecoder::new(decoded.as_slice());
        let mut json = String::new();
        decoder
            .read_to_string(&mut json)
            .map_err(|e| Error::InvalidBackupFormat(format!("gzip decode failed: {e}")))?;
        json
    } else {
        String::from_utf8(decoded)
            .map_err(|e| Error::InvalidBackupFormat(format!("not utf-8 after base64: {e}")))?
    };

    #[allow(clippy::cast_precision_loss)]
    let ratio = json.len() as f64 / trimmed.len().max(1) as f64;
    let export = serde_json::from_str::<MemoryExport>(&json)
        .map_err(|e| Error::InvalidBackupFormat(format!("decompressed payload invalid: {e}")))?;
    Ok(ParsedDocument {
        export,
        verifiable: true,
        compression_ratio: Some(ratio),
    })
}

fn parse_jsonl(text: &str) -> Result<Option<MemoryExport>> {
    #[derive(Deserialize)]
    struct Envelope {
        version: u32,
        export_date: chrono::DateTime<chrono::Utc>,
        source_server: String,
        source_version: String,
        #[serde(default)]
        target_server: Option<String>,
        metadata: crate::models::ExportMetadata,
        checksum: String,
    }
    #[derive(Deserialize)]
    struct Line {
        context: String,
        #[serde(default)]
        entity: Option<ExportedEntity>,
        #[serde(default)]
        relation: Option<crate::models::ExportedRelation>,
    }

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let Some(first) = lines.next() else {
        return Ok(None);
    };
    let Ok(envelope) = serde_json::from_str::<Envelope>(first) else {
        return Ok(None);
    };

    let mut contexts: BTreeMap<String, crate::models::ContextExport> = BTreeMap::new();
    for line in lines {
        let parsed: Line = serde_json::from_str(line)
            .map_err(|e| Error::InvalidBackupFormat(format!("bad JSON Lines row: {e}")))?;
        let context = contexts
            .entry(parsed.context.clone())
            .or_insert_with(|| crate::models::ContextExport {
                name: parsed.context.clone(),
                entities: Vec::new(),
                relations: Vec::new(),
                metadata: None,
            });
        if let Some(entity) = parsed.entity {
            context.entities.push(entity);
        }
        if let Some(relation) = parsed.relation {
            context.relations.push(relation);
        }
    }

    Ok(Some(MemoryExport {
        version: envelope.version,
        export_date: envelope.export_date,
        source_server: envelope.source_server,
        source_version: envelope.source_version,
        target_server: envelope.target_server,
        metadata: envelope.metadata,
        contexts,
        checksum: envelope.checksum,
    }))
}

/// Applies a parsed document to the registry.
pub fn import_document(
    registry: &ContextRegistry,
    document: &ParsedDocument,
    options: &ImportOptions,
) -> Result<ImportOutcome> {
    let export = &document.export;
    let mut warnings = Vec::new();

    if options.validate_before_import {
        validate_structure(export)?;
        if document.verifiable {
            export.verify_checksum()?;
        } else {
            warnings.push("checksum not verifiable for JSON Lines rendering".to_string());
        }
    }

    let mut summary = ImportSummary {
        compression_ratio: document.compression_ratio,
        ..ImportSummary::default()
    };

    for (context_name, context_export) in &export.contexts {
        let target = resolve_target(registry, context_name, options, &mut warnings)?;
        if options.mode == ImportMode::Replace
            && !options.dry_run
            && let Some(context) = &target
        {
            context.clear_all()?;
        }

        import_context(
            target.as_ref(),
            context_export,
            options,
            &mut summary,
            &mut warnings,
        )?;
    }

    metrics::counter!("imports_total").increment(1);
    Ok(ImportOutcome {
        success: true,
        summary,
        warnings,
    })
}

fn validate_structure(export: &MemoryExport) -> Result<()> {
    if export.version > EXPORT_FORMAT_VERSION {
        return Err(Error::InvalidBackupFormat(format!(
            "document version {} is newer than supported version {EXPORT_FORMAT_VERSION}",
            export.version
        )));
    }
    for (name, context) in &export.contexts {
        if name.is_empty() || context.name.is_empty() {
            return Err(Error::InvalidBackupFormat(
                "context with empty name".to_string(),
            ));
        }
        for entity in &context.entities {
            if normalize_name(&entity.name).is_empty() {
                return Err(Error::InvalidBackupFormat(format!(
                    "entity with empty name in context '{name}'"
                )));
            }
        }
    }
    Ok(())
}

fn resolve_target(
    registry: &ContextRegistry,
    name: &str,
    options: &ImportOptions,
    warnings: &mut Vec<String>,
) -> Result<Option<Arc<Context>>> {
    if let Some(context) = registry.get(name) {
        return Ok(Some(context));
    }
    if options.dry_run {
        warnings.push(format!("context '{name}' would be created"));
        return Ok(None);
    }
    match registry.create_context(name, None, Vec::new(), Vec::new(), None) {
        Ok(context) => Ok(Some(context)),
        Err(e) => Err(e),
    }
}

#[allow(clippy::too_many_lines)]
fn import_context(
    target: Option<&Arc<Context>>,
    context_export: &crate::models::ContextExport,
    options: &ImportOptions,
    summary: &mut ImportSummary,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let migration = &options.migration;
    // Renames applied in this context, old normalized name -> new name
    let mut renames: HashMap<String, String> = HashMap::new();
    let mut pending_creates: Vec<(EntityInput, i64, i64)> = Vec::new();
    let mut dry_run_names: HashSet<String> = HashSet::new();

    for exported in &context_export.entities {
        let entity_type = migration
            .remap_entity_types
            .get(&exported.entity_type)
            .cloned()
            .unwrap_or_else(|| exported.entity_type.clone());
        let observations: Vec<Observation> = exported
            .observations
            .iter()
            .filter(|obs| migration.filter_content.keeps(obs))
            .cloned()
            .collect();

        let norm = normalize_name(&exported.name);
        let exists = match target {
            Some(context) => context.entity_exists(&exported.name)?,
            None => dry_run_names.contains(&norm),
        };
        // Replace mode cleared the target, so everything imports fresh
        let exists = exists && options.mode != ImportMode::Replace;

        match (options.mode, exists) {
            (ImportMode::Update, false) => {
                summary.entities_skipped += 1;
            },
            (ImportMode::Append, true) => {
                summary.entities_skipped += 1;
                warnings.push(
                    Error::DuplicateEntity {
                        name: exported.name.clone(),
                    }
                    .to_string(),
                );
            },
            (ImportMode::Merge | ImportMode::Replace | ImportMode::Append, false) => {
                summary.entities_imported += 1;
                summary.observations_imported += observations.len();
                dry_run_names.insert(norm);
                pending_creates.push((
                    entity_input(exported, entity_type, observations),
                    exported.created_at,
                    exported.updated_at,
                ));
            },
            (_, true) => {
                match (options.mode, options.conflict_resolution) {
                    (ImportMode::Merge, ConflictResolution::Overwrite) => {
                        summary.entities_updated += 1;
                        summary.observations_imported += observations.len();
                        if let Some(context) = target
                            && !options.dry_run
                        {
                            context.submit_blocking(WriteOp::DeleteEntities(vec![
                                exported.name.clone(),
                            ]))?;
                            context.submit_blocking(WriteOp::CreateEntities(vec![
                                entity_input(exported, entity_type, observations),
                            ]))?;
                            apply_timestamps(context, exported, migration)?;
                        }
                    },
                    (ImportMode::Merge, ConflictResolution::Rename) => {
                        let new_name = match target {
                            Some(context) => unique_rename(context, &exported.name)?,
                            None => format!("{}-2", exported.name),
                        };
                        renames.insert(norm.clone(), new_name.clone());
                        summary.entities_imported += 1;
                        summary.observations_imported += observations.len();
                        if let Some(context) = target
                            && !options.dry_run
                        {
                            let mut input = entity_input(exported, entity_type, observations);
                            input.name = new_name;
                            context.submit_blocking(WriteOp::CreateEntities(vec![input]))?;
                        }
                    },
                    // Merge+skip and update both fold new observations into
                    // the existing entity; untouched entities count skipped
                    _ => {
                        let (appended, touched) = merge_into_existing(
                            target,
                            exported,
                            &entity_type,
                            &observations,
                            options,
                        )?;
                        if touched {
                            summary.entities_updated += 1;
                            summary.observations_imported += appended;
                        } else {
                            summary.entities_skipped += 1;
                        }
                    },
                }
            },
        }
    }

    // Apply pending creates in batches
    if let Some(context) = target
        && !options.dry_run
    {
        let batch_size = options.batch_size.unwrap_or(usize::MAX).max(1);
        let total = pending_creates.len();
        let mut applied = 0_usize;
        for chunk in pending_creates.chunks(batch_size) {
            let inputs: Vec<EntityInput> = chunk.iter().map(|(input, _, _)| input.clone()).collect();
            context.submit_blocking(WriteOp::CreateEntities(inputs))?;
            for (input, created_at, updated_at) in chunk {
                if migration.preserve_ids && !migration.update_timestamps {
                    let norm = normalize_name(&input.name);
                    context
                        .store()
                        .set_entity_timestamps(&norm, *created_at, *updated_at)?;
                }
            }
            applied += chunk.len();
            if options.progress {
                tracing::info!(context = context.name(), applied, total, "import progress");
            }
        }
    }

    import_relations(target, context_export, options, &renames, summary, warnings)?;
    Ok(())
}

fn entity_input(
    exported: &ExportedEntity,
    entity_type: String,
    observations: Vec<Observation>,
) -> EntityInput {
    EntityInput {
        name: exported.name.clone(),
        entity_type,
        observations,
        importance_weight: Some(exported.importance_weight),
    }
}

fn apply_timestamps(
    context: &Arc<Context>,
    exported: &ExportedEntity,
    migration: &MigrationOptions,
) -> crate::Result<()> {
    if migration.preserve_ids && !migration.update_timestamps {
        context.store().set_entity_timestamps(
            &normalize_name(&exported.name),
            exported.created_at,
            exported.updated_at,
        )?;
    }
    Ok(())
}

/// Appends the non-duplicate observations of an imported entity onto the
/// existing one. Returns `(blocks appended, whether anything changed)`.
fn merge_into_existing(
    target: Option<&Arc<Context>>,
    exported: &ExportedEntity,
    entity_type: &str,
    observations: &[Observation],
    options: &ImportOptions,
) -> Result<(usize, bool)> {
    let Some(context) = target else {
        return Ok((0, false));
    };
    let Some(existing) = context.peek_entity(&exported.name)? else {
        return Ok((0, false));
    };

    let existing_set: HashSet<String> = existing
        .observations
        .iter()
        .filter_map(|obs| serde_json::to_string(obs).ok())
        .collect();
    let fresh: Vec<Observation> = observations
        .iter()
        .filter(|obs| {
            serde_json::to_string(obs)
                .map(|json| !existing_set.contains(&json))
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    let type_changed = existing.entity_type != entity_type;
    if fresh.is_empty() && !type_changed {
        return Ok((0, false));
    }

    let appended = fresh.len();
    if !options.dry_run {
        if type_changed {
            // Upsert-merge overwrites the type and appends the observations
            context.submit_blocking(WriteOp::CreateEntities(vec![EntityInput {
                name: exported.name.clone(),
                entity_type: entity_type.to_string(),
                observations: fresh,
                importance_weight: None,
            }]))?;
        } else if !fresh.is_empty() {
            context.submit_blocking(WriteOp::AddObservations(vec![ObservationAdd {
                entity_name: exported.name.clone(),
                contents: fresh,
            }]))?;
        }
    }
    Ok((appended, true))
}

fn unique_rename(context: &Arc<Context>, name: &str) -> Result<String> {
    for suffix in 2..1000 {
        let candidate = format!("{name}-{suffix}");
        if !context.entity_exists(&candidate)? {
            return Ok(candidate);
        }
    }
    Err(Error::InvalidInput(format!(
        "could not find a unique rename for '{name}'"
    )))
}

fn import_relations(
    target: Option<&Arc<Context>>,
    context_export: &crate::models::ContextExport,
    options: &ImportOptions,
    renames: &HashMap<String, String>,
    summary: &mut ImportSummary,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let migration = &options.migration;
    let mut to_create: Vec<RelationInput> = Vec::new();

    let existing_triples: HashSet<(String, String, String)> = match target {
        Some(context) => context
            .store()
            .all_relations()?
            .into_iter()
            .map(|r| (r.from, r.to, r.relation_type))
            .collect(),
        None => HashSet::new(),
    };

    for relation in &context_export.relations {
        let relation_type = migration
            .remap_relation_types
            .get(&relation.relation_type)
            .cloned()
            .unwrap_or_else(|| relation.relation_type.clone());
        let from = renames
            .get(&normalize_name(&relation.from))
            .cloned()
            .unwrap_or_else(|| relation.from.clone());
        let to = renames
            .get(&normalize_name(&relation.to))
            .cloned()
            .unwrap_or_else(|| relation.to.clone());

        let endpoints_exist = match target {
            Some(context) => {
                context.entity_exists(&from)? && context.entity_exists(&to)?
            },
            None => true,
        };
        if !endpoints_exist && !options.dry_run {
            summary.relations_skipped += 1;
            warnings.push(format!(
                "relation ({from}) -[{relation_type}]-> ({to}) skipped: missing endpoint"
            ));
            continue;
        }

        let key = (
            normalize_name(&from),
            normalize_name(&to),
            normalize_name(&relation_type),
        );
        if existing_triples.contains(&key) {
            summary.relations_skipped += 1;
            continue;
        }

        summary.relations_imported += 1;
        to_create.push(RelationInput {
            from,
            to,
            relation_type,
            strength: relation.strength,
        });
    }

    if let Some(context) = target
        && !options.dry_run
        && !to_create.is_empty()
    {
        context.submit_blocking(WriteOp::CreateRelations(to_create))?;
    }
    Ok(())
}
