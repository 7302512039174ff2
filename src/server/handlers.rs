//! Tool façade: argument validation, gates, and dispatch into the core.
//!
//! The façade owns the rate limiter and the destructive-operation
//! confirmation gate. Missing required fields produce an **elicitation**
//! response (structured "please provide these fields", not an error); every
//! core error is mapped to the stable wire taxonomy by the protocol layer.

use super::rate_limit::RateLimiter;
use super::tools::ToolName;
use crate::config::ServerConfig;
use crate::context::{Context, ContextRegistry};
use crate::io::{
    ExportFormat, ExportOptions, ImportOptions, build_export, import_document, parse_document,
    render_export,
};
use crate::models::{
    DeleteObservationsRequest, EntityInput, Observation, ObservationAdd, RelationInput,
};
use crate::resilience::verify_input;
use crate::search::{SearchRequest, analyze_intent};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

/// Maximum items accepted in one batch argument.
const MAX_BATCH_ITEMS: usize = 1000;

/// Maximum bytes accepted for one content block's payload.
const MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// The tool façade.
pub struct ToolFacade {
    registry: Arc<ContextRegistry>,
    limiter: RateLimiter,
    config: ServerConfig,
}

impl ToolFacade {
    /// Creates the façade over a registry.
    #[must_use]
    pub fn new(registry: Arc<ContextRegistry>, config: ServerConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limiting_disabled);
        Self {
            registry,
            limiter,
            config,
        }
    }

    /// The registry this façade serves.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// Rate-limiter handle (test harness reset hook).
    #[must_use]
    pub const fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Runs one tool call end to end.
    pub async fn call(&self, tool: ToolName, args: Value) -> Result<Value> {
        self.limiter.check(tool.class())?;

        if let Some(elicitation) = elicit_missing(tool, &args) {
            return Ok(elicitation);
        }

        if tool.is_destructive() && args.get("confirm").and_then(Value::as_bool) != Some(true) {
            return Err(Error::ConfirmationRequired {
                tool: tool.as_str().to_string(),
            });
        }

        tracing::debug!(tool = tool.as_str(), "tool call");
        metrics::counter!("tool_calls_total", "tool" => tool.as_str()).increment(1);

        match tool {
            ToolName::CreateEntities => self.create_entities(&args).await,
            ToolName::CreateRelations => self.create_relations(&args).await,
            ToolName::AddObservations => self.add_observations(&args).await,
            ToolName::DeleteEntities => self.delete_entities(&args).await,
            ToolName::DeleteRelations => self.delete_relations(&args),
            ToolName::DeleteObservations => self.delete_observations(&args),
            ToolName::GetEntity => self.get_entity(&args),
            ToolName::ReadGraph => self.read_graph(&args),
            ToolName::Neighbors => self.neighbors(&args),
            ToolName::ShortestPath => self.shortest_path(&args),
            ToolName::SearchNodes => self.search_nodes(&args),
            ToolName::AnalyzeIntent => self.analyze_intent_tool(&args),
            ToolName::CreateContext => self.create_context(&args),
            ToolName::DeleteContext => self.delete_context(&args),
            ToolName::SetContext => self.set_context(&args),
            ToolName::ListContexts => self.list_contexts(),
            ToolName::MemoryStats => self.memory_stats(&args),
            ToolName::ExportMemory => self.export_memory(&args),
            ToolName::ImportMemory => self.import_memory(args).await,
            ToolName::CreateBackup => self.create_backup(&args),
            ToolName::RestoreBackup => self.restore_backup(args).await,
            ToolName::RollbackTransaction => self.rollback_transaction(&args),
        }
    }

    fn resolve(&self, args: &Value) -> Result<Arc<Context>> {
        let explicit = args.get("context").and_then(Value::as_str);
        let hint = args.get("context_hint").and_then(Value::as_str);
        self.registry.resolve(explicit, hint)
    }

    // ------------------------------------------------------------------
    // Write tools
    // ------------------------------------------------------------------

    async fn create_entities(&self, args: &Value) -> Result<Value> {
        let entities: Vec<EntityInput> = parse_batch(args, "entities")?;
        for entity in &entities {
            for observation in &entity.observations {
                validate_observation(observation)?;
            }
        }
        if let Some(checksum) = args.get("checksum").and_then(Value::as_str) {
            verify_input(checksum, &args["entities"])?;
        }

        let context = self.resolve(args)?;
        let results = context.create_entities(entities).await?;
        let created = results
            .iter()
            .filter(|r| r.outcome == crate::models::UpsertOutcome::Created)
            .count();
        let updated = results.len() - created;

        let summary: Vec<Value> = results
            .iter()
            .map(|r| json!({ "name": r.name, "outcome": r.outcome }))
            .collect();
        Ok(reply(
            json!({
                "context": context.name(),
                "created": created,
                "updated": updated,
                "results": summary,
            }),
            format!("Created {created} and updated {updated} entities in '{}'", context.name()),
        ))
    }

    async fn create_relations(&self, args: &Value) -> Result<Value> {
        let relations: Vec<RelationInput> = parse_batch(args, "relations")?;
        let context = self.resolve(args)?;
        let created = context.create_relations(relations).await?;
        Ok(reply(
            json!({
                "context": context.name(),
                "created": created.len(),
                "relations": created,
            }),
            format!("Created {} relations in '{}'", created.len(), context.name()),
        ))
    }

    async fn add_observations(&self, args: &Value) -> Result<Value> {
        let additions: Vec<ObservationAdd> = parse_batch(args, "observations")?;
        for addition in &additions {
            for observation in &addition.contents {
                validate_observation(observation)?;
            }
        }
        if let Some(checksum) = args.get("checksum").and_then(Value::as_str) {
            verify_input(checksum, &args["observations"])?;
        }

        let context = self.resolve(args)?;
        let results = context.add_observations(additions).await?;
        let added: usize = results.iter().map(|r| r.added).sum();
        Ok(reply(
            json!({
                "context": context.name(),
                "added": added,
                "results": results,
            }),
            format!("Added {added} observations in '{}'", context.name()),
        ))
    }

    async fn delete_entities(&self, args: &Value) -> Result<Value> {
        let names: Vec<String> = parse_batch(args, "names")?;
        let context = self.resolve(args)?;
        let deleted = context.delete_entities(names).await?;
        Ok(reply(
            json!({ "context": context.name(), "deleted": deleted }),
            format!("Deleted {deleted} entities from '{}'", context.name()),
        ))
    }

    fn delete_relations(&self, args: &Value) -> Result<Value> {
        let relations: Vec<RelationInput> = parse_batch(args, "relations")?;
        let context = self.resolve(args)?;
        let deleted = context.delete_relations(&relations)?;
        Ok(reply(
            json!({ "context": context.name(), "deleted": deleted }),
            format!("Deleted {deleted} relations from '{}'", context.name()),
        ))
    }

    fn delete_observations(&self, args: &Value) -> Result<Value> {
        let deletions: Vec<DeleteObservationsRequest> = parse_batch(args, "deletions")?;
        let context = self.resolve(args)?;
        let outcomes = context.delete_observations(&deletions)?;
        let removed: usize = outcomes.iter().map(|(_, count)| count).sum();
        let detail: Vec<Value> = outcomes
            .iter()
            .map(|(name, count)| json!({ "entity_name": name, "removed": count }))
            .collect();
        Ok(reply(
            json!({ "context": context.name(), "removed": removed, "results": detail }),
            format!("Removed {removed} observations in '{}'", context.name()),
        ))
    }

    // ------------------------------------------------------------------
    // Read tools
    // ------------------------------------------------------------------

    fn get_entity(&self, args: &Value) -> Result<Value> {
        let name = required_str(args, "name")?;
        let context = self.resolve(args)?;
        let entity = context.get_entity(name)?;
        let text = entity.as_ref().map_or_else(
            || format!("No entity named '{name}' in '{}'", context.name()),
            |e| format!("Found '{}' ({})", e.name, e.entity_type),
        );
        Ok(reply(
            json!({ "context": context.name(), "entity": entity.as_deref() }),
            text,
        ))
    }

    fn read_graph(&self, args: &Value) -> Result<Value> {
        let limit = args.get("limit").and_then(Value::as_u64).map(|v| v as usize);
        let offset = args
            .get("offset")
            .and_then(Value::as_u64)
            .map(|v| v as usize);
        let context = self.resolve(args)?;
        let page = context.read_graph(limit, offset)?;
        let text = format!(
            "Read {} of {} entities from '{}'",
            page.graph.entities.len(),
            page.total_entities,
            context.name()
        );
        Ok(reply(serde_json::to_value(&page).unwrap_or(Value::Null), text))
    }

    fn neighbors(&self, args: &Value) -> Result<Value> {
        let name = required_str(args, "name")?;
        let depth = args
            .get("depth")
            .and_then(Value::as_u64)
            .map_or(1, |v| v as usize);
        let context = self.resolve(args)?;
        let graph = context.neighbors(name, depth)?;
        let text = format!(
            "{} entities within depth {depth} of '{name}'",
            graph.entities.len()
        );
        Ok(reply(serde_json::to_value(&graph).unwrap_or(Value::Null), text))
    }

    fn shortest_path(&self, args: &Value) -> Result<Value> {
        let from = required_str(args, "from")?;
        let to = required_str(args, "to")?;
        let max_depth = args
            .get("max_depth")
            .and_then(Value::as_u64)
            .map_or(6, |v| v as usize);
        let context = self.resolve(args)?;
        let path = context.shortest_path(from, to, max_depth)?;
        let text = if path.found {
            format!("Path found: {}", path.path.join(" -> "))
        } else {
            format!("No path from '{from}' to '{to}' within depth {max_depth}")
        };
        Ok(reply(serde_json::to_value(&path).unwrap_or(Value::Null), text))
    }

    // ------------------------------------------------------------------
    // Search tools
    // ------------------------------------------------------------------

    fn search_nodes(&self, args: &Value) -> Result<Value> {
        let request: SearchRequest =
            serde_json::from_value(args.clone()).map_err(|e| Error::InvalidInput(format!(
                "malformed search request: {e}"
            )))?;
        let all_contexts = args
            .get("all_contexts")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if all_contexts {
            let mut merged: Vec<Value> = Vec::new();
            let mut total = 0;
            for metadata in self.registry.list() {
                let Some(context) = self.registry.get(&metadata.name) else {
                    continue;
                };
                let response = context.search(&request)?;
                total += response.total_matches;
                for result in response.results {
                    merged.push(json!({
                        "context": metadata.name,
                        "entity": result.entity,
                        "score": result.score,
                        "highlights": result.highlights,
                    }));
                }
            }
            merged.sort_by(|a, b| {
                let score_a = a["score"].as_f64().unwrap_or(0.0);
                let score_b = b["score"].as_f64().unwrap_or(0.0);
                score_b
                    .partial_cmp(&score_a)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let limit = request.limit.unwrap_or(20).max(1);
            merged.truncate(limit);
            let text = format!("{} results across all contexts", merged.len());
            return Ok(reply(
                json!({ "all_contexts": true, "total_matches": total, "results": merged }),
                text,
            ));
        }

        let context = self.resolve(args)?;
        let response = context.search(&request)?;
        let text = format!(
            "{} results in '{}' ({} query)",
            response.results.len(),
            context.name(),
            response.complexity
        );
        Ok(reply(
            json!({
                "context": context.name(),
                "total_matches": response.total_matches,
                "from_cache": response.from_cache,
                "complexity": response.complexity,
                "results": response.results,
            }),
            text,
        ))
    }

    fn analyze_intent_tool(&self, args: &Value) -> Result<Value> {
        let query = required_str(args, "query")?;
        let current_entities: Vec<String> = args
            .get("current_entities")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let analysis = analyze_intent(query, &current_entities);
        let text = format!(
            "Intent: {} (confidence {:.2}), {} suggestions",
            analysis.intent.as_str(),
            analysis.confidence,
            analysis.suggestions.len()
        );
        Ok(reply(
            serde_json::to_value(&analysis).unwrap_or(Value::Null),
            text,
        ))
    }

    // ------------------------------------------------------------------
    // Context tools
    // ------------------------------------------------------------------

    fn create_context(&self, args: &Value) -> Result<Value> {
        let name = required_str(args, "name")?;
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .map(std::path::PathBuf::from);
        let patterns = string_array(args, "patterns");
        let entity_types = string_array(args, "entity_types");
        let description = args
            .get("description")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let context = self
            .registry
            .create_context(name, path, patterns, entity_types, description)?;
        Ok(reply(
            json!({ "context": context.metadata() }),
            format!("Context '{name}' created"),
        ))
    }

    fn delete_context(&self, args: &Value) -> Result<Value> {
        let name = required_str(args, "name")?;
        let force = args.get("force").and_then(Value::as_bool).unwrap_or(false);
        self.registry.delete_context(name, force)?;
        Ok(reply(
            json!({ "deleted": name }),
            format!("Context '{name}' deleted"),
        ))
    }

    fn set_context(&self, args: &Value) -> Result<Value> {
        let name = required_str(args, "name")?;
        self.registry.set_current(name)?;
        Ok(reply(
            json!({ "current": name }),
            format!("Current context is now '{name}'"),
        ))
    }

    fn list_contexts(&self) -> Result<Value> {
        let contexts = self.registry.list();
        let current = self.registry.current();
        let text = format!("{} contexts registered, current '{current}'", contexts.len());
        Ok(reply(
            json!({ "current": current, "contexts": contexts }),
            text,
        ))
    }

    fn memory_stats(&self, args: &Value) -> Result<Value> {
        let stats: Vec<Value> = match args.get("context").and_then(Value::as_str) {
            Some(name) => {
                let context = self
                    .registry
                    .get(name)
                    .ok_or_else(|| Error::InvalidContext(format!("unknown context '{name}'")))?;
                vec![serde_json::to_value(context.stats()?).unwrap_or(Value::Null)]
            },
            None => {
                let mut all = Vec::new();
                for metadata in self.registry.list() {
                    if let Some(context) = self.registry.get(&metadata.name) {
                        all.push(serde_json::to_value(context.stats()?).unwrap_or(Value::Null));
                    }
                }
                all
            },
        };
        Ok(reply(
            json!({ "contexts": stats }),
            format!("Statistics for {} contexts", stats.len()),
        ))
    }

    // ------------------------------------------------------------------
    // System tools
    // ------------------------------------------------------------------

    fn export_options_from(args: &Value) -> ExportOptions {
        let mut options = ExportOptions::default();
        if let Some(context) = args.get("context").and_then(Value::as_str) {
            options.context = Some(context.to_string());
        }
        if let Some(format) = args.get("format").and_then(Value::as_str) {
            let level = args
                .get("compression_level")
                .and_then(Value::as_u64)
                .map(|v| u32::try_from(v).unwrap_or(6));
            if let Some(parsed) = ExportFormat::parse(format, level) {
                options.format = parsed;
            }
        }
        if let Some(include) = args.get("include_observations").and_then(Value::as_bool) {
            options.include_observations = include;
        }
        if let Some(include) = args.get("include_relations").and_then(Value::as_bool) {
            options.include_relations = include;
        }
        if let Some(include) = args.get("include_metadata").and_then(Value::as_bool) {
            options.include_metadata = include;
        }
        options.date_from = args.get("date_from").and_then(Value::as_i64);
        options.date_to = args.get("date_to").and_then(Value::as_i64);
        if let Some(types) = args.get("entity_types").and_then(Value::as_array) {
            options.entity_types = Some(
                types
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|t| t.to_lowercase())
                    .collect(),
            );
        }
        options.target_version = args
            .get("target_version")
            .and_then(Value::as_u64)
            .map(|v| u32::try_from(v).unwrap_or(crate::models::EXPORT_FORMAT_VERSION));
        options.target_server = args
            .get("target_server")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        options
    }

    fn export_memory(&self, args: &Value) -> Result<Value> {
        let options = Self::export_options_from(args);
        let export = build_export(&self.registry, &options)?;
        let document = render_export(&export, options.format)?;
        let text = format!(
            "Exported {} entities and {} relations",
            export.metadata.total_entities, export.metadata.total_relations
        );
        Ok(reply(
            json!({
                "checksum": export.checksum,
                "metadata": export.metadata,
                "document": document,
            }),
            text,
        ))
    }

    async fn import_memory(&self, args: Value) -> Result<Value> {
        let document = required_str(&args, "document")?.to_string();
        let options = import_options_from(&args)?;
        let registry = Arc::clone(&self.registry);

        // Import drives blocking writes; keep it off the async workers
        let outcome = tokio::task::spawn_blocking(move || {
            let parsed = parse_document(&document)?;
            import_document(&registry, &parsed, &options)
        })
        .await
        .map_err(|e| Error::Internal(format!("import task panicked: {e}")))??;

        let text = format!(
            "Imported {} entities ({} updated, {} skipped), {} relations",
            outcome.summary.entities_imported,
            outcome.summary.entities_updated,
            outcome.summary.entities_skipped,
            outcome.summary.relations_imported,
        );
        Ok(reply(
            serde_json::to_value(&outcome).unwrap_or(Value::Null),
            text,
        ))
    }

    fn create_backup(&self, args: &Value) -> Result<Value> {
        let options = ExportOptions {
            context: args
                .get("context")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            ..ExportOptions::default()
        };
        let export = build_export(&self.registry, &options)
            .map_err(|e| Error::BackupFailed(e.to_string()))?;
        let document = render_export(&export, ExportFormat::Json)
            .map_err(|e| Error::BackupFailed(e.to_string()))?;

        let dir = self.config.data_dir.join("backups");
        std::fs::create_dir_all(&dir).map_err(|e| Error::BackupFailed(e.to_string()))?;
        let filename = format!(
            "backup-{}.json",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );
        let path = dir.join(filename);
        std::fs::write(&path, &document).map_err(|e| Error::BackupFailed(e.to_string()))?;

        Ok(reply(
            json!({
                "path": path.display().to_string(),
                "checksum": export.checksum,
                "entities": export.metadata.total_entities,
            }),
            format!("Backup written to {}", path.display()),
        ))
    }

    async fn restore_backup(&self, args: Value) -> Result<Value> {
        let path = required_str(&args, "path")?.to_string();
        let registry = Arc::clone(&self.registry);

        let outcome = tokio::task::spawn_blocking(move || {
            let document = std::fs::read_to_string(&path)
                .map_err(|e| Error::RestoreFailed(format!("cannot read '{path}': {e}")))?;
            let parsed = parse_document(&document)?;
            let options = ImportOptions {
                mode: crate::io::ImportMode::Replace,
                validate_before_import: true,
                ..ImportOptions::default()
            };
            import_document(&registry, &parsed, &options)
        })
        .await
        .map_err(|e| Error::Internal(format!("restore task panicked: {e}")))??;

        Ok(reply(
            serde_json::to_value(&outcome).unwrap_or(Value::Null),
            format!(
                "Restored {} entities and {} relations",
                outcome.summary.entities_imported, outcome.summary.relations_imported
            ),
        ))
    }

    fn rollback_transaction(&self, args: &Value) -> Result<Value> {
        let id = required_str(args, "transaction_id")?;
        let context = self.resolve(args)?;
        context.resilience().rollback_transaction(id)?;
        Ok(reply(
            json!({ "rolled_back": id }),
            format!("Transaction {id} rolled back"),
        ))
    }
}

/// Builds the `{structured_content, content}` tool-result shape.
fn reply(structured: Value, text: String) -> Value {
    json!({
        "structured_content": structured,
        "content": [{ "type": "text", "text": text }],
    })
}

/// Elicitation response for missing or mistyped required fields.
fn elicit_missing(tool: ToolName, args: &Value) -> Option<Value> {
    let mut missing: Vec<Value> = Vec::new();
    for (path, kind) in tool.required_fields() {
        let ok = match args.get(path) {
            None | Some(Value::Null) => false,
            Some(value) => match *kind {
                "string" => value.is_string(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            },
        };
        if !ok {
            missing.push(json!({ "path": path, "type": kind }));
        }
    }
    if missing.is_empty() {
        return None;
    }
    let listed: Vec<String> = missing
        .iter()
        .filter_map(|m| m["path"].as_str().map(ToString::to_string))
        .collect();
    Some(json!({
        "structured_content": { "elicitation": true, "missing_fields": missing },
        "content": [{
            "type": "text",
            "text": format!("Missing or invalid required fields: {}", listed.join(", ")),
        }],
    }))
}

fn required_str<'a>(args: &'a Value, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput(format!("field '{field}' must be a string")))
}

fn string_array(args: &Value, field: &str) -> Vec<String> {
    args.get(field)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn parse_batch<T: DeserializeOwned>(args: &Value, field: &str) -> Result<Vec<T>> {
    let raw = args
        .get(field)
        .ok_or_else(|| Error::InvalidInput(format!("field '{field}' is required")))?;
    let items: Vec<T> = serde_json::from_value(raw.clone())
        .map_err(|e| Error::InvalidInput(format!("malformed '{field}': {e}")))?;
    if items.is_empty() {
        return Err(Error::InvalidInput(format!("'{field}' must not be empty")));
    }
    if items.len() > MAX_BATCH_ITEMS {
        return Err(Error::InvalidInput(format!(
            "'{field}' exceeds the {MAX_BATCH_ITEMS}-item batch cap"
        )));
    }
    Ok(items)
}

fn validate_observation(observation: &Observation) -> Result<()> {
    let size = match observation {
        Observation::Text { text } => text.len(),
        Observation::Image { data_b64, .. }
        | Observation::Audio { data_b64, .. }
        | Observation::Resource { data_b64, .. } => data_b64.len(),
        Observation::ResourceLink { uri, .. } => uri.len(),
    };
    if size > MAX_CONTENT_BYTES {
        return Err(Error::InvalidInput(format!(
            "content block exceeds the {MAX_CONTENT_BYTES}-byte cap"
        )));
    }
    Ok(())
}

fn import_options_from(args: &Value) -> Result<ImportOptions> {
    let mut options: ImportOptions = args
        .get("options")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| Error::InvalidInput(format!("malformed import options: {e}")))?
        .unwrap_or_default();

    if let Some(mode) = args.get("mode").and_then(Value::as_str) {
        options.mode = crate::io::ImportMode::parse(mode)
            .ok_or_else(|| Error::InvalidInput(format!("unknown import mode '{mode}'")))?;
    }
    if let Some(resolution) = args.get("conflict_resolution").and_then(Value::as_str) {
        options.conflict_resolution = crate::io::ConflictResolution::parse(resolution)
            .ok_or_else(|| {
                Error::InvalidInput(format!("unknown conflict resolution '{resolution}'"))
            })?;
    }
    if let Some(dry_run) = args.get("dry_run").and_then(Value::as_bool) {
        options.dry_run = dry_run;
    }
    if let Some(validate) = args.get("validate_before_import").and_then(Value::as_bool) {
        options.validate_before_import = validate;
    }
    if let Some(batch_size) = args.get("batch_size").and_then(Value::as_u64) {
        options.batch_size = Some(usize::try_from(batch_size).unwrap_or(usize::MAX).max(1));
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    fn facade() -> ToolFacade {
        let registry = Arc::new(ContextRegistry::in_memory(ServerConfig::default()).unwrap());
        ToolFacade::new(registry, ServerConfig::default())
    }

    #[tokio::test]
    async fn test_create_then_get_entity() {
        let facade = facade();
        let result = facade
            .call(
                ToolName::CreateEntities,
                json!({
                    "entities": [{ "name": "Alice", "entity_type": "person",
                                   "observations": [{ "type": "text", "text": "likes rust" }] }],
                    "context": "personal",
                }),
            )
            .await
            .unwrap();
        assert_eq!(result["structured_content"]["created"], 1);

        let result = facade
            .call(ToolName::GetEntity, json!({ "name": "alice", "context": "personal" }))
            .await
            .unwrap();
        assert_eq!(result["structured_content"]["entity"]["name"], "Alice");
    }

    #[tokio::test]
    async fn test_destructive_requires_confirm() {
        let facade = facade();
        let err = facade
            .call(ToolName::DeleteEntities, json!({ "names": ["X"] }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "confirmation_required");

        // With confirm it runs (deleting nothing is fine)
        let result = facade
            .call(
                ToolName::DeleteEntities,
                json!({ "names": ["X"], "confirm": true }),
            )
            .await
            .unwrap();
        assert_eq!(result["structured_content"]["deleted"], 0);
    }

    #[tokio::test]
    async fn test_missing_fields_elicit() {
        let facade = facade();
        let result = facade
            .call(ToolName::CreateEntities, json!({}))
            .await
            .unwrap();
        let structured = &result["structured_content"];
        assert_eq!(structured["elicitation"], true);
        assert_eq!(structured["missing_fields"][0]["path"], "entities");
        assert_eq!(structured["missing_fields"][0]["type"], "array");
    }

    #[tokio::test]
    async fn test_mistyped_field_elicits() {
        let facade = facade();
        let result = facade
            .call(ToolName::SearchNodes, json!({ "query": 42 }))
            .await
            .unwrap();
        assert_eq!(result["structured_content"]["elicitation"], true);
    }

    #[tokio::test]
    async fn test_search_respects_context_isolation() {
        let facade = facade();
        facade
            .call(
                ToolName::CreateEntities,
                json!({
                    "entities": [{ "name": "WorkItem", "entity_type": "t" }],
                    "context": "personal",
                }),
            )
            .await
            .unwrap();
        facade
            .call(
                ToolName::CreateEntities,
                json!({
                    "entities": [{ "name": "PersonalItem", "entity_type": "t" }],
                    "context": "work",
                }),
            )
            .await
            .unwrap();

        let result = facade
            .call(
                ToolName::SearchNodes,
                json!({ "query": "Item", "context": "personal" }),
            )
            .await
            .unwrap();
        let results = result["structured_content"]["results"].as_array().unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["entity"]["name"], "WorkItem");

        let result = facade
            .call(
                ToolName::SearchNodes,
                json!({ "query": "Item", "all_contexts": true }),
            )
            .await
            .unwrap();
        let results = result["structured_content"]["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_export_import_via_tools() {
        let facade = facade();
        facade
            .call(
                ToolName::CreateEntities,
                json!({
                    "entities": [{ "name": "Alice", "entity_type": "person" }],
                    "context": "personal",
                }),
            )
            .await
            .unwrap();

        let exported = facade
            .call(ToolName::ExportMemory, json!({ "context": "personal" }))
            .await
            .unwrap();
        let document = exported["structured_content"]["document"]
            .as_str()
            .unwrap()
            .to_string();

        let fresh = facade;
        fresh
            .call(
                ToolName::DeleteEntities,
                json!({ "names": ["Alice"], "context": "personal", "confirm": true }),
            )
            .await
            .unwrap();

        let imported = fresh
            .call(ToolName::ImportMemory, json!({ "document": document }))
            .await
            .unwrap();
        assert_eq!(
            imported["structured_content"]["summary"]["entities_imported"],
            1
        );
    }

    #[tokio::test]
    async fn test_rate_limit_surfaces() {
        let facade = facade();
        let mut limited = false;
        for _ in 0..=ToolName::ListContexts.class().limit_per_minute() {
            match facade.call(ToolName::ListContexts, json!({})).await {
                Ok(_) => {},
                Err(e) => {
                    assert_eq!(e.kind(), "rate_limited");
                    limited = true;
                    break;
                },
            }
        }
        assert!(limited);
        facade.limiter().reset();
        facade.call(ToolName::ListContexts, json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn test_oversized_content_rejected() {
        let facade = facade();
        let big = "x".repeat(MAX_CONTENT_BYTES + 1);
        let err = facade
            .call(
                ToolName::CreateEntities,
                json!({
                    "entities": [{ "name": "Big", "entity_type": "t",
                                   "observations": [{ "type": "text", "text": big }] }],
                }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
}
