//! The public tool table: names, classes, schemas, and gates.

use super::rate_limit::ToolClass;
use serde_json::{Value, json};

/// Every tool the façade exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    /// Batch entity upsert.
    CreateEntities,
    /// Batch relation creation.
    CreateRelations,
    /// Batch observation append.
    AddObservations,
    /// Batch entity delete (cascades).
    DeleteEntities,
    /// Batch relation delete.
    DeleteRelations,
    /// Batch observation delete.
    DeleteObservations,
    /// Single-entity lookup.
    GetEntity,
    /// Paginated graph read.
    ReadGraph,
    /// Bounded neighborhood expansion.
    Neighbors,
    /// Bounded shortest path.
    ShortestPath,
    /// Full-text search.
    SearchNodes,
    /// Intent analysis and suggestions.
    AnalyzeIntent,
    /// Register a context.
    CreateContext,
    /// Remove a context.
    DeleteContext,
    /// Set the default context.
    SetContext,
    /// List registered contexts.
    ListContexts,
    /// Per-context statistics.
    MemoryStats,
    /// Bulk export.
    ExportMemory,
    /// Bulk import.
    ImportMemory,
    /// Write a timestamped backup file.
    CreateBackup,
    /// Restore from a backup file.
    RestoreBackup,
    /// Manually roll back a pending transaction.
    RollbackTransaction,
}

impl ToolName {
    /// All tools, in listing order.
    pub const ALL: &'static [Self] = &[
        Self::CreateEntities,
        Self::CreateRelations,
        Self::AddObservations,
        Self::DeleteEntities,
        Self::DeleteRelations,
        Self::DeleteObservations,
        Self::GetEntity,
        Self::ReadGraph,
        Self::Neighbors,
        Self::ShortestPath,
        Self::SearchNodes,
        Self::AnalyzeIntent,
        Self::CreateContext,
        Self::DeleteContext,
        Self::SetContext,
        Self::ListContexts,
        Self::MemoryStats,
        Self::ExportMemory,
        Self::ImportMemory,
        Self::CreateBackup,
        Self::RestoreBackup,
        Self::RollbackTransaction,
    ];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateEntities => "create_entities",
            Self::CreateRelations => "create_relations",
            Self::AddObservations => "add_observations",
            Self::DeleteEntities => "delete_entities",
            Self::DeleteRelations => "delete_relations",
            Self::DeleteObservations => "delete_observations",
            Self::GetEntity => "get_entity",
            Self::ReadGraph => "read_graph",
            Self::Neighbors => "neighbors",
            Self::ShortestPath => "shortest_path",
            Self::SearchNodes => "search_nodes",
            Self::AnalyzeIntent => "analyze_intent",
            Self::CreateContext => "create_context",
            Self::DeleteContext => "delete_context",
            Self::SetContext => "set_context",
            Self::ListContexts => "list_contexts",
            Self::MemoryStats => "memory_stats",
            Self::ExportMemory => "export_memory",
            Self::ImportMemory => "import_memory",
            Self::CreateBackup => "create_backup",
            Self::RestoreBackup => "restore_backup",
            Self::RollbackTransaction => "rollback_transaction",
        }
    }

    /// Looks a tool up by wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tool| tool.as_str() == name)
    }

    /// Rate-limit class.
    #[must_use]
    pub const fn class(self) -> ToolClass {
        match self {
            Self::CreateEntities
            | Self::CreateRelations
            | Self::AddObservations
            | Self::DeleteEntities
            | Self::DeleteRelations
            | Self::DeleteObservations => ToolClass::Write,
            Self::GetEntity
            | Self::ReadGraph
            | Self::Neighbors
            | Self::ShortestPath
            | Self::MemoryStats => ToolClass::Read,
            Self::SearchNodes | Self::AnalyzeIntent => ToolClass::Search,
            Self::CreateContext | Self::DeleteContext | Self::SetContext | Self::ListContexts => {
                ToolClass::Context
            },
            Self::ExportMemory
            | Self::ImportMemory
            | Self::CreateBackup
            | Self::RestoreBackup
            | Self::RollbackTransaction => ToolClass::System,
        }
    }

    /// Whether the tool requires `confirm: true`.
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(
            self,
            Self::DeleteEntities
                | Self::DeleteRelations
                | Self::DeleteObservations
                | Self::RestoreBackup
                | Self::RollbackTransaction
        )
    }

    /// Required fields as `(path, expected type)` pairs. Used for both
    /// schema generation and elicitation responses.
    #[must_use]
    pub const fn required_fields(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::CreateEntities => &[("entities", "array")],
            Self::CreateRelations | Self::DeleteRelations => &[("relations", "array")],
            Self::AddObservations => &[("observations", "array")],
            Self::DeleteEntities => &[("names", "array")],
            Self::DeleteObservations => &[("deletions", "array")],
            Self::GetEntity | Self::Neighbors => &[("name", "string")],
            Self::ShortestPath => &[("from", "string"), ("to", "string")],
            Self::SearchNodes | Self::AnalyzeIntent => &[("query", "string")],
            Self::CreateContext | Self::DeleteContext | Self::SetContext => {
                &[("name", "string")]
            },
            Self::ImportMemory => &[("document", "string")],
            Self::RestoreBackup => &[("path", "string")],
            Self::RollbackTransaction => &[("transaction_id", "string")],
            Self::ReadGraph
            | Self::ListContexts
            | Self::MemoryStats
            | Self::ExportMemory
            | Self::CreateBackup => &[],
        }
    }

    /// One-line description for the tool listing.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::CreateEntities => {
                "Create or merge entities; existing names get their type updated and observations appended"
            },
            Self::CreateRelations => {
                "Create directed relations between existing entities; duplicates are ignored"
            },
            Self::AddObservations => "Append observation blocks to existing entities",
            Self::DeleteEntities => "Delete entities and every relation referencing them",
            Self::DeleteRelations => "Delete matching relation triples",
            Self::DeleteObservations => "Delete the first matching occurrence of each observation",
            Self::GetEntity => "Fetch one entity by name, recording the access",
            Self::ReadGraph => "Read a paginated slice of the graph with touching relations",
            Self::Neighbors => "Expand the neighborhood around an entity up to a depth bound",
            Self::ShortestPath => "Find the shortest directed path between two entities",
            Self::SearchNodes => "Full-text search with contextual ranking and highlights",
            Self::AnalyzeIntent => "Classify search intent and suggest alternative queries",
            Self::CreateContext => "Register a new isolated context",
            Self::DeleteContext => "Delete a context (force required when non-empty)",
            Self::SetContext => "Set the default context for subsequent operations",
            Self::ListContexts => "List registered contexts and their metadata",
            Self::MemoryStats => "Entity, relation, cache, and aging statistics",
            Self::ExportMemory => "Export contexts as a versioned, checksummed document",
            Self::ImportMemory => "Import a previously exported document",
            Self::CreateBackup => "Write a timestamped backup file",
            Self::RestoreBackup => "Restore contexts from a backup file",
            Self::RollbackTransaction => "Roll back a pending transaction by id",
        }
    }

    /// JSON-Schema for the tool's input object.
    #[must_use]
    pub fn input_schema(self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (field, kind) in self.required_fields() {
            properties.insert((*field).to_string(), json!({ "type": kind }));
            required.push(json!(field));
        }
        properties.insert("context".to_string(), json!({ "type": "string" }));
        if self.is_destructive() {
            properties.insert("confirm".to_string(), json!({ "type": "boolean" }));
            required.push(json!("confirm"));
        }
        json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": required,
        })
    }
}

/// The `tools/list` payload.
#[must_use]
pub fn definitions() -> Value {
    let tools: Vec<Value> = ToolName::ALL
        .iter()
        .map(|tool| {
            json!({
                "name": tool.as_str(),
                "description": tool.description(),
                "inputSchema": tool.input_schema(),
            })
        })
        .collect();
    json!({ "tools": tools })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for tool in ToolName::ALL {
            assert_eq!(ToolName::parse(tool.as_str()), Some(*tool));
        }
        assert_eq!(ToolName::parse("bogus_tool"), None);
    }

    #[test]
    fn test_destructive_set_matches_contract() {
        let destructive: Vec<&str> = ToolName::ALL
            .iter()
            .filter(|t| t.is_destructive())
            .map(|t| t.as_str())
            .collect();
        assert_eq!(
            destructive,
            vec![
                "delete_entities",
                "delete_relations",
                "delete_observations",
                "restore_backup",
                "rollback_transaction",
            ]
        );
    }

    #[test]
    fn test_class_budgets() {
        assert_eq!(ToolName::GetEntity.class().limit_per_minute(), 1000);
        assert_eq!(ToolName::CreateEntities.class().limit_per_minute(), 100);
        assert_eq!(ToolName::SearchNodes.class().limit_per_minute(), 500);
        assert_eq!(ToolName::SetContext.class().limit_per_minute(), 50);
        assert_eq!(ToolName::ExportMemory.class().limit_per_minute(), 20);
    }

    #[test]
    fn test_schema_requires_confirm_for_destructive() {
        let schema = ToolName::DeleteEntities.input_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"confirm"));
        assert!(required.contains(&"names"));
    }

    #[test]
    fn test_definitions_cover_all_tools() {
        let listing = definitions();
        assert_eq!(listing["tools"].as_array().unwrap().len(), ToolName::ALL.len());
    }
}
