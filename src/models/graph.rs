//! Graph slice and traversal result types.

use super::{Entity, Relation};
use serde::{Deserialize, Serialize};

/// A slice of the knowledge graph: entities plus the relations touching them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    /// Entities in this slice.
    pub entities: Vec<Entity>,
    /// All relations with at least one endpoint in `entities`.
    pub relations: Vec<Relation>,
}

/// A paginated graph read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPage {
    /// The requested slice.
    #[serde(flatten)]
    pub graph: KnowledgeGraph,
    /// Total entity count in the context (before pagination).
    pub total_entities: usize,
    /// Offset this page starts at.
    pub offset: usize,
    /// Whether more entities exist past this page.
    pub has_more: bool,
}

/// Result of a shortest-path traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResult {
    /// Entity names along the path, source first, target last.
    ///
    /// Empty when no path exists within the depth bound.
    pub path: Vec<String>,
    /// The relations traversed, in path order.
    pub relations: Vec<Relation>,
    /// Whether a path was found.
    pub found: bool,
}

impl PathResult {
    /// A result representing "no path found".
    #[must_use]
    pub const fn not_found() -> Self {
        Self {
            path: Vec::new(),
            relations: Vec::new(),
            found: false,
        }
    }
}
