//! Data models for engram.
//!
//! This module contains all the core data structures used throughout the
//! system: entities with their rich observations, relations, graph slices,
//! and the versioned export document.

mod entity;
mod export;
mod graph;
mod relation;

pub use entity::{
    AddObservationsResult, DeleteObservationsRequest, Entity, EntityInput, Observation,
    ObservationAdd, UpsertOutcome, UpsertResult,
};
pub use export::{
    ContextExport, ExportMetadata, ExportedEntity, ExportedRelation, MemoryExport,
    EXPORT_FORMAT_VERSION,
};
pub use graph::{GraphPage, KnowledgeGraph, PathResult};
pub use relation::{Relation, RelationInput, RelationKey};
