//! # Engram
//!
//! An embedded knowledge-graph memory service.
//!
//! Engram stores named, typed **entities** carrying ordered lists of rich
//! **observations**, plus the directed **relations** between them, and answers
//! lookups, full-text searches, graph traversals, and bulk export/import over
//! this data. It is accessed as a JSON-RPC tool server over stdio (one client,
//! long-lived process) and sustains heavy write bursts against an on-disk,
//! crash-consistent SQLite store.
//!
//! ## Architecture
//!
//! - Named **contexts** isolate graphs; each owns its own store, caches,
//!   Bloom filter, and write pipeline.
//! - Writes flow through a [`aggregator::WriteAggregator`] that batches
//!   intents into grouped transactions, wrapped by the
//!   [`resilience::ResilienceLayer`] (transaction log, retry, degradation).
//! - Search runs a parse → FTS5 → rank → highlight pipeline with contextual
//!   boosting and a memory-aging prominence model.
//!
//! ## Example
//!
//! ```rust,ignore
//! use engram::context::ContextRegistry;
//! use engram::models::EntityInput;
//!
//! let registry = ContextRegistry::open(config)?;
//! let ctx = registry.resolve(Some("personal"), None)?;
//! ctx.create_entities(vec![EntityInput::new("Alice", "person")]).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

// Module declarations
pub mod aggregator;
pub mod aging;
pub mod cache;
pub mod config;
pub mod context;
pub mod io;
pub mod models;
pub mod resilience;
pub mod search;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use aging::{AgingConfig, AgingPreset};
pub use cache::{CacheStats, CacheStrategy, CacheStrategyKind};
pub use config::ServerConfig;
pub use context::{Context, ContextRegistry};
pub use models::{Entity, EntityInput, KnowledgeGraph, Observation, Relation};
pub use search::{SearchRequest, SearchResponse};
pub use storage::EntityStore;

/// Error type for engram operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
/// Variants map one-to-one onto the stable error codes surfaced by the tool
/// façade; [`Error::kind`] returns the wire discriminator.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - Required parameters are missing or the wrong shape
    /// - A content block fails validation (unknown type, missing data)
    /// - A context name violates `[a-z0-9_-]+`
    /// - A search query is empty or exceeds size caps
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced entity does not exist in the target context.
    #[error("entity '{name}' not found in context '{context}'")]
    EntityNotFound {
        /// The normalized entity name that was looked up.
        name: String,
        /// The context that was searched.
        context: String,
    },

    /// A referenced context does not exist or has an invalid name.
    #[error("invalid context: {0}")]
    InvalidContext(String),

    /// An entity with this name already exists.
    ///
    /// Soft error: surfaced by import `skip`/`append` accounting, never by
    /// the default `merge` upsert path.
    #[error("duplicate entity: {name}")]
    DuplicateEntity {
        /// The conflicting entity name.
        name: String,
    },

    /// A context still holds entities and `force` was not set.
    #[error("context '{0}' is not empty (pass force=true to delete anyway)")]
    ContextNotEmpty(String),

    /// A destructive operation was attempted without `confirm: true`.
    #[error("operation '{tool}' is destructive and requires confirm=true")]
    ConfirmationRequired {
        /// The tool that was rejected.
        tool: String,
    },

    /// The caller exceeded the per-class rate limit.
    #[error("rate limit exceeded for {tool_class} operations, retry after {retry_after_secs}s")]
    RateLimited {
        /// The tool class whose budget was exhausted.
        tool_class: String,
        /// Seconds until the current window resets.
        retry_after_secs: u64,
    },

    /// A transaction lifecycle violation.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// An integrity check failed; the transaction was rolled back.
    #[error("data corruption detected: {detail}")]
    DataCorruption {
        /// What failed to verify.
        detail: String,
    },

    /// Backup creation failed.
    #[error("backup failed: {0}")]
    BackupFailed(String),

    /// Restoring from a backup failed.
    #[error("restore failed: {0}")]
    RestoreFailed(String),

    /// The backup document is not a recognized format.
    #[error("invalid backup format: {0}")]
    InvalidBackupFormat(String),

    /// The backup document failed checksum verification.
    #[error("backup corrupted: {0}")]
    BackupCorrupted(String),

    /// The resilience circuit rejected the call.
    #[error("circuit open for operation '{operation}'")]
    CircuitOpen {
        /// The guarded operation that was rejected.
        operation: String,
    },

    /// A bounded wait expired.
    #[error("operation '{operation}' timed out")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// An operation failed.
    ///
    /// Raised when:
    /// - `SQLite` statements or transactions fail
    /// - Filesystem I/O errors occur
    /// - A background worker is unavailable
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// Last-resort internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Transaction lifecycle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ThisError)]
pub enum TransactionError {
    /// A transaction is already in flight for this context.
    #[error("a transaction is already in progress")]
    InProgress,
    /// No active transaction to commit or roll back.
    #[error("no active transaction")]
    NoActive,
    /// The transaction exceeded its time budget.
    #[error("transaction timed out")]
    Timeout,
}

impl Error {
    /// Returns the stable wire discriminator for this error.
    ///
    /// The tool façade places this string in the JSON-RPC `data.type` field;
    /// it is part of the public contract and must not change casually.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::EntityNotFound { .. } => "entity_not_found",
            Self::InvalidContext(_) => "invalid_context",
            Self::DuplicateEntity { .. } => "duplicate_entity",
            Self::ContextNotEmpty(_) => "context_not_empty",
            Self::ConfirmationRequired { .. } => "confirmation_required",
            Self::RateLimited { .. } => "rate_limited",
            Self::Transaction(_) => "transaction",
            Self::DataCorruption { .. } => "data_corruption",
            Self::BackupFailed(_) => "backup_failed",
            Self::RestoreFailed(_) => "restore_failed",
            Self::InvalidBackupFormat(_) => "invalid_backup_format",
            Self::BackupCorrupted(_) => "backup_corrupted",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::Timeout { .. } => "timeout",
            Self::OperationFailed { .. } => "operation_failed",
            Self::Internal(_) => "internal",
        }
    }

    /// Returns `true` if retrying the operation may succeed.
    ///
    /// The resilience layer only retries transient failures; semantic errors
    /// (missing entities, invalid input, confirmation gates) surface at once.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::OperationFailed { .. } | Self::Timeout { .. } | Self::Internal(_)
        )
    }
}

/// Result type alias for engram operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Centralized so every component shares one clock treatment. Falls back to 0
/// if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}

/// Normalizes an entity name for identity comparison.
///
/// Uniqueness of entities within a context is defined over this form:
/// surrounding whitespace stripped, then lowercased.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}
