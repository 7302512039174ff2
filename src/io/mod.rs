//! Bulk export/import codec.
//!
//! Produces and consumes the versioned, checksummed `MemoryExport` document
//! in three renderings: pretty JSON, JSON Lines, and a text-safe compressed
//! form (`base64(gzip(json))`). Import supports merge/replace/update/append
//! modes with skip/overwrite/rename conflict resolution, dry runs, and
//! content migration options.

mod export;
mod import;

pub use export::{ExportFormat, ExportOptions, build_export, render_export};
pub use import::{
    ConflictResolution, ContentFilter, ImportMode, ImportOptions, ImportOutcome, ImportSummary,
    MigrationOptions, ParsedDocument, import_document, parse_document,
};
