//! Schema initialization and FTS tokenizer migration.
//!
//! The store keeps three relational tables (`entities`, `observations`,
//! `relations`), one FTS5 virtual table mirroring searchable entity text, and
//! a `meta` key/value table recording the tokenizer the FTS index was built
//! under. Startup compares the recorded tokenizer against the current one
//! and rebuilds the index inside a transaction when they differ.

use crate::{Error, Result};
use rusqlite::Connection;

/// Tokenizer specification the FTS index is built with.
///
/// Unicode normalization with diacritic folding plus a `{2,3,4}` prefix
/// index for fast starts-with matching.
pub const FTS_TOKENIZER: &str = "unicode61 remove_diacritics 2";

/// Prefix index widths registered with FTS5.
pub const FTS_PREFIX: &str = "2 3 4";

/// Meta key recording the tokenizer of the current FTS index.
const META_TOKENIZER_KEY: &str = "fts_tokenizer";

fn tokenizer_fingerprint() -> String {
    format!("{FTS_TOKENIZER}|prefix={FTS_PREFIX}")
}

fn exec(conn: &Connection, operation: &str, sql: &str) -> Result<()> {
    conn.execute(sql, []).map_err(|e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    })?;
    Ok(())
}

/// Creates all tables and indexes if absent, then runs the FTS migration.
pub fn initialize(conn: &Connection) -> Result<()> {
    exec(
        conn,
        "create_entities_table",
        "CREATE TABLE IF NOT EXISTS entities (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            name_normalized TEXT NOT NULL UNIQUE,
            entity_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_accessed INTEGER NOT NULL,
            access_count INTEGER NOT NULL DEFAULT 0,
            importance_weight REAL NOT NULL DEFAULT 1.0,
            prominence_score REAL NOT NULL DEFAULT 1.0,
            forgotten INTEGER NOT NULL DEFAULT 0
        )",
    )?;

    exec(
        conn,
        "create_observations_table",
        "CREATE TABLE IF NOT EXISTS observations (
            id INTEGER PRIMARY KEY,
            entity_id INTEGER NOT NULL REFERENCES entities(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            content TEXT NOT NULL
        )",
    )?;

    exec(
        conn,
        "create_relations_table",
        "CREATE TABLE IF NOT EXISTS relations (
            id INTEGER PRIMARY KEY,
            from_normalized TEXT NOT NULL,
            to_normalized TEXT NOT NULL,
            relation_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            strength REAL,
            UNIQUE(from_normalized, to_normalized, relation_type)
        )",
    )?;

    exec(
        conn,
        "create_meta_table",
        "CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
    )?;

    create_indexes(conn);
    create_fts_table(conn)?;
    migrate_fts_tokenizer(conn)?;
    Ok(())
}

/// Creates query-path indexes. Failures are non-fatal: the tables remain
/// correct without them.
fn create_indexes(conn: &Connection) {
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_observations_entity
         ON observations(entity_id, position)",
        [],
    );
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_relations_from ON relations(from_normalized)",
        [],
    );
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_relations_to ON relations(to_normalized)",
        [],
    );
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entities_last_accessed
         ON entities(last_accessed DESC)",
        [],
    );
    let _ = conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entities_updated_at
         ON entities(updated_at DESC)",
        [],
    );
}

fn create_fts_table(conn: &Connection) -> Result<()> {
    let sql = format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS entities_fts USING fts5(
            name, entity_type, content,
            tokenize = '{FTS_TOKENIZER}',
            prefix = '{FTS_PREFIX}'
        )"
    );
    exec(conn, "create_fts_table", &sql)
}

/// Rebuilds the FTS index when it was created under a different tokenizer.
///
/// The rebuild runs in one transaction: drop, recreate, repopulate from the
/// relational tables, record the new fingerprint. Any failure rolls the whole
/// migration back, leaving the previous index intact.
fn migrate_fts_tokenizer(conn: &Connection) -> Result<()> {
    let current: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            [META_TOKENIZER_KEY],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| {
            if matches!(e, rusqlite::Error::QueryReturnedNoRows) {
                Ok(None)
            } else {
                Err(Error::OperationFailed {
                    operation: "read_tokenizer_meta".to_string(),
                    cause: e.to_string(),
                })
            }
        })?;

    let wanted = tokenizer_fingerprint();
    if current.as_deref() == Some(wanted.as_str()) {
        return Ok(());
    }

    if let Some(previous) = &current {
        tracing::info!(previous, wanted, "rebuilding FTS index under new tokenizer");
    }

    conn.execute("BEGIN IMMEDIATE", [])
        .map_err(|e| Error::OperationFailed {
            operation: "begin_fts_migration".to_string(),
            cause: e.to_string(),
        })?;

    let result = rebuild_fts_locked(conn, &wanted);
    if result.is_ok() {
        conn.execute("COMMIT", [])
            .map_err(|e| Error::OperationFailed {
                operation: "commit_fts_migration".to_string(),
                cause: e.to_string(),
            })?;
    } else {
        let _ = conn.execute("ROLLBACK", []);
    }
    result
}

fn rebuild_fts_locked(conn: &Connection, fingerprint: &str) -> Result<()> {
    exec(conn, "drop_fts_table", "DROP TABLE IF EXISTS entities_fts")?;
    create_fts_table(conn)?;
    repopulate_fts(conn)?;
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        [META_TOKENIZER_KEY, fingerprint],
    )
    .map_err(|e| Error::OperationFailed {
        operation: "write_tokenizer_meta".to_string(),
        cause: e.to_string(),
    })?;
    Ok(())
}

/// Repopulates the FTS table from the relational tables.
///
/// The `content` column is the newline-joined text of textual observations
/// in position order; binary content blocks are not indexed.
pub fn repopulate_fts(conn: &Connection) -> Result<()> {
    conn.execute(
        "INSERT INTO entities_fts (rowid, name, entity_type, content)
         SELECT e.id, e.name, e.entity_type,
                COALESCE((
                    SELECT group_concat(json_extract(o.content, '$.text'), char(10)
                                        ORDER BY o.position)
                    FROM observations o
                    WHERE o.entity_id = e.id
                      AND json_extract(o.content, '$.type') = 'text'
                ), '')
         FROM entities e",
        [],
    )
    .map_err(|e| Error::OperationFailed {
        operation: "repopulate_fts".to_string(),
        cause: e.to_string(),
    })?;
    Ok(())
}
