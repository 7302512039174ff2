//! Shared connection handling for the `SQLite` store.
//!
//! Provides mutex handling with poison recovery and the pragma configuration
//! every engram connection runs under.

use crate::{Error, Result};
use rusqlite::Connection;
use std::sync::{Mutex, MutexGuard};

/// Default mmap size for the store (256 MB).
pub const DEFAULT_MMAP_SIZE: i64 = 256 * 1024 * 1024;

/// Page-cache budget in KiB (64 MB). Negative `cache_size` means KiB units.
const PAGE_CACHE_KIB: i64 = 64 * 1024;

/// Helper to acquire a mutex lock with poison recovery.
///
/// If the mutex is poisoned (a panic in a previous critical section), we
/// recover the inner value and log a warning. The connection state is still
/// valid; abandoning it would turn one panic into a cascade.
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("store mutex was poisoned, recovering");
            metrics::counter!("store_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Configures a connection with the engram pragma set.
///
/// - **WAL mode** for concurrent readers alongside the single writer
/// - **NORMAL synchronous** balancing durability with write throughput
/// - **`busy_timeout` 5 s** instead of immediate `SQLITE_BUSY`
/// - **64 MB page cache** and memory-mapped I/O sized by `mmap_size`
/// - **`foreign_keys` on** so observation rows follow their entity
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if pragma configuration fails.
pub fn configure_connection(conn: &Connection, mmap_size: i64) -> Result<()> {
    // journal_mode returns a row ("wal"), so pragma_update's result is ignored
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    conn.pragma_update(None, "synchronous", "NORMAL")
        .and_then(|()| conn.pragma_update(None, "busy_timeout", 5000))
        .and_then(|()| conn.pragma_update(None, "cache_size", -PAGE_CACHE_KIB))
        .and_then(|()| conn.pragma_update(None, "foreign_keys", "ON"))
        .map_err(|e| Error::OperationFailed {
            operation: "configure_connection".to_string(),
            cause: e.to_string(),
        })?;
    // mmap_size is best-effort: some filesystems refuse it
    let _ = conn.pragma_update(None, "mmap_size", mmap_size);
    Ok(())
}
