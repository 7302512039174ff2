//! Bounded pool of read-only connections.
//!
//! Reads run on their own connections so the single writer never blocks
//! them. Acquisition is bounded: callers waiting past `acquire_timeout` get
//! [`Error::Timeout`] instead of queueing forever.

use super::connection::configure_connection;
use crate::{Error, Result};
use rusqlite::{Connection, OpenFlags};
use std::ops::Deref;
use std::path::Path;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Default number of pooled read connections.
pub const DEFAULT_READ_POOL_SIZE: usize = 20;

/// Default acquisition timeout.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// A fixed-size pool of read-only `SQLite` connections.
#[derive(Debug)]
pub struct ReadPool {
    idle: Mutex<Vec<Connection>>,
    returned: Condvar,
    acquire_timeout: Duration,
}

impl ReadPool {
    /// Opens `size` read-only connections against the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if any connection cannot be opened.
    pub fn open(
        path: &Path,
        size: usize,
        acquire_timeout: Duration,
        mmap_size: i64,
    ) -> Result<Self> {
        let size = size.max(1);
        let mut idle = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| Error::OperationFailed {
                operation: "open_read_connection".to_string(),
                cause: e.to_string(),
            })?;
            configure_connection(&conn, mmap_size)?;
            let _ = conn.pragma_update(None, "query_only", "ON");
            idle.push(conn);
        }
        Ok(Self {
            idle: Mutex::new(idle),
            returned: Condvar::new(),
            acquire_timeout,
        })
    }

    /// Borrows a connection, waiting up to the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if no connection frees up in time.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut idle = self
            .idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        loop {
            if let Some(conn) = idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                metrics::counter!("read_pool_acquire_timeout_total").increment(1);
                return Err(Error::Timeout {
                    operation: "read_pool_acquire".to_string(),
                });
            }
            let (guard, wait) = self
                .returned
                .wait_timeout(idle, remaining)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            idle = guard;
            if wait.timed_out() && idle.is_empty() {
                metrics::counter!("read_pool_acquire_timeout_total").increment(1);
                return Err(Error::Timeout {
                    operation: "read_pool_acquire".to_string(),
                });
            }
        }
    }

    fn give_back(&self, conn: Connection) {
        let mut idle = self
            .idle
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        idle.push(conn);
        drop(idle);
        self.returned.notify_one();
    }
}

/// A borrowed read connection; returns itself to the pool on drop.
#[derive(Debug)]
pub struct PooledConnection<'a> {
    pool: &'a ReadPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Invariant: `conn` is only None after drop
        #[allow(clippy::unwrap_used)]
        self.conn.as_ref().unwrap()
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn);
        }
    }
}
