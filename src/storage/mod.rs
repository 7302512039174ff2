//! `SQLite`-backed storage for entity graphs.
//!
//! One database file per context: relational tables for entities,
//! observations, and relations, plus an FTS5 index kept synchronized inside
//! every write transaction. A single write connection per store serializes
//! mutations; a bounded pool of read-only connections serves everything else.

mod connection;
mod read_pool;
pub mod schema;
mod store;

pub use connection::{DEFAULT_MMAP_SIZE, acquire_lock, configure_connection};
pub use read_pool::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_READ_POOL_SIZE, PooledConnection, ReadPool};
pub use store::{EntityStore, StoreConfig, WriteOp, WriteOpResult};
