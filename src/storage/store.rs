//! Entity/relation store: CRUD, FTS mirroring, traversals.
//!
//! All writes run inside a single `BEGIN IMMEDIATE` transaction on the one
//! write connection; the FTS row for every touched entity is resynchronized
//! before commit so the index never lags the tables. Reads go through the
//! read-only pool and never block behind the writer.

use super::connection::{DEFAULT_MMAP_SIZE, acquire_lock, configure_connection};
use super::read_pool::{DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_READ_POOL_SIZE, ReadPool};
use super::schema;
use crate::aging::AgingConfig;
use crate::models::{
    AddObservationsResult, DeleteObservationsRequest, Entity, EntityInput, GraphPage,
    KnowledgeGraph, Observation, ObservationAdd, PathResult, Relation, RelationInput,
    UpsertOutcome, UpsertResult,
};
use crate::{Error, Result, current_timestamp, normalize_name};
use lru::LruCache;
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tracing::instrument;

/// How many entities the prominence write-back gate remembers.
const TOUCH_GATE_CAPACITY: usize = 4096;

/// A typed write intent, processed by the aggregator in this fixed order:
/// creates, then relations, then observations, then deletes.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Upsert a batch of entities (merge semantics on conflict).
    CreateEntities(Vec<EntityInput>),
    /// Create relations; every endpoint must exist at commit time.
    CreateRelations(Vec<RelationInput>),
    /// Append observations to existing entities.
    AddObservations(Vec<ObservationAdd>),
    /// Delete entities and cascade to their relations.
    DeleteEntities(Vec<String>),
}

impl WriteOp {
    /// Processing rank inside a grouped transaction.
    ///
    /// Relations must see their entities, observations must see their
    /// entities, and deletes run last so they cannot orphan a relation
    /// created in the same batch.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::CreateEntities(_) => 0,
            Self::CreateRelations(_) => 1,
            Self::AddObservations(_) => 2,
            Self::DeleteEntities(_) => 3,
        }
    }

    /// Operation name for logs and the transaction journal.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CreateEntities(_) => "create_entities",
            Self::CreateRelations(_) => "create_relations",
            Self::AddObservations(_) => "add_observations",
            Self::DeleteEntities(_) => "delete_entities",
        }
    }
}

/// Result of one [`WriteOp`].
#[derive(Debug, Clone)]
pub enum WriteOpResult {
    /// Per-entity upsert outcomes.
    EntitiesUpserted(Vec<UpsertResult>),
    /// The relations actually created (duplicates silently dropped).
    RelationsCreated(Vec<Relation>),
    /// Per-entity append outcomes.
    ObservationsAdded(Vec<AddObservationsResult>),
    /// Number of entities deleted.
    EntitiesDeleted(usize),
}

/// Store tuning knobs.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Read-pool size.
    pub read_pool_size: usize,
    /// Read-pool acquisition timeout.
    pub acquire_timeout: std::time::Duration,
    /// mmap budget handed to `SQLite`.
    pub mmap_size: i64,
    /// Minimum seconds between prominence write-backs per entity.
    pub touch_interval_secs: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_pool_size: DEFAULT_READ_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            mmap_size: DEFAULT_MMAP_SIZE,
            touch_interval_secs: 60,
        }
    }
}

/// The per-context entity/relation store.
///
/// Owns the single write connection and the read pool for one context's
/// database file. In-memory stores (tests) skip the pool and serve reads on
/// the write connection.
pub struct EntityStore {
    conn: Mutex<Connection>,
    reads: Option<ReadPool>,
    db_path: Option<PathBuf>,
    aging: AgingConfig,
    touch_gate: Mutex<LruCache<String, i64>>,
    touch_interval_secs: i64,
}

impl EntityStore {
    /// Opens (or creates) the store at `path`.
    pub fn open(path: impl AsRef<Path>, aging: AgingConfig, config: &StoreConfig) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path).map_err(|e| Error::OperationFailed {
            operation: "open_store".to_string(),
            cause: e.to_string(),
        })?;
        configure_connection(&conn, config.mmap_size)?;
        schema::initialize(&conn)?;

        let reads = ReadPool::open(
            path,
            config.read_pool_size,
            config.acquire_timeout,
            config.mmap_size,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            reads: Some(reads),
            db_path: Some(path.to_path_buf()),
            aging,
            touch_gate: Mutex::new(LruCache::new(touch_gate_capacity())),
            touch_interval_secs: config.touch_interval_secs,
        })
    }

    /// Opens an in-memory store (useful for testing).
    pub fn in_memory(aging: AgingConfig) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_store_in_memory".to_string(),
            cause: e.to_string(),
        })?;
        configure_connection(&conn, 0)?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            reads: None,
            db_path: None,
            aging,
            touch_gate: Mutex::new(LruCache::new(touch_gate_capacity())),
            touch_interval_secs: 0,
        })
    }

    /// Returns the database path (None for in-memory).
    #[must_use]
    pub const fn db_path(&self) -> Option<&PathBuf> {
        self.db_path.as_ref()
    }

    /// Returns the aging configuration this store scores prominence with.
    #[must_use]
    pub const fn aging(&self) -> &AgingConfig {
        &self.aging
    }

    // ------------------------------------------------------------------
    // Transaction plumbing
    // ------------------------------------------------------------------

    fn with_write_tx<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let conn = acquire_lock(&self.conn);
        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(|e| Error::OperationFailed {
                operation: "begin_transaction".to_string(),
                cause: e.to_string(),
            })?;

        let result = match f(&conn) {
            Ok(value) => {
                conn.execute("COMMIT", [])
                    .map_err(|e| Error::OperationFailed {
                        operation: "commit_transaction".to_string(),
                        cause: e.to_string(),
                    })?;
                Ok(value)
            },
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(e)
            },
        };
        drop(conn);

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("store_writes_total", "operation" => operation, "status" => status)
            .increment(1);
        metrics::histogram!("store_write_duration_seconds", "operation" => operation)
            .record(start.elapsed().as_secs_f64());
        result
    }

    fn with_read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match &self.reads {
            Some(pool) => {
                let conn = pool.acquire()?;
                f(&conn)
            },
            None => {
                let conn = acquire_lock(&self.conn);
                f(&conn)
            },
        }
    }

    // ------------------------------------------------------------------
    // Grouped writes
    // ------------------------------------------------------------------

    /// Applies a group of write ops inside one transaction.
    ///
    /// Results map 1-to-1 onto `ops` by index. Any failure rolls back the
    /// whole group; no partial effect is ever observable.
    #[instrument(skip(self, ops), fields(op_count = ops.len()))]
    pub fn apply_write_ops(&self, ops: &[WriteOp]) -> Result<Vec<WriteOpResult>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let now = current_timestamp();
        self.with_write_tx("apply_write_ops", |conn| {
            let mut results = Vec::with_capacity(ops.len());
            for op in ops {
                let result = match op {
                    WriteOp::CreateEntities(inputs) => {
                        WriteOpResult::EntitiesUpserted(upsert_entities(conn, inputs, now)?)
                    },
                    WriteOp::CreateRelations(inputs) => {
                        WriteOpResult::RelationsCreated(insert_relations(conn, inputs, now)?)
                    },
                    WriteOp::AddObservations(adds) => {
                        WriteOpResult::ObservationsAdded(append_observations(conn, adds, now)?)
                    },
                    WriteOp::DeleteEntities(names) => {
                        WriteOpResult::EntitiesDeleted(delete_entities_cascade(conn, names)?)
                    },
                };
                results.push(result);
            }
            Ok(results)
        })
    }

    /// Upserts a batch of entities. See `create_entities` semantics: new
    /// names insert; existing names overwrite the type and append the
    /// observations.
    pub fn create_entities(&self, inputs: Vec<EntityInput>) -> Result<Vec<UpsertResult>> {
        match self
            .apply_write_ops(&[WriteOp::CreateEntities(inputs)])?
            .pop()
        {
            Some(WriteOpResult::EntitiesUpserted(results)) => Ok(results),
            _ => Err(Error::Internal("write op result shape mismatch".to_string())),
        }
    }

    /// Creates relations; fails the whole batch if any endpoint is missing.
    pub fn create_relations(&self, inputs: Vec<RelationInput>) -> Result<Vec<Relation>> {
        match self
            .apply_write_ops(&[WriteOp::CreateRelations(inputs)])?
            .pop()
        {
            Some(WriteOpResult::RelationsCreated(results)) => Ok(results),
            _ => Err(Error::Internal("write op result shape mismatch".to_string())),
        }
    }

    /// Appends observations to existing entities.
    pub fn add_observations(&self, adds: Vec<ObservationAdd>) -> Result<Vec<AddObservationsResult>> {
        match self
            .apply_write_ops(&[WriteOp::AddObservations(adds)])?
            .pop()
        {
            Some(WriteOpResult::ObservationsAdded(results)) => Ok(results),
            _ => Err(Error::Internal("write op result shape mismatch".to_string())),
        }
    }

    /// Deletes entities and every relation referencing them.
    pub fn delete_entities(&self, names: Vec<String>) -> Result<usize> {
        match self
            .apply_write_ops(&[WriteOp::DeleteEntities(names)])?
            .pop()
        {
            Some(WriteOpResult::EntitiesDeleted(count)) => Ok(count),
            _ => Err(Error::Internal("write op result shape mismatch".to_string())),
        }
    }

    // ------------------------------------------------------------------
    // Standalone writes (outside the aggregator's four intent kinds)
    // ------------------------------------------------------------------

    /// Removes matching relation triples. Missing triples are not an error.
    ///
    /// Returns the number of relations removed.
    pub fn delete_relations(&self, inputs: &[RelationInput]) -> Result<usize> {
        self.with_write_tx("delete_relations", |conn| {
            let mut removed = 0;
            for input in inputs {
                let key = input.normalized_key();
                removed += conn
                    .execute(
                        "DELETE FROM relations
                         WHERE from_normalized = ?1 AND to_normalized = ?2
                           AND relation_type = ?3",
                        params![key.from, key.to, key.relation_type],
                    )
                    .map_err(|e| Error::OperationFailed {
                        operation: "delete_relation".to_string(),
                        cause: e.to_string(),
                    })?;
            }
            Ok(removed)
        })
    }

    /// Removes the first matching occurrence of each listed observation.
    ///
    /// Returns per-entity counts of removed blocks.
    pub fn delete_observations(
        &self,
        requests: &[DeleteObservationsRequest],
    ) -> Result<Vec<(String, usize)>> {
        let now = current_timestamp();
        self.with_write_tx("delete_observations", |conn| {
            let mut outcomes = Vec::with_capacity(requests.len());
            for request in requests {
                let norm = normalize_name(&request.entity_name);
                let Some(entity_id) = entity_id_by_norm(conn, &norm)? else {
                    outcomes.push((request.entity_name.clone(), 0));
                    continue;
                };
                let mut removed = 0;
                for target in &request.observations {
                    if remove_first_observation(conn, entity_id, target)? {
                        removed += 1;
                    }
                }
                if removed > 0 {
                    touch_updated_at(conn, entity_id, now)?;
                    sync_fts_row(conn, entity_id)?;
                }
                outcomes.push((request.entity_name.clone(), removed));
            }
            Ok(outcomes)
        })
    }

    /// Rewrites prominence and the forgotten flag for one entity.
    ///
    /// Used by the aging sweep; not a user-facing mutation, so `updated_at`
    /// is left alone.
    pub fn write_prominence(&self, name_normalized: &str, score: f64, forgotten: bool) -> Result<()> {
        self.with_write_tx("write_prominence", |conn| {
            conn.execute(
                "UPDATE entities SET prominence_score = ?1, forgotten = ?2
                 WHERE name_normalized = ?3",
                params![score, i32::from(forgotten), name_normalized],
            )
            .map_err(|e| Error::OperationFailed {
                operation: "write_prominence".to_string(),
                cause: e.to_string(),
            })?;
            Ok(())
        })
    }

    /// Overrides entity timestamps. Import-only path (`preserve_ids` /
    /// timestamp migration).
    pub fn set_entity_timestamps(
        &self,
        name_normalized: &str,
        created_at: i64,
        updated_at: i64,
    ) -> Result<()> {
        self.with_write_tx("set_entity_timestamps", |conn| {
            conn.execute(
                "UPDATE entities SET created_at = ?1, updated_at = ?2,
                        last_accessed = MAX(last_accessed, ?1)
                 WHERE name_normalized = ?3",
                params![created_at, updated_at.max(created_at), name_normalized],
            )
            .map_err(|e| Error::OperationFailed {
                operation: "set_entity_timestamps".to_string(),
                cause: e.to_string(),
            })?;
            Ok(())
        })
    }

    /// Deletes every row in the context. Import `replace` mode only.
    pub fn clear_all(&self) -> Result<()> {
        self.with_write_tx("clear_all", |conn| {
            for (operation, sql) in [
                ("clear_observations", "DELETE FROM observations"),
                ("clear_relations", "DELETE FROM relations"),
                ("clear_entities", "DELETE FROM entities"),
                ("clear_fts", "DELETE FROM entities_fts"),
            ] {
                conn.execute(sql, []).map_err(|e| Error::OperationFailed {
                    operation: operation.to_string(),
                    cause: e.to_string(),
                })?;
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetches an entity by name and records the access.
    ///
    /// `last_accessed` and `access_count` always advance; the prominence
    /// recompute is written back at most once per `touch_interval_secs` per
    /// entity to avoid write amplification under read-heavy load.
    #[instrument(skip(self), fields(entity = name))]
    pub fn get_entity(&self, name: &str) -> Result<Option<Entity>> {
        let norm = normalize_name(name);
        let found = self.with_read(|conn| load_entity_by_norm(conn, &norm))?;
        let Some(mut entity) = found else {
            return Ok(None);
        };

        let now = current_timestamp();
        entity.access_count += 1;
        entity.last_accessed = now.max(entity.last_accessed);

        let write_prominence = self.touch_gate_allows(&norm, now);
        if write_prominence {
            entity.prominence_score = self.aging.prominence(
                entity.last_accessed,
                entity.access_count,
                entity.importance_weight,
                now,
            );
        }

        self.with_write_tx("touch_entity", |conn| {
            if write_prominence {
                conn.execute(
                    "UPDATE entities
                     SET last_accessed = ?1, access_count = access_count + 1,
                         prominence_score = ?2
                     WHERE name_normalized = ?3",
                    params![entity.last_accessed, entity.prominence_score, norm],
                )
            } else {
                conn.execute(
                    "UPDATE entities
                     SET last_accessed = ?1, access_count = access_count + 1
                     WHERE name_normalized = ?2",
                    params![entity.last_accessed, norm],
                )
            }
            .map_err(|e| Error::OperationFailed {
                operation: "touch_entity".to_string(),
                cause: e.to_string(),
            })?;
            Ok(())
        })?;

        Ok(Some(entity))
    }

    /// Fetches an entity without recording the access. Internal read path
    /// for ranking, warming, and export.
    pub fn peek_entity(&self, name: &str) -> Result<Option<Entity>> {
        let norm = normalize_name(name);
        self.with_read(|conn| load_entity_by_norm(conn, &norm))
    }

    /// Returns whether an entity exists, without touching access state.
    pub fn entity_exists(&self, name: &str) -> Result<bool> {
        let norm = normalize_name(name);
        self.with_read(|conn| Ok(entity_id_by_norm(conn, &norm)?.is_some()))
    }

    /// Paginated graph read: an entity slice plus all relations touching it.
    pub fn read_graph(&self, limit: Option<usize>, offset: Option<usize>) -> Result<GraphPage> {
        let limit = limit.unwrap_or(100).max(1);
        let offset = offset.unwrap_or(0);
        self.with_read(|conn| {
            let total_entities = count_rows(conn, "entities")?;
            let mut stmt = conn
                .prepare(
                    "SELECT id FROM entities ORDER BY name_normalized
                     LIMIT ?1 OFFSET ?2",
                )
                .map_err(op_failed("read_graph"))?;
            let ids = stmt
                .query_map(params![to_i64(limit), to_i64(offset)], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(op_failed("read_graph"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(op_failed("read_graph"))?;

            let entities = load_entities_by_ids(conn, &ids)?;
            let names: Vec<String> = entities.iter().map(Entity::name_normalized).collect();
            let relations = relations_touching(conn, &names)?;

            Ok(GraphPage {
                graph: KnowledgeGraph {
                    entities,
                    relations,
                },
                total_entities,
                offset,
                has_more: offset + ids.len() < total_entities,
            })
        })
    }

    /// Runs an FTS MATCH query, returning entities in relevance order.
    pub fn fts_search(&self, match_expr: &str, limit: usize) -> Result<Vec<Entity>> {
        self.with_read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT rowid FROM entities_fts
                     WHERE entities_fts MATCH ?1
                     ORDER BY bm25(entities_fts)
                     LIMIT ?2",
                )
                .map_err(op_failed("fts_search"))?;
            let ids = stmt
                .query_map(params![match_expr, to_i64(limit)], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(op_failed("fts_search"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(op_failed("fts_search"))?;
            load_entities_by_ids(conn, &ids)
        })
    }

    /// Bounded-depth neighborhood expansion around one entity.
    ///
    /// Follows relations in both directions; the returned relations keep
    /// their stored direction.
    pub fn neighbors(&self, name: &str, depth: usize) -> Result<KnowledgeGraph> {
        let start = normalize_name(name);
        let depth = depth.clamp(1, 10);
        self.with_read(|conn| {
            if entity_id_by_norm(conn, &start)?.is_none() {
                return Err(Error::EntityNotFound {
                    name: start.clone(),
                    context: String::new(),
                });
            }

            let mut visited: HashSet<String> = HashSet::from([start.clone()]);
            let mut frontier = vec![start.clone()];
            let mut collected_relations: Vec<Relation> = Vec::new();
            let mut seen_edges: HashSet<(String, String, String)> = HashSet::new();

            for _ in 0..depth {
                if frontier.is_empty() {
                    break;
                }
                let edges = relations_touching(conn, &frontier)?;
                let mut next = Vec::new();
                for edge in edges {
                    let key = (
                        edge.from.clone(),
                        edge.to.clone(),
                        edge.relation_type.clone(),
                    );
                    if seen_edges.insert(key) {
                        for endpoint in [&edge.from, &edge.to] {
                            if visited.insert(endpoint.clone()) {
                                next.push(endpoint.clone());
                            }
                        }
                        collected_relations.push(edge);
                    }
                }
                frontier = next;
            }

            let ids = ids_for_norms(conn, &visited.iter().cloned().collect::<Vec<_>>())?;
            let entities = load_entities_by_ids(conn, &ids)?;
            Ok(KnowledgeGraph {
                entities,
                relations: collected_relations,
            })
        })
    }

    /// Directed shortest path from `from` to `to`, bounded by `max_depth`.
    pub fn shortest_path(&self, from: &str, to: &str, max_depth: usize) -> Result<PathResult> {
        let source = normalize_name(from);
        let target = normalize_name(to);
        let max_depth = max_depth.clamp(1, 20);

        self.with_read(|conn| {
            for name in [&source, &target] {
                if entity_id_by_norm(conn, name)?.is_none() {
                    return Err(Error::EntityNotFound {
                        name: name.clone(),
                        context: String::new(),
                    });
                }
            }
            if source == target {
                return Ok(PathResult {
                    path: vec![source.clone()],
                    relations: Vec::new(),
                    found: true,
                });
            }

            // BFS over outgoing edges with a visited set and parent links
            let mut visited: HashSet<String> = HashSet::from([source.clone()]);
            let mut parents: HashMap<String, (String, Relation)> = HashMap::new();
            let mut queue: VecDeque<(String, usize)> = VecDeque::from([(source.clone(), 0)]);

            while let Some((node, dist)) = queue.pop_front() {
                if dist >= max_depth {
                    continue;
                }
                for edge in outgoing_relations(conn, &node)? {
                    let next = edge.to.clone();
                    if visited.insert(next.clone()) {
                        parents.insert(next.clone(), (node.clone(), edge));
                        if next == target {
                            queue.clear();
                            break;
                        }
                        queue.push_back((next, dist + 1));
                    }
                }
            }

            if !parents.contains_key(&target) {
                return Ok(PathResult::not_found());
            }

            let mut path = vec![target.clone()];
            let mut relations = Vec::new();
            let mut cursor = target;
            while let Some((parent, edge)) = parents.get(&cursor) {
                path.push(parent.clone());
                relations.push(edge.clone());
                cursor = parent.clone();
            }
            path.reverse();
            relations.reverse();
            Ok(PathResult {
                path,
                relations,
                found: true,
            })
        })
    }

    /// All entities, ordered by normalized name. Export path.
    pub fn all_entities(&self) -> Result<Vec<Entity>> {
        self.with_read(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM entities ORDER BY name_normalized")
                .map_err(op_failed("all_entities"))?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))
                .map_err(op_failed("all_entities"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(op_failed("all_entities"))?;
            load_entities_by_ids(conn, &ids)
        })
    }

    /// All relations, ordered by the identity triple. Export path.
    pub fn all_relations(&self) -> Result<Vec<Relation>> {
        self.with_read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT from_normalized, to_normalized, relation_type, created_at, strength
                     FROM relations
                     ORDER BY from_normalized, to_normalized, relation_type",
                )
                .map_err(op_failed("all_relations"))?;
            let rows = stmt
                .query_map([], row_to_relation)
                .map_err(op_failed("all_relations"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(op_failed("all_relations"))?;
            Ok(rows)
        })
    }

    /// The `n` most recently accessed entities. Cache-warming path.
    pub fn recent_entities(&self, n: usize) -> Result<Vec<Entity>> {
        self.with_read(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM entities ORDER BY last_accessed DESC LIMIT ?1")
                .map_err(op_failed("recent_entities"))?;
            let ids = stmt
                .query_map(params![to_i64(n)], |row| row.get::<_, i64>(0))
                .map_err(op_failed("recent_entities"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(op_failed("recent_entities"))?;
            load_entities_by_ids(conn, &ids)
        })
    }

    /// All normalized entity names. Bloom-filter rebuild path.
    pub fn all_entity_names(&self) -> Result<Vec<String>> {
        self.with_read(|conn| {
            let mut stmt = conn
                .prepare("SELECT name_normalized FROM entities")
                .map_err(op_failed("all_entity_names"))?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(op_failed("all_entity_names"))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(op_failed("all_entity_names"))?;
            Ok(names)
        })
    }

    /// Entity count.
    pub fn entity_count(&self) -> Result<usize> {
        self.with_read(|conn| count_rows(conn, "entities"))
    }

    /// Relation count.
    pub fn relation_count(&self) -> Result<usize> {
        self.with_read(|conn| count_rows(conn, "relations"))
    }

    /// Observation count across all entities.
    pub fn observation_count(&self) -> Result<usize> {
        self.with_read(|conn| count_rows(conn, "observations"))
    }

    fn touch_gate_allows(&self, norm: &str, now: i64) -> bool {
        let mut gate = self
            .touch_gate
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let due = gate
            .get(norm)
            .is_none_or(|last| now - *last >= self.touch_interval_secs);
        if due {
            gate.put(norm.to_string(), now);
        }
        due
    }
}

fn touch_gate_capacity() -> NonZeroUsize {
    NonZeroUsize::new(TOUCH_GATE_CAPACITY).unwrap_or(NonZeroUsize::MIN)
}

// ----------------------------------------------------------------------
// Row-level helpers (callers hold the transaction)
// ----------------------------------------------------------------------

fn op_failed(operation: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::OperationFailed {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

#[allow(clippy::cast_possible_wrap)]
fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn count_rows(conn: &Connection, table: &str) -> Result<usize> {
    let sql = format!("SELECT count(*) FROM {table}");
    let count: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .map_err(op_failed("count_rows"))?;
    Ok(usize::try_from(count).unwrap_or(0))
}

fn entity_id_by_norm(conn: &Connection, norm: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT id FROM entities WHERE name_normalized = ?1",
        [norm],
        |row| row.get(0),
    )
    .optional()
    .map_err(op_failed("entity_id_by_norm"))
}

fn ids_for_norms(conn: &Connection, norms: &[String]) -> Result<Vec<i64>> {
    let mut ids = Vec::with_capacity(norms.len());
    for norm in norms {
        if let Some(id) = entity_id_by_norm(conn, norm)? {
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

fn load_observations(conn: &Connection, entity_id: i64) -> Result<Vec<Observation>> {
    let mut stmt = conn
        .prepare("SELECT content FROM observations WHERE entity_id = ?1 ORDER BY position")
        .map_err(op_failed("load_observations"))?;
    let raw = stmt
        .query_map([entity_id], |row| row.get::<_, String>(0))
        .map_err(op_failed("load_observations"))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(op_failed("load_observations"))?;

    let mut observations = Vec::with_capacity(raw.len());
    for content in raw {
        let obs = serde_json::from_str(&content).map_err(|e| Error::DataCorruption {
            detail: format!("unreadable observation block: {e}"),
        })?;
        observations.push(obs);
    }
    Ok(observations)
}

struct EntityRow {
    id: i64,
    entity: Entity,
}

fn row_to_entity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EntityRow> {
    let access_count: i64 = row.get(7)?;
    Ok(EntityRow {
        id: row.get(0)?,
        entity: Entity {
            name: row.get(1)?,
            entity_type: row.get(2)?,
            observations: Vec::new(),
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            last_accessed: row.get(5)?,
            access_count: u64::try_from(access_count).unwrap_or(0),
            importance_weight: row.get(8)?,
            prominence_score: row.get(9)?,
            forgotten: row.get::<_, i64>(10)? != 0,
        },
    })
}

const ENTITY_COLUMNS: &str = "id, name, entity_type, created_at, updated_at, last_accessed, \
     name_normalized, access_count, importance_weight, prominence_score, forgotten";

fn load_entity_by_id(conn: &Connection, id: i64) -> Result<Option<Entity>> {
    let row = conn
        .query_row(
            &format!("SELECT {ENTITY_COLUMNS} FROM entities WHERE id = ?1"),
            [id],
            row_to_entity_row,
        )
        .optional()
        .map_err(op_failed("load_entity"))?;
    let Some(mut entity_row) = row else {
        return Ok(None);
    };
    entity_row.entity.observations = load_observations(conn, entity_row.id)?;
    Ok(Some(entity_row.entity))
}

fn load_entity_by_norm(conn: &Connection, norm: &str) -> Result<Option<Entity>> {
    let id = entity_id_by_norm(conn, norm)?;
    match id {
        Some(id) => load_entity_by_id(conn, id),
        None => Ok(None),
    }
}

fn load_entities_by_ids(conn: &Connection, ids: &[i64]) -> Result<Vec<Entity>> {
    let mut entities = Vec::with_capacity(ids.len());
    for &id in ids {
        if let Some(entity) = load_entity_by_id(conn, id)? {
            entities.push(entity);
        }
    }
    Ok(entities)
}

fn row_to_relation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    Ok(Relation {
        from: row.get(0)?,
        to: row.get(1)?,
        relation_type: row.get(2)?,
        created_at: row.get(3)?,
        strength: row.get(4)?,
    })
}

fn relations_touching(conn: &Connection, norms: &[String]) -> Result<Vec<Relation>> {
    if norms.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn
        .prepare(
            "SELECT from_normalized, to_normalized, relation_type, created_at, strength
             FROM relations WHERE from_normalized = ?1 OR to_normalized = ?1",
        )
        .map_err(op_failed("relations_touching"))?;

    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let mut relations = Vec::new();
    for norm in norms {
        let rows = stmt
            .query_map([norm], row_to_relation)
            .map_err(op_failed("relations_touching"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(op_failed("relations_touching"))?;
        for relation in rows {
            let key = (
                relation.from.clone(),
                relation.to.clone(),
                relation.relation_type.clone(),
            );
            if seen.insert(key) {
                relations.push(relation);
            }
        }
    }
    Ok(relations)
}

fn outgoing_relations(conn: &Connection, norm: &str) -> Result<Vec<Relation>> {
    let mut stmt = conn
        .prepare(
            "SELECT from_normalized, to_normalized, relation_type, created_at, strength
             FROM relations WHERE from_normalized = ?1
             ORDER BY to_normalized, relation_type",
        )
        .map_err(op_failed("outgoing_relations"))?;
    let rows = stmt
        .query_map([norm], row_to_relation)
        .map_err(op_failed("outgoing_relations"))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(op_failed("outgoing_relations"))?;
    Ok(rows)
}

/// Rewrites the FTS row for one entity from current table state.
fn sync_fts_row(conn: &Connection, entity_id: i64) -> Result<()> {
    conn.execute("DELETE FROM entities_fts WHERE rowid = ?1", [entity_id])
        .map_err(op_failed("sync_fts_delete"))?;

    let Some(entity) = load_entity_by_id(conn, entity_id)? else {
        return Ok(());
    };
    conn.execute(
        "INSERT INTO entities_fts (rowid, name, entity_type, content)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            entity_id,
            entity.name,
            entity.entity_type,
            entity.searchable_text()
        ],
    )
    .map_err(op_failed("sync_fts_insert"))?;
    Ok(())
}

fn touch_updated_at(conn: &Connection, entity_id: i64, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE entities SET updated_at = MAX(created_at, ?1) WHERE id = ?2",
        params![now, entity_id],
    )
    .map_err(op_failed("touch_updated_at"))?;
    Ok(())
}

fn next_observation_position(conn: &Connection, entity_id: i64) -> Result<i64> {
    let position: Option<i64> = conn
        .query_row(
            "SELECT MAX(position) FROM observations WHERE entity_id = ?1",
            [entity_id],
            |row| row.get(0),
        )
        .map_err(op_failed("next_observation_position"))?;
    Ok(position.map_or(0, |p| p + 1))
}

fn insert_observation(
    conn: &Connection,
    entity_id: i64,
    position: i64,
    observation: &Observation,
) -> Result<()> {
    let content = serde_json::to_string(observation).map_err(|e| Error::OperationFailed {
        operation: "serialize_observation".to_string(),
        cause: e.to_string(),
    })?;
    conn.execute(
        "INSERT INTO observations (entity_id, position, content) VALUES (?1, ?2, ?3)",
        params![entity_id, position, content],
    )
    .map_err(op_failed("insert_observation"))?;
    Ok(())
}

fn remove_first_observation(
    conn: &Connection,
    entity_id: i64,
    target: &Observation,
) -> Result<bool> {
    let target_value = serde_json::to_value(target).map_err(|e| Error::OperationFailed {
        operation: "serialize_observation".to_string(),
        cause: e.to_string(),
    })?;

    let mut stmt = conn
        .prepare(
            "SELECT id, content FROM observations
             WHERE entity_id = ?1 ORDER BY position",
        )
        .map_err(op_failed("remove_first_observation"))?;
    let rows = stmt
        .query_map([entity_id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .map_err(op_failed("remove_first_observation"))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(op_failed("remove_first_observation"))?;

    for (row_id, content) in rows {
        let value: serde_json::Value =
            serde_json::from_str(&content).map_err(|e| Error::DataCorruption {
                detail: format!("unreadable observation block: {e}"),
            })?;
        if value == target_value {
            conn.execute("DELETE FROM observations WHERE id = ?1", [row_id])
                .map_err(op_failed("remove_first_observation"))?;
            return Ok(true);
        }
    }
    Ok(false)
}

fn upsert_entities(
    conn: &Connection,
    inputs: &[EntityInput],
    now: i64,
) -> Result<Vec<UpsertResult>> {
    let mut results = Vec::with_capacity(inputs.len());
    for input in inputs {
        let norm = normalize_name(&input.name);
        if norm.is_empty() {
            return Err(Error::InvalidInput("entity name must not be empty".to_string()));
        }
        let entity_type = input.entity_type.trim().to_lowercase();

        let (id, outcome) = match entity_id_by_norm(conn, &norm)? {
            Some(id) => {
                // Merge: overwrite the type, append the observations
                conn.execute(
                    "UPDATE entities SET entity_type = ?1, updated_at = ?2 WHERE id = ?3",
                    params![entity_type, now, id],
                )
                .map_err(op_failed("update_entity"))?;
                if let Some(weight) = input.importance_weight {
                    conn.execute(
                        "UPDATE entities SET importance_weight = ?1 WHERE id = ?2",
                        params![weight, id],
                    )
                    .map_err(op_failed("update_entity"))?;
                }
                (id, UpsertOutcome::Updated)
            },
            None => {
                conn.execute(
                    "INSERT INTO entities
                        (name, name_normalized, entity_type, created_at, updated_at,
                         last_accessed, access_count, importance_weight, prominence_score)
                     VALUES (?1, ?2, ?3, ?4, ?4, ?4, 0, ?5, ?6)",
                    params![
                        input.name.trim(),
                        norm,
                        entity_type,
                        now,
                        input.importance_weight.unwrap_or(1.0),
                        1.0_f64,
                    ],
                )
                .map_err(op_failed("insert_entity"))?;
                (conn.last_insert_rowid(), UpsertOutcome::Created)
            },
        };

        let mut position = next_observation_position(conn, id)?;
        for observation in &input.observations {
            insert_observation(conn, id, position, observation)?;
            position += 1;
        }

        sync_fts_row(conn, id)?;

        let entity = load_entity_by_id(conn, id)?.ok_or_else(|| Error::Internal(
            "entity vanished inside its own transaction".to_string(),
        ))?;
        results.push(UpsertResult {
            name: input.name.clone(),
            outcome,
            entity,
        });
    }
    Ok(results)
}

fn insert_relations(
    conn: &Connection,
    inputs: &[RelationInput],
    now: i64,
) -> Result<Vec<Relation>> {
    let mut created = Vec::new();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    for input in inputs {
        let key = input.normalized_key();
        for endpoint in [&key.from, &key.to] {
            if entity_id_by_norm(conn, endpoint)?.is_none() {
                return Err(Error::EntityNotFound {
                    name: endpoint.clone(),
                    context: String::new(),
                });
            }
        }
        if !seen.insert((key.from.clone(), key.to.clone(), key.relation_type.clone())) {
            continue;
        }
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO relations
                    (from_normalized, to_normalized, relation_type, created_at, strength)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![key.from, key.to, key.relation_type, now, input.strength],
            )
            .map_err(op_failed("insert_relation"))?;
        if inserted > 0 {
            created.push(Relation {
                from: key.from,
                to: key.to,
                relation_type: key.relation_type,
                created_at: now,
                strength: input.strength,
            });
        }
    }
    Ok(created)
}

fn append_observations(
    conn: &Connection,
    adds: &[ObservationAdd],
    now: i64,
) -> Result<Vec<AddObservationsResult>> {
    let mut results = Vec::with_capacity(adds.len());
    for add in adds {
        let norm = normalize_name(&add.entity_name);
        let Some(entity_id) = entity_id_by_norm(conn, &norm)? else {
            return Err(Error::EntityNotFound {
                name: norm,
                context: String::new(),
            });
        };
        let mut position = next_observation_position(conn, entity_id)?;
        for observation in &add.contents {
            insert_observation(conn, entity_id, position, observation)?;
            position += 1;
        }
        touch_updated_at(conn, entity_id, now)?;
        sync_fts_row(conn, entity_id)?;

        let total = conn
            .query_row(
                "SELECT count(*) FROM observations WHERE entity_id = ?1",
                [entity_id],
                |row| row.get::<_, i64>(0),
            )
            .map_err(op_failed("count_observations"))?;
        results.push(AddObservationsResult {
            entity_name: add.entity_name.clone(),
            added: add.contents.len(),
            total: usize::try_from(total).unwrap_or(0),
        });
    }
    Ok(results)
}

fn delete_entities_cascade(conn: &Connection, names: &[String]) -> Result<usize> {
    let mut deleted = 0;
    for name in names {
        let norm = normalize_name(name);
        let Some(id) = entity_id_by_norm(conn, &norm)? else {
            continue;
        };
        conn.execute("DELETE FROM observations WHERE entity_id = ?1", [id])
            .map_err(op_failed("delete_observations"))?;
        conn.execute(
            "DELETE FROM relations WHERE from_normalized = ?1 OR to_normalized = ?1",
            [&norm],
        )
        .map_err(op_failed("delete_relations_cascade"))?;
        conn.execute("DELETE FROM entities WHERE id = ?1", [id])
            .map_err(op_failed("delete_entity"))?;
        conn.execute("DELETE FROM entities_fts WHERE rowid = ?1", [id])
            .map_err(op_failed("delete_fts_row"))?;
        deleted += 1;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EntityStore {
        EntityStore::in_memory(AgingConfig::default()).unwrap()
    }

    fn input(name: &str, entity_type: &str, texts: &[&str]) -> EntityInput {
        let mut entity = EntityInput::new(name, entity_type);
        for text in texts {
            entity = entity.with_text(*text);
        }
        entity
    }

    #[test]
    fn test_create_then_get() {
        let store = store();
        let results = store
            .create_entities(vec![input("Alice", "Person", &["likes rust"])])
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, UpsertOutcome::Created);

        let entity = store.get_entity("alice").unwrap().unwrap();
        assert_eq!(entity.name, "Alice");
        assert_eq!(entity.entity_type, "person");
        assert_eq!(entity.observations.len(), 1);
        assert_eq!(entity.access_count, 1);
        assert!(entity.last_accessed >= entity.created_at);
    }

    #[test]
    fn test_upsert_merge_appends_observations() {
        let store = store();
        store
            .create_entities(vec![input("Alice", "person", &["a"])])
            .unwrap();
        let results = store
            .create_entities(vec![input("Alice", "human", &["b"])])
            .unwrap();
        assert_eq!(results[0].outcome, UpsertOutcome::Updated);

        let entity = store.peek_entity("Alice").unwrap().unwrap();
        assert_eq!(entity.entity_type, "human");
        let texts: Vec<_> = entity
            .observations
            .iter()
            .filter_map(Observation::as_text)
            .collect();
        assert_eq!(texts, vec!["a", "b"]);
        assert_eq!(store.entity_count().unwrap(), 1);
    }

    #[test]
    fn test_relation_requires_endpoints() {
        let store = store();
        store
            .create_entities(vec![input("A", "t", &[]), input("B", "t", &[])])
            .unwrap();

        let created = store
            .create_relations(vec![RelationInput::new("A", "B", "knows")])
            .unwrap();
        assert_eq!(created.len(), 1);

        let err = store
            .create_relations(vec![RelationInput::new("A", "Ghost", "knows")])
            .unwrap_err();
        assert_eq!(err.kind(), "entity_not_found");
    }

    #[test]
    fn test_duplicate_relations_dedupe_silently() {
        let store = store();
        store
            .create_entities(vec![input("A", "t", &[]), input("B", "t", &[])])
            .unwrap();
        store
            .create_relations(vec![
                RelationInput::new("A", "B", "knows"),
                RelationInput::new("a", "b", "KNOWS"),
            ])
            .unwrap();
        store
            .create_relations(vec![RelationInput::new("A", "B", "knows")])
            .unwrap();
        assert_eq!(store.relation_count().unwrap(), 1);
    }

    #[test]
    fn test_cascade_delete() {
        let store = store();
        store
            .create_entities(vec![input("A", "t", &[]), input("B", "t", &[])])
            .unwrap();
        store
            .create_relations(vec![RelationInput::new("A", "B", "friend")])
            .unwrap();

        let deleted = store.delete_entities(vec!["A".to_string()]).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get_entity("A").unwrap().is_none());
        assert_eq!(store.relation_count().unwrap(), 0);
        assert!(store.get_entity("B").unwrap().is_some());
    }

    #[test]
    fn test_fts_reflects_writes_immediately() {
        let store = store();
        store
            .create_entities(vec![input(
                "Meeting",
                "event",
                &["meeting with Bob about Alpha"],
            )])
            .unwrap();

        let hits = store.fts_search("Alpha", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Meeting");

        let misses = store.fts_search("alfa", 10).unwrap();
        assert!(misses.is_empty());
    }

    #[test]
    fn test_add_observations_updates_fts() {
        let store = store();
        store.create_entities(vec![input("Doc", "note", &[])]).unwrap();
        assert!(store.fts_search("zephyr", 10).unwrap().is_empty());

        store
            .add_observations(vec![ObservationAdd {
                entity_name: "Doc".to_string(),
                contents: vec![Observation::text("the zephyr project kickoff")],
            }])
            .unwrap();
        assert_eq!(store.fts_search("zephyr", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_observation_removes_first_match_only() {
        let store = store();
        store
            .create_entities(vec![input("Log", "note", &["dup", "other", "dup"])])
            .unwrap();

        let outcomes = store
            .delete_observations(&[DeleteObservationsRequest {
                entity_name: "Log".to_string(),
                observations: vec![Observation::text("dup")],
            }])
            .unwrap();
        assert_eq!(outcomes[0].1, 1);

        let entity = store.peek_entity("Log").unwrap().unwrap();
        let texts: Vec<_> = entity
            .observations
            .iter()
            .filter_map(Observation::as_text)
            .collect();
        assert_eq!(texts, vec!["other", "dup"]);
    }

    #[test]
    fn test_read_graph_pagination() {
        let store = store();
        store
            .create_entities(vec![
                input("A", "t", &[]),
                input("B", "t", &[]),
                input("C", "t", &[]),
            ])
            .unwrap();
        store
            .create_relations(vec![RelationInput::new("A", "B", "knows")])
            .unwrap();

        let page = store.read_graph(Some(2), Some(0)).unwrap();
        assert_eq!(page.graph.entities.len(), 2);
        assert_eq!(page.total_entities, 3);
        assert!(page.has_more);
        // The A<->B relation touches the first page
        assert_eq!(page.graph.relations.len(), 1);

        let page = store.read_graph(Some(2), Some(2)).unwrap();
        assert_eq!(page.graph.entities.len(), 1);
        assert!(!page.has_more);
    }

    #[test]
    fn test_batch_is_atomic() {
        let store = store();
        store.create_entities(vec![input("A", "t", &[])]).unwrap();

        // Second op fails (missing endpoint); first op must not stick
        let err = store
            .apply_write_ops(&[
                WriteOp::CreateEntities(vec![input("New", "t", &[])]),
                WriteOp::CreateRelations(vec![RelationInput::new("New", "Ghost", "knows")]),
            ])
            .unwrap_err();
        assert_eq!(err.kind(), "entity_not_found");
        assert!(store.get_entity("New").unwrap().is_none());
        assert_eq!(store.entity_count().unwrap(), 1);
    }

    #[test]
    fn test_shortest_path_directed() {
        let store = store();
        store
            .create_entities(vec![
                input("A", "t", &[]),
                input("B", "t", &[]),
                input("C", "t", &[]),
            ])
            .unwrap();
        store
            .create_relations(vec![
                RelationInput::new("A", "B", "knows"),
                RelationInput::new("B", "C", "knows"),
            ])
            .unwrap();

        let result = store.shortest_path("A", "C", 5).unwrap();
        assert!(result.found);
        assert_eq!(result.path, vec!["a", "b", "c"]);
        assert_eq!(result.relations.len(), 2);

        // No reverse path in a directed graph
        let reverse = store.shortest_path("C", "A", 5).unwrap();
        assert!(!reverse.found);
    }

    #[test]
    fn test_neighbors_bounded() {
        let store = store();
        store
            .create_entities(vec![
                input("A", "t", &[]),
                input("B", "t", &[]),
                input("C", "t", &[]),
            ])
            .unwrap();
        store
            .create_relations(vec![
                RelationInput::new("A", "B", "knows"),
                RelationInput::new("B", "C", "knows"),
            ])
            .unwrap();

        let hood = store.neighbors("A", 1).unwrap();
        let names: HashSet<_> = hood.entities.iter().map(|e| e.name.clone()).collect();
        assert!(names.contains("A") && names.contains("B"));
        assert!(!names.contains("C"));

        let hood = store.neighbors("A", 2).unwrap();
        assert_eq!(hood.entities.len(), 3);
    }

    #[test]
    fn test_observation_positions_survive_deletes() {
        let store = store();
        store
            .create_entities(vec![input("E", "t", &["one", "two"])])
            .unwrap();
        store
            .delete_observations(&[DeleteObservationsRequest {
                entity_name: "E".to_string(),
                observations: vec![Observation::text("one")],
            }])
            .unwrap();
        store
            .add_observations(vec![ObservationAdd {
                entity_name: "E".to_string(),
                contents: vec![Observation::text("three")],
            }])
            .unwrap();

        let entity = store.peek_entity("E").unwrap().unwrap();
        let texts: Vec<_> = entity
            .observations
            .iter()
            .filter_map(Observation::as_text)
            .collect();
        assert_eq!(texts, vec!["two", "three"]);
    }
}
