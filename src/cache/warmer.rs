//! Best-effort cache warming at startup.
//!
//! Pre-loads the most recently accessed entities into the entity cache and
//! replays a fixed list of warming queries through the search path. Any
//! single failure is logged and skipped; warming never blocks startup.

use super::CacheStrategy;
use crate::Result;
use crate::models::Entity;
use crate::storage::EntityStore;
use std::sync::Arc;

/// Default number of recent entities to pre-load.
pub const DEFAULT_WARM_ENTITY_COUNT: usize = 100;

/// Outcome of one warming pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarmingReport {
    /// Entities loaded into the entity cache.
    pub entities_loaded: usize,
    /// Warming queries that ran to completion.
    pub queries_run: usize,
    /// Failures that were logged and skipped.
    pub failures: usize,
}

/// Pre-loads recent entities and replays warming queries.
///
/// `run_query` is the caller's search entry point; the warmer stays ignorant
/// of the search pipeline so it can run before the engine's caches exist.
pub fn warm<F>(
    store: &EntityStore,
    entity_cache: &mut dyn CacheStrategy<Arc<Entity>>,
    entity_count: usize,
    warming_queries: &[String],
    mut run_query: F,
) -> WarmingReport
where
    F: FnMut(&str) -> Result<()>,
{
    let mut report = WarmingReport::default();

    match store.recent_entities(entity_count) {
        Ok(entities) => {
            for entity in entities {
                let key = entity.name_normalized();
                entity_cache.set(key, Arc::new(entity));
                report.entities_loaded += 1;
            }
        },
        Err(e) => {
            tracing::warn!(error = %e, "cache warming: recent-entity load failed");
            report.failures += 1;
        },
    }

    for query in warming_queries {
        match run_query(query) {
            Ok(()) => report.queries_run += 1,
            Err(e) => {
                tracing::warn!(query, error = %e, "cache warming: query failed");
                report.failures += 1;
            },
        }
    }

    tracing::debug!(
        entities = report.entities_loaded,
        queries = report.queries_run,
        failures = report.failures,
        "cache warming complete"
    );
    report
}
