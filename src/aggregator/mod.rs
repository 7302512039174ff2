//! Write aggregator: batches concurrent write intents into grouped
//! transactions.
//!
//! Under bursts of many small writes, committing each intent separately pays
//! the fsync and lock cost per write. The aggregator collapses whatever has
//! queued into one transaction while preserving semantic order: entity
//! creates run first, then relations, then observations, then deletes —
//! so relations always see their entities and a delete can never orphan a
//! relation created in the same batch.
//!
//! One dedicated writer thread per context drains a work queue; async
//! callers submit an intent and await a one-shot result. Processing is
//! inherently single-flight: while a batch commits, new intents accumulate
//! in the channel and form the next batch.

use crate::resilience::ResilienceLayer;
use crate::storage::{EntityStore, WriteOp, WriteOpResult};
use crate::{Error, Result};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Batch scheduling mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// Process on the next tick, coalescing whatever has accumulated.
    ZeroDelay,
    /// Wait up to `delay` or until `max_batch` intents queue, whichever
    /// comes first.
    Debounced {
        /// Maximum wait before the batch closes.
        delay: Duration,
        /// Batch size that closes the batch early.
        max_batch: usize,
    },
}

impl Default for ScheduleMode {
    fn default() -> Self {
        Self::ZeroDelay
    }
}

/// Aggregator configuration.
#[derive(Debug, Clone, Default)]
pub struct AggregatorConfig {
    /// Scheduling mode.
    pub mode: ScheduleMode,
}

struct QueuedIntent {
    op: WriteOp,
    reply: oneshot::Sender<Result<WriteOpResult>>,
}

/// Callback invoked after a batch commits, with the committed ops.
///
/// Contexts hook cache invalidation and Bloom updates here; the callback
/// runs before any caller observes their result, preserving the
/// cache-update-happens-before-response guarantee.
pub type CommitHook = Box<dyn Fn(&[WriteOp]) + Send>;

/// Per-context write aggregator.
pub struct WriteAggregator {
    sender: Mutex<Option<mpsc::Sender<QueuedIntent>>>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl WriteAggregator {
    /// Spawns the writer thread for one context.
    #[must_use]
    pub fn spawn(
        store: Arc<EntityStore>,
        resilience: Arc<ResilienceLayer>,
        config: AggregatorConfig,
        on_commit: CommitHook,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<QueuedIntent>();
        let worker = std::thread::Builder::new()
            .name("engram-writer".to_string())
            .spawn(move || worker_loop(&receiver, &store, &resilience, config.mode, &on_commit))
            .ok();

        Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(worker),
        }
    }

    /// Submits an intent and waits until it is durably applied or rejected.
    pub async fn submit(&self, op: WriteOp) -> Result<WriteOpResult> {
        let (reply, receiver) = oneshot::channel();
        {
            let sender = lock(&self.sender);
            let Some(sender) = sender.as_ref() else {
                return Err(Error::OperationFailed {
                    operation: "aggregator_submit".to_string(),
                    cause: "aggregator is shut down".to_string(),
                });
            };
            sender
                .send(QueuedIntent { op, reply })
                .map_err(|_| Error::OperationFailed {
                    operation: "aggregator_submit".to_string(),
                    cause: "writer thread is gone".to_string(),
                })?;
        }
        receiver.await.map_err(|_| Error::OperationFailed {
            operation: "aggregator_submit".to_string(),
            cause: "writer dropped the result channel".to_string(),
        })?
    }

    /// Blocking submit for synchronous callers (CLI, import).
    pub fn submit_blocking(&self, op: WriteOp) -> Result<WriteOpResult> {
        let (reply, receiver) = oneshot::channel();
        {
            let sender = lock(&self.sender);
            let Some(sender) = sender.as_ref() else {
                return Err(Error::OperationFailed {
                    operation: "aggregator_submit".to_string(),
                    cause: "aggregator is shut down".to_string(),
                });
            };
            sender
                .send(QueuedIntent { op, reply })
                .map_err(|_| Error::OperationFailed {
                    operation: "aggregator_submit".to_string(),
                    cause: "writer thread is gone".to_string(),
                })?;
        }
        receiver.blocking_recv().map_err(|_| Error::OperationFailed {
            operation: "aggregator_submit".to_string(),
            cause: "writer dropped the result channel".to_string(),
        })?
    }

    /// Stops accepting intents and joins the writer after it drains.
    pub fn shutdown(&self) {
        let sender = lock(&self.sender).take();
        drop(sender);
        let worker = lock(&self.worker).take();
        if let Some(handle) = worker {
            let _ = handle.join();
        }
    }
}

impl Drop for WriteAggregator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn worker_loop(
    receiver: &mpsc::Receiver<QueuedIntent>,
    store: &EntityStore,
    resilience: &ResilienceLayer,
    mode: ScheduleMode,
    on_commit: &CommitHook,
) {
    // Blocks until the first intent of the next batch; a closed channel ends
    // the worker.
    while let Ok(first) = receiver.recv() {
        let mut batch = vec![first];
        match mode {
            ScheduleMode::ZeroDelay => {
                while let Ok(intent) = receiver.try_recv() {
                    batch.push(intent);
                }
            },
            ScheduleMode::Debounced { delay, max_batch } => {
                let deadline = Instant::now() + delay;
                while batch.len() < max_batch.max(1) {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match receiver.recv_timeout(remaining) {
                        Ok(intent) => batch.push(intent),
                        Err(_) => break,
                    }
                }
            },
        }
        process_batch(batch, store, resilience, on_commit);
    }
}

fn process_batch(
    mut batch: Vec<QueuedIntent>,
    store: &EntityStore,
    resilience: &ResilienceLayer,
    on_commit: &CommitHook,
) {
    // Stable sort groups by kind without reordering same-kind intents, so
    // each caller's intents keep their submission order within the batch
    batch.sort_by_key(|queued| queued.op.rank());
    let ops: Vec<WriteOp> = batch.iter().map(|queued| queued.op.clone()).collect();

    metrics::histogram!("aggregator_batch_size").record(batch.len() as f64);

    let outcome = resilience.execute("write_batch", None, None, || store.apply_write_ops(&ops));

    match outcome {
        Ok(results) => {
            // Cache invalidation happens before any caller sees its result
            on_commit(&ops);
            for (queued, result) in batch.into_iter().zip(results) {
                let _ = queued.reply.send(Ok(result));
            }
        },
        Err(e) => {
            // The grouped transaction failed: every intent in the batch is
            // rejected with the same error
            for queued in batch {
                let _ = queued.reply.send(Err(e.clone()));
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aging::AgingConfig;
    use crate::models::{EntityInput, ObservationAdd, Observation, RelationInput};
    use crate::resilience::ResilienceConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn harness(mode: ScheduleMode) -> (Arc<EntityStore>, WriteAggregator) {
        let store = Arc::new(EntityStore::in_memory(AgingConfig::default()).unwrap());
        let resilience = Arc::new(ResilienceLayer::new(
            ResilienceConfig::default().with_backoff_cap_secs(0),
        ));
        let aggregator = WriteAggregator::spawn(
            Arc::clone(&store),
            resilience,
            AggregatorConfig { mode },
            Box::new(|_| {}),
        );
        (store, aggregator)
    }

    #[tokio::test]
    async fn test_submit_applies_write() {
        let (store, aggregator) = harness(ScheduleMode::ZeroDelay);
        let result = aggregator
            .submit(WriteOp::CreateEntities(vec![EntityInput::new("A", "t")]))
            .await
            .unwrap();
        assert!(matches!(result, WriteOpResult::EntitiesUpserted(ref r) if r.len() == 1));
        assert!(store.entity_exists("A").unwrap());
    }

    #[tokio::test]
    async fn test_batch_reorders_across_kinds() {
        let (store, aggregator) = harness(ScheduleMode::Debounced {
            delay: Duration::from_millis(50),
            max_batch: 16,
        });

        // Submit in an order that only works if the aggregator groups:
        // observations and relations land before the entities exist
        let obs = aggregator.submit(WriteOp::AddObservations(vec![ObservationAdd {
            entity_name: "A".to_string(),
            contents: vec![Observation::text("queued first")],
        }]));
        let rel = aggregator.submit(WriteOp::CreateRelations(vec![RelationInput::new(
            "A", "B", "knows",
        )]));
        let ents = aggregator.submit(WriteOp::CreateEntities(vec![
            EntityInput::new("A", "t"),
            EntityInput::new("B", "t"),
        ]));

        let (obs, rel, ents) = tokio::join!(obs, rel, ents);
        assert!(ents.is_ok());
        assert!(rel.is_ok());
        assert!(obs.is_ok());

        let entity = store.peek_entity("A").unwrap().unwrap();
        assert_eq!(entity.observations.len(), 1);
        assert_eq!(store.relation_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_batch_rejects_every_intent() {
        let (store, aggregator) = harness(ScheduleMode::Debounced {
            delay: Duration::from_millis(50),
            max_batch: 16,
        });

        let good = aggregator.submit(WriteOp::CreateEntities(vec![EntityInput::new("A", "t")]));
        let bad = aggregator.submit(WriteOp::CreateRelations(vec![RelationInput::new(
            "A", "Ghost", "knows",
        )]));

        let (good, bad) = tokio::join!(good, bad);
        assert_eq!(good.unwrap_err().kind(), "entity_not_found");
        assert_eq!(bad.unwrap_err().kind(), "entity_not_found");
        // All-or-nothing: the create in the same batch did not stick
        assert!(!store.entity_exists("A").unwrap());
    }

    #[tokio::test]
    async fn test_commit_hook_runs_before_reply() {
        let store = Arc::new(EntityStore::in_memory(AgingConfig::default()).unwrap());
        let resilience = Arc::new(ResilienceLayer::new(ResilienceConfig::default()));
        let hook_runs = Arc::new(AtomicUsize::new(0));
        let hook_runs_clone = Arc::clone(&hook_runs);

        let aggregator = WriteAggregator::spawn(
            Arc::clone(&store),
            resilience,
            AggregatorConfig::default(),
            Box::new(move |_| {
                hook_runs_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        aggregator
            .submit(WriteOp::CreateEntities(vec![EntityInput::new("A", "t")]))
            .await
            .unwrap();
        assert_eq!(hook_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_intents() {
        let (_store, aggregator) = harness(ScheduleMode::ZeroDelay);
        aggregator.shutdown();
        let err = aggregator
            .submit(WriteOp::DeleteEntities(vec!["x".to_string()]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "operation_failed");
    }
}
