//! Resilience wrapper around every write transaction.
//!
//! Responsibilities: the transaction journal with its
//! `pending → committed | rolled_back | failed` state machine, input
//! checksum verification, bounded retry with exponential backoff, graceful
//! degradation with recorded recovery actions, stale-transaction repair, and
//! a write gate that locks the store out after sustained transient failure.
//!
//! # Write gate
//!
//! There is exactly one store behind this layer, so the gate is not a
//! fleet-style breaker: it watches the journal outcomes the layer already
//! produces. A run of transient failures locks new transactions out for a
//! cooldown; once the cooldown expires a small budget of probe transactions
//! is admitted. A probe that commits restores full service and resets the
//! cooldown to its base; a probe that fails re-locks with the cooldown
//! doubled (up to a cap), so a store that stays broken is bothered less and
//! less often. Semantic failures (missing entities, bad input) never feed
//! the gate — they say nothing about store health.

use crate::{Error, Result, TransactionError, current_timestamp};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Computes the SHA-256 hex digest of a value's canonical JSON form.
pub fn checksum_of<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value).map_err(|e| Error::OperationFailed {
        operation: "checksum_serialize".to_string(),
        cause: e.to_string(),
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Verifies a caller-supplied checksum against the actual input.
///
/// Mismatch means the payload was mangled in transit; the write must not
/// proceed.
pub fn verify_input<T: Serialize>(expected: &str, value: &T) -> Result<()> {
    let actual = checksum_of(value)?;
    if actual == expected {
        Ok(())
    } else {
        Err(Error::DataCorruption {
            detail: format!("input checksum mismatch: expected {expected}, computed {actual}"),
        })
    }
}

/// Resilience configuration.
#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Cap on the `2^n` seconds backoff.
    pub backoff_cap_secs: u64,
    /// Whether exhausted retries may return a safe fallback.
    pub degradation_enabled: bool,
    /// Pending transactions older than this are rolled back by repair.
    pub stale_txn_age_secs: i64,
    /// In-memory journal capacity.
    pub journal_capacity: usize,
    /// Optional directory receiving journal records as JSON lines.
    pub journal_dir: Option<PathBuf>,
    /// Transient failures in a row before the write gate locks.
    pub gate_failure_run: u32,
    /// First lockout cooldown; doubles on every failed recovery probe.
    pub gate_base_cooldown_ms: u64,
    /// Ceiling for the doubled cooldown.
    pub gate_max_cooldown_ms: u64,
    /// Probe transactions admitted per recovery window.
    pub gate_probe_budget: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_cap_secs: 30,
            degradation_enabled: true,
            stale_txn_age_secs: 300,
            journal_capacity: 1024,
            journal_dir: None,
            gate_failure_run: 5,
            gate_base_cooldown_ms: 30_000,
            gate_max_cooldown_ms: 300_000,
            gate_probe_budget: 1,
        }
    }
}

impl ResilienceConfig {
    /// Sets the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the backoff cap.
    #[must_use]
    pub const fn with_backoff_cap_secs(mut self, cap: u64) -> Self {
        self.backoff_cap_secs = cap;
        self
    }

    /// Enables or disables degradation.
    #[must_use]
    pub const fn with_degradation(mut self, enabled: bool) -> Self {
        self.degradation_enabled = enabled;
        self
    }

    /// Sets the journal directory.
    #[must_use]
    pub fn with_journal_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.journal_dir = Some(dir.into());
        self
    }
}

/// Transaction lifecycle states. Terminal states do not transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// In flight.
    Pending,
    /// Applied and durable.
    Committed,
    /// Undone, automatically or by repair.
    RolledBack,
    /// Terminal failure after exhausted retries.
    Failed,
}

impl TransactionStatus {
    const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// One journal record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction id (UUID v4).
    pub id: String,
    /// Start timestamp (Unix epoch seconds).
    pub start_ts: i64,
    /// Operation name.
    pub operation: String,
    /// Current lifecycle state.
    pub status: TransactionStatus,
    /// Caller-supplied input checksum, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum_of_input: Option<String>,
    /// Payload kept for rollback audit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback_payload: Option<serde_json::Value>,
    /// Wall-clock duration in milliseconds, set on commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Recovery actions taken (`retry`, `degrade`, `stale_rollback`, …).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recovery_actions: Vec<String>,
}

/// Bounded in-memory journal with optional on-disk mirroring.
pub struct TransactionJournal {
    records: Mutex<VecDeque<TransactionRecord>>,
    capacity: usize,
    dir: Option<PathBuf>,
}

impl TransactionJournal {
    /// Creates a journal bounded to `capacity` records.
    #[must_use]
    pub fn new(capacity: usize, dir: Option<PathBuf>) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(16),
            dir,
        }
    }

    /// Opens a pending record and returns its id.
    pub fn begin(
        &self,
        operation: &str,
        checksum_of_input: Option<String>,
        rollback_payload: Option<serde_json::Value>,
    ) -> String {
        let record = TransactionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            start_ts: current_timestamp(),
            operation: operation.to_string(),
            status: TransactionStatus::Pending,
            checksum_of_input,
            rollback_payload,
            duration_ms: None,
            recovery_actions: Vec::new(),
        };
        let id = record.id.clone();
        let mut records = lock(&self.records);
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
        id
    }

    /// Transitions a pending record to a terminal state.
    ///
    /// Terminal records are left untouched: the state machine has no
    /// transitions out of `committed`, `rolled_back`, or `failed`.
    pub fn transition(&self, id: &str, status: TransactionStatus, duration_ms: Option<u64>) {
        let mut records = lock(&self.records);
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return;
        };
        if record.status.is_terminal() {
            tracing::warn!(id, ?status, current = ?record.status, "ignoring transition out of terminal state");
            return;
        }
        record.status = status;
        if duration_ms.is_some() {
            record.duration_ms = duration_ms;
        }
        if status.is_terminal() && self.dir.is_some() {
            let snapshot = record.clone();
            drop(records);
            self.persist(&snapshot);
        }
    }

    /// Appends a recovery action note to a record.
    pub fn record_recovery(&self, id: &str, action: &str) {
        let mut records = lock(&self.records);
        if let Some(record) = records.iter_mut().find(|r| r.id == id) {
            record.recovery_actions.push(action.to_string());
        }
    }

    /// Returns a snapshot of a record.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TransactionRecord> {
        lock(&self.records).iter().find(|r| r.id == id).cloned()
    }

    /// Returns the most recent records, newest last.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<TransactionRecord> {
        let records = lock(&self.records);
        records
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    /// Rolls back pending records older than `max_age_secs`.
    ///
    /// Returns the ids repaired.
    pub fn repair_stale(&self, max_age_secs: i64) -> Vec<String> {
        let now = current_timestamp();
        let stale: Vec<String> = {
            let records = lock(&self.records);
            records
                .iter()
                .filter(|r| r.status == TransactionStatus::Pending && now - r.start_ts > max_age_secs)
                .map(|r| r.id.clone())
                .collect()
        };
        for id in &stale {
            self.record_recovery(id, "stale_rollback");
            self.transition(id, TransactionStatus::RolledBack, None);
            tracing::warn!(id, "rolled back stale pending transaction");
        }
        if !stale.is_empty() {
            metrics::counter!("resilience_stale_rollbacks_total").increment(stale.len() as u64);
        }
        stale
    }

    /// Rolls back every still-pending record. Shutdown path.
    pub fn rollback_active(&self) -> usize {
        let pending: Vec<String> = {
            let records = lock(&self.records);
            records
                .iter()
                .filter(|r| r.status == TransactionStatus::Pending)
                .map(|r| r.id.clone())
                .collect()
        };
        for id in &pending {
            self.transition(id, TransactionStatus::RolledBack, None);
        }
        pending.len()
    }

    /// Flushes every record to the journal directory, if configured.
    pub fn flush(&self) {
        if self.dir.is_none() {
            return;
        }
        let snapshot: Vec<TransactionRecord> = lock(&self.records).iter().cloned().collect();
        for record in &snapshot {
            self.persist(record);
        }
    }

    fn persist(&self, record: &TransactionRecord) {
        let Some(dir) = &self.dir else {
            return;
        };
        if let Err(e) = append_record(dir, record) {
            tracing::warn!(error = %e, "failed to persist transaction record");
        }
    }
}

fn append_record(dir: &std::path::Path, record: &TransactionRecord) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let line = serde_json::to_string(record).unwrap_or_default();
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("transactions.jsonl"))?;
    writeln!(file, "{line}")
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ============================================================================
// Write gate
// ============================================================================

/// Verdict of [`WriteGate::admit`] for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Normal service.
    Pass,
    /// Locked out, but this call is granted as a recovery probe.
    Probe,
    /// Locked out; the caller should retry after roughly this long.
    Locked {
        /// Time remaining on the current cooldown.
        retry_in: Duration,
    },
}

/// Health gate over the single write path.
///
/// Tracks the run of transient failures the resilience layer reports. When
/// the run reaches `gate_failure_run`, new transactions are locked out for a
/// cooldown; after it expires, `gate_probe_budget` probes are admitted. A
/// committed probe restores service and resets the cooldown to its base; a
/// failed probe re-locks with the cooldown doubled up to
/// `gate_max_cooldown_ms`, backing off a store that stays broken.
#[derive(Debug)]
pub struct WriteGate {
    failure_run: u32,
    failure_run_limit: u32,
    /// Deadline of the active lockout; `None` while passing.
    locked_until: Option<Instant>,
    /// Cooldown the next lockout will use. Escalates, then resets on commit.
    next_cooldown: Duration,
    base_cooldown: Duration,
    max_cooldown: Duration,
    probes_left: u32,
    probe_budget: u32,
    /// Lifetime count of lockouts, for stats.
    lockouts: u64,
}

impl WriteGate {
    fn new(config: &ResilienceConfig) -> Self {
        let base = Duration::from_millis(config.gate_base_cooldown_ms);
        Self {
            failure_run: 0,
            failure_run_limit: config.gate_failure_run.max(1),
            locked_until: None,
            next_cooldown: base,
            base_cooldown: base,
            max_cooldown: Duration::from_millis(
                config.gate_max_cooldown_ms.max(config.gate_base_cooldown_ms),
            ),
            probes_left: 0,
            probe_budget: config.gate_probe_budget.max(1),
            lockouts: 0,
        }
    }

    /// Decides whether a new transaction may start.
    pub fn admit(&mut self) -> GateDecision {
        let Some(deadline) = self.locked_until else {
            return GateDecision::Pass;
        };
        let now = Instant::now();
        if now < deadline {
            return GateDecision::Locked {
                retry_in: deadline - now,
            };
        }
        // Cooldown over: spend one probe; further callers wait for its verdict
        if self.probes_left == 0 {
            return GateDecision::Locked {
                retry_in: Duration::ZERO,
            };
        }
        self.probes_left -= 1;
        tracing::info!("write gate admitting recovery probe");
        GateDecision::Probe
    }

    /// A transaction committed: restore full service.
    pub fn on_commit(&mut self) {
        if self.locked_until.is_some() {
            tracing::info!("write gate reopened after successful probe");
        }
        self.failure_run = 0;
        self.locked_until = None;
        self.next_cooldown = self.base_cooldown;
        self.probes_left = 0;
    }

    /// A transient failure happened. Returns `true` if this locked the gate.
    pub fn on_transient_failure(&mut self) -> bool {
        self.failure_run += 1;
        let relocking = self.locked_until.is_some();
        if !relocking && self.failure_run < self.failure_run_limit {
            return false;
        }

        let cooldown = self.next_cooldown;
        self.locked_until = Some(Instant::now() + cooldown);
        self.probes_left = self.probe_budget;
        self.next_cooldown = (cooldown * 2).min(self.max_cooldown);
        self.lockouts += 1;
        tracing::warn!(
            failure_run = self.failure_run,
            cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
            relocking,
            "write gate locked after transient failures"
        );
        true
    }

    /// Whether the gate currently refuses non-probe transactions.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked_until
            .is_some_and(|deadline| Instant::now() < deadline || self.probes_left == 0)
    }

    /// Lifetime lockout count.
    #[must_use]
    pub const fn lockouts(&self) -> u64 {
        self.lockouts
    }
}

// ============================================================================
// Resilience layer
// ============================================================================

/// Wraps write transactions with journaling, retry, degradation, and the
/// write gate.
pub struct ResilienceLayer {
    config: ResilienceConfig,
    journal: TransactionJournal,
    gate: Mutex<WriteGate>,
}

impl ResilienceLayer {
    /// Creates a resilience layer.
    #[must_use]
    pub fn new(config: ResilienceConfig) -> Self {
        let journal = TransactionJournal::new(config.journal_capacity, config.journal_dir.clone());
        let gate = Mutex::new(WriteGate::new(&config));
        Self {
            config,
            journal,
            gate,
        }
    }

    /// Returns the journal for inspection and the rollback tool.
    #[must_use]
    pub const fn journal(&self) -> &TransactionJournal {
        &self.journal
    }

    /// Whether the write gate currently refuses transactions.
    #[must_use]
    pub fn gate_locked(&self) -> bool {
        lock_gate(&self.gate).is_locked()
    }

    /// Runs `f` under the full resilience policy.
    ///
    /// Transient failures retry up to `max_retries` with `2^n`-second capped
    /// backoff. When retries are exhausted and degradation is enabled,
    /// `fallback` (if provided) is returned and a `degrade` recovery action
    /// recorded; otherwise the error surfaces. Semantic errors never retry.
    pub fn execute<T, F>(
        &self,
        operation: &str,
        input_checksum: Option<String>,
        fallback: Option<T>,
        f: F,
    ) -> Result<T>
    where
        F: Fn() -> Result<T>,
    {
        let decision = lock_gate(&self.gate).admit();
        if let GateDecision::Locked { retry_in } = decision {
            metrics::counter!("resilience_gate_rejections_total").increment(1);
            tracing::debug!(
                operation,
                retry_in_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX),
                "write gate rejected transaction"
            );
            return Err(Error::CircuitOpen {
                operation: operation.to_string(),
            });
        }

        let id = self.journal.begin(operation, input_checksum, None);
        if decision == GateDecision::Probe {
            self.journal.record_recovery(&id, "probe");
        }
        let start = Instant::now();

        let mut attempt: u32 = 0;
        loop {
            match f() {
                Ok(value) => {
                    lock_gate(&self.gate).on_commit();
                    let duration = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                    self.journal
                        .transition(&id, TransactionStatus::Committed, Some(duration));
                    metrics::counter!("resilience_transactions_total", "status" => "committed")
                        .increment(1);
                    return Ok(value);
                },
                Err(e) if !e.is_transient() => {
                    // Semantic failure: the store already rolled back
                    self.journal.transition(&id, TransactionStatus::RolledBack, None);
                    metrics::counter!("resilience_transactions_total", "status" => "rolled_back")
                        .increment(1);
                    return Err(e);
                },
                Err(e) => {
                    let locked = lock_gate(&self.gate).on_transient_failure();
                    if locked {
                        metrics::counter!("resilience_gate_lockouts_total").increment(1);
                    }
                    if attempt < self.config.max_retries {
                        let backoff = 2_u64
                            .saturating_pow(attempt)
                            .min(self.config.backoff_cap_secs);
                        tracing::warn!(
                            operation,
                            attempt,
                            backoff_secs = backoff,
                            error = %e,
                            "transient write failure, retrying"
                        );
                        self.journal.record_recovery(&id, "retry");
                        if backoff > 0 {
                            std::thread::sleep(Duration::from_secs(backoff));
                        }
                        attempt += 1;
                        continue;
                    }
                    if self.config.degradation_enabled && fallback.is_some() {
                        self.journal.record_recovery(&id, "degrade");
                        self.journal.transition(&id, TransactionStatus::RolledBack, None);
                        metrics::counter!("resilience_degradations_total").increment(1);
                        tracing::error!(
                            operation,
                            error = %e,
                            "retries exhausted, returning degraded fallback"
                        );
                        return fallback.ok_or(e);
                    }
                    self.journal.transition(&id, TransactionStatus::Failed, None);
                    metrics::counter!("resilience_transactions_total", "status" => "failed")
                        .increment(1);
                    return Err(e);
                },
            }
        }
    }

    /// Rolls back pending transactions older than the configured age.
    pub fn repair_stale(&self) -> Vec<String> {
        self.journal.repair_stale(self.config.stale_txn_age_secs)
    }

    /// Manually rolls back a pending transaction by id.
    pub fn rollback_transaction(&self, id: &str) -> Result<()> {
        match self.journal.get(id) {
            Some(record) if record.status == TransactionStatus::Pending => {
                self.journal.record_recovery(id, "manual_rollback");
                self.journal.transition(id, TransactionStatus::RolledBack, None);
                Ok(())
            },
            Some(_) => Err(Error::Transaction(TransactionError::NoActive)),
            None => Err(Error::Transaction(TransactionError::NoActive)),
        }
    }

    /// Shutdown: roll back in-flight transactions and flush the journal.
    pub fn shutdown(&self) {
        let rolled_back = self.journal.rollback_active();
        if rolled_back > 0 {
            tracing::warn!(rolled_back, "rolled back in-flight transactions at shutdown");
        }
        self.journal.flush();
    }
}

fn lock_gate(mutex: &Mutex<WriteGate>) -> std::sync::MutexGuard<'_, WriteGate> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config() -> ResilienceConfig {
        ResilienceConfig::default()
            .with_max_retries(2)
            .with_backoff_cap_secs(0)
    }

    #[test]
    fn test_success_commits_journal_record() {
        let layer = ResilienceLayer::new(fast_config());
        let result = layer.execute("op", None, None, || Ok(42));
        assert_eq!(result.unwrap(), 42);

        let records = layer.journal().recent(10);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, TransactionStatus::Committed);
        assert!(records[0].duration_ms.is_some());
    }

    #[test]
    fn test_transient_errors_retry_then_succeed() {
        let layer = ResilienceLayer::new(fast_config());
        let calls = AtomicU32::new(0);
        let result = layer.execute("op", None, None, || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::OperationFailed {
                    operation: "op".to_string(),
                    cause: "flaky".to_string(),
                })
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let record = &layer.journal().recent(1)[0];
        assert_eq!(record.status, TransactionStatus::Committed);
        assert_eq!(record.recovery_actions, vec!["retry", "retry"]);
    }

    #[test]
    fn test_semantic_errors_do_not_retry() {
        let layer = ResilienceLayer::new(fast_config());
        let calls = AtomicU32::new(0);
        let result: Result<()> = layer.execute("op", None, None, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::EntityNotFound {
                name: "x".to_string(),
                context: "c".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            layer.journal().recent(1)[0].status,
            TransactionStatus::RolledBack
        );
    }

    #[test]
    fn test_degradation_returns_fallback() {
        let layer = ResilienceLayer::new(fast_config());
        let result = layer.execute("op", None, Some("fallback"), || {
            Err(Error::OperationFailed {
                operation: "op".to_string(),
                cause: "down".to_string(),
            })
        });
        assert_eq!(result.unwrap(), "fallback");

        let record = &layer.journal().recent(1)[0];
        assert!(record.recovery_actions.contains(&"degrade".to_string()));
        assert_eq!(record.status, TransactionStatus::RolledBack);
    }

    #[test]
    fn test_exhaustion_without_fallback_fails() {
        let config = fast_config().with_degradation(false);
        let layer = ResilienceLayer::new(config);
        let result: Result<()> = layer.execute("op", None, None, || {
            Err(Error::OperationFailed {
                operation: "op".to_string(),
                cause: "down".to_string(),
            })
        });
        assert!(result.is_err());
        assert_eq!(layer.journal().recent(1)[0].status, TransactionStatus::Failed);
    }

    fn gated_config(failure_run: u32, base_cooldown_ms: u64) -> ResilienceConfig {
        ResilienceConfig {
            max_retries: 0,
            backoff_cap_secs: 0,
            degradation_enabled: false,
            gate_failure_run: failure_run,
            gate_base_cooldown_ms: base_cooldown_ms,
            gate_max_cooldown_ms: base_cooldown_ms.max(1) * 8,
            gate_probe_budget: 1,
            ..ResilienceConfig::default()
        }
    }

    fn transient() -> Error {
        Error::OperationFailed {
            operation: "op".to_string(),
            cause: "down".to_string(),
        }
    }

    #[test]
    fn test_gate_locks_and_rejects() {
        let layer = ResilienceLayer::new(gated_config(2, 60_000));
        for _ in 0..2 {
            let _: Result<()> = layer.execute("op", None, None, || Err(transient()));
        }
        assert!(layer.gate_locked());

        let result: Result<()> = layer.execute("op", None, None, || Ok(()));
        assert_eq!(result.unwrap_err().kind(), "circuit_open");
    }

    #[test]
    fn test_probe_commit_reopens_gate() {
        // Zero cooldown: the lockout expires immediately, so the next call
        // is admitted as a probe
        let layer = ResilienceLayer::new(gated_config(1, 0));
        let _: Result<()> = layer.execute("op", None, None, || Err(transient()));

        let result = layer.execute("op", None, None, || Ok("recovered"));
        assert_eq!(result.unwrap(), "recovered");
        assert!(!layer.gate_locked());

        let record = &layer.journal().recent(1)[0];
        assert!(record.recovery_actions.contains(&"probe".to_string()));
        assert_eq!(record.status, TransactionStatus::Committed);
    }

    #[test]
    fn test_failed_probe_escalates_cooldown() {
        let config = gated_config(1, 50);
        let mut gate = WriteGate::new(&config);

        assert!(gate.on_transient_failure());
        assert_eq!(gate.lockouts(), 1);
        std::thread::sleep(Duration::from_millis(60));

        // Cooldown expired: one probe is granted, further callers wait
        assert_eq!(gate.admit(), GateDecision::Probe);
        assert!(matches!(gate.admit(), GateDecision::Locked { .. }));

        // The probe fails: re-locked, and the next cooldown doubled
        assert!(gate.on_transient_failure());
        assert_eq!(gate.lockouts(), 2);
        std::thread::sleep(Duration::from_millis(60));
        // 100ms cooldown is still running after 60ms
        assert!(matches!(gate.admit(), GateDecision::Locked { .. }));

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(gate.admit(), GateDecision::Probe);
        gate.on_commit();
        assert_eq!(gate.admit(), GateDecision::Pass);
    }

    #[test]
    fn test_cooldown_caps_at_configured_maximum() {
        let config = ResilienceConfig {
            gate_failure_run: 1,
            gate_base_cooldown_ms: 100,
            gate_max_cooldown_ms: 250,
            ..ResilienceConfig::default()
        };
        let mut gate = WriteGate::new(&config);
        for _ in 0..6 {
            gate.on_transient_failure();
        }
        assert!(gate.next_cooldown <= Duration::from_millis(250));
    }

    #[test]
    fn test_semantic_failures_do_not_feed_the_gate() {
        let layer = ResilienceLayer::new(gated_config(1, 60_000));
        for _ in 0..5 {
            let _: Result<()> = layer.execute("op", None, None, || {
                Err(Error::EntityNotFound {
                    name: "x".to_string(),
                    context: "c".to_string(),
                })
            });
        }
        assert!(!layer.gate_locked());
        let result = layer.execute("op", None, None, || Ok(()));
        assert!(result.is_ok());
    }

    #[test]
    fn test_stale_repair_rolls_back_old_pending() {
        let journal = TransactionJournal::new(64, None);
        let id = journal.begin("op", None, None);
        // Fresh records are untouched
        assert!(journal.repair_stale(300).is_empty());
        // Backdate the record
        {
            let mut records = lock(&journal.records);
            records[0].start_ts -= 1000;
        }
        let repaired = journal.repair_stale(300);
        assert_eq!(repaired, vec![id.clone()]);
        assert_eq!(journal.get(&id).unwrap().status, TransactionStatus::RolledBack);
    }

    #[test]
    fn test_terminal_states_do_not_transition() {
        let journal = TransactionJournal::new(64, None);
        let id = journal.begin("op", None, None);
        journal.transition(&id, TransactionStatus::Committed, Some(5));
        journal.transition(&id, TransactionStatus::Failed, None);
        assert_eq!(journal.get(&id).unwrap().status, TransactionStatus::Committed);
    }

    #[test]
    fn test_manual_rollback_requires_pending() {
        let layer = ResilienceLayer::new(fast_config());
        let _ = layer.execute("op", None, None, || Ok(()));
        let id = layer.journal().recent(1)[0].id.clone();
        let err = layer.rollback_transaction(&id).unwrap_err();
        assert_eq!(err.kind(), "transaction");

        let pending_id = layer.journal().begin("manual", None, None);
        layer.rollback_transaction(&pending_id).unwrap();
    }

    #[test]
    fn test_checksum_verify() {
        let payload = serde_json::json!({"entities": ["a", "b"]});
        let digest = checksum_of(&payload).unwrap();
        verify_input(&digest, &payload).unwrap();
        let err = verify_input(&digest, &serde_json::json!({"entities": []})).unwrap_err();
        assert_eq!(err.kind(), "data_corruption");
    }

    #[test]
    fn test_shutdown_rolls_back_in_flight() {
        let layer = ResilienceLayer::new(fast_config());
        let id = layer.journal().begin("op", None, None);
        layer.shutdown();
        assert_eq!(layer.journal().get(&id).unwrap().status, TransactionStatus::RolledBack);
    }
}
