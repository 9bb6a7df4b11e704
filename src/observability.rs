use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Process-local coordination counters
#[derive(Debug, Default)]
pub struct CoordinationMetrics {
    pub registrations: AtomicU64,
    pub registry_write_failures: AtomicU64,
    pub messages_sent: AtomicU64,
    pub log_rotations: AtomicU64,
    pub heartbeats_compacted: AtomicU64,
    pub locks_acquired: AtomicU64,
    pub lock_timeouts: AtomicU64,
    pub stale_locks_reclaimed: AtomicU64,
    pub tasks_routed: AtomicU64,
    pub agents_cleaned: AtomicU64,
}

impl CoordinationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_registry_write_failure(&self) {
        self.registry_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        self.log_rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compaction(&self, removed: usize) {
        self.heartbeats_compacted
            .fetch_add(removed as u64, Ordering::Relaxed);
    }

    pub fn record_lock_acquired(&self) {
        self.locks_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_lock_reclaimed(&self) {
        self.stale_locks_reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tasks_routed(&self, count: usize) {
        self.tasks_routed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_agents_cleaned(&self, count: usize) {
        self.agents_cleaned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> CoordinationStats {
        CoordinationStats {
            registrations: self.registrations.load(Ordering::Relaxed),
            registry_write_failures: self.registry_write_failures.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            log_rotations: self.log_rotations.load(Ordering::Relaxed),
            heartbeats_compacted: self.heartbeats_compacted.load(Ordering::Relaxed),
            locks_acquired: self.locks_acquired.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            stale_locks_reclaimed: self.stale_locks_reclaimed.load(Ordering::Relaxed),
            tasks_routed: self.tasks_routed.load(Ordering::Relaxed),
            agents_cleaned: self.agents_cleaned.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            registrations = stats.registrations,
            registry_write_failures = stats.registry_write_failures,
            messages_sent = stats.messages_sent,
            log_rotations = stats.log_rotations,
            heartbeats_compacted = stats.heartbeats_compacted,
            locks_acquired = stats.locks_acquired,
            lock_timeouts = stats.lock_timeouts,
            stale_locks_reclaimed = stats.stale_locks_reclaimed,
            tasks_routed = stats.tasks_routed,
            agents_cleaned = stats.agents_cleaned,
            "Coordination metrics"
        );
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinationStats {
    pub registrations: u64,
    pub registry_write_failures: u64,
    pub messages_sent: u64,
    pub log_rotations: u64,
    pub heartbeats_compacted: u64,
    pub locks_acquired: u64,
    pub lock_timeouts: u64,
    pub stale_locks_reclaimed: u64,
    pub tasks_routed: u64,
    pub agents_cleaned: u64,
}

/// Global metrics instance
static COORDINATION_METRICS: std::sync::LazyLock<CoordinationMetrics> =
    std::sync::LazyLock::new(CoordinationMetrics::new);

pub fn coordination_metrics() -> &'static CoordinationMetrics {
    &COORDINATION_METRICS
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}
