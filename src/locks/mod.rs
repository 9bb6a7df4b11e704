//! Distributed mutex over lock marker records
//!
//! A marker at `locks/<resource>.lock` names its holder. Markers are
//! created with compare-and-swap against "absent", so at most one exists per
//! resource. A marker older than the staleness threshold is treated as
//! abandoned and removed by whoever tries to acquire next.
//!
//! The lock is advisory: nothing stops a process that ignores it from
//! touching the resource.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::agents::types::local_hostname;
use crate::config::LockConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::observability::coordination_metrics;
use crate::store::{encode_record, keys, RecordStore};

/// Wakes local waiters as soon as a lock is released in this process;
/// releases by other processes are picked up on the next poll tick.
static RELEASED: LazyLock<Notify> = LazyLock::new(Notify::new);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub resource: String,
    pub holder: String,
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn new(resource: &str, holder: &str) -> Self {
        Self {
            resource: resource.to_string(),
            holder: holder.to_string(),
            pid: std::process::id(),
            hostname: local_hostname(),
            acquired_at: Utc::now(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.acquired_at)
    }

    pub fn is_stale(&self, threshold: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > threshold
    }
}

#[derive(Clone)]
pub struct DistributedMutex {
    store: Arc<dyn RecordStore>,
    config: LockConfig,
    agent_id: String,
}

impl DistributedMutex {
    pub fn new(store: Arc<dyn RecordStore>, config: LockConfig, agent_id: &str) -> Self {
        Self {
            store,
            config,
            agent_id: agent_id.to_string(),
        }
    }

    /// Acquire `resource`, waiting at most `timeout` (the configured default
    /// when `None`). Fails with `LockTimeout` when the resource stays busy.
    ///
    /// The deadline only bounds the waits between attempts. A store call in
    /// flight always runs to completion, so a timed-out caller never leaves a
    /// marker behind in its own name.
    pub async fn acquire(&self, resource: &str, timeout: Option<Duration>) -> CoordinationResult<LockRecord> {
        let timeout = timeout.unwrap_or_else(|| self.config.default_timeout());
        let started = Instant::now();
        let deadline = started + timeout;
        let key = keys::lock_key(resource);
        let stale_after = self.config.stale_after();
        let poll = self.config.poll_interval();
        let mut ticker = interval_at(started + poll, poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // Register before checking so a release in between is not missed
            let released = RELEASED.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            let record = LockRecord::new(resource, &self.agent_id);
            if self
                .store
                .compare_and_swap(&key, None, Some(encode_record(&record)?))
                .await?
            {
                coordination_metrics().record_lock_acquired();
                info!(resource = %resource, agent_id = %self.agent_id, "Lock acquired");
                return Ok(record);
            }

            if let Some(raw) = self.store.read(&key).await? {
                let existing: Option<LockRecord> = serde_json::from_slice(&raw).ok();
                let abandoned = existing
                    .as_ref()
                    .is_none_or(|lock| lock.is_stale(stale_after, Utc::now()));

                if abandoned {
                    if self.store.compare_and_swap(&key, Some(raw), None).await? {
                        coordination_metrics().record_stale_lock_reclaimed();
                        warn!(
                            resource = %resource,
                            previous_holder = existing.as_ref().map(|l| l.holder.as_str()).unwrap_or("<corrupt>"),
                            "Reclaimed stale lock"
                        );
                        continue;
                    }
                    if Instant::now() < deadline {
                        continue;
                    }
                }
            } else if Instant::now() < deadline {
                // Released between our attempt and the read
                continue;
            }

            if Instant::now() >= deadline {
                return Err(self.timed_out(resource, started));
            }

            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut released => {}
                _ = tokio::time::sleep_until(deadline) => return Err(self.timed_out(resource, started)),
            }
        }
    }

    fn timed_out(&self, resource: &str, started: Instant) -> CoordinationError {
        let waited_ms = started.elapsed().as_millis() as u64;
        coordination_metrics().record_lock_timeout();
        debug!(resource = %resource, agent_id = %self.agent_id, waited_ms, "Lock still busy at deadline");
        CoordinationError::LockTimeout {
            resource: resource.to_string(),
            waited_ms,
        }
    }

    /// Release `resource` if this agent holds it. Returns whether a marker
    /// was removed.
    pub async fn release(&self, resource: &str) -> CoordinationResult<bool> {
        let key = keys::lock_key(resource);
        let Some(raw) = self.store.read(&key).await? else {
            debug!(resource = %resource, "Release of a lock nobody holds");
            return Ok(false);
        };

        match serde_json::from_slice::<LockRecord>(&raw) {
            Ok(lock) if lock.holder == self.agent_id => {}
            Ok(lock) => {
                warn!(
                    resource = %resource,
                    agent_id = %self.agent_id,
                    holder = %lock.holder,
                    "Refusing to release a lock held by another agent"
                );
                return Ok(false);
            }
            Err(_) => return Ok(false),
        }

        let released = self.store.compare_and_swap(&key, Some(raw), None).await?;
        if released {
            RELEASED.notify_waiters();
            info!(resource = %resource, agent_id = %self.agent_id, "Lock released");
        }
        Ok(released)
    }

    /// Current holder of `resource`, if any
    pub async fn holder(&self, resource: &str) -> CoordinationResult<Option<LockRecord>> {
        let raw = self.store.read(&keys::lock_key(resource)).await?;
        Ok(raw.and_then(|raw| serde_json::from_slice(&raw).ok()))
    }

    /// Every readable lock marker
    pub async fn list_locks(&self) -> CoordinationResult<Vec<LockRecord>> {
        let mut locks = Vec::new();
        for key in self.store.list(keys::LOCK_DIR).await? {
            if let Some(raw) = self.store.read(&key).await? {
                match serde_json::from_slice(&raw) {
                    Ok(lock) => locks.push(lock),
                    Err(e) => debug!(key = %key, error = %e, "Skipping unreadable lock marker"),
                }
            }
        }
        Ok(locks)
    }

    /// Run `work` while holding `resource`
    pub async fn with_lock<F, Fut, T>(
        &self,
        resource: &str,
        timeout: Option<Duration>,
        work: F,
    ) -> CoordinationResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.acquire(resource, timeout).await?;
        let output = work().await;
        if let Err(e) = self.release(resource).await {
            warn!(resource = %resource, error = %e, "Failed to release lock after use");
        }
        Ok(output)
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }
}
