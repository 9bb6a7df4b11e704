//! Shared record store
//!
//! Every piece of coordination state lives in a named record inside a
//! shared store. Components never touch the filesystem directly; they are
//! handed an `Arc<dyn RecordStore>` so tests can swap in [`MemoryStore`] or
//! a `MockRecordStore`.
//!
//! Keys are relative, `/`-separated paths such as `registry.json` or
//! `locks/build.lock`.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Component, Path};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, warn};

use crate::error::{CoordinationError, CoordinationResult};

#[cfg(test)]
use mockall::automock;

/// Directory (relative to the store root) holding per-record guard files
pub const GUARD_DIR: &str = ".guards";

/// Well-known record keys
pub mod keys {
    pub const REGISTRY: &str = "registry.json";
    pub const MESSAGES: &str = "messages.jsonl";
    pub const ARCHIVE_DIR: &str = "archive";
    pub const ARCHIVE_INDEX: &str = "archive/index.jsonl";
    pub const LOCK_DIR: &str = "locks";
    pub const TASKS: &str = "tasks.json";

    /// Key of the marker protecting `resource`.
    ///
    /// Characters outside `[A-Za-z0-9._-]` are percent-escaped so distinct
    /// resources never collapse onto the same marker.
    pub fn lock_key(resource: &str) -> String {
        let mut escaped = String::with_capacity(resource.len());
        for byte in resource.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' => escaped.push(byte as char),
                b'.' if !escaped.is_empty() => escaped.push('.'),
                _ => escaped.push_str(&format!("%{byte:02X}")),
            }
        }
        format!("{LOCK_DIR}/{escaped}.lock")
    }

    pub fn archive_key(stamp: &str) -> String {
        format!("{ARCHIVE_DIR}/messages-{stamp}.jsonl")
    }
}

/// Errors raised by store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid record key: {0}")]
    InvalidKey(String),

    #[error("failed to guard record {key}: {reason}")]
    Guard { key: String, reason: String },
}

impl StoreError {
    pub(crate) fn io(key: &str, source: std::io::Error) -> Self {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// Primitive operations over named records.
///
/// `compare_and_swap` is the only conditional write: it replaces the record
/// with `new` (deleting it when `new` is `None`) only if the stored bytes
/// still equal `expected` (`None` meaning "absent"), and reports whether the
/// swap happened. Create-if-absent and delete-if-unchanged are both
/// expressed through it.
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a record, `None` if it does not exist
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Overwrite a record unconditionally
    async fn write(&self, key: &str, contents: &[u8]) -> Result<(), StoreError>;

    /// Atomically replace `expected` with `new`
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> Result<bool, StoreError>;

    /// Append bytes to a log record, creating it if needed
    async fn append(&self, key: &str, contents: &[u8]) -> Result<(), StoreError>;

    /// Read a record and truncate it to empty in one step
    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Keys of the records directly inside `dir`, sorted
    async fn list(&self, dir: &str) -> Result<Vec<String>, StoreError>;
}

/// Reject keys that could escape the store root or collide with guard files.
pub fn validate_key(key: &str) -> Result<(), StoreError> {
    let path = Path::new(key);
    let well_formed = !key.is_empty()
        && !key.contains('\\')
        && !path.is_absolute()
        && path.components().all(|c| matches!(c, Component::Normal(_)));

    if !well_formed || key == GUARD_DIR || key.starts_with(&format!("{GUARD_DIR}/")) {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Bounded retry schedule for compare-and-swap loops.
///
/// Delays double from `2 * base_delay`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    /// Single attempt, no retry
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn delays(&self) -> impl Iterator<Item = Duration> + Send {
        ExponentialBackoff::from_millis(2)
            .factor(self.base_delay.as_millis().max(1) as u64)
            .max_delay(self.max_delay)
            .take(self.max_attempts.saturating_sub(1) as usize)
    }
}

/// Decode a JSON record, falling back to `T::default()` when it is missing
/// or corrupt.
pub fn decode_record<T: DeserializeOwned + Default>(key: &str, raw: Option<&[u8]>) -> T {
    let bytes = match raw {
        Some(bytes) if !bytes.iter().all(u8::is_ascii_whitespace) => bytes,
        _ => return T::default(),
    };

    match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(e) => {
            let corrupt = CoordinationError::RecordCorrupt {
                key: key.to_string(),
                reason: e.to_string(),
            };
            warn!(key = %key, error = %corrupt, "Falling back to empty record");
            T::default()
        }
    }
}

pub fn encode_record<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec_pretty(value)
}

/// Decode a newline-delimited JSON log, skipping lines that fail to parse.
pub fn decode_log<T: DeserializeOwned>(key: &str, raw: Option<&[u8]>) -> Vec<T> {
    let Some(bytes) = raw else {
        return Vec::new();
    };

    let text = String::from_utf8_lossy(bytes);
    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str(line) {
            Ok(entry) => entries.push(entry),
            Err(_) => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(key = %key, skipped, "Skipped corrupt log entries");
    }
    entries
}

pub fn encode_log<T: Serialize>(entries: &[T]) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::new();
    for entry in entries {
        out.extend(encode_log_line(entry)?);
    }
    Ok(out)
}

pub fn encode_log_line<T: Serialize>(entry: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut line = serde_json::to_vec(entry)?;
    line.push(b'\n');
    Ok(line)
}

/// Read-modify-write a JSON record with compare-and-swap, retrying per
/// `policy` when another writer got there first.
///
/// `apply` may abort the update by returning an error; nothing is written
/// in that case. Exhausting the policy yields `VersionConflict`.
pub async fn update_record<T, R, F>(
    store: &dyn RecordStore,
    key: &str,
    policy: &RetryPolicy,
    apply: F,
) -> CoordinationResult<(T, R)>
where
    T: Serialize + DeserializeOwned + Default + Send,
    R: Send,
    F: FnMut(&mut T) -> CoordinationResult<R> + Send,
{
    update_encoded(store, key, policy, decode_record::<T>, encode_record::<T>, |_| true, apply).await
}

/// [`update_record`] that skips the write when `changed` says the outcome
/// left the record as it was.
pub async fn update_record_when<T, R, F>(
    store: &dyn RecordStore,
    key: &str,
    policy: &RetryPolicy,
    changed: fn(&R) -> bool,
    apply: F,
) -> CoordinationResult<(T, R)>
where
    T: Serialize + DeserializeOwned + Default + Send,
    R: Send,
    F: FnMut(&mut T) -> CoordinationResult<R> + Send,
{
    update_encoded(store, key, policy, decode_record::<T>, encode_record::<T>, changed, apply).await
}

/// [`update_record`] for newline-delimited logs rewritten as a whole.
pub async fn update_log<T, R, F>(
    store: &dyn RecordStore,
    key: &str,
    policy: &RetryPolicy,
    apply: F,
) -> CoordinationResult<(Vec<T>, R)>
where
    T: Serialize + DeserializeOwned + Send,
    R: Send,
    F: FnMut(&mut Vec<T>) -> CoordinationResult<R> + Send,
{
    #[allow(clippy::ptr_arg)]
    fn encode_entries<T: Serialize>(entries: &Vec<T>) -> Result<Vec<u8>, serde_json::Error> {
        encode_log(entries)
    }

    update_encoded(store, key, policy, decode_log::<T>, encode_entries::<T>, |_| true, apply).await
}

async fn update_encoded<T, R, F>(
    store: &dyn RecordStore,
    key: &str,
    policy: &RetryPolicy,
    decode: fn(&str, Option<&[u8]>) -> T,
    encode: fn(&T) -> Result<Vec<u8>, serde_json::Error>,
    changed: fn(&R) -> bool,
    mut apply: F,
) -> CoordinationResult<(T, R)>
where
    T: Send,
    R: Send,
    F: FnMut(&mut T) -> CoordinationResult<R> + Send,
{
    let mut delays = policy.delays();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let raw = store.read(key).await?;
        let mut record = decode(key, raw.as_deref());
        let outcome = apply(&mut record)?;
        if !changed(&outcome) {
            return Ok((record, outcome));
        }
        let encoded = encode(&record)?;

        if store.compare_and_swap(key, raw, Some(encoded)).await? {
            return Ok((record, outcome));
        }

        debug!(key = %key, attempt, "Record changed during update");
        match delays.next() {
            Some(delay) => tokio::time::sleep(delay).await,
            None => {
                return Err(CoordinationError::VersionConflict {
                    key: key.to_string(),
                    attempts: attempt,
                })
            }
        }
    }
}
