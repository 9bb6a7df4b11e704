use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{validate_key, RecordStore, StoreError};

/// In-process record store with the same semantics as [`super::FileStore`].
///
/// Clones share the same records, which lets tests simulate several agent
/// processes talking through one store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, contents: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.records
            .lock()
            .await
            .insert(key.to_string(), contents.to_vec());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> Result<bool, StoreError> {
        validate_key(key)?;
        let mut records = self.records.lock().await;
        if records.get(key) != expected.as_ref() {
            return Ok(false);
        }

        match new {
            Some(contents) => {
                records.insert(key.to_string(), contents);
            }
            None => {
                records.remove(key);
            }
        }
        Ok(true)
    }

    async fn append(&self, key: &str, contents: &[u8]) -> Result<(), StoreError> {
        validate_key(key)?;
        self.records
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .extend_from_slice(contents);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        validate_key(key)?;
        Ok(self
            .records
            .lock()
            .await
            .get_mut(key)
            .map(std::mem::take))
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StoreError> {
        validate_key(dir)?;
        let prefix = format!("{dir}/");
        Ok(self
            .records
            .lock()
            .await
            .keys()
            .filter(|k| {
                k.strip_prefix(&prefix)
                    .map(|rest| !rest.is_empty() && !rest.contains('/'))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
