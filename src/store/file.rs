use async_trait::async_trait;
use fd_lock::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{validate_key, RecordStore, StoreError, GUARD_DIR};

/// Record store backed by a shared directory.
///
/// Each record `key` lives at `<root>/<key>`. Mutations take an exclusive
/// `fd-lock` on `<root>/.guards/<key>.guard` for their duration, so every
/// process using this store sees compare-and-swap, append and take as atomic.
/// Replacements go through a temp file and `rename`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root and guard directories if they are missing
    pub fn ensure_root(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.root.join(GUARD_DIR)).map_err(|e| StoreError::io(GUARD_DIR, e))
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn guard_path(&self, key: &str) -> PathBuf {
        self.root.join(GUARD_DIR).join(format!("{key}.guard"))
    }

    fn open_guard(&self, key: &str) -> Result<RwLock<File>, StoreError> {
        let guard_path = self.guard_path(key);
        if let Some(parent) = guard_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(key, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&guard_path)
            .map_err(|e| StoreError::io(key, e))?;
        Ok(RwLock::new(file))
    }

    fn with_exclusive<R>(
        &self,
        key: &str,
        f: impl FnOnce(&Path) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let path = self.path_for(key)?;
        let mut guard = self.open_guard(key)?;
        let _held = guard.write().map_err(|e| StoreError::Guard {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        f(&path)
    }

    fn with_shared<R>(
        &self,
        key: &str,
        f: impl FnOnce(&Path) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        let path = self.path_for(key)?;
        let guard = self.open_guard(key)?;
        let _held = guard.read().map_err(|e| StoreError::Guard {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        f(&path)
    }

    async fn blocking<R, F>(&self, key: &str, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&FileStore, &str) -> Result<R, StoreError> + Send + 'static,
    {
        let store = self.clone();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || f(&store, &owned_key))
            .await
            .map_err(|e| StoreError::Guard {
                key: key.to_string(),
                reason: e.to_string(),
            })?
    }

    fn read_blocking(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_shared(key, |path| read_file(path).map_err(|e| StoreError::io(key, e)))
    }

    fn write_blocking(&self, key: &str, contents: &[u8]) -> Result<(), StoreError> {
        self.with_exclusive(key, |path| {
            replace_file(path, contents).map_err(|e| StoreError::io(key, e))
        })
    }

    fn compare_and_swap_blocking(
        &self,
        key: &str,
        expected: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<bool, StoreError> {
        self.with_exclusive(key, |path| {
            let current = read_file(path).map_err(|e| StoreError::io(key, e))?;
            if current.as_deref() != expected {
                return Ok(false);
            }

            match new {
                Some(contents) => replace_file(path, contents),
                None => match fs::remove_file(path) {
                    Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                },
            }
            .map_err(|e| StoreError::io(key, e))?;
            Ok(true)
        })
    }

    fn append_blocking(&self, key: &str, contents: &[u8]) -> Result<(), StoreError> {
        self.with_exclusive(key, |path| {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| StoreError::io(key, e))?;
            }
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| StoreError::io(key, e))?;
            file.write_all(contents).map_err(|e| StoreError::io(key, e))
        })
    }

    fn take_blocking(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.with_exclusive(key, |path| {
            let current = read_file(path).map_err(|e| StoreError::io(key, e))?;
            if current.is_some() {
                OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .open(path)
                    .map_err(|e| StoreError::io(key, e))?;
            }
            Ok(current)
        })
    }

    fn list_blocking(&self, dir: &str) -> Result<Vec<String>, StoreError> {
        let path = self.path_for(dir)?;
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(dir, e)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(dir, e))?;
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            // Temp files from in-flight replacements start with '.'
            if is_file && !name.starts_with('.') {
                keys.push(format!("{dir}/{name}"));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn read_file(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn replace_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
    {
        let mut file = File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[async_trait]
impl RecordStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.blocking(key, |store, key| store.read_blocking(key)).await
    }

    async fn write(&self, key: &str, contents: &[u8]) -> Result<(), StoreError> {
        let contents = contents.to_vec();
        self.blocking(key, move |store, key| store.write_blocking(key, &contents))
            .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Option<Vec<u8>>,
    ) -> Result<bool, StoreError> {
        self.blocking(key, move |store, key| {
            store.compare_and_swap_blocking(key, expected.as_deref(), new.as_deref())
        })
        .await
    }

    async fn append(&self, key: &str, contents: &[u8]) -> Result<(), StoreError> {
        let contents = contents.to_vec();
        self.blocking(key, move |store, key| store.append_blocking(key, &contents))
            .await
    }

    async fn take(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.blocking(key, |store, key| store.take_blocking(key)).await
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>, StoreError> {
        self.blocking(dir, |store, dir| store.list_blocking(dir)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("shared"));
        store.ensure_root().unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_read_missing_record() {
        let (_dir, store) = setup_store();
        assert_eq!(store.read("registry.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_creates_parent_directories() {
        let (_dir, store) = setup_store();
        store.write("archive/index.jsonl", b"{}\n").await.unwrap();
        assert_eq!(
            store.read("archive/index.jsonl").await.unwrap().as_deref(),
            Some(&b"{}\n"[..])
        );
        assert!(store.root().join("archive/index.jsonl").exists());
    }

    #[tokio::test]
    async fn test_compare_and_swap_create_if_absent() {
        let (_dir, store) = setup_store();
        assert!(store
            .compare_and_swap("locks/a.lock", None, Some(b"first".to_vec()))
            .await
            .unwrap());
        assert!(!store
            .compare_and_swap("locks/a.lock", None, Some(b"second".to_vec()))
            .await
            .unwrap());
        assert_eq!(
            store.read("locks/a.lock").await.unwrap(),
            Some(b"first".to_vec())
        );
    }

    #[tokio::test]
    async fn test_compare_and_swap_delete_only_when_unchanged() {
        let (_dir, store) = setup_store();
        store.write("locks/a.lock", b"holder-1").await.unwrap();

        assert!(!store
            .compare_and_swap("locks/a.lock", Some(b"holder-2".to_vec()), None)
            .await
            .unwrap());
        assert!(store.read("locks/a.lock").await.unwrap().is_some());

        assert!(store
            .compare_and_swap("locks/a.lock", Some(b"holder-1".to_vec()), None)
            .await
            .unwrap());
        assert!(store.read("locks/a.lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_then_take_truncates() {
        let (_dir, store) = setup_store();
        store.append("messages.jsonl", b"one\n").await.unwrap();
        store.append("messages.jsonl", b"two\n").await.unwrap();

        let taken = store.take("messages.jsonl").await.unwrap();
        assert_eq!(taken, Some(b"one\ntwo\n".to_vec()));
        assert_eq!(store.read("messages.jsonl").await.unwrap(), Some(Vec::new()));
        assert_eq!(store.take("missing.jsonl").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_skips_temp_and_guard_files() {
        let (_dir, store) = setup_store();
        store.write("locks/b.lock", b"b").await.unwrap();
        store.write("locks/a.lock", b"a").await.unwrap();
        fs::write(store.root().join("locks/.a.lock.1.tmp"), b"x").unwrap();

        let keys = store.list("locks").await.unwrap();
        assert_eq!(keys, vec!["locks/a.lock", "locks/b.lock"]);
        assert!(store.list("nothing-here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, store) = setup_store();
        let err = store.write("../outside.json", b"x").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }

    #[test]
    fn test_concurrent_compare_and_swap_from_threads() {
        let (_dir, store) = setup_store();
        let threads = 8;
        let increments = 10;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..increments {
                        loop {
                            let current = store.read_blocking("counter").unwrap();
                            let value: u32 = current
                                .as_deref()
                                .map(|b| String::from_utf8_lossy(b).parse().unwrap())
                                .unwrap_or(0);
                            let next = (value + 1).to_string().into_bytes();
                            if store
                                .compare_and_swap_blocking("counter", current.as_deref(), Some(&next))
                                .unwrap()
                            {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let final_value = store.read_blocking("counter").unwrap().unwrap();
        assert_eq!(
            String::from_utf8_lossy(&final_value),
            (threads * increments).to_string()
        );
    }
}
