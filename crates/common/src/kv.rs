//! Key-value persistence capability
//!
//! Two scopes share this shape: a short-lived scope holding the session
//! record (`MemoryStore`, gone when the process ends) and a durable scope for
//! favorites and recent conversions (`FileStore`, survives restarts).
//!
//! Neither scope is transactional. Two stores pointed at the same file are
//! last-writer-wins.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Boxed future returned by `KeyValueStore` methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// String-keyed, string-valued persistence.
///
/// Uses `Pin<Box<dyn Future>>` return types so stores can be shared as
/// `Arc<dyn KeyValueStore>`.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

    fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()>;

    fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;
}

/// In-process store. Contents vanish with the value.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move { Ok(self.entries.lock().await.get(key).cloned()) })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.insert(key.to_string(), value);
            Ok(())
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.remove(key);
            Ok(())
        })
    }
}

/// Store backed by a single JSON object file.
///
/// Every operation re-reads the file so writes from another process are
/// observed. The Mutex only serializes read-modify-write cycles within this
/// instance.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<String, String>> {
        if !tokio::fs::try_exists(&self.path).await? {
            return Ok(HashMap::new());
        }
        let contents = tokio::fs::read_to_string(&self.path).await?;
        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("parsing {}: {e}", self.path.display())))
    }

    /// Read for a mutation. A corrupt file is replaced rather than blocking
    /// every future write.
    async fn read_for_write(&self) -> Result<HashMap<String, String>> {
        match self.read_all().await {
            Ok(entries) => Ok(entries),
            Err(Error::Storage(msg)) => {
                warn!(path = %self.path.display(), error = %msg, "discarding corrupt store file");
                Ok(HashMap::new())
            }
            Err(e) => Err(e),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            Ok(self.read_all().await?.remove(key))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut entries = self.read_for_write().await?;
            entries.insert(key.to_string(), value);
            write_atomic(&self.path, &entries).await
        })
    }

    fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let _guard = self.lock.lock().await;
            let mut entries = self.read_for_write().await?;
            if entries.remove(key).is_some() {
                write_atomic(&self.path, &entries).await?;
            }
            Ok(())
        })
    }
}

/// Write the store file atomically.
///
/// Writes to a temporary file in the same directory, then renames it over
/// the target. Sets 0600 on unix since the file may hold user data.
async fn write_atomic(path: &Path, data: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Storage(format!("serializing store: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("store path has no parent directory".into()))?;
    tokio::fs::create_dir_all(dir).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".into());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes()).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms).await?;
    }

    tokio::fs::rename(&tmp_path, path).await?;

    debug!(path = %path.display(), keys = data.len(), "persisted store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_get_set_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v1".into()).await.unwrap();
        store.set("k", "v2".into()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));

        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.json");

        let store = FileStore::new(path.clone());
        store.set("favorites", "[]".into()).await.unwrap();

        let reopened = FileStore::new(path);
        assert_eq!(
            reopened.get("favorites").await.unwrap().as_deref(),
            Some("[]")
        );
    }

    #[tokio::test]
    async fn file_store_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get("anything").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_corrupt_file_errors_on_read_but_recovers_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let store = FileStore::new(path);
        let err = store.get("k").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)), "got: {err:?}");

        store.set("k", "v".into()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn file_store_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("durable.json");
        let store = FileStore::new(path.clone());
        store.set("k", "v".into()).await.unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("durable.json");
        let store = FileStore::new(path.clone());
        store.set("k", "v".into()).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "store file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn file_store_remove_absent_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("durable.json"));
        store.remove("never-set").await.unwrap();
    }
}
