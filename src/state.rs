//! Key-value state persistence
//!
//! Provides the pluggable key-value store the audit core keeps its settings
//! snapshot in, reads the startup users snapshot from, and (for stores with
//! change notifications) runs the fallback transport over.

use crate::error::{AuditError, Result};
use crate::types::{Settings, SnapshotRecord};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use uuid::Uuid;

/// Buffered change notifications per memory store
const CHANGE_CAPACITY: usize = 256;

/// Trait for key-value stores holding string values
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a value (no-op when absent)
    fn remove(&self, key: &str) -> Result<()>;

    /// Store name for logging (e.g., "memory", "file")
    fn name(&self) -> &str;

    /// Watch changes made by other contexts sharing this store
    ///
    /// Default implementation reports that notifications are unsupported.
    fn watch(&self) -> Result<StorageWatch> {
        Err(AuditError::Storage(format!(
            "{} store does not support change notifications",
            self.name()
        )))
    }
}

/// A change made to a shared store by another context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// Key that changed
    pub key: String,

    /// New value, `None` when the key was removed
    pub new_value: Option<String>,

    origin: Uuid,
}

/// Receiver of change notifications, excluding the watcher's own writes
pub struct StorageWatch {
    rx: broadcast::Receiver<StorageChange>,
    context: Uuid,
}

impl StorageWatch {
    /// Wait for the next foreign change; `None` once the store is gone
    pub async fn recv(&mut self) -> Option<StorageChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.origin == self.context => continue,
                Ok(change) => return Some(change),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Storage watch lagged, changes dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next queued foreign change without waiting
    pub fn try_recv(&mut self) -> Option<StorageChange> {
        loop {
            match self.rx.try_recv() {
                Ok(change) if change.origin == self.context => continue,
                Ok(change) => return Some(change),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Storage watch lagged, changes dropped");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

struct SharedArea {
    entries: RwLock<HashMap<String, String>>,
    changes: broadcast::Sender<StorageChange>,
}

/// In-memory key-value store with change notifications
///
/// Each handle is one context. `attach()` returns another context over the
/// same entries; a context only observes changes made by the others.
#[derive(Clone)]
pub struct MemoryKeyValueStore {
    area: Arc<SharedArea>,
    context: Uuid,
}

impl MemoryKeyValueStore {
    /// Create a new, empty store with a single context
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            area: Arc::new(SharedArea {
                entries: RwLock::new(HashMap::new()),
                changes,
            }),
            context: Uuid::new_v4(),
        }
    }

    /// Open another context over the same entries
    pub fn attach(&self) -> Self {
        Self {
            area: Arc::clone(&self.area),
            context: Uuid::new_v4(),
        }
    }

    fn notify(&self, key: &str, new_value: Option<String>) {
        // No watchers is not an error
        let _ = self.area.changes.send(StorageChange {
            key: key.to_string(),
            new_value,
            origin: self.context,
        });
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.area.entries.read().map_err(|e| {
            AuditError::Storage(format!("Failed to acquire store lock: {}", e))
        })?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let changed = {
            let mut entries = self.area.entries.write().map_err(|e| {
                AuditError::Storage(format!("Failed to acquire store lock: {}", e))
            })?;
            entries.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
        };
        if changed {
            self.notify(key, Some(value.to_string()));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let removed = {
            let mut entries = self.area.entries.write().map_err(|e| {
                AuditError::Storage(format!("Failed to acquire store lock: {}", e))
            })?;
            entries.remove(key).is_some()
        };
        if removed {
            self.notify(key, None);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }

    fn watch(&self) -> Result<StorageWatch> {
        Ok(StorageWatch {
            rx: self.area.changes.subscribe(),
            context: self.context,
        })
    }
}

/// JSON file-based key-value store
///
/// Persists all entries as one JSON object on disk. Atomic writes via
/// temp file + rename to prevent corruption. No change notifications.
pub struct FileKeyValueStore {
    path: PathBuf,
}

impl FileKeyValueStore {
    /// Create a new file store at the given path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let json = std::fs::read_to_string(&self.path)?;

        serde_json::from_str(&json).map_err(|e| {
            AuditError::Storage(format!(
                "Failed to parse store file {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn write_all(&self, entries: &HashMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        write_atomic(&self.path, json.as_bytes())?;
        tracing::debug!(path = %self.path.display(), keys = entries.len(), "Store saved");
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}

/// Write a file atomically: temp file, then rename over the target
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)?;

    Ok(())
}

#[derive(Deserialize)]
struct StoredSettings {
    paused: Option<bool>,
    limit: Option<usize>,
}

/// Load persisted settings, falling back to `defaults`
///
/// Missing keys, unreadable stores, and corrupt snapshots all yield the
/// defaults; individual missing fields take their default value.
pub fn load_settings(store: &dyn KeyValueStore, key: &str, defaults: Settings) -> Settings {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return defaults,
        Err(e) => {
            tracing::warn!(store = store.name(), error = %e, "Failed to read settings, using defaults");
            return defaults;
        }
    };

    match serde_json::from_str::<StoredSettings>(&raw) {
        Ok(stored) => Settings {
            paused: stored.paused.unwrap_or(defaults.paused),
            limit: stored.limit.unwrap_or(defaults.limit),
        },
        Err(e) => {
            tracing::debug!(error = %e, "Corrupt settings snapshot, using defaults");
            defaults
        }
    }
}

/// Persist settings as a single JSON snapshot
pub fn save_settings(store: &dyn KeyValueStore, key: &str, settings: &Settings) -> Result<()> {
    let json = serde_json::to_string(settings)?;
    store.set(key, &json)?;
    tracing::debug!(
        store = store.name(),
        paused = settings.paused,
        limit = settings.limit,
        "Settings saved"
    );
    Ok(())
}

/// Read the startup users snapshot
///
/// Anything other than a JSON array yields no records; array items that
/// are not valid records are skipped.
pub fn load_snapshot(store: &dyn KeyValueStore, key: &str) -> Vec<SnapshotRecord> {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Vec::new(),
        Err(e) => {
            tracing::warn!(store = store.name(), error = %e, "Failed to read users snapshot");
            return Vec::new();
        }
    };

    let items: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
        Ok(items) => items,
        Err(e) => {
            tracing::debug!(error = %e, "Users snapshot is not a JSON array");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<SnapshotRecord>(item) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed snapshot record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("a3s-audit-test-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_memory_store_get_set_remove() {
        let store = MemoryKeyValueStore::new();
        assert!(store.get("k").unwrap().is_none());

        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("v"));

        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
        store.remove("k").unwrap();
    }

    #[test]
    fn test_memory_store_contexts_share_entries() {
        let a = MemoryKeyValueStore::new();
        let b = a.attach();
        a.set("shared", "1").unwrap();
        assert_eq!(b.get("shared").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_watch_sees_only_foreign_changes() {
        let a = MemoryKeyValueStore::new();
        let b = a.attach();
        let mut watch_a = a.watch().unwrap();
        let mut watch_b = b.watch().unwrap();

        a.set("k", "from-a").unwrap();

        assert!(watch_a.try_recv().is_none());
        let change = watch_b.try_recv().unwrap();
        assert_eq!(change.key, "k");
        assert_eq!(change.new_value.as_deref(), Some("from-a"));

        b.remove("k").unwrap();
        let change = watch_a.try_recv().unwrap();
        assert!(change.new_value.is_none());
    }

    #[test]
    fn test_set_same_value_does_not_notify() {
        let a = MemoryKeyValueStore::new();
        let b = a.attach();
        let mut watch_b = b.watch().unwrap();

        a.set("k", "v").unwrap();
        a.set("k", "v").unwrap();

        assert!(watch_b.try_recv().is_some());
        assert!(watch_b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_watch_recv_async() {
        let a = MemoryKeyValueStore::new();
        let b = a.attach();
        let mut watch_b = b.watch().unwrap();

        let writer = a.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            writer.set("k", "late").unwrap();
        });

        let change = tokio::time::timeout(std::time::Duration::from_secs(2), watch_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.new_value.as_deref(), Some("late"));
    }

    #[test]
    fn test_file_store_save_load() {
        let dir = temp_dir();
        let path = dir.join("store.json");
        let store = FileKeyValueStore::new(&path);

        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert!(path.exists());
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));

        store.remove("a").unwrap();
        assert!(store.get("a").unwrap().is_none());
        assert_eq!(store.get("b").unwrap().as_deref(), Some("2"));

        // tmp file should not linger
        assert!(!path.with_extension("tmp").exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_load_nonexistent() {
        let store = FileKeyValueStore::new(temp_dir().join("missing.json"));
        assert!(store.get("anything").unwrap().is_none());
    }

    #[test]
    fn test_file_store_io_errors() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();

        // The store path is a directory: reading fails
        let store = FileKeyValueStore::new(&dir);
        assert!(matches!(store.get("a"), Err(AuditError::Io(_))));

        // A regular file where a parent directory should be: writing fails
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = FileKeyValueStore::new(blocker.join("store.json"));
        assert!(matches!(store.set("a", "1"), Err(AuditError::Io(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_file_store_has_no_watch() {
        let store = FileKeyValueStore::new(temp_dir().join("store.json"));
        assert!(matches!(store.watch(), Err(AuditError::Storage(_))));
    }

    #[test]
    fn test_settings_roundtrip() {
        let store = MemoryKeyValueStore::new();
        let settings = Settings {
            paused: true,
            limit: 120,
        };
        save_settings(&store, "settings", &settings).unwrap();
        assert_eq!(
            load_settings(&store, "settings", Settings::default()),
            settings
        );
    }

    #[test]
    fn test_settings_defaults_on_missing_or_corrupt() {
        let store = MemoryKeyValueStore::new();
        let defaults = Settings {
            paused: false,
            limit: 300,
        };
        assert_eq!(load_settings(&store, "settings", defaults), defaults);

        store.set("settings", "{not json").unwrap();
        assert_eq!(load_settings(&store, "settings", defaults), defaults);

        store.set("settings", r#"{"paused":true}"#).unwrap();
        let loaded = load_settings(&store, "settings", defaults);
        assert!(loaded.paused);
        assert_eq!(loaded.limit, 300);
    }

    #[test]
    fn test_settings_defaults_on_unreadable_store() {
        let dir = temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");
        std::fs::write(&path, "garbage").unwrap();

        let store = FileKeyValueStore::new(&path);
        assert_eq!(
            load_settings(&store, "settings", Settings::default()),
            Settings::default()
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_load_snapshot() {
        let store = MemoryKeyValueStore::new();
        assert!(load_snapshot(&store, "users").is_empty());

        store
            .set(
                "users",
                r#"[{"id":1,"name":"Ada","email":"a@x","role":"admin"},"junk",{"id":"2"}]"#,
            )
            .unwrap();
        let records = load_snapshot(&store, "users");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Ada");
        assert_eq!(records[1].id_text(), "2");

        store.set("users", r#"{"id":1}"#).unwrap();
        assert!(load_snapshot(&store, "users").is_empty());
    }
}
