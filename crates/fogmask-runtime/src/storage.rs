#![forbid(unsafe_code)]

//! Persistence collaborator: scoped key/value flags with change watching.
//!
//! Values are [`serde_json::Value`]s, so anything stored is plain scalars,
//! arrays and objects. Every write from any actor (the local one included)
//! is delivered to all watchers of that scope and key as a full snapshot.
//!
//! Two backends are provided:
//!
//! - [`MemoryStorage`]: in-process map. Share one instance between several
//!   layers to simulate connected peers.
//! - [`FileStorage`]: one JSON file per scope under a directory, written
//!   with a temp-file-then-rename so a crash never leaves a torn file.
//!
//! # File format
//!
//! ```json
//! { "version": 1, "values": { "history": { "events": [], "pointer": 0 } } }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;

/// Where a flag lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Shared by everyone viewing the scene.
    Scene(String),
    /// Private to one user.
    User(String),
}

impl Scope {
    /// File name stem, one-to-one with the scope.
    ///
    /// ASCII letters, digits and `-` pass through; every other byte,
    /// including `_`, becomes `_xx` in lowercase hex.
    fn file_stem(&self) -> String {
        let (prefix, id) = match self {
            Self::Scene(id) => ("scene", id),
            Self::User(id) => ("user", id),
        };
        let mut stem = String::with_capacity(prefix.len() + 1 + id.len());
        stem.push_str(prefix);
        stem.push('-');
        for &b in id.as_bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' {
                stem.push(char::from(b));
            } else {
                let _ = write!(stem, "_{b:02x}");
            }
        }
        stem
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scene(id) => write!(f, "scene:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// A change notification. Each carries the full new value.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    Set {
        scope: Scope,
        key: String,
        value: Value,
    },
    Unset {
        scope: Scope,
        key: String,
    },
}

impl StorageEvent {
    #[must_use]
    pub fn scope(&self) -> &Scope {
        match self {
            Self::Set { scope, .. } | Self::Unset { scope, .. } => scope,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Set { key, .. } | Self::Unset { key, .. } => key,
        }
    }
}

/// Scoped key/value store with change notifications.
pub trait StorageBackend: Send + Sync {
    /// Current value, or `None` when the key was never set or was unset.
    fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>, StorageError>;

    /// Replace the value atomically and notify watchers.
    fn set(&self, scope: &Scope, key: &str, value: Value) -> Result<(), StorageError>;

    /// Remove the value and notify watchers.
    fn unset(&self, scope: &Scope, key: &str) -> Result<(), StorageError>;

    /// Subscribe to changes of one key. The receiver sees every later write.
    fn watch(&self, scope: &Scope, key: &str) -> Receiver<StorageEvent>;
}

// ---------------------------------------------------------------------------
// Watcher registry
// ---------------------------------------------------------------------------

struct Watcher {
    scope: Scope,
    key: String,
    tx: Sender<StorageEvent>,
}

/// Fan-out of change events; dead receivers are pruned on send.
#[derive(Default)]
struct Watchers {
    inner: Mutex<Vec<Watcher>>,
}

impl Watchers {
    fn subscribe(&self, scope: &Scope, key: &str) -> Receiver<StorageEvent> {
        let (tx, rx) = mpsc::channel();
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Watcher {
                scope: scope.clone(),
                key: key.to_owned(),
                tx,
            });
        rx
    }

    fn notify(&self, event: StorageEvent) {
        let mut watchers = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        watchers.retain(|w| {
            if &w.scope != event.scope() || w.key != event.key() {
                return true;
            }
            w.tx.send(event.clone()).is_ok()
        });
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

// ---------------------------------------------------------------------------
// MemoryStorage
// ---------------------------------------------------------------------------

/// In-process storage.
#[derive(Default)]
pub struct MemoryStorage {
    values: Mutex<HashMap<(Scope, String), Value>>,
    watchers: Watchers,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live watch subscriptions.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.values.lock().unwrap_or_else(|e| e.into_inner()).len();
        f.debug_struct("MemoryStorage")
            .field("values", &len)
            .field("watchers", &self.watchers.len())
            .finish()
    }
}

impl StorageBackend for MemoryStorage {
    fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>, StorageError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(&(scope.clone(), key.to_owned())).cloned())
    }

    fn set(&self, scope: &Scope, key: &str, value: Value) -> Result<(), StorageError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((scope.clone(), key.to_owned()), value.clone());
        self.watchers.notify(StorageEvent::Set {
            scope: scope.clone(),
            key: key.to_owned(),
            value,
        });
        Ok(())
    }

    fn unset(&self, scope: &Scope, key: &str) -> Result<(), StorageError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(scope.clone(), key.to_owned()));
        self.watchers.notify(StorageEvent::Unset {
            scope: scope.clone(),
            key: key.to_owned(),
        });
        Ok(())
    }

    fn watch(&self, scope: &Scope, key: &str) -> Receiver<StorageEvent> {
        self.watchers.subscribe(scope, key)
    }
}

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// Current on-disk format version.
const FORMAT_VERSION: u64 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct ScopeFile {
    version: u64,
    #[serde(default)]
    values: serde_json::Map<String, Value>,
}

/// JSON-file storage, one file per scope.
///
/// Watchers are notified in-process only.
pub struct FileStorage {
    dir: PathBuf,
    io: Mutex<()>,
    watchers: Watchers,
}

impl fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStorage")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl FileStorage {
    /// Store files under `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StorageError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            io: Mutex::new(()),
            watchers: Watchers::default(),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `scope`.
    #[must_use]
    pub fn path_for(&self, scope: &Scope) -> PathBuf {
        self.dir.join(format!("{}.json", scope.file_stem()))
    }

    /// Missing file reads as empty; a version mismatch is corrupt.
    fn read(&self, path: &Path) -> Result<ScopeFile, StorageError> {
        if !path.exists() {
            return Ok(ScopeFile {
                version: FORMAT_VERSION,
                values: serde_json::Map::new(),
            });
        }
        let contents = fs::read_to_string(path).map_err(|source| StorageError::Io {
            path: path.to_owned(),
            source,
        })?;
        let file: ScopeFile =
            serde_json::from_str(&contents).map_err(|e| StorageError::Corrupt {
                path: path.to_owned(),
                reason: e.to_string(),
            })?;
        if file.version != FORMAT_VERSION {
            return Err(StorageError::Corrupt {
                path: path.to_owned(),
                reason: format!(
                    "unsupported version {} (expected {FORMAT_VERSION})",
                    file.version
                ),
            });
        }
        Ok(file)
    }

    fn write(&self, path: &Path, file: &ScopeFile) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(file)?;
        let temp = path.with_extension("json.tmp");
        let io_err = |source| StorageError::Io {
            path: path.to_owned(),
            source,
        };
        fs::write(&temp, json).map_err(io_err)?;
        fs::rename(&temp, path).map_err(io_err)?;
        Ok(())
    }

    fn update(
        &self,
        scope: &Scope,
        apply: impl FnOnce(&mut serde_json::Map<String, Value>),
    ) -> Result<(), StorageError> {
        let _io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.path_for(scope);
        let mut file = self.read(&path)?;
        apply(&mut file.values);
        file.version = FORMAT_VERSION;
        self.write(&path, &file)
    }
}

impl StorageBackend for FileStorage {
    fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>, StorageError> {
        let _io = self.io.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = self.read(&self.path_for(scope))?;
        Ok(file.values.remove(key))
    }

    fn set(&self, scope: &Scope, key: &str, value: Value) -> Result<(), StorageError> {
        let stored = value.clone();
        self.update(scope, |values| {
            values.insert(key.to_owned(), stored);
        })?;
        self.watchers.notify(StorageEvent::Set {
            scope: scope.clone(),
            key: key.to_owned(),
            value,
        });
        Ok(())
    }

    fn unset(&self, scope: &Scope, key: &str) -> Result<(), StorageError> {
        self.update(scope, |values| {
            values.remove(key);
        })?;
        self.watchers.notify(StorageEvent::Unset {
            scope: scope.clone(),
            key: key.to_owned(),
        });
        Ok(())
    }

    fn watch(&self, scope: &Scope, key: &str) -> Receiver<StorageEvent> {
        self.watchers.subscribe(scope, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scene() -> Scope {
        Scope::Scene("s1".into())
    }

    #[test]
    fn memory_get_set_unset() {
        let s = MemoryStorage::new();
        assert_eq!(s.get(&scene(), "k").unwrap(), None);
        s.set(&scene(), "k", json!({"a": 1})).unwrap();
        assert_eq!(s.get(&scene(), "k").unwrap(), Some(json!({"a": 1})));
        s.unset(&scene(), "k").unwrap();
        assert_eq!(s.get(&scene(), "k").unwrap(), None);
    }

    #[test]
    fn scopes_are_isolated() {
        let s = MemoryStorage::new();
        s.set(&scene(), "k", json!(1)).unwrap();
        assert_eq!(s.get(&Scope::User("s1".into()), "k").unwrap(), None);
    }

    #[test]
    fn watch_sees_every_write_including_local() {
        let s = MemoryStorage::new();
        let rx = s.watch(&scene(), "k");
        s.set(&scene(), "k", json!(1)).unwrap();
        s.set(&scene(), "other", json!(2)).unwrap();
        s.unset(&scene(), "k").unwrap();
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                StorageEvent::Set {
                    scope: scene(),
                    key: "k".into(),
                    value: json!(1)
                },
                StorageEvent::Unset {
                    scope: scene(),
                    key: "k".into()
                },
            ]
        );
    }

    #[test]
    fn dropped_watchers_are_pruned() {
        let s = MemoryStorage::new();
        let rx = s.watch(&scene(), "k");
        assert_eq!(s.watcher_count(), 1);
        drop(rx);
        s.set(&scene(), "k", json!(1)).unwrap();
        assert_eq!(s.watcher_count(), 0);
    }

    #[test]
    fn file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::open(dir.path()).unwrap();
        s.set(&scene(), "history", json!({"events": [], "pointer": 0}))
            .unwrap();
        drop(s);
        let s = FileStorage::open(dir.path()).unwrap();
        assert_eq!(
            s.get(&scene(), "history").unwrap(),
            Some(json!({"events": [], "pointer": 0}))
        );
        assert!(!s.path_for(&scene()).with_extension("json.tmp").exists());
    }

    #[test]
    fn file_storage_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::open(dir.path().join("nested")).unwrap();
        assert_eq!(s.get(&scene(), "history").unwrap(), None);
    }

    #[test]
    fn file_storage_rejects_other_versions() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::open(dir.path()).unwrap();
        fs::write(s.path_for(&scene()), r#"{"version": 9, "values": {}}"#).unwrap();
        let err = s.get(&scene(), "k").unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }), "{err}");
    }

    #[test]
    fn file_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::open(dir.path()).unwrap();
        let path = s.path_for(&Scope::User("../evil id".into()));
        assert_eq!(path.file_name().unwrap(), "user-_2e_2e_2fevil_20id.json");
        assert_eq!(path.parent(), Some(dir.path()));
    }

    #[test]
    fn similar_scene_ids_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStorage::open(dir.path()).unwrap();
        let dotted = Scope::Scene("map.1".into());
        let underscored = Scope::Scene("map_1".into());
        assert_ne!(s.path_for(&dotted), s.path_for(&underscored));
        assert_ne!(
            s.path_for(&Scope::Scene("a b".into())),
            s.path_for(&Scope::Scene("a_b".into()))
        );

        s.set(&dotted, "history", json!({"events": [[]], "pointer": 1}))
            .unwrap();
        s.set(&underscored, "history", json!({"events": [], "pointer": 0}))
            .unwrap();
        assert_eq!(
            s.get(&dotted, "history").unwrap(),
            Some(json!({"events": [[]], "pointer": 1}))
        );
    }
}
