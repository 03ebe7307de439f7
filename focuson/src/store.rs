//! Key-value storage with change notification.
//!
//! Values are JSON. Every successful `set` is announced on a broadcast
//! channel so other components can mirror the key without polling.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use notify::{Config, RecommendedWatcher, RecursiveMode, Watcher};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Normalized blocked domains, shared by the daemon and the popup.
pub const BLOCKED_URLS: &str = "blockedUrls";

/// File names under the data directory.
pub const SHARED_STORE_FILE: &str = "storage.json";
pub const POPUP_STORE_FILE: &str = "popup.json";

const CHANGE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub value: Value,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store file {0:?} does not hold a JSON object")]
    NotAnObject(PathBuf),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

pub fn read<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub fn write<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<(), StoreError> {
    store.set(key, serde_json::to_value(value)?)
}

struct FileState {
    path: PathBuf,
    /// Last contents seen by this instance, to tell which keys changed.
    snapshot: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl FileState {
    fn load(&self) -> Result<Map<String, Value>, StoreError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let json = fs::read_to_string(&self.path)?;
        if json.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&json)? {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject(self.path.clone())),
        }
    }

    fn save(&self, map: &Map<String, Value>) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Re-read the file and announce every key that differs from the
    /// snapshot. Removed keys are announced as `null`.
    fn refresh(&self) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        let current = match self.load() {
            Ok(map) => map,
            Err(e) => {
                debug!(path = %self.path.display(), "store file unreadable: {}", e);
                return;
            }
        };

        let mut changed: Vec<StoreChange> = current
            .iter()
            .filter(|(key, value)| snapshot.get(*key) != Some(*value))
            .map(|(key, value)| StoreChange {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        changed.extend(
            snapshot
                .keys()
                .filter(|key| !current.contains_key(*key))
                .map(|key| StoreChange {
                    key: key.clone(),
                    value: Value::Null,
                }),
        );
        *snapshot = current;
        drop(snapshot);

        for change in changed {
            debug!(key = %change.key, "store changed on disk");
            let _ = self.changes.send(change);
        }
    }

    fn is_store_file(&self, event: &notify::Event) -> bool {
        let name = self.path.file_name();
        event.paths.iter().any(|p| p.file_name() == name)
    }
}

/// A JSON object on disk. Each write re-reads the file first, so separate
/// processes sharing it get last-writer-wins per key.
///
/// The file is watched: writes made by another instance, in this process
/// or another one, are announced to this instance's subscribers too.
pub struct JsonFileStore {
    state: Arc<FileState>,
    _watcher: Mutex<Option<RecommendedWatcher>>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let state = Arc::new(FileState {
            path,
            snapshot: Mutex::new(Map::new()),
            changes,
        });
        // A bad file is reported by the first get or set instead.
        if let Ok(initial) = state.load() {
            *state.snapshot.lock().unwrap_or_else(|e| e.into_inner()) = initial;
        }

        let watcher = match watch(&dir, &state) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!(path = %state.path.display(), "not watching store file: {}", e);
                None
            }
        };
        Ok(Self {
            state,
            _watcher: Mutex::new(watcher),
        })
    }
}

/// Watch the directory rather than the file, since saves replace the file.
fn watch(dir: &Path, state: &Arc<FileState>) -> Result<RecommendedWatcher, StoreError> {
    let weak = Arc::downgrade(state);
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            let Ok(event) = res else {
                return;
            };
            if let Some(state) = weak.upgrade() {
                if state.is_store_file(&event) {
                    state.refresh();
                }
            }
        },
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.state.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self.state.load()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        {
            let mut snapshot = self.state.snapshot.lock().unwrap_or_else(|e| e.into_inner());
            let mut map = self.state.load()?;
            map.insert(key.to_string(), value.clone());
            self.state.save(&map)?;
            *snapshot = map;
        }
        let _ = self.state.changes.send(StoreChange {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.state.changes.subscribe()
    }
}

/// In-process store, used by tests and as a fallback when no data
/// directory is available.
pub struct MemoryStore {
    map: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            map: Mutex::new(Map::new()),
            changes,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.map
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.clone());
        let _ = self.changes.send(StoreChange {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
