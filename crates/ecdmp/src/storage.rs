//! Durable key-value persistence for preference and event blobs.

use crate::types::{Event, Preference};
use crate::Error;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Key holding the serialized [`Preference`].
pub const KEY_PREFERENCE: &str = "Preference";

/// Key holding the serialized pending event queue.
pub const KEY_EVENTS: &str = "Events";

/// A durable string store.
///
/// An empty string returned from [`load`](KeyValueStore::load) means the
/// key is absent.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn save(&self, key: &str, value: &str) -> Result<(), Error>;

    /// Read the value under `key`, or an empty string if absent.
    async fn load(&self, key: &str) -> Result<String, Error>;
}

/// In-process store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a value without going through the async interface.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn save(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("memory store poisoned".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<String, Error> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| Error::Storage("memory store poisoned".into()))?;
        Ok(entries.get(key).cloned().unwrap_or_default())
    }
}

/// Store keeping one file per key inside a directory.
///
/// Writes go to a temporary file that is renamed over the target, so a
/// crash mid-write never leaves a truncated blob behind.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`. The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the blobs.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn save(&self, key: &str, value: &str) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let target = self.path_for(key);
        let tmp = target.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<String, Error> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Persist the preference blob.
pub(crate) async fn save_preference(
    store: &dyn KeyValueStore,
    preference: &Preference,
) -> Result<(), Error> {
    let json = serde_json::to_string(preference)?;
    store.save(KEY_PREFERENCE, &json).await
}

/// Load the preference blob. An absent blob yields the defaults.
pub(crate) async fn load_preference(store: &dyn KeyValueStore) -> Result<Preference, Error> {
    let json = store.load(KEY_PREFERENCE).await?;
    if json.is_empty() {
        return Ok(Preference::default());
    }
    Ok(serde_json::from_str(&json)?)
}

/// Persist the full event sequence.
pub(crate) async fn save_events(store: &dyn KeyValueStore, events: &[Event]) -> Result<(), Error> {
    let json = serde_json::to_string(events)?;
    store.save(KEY_EVENTS, &json).await
}

/// Load the pending event sequence. An absent blob yields no events.
pub(crate) async fn load_events(store: &dyn KeyValueStore) -> Result<Vec<Event>, Error> {
    let json = store.load(KEY_EVENTS).await?;
    if json.is_empty() {
        return Ok(Vec::new());
    }
    let events: Vec<Event> = serde_json::from_str(&json)?;
    debug!(event_count = events.len(), "loaded pending events");
    Ok(events)
}

/// Erase the persisted event blob.
pub(crate) async fn clear_events(store: &dyn KeyValueStore) -> Result<(), Error> {
    store.save(KEY_EVENTS, "").await
}
