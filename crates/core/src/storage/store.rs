//! Key-value persistence boundary.
//!
//! Mirrors browser storage semantics: string keys, string values, and a
//! change event delivered to every tab except the one that wrote. Hosts
//! bridge this trait to real `localStorage`/`sessionStorage`; tests and
//! headless embedders use [`MemoryStore`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use log::warn;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::errors::Result;

/// Capacity of the storage-event broadcast channel. Slow subscribers drop
/// the oldest events; the periodic refresh self-heals anything missed.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Identifies one tab/window so subscribers can ignore their own writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TabId(u64);

impl TabId {
    /// Allocate a process-unique tab id.
    pub fn allocate() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A storage mutation, as observed by other tabs.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub key: String,
    /// New value, or `None` when the key was removed.
    pub value: Option<String>,
    /// Tab that performed the write. Browser storage events never fire in
    /// the writing tab; subscribers filter on this.
    pub origin: TabId,
}

/// String key-value store with cross-tab change notifications.
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str, origin: TabId) -> Result<()>;

    fn remove_item(&self, key: &str, origin: TabId) -> Result<()>;

    /// Storage-change events for every write to this store, including the
    /// subscriber's own; callers filter by [`StoreEvent::origin`].
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str, origin: TabId) -> Result<()> {
        (**self).set_item(key, value, origin)
    }

    fn remove_item(&self, key: &str, origin: TabId) -> Result<()> {
        (**self).remove_item(key, origin)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        (**self).subscribe()
    }
}

/// In-memory [`KeyValueStore`]. One instance shared by several handles
/// stands in for one origin's storage visible to several tabs.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            entries: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn emit(&self, key: &str, value: Option<String>, origin: TabId) {
        // No receivers is fine; send only fails when nobody listens.
        let _ = self.events.send(StoreEvent {
            key: key.to_string(),
            value,
            origin,
        });
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str, origin: TabId) -> Result<()> {
        {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.insert(key.to_string(), value.to_string());
        }
        self.emit(key, Some(value.to_string()), origin);
        Ok(())
    }

    fn remove_item(&self, key: &str, origin: TabId) -> Result<()> {
        let removed = {
            let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
            entries.remove(key)
        };
        if removed.is_some() {
            self.emit(key, None, origin);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

/// Tab-scoped typed view over a [`KeyValueStore`].
///
/// All engine reads and writes go through a handle so the write origin is
/// stamped consistently and JSON handling stays in one place. Corrupt
/// stored payloads degrade to "nothing persisted"; hydration never fails
/// because of them.
#[derive(Clone)]
pub struct StoreHandle {
    store: Arc<dyn KeyValueStore>,
    origin: TabId,
}

impl StoreHandle {
    pub fn new(store: Arc<dyn KeyValueStore>, origin: TabId) -> Self {
        Self { store, origin }
    }

    pub fn origin(&self) -> TabId {
        self.origin
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    /// Read a JSON list. Missing, unreadable, or malformed entries all
    /// yield an empty list.
    pub fn read_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        self.read_value(key).unwrap_or_default()
    }

    /// Read a JSON value. Missing or malformed entries yield `None`.
    pub fn read_value<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get_item(key) {
            Ok(raw) => raw?,
            Err(err) => {
                warn!("storage read failed for '{key}': {err}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!("discarding malformed payload under '{key}': {err}");
                None
            }
        }
    }

    pub fn write_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.store.set_item(key, &raw, self.origin)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.store.remove_item(key, self.origin)
    }
}
