//! Shared in-memory dataset registry.
//!
//! Extensions put loaded data objects here under a key and a [`DatasetType`].
//! Readers get `Arc` handles; removing an entry never invalidates handles
//! already handed out. Per type, at most one key is *active*, which is what
//! cross-extension operations act on.
//!
//! One lock guards the bookkeeping. It is released before any change
//! notification is published, so subscribers may call back into the store.

mod types;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::event::{Event, EventType};
use crate::eventbus::EventBus;

pub use types::{
    ActiveDatasetChanged, DataStoreError, DatasetChange, DatasetEntry, DatasetType, SharedDataset,
};

#[derive(Default)]
struct State {
    entries: BTreeMap<String, DatasetEntry>,
    active: HashMap<DatasetType, String>,
    settings: BTreeMap<String, serde_json::Value>,
}

/// Keyed registry of shared datasets.
#[derive(Default)]
pub struct DataStore {
    state: RwLock<State>,
    events: Option<Arc<EventBus>>,
}

impl DataStore {
    /// Store that publishes no notifications.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store publishing change notifications on `events`.
    pub fn with_event_bus(events: Arc<EventBus>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            events: Some(events),
        }
    }

    /// Insert or replace the entry under `key`. Returns the replaced data.
    ///
    /// Replacing the active entry of a type keeps it active and republishes
    /// the activation with the new handle. If the replacement changes the
    /// type, the old type loses its active entry.
    pub fn put(
        &self,
        key: impl Into<String>,
        data: SharedDataset,
        dataset_type: DatasetType,
    ) -> Option<SharedDataset> {
        let key = key.into();
        let mut pending = vec![Event::with_payload(
            EventType::DATASET_ADDED,
            DatasetChange {
                key: key.clone(),
                dataset_type,
            },
        )];

        let previous = {
            let mut state = self.state.write();
            let previous = state.entries.insert(
                key.clone(),
                DatasetEntry::new(key.clone(), dataset_type, Arc::clone(&data)),
            );
            if let Some(old) = &previous {
                if state.active.get(&old.dataset_type) == Some(&key) {
                    if old.dataset_type == dataset_type {
                        pending.push(active_changed(dataset_type, Some(key.clone()), Some(data)));
                    } else {
                        state.active.remove(&old.dataset_type);
                        pending.push(active_changed(old.dataset_type, None, None));
                    }
                }
            }
            previous
        };

        tracing::debug!(key = %key, dataset_type = %dataset_type, replaced = previous.is_some(), "dataset stored");
        self.publish_all(pending);
        previous.map(|entry| entry.data)
    }

    /// Wrap `value` in an `Arc` and [`put`](Self::put) it.
    pub fn insert<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
        dataset_type: DatasetType,
    ) -> Option<SharedDataset> {
        self.put(key, Arc::new(value), dataset_type)
    }

    pub fn get(&self, key: &str) -> Option<SharedDataset> {
        self.state.read().entries.get(key).map(|e| Arc::clone(&e.data))
    }

    pub fn entry(&self, key: &str) -> Option<DatasetEntry> {
        self.state.read().entries.get(key).cloned()
    }

    /// Typed access. `None` if absent or of another type.
    pub fn get_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get(key).and_then(|data| data.downcast::<T>().ok())
    }

    /// Remove an entry. Clears the active pointer if it was active.
    pub fn remove(&self, key: &str) -> Option<SharedDataset> {
        let (entry, was_active) = {
            let mut state = self.state.write();
            let entry = state.entries.remove(key)?;
            let was_active = state.active.get(&entry.dataset_type).map(String::as_str) == Some(key);
            if was_active {
                state.active.remove(&entry.dataset_type);
            }
            (entry, was_active)
        };

        tracing::debug!(key = %key, dataset_type = %entry.dataset_type, was_active, "dataset removed");
        let mut pending = vec![Event::with_payload(
            EventType::DATASET_REMOVED,
            DatasetChange {
                key: key.to_string(),
                dataset_type: entry.dataset_type,
            },
        )];
        if was_active {
            pending.push(active_changed(entry.dataset_type, None, None));
        }
        self.publish_all(pending);
        Some(entry.data)
    }

    /// Make `key` the active entry of its type.
    ///
    /// Publishes one `ACTIVE_DATASET_CHANGED`. Re-activating the entry that
    /// is already active changes nothing and publishes nothing.
    pub fn set_active(&self, key: &str) -> Result<(), DataStoreError> {
        let event = {
            let mut state = self.state.write();
            let entry = state
                .entries
                .get(key)
                .ok_or_else(|| DataStoreError::NotFound(key.to_string()))?;
            let dataset_type = entry.dataset_type;
            let data = Arc::clone(&entry.data);
            if state.active.get(&dataset_type).map(String::as_str) == Some(key) {
                return Ok(());
            }
            state.active.insert(dataset_type, key.to_string());
            active_changed(dataset_type, Some(key.to_string()), Some(data))
        };

        tracing::debug!(key = %key, "active dataset changed");
        self.publish_all(vec![event]);
        Ok(())
    }

    /// Drop the active pointer of `dataset_type`. Returns `false` if none was set.
    pub fn clear_active(&self, dataset_type: DatasetType) -> bool {
        let cleared = self.state.write().active.remove(&dataset_type).is_some();
        if cleared {
            self.publish_all(vec![active_changed(dataset_type, None, None)]);
        }
        cleared
    }

    pub fn active(&self, dataset_type: DatasetType) -> Option<SharedDataset> {
        self.active_entry(dataset_type).map(|e| e.data)
    }

    pub fn active_key(&self, dataset_type: DatasetType) -> Option<String> {
        self.state.read().active.get(&dataset_type).cloned()
    }

    pub fn active_entry(&self, dataset_type: DatasetType) -> Option<DatasetEntry> {
        let state = self.state.read();
        let key = state.active.get(&dataset_type)?;
        state.entries.get(key).cloned()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.state.read().entries.keys().cloned().collect()
    }

    pub fn keys_of_type(&self, dataset_type: DatasetType) -> Vec<String> {
        self.state
            .read()
            .entries
            .values()
            .filter(|e| e.dataset_type == dataset_type)
            .map(|e| e.key.clone())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.state.read().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    // ========== Settings ==========

    /// Store a serializable settings object under `key`.
    pub fn put_setting<T: Serialize>(&self, key: impl Into<String>, value: &T) -> Result<(), DataStoreError> {
        let value = serde_json::to_value(value)?;
        self.state.write().settings.insert(key.into(), value);
        Ok(())
    }

    /// Read a settings object back as `T`.
    pub fn setting<T: DeserializeOwned>(&self, key: &str) -> Result<T, DataStoreError> {
        let value = self
            .raw_setting(key)
            .ok_or_else(|| DataStoreError::SettingNotFound(key.to_string()))?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn raw_setting(&self, key: &str) -> Option<serde_json::Value> {
        self.state.read().settings.get(key).cloned()
    }

    pub fn remove_setting(&self, key: &str) -> Option<serde_json::Value> {
        self.state.write().settings.remove(key)
    }

    pub fn setting_keys(&self) -> Vec<String> {
        self.state.read().settings.keys().cloned().collect()
    }

    fn publish_all(&self, events: Vec<Event>) {
        if let Some(bus) = &self.events {
            for event in events {
                bus.publish(event.from_source("datastore"));
            }
        }
    }
}

fn active_changed(
    dataset_type: DatasetType,
    key: Option<String>,
    dataset: Option<SharedDataset>,
) -> Event {
    Event::with_payload(
        EventType::ACTIVE_DATASET_CHANGED,
        ActiveDatasetChanged {
            dataset_type,
            key,
            dataset,
        },
    )
}
