//! Tests for the shared data store.

use modana_core::datastore::{ActiveDatasetChanged, DataStore, DatasetChange, DatasetType};
use modana_core::event::{Event, EventType};
use modana_core::eventbus::EventBus;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, PartialEq)]
struct Surface {
    vertices: usize,
}

fn watched_store() -> (Arc<DataStore>, Arc<EventBus>, Arc<Mutex<Vec<Event>>>) {
    let bus = Arc::new(EventBus::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    for ty in [
        EventType::ACTIVE_DATASET_CHANGED,
        EventType::DATASET_ADDED,
        EventType::DATASET_REMOVED,
    ] {
        let events = events.clone();
        bus.subscribe(ty, move |e| {
            events.lock().push(e.clone());
            Ok(())
        });
    }
    (Arc::new(DataStore::with_event_bus(bus.clone())), bus, events)
}

fn active_changes(events: &[Event]) -> Vec<ActiveDatasetChanged> {
    events
        .iter()
        .filter_map(|e| e.payload::<ActiveDatasetChanged>().cloned())
        .collect()
}

#[test]
fn test_put_set_active_roundtrip_notifies_once() {
    let (store, _bus, events) = watched_store();
    let surface = Arc::new(Surface { vertices: 163_842 });

    store.put("subjA/lh.white", surface.clone(), DatasetType::SURFACE);
    store.set_active("subjA/lh.white").unwrap();

    let active = store.active(DatasetType::SURFACE).unwrap();
    assert!(Arc::ptr_eq(
        &active.downcast::<Surface>().unwrap(),
        &surface
    ));

    let changes = active_changes(&events.lock());
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].dataset_type, DatasetType::SURFACE);
    assert_eq!(changes[0].key.as_deref(), Some("subjA/lh.white"));
    assert!(changes[0].dataset.is_some());
}

#[test]
fn test_remove_active_entry_clears_and_notifies() {
    let (store, _bus, events) = watched_store();
    store.insert("subjA/lh.white", Surface { vertices: 10 }, DatasetType::SURFACE);
    store.set_active("subjA/lh.white").unwrap();
    events.lock().clear();

    let removed = store.remove("subjA/lh.white").unwrap();

    assert!(store.active(DatasetType::SURFACE).is_none());
    assert!(store.active_key(DatasetType::SURFACE).is_none());
    assert_eq!(removed.downcast_ref::<Surface>(), Some(&Surface { vertices: 10 }));

    let events = events.lock();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0].payload::<DatasetChange>(),
        Some(&DatasetChange {
            key: "subjA/lh.white".into(),
            dataset_type: DatasetType::SURFACE,
        })
    );
    let cleared = events[1].payload::<ActiveDatasetChanged>().unwrap();
    assert!(cleared.key.is_none());
    assert!(cleared.dataset.is_none());
}

#[test]
fn test_remove_inactive_entry_keeps_active() {
    let (store, _bus, events) = watched_store();
    store.insert("a", 1u32, DatasetType::RAW);
    store.insert("b", 2u32, DatasetType::RAW);
    store.set_active("a").unwrap();
    events.lock().clear();

    store.remove("b");
    assert_eq!(store.active_key(DatasetType::RAW).as_deref(), Some("a"));
    assert!(active_changes(&events.lock()).is_empty());
    assert!(store.remove("b").is_none());
}

#[test]
fn test_subscriber_may_read_store_during_notification() {
    let (store, bus, _events) = watched_store();
    let seen = Arc::new(Mutex::new(None));

    let reader = Arc::downgrade(&store);
    let slot = seen.clone();
    bus.subscribe(EventType::ACTIVE_DATASET_CHANGED, move |_| {
        if let Some(store) = reader.upgrade() {
            *slot.lock() = store.active_key(DatasetType::COVARIANCE);
        }
        Ok(())
    });

    store.insert("noise-cov", 0u8, DatasetType::COVARIANCE);
    store.set_active("noise-cov").unwrap();
    assert_eq!(seen.lock().as_deref(), Some("noise-cov"));
}

#[test]
fn test_concurrent_put_last_writer_wins() {
    let store = Arc::new(DataStore::new());
    let writers: Vec<_> = (0..8u32)
        .map(|i| {
            let store = store.clone();
            std::thread::spawn(move || {
                for j in 0..50u32 {
                    store.insert("shared", (i, j), DatasetType::AVERAGE);
                    let value = store.get_as::<(u32, u32)>("shared");
                    assert!(value.is_some());
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(store.len(), 1);
    let (_, j) = *store.get_as::<(u32, u32)>("shared").unwrap();
    assert_eq!(j, 49);
}

#[test]
fn test_custom_dataset_types() {
    let store = DataStore::new();
    let connectivity = DatasetType::custom(3);
    store.insert("conn", vec![0.5f32; 4], connectivity);

    assert_eq!(store.keys_of_type(connectivity), vec!["conn"]);
    assert!(store.keys_of_type(DatasetType::SURFACE).is_empty());
    assert_eq!(connectivity.to_string(), "custom(1003)");
}
