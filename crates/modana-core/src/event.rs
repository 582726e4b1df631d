//! Event types carried by the event bus.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::type_tags;

/// Type-erased, shared payload.
///
/// Receivers downcast to the concrete type they expect and clone whatever
/// they need to keep beyond the dispatch call.
pub type Payload = Arc<dyn Any + Send + Sync>;

type_tags! {
    /// Event type tag.
    ///
    /// Built-in tags are never renumbered. Applications add their own with
    /// [`EventType::custom`].
    pub struct EventType {
        PING = 0 => "ping",
        DEFAULT = 1 => "default",
        /// Payload: [`ActiveDatasetChanged`](crate::datastore::ActiveDatasetChanged).
        ACTIVE_DATASET_CHANGED = 2 => "active_dataset_changed",
        /// Payload: [`DatasetChange`](crate::datastore::DatasetChange).
        DATASET_ADDED = 3 => "dataset_added",
        /// Payload: [`DatasetChange`](crate::datastore::DatasetChange).
        DATASET_REMOVED = 4 => "dataset_removed",
        /// Payload: [`ExtensionStateChanged`](crate::extension::ExtensionStateChanged).
        EXTENSION_STATE_CHANGED = 5 => "extension_state_changed",
        /// Payload: [`StartupSummary`](crate::extension::StartupSummary).
        EXTENSIONS_READY = 6 => "extensions_ready",
        /// Payload: [`CommandChange`](crate::command::CommandChange).
        COMMAND_REGISTERED = 7 => "command_registered",
        /// Payload: [`CommandChange`](crate::command::CommandChange).
        COMMAND_UNREGISTERED = 8 => "command_unregistered",
    }
    custom_base = 1000;
}

/// Metadata attached to every published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    pub id: Uuid,
    /// Publishing extension or service.
    pub source: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl EventMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// An immutable event: type tag, optional payload, metadata.
#[derive(Clone)]
pub struct Event {
    event_type: EventType,
    payload: Option<Payload>,
    metadata: EventMetadata,
}

impl Event {
    /// Event without payload.
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            payload: None,
            metadata: EventMetadata::new("system"),
        }
    }

    /// Event carrying `payload`.
    pub fn with_payload<T: Any + Send + Sync>(event_type: EventType, payload: T) -> Self {
        Self::with_shared_payload(event_type, Arc::new(payload))
    }

    /// Event carrying an already shared payload.
    pub fn with_shared_payload(event_type: EventType, payload: Payload) -> Self {
        Self {
            event_type,
            payload: Some(payload),
            metadata: EventMetadata::new("system"),
        }
    }

    pub fn from_source(mut self, source: impl Into<String>) -> Self {
        self.metadata.source = source.into();
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    pub fn source(&self) -> &str {
        &self.metadata.source
    }

    pub fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Payload downcast to `T`, if present and of that type.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }

    pub fn raw_payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("event_type", &self.event_type)
            .field("has_payload", &self.payload.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}
