//! Extensibility core for modana.
//!
//! Independently built extensions discover each other, exchange commands and
//! events, and share in-memory datasets without compile-time coupling. The
//! services are:
//!
//! - [`eventbus::EventBus`]: typed publish/subscribe, synchronous delivery
//! - [`communicator::Communicator`]: point-to-point messages between named extensions
//! - [`command::CommandRegistry`]: named operations with typed parameters
//! - [`datastore::DataStore`]: keyed shared datasets with one active entry per type
//! - [`extension::ExtensionManager`]: discovery, ordering and lifecycle
//!
//! All dispatch (event delivery, command invocation, message delivery) runs
//! under one re-entrant lock, see [`dispatch`].

pub mod command;
pub mod communicator;
pub mod config;
pub mod datastore;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod extension;
pub mod macros;

pub use error::{Error, Result};
pub use event::{Event, EventMetadata, EventType, Payload};
pub use eventbus::{EventBus, SharedEventBus};

/// Re-exports commonly used types.
pub mod prelude {
    // Configuration
    pub use crate::config::{defaults, env_vars, CoreConfig};

    // Error handling
    pub use crate::error::{Error, Result};
    pub use crate::diagnostics::{Diagnostic, DiagnosticOrigin, DiagnosticSink, MemorySink, TracingSink};

    // Events
    pub use crate::event::{Event, EventMetadata, EventType, Payload};
    pub use crate::eventbus::{DispatchReport, EventBus, EventReceiver, SharedEventBus, SubscriptionId};

    // Commands
    pub use crate::command::{
        CommandDescriptor, CommandError, CommandRegistry, CommandSignature, CommandValue,
        ParameterSlot, ValueType,
    };

    // Point-to-point
    pub use crate::communicator::{Channel, Communicator, CommunicatorError, Message};

    // Data storage
    pub use crate::datastore::{
        ActiveDatasetChanged, DataStore, DataStoreError, DatasetChange, DatasetType, SharedDataset,
    };

    // Extension system
    pub use crate::extension::{
        CommandCatalog, CoreServices, Extension, ExtensionContext, ExtensionError, ExtensionManager,
        ExtensionState, InitError, StartupSummary,
    };
}
