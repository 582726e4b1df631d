//! The extension contract and its lifecycle types.
//!
//! # Native entry points
//!
//! A dynamically loaded module exports:
//! - `modana_extension_abi_version()` -> u32 (must equal [`ABI_VERSION`])
//! - `modana_extension_create()` -> `*mut ExtensionBox`
//!
//! [`declare_extension!`](crate::declare_extension) generates both.

use std::fmt;
use std::path::PathBuf;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::command::CommandError;
use crate::communicator::CommunicatorError;
use crate::datastore::DataStoreError;
use crate::enum_from_str;
use crate::extension::ExtensionContext;

/// ABI version for dynamic loading.
/// Incremented when the [`Extension`] trait changes incompatibly.
pub const ABI_VERSION: u32 = 1;

/// Lifecycle state. Transitions are driven by the extension manager only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionState {
    #[default]
    Discovered,
    Loaded,
    Initialized,
    Active,
    Unloading,
    Unloaded,
}

enum_from_str!(ExtensionState, [
    Discovered => "discovered",
    Loaded => "loaded",
    Initialized => "initialized",
    Active => "active",
    Unloading => "unloading",
    Unloaded => "unloaded",
]);

impl ExtensionState {
    pub fn is_active(self) -> bool {
        self == ExtensionState::Active
    }
}

/// An independently built feature module.
///
/// `init` receives the context holding every service handle the extension
/// may use. Extensions keep a clone of it if their handlers need services
/// later; they never hold references to other extensions.
pub trait Extension: Send {
    /// Unique name; also the name of the extension's channel.
    fn name(&self) -> &str;

    fn version(&self) -> Version {
        Version::new(0, 1, 0)
    }

    /// Names of extensions that must be active before this one initializes.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Capability tags matched by `Channel::broadcast_to_interested`.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Register commands and subscriptions. A failure rolls back everything
    /// registered through `ctx` and leaves the extension unloaded.
    fn init(&mut self, ctx: &ExtensionContext) -> Result<(), InitError>;

    /// Called before the extension's commands, subscriptions and channel
    /// are torn down.
    fn unload(&mut self) {}
}

/// Boxed extension instance, as produced by native modules.
pub type ExtensionBox = Box<dyn Extension>;

/// Failure reported by [`Extension::init`].
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Communicator(#[from] CommunicatorError),

    #[error(transparent)]
    DataStore(#[from] DataStoreError),

    #[error("{0}")]
    Other(String),
}

impl InitError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl From<anyhow::Error> for InitError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(format!("{err:#}"))
    }
}

/// Extension manager and loader errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtensionError {
    #[error("Extension {extension} requires {dependency}, which is not active")]
    DependencyUnsatisfied {
        extension: String,
        dependency: String,
    },

    #[error("Extension {extension} requires unknown extension {dependency}")]
    UnknownDependency {
        extension: String,
        dependency: String,
    },

    #[error("Extension {extension} failed to initialize: {message}")]
    InitFailed { extension: String, message: String },

    #[error("Dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("Extension already registered: {0}")]
    DuplicateExtension(String),

    #[error("Extension disabled by configuration: {0}")]
    Disabled(String),

    #[error("Extension not found: {0}")]
    NotFound(String),

    #[error("Extension {extension} is required by: {}", .dependents.join(", "))]
    InUse {
        extension: String,
        dependents: Vec<String>,
    },

    #[error("Extension {extension} is {state}, cannot {operation}")]
    InvalidState {
        extension: String,
        state: ExtensionState,
        operation: &'static str,
    },

    #[error("Failed to load {}: {message}", .path.display())]
    LoadFailed { path: PathBuf, message: String },

    #[error("Symbol {symbol} not found in {}", .path.display())]
    SymbolNotFound { path: PathBuf, symbol: String },

    #[error("Incompatible ABI in {}: found {found}, expected {expected}", .path.display())]
    IncompatibleAbi {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    #[error("Extension constructor in {} returned null", .0.display())]
    NullPointer(PathBuf),
}

/// Payload of `EXTENSION_STATE_CHANGED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionStateChanged {
    pub extension: String,
    pub from: ExtensionState,
    pub to: ExtensionState,
}

impl fmt::Display for ExtensionStateChanged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.extension, self.from, self.to)
    }
}
