//! Extension system.
//!
//! Extensions are independently built modules, either compiled into the host
//! or loaded from `.so`/`.dylib`/`.dll` files. They never reference each
//! other directly; everything they share goes through the services in their
//! [`ExtensionContext`]:
//!
//! ```text
//!                  ExtensionManager
//!        discover -> resolve order -> init -> unload
//!                         │
//!                  ExtensionContext
//!    ┌──────────┬─────────┴───────┬───────────┐
//!    ▼          ▼                 ▼           ▼
//! EventBus  CommandRegistry    Channel     DataStore
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use modana_core::config::CoreConfig;
//! use modana_core::extension::ExtensionManager;
//!
//! let mut manager = ExtensionManager::new(CoreConfig::default().with_extension_dir("ext"));
//! manager.register_builtin(SurfaceViewer::default())?;
//! manager.discover();
//! let summary = manager.start()?;
//! println!("{summary}");
//! manager.shutdown();
//! ```

pub mod context;
pub mod loader;
pub mod manager;
pub mod resolve;
pub mod system;

pub use context::{CommandCatalog, CoreServices, ExtensionContext};
pub use loader::{is_native_extension, LoadedExtension, NativeExtensionLoader};
pub use manager::{
    DiscoveryReport, ExtensionDescriptor, ExtensionManager, ExtensionOrigin, FailedExtension,
    StartupSummary,
};
pub use resolve::DependencyGraph;
pub use system::{
    Extension, ExtensionBox, ExtensionError, ExtensionState, ExtensionStateChanged, InitError,
    ABI_VERSION,
};
