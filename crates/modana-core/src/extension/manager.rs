//! Extension lifecycle management.
//!
//! The manager owns every extension instance. It discovers native modules,
//! orders extensions by their declared dependencies, initializes them with an
//! [`ExtensionContext`], and unloads them in reverse order.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use semver::Version;
use serde::Serialize;

use super::context::{CoreServices, ExtensionContext};
use super::loader::{LoadedExtension, NativeExtensionLoader};
use super::resolve::DependencyGraph;
use super::{Extension, ExtensionBox, ExtensionError, ExtensionState, ExtensionStateChanged, InitError};
use crate::config::CoreConfig;
use crate::diagnostics::{Diagnostic, DiagnosticOrigin};
use crate::dispatch::panic_message;
use crate::event::{Event, EventType};

/// Where an extension came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExtensionOrigin {
    Builtin,
    Native { path: PathBuf },
}

impl fmt::Display for ExtensionOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtensionOrigin::Builtin => f.write_str("builtin"),
            ExtensionOrigin::Native { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Snapshot of one managed extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDescriptor {
    pub name: String,
    pub version: Version,
    pub dependencies: Vec<String>,
    pub capabilities: Vec<String>,
    pub state: ExtensionState,
    pub origin: ExtensionOrigin,
    /// Why the extension is not active, if it failed or was skipped.
    pub error: Option<String>,
    /// Commands currently registered by the extension.
    pub commands: Vec<String>,
    /// Event subscriptions currently held by the extension.
    pub subscriptions: usize,
}

/// An extension that did not become active during [`ExtensionManager::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedExtension {
    pub name: String,
    pub error: ExtensionError,
}

/// Result of [`ExtensionManager::start`]. Also the payload of `EXTENSIONS_READY`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartupSummary {
    /// Resolved dependency order.
    pub order: Vec<String>,
    /// Extensions that reached `Active`, in initialization order.
    pub active: Vec<String>,
    /// Extensions skipped because the configuration disables them.
    pub disabled: Vec<String>,
    pub failed: Vec<FailedExtension>,
}

impl StartupSummary {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failure(&self, name: &str) -> Option<&ExtensionError> {
        self.failed.iter().find(|f| f.name == name).map(|f| &f.error)
    }
}

impl fmt::Display for StartupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "active ({}): {}", self.active.len(), self.active.join(", "))?;
        if !self.disabled.is_empty() {
            writeln!(f, "disabled ({}): {}", self.disabled.len(), self.disabled.join(", "))?;
        }
        for failed in &self.failed {
            writeln!(f, "failed: {}: {}", failed.name, failed.error)?;
        }
        Ok(())
    }
}

/// Result of [`ExtensionManager::discover`].
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    pub loaded: Vec<String>,
    pub failed: Vec<(PathBuf, ExtensionError)>,
}

struct Slot {
    name: String,
    version: Version,
    dependencies: Vec<String>,
    capabilities: Vec<String>,
    origin: ExtensionOrigin,
    state: ExtensionState,
    error: Option<ExtensionError>,
    instance: Option<LoadedExtension>,
}

/// Owner of all extensions and their lifecycle.
pub struct ExtensionManager {
    config: CoreConfig,
    services: CoreServices,
    loader: NativeExtensionLoader,
    slots: Vec<Slot>,
    load_order: Vec<String>,
}

impl ExtensionManager {
    pub fn new(config: CoreConfig) -> Self {
        let services = CoreServices::new(&config);
        Self::with_services(config, services)
    }

    pub fn with_services(config: CoreConfig, services: CoreServices) -> Self {
        Self {
            config,
            services,
            loader: NativeExtensionLoader::new(),
            slots: Vec::new(),
            load_order: Vec::new(),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// The services handed to every extension.
    pub fn services(&self) -> &CoreServices {
        &self.services
    }

    /// Register an extension compiled into the host.
    pub fn register_builtin<E: Extension + 'static>(&mut self, extension: E) -> Result<(), ExtensionError> {
        self.register_boxed(Box::new(extension))
    }

    pub fn register_boxed(&mut self, extension: ExtensionBox) -> Result<(), ExtensionError> {
        self.add(LoadedExtension::builtin(extension), ExtensionOrigin::Builtin)
    }

    /// Load every native module found in the configured directories.
    ///
    /// A module that fails to load is reported and skipped.
    pub fn discover(&mut self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        let dirs = self.config.extension_dirs.clone();

        for dir in &dirs {
            for path in self.loader.discover(dir) {
                let outcome = self.loader.load(&path).and_then(|loaded| {
                    let name = loaded.extension().name().to_string();
                    self.add(loaded, ExtensionOrigin::Native { path: path.clone() })
                        .map(|()| name)
                });
                match outcome {
                    Ok(name) => report.loaded.push(name),
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "failed to load extension module");
                        report.failed.push((path, err));
                    }
                }
            }
        }

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "extension discovery finished"
        );
        report
    }

    fn add(&mut self, loaded: LoadedExtension, origin: ExtensionOrigin) -> Result<(), ExtensionError> {
        let extension = loaded.extension();
        let name = extension.name().to_string();
        if name.trim().is_empty() {
            return Err(ExtensionError::LoadFailed {
                path: PathBuf::from(origin.to_string()),
                message: "extension name is empty".to_string(),
            });
        }
        if self.slots.iter().any(|s| s.name == name) {
            return Err(ExtensionError::DuplicateExtension(name));
        }

        self.slots.push(Slot {
            version: extension.version(),
            dependencies: extension.dependencies(),
            capabilities: extension.capabilities(),
            name: name.clone(),
            origin,
            state: ExtensionState::Discovered,
            error: None,
            instance: Some(loaded),
        });
        tracing::debug!(extension = %name, "extension registered");
        self.transition(self.slots.len() - 1, ExtensionState::Loaded);
        Ok(())
    }

    fn graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for slot in &self.slots {
            graph.add(slot.name.clone(), slot.dependencies.iter().cloned());
        }
        graph
    }

    /// Dependency order of all registered extensions.
    pub fn resolve_order(&self) -> Result<Vec<String>, ExtensionError> {
        self.graph().resolve()
    }

    /// `(extension, dependency)` pairs naming an extension that was never registered.
    pub fn unknown_dependencies(&self) -> Vec<(String, String)> {
        self.graph().missing()
    }

    /// Initialize every loaded extension in dependency order.
    ///
    /// A dependency cycle aborts before any extension is initialized. Any
    /// other failure is isolated to the extension concerned and listed in
    /// the summary.
    pub fn start(&mut self) -> Result<StartupSummary, ExtensionError> {
        let graph = self.graph();
        let order = graph.resolve()?;
        let mut summary = StartupSummary {
            order: order.clone(),
            ..StartupSummary::default()
        };

        for name in &order {
            let Some(index) = self.index_of(name) else {
                continue;
            };
            if self.slots[index].state != ExtensionState::Loaded {
                continue;
            }

            match self.start_one(index, &graph) {
                Ok(()) => summary.active.push(name.clone()),
                Err(ExtensionError::Disabled(_)) => summary.disabled.push(name.clone()),
                Err(error) => summary.failed.push(FailedExtension {
                    name: name.clone(),
                    error,
                }),
            }
        }

        tracing::info!(
            active = summary.active.len(),
            disabled = summary.disabled.len(),
            failed = summary.failed.len(),
            "extension startup finished"
        );
        self.services.events.publish(
            Event::with_payload(EventType::EXTENSIONS_READY, summary.clone()).from_source("extensions"),
        );
        Ok(summary)
    }

    fn start_one(&mut self, index: usize, graph: &DependencyGraph) -> Result<(), ExtensionError> {
        let name = self.slots[index].name.clone();

        if self.config.is_disabled(&name) {
            let error = ExtensionError::Disabled(name.clone());
            tracing::info!(extension = %name, "extension disabled, skipping");
            self.slots[index].error = Some(error.clone());
            return Err(error);
        }

        if let Err(error) = self.check_dependencies(&name, graph) {
            tracing::warn!(extension = %name, error = %error, "extension skipped");
            self.slots[index].error = Some(error.clone());
            return Err(error);
        }

        let channel = self
            .services
            .communicator
            .open(name.clone(), self.slots[index].capabilities.iter().cloned())
            .map_err(|e| ExtensionError::InitFailed {
                extension: name.clone(),
                message: e.to_string(),
            })?;
        let ctx = ExtensionContext::new(name.clone(), self.services.clone(), channel);

        let outcome = match self.slots[index].instance.as_mut() {
            Some(instance) => {
                let extension = instance.extension_mut();
                catch_unwind(AssertUnwindSafe(|| extension.init(&ctx)))
                    .unwrap_or_else(|panic| {
                        Err(InitError::msg(format!("init panicked: {}", panic_message(panic.as_ref()))))
                    })
            }
            None => Err(InitError::msg("extension instance is gone")),
        };

        match outcome {
            Ok(()) => {
                self.transition(index, ExtensionState::Initialized);
                self.services.communicator.set_active(&name, true);
                self.transition(index, ExtensionState::Active);
                self.slots[index].error = None;
                self.load_order.push(name.clone());
                tracing::info!(extension = %name, "extension active");
                Ok(())
            }
            Err(err) => {
                let error = ExtensionError::InitFailed {
                    extension: name.clone(),
                    message: err.to_string(),
                };
                tracing::error!(extension = %name, error = %err, "extension failed to initialize");
                self.services.sink.report(Diagnostic::new(
                    DiagnosticOrigin::Extension,
                    name.clone(),
                    error.to_string(),
                ));
                self.teardown(&name);
                self.transition(index, ExtensionState::Unloaded);
                self.slots[index].instance = None;
                self.slots[index].error = Some(error.clone());
                Err(error)
            }
        }
    }

    fn check_dependencies(&self, name: &str, graph: &DependencyGraph) -> Result<(), ExtensionError> {
        for dependency in graph.dependencies(name) {
            if !graph.contains(dependency) {
                return Err(ExtensionError::UnknownDependency {
                    extension: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
            if self.state_of(dependency) != Some(ExtensionState::Active) {
                return Err(ExtensionError::DependencyUnsatisfied {
                    extension: name.to_string(),
                    dependency: dependency.clone(),
                });
            }
        }
        Ok(())
    }

    /// Unload one active extension.
    ///
    /// Refused while another active extension depends on it.
    pub fn unload(&mut self, name: &str) -> Result<(), ExtensionError> {
        let index = self
            .index_of(name)
            .ok_or_else(|| ExtensionError::NotFound(name.to_string()))?;
        let state = self.slots[index].state;
        if state != ExtensionState::Active {
            return Err(ExtensionError::InvalidState {
                extension: name.to_string(),
                state,
                operation: "unload",
            });
        }

        let dependents: Vec<String> = self
            .graph()
            .dependents(name)
            .into_iter()
            .filter(|d| self.state_of(d) == Some(ExtensionState::Active))
            .collect();
        if !dependents.is_empty() {
            return Err(ExtensionError::InUse {
                extension: name.to_string(),
                dependents,
            });
        }

        self.unload_at(index);
        Ok(())
    }

    /// Unload every active extension in reverse initialization order.
    pub fn shutdown(&mut self) {
        if self.load_order.is_empty() {
            return;
        }
        tracing::info!(count = self.load_order.len(), "shutting down extensions");
        while let Some(name) = self.load_order.last().cloned() {
            match self.index_of(&name) {
                Some(index) => self.unload_at(index),
                None => {
                    self.load_order.pop();
                }
            }
        }
    }

    fn unload_at(&mut self, index: usize) {
        let name = self.slots[index].name.clone();
        self.transition(index, ExtensionState::Unloading);
        self.services.communicator.set_active(&name, false);

        if let Some(instance) = self.slots[index].instance.as_mut() {
            let extension = instance.extension_mut();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| extension.unload())) {
                self.services.sink.report(Diagnostic::new(
                    DiagnosticOrigin::Extension,
                    name.clone(),
                    format!("unload panicked: {}", panic_message(panic.as_ref())),
                ));
            }
        }

        self.teardown(&name);
        self.transition(index, ExtensionState::Unloaded);
        self.slots[index].instance = None;
        self.load_order.retain(|n| n != &name);
        tracing::info!(extension = %name, "extension unloaded");
    }

    /// Remove everything an extension registered through its context.
    fn teardown(&self, name: &str) {
        let commands = self.services.commands.unregister_owner(name);
        let subscriptions = self.services.events.unsubscribe_owner(name);
        self.services.communicator.close(name);
        tracing::debug!(
            extension = %name,
            commands = commands.len(),
            subscriptions,
            "extension registrations removed"
        );
    }

    fn transition(&mut self, index: usize, to: ExtensionState) {
        let slot = &mut self.slots[index];
        let from = slot.state;
        slot.state = to;
        let change = ExtensionStateChanged {
            extension: slot.name.clone(),
            from,
            to,
        };
        tracing::debug!(%change, "extension state changed");
        self.services.events.publish(
            Event::with_payload(EventType::EXTENSION_STATE_CHANGED, change).from_source("extensions"),
        );
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    pub fn state_of(&self, name: &str) -> Option<ExtensionState> {
        self.index_of(name).map(|i| self.slots[i].state)
    }

    /// Names of active extensions in initialization order.
    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    pub fn descriptor(&self, name: &str) -> Option<ExtensionDescriptor> {
        self.index_of(name).map(|i| self.describe(&self.slots[i]))
    }

    /// Snapshots of every extension, in registration order.
    pub fn descriptors(&self) -> Vec<ExtensionDescriptor> {
        self.slots.iter().map(|s| self.describe(s)).collect()
    }

    fn describe(&self, slot: &Slot) -> ExtensionDescriptor {
        ExtensionDescriptor {
            name: slot.name.clone(),
            version: slot.version.clone(),
            dependencies: slot.dependencies.clone(),
            capabilities: slot.capabilities.clone(),
            state: slot.state,
            origin: slot.origin.clone(),
            error: slot.error.as_ref().map(ToString::to_string),
            commands: self.services.commands.owned_by(&slot.name),
            subscriptions: self.services.events.owned_count(&slot.name),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Drop for ExtensionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
