//! Command registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{CommandChange, CommandDescriptor, CommandError, CommandSignature, CommandValue};
use crate::diagnostics::{Diagnostic, DiagnosticOrigin, SharedSink, TracingSink};
use crate::dispatch::{call_guarded, DispatchLock};
use crate::event::{Event, EventType};
use crate::eventbus::EventBus;

/// Registry mapping command names to handlers.
///
/// Registration under an existing name fails with
/// [`CommandError::DuplicateName`]; it never replaces the existing command.
pub struct CommandRegistry {
    commands: RwLock<BTreeMap<String, Arc<CommandDescriptor>>>,
    dispatch: Arc<DispatchLock>,
    sink: SharedSink,
    events: Option<Arc<EventBus>>,
}

impl CommandRegistry {
    /// Standalone registry with its own dispatch lock and no lifecycle events.
    pub fn new() -> Self {
        Self::with_dispatch(Arc::new(DispatchLock::default()), Arc::new(TracingSink))
    }

    pub fn with_dispatch(dispatch: Arc<DispatchLock>, sink: SharedSink) -> Self {
        Self {
            commands: RwLock::new(BTreeMap::new()),
            dispatch,
            sink,
            events: None,
        }
    }

    /// Publish `COMMAND_REGISTERED` / `COMMAND_UNREGISTERED` on `events`.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register a command.
    pub fn register(&self, descriptor: CommandDescriptor) -> Result<(), CommandError> {
        descriptor
            .validate()
            .map_err(|reason| CommandError::InvalidDescriptor {
                name: descriptor.name().to_string(),
                reason,
            })?;

        let change = CommandChange {
            name: descriptor.name().to_string(),
            owner: descriptor.owner().map(str::to_string),
        };

        {
            let mut commands = self.commands.write();
            if commands.contains_key(descriptor.name()) {
                return Err(CommandError::DuplicateName(descriptor.name().to_string()));
            }
            commands.insert(descriptor.name().to_string(), Arc::new(descriptor));
        }

        tracing::debug!(command = %change.name, owner = ?change.owner, "command registered");
        self.notify(EventType::COMMAND_REGISTERED, change);
        Ok(())
    }

    /// Remove a command. No-op if it is not registered.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.commands.write().remove(name);
        self.removed(name, removed)
    }

    /// Remove a command only if it was registered by `owner`.
    pub fn unregister_owned(&self, owner: &str, name: &str) -> bool {
        let removed = {
            let mut commands = self.commands.write();
            match commands.get(name) {
                Some(d) if d.owner() == Some(owner) => commands.remove(name),
                _ => None,
            }
        };
        self.removed(name, removed)
    }

    fn removed(&self, name: &str, removed: Option<Arc<CommandDescriptor>>) -> bool {
        match removed {
            Some(descriptor) => {
                tracing::debug!(command = %name, "command unregistered");
                self.notify(
                    EventType::COMMAND_UNREGISTERED,
                    CommandChange {
                        name: name.to_string(),
                        owner: descriptor.owner().map(str::to_string),
                    },
                );
                true
            }
            None => false,
        }
    }

    /// Remove every command registered by `owner`. Returns the removed names.
    pub fn unregister_owner(&self, owner: &str) -> Vec<String> {
        let removed: Vec<String> = {
            let mut commands = self.commands.write();
            let names: Vec<String> = commands
                .values()
                .filter(|d| d.owner() == Some(owner))
                .map(|d| d.name().to_string())
                .collect();
            for name in &names {
                commands.remove(name);
            }
            names
        };

        for name in &removed {
            self.notify(
                EventType::COMMAND_UNREGISTERED,
                CommandChange {
                    name: name.clone(),
                    owner: Some(owner.to_string()),
                },
            );
        }
        if !removed.is_empty() {
            tracing::debug!(owner = %owner, count = removed.len(), "owner commands unregistered");
        }
        removed
    }

    /// Invoke a command.
    ///
    /// Arguments are checked against the stored signature before the handler
    /// runs; omitted trailing arguments take their slot default. A handler
    /// error, a panic, or a return value of the wrong type yields
    /// [`CommandError::HandlerFailed`] and a diagnostic report.
    pub fn invoke(
        &self,
        name: &str,
        args: Vec<CommandValue>,
    ) -> Result<CommandValue, CommandError> {
        let descriptor = self
            .commands
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CommandError::NotFound(name.to_string()))?;

        let args = descriptor
            .bind(args)
            .map_err(|reason| CommandError::ArgumentMismatch {
                command: name.to_string(),
                reason,
            })?;

        let _guard = self
            .dispatch
            .enter()
            .map_err(|err| self.fail(name, err.to_string()))?;

        tracing::debug!(command = %name, "invoking command");
        let handler = Arc::clone(&descriptor.handler);
        match call_guarded(|| handler(args.as_slice())) {
            Ok(value) if descriptor.return_type().accepts(&value) => Ok(value),
            Ok(value) => Err(self.fail(
                name,
                format!(
                    "handler returned {} but the command declares {}",
                    value.value_type(),
                    descriptor.return_type()
                ),
            )),
            Err(message) => Err(self.fail(name, message)),
        }
    }

    fn fail(&self, command: &str, message: String) -> CommandError {
        self.sink.report(Diagnostic::new(
            DiagnosticOrigin::Command,
            command,
            message.clone(),
        ));
        CommandError::HandlerFailed {
            command: command.to_string(),
            message,
        }
    }

    fn notify(&self, event_type: EventType, change: CommandChange) {
        if let Some(events) = &self.events {
            events.publish(Event::with_payload(event_type, change).from_source("commands"));
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.read().contains_key(name)
    }

    /// Signature of one command.
    pub fn describe(&self, name: &str) -> Option<CommandSignature> {
        self.commands.read().get(name).map(|d| d.signature())
    }

    /// Signatures of all commands, sorted by name.
    pub fn list(&self) -> Vec<CommandSignature> {
        self.commands.read().values().map(|d| d.signature()).collect()
    }

    /// Names of the commands registered by `owner`, sorted.
    pub fn owned_by(&self, owner: &str) -> Vec<String> {
        self.commands
            .read()
            .values()
            .filter(|d| d.owner() == Some(owner))
            .map(|d| d.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.read().is_empty()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
