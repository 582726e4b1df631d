//! Service handles injected into extensions.

use std::sync::{Arc, Weak};

use crate::command::{
    CommandDescriptor, CommandError, CommandRegistry, CommandSignature, CommandValue,
};
use crate::communicator::{Channel, Communicator};
use crate::config::CoreConfig;
use crate::datastore::DataStore;
use crate::diagnostics::{Diagnostic, DiagnosticOrigin, SharedSink, TracingSink};
use crate::dispatch::DispatchLock;
use crate::event::{Event, EventType};
use crate::eventbus::{DispatchReport, EventBus, EventReceiver, SubscriptionId};

/// The shared services of one application instance.
///
/// Built once and handed around by `Arc`; there are no global singletons.
/// Every service shares one dispatch lock and one diagnostic sink.
#[derive(Clone)]
pub struct CoreServices {
    pub dispatch: Arc<DispatchLock>,
    pub sink: SharedSink,
    pub events: Arc<EventBus>,
    pub commands: Arc<CommandRegistry>,
    pub communicator: Arc<Communicator>,
    pub datastore: Arc<DataStore>,
}

impl CoreServices {
    pub fn new(config: &CoreConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    pub fn with_sink(config: &CoreConfig, sink: SharedSink) -> Self {
        let dispatch = Arc::new(DispatchLock::new(config.max_dispatch_depth));
        let events = Arc::new(
            EventBus::with_dispatch(Arc::clone(&dispatch), Arc::clone(&sink)).with_name("core"),
        );

        let mut commands = CommandRegistry::with_dispatch(Arc::clone(&dispatch), Arc::clone(&sink));
        if config.emit_command_events {
            commands = commands.with_event_bus(Arc::clone(&events));
        }

        Self {
            communicator: Arc::new(Communicator::with_dispatch(
                Arc::clone(&dispatch),
                Arc::clone(&sink),
            )),
            datastore: Arc::new(DataStore::with_event_bus(Arc::clone(&events))),
            commands: Arc::new(commands),
            events,
            dispatch,
            sink,
        }
    }
}

impl Default for CoreServices {
    fn default() -> Self {
        Self::new(&CoreConfig::default())
    }
}

/// What an extension sees of the core.
///
/// Subscriptions and commands made through the context are tagged with the
/// extension's name so the manager can remove them when the extension is
/// rolled back or unloaded.
#[derive(Clone)]
pub struct ExtensionContext {
    name: String,
    services: CoreServices,
    channel: Channel,
}

impl ExtensionContext {
    pub(crate) fn new(name: String, services: CoreServices, channel: Channel) -> Self {
        Self {
            name,
            services,
            channel,
        }
    }

    /// Name of the extension this context belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.services
            .events
            .subscribe_owned(self.name.clone(), event_type, handler)
    }

    /// Channel subscription for a worker context. Ends when the receiver is
    /// dropped or the extension is unloaded.
    pub fn subscribe_channel(&self, event_type: EventType) -> EventReceiver {
        self.services
            .events
            .subscribe_channel_owned(self.name.clone(), event_type)
    }

    /// Remove one of this extension's subscriptions.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.services.events.unsubscribe_owned(&self.name, id)
    }

    /// Publish with this extension recorded as the event source.
    pub fn publish(&self, event: Event) -> DispatchReport {
        self.services.events.publish(event.from_source(self.name.clone()))
    }

    /// Register a command owned by this extension.
    pub fn register_command(&self, descriptor: CommandDescriptor) -> Result<(), CommandError> {
        self.services
            .commands
            .register(descriptor.with_owner(self.name.clone()))
    }

    /// Remove one of this extension's commands. Commands of other extensions
    /// are left alone.
    pub fn unregister_command(&self, name: &str) -> bool {
        self.services.commands.unregister_owned(&self.name, name)
    }

    pub fn invoke(&self, name: &str, args: Vec<CommandValue>) -> Result<CommandValue, CommandError> {
        self.services.commands.invoke(name, args)
    }

    /// This extension's private channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn datastore(&self) -> &Arc<DataStore> {
        &self.services.datastore
    }

    pub fn describe_command(&self, name: &str) -> Option<CommandSignature> {
        self.services.commands.describe(name)
    }

    /// Read-only view of the command registry for handlers that outlive `init`.
    pub fn command_catalog(&self) -> CommandCatalog {
        CommandCatalog {
            registry: Arc::downgrade(&self.services.commands),
        }
    }

    /// Report a failure the extension handled itself.
    pub fn report(&self, message: impl Into<String>) {
        self.services.sink.report(Diagnostic::new(
            DiagnosticOrigin::Extension,
            self.name.clone(),
            message,
        ));
    }
}

/// Weak, read-only handle on the command registry.
///
/// Holding it inside a command handler does not keep the registry alive.
#[derive(Clone)]
pub struct CommandCatalog {
    registry: Weak<CommandRegistry>,
}

impl CommandCatalog {
    /// Signatures of all commands, sorted by name. Empty once the registry is gone.
    pub fn list(&self) -> Vec<CommandSignature> {
        self.registry.upgrade().map(|r| r.list()).unwrap_or_default()
    }

    pub fn describe(&self, name: &str) -> Option<CommandSignature> {
        self.registry.upgrade().and_then(|r| r.describe(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.upgrade().is_some_and(|r| r.contains(name))
    }
}
