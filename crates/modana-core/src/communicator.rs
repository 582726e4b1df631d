//! Point-to-point messaging between named extensions.
//!
//! Every extension owns one [`Channel`]. A channel can install a listener,
//! send a message to one named peer, or push a message to every peer whose
//! declared capabilities match a predicate. Targeted traffic never touches
//! the event bus taxonomy.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::diagnostics::{Diagnostic, DiagnosticOrigin, SharedSink, TracingSink};
use crate::dispatch::{call_guarded, DispatchLock};
use crate::event::Payload;

/// Capability tags an endpoint declares when its channel is opened.
pub type Capabilities = BTreeSet<String>;

/// Optional reply returned by a listener.
pub type Reply = Option<Payload>;

/// Listener installed on a channel.
pub type MessageHandler = Arc<dyn Fn(&Message) -> anyhow::Result<Reply> + Send + Sync>;

/// A targeted message.
#[derive(Clone)]
pub struct Message {
    from: String,
    kind: String,
    payload: Option<Payload>,
}

impl Message {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            from: String::new(),
            kind: kind.into(),
            payload: None,
        }
    }

    pub fn with_payload<T: Any + Send + Sync>(kind: impl Into<String>, payload: T) -> Self {
        Self {
            from: String::new(),
            kind: kind.into(),
            payload: Some(Arc::new(payload)),
        }
    }

    /// Sending channel. Filled in on delivery.
    pub fn from(&self) -> &str {
        &self.from
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref().and_then(|p| p.downcast_ref::<T>())
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("from", &self.from)
            .field("kind", &self.kind)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Communicator errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommunicatorError {
    #[error("Target not active: {0}")]
    TargetNotActive(String),

    #[error("Listener of {target} failed: {message}")]
    HandlerFailed { target: String, message: String },

    #[error("Channel already open: {0}")]
    ChannelInUse(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

/// Outcome of [`Channel::broadcast_to_interested`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

/// Snapshot of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListenerInfo {
    pub name: String,
    pub capabilities: Capabilities,
    pub active: bool,
    pub listening: bool,
}

struct Endpoint {
    generation: u64,
    capabilities: Capabilities,
    handler: Option<MessageHandler>,
    active: bool,
}

/// Registry of channels, one per extension name.
pub struct Communicator {
    endpoints: RwLock<BTreeMap<String, Endpoint>>,
    next_generation: AtomicU64,
    dispatch: Arc<DispatchLock>,
    sink: SharedSink,
}

impl Communicator {
    pub fn new() -> Self {
        Self::with_dispatch(Arc::new(DispatchLock::default()), Arc::new(TracingSink))
    }

    pub fn with_dispatch(dispatch: Arc<DispatchLock>, sink: SharedSink) -> Self {
        Self {
            endpoints: RwLock::new(BTreeMap::new()),
            next_generation: AtomicU64::new(1),
            dispatch,
            sink,
        }
    }

    /// Open the private channel of `name`.
    ///
    /// The endpoint starts inactive: peers cannot reach it until
    /// [`Communicator::set_active`] marks it active.
    pub fn open<I, S>(
        self: &Arc<Self>,
        name: impl Into<String>,
        capabilities: I,
    ) -> Result<Channel, CommunicatorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut endpoints = self.endpoints.write();
        if endpoints.contains_key(&name) {
            return Err(CommunicatorError::ChannelInUse(name));
        }
        endpoints.insert(
            name.clone(),
            Endpoint {
                generation,
                capabilities: capabilities.into_iter().map(Into::into).collect(),
                handler: None,
                active: false,
            },
        );
        tracing::debug!(channel = %name, "channel opened");
        Ok(Channel {
            owner: name,
            generation,
            communicator: Arc::clone(self),
        })
    }

    /// Mark an endpoint reachable or unreachable. Returns `false` for unknown names.
    pub fn set_active(&self, name: &str, active: bool) -> bool {
        match self.endpoints.write().get_mut(name) {
            Some(endpoint) => {
                endpoint.active = active;
                true
            }
            None => false,
        }
    }

    /// Whether `name` currently accepts messages.
    pub fn is_active(&self, name: &str) -> bool {
        self.endpoints
            .read()
            .get(name)
            .map(|e| e.active && e.handler.is_some())
            .unwrap_or(false)
    }

    /// Close the channel of `name`. Outstanding [`Channel`] handles stop working.
    pub fn close(&self, name: &str) -> bool {
        let closed = self.endpoints.write().remove(name).is_some();
        if closed {
            tracing::debug!(channel = %name, "channel closed");
        }
        closed
    }

    pub fn listeners(&self) -> Vec<ListenerInfo> {
        self.endpoints
            .read()
            .iter()
            .map(|(name, e)| ListenerInfo {
                name: name.clone(),
                capabilities: e.capabilities.clone(),
                active: e.active,
                listening: e.handler.is_some(),
            })
            .collect()
    }

    fn check_open(&self, owner: &str, generation: u64) -> Result<(), CommunicatorError> {
        match self.endpoints.read().get(owner) {
            Some(e) if e.generation == generation => Ok(()),
            _ => Err(CommunicatorError::ChannelClosed(owner.to_string())),
        }
    }

    fn deliver(
        &self,
        target: &str,
        handler: &MessageHandler,
        message: &Message,
    ) -> Result<Reply, CommunicatorError> {
        let outcome = match self.dispatch.enter() {
            Ok(_guard) => call_guarded(|| handler(message)),
            Err(err) => Err(err.to_string()),
        };
        outcome.map_err(|message_text| {
            self.sink.report(Diagnostic::new(
                DiagnosticOrigin::Message,
                format!("{} -> {}", message.from, target),
                message_text.clone(),
            ));
            CommunicatorError::HandlerFailed {
                target: target.to_string(),
                message: message_text,
            }
        })
    }
}

impl Default for Communicator {
    fn default() -> Self {
        Self::new()
    }
}

/// An extension's private endpoint on the [`Communicator`].
#[derive(Clone)]
pub struct Channel {
    owner: String,
    generation: u64,
    communicator: Arc<Communicator>,
}

impl Channel {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Install (or replace) this channel's listener.
    pub fn listen<F>(&self, handler: F) -> Result<(), CommunicatorError>
    where
        F: Fn(&Message) -> anyhow::Result<Reply> + Send + Sync + 'static,
    {
        match self.communicator.endpoints.write().get_mut(&self.owner) {
            Some(e) if e.generation == self.generation => {
                e.handler = Some(Arc::new(handler));
                Ok(())
            }
            _ => Err(CommunicatorError::ChannelClosed(self.owner.clone())),
        }
    }

    /// Capabilities this channel declared.
    pub fn capabilities(&self) -> Capabilities {
        self.communicator
            .endpoints
            .read()
            .get(&self.owner)
            .filter(|e| e.generation == self.generation)
            .map(|e| e.capabilities.clone())
            .unwrap_or_default()
    }

    /// Deliver `message` to `target` synchronously and return its reply.
    pub fn send(&self, target: &str, mut message: Message) -> Result<Reply, CommunicatorError> {
        self.communicator.check_open(&self.owner, self.generation)?;
        let handler = self
            .communicator
            .endpoints
            .read()
            .get(target)
            .filter(|e| e.active)
            .and_then(|e| e.handler.clone())
            .ok_or_else(|| CommunicatorError::TargetNotActive(target.to_string()))?;

        message.from = self.owner.clone();
        tracing::trace!(from = %self.owner, %target, kind = %message.kind, "send");
        self.communicator.deliver(target, &handler, &message)
    }

    /// Deliver `message` to every other active listener whose capabilities
    /// satisfy `interested`. Replies are discarded.
    pub fn broadcast_to_interested<P>(
        &self,
        mut message: Message,
        interested: P,
    ) -> Result<BroadcastReport, CommunicatorError>
    where
        P: Fn(&Capabilities) -> bool,
    {
        self.communicator.check_open(&self.owner, self.generation)?;
        let targets: Vec<(String, MessageHandler)> = self
            .communicator
            .endpoints
            .read()
            .iter()
            .filter(|(name, e)| *name != &self.owner && e.active && interested(&e.capabilities))
            .filter_map(|(name, e)| e.handler.clone().map(|h| (name.clone(), h)))
            .collect();

        message.from = self.owner.clone();
        let mut report = BroadcastReport::default();
        for (target, handler) in targets {
            match self.communicator.deliver(&target, &handler, &message) {
                Ok(_) => report.delivered.push(target),
                Err(_) => report.failed.push(target),
            }
        }
        Ok(report)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel").field("owner", &self.owner).finish()
    }
}
