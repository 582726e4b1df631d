//! Event bus for modana's decoupled extension communication.
//!
//! The bus delivers events synchronously to the handlers subscribed to the
//! event's type, in registration order. It supports:
//! - Handler subscriptions owned by an extension (removed in bulk on unload)
//! - Channel subscriptions for async worker contexts
//! - Re-entrant publishing from inside a handler (depth-first delivery)
//!
//! Each publish walks a snapshot of the subscriber list taken when the
//! publish starts: a handler unsubscribed mid-dispatch still receives the
//! in-flight event, a handler subscribed mid-dispatch does not.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::diagnostics::{Diagnostic, DiagnosticOrigin, SharedSink, TracingSink};
use crate::dispatch::{call_guarded, DispatchLock};
use crate::event::{Event, EventType};

/// Handler invoked for every event of the subscribed type.
pub type EventHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Opaque subscription handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Outcome of one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Handlers that ran to completion plus channels that accepted the event.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
    /// The publish was refused because the nesting limit was reached.
    pub refused: bool,
}

#[derive(Clone)]
enum Target {
    Handler(EventHandler),
    Channel(mpsc::UnboundedSender<Event>),
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    owner: Option<String>,
    target: Target,
}

/// Synchronous, type-keyed publish/subscribe bus.
pub struct EventBus {
    subscribers: RwLock<HashMap<EventType, Vec<Subscriber>>>,
    next_id: AtomicU64,
    dispatch: Arc<DispatchLock>,
    sink: SharedSink,
    name: String,
}

impl EventBus {
    /// Create a standalone event bus with its own dispatch lock.
    pub fn new() -> Self {
        Self::with_dispatch(Arc::new(DispatchLock::default()), Arc::new(TracingSink))
    }

    /// Create an event bus sharing a dispatch lock and diagnostic sink.
    pub fn with_dispatch(dispatch: Arc<DispatchLock>, sink: SharedSink) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            dispatch,
            sink,
            name: "default".to_string(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe a handler to one event type.
    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(event_type, None, Target::Handler(Arc::new(handler)))
    }

    /// Subscribe a handler on behalf of an extension.
    ///
    /// Owned subscriptions are removed together by [`EventBus::unsubscribe_owner`].
    pub fn subscribe_owned<F>(
        &self,
        owner: impl Into<String>,
        event_type: EventType,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(
            event_type,
            Some(owner.into()),
            Target::Handler(Arc::new(handler)),
        )
    }

    /// Subscribe through a channel, for consumers running in async contexts.
    ///
    /// Dropping the receiver ends the subscription; it is pruned on the next
    /// publish of that type.
    pub fn subscribe_channel(&self, event_type: EventType) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.insert(event_type, None, Target::Channel(tx));
        EventReceiver { id, rx }
    }

    /// Channel subscription on behalf of an extension.
    ///
    /// Removed by [`EventBus::unsubscribe_owner`]; the receiver then yields `None`.
    pub fn subscribe_channel_owned(&self, owner: impl Into<String>, event_type: EventType) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.insert(event_type, Some(owner.into()), Target::Channel(tx));
        EventReceiver { id, rx }
    }

    fn insert(&self, event_type: EventType, owner: Option<String>, target: Target) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(bus = %self.name, %event_type, subscription = id.0, "subscribe");
        self.subscribers
            .write()
            .entry(event_type)
            .or_default()
            .push(Subscriber { id, owner, target });
        id
    }

    /// Remove one subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        for list in subscribers.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove one subscription only if it belongs to `owner`.
    pub fn unsubscribe_owned(&self, owner: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        for list in subscribers.values_mut() {
            if let Some(pos) = list
                .iter()
                .position(|s| s.id == id && s.owner.as_deref() == Some(owner))
            {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove every subscription owned by `owner`. Returns how many were removed.
    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut removed = 0;
        let mut subscribers = self.subscribers.write();
        for list in subscribers.values_mut() {
            let before = list.len();
            list.retain(|s| s.owner.as_deref() != Some(owner));
            removed += before - list.len();
        }
        subscribers.retain(|_, list| !list.is_empty());
        removed
    }

    /// Number of subscriptions for one event type.
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.subscribers
            .read()
            .get(&event_type)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of subscriptions held by `owner`.
    pub fn owned_count(&self, owner: &str) -> usize {
        self.subscribers
            .read()
            .values()
            .flatten()
            .filter(|s| s.owner.as_deref() == Some(owner))
            .count()
    }

    /// Publish an event to every subscriber of its type.
    ///
    /// Never fails: handler failures are reported to the diagnostic sink and
    /// counted in the returned report.
    pub fn publish(&self, event: Event) -> DispatchReport {
        let event_type = event.event_type();
        let _guard = match self.dispatch.enter() {
            Ok(guard) => guard,
            Err(err) => {
                self.sink.report(Diagnostic::new(
                    DiagnosticOrigin::Event,
                    event_type.to_string(),
                    format!("publish refused: {err}"),
                ));
                return DispatchReport {
                    refused: true,
                    ..DispatchReport::default()
                };
            }
        };

        let snapshot = self
            .subscribers
            .read()
            .get(&event_type)
            .cloned()
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        let mut closed_channels = false;

        for subscriber in &snapshot {
            match &subscriber.target {
                Target::Handler(handler) => match call_guarded(|| handler(&event)) {
                    Ok(()) => report.delivered += 1,
                    Err(message) => {
                        report.failed += 1;
                        let subject = match &subscriber.owner {
                            Some(owner) => format!("{event_type} -> {owner}"),
                            None => event_type.to_string(),
                        };
                        self.sink
                            .report(Diagnostic::new(DiagnosticOrigin::Event, subject, message));
                    }
                },
                Target::Channel(tx) => {
                    if tx.send(event.clone()).is_ok() {
                        report.delivered += 1;
                    } else {
                        closed_channels = true;
                    }
                }
            }
        }

        if closed_channels {
            self.prune_closed(event_type);
        }

        tracing::trace!(
            bus = %self.name,
            %event_type,
            delivered = report.delivered,
            failed = report.failed,
            "event dispatched"
        );
        report
    }

    /// Publish an event without payload.
    pub fn publish_type(&self, event_type: EventType) -> DispatchReport {
        self.publish(Event::new(event_type))
    }

    fn prune_closed(&self, event_type: EventType) {
        if let Some(list) = self.subscribers.write().get_mut(&event_type) {
            list.retain(|s| match &s.target {
                Target::Channel(tx) => !tx.is_closed(),
                Target::Handler(_) => true,
            });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving end of a channel subscription.
pub struct EventReceiver {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventReceiver {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the bus dropped the subscription.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

/// Shared event bus handle.
pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;
    use parking_lot::Mutex;

    fn recording_bus() -> (EventBus, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let bus = EventBus::with_dispatch(Arc::new(DispatchLock::default()), sink.clone());
        (bus, sink)
    }

    #[test]
    fn test_publish_reaches_only_matching_type() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        bus.subscribe(EventType::PING, move |e| {
            log.lock().push(e.event_type());
            Ok(())
        });

        bus.publish_type(EventType::DEFAULT);
        let report = bus.publish_type(EventType::PING);

        assert_eq!(report.delivered, 1);
        assert_eq!(*seen.lock(), vec![EventType::PING]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_others() {
        let (bus, sink) = recording_bus();
        let hits = Arc::new(Mutex::new(0));

        bus.subscribe(EventType::PING, |_| Err(anyhow::anyhow!("broken subscriber")));
        bus.subscribe(EventType::PING, |_| panic!("panicking subscriber"));
        let counter = hits.clone();
        bus.subscribe(EventType::PING, move |_| {
            *counter.lock() += 1;
            Ok(())
        });

        let report = bus.publish_type(EventType::PING);

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(*hits.lock(), 1);
        let reports = sink.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].message.contains("broken subscriber"));
        assert!(reports[1].message.contains("panicking subscriber"));
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let id = bus.subscribe(EventType::PING, |_| Ok(()));
        assert_eq!(bus.subscriber_count(EventType::PING), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.publish_type(EventType::PING).delivered, 0);
    }

    #[test]
    fn test_unsubscribe_owner() {
        let bus = EventBus::new();
        bus.subscribe_owned("viewer", EventType::PING, |_| Ok(()));
        bus.subscribe_owned("viewer", EventType::DEFAULT, |_| Ok(()));
        bus.subscribe_owned("loader", EventType::PING, |_| Ok(()));

        assert_eq!(bus.owned_count("viewer"), 2);
        assert_eq!(bus.unsubscribe_owner("viewer"), 2);
        assert_eq!(bus.owned_count("viewer"), 0);
        assert_eq!(bus.subscriber_count(EventType::PING), 1);
        assert_eq!(bus.subscriber_count(EventType::DEFAULT), 0);
    }

    #[test]
    fn test_unsubscribe_owned_checks_owner() {
        let bus = EventBus::new();
        let theirs = bus.subscribe_owned("plot", EventType::PING, |_| Ok(()));
        let mine = bus.subscribe_owned("table", EventType::PING, |_| Ok(()));

        assert!(!bus.unsubscribe_owned("table", theirs));
        assert!(bus.unsubscribe_owned("table", mine));
        assert_eq!(bus.subscriber_count(EventType::PING), 1);
    }

    #[test]
    fn test_owned_channel_closes_on_owner_removal() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel_owned("worker", EventType::PING);
        assert_eq!(bus.owned_count("worker"), 1);

        bus.publish_type(EventType::PING);
        assert_eq!(bus.unsubscribe_owner("worker"), 1);
        assert!(rx.try_recv().is_some());
        assert!(rx.try_recv().is_none());
        assert_eq!(bus.publish_type(EventType::PING).delivered, 0);
    }

    #[test]
    fn test_runaway_recursion_is_refused() {
        let sink = Arc::new(MemorySink::new());
        let bus = Arc::new(EventBus::with_dispatch(
            Arc::new(DispatchLock::new(4)),
            sink.clone(),
        ));
        let depth = Arc::new(Mutex::new(0usize));

        let inner_bus = Arc::downgrade(&bus);
        let counter = depth.clone();
        bus.subscribe(EventType::PING, move |_| {
            *counter.lock() += 1;
            if let Some(bus) = inner_bus.upgrade() {
                bus.publish_type(EventType::PING);
            }
            Ok(())
        });

        let report = bus.publish_type(EventType::PING);
        assert!(!report.refused);
        assert_eq!(*depth.lock(), 4);
        assert_eq!(sink.len(), 1);
        assert!(sink.reports()[0].message.contains("refused"));
    }

    #[test]
    fn test_channel_subscription_receives_and_prunes() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel(EventType::DEFAULT);

        assert_eq!(bus.publish_type(EventType::DEFAULT).delivered, 1);
        assert_eq!(rx.try_recv().map(|e| e.event_type()), Some(EventType::DEFAULT));
        assert!(rx.try_recv().is_none());

        drop(rx);
        assert_eq!(bus.publish_type(EventType::DEFAULT).delivered, 0);
        assert_eq!(bus.subscriber_count(EventType::DEFAULT), 0);
    }

    #[tokio::test]
    async fn test_channel_recv_from_worker_thread() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe_channel(EventType::custom(7));

        let worker_bus = bus.clone();
        std::thread::spawn(move || {
            worker_bus.publish(Event::with_payload(EventType::custom(7), 42u32));
        })
        .join()
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.payload::<u32>(), Some(&42));
    }
}
