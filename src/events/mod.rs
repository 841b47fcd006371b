//! Event bus for lifecycle events.
//!
//! Publishers emit at every phase boundary of an execution; subscribers
//! register per-kind or for every kind. Dispatch is synchronous in
//! registration order and a panicking handler is isolated and logged,
//! never propagated to the publisher. Queueing or async fan-out, where
//! needed, belongs to the subscriber.

mod types;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

pub use types::{Event, EventKind, EventSource};

/// An event handler callback.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifier assigned to a registered handler, used to unregister it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct HandlerId {
    name: String,
    id: u64,
}

impl fmt::Debug for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HandlerId({}:{})", self.id, self.name)
    }
}

static HANDLER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

impl HandlerId {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: HANDLER_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Human-readable name given at registration.
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct HandlerEntry {
    id: HandlerId,
    /// `None` subscribes to every kind.
    kind: Option<EventKind>,
    handler: Handler,
}

/// Instance-scoped event bus.
///
/// An agent holds an `Arc<EventBus>` and emits through it; tests and
/// embedding applications subscribe to observe execution lifecycles.
#[derive(Default)]
pub struct EventBus {
    entries: RwLock<Vec<HandlerEntry>>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a single event kind.
    pub fn on(
        &self,
        kind: EventKind,
        name: impl Into<String>,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> HandlerId {
        self.register(Some(kind), name, Arc::new(handler))
    }

    /// Subscribe to every event kind.
    pub fn on_any(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> HandlerId {
        self.register(None, name, Arc::new(handler))
    }

    fn register(
        &self,
        kind: Option<EventKind>,
        name: impl Into<String>,
        handler: Handler,
    ) -> HandlerId {
        let id = HandlerId::new(name);
        self.entries.write().push(HandlerEntry {
            id: id.clone(),
            kind,
            handler,
        });
        id
    }

    /// Remove a previously registered handler.
    pub fn off(&self, id: &HandlerId) {
        self.entries.write().retain(|e| e.id != *id);
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Emit an event to all matching subscribers, in registration order.
    pub fn emit(&self, event: Event) {
        let handlers: Vec<Handler> = {
            let entries = self.entries.read();
            entries
                .iter()
                .filter(|e| e.kind.is_none() || e.kind == Some(event.kind))
                .map(|e| e.handler.clone())
                .collect()
        };

        for handler in handlers {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(&event);
            }));
            if result.is_err() {
                log::error!("event handler panicked while handling {}", event.kind);
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<EventKind>>>, impl Fn(&Event) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |event: &Event| sink.lock().push(event.kind))
    }

    #[test]
    fn per_kind_subscription_filters() {
        let bus = EventBus::new();
        let (seen, handler) = recorder();
        bus.on(EventKind::ExecutionStarted, "rec", handler);

        bus.emit(Event::new(EventKind::ExecutionStarted, EventSource::default()));
        bus.emit(Event::new(EventKind::ExecutionCompleted, EventSource::default()));

        assert_eq!(*seen.lock(), vec![EventKind::ExecutionStarted]);
    }

    #[test]
    fn catch_all_sees_everything_in_order() {
        let bus = EventBus::new();
        let (seen, handler) = recorder();
        bus.on_any("rec", handler);

        bus.emit(Event::new(EventKind::ExecutionStarted, EventSource::default()));
        bus.emit(Event::new(EventKind::ToolUsageStarted, EventSource::default()));
        bus.emit(Event::new(EventKind::ExecutionCompleted, EventSource::default()));

        assert_eq!(
            *seen.lock(),
            vec![
                EventKind::ExecutionStarted,
                EventKind::ToolUsageStarted,
                EventKind::ExecutionCompleted,
            ]
        );
    }

    #[test]
    fn off_unregisters() {
        let bus = EventBus::new();
        let (seen, handler) = recorder();
        let id = bus.on_any("rec", handler);
        bus.off(&id);

        bus.emit(Event::new(EventKind::ExecutionStarted, EventSource::default()));
        assert!(seen.lock().is_empty());
        assert_eq!(bus.handler_count(), 0);
    }

    #[test]
    fn panicking_handler_does_not_poison_the_bus() {
        let bus = EventBus::new();
        bus.on_any("boom", |_| panic!("handler failure"));
        let (seen, handler) = recorder();
        bus.on_any("rec", handler);

        bus.emit(Event::new(EventKind::ExecutionStarted, EventSource::default()));
        assert_eq!(seen.lock().len(), 1);
    }
}
