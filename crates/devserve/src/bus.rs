//! In-process event bus for server lifecycle notifications.
//!
//! Handlers are keyed by a closed [`EventKind`] enumeration and invoked
//! synchronously, in registration order, on the thread that calls
//! [`EventBus::emit`]. Events are not buffered: a handler only sees events
//! emitted after it subscribed.
//!
//! A handler returning `Err` stops delivery of that event and the error is
//! handed back to the emitter. Handlers that must never disrupt later
//! subscribers should log and return `Ok(())`.

use crate::compiler::{Compiler, Stats, StatsSummary};
use crate::error::ConfigError;
use crate::options::Options;
use crate::server::ServerInfo;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// The closed set of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Listening,
    BuildStarted,
    BuildFinished,
    CompilerWarning,
    CompilerError,
    Close,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::Listening,
        EventKind::BuildStarted,
        EventKind::BuildFinished,
        EventKind::CompilerWarning,
        EventKind::CompilerError,
        EventKind::Close,
    ];

    /// The wire name of the event, e.g. `build-started`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Listening => "listening",
            EventKind::BuildStarted => "build-started",
            EventKind::BuildFinished => "build-finished",
            EventKind::CompilerWarning => "compiler-warning",
            EventKind::CompilerError => "compiler-error",
            EventKind::Close => "close",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ConfigError::UnknownEvent(s.to_string()))
    }
}

/// Handle to the compiler that produced an event.
pub type CompilerRef = Arc<dyn Compiler>;

/// An event together with its payload.
#[derive(Clone)]
pub enum Event {
    /// The listener is bound and the initial hook taps are registered
    Listening {
        server: ServerInfo,
        options: Arc<Options>,
    },
    /// A compilation cycle is about to run
    BuildStarted { compiler: CompilerRef },
    /// A compilation cycle finished without blocking problems
    BuildFinished {
        stats: Arc<Stats>,
        compiler: CompilerRef,
    },
    /// A compilation cycle produced warnings
    CompilerWarning {
        json: StatsSummary,
        compiler: CompilerRef,
    },
    /// A compilation cycle produced blocking errors
    CompilerError {
        json: StatsSummary,
        compiler: CompilerRef,
    },
    /// The server has been torn down
    Close,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Listening { .. } => EventKind::Listening,
            Event::BuildStarted { .. } => EventKind::BuildStarted,
            Event::BuildFinished { .. } => EventKind::BuildFinished,
            Event::CompilerWarning { .. } => EventKind::CompilerWarning,
            Event::CompilerError { .. } => EventKind::CompilerError,
            Event::Close => EventKind::Close,
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Listening { server, .. } => f
                .debug_struct("Listening")
                .field("server", server)
                .finish_non_exhaustive(),
            Event::BuildStarted { compiler } => f
                .debug_struct("BuildStarted")
                .field("compiler", &compiler.name())
                .finish(),
            Event::BuildFinished { stats, compiler } => f
                .debug_struct("BuildFinished")
                .field("stats", stats)
                .field("compiler", &compiler.name())
                .finish(),
            Event::CompilerWarning { json, compiler } => f
                .debug_struct("CompilerWarning")
                .field("json", json)
                .field("compiler", &compiler.name())
                .finish(),
            Event::CompilerError { json, compiler } => f
                .debug_struct("CompilerError")
                .field("json", json)
                .field("compiler", &compiler.name())
                .finish(),
            Event::Close => f.write_str("Close"),
        }
    }
}

/// A subscriber callback.
pub type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Handlers to register when a bus is created, in order.
#[derive(Clone, Default)]
pub struct Subscriptions {
    entries: Vec<(EventKind, Handler)>,
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(kind, _)| kind))
            .finish()
    }
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `kind`.
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.entries.push((kind, Arc::new(handler)));
        self
    }

    /// Add a handler by wire name.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::UnknownEvent` for names outside [`EventKind::ALL`].
    pub fn on_named<F>(self, name: &str, handler: F) -> Result<Self, ConfigError>
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let kind = name.parse()?;
        Ok(self.on(kind, handler))
    }

    /// Validate an `on` value found in declarative configuration.
    ///
    /// Declarative sources cannot carry callables, so the only acceptable
    /// value is an empty mapping.
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let map = value
            .as_object()
            .ok_or_else(|| ConfigError::NotAMapping(value.to_string()))?;

        if let Some((name, _)) = map.iter().next() {
            return Err(ConfigError::HandlerNotCallable(name.clone()));
        }

        Ok(Self::default())
    }

    /// Append another set of subscriptions after this one.
    pub fn extend(&mut self, other: Subscriptions) {
        self.entries.extend(other.entries);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Publish/subscribe registry shared by the server and the compiler adapter.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<EventKind, Vec<Handler>>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            if let Some(list) = handlers.get(&kind) {
                map.entry(&kind.as_str(), &list.len());
            }
        }
        map.finish()
    }
}

impl EventBus {
    /// Create a bus pre-populated with `subscriptions`.
    pub fn new(subscriptions: Subscriptions) -> Self {
        let bus = Self::default();
        {
            let mut handlers = bus.handlers.write();
            for (kind, handler) in subscriptions.entries {
                handlers.entry(kind).or_default().push(handler);
            }
        }
        bus
    }

    /// Subscribe to `kind`. Handlers run in the order they were added.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
    }

    /// Deliver `event` to every current subscriber of its kind.
    ///
    /// The handler list is snapshotted before delivery so handlers may
    /// subscribe further handlers without deadlocking; those only see later
    /// events.
    ///
    /// # Errors
    ///
    /// Returns the first handler error. Later handlers for the same event are
    /// not invoked.
    pub fn emit(&self, event: &Event) -> anyhow::Result<()> {
        let handlers = self
            .handlers
            .read()
            .get(&event.kind())
            .cloned()
            .unwrap_or_default();

        tracing::trace!(event = %event.kind(), handlers = handlers.len(), "emit");

        for handler in handlers {
            handler(event)?;
        }

        Ok(())
    }

    /// Number of handlers registered for `kind`.
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Drop every handler.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, EventBus) {
        (Arc::new(Mutex::new(Vec::new())), EventBus::default())
    }

    #[test]
    fn test_event_kind_round_trips_wire_names() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_event_name_rejected() {
        let err = "foo".parse::<EventKind>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEvent(name) if name == "foo"));
    }

    #[test]
    fn test_subscriptions_from_options_are_invoked() {
        let (calls, _) = recorder();
        let seen = Arc::clone(&calls);
        let subs = Subscriptions::new().on(EventKind::Close, move |_| {
            seen.lock().push("close");
            Ok(())
        });

        let bus = EventBus::new(subs);
        bus.emit(&Event::Close).unwrap();

        assert_eq!(*calls.lock(), vec!["close"]);
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let (calls, bus) = recorder();
        let a = Arc::clone(&calls);
        let b = Arc::clone(&calls);
        bus.on(EventKind::Close, move |_| {
            a.lock().push("A");
            Ok(())
        });
        bus.on(EventKind::Close, move |_| {
            b.lock().push("B");
            Ok(())
        });

        bus.emit(&Event::Close).unwrap();
        assert_eq!(*calls.lock(), vec!["A", "B"]);
    }

    #[test]
    fn test_no_replay_for_late_subscribers() {
        let (calls, bus) = recorder();
        bus.emit(&Event::Close).unwrap();

        let seen = Arc::clone(&calls);
        bus.on(EventKind::Close, move |_| {
            seen.lock().push("late");
            Ok(())
        });

        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_handler_error_propagates_and_stops_delivery() {
        let (calls, bus) = recorder();
        bus.on(EventKind::Close, |_| Err(anyhow::anyhow!("boom")));
        let seen = Arc::clone(&calls);
        bus.on(EventKind::Close, move |_| {
            seen.lock().push("after");
            Ok(())
        });

        let err = bus.emit(&Event::Close).unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(calls.lock().is_empty());
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let bus = EventBus::default();
        let inner = bus.clone();
        bus.on(EventKind::Close, move |_| {
            inner.on(EventKind::Close, |_| Ok(()));
            Ok(())
        });

        bus.emit(&Event::Close).unwrap();
        assert_eq!(bus.listener_count(EventKind::Close), 2);
    }

    #[test]
    fn test_non_mapping_on_rejected() {
        let err = Subscriptions::from_value(&json!("foo")).unwrap_err();
        assert!(matches!(err, ConfigError::NotAMapping(_)));
    }

    #[test]
    fn test_non_callable_handler_rejected() {
        let err = Subscriptions::from_value(&json!({ "foo": "bar" })).unwrap_err();
        assert!(matches!(err, ConfigError::HandlerNotCallable(name) if name == "foo"));
    }

    #[test]
    fn test_empty_mapping_accepted() {
        let subs = Subscriptions::from_value(&json!({})).unwrap();
        assert!(subs.is_empty());
    }
}
