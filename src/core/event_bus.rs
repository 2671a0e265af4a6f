//! Observer registry for engine notifications.
//!
//! Callbacks run synchronously on the emitting thread (the render worker,
//! or the caller in inline mode) at the exact point of the state change.
//! A bus built with [`EventBus::new`] also keeps a bounded backlog that a
//! host loop drains with [`EventBus::poll`]; [`EventBus::immediate`] skips it.
//!
//! Callbacks must not block on the engine that emits them.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::{debug, trace, warn};

/// Backlog entries kept before the oldest are dropped
const BACKLOG_LIMIT: usize = 1024;

/// Anything sendable between threads can travel on the bus.
pub trait Event: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + Send + Sync> Event for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub type BoxedEvent = Box<dyn Event>;

type Handler = Arc<dyn Fn(&dyn Any) + Send + Sync>;
type Handlers = HashMap<TypeId, Vec<Handler>>;

#[derive(Default)]
struct Backlog {
    events: VecDeque<BoxedEvent>,
    /// Events dropped since the last poll
    dropped: usize,
}

/// Cloneable handle; clones share handlers and backlog.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<RwLock<Handlers>>,
    backlog: Option<Arc<Mutex<Backlog>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds = self.handlers.read().map(|h| h.len()).unwrap_or(0);
        f.debug_struct("EventBus")
            .field("event_kinds", &kinds)
            .field("backlog", &self.queue_len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::default(),
            backlog: Some(Arc::default()),
        }
    }

    /// No backlog: used when nothing will ever poll (unattended runs).
    pub fn immediate() -> Self {
        Self {
            handlers: Arc::default(),
            backlog: None,
        }
    }

    pub fn subscribe<E, F>(&self, callback: F)
    where
        E: Event,
        F: Fn(&E) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |any: &dyn Any| {
            if let Some(event) = any.downcast_ref::<E>() {
                callback(event);
            }
        });
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(TypeId::of::<E>())
            .or_default()
            .push(handler);
    }

    /// Run every handler registered for `E` in subscription order, then
    /// append the event to the backlog.
    pub fn emit<E: Event>(&self, event: E) {
        // Snapshot: handlers may subscribe while running
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .cloned()
            .unwrap_or_default();
        trace!("emit {} to {} handler(s)", std::any::type_name::<E>(), handlers.len());
        for handler in &handlers {
            handler(&event);
        }

        if let Some(backlog) = &self.backlog {
            let mut backlog = lock(backlog);
            if backlog.events.len() == BACKLOG_LIMIT {
                if backlog.dropped == 0 {
                    warn!("Event backlog full ({} entries), dropping oldest until polled", BACKLOG_LIMIT);
                }
                backlog.dropped += 1;
                backlog.events.pop_front();
            }
            backlog.events.push_back(Box::new(event));
        }
    }

    /// Drain the backlog, oldest first.
    pub fn poll(&self) -> Vec<BoxedEvent> {
        let Some(backlog) = &self.backlog else {
            return Vec::new();
        };
        let mut backlog = lock(backlog);
        if backlog.dropped > 0 {
            debug!("{} event(s) were dropped from the backlog since the last poll", backlog.dropped);
            backlog.dropped = 0;
        }
        backlog.events.drain(..).collect()
    }

    /// Events lost to overflow since the last poll.
    pub fn dropped_count(&self) -> usize {
        self.backlog.as_ref().map_or(0, |b| lock(b).dropped)
    }

    pub fn unsubscribe_all<E: Event>(&self) {
        self.handlers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<E>());
    }

    pub fn has_subscribers<E: Event>(&self) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<E>())
            .is_some_and(|h| !h.is_empty())
    }

    pub fn queue_len(&self) -> usize {
        self.backlog.as_ref().map_or(0, |b| lock(b).events.len())
    }
}

fn lock(backlog: &Mutex<Backlog>) -> MutexGuard<'_, Backlog> {
    backlog.lock().unwrap_or_else(|e| e.into_inner())
}

/// Downcast a polled event.
///
/// Goes through `dyn Event` explicitly: `as_any()` on the box itself would
/// resolve to the blanket impl for `Box<dyn Event>`.
pub fn downcast_event<E: Event>(event: &BoxedEvent) -> Option<&E> {
    (**event).as_any().downcast_ref::<E>()
}
