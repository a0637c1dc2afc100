//! In-process event bus.
//!
//! Listeners are registered per [`EventKind`] with a numeric priority;
//! higher priorities run first, ties run in registration order. A failing
//! listener is logged and skipped, never letting one subscriber starve the
//! rest. The bus is owned by the session engine and is not itself
//! synchronized.

use std::collections::HashMap;

use futures_util::future::BoxFuture;
use tracing::warn;

use crate::event::{Event, EventKind};

/// Error a listener may return; it is logged and otherwise ignored.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Handle returned by `subscribe`, used to remove the listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A registered callback. Sync callbacks borrow the event; async callbacks
/// take a clone because their future outlives the call.
pub enum Callback {
    Sync(Box<dyn FnMut(&Event) -> Result<(), ListenerError> + Send>),
    Async(Box<dyn FnMut(Event) -> BoxFuture<'static, Result<(), ListenerError>> + Send>),
}

impl Callback {
    pub fn sync<F>(f: F) -> Self
    where
        F: FnMut(&Event) -> Result<(), ListenerError> + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    pub fn async_fn<F, Fut>(mut f: F) -> Self
    where
        F: FnMut(Event) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<(), ListenerError>> + Send + 'static,
    {
        Self::Async(Box::new(move |event| Box::pin(f(event))))
    }
}

struct Listener {
    id: ListenerId,
    priority: i32,
    once: bool,
    callback: Callback,
}

/// Priority-ordered listener registry with per-kind emission counters.
#[derive(Default)]
pub struct EventBus {
    listeners: HashMap<EventKind, Vec<Listener>>,
    emitted: HashMap<EventKind, u64>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. `once` listeners are removed after their first
    /// delivery, before the next event can reach them.
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        priority: i32,
        once: bool,
        callback: Callback,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        let list = self.listeners.entry(kind).or_default();
        // Insert after listeners of equal priority so ties keep
        // registration order.
        let index = list.partition_point(|l| l.priority >= priority);
        list.insert(
            index,
            Listener {
                id,
                priority,
                once,
                callback,
            },
        );
        id
    }

    /// Remove one listener. Returns whether it was still registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        for list in self.listeners.values_mut() {
            if let Some(index) = list.iter().position(|l| l.id == id) {
                list.remove(index);
                return true;
            }
        }
        false
    }

    /// Remove every listener for one kind. Returns how many were dropped.
    pub fn unsubscribe_all(&mut self, kind: EventKind) -> usize {
        self.listeners.remove(&kind).map_or(0, |list| list.len())
    }

    /// Deliver `event` to its listeners in priority order. Returns the
    /// number of listeners invoked. Emission is counted even when nobody
    /// listens.
    pub async fn publish(&mut self, event: &Event) -> usize {
        let kind = event.kind();
        *self.emitted.entry(kind).or_insert(0) += 1;
        let Some(list) = self.listeners.get_mut(&kind) else {
            return 0;
        };
        let mut invoked = 0;
        let mut index = 0;
        while index < list.len() {
            let listener = &mut list[index];
            let outcome = match &mut listener.callback {
                Callback::Sync(f) => f(event),
                Callback::Async(f) => f(event.clone()).await,
            };
            invoked += 1;
            if let Err(error) = outcome {
                warn!(
                    kind = kind.as_str(),
                    listener = listener.id.0,
                    %error,
                    "event listener failed"
                );
            }
            if listener.once {
                list.remove(index);
            } else {
                index += 1;
            }
        }
        if list.is_empty() {
            self.listeners.remove(&kind);
        }
        invoked
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Kinds that currently have at least one listener.
    pub fn active_kinds(&self) -> Vec<EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(|kind| self.listener_count(*kind) > 0)
            .collect()
    }

    /// How many events of this kind have been published so far.
    pub fn emitted(&self, kind: EventKind) -> u64 {
        self.emitted.get(&kind).copied().unwrap_or(0)
    }
}
