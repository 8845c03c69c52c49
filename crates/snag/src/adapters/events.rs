use super::xhr::ReadyState;
use crate::error::panic_message;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum XhrEventKind {
    ReadyStateChange,
    LoadStart,
    Load,
    Error,
    Abort,
    LoadEnd,
}

impl XhrEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            XhrEventKind::ReadyStateChange => "readystatechange",
            XhrEventKind::LoadStart => "loadstart",
            XhrEventKind::Load => "load",
            XhrEventKind::Error => "error",
            XhrEventKind::Abort => "abort",
            XhrEventKind::LoadEnd => "loadend",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XhrEvent {
    pub kind: XhrEventKind,
    pub ready_state: ReadyState,
    pub status: u16,
}

pub type Listener = Arc<dyn Fn(&XhrEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    /// One assignable handler per kind (`onload`, ...)
    handlers: HashMap<XhrEventKind, Listener>,
    listeners: Vec<(ListenerId, XhrEventKind, Listener)>,
    next_id: u64,
}

/// Single dispatch point for both the handler-property surface and the
/// listener surface. Handlers run before listeners; listeners run in
/// registration order.
#[derive(Default)]
pub struct EventEmitter {
    registry: Mutex<Registry>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_handler(&self, kind: XhrEventKind, handler: Option<Listener>) {
        let mut registry = self.registry.lock();
        match handler {
            Some(handler) => {
                registry.handlers.insert(kind, handler);
            }
            None => {
                registry.handlers.remove(&kind);
            }
        }
    }

    pub fn add_listener(&self, kind: XhrEventKind, listener: Listener) -> ListenerId {
        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);
        registry.listeners.push((id, kind, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut registry = self.registry.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|(lid, _, _)| *lid != id);
        registry.listeners.len() != before
    }

    /// Call every callback registered for `event.kind`. Callbacks run
    /// outside the lock and a panicking callback does not stop the rest.
    pub fn emit(&self, event: &XhrEvent) {
        let callbacks: Vec<Listener> = {
            let registry = self.registry.lock();
            registry
                .handlers
                .get(&event.kind)
                .cloned()
                .into_iter()
                .chain(
                    registry
                        .listeners
                        .iter()
                        .filter(|(_, kind, _)| *kind == event.kind)
                        .map(|(_, _, l)| Arc::clone(l)),
                )
                .collect()
        };

        for callback in callbacks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(event))) {
                warn!(event = event.kind.as_str(), "event callback panicked: {}", panic_message(payload));
            }
        }
    }
}
