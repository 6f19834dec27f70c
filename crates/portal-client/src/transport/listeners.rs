//! Event handler registry shared by transport implementations.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// Callback invoked with the arguments of a delivered event.
pub type Handler = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Identifies a registered handler for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct Entry {
    id: ListenerId,
    once: bool,
    handler: Handler,
}

/// Handlers keyed by event name.
pub struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, Vec<Entry>>>,
}

impl Listeners {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Register a persistent handler.
    pub fn on(&self, event: &str, handler: Handler) -> ListenerId {
        self.insert(event, handler, false)
    }

    /// Register a handler that is removed after its first delivery.
    pub fn once(&self, event: &str, handler: Handler) -> ListenerId {
        self.insert(event, handler, true)
    }

    /// Remove one handler, or all handlers of `event` when `id` is `None`.
    pub fn off(&self, event: &str, id: Option<ListenerId>) {
        let mut entries = self.entries.lock();
        match id {
            Some(id) => {
                if let Some(list) = entries.get_mut(event) {
                    list.retain(|entry| entry.id != id);
                    if list.is_empty() {
                        entries.remove(event);
                    }
                }
            }
            None => {
                entries.remove(event);
            }
        }
    }

    /// Remove every handler.
    pub fn remove_all(&self) {
        self.entries.lock().clear();
    }

    /// Number of handlers registered for `event`.
    #[must_use]
    pub fn count(&self, event: &str) -> usize {
        self.entries.lock().get(event).map_or(0, Vec::len)
    }

    /// Whether any handler is registered for `event`.
    #[must_use]
    pub fn has(&self, event: &str) -> bool {
        self.count(event) > 0
    }

    /// Deliver an event, returning the number of handlers invoked.
    ///
    /// Handlers run after the registry lock is released, so they may
    /// register or remove handlers themselves.
    pub fn dispatch(&self, event: &str, args: &[Value]) -> usize {
        let handlers: Vec<Handler> = {
            let mut entries = self.entries.lock();
            let Some(list) = entries.get_mut(event) else {
                return 0;
            };
            let handlers = list.iter().map(|entry| Arc::clone(&entry.handler)).collect();
            list.retain(|entry| !entry.once);
            if list.is_empty() {
                entries.remove(event);
            }
            handlers
        };

        for handler in &handlers {
            handler(args);
        }
        handlers.len()
    }

    fn insert(&self, event: &str, handler: Handler, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(Entry { id, once, handler });
        id
    }
}

impl Default for Listeners {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        let mut map = f.debug_map();
        for (event, list) in entries.iter() {
            map.entry(event, &list.len());
        }
        map.finish()
    }
}
