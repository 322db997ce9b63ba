//! Typed publish/subscribe event bus shared between host and plugins.
//!
//! Handlers are keyed by event `TypeId` and ordered by priority (highest
//! first). `publish` dispatches synchronously; `queue` defers the event
//! until the next `flush`, which the server calls once per frame.

use std::any::{Any, TypeId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

type ErasedHandler = Box<dyn Fn(&dyn Any) + Send + Sync>;

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct HandlerEntry {
    id: SubscriptionId,
    priority: i32,
    handler: ErasedHandler,
}

/// Priority-ordered, type-keyed event dispatcher.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<TypeId, Vec<HandlerEntry>>>,
    deferred: Mutex<VecDeque<(TypeId, Box<dyn Any + Send>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to events of type `E`. Higher priorities run first;
    /// equal priorities run in subscription order.
    pub fn subscribe<E: Any + Send>(
        &self,
        priority: i32,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let erased: ErasedHandler = Box::new(move |any| {
            if let Some(event) = any.downcast_ref::<E>() {
                handler(event);
            }
        });
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let mut handlers = self.handlers.write();
        let entries = handlers.entry(TypeId::of::<E>()).or_default();
        // Insert after the last entry with priority >= ours.
        let pos = entries
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(entries.len());
        entries.insert(
            pos,
            HandlerEntry {
                id,
                priority,
                handler: erased,
            },
        );
        id
    }

    /// Removes a single subscription. Returns false for unknown handles.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        for entries in handlers.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                return true;
            }
        }
        false
    }

    /// Dispatches an event to all current subscribers, synchronously.
    pub fn publish<E: Any + Send>(&self, event: &E) {
        let handlers = self.handlers.read();
        if let Some(entries) = handlers.get(&TypeId::of::<E>()) {
            for entry in entries {
                (entry.handler)(event);
            }
        }
    }

    /// Defers an event until the next [`EventBus::flush`].
    pub fn queue<E: Any + Send>(&self, event: E) {
        self.deferred
            .lock()
            .push_back((TypeId::of::<E>(), Box::new(event)));
    }

    /// Dispatches all deferred events in queue order. Events queued by
    /// handlers during the flush run in the same flush.
    pub fn flush(&self) {
        loop {
            let next = self.deferred.lock().pop_front();
            let Some((type_id, event)) = next else {
                return;
            };
            let handlers = self.handlers.read();
            if let Some(entries) = handlers.get(&type_id) {
                for entry in entries {
                    (entry.handler)(event.as_ref());
                }
            }
        }
    }

    /// Number of subscribers for event type `E`.
    pub fn handler_count<E: Any + Send>(&self) -> usize {
        self.handlers
            .read()
            .get(&TypeId::of::<E>())
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Number of events waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.deferred.lock().len()
    }

    /// Removes all subscribers for event type `E`.
    pub fn unsubscribe_all<E: Any + Send>(&self) {
        self.handlers.write().remove(&TypeId::of::<E>());
    }
}
