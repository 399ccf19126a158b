//! Change notifications emitted by the editor.
//!
//! Listeners are plain callbacks. [`EventBus::subscribe`] hands back a
//! [`Subscription`] guard; dropping the guard unregisters the listener, so a
//! consumer's registration never outlives the consumer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::authoring::AuthoringState;
use crate::config::EditorMode;
use crate::temporary::TemporaryState;
use crate::validation::ValidationState;

/// A state change, carrying the value that was replaced.
#[derive(Debug, Clone)]
pub enum EditorEvent {
    AuthoringStateChanged { previous: AuthoringState },
    ValidationStateChanged { previous: ValidationState },
    TemporaryStateChanged { previous: TemporaryState },
    ModeChanged { previous: EditorMode },
}

type Listener = Arc<dyn Fn(&EditorEvent) + Send + Sync>;

/// Registry of event listeners.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<BTreeMap<u64, Listener>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `listener`. It stays registered while the returned guard lives.
    #[must_use = "dropping the subscription unregisters the listener"]
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&EditorEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(id, Arc::new(listener));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    /// Deliver `event` to every listener, in registration order.
    ///
    /// The registry lock is released before any listener runs, so listeners
    /// may subscribe or unsubscribe from inside the callback.
    pub fn emit(&self, event: &EditorEvent) {
        let listeners: Vec<Listener> = self.lock().values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().remove(&id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Listener>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Registration guard returned by [`EventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<EventBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}
