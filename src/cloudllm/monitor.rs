//! Monitor (event bus) — §4.5.
//!
//! Events are a plain `#[derive(Clone)] enum` with a default no-op convention for unhandled
//! cases. The composable multi-subscriber requirement §4.5 demands is the interesting part:
//! each [`Context`] is identified by an id and holds stable, `Arc`-held closures keyed by a
//! [`ListenerId`] so that `Monitor::set`/`delete` can unwire exactly the handlers they wired — a
//! naive "rebind a fresh closure on every wiring pass" would make detach impossible (§9, "Event
//! bus with de-wireable listeners").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::cloudllm::types::ServiceResponse;

/// Opaque handle returned by [`Monitor::on`] / [`Context::on_update`], used to remove a listener
/// later via [`Monitor::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

fn next_listener_id() -> ListenerId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    ListenerId(NEXT.fetch_add(1, Ordering::Relaxed))
}

/// A generic progress envelope: an A2A task snapshot, a normalized tool/agent response, or a
/// plain status string (§4.5).
#[derive(Debug, Clone)]
pub enum MonitorState {
    Response(ServiceResponse),
    Status(String),
}

/// One event published by a [`Context`] and relayed through its owning [`Monitor`].
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    Update {
        state: MonitorState,
        update: Option<serde_json::Value>,
    },
    Error {
        error: String,
        state: Option<MonitorState>,
    },
}

type Listener = Arc<dyn Fn(&MonitorEvent) + Send + Sync>;

/// A single publisher registered under an id in a [`Monitor`]. Contexts are created empty and
/// populated by calling [`Context::publish`] (typically from an adapter or the reactive loop);
/// the [`Monitor`] relays every publish to its own aggregate subscriber list.
#[derive(Default)]
pub struct Context {
    listeners: RwLock<HashMap<ListenerId, Listener>>,
}

impl Context {
    pub fn new() -> Self {
        Context {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a stable handler on this context, returning the id needed to unwire it.
    fn wire(&self, handler: Listener) -> ListenerId {
        let id = next_listener_id();
        self.listeners.write().unwrap().insert(id, handler);
        id
    }

    fn unwire(&self, id: ListenerId) {
        self.listeners.write().unwrap().remove(&id);
    }

    /// Publishes an event to every handler wired on this context. Emission is synchronous
    /// best-effort over a cloned snapshot of the listener list, so a slow or failing subscriber
    /// cannot block peers or wedge concurrent `wire`/`unwire` calls.
    pub fn publish(&self, event: MonitorEvent) {
        let snapshot: Vec<Listener> = self.listeners.read().unwrap().values().cloned().collect();
        for listener in snapshot {
            listener(&event);
        }
    }
}

/// Aggregates per-context `update`/`error` emissions into a single subscriber surface.
///
/// `Monitor::create` constructs a new [`Context`], wires the Monitor's own relaying closures
/// into it, and stores the context under `id`. `Monitor::set` re-wires an existing id (unwiring
/// first if one was already present) and `Monitor::delete` unwires before dropping the context —
/// matching §4.5's invariants exactly.
#[derive(Default)]
pub struct Monitor {
    contexts: RwLock<HashMap<String, (Arc<Context>, ListenerId)>>,
    subscribers: RwLock<HashMap<ListenerId, Listener>>,
}

impl Monitor {
    pub fn new() -> Self {
        Monitor {
            contexts: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Relays every event from `context` to all of this Monitor's subscribers. Each `Context`
    /// gets exactly one stable relay closure wired into it; that closure's `ListenerId` is kept
    /// alongside the context so a later `set`/`delete` can unwire precisely it.
    fn relay_into(self: &Arc<Self>, context: &Arc<Context>) -> ListenerId {
        let monitor = Arc::downgrade(self);
        context.wire(Arc::new(move |event: &MonitorEvent| {
            if let Some(monitor) = monitor.upgrade() {
                monitor.emit(event.clone());
            }
        }))
    }

    /// Registers a brand new context under `id`.
    pub fn create(self: &Arc<Self>, id: impl Into<String>) -> Arc<Context> {
        let context = Arc::new(Context::new());
        let listener_id = self.relay_into(&context);
        self.contexts
            .write()
            .unwrap()
            .insert(id.into(), (context.clone(), listener_id));
        context
    }

    /// Replaces the context registered under `id`, unwiring the previous one's relay first if
    /// present.
    pub fn set(self: &Arc<Self>, id: impl Into<String>, context: Arc<Context>) {
        let id = id.into();
        let mut contexts = self.contexts.write().unwrap();
        if let Some((old_context, old_listener)) = contexts.remove(&id) {
            old_context.unwire(old_listener);
        }
        drop(contexts);
        let listener_id = self.relay_into(&context);
        self.contexts.write().unwrap().insert(id, (context, listener_id));
    }

    /// Unwires and removes the context registered under `id`, if any.
    pub fn delete(&self, id: &str) {
        if let Some((context, listener_id)) = self.contexts.write().unwrap().remove(id) {
            context.unwire(listener_id);
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Context>> {
        self.contexts.read().unwrap().get(id).map(|(c, _)| c.clone())
    }

    pub fn context_count(&self) -> usize {
        self.contexts.read().unwrap().len()
    }

    /// Subscribes to every `update`/`error` emitted across all contexts. Returns a
    /// [`ListenerId`] usable with [`Monitor::off`].
    pub fn on<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&MonitorEvent) + Send + Sync + 'static,
    {
        let id = next_listener_id();
        self.subscribers.write().unwrap().insert(id, Arc::new(handler));
        id
    }

    /// Removes a previously registered subscriber. A no-op if `id` is unknown (already removed,
    /// or from a different Monitor).
    pub fn off(&self, id: ListenerId) {
        self.subscribers.write().unwrap().remove(&id);
    }

    pub fn remove_all_listeners(&self) {
        self.subscribers.write().unwrap().clear();
    }

    pub fn listener_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }

    fn emit(&self, event: MonitorEvent) {
        let snapshot: Vec<Listener> = self.subscribers.read().unwrap().values().cloned().collect();
        for listener in snapshot {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscriber_observes_events_published_on_any_context() {
        let monitor = Arc::new(Monitor::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        monitor.on(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let ctx_a = monitor.create("a");
        let ctx_b = monitor.create("b");
        ctx_a.publish(MonitorEvent::Update {
            state: MonitorState::Status("working".into()),
            update: None,
        });
        ctx_b.publish(MonitorEvent::Error {
            error: "boom".into(),
            state: None,
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn delete_unwires_so_further_publishes_are_not_observed() {
        let monitor = Arc::new(Monitor::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        monitor.on(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let ctx = monitor.create("a");
        monitor.delete("a");
        ctx.publish(MonitorEvent::Update {
            state: MonitorState::Status("ignored".into()),
            update: None,
        });

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.context_count(), 0);
    }

    #[test]
    fn set_unwires_the_previous_context_before_wiring_the_new_one() {
        let monitor = Arc::new(Monitor::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        monitor.on(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let old_ctx = monitor.create("a");
        let new_ctx = Arc::new(Context::new());
        monitor.set("a", new_ctx.clone());

        old_ctx.publish(MonitorEvent::Update {
            state: MonitorState::Status("stale".into()),
            update: None,
        });
        assert_eq!(count.load(Ordering::SeqCst), 0);

        new_ctx.publish(MonitorEvent::Update {
            state: MonitorState::Status("fresh".into()),
            update: None,
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn off_removes_only_the_targeted_subscriber() {
        let monitor = Monitor::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let (ca, cb) = (count_a.clone(), count_b.clone());
        let id_a = monitor.on(move |_| {
            ca.fetch_add(1, Ordering::SeqCst);
        });
        monitor.on(move |_| {
            cb.fetch_add(1, Ordering::SeqCst);
        });

        monitor.off(id_a);
        monitor.emit(MonitorEvent::Error {
            error: "x".into(),
            state: None,
        });

        assert_eq!(count_a.load(Ordering::SeqCst), 0);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }
}
