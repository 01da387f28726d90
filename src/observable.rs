//! Named-event fan-out with per-registration handles and once-semantics.
//!
//! Every major component (Manager, Engine Session, Socket) publishes named
//! events through one of these rather than through inheritance; callers
//! compose by registration and drop the returned handle to deregister.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;

type Callback = Arc<dyn Fn(&[JsonValue]) + Send + Sync>;

struct Registration {
    id: u64,
    callback: Callback,
    once: bool,
}

#[derive(Default)]
struct Inner {
    listeners: HashMap<String, Vec<Registration>>,
}

/// A reusable observer/event-emitter component.
///
/// Cloning shares the same underlying registry (it is reference-counted),
/// matching the way a Manager and its Sockets subscribe to the same Engine
/// Session event stream.
#[derive(Clone, Default)]
pub struct Observable {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
}

/// A handle to a single registration. `remove()` is idempotent; it is safe
/// to call even after the event or the whole Observable has already been
/// cleared.
#[derive(Clone)]
pub struct ListenerHandle {
    observable: Observable,
    event: String,
    id: u64,
}

impl ListenerHandle {
    pub fn remove(&self) {
        self.observable.remove_by_id(&self.event, self.id);
    }

    pub fn event(&self) -> &str {
        &self.event
    }
}

impl Observable {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, event: &str, once: bool, callback: Callback) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock().unwrap();
        inner
            .listeners
            .entry(event.to_string())
            .or_default()
            .push(Registration { id, callback, once });
        ListenerHandle {
            observable: self.clone(),
            event: event.to_string(),
            id,
        }
    }

    /// Registers `callback` to run on every future emission of `event`.
    pub fn on<F>(&self, event: &str, callback: F) -> ListenerHandle
    where
        F: Fn(&[JsonValue]) + Send + Sync + 'static,
    {
        self.register(event, false, Arc::new(callback))
    }

    /// Registers `callback` to run exactly once. The registration is removed
    /// before the callback is invoked, so re-emitting `event` from within
    /// the callback cannot re-enter it.
    pub fn once<F>(&self, event: &str, callback: F) -> ListenerHandle
    where
        F: Fn(&[JsonValue]) + Send + Sync + 'static,
    {
        self.register(event, true, Arc::new(callback))
    }

    fn remove_by_id(&self, event: &str, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(regs) = inner.listeners.get_mut(event) {
            regs.retain(|r| r.id != id);
        }
    }

    /// Removes every registration for a specific callback handle.
    pub fn remove_listener(&self, handle: &ListenerHandle) {
        handle.remove();
    }

    /// Removes every listener registered for `event`.
    pub fn remove_all_for_event(&self, event: &str) {
        self.inner.lock().unwrap().listeners.remove(event);
    }

    /// Removes every listener for every event, across all events.
    pub fn remove_all(&self) {
        self.inner.lock().unwrap().listeners.clear();
    }

    /// Emits `event` with `args` to every currently-registered listener.
    ///
    /// `once` listeners are deregistered before any callback runs, so a
    /// callback that re-emits the same event cannot re-enter itself.
    /// Invocation runs against a snapshot of the callback list taken under
    /// the lock, so a listener that registers or removes listeners during
    /// emission does not affect the current emission pass.
    pub fn emit(&self, event: &str, args: &[JsonValue]) {
        let snapshot: Vec<Callback> = {
            let mut inner = self.inner.lock().unwrap();
            let Some(regs) = inner.listeners.get_mut(event) else {
                return;
            };
            let once_ids: Vec<u64> = regs.iter().filter(|r| r.once).map(|r| r.id).collect();
            let snapshot = regs.iter().map(|r| r.callback.clone()).collect();
            if !once_ids.is_empty() {
                regs.retain(|r| !r.once);
            }
            snapshot
        };
        for cb in &snapshot {
            cb(args);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn on_receives_every_emission() {
        let obs = Observable::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        obs.on("tick", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        obs.emit("tick", &[]);
        obs.emit("tick", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_fires_a_single_time() {
        let obs = Observable::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        obs.once("open", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        obs.emit("open", &[]);
        obs.emit("open", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_does_not_reenter_when_reemitting_inside_callback() {
        let obs = Observable::new();
        let count = Arc::new(AtomicUsize::new(0));
        let inner_obs = obs.clone();
        let c = count.clone();
        obs.once("x", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            // Re-emitting from within the callback must not re-enter: the
            // registration was already removed before this callback ran.
            inner_obs.emit("x", &[]);
        });
        obs.emit("x", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let obs = Observable::new();
        let handle = obs.on("e", |_| {});
        handle.remove();
        handle.remove();
    }

    #[test]
    fn remove_all_for_event_only_clears_that_event() {
        let obs = Observable::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        obs.on("a", move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        obs.on("b", move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });
        obs.remove_all_for_event("a");
        obs.emit("a", &[]);
        obs.emit("b", &[]);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_is_safe_when_listener_mutates_registry() {
        let obs = Observable::new();
        let obs2 = obs.clone();
        obs.on("x", move |_| {
            obs2.on("x", |_| {});
        });
        obs.emit("x", &[]);
        // second emission should not panic due to the mutation above
        obs.emit("x", &[]);
    }
}
