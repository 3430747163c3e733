//! Suppressing side-effects, mostly for tests.
//!
//! While suppression is on, a dispatch runs no consumers. It sends the
//! label on the registry's [`SuppressedSignal`] instead, so a test can
//! assert which side-effects *would* have fired.
//!
//! The switch is shared by every thread using the registry. Overlapping
//! [`disable_side_effects`] scopes on different threads will interfere;
//! scope them sequentially.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::registry::Registry;

/// Callback receiving the label of each suppressed dispatch.
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Notification channel for suppressed dispatches.
#[derive(Default)]
pub struct SuppressedSignal {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl SuppressedSignal {
    pub fn connect<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns `false` if the listener was not connected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    /// Notify every listener; returns how many were notified.
    ///
    /// Listeners run outside the lock, so they may connect or disconnect.
    pub fn send(&self, label: &str) -> usize {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in &listeners {
            listener(label);
        }
        listeners.len()
    }

    pub fn receiver_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl fmt::Debug for SuppressedSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuppressedSignal")
            .field("receivers", &self.receiver_count())
            .finish()
    }
}

/// Labels of suppressed dispatches, in dispatch order.
#[derive(Debug, Clone, Default)]
pub struct SuppressedEvents {
    labels: Arc<Mutex<Vec<String>>>,
}

impl SuppressedEvents {
    fn push(&self, label: &str) {
        self.labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(label.to_string());
    }

    /// Snapshot of the labels recorded so far.
    pub fn labels(&self) -> Vec<String> {
        self.labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Active suppression scope. Dropping it turns suppression off and
/// disconnects its listener, including during unwinding.
#[must_use = "side-effects are re-enabled as soon as the guard is dropped"]
pub struct SuppressionGuard<'a> {
    registry: &'a Registry,
    listener: ListenerId,
    events: SuppressedEvents,
}

impl SuppressionGuard<'_> {
    pub fn events(&self) -> &SuppressedEvents {
        &self.events
    }
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        self.registry.enable();
        self.registry.suppressed_signal().disconnect(self.listener);
    }
}

impl fmt::Debug for SuppressionGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuppressionGuard")
            .field("events", &self.events)
            .finish()
    }
}

/// Disable side-effects until the returned guard is dropped.
///
/// ```ignore
/// let guard = disable_side_effects(&registry);
/// registry.dispatch("user:created", &Arguments::new(), None)?;
/// assert_eq!(guard.events().labels(), ["user:created"]);
/// ```
pub fn disable_side_effects(registry: &Registry) -> SuppressionGuard<'_> {
    let events = SuppressedEvents::default();
    let sink = events.clone();
    let listener = registry
        .suppressed_signal()
        .connect(move |label| sink.push(label));
    registry.disable();
    SuppressionGuard {
        registry,
        listener,
        events,
    }
}

/// Run `f` with side-effects disabled, handing it the suppressed events.
///
/// Suppression ends when `f` returns or panics.
pub fn with_side_effects_disabled<R, F>(registry: &Registry, f: F) -> R
where
    F: FnOnce(&SuppressedEvents) -> R,
{
    let guard = disable_side_effects(registry);
    f(guard.events())
}
