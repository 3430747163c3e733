//! The label → consumers registry and the dispatch path.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::{debug, debug_span, error, warn};

use crate::arguments::{Arguments, Call, SideEffectMeta, Value};
use crate::consumer::Consumer;
use crate::deferral::{CommitHooks, DeferredDispatch};
use crate::error::{Result, SideEffectError};
use crate::settings::Settings;
use crate::suppression::SuppressedSignal;

/// Registry of side-effect consumers.
///
/// Maps each label to its consumers in registration order. Consumer lists
/// are copy-on-write: `register` swaps in a new list under the registration
/// lock, and `dispatch` works on a snapshot, so dispatches never wait on
/// each other and never see a half-written list.
///
/// Construct one at startup, register every consumer, then share it
/// (usually as `Arc<Registry>`) with the code that produces events. Tests
/// construct their own.
pub struct Registry {
    consumers: DashMap<String, Arc<[Consumer]>>,
    lock: Mutex<()>,
    suppress: AtomicBool,
    suppressed: SuppressedSignal,
    settings: RwLock<Settings>,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            consumers: DashMap::new(),
            lock: Mutex::new(()),
            suppress: AtomicBool::new(false),
            suppressed: SuppressedSignal::default(),
            settings: RwLock::new(settings),
        }
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    pub fn settings(&self) -> Settings {
        *self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_settings(&self, settings: Settings) {
        *self.settings.write().unwrap_or_else(PoisonError::into_inner) = settings;
    }

    pub fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.settings.write().unwrap_or_else(PoisonError::into_inner));
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register `consumer` for `label`.
    ///
    /// Registering a consumer whose name is already registered for the
    /// label is a no-op. A consumer whose signature (ignoring the injected
    /// `return_value` / `side_effect_meta`) differs from the consumers
    /// already registered is logged as a warning, or rejected with
    /// [`SideEffectError::SignatureConflict`] in strict mode.
    pub fn register(&self, label: impl Into<String>, consumer: Consumer) -> Result<()> {
        let label = label.into();
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let existing = self.consumers(&label);
        if existing.iter().any(|c| c.name() == consumer.name()) {
            debug!(label = %label, consumer = consumer.name(), "side-effect already registered");
            return Ok(());
        }

        let trimmed = consumer.signature().trimmed();
        if existing.iter().any(|c| c.signature().trimmed() != trimmed) {
            if self.settings().strict_mode {
                return Err(SideEffectError::SignatureConflict {
                    label,
                    consumer: consumer.name().to_string(),
                });
            }
            warn!(
                label = %label,
                consumer = consumer.name(),
                signature = %consumer.signature(),
                "side-effect signature differs from other side-effects of this label"
            );
        }

        debug!(label = %label, consumer = consumer.name(), "registering side-effect");
        let mut list = existing.to_vec();
        list.push(consumer);
        self.consumers.insert(label, list.into());
        Ok(())
    }

    /// Remove every consumer of `label`. Test-only; never call this while
    /// dispatches may be running.
    pub fn remove(&self, label: &str) -> Option<Vec<Consumer>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.consumers.remove(label).map(|(_, list)| list.to_vec())
    }

    /// Remove every consumer. Test-only.
    pub fn clear(&self) {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.consumers.clear();
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Current consumers of `label` (empty if none).
    pub fn consumers(&self, label: &str) -> Arc<[Consumer]> {
        self.consumers
            .get(label)
            .map(|entry| Arc::clone(entry.value()))
            .unwrap_or_else(|| Vec::new().into())
    }

    /// Whether a consumer named `name` is registered for `label`.
    pub fn contains(&self, label: &str, name: &str) -> bool {
        self.consumers(label).iter().any(|c| c.name() == name)
    }

    /// Registered labels, sorted.
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.consumers.iter().map(|e| e.key().clone()).collect();
        labels.sort();
        labels
    }

    /// The whole mapping, sorted by label.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<Consumer>> {
        self.filtered(|_| true)
    }

    /// Filter by label (exact match).
    pub fn by_label(&self, label: &str) -> BTreeMap<String, Vec<Consumer>> {
        self.filtered(|l| l == label)
    }

    /// Filter by label (contains `value`).
    pub fn by_label_contains(&self, value: &str) -> BTreeMap<String, Vec<Consumer>> {
        self.filtered(|l| l.contains(value))
    }

    fn filtered(&self, keep: impl Fn(&str) -> bool) -> BTreeMap<String, Vec<Consumer>> {
        self.consumers
            .iter()
            .filter(|e| keep(e.key()))
            .map(|e| (e.key().clone(), e.value().to_vec()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Suppression
    // ------------------------------------------------------------------

    /// Turn suppression on. Prefer [`disable_side_effects`](crate::disable_side_effects),
    /// which turns it back off.
    pub fn disable(&self) {
        self.suppress.store(true, Ordering::SeqCst);
    }

    pub fn enable(&self) {
        self.suppress.store(false, Ordering::SeqCst);
    }

    /// Whether dispatches are currently suppressed, either explicitly or
    /// through `test_mode`.
    pub fn is_suppressed(&self) -> bool {
        self.suppress.load(Ordering::SeqCst) || self.settings().test_mode
    }

    pub fn suppressed_signal(&self) -> &SuppressedSignal {
        &self.suppressed
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Run every consumer of `label`, or notify listeners if suppressed.
    ///
    /// All consumers are bound before any runs: one incompatible consumer
    /// fails the whole dispatch with [`SideEffectError::SignatureMismatch`].
    /// Consumer errors are logged and skipped unless `abort_on_error` is set.
    pub fn dispatch(&self, label: &str, args: &Arguments, return_value: Option<Value>) -> Result<()> {
        if self.is_suppressed() {
            debug!(label, "side-effects suppressed");
            self.suppressed.send(label);
            return Ok(());
        }
        self.run_side_effects(label, args, return_value)
    }

    /// Dispatch once `hooks` says the enclosing unit of work has committed.
    ///
    /// Suppression is checked now, not at commit: a suppressed dispatch is
    /// reported immediately and nothing is handed to the hooks.
    pub fn dispatch_on_commit(
        self: &Arc<Self>,
        hooks: &dyn CommitHooks,
        label: &str,
        args: Arguments,
        return_value: Option<Value>,
    ) -> Result<()> {
        if self.is_suppressed() {
            debug!(label, "side-effects suppressed");
            self.suppressed.send(label);
            return Ok(());
        }
        hooks.on_commit(DeferredDispatch::new(
            Arc::clone(self),
            label,
            args,
            return_value,
        ))
    }

    /// Check that every consumer of `label` would bind to `args`, without
    /// running anything.
    pub fn try_bind_all(&self, label: &str, args: &Arguments) -> Result<()> {
        let meta = SideEffectMeta::new(label, None).with_args(args.clone());
        self.bind_all(&self.consumers(label), args, &meta).map(drop)
    }

    fn run_side_effects(&self, label: &str, args: &Arguments, return_value: Option<Value>) -> Result<()> {
        let settings = self.settings();
        if settings.test_mode_fail {
            return Err(SideEffectError::TestModeFail {
                label: label.to_string(),
            });
        }

        let consumers = self.consumers(label);
        if consumers.is_empty() {
            return Ok(());
        }

        let meta = SideEffectMeta::new(label, return_value).with_args(args.clone());
        let span = debug_span!("side_effects.dispatch", label, dispatch_id = %meta.dispatch_id());
        let _enter = span.enter();

        let calls = self.bind_all(&consumers, args, &meta)?;
        for (consumer, call) in consumers.iter().zip(calls) {
            if let Err(source) = consumer.call(&call) {
                error!(
                    label,
                    consumer = consumer.name(),
                    error = ?source,
                    "Error running side_effect function"
                );
                if settings.abort_on_error {
                    return Err(SideEffectError::ConsumerFailed {
                        label: label.to_string(),
                        consumer: consumer.name().to_string(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    fn bind_all(&self, consumers: &[Consumer], args: &Arguments, meta: &SideEffectMeta) -> Result<Vec<Call>> {
        consumers
            .iter()
            .map(|consumer| {
                consumer
                    .signature()
                    .bind_dispatch(args, meta)
                    .map(|binding| Call::new(meta.label(), binding))
                    .map_err(|reason| {
                        debug!(consumer = consumer.name(), %reason, "side-effect binding failed");
                        SideEffectError::SignatureMismatch {
                            consumer: consumer.name().to_string(),
                            signature: consumer.signature().to_string(),
                        }
                    })
            })
            .collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("labels", &self.labels())
            .field("suppressed", &self.is_suppressed())
            .field("settings", &self.settings())
            .finish()
    }
}
