//! Testing utilities for side-effects.
//!
//! - [`CaptureOnCommit`]: commit hooks that hold deferred dispatches so a test
//!   can inspect what a producer *would* dispatch after commit, then run
//!   them or throw them away.
//! - [`Recorder`]: a consumer that accepts any arguments and records each
//!   call.
//! - [`with_side_effects_disabled`]: run a test body with dispatch suppressed.
//!
//! ```rust,ignore
//! let capture = CaptureOnCommit::new();
//! has_side_effects("user:signup").call(&registry, &capture, args, || signup(&email))?;
//! assert_eq!(capture.labels(), ["user:signup"]);
//! capture.run_all()?;
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use side_effects_core::{Arguments, Call, CommitHooks, Consumer, DeferredDispatch, Signature, Value};
use tracing::error;

pub use side_effects_core::{disable_side_effects, with_side_effects_disabled, SuppressedEvents};

/// Commit hooks that capture deferred dispatches instead of running them.
///
/// Built with [`executing`](Self::executing), whatever is still captured
/// runs when the capture is dropped, like a commit at the end of a test.
#[derive(Debug, Default)]
pub struct CaptureOnCommit {
    captured: Mutex<Vec<DeferredDispatch>>,
    execute: bool,
}

impl CaptureOnCommit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture, then run everything still captured on drop.
    pub fn executing() -> Self {
        Self {
            captured: Mutex::default(),
            execute: true,
        }
    }

    /// Labels captured so far, in dispatch order.
    pub fn labels(&self) -> Vec<String> {
        self.lock().iter().map(|d| d.label().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return the captured dispatches for inspection.
    pub fn take(&self) -> Vec<DeferredDispatch> {
        std::mem::take(&mut *self.lock())
    }

    /// Run the captured dispatches in order. Returns how many ran.
    pub fn run_all(&self) -> side_effects_core::Result<usize> {
        let ready = self.take();
        let count = ready.len();
        for dispatch in ready {
            dispatch.run()?;
        }
        Ok(count)
    }

    /// Drop the captured dispatches, as a rollback would.
    pub fn discard(&self) -> usize {
        self.take().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DeferredDispatch>> {
        self.captured.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CommitHooks for CaptureOnCommit {
    fn on_commit(&self, dispatch: DeferredDispatch) -> side_effects_core::Result<()> {
        self.lock().push(dispatch);
        Ok(())
    }
}

impl Drop for CaptureOnCommit {
    fn drop(&mut self) {
        if !self.execute {
            return;
        }
        if let Err(e) = self.run_all() {
            error!(error = %e, "captured side-effects failed on drop");
        }
    }
}

/// One call seen by a [`Recorder`] consumer.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub consumer: String,
    pub label: String,
    pub args: Vec<Value>,
    pub kwargs: Vec<String>,
}

impl RecordedCall {
    /// Typed view of the positional argument at `index`.
    pub fn arg<T: std::any::Any>(&self, index: usize) -> Option<&T> {
        self.args.get(index)?.downcast_ref()
    }
}

/// Records every call made to the consumers it builds.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A consumer named `name` with signature `(*args, **kwargs)`, so it
    /// binds to any dispatch and receives `return_value` as a keyword.
    pub fn consumer(&self, name: impl Into<String>) -> Consumer {
        let name = name.into();
        let calls = Arc::clone(&self.calls);
        let consumer = name.clone();
        Consumer::new(name, Signature::new().var_args().var_kwargs(), move |call: &Call| {
            calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(RecordedCall {
                    consumer: consumer.clone(),
                    label: call.label().to_string(),
                    args: call.var_args().to_vec(),
                    kwargs: call.var_kwarg_names().map(str::to_string).collect(),
                });
            Ok(())
        })
    }

    /// Call `consumer` directly, bypassing any registry.
    pub fn invoke(&self, consumer: &Consumer, args: &Arguments) -> anyhow::Result<()> {
        consumer.invoke(args)
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().clone()
    }

    /// Labels of the recorded calls, in call order.
    pub fn labels(&self) -> Vec<String> {
        self.lock().iter().map(|c| c.label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<RecordedCall>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
