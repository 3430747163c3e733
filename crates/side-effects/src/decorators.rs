//! Marking producers and consumers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::arguments::Arguments;
use crate::consumer::Consumer;
use crate::deferral::CommitHooks;
use crate::error::{Result, SideEffectError};
use crate::registry::Registry;

/// Minimal HTTP response shape recognised by [`http_response_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_code: u16,
}

impl HttpResponse {
    pub fn new(status_code: u16) -> Self {
        Self { status_code }
    }
}

/// `true` for anything other than an [`HttpResponse`] with a 4xx/5xx status.
pub fn http_response_check(result: &dyn Any) -> bool {
    match result.downcast_ref::<HttpResponse>() {
        Some(response) => !(400..600).contains(&response.status_code),
        None => true,
    }
}

/// Predicate deciding from a producer's result whether to dispatch.
pub type RunOnExit = Arc<dyn Fn(&dyn Any) -> bool + Send + Sync>;

/// A producer: runs a function, then dispatches its label.
///
/// ```ignore
/// let signup = has_side_effects("user:signup");
/// let user = signup.call(&registry, &uow, Arguments::new().arg(email.clone()), || {
///     create_user(&email)
/// })?;
/// ```
#[derive(Clone)]
pub struct HasSideEffects {
    label: String,
    run_on_exit: RunOnExit,
}

/// Mark a producer of `label`, using [`http_response_check`] as the
/// `run_on_exit` predicate.
pub fn has_side_effects(label: impl Into<String>) -> HasSideEffects {
    HasSideEffects {
        label: label.into(),
        run_on_exit: Arc::new(http_response_check),
    }
}

impl HasSideEffects {
    /// Replace the predicate that decides, from the result, whether to dispatch.
    pub fn run_on_exit<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn Any) -> bool + Send + Sync + 'static,
    {
        self.run_on_exit = Arc::new(predicate);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run `f`, then dispatch `args` plus its result through `hooks`.
    ///
    /// Nothing is dispatched if `f` fails or the predicate rejects the
    /// result. The result is returned either way.
    pub fn call<R, E, F>(
        &self,
        registry: &Arc<Registry>,
        hooks: &dyn CommitHooks,
        args: Arguments,
        f: F,
    ) -> std::result::Result<R, E>
    where
        F: FnOnce() -> std::result::Result<R, E>,
        R: Clone + Send + Sync + 'static,
        E: From<SideEffectError>,
    {
        let result = f()?;
        if !(self.run_on_exit)(&result) {
            debug!(label = %self.label, "run_on_exit rejected result; side-effects skipped");
            return Ok(result);
        }
        registry.dispatch_on_commit(hooks, &self.label, args, Some(Arc::new(result.clone())))?;
        Ok(result)
    }
}

impl fmt::Debug for HasSideEffects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HasSideEffects")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Register `consumer` as a side-effect of `label` and hand it back, still
/// callable on its own.
pub fn is_side_effect_of(registry: &Registry, label: &str, consumer: Consumer) -> Result<Consumer> {
    registry.register(label, consumer.clone())?;
    Ok(consumer)
}
