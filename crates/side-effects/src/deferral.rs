//! Deferring dispatch until a unit of work commits.
//!
//! A producer that runs inside a transaction must not trigger side-effects
//! (emails, webhooks, ...) for work that may still be rolled back. Instead
//! of dispatching inline, the registry hands a [`DeferredDispatch`] to the
//! enclosing unit of work through [`CommitHooks`]:
//!
//! ```text
//! producer returns
//!     │
//!     ▼ dispatch_on_commit()
//! CommitHooks::on_commit(DeferredDispatch)
//!     │
//!     ├─ no unit of work ──► run now
//!     │
//!     └─ unit of work open ─► queued
//!                               │
//!                  ┌────────────┴────────────┐
//!                  ▼                         ▼
//!               COMMIT                    ROLLBACK
//!          run queued, in order          discard queued
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::arguments::{Arguments, Value};
use crate::error::{Result, SideEffectError};
use crate::registry::Registry;

/// The commit-hook primitive of a unit of work.
///
/// Implementations queue the dispatch and run it after a successful commit,
/// drop it on rollback, and run it immediately when no unit of work is open.
pub trait CommitHooks: Send + Sync {
    fn on_commit(&self, dispatch: DeferredDispatch) -> Result<()>;
}

/// A dispatch waiting for its unit of work to commit.
pub struct DeferredDispatch {
    registry: Arc<Registry>,
    label: String,
    args: Arguments,
    return_value: Option<Value>,
}

impl DeferredDispatch {
    pub(crate) fn new(
        registry: Arc<Registry>,
        label: impl Into<String>,
        args: Arguments,
        return_value: Option<Value>,
    ) -> Self {
        Self {
            registry,
            label: label.into(),
            args,
            return_value,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn args(&self) -> &Arguments {
        &self.args
    }

    pub fn return_value_raw(&self) -> Option<&Value> {
        self.return_value.as_ref()
    }

    pub fn return_value<T: std::any::Any>(&self) -> Option<&T> {
        self.return_value.as_ref()?.downcast_ref()
    }

    /// Dispatch now. Suppression is checked again at this point.
    pub fn run(self) -> Result<()> {
        self.registry
            .dispatch(&self.label, &self.args, self.return_value)
    }
}

impl fmt::Debug for DeferredDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredDispatch")
            .field("label", &self.label)
            .field("args", &self.args)
            .field("has_return_value", &self.return_value.is_some())
            .finish()
    }
}

/// Commit hooks for code with no unit of work: dispatch immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl CommitHooks for Immediate {
    fn on_commit(&self, dispatch: DeferredDispatch) -> Result<()> {
        dispatch.run()
    }
}

/// In-memory unit of work with nested savepoints.
///
/// - Dispatches queued while open wait for the outermost commit.
/// - An inner commit hands its queue to the enclosing level.
/// - A rollback discards only its own level's queue.
/// - With nothing open, dispatches run immediately.
#[derive(Default)]
pub struct UnitOfWork {
    levels: Mutex<Vec<Vec<DeferredDispatch>>>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a unit of work, or a savepoint inside the current one.
    pub fn begin(&self) {
        self.levels().push(Vec::new());
    }

    /// Close the innermost level successfully.
    ///
    /// Closing the outermost level runs every queued dispatch in the order
    /// it was queued, stopping at the first error.
    pub fn commit(&self) -> Result<()> {
        let ready = {
            let mut levels = self.levels();
            let level = levels.pop().ok_or(SideEffectError::NoActiveUnitOfWork)?;
            match levels.last_mut() {
                Some(outer) => {
                    outer.extend(level);
                    return Ok(());
                }
                None => level,
            }
        };

        debug!(count = ready.len(), "unit of work committed; running deferred side-effects");
        for dispatch in ready {
            dispatch.run()?;
        }
        Ok(())
    }

    /// Close the innermost level, discarding what it queued.
    pub fn rollback(&self) -> Result<()> {
        let discarded = self
            .levels()
            .pop()
            .ok_or(SideEffectError::NoActiveUnitOfWork)?;
        debug!(count = discarded.len(), "unit of work rolled back; side-effects discarded");
        Ok(())
    }

    /// Run `f` in a new level: commit if it succeeds, roll back if it fails
    /// or panics.
    pub fn atomic<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
        E: From<SideEffectError>,
    {
        self.begin();
        let mut level = OpenLevel { uow: self, open: true };
        let outcome = f();
        level.open = false;
        match outcome {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                self.rollback()?;
                Err(err)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        !self.levels().is_empty()
    }

    /// Nesting depth; 0 when nothing is open.
    pub fn depth(&self) -> usize {
        self.levels().len()
    }

    /// Labels waiting for commit, outermost level first.
    pub fn pending(&self) -> Vec<String> {
        self.levels()
            .iter()
            .flatten()
            .map(|d| d.label().to_string())
            .collect()
    }

    fn levels(&self) -> std::sync::MutexGuard<'_, Vec<Vec<DeferredDispatch>>> {
        self.levels.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CommitHooks for UnitOfWork {
    fn on_commit(&self, dispatch: DeferredDispatch) -> Result<()> {
        let mut levels = self.levels();
        match levels.last_mut() {
            Some(level) => {
                debug!(label = dispatch.label(), "side-effects deferred until commit");
                level.push(dispatch);
                Ok(())
            }
            None => {
                drop(levels);
                dispatch.run()
            }
        }
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("depth", &self.depth())
            .field("pending", &self.pending())
            .finish()
    }
}

/// Rolls back a level left open by a panic inside `atomic`.
struct OpenLevel<'a> {
    uow: &'a UnitOfWork,
    open: bool,
}

impl Drop for OpenLevel<'_> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.uow.rollback();
        }
    }
}
