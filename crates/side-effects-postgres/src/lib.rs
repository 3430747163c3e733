//! PostgreSQL units of work for side-effects.
//!
//! A [`PgUnitOfWork`] pairs a `sqlx` transaction with a queue of deferred
//! dispatches. Producers hand their dispatches to [`PgUnitOfWork::hooks`];
//! nothing runs until the transaction has committed, and a rollback (or
//! dropping the unit of work) discards the queue along with the writes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use side_effects_core::{has_side_effects, Arguments};
//! use side_effects_postgres::PgUnitOfWork;
//!
//! let mut uow = PgUnitOfWork::begin(&pool).await?;
//! let user_id: i64 = sqlx::query_scalar("INSERT INTO users (email) VALUES ($1) RETURNING id")
//!     .bind(&email)
//!     .fetch_one(uow.connection())
//!     .await?;
//!
//! has_side_effects("user:signup").call(&registry, uow.hooks(), Arguments::new().arg(email), || {
//!     Ok::<_, anyhow::Error>(user_id)
//! })?;
//!
//! // The welcome email goes out here, after COMMIT.
//! uow.commit().await?;
//! ```

use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use side_effects_core::{CommitHooks, DeferredDispatch};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::debug;

/// Dispatches waiting for a transaction to commit.
#[derive(Debug, Default)]
pub struct PendingDispatches {
    queue: Mutex<Vec<DeferredDispatch>>,
}

impl PendingDispatches {
    /// Labels waiting for commit, in the order they were queued.
    pub fn labels(&self) -> Vec<String> {
        self.lock().iter().map(|d| d.label().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take(&self) -> Vec<DeferredDispatch> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DeferredDispatch>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CommitHooks for PendingDispatches {
    fn on_commit(&self, dispatch: DeferredDispatch) -> side_effects_core::Result<()> {
        debug!(label = dispatch.label(), "side-effects deferred until transaction commit");
        self.lock().push(dispatch);
        Ok(())
    }
}

/// A Postgres transaction whose side-effects run after `COMMIT`.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    pending: PendingDispatches,
}

impl PgUnitOfWork {
    /// Start a transaction on a pooled connection.
    pub async fn begin(pool: &PgPool) -> Result<Self> {
        Ok(Self {
            tx: pool.begin().await?,
            pending: PendingDispatches::default(),
        })
    }

    /// The transaction's connection, for queries that belong to this unit of work.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Commit hooks to pass to producers running inside this unit of work.
    pub fn hooks(&self) -> &PendingDispatches {
        &self.pending
    }

    /// Commit, then run the queued dispatches in order.
    ///
    /// If the commit fails nothing is dispatched. A failing dispatch stops
    /// the remaining ones; the transaction is already committed by then.
    pub async fn commit(self) -> Result<()> {
        let Self { tx, pending } = self;
        tx.commit().await?;

        let ready = pending.take();
        debug!(count = ready.len(), "transaction committed; running deferred side-effects");
        for dispatch in ready {
            dispatch.run()?;
        }
        Ok(())
    }

    /// Roll back, discarding the queued dispatches.
    pub async fn rollback(self) -> Result<()> {
        let Self { tx, pending } = self;
        let discarded = pending.take();
        tx.rollback().await?;
        debug!(count = discarded.len(), "transaction rolled back; side-effects discarded");
        Ok(())
    }
}

impl std::fmt::Debug for PgUnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgUnitOfWork")
            .field("pending", &self.pending.labels())
            .finish_non_exhaustive()
    }
}
