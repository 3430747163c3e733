//! # Side Effects
//!
//! An in-process, label-addressed side-effect registry: producers finish,
//! consumers run, and commits decide when.
//!
//! ## Core Concepts
//!
//! Side-effects separate **doing the work** from **reacting to it**:
//! - A producer ([`has_side_effects`]) = a function whose completion is an event
//! - A [`Consumer`] = a function registered against a label to react to it
//!
//! The key principle: **side-effects never fire for work that did not
//! stick**. A failed producer dispatches nothing, and a producer inside a
//! unit of work dispatches only after it commits.
//!
//! ## Architecture
//!
//! ```text
//! Producer call
//!     │
//!     ▼ f() ─► Err ──────────────────► returned, nothing dispatched
//!     │
//!     ▼ run_on_exit(result)? ─► false ► returned, nothing dispatched
//!     │
//!     ▼ dispatch_on_commit()
//! suppressed? ─► yes ─► SuppressedSignal.send(label)
//!     │
//!     ▼ CommitHooks::on_commit ─► (rollback: discarded)
//!     │
//!     ▼ commit / no unit of work
//! Registry.dispatch(label)
//!     │
//!     ├─► bind every consumer ─► any mismatch ─► SignatureMismatch
//!     │
//!     └─► run consumers in registration order
//!             └─► Err ─► logged (or ConsumerFailed if abort_on_error)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Registration is idempotent** - one entry per (label, consumer name)
//! 2. **Order is registration order** - consumers of a label run FIFO
//! 3. **Binding is all-or-nothing** - every consumer is bound before any runs,
//!    and re-bound on every dispatch
//! 4. **Suppression runs nothing** - exactly one notification per dispatch
//! 5. **Deferred means deferred** - queued dispatches run on commit, in order,
//!    or never
//!
//! ## Guarantees
//!
//! - **In-process only**: No persistence, no transport, no redelivery
//! - **Synchronous**: Dispatch returns after every consumer ran
//! - **Concurrent**: Dispatches take no lock; consumers must be thread-safe
//!
//! ## Example
//!
//! ```ignore
//! use side_effects_core::{
//!     consumer, has_side_effects, Arguments, Call, Registry, Signature, UnitOfWork,
//! };
//! use std::sync::Arc;
//!
//! // 1. Define consumers
//! fn send_welcome_email(call: &Call) -> anyhow::Result<()> {
//!     let email = call.get::<String>("email")?;
//!     mailer::send(email, "Welcome!")
//! }
//!
//! // 2. Register them during startup
//! let registry = Arc::new(Registry::new());
//! registry.register(
//!     "user:signup",
//!     consumer!(send_welcome_email, Signature::new().arg("email"), "Send the welcome email."),
//! )?;
//!
//! // 3. Mark the producer
//! let signup = has_side_effects("user:signup");
//!
//! // 4. Run it inside a unit of work
//! let uow = UnitOfWork::new();
//! uow.atomic(|| {
//!     signup.call(&registry, &uow, Arguments::new().arg(email.clone()), || {
//!         create_user(&email)
//!     })
//! })?;
//! // The email is sent here, after commit.
//! ```
//!
//! ## What This Is Not
//!
//! This is **not**:
//! - A message bus
//! - An outbox
//! - At-least-once delivery

// Core modules
mod arguments;
mod binder;
mod consumer;
mod consumer_macro;
mod decorators;
mod deferral;
mod error;
mod registry;
mod settings;
mod suppression;

// Diagnostics
pub mod checks;
pub mod display;

// Dispatch scenario tests (test-only)
#[cfg(test)]
mod dispatch_tests;


// Re-export argument types
pub use arguments::{value, Arguments, Call, SideEffectMeta, Value};

// Re-export binder types
pub use binder::{
    try_bind, BindError, Parameter, ParameterKind, Signature, META_PARAM, RETURN_VALUE_PARAM,
};

// Re-export consumer types
pub use consumer::{Consumer, Handler};

// Re-export producer/consumer markers
pub use decorators::{
    has_side_effects, http_response_check, is_side_effect_of, HasSideEffects, HttpResponse,
    RunOnExit,
};

// Re-export deferral types
pub use deferral::{CommitHooks, DeferredDispatch, Immediate, UnitOfWork};

// Re-export error types
pub use error::{ArgumentError, Result, SideEffectError};

// Re-export registry types
pub use registry::Registry;

// Re-export configuration
pub use settings::Settings;

// Re-export suppression types
pub use suppression::{
    disable_side_effects, with_side_effects_disabled, Listener, ListenerId, SuppressedEvents,
    SuppressedSignal, SuppressionGuard,
};
