//! Error types for registration, binding, and dispatch.

use thiserror::Error;

/// Errors surfaced by the registry.
///
/// `SignatureMismatch` is never swallowed: it means a consumer could not be
/// called at all, which is a programming defect. `ConsumerFailed` is only
/// returned when the registry is configured to abort on error; otherwise the
/// failure is logged and the remaining consumers still run.
#[derive(Debug, Error)]
pub enum SideEffectError {
    /// The dispatched arguments cannot be bound to a consumer's parameters.
    #[error("Side-effect signature mismatch for function `{consumer}{signature}`.")]
    SignatureMismatch { consumer: String, signature: String },

    /// Strict mode: a consumer's signature differs from one already seen for the label.
    #[error("Side-effect `{consumer}` has a signature that differs from other side-effects of '{label}'")]
    SignatureConflict { label: String, consumer: String },

    /// A consumer returned an error and `abort_on_error` is set.
    #[error("Error running side-effect function '{consumer}' for '{label}': {source}")]
    ConsumerFailed {
        label: String,
        consumer: String,
        #[source]
        source: anyhow::Error,
    },

    /// `test_mode_fail` is set and something tried to dispatch.
    #[error("Side-effects for '{label}' aborted; TEST_MODE_FAIL=True")]
    TestModeFail { label: String },

    /// `commit` or `rollback` was called with no unit of work open.
    #[error("no active unit of work")]
    NoActiveUnitOfWork,
}

/// Errors raised when a consumer reads its bound arguments.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("argument '{name}' was not bound")]
    Missing { name: String },

    #[error("argument '{name}' is not a {expected}")]
    WrongType { name: String, expected: &'static str },
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, SideEffectError>;
