//! Macros for reducing consumer boilerplate.

/// Build a [`Consumer`](crate::Consumer) from a function in scope, naming it
/// by its module path.
///
/// # Example
///
/// ```ignore
/// use side_effects_core::{consumer, Call, Signature};
///
/// fn send_welcome_email(call: &Call) -> anyhow::Result<()> {
///     let email = call.get::<String>("email")?;
///     // ...
///     Ok(())
/// }
///
/// let welcome = consumer!(
///     send_welcome_email,
///     Signature::new().arg("email"),
///     "Send the welcome email to a new user."
/// );
/// assert_eq!(welcome.name(), concat!(module_path!(), "::send_welcome_email"));
/// ```
#[macro_export]
macro_rules! consumer {
    ($handler:ident, $signature:expr) => {
        $crate::Consumer::new(
            concat!(module_path!(), "::", stringify!($handler)),
            $signature,
            $handler,
        )
    };
    ($handler:ident, $signature:expr, $doc:expr) => {
        $crate::consumer!($handler, $signature).with_doc($doc)
    };
}
