//! Runtime switches that change how dispatch behaves.

use serde::Deserialize;

/// Registry configuration.
///
/// Every switch defaults to `false`, which is the production behavior:
/// consumer errors are logged, side-effects run, and signature drift
/// between consumers of one label is only a warning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Re-raise consumer errors instead of logging them.
    pub abort_on_error: bool,
    /// Suppress every dispatch, as if `disable_side_effects` were always active.
    pub test_mode: bool,
    /// Fail every dispatch that is not suppressed.
    pub test_mode_fail: bool,
    /// Reject registration of a consumer whose signature differs from the
    /// signatures already registered for its label.
    pub strict_mode: bool,
}

impl Settings {
    /// Load settings from `SIDE_EFFECTS_*` environment variables.
    ///
    /// Unset or unrecognised values fall back to `false`.
    pub fn from_env() -> Self {
        let settings = Self {
            abort_on_error: env_flag("SIDE_EFFECTS_ABORT_ON_ERROR"),
            test_mode: env_flag("SIDE_EFFECTS_TEST_MODE"),
            test_mode_fail: env_flag("SIDE_EFFECTS_TEST_MODE_FAIL"),
            strict_mode: env_flag("SIDE_EFFECTS_STRICT_MODE"),
        };

        tracing::debug!(
            abort_on_error = settings.abort_on_error,
            test_mode = settings.test_mode,
            test_mode_fail = settings.test_mode_fail,
            strict_mode = settings.strict_mode,
            "side-effects settings loaded"
        );
        settings
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| parse_flag(&v)).unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
