//! Static checks over a populated registry.

use std::fmt;

use serde::Serialize;

use crate::binder::Signature;
use crate::registry::Registry;

pub const CHECK_ID_MULTIPLE_SIGNATURES: &str = "side_effects.W001";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Warning,
    Error,
}

/// A check finding with a stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckMessage {
    pub id: &'static str,
    pub level: Level,
    pub msg: String,
    pub hint: String,
}

impl fmt::Display for CheckMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}\n\tHINT: {}", self.id, self.msg, self.hint)
    }
}

/// Flag every label whose consumers declare more than one distinct
/// signature, ignoring the injected `return_value` / `side_effect_meta`.
///
/// Findings are warnings, or errors when the registry runs in strict mode.
pub fn check_function_signatures(registry: &Registry) -> Vec<CheckMessage> {
    let level = if registry.settings().strict_mode {
        Level::Error
    } else {
        Level::Warning
    };

    registry
        .snapshot()
        .into_iter()
        .filter(|(_, consumers)| {
            let mut distinct: Vec<Signature> = Vec::new();
            for sig in consumers.iter().map(|c| c.signature().trimmed()) {
                if !distinct.contains(&sig) {
                    distinct.push(sig);
                }
            }
            distinct.len() > 1
        })
        .map(|(label, _)| multiple_signatures(&label, level))
        .collect()
}

fn multiple_signatures(label: &str, level: Level) -> CheckMessage {
    CheckMessage {
        id: CHECK_ID_MULTIPLE_SIGNATURES,
        level,
        msg: format!("Multiple function signatures for event: \"{label}\""),
        hint: format!(
            "Ensure that all functions registered as side-effects of \"{label}\" have identical signatures."
        ),
    }
}
