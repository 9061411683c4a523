//! Log-injection sanitization.
//!
//! # Responsibilities
//! - Strip ANSI escape sequences and control characters from string leaves
//! - Optionally chain the masking engine as a second pass
//!
//! # Design Decisions
//! - Tab, newline and carriage return survive; every other C0/C1 control goes
//! - Only JSON data is transformed; typed values are serialized before they
//!   reach this stage

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde_json::Value;

use crate::security::masking::MaskingEngine;

const ESCAPE_PATTERN: &str = concat!(
    r"\x1b\[[0-?]*[ -/]*[@-~]",
    r"|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)",
    r"|\x1b[@-Z\\-_]",
    r"|\x{9b}[0-?]*[ -/]*[@-~]",
    r"|[\x00-\x08\x0b\x0c\x0e-\x1f\x7f\x{80}-\x{9f}]",
);

fn escape_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ESCAPE_PATTERN).expect("escape pattern is valid"))
}

/// Strip escape sequences and control characters from `s`.
pub fn sanitize_str(s: &str) -> Cow<'_, str> {
    escape_regex().replace_all(s, "")
}

/// Recursive sanitizer, optionally followed by masking.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    masking: Option<Arc<MaskingEngine>>,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain `masking` after sanitization.
    pub fn with_masking(masking: Arc<MaskingEngine>) -> Self {
        Self {
            masking: Some(masking),
        }
    }

    pub fn masking(&self) -> Option<&Arc<MaskingEngine>> {
        self.masking.as_ref()
    }

    /// Sanitize every string leaf, then mask if a masking engine is chained.
    pub fn process(&self, value: &Value) -> Value {
        let clean = strip(value);
        match &self.masking {
            Some(masking) => masking.process(&clean),
            None => clean,
        }
    }
}

fn strip(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_str(s).into_owned()),
        Value::Array(items) => Value::Array(items.iter().map(strip).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, child)| (key.clone(), strip(child)))
                .collect(),
        ),
        other => other.clone(),
    }
}
