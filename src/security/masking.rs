//! Sensitive-field masking.
//!
//! # Responsibilities
//! - Replace values stored under sensitive keys with a mask
//! - Mask the path segment following a sensitive segment in slash-delimited strings
//! - Accept new rules at runtime without ever dropping existing ones
//!
//! # Design Decisions
//! - Rules live behind an `ArcSwap`; readers never block appenders
//! - Depth is bounded: containers below `max_depth` are returned as-is
//! - "fixed" style hides length, "preserve-length" keeps shape for debugging
//! - The path heuristic treats any string containing `/` as a path, false
//!   positives included

use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::schema::MaskingConfig;

/// Length of the mask emitted by [`MaskStyle::Fixed`].
pub const FIXED_MASK_LEN: usize = 6;

/// A field matcher as written in configuration.
///
/// A bare string matches a key exactly; `{ pattern = "..." }` matches keys
/// against a regular expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MaskRule {
    Field(String),
    Pattern { pattern: String },
}

impl MaskRule {
    pub fn field(name: impl Into<String>) -> Self {
        MaskRule::Field(name.into())
    }

    pub fn pattern(pattern: impl Into<String>) -> Self {
        MaskRule::Pattern {
            pattern: pattern.into(),
        }
    }
}

impl From<&str> for MaskRule {
    fn from(name: &str) -> Self {
        MaskRule::field(name)
    }
}

/// How masked values are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskStyle {
    /// Constant-length mask; does not leak the original length.
    #[default]
    Fixed,
    /// Mask with the same character count as the original value.
    PreserveLength,
}

#[derive(Debug, Error)]
pub enum MaskingError {
    #[error("invalid mask pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug)]
enum Matcher {
    Exact(String),
    Pattern(Regex),
}

#[derive(Debug)]
struct CompiledRule {
    rule: MaskRule,
    matcher: Matcher,
}

impl CompiledRule {
    fn compile(rule: MaskRule) -> Result<Self, MaskingError> {
        let matcher = match &rule {
            MaskRule::Field(name) => Matcher::Exact(name.clone()),
            MaskRule::Pattern { pattern } => {
                let regex = Regex::new(pattern).map_err(|source| MaskingError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                Matcher::Pattern(regex)
            }
        };
        Ok(Self { rule, matcher })
    }

    fn matches_key(&self, key: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(name) => name == key,
            Matcher::Pattern(regex) => regex.is_match(key),
        }
    }

    fn matches_segment(&self, segment: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(name) => name.eq_ignore_ascii_case(segment),
            Matcher::Pattern(_) => false,
        }
    }
}

type RuleSet = Vec<Arc<CompiledRule>>;

/// Recursive masking engine with an append-only rule set.
#[derive(Debug)]
pub struct MaskingEngine {
    rules: ArcSwap<RuleSet>,
    style: MaskStyle,
    max_depth: usize,
    mask_char: char,
}

impl MaskingEngine {
    /// Build an engine from configuration, compiling every rule.
    pub fn new(config: &MaskingConfig) -> Result<Self, MaskingError> {
        let engine = Self {
            rules: ArcSwap::from_pointee(Vec::new()),
            style: config.style,
            max_depth: config.max_depth,
            mask_char: config.mask_char,
        };
        engine.add_fields(config.fields.iter().cloned())?;
        Ok(engine)
    }

    /// Append rules, skipping ones already present.
    ///
    /// Either every new rule compiles and is added, or none is. Returns the
    /// number of rules actually added. There is deliberately no removal.
    pub fn add_fields<I>(&self, rules: I) -> Result<usize, MaskingError>
    where
        I: IntoIterator<Item = MaskRule>,
    {
        let mut compiled = Vec::new();
        for rule in rules {
            if compiled.iter().any(|c: &Arc<CompiledRule>| c.rule == rule) {
                continue;
            }
            compiled.push(Arc::new(CompiledRule::compile(rule)?));
        }

        let mut added = 0;
        self.rules.rcu(|current| {
            let mut next: RuleSet = (**current).clone();
            added = 0;
            for rule in &compiled {
                if !next.iter().any(|existing| existing.rule == rule.rule) {
                    next.push(rule.clone());
                    added += 1;
                }
            }
            next
        });

        if added > 0 {
            tracing::debug!(added, total = self.rules.load().len(), "Masking rules appended");
        }
        Ok(added)
    }

    /// Current rules, in insertion order.
    pub fn fields(&self) -> Vec<MaskRule> {
        self.rules.load().iter().map(|r| r.rule.clone()).collect()
    }

    pub fn style(&self) -> MaskStyle {
        self.style
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// True when `key` would be masked.
    pub fn is_sensitive(&self, key: &str) -> bool {
        self.rules.load().iter().any(|r| r.matches_key(key))
    }

    /// Return a copy of `value` with sensitive values replaced.
    pub fn process(&self, value: &Value) -> Value {
        let rules = self.rules.load();
        if rules.is_empty() {
            return value.clone();
        }
        self.walk(value, 0, &rules)
    }

    fn walk(&self, value: &Value, depth: usize, rules: &RuleSet) -> Value {
        match value {
            Value::Object(map) => {
                if depth > self.max_depth {
                    return value.clone();
                }
                let masked = map
                    .iter()
                    .map(|(key, child)| {
                        let child = if rules.iter().any(|r| r.matches_key(key)) {
                            self.mask_value(child)
                        } else {
                            self.walk(child, depth + 1, rules)
                        };
                        (key.clone(), child)
                    })
                    .collect();
                Value::Object(masked)
            }
            Value::Array(items) => {
                if depth > self.max_depth {
                    return value.clone();
                }
                Value::Array(
                    items
                        .iter()
                        .map(|item| self.walk(item, depth + 1, rules))
                        .collect(),
                )
            }
            Value::String(s) if s.contains('/') => match self.mask_path(s, rules) {
                Some(masked) => Value::String(masked),
                None => value.clone(),
            },
            _ => value.clone(),
        }
    }

    /// Mask the segment after any segment equal (case-insensitively) to a
    /// field name. Returns `None` when nothing changed.
    fn mask_path(&self, s: &str, rules: &RuleSet) -> Option<String> {
        let segments: Vec<&str> = s.split('/').collect();
        let mut out: Vec<String> = segments.iter().map(|seg| seg.to_string()).collect();
        let mut changed = false;

        for (i, window) in segments.windows(2).enumerate() {
            let (name, next) = (window[0], window[1]);
            if name.is_empty() || next.is_empty() {
                continue;
            }
            if rules.iter().any(|r| r.matches_segment(name)) {
                out[i + 1] = self.mask_len(next.chars().count());
                changed = true;
            }
        }

        changed.then(|| out.join("/"))
    }

    fn mask_value(&self, value: &Value) -> Value {
        let len = match value {
            Value::String(s) => s.chars().count(),
            Value::Null => 0,
            other => other.to_string().chars().count(),
        };
        Value::String(self.mask_len(len))
    }

    fn mask_len(&self, len: usize) -> String {
        let len = match self.style {
            MaskStyle::Fixed => FIXED_MASK_LEN,
            MaskStyle::PreserveLength => len,
        };
        std::iter::repeat(self.mask_char).take(len).collect()
    }
}

impl Default for MaskingEngine {
    fn default() -> Self {
        Self {
            rules: ArcSwap::from_pointee(Vec::new()),
            style: MaskStyle::default(),
            max_depth: MaskingConfig::default().max_depth,
            mask_char: '*',
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine(fields: &[&str], style: MaskStyle) -> MaskingEngine {
        MaskingEngine::new(&MaskingConfig {
            fields: fields.iter().map(|f| MaskRule::from(*f)).collect(),
            style,
            ..MaskingConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_nested_field_masked() {
        let engine = engine(&["password"], MaskStyle::Fixed);
        let out = engine.process(&json!({ "user": { "password": "abc123", "name": "bob" } }));
        assert_eq!(out, json!({ "user": { "password": "******", "name": "bob" } }));
        assert!(!out.to_string().contains("abc123"));
    }

    #[test]
    fn test_fixed_style_hides_length() {
        let engine = engine(&["token"], MaskStyle::Fixed);
        let out = engine.process(&json!({ "token": "a-very-long-token-value" }));
        assert_eq!(out["token"], json!("******"));
    }

    #[test]
    fn test_preserve_length_style() {
        let engine = engine(&["token"], MaskStyle::PreserveLength);
        let out = engine.process(&json!({ "token": "abcd", "n": { "token": 12345 } }));
        assert_eq!(out["token"], json!("****"));
        assert_eq!(out["n"]["token"], json!("*****"));
    }

    #[test]
    fn test_pattern_rule() {
        let engine = MaskingEngine::new(&MaskingConfig {
            fields: vec![MaskRule::pattern("(?i)secret")],
            ..MaskingConfig::default()
        })
        .unwrap();
        let out = engine.process(&json!({ "clientSecret": "s3", "SECRET_KEY": "k", "other": "x" }));
        assert_eq!(out["clientSecret"], json!("******"));
        assert_eq!(out["SECRET_KEY"], json!("******"));
        assert_eq!(out["other"], json!("x"));
    }

    #[test]
    fn test_arrays_are_walked() {
        let engine = engine(&["password"], MaskStyle::Fixed);
        let out = engine.process(&json!([{ "password": "p1" }, { "password": "p2" }]));
        assert_eq!(out, json!([{ "password": "******" }, { "password": "******" }]));
    }

    #[test]
    fn test_depth_limit_fails_open() {
        let engine = MaskingEngine::new(&MaskingConfig {
            fields: vec!["password".into()],
            max_depth: 1,
            ..MaskingConfig::default()
        })
        .unwrap();
        let input = json!({ "a": { "password": "x", "b": { "password": "deep" } } });
        let out = engine.process(&input);
        assert_eq!(out["a"]["password"], json!("******"));
        assert_eq!(out["a"]["b"]["password"], json!("deep"));
    }

    #[test]
    fn test_path_segment_masked() {
        let engine = engine(&["password"], MaskStyle::Fixed);
        let out = engine.process(&json!({ "url": "/users/PASSWORD/hunter2/edit" }));
        assert_eq!(out["url"], json!("/users/PASSWORD/******/edit"));
    }

    #[test]
    fn test_path_heuristic_false_positive_kept() {
        let engine = engine(&["token"], MaskStyle::PreserveLength);
        let out = engine.process(&json!({ "note": "either token/or nothing" }));
        assert_eq!(out["note"], json!("either token/or nothing"));
        let out = engine.process(&json!({ "note": "token/abc" }));
        assert_eq!(out["note"], json!("token/***"));
    }

    #[test]
    fn test_add_fields_is_monotonic_and_deduplicated() {
        let engine = engine(&["password"], MaskStyle::Fixed);
        assert_eq!(engine.add_fields(vec!["password".into(), "pin".into()]).unwrap(), 1);
        assert_eq!(engine.add_fields(vec!["pin".into()]).unwrap(), 0);
        assert_eq!(engine.fields(), vec![MaskRule::from("password"), MaskRule::from("pin")]);
        assert!(engine.is_sensitive("pin"));
    }

    #[test]
    fn test_add_fields_invalid_pattern_adds_nothing() {
        let engine = engine(&["password"], MaskStyle::Fixed);
        let result = engine.add_fields(vec!["pin".into(), MaskRule::pattern("(unclosed")]);
        assert!(matches!(result, Err(MaskingError::InvalidPattern { .. })));
        assert_eq!(engine.fields().len(), 1);
    }

    #[test]
    fn test_rules_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            fields: Vec<MaskRule>,
        }
        let parsed: Wrapper =
            toml::from_str(r#"fields = ["password", { pattern = "^x-" }]"#).unwrap();
        assert_eq!(parsed.fields, vec![MaskRule::field("password"), MaskRule::pattern("^x-")]);
    }
}
