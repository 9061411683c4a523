//! Call-site metadata and error normalization.

use std::collections::btree_map::{self, BTreeMap};
use std::error::Error as StdError;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::error::{BrokerError, ClientError, HttpError, StoreError};

/// Maximum depth of the `cause` chain captured in an [`ErrorShape`].
const MAX_CAUSE_DEPTH: usize = 8;

/// Shared, type-erased error carried in metadata.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// A metadata value before serialization.
///
/// Errors stay typed until the serializer stage so the error serializer can
/// walk their `source()` chain.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Json(Value),
    Error(SharedError),
}

impl FieldValue {
    /// Convert to JSON without running any registered serializer.
    pub fn into_json(self) -> Value {
        match self {
            FieldValue::Json(value) => value,
            FieldValue::Error(err) => ErrorShape::from_error(err.as_ref()).to_value(),
        }
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Json(value)
    }
}

/// Metadata attached to a single log call.
#[derive(Debug, Clone, Default)]
pub struct Metadata(BTreeMap<String, FieldValue>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add any serializable value.
    pub fn with<T: Serialize>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    /// Add an error, kept typed until serialization.
    pub fn with_error<E>(self, key: impl Into<String>, err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.with_shared_error(key, Arc::new(err))
    }

    pub fn with_shared_error(mut self, key: impl Into<String>, err: SharedError) -> Self {
        self.0.insert(key.into(), FieldValue::Error(err));
        self
    }

    pub fn insert<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        let value = serde_json::to_value(value)
            .unwrap_or_else(|e| Value::String(format!("[unserializable: {e}]")));
        self.0.insert(key.into(), FieldValue::Json(value));
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn extend(&mut self, other: Metadata) {
        self.0.extend(other.0);
    }
}

impl IntoIterator for Metadata {
    type Item = (String, FieldValue);
    type IntoIter = btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map.into_iter().map(|(k, v)| (k, FieldValue::Json(v))).collect())
    }
}

/// Objects become metadata entries; any other value is stored under `value`.
impl From<Value> for Metadata {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => map.into(),
            other => Metadata::new().with("value", other),
        }
    }
}

/// Plain structure extracted from an error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorShape {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ErrorShape>>,
}

impl ErrorShape {
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        Self::from_error_at(err, 0)
    }

    fn from_error_at(err: &(dyn StdError + 'static), depth: usize) -> Self {
        let cause = match err.source() {
            Some(source) if depth < MAX_CAUSE_DEPTH => {
                Some(Box::new(Self::from_error_at(source, depth + 1)))
            }
            _ => None,
        };
        Self {
            name: error_name(err),
            message: err.to_string(),
            code: error_code(err),
            stack: None,
            cause,
        }
    }

    /// Normalize an error-like JSON value: objects keep only
    /// name/message/code/stack/cause, strings become `{ "message": .. }`.
    pub fn normalize_value(value: &Value) -> Value {
        Self::normalize_value_at(value, 0)
    }

    fn normalize_value_at(value: &Value, depth: usize) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for key in ["name", "message", "code", "stack"] {
                    if let Some(v) = map.get(key) {
                        out.insert(key.to_string(), v.clone());
                    }
                }
                if let Some(cause) = map.get("cause") {
                    if depth < MAX_CAUSE_DEPTH && !cause.is_null() {
                        out.insert("cause".into(), Self::normalize_value_at(cause, depth + 1));
                    }
                }
                Value::Object(out)
            }
            Value::String(message) => {
                let mut out = Map::new();
                out.insert("message".into(), Value::String(message.clone()));
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::String(self.message.clone()))
    }
}

/// Type or variant name taken from the error's `Debug` output.
fn error_name(err: &(dyn StdError + 'static)) -> String {
    let debug = format!("{err:?}");
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == ':')
        .collect();
    if name.is_empty() {
        "Error".to_string()
    } else {
        name
    }
}

fn error_code(err: &(dyn StdError + 'static)) -> Option<String> {
    if let Some(e) = err.downcast_ref::<ClientError>() {
        return Some(e.code().to_string());
    }
    if let Some(e) = err.downcast_ref::<HttpError>() {
        return e.code.clone();
    }
    if let Some(e) = err.downcast_ref::<BrokerError>() {
        return e.code.clone();
    }
    if let Some(e) = err.downcast_ref::<StoreError>() {
        return e.code.clone();
    }
    err.downcast_ref::<std::io::Error>()
        .map(|e| format!("{:?}", e.kind()))
}
