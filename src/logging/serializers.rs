//! Timeout-guarded field serializers.
//!
//! # Responsibilities
//! - Map metadata keys to transform functions
//! - Race each transform against a shared timeout budget
//! - Replace a failing field with a tagged placeholder, leaving the rest intact
//!
//! # Design Decisions
//! - Fields are serialized concurrently; a log call waits at most one budget
//! - Errors, timeouts and panics are all contained per field
//! - A built-in serializer handles the conventional `error` field unless the
//!   caller registers their own
//! - A transform that blocks its thread instead of yielding cannot be timed out

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture};
use futures_util::FutureExt;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::schema::SerializerConfig;
use crate::logging::level::Level;
use crate::logging::logger::Logger;
use crate::logging::metadata::{ErrorShape, FieldValue, Metadata};
use crate::BoxError;

/// Key handled by the built-in [`ErrorSerializer`].
pub const ERROR_KEY: &str = "error";

pub type SerializeFuture = BoxFuture<'static, Result<Value, BoxError>>;

/// Transform applied to one metadata field.
pub trait Serializer: Send + Sync {
    fn serialize(&self, value: FieldValue) -> SerializeFuture;
}

impl<F, Fut> Serializer for F
where
    F: Fn(FieldValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    fn serialize(&self, value: FieldValue) -> SerializeFuture {
        Box::pin(self(value))
    }
}

/// Extracts name/message/code/stack/cause from error-shaped values.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorSerializer;

impl Serializer for ErrorSerializer {
    fn serialize(&self, value: FieldValue) -> SerializeFuture {
        Box::pin(async move {
            Ok(match value {
                FieldValue::Error(err) => ErrorShape::from_error(err.as_ref()).to_value(),
                FieldValue::Json(value) => ErrorShape::normalize_value(&value),
            })
        })
    }
}

#[derive(Debug, Error)]
pub enum SerializerError {
    #[error("serializer for '{key}' failed: {source}")]
    Failed {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("serializer for '{key}' panicked")]
    Panicked { key: String },

    #[error("serializer for '{key}' timed out after {timeout_ms}ms")]
    TimedOut { key: String, timeout_ms: u64 },
}

impl SerializerError {
    /// Value written in place of the field that failed.
    pub fn placeholder(&self) -> String {
        format!("[SerializerError: {self}]")
    }
}

/// Registry of per-key serializers sharing one timeout budget.
pub struct SerializerRegistry {
    serializers: DashMap<String, Arc<dyn Serializer>>,
    timeout: Duration,
}

impl SerializerRegistry {
    pub fn new(config: &SerializerConfig) -> Self {
        let registry = Self {
            serializers: DashMap::new(),
            timeout: Duration::from_millis(config.timeout_ms),
        };
        registry.register(ERROR_KEY, ErrorSerializer);
        registry
    }

    /// Register (or replace) the serializer for `key`.
    pub fn register<S>(&self, key: impl Into<String>, serializer: S)
    where
        S: Serializer + 'static,
    {
        self.serializers.insert(key.into(), Arc::new(serializer));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.serializers.contains_key(key)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Serialize one field, failing after the timeout budget.
    pub async fn serialize_field(
        &self,
        key: &str,
        value: FieldValue,
    ) -> Result<Value, SerializerError> {
        let serializer = self.serializers.get(key).map(|entry| entry.value().clone());
        match serializer {
            Some(serializer) => self.run(key, serializer, value).await,
            None => Ok(value.into_json()),
        }
    }

    /// Serialize every field of `fields`.
    ///
    /// Failures are logged at warn through `logger` and replaced by a
    /// placeholder string; this never fails as a whole.
    pub async fn process(&self, fields: Metadata, logger: &Logger) -> Map<String, Value> {
        let jobs = fields.into_iter().map(|(key, value)| async move {
            let result = self.serialize_field(&key, value).await;
            (key, result)
        });

        let mut out = Map::new();
        for (key, result) in join_all(jobs).await {
            let value = match result {
                Ok(value) => value,
                Err(err) => {
                    let mut fields = Map::new();
                    fields.insert("serializer_key".into(), Value::String(key.clone()));
                    fields.insert("reason".into(), Value::String(err.to_string()));
                    logger.emit_internal(Level::Warn, fields, "Serializer failed; field replaced");
                    Value::String(err.placeholder())
                }
            };
            out.insert(key, value);
        }
        out
    }

    async fn run(
        &self,
        key: &str,
        serializer: Arc<dyn Serializer>,
        value: FieldValue,
    ) -> Result<Value, SerializerError> {
        let fut = std::panic::catch_unwind(AssertUnwindSafe(|| serializer.serialize(value)))
            .map_err(|_| SerializerError::Panicked { key: key.to_string() })?;

        match tokio::time::timeout(self.timeout, AssertUnwindSafe(fut).catch_unwind()).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(source))) => Err(SerializerError::Failed {
                key: key.to_string(),
                source,
            }),
            Ok(Err(_)) => Err(SerializerError::Panicked { key: key.to_string() }),
            Err(_) => Err(SerializerError::TimedOut {
                key: key.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new(&SerializerConfig::default())
    }
}

impl std::fmt::Debug for SerializerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.serializers.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("SerializerRegistry")
            .field("keys", &keys)
            .field("timeout", &self.timeout)
            .finish()
    }
}
