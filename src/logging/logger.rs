//! The logger and its per-call pipeline.
//!
//! # Per-call pipeline
//! ```text
//! log(level, metadata, msg)
//!     → level gate (nothing else runs below the threshold)
//!     → context snapshot
//!     → serializers.rs (timeout-guarded, per field)
//!     → sanitize + mask (metadata, context, message)
//!     → entry.rs (merge bindings, metadata, context)
//!     → every transport whose level admits the entry
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::context::ContextManager;
use crate::logging::entry::LogEntry;
use crate::logging::level::Level;
use crate::logging::metadata::Metadata;
use crate::logging::serializers::SerializerRegistry;
use crate::logging::transport::Transport;
use crate::security::Sanitizer;

/// Binding key set by [`Logger::with_source`].
pub const SOURCE_KEY: &str = "source";
/// Binding key set by [`Logger::with_retention`].
pub const RETENTION_KEY: &str = "retention";

/// Engines and sinks shared by a logger and all of its children.
pub(crate) struct Pipeline {
    pub(crate) service: String,
    pub(crate) context: ContextManager,
    pub(crate) serializers: Arc<SerializerRegistry>,
    pub(crate) sanitizer: Sanitizer,
    pub(crate) transports: Vec<Arc<dyn Transport>>,
}

/// Structured logger.
///
/// Children share the pipeline but own their bindings and level.
pub struct Logger {
    level: AtomicU8,
    bindings: Arc<Map<String, Value>>,
    pipeline: Arc<Pipeline>,
}

impl Logger {
    pub(crate) fn new(pipeline: Arc<Pipeline>, level: Level, bindings: Map<String, Value>) -> Self {
        Self {
            level: AtomicU8::new(level as u8),
            bindings: Arc::new(bindings),
            pipeline,
        }
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.level.load(Ordering::Relaxed))
    }

    /// Change this logger's threshold only; parents and children keep theirs.
    pub fn set_level(&self, level: Level) {
        self.level.store(level as u8, Ordering::Relaxed);
    }

    pub fn enabled(&self, level: Level) -> bool {
        level >= self.level()
    }

    pub fn bindings(&self) -> &Map<String, Value> {
        &self.bindings
    }

    pub fn service(&self) -> &str {
        &self.pipeline.service
    }

    pub fn context(&self) -> &ContextManager {
        &self.pipeline.context
    }

    /// New logger with `bindings` merged over this logger's bindings.
    pub fn child(&self, bindings: Map<String, Value>) -> Logger {
        let mut merged = (*self.bindings).clone();
        merged.extend(bindings);
        Logger::new(self.pipeline.clone(), self.level(), merged)
    }

    fn child_with(&self, key: &str, value: Value) -> Logger {
        let mut bindings = Map::new();
        bindings.insert(key.to_string(), value);
        self.child(bindings)
    }

    pub fn with_source(&self, source: impl Into<String>) -> Logger {
        self.child_with(SOURCE_KEY, Value::String(source.into()))
    }

    pub fn with_retention(&self, retention: impl Into<String>) -> Logger {
        self.child_with(RETENTION_KEY, Value::String(retention.into()))
    }

    pub fn with_transaction_id(&self, id: impl Into<String>) -> Logger {
        let key = self.pipeline.context.transaction_key_name().to_string();
        self.child_with(&key, Value::String(id.into()))
    }

    /// Run the full pipeline for one call.
    pub async fn log(&self, level: Level, metadata: Option<Metadata>, msg: impl Into<String>) {
        if !self.enabled(level) {
            return;
        }
        let context = self.pipeline.context.get_all();
        let fields = match metadata {
            Some(metadata) if !metadata.is_empty() => {
                self.pipeline.serializers.process(metadata, self).await
            }
            _ => Map::new(),
        };
        self.dispatch(level, fields, context, msg.into());
    }

    pub async fn trace(&self, msg: impl Into<String>) {
        self.log(Level::Trace, None, msg).await
    }

    pub async fn debug(&self, msg: impl Into<String>) {
        self.log(Level::Debug, None, msg).await
    }

    pub async fn info(&self, msg: impl Into<String>) {
        self.log(Level::Info, None, msg).await
    }

    pub async fn warn(&self, msg: impl Into<String>) {
        self.log(Level::Warn, None, msg).await
    }

    pub async fn error(&self, msg: impl Into<String>) {
        self.log(Level::Error, None, msg).await
    }

    pub async fn trace_with(&self, metadata: Metadata, msg: impl Into<String>) {
        self.log(Level::Trace, Some(metadata), msg).await
    }

    pub async fn debug_with(&self, metadata: Metadata, msg: impl Into<String>) {
        self.log(Level::Debug, Some(metadata), msg).await
    }

    pub async fn info_with(&self, metadata: Metadata, msg: impl Into<String>) {
        self.log(Level::Info, Some(metadata), msg).await
    }

    pub async fn warn_with(&self, metadata: Metadata, msg: impl Into<String>) {
        self.log(Level::Warn, Some(metadata), msg).await
    }

    pub async fn error_with(&self, metadata: Metadata, msg: impl Into<String>) {
        self.log(Level::Error, Some(metadata), msg).await
    }

    /// Log already-serialized fields, skipping the serializer stage.
    pub(crate) fn emit_internal(&self, level: Level, fields: Map<String, Value>, msg: impl Into<String>) {
        if !self.enabled(level) {
            return;
        }
        let context = self.pipeline.context.get_all();
        self.dispatch(level, fields, context, msg.into());
    }

    fn dispatch(
        &self,
        level: Level,
        fields: Map<String, Value>,
        context: Map<String, Value>,
        msg: String,
    ) {
        let sanitizer = &self.pipeline.sanitizer;
        let fields = into_object(sanitizer.process(&Value::Object(fields)));
        let context = into_object(sanitizer.process(&Value::Object(context)));
        let msg = match sanitizer.process(&Value::String(msg)) {
            Value::String(s) => s,
            other => other.to_string(),
        };

        let entry = Arc::new(LogEntry::assemble(
            level,
            &self.pipeline.service,
            msg,
            context,
            &self.bindings,
            fields,
        ));

        for transport in &self.pipeline.transports {
            if level < transport.level().unwrap_or(Level::Trace) {
                continue;
            }
            match std::panic::catch_unwind(AssertUnwindSafe(|| transport.log(&entry))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(transport = transport.name(), error = %e, "Transport failed to write log entry");
                }
                Err(_) => {
                    tracing::error!(transport = transport.name(), "Transport panicked while writing log entry");
                }
            }
        }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("service", &self.pipeline.service)
            .field("level", &self.level())
            .field("bindings", &self.bindings)
            .finish()
    }
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::transport::{MemoryTransport, TransportError};
    use crate::logging::LoggerFactory;
    use serde_json::json;

    struct FailingTransport;

    #[async_trait::async_trait]
    impl Transport for FailingTransport {
        fn name(&self) -> &str {
            "failing"
        }
        fn log(&self, _entry: &Arc<LogEntry>) -> Result<(), TransportError> {
            Err(TransportError::Other("disk full".into()))
        }
    }

    struct PanickingTransport;

    #[async_trait::async_trait]
    impl Transport for PanickingTransport {
        fn name(&self) -> &str {
            "panicking"
        }
        fn log(&self, _entry: &Arc<LogEntry>) -> Result<(), TransportError> {
            panic!("sink bug")
        }
    }

    #[tokio::test]
    async fn test_below_threshold_dropped() {
        let memory = Arc::new(MemoryTransport::new());
        let factory = LoggerFactory::for_tests(vec![memory.clone()]);
        let logger = factory.root();
        logger.set_level(Level::Warn);
        logger.info("ignored").await;
        logger.warn("kept").await;
        assert_eq!(memory.messages(), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_transport_level_filter() {
        let all = Arc::new(MemoryTransport::new());
        let errors_only = Arc::new(MemoryTransport::with_level(Level::Error));
        let factory = LoggerFactory::for_tests(vec![all.clone(), errors_only.clone()]);
        let logger = factory.root();
        logger.info("info").await;
        logger.error("error").await;
        assert_eq!(all.len(), 2);
        assert_eq!(errors_only.messages(), vec!["error"]);
    }

    #[tokio::test]
    async fn test_transport_failures_are_contained() {
        let memory = Arc::new(MemoryTransport::new());
        let factory = LoggerFactory::for_tests(vec![
            Arc::new(FailingTransport),
            Arc::new(PanickingTransport),
            memory.clone(),
        ]);
        factory.root().info("still delivered").await;
        assert_eq!(memory.messages(), vec!["still delivered"]);
    }

    #[tokio::test]
    async fn test_child_bindings_do_not_touch_parent() {
        let memory = Arc::new(MemoryTransport::new());
        let factory = LoggerFactory::for_tests(vec![memory.clone()]);
        let parent = factory.root();
        let child = parent.with_source("db").with_retention("30d");
        child.set_level(Level::Error);

        assert!(parent.bindings().get(SOURCE_KEY).is_none());
        assert_eq!(parent.level(), Level::Trace);

        child.error("child").await;
        parent.info("parent").await;
        let entries = memory.entries();
        assert_eq!(entries[0].field(SOURCE_KEY), Some(&json!("db")));
        assert_eq!(entries[0].field(RETENTION_KEY), Some(&json!("30d")));
        assert!(entries[1].field(SOURCE_KEY).is_none());
    }

    #[tokio::test]
    async fn test_context_snapshot_attached() {
        let memory = Arc::new(MemoryTransport::new());
        let factory = LoggerFactory::for_tests(vec![memory.clone()]);
        let logger = factory.root();
        let ctx = logger.context().clone();
        ctx.run(|| async {
            ctx.set_correlation_id("corr-9");
            logger.info("inside").await;
        })
        .await;
        logger.info("outside").await;

        let entries = memory.entries();
        assert_eq!(entries[0].context[ctx.correlation_header_name()], json!("corr-9"));
        assert!(entries[1].context.is_empty());
    }

    #[tokio::test]
    async fn test_with_transaction_id_binding() {
        let memory = Arc::new(MemoryTransport::new());
        let factory = LoggerFactory::for_tests(vec![memory.clone()]);
        let logger = factory.root().with_transaction_id("tx-42");
        logger.info("tx").await;
        let key = logger.context().transaction_key_name().to_string();
        assert_eq!(memory.entries()[0].field(&key), Some(&json!("tx-42")));
    }

    #[tokio::test]
    async fn test_message_and_metadata_sanitized() {
        let memory = Arc::new(MemoryTransport::new());
        let factory = LoggerFactory::for_tests(vec![memory.clone()]);
        factory
            .root()
            .info_with(
                Metadata::new().with("input", "\x1b[31mred\x1b[0m"),
                "user said \x1b[2Jhi",
            )
            .await;
        let entry = &memory.entries()[0];
        assert_eq!(entry.msg, "user said hi");
        assert_eq!(entry.field("input"), Some(&json!("red")));
    }
}
