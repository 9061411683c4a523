//! Shared instrumentation core for every client kind.
//!
//! # Call lifecycle
//! ```text
//! idle → started → succeeded
//!                → failed
//! ```
//! Both outcomes are terminal. No retries happen here; the adapter owns them.
//!
//! # Design Decisions
//! - The correlation id is read once per call, before the adapter runs
//! - Adapter errors are logged, then returned to the caller unchanged
//! - Durations use tokio's clock so paused-time tests stay deterministic

use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::logging::level::Level;
use crate::logging::logger::Logger;
use crate::logging::metadata::Metadata;
use crate::logging::serializers::ERROR_KEY;

/// The three adapter families that can be instrumented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Http,
    Broker,
    Store,
}

impl ClientKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Http => "http",
            ClientKind::Broker => "broker",
            ClientKind::Store => "store",
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPhase {
    Started,
    Succeeded,
    Failed,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Started => "started",
            CallPhase::Succeeded => "succeeded",
            CallPhase::Failed => "failed",
        }
    }
}

/// Per-instance instrumentation options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct InstrumentOptions {
    pub log_start: bool,
    pub log_success: bool,
    pub log_failure: bool,
    pub start_level: Level,
    pub success_level: Level,
    pub failure_level: Level,
    /// Include request/response headers in call logs.
    pub include_headers: bool,
    /// Include request/response bodies and message payloads in call logs.
    pub include_body: bool,
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            log_start: true,
            log_success: true,
            log_failure: true,
            start_level: Level::Debug,
            success_level: Level::Info,
            failure_level: Level::Error,
            include_headers: false,
            include_body: false,
        }
    }
}

/// Adapter errors that can add their own context to a failure log.
pub(crate) trait CallError: StdError + Clone + Send + Sync + 'static {
    fn describe(&self, _metadata: &mut Metadata, _options: &InstrumentOptions) {}
}

/// Logging and timing shared by the instrumented clients.
#[derive(Clone)]
pub(crate) struct Instrumentation {
    kind: ClientKind,
    instance: String,
    logger: Arc<Logger>,
    options: InstrumentOptions,
}

impl Instrumentation {
    pub(crate) fn new(
        kind: ClientKind,
        instance: impl Into<String>,
        logger: Arc<Logger>,
        options: InstrumentOptions,
    ) -> Self {
        Self {
            kind,
            instance: instance.into(),
            logger,
            options,
        }
    }

    pub(crate) fn instance(&self) -> &str {
        &self.instance
    }

    pub(crate) fn logger(&self) -> &Arc<Logger> {
        &self.logger
    }

    pub(crate) fn options(&self) -> &InstrumentOptions {
        &self.options
    }

    pub(crate) fn correlation_id(&self) -> Option<String> {
        self.logger.context().get_correlation_id()
    }

    pub(crate) fn correlation_header(&self) -> &str {
        self.logger.context().correlation_header_name()
    }

    fn base(&self, operation: &str, correlation_id: Option<&str>) -> Metadata {
        let mut metadata = Metadata::new()
            .with("client", self.kind)
            .with("instance", &self.instance)
            .with("operation", operation);
        if let Some(id) = correlation_id {
            metadata.insert("correlation_id", id);
        }
        metadata
    }

    fn message(&self, operation: &str, phase: CallPhase) -> String {
        format!("{} {} {} {}", self.kind, self.instance, operation, phase.as_str())
    }

    /// Time `call`, logging its start and its outcome.
    ///
    /// `details` is attached to every phase; `describe` adds fields from the
    /// successful result.
    pub(crate) async fn observe<T, E, Fut>(
        &self,
        operation: &str,
        details: Metadata,
        call: Fut,
        describe: impl FnOnce(&T, &mut Metadata),
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: CallError,
    {
        let correlation_id = self.correlation_id();
        let mut base = self.base(operation, correlation_id.as_deref());
        base.extend(details);

        if self.options.log_start {
            let metadata = base.clone().with("phase", CallPhase::Started);
            self.logger
                .log(
                    self.options.start_level,
                    Some(metadata),
                    self.message(operation, CallPhase::Started),
                )
                .await;
        }

        let started = Instant::now();
        let result = call.await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(value) if self.options.log_success => {
                let mut metadata = base
                    .with("phase", CallPhase::Succeeded)
                    .with("duration_ms", duration_ms);
                describe(value, &mut metadata);
                self.logger
                    .log(
                        self.options.success_level,
                        Some(metadata),
                        self.message(operation, CallPhase::Succeeded),
                    )
                    .await;
            }
            Err(err) if self.options.log_failure => {
                let mut metadata = base
                    .with("phase", CallPhase::Failed)
                    .with("duration_ms", duration_ms)
                    .with_error(ERROR_KEY, err.clone());
                err.describe(&mut metadata, &self.options);
                self.logger
                    .log(
                        self.options.failure_level,
                        Some(metadata),
                        self.message(operation, CallPhase::Failed),
                    )
                    .await;
            }
            _ => {}
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::error::StoreError;
    use crate::logging::factory::LoggerFactory;
    use crate::logging::transport::MemoryTransport;
    use serde_json::json;
    use std::time::Duration;

    fn setup(options: InstrumentOptions) -> (Instrumentation, Arc<MemoryTransport>, LoggerFactory) {
        let memory = Arc::new(MemoryTransport::new());
        let factory = LoggerFactory::for_tests(vec![memory.clone()]);
        let instr = Instrumentation::new(ClientKind::Store, "cache", factory.root(), options);
        (instr, memory, factory)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_logs_start_and_outcome() {
        let (instr, memory, _factory) = setup(InstrumentOptions::default());

        let result: Result<u32, StoreError> = instr
            .observe(
                "GET",
                Metadata::new().with("key", "user:1"),
                async {
                    tokio::time::sleep(Duration::from_millis(30)).await;
                    Ok(7)
                },
                |value, metadata| metadata.insert("result", *value),
            )
            .await;

        assert_eq!(result.unwrap(), 7);
        let entries = memory.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].field("phase"), Some(&json!("started")));
        assert_eq!(entries[0].level, Level::Debug);
        assert_eq!(entries[1].field("phase"), Some(&json!("succeeded")));
        assert_eq!(entries[1].field("duration_ms"), Some(&json!(30)));
        assert_eq!(entries[1].field("result"), Some(&json!(7)));
        assert_eq!(entries[1].field("key"), Some(&json!("user:1")));
    }

    #[tokio::test]
    async fn test_failure_returns_original_error() {
        let (instr, memory, _factory) = setup(InstrumentOptions::default());

        let result: Result<(), StoreError> = instr
            .observe(
                "SET",
                Metadata::new(),
                async { Err(StoreError::new("READONLY").with_code("READONLY")) },
                |_, _| {},
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.message, "READONLY");
        let failed = memory.find(|e| e.msg == "store cache SET failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].level, Level::Error);
        let error = failed[0].field("error").unwrap();
        assert_eq!(error["code"], json!("READONLY"));
        assert_eq!(error["message"], json!("READONLY"));
    }

    #[tokio::test]
    async fn test_correlation_id_attached_when_present() {
        let (instr, memory, factory) = setup(InstrumentOptions {
            log_start: false,
            ..Default::default()
        });
        let context = factory.root().context().clone();

        context
            .run(|| async {
                context.set_correlation_id("corr-1");
                let _: Result<(), StoreError> =
                    instr.observe("PING", Metadata::new(), async { Ok(()) }, |_, _| {}).await;
            })
            .await;

        assert_eq!(memory.len(), 1);
        assert_eq!(memory.entries()[0].field("correlation_id"), Some(&json!("corr-1")));
    }

    #[tokio::test]
    async fn test_phases_can_be_silenced() {
        let (instr, memory, _factory) = setup(InstrumentOptions {
            log_start: false,
            log_success: false,
            ..Default::default()
        });
        let _: Result<(), StoreError> =
            instr.observe("PING", Metadata::new(), async { Ok(()) }, |_, _| {}).await;
        assert!(memory.is_empty());
    }
}
