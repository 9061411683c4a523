//! Instrumented message broker client.
//!
//! # Data Flow
//! ```text
//! Outbound:
//!     publish(topic, message)
//!         → correlation id copied into message headers
//!         → adapter.publish, timed and logged
//!
//! Inbound:
//!     adapter delivers message
//!         → new context scope, seeded from the correlation header
//!         → user handler (ack/reject calls are logged)
//!         → handler errors and panics logged, never returned to the adapter
//! ```
//!
//! # Design Decisions
//! - Lazy instances connect on first publish/subscribe
//! - Delivery guarantees belong to the adapter and pass through untouched
//! - Accepted subscriptions are remembered so a replacement client built on
//!   reload can take them over

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::client::error::{BrokerError, ClientError};
use crate::client::failing::FailingClient;
use crate::client::instrument::{CallError, Instrumentation};
use crate::context::ContextStore;
use crate::logging::metadata::Metadata;
use crate::logging::serializers::ERROR_KEY;
use crate::BoxError;

impl CallError for BrokerError {}

/// Message payload plus headers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BrokerMessage {
    pub payload: Value,
    pub headers: BTreeMap<String, String>,
}

impl BrokerMessage {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            headers: BTreeMap::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Ack/reject controls supplied by the adapter for one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), BrokerError>;
    async fn reject(&self, requeue: bool) -> Result<(), BrokerError>;
}

/// One inbound message handed to a subscription handler.
pub struct Delivery {
    pub topic: String,
    pub message: BrokerMessage,
    acknowledger: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    /// A delivery without ack controls (auto-ack brokers).
    pub fn new(topic: impl Into<String>, message: BrokerMessage) -> Self {
        Self {
            topic: topic.into(),
            message,
            acknowledger: None,
        }
    }

    pub fn with_acknowledger(mut self, acknowledger: Arc<dyn Acknowledger>) -> Self {
        self.acknowledger = Some(acknowledger);
        self
    }

    pub async fn ack(&self) -> Result<(), BrokerError> {
        match &self.acknowledger {
            Some(a) => a.ack().await,
            None => Ok(()),
        }
    }

    pub async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        match &self.acknowledger {
            Some(a) => a.reject(requeue).await,
            None => Ok(()),
        }
    }
}

pub type HandlerFuture = BoxFuture<'static, Result<(), BoxError>>;

/// Subscription callback.
pub type MessageHandler = Arc<dyn Fn(Delivery) -> HandlerFuture + Send + Sync>;

/// Box an async closure as a [`MessageHandler`].
pub fn handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    Arc::new(move |delivery| f(delivery).boxed())
}

/// Capability a broker library must provide to be instrumented.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn connect(&self) -> Result<(), BrokerError>;
    async fn disconnect(&self) -> Result<(), BrokerError>;
    async fn publish(&self, topic: &str, message: BrokerMessage) -> Result<(), BrokerError>;
    async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), BrokerError>;
}

/// Logs ack/reject before delegating to the adapter's controls.
struct LoggedAcknowledger {
    inner: Option<Arc<dyn Acknowledger>>,
    instrumentation: Instrumentation,
    topic: String,
}

impl LoggedAcknowledger {
    fn metadata(&self) -> Metadata {
        Metadata::new()
            .with("client", "broker")
            .with("instance", self.instrumentation.instance())
            .with("topic", &self.topic)
    }
}

#[async_trait]
impl Acknowledger for LoggedAcknowledger {
    async fn ack(&self) -> Result<(), BrokerError> {
        self.instrumentation
            .logger()
            .debug_with(self.metadata(), "message acknowledged")
            .await;
        match &self.inner {
            Some(inner) => inner.ack().await,
            None => Ok(()),
        }
    }

    async fn reject(&self, requeue: bool) -> Result<(), BrokerError> {
        self.instrumentation
            .logger()
            .warn_with(self.metadata().with("requeue", requeue), "message rejected")
            .await;
        match &self.inner {
            Some(inner) => inner.reject(requeue).await,
            None => Ok(()),
        }
    }
}

/// A topic and the unwrapped handler registered for it.
pub type Subscription = (String, MessageHandler);

/// Broker adapter wrapped with correlation and call logging.
pub struct InstrumentedBroker {
    adapter: Arc<dyn BrokerAdapter>,
    instrumentation: Instrumentation,
    connected: OnceCell<()>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl InstrumentedBroker {
    pub(crate) fn new(adapter: Arc<dyn BrokerAdapter>, instrumentation: Instrumentation) -> Self {
        Self {
            adapter,
            instrumentation,
            connected: OnceCell::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Connect once; later calls are no-ops until a connect succeeds.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.connected
            .get_or_try_init(|| {
                self.instrumentation
                    .observe("connect", Metadata::new(), self.adapter.connect(), |_, _| {})
            })
            .await?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connected.initialized()
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Ok(());
        }
        self.instrumentation
            .observe("disconnect", Metadata::new(), self.adapter.disconnect(), |_, _| {})
            .await?;
        Ok(())
    }

    pub async fn publish(&self, topic: &str, mut message: BrokerMessage) -> Result<(), ClientError> {
        self.connect().await?;

        let header = self.instrumentation.correlation_header();
        if let Some(id) = self.instrumentation.correlation_id() {
            if message.header_value(header).is_none() {
                message.headers.insert(header.to_string(), id);
            }
        }

        let options = self.instrumentation.options();
        let mut details = Metadata::new().with("topic", topic);
        if options.include_headers {
            details.insert("headers", &message.headers);
        }
        if options.include_body {
            details.insert("payload", &message.payload);
        }

        self.instrumentation
            .observe("publish", details, self.adapter.publish(topic, message), |_, _| {})
            .await?;
        Ok(())
    }

    pub async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), ClientError> {
        self.connect().await?;
        let wrapped = self.wrap_handler(handler.clone());
        self.instrumentation
            .observe(
                "subscribe",
                Metadata::new().with("topic", topic),
                self.adapter.subscribe(topic, wrapped),
                |_, _| {},
            )
            .await?;
        self.subscriptions.lock().push((topic.to_string(), handler));
        Ok(())
    }

    /// Subscriptions accepted by the adapter, in registration order.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.lock().clone()
    }

    fn wrap_handler(&self, handler: MessageHandler) -> MessageHandler {
        let instrumentation = self.instrumentation.clone();
        Arc::new(move |delivery: Delivery| {
            let instrumentation = instrumentation.clone();
            let handler = handler.clone();
            async move {
                consume(instrumentation, handler, delivery).await;
                Ok(())
            }
            .boxed()
        })
    }
}

/// Run one delivery through `handler` inside its own scope.
async fn consume(instrumentation: Instrumentation, handler: MessageHandler, mut delivery: Delivery) {
    let context = instrumentation.logger().context().clone();
    let header = context.correlation_header_name().to_string();

    let mut seed = ContextStore::new();
    if let Some(id) = delivery.message.header_value(&header) {
        seed.insert(header, Value::String(id.to_string()));
    }

    context
        .run_with(seed, move || async move {
            let logger = instrumentation.logger().clone();
            let options = instrumentation.options().clone();

            let mut metadata = Metadata::new()
                .with("client", "broker")
                .with("instance", instrumentation.instance())
                .with("topic", &delivery.topic);
            if options.include_headers {
                metadata.insert("headers", &delivery.message.headers);
            }
            if options.include_body {
                metadata.insert("payload", &delivery.message.payload);
            }
            if options.log_start {
                logger
                    .log(options.start_level, Some(metadata.clone()), "message received")
                    .await;
            }

            delivery.acknowledger = Some(Arc::new(LoggedAcknowledger {
                inner: delivery.acknowledger.take(),
                instrumentation: instrumentation.clone(),
                topic: delivery.topic.clone(),
            }));

            let outcome = match std::panic::catch_unwind(AssertUnwindSafe(|| handler(delivery))) {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(panic) => Err(panic),
            };

            match outcome {
                Ok(Ok(())) => {
                    if options.log_success {
                        logger
                            .log(options.success_level, Some(metadata), "message handled")
                            .await;
                    }
                }
                Ok(Err(e)) => {
                    let metadata = metadata.with_shared_error(ERROR_KEY, Arc::from(e));
                    logger.error_with(metadata, "message handler failed").await;
                }
                Err(_) => {
                    logger.error_with(metadata, "message handler panicked").await;
                }
            }
        })
        .await
}

/// A configured broker instance.
pub enum BrokerClient {
    Instrumented(InstrumentedBroker),
    Failing(FailingClient),
}

impl BrokerClient {
    pub fn instance(&self) -> &str {
        match self {
            BrokerClient::Instrumented(client) => client.instrumentation.instance(),
            BrokerClient::Failing(client) => client.instance(),
        }
    }

    pub fn is_failing(&self) -> bool {
        matches!(self, BrokerClient::Failing(_))
    }

    pub async fn connect(&self) -> Result<(), ClientError> {
        match self {
            BrokerClient::Instrumented(client) => client.connect().await,
            BrokerClient::Failing(client) => Err(client.fail("connect").await),
        }
    }

    pub async fn disconnect(&self) -> Result<(), ClientError> {
        match self {
            BrokerClient::Instrumented(client) => client.disconnect().await,
            BrokerClient::Failing(client) => Err(client.fail("disconnect").await),
        }
    }

    pub async fn publish(&self, topic: &str, message: BrokerMessage) -> Result<(), ClientError> {
        match self {
            BrokerClient::Instrumented(client) => client.publish(topic, message).await,
            BrokerClient::Failing(client) => Err(client.fail("publish").await),
        }
    }

    pub async fn subscribe(&self, topic: &str, handler: MessageHandler) -> Result<(), ClientError> {
        match self {
            BrokerClient::Instrumented(client) => client.subscribe(topic, handler).await,
            BrokerClient::Failing(client) => Err(client.fail("subscribe").await),
        }
    }

    /// Release the connection on shutdown. Failing instances hold nothing.
    pub(crate) async fn release(&self) -> Result<(), ClientError> {
        match self {
            BrokerClient::Instrumented(client) => client.disconnect().await,
            BrokerClient::Failing(_) => Ok(()),
        }
    }

    /// Subscriptions this client carries.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        match self {
            BrokerClient::Instrumented(client) => client.subscriptions(),
            BrokerClient::Failing(_) => Vec::new(),
        }
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient")
            .field("instance", &self.instance())
            .field("failing", &self.is_failing())
            .finish()
    }
}
