//! Client construction from instance configuration.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use crate::client::broker::{BrokerAdapter, BrokerClient, InstrumentedBroker};
use crate::client::error::{ClientError, ConstructionError};
use crate::client::failing::FailingClient;
use crate::client::http::{HttpAdapter, HttpClient, InstrumentedHttp};
use crate::client::instrument::{ClientKind, Instrumentation};
use crate::client::store::{InstrumentedStore, KeyValueAdapter, StoreClient};
use crate::config::schema::InstanceConfig;
use crate::logging::factory::LoggerFactory;
use crate::logging::logger::Logger;
use crate::logging::metadata::Metadata;
use crate::logging::serializers::ERROR_KEY;
use crate::BoxError;

/// Builds an adapter from an instance's configuration.
pub type AdapterFactory<A> =
    Arc<dyn Fn(&InstanceConfig) -> Result<Arc<A>, BoxError> + Send + Sync>;

/// Caller-supplied adapter factories, one per client kind.
#[derive(Clone, Default)]
pub struct Adapters {
    http: Option<AdapterFactory<dyn HttpAdapter>>,
    broker: Option<AdapterFactory<dyn BrokerAdapter>>,
    store: Option<AdapterFactory<dyn KeyValueAdapter>>,
}

impl Adapters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http<A, F>(mut self, factory: F) -> Self
    where
        A: HttpAdapter + 'static,
        F: Fn(&InstanceConfig) -> Result<Arc<A>, BoxError> + Send + Sync + 'static,
    {
        self.http = Some(Arc::new(move |config: &InstanceConfig| {
            factory(config).map(|adapter| adapter as Arc<dyn HttpAdapter>)
        }));
        self
    }

    pub fn with_broker<A, F>(mut self, factory: F) -> Self
    where
        A: BrokerAdapter + 'static,
        F: Fn(&InstanceConfig) -> Result<Arc<A>, BoxError> + Send + Sync + 'static,
    {
        self.broker = Some(Arc::new(move |config: &InstanceConfig| {
            factory(config).map(|adapter| adapter as Arc<dyn BrokerAdapter>)
        }));
        self
    }

    pub fn with_store<A, F>(mut self, factory: F) -> Self
    where
        A: KeyValueAdapter + 'static,
        F: Fn(&InstanceConfig) -> Result<Arc<A>, BoxError> + Send + Sync + 'static,
    {
        self.store = Some(Arc::new(move |config: &InstanceConfig| {
            factory(config).map(|adapter| adapter as Arc<dyn KeyValueAdapter>)
        }));
        self
    }
}

impl std::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapters")
            .field("http", &self.http.is_some())
            .field("broker", &self.broker.is_some())
            .field("store", &self.store.is_some())
            .finish()
    }
}

fn construct<A: ?Sized>(
    factory: Option<&AdapterFactory<A>>,
    kind: ClientKind,
    config: &InstanceConfig,
) -> Result<Arc<A>, ConstructionError> {
    let factory = factory.ok_or(ConstructionError::MissingFactory { kind: kind.as_str() })?;
    match std::panic::catch_unwind(AssertUnwindSafe(|| factory(config))) {
        Ok(result) => result.map_err(ConstructionError::Factory),
        Err(_) => Err(ConstructionError::Factory("adapter factory panicked".into())),
    }
}

/// Run the initial connect within the instance's `connect_timeout_ms`.
async fn eager_connect<F>(config: &InstanceConfig, connect: F) -> Result<(), ConstructionError>
where
    F: Future<Output = Result<(), ClientError>>,
{
    let budget = Duration::from_millis(config.connect_timeout_ms);
    match tokio::time::timeout(budget, connect).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConstructionError::Connect(e)),
        Err(_) => Err(ConstructionError::ConnectTimedOut {
            timeout_ms: config.connect_timeout_ms,
        }),
    }
}

/// Turns instance configuration into clients, never failing outright.
pub struct ClientBuilder<'a> {
    loggers: &'a LoggerFactory,
    adapters: &'a Adapters,
}

impl<'a> ClientBuilder<'a> {
    pub fn new(loggers: &'a LoggerFactory, adapters: &'a Adapters) -> Self {
        Self { loggers, adapters }
    }

    fn logger(&self, kind: ClientKind, name: &str) -> Arc<Logger> {
        self.loggers.get_logger(&format!("{kind}.{name}"))
    }

    fn instrumentation(&self, kind: ClientKind, config: &InstanceConfig) -> Instrumentation {
        Instrumentation::new(
            kind,
            &config.name,
            self.logger(kind, &config.name),
            config.instrumentation.clone(),
        )
    }

    async fn failing(&self, kind: ClientKind, name: &str, cause: ConstructionError) -> FailingClient {
        let logger = self.logger(kind, name);
        tracing::error!(kind = %kind, instance = %name, error = %cause, "Client construction failed");
        let failing = FailingClient::new(kind, name, cause, logger.clone());
        logger
            .error_with(
                Metadata::new()
                    .with("client", kind)
                    .with("instance", name)
                    .with(ERROR_KEY, failing.cause().to_string()),
                format!("{kind} client '{name}' could not be constructed; calls will fail"),
            )
            .await;
        failing
    }

    pub async fn http(&self, config: &InstanceConfig) -> HttpClient {
        match construct(self.adapters.http.as_ref(), ClientKind::Http, config) {
            Ok(adapter) => HttpClient::Instrumented(InstrumentedHttp::new(
                adapter,
                self.instrumentation(ClientKind::Http, config),
            )),
            Err(cause) => HttpClient::Failing(self.failing(ClientKind::Http, &config.name, cause).await),
        }
    }

    /// Build a broker client, connecting now unless the instance is lazy.
    ///
    /// A connect that fails or outlives `connect_timeout_ms` yields a
    /// failing client.
    pub async fn broker(&self, config: &InstanceConfig) -> BrokerClient {
        let adapter = match construct(self.adapters.broker.as_ref(), ClientKind::Broker, config) {
            Ok(adapter) => adapter,
            Err(cause) => {
                return BrokerClient::Failing(self.failing(ClientKind::Broker, &config.name, cause).await)
            }
        };
        let client = InstrumentedBroker::new(adapter, self.instrumentation(ClientKind::Broker, config));
        if !config.lazy_connect {
            if let Err(cause) = eager_connect(config, client.connect()).await {
                return BrokerClient::Failing(self.failing(ClientKind::Broker, &config.name, cause).await);
            }
        }
        BrokerClient::Instrumented(client)
    }

    /// Build a store client, connecting now unless the instance is lazy.
    pub async fn store(&self, config: &InstanceConfig) -> StoreClient {
        let adapter = match construct(self.adapters.store.as_ref(), ClientKind::Store, config) {
            Ok(adapter) => adapter,
            Err(cause) => {
                return StoreClient::Failing(self.failing(ClientKind::Store, &config.name, cause).await)
            }
        };
        let client = InstrumentedStore::new(adapter, self.instrumentation(ClientKind::Store, config));
        if !config.lazy_connect {
            if let Err(cause) = eager_connect(config, client.connect()).await {
                return StoreClient::Failing(self.failing(ClientKind::Store, &config.name, cause).await);
            }
        }
        StoreClient::Instrumented(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::error::{HttpError, StoreError};
    use crate::client::http::{HttpRequest, HttpResponse};
    use crate::client::store::{KvCommand, KvReply};
    use crate::logging::transport::MemoryTransport;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl HttpAdapter for Echo {
        async fn execute(&self, _request: HttpRequest) -> Result<HttpResponse, HttpError> {
            Ok(HttpResponse::new(204))
        }
    }

    struct Unreachable;

    #[async_trait]
    impl KeyValueAdapter for Unreachable {
        async fn connect(&self) -> Result<(), StoreError> {
            Err(StoreError::new("connection refused").with_code("ECONNREFUSED"))
        }

        async fn quit(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn execute(&self, _command: KvCommand) -> Result<KvReply, StoreError> {
            Ok(KvReply::Nil)
        }
    }

    struct Stalled;

    #[async_trait]
    impl KeyValueAdapter for Stalled {
        async fn connect(&self) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn quit(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn execute(&self, _command: KvCommand) -> Result<KvReply, StoreError> {
            Ok(KvReply::Ok)
        }
    }

    #[tokio::test]
    async fn test_factory_error_becomes_failing_client() {
        let memory = Arc::new(MemoryTransport::new());
        let loggers = LoggerFactory::for_tests(vec![memory.clone()]);
        let adapters = Adapters::new().with_http(|config: &InstanceConfig| {
            if config.options["base_url"].is_string() {
                Ok(Arc::new(Echo))
            } else {
                Err("base_url is required".into())
            }
        });
        let builder = ClientBuilder::new(&loggers, &adapters);

        let mut good = InstanceConfig::new("good");
        good.options = json!({ "base_url": "https://api.test" });
        assert!(!builder.http(&good).await.is_failing());

        let bad = builder.http(&InstanceConfig::new("bad")).await;
        assert!(bad.is_failing());
        assert_eq!(bad.instance(), "bad");
        assert_eq!(
            memory
                .find(|e| e.msg == "http client 'bad' could not be constructed; calls will fail")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_factory_and_panicking_factory() {
        let loggers = LoggerFactory::for_tests(Vec::new());
        let adapters = Adapters::new().with_http(|_: &InstanceConfig| -> Result<Arc<Echo>, BoxError> {
            panic!("factory bug")
        });
        let builder = ClientBuilder::new(&loggers, &adapters);

        match builder.store(&InstanceConfig::new("cache")).await {
            StoreClient::Failing(f) => {
                assert!(matches!(f.cause(), ConstructionError::MissingFactory { kind: "store" }))
            }
            other => panic!("expected failing client, got {other:?}"),
        }
        assert!(builder.http(&InstanceConfig::new("api")).await.is_failing());
    }

    #[tokio::test]
    async fn test_eager_connect_failure_becomes_failing_client() {
        let loggers = LoggerFactory::for_tests(Vec::new());
        let adapters = Adapters::new().with_store(|_: &InstanceConfig| Ok(Arc::new(Unreachable)));
        let builder = ClientBuilder::new(&loggers, &adapters);

        let eager = builder.store(&InstanceConfig::new("cache")).await;
        assert!(eager.is_failing());
        let err = eager.get("k").await.unwrap_err();
        assert!(err.to_string().contains("'cache'"));
        assert!(err.to_string().contains("connection refused"));

        let mut lazy_config = InstanceConfig::new("lazy");
        lazy_config.lazy_connect = true;
        let lazy = builder.store(&lazy_config).await;
        assert!(!lazy.is_failing());
        assert!(matches!(lazy.get("k").await.unwrap_err(), crate::ClientError::Store(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_connect_times_out_into_failing_client() {
        let memory = Arc::new(MemoryTransport::new());
        let loggers = LoggerFactory::for_tests(vec![memory.clone()]);
        let adapters = Adapters::new().with_store(|_: &InstanceConfig| Ok(Arc::new(Stalled)));
        let builder = ClientBuilder::new(&loggers, &adapters);

        let mut config = InstanceConfig::new("sessions");
        config.connect_timeout_ms = 250;

        let started = tokio::time::Instant::now();
        let client = builder.store(&config).await;
        assert!(started.elapsed() >= Duration::from_millis(250));

        match &client {
            StoreClient::Failing(f) => assert!(matches!(
                f.cause(),
                ConstructionError::ConnectTimedOut { timeout_ms: 250 }
            )),
            other => panic!("expected failing client, got {other:?}"),
        }
        let err = client.get("k").await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(
            memory
                .find(|e| e.msg == "store client 'sessions' could not be constructed; calls will fail")
                .len(),
            1
        );
    }
}
