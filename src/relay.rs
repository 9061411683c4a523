//! The framework entry point.
//!
//! # Data Flow
//! ```text
//! RelayConfig
//!     → RelayBuilder::build (validate, context, masking, serializers, loggers)
//!     → Relay::initialize (one client per configured instance)
//!     → get_logger / get_http / get_broker / get_store
//!     → Relay::shutdown (release clients within the timeout, flush transports)
//! ```
//!
//! # Design Decisions
//! - Only configuration errors abort; a client that cannot be built is
//!   installed as a failing client and reported through lifecycle events
//! - Reload never reshapes the registry: the stored configuration always
//!   lists exactly the instances that exist

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use futures_util::FutureExt;
use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::client::broker::BrokerClient;
use crate::client::http::HttpClient;
use crate::client::instrument::ClientKind;
use crate::client::store::StoreClient;
use crate::config::loader::ConfigError;
use crate::config::schema::{InstanceConfig, RelayConfig};
use crate::config::validation::validate_config;
use crate::config::watcher::{ConfigUpdate, ConfigWatcher};
use crate::context::ContextManager;
use crate::lifecycle::events::{LifecycleEvents, LifecycleState};
use crate::lifecycle::shutdown::{release_all, ReleaseTask, ShutdownReport, ShutdownSignal};
use crate::logging::factory::LoggerFactory;
use crate::logging::logger::Logger;
use crate::logging::metadata::Metadata;
use crate::logging::serializers::{SerializerRegistry, ERROR_KEY};
use crate::logging::transport::{ConsoleTransport, Transport};
use crate::registry::{Adapters, ClientBuilder, InstanceRegistry, RegistryError};
use crate::security::{MaskingEngine, MaskingError};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Masking(#[from] MaskingError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("relay is already initialized")]
    AlreadyInitialized,

    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    #[error("relay is shut down")]
    ShutDown,
}

/// Builder for [`Relay`].
pub struct RelayBuilder {
    config: RelayConfig,
    adapters: Adapters,
    transports: Vec<Arc<dyn Transport>>,
}

impl RelayBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            adapters: Adapters::default(),
            transports: Vec::new(),
        }
    }

    pub fn adapters(mut self, adapters: Adapters) -> Self {
        self.adapters = adapters;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Validate the configuration and assemble the logging pipeline.
    ///
    /// No client is built until [`Relay::initialize`].
    pub fn build(self) -> Result<Relay, RelayError> {
        let config = self.config;
        validate_config(&config).map_err(ConfigError::Validation)?;

        let context = ContextManager::new(&config.context);
        let masking = Arc::new(MaskingEngine::new(&config.masking)?);
        let serializers = Arc::new(SerializerRegistry::new(&config.serializers));

        let mut transports = self.transports;
        if config.console.enabled {
            transports.push(Arc::new(ConsoleTransport::new(
                config.console.stream,
                config.console.level,
            )));
        }
        if transports.is_empty() {
            tracing::warn!("No transports configured; log entries will be dropped");
        }

        let loggers = LoggerFactory::new(
            &config,
            context.clone(),
            masking.clone(),
            serializers.clone(),
            transports,
        );

        tracing::info!(
            service = %config.service_name,
            level = %config.level,
            transports = loggers.transports().len(),
            "Relay built"
        );

        Ok(Relay {
            config: ArcSwap::from_pointee(config),
            context,
            masking,
            serializers,
            loggers,
            adapters: self.adapters,
            clients: OnceLock::new(),
            initializing: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            events: LifecycleEvents::new(),
            shutdown: ShutdownSignal::new(),
        })
    }
}

struct Clients {
    http: InstanceRegistry<HttpClient>,
    brokers: InstanceRegistry<BrokerClient>,
    stores: InstanceRegistry<StoreClient>,
}

impl Clients {
    fn failing(&self) -> usize {
        let http = self.http.snapshot().iter().filter(|(_, c)| c.is_failing()).count();
        let brokers = self.brokers.snapshot().iter().filter(|(_, c)| c.is_failing()).count();
        let stores = self.stores.snapshot().iter().filter(|(_, c)| c.is_failing()).count();
        http + brokers + stores
    }

    fn len(&self) -> usize {
        self.http.len() + self.brokers.len() + self.stores.len()
    }
}

/// Logging, context and instrumented clients for one process.
pub struct Relay {
    config: ArcSwap<RelayConfig>,
    context: ContextManager,
    masking: Arc<MaskingEngine>,
    serializers: Arc<SerializerRegistry>,
    loggers: LoggerFactory,
    adapters: Adapters,
    clients: OnceLock<Clients>,
    initializing: AtomicBool,
    shut_down: AtomicBool,
    events: LifecycleEvents,
    shutdown: ShutdownSignal,
}

impl Relay {
    pub fn builder(config: RelayConfig) -> RelayBuilder {
        RelayBuilder::new(config)
    }

    /// Build and initialize in one step.
    ///
    /// Fails only on configuration errors; check [`Relay::state`] or
    /// [`Relay::wait_ready`] for how initialization went.
    pub async fn start(config: RelayConfig, adapters: Adapters) -> Result<Relay, RelayError> {
        let relay = RelayBuilder::new(config).adapters(adapters).build()?;
        relay.initialize().await?;
        Ok(relay)
    }

    /// Build every configured client.
    ///
    /// Instances that cannot be built become failing clients and the
    /// registry is installed either way. The lifecycle state is
    /// `Failed` when every configured instance failed, `Ready` otherwise.
    pub async fn initialize(&self) -> Result<(), RelayError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(RelayError::ShutDown);
        }
        if self.initializing.swap(true, Ordering::SeqCst) {
            return Err(RelayError::AlreadyInitialized);
        }

        let config = self.config.load_full();
        let builder = &ClientBuilder::new(&self.loggers, &self.adapters);

        let http = join_all(config.http.iter().map(|c| async move {
            (c.name.clone(), builder.http(c).await)
        }));
        let brokers = join_all(config.brokers.iter().map(|c| async move {
            (c.name.clone(), builder.broker(c).await)
        }));
        let stores = join_all(config.stores.iter().map(|c| async move {
            (c.name.clone(), builder.store(c).await)
        }));
        let (http, brokers, stores) = tokio::join!(http, brokers, stores);

        let clients = Clients {
            http: InstanceRegistry::new(ClientKind::Http, http),
            brokers: InstanceRegistry::new(ClientKind::Broker, brokers),
            stores: InstanceRegistry::new(ClientKind::Store, stores),
        };
        let total = clients.len();
        let failing = clients.failing();
        if self.clients.set(clients).is_err() {
            return Err(RelayError::AlreadyInitialized);
        }

        let root = self.loggers.root();
        if total > 0 && failing == total {
            let reason = format!("all {total} configured clients failed to build");
            root.error_with(Metadata::new().with("failing", failing), reason.clone())
                .await;
            self.events.set(LifecycleState::Failed(reason));
            return Ok(());
        }

        root.info_with(
            Metadata::new().with("clients", total).with("failing", failing),
            "relay initialized",
        )
        .await;
        self.events.set(LifecycleState::Ready { failing });
        Ok(())
    }

    pub fn config(&self) -> Arc<RelayConfig> {
        self.config.load_full()
    }

    /// Root logger.
    pub fn logger(&self) -> Arc<Logger> {
        self.loggers.root()
    }

    /// Named logger, bound to `source = name`.
    pub fn get_logger(&self, name: &str) -> Arc<Logger> {
        self.loggers.get_logger(name)
    }

    pub fn loggers(&self) -> &LoggerFactory {
        &self.loggers
    }

    pub fn context_manager(&self) -> &ContextManager {
        &self.context
    }

    pub fn masking(&self) -> &Arc<MaskingEngine> {
        &self.masking
    }

    pub fn serializers(&self) -> &Arc<SerializerRegistry> {
        &self.serializers
    }

    fn clients(&self) -> Result<&Clients, RegistryError> {
        self.clients.get().ok_or(RegistryError::NotInitialized)
    }

    pub fn get_http(&self, name: &str) -> Result<Arc<HttpClient>, RegistryError> {
        self.clients()?.http.get(name)
    }

    /// Reload may replace the client; look it up per use rather than
    /// keeping the handle.
    pub fn get_broker(&self, name: &str) -> Result<Arc<BrokerClient>, RegistryError> {
        self.clients()?.brokers.get(name)
    }

    pub fn get_store(&self, name: &str) -> Result<Arc<StoreClient>, RegistryError> {
        self.clients()?.stores.get(name)
    }

    /// Lifecycle state changes.
    pub fn events(&self) -> watch::Receiver<LifecycleState> {
        self.events.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        self.events.current()
    }

    /// Wait until initialization has settled.
    pub async fn wait_ready(&self) -> Result<(), RelayError> {
        match self.events.settled().await {
            LifecycleState::Ready { .. } => Ok(()),
            LifecycleState::Failed(reason) => Err(RelayError::InitializationFailed(reason)),
            LifecycleState::ShutDown | LifecycleState::Created => Err(RelayError::ShutDown),
        }
    }

    /// Notified once when shutdown starts.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Apply a new configuration to the running relay.
    ///
    /// Applied: root level, additional masking fields, and per-instance
    /// options (the instance is rebuilt in place, and a broker's
    /// subscriptions move to its replacement). Adding or removing
    /// instances, or changing service name, context keys or serializer
    /// timeout, needs a restart and is only reported. Nothing is applied
    /// when the new configuration is rejected.
    pub async fn reload(&self, new_config: RelayConfig) -> Result<(), RelayError> {
        validate_config(&new_config).map_err(ConfigError::Validation)?;
        let current = self.config.load_full();
        let clients = self.clients.get();

        let mut effective = new_config;
        let mut changed = Changed::default();
        // Registry lookups run before anything is applied.
        if let Some(clients) = clients {
            let (http, changed_http) = reconcile(ClientKind::Http, &current.http, &effective.http);
            let (brokers, changed_brokers) = reconcile(ClientKind::Broker, &current.brokers, &effective.brokers);
            let (stores, changed_stores) = reconcile(ClientKind::Store, &current.stores, &effective.stores);
            effective.http = http;
            effective.brokers = brokers;
            effective.stores = stores;
            changed = Changed {
                http: changed_http,
                brokers: changed_brokers,
                stores: changed_stores,
            };
            for config in &changed.http {
                clients.http.get(&config.name)?;
            }
            for config in &changed.brokers {
                clients.brokers.get(&config.name)?;
            }
            for config in &changed.stores {
                clients.stores.get(&config.name)?;
            }
        }

        let added = self.masking.add_fields(effective.masking.fields.iter().cloned())?;
        if added > 0 {
            tracing::info!(added, "Masking rules added");
        }
        self.loggers.set_level(effective.level);

        if effective.service_name != current.service_name
            || effective.context != current.context
            || effective.serializers != current.serializers
            || effective.masking.style != current.masking.style
            || effective.masking.max_depth != current.masking.max_depth
            || effective.masking.mask_char != current.masking.mask_char
        {
            tracing::warn!("Some configuration changes require a restart and were not applied");
        }
        if effective.masking.fields.len() < current.masking.fields.len() {
            tracing::warn!("Masking rules cannot be removed at runtime; existing rules kept");
        }

        if let Some(clients) = clients {
            let builder = ClientBuilder::new(&self.loggers, &self.adapters);

            for config in &changed.http {
                let client = builder.http(config).await;
                clients.http.reconfigure(&config.name, client)?;
            }
            for config in &changed.brokers {
                let client = builder.broker(config).await;
                let previous = clients.brokers.get(&config.name)?;
                self.move_subscriptions(&previous, &client).await;
                let previous = clients.brokers.reconfigure(&config.name, client)?;
                release_in_background(config.name.clone(), async move { previous.release().await });
            }
            for config in &changed.stores {
                let client = builder.store(config).await;
                let previous = clients.stores.reconfigure(&config.name, client)?;
                release_in_background(config.name.clone(), async move { previous.release().await });
            }
        }

        self.config.store(Arc::new(effective));
        self.loggers.root().info("configuration reloaded").await;
        Ok(())
    }

    async fn move_subscriptions(&self, from: &BrokerClient, to: &BrokerClient) {
        for (topic, handler) in from.subscriptions() {
            if let Err(e) = to.subscribe(&topic, handler).await {
                self.loggers
                    .root()
                    .warn_with(
                        Metadata::new()
                            .with("instance", from.instance())
                            .with("topic", &topic)
                            .with_error(ERROR_KEY, e),
                        "subscription could not be moved to the reconfigured broker",
                    )
                    .await;
            }
        }
    }

    /// Reload from `path` whenever it changes, until shutdown.
    ///
    /// Rejected files and watch errors are logged through the root logger
    /// and the running configuration stays. Drop the returned watcher to
    /// stop watching.
    pub fn watch_config(self: &Arc<Self>, path: &Path) -> Result<RecommendedWatcher, notify::Error> {
        let (watcher, mut updates) = ConfigWatcher::new(path).run()?;

        let relay = Arc::clone(self);
        let path = updates.path().to_path_buf();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = updates.next() => match update {
                        Some(update) => relay.apply_update(&path, update).await,
                        None => break,
                    },
                    _ = shutdown.recv() => {
                        tracing::info!("Config reload task received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        });

        Ok(watcher)
    }

    async fn apply_update(&self, path: &Path, update: ConfigUpdate) {
        let root = self.loggers.root();
        let metadata = Metadata::new().with("path", path.display().to_string());
        match update {
            ConfigUpdate::Loaded(config) => {
                if let Err(e) = self.reload(config).await {
                    root.error_with(metadata.with_error(ERROR_KEY, e), "configuration reload failed")
                        .await;
                }
            }
            ConfigUpdate::Invalid(e) => {
                root.error_with(
                    metadata.with_error(ERROR_KEY, e),
                    "configuration file rejected; current configuration kept",
                )
                .await;
            }
            ConfigUpdate::WatchFailed(reason) => {
                root.error_with(metadata.with("reason", reason), "configuration watch error")
                    .await;
            }
        }
    }

    /// Release every client within `shutdown_timeout_ms`, then flush
    /// transports. Always completes; stragglers are reported and logged.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }
        self.shutdown.trigger();

        let timeout = Duration::from_millis(self.config.load().shutdown_timeout_ms);
        let mut tasks: Vec<ReleaseTask> = Vec::new();
        if let Some(clients) = self.clients.get() {
            for (name, client) in clients.brokers.snapshot() {
                tasks.push((
                    format!("broker.{name}"),
                    async move { client.release().await }.boxed(),
                ));
            }
            for (name, client) in clients.stores.snapshot() {
                tasks.push((
                    format!("store.{name}"),
                    async move { client.release().await }.boxed(),
                ));
            }
        }

        let report = release_all(tasks, timeout).await;

        let root = self.loggers.root();
        for (name, reason) in &report.failed {
            root.warn_with(
                Metadata::new().with("instance", name).with("reason", reason),
                "client did not release cleanly",
            )
            .await;
        }
        if !report.completed_in_time() {
            root.warn_with(
                Metadata::new()
                    .with("timeout_ms", timeout.as_millis() as u64)
                    .with("pending", &report.timed_out),
                "shutdown timed out; some resources may not have been released cleanly",
            )
            .await;
        }
        root.info_with(
            Metadata::new().with("released", report.released.len()),
            "relay shut down",
        )
        .await;

        self.loggers.flush().await;
        self.events.set(LifecycleState::ShutDown);
        report
    }
}

#[derive(Default)]
struct Changed {
    http: Vec<InstanceConfig>,
    brokers: Vec<InstanceConfig>,
    stores: Vec<InstanceConfig>,
}

/// Merge `next` into the running instance list. Returns the list to store,
/// which keeps exactly the running names, and the instances whose
/// configuration changed. Added or removed names are reported and skipped.
fn reconcile(
    kind: ClientKind,
    current: &[InstanceConfig],
    next: &[InstanceConfig],
) -> (Vec<InstanceConfig>, Vec<InstanceConfig>) {
    for new in next {
        if !current.iter().any(|c| c.name == new.name) {
            tracing::warn!(kind = %kind, instance = %new.name, "New instance requires a restart");
        }
    }

    let mut effective = Vec::with_capacity(current.len());
    let mut changed = Vec::new();
    for old in current {
        match next.iter().find(|c| c.name == old.name) {
            Some(new) => {
                if new != old {
                    changed.push(new.clone());
                }
                effective.push(new.clone());
            }
            None => {
                tracing::warn!(kind = %kind, instance = %old.name, "Instance removal requires a restart");
                effective.push(old.clone());
            }
        }
    }
    (effective, changed)
}

fn release_in_background<F>(name: String, release: F)
where
    F: std::future::Future<Output = Result<(), crate::client::ClientError>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = release.await {
            tracing::warn!(instance = %name, error = %e, "Failed to release replaced client");
        }
    });
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("service", &self.config.load().service_name)
            .field("state", &self.state())
            .finish()
    }
}
