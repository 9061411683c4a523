//! Logger construction and lookup.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;
use serde_json::Map;

use crate::config::schema::RelayConfig;
use crate::context::ContextManager;
use crate::logging::level::Level;
use crate::logging::logger::{Logger, Pipeline};
use crate::logging::serializers::SerializerRegistry;
use crate::logging::transport::Transport;
use crate::security::{MaskingEngine, Sanitizer};

/// Builds the root logger and caches named loggers.
pub struct LoggerFactory {
    pipeline: Arc<Pipeline>,
    root: Arc<Logger>,
    named: DashMap<String, Arc<Logger>>,
}

impl LoggerFactory {
    pub fn new(
        config: &RelayConfig,
        context: ContextManager,
        masking: Arc<MaskingEngine>,
        serializers: Arc<SerializerRegistry>,
        transports: Vec<Arc<dyn Transport>>,
    ) -> Self {
        let pipeline = Arc::new(Pipeline {
            service: config.service_name.clone(),
            context,
            serializers,
            sanitizer: Sanitizer::with_masking(masking),
            transports,
        });
        let root = Arc::new(Logger::new(pipeline.clone(), config.level, Map::new()));
        Self {
            pipeline,
            root,
            named: DashMap::new(),
        }
    }

    pub fn root(&self) -> Arc<Logger> {
        self.root.clone()
    }

    /// Logger bound to `source = name`, created once per name.
    pub fn get_logger(&self, name: &str) -> Arc<Logger> {
        self.named
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(self.root.with_source(name)))
            .clone()
    }

    /// Set the level of the root logger and every named logger.
    pub fn set_level(&self, level: Level) {
        self.root.set_level(level);
        for logger in self.named.iter() {
            logger.value().set_level(level);
        }
    }

    pub fn transports(&self) -> &[Arc<dyn Transport>] {
        &self.pipeline.transports
    }

    /// Flush every transport, reporting failures through `tracing`.
    pub async fn flush(&self) {
        let results = join_all(self.pipeline.transports.iter().map(|t| async move {
            (t.name().to_string(), t.flush().await)
        }))
        .await;
        for (name, result) in results {
            if let Err(e) = result {
                tracing::warn!(transport = %name, error = %e, "Transport flush failed");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(transports: Vec<Arc<dyn Transport>>) -> Self {
        let config = RelayConfig {
            level: Level::Trace,
            ..RelayConfig::default()
        };
        let masking = MaskingEngine::new(&config.masking).unwrap_or_default();
        Self::new(
            &config,
            ContextManager::new(&config.context),
            Arc::new(masking),
            Arc::new(SerializerRegistry::new(&config.serializers)),
            transports,
        )
    }
}

impl std::fmt::Debug for LoggerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggerFactory")
            .field("service", &self.pipeline.service)
            .field("named", &self.named.len())
            .field("transports", &self.pipeline.transports.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::transport::MemoryTransport;
    use serde_json::json;

    #[tokio::test]
    async fn test_named_loggers_cached() {
        let factory = LoggerFactory::for_tests(Vec::new());
        let a = factory.get_logger("orders");
        let b = factory.get_logger("orders");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.bindings()["source"], json!("orders"));
    }

    #[tokio::test]
    async fn test_set_level_reaches_named_loggers() {
        let memory = Arc::new(MemoryTransport::new());
        let factory = LoggerFactory::for_tests(vec![memory.clone()]);
        let named = factory.get_logger("jobs");
        factory.set_level(Level::Error);
        named.warn("dropped").await;
        factory.root().warn("dropped").await;
        assert!(memory.is_empty());
    }

    #[tokio::test]
    async fn test_masking_example_scenario() {
        let memory = Arc::new(MemoryTransport::new());
        let factory = LoggerFactory::for_tests(vec![memory.clone()]);
        factory
            .root()
            .info_with(
                crate::logging::Metadata::from(json!({ "user": { "password": "abc123" } })),
                "login",
            )
            .await;
        let line = &memory.lines()[0];
        assert!(line.contains(r#""user":{"password":"******"}"#), "{line}");
        assert!(!line.contains("abc123"));
    }
}
