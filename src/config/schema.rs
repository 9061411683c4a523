//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the framework.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::instrument::InstrumentOptions;
use crate::logging::level::Level;
use crate::logging::transport::ConsoleStream;
use crate::security::masking::{MaskRule, MaskStyle};

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Service name stamped on every entry.
    pub service_name: String,

    /// Minimum level of the root logger.
    pub level: Level,

    /// Budget for releasing every client on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,

    /// Serializer settings.
    pub serializers: SerializerConfig,

    /// Masking settings.
    pub masking: MaskingConfig,

    /// Context propagation settings.
    pub context: ContextConfig,

    /// Built-in console transport.
    pub console: ConsoleConfig,

    /// Named HTTP client instances.
    pub http: Vec<InstanceConfig>,

    /// Named message broker instances.
    pub brokers: Vec<InstanceConfig>,

    /// Named key-value store instances.
    pub stores: Vec<InstanceConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            service_name: "app".to_string(),
            level: Level::Info,
            shutdown_timeout_ms: 5000,
            serializers: SerializerConfig::default(),
            masking: MaskingConfig::default(),
            context: ContextConfig::default(),
            console: ConsoleConfig::default(),
            http: Vec::new(),
            brokers: Vec::new(),
            stores: Vec::new(),
        }
    }
}

/// Serializer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Per-field timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self { timeout_ms: 50 }
    }
}

/// Masking configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct MaskingConfig {
    /// Field names or `{ pattern = "..." }` matchers.
    pub fields: Vec<MaskRule>,

    /// Mask rendering.
    pub style: MaskStyle,

    /// Deepest container level that is still walked.
    pub max_depth: usize,

    /// Character used to build masks.
    pub mask_char: char,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            fields: ["password", "secret", "token", "authorization", "cookie", "api_key"]
                .into_iter()
                .map(MaskRule::from)
                .collect(),
            style: MaskStyle::Fixed,
            max_depth: 3,
            mask_char: '*',
        }
    }
}

/// Which context backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// Task-bound scopes (tokio task-locals).
    #[default]
    Scoped,
    /// Single in-memory stack for tests.
    Deterministic,
}

/// Context propagation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Header (and context key) carrying the correlation id.
    pub correlation_header: String,

    /// Context key carrying the transaction id.
    pub transaction_key: String,

    /// Backend selection.
    pub mode: ContextMode,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            correlation_header: "x-correlation-id".to_string(),
            transaction_key: "transaction_id".to_string(),
            mode: ContextMode::Scoped,
        }
    }
}

/// Console transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Install the console transport.
    pub enabled: bool,

    /// Minimum level written to the console.
    pub level: Option<Level>,

    /// Output stream.
    pub stream: ConsoleStream,
}

/// One named client instance.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InstanceConfig {
    /// Unique instance name within its kind.
    pub name: String,

    /// Instrumentation behaviour.
    #[serde(default)]
    pub instrumentation: InstrumentOptions,

    /// Defer connecting until first use (brokers and stores).
    #[serde(default)]
    pub lazy_connect: bool,

    /// Budget for the eager connect at initialization, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Opaque options handed to the adapter factory.
    #[serde(default)]
    pub options: Value,
}

impl InstanceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instrumentation: InstrumentOptions::default(),
            lazy_connect: false,
            connect_timeout_ms: default_connect_timeout_ms(),
            options: Value::Null,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}
