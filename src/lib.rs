//! Structured logging with correlation-id propagation.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller code
//!       │
//!       ├── Logger ──▶ serializers ──▶ sanitize + mask ──▶ transports
//!       │     ▲
//!       │     └──────────── context snapshot ◀──┐
//!       │                                       │
//!       └── HttpClient / BrokerClient / StoreClient
//!              │  correlation id read from ─────┘ ContextManager
//!              ▼
//!           caller-supplied adapters
//! ```
//!
//! [`Relay`] ties it together: it validates a [`RelayConfig`], builds the
//! logging pipeline, builds one instrumented client per configured instance,
//! and releases them all within a bounded time on shutdown.

pub mod client;
pub mod config;
pub mod context;
pub mod lifecycle;
pub mod logging;
pub mod observability;
pub mod registry;
pub mod relay;
pub mod security;

/// Boxed error used at adapter and serializer boundaries.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use client::{
    BrokerClient, ClientError, HttpClient, InstrumentOptions, StoreClient,
};
pub use config::{ConfigWatcher, RelayConfig};
pub use context::{ContextManager, ContextStore};
pub use lifecycle::{LifecycleState, ShutdownReport};
pub use logging::{Level, LogEntry, Logger, Metadata, Transport};
pub use registry::{Adapters, RegistryError};
pub use relay::{Relay, RelayBuilder, RelayError};
pub use security::{MaskingEngine, Sanitizer};
