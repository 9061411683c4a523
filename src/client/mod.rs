//! Instrumented network clients.
//!
//! # Data Flow
//! ```text
//! caller
//!     → HttpClient / BrokerClient / StoreClient
//!         → instrument.rs (correlation id, timing, start/success/failure logs)
//!         → caller-supplied adapter (HttpAdapter, BrokerAdapter, KeyValueAdapter)
//!     ← result, or the adapter's error unchanged
//! ```
//!
//! # Design Decisions
//! - One instrumentation core shared by all three client kinds
//! - Adapters are trait objects; the framework never looks past the trait
//! - Instances that failed to build are `Failing` variants of the same enum

pub mod broker;
pub mod error;
pub mod failing;
pub mod http;
pub mod instrument;
pub mod store;

pub use broker::{
    handler, Acknowledger, BrokerAdapter, BrokerClient, BrokerMessage, Delivery, MessageHandler,
    Subscription,
};
pub use error::{BrokerError, ClientError, ConstructionError, HttpError, StoreError};
pub use failing::FailingClient;
pub use http::{HttpAdapter, HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use instrument::{CallPhase, ClientKind, InstrumentOptions};
pub use store::{KeyValueAdapter, KvCommand, KvReply, StoreClient};
