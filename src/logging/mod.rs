//! Logging subsystem.
//!
//! # Data Flow
//! ```text
//! Logger::log
//!     → serializers.rs (per-field transforms, timeout-guarded)
//!     → security (sanitize, mask)
//!     → entry.rs (bindings + metadata + context snapshot)
//!     → transport.rs (console / memory / tracing sinks)
//! ```
//!
//! # Design Decisions
//! - Level check happens first; disabled calls cost nothing
//! - Children share engines and transports but own bindings and level
//! - Nothing in the pipeline can fail the caller's log call

pub mod entry;
pub mod factory;
pub mod level;
pub mod logger;
pub mod metadata;
pub mod serializers;
pub mod transport;

pub use entry::LogEntry;
pub use factory::LoggerFactory;
pub use level::Level;
pub use logger::Logger;
pub use metadata::{ErrorShape, FieldValue, Metadata};
pub use serializers::{Serializer, SerializerError, SerializerRegistry};
pub use transport::{ConsoleTransport, MemoryTransport, TracingTransport, Transport};
