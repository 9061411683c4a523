//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (relay.rs):
//!     Validate config → Build logging → Build clients → Ready
//!
//! Shutdown (shutdown.rs):
//!     Signal background tasks → Release clients (bounded) → Flush transports
//!
//! Events (events.rs):
//!     Created → Ready | Failed → ShutDown
//! ```
//!
//! # Design Decisions
//! - A client that fails to build never aborts startup
//! - Shutdown has a timeout: stragglers are reported, not awaited
//! - Shutdown timeout is a warning, not an error

pub mod events;
pub mod shutdown;

pub use events::{LifecycleEvents, LifecycleState};
pub use shutdown::{release_all, ReleaseTask, ShutdownReport, ShutdownSignal};
