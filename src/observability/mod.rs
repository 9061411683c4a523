//! Diagnostics for the framework itself.
//!
//! Log entries produced by [`crate::Logger`] go to transports. The crate's own
//! internal events (transport failures, config reloads, lifecycle changes) are
//! emitted through `tracing`, and this module installs a subscriber for them.
//!
//! # Design Decisions
//! - `RUST_LOG` wins over the caller's default filter
//! - JSON format for production, pretty format for development

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `tracing` subscriber.
///
/// `default_filter` is used when `RUST_LOG` is unset, e.g. `"relaylog=info"`.
pub fn init_tracing(default_filter: &str, json: bool) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    }
}
