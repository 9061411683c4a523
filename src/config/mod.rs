//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → Relay::builder
//!
//! On file change:
//!     watcher.rs detects and debounces the change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Relay::reload applies level, masking and per-instance options
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Reload never shrinks the masking rule set or reshapes the registry

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ConsoleConfig, ContextConfig, ContextMode, InstanceConfig, MaskingConfig, RelayConfig,
    SerializerConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::{ConfigUpdate, ConfigUpdates, ConfigWatcher};
