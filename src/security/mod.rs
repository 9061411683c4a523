//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Log metadata (already serialized to JSON):
//!     → sanitize.rs (strip escape sequences / control characters)
//!     → masking.rs (replace sensitive values)
//!     → Log entry
//! ```
//!
//! # Design Decisions
//! - Pure transforms: inputs are never mutated, a new tree is returned
//! - Masking rules only grow; nothing can weaken masking at runtime
//! - No trust in logged payloads

pub mod masking;
pub mod sanitize;

pub use masking::{MaskRule, MaskStyle, MaskingEngine, MaskingError};
pub use sanitize::Sanitizer;
