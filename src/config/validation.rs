//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, depth >= 1)
//! - Detect duplicate instance names
//! - Check that every masking pattern compiles
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use regex::Regex;
use thiserror::Error;

use crate::config::schema::{InstanceConfig, RelayConfig};
use crate::security::masking::MaskRule;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("service_name must not be empty")]
    EmptyServiceName,

    #[error("{field} must be greater than zero")]
    ZeroValue { field: &'static str },

    #[error("{field} must not be empty")]
    EmptyKey { field: &'static str },

    #[error("masking pattern '{pattern}' is invalid: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("{kind} instance at index {index} has an empty name")]
    EmptyInstanceName { kind: &'static str, index: usize },

    #[error("duplicate {kind} instance '{name}'")]
    DuplicateInstance { kind: &'static str, name: String },
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service_name.trim().is_empty() {
        errors.push(ValidationError::EmptyServiceName);
    }
    if config.shutdown_timeout_ms == 0 {
        errors.push(ValidationError::ZeroValue { field: "shutdown_timeout_ms" });
    }
    if config.serializers.timeout_ms == 0 {
        errors.push(ValidationError::ZeroValue { field: "serializers.timeout_ms" });
    }
    if config.masking.max_depth == 0 {
        errors.push(ValidationError::ZeroValue { field: "masking.max_depth" });
    }
    if config.context.correlation_header.trim().is_empty() {
        errors.push(ValidationError::EmptyKey { field: "context.correlation_header" });
    }
    if config.context.transaction_key.trim().is_empty() {
        errors.push(ValidationError::EmptyKey { field: "context.transaction_key" });
    }

    for rule in &config.masking.fields {
        match rule {
            MaskRule::Field(name) if name.is_empty() => {
                errors.push(ValidationError::EmptyKey { field: "masking.fields" });
            }
            MaskRule::Pattern { pattern } => {
                if let Err(e) = Regex::new(pattern) {
                    errors.push(ValidationError::InvalidPattern {
                        pattern: pattern.clone(),
                        reason: e.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    check_instances("http", &config.http, &mut errors);
    check_instances("broker", &config.brokers, &mut errors);
    check_instances("store", &config.stores, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_instances(kind: &'static str, instances: &[InstanceConfig], errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for (index, instance) in instances.iter().enumerate() {
        if instance.connect_timeout_ms == 0 {
            errors.push(ValidationError::ZeroValue { field: "connect_timeout_ms" });
        }
        if instance.name.trim().is_empty() {
            errors.push(ValidationError::EmptyInstanceName { kind, index });
            continue;
        }
        if !seen.insert(instance.name.as_str()) {
            errors.push(ValidationError::DuplicateInstance {
                kind,
                name: instance.name.clone(),
            });
        }
    }
}
