//! Named client instances.
//!
//! # Responsibilities
//! - Build one client per configured instance name
//! - Downgrade construction failures to failing placeholders
//! - Serve lookups, distinguishing "never configured" from "failed to build"
//!
//! # Design Decisions
//! - The set of names is fixed at initialization
//! - Each entry sits behind its own `ArcSwap`, so reconfiguring one instance
//!   never blocks readers of the others

pub mod builder;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::client::ClientKind;

pub use builder::{AdapterFactory, Adapters, ClientBuilder};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no {kind} instance named '{name}' is configured")]
    NotFound { kind: ClientKind, name: String },

    #[error("clients are not initialized")]
    NotInitialized,
}

/// Fixed set of named clients of one kind.
pub struct InstanceRegistry<C> {
    kind: ClientKind,
    entries: HashMap<String, ArcSwap<C>>,
}

impl<C> InstanceRegistry<C> {
    pub fn new(kind: ClientKind, entries: impl IntoIterator<Item = (String, C)>) -> Self {
        Self {
            kind,
            entries: entries
                .into_iter()
                .map(|(name, client)| (name, ArcSwap::from_pointee(client)))
                .collect(),
        }
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn get(&self, name: &str) -> Result<Arc<C>, RegistryError> {
        self.entries
            .get(name)
            .map(|entry| entry.load_full())
            .ok_or_else(|| RegistryError::NotFound {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Configured names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace one instance, returning the previous client.
    pub fn reconfigure(&self, name: &str, client: C) -> Result<Arc<C>, RegistryError> {
        let entry = self.entries.get(name).ok_or_else(|| RegistryError::NotFound {
            kind: self.kind,
            name: name.to_string(),
        })?;
        Ok(entry.swap(Arc::new(client)))
    }

    /// Current clients with their names.
    pub fn snapshot(&self) -> Vec<(String, Arc<C>)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.load_full()))
            .collect()
    }
}

impl<C> std::fmt::Debug for InstanceRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("kind", &self.kind)
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_missing_is_not_found() {
        let registry = InstanceRegistry::new(ClientKind::Store, [("cache".to_string(), 1)]);
        assert_eq!(*registry.get("cache").unwrap(), 1);
        let err = registry.get("missing").unwrap_err();
        assert_eq!(
            err,
            RegistryError::NotFound {
                kind: ClientKind::Store,
                name: "missing".into()
            }
        );
        assert!(err.to_string().contains("'missing'"));
    }

    #[test]
    fn test_reconfigure_swaps_single_entry() {
        let registry = InstanceRegistry::new(
            ClientKind::Http,
            [("a".to_string(), 1), ("b".to_string(), 2)],
        );
        let held = registry.get("a").unwrap();

        let previous = registry.reconfigure("a", 10).unwrap();
        assert_eq!(*previous, 1);
        assert_eq!(*held, 1);
        assert_eq!(*registry.get("a").unwrap(), 10);
        assert_eq!(*registry.get("b").unwrap(), 2);
        assert!(registry.reconfigure("c", 3).is_err());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }
}
