//! Context propagation subsystem.
//!
//! # Data Flow
//! ```text
//! ContextManager::run(f)
//!     → snapshot of the active scope (empty when none is active)
//!     → child scope installed for the duration of f
//!     → caller's scope restored when f settles (ok, error, panic or drop)
//!
//! Readers (logger, instrumented clients):
//!     → get / get_all / get_correlation_id on the active scope
//! ```
//!
//! # Design Decisions
//! - Copy-on-branch: a child scope is a shallow copy of its parent at creation
//! - The scoped backend binds scopes to tokio tasks, never to OS threads
//! - The deterministic backend is a plain stack meant for tests; it does not
//!   support interleaved scopes
//! - Writes with no active scope are silently dropped

pub mod deterministic;
pub mod scoped;

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::config::schema::{ContextConfig, ContextMode};
use crate::context::deterministic::DeterministicStack;

/// Key/value store owned by one scope.
pub type ContextStore = serde_json::Map<String, Value>;

/// Handle to the context engine.
///
/// Cloning is cheap; clones observe the same scopes.
#[derive(Clone)]
pub struct ContextManager {
    backend: Backend,
    keys: Arc<ContextKeys>,
}

#[derive(Clone)]
enum Backend {
    Scoped,
    Deterministic(Arc<DeterministicStack>),
}

#[derive(Debug)]
struct ContextKeys {
    correlation_header: String,
    transaction_key: String,
}

impl ContextManager {
    /// Create a context manager using the backend selected by `config.mode`.
    pub fn new(config: &ContextConfig) -> Self {
        let backend = match config.mode {
            ContextMode::Scoped => Backend::Scoped,
            ContextMode::Deterministic => {
                Backend::Deterministic(Arc::new(DeterministicStack::default()))
            }
        };
        Self {
            backend,
            keys: Arc::new(ContextKeys {
                correlation_header: config.correlation_header.clone(),
                transaction_key: config.transaction_key.clone(),
            }),
        }
    }

    /// Create a context manager backed by the deterministic stack.
    pub fn deterministic(config: &ContextConfig) -> Self {
        Self::new(&ContextConfig {
            mode: ContextMode::Deterministic,
            ..config.clone()
        })
    }

    /// Which backend this manager uses.
    pub fn mode(&self) -> ContextMode {
        match self.backend {
            Backend::Scoped => ContextMode::Scoped,
            Backend::Deterministic(_) => ContextMode::Deterministic,
        }
    }

    /// Run `f` inside a new scope copied from the active one.
    pub async fn run<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.run_with(ContextStore::new(), f).await
    }

    /// Run `f` inside a new scope copied from the active one, then overlaid
    /// with `seed`.
    pub async fn run_with<F, Fut, T>(&self, seed: ContextStore, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut store = self.get_all();
        store.extend(seed);
        match &self.backend {
            Backend::Scoped => scoped::enter(store, f).await,
            Backend::Deterministic(stack) => stack.enter(store, f).await,
        }
    }

    /// Synchronous variant of [`ContextManager::run`].
    pub fn run_sync<T>(&self, f: impl FnOnce() -> T) -> T {
        let store = self.get_all();
        match &self.backend {
            Backend::Scoped => scoped::enter_sync(store, f),
            Backend::Deterministic(stack) => stack.enter_sync(store, f),
        }
    }

    /// Capture the active scope so `fut` observes it wherever it is polled,
    /// e.g. after `tokio::spawn`.
    pub fn bind<Fut>(&self, fut: Fut) -> impl Future<Output = Fut::Output>
    where
        Fut: Future,
    {
        let store = self.get_all();
        let this = self.clone();
        async move { this.run_with(store, move || fut).await }
    }

    /// True when a scope is active for the caller.
    pub fn is_active(&self) -> bool {
        self.with_active(|_| ()).is_some()
    }

    /// Write into the active scope. No-op without an active scope.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if self.with_active(|store| store.insert(key, value)).is_none() {
            tracing::trace!("Context write ignored: no active scope");
        }
    }

    /// Read from the active scope.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.with_active(|store| store.get(key).cloned()).flatten()
    }

    /// Snapshot copy of the active scope (empty when none is active).
    pub fn get_all(&self) -> ContextStore {
        self.with_active(|store| store.clone()).unwrap_or_default()
    }

    /// Header / context key under which the correlation id travels.
    pub fn correlation_header_name(&self) -> &str {
        &self.keys.correlation_header
    }

    /// Context key holding the transaction id.
    pub fn transaction_key_name(&self) -> &str {
        &self.keys.transaction_key
    }

    pub fn get_correlation_id(&self) -> Option<String> {
        self.get(&self.keys.correlation_header).map(value_to_id)
    }

    pub fn set_correlation_id(&self, id: impl Into<String>) {
        let id: String = id.into();
        self.set(self.keys.correlation_header.clone(), id);
    }

    pub fn get_transaction_id(&self) -> Option<String> {
        self.get(&self.keys.transaction_key).map(value_to_id)
    }

    pub fn set_transaction_id(&self, id: impl Into<String>) {
        let id: String = id.into();
        self.set(self.keys.transaction_key.clone(), id);
    }

    /// Generate a UUID v4 transaction id and store it in the active scope.
    pub fn new_transaction_id(&self) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.set_transaction_id(id.clone());
        id
    }

    fn with_active<R>(&self, f: impl FnOnce(&mut ContextStore) -> R) -> Option<R> {
        match &self.backend {
            Backend::Scoped => scoped::with_active(f),
            Backend::Deterministic(stack) => stack.with_top(f),
        }
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(&ContextConfig::default())
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("mode", &self.mode())
            .field("correlation_header", &self.keys.correlation_header)
            .field("transaction_key", &self.keys.transaction_key)
            .finish()
    }
}

fn value_to_id(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}
