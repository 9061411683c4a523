//! Lifecycle state, observable through a `watch` channel.
//!
//! # States
//! ```text
//! Created → Ready { failing }   (initialization finished)
//! Created → Failed(reason)      (initialization refused)
//! any     → ShutDown
//! ```

use std::fmt;

use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    /// Initialized; `failing` instances were replaced by failing clients.
    Ready { failing: usize },
    Failed(String),
    ShutDown,
}

impl LifecycleState {
    pub fn is_ready(&self) -> bool {
        matches!(self, LifecycleState::Ready { .. })
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, LifecycleState::Created)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Created => f.write_str("created"),
            LifecycleState::Ready { failing } => write!(f, "ready ({failing} failing)"),
            LifecycleState::Failed(reason) => write!(f, "failed: {reason}"),
            LifecycleState::ShutDown => f.write_str("shut down"),
        }
    }
}

/// Publisher side of the lifecycle state.
#[derive(Debug)]
pub struct LifecycleEvents {
    tx: watch::Sender<LifecycleState>,
}

impl LifecycleEvents {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Created);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> LifecycleState {
        self.tx.borrow().clone()
    }

    pub(crate) fn set(&self, state: LifecycleState) {
        tracing::debug!(state = %state, "Lifecycle state changed");
        self.tx.send_replace(state);
    }

    /// Wait until initialization settles, returning the settled state.
    pub async fn settled(&self) -> LifecycleState {
        let mut rx = self.subscribe();
        let settled = match rx.wait_for(LifecycleState::is_settled).await {
            Ok(state) => state.clone(),
            Err(_) => self.current(),
        };
        settled
    }
}

impl Default for LifecycleEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_settled_waits_for_ready() {
        let events = Arc::new(LifecycleEvents::new());
        assert_eq!(events.current(), LifecycleState::Created);

        let waiter = {
            let events = events.clone();
            tokio::spawn(async move { events.settled().await })
        };
        tokio::task::yield_now().await;
        events.set(LifecycleState::Ready { failing: 1 });

        assert_eq!(waiter.await.unwrap(), LifecycleState::Ready { failing: 1 });
    }

    #[tokio::test]
    async fn test_settled_returns_immediately_once_set() {
        let events = LifecycleEvents::new();
        events.set(LifecycleState::Failed("bad".into()));
        assert_eq!(events.settled().await, LifecycleState::Failed("bad".into()));
        assert_eq!(events.current().to_string(), "failed: bad");
    }
}
