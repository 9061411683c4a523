//! Task-bound scopes built on `tokio::task_local!`.
//!
//! The scope value lives inside the future driving `run`, so it follows the
//! task across worker threads and is dropped when the future completes or is
//! cancelled.

use std::cell::RefCell;
use std::future::Future;

use crate::context::ContextStore;

tokio::task_local! {
    static ACTIVE_SCOPE: RefCell<ContextStore>;
}

pub(crate) async fn enter<F, Fut, T>(store: ContextStore, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    ACTIVE_SCOPE
        .scope(RefCell::new(store), async move { f().await })
        .await
}

pub(crate) fn enter_sync<T>(store: ContextStore, f: impl FnOnce() -> T) -> T {
    ACTIVE_SCOPE.sync_scope(RefCell::new(store), f)
}

pub(crate) fn with_active<R>(f: impl FnOnce(&mut ContextStore) -> R) -> Option<R> {
    ACTIVE_SCOPE
        .try_with(|scope| f(&mut scope.borrow_mut()))
        .ok()
}
