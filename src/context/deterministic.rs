//! In-memory scope stack for test environments.
//!
//! # Design Decisions
//! - One stack shared by every caller; `run` pushes, completion pops
//! - Popping truncates to the depth recorded at push time, so a scope is
//!   restored even if an inner frame was leaked
//! - Interleaved `run` calls on different tasks corrupt the stack; use the
//!   scoped backend when real concurrency matters

use std::future::Future;

use parking_lot::Mutex;

use crate::context::ContextStore;

#[derive(Debug, Default)]
pub struct DeterministicStack {
    frames: Mutex<Vec<ContextStore>>,
}

impl DeterministicStack {
    pub(crate) async fn enter<F, Fut, T>(&self, store: ContextStore, f: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _frame = self.push(store);
        f().await
    }

    pub(crate) fn enter_sync<T>(&self, store: ContextStore, f: impl FnOnce() -> T) -> T {
        let _frame = self.push(store);
        f()
    }

    pub(crate) fn with_top<R>(&self, f: impl FnOnce(&mut ContextStore) -> R) -> Option<R> {
        self.frames.lock().last_mut().map(f)
    }

    /// Number of active frames.
    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    fn push(&self, store: ContextStore) -> FrameGuard<'_> {
        let mut frames = self.frames.lock();
        let depth = frames.len();
        frames.push(store);
        FrameGuard { stack: self, depth }
    }
}

/// Pops a frame on drop.
struct FrameGuard<'a> {
    stack: &'a DeterministicStack,
    depth: usize,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.stack.frames.lock().truncate(self.depth);
    }
}
