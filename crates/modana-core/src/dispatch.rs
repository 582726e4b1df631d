//! Process-wide dispatch lock.
//!
//! Event delivery, command invocation and channel delivery all run under one
//! re-entrant lock, so at most one dispatch is in flight at a time while a
//! handler may still publish, invoke or send from inside its own dispatch.

use std::any::Any;
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::config::defaults;

/// Re-entrant dispatch lock with a nesting limit.
#[derive(Debug)]
pub struct DispatchLock {
    depth: ReentrantMutex<Cell<usize>>,
    max_depth: usize,
}

/// Nesting limit reached; the dispatch was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("dispatch depth limit of {limit} reached")]
pub struct DepthExceeded {
    pub limit: usize,
}

impl DispatchLock {
    pub fn new(max_depth: usize) -> Self {
        Self {
            depth: ReentrantMutex::new(Cell::new(0)),
            max_depth: max_depth.max(1),
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Acquire the lock for one dispatch.
    ///
    /// Blocks while another thread is dispatching. Re-entry from the thread
    /// that already holds the lock succeeds until the nesting limit.
    pub fn enter(&self) -> Result<DispatchGuard<'_>, DepthExceeded> {
        let guard = self.depth.lock();
        let depth = guard.get();
        if depth >= self.max_depth {
            return Err(DepthExceeded {
                limit: self.max_depth,
            });
        }
        guard.set(depth + 1);
        Ok(DispatchGuard { guard })
    }
}

impl Default for DispatchLock {
    fn default() -> Self {
        Self::new(defaults::MAX_DISPATCH_DEPTH)
    }
}

/// Held for the duration of one dispatch.
pub struct DispatchGuard<'a> {
    guard: ReentrantMutexGuard<'a, Cell<usize>>,
}

impl DispatchGuard<'_> {
    /// Nesting level of this dispatch, starting at 1.
    pub fn depth(&self) -> usize {
        self.guard.get()
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        self.guard.set(self.guard.get().saturating_sub(1));
    }
}

/// Run a handler, converting both `Err` returns and panics into a message.
pub(crate) fn call_guarded<T>(f: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(format!("{err:#}")),
        Err(panic) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
