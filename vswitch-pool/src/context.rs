//! A minimal stand-in for the Go `context.Context` the oracle call is
//! threaded through (spec.md §5: "`ctx` is propagated into the oracle and
//! into any call that supports it"). The workspace has no async runtime
//! (the teacher is fully synchronous, see `netns::with_namespace`), so
//! there is nothing to select on here beyond a cooperative cancel flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct Context {
    cancelled: Arc<AtomicBool>,
}

impl Context {
    pub fn background() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
