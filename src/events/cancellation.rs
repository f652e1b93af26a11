//! §5 Cancellation: a shared, idempotent, thread-safe cancellation token.
//!
//! Built on `tokio_util::sync::CancellationToken` (the teacher's own choice
//! for cooperative cancellation, see `transport::loader`), wrapped so that
//! `reset()` — which the inner token doesn't support, by design, since a
//! tripped token can never un-trip — swaps in a fresh inner token instead.

use crate::error::{EngineError, ExecutionError};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio_util::sync::CancellationToken as InnerToken;

#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<RwLock<InnerToken>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(InnerToken::new())),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.read().is_cancelled()
    }

    pub fn cancel(&self) {
        self.inner.read().cancel();
    }

    /// Replaces the inner token with a fresh, un-tripped one.
    pub fn reset(&self) {
        *self.inner.write() = InnerToken::new();
    }

    pub fn throw_if_cancelled(&self, _context: &str) -> Result<(), EngineError> {
        if self.is_cancelled() {
            return Err(ExecutionError::Cancelled.into());
        }
        Ok(())
    }
}

/// A guard that checks cancellation on construction (and, explicitly, on
/// `check()`). Never panics or throws from `Drop` — §5 forbids cancellation
/// surfacing from a destructor.
pub struct CancellationGuard {
    token: CancellationToken,
}

impl CancellationGuard {
    pub fn new(token: CancellationToken) -> Result<Self, EngineError> {
        token.throw_if_cancelled("guard construction")?;
        Ok(Self { token })
    }

    pub fn check(&self) -> Result<(), EngineError> {
        self.token.throw_if_cancelled("guard check")
    }
}
