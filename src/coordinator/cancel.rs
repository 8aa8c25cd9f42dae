//! Process-wide cooperative cancellation.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Inner {
    /// Fast path for `is_cancelled`.
    cancelled: AtomicBool,
    /// Set once, on the first `cancel`.
    cancelled_at: Mutex<Option<Instant>>,
    /// Signalled on cancel.
    changed: Condvar,
}

/// Shared cancellation flag that can also be waited on.
///
/// Clones observe the same flag. Cancelling is idempotent.
#[derive(Clone)]
pub struct CancellationToken {
    /// Shared by every clone.
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                cancelled_at: Mutex::new(None),
                changed: Condvar::new(),
            }),
        }
    }

    /// Raises the flag and wakes every waiter.
    pub fn cancel(&self) {
        let mut at = self.inner.cancelled_at.lock();
        if at.is_none() {
            *at = Some(Instant::now());
            self.inner.cancelled.store(true, Ordering::Release);
            tracing::debug!("Cancellation requested");
        }
        drop(at);
        self.inner.changed.notify_all();
    }

    /// True once `cancel` has been called.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// When `cancel` was first called.
    pub fn cancelled_at(&self) -> Option<Instant> {
        *self.inner.cancelled_at.lock()
    }

    /// Blocks until cancelled.
    pub fn wait(&self) {
        let mut at = self.inner.cancelled_at.lock();
        while at.is_none() {
            self.inner.changed.wait(&mut at);
        }
    }

    /// Blocks until cancelled or `timeout` elapses. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut at = self.inner.cancelled_at.lock();
        while at.is_none() {
            if self.inner.changed.wait_until(&mut at, deadline).timed_out() {
                break;
            }
        }
        at.is_some()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancels the token if the owning thread unwinds.
pub(crate) struct CancelOnPanic(pub(crate) CancellationToken);

impl Drop for CancelOnPanic {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.cancel();
        }
    }
}
