use std::{
    sync::{Arc, Condvar, Mutex, PoisonError},
    time::{Duration, Instant},
};

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation signal plus an optional deadline, threaded through every blocking poll.
///
/// Clones share the same cancellation signal: cancelling any of them wakes up every thread
/// currently blocked in [`Context::wait`]. Deadlines are per-clone, see [`Context::with_timeout`].
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancelled: Arc<(Mutex<bool>, Condvar)>,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a child context sharing the cancellation signal whose deadline is the earliest of
    /// the current one and `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, deadline) {
            (Some(current), Some(new)) => Some(current.min(new)),
            (current, new) => current.or(new),
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Sets the cancellation signal. Every thread waiting on this context (or any of its clones)
    /// is notified so it unblocks and returns [`ContextError::Cancelled`].
    pub fn cancel(&self) {
        let (lck, cvar) = &*self.cancelled;
        let mut cancelled = lck.lock().unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (lck, _) = &*self.cancelled;
        *lck.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the reason this context is done, if any. Cancellation wins over the deadline.
    pub fn err(&self) -> Option<ContextError> {
        if self.is_cancelled() {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Blocks for `interval` unless the context is cancelled or its deadline comes first.
    ///
    /// Returns `Ok(())` when the full interval elapsed, [`ContextError::Cancelled`] as soon as the
    /// context is cancelled and [`ContextError::DeadlineExceeded`] once the deadline is reached.
    pub fn wait(&self, interval: Duration) -> Result<(), ContextError> {
        if let Some(err) = self.err() {
            return Err(err);
        }

        let now = Instant::now();
        let (timeout, reaches_deadline) = match (self.deadline, now.checked_add(interval)) {
            (Some(deadline), Some(wake_up)) if deadline <= wake_up => {
                (deadline.saturating_duration_since(now), true)
            }
            (Some(deadline), None) => (deadline.saturating_duration_since(now), true),
            _ => (interval, false),
        };

        let (lck, cvar) = &*self.cancelled;
        let guard = lck.lock().unwrap_or_else(PoisonError::into_inner);
        let (cancelled, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);

        if *cancelled {
            return Err(ContextError::Cancelled);
        }
        if reaches_deadline {
            return Err(ContextError::DeadlineExceeded);
        }
        Ok(())
    }
}
