//! Per-session invalid-state flag.
//!
//! Set from the background thread when the sink can no longer be reached,
//! read from the controlling thread on the next lifecycle call. Never
//! cleared: a session that lost delivery stays invalid until it is stopped.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::WatchError;

/// Atomic invalid-state flag for one session.
#[derive(Debug, Default)]
pub struct InvalidGuard {
    invalid: AtomicBool,
}

impl InvalidGuard {
    /// Creates a guard in the valid state.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            invalid: AtomicBool::new(false),
        }
    }

    /// Marks the session invalid.
    ///
    /// Returns `true` only for the call that flipped the flag.
    #[inline]
    pub fn mark(&self) -> bool {
        !self.invalid.swap(true, Ordering::AcqRel)
    }

    /// Returns `true` once the session has been marked invalid.
    #[inline]
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.invalid.load(Ordering::Acquire)
    }

    /// Surfaces the flag as an error.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidState`] once the guard is set.
    #[inline]
    pub fn check(&self) -> Result<(), WatchError> {
        if self.is_set() {
            Err(WatchError::InvalidState)
        } else {
            Ok(())
        }
    }
}
