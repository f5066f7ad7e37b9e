//! Re-entrancy detection for ledger steps.
//!
//! The ledger serializes steps behind a fair lock, so callers on other
//! threads simply wait their turn. What the lock cannot catch is the thread
//! that already holds it calling back in, for example a malicious token's
//! transfer hook invoked from inside a step: it would deadlock. This guard
//! records which thread is running a step so that call can be rejected with
//! `ReentrantCall` before it touches the lock.
//!
//! A step calls [`ReentrancyGuard::ensure_not_reentrant`] before locking and
//! [`ReentrancyGuard::enter`] once it holds the lock. Dropping the returned
//! [`EntryToken`] clears the owner, on the error and panic paths too.

use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use yieldescrow_types::{EscrowError, Result};

#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    owner: Mutex<Option<ThreadId>>,
}

/// Proof that the current thread is running a step.
#[derive(Debug)]
#[must_use = "the guard is released as soon as the token is dropped"]
pub struct EntryToken<'a> {
    guard: &'a ReentrancyGuard,
}

impl ReentrancyGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `ReentrantCall` if the calling thread is inside a step.
    pub fn ensure_not_reentrant(&self) -> Result<()> {
        if *self.owner.lock() == Some(thread::current().id()) {
            return Err(EscrowError::ReentrantCall);
        }
        Ok(())
    }

    /// Mark the calling thread as running a step. Call with the step lock held.
    ///
    /// # Errors
    /// `ReentrantCall` if a step is already marked as running.
    pub fn enter(&self) -> Result<EntryToken<'_>> {
        let mut owner = self.owner.lock();
        if owner.is_some() {
            return Err(EscrowError::ReentrantCall);
        }
        *owner = Some(thread::current().id());
        Ok(EntryToken { guard: self })
    }

    #[must_use]
    pub fn is_entered(&self) -> bool {
        self.owner.lock().is_some()
    }
}

impl Drop for EntryToken<'_> {
    fn drop(&mut self) {
        *self.guard.owner.lock() = None;
    }
}
