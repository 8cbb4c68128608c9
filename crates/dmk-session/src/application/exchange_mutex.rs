//! FIFO async mutex guarding one device connection.
//!
//! # Why not `tokio::sync::Mutex`? (for beginners)
//!
//! Tokio's mutex is fair too, but this lock needs two extra behaviours:
//!
//! - **Synchronous hand-off.**  Releasing passes ownership straight to the
//!   oldest waiter before any other task can run, so "L1 then L2 then L3"
//!   is observable and testable without relying on scheduler order.
//! - **`clear()`.**  When a session is torn down, queued waiters are dropped
//!   without being woken.  Their `lock()` futures never resolve; callers
//!   race them against the session's closed signal instead.
//!
//! # Mechanism
//!
//! The lock state is a flag plus a `VecDeque` of oneshot senders, one per
//! waiter, guarded by a short-lived `std::sync::Mutex` that is never held
//! across an `.await`.  Releasing pops senders from the front until one is
//! delivered; a waiter whose `lock()` future was dropped has a closed
//! receiver and is skipped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct LockState {
    locked: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// FIFO mutex whose guard releases on drop.
#[derive(Debug, Default)]
pub struct ExchangeMutex {
    state: Mutex<LockState>,
}

impl ExchangeMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock is free and takes it.
    ///
    /// Never fails.  After [`ExchangeMutex::clear`] a queued call stays
    /// pending forever, so callers that can be torn down should race this
    /// future against their own shutdown signal.
    pub async fn lock(self: &Arc<Self>) -> ExchangeGuard {
        let receiver = {
            let mut state = self.state();
            if !state.locked {
                state.locked = true;
                return ExchangeGuard::new(Arc::clone(self));
            }
            let (sender, receiver) = oneshot::channel();
            state.waiters.push_back(sender);
            receiver
        };

        let mut waiter = Waiter {
            receiver,
            mutex: Arc::clone(self),
            settled: false,
        };
        let outcome = (&mut waiter.receiver).await;
        waiter.settled = true;

        match outcome {
            Ok(()) => ExchangeGuard::new(Arc::clone(self)),
            // Dropped by `clear()`: nobody will ever hand us the lock.
            Err(_) => std::future::pending().await,
        }
    }

    /// Takes the lock if it is free, without queueing.
    pub fn try_lock(self: &Arc<Self>) -> Option<ExchangeGuard> {
        let mut state = self.state();
        if state.locked {
            return None;
        }
        state.locked = true;
        Some(ExchangeGuard::new(Arc::clone(self)))
    }

    /// Drops every queued waiter without waking it.
    ///
    /// The current holder keeps the lock until its guard is dropped.
    pub fn clear(&self) {
        self.state().waiters.clear();
    }

    pub fn is_locked(&self) -> bool {
        self.state().locked
    }

    /// Number of queued waiters, including ones whose future was dropped
    /// but which have not been skipped yet.
    pub fn waiter_count(&self) -> usize {
        self.state().waiters.len()
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands the lock to the oldest live waiter, or marks it free.
    fn release(&self) {
        let mut state = self.state();
        while let Some(sender) = state.waiters.pop_front() {
            if sender.send(()).is_ok() {
                return;
            }
        }
        state.locked = false;
    }
}

/// Ownership of an [`ExchangeMutex`]; releases it when dropped.
#[derive(Debug)]
pub struct ExchangeGuard {
    mutex: Arc<ExchangeMutex>,
}

impl ExchangeGuard {
    fn new(mutex: Arc<ExchangeMutex>) -> Self {
        Self { mutex }
    }

    /// Releases the lock now.  Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for ExchangeGuard {
    fn drop(&mut self) {
        self.mutex.release();
    }
}

/// A queued `lock()` call.
///
/// If the `lock()` future is dropped after the lock was handed to it but
/// before it was polled again, ownership is passed on here so the mutex is
/// not left locked with no holder.
struct Waiter {
    receiver: oneshot::Receiver<()>,
    mutex: Arc<ExchangeMutex>,
    settled: bool,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.receiver.close();
        if self.receiver.try_recv().is_ok() {
            self.mutex.release();
        }
    }
}
