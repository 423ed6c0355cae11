//! Readiness event for port buffer queues
//!
//! A condition variable paired with the port's state mutex. Producers call
//! [`BufferEvent::notify`] after enqueuing; consumers block in
//! [`BufferEvent::wait_until`] with a timeout. Waits re-check their
//! predicate on every wakeup, so spurious wakeups are harmless. Both
//! `notify` and `interrupt` must be called while the paired mutex is held,
//! otherwise a wakeup can fall between a waiter's predicate check and its
//! sleep.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Condvar, MutexGuard, PoisonError,
    },
    time::Duration,
};

/// Why a wait returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The predicate became true
    Ready,
    /// The timeout expired first
    TimedOut,
    /// [`BufferEvent::interrupt`] was called while waiting
    Interrupted,
}

/// Condition-variable based readiness signal
#[derive(Debug, Default)]
pub struct BufferEvent {
    condvar: Condvar,
    /// Bumped by every interrupt; waiters compare against their snapshot
    epoch: AtomicU64,
    notify_count: AtomicU64,
    wait_count: AtomicU64,
    timeout_count: AtomicU64,
}

impl BufferEvent {
    /// Create a new event
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every waiter so it re-evaluates its predicate
    pub fn notify(&self) {
        self.notify_count.fetch_add(1, Ordering::Relaxed);
        self.condvar.notify_all();
    }

    /// Wake every waiter and make in-progress waits return
    /// [`WaitOutcome::Interrupted`]
    pub fn interrupt(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.condvar.notify_all();
    }

    /// Block until `ready` holds, the timeout expires or the event is
    /// interrupted
    pub fn wait_until<'a, T, F>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
        mut ready: F,
    ) -> (MutexGuard<'a, T>, WaitOutcome)
    where
        F: FnMut(&mut T) -> bool,
    {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        let start_epoch = self.epoch.load(Ordering::Acquire);

        let (mut guard, _) = self
            .condvar
            .wait_timeout_while(guard, timeout, |state| {
                !ready(state) && self.epoch.load(Ordering::Acquire) == start_epoch
            })
            .unwrap_or_else(PoisonError::into_inner);

        let outcome = if ready(&mut guard) {
            WaitOutcome::Ready
        } else if self.epoch.load(Ordering::Acquire) != start_epoch {
            WaitOutcome::Interrupted
        } else {
            self.timeout_count.fetch_add(1, Ordering::Relaxed);
            WaitOutcome::TimedOut
        };

        (guard, outcome)
    }

    /// Get notification statistics
    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            notify_count: self.notify_count.load(Ordering::Relaxed),
            wait_count: self.wait_count.load(Ordering::Relaxed),
            timeout_count: self.timeout_count.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for a readiness event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NotificationStats {
    /// Number of notifications sent
    pub notify_count: u64,
    /// Number of waits performed
    pub wait_count: u64,
    /// Number of waits that ended on their timeout
    pub timeout_count: u64,
}
