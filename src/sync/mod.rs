//! Synchronization primitives shared by ports
//!
//! Every port guards its registry and pending queue with one mutex and
//! signals queue readiness through a condition variable paired with it.

pub mod notify;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use notify::{BufferEvent, NotificationStats, WaitOutcome};

/// Lock a mutex, recovering the guard if another thread panicked while
/// holding it. Port operations never leave state half-updated across a
/// panic point, so the data behind a poisoned lock is still consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
