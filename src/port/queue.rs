//! Pending-buffer queue of a port
//!
//! The queue is the hand-off channel between the thread feeding a port and
//! the component's processing thread. It is strict FIFO. Every single
//! operation on [`Port`] takes the port lock for its own duration; the lock
//! is not re-entrant, so a caller holding a [`BufferQueueGuard`] must use
//! the guard's methods rather than the `Port` ones.

use std::{sync::MutexGuard, time::Duration};

use log::trace;

use crate::{buffers::BufferRef, error::Result, sync::WaitOutcome};

use super::{lifecycle::Port, state::PortState};

/// Exclusive access to a port's queue and registry
///
/// Dropping the guard (or calling [`unlock`](Self::unlock)) releases the
/// lock, so it is released on every exit path including `?`.
pub struct BufferQueueGuard<'a> {
    port: &'a Port,
    state: MutexGuard<'a, PortState>,
}

impl<'a> BufferQueueGuard<'a> {
    /// Append a registered buffer and signal waiters
    pub fn push(&mut self, buffer: &BufferRef) -> Result<()> {
        let depth = self.state.push(buffer, &self.port.stats)?;
        trace!("port {} queued {} (depth {})", self.port.name, buffer.header_id(), depth);
        self.port.event.notify();
        Ok(())
    }

    /// Head of the queue, left in place
    pub fn get(&self) -> Option<BufferRef> {
        self.state.queue.front().cloned()
    }

    /// Entry at `index`, left in place
    pub fn get_at(&self, index: usize) -> Option<BufferRef> {
        self.state.queue.get(index).cloned()
    }

    /// Remove and return the head
    pub fn pop(&mut self) -> Option<BufferRef> {
        let head = self.state.pop(&self.port.stats);
        if let Some(buffer) = &head {
            trace!("port {} dequeued {}", self.port.name, buffer.header_id());
        }
        head
    }

    /// Queue depth
    pub fn count(&self) -> usize {
        self.state.queue.len()
    }

    /// Empty the queue without touching buffer flags; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.state.queue.len();
        self.state.queue.clear();
        dropped
    }

    /// Same as [`Port::allocate_next_buffer`] under the held lock
    pub fn allocate_next(&mut self) -> Option<BufferRef> {
        self.state.allocate_next(&self.port.stats)
    }

    /// Same as [`Port::release_buffer`] under the held lock
    pub fn release(&mut self, buffer: &BufferRef) -> Result<()> {
        self.state.release(buffer, &self.port.stats)
    }

    /// Drain the queue into a vector, head first
    pub fn drain(&mut self) -> Vec<BufferRef> {
        let drained: Vec<_> = self.state.queue.drain(..).collect();
        for _ in &drained {
            self.port.stats.record_pop();
        }
        drained
    }

    /// Release the lock
    pub fn unlock(self) {}
}

impl Port {
    /// Take the port lock for a compound sequence of queue operations
    pub fn lock_buffers(&self) -> BufferQueueGuard<'_> {
        BufferQueueGuard {
            port: self,
            state: self.state(),
        }
    }

    /// Append a registered buffer to the queue and signal waiters
    ///
    /// Fails with an invalid-argument error if the buffer is not registered
    /// on this port or is already queued.
    pub fn push_buffer(&self, buffer: &BufferRef) -> Result<()> {
        self.lock_buffers().push(buffer)
    }

    /// Head of the queue, left in place
    pub fn get_buffer(&self) -> Option<BufferRef> {
        self.lock_buffers().get()
    }

    /// Entry at `index`, left in place
    pub fn get_buffer_at(&self, index: usize) -> Option<BufferRef> {
        self.lock_buffers().get_at(index)
    }

    /// Remove and return the head
    pub fn pop_buffer(&self) -> Option<BufferRef> {
        self.lock_buffers().pop()
    }

    pub fn buffer_queue_count(&self) -> usize {
        self.lock_buffers().count()
    }

    /// Empty the queue; registry flags are left alone
    pub fn buffer_queue_clear(&self) -> usize {
        self.lock_buffers().clear()
    }

    /// Block until the queue is non-empty and return its head, left in place
    ///
    /// Returns `None` when `timeout` expires or waiters are interrupted
    /// (by [`interrupt_waiters`](Self::interrupt_waiters), `disable` or
    /// `teardown`).
    pub fn wait_for_buffer(&self, timeout: Duration) -> Option<BufferRef> {
        let (state, outcome) =
            self.event
                .wait_until(self.state(), timeout, |state| !state.queue.is_empty());
        match outcome {
            WaitOutcome::Ready => state.queue.front().cloned(),
            WaitOutcome::TimedOut | WaitOutcome::Interrupted => None,
        }
    }

    /// Make every blocked [`wait_for_buffer`](Self::wait_for_buffer) return
    pub fn interrupt_waiters(&self) {
        let _state = self.state();
        self.event.interrupt();
    }
}
