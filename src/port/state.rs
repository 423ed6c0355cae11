//! State guarded by a port's lock

use std::{collections::VecDeque, sync::Arc};

use crate::{
    buffers::{AtomicPortStats, BufferFlags, BufferRef, BufferRegistry},
    error::{PortError, Result},
};

use super::{config::PortDefinition, tunnel::TunnelRole};

/// Allocation progress of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationState {
    /// No buffers registered
    Unallocated,
    /// Some, but fewer than the actual count
    Allocating,
    /// Exactly the actual count registered
    Populated,
}

#[derive(Debug)]
pub(super) struct PortState {
    pub(super) definition: PortDefinition,
    pub(super) enabled: bool,
    pub(super) store_metadata: bool,
    pub(super) tunnel: TunnelRole,
    pub(super) buffers: BufferRegistry,
    pub(super) queue: VecDeque<BufferRef>,
}

impl PortState {
    pub(super) fn new(definition: PortDefinition) -> Result<Self> {
        let hint = definition.capacity_hint.max(definition.buffer_count_actual);
        let buffers = BufferRegistry::with_capacity(hint)?;
        let mut queue = VecDeque::new();
        queue.try_reserve(hint)?;

        Ok(Self {
            definition,
            enabled: false,
            store_metadata: false,
            tunnel: TunnelRole::Untunneled,
            buffers,
            queue,
        })
    }

    pub(super) fn allocation_state(&self) -> AllocationState {
        match self.buffers.len() {
            0 => AllocationState::Unallocated,
            n if n >= self.definition.buffer_count_actual => AllocationState::Populated,
            _ => AllocationState::Allocating,
        }
    }

    pub(super) fn is_allocated(&self) -> bool {
        self.buffers.len() == self.definition.buffer_count_actual
    }

    pub(super) fn has_all_supplied_buffers(&self) -> bool {
        if !self.tunnel.is_tunneled() {
            return true;
        }
        self.is_allocated() && self.buffers.iter().all(|b| b.is_tunneled())
    }

    /// Membership by record identity, not just header: both ends of a
    /// tunnel hold records for the same header.
    pub(super) fn ensure_member(&self, buffer: &BufferRef) -> Result<()> {
        if self.buffers.contains(buffer) {
            Ok(())
        } else {
            Err(PortError::invalid_argument(
                "buffer",
                format!("{} is not registered on this port", buffer.header_id()),
            ))
        }
    }

    pub(super) fn allocate_next(&mut self, stats: &AtomicPortStats) -> Option<BufferRef> {
        let found = self.buffers.iter().find(|b| b.try_check_out()).cloned();
        stats.record_checkout(found.is_some());
        found
    }

    pub(super) fn release(&mut self, buffer: &BufferRef, stats: &AtomicPortStats) -> Result<()> {
        self.ensure_member(buffer)?;
        buffer.remove_flags(BufferFlags::IN_USE);
        stats.record_release();
        Ok(())
    }

    pub(super) fn release_all(&mut self) -> usize {
        let mut released = 0;
        for buffer in self.buffers.iter() {
            if buffer.is_in_use() {
                buffer.remove_flags(BufferFlags::IN_USE);
                released += 1;
            }
        }
        released
    }

    pub(super) fn push(&mut self, buffer: &BufferRef, stats: &AtomicPortStats) -> Result<usize> {
        self.ensure_member(buffer)?;
        if self.queue.iter().any(|queued| Arc::ptr_eq(queued, buffer)) {
            return Err(PortError::invalid_argument(
                "buffer",
                format!("{} is already queued", buffer.header_id()),
            ));
        }
        self.queue.try_reserve(1)?;
        self.queue.push_back(Arc::clone(buffer));
        stats.record_push(self.queue.len());
        Ok(self.queue.len())
    }

    pub(super) fn pop(&mut self, stats: &AtomicPortStats) -> Option<BufferRef> {
        let head = self.queue.pop_front();
        if head.is_some() {
            stats.record_pop();
        }
        head
    }

    /// Unregister the entry at `index`, dropping it from the queue too
    pub(super) fn unregister_at(&mut self, index: usize) -> Result<BufferRef> {
        let buffer = self.buffers.remove_at(index)?;
        self.queue.retain(|queued| !Arc::ptr_eq(queued, &buffer));
        Ok(buffer)
    }
}
