//! Port lifecycle, registration and checkout

use std::{
    ptr::NonNull,
    sync::{Arc, Mutex, MutexGuard},
};

use log::debug;

use crate::{
    allocators::BufferAllocator,
    buffers::{
        Allocation, AtomicPortStats, Buffer, BufferFlags, BufferHeader, BufferRef, HeaderId,
        PortStats,
    },
    error::{PortError, Result},
    sync::{lock, BufferEvent, NotificationStats},
};

use super::{
    config::{Direction, PortDefinition},
    state::{AllocationState, PortState},
    tunnel::{PeerEndpoint, SupplierRole, TunnelRole},
};

/// Who is registering a buffer on a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    /// `allocate_buffer` / `use_buffer` on an untunneled port
    Client,
    /// Non-supplier receiving a header from the tunnel
    Accepted,
    /// Supplier keeping the allocation behind a shared header
    Supplied,
}

/// A directional data interface of a processing stage
///
/// All registry and queue state sits behind one mutex. Every method takes
/// it for its own duration; compound sequences go through
/// [`lock_buffers`](Port::lock_buffers). A new port is disabled,
/// untunneled and has no buffers.
#[derive(Debug)]
pub struct Port {
    pub(super) name: String,
    pub(super) state: Mutex<PortState>,
    pub(super) event: BufferEvent,
    pub(super) stats: AtomicPortStats,
}

impl Port {
    /// Create a port from a definition
    pub fn new(definition: PortDefinition) -> Result<Self> {
        let name = definition.direction.name();
        Self::with_name(name, definition)
    }

    /// Create a named port; the name only appears in logs and errors
    pub fn with_name(name: impl Into<String>, definition: PortDefinition) -> Result<Self> {
        definition.validate()?;
        let name = name.into();
        debug!(
            "port {} created: {} buffers (min {}) of {} bytes",
            name, definition.buffer_count_actual, definition.buffer_count_min, definition.buffer_size
        );

        Ok(Self {
            name,
            state: Mutex::new(PortState::new(definition)?),
            event: BufferEvent::new(),
            stats: AtomicPortStats::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn state(&self) -> MutexGuard<'_, PortState> {
        lock(&self.state)
    }

    /// Current definition
    pub fn definition(&self) -> PortDefinition {
        self.state().definition.clone()
    }

    pub fn direction(&self) -> Direction {
        self.state().definition.direction
    }

    /// Renegotiate the number of buffers required to populate the port
    ///
    /// Only allowed while no buffers are registered.
    pub fn set_buffer_count_actual(&self, count: usize) -> Result<()> {
        let mut state = self.state();
        if count < state.definition.buffer_count_min {
            return Err(PortError::invalid_argument(
                "buffer_count_actual",
                format!(
                    "{} is below the minimum {}",
                    count, state.definition.buffer_count_min
                ),
            ));
        }
        if !state.buffers.is_empty() {
            return Err(PortError::state(format!(
                "port {} has {} buffers registered",
                self.name,
                state.buffers.len()
            )));
        }

        state.buffers.reserve(count)?;
        state.definition.buffer_count_actual = count;
        debug!("port {} actual buffer count set to {}", self.name, count);
        Ok(())
    }

    /// Snapshot of the traffic counters
    pub fn stats(&self) -> PortStats {
        self.stats.snapshot()
    }

    /// Readiness event counters
    pub fn notification_stats(&self) -> NotificationStats {
        self.event.stats()
    }

    pub fn enable(&self) {
        self.state().enabled = true;
    }

    /// Disable the port and wake anything blocked waiting on its queue
    pub fn disable(&self) {
        let mut state = self.state();
        state.enabled = false;
        self.event.interrupt();
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    pub fn set_store_metadata(&self, store: bool) {
        self.state().store_metadata = store;
    }

    /// Whether buffers carry metadata references instead of payload
    pub fn stores_metadata(&self) -> bool {
        self.state().store_metadata
    }

    pub fn allocation_state(&self) -> AllocationState {
        self.state().allocation_state()
    }

    /// True iff exactly the actual buffer count is registered
    pub fn is_allocated(&self) -> bool {
        self.state().is_allocated()
    }

    /// True once registration has reached the actual buffer count
    pub fn is_populated(&self) -> bool {
        self.allocation_state() == AllocationState::Populated
    }

    /// True iff the owning component may start processing on this port
    pub fn is_ready(&self) -> bool {
        let state = self.state();
        if !state.enabled || !state.is_allocated() {
            return false;
        }
        !state.tunnel.is_non_supplier() || state.has_all_supplied_buffers()
    }

    /// True if any buffer is registered
    pub fn has_buffers(&self) -> bool {
        !self.state().buffers.is_empty()
    }

    pub fn is_supplier(&self) -> bool {
        self.state().tunnel.is_supplier()
    }

    pub fn is_tunneled(&self) -> bool {
        self.state().tunnel.is_tunneled()
    }

    /// Current tunnel role
    pub fn tunnel(&self) -> TunnelRole {
        self.state().tunnel.clone()
    }

    /// True iff every buffer exchanged over the tunnel has been delivered
    ///
    /// Always true for untunneled ports.
    pub fn has_all_supplied_buffers(&self) -> bool {
        self.state().has_all_supplied_buffers()
    }

    /// For a supplier, true iff every registered buffer is back in its
    /// queue. Always true for other ports.
    pub fn has_all_buffers_returned(&self) -> bool {
        let state = self.state();
        !state.tunnel.is_supplier() || state.queue.len() >= state.buffers.len()
    }

    /// Record the tunnel peer and this port's role
    ///
    /// Buffers are not allocated here. Fails with a state error if buffers
    /// are registered; disable and depopulate the port first.
    pub fn setup_tunnel(&self, peer: PeerEndpoint, role: SupplierRole) -> Result<()> {
        let mut state = self.state();
        if !state.buffers.is_empty() {
            return Err(PortError::state(format!(
                "port {} cannot be re-tunneled while it has buffers",
                self.name
            )));
        }
        debug!("port {} tunneled to {} as {:?}", self.name, peer, role);
        state.tunnel = TunnelRole::tunneled(peer, role);
        Ok(())
    }

    /// Revert to untunneled; same precondition as [`setup_tunnel`](Self::setup_tunnel)
    pub fn clear_tunnel(&self) -> Result<()> {
        let mut state = self.state();
        if !state.buffers.is_empty() {
            return Err(PortError::state(format!(
                "port {} cannot be untunneled while it has buffers",
                self.name
            )));
        }
        state.tunnel = TunnelRole::Untunneled;
        Ok(())
    }

    /// Registered record for a header, if any
    pub fn find_buffer(&self, header: HeaderId) -> Option<BufferRef> {
        self.state().buffers.find(header).cloned()
    }

    /// True if this exact record is registered on the port
    pub fn owns(&self, buffer: &BufferRef) -> bool {
        self.state().buffers.contains(buffer)
    }

    /// Check out the first registered buffer that is not in use
    ///
    /// `None` means every buffer is checked out; that is backpressure, not
    /// an error.
    pub fn allocate_next_buffer(&self) -> Option<BufferRef> {
        self.state().allocate_next(&self.stats)
    }

    /// Return a checked-out buffer to the port
    pub fn release_buffer(&self, buffer: &BufferRef) -> Result<()> {
        self.state().release(buffer, &self.stats)
    }

    /// Clear IN_USE on every registered buffer; returns how many were set
    ///
    /// Does not wait for threads still using those buffers. Quiesce them
    /// first.
    pub fn release_all_allocated(&self) -> usize {
        self.state().release_all()
    }

    /// Number of buffers currently checked out
    pub fn checked_out_count(&self) -> usize {
        self.state().buffers.iter().filter(|b| b.is_in_use()).count()
    }

    /// Number of registered buffers
    pub fn buffer_count(&self) -> usize {
        self.state().buffers.len()
    }

    /// Registered buffer at `index`, in registration order
    pub fn allocated_buffer_at(&self, index: usize) -> Result<BufferRef> {
        self.state().buffers.at(index).cloned()
    }

    /// Set or clear the mark on a registered buffer
    pub fn mark_buffer(&self, buffer: &BufferRef, marked: bool) -> Result<()> {
        let state = self.state();
        state.ensure_member(buffer)?;
        if marked {
            buffer.insert_flags(BufferFlags::MARKED);
        } else {
            buffer.remove_flags(BufferFlags::MARKED);
        }
        Ok(())
    }

    /// Allocate storage from `allocator` and register it as port-owned
    pub fn allocate_buffer(
        &self,
        allocator: &Arc<dyn BufferAllocator>,
        size: usize,
    ) -> Result<BufferRef> {
        self.check_registration(&self.state(), Registration::Client, size)?;
        let allocation = Allocation::new(Arc::clone(allocator), size)?;
        self.register(Buffer::allocated(allocation), size, Registration::Client)
    }

    /// Register client-owned storage
    ///
    /// The port keeps the address only; the client must keep the storage
    /// alive until the buffer is freed.
    pub fn use_buffer(&self, address: NonNull<u8>, size: usize) -> Result<BufferRef> {
        self.check_registration(&self.state(), Registration::Client, size)?;
        self.register(Buffer::client(address, size), size, Registration::Client)
    }

    /// Unregister a buffer by header
    ///
    /// The buffer is removed from the queue as well. Port-owned storage goes
    /// back to its allocator once the last handle to the record is dropped.
    /// Buffers of a tunneled port belong to both ends and are only freed by
    /// [`tunnel::depopulate`](super::tunnel::depopulate); freeing one here is
    /// a state error.
    pub fn free_buffer(&self, header: HeaderId) -> Result<()> {
        let mut state = self.state();
        if state.tunnel.is_tunneled() {
            return Err(PortError::state(format!(
                "port {} is tunneled; depopulate the tunnel to free {}",
                self.name, header
            )));
        }
        self.unregister(&mut state, header)
    }

    /// Drop every buffer and clear the queue; returns how many were unregistered
    ///
    /// Waiters are interrupted. Like
    /// [`release_all_allocated`](Self::release_all_allocated) this does not
    /// wait for threads still holding buffers. A tunneled port that still
    /// has buffers must be depopulated first.
    pub fn teardown(&self) -> Result<usize> {
        let mut state = self.state();
        if state.tunnel.is_tunneled() && !state.buffers.is_empty() {
            return Err(PortError::state(format!(
                "port {} is tunneled; depopulate the tunnel before teardown",
                self.name
            )));
        }
        let count = state.buffers.len();
        state.queue.clear();
        state.buffers.clear();
        state.enabled = false;
        self.event.interrupt();
        self.stats.record_unregistration(count);
        debug!("port {} torn down, {} buffers released", self.name, count);
        Ok(count)
    }

    /// Tunnel side of [`free_buffer`](Self::free_buffer), used while
    /// depopulating or rolling back population
    pub(super) fn unregister_tunneled(&self, header: HeaderId) -> Result<()> {
        let mut state = self.state();
        self.unregister(&mut state, header)
    }

    /// Non-supplier side of tunnel population: register a header over
    /// storage the supplier allocated
    pub(super) fn accept_tunneled_buffer(
        &self,
        address: NonNull<u8>,
        size: usize,
    ) -> Result<Arc<BufferHeader>> {
        self.check_registration(&self.state(), Registration::Accepted, size)?;
        let buffer = Buffer::client(address, size);
        buffer.insert_flags(BufferFlags::TUNNELED);
        let buffer = self.register(buffer, size, Registration::Accepted)?;
        Ok(Arc::clone(buffer.header()))
    }

    /// Supplier side of tunnel population: keep the allocation under the
    /// header the peer created
    pub(super) fn register_supplied(
        &self,
        header: Arc<BufferHeader>,
        allocation: Allocation,
    ) -> Result<BufferRef> {
        let size = allocation.block().size;
        self.check_registration(&self.state(), Registration::Supplied, size)?;
        let buffer = Buffer::shared(
            header,
            BufferFlags::OWNED_BY_PORT | BufferFlags::TUNNELED,
            Some(allocation),
        );
        self.register(buffer, size, Registration::Supplied)
    }

    fn unregister(&self, state: &mut PortState, header: HeaderId) -> Result<()> {
        let index = state.buffers.position_of(header).ok_or_else(|| {
            PortError::invalid_argument("header", format!("{} is not registered on {}", header, self.name))
        })?;
        if state.buffers.at(index)?.is_in_use() {
            return Err(PortError::state(format!(
                "{} is checked out and cannot be freed",
                header
            )));
        }
        state.unregister_at(index)?;
        self.stats.record_unregistration(1);
        debug!(
            "port {} freed {} ({} of {} left)",
            self.name,
            header,
            state.buffers.len(),
            state.definition.buffer_count_actual
        );
        Ok(())
    }

    /// Tunnel role and capacity rules for one registration
    fn check_registration(&self, state: &PortState, kind: Registration, size: usize) -> Result<()> {
        match kind {
            Registration::Client if state.tunnel.is_tunneled() => {
                return Err(PortError::state(format!(
                    "port {} is tunneled; its buffers come from the tunnel",
                    self.name
                )));
            }
            Registration::Accepted if !state.tunnel.is_non_supplier() => {
                return Err(PortError::state(format!(
                    "port {} is not a tunnel non-supplier",
                    self.name
                )));
            }
            Registration::Supplied if !state.tunnel.is_supplier() => {
                return Err(PortError::state(format!(
                    "port {} is not a tunnel supplier",
                    self.name
                )));
            }
            _ => {}
        }

        if size < state.definition.buffer_size {
            return Err(PortError::invalid_argument(
                "size",
                format!(
                    "{} bytes is below the port buffer size {}",
                    size, state.definition.buffer_size
                ),
            ));
        }
        if state.buffers.len() >= state.definition.buffer_count_actual {
            return Err(PortError::state(format!(
                "port already holds its {} buffers",
                state.definition.buffer_count_actual
            )));
        }
        Ok(())
    }

    fn register(&self, buffer: Buffer, size: usize, kind: Registration) -> Result<BufferRef> {
        let buffer = Arc::new(buffer);
        let mut state = self.state();
        // Role and capacity may have changed since the caller's check.
        self.check_registration(&state, kind, size)?;
        state.buffers.push_back(Arc::clone(&buffer))?;
        self.stats.record_registration();

        debug!(
            "port {} registered {} ({} bytes{}), {}/{}",
            self.name,
            buffer.header_id(),
            size,
            if kind == Registration::Client { "" } else { ", tunneled" },
            state.buffers.len(),
            state.definition.buffer_count_actual
        );
        Ok(buffer)
    }
}
