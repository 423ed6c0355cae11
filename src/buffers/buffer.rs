//! Buffer records tracked by a port

use std::{
    fmt,
    ptr::NonNull,
    slice,
    sync::{
        atomic::{AtomicU32, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use bitflags::bitflags;
use log::warn;

use crate::{
    allocators::{BufferAllocator, MemoryBlock},
    error::{PortError, Result},
    sync::lock,
};

bitflags! {
    /// Bookkeeping flags a port keeps per registered buffer
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Hash)]
    pub struct BufferFlags: u32 {
        /// Checked out to a processing thread
        const IN_USE = 0x1;
        /// Storage was allocated by this port and is freed with it
        const OWNED_BY_PORT = 0x2;
        /// Header is shared with the peer port of a tunnel
        const TUNNELED = 0x4;
        /// Carries a mark to be propagated downstream
        const MARKED = 0x8;
    }
}

/// Shared handle to a registered buffer
pub type BufferRef = Arc<Buffer>;

/// Identity of a buffer header, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HeaderId(u64);

impl HeaderId {
    /// Raw numeric value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    fn next() -> Self {
        static NEXT_HEADER: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_HEADER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for HeaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hdr#{}", self.0)
    }
}

/// Content-adjacent header fields, written by whichever thread holds the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferPayload {
    /// Bytes of valid data starting at `offset`
    pub filled_len: usize,
    /// Start of valid data
    pub offset: usize,
    /// Presentation timestamp in microseconds
    pub timestamp: i64,
    /// Opaque per-buffer flags (end of stream, sync frame, ...)
    pub flags: u32,
}

/// Buffer header shared by both ends of a tunnel
#[derive(Debug)]
pub struct BufferHeader {
    id: HeaderId,
    address: NonNull<u8>,
    alloc_size: usize,
    payload: Mutex<BufferPayload>,
}

impl BufferHeader {
    fn new(address: NonNull<u8>, alloc_size: usize) -> Arc<Self> {
        Arc::new(Self {
            id: HeaderId::next(),
            address,
            alloc_size,
            payload: Mutex::new(BufferPayload::default()),
        })
    }

    /// Header identity
    pub fn id(&self) -> HeaderId {
        self.id
    }
}

/// Storage taken from an allocator, returned to it on drop
pub struct Allocation {
    block: MemoryBlock,
    allocator: Arc<dyn BufferAllocator>,
}

impl Allocation {
    /// Allocate `size` bytes from `allocator`
    pub fn new(allocator: Arc<dyn BufferAllocator>, size: usize) -> Result<Self> {
        let block = allocator.allocate(size)?;
        if block.size < size {
            let granted = block.size;
            if let Err(e) = allocator.free(block.handle) {
                warn!(
                    "failed to return undersized block {:?} to {}: {}",
                    block.handle,
                    allocator.type_name(),
                    e
                );
            }
            return Err(PortError::resource(format!(
                "allocator granted {} bytes for a {} byte request",
                granted, size
            )));
        }
        Ok(Self { block, allocator })
    }

    /// The underlying block
    pub fn block(&self) -> &MemoryBlock {
        &self.block
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("block", &self.block)
            .field("allocator", &self.allocator.type_name())
            .finish()
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        if let Err(e) = self.allocator.free(self.block.handle) {
            warn!(
                "failed to return block {:?} to {}: {}",
                self.block.handle,
                self.allocator.type_name(),
                e
            );
        }
    }
}

/// One fixed-capacity I/O slot as seen by a single port
///
/// The flags belong to the port that registered the record. The header and
/// the storage may be shared with a tunnel peer.
#[derive(Debug)]
pub struct Buffer {
    header: Arc<BufferHeader>,
    flags: AtomicU32,
    allocation: Option<Allocation>,
}

impl Buffer {
    /// Record for storage allocated by the port itself
    pub fn allocated(allocation: Allocation) -> Self {
        let header = BufferHeader::new(allocation.block.address, allocation.block.size);
        Self {
            header,
            flags: AtomicU32::new(BufferFlags::OWNED_BY_PORT.bits()),
            allocation: Some(allocation),
        }
    }

    /// Record for storage owned by the client
    pub fn client(address: NonNull<u8>, size: usize) -> Self {
        Self {
            header: BufferHeader::new(address, size),
            flags: AtomicU32::new(BufferFlags::empty().bits()),
            allocation: None,
        }
    }

    /// Record over a header created on the other end of a tunnel
    pub(crate) fn shared(
        header: Arc<BufferHeader>,
        flags: BufferFlags,
        allocation: Option<Allocation>,
    ) -> Self {
        Self {
            header,
            flags: AtomicU32::new(flags.bits()),
            allocation,
        }
    }

    /// Header identity
    pub fn header_id(&self) -> HeaderId {
        self.header.id
    }

    /// Shared header
    pub fn header(&self) -> &Arc<BufferHeader> {
        &self.header
    }

    /// Start of the backing storage
    pub fn address(&self) -> NonNull<u8> {
        self.header.address
    }

    /// Allocated capacity in bytes
    pub fn capacity(&self) -> usize {
        self.header.alloc_size
    }

    /// Current flags
    pub fn flags(&self) -> BufferFlags {
        BufferFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_in_use(&self) -> bool {
        self.flags().contains(BufferFlags::IN_USE)
    }

    pub fn is_owned_by_port(&self) -> bool {
        self.flags().contains(BufferFlags::OWNED_BY_PORT)
    }

    pub fn is_tunneled(&self) -> bool {
        self.flags().contains(BufferFlags::TUNNELED)
    }

    pub fn is_marked(&self) -> bool {
        self.flags().contains(BufferFlags::MARKED)
    }

    /// The allocation backing this record, if the port owns the storage
    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    /// Snapshot of the header fields
    pub fn payload(&self) -> BufferPayload {
        *lock(&self.header.payload)
    }

    /// Replace the header fields
    pub fn set_payload(&self, payload: BufferPayload) -> Result<()> {
        if payload.offset.saturating_add(payload.filled_len) > self.capacity() {
            return Err(PortError::invalid_argument(
                "payload",
                format!(
                    "offset {} + filled {} exceeds capacity {}",
                    payload.offset,
                    payload.filled_len,
                    self.capacity()
                ),
            ));
        }
        *lock(&self.header.payload) = payload;
        Ok(())
    }

    /// View the backing storage
    ///
    /// # Safety
    /// The caller must hold this buffer checked out, and the storage must
    /// still be alive (the allocator has not reclaimed it).
    pub unsafe fn as_slice(&self) -> &[u8] {
        slice::from_raw_parts(self.header.address.as_ptr(), self.header.alloc_size)
    }

    /// Mutable view of the backing storage
    ///
    /// # Safety
    /// Same as [`as_slice`](Self::as_slice), and no other view of the
    /// storage may exist for the lifetime of the returned slice.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        slice::from_raw_parts_mut(self.header.address.as_ptr(), self.header.alloc_size)
    }

    pub(crate) fn insert_flags(&self, flags: BufferFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn remove_flags(&self, flags: BufferFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// Set IN_USE if it was clear; returns whether this call set it
    pub(crate) fn try_check_out(&self) -> bool {
        let previous = self.flags.fetch_or(BufferFlags::IN_USE.bits(), Ordering::AcqRel);
        previous & BufferFlags::IN_USE.bits() == 0
    }
}

// The header address is a handle into allocator-owned memory; every access
// to the bytes goes through the unsafe accessors above.
unsafe impl Send for BufferHeader {}
unsafe impl Sync for BufferHeader {}
