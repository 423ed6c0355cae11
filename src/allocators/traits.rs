//! Allocator trait definition

use std::ptr::NonNull;

use crate::error::Result;

/// Opaque handle identifying one block handed out by an allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockHandle(pub u64);

/// A block of backing storage returned by [`BufferAllocator::allocate`]
///
/// Ports never read or write through `address`; it is carried along so the
/// owning component can reach the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Handle to pass back to [`BufferAllocator::free`]
    pub handle: BlockHandle,
    /// Start of the block
    pub address: NonNull<u8>,
    /// Usable size in bytes
    pub size: usize,
}

// The address is only an identity for the port; the allocator owns the memory.
unsafe impl Send for MemoryBlock {}
unsafe impl Sync for MemoryBlock {}

/// Trait for the external allocator that backs buffer storage
pub trait BufferAllocator: Send + Sync + std::fmt::Debug {
    /// Allocate a block of at least `size` bytes
    fn allocate(&self, size: usize) -> Result<MemoryBlock>;

    /// Return a block previously handed out by [`allocate`](Self::allocate)
    fn free(&self, handle: BlockHandle) -> Result<()>;

    /// Number of blocks currently handed out
    fn outstanding(&self) -> usize;

    /// Get allocator type name for debugging
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
