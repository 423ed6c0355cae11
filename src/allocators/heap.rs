//! Heap allocator - one global-allocator block per buffer

use std::{
    alloc::{self, Layout},
    collections::HashMap,
    ptr::NonNull,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use super::traits::{BlockHandle, BufferAllocator, MemoryBlock};
use crate::{
    error::{PortError, Result},
    sync::lock,
};

/// Default alignment for heap blocks, one cache line
pub const DEFAULT_HEAP_ALIGNMENT: usize = 64;

/// Allocator that serves every request from the process heap
///
/// Blocks still outstanding when the allocator is dropped are released
/// with it.
#[derive(Debug)]
pub struct HeapAllocator {
    alignment: usize,
    next_handle: AtomicU64,
    blocks: Mutex<HashMap<BlockHandle, (NonNull<u8>, Layout)>>,
}

impl HeapAllocator {
    /// Create a heap allocator with cache-line alignment
    pub fn new() -> Self {
        Self {
            alignment: DEFAULT_HEAP_ALIGNMENT,
            next_handle: AtomicU64::new(1),
            blocks: Mutex::new(HashMap::new()),
        }
    }

    /// Create a heap allocator with a custom alignment
    pub fn with_alignment(alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(PortError::invalid_argument(
                "alignment",
                "Alignment must be a power of two",
            ));
        }
        Ok(Self {
            alignment,
            next_handle: AtomicU64::new(1),
            blocks: Mutex::new(HashMap::new()),
        })
    }

    /// Alignment applied to every block
    pub fn alignment(&self) -> usize {
        self.alignment
    }
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferAllocator for HeapAllocator {
    fn allocate(&self, size: usize) -> Result<MemoryBlock> {
        if size == 0 {
            return Err(PortError::invalid_argument("size", "Block size cannot be zero"));
        }

        let layout = Layout::from_size_align(size, self.alignment)
            .map_err(|e| PortError::invalid_argument("size", e.to_string()))?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let address = NonNull::new(raw)
            .ok_or_else(|| PortError::resource(format!("heap allocation of {} bytes failed", size)))?;

        let handle = BlockHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        lock(&self.blocks).insert(handle, (address, layout));

        Ok(MemoryBlock {
            handle,
            address,
            size,
        })
    }

    fn free(&self, handle: BlockHandle) -> Result<()> {
        let (address, layout) = lock(&self.blocks).remove(&handle).ok_or_else(|| {
            PortError::invalid_argument("handle", format!("unknown block handle {}", handle.0))
        })?;

        // SAFETY: the pair was produced by `alloc_zeroed` above and removed from
        // the table, so it is freed exactly once.
        unsafe { alloc::dealloc(address.as_ptr(), layout) };
        Ok(())
    }

    fn outstanding(&self) -> usize {
        lock(&self.blocks).len()
    }
}

impl Drop for HeapAllocator {
    fn drop(&mut self) {
        let blocks = self
            .blocks
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for (_, (address, layout)) in blocks.drain() {
            unsafe { alloc::dealloc(address.as_ptr(), layout) };
        }
    }
}

unsafe impl Send for HeapAllocator {}
unsafe impl Sync for HeapAllocator {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_free() {
        let allocator = HeapAllocator::new();
        let block = allocator.allocate(4096).unwrap();
        assert_eq!(block.size, 4096);
        assert_eq!(block.address.as_ptr() as usize % DEFAULT_HEAP_ALIGNMENT, 0);
        assert_eq!(allocator.outstanding(), 1);

        allocator.free(block.handle).unwrap();
        assert_eq!(allocator.outstanding(), 0);
    }

    #[test]
    fn test_double_free_rejected() {
        let allocator = HeapAllocator::new();
        let block = allocator.allocate(128).unwrap();
        allocator.free(block.handle).unwrap();
        assert!(allocator.free(block.handle).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_zero_size_and_bad_alignment() {
        let allocator = HeapAllocator::new();
        assert!(allocator.allocate(0).is_err());
        assert!(HeapAllocator::with_alignment(48).is_err());
        assert_eq!(HeapAllocator::with_alignment(256).unwrap().alignment(), 256);
    }

    #[test]
    fn test_distinct_addresses() {
        let allocator = HeapAllocator::new();
        let a = allocator.allocate(64).unwrap();
        let b = allocator.allocate(64).unwrap();
        assert_ne!(a.address, b.address);
        assert_ne!(a.handle, b.handle);
    }
}
