//! Pool allocator implementation - fixed-size block allocation

use std::{
    alloc::{self, Layout},
    ptr::NonNull,
    sync::Mutex,
};

use super::traits::{BlockHandle, BufferAllocator, MemoryBlock};
use crate::{
    error::{PortError, Result},
    sync::lock,
};

/// Pool allocator for fixed-size blocks
///
/// Carves one contiguous region into `block_count` blocks of `block_size`
/// bytes. The handle of a block is its index in the region, so a pool can
/// never hand out more buffers than it was sized for; exhaustion is
/// reported as a resource error.
#[derive(Debug)]
pub struct PoolAllocator {
    /// Base pointer to the region
    base_ptr: NonNull<u8>,
    /// Layout of the whole region
    layout: Layout,
    /// Size of each block, aligned up
    block_size: usize,
    /// Total number of blocks
    total_blocks: usize,
    /// Indices of free blocks, popped from the back
    free_list: Mutex<Vec<usize>>,
}

impl PoolAllocator {
    /// Create a pool of `block_count` blocks of at least `block_size` bytes each
    pub fn new(block_size: usize, block_count: usize, alignment: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(PortError::invalid_argument("block_size", "Block size cannot be zero"));
        }
        if block_count == 0 {
            return Err(PortError::invalid_argument("block_count", "Block count cannot be zero"));
        }
        if !alignment.is_power_of_two() {
            return Err(PortError::invalid_argument(
                "alignment",
                "Alignment must be a power of two",
            ));
        }

        let aligned_block_size = Self::align_up(block_size, alignment);
        let total_size = aligned_block_size
            .checked_mul(block_count)
            .ok_or_else(|| PortError::invalid_argument("block_count", "Pool size overflows usize"))?;
        let layout = Layout::from_size_align(total_size, alignment)
            .map_err(|e| PortError::invalid_argument("block_size", e.to_string()))?;

        // SAFETY: total_size is non-zero.
        let base_ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) }).ok_or_else(|| {
            PortError::resource(format!("pool region of {} bytes could not be allocated", total_size))
        })?;

        // Lowest index is handed out first.
        let free_list = (0..block_count).rev().collect();

        Ok(Self {
            base_ptr,
            layout,
            block_size: aligned_block_size,
            total_blocks: block_count,
            free_list: Mutex::new(free_list),
        })
    }

    /// Get block size
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Get total number of blocks
    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    /// Get number of free blocks
    pub fn free_blocks(&self) -> usize {
        lock(&self.free_list).len()
    }

    /// Check if every block is handed out
    pub fn is_full(&self) -> bool {
        self.free_blocks() == 0
    }

    /// Align a value up to the given alignment
    fn align_up(value: usize, align: usize) -> usize {
        (value + align - 1) & !(align - 1)
    }

    fn block_address(&self, index: usize) -> NonNull<u8> {
        // SAFETY: index < total_blocks, so the offset stays inside the region.
        unsafe { NonNull::new_unchecked(self.base_ptr.as_ptr().add(index * self.block_size)) }
    }
}

impl BufferAllocator for PoolAllocator {
    fn allocate(&self, size: usize) -> Result<MemoryBlock> {
        if size > self.block_size {
            return Err(PortError::invalid_argument(
                "size",
                format!("requested {} bytes, pool blocks are {} bytes", size, self.block_size),
            ));
        }

        let index = lock(&self.free_list)
            .pop()
            .ok_or_else(|| PortError::resource(format!("pool of {} blocks exhausted", self.total_blocks)))?;

        Ok(MemoryBlock {
            handle: BlockHandle(index as u64),
            address: self.block_address(index),
            size: self.block_size,
        })
    }

    fn free(&self, handle: BlockHandle) -> Result<()> {
        let index = handle.0 as usize;
        if index >= self.total_blocks {
            return Err(PortError::index_out_of_range("handle", index, self.total_blocks));
        }

        let mut free_list = lock(&self.free_list);
        if free_list.contains(&index) {
            return Err(PortError::invalid_argument(
                "handle",
                format!("block {} is already free", index),
            ));
        }
        free_list.push(index);
        Ok(())
    }

    fn outstanding(&self) -> usize {
        self.total_blocks - self.free_blocks()
    }
}

impl Drop for PoolAllocator {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.base_ptr.as_ptr(), self.layout) };
    }
}

unsafe impl Send for PoolAllocator {}
unsafe impl Sync for PoolAllocator {}
