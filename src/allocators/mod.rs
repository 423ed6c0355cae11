//! Backing-storage allocators
//!
//! Buffer storage belongs to an external allocator; ports only keep the
//! handle and address. [`BufferAllocator`] is that boundary, and the two
//! implementations here serve tests, benches and the simulator.

pub mod heap;
pub mod pool;
pub mod traits;

pub use heap::HeapAllocator;
pub use pool::PoolAllocator;
pub use traits::{BlockHandle, BufferAllocator, MemoryBlock};
