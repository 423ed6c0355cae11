//! Buffer records and the per-port registry
//!
//! A [`Buffer`] is the port's view of one I/O slot: bookkeeping flags plus a
//! header that may be shared with a tunnel peer. A [`BufferRegistry`] keeps
//! every record registered on one port in registration order.

pub mod buffer;
pub mod registry;
pub mod stats;

// Re-export main types
pub use buffer::{
    Allocation, Buffer, BufferFlags, BufferHeader, BufferPayload, BufferRef, HeaderId,
};
pub use registry::BufferRegistry;
pub use stats::{AtomicPortStats, PortStats};
