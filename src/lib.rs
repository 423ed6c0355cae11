//! # bufport - Buffer Ports for Media Pipeline Stages
//!
//! `bufport` manages the buffers that flow through one port of a processing
//! stage: who owns each buffer, which thread has it checked out, which
//! buffers are waiting to be processed, and how buffers are shared with the
//! port on the other end of a tunnel.
//!
//! ## Features
//!
//! - **Index-stable registry**: every buffer registered on a port, in
//!   registration order, with handles that survive growth
//! - **Checkout tracking**: `IN_USE` / `OWNED_BY_PORT` / `TUNNELED` /
//!   `MARKED` flags per buffer; running out of free buffers is backpressure,
//!   not an error
//! - **Pending queue**: strict FIFO hand-off between threads with a
//!   condition-variable readiness signal and bounded waits
//! - **Tunnels**: supplier negotiation, buffer-count negotiation, shared
//!   headers and forwarding between two components
//! - **Pluggable storage**: backing memory comes from a [`BufferAllocator`]
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────── Component A ───────────────┐      ┌──── Component B ────┐
//! │  processing thread                         │      │  processing thread  │
//! │     │ allocate_next_buffer / release_buffer│      │     │ wait / pop    │
//! │     ▼                                      │      │     ▼               │
//! │  Port (output, supplier) ── forward_buffer ────────▶ Port (input)       │
//! │   ├─ BufferRegistry  [hdr#1 hdr#2 hdr#3]   │      │   ├─ BufferRegistry │
//! │   └─ pending queue   ──▶ FIFO ──▶          │      │   └─ pending queue  │
//! └────────────────────────────────────────────┘      └─────────────────────┘
//!            │ allocate / free
//!            ▼
//!      BufferAllocator (external)
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use bufport::{BufferAllocator, Direction, HeapAllocator, Port, PortDefinition};
//!
//! let allocator: Arc<dyn BufferAllocator> = Arc::new(HeapAllocator::new());
//! let port = Port::new(PortDefinition::new(Direction::Input, 1, 2, 4096))?;
//! port.allocate_buffer(&allocator, 4096)?;
//! port.allocate_buffer(&allocator, 4096)?;
//! port.enable();
//! assert!(port.is_ready());
//!
//! let buffer = port.allocate_next_buffer().expect("a free buffer");
//! port.push_buffer(&buffer)?;
//! assert_eq!(port.pop_buffer().map(|b| b.header_id()), Some(buffer.header_id()));
//! port.release_buffer(&buffer)?;
//! # Ok::<(), bufport::PortError>(())
//! ```

pub mod allocators;
pub mod buffers;
pub mod error;
pub mod port;
pub mod sync;

// Main API re-exports
pub use allocators::{BlockHandle, BufferAllocator, HeapAllocator, MemoryBlock, PoolAllocator};
pub use buffers::{
    Allocation, AtomicPortStats, Buffer, BufferFlags, BufferHeader, BufferPayload, BufferRef,
    BufferRegistry, HeaderId, PortStats,
};
pub use error::{PortError, Result};
pub use port::{
    tunnel, AllocationState, BufferQueueGuard, BufferSupplier, Direction, PeerEndpoint, Port,
    PortDefinition, PortDefinitionBuilder, SupplierRole, TunnelEnd, TunnelRole,
};
pub use sync::{BufferEvent, NotificationStats, WaitOutcome};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
