//! Ports: buffer ownership, lifecycle and the pending queue
//!
//! A [`Port`] owns a [`BufferRegistry`](crate::buffers::BufferRegistry) and
//! a FIFO of buffers awaiting processing. Buffers are registered by the
//! client ([`Port::use_buffer`]), allocated by the port
//! ([`Port::allocate_buffer`]), or shared over a tunnel (see [`tunnel`]).

pub mod config;
pub mod lifecycle;
pub mod queue;
pub mod state;
pub mod tunnel;


pub use config::{Direction, PortDefinition, PortDefinitionBuilder};
pub use lifecycle::Port;
pub use queue::BufferQueueGuard;
pub use state::AllocationState;
pub use tunnel::{BufferSupplier, PeerEndpoint, SupplierRole, TunnelEnd, TunnelRole};
