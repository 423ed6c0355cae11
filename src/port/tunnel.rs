//! Tunnels between an output port and an input port of two components
//!
//! Exactly one end of a tunnel is the buffer supplier. The supplier
//! allocates storage; the non-supplier registers a header over that storage
//! and the supplier keeps a record over the same header, so a buffer can
//! be forwarded across the tunnel by header identity.

use std::{fmt, sync::Arc};

use log::{debug, warn};

use crate::{
    allocators::BufferAllocator,
    buffers::{Allocation, BufferRef},
    error::{PortError, Result},
};

use super::{config::Direction, lifecycle::Port};

/// Which end of a tunnel a port plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupplierRole {
    /// The port allocates the buffers shared over the tunnel
    Supplier,
    /// The port receives its buffers from the peer
    NonSupplier,
}

/// Supplier preference requested when connecting two ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferSupplier {
    /// No preference; the input port supplies
    #[default]
    Unspecified,
    /// The input port supplies
    Input,
    /// The output port supplies
    Output,
}

impl BufferSupplier {
    /// Role a port with the given direction plays under this preference
    pub fn role_for(self, direction: Direction) -> SupplierRole {
        let supplying = match self {
            BufferSupplier::Unspecified | BufferSupplier::Input => Direction::Input,
            BufferSupplier::Output => Direction::Output,
        };
        if direction == supplying {
            SupplierRole::Supplier
        } else {
            SupplierRole::NonSupplier
        }
    }
}

/// Identity of the port on the far end of a tunnel
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerEndpoint {
    /// Name of the peer component
    pub component: String,
    /// Index of the port on the peer component
    pub port_index: usize,
}

impl PeerEndpoint {
    pub fn new(component: impl Into<String>, port_index: usize) -> Self {
        Self {
            component: component.into(),
            port_index,
        }
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.component, self.port_index)
    }
}

/// Tunnel state of a port
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TunnelRole {
    /// Not connected to a peer
    #[default]
    Untunneled,
    /// Connected, and this port allocates the shared buffers
    Supplier(PeerEndpoint),
    /// Connected, and the peer allocates the shared buffers
    NonSupplier(PeerEndpoint),
}

impl TunnelRole {
    /// Build a tunneled role
    pub fn tunneled(peer: PeerEndpoint, role: SupplierRole) -> Self {
        match role {
            SupplierRole::Supplier => TunnelRole::Supplier(peer),
            SupplierRole::NonSupplier => TunnelRole::NonSupplier(peer),
        }
    }

    pub fn is_tunneled(&self) -> bool {
        !matches!(self, TunnelRole::Untunneled)
    }

    pub fn is_supplier(&self) -> bool {
        matches!(self, TunnelRole::Supplier(_))
    }

    pub fn is_non_supplier(&self) -> bool {
        matches!(self, TunnelRole::NonSupplier(_))
    }

    /// The peer, if tunneled
    pub fn peer(&self) -> Option<&PeerEndpoint> {
        match self {
            TunnelRole::Untunneled => None,
            TunnelRole::Supplier(peer) | TunnelRole::NonSupplier(peer) => Some(peer),
        }
    }
}

/// One side of a tunnel being connected: the port and how its peer names it
#[derive(Debug, Clone, Copy)]
pub struct TunnelEnd<'a> {
    pub port: &'a Port,
    pub component: &'a str,
    pub port_index: usize,
}

impl<'a> TunnelEnd<'a> {
    pub fn new(port: &'a Port, component: &'a str, port_index: usize) -> Self {
        Self {
            port,
            component,
            port_index,
        }
    }

    fn endpoint(&self) -> PeerEndpoint {
        PeerEndpoint::new(self.component, self.port_index)
    }
}

/// Connect an output port to an input port
///
/// Negotiates exactly one supplier from `preference`, and raises both
/// ports' actual buffer count to the larger of the two. Returns the
/// direction of the supplying port. Neither port may have buffers
/// registered.
pub fn connect(output: TunnelEnd<'_>, input: TunnelEnd<'_>, preference: BufferSupplier) -> Result<Direction> {
    if output.port.direction() != Direction::Output {
        return Err(PortError::invalid_argument("output", "port is not an output port"));
    }
    if input.port.direction() != Direction::Input {
        return Err(PortError::invalid_argument("input", "port is not an input port"));
    }
    let count = output
        .port
        .definition()
        .buffer_count_actual
        .max(input.port.definition().buffer_count_actual);

    // Another thread may register on either port while this runs; whatever
    // was changed is put back if a later step fails.
    let saved = [SavedEnd::take(output.port), SavedEnd::take(input.port)];
    let negotiated = negotiate(&output, Direction::Output, &input, count, preference)
        .and_then(|()| negotiate(&input, Direction::Input, &output, count, preference));
    if let Err(e) = negotiated {
        for end in &saved {
            end.restore();
        }
        return Err(e);
    }

    let supplier = if output.port.is_supplier() {
        Direction::Output
    } else {
        Direction::Input
    };
    debug!(
        "tunnel {} -> {} connected, {} buffers supplied by the {} side",
        output.endpoint(),
        input.endpoint(),
        count,
        supplier.name()
    );
    Ok(supplier)
}

/// Allocate the shared buffers of a connected tunnel
///
/// Fills the supplier up to its actual count; each buffer is registered on
/// the non-supplier first and then on the supplier over the same header.
/// Returns how many buffers were added.
pub fn populate(
    supplier: &Port,
    non_supplier: &Port,
    allocator: &Arc<dyn BufferAllocator>,
) -> Result<usize> {
    check_pair(supplier, non_supplier)?;

    let size = supplier
        .definition()
        .buffer_size
        .max(non_supplier.definition().buffer_size);
    let missing = supplier
        .definition()
        .buffer_count_actual
        .saturating_sub(supplier.buffer_count());

    for _ in 0..missing {
        let allocation = Allocation::new(Arc::clone(allocator), size)?;
        let block = *allocation.block();
        let header = non_supplier.accept_tunneled_buffer(block.address, block.size)?;
        let header_id = header.id();
        if let Err(e) = supplier.register_supplied(header, allocation) {
            non_supplier.unregister_tunneled(header_id)?;
            return Err(e);
        }
    }

    debug!(
        "tunnel {} -> {} populated with {} buffers of {} bytes",
        supplier.name(),
        non_supplier.name(),
        missing,
        size
    );
    Ok(missing)
}

/// Hand a buffer to the other end of the tunnel
///
/// Looks up the peer's record for the same header and pushes it onto the
/// peer's pending queue. Returns the peer's record.
pub fn forward_buffer(from: &Port, buffer: &BufferRef, to: &Port) -> Result<BufferRef> {
    if !from.owns(buffer) {
        return Err(PortError::invalid_argument(
            "buffer",
            format!("{} is not registered on {}", buffer.header_id(), from.name()),
        ));
    }
    let peer = to.find_buffer(buffer.header_id()).ok_or_else(|| {
        PortError::invalid_argument(
            "buffer",
            format!("{} is not shared with {}", buffer.header_id(), to.name()),
        )
    })?;
    to.push_buffer(&peer)?;
    Ok(peer)
}

/// Return every shared buffer to the supplier and free it
///
/// Fails with a state error while any shared buffer is checked out on
/// either end. Queues on both ends are cleared. Returns how many buffers
/// were freed.
pub fn depopulate(supplier: &Port, non_supplier: &Port) -> Result<usize> {
    check_pair(supplier, non_supplier)?;
    for port in [supplier, non_supplier] {
        if port.checked_out_count() > 0 {
            return Err(PortError::state(format!(
                "port {} still has buffers checked out",
                port.name()
            )));
        }
    }

    non_supplier.buffer_queue_clear();
    supplier.buffer_queue_clear();

    let mut freed = 0;
    while supplier.has_buffers() {
        let buffer = supplier.allocated_buffer_at(0)?;
        if non_supplier.find_buffer(buffer.header_id()).is_some() {
            non_supplier.unregister_tunneled(buffer.header_id())?;
        }
        supplier.unregister_tunneled(buffer.header_id())?;
        freed += 1;
    }

    debug!(
        "tunnel {} -> {} depopulated, {} buffers freed",
        supplier.name(),
        non_supplier.name(),
        freed
    );
    Ok(freed)
}

/// Break the tunnel between two ports; both must be empty
pub fn disconnect(a: &Port, b: &Port) -> Result<()> {
    for port in [a, b] {
        if port.has_buffers() {
            return Err(PortError::state(format!(
                "port {} has buffers registered and cannot be untunneled",
                port.name()
            )));
        }
    }
    a.clear_tunnel()?;
    b.clear_tunnel()
}

/// Apply the negotiated count and role to one end
fn negotiate(
    end: &TunnelEnd<'_>,
    direction: Direction,
    peer: &TunnelEnd<'_>,
    count: usize,
    preference: BufferSupplier,
) -> Result<()> {
    end.port.set_buffer_count_actual(count)?;
    end.port
        .setup_tunnel(peer.endpoint(), preference.role_for(direction))
}

/// Count and role of a port before `connect` touched it
struct SavedEnd<'a> {
    port: &'a Port,
    count: usize,
    role: TunnelRole,
}

impl<'a> SavedEnd<'a> {
    fn take(port: &'a Port) -> Self {
        Self {
            port,
            count: port.definition().buffer_count_actual,
            role: port.tunnel(),
        }
    }

    fn restore(&self) {
        if self.port.definition().buffer_count_actual == self.count && self.port.tunnel() == self.role {
            return;
        }
        let restored = self
            .port
            .set_buffer_count_actual(self.count)
            .and_then(|()| match &self.role {
                TunnelRole::Untunneled => self.port.clear_tunnel(),
                TunnelRole::Supplier(peer) => self.port.setup_tunnel(peer.clone(), SupplierRole::Supplier),
                TunnelRole::NonSupplier(peer) => {
                    self.port.setup_tunnel(peer.clone(), SupplierRole::NonSupplier)
                }
            });
        if let Err(e) = restored {
            warn!("port {} could not be restored after a failed connect: {}", self.port.name(), e);
        }
    }
}

fn check_pair(supplier: &Port, non_supplier: &Port) -> Result<()> {
    if !supplier.is_supplier() {
        return Err(PortError::state(format!(
            "port {} is not a tunnel supplier",
            supplier.name()
        )));
    }
    if !non_supplier.tunnel().is_non_supplier() {
        return Err(PortError::state(format!(
            "port {} is not a tunnel non-supplier",
            non_supplier.name()
        )));
    }
    Ok(())
}
