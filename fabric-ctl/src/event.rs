//! Switch identities and the events the protocol layer feeds the controller.
//!
//! The protocol layer owns the switch connections and message decoding. It
//! hands every decoded event to the controller as a [`ControllerEvent`];
//! the controller handles them one at a time.

use std::collections::BTreeSet;
use std::fmt;

/// Physical switch port number.
pub type PortNo = u32;

/// Highest physical port number. Everything above is a reserved port
/// (IN_PORT, FLOOD, CONTROLLER, LOCAL, ...).
pub const PORT_MAX: PortNo = 0xffff_ff00;

/// Returns true for numbers that name a physical port.
pub fn is_physical_port(port: PortNo) -> bool {
    port != 0 && port <= PORT_MAX
}

/// Datapath identifier of a fabric switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatapathId(pub u64);

impl DatapathId {
    pub fn new(id: u64) -> Self {
        DatapathId(id)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DatapathId {
    fn from(id: u64) -> Self {
        DatapathId(id)
    }
}

impl fmt::Display for DatapathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// An event delivered by the protocol layer.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A switch completed its handshake.
    SwitchAttach {
        dpid: DatapathId,
        /// Ports reported in the features reply.
        ports: BTreeSet<PortNo>,
    },
    /// Link discovery saw `(src, src_port)` wired to `(dst, dst_port)`.
    LinkDiscovered {
        src: DatapathId,
        src_port: PortNo,
        dst: DatapathId,
        dst_port: PortNo,
    },
    /// A switch sent a packet to the controller.
    PacketIn {
        dpid: DatapathId,
        in_port: PortNo,
        /// Switch buffer holding the packet, `None` if it was sent unbuffered.
        buffer_id: Option<u32>,
        payload: Vec<u8>,
    },
    /// The connection to a switch went away.
    SwitchDetach { dpid: DatapathId },
}

impl ControllerEvent {
    /// Switch the event originates from.
    pub fn dpid(&self) -> DatapathId {
        match self {
            ControllerEvent::SwitchAttach { dpid, .. } => *dpid,
            ControllerEvent::LinkDiscovered { src, .. } => *src,
            ControllerEvent::PacketIn { dpid, .. } => *dpid,
            ControllerEvent::SwitchDetach { dpid } => *dpid,
        }
    }
}
