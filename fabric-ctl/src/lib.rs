//! Reactive shortest-path forwarding for fat-tree switch fabrics.
//!
//! The controller learns where hosts live from the packets their edge
//! switches punt to it, answers ARP on their behalf, and installs
//! per-destination IPv4 rules along shortest paths on demand.

pub mod arp;
pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod flow;
pub mod hosts;
pub mod packet;
pub mod path;
pub mod runtime;
pub mod sim;
pub mod test_util;
pub mod topology;

pub use config::ControllerConfig;
pub use controller::{Controller, Disposition, DropReason};
pub use error::{ControllerError, Result};
pub use event::{ControllerEvent, DatapathId, PortNo};
pub use flow::{ChannelSouthbound, Southbound, SouthboundMessage};
