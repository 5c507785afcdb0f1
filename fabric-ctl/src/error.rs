//! Controller error types.

use crate::event::DatapathId;
use smoltcp::wire::EthernetAddress;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Errors raised while handling controller events.
///
/// None of these are fatal: the dispatcher logs them and drops the packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Unknown switch: {0}")]
    UnknownSwitch(DatapathId),

    #[error("No binding for host {0}")]
    UnknownHost(EthernetAddress),

    #[error("Host {mac} is attached to {actual}, not to path end {expected}")]
    HostNotOnPath {
        mac: EthernetAddress,
        expected: DatapathId,
        actual: DatapathId,
    },

    #[error("No path from {src} to {dst}")]
    NoPath { src: DatapathId, dst: DatapathId },

    #[error("Empty path for {0}")]
    EmptyPath(Ipv4Addr),

    #[error("Southbound channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, ControllerError>;
