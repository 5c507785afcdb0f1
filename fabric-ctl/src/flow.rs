//! Flow rules and the southbound surface used to push them.
//!
//! The controller never talks to switches directly. It emits [`FlowMod`]
//! and [`PacketOut`] messages through a [`Southbound`] implementation owned
//! by the protocol layer. Sending is fire-and-forget: no acknowledgement is
//! awaited and a failed install is not retried.

use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::event::{DatapathId, PortNo};
use crate::hosts::HostTable;
use crate::topology::TopologyStore;
use smoltcp::wire::EthernetAddress;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Match predicate of a flow rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowMatch {
    /// Matches every packet.
    All,
    /// Matches IPv4 packets with this destination address.
    Ipv4Dst(Ipv4Addr),
}

/// Action applied by a flow rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowAction {
    /// Send the full packet to the controller.
    Controller,
    /// Forward out of a physical port.
    Output(PortNo),
}

/// Install (or replace) a flow rule on a switch.
///
/// A switch replaces the action of an existing rule with the same priority
/// and match, so installing the same rule twice is harmless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub dpid: DatapathId,
    pub priority: u16,
    pub pattern: FlowMatch,
    pub action: FlowAction,
    /// Seconds of inactivity before removal, 0 for never.
    pub idle_timeout: u16,
    /// Seconds before unconditional removal, 0 for never.
    pub hard_timeout: u16,
}

/// Emit a packet from a switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    pub dpid: DatapathId,
    /// Buffered packet to release. When `None` the payload is sent.
    pub buffer_id: Option<u32>,
    /// Port the packet originally arrived on, if any.
    pub in_port: Option<PortNo>,
    pub outputs: Vec<PortNo>,
    pub payload: Vec<u8>,
}

/// Messages leaving the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SouthboundMessage {
    FlowMod(FlowMod),
    PacketOut(PacketOut),
}

/// Sink for controller-to-switch messages.
pub trait Southbound {
    fn send_flow_mod(&self, flow: FlowMod) -> Result<()>;

    fn send_packet_out(&self, packet: PacketOut) -> Result<()>;
}

impl<S: Southbound + ?Sized> Southbound for &S {
    fn send_flow_mod(&self, flow: FlowMod) -> Result<()> {
        (**self).send_flow_mod(flow)
    }

    fn send_packet_out(&self, packet: PacketOut) -> Result<()> {
        (**self).send_packet_out(packet)
    }
}

impl<S: Southbound + ?Sized> Southbound for Arc<S> {
    fn send_flow_mod(&self, flow: FlowMod) -> Result<()> {
        (**self).send_flow_mod(flow)
    }

    fn send_packet_out(&self, packet: PacketOut) -> Result<()> {
        (**self).send_packet_out(packet)
    }
}

/// Southbound that hands messages to the protocol layer over a channel.
#[derive(Debug, Clone)]
pub struct ChannelSouthbound {
    tx: mpsc::UnboundedSender<SouthboundMessage>,
}

impl ChannelSouthbound {
    pub fn new(tx: mpsc::UnboundedSender<SouthboundMessage>) -> Self {
        Self { tx }
    }

    /// Create a southbound and the receiver the protocol layer drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SouthboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Southbound for ChannelSouthbound {
    fn send_flow_mod(&self, flow: FlowMod) -> Result<()> {
        self.tx
            .send(SouthboundMessage::FlowMod(flow))
            .map_err(|_| ControllerError::ChannelClosed)
    }

    fn send_packet_out(&self, packet: PacketOut) -> Result<()> {
        self.tx
            .send(SouthboundMessage::PacketOut(packet))
            .map_err(|_| ControllerError::ChannelClosed)
    }
}

/// Builds and pushes flow rules.
#[derive(Debug, Clone)]
pub struct FlowInstaller {
    miss_priority: u16,
    forward_priority: u16,
    idle_timeout: u16,
    hard_timeout: u16,
}

impl FlowInstaller {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            miss_priority: config.miss_priority,
            forward_priority: config.forward_priority,
            idle_timeout: config.idle_timeout,
            hard_timeout: config.hard_timeout,
        }
    }

    /// The table-miss rule: everything unmatched goes to the controller.
    ///
    /// Permanent regardless of the configured timeouts.
    pub fn miss_rule(&self, dpid: DatapathId) -> FlowMod {
        FlowMod {
            dpid,
            priority: self.miss_priority,
            pattern: FlowMatch::All,
            action: FlowAction::Controller,
            idle_timeout: 0,
            hard_timeout: 0,
        }
    }

    /// Forwarding rule for `dst_ip` out of `port`.
    pub fn forward_rule(&self, dpid: DatapathId, dst_ip: Ipv4Addr, port: PortNo) -> FlowMod {
        FlowMod {
            dpid,
            priority: self.forward_priority,
            pattern: FlowMatch::Ipv4Dst(dst_ip),
            action: FlowAction::Output(port),
            idle_timeout: self.idle_timeout,
            hard_timeout: self.hard_timeout,
        }
    }

    pub fn install_miss_rule<S: Southbound + ?Sized>(
        &self,
        southbound: &S,
        dpid: DatapathId,
    ) -> Result<()> {
        debug!(%dpid, priority = self.miss_priority, "Installing table-miss rule");
        southbound.send_flow_mod(self.miss_rule(dpid))
    }

    /// Install one forwarding rule per switch of `path` towards `dst_ip`.
    ///
    /// Every hop but the last forwards to the next switch; the last one
    /// forwards to the port `dst_mac` is bound to. Hops without a known
    /// adjacency are skipped and already written rules are not rolled back.
    /// Returns the number of rules sent.
    pub fn install_path<S: Southbound + ?Sized>(
        &self,
        southbound: &S,
        topology: &TopologyStore,
        hosts: &HostTable,
        path: &[DatapathId],
        dst_ip: Ipv4Addr,
        dst_mac: EthernetAddress,
    ) -> Result<usize> {
        let Some(&last) = path.last() else {
            return Err(ControllerError::EmptyPath(dst_ip));
        };
        let Some(binding) = hosts.lookup_by_mac(&dst_mac) else {
            warn!(%dst_mac, %dst_ip, "Cannot install path: destination host unknown");
            return Err(ControllerError::UnknownHost(dst_mac));
        };
        if binding.dpid != last {
            warn!(
                %dst_mac,
                expected = %last,
                actual = %binding.dpid,
                "Path does not end at destination host"
            );
            return Err(ControllerError::HostNotOnPath {
                mac: dst_mac,
                expected: last,
                actual: binding.dpid,
            });
        }

        let mut installed = 0;
        for hop in path.windows(2) {
            let (here, next) = (hop[0], hop[1]);
            let Some(port) = topology.port_to(here, next) else {
                warn!(dpid = %here, next = %next, %dst_ip, "No adjacency for hop, skipping");
                continue;
            };
            southbound.send_flow_mod(self.forward_rule(here, dst_ip, port))?;
            installed += 1;
        }
        southbound.send_flow_mod(self.forward_rule(last, dst_ip, binding.port))?;
        installed += 1;

        info!(%dst_ip, hops = path.len(), installed, "Installed path");
        Ok(installed)
    }
}
