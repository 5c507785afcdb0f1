//! Packet-in dispatcher and the state it owns.
//!
//! The [`Controller`] owns the topology store and the host table and is the
//! only code that mutates them. Every event runs to completion before the
//! next one is looked at; [`crate::runtime`] enforces that ordering when
//! events arrive from many switch connections at once.
//!
//! Packet-in handling:
//! 1. Classify the payload. Malformed frames and anything that is neither
//!    ARP nor IPv4 are dropped.
//! 2. Learn the sender's location (host-facing ports only).
//! 3. ARP goes to the proxy in [`crate::arp`]. IPv4 to a known host gets a
//!    shortest path with forward and reverse rules, then the packet is sent
//!    along the first hop. IPv4 to an unknown host is edge-broadcast so the
//!    destination answers and gets learned.

use crate::arp;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::event::{ControllerEvent, DatapathId, PortNo};
use crate::flow::{FlowInstaller, PacketOut, Southbound};
use crate::hosts::{HostBinding, HostTable};
use crate::packet::{Frame, Ipv4Info, PacketKind, classify};
use crate::path::shortest_path;
use crate::topology::TopologyStore;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Where a packet-in entered the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ingress {
    pub dpid: DatapathId,
    pub in_port: PortNo,
    pub buffer_id: Option<u32>,
}

/// Why a packet was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not a parseable Ethernet/ARP/IPv4 frame.
    Malformed,
    /// EtherType the controller does not route (LLDP, IPv6, ...).
    Unsupported(u16),
    /// Packet-in from a switch that never attached.
    UnknownSwitch,
    /// Unknown destination reached the controller over an uplink.
    UplinkIngress,
    /// Reply or IPv4 packet for a host that has not been learned.
    UnknownDestination,
    /// ARP for the sender's own address.
    Gratuitous,
    /// Destination sits behind the ingress port.
    Hairpin,
    /// Destination switch unreachable.
    NoPath,
    /// Sending to the switch failed.
    Failed,
}

/// Terminal action taken for a packet-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Forwarded to a known host.
    Unicast { dpid: DatapathId, port: PortNo },
    /// Answered with a fabricated ARP reply.
    ProxyReply { dpid: DatapathId, port: PortNo },
    /// Replayed out of host-facing ports fabric-wide.
    EdgeBroadcast { switches: usize, ports: usize },
    /// Rules installed and the packet sent along the first hop.
    PathInstalled { hops: usize, rules: usize },
    Dropped(DropReason),
}

pub struct Controller<S> {
    config: ControllerConfig,
    topology: TopologyStore,
    hosts: HostTable,
    installer: FlowInstaller,
    southbound: S,
}

impl<S: Southbound> Controller<S> {
    pub fn new(config: ControllerConfig, southbound: S) -> Self {
        let installer = FlowInstaller::new(&config);
        Self {
            config,
            topology: TopologyStore::new(),
            hosts: HostTable::new(),
            installer,
            southbound,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn topology(&self) -> &TopologyStore {
        &self.topology
    }

    pub fn hosts(&self) -> &HostTable {
        &self.hosts
    }

    pub fn southbound(&self) -> &S {
        &self.southbound
    }

    /// Handle one event to completion. Packet-ins report their disposition.
    pub fn handle_event(&mut self, event: ControllerEvent) -> Option<Disposition> {
        match event {
            ControllerEvent::SwitchAttach { dpid, ports } => {
                self.on_switch_attach(dpid, &ports);
                None
            }
            ControllerEvent::LinkDiscovered {
                src,
                src_port,
                dst,
                dst_port,
            } => {
                self.topology.on_link_discovered(src, src_port, dst, dst_port);
                None
            }
            ControllerEvent::PacketIn {
                dpid,
                in_port,
                buffer_id,
                payload,
            } => {
                let ingress = Ingress {
                    dpid,
                    in_port,
                    buffer_id,
                };
                Some(self.on_packet_in(ingress, &payload))
            }
            ControllerEvent::SwitchDetach { dpid } => {
                self.on_switch_detach(dpid);
                None
            }
        }
    }

    /// Register a switch and push its table-miss rule.
    pub fn on_switch_attach(&mut self, dpid: DatapathId, ports: &BTreeSet<PortNo>) {
        self.topology.on_switch_attach(dpid, ports);
        if let Err(e) = self.installer.install_miss_rule(&self.southbound, dpid) {
            warn!(%dpid, error = %e, "Failed to install table-miss rule");
        }
    }

    /// Forget a switch, its links and the hosts behind it.
    ///
    /// Rules already installed elsewhere are left alone; they age out or
    /// get replaced when the hosts are learned again.
    pub fn on_switch_detach(&mut self, dpid: DatapathId) {
        if self.topology.on_switch_detach(dpid) {
            let evicted = self.hosts.evict_switch(dpid);
            info!(%dpid, evicted, "Removed switch state");
        }
    }

    pub fn on_link_discovered(
        &mut self,
        src: DatapathId,
        src_port: PortNo,
        dst: DatapathId,
        dst_port: PortNo,
    ) {
        self.topology.on_link_discovered(src, src_port, dst, dst_port);
    }

    pub fn on_packet_in(&mut self, ingress: Ingress, payload: &[u8]) -> Disposition {
        let Some(frame) = classify(payload) else {
            debug!(
                dpid = %ingress.dpid,
                port = ingress.in_port,
                len = payload.len(),
                "Dropping malformed frame"
            );
            return Disposition::Dropped(DropReason::Malformed);
        };
        if let PacketKind::Other(ethertype) = frame.kind {
            return Disposition::Dropped(DropReason::Unsupported(ethertype));
        }
        if !self.topology.contains(ingress.dpid) {
            debug!(dpid = %ingress.dpid, "Packet-in from unknown switch");
            return Disposition::Dropped(DropReason::UnknownSwitch);
        }

        self.hosts.learn(
            &self.topology,
            frame.src_mac,
            frame.src_ip(),
            ingress.dpid,
            ingress.in_port,
        );

        let result = match frame.kind {
            PacketKind::ArpRequest(request) => arp::handle_request(
                &self.southbound,
                &self.topology,
                &self.hosts,
                &ingress,
                &request,
                payload,
            ),
            PacketKind::ArpReply(reply) => {
                arp::handle_reply(&self.southbound, &self.hosts, &ingress, &frame, &reply, payload)
            }
            PacketKind::Ipv4(ip) => self.route_ipv4(&ingress, &frame, ip, payload),
            PacketKind::Other(ethertype) => {
                Ok(Disposition::Dropped(DropReason::Unsupported(ethertype)))
            }
        };

        match result {
            Ok(disposition) => {
                debug!(
                    dpid = %ingress.dpid,
                    port = ingress.in_port,
                    ?disposition,
                    "Packet-in handled"
                );
                disposition
            }
            Err(e) => {
                warn!(dpid = %ingress.dpid, port = ingress.in_port, error = %e, "Packet-in failed");
                Disposition::Dropped(DropReason::Failed)
            }
        }
    }

    /// Shortest path between two known switches.
    pub fn path_between(&self, src: DatapathId, dst: DatapathId) -> Result<Vec<DatapathId>> {
        for dpid in [src, dst] {
            if !self.topology.contains(dpid) {
                return Err(ControllerError::UnknownSwitch(dpid));
            }
        }
        shortest_path(&self.topology, src, dst).ok_or(ControllerError::NoPath { src, dst })
    }

    fn route_ipv4(
        &self,
        ingress: &Ingress,
        frame: &Frame,
        ip: Ipv4Info,
        payload: &[u8],
    ) -> Result<Disposition> {
        let Some(dst) = self.hosts.lookup_by_mac(&frame.dst_mac) else {
            if !self.config.broadcast_unknown_ipv4 {
                return Ok(Disposition::Dropped(DropReason::UnknownDestination));
            }
            debug!(dst_ip = %ip.dst_ip, dst_mac = %frame.dst_mac, "Unresolved IPv4 destination");
            return arp::edge_broadcast(&self.southbound, &self.topology, ingress, payload);
        };
        if dst.dpid == ingress.dpid && dst.port == ingress.in_port {
            return Ok(Disposition::Dropped(DropReason::Hairpin));
        }

        let path = match self.path_between(ingress.dpid, dst.dpid) {
            Ok(path) => path,
            Err(e) => {
                warn!(dst_ip = %ip.dst_ip, error = %e, "Cannot route to destination");
                return Ok(Disposition::Dropped(DropReason::NoPath));
            }
        };

        let forward = self.installer.install_path(
            &self.southbound,
            &self.topology,
            &self.hosts,
            &path,
            ip.dst_ip,
            dst.mac,
        )?;
        let reverse = self.install_reverse(ingress, frame, ip, &path, dst);

        let out_port = match path.get(1) {
            Some(&next) => self.topology.port_to(ingress.dpid, next),
            None => Some(dst.port),
        };
        let Some(out_port) = out_port else {
            return Ok(Disposition::Dropped(DropReason::NoPath));
        };

        self.southbound.send_packet_out(PacketOut {
            dpid: ingress.dpid,
            buffer_id: ingress.buffer_id,
            in_port: Some(ingress.in_port),
            outputs: vec![out_port],
            payload: if ingress.buffer_id.is_some() {
                Vec::new()
            } else {
                payload.to_vec()
            },
        })?;

        Ok(Disposition::PathInstalled {
            hops: path.len(),
            rules: forward + reverse,
        })
    }

    /// Rules for the return direction, towards the packet's source.
    fn install_reverse(
        &self,
        ingress: &Ingress,
        frame: &Frame,
        ip: Ipv4Info,
        forward: &[DatapathId],
        dst: &HostBinding,
    ) -> usize {
        let Some(src) = self.hosts.lookup_by_mac(&frame.src_mac) else {
            debug!(src_mac = %frame.src_mac, "Source not learned, skipping reverse path");
            return 0;
        };

        let reverse = if src.dpid == ingress.dpid {
            Some(forward.iter().rev().copied().collect::<Vec<_>>())
        } else {
            shortest_path(&self.topology, dst.dpid, src.dpid)
        };
        let Some(reverse) = reverse else {
            warn!(src = %dst.dpid, dst = %src.dpid, "No reverse path");
            return 0;
        };

        self.installer
            .install_path(
                &self.southbound,
                &self.topology,
                &self.hosts,
                &reverse,
                ip.src_ip,
                src.mac,
            )
            .unwrap_or_else(|e| {
                warn!(error = %e, src_ip = %ip.src_ip, "Failed to install reverse path");
                0
            })
    }
}
