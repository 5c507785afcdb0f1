//! In-memory fat-tree fabric for exercising the controller end to end.
//!
//! [`FabricSim`] numbers the switches and hosts of a generated fat-tree the
//! way an emulator would and produces the events their switches would send.
//! [`SimSouthbound`] plays the switches' side: it keeps a flow table per
//! switch and can walk a packet through the installed rules.

use crate::error::Result;
use crate::event::{ControllerEvent, DatapathId, PortNo};
use crate::flow::{FlowAction, FlowMatch, FlowMod, PacketOut, Southbound};
use crate::packet::{
    build_arp, build_arp_request_frame, build_ethernet_frame, build_icmp_echo_frame,
};
use fabric_topo::{FatTree, NodeIndex, NodeKind, TopoError};
use smoltcp::wire::{ArpOperation, EthernetAddress, EthernetProtocol};
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

/// Reserved port every switch reports for its local management interface.
pub const PORT_LOCAL: PortNo = 0xffff_fffe;

/// A host plugged into the simulated fabric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimHost {
    pub name: String,
    pub mac: EthernetAddress,
    pub ip: Ipv4Addr,
    /// Edge switch the host is attached to.
    pub dpid: DatapathId,
    pub port: PortNo,
}

/// What sits behind a switch port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    Switch { dpid: DatapathId, port: PortNo },
    /// Index into [`FabricSim::hosts`].
    Host(usize),
}

/// A fat-tree with controller-facing identities.
#[derive(Debug, Clone)]
pub struct FabricSim {
    tree: FatTree,
    hosts: Vec<SimHost>,
    wiring: HashMap<(DatapathId, PortNo), Peer>,
}

impl FabricSim {
    pub fn new(k: usize) -> std::result::Result<Self, TopoError> {
        let tree = FatTree::new(k)?;

        let mut hosts = Vec::with_capacity(tree.hosts().len());
        let mut host_slot = HashMap::new();
        for &idx in tree.hosts() {
            let node = &tree.nodes()[idx];
            let NodeKind::Host { pod, edge, slot } = node.kind else {
                continue;
            };
            let Some(at) = tree.attachment(idx) else {
                continue;
            };
            let slot_in_list = hosts.len();
            host_slot.insert(idx, slot_in_list);
            hosts.push(SimHost {
                name: node.name.clone(),
                mac: host_mac(slot_in_list),
                ip: Ipv4Addr::new(10, pod as u8, edge as u8, slot as u8 + 2),
                dpid: dpid_of(at.node),
                port: at.port,
            });
        }

        let mut wiring = HashMap::new();
        for link in tree.links() {
            for (here, there) in [(link.a, link.b), (link.b, link.a)] {
                if !tree.nodes()[here.node].kind.is_switch() {
                    continue;
                }
                let peer = match host_slot.get(&there.node) {
                    Some(&h) => Peer::Host(h),
                    None => Peer::Switch {
                        dpid: dpid_of(there.node),
                        port: there.port,
                    },
                };
                wiring.insert((dpid_of(here.node), here.port), peer);
            }
        }

        Ok(Self {
            tree,
            hosts,
            wiring,
        })
    }

    pub fn tree(&self) -> &FatTree {
        &self.tree
    }

    pub fn hosts(&self) -> &[SimHost] {
        &self.hosts
    }

    pub fn host(&self, name: &str) -> Option<&SimHost> {
        self.hosts.iter().find(|h| h.name == name)
    }

    /// Datapath id of switch node `idx`.
    pub fn dpid(&self, idx: NodeIndex) -> DatapathId {
        dpid_of(idx)
    }

    pub fn dpids(&self) -> impl Iterator<Item = DatapathId> + '_ {
        self.tree.switches().map(dpid_of)
    }

    /// What is wired to `(dpid, port)`.
    pub fn peer(&self, dpid: DatapathId, port: PortNo) -> Option<Peer> {
        self.wiring.get(&(dpid, port)).copied()
    }

    /// Every switch attaching with its cabled ports plus the local port.
    pub fn attach_events(&self) -> Vec<ControllerEvent> {
        self.tree
            .switches()
            .map(|idx| {
                let mut ports: BTreeSet<PortNo> =
                    self.tree.nodes()[idx].ports().iter().map(|&(p, _)| p).collect();
                ports.insert(PORT_LOCAL);
                ControllerEvent::SwitchAttach {
                    dpid: dpid_of(idx),
                    ports,
                }
            })
            .collect()
    }

    /// Discovery of every switch-to-switch link, once from each side.
    pub fn link_events(&self) -> Vec<ControllerEvent> {
        self.tree
            .switch_links()
            .flat_map(|link| [(link.a, link.b), (link.b, link.a)])
            .map(|(src, dst)| ControllerEvent::LinkDiscovered {
                src: dpid_of(src.node),
                src_port: src.port,
                dst: dpid_of(dst.node),
                dst_port: dst.port,
            })
            .collect()
    }

    /// Attach events followed by link events.
    pub fn bootstrap_events(&self) -> Vec<ControllerEvent> {
        let mut events = self.attach_events();
        events.extend(self.link_events());
        events
    }

    /// `from` asking who has `target_ip`, as its edge switch reports it.
    pub fn arp_request(&self, from: &SimHost, target_ip: Ipv4Addr) -> ControllerEvent {
        packet_in(from, build_arp_request_frame(from.mac, from.ip, target_ip))
    }

    /// `from` answering an ARP request sent by `to`.
    pub fn arp_reply(&self, from: &SimHost, to: &SimHost) -> ControllerEvent {
        let arp = build_arp(ArpOperation::Reply, (from.mac, from.ip), (to.mac, to.ip));
        packet_in(
            from,
            build_ethernet_frame(to.mac, from.mac, EthernetProtocol::Arp, &arp),
        )
    }

    /// ICMP echo request from `from` to `to`.
    pub fn ping(&self, from: &SimHost, to: &SimHost, seq_no: u16) -> ControllerEvent {
        packet_in(
            from,
            build_icmp_echo_frame((from.mac, from.ip), (to.mac, to.ip), 1, seq_no),
        )
    }

    /// The ARP exchange and first ping between two hosts, in the order the
    /// controller would see them.
    pub fn resolve_and_ping(&self, from: &SimHost, to: &SimHost) -> Vec<ControllerEvent> {
        vec![
            self.arp_request(from, to.ip),
            self.arp_reply(to, from),
            self.ping(from, to, 1),
        ]
    }
}

fn dpid_of(idx: NodeIndex) -> DatapathId {
    DatapathId(idx as u64 + 1)
}

/// `00:00:00:00:00:01` for the first host, counting up.
fn host_mac(i: usize) -> EthernetAddress {
    let n = (i as u64 + 1).to_be_bytes();
    EthernetAddress([n[2], n[3], n[4], n[5], n[6], n[7]])
}

fn packet_in(from: &SimHost, payload: Vec<u8>) -> ControllerEvent {
    ControllerEvent::PacketIn {
        dpid: from.dpid,
        in_port: from.port,
        buffer_id: None,
        payload,
    }
}

/// Why a packet could not be walked to its destination.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TraceError {
    #[error("no rule matches on switch {0}")]
    NoRule(DatapathId),

    #[error("switch {0} sends the packet to the controller")]
    ToController(DatapathId),

    #[error("port {port} of switch {dpid} is not wired")]
    DeadPort { dpid: DatapathId, port: PortNo },

    #[error("delivered to {host} instead of the destination")]
    WrongHost { host: String },

    #[error("forwarding loop through switch {0}")]
    Loop(DatapathId),
}

#[derive(Debug, Default)]
struct SwitchState {
    flows: HashMap<DatapathId, HashMap<(u16, FlowMatch), FlowMod>>,
    packet_outs: Vec<PacketOut>,
}

/// The switches' side of the southbound connection.
#[derive(Debug)]
pub struct SimSouthbound {
    fabric: FabricSim,
    state: Mutex<SwitchState>,
}

impl SimSouthbound {
    pub fn new(fabric: FabricSim) -> Self {
        Self {
            fabric,
            state: Mutex::new(SwitchState::default()),
        }
    }

    pub fn fabric(&self) -> &FabricSim {
        &self.fabric
    }

    /// Rules currently installed on `dpid`, highest priority first.
    pub fn flow_table(&self, dpid: DatapathId) -> Vec<FlowMod> {
        let state = self.lock();
        let mut rules: Vec<FlowMod> = state
            .flows
            .get(&dpid)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default();
        rules.sort_by_key(|r| std::cmp::Reverse(r.priority));
        rules
    }

    /// Installed rules across all switches.
    pub fn rule_count(&self) -> usize {
        self.lock().flows.values().map(HashMap::len).sum()
    }

    pub fn packet_outs(&self) -> Vec<PacketOut> {
        self.lock().packet_outs.clone()
    }

    /// Number of packet-outs that left a switch port facing `host`.
    pub fn deliveries(&self, host: &SimHost) -> usize {
        self.lock()
            .packet_outs
            .iter()
            .filter(|p| p.dpid == host.dpid && p.outputs.contains(&host.port))
            .count()
    }

    /// Walk an IPv4 packet for `dst_ip` from switch `ingress` through the
    /// installed rules. Returns the switches visited, ending with the one
    /// that delivers to the host owning `dst_ip`.
    pub fn trace(
        &self,
        ingress: DatapathId,
        dst_ip: Ipv4Addr,
    ) -> std::result::Result<Vec<DatapathId>, TraceError> {
        let state = self.lock();
        let max_hops = self.fabric.tree().switch_count();
        let mut hops = Vec::new();
        let mut dpid = ingress;

        loop {
            if hops.contains(&dpid) || hops.len() > max_hops {
                return Err(TraceError::Loop(dpid));
            }
            hops.push(dpid);

            let rule = state
                .flows
                .get(&dpid)
                .into_iter()
                .flat_map(|t| t.values())
                .filter(|r| match r.pattern {
                    FlowMatch::All => true,
                    FlowMatch::Ipv4Dst(ip) => ip == dst_ip,
                })
                .max_by_key(|r| r.priority)
                .ok_or(TraceError::NoRule(dpid))?;

            let port = match rule.action {
                FlowAction::Controller => return Err(TraceError::ToController(dpid)),
                FlowAction::Output(port) => port,
            };
            match self.fabric.peer(dpid, port) {
                Some(Peer::Switch { dpid: next, .. }) => dpid = next,
                Some(Peer::Host(h)) => {
                    let host = &self.fabric.hosts()[h];
                    if host.ip != dst_ip {
                        return Err(TraceError::WrongHost {
                            host: host.name.clone(),
                        });
                    }
                    return Ok(hops);
                }
                None => return Err(TraceError::DeadPort { dpid, port }),
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, SwitchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Southbound for SimSouthbound {
    fn send_flow_mod(&self, flow: FlowMod) -> Result<()> {
        debug!(
            dpid = %flow.dpid,
            priority = flow.priority,
            pattern = ?flow.pattern,
            action = ?flow.action,
            "flow_mod"
        );
        self.lock()
            .flows
            .entry(flow.dpid)
            .or_default()
            .insert((flow.priority, flow.pattern), flow);
        Ok(())
    }

    fn send_packet_out(&self, packet: PacketOut) -> Result<()> {
        debug!(
            dpid = %packet.dpid,
            outputs = ?packet.outputs,
            len = packet.payload.len(),
            "packet_out"
        );
        self.lock().packet_outs.push(packet);
        Ok(())
    }
}
