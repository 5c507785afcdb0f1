//! ARP resolution for the fabric.
//!
//! Requests for learned addresses are answered by the controller itself
//! (proxy ARP). Requests for unknown addresses are replayed out of every
//! host-facing port so the owner answers and gets learned; uplinks are never
//! flooded, which keeps the fat-tree loop free without a spanning tree.

use crate::controller::{Disposition, DropReason, Ingress};
use crate::error::Result;
use crate::event::{DatapathId, PortNo};
use crate::flow::{PacketOut, Southbound};
use crate::hosts::HostTable;
use crate::packet::{ArpInfo, Frame, build_arp_reply_frame};
use crate::topology::TopologyStore;
use tracing::debug;

/// Handle an ARP request that reached the controller.
pub fn handle_request<S: Southbound + ?Sized>(
    southbound: &S,
    topology: &TopologyStore,
    hosts: &HostTable,
    ingress: &Ingress,
    request: &ArpInfo,
    payload: &[u8],
) -> Result<Disposition> {
    if request.is_gratuitous() {
        debug!(mac = %request.sender_mac, ip = %request.sender_ip, "Gratuitous ARP, learned only");
        return Ok(Disposition::Dropped(DropReason::Gratuitous));
    }

    let Some(owner) = hosts.lookup_by_ip(request.target_ip) else {
        debug!(
            src_mac = %request.sender_mac,
            target_ip = %request.target_ip,
            "ARP target unknown, broadcasting at the edge"
        );
        return edge_broadcast(southbound, topology, ingress, payload);
    };
    if owner.mac == request.sender_mac {
        return Ok(Disposition::Dropped(DropReason::Gratuitous));
    }

    debug!(
        src_mac = %request.sender_mac,
        target_ip = %request.target_ip,
        owner = %owner.mac,
        dpid = %ingress.dpid,
        port = ingress.in_port,
        "Answering ARP request"
    );
    southbound.send_packet_out(PacketOut {
        dpid: ingress.dpid,
        buffer_id: None,
        in_port: None,
        outputs: vec![ingress.in_port],
        payload: build_arp_reply_frame(request, owner.mac),
    })?;

    Ok(Disposition::ProxyReply {
        dpid: ingress.dpid,
        port: ingress.in_port,
    })
}

/// Deliver an ARP reply to the host it is addressed to.
pub fn handle_reply<S: Southbound + ?Sized>(
    southbound: &S,
    hosts: &HostTable,
    ingress: &Ingress,
    frame: &Frame,
    reply: &ArpInfo,
    payload: &[u8],
) -> Result<Disposition> {
    let Some(dst) = hosts.lookup_by_mac(&frame.dst_mac) else {
        debug!(
            dst_mac = %frame.dst_mac,
            target_ip = %reply.target_ip,
            "ARP reply for unknown host"
        );
        return Ok(Disposition::Dropped(DropReason::UnknownDestination));
    };
    if dst.dpid == ingress.dpid && dst.port == ingress.in_port {
        return Ok(Disposition::Dropped(DropReason::Hairpin));
    }

    debug!(dst_mac = %dst.mac, dpid = %dst.dpid, port = dst.port, "Forwarding ARP reply");
    southbound.send_packet_out(replay(ingress, dst.dpid, vec![dst.port], payload))?;

    Ok(Disposition::Unicast {
        dpid: dst.dpid,
        port: dst.port,
    })
}

/// Replay a frame out of every host-facing port of every known switch,
/// except the port it came in on.
///
/// Only frames that entered on a host-facing port are broadcast.
pub fn edge_broadcast<S: Southbound + ?Sized>(
    southbound: &S,
    topology: &TopologyStore,
    ingress: &Ingress,
    payload: &[u8],
) -> Result<Disposition> {
    if topology.is_uplink_port(ingress.dpid, ingress.in_port) {
        debug!(dpid = %ingress.dpid, port = ingress.in_port, "Not broadcasting from uplink");
        return Ok(Disposition::Dropped(DropReason::UplinkIngress));
    }

    let mut switches = 0;
    let mut ports = 0;
    for dpid in topology.switches() {
        let mut outputs = topology.host_ports(dpid);
        if dpid == ingress.dpid {
            outputs.retain(|&p| p != ingress.in_port);
        }
        if outputs.is_empty() {
            continue;
        }
        switches += 1;
        ports += outputs.len();
        southbound.send_packet_out(replay(ingress, dpid, outputs, payload))?;
    }

    debug!(dpid = %ingress.dpid, port = ingress.in_port, switches, ports, "Edge broadcast");
    Ok(Disposition::EdgeBroadcast { switches, ports })
}

/// Packet-out re-emitting a packet-in. A switch-side buffer can only be
/// released on the switch that holds it; everywhere else the payload is
/// carried.
fn replay(
    ingress: &Ingress,
    dpid: DatapathId,
    outputs: Vec<PortNo>,
    payload: &[u8],
) -> PacketOut {
    if dpid != ingress.dpid {
        return PacketOut {
            dpid,
            buffer_id: None,
            in_port: None,
            outputs,
            payload: payload.to_vec(),
        };
    }
    PacketOut {
        dpid,
        buffer_id: ingress.buffer_id,
        in_port: Some(ingress.in_port),
        outputs,
        payload: if ingress.buffer_id.is_some() {
            Vec::new()
        } else {
            payload.to_vec()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{PacketKind, classify};
    use crate::test_util::RecordingSouthbound;
    use crate::test_util::packets::arp_request_frame;
    use smoltcp::wire::EthernetAddress;
    use std::collections::BTreeSet;
    use std::net::Ipv4Addr;

    const H1: EthernetAddress = EthernetAddress([0, 0, 0, 0, 0, 0x01]);
    const H2: EthernetAddress = EthernetAddress([0, 0, 0, 0, 0, 0x02]);
    const IP1: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const IP2: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    /// Edge switches 1 and 2 under aggregation switch 3.
    fn topo() -> TopologyStore {
        let mut topo = TopologyStore::new();
        let ports: BTreeSet<PortNo> = [1, 2, 3].into_iter().collect();
        for dpid in 1..=3 {
            topo.on_switch_attach(DatapathId(dpid), &ports);
        }
        topo.on_link_discovered(DatapathId(1), 3, DatapathId(3), 1);
        topo.on_link_discovered(DatapathId(2), 3, DatapathId(3), 2);
        topo
    }

    fn ingress(dpid: u64, in_port: PortNo, buffer_id: Option<u32>) -> Ingress {
        Ingress {
            dpid: DatapathId(dpid),
            in_port,
            buffer_id,
        }
    }

    fn request(frame: &[u8]) -> ArpInfo {
        match classify(frame).unwrap().kind {
            PacketKind::ArpRequest(arp) => arp,
            other => panic!("Expected ARP request, got {other:?}"),
        }
    }

    #[test]
    fn test_edge_broadcast_skips_uplinks_and_ingress() {
        let topo = topo();
        let sb = RecordingSouthbound::new();
        let frame = arp_request_frame(H1, IP1, IP2);

        let out = edge_broadcast(&sb, &topo, &ingress(1, 1, None), &frame).unwrap();
        assert_eq!(out, Disposition::EdgeBroadcast { switches: 3, ports: 4 });

        let outs = sb.packet_outs();
        let targets: Vec<_> = outs.iter().map(|p| (p.dpid, p.outputs.clone())).collect();
        assert_eq!(
            targets,
            vec![
                (DatapathId(1), vec![2]),
                (DatapathId(2), vec![1, 2]),
                (DatapathId(3), vec![3]),
            ]
        );
        for out in &outs {
            for &port in &out.outputs {
                assert!(!topo.is_uplink_port(out.dpid, port));
            }
            assert_eq!(out.payload, frame);
        }
    }

    #[test]
    fn test_edge_broadcast_releases_buffer_on_ingress_only() {
        let topo = topo();
        let sb = RecordingSouthbound::new();
        let frame = arp_request_frame(H1, IP1, IP2);

        edge_broadcast(&sb, &topo, &ingress(1, 1, Some(42)), &frame).unwrap();
        let outs = sb.packet_outs();
        assert_eq!(outs[0].buffer_id, Some(42));
        assert!(outs[0].payload.is_empty());
        assert_eq!(outs[0].in_port, Some(1));
        assert_eq!(outs[1].buffer_id, None);
        assert_eq!(outs[1].payload, frame);
    }

    #[test]
    fn test_edge_broadcast_from_uplink_dropped() {
        let topo = topo();
        let sb = RecordingSouthbound::new();
        let out = edge_broadcast(&sb, &topo, &ingress(3, 1, None), &[]).unwrap();
        assert_eq!(out, Disposition::Dropped(DropReason::UplinkIngress));
        assert!(sb.messages().is_empty());
    }

    #[test]
    fn test_request_answered_from_table() {
        let topo = topo();
        let mut hosts = HostTable::new();
        hosts.learn(&topo, H2, Some(IP2), DatapathId(2), 1);
        let sb = RecordingSouthbound::new();
        let frame = arp_request_frame(H1, IP1, IP2);

        let at = ingress(1, 1, None);
        let out = handle_request(&sb, &topo, &hosts, &at, &request(&frame), &frame).unwrap();
        assert_eq!(
            out,
            Disposition::ProxyReply {
                dpid: DatapathId(1),
                port: 1
            }
        );

        let outs = sb.packet_outs();
        assert_eq!(outs.len(), 1);
        let reply = classify(&outs[0].payload).unwrap();
        assert_eq!(reply.dst_mac, H1);
        match reply.kind {
            PacketKind::ArpReply(arp) => {
                assert_eq!(arp.sender_mac, H2);
                assert_eq!(arp.sender_ip, IP2);
            }
            other => panic!("Expected ARP reply, got {other:?}"),
        }
    }

    #[test]
    fn test_gratuitous_and_self_lookup_dropped() {
        let topo = topo();
        let mut hosts = HostTable::new();
        hosts.learn(&topo, H1, Some(IP1), DatapathId(1), 1);
        let sb = RecordingSouthbound::new();

        let announce = arp_request_frame(H1, IP1, IP1);
        let at = ingress(1, 1, None);
        let out = handle_request(&sb, &topo, &hosts, &at, &request(&announce), &announce).unwrap();
        assert_eq!(out, Disposition::Dropped(DropReason::Gratuitous));

        // Host asks for its own address from a second IP.
        let frame = arp_request_frame(H1, Ipv4Addr::new(10, 0, 0, 9), IP1);
        let out = handle_request(&sb, &topo, &hosts, &at, &request(&frame), &frame).unwrap();
        assert_eq!(out, Disposition::Dropped(DropReason::Gratuitous));
        assert!(sb.messages().is_empty());
    }
}
