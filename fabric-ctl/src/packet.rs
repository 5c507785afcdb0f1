//! Packet parsing and building using smoltcp
//!
//! Classifies packet-in payloads into ARP requests, ARP replies, IPv4 and
//! everything else, and builds the ARP replies the controller answers with.

use smoltcp::phy::ChecksumCapabilities;
use smoltcp::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    EthernetRepr, Icmpv4Packet, Icmpv4Repr, IpProtocol, Ipv4Packet, Ipv4Repr,
};
use std::net::Ipv4Addr;

/// EtherType used by link-layer discovery (LLDP).
pub const ETHERTYPE_LLDP: u16 = 0x88cc;

/// Addresses carried by an Ethernet/IPv4 ARP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpInfo {
    pub sender_mac: EthernetAddress,
    pub sender_ip: Ipv4Addr,
    pub target_mac: EthernetAddress,
    pub target_ip: Ipv4Addr,
}

impl ArpInfo {
    /// A request or announcement for the sender's own address.
    pub fn is_gratuitous(&self) -> bool {
        self.sender_ip == self.target_ip
    }
}

/// Addresses carried by an IPv4 packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Info {
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
}

/// Classification of a packet-in payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    ArpRequest(ArpInfo),
    ArpReply(ArpInfo),
    Ipv4(Ipv4Info),
    /// Any other EtherType (LLDP, IPv6, ...).
    Other(u16),
}

/// A classified Ethernet frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub src_mac: EthernetAddress,
    pub dst_mac: EthernetAddress,
    pub kind: PacketKind,
}

impl Frame {
    /// Source IPv4 address, if the frame carries one.
    pub fn src_ip(&self) -> Option<Ipv4Addr> {
        match self.kind {
            PacketKind::ArpRequest(arp) | PacketKind::ArpReply(arp) => Some(arp.sender_ip),
            PacketKind::Ipv4(ip) => Some(ip.src_ip),
            PacketKind::Other(_) => None,
        }
    }
}

/// Parse an Ethernet frame
pub fn parse_ethernet(data: &[u8]) -> Option<EthernetFrame<&[u8]>> {
    EthernetFrame::new_checked(data).ok()
}

/// Parse an ARP packet from Ethernet payload
pub fn parse_arp(data: &[u8]) -> Option<ArpRepr> {
    let packet = ArpPacket::new_checked(data).ok()?;
    ArpRepr::parse(&packet).ok()
}

/// Classify a raw frame. Returns `None` for truncated or malformed frames.
pub fn classify(data: &[u8]) -> Option<Frame> {
    let eth = parse_ethernet(data)?;
    let src_mac = eth.src_addr();
    let dst_mac = eth.dst_addr();

    let kind = match eth.ethertype() {
        EthernetProtocol::Arp => match parse_arp(eth.payload())? {
            ArpRepr::EthernetIpv4 {
                operation,
                source_hardware_addr,
                source_protocol_addr,
                target_hardware_addr,
                target_protocol_addr,
            } => {
                let info = ArpInfo {
                    sender_mac: source_hardware_addr,
                    sender_ip: source_protocol_addr,
                    target_mac: target_hardware_addr,
                    target_ip: target_protocol_addr,
                };
                match operation {
                    ArpOperation::Request => PacketKind::ArpRequest(info),
                    ArpOperation::Reply => PacketKind::ArpReply(info),
                    _ => return None,
                }
            }
            _ => return None,
        },
        EthernetProtocol::Ipv4 => {
            let ip = Ipv4Packet::new_checked(eth.payload()).ok()?;
            PacketKind::Ipv4(Ipv4Info {
                src_ip: ip.src_addr(),
                dst_ip: ip.dst_addr(),
            })
        }
        other => PacketKind::Other(u16::from(other)),
    };

    Some(Frame {
        src_mac,
        dst_mac,
        kind,
    })
}

/// Build an Ethernet frame with the given payload
pub fn build_ethernet_frame(
    dst_mac: EthernetAddress,
    src_mac: EthernetAddress,
    ethertype: EthernetProtocol,
    payload: &[u8],
) -> Vec<u8> {
    let repr = EthernetRepr {
        src_addr: src_mac,
        dst_addr: dst_mac,
        ethertype,
    };

    let mut buffer = vec![0u8; repr.buffer_len() + payload.len()];
    let mut frame = EthernetFrame::new_unchecked(&mut buffer);
    repr.emit(&mut frame);
    frame.payload_mut().copy_from_slice(payload);
    buffer
}

/// Build an ARP packet
pub fn build_arp(
    operation: ArpOperation,
    sender: (EthernetAddress, Ipv4Addr),
    target: (EthernetAddress, Ipv4Addr),
) -> Vec<u8> {
    let repr = ArpRepr::EthernetIpv4 {
        operation,
        source_hardware_addr: sender.0,
        source_protocol_addr: sender.1,
        target_hardware_addr: target.0,
        target_protocol_addr: target.1,
    };

    let mut buffer = vec![0u8; repr.buffer_len()];
    let mut packet = ArpPacket::new_unchecked(&mut buffer);
    repr.emit(&mut packet);
    buffer
}

/// Build a broadcast ARP request asking for `target_ip`
pub fn build_arp_request_frame(
    sender_mac: EthernetAddress,
    sender_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let arp_payload = build_arp(
        ArpOperation::Request,
        (sender_mac, sender_ip),
        (EthernetAddress([0; 6]), target_ip),
    );
    build_ethernet_frame(
        EthernetAddress::BROADCAST,
        sender_mac,
        EthernetProtocol::Arp,
        &arp_payload,
    )
}

/// Build an ICMP echo request frame
pub fn build_icmp_echo_frame(
    src: (EthernetAddress, Ipv4Addr),
    dst: (EthernetAddress, Ipv4Addr),
    ident: u16,
    seq_no: u16,
) -> Vec<u8> {
    let data = b"fabric-ctl ping";
    let icmp_repr = Icmpv4Repr::EchoRequest {
        ident,
        seq_no,
        data,
    };
    let ip_repr = Ipv4Repr {
        src_addr: src.1,
        dst_addr: dst.1,
        next_header: IpProtocol::Icmp,
        payload_len: icmp_repr.buffer_len(),
        hop_limit: 64,
    };

    let mut ip_buffer = vec![0u8; ip_repr.buffer_len() + icmp_repr.buffer_len()];
    let mut ip_packet = Ipv4Packet::new_unchecked(&mut ip_buffer);
    ip_repr.emit(&mut ip_packet, &ChecksumCapabilities::default());
    let mut icmp_packet = Icmpv4Packet::new_unchecked(ip_packet.payload_mut());
    icmp_repr.emit(&mut icmp_packet, &ChecksumCapabilities::default());

    build_ethernet_frame(dst.0, src.0, EthernetProtocol::Ipv4, &ip_buffer)
}

/// Build a complete ARP reply frame answering `request` on behalf of
/// `owner_mac`, the host that holds `request.target_ip`.
pub fn build_arp_reply_frame(request: &ArpInfo, owner_mac: EthernetAddress) -> Vec<u8> {
    let arp_payload = build_arp(
        ArpOperation::Reply,
        (owner_mac, request.target_ip),
        (request.sender_mac, request.sender_ip),
    );
    build_ethernet_frame(request.sender_mac, owner_mac, EthernetProtocol::Arp, &arp_payload)
}
