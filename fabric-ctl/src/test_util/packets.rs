//! Host frame builders for tests
//!
//! Thin wrappers over the builders in [`crate::packet`] with the argument
//! order tests read best in.

use crate::packet::{
    build_arp, build_arp_request_frame, build_ethernet_frame, build_icmp_echo_frame,
};
use smoltcp::wire::{ArpOperation, EthernetAddress, EthernetProtocol};
use std::net::Ipv4Addr;

/// Broadcast ARP request from `sender` asking for `target_ip`.
pub fn arp_request_frame(
    sender_mac: EthernetAddress,
    sender_ip: Ipv4Addr,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    build_arp_request_frame(sender_mac, sender_ip, target_ip)
}

/// ARP reply from `sender` addressed to `target`.
pub fn arp_reply_frame(
    sender_mac: EthernetAddress,
    sender_ip: Ipv4Addr,
    target_mac: EthernetAddress,
    target_ip: Ipv4Addr,
) -> Vec<u8> {
    let arp = build_arp(
        ArpOperation::Reply,
        (sender_mac, sender_ip),
        (target_mac, target_ip),
    );
    build_ethernet_frame(target_mac, sender_mac, EthernetProtocol::Arp, &arp)
}

/// ICMP echo request between two hosts.
pub fn ipv4_frame(
    src_mac: EthernetAddress,
    dst_mac: EthernetAddress,
    src_ip: Ipv4Addr,
    dst_ip: Ipv4Addr,
) -> Vec<u8> {
    build_icmp_echo_frame((src_mac, src_ip), (dst_mac, dst_ip), 1, 1)
}

/// Broadcast frame with an arbitrary EtherType.
pub fn raw_frame(src_mac: EthernetAddress, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    build_ethernet_frame(
        EthernetAddress::BROADCAST,
        src_mac,
        EthernetProtocol::from(ethertype),
        payload,
    )
}
