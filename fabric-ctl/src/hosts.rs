//! Host location table.
//!
//! Maps a host's MAC (and IPv4 address) to the switch port it was last
//! seen on. Bindings are only learned from host-facing ports; traffic
//! arriving over an uplink says where a packet travelled, not where the
//! sender lives.

use crate::event::{DatapathId, PortNo};
use crate::topology::TopologyStore;
use chrono::{DateTime, Utc};
use smoltcp::wire::EthernetAddress;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::{debug, info};

/// Where a host is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBinding {
    pub mac: EthernetAddress,
    pub ip: Option<Ipv4Addr>,
    pub dpid: DatapathId,
    pub port: PortNo,
    /// When the host was first seen at this location.
    pub learned_at: DateTime<Utc>,
}

impl HostBinding {
    fn same_location(&self, dpid: DatapathId, port: PortNo) -> bool {
        self.dpid == dpid && self.port == port
    }
}

/// Outcome of [`HostTable::learn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnOutcome {
    /// First binding for this MAC.
    Learned,
    /// The MAC moved to another port, changed its IP, or reclaimed its IP
    /// from another MAC.
    Moved,
    /// Identical binding already present; nothing was written.
    Unchanged,
    /// Uplink port or non-unicast source; nothing was written.
    Ignored,
}

#[derive(Debug, Default, Clone)]
pub struct HostTable {
    by_mac: HashMap<EthernetAddress, HostBinding>,
    by_ip: HashMap<Ipv4Addr, EthernetAddress>,
}

impl HostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn (or refresh) the location of `mac`.
    ///
    /// `ip` is `None` when the packet carried no usable source address
    /// (e.g. an ARP probe from `0.0.0.0`).
    pub fn learn(
        &mut self,
        topology: &TopologyStore,
        mac: EthernetAddress,
        ip: Option<Ipv4Addr>,
        dpid: DatapathId,
        port: PortNo,
    ) -> LearnOutcome {
        if !mac.is_unicast() || topology.is_uplink_port(dpid, port) {
            return LearnOutcome::Ignored;
        }
        let ip = ip.filter(|ip| !ip.is_unspecified() && !ip.is_broadcast());

        match self.by_mac.get_mut(&mac) {
            Some(binding) if binding.same_location(dpid, port) => {
                match ip {
                    Some(ip) if binding.ip != Some(ip) => {
                        let old = binding.ip.replace(ip);
                        if let Some(old) = old {
                            Self::unlink_ip(&mut self.by_ip, old, mac);
                        }
                        self.by_ip.insert(ip, mac);
                        info!(%mac, %ip, %dpid, port, "Host changed address");
                        LearnOutcome::Moved
                    }
                    // Same binding, but another MAC claimed the address meanwhile.
                    Some(ip) if self.by_ip.get(&ip) != Some(&mac) => {
                        self.by_ip.insert(ip, mac);
                        info!(%mac, %ip, %dpid, port, "Host reclaimed address");
                        LearnOutcome::Moved
                    }
                    _ => LearnOutcome::Unchanged,
                }
            }
            Some(binding) => {
                let old_ip = binding.ip;
                binding.dpid = dpid;
                binding.port = port;
                binding.learned_at = Utc::now();
                if let Some(ip) = ip {
                    binding.ip = Some(ip);
                }
                let new_ip = binding.ip;
                if let Some(old) = old_ip
                    && new_ip != Some(old)
                {
                    Self::unlink_ip(&mut self.by_ip, old, mac);
                }
                if let Some(ip) = new_ip {
                    self.by_ip.insert(ip, mac);
                }
                info!(%mac, ip = ?new_ip, %dpid, port, "Host moved");
                LearnOutcome::Moved
            }
            None => {
                self.by_mac.insert(
                    mac,
                    HostBinding {
                        mac,
                        ip,
                        dpid,
                        port,
                        learned_at: Utc::now(),
                    },
                );
                if let Some(ip) = ip {
                    self.by_ip.insert(ip, mac);
                }
                info!(%mac, ip = ?ip, %dpid, port, "Host learned");
                LearnOutcome::Learned
            }
        }
    }

    fn unlink_ip(
        by_ip: &mut HashMap<Ipv4Addr, EthernetAddress>,
        ip: Ipv4Addr,
        mac: EthernetAddress,
    ) {
        if by_ip.get(&ip) == Some(&mac) {
            by_ip.remove(&ip);
        }
    }

    pub fn lookup_by_mac(&self, mac: &EthernetAddress) -> Option<&HostBinding> {
        self.by_mac.get(mac)
    }

    pub fn lookup_by_ip(&self, ip: Ipv4Addr) -> Option<&HostBinding> {
        self.by_ip.get(&ip).and_then(|mac| self.by_mac.get(mac))
    }

    /// Drop every binding located on `dpid`. Returns the number removed.
    pub fn evict_switch(&mut self, dpid: DatapathId) -> usize {
        let before = self.by_mac.len();
        self.by_mac.retain(|_, b| b.dpid != dpid);
        let by_mac = &self.by_mac;
        self.by_ip.retain(|_, mac| by_mac.contains_key(mac));

        let evicted = before - self.by_mac.len();
        if evicted > 0 {
            debug!(%dpid, evicted, "Evicted hosts of detached switch");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.by_mac.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_mac.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostBinding> + '_ {
        self.by_mac.values()
    }
}
