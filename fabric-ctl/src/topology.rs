//! Topology store: switches, their ports, and discovered adjacency.
//!
//! Adjacency is kept per switch as `neighbor -> local port`. Links are
//! always recorded in both directions, so the graph is undirected for path
//! computation. A port that leads to another switch is an uplink; every
//! other attached port faces a host. A port whose peer switch detached stays
//! an uplink until discovery reports something else on it.

use crate::event::{DatapathId, PortNo, is_physical_port};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Result of recording a discovered link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    /// Neither direction was known.
    New,
    /// Both directions were already recorded with the same ports.
    Duplicate,
    /// The link existed but at least one side moved to another port.
    Updated,
}

#[derive(Debug, Default, Clone)]
struct SwitchEntry {
    ports: BTreeSet<PortNo>,
    neighbors: BTreeMap<DatapathId, PortNo>,
    /// Uplinks whose neighbor detached.
    orphaned: BTreeSet<PortNo>,
}

impl SwitchEntry {
    fn is_uplink(&self, port: PortNo) -> bool {
        self.orphaned.contains(&port) || self.neighbors.values().any(|&p| p == port)
    }
}

/// In-memory view of the fabric built from attach and discovery events.
#[derive(Debug, Default, Clone)]
pub struct TopologyStore {
    switches: BTreeMap<DatapathId, SwitchEntry>,
}

impl TopologyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a switch and its physical ports.
    ///
    /// A switch that re-attaches keeps its adjacency; only the port set is
    /// refreshed. Returns true if the switch was not known before.
    pub fn on_switch_attach(&mut self, dpid: DatapathId, ports: &BTreeSet<PortNo>) -> bool {
        let ports: BTreeSet<PortNo> = ports
            .iter()
            .copied()
            .filter(|&p| is_physical_port(p))
            .collect();
        let is_new = !self.switches.contains_key(&dpid);
        let entry = self.switches.entry(dpid).or_default();
        entry.orphaned.retain(|p| ports.contains(p));
        entry.ports = ports;

        if is_new {
            info!(%dpid, ports = entry.ports.len(), "Switch attached");
        } else {
            debug!(%dpid, ports = entry.ports.len(), "Switch re-attached");
        }
        is_new
    }

    /// Forget a switch and every adjacency entry pointing at it.
    ///
    /// The neighbors' ports that led to it keep counting as uplinks.
    pub fn on_switch_detach(&mut self, dpid: DatapathId) -> bool {
        if self.switches.remove(&dpid).is_none() {
            return false;
        }
        for entry in self.switches.values_mut() {
            if let Some(port) = entry.neighbors.remove(&dpid) {
                entry.orphaned.insert(port);
            }
        }
        info!(%dpid, "Switch detached");
        true
    }

    /// Record a link in both directions.
    ///
    /// Endpoints that have not attached yet are registered without ports.
    pub fn on_link_discovered(
        &mut self,
        src: DatapathId,
        src_port: PortNo,
        dst: DatapathId,
        dst_port: PortNo,
    ) -> LinkChange {
        let forward = self.record_neighbor(src, src_port, dst);
        let reverse = self.record_neighbor(dst, dst_port, src);

        let change = match (forward, reverse) {
            (None, None) => LinkChange::New,
            (Some(a), Some(b)) if a == src_port && b == dst_port => LinkChange::Duplicate,
            // One direction was learned from an earlier event.
            (Some(a), None) if a == src_port => LinkChange::New,
            (None, Some(b)) if b == dst_port => LinkChange::New,
            _ => LinkChange::Updated,
        };

        match change {
            LinkChange::New => info!(%src, src_port, %dst, dst_port, "Link discovered"),
            LinkChange::Updated => info!(%src, src_port, %dst, dst_port, "Link ports changed"),
            LinkChange::Duplicate => {}
        }
        change
    }

    fn record_neighbor(
        &mut self,
        dpid: DatapathId,
        port: PortNo,
        neighbor: DatapathId,
    ) -> Option<PortNo> {
        let entry = self.switches.entry(dpid).or_default();
        entry.orphaned.remove(&port);
        entry.neighbors.insert(neighbor, port)
    }

    pub fn contains(&self, dpid: DatapathId) -> bool {
        self.switches.contains_key(&dpid)
    }

    /// Known switches in ascending dpid order.
    pub fn switches(&self) -> impl Iterator<Item = DatapathId> + '_ {
        self.switches.keys().copied()
    }

    pub fn switch_count(&self) -> usize {
        self.switches.len()
    }

    /// Number of undirected links.
    pub fn link_count(&self) -> usize {
        let directed: usize = self.switches.values().map(|e| e.neighbors.len()).sum();
        directed.div_ceil(2)
    }

    /// Neighbors of `dpid` with the local port used to reach each one.
    /// Empty for unknown switches.
    pub fn neighbors(&self, dpid: DatapathId) -> impl Iterator<Item = (DatapathId, PortNo)> + '_ {
        self.switches
            .get(&dpid)
            .into_iter()
            .flat_map(|e| e.neighbors.iter().map(|(&n, &p)| (n, p)))
    }

    /// Local port on `src` leading to `dst`.
    pub fn port_to(&self, src: DatapathId, dst: DatapathId) -> Option<PortNo> {
        self.switches.get(&src)?.neighbors.get(&dst).copied()
    }

    /// True iff `port` leads from `dpid` to another switch.
    pub fn is_uplink_port(&self, dpid: DatapathId, port: PortNo) -> bool {
        self.switches.get(&dpid).is_some_and(|e| e.is_uplink(port))
    }

    /// Attached ports of `dpid` that do not lead to another switch.
    pub fn host_ports(&self, dpid: DatapathId) -> Vec<PortNo> {
        self.switches
            .get(&dpid)
            .map(|e| e.ports.iter().copied().filter(|&p| !e.is_uplink(p)).collect())
            .unwrap_or_default()
    }
}
