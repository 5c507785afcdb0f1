//! k-ary fat-tree topology generator.
//!
//! Builds the three-tier Clos fabric described by Al-Fares et al.:
//! - `(k/2)^2` core switches
//! - `k` pods, each with `k/2` aggregation and `k/2` edge switches
//! - `k/2` hosts below every edge switch
//!
//! Every node numbers its ports from 1 in the order its links were created:
//! host links first, then edge-aggregation, then aggregation-core. This
//! mirrors how an emulator assigns interface numbers when the links are
//! added in the same order, so the port numbers can be fed straight into
//! a controller as discovery events.

use thiserror::Error;

/// Largest supported port count. Pods are encoded in one address octet.
pub const MAX_PORTS: usize = 254;

/// Index of a node inside a [`FatTree`].
pub type NodeIndex = usize;

/// Topology generation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopoError {
    #[error("number of ports (k) must be even for a fat-tree, got {0}")]
    OddPortCount(usize),

    #[error("number of ports (k) must be between 2 and {max}, got {k}")]
    OutOfRange { k: usize, max: usize },
}

/// Role and position of a node in the fabric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Core switch `slot` of core group `group`.
    Core { group: usize, slot: usize },
    /// Aggregation switch `slot` in `pod`.
    Aggregation { pod: usize, slot: usize },
    /// Edge switch `slot` in `pod`.
    Edge { pod: usize, slot: usize },
    /// Host `slot` below edge switch `edge` in `pod`.
    Host { pod: usize, edge: usize, slot: usize },
}

impl NodeKind {
    /// Pod this node belongs to (`None` for core switches).
    pub fn pod(&self) -> Option<usize> {
        match *self {
            NodeKind::Core { .. } => None,
            NodeKind::Aggregation { pod, .. }
            | NodeKind::Edge { pod, .. }
            | NodeKind::Host { pod, .. } => Some(pod),
        }
    }

    pub fn is_switch(&self) -> bool {
        !matches!(self, NodeKind::Host { .. })
    }
}

/// One side of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub node: NodeIndex,
    pub port: u32,
}

/// An undirected link between two node ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub a: Endpoint,
    pub b: Endpoint,
}

impl Link {
    /// The endpoint opposite `node`, if `node` is on this link.
    pub fn other(&self, node: NodeIndex) -> Option<Endpoint> {
        if self.a.node == node {
            Some(self.b)
        } else if self.b.node == node {
            Some(self.a)
        } else {
            None
        }
    }
}

/// A switch or host in the fabric.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// `(local port, peer node)` in port order.
    ports: Vec<(u32, NodeIndex)>,
}

impl Node {
    fn new(name: String, kind: NodeKind) -> Self {
        Self {
            name,
            kind,
            ports: Vec::new(),
        }
    }

    pub fn ports(&self) -> &[(u32, NodeIndex)] {
        &self.ports
    }

    pub fn degree(&self) -> usize {
        self.ports.len()
    }
}

/// A generated k-ary fat-tree.
#[derive(Debug, Clone)]
pub struct FatTree {
    k: usize,
    nodes: Vec<Node>,
    links: Vec<Link>,
    core: Vec<NodeIndex>,
    aggregation: Vec<Vec<NodeIndex>>,
    edge: Vec<Vec<NodeIndex>>,
    hosts: Vec<NodeIndex>,
}

impl FatTree {
    /// Generate a fat-tree built from `k`-port switches.
    pub fn new(k: usize) -> Result<Self, TopoError> {
        if !(2..=MAX_PORTS).contains(&k) {
            return Err(TopoError::OutOfRange { k, max: MAX_PORTS });
        }
        if k % 2 != 0 {
            return Err(TopoError::OddPortCount(k));
        }

        let half = k / 2;
        let mut tree = FatTree {
            k,
            nodes: Vec::new(),
            links: Vec::new(),
            core: Vec::with_capacity(half * half),
            aggregation: vec![Vec::with_capacity(half); k],
            edge: vec![Vec::with_capacity(half); k],
            hosts: Vec::with_capacity(k * half * half),
        };

        // Switches first so that their indices are dense from zero.
        for group in 0..half {
            for slot in 0..half {
                let idx = tree.add_node(
                    format!("c{group}_{slot}"),
                    NodeKind::Core { group, slot },
                );
                tree.core.push(idx);
            }
        }

        for pod in 0..k {
            for slot in 0..half {
                let idx = tree.add_node(
                    format!("a{pod}_{slot}"),
                    NodeKind::Aggregation { pod, slot },
                );
                tree.aggregation[pod].push(idx);
            }
            for slot in 0..half {
                let idx = tree.add_node(format!("e{pod}_{slot}"), NodeKind::Edge { pod, slot });
                tree.edge[pod].push(idx);
            }
        }

        for pod in 0..k {
            for edge in 0..half {
                let edge_switch = tree.edge[pod][edge];
                for slot in 0..half {
                    let host = tree.add_node(
                        format!("h{pod}_{edge}_{slot}"),
                        NodeKind::Host { pod, edge, slot },
                    );
                    tree.hosts.push(host);
                    tree.connect(edge_switch, host);
                }
            }
        }

        for pod in 0..k {
            for e in 0..half {
                for a in 0..half {
                    tree.connect(tree.edge[pod][e], tree.aggregation[pod][a]);
                }
            }
        }

        // Aggregation switch `a` of every pod connects to core column `a`.
        for pod in 0..k {
            for a in 0..half {
                for group in 0..half {
                    let core = tree.core[group * half + a];
                    tree.connect(tree.aggregation[pod][a], core);
                }
            }
        }

        Ok(tree)
    }

    fn add_node(&mut self, name: String, kind: NodeKind) -> NodeIndex {
        self.nodes.push(Node::new(name, kind));
        self.nodes.len() - 1
    }

    fn connect(&mut self, a: NodeIndex, b: NodeIndex) {
        let port_a = self.nodes[a].ports.len() as u32 + 1;
        let port_b = self.nodes[b].ports.len() as u32 + 1;
        self.nodes[a].ports.push((port_a, b));
        self.nodes[b].ports.push((port_b, a));
        self.links.push(Link {
            a: Endpoint { node: a, port: port_a },
            b: Endpoint { node: b, port: port_b },
        });
    }

    /// Switch port count this fabric was built for.
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Links whose both ends are switches.
    pub fn switch_links(&self) -> impl Iterator<Item = &Link> + '_ {
        self.links
            .iter()
            .filter(|l| {
                self.nodes[l.a.node].kind.is_switch() && self.nodes[l.b.node].kind.is_switch()
            })
    }

    pub fn core_switches(&self) -> &[NodeIndex] {
        &self.core
    }

    pub fn aggregation_switches(&self, pod: usize) -> &[NodeIndex] {
        self.aggregation.get(pod).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edge_switches(&self, pod: usize) -> &[NodeIndex] {
        self.edge.get(pod).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn hosts(&self) -> &[NodeIndex] {
        &self.hosts
    }

    /// Number of switches. Switch indices are `0..switch_count()`.
    pub fn switch_count(&self) -> usize {
        self.core.len() + self.aggregation.iter().chain(&self.edge).map(Vec::len).sum::<usize>()
    }

    pub fn switches(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        0..self.switch_count()
    }

    /// Peer nodes of `idx` in port order.
    pub fn neighbors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes
            .get(idx)
            .into_iter()
            .flat_map(|n| n.ports.iter().map(|&(_, peer)| peer))
    }

    /// Edge switch port a host is plugged into.
    pub fn attachment(&self, host: NodeIndex) -> Option<Endpoint> {
        let node = self.nodes.get(host)?;
        if node.kind.is_switch() {
            return None;
        }
        let &(_, switch) = node.ports.first()?;
        let port = self.nodes[switch]
            .ports
            .iter()
            .find(|&&(_, peer)| peer == host)
            .map(|&(port, _)| port)?;
        Some(Endpoint { node: switch, port })
    }

    /// Index of a node by name.
    pub fn find(&self, name: &str) -> Option<NodeIndex> {
        self.nodes.iter().position(|n| n.name == name)
    }
}
