//! Shortest-path computation over the discovered topology.
//!
//! Dijkstra with unit edge weights, so distances are hop counts. The heap
//! pops equal distances in ascending dpid order and neighbors are visited
//! in ascending dpid order; the first predecessor that reaches a switch at
//! its final distance wins. Equal-cost paths are therefore resolved the same
//! way every time, but that is not a load-balancing policy.

use crate::event::DatapathId;
use crate::topology::TopologyStore;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Weight of every link.
const LINK_WEIGHT: u32 = 1;

/// Distances and predecessors from one source switch.
#[derive(Debug, Clone)]
pub struct ShortestPathTree {
    source: DatapathId,
    dist: HashMap<DatapathId, u32>,
    prev: HashMap<DatapathId, DatapathId>,
}

impl ShortestPathTree {
    /// Run Dijkstra from `source`. An unknown source yields an empty tree.
    pub fn compute(topology: &TopologyStore, source: DatapathId) -> Self {
        let mut tree = ShortestPathTree {
            source,
            dist: HashMap::new(),
            prev: HashMap::new(),
        };
        if !topology.contains(source) {
            return tree;
        }

        let mut heap = BinaryHeap::new();
        tree.dist.insert(source, 0);
        heap.push(Reverse((0u32, source)));

        while let Some(Reverse((d, u))) = heap.pop() {
            if tree.dist.get(&u).is_some_and(|&best| d > best) {
                continue;
            }
            for (v, _) in topology.neighbors(u) {
                let alt = d + LINK_WEIGHT;
                if tree.dist.get(&v).is_none_or(|&cur| alt < cur) {
                    tree.dist.insert(v, alt);
                    tree.prev.insert(v, u);
                    heap.push(Reverse((alt, v)));
                }
            }
        }
        tree
    }

    pub fn source(&self) -> DatapathId {
        self.source
    }

    /// Hop count to `dst`, `None` if unreachable.
    pub fn distance(&self, dst: DatapathId) -> Option<u32> {
        self.dist.get(&dst).copied()
    }

    /// Switches from the source to `dst`, both inclusive.
    pub fn path_to(&self, dst: DatapathId) -> Option<Vec<DatapathId>> {
        self.distance(dst)?;

        let mut path = vec![dst];
        let mut cur = dst;
        while let Some(&p) = self.prev.get(&cur) {
            path.push(p);
            cur = p;
        }
        path.reverse();

        (path.first() == Some(&self.source)).then_some(path)
    }
}

/// Shortest path from `src` to `dst`, both inclusive.
///
/// Returns `None` if either switch is unknown or `dst` is unreachable.
pub fn shortest_path(
    topology: &TopologyStore,
    src: DatapathId,
    dst: DatapathId,
) -> Option<Vec<DatapathId>> {
    if !topology.contains(dst) {
        return None;
    }
    ShortestPathTree::compute(topology, src).path_to(dst)
}
