//! Constellation Graph
//!
//! Data model shared by every stage of the constellation simulation:
//!
//! - Satellite network graph (satellites + inter-satellite links)
//! - Ground grid cells, demand weights and satellite coverage
//! - Source-destination pairs, paths and load-balancing sets
//! - Directed edge keys with a reserved ground index
//! - Keyed tables that persist cleanly as JSON

use petgraph::algo::connected_components;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod geo;
pub mod ground;
pub mod route;
pub mod table;

pub use ground::{Access, CellId, Coverage, GeoPoint, GridPos, SatPosition, SatPositions, SdPair};
pub use route::{EdgeKey, LbSet, Path, GROUND};
pub use table::KeyedTable;

/// Satellite identifier (dense, assigned by the constellation generator)
pub type SatId = u32;

/// Graph errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("Satellite not found: {0}")]
    SatelliteNotFound(SatId),
    #[error("Satellite already present: {0}")]
    DuplicateSatellite(SatId),
    #[error("Self-loop link on satellite {0}")]
    SelfLoop(SatId),
}

pub type Result<T> = std::result::Result<T, GraphError>;

/// A satellite node in the network graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SatNode {
    pub id: SatId,
    /// Orbital plane index
    pub plane: u32,
    /// Slot within the plane
    pub slot: u32,
}

/// An inter-satellite link
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IslLink {
    /// Straight-line length between the two satellites (km)
    pub length_km: f64,
    /// Whether the link is currently usable
    pub active: bool,
}

impl IslLink {
    pub fn new(length_km: f64) -> Self {
        Self {
            length_km,
            active: true,
        }
    }

    /// Routing cost of the link (lower = better)
    pub fn cost(&self) -> f64 {
        if !self.active {
            return f64::INFINITY;
        }
        self.length_km
    }
}

/// The satellite network graph.
///
/// Built once per configuration and shared read-only by every per-pair
/// computation of a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "GraphRecord", from = "GraphRecord")]
pub struct NetworkGraph {
    graph: UnGraph<SatNode, IslLink>,
    node_index: HashMap<SatId, NodeIndex>,
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self {
            graph: UnGraph::new_undirected(),
            node_index: HashMap::new(),
        }
    }

    /// Add a satellite to the graph
    pub fn add_satellite(&mut self, node: SatNode) -> Result<NodeIndex> {
        if self.node_index.contains_key(&node.id) {
            return Err(GraphError::DuplicateSatellite(node.id));
        }
        let id = node.id;
        let idx = self.graph.add_node(node);
        self.node_index.insert(id, idx);
        Ok(idx)
    }

    /// Add an undirected link between two satellites
    pub fn add_link(&mut self, a: SatId, b: SatId, link: IslLink) -> Result<()> {
        if a == b {
            return Err(GraphError::SelfLoop(a));
        }
        let a_idx = self.index_of(a)?;
        let b_idx = self.index_of(b)?;
        self.graph.update_edge(a_idx, b_idx, link);
        Ok(())
    }

    fn index_of(&self, sat: SatId) -> Result<NodeIndex> {
        self.node_index
            .get(&sat)
            .copied()
            .ok_or(GraphError::SatelliteNotFound(sat))
    }

    pub fn contains(&self, sat: SatId) -> bool {
        self.node_index.contains_key(&sat)
    }

    /// Get a satellite node by ID
    pub fn satellite(&self, sat: SatId) -> Option<&SatNode> {
        self.node_index.get(&sat).map(|idx| &self.graph[*idx])
    }

    /// All satellites in insertion order
    pub fn satellites(&self) -> impl Iterator<Item = &SatNode> {
        self.graph.node_weights()
    }

    /// Neighbouring satellites with the link that reaches them
    pub fn neighbors(&self, sat: SatId) -> impl Iterator<Item = (SatId, &IslLink)> + '_ {
        let idx = self.node_index.get(&sat).copied();
        idx.into_iter().flat_map(move |idx| {
            self.graph.edges(idx).map(move |e| {
                let other = if e.source() == idx { e.target() } else { e.source() };
                (self.graph[other].id, e.weight())
            })
        })
    }

    /// The link between two satellites, if any
    pub fn link(&self, a: SatId, b: SatId) -> Option<&IslLink> {
        let a_idx = self.node_index.get(&a)?;
        let b_idx = self.node_index.get(&b)?;
        self.graph
            .find_edge(*a_idx, *b_idx)
            .map(|edge| &self.graph[edge])
    }

    /// All links as `(a, b, link)` with `a < b`
    pub fn links(&self) -> impl Iterator<Item = (SatId, SatId, &IslLink)> {
        self.graph.edge_references().map(move |e| {
            let a = self.graph[e.source()].id;
            let b = self.graph[e.target()].id;
            (a.min(b), a.max(b), e.weight())
        })
    }

    /// Total ISL cost of a satellite sequence, `None` if a hop has no link
    pub fn path_cost(&self, sats: &[SatId]) -> Option<f64> {
        let mut total = 0.0;
        for hop in sats.windows(2) {
            total += self.link(hop[0], hop[1])?.cost();
        }
        Some(total)
    }

    pub fn satellite_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Number of connected components (1 for a healthy constellation)
    pub fn component_count(&self) -> usize {
        connected_components(&self.graph)
    }

    /// Get graph statistics
    pub fn stats(&self) -> GraphStats {
        let active_links = self.graph.edge_weights().filter(|l| l.active).count();
        let total_length_km: f64 = self.graph.edge_weights().map(|l| l.length_km).sum();
        let planes = self
            .satellites()
            .map(|s| s.plane)
            .collect::<std::collections::BTreeSet<_>>()
            .len();

        GraphStats {
            satellites: self.satellite_count(),
            planes,
            links: self.link_count(),
            active_links,
            components: self.component_count(),
            mean_link_km: if self.link_count() > 0 {
                total_length_km / self.link_count() as f64
            } else {
                0.0
            },
        }
    }

    fn to_record(&self) -> GraphRecord {
        GraphRecord {
            satellites: self.satellites().cloned().collect(),
            links: self
                .graph
                .edge_references()
                .map(|e| LinkRecord {
                    a: self.graph[e.source()].id,
                    b: self.graph[e.target()].id,
                    link: e.weight().clone(),
                })
                .collect(),
        }
    }
}

impl Default for NetworkGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for NetworkGraph {
    fn eq(&self, other: &Self) -> bool {
        self.to_record() == other.to_record()
    }
}

/// Flat serialized form of [`NetworkGraph`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct GraphRecord {
    satellites: Vec<SatNode>,
    links: Vec<LinkRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct LinkRecord {
    a: SatId,
    b: SatId,
    link: IslLink,
}

impl From<NetworkGraph> for GraphRecord {
    fn from(graph: NetworkGraph) -> Self {
        graph.to_record()
    }
}

impl From<GraphRecord> for NetworkGraph {
    fn from(record: GraphRecord) -> Self {
        let mut graph = NetworkGraph::new();
        for sat in record.satellites {
            // Records are produced by `to_record`, so ids are unique
            let _ = graph.add_satellite(sat);
        }
        for l in record.links {
            let _ = graph.add_link(l.a, l.b, l.link);
        }
        graph
    }
}

/// Graph statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub satellites: usize,
    pub planes: usize,
    pub links: usize,
    pub active_links: usize,
    pub components: usize,
    pub mean_link_km: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_ring(n: u32) -> NetworkGraph {
        let mut graph = NetworkGraph::new();
        for id in 0..n {
            graph
                .add_satellite(SatNode { id, plane: 0, slot: id })
                .unwrap();
        }
        for id in 0..n {
            graph
                .add_link(id, (id + 1) % n, IslLink::new(1000.0))
                .unwrap();
        }
        graph
    }

    #[test]
    fn test_ring_stats() {
        let graph = create_ring(5);
        let stats = graph.stats();

        assert_eq!(stats.satellites, 5);
        assert_eq!(stats.links, 5);
        assert_eq!(stats.components, 1);
        assert_eq!(stats.planes, 1);
        assert!((stats.mean_link_km - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_neighbors_and_links() {
        let graph = create_ring(5);

        let mut neighbors: Vec<SatId> = graph.neighbors(0).map(|(s, _)| s).collect();
        neighbors.sort();
        assert_eq!(neighbors, vec![1, 4]);

        assert!(graph.link(0, 1).is_some());
        assert!(graph.link(1, 0).is_some());
        assert!(graph.link(0, 2).is_none());
        assert_eq!(graph.neighbors(42).count(), 0);
    }

    #[test]
    fn test_path_cost() {
        let graph = create_ring(5);

        assert_eq!(graph.path_cost(&[0, 1, 2]), Some(2000.0));
        assert_eq!(graph.path_cost(&[3]), Some(0.0));
        assert_eq!(graph.path_cost(&[0, 2]), None);
    }

    #[test]
    fn test_invalid_links() {
        let mut graph = create_ring(3);

        assert_eq!(
            graph.add_link(0, 9, IslLink::new(1.0)),
            Err(GraphError::SatelliteNotFound(9))
        );
        assert_eq!(graph.add_link(1, 1, IslLink::new(1.0)), Err(GraphError::SelfLoop(1)));
        assert!(graph.add_satellite(SatNode { id: 0, plane: 0, slot: 0 }).is_err());
    }

    #[test]
    fn test_inactive_link_cost() {
        let mut link = IslLink::new(500.0);
        assert_eq!(link.cost(), 500.0);
        link.active = false;
        assert!(link.cost().is_infinite());
    }

    #[test]
    fn test_serde_roundtrip_preserves_graph() {
        let graph = create_ring(4);
        let json = serde_json::to_string(&graph).unwrap();
        let restored: NetworkGraph = serde_json::from_str(&json).unwrap();

        assert_eq!(graph, restored);
        assert_eq!(restored.link_count(), 4);
    }

    #[test]
    fn test_split_graph_components() {
        let mut graph = create_ring(3);
        graph.add_satellite(SatNode { id: 7, plane: 1, slot: 0 }).unwrap();

        assert_eq!(graph.component_count(), 2);
    }
}
