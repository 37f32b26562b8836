//! Ground-to-ground shortest-path search
//!
//! The search graph is the satellite network extended with the two ground
//! endpoints of a pair: the source cell reaches every satellite covering it,
//! every satellite covering the destination reaches the destination cell.
//! It is built once per pair as a directed petgraph graph. Constraints
//! (banned hops, banned edges, per-edge penalties) are applied through an
//! edge filter and the A* cost function, so the graph is never mutated.

use constellation_graph::{Coverage, NetworkGraph, Path, SatId, SdPair};
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, EdgeReference, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use std::collections::{HashMap, HashSet};

/// A vertex of the ground-to-ground search graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum Hop {
    Src,
    Sat(SatId),
    Dst,
}

/// Directed edge of the search graph
pub(crate) type HopEdge = (Hop, Hop);

/// Undirected identity of a search edge, used for link bans and penalties
pub(crate) fn undirected(edge: HopEdge) -> HopEdge {
    if edge.0 <= edge.1 {
        edge
    } else {
        (edge.1, edge.0)
    }
}

#[derive(Debug, Default, Clone)]
pub(crate) struct Constraints {
    pub banned_hops: HashSet<Hop>,
    /// Directed edges that may not be used
    pub banned_edges: HashSet<HopEdge>,
    /// Multiplicative weight per undirected edge (absent = 1.0)
    pub penalties: HashMap<HopEdge, f64>,
}

impl Constraints {
    fn allows(&self, from: Hop, to: Hop) -> bool {
        !self.banned_hops.contains(&to) && !self.banned_edges.contains(&(from, to))
    }

    fn weight(&self, from: Hop, to: Hop, cost: f64) -> f64 {
        match self.penalties.get(&undirected((from, to))) {
            Some(factor) => cost * factor,
            None => cost,
        }
    }
}

/// A path through the search graph, `Src` first and `Dst` last
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct HopPath {
    pub hops: Vec<Hop>,
    /// Unpenalised cost
    pub cost: f64,
}

impl HopPath {
    pub fn edges(&self) -> impl Iterator<Item = HopEdge> + '_ {
        self.hops.windows(2).map(|w| (w[0], w[1]))
    }

    pub fn sats(&self) -> impl Iterator<Item = SatId> + '_ {
        self.hops.iter().filter_map(|h| match h {
            Hop::Sat(s) => Some(*s),
            _ => None,
        })
    }

    pub fn into_path(self) -> Path {
        let sats = self.sats().collect();
        Path::new(sats, self.cost)
    }
}

/// Search graph of one pair
pub(crate) struct PairSearch {
    graph: DiGraph<Hop, f64>,
    node_index: HashMap<Hop, NodeIndex>,
    uncovered: bool,
}

impl PairSearch {
    pub fn new(pair: SdPair, network: &NetworkGraph, coverage: &Coverage) -> Self {
        let access = |cell: u32| coverage.get(&cell).map(Vec::as_slice).unwrap_or(&[]);
        let (uplinks, downlinks) = (access(pair.src), access(pair.dst));

        let mut graph = DiGraph::new();
        let mut node_index = HashMap::new();
        for hop in std::iter::once(Hop::Src)
            .chain(network.satellites().map(|s| Hop::Sat(s.id)))
            .chain(std::iter::once(Hop::Dst))
        {
            node_index.insert(hop, graph.add_node(hop));
        }

        for (a, b, link) in network.links() {
            let cost = link.cost();
            if !cost.is_finite() {
                continue;
            }
            if let (Some(&a), Some(&b)) = (node_index.get(&Hop::Sat(a)), node_index.get(&Hop::Sat(b))) {
                graph.add_edge(a, b, cost);
                graph.add_edge(b, a, cost);
            }
        }

        if let (Some(&src), Some(&dst)) = (node_index.get(&Hop::Src), node_index.get(&Hop::Dst)) {
            for up in uplinks {
                if let Some(&sat) = node_index.get(&Hop::Sat(up.sat)) {
                    graph.update_edge(src, sat, up.cost_km);
                }
            }
            for down in downlinks {
                if let Some(&sat) = node_index.get(&Hop::Sat(down.sat)) {
                    graph.update_edge(sat, dst, down.cost_km);
                }
            }
        }

        Self {
            graph,
            node_index,
            uncovered: uplinks.is_empty() || downlinks.is_empty(),
        }
    }

    /// Whether either endpoint has no visible satellite
    pub fn is_uncovered(&self) -> bool {
        self.uncovered
    }

    /// Unpenalised cost of a single search edge
    pub fn edge_cost(&self, from: Hop, to: Hop) -> Option<f64> {
        let from = *self.node_index.get(&from)?;
        let to = *self.node_index.get(&to)?;
        self.graph.find_edge(from, to).map(|edge| self.graph[edge])
    }

    /// Unpenalised cost of a hop sequence
    pub fn cost_of(&self, hops: &[Hop]) -> Option<f64> {
        let mut total = 0.0;
        for w in hops.windows(2) {
            total += self.edge_cost(w[0], w[1])?;
        }
        Some(total)
    }

    /// Shortest path from `start` to `Dst` under `constraints` (A* with no
    /// heuristic, i.e. Dijkstra).
    ///
    /// Returns the hop sequence from `start` and its unpenalised cost.
    pub fn shortest_from(&self, start: Hop, constraints: &Constraints) -> Option<HopPath> {
        let start = *self.node_index.get(&start)?;
        let goal = *self.node_index.get(&Hop::Dst)?;

        let allowed = EdgeFiltered::from_fn(&self.graph, |e: EdgeReference<'_, f64>| {
            constraints.allows(self.graph[e.source()], self.graph[e.target()])
        });
        let (_, nodes) = astar(
            &allowed,
            start,
            |n| n == goal,
            |e| constraints.weight(self.graph[e.source()], self.graph[e.target()], *e.weight()),
            |_| 0.0,
        )?;

        let hops: Vec<Hop> = nodes.into_iter().map(|n| self.graph[n]).collect();
        let cost = self.cost_of(&hops)?;
        Some(HopPath { hops, cost })
    }

    /// Shortest ground-to-ground path under `constraints`
    pub fn shortest(&self, constraints: &Constraints) -> Option<HopPath> {
        self.shortest_from(Hop::Src, constraints)
    }
}
