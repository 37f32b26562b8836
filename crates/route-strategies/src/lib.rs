//! Route Strategies
//!
//! Interchangeable routing strategies computing a load-balancing set for one
//! source-destination pair over the satellite network:
//!
//! - `KspRouting` - k shortest loopless paths (Yen)
//! - `KdgRouting` - k geographically (satellite) disjoint paths
//! - `KdsRouting` - k shared-risk-link disjoint paths
//! - `KloRouting` - k load-optimised paths (edge-sharing penalty)
//! - `MixtureRoutingStrategy` - draws one of the above per call from fixed bands
//!
//! Every strategy is a pure function of its inputs and construction
//! parameters. Paths whose cost exceeds `desirability_stretch` times the
//! shortest cost are never returned.

use constellation_graph::{CellId, Coverage, GraphError, GridPos, LbSet, NetworkGraph, SdPair};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod disjoint;
pub mod klo;
pub mod ksp;
pub mod mixture;
mod search;

pub use disjoint::{KdgRouting, KdsRouting};
pub use klo::KloRouting;
pub use ksp::KspRouting;
pub use mixture::{
    select_delegate, DelegateFactory, DelegateKind, DrawSource, MixtureParams,
    MixtureRoutingStrategy, StandardDelegates, MIXTURE_BANDS,
};

/// Per-pair strategy failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    #[error("Grid cell not found: {0}")]
    UnknownCell(CellId),
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, StrategyError>;

/// Capability contract of every routing strategy
pub trait RoutingStrategy: Send + Sync {
    /// Short identifier used in logs and dump fingerprints
    fn name(&self) -> &str;

    /// Construction parameters, rendered compactly
    fn param_description(&self) -> String;

    /// Compute the load-balancing set for `pair`.
    ///
    /// Must not mutate any input. An empty set means the pair is unreachable.
    fn compute(
        &self,
        pair: SdPair,
        grid: &GridPos,
        network: &NetworkGraph,
        coverage: &Coverage,
    ) -> Result<LbSet>;
}

/// Parameters shared by the k-path heuristics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathParams {
    /// Maximum accepted cost relative to the shortest path (>= 1)
    pub desirability_stretch: f64,
    /// Maximum number of paths returned
    pub k: usize,
}

impl PathParams {
    pub fn new(desirability_stretch: f64, k: usize) -> Self {
        Self {
            desirability_stretch,
            k,
        }
    }

    /// Cost bound for paths relative to the shortest cost found
    pub(crate) fn cost_bound(&self, shortest: f64) -> f64 {
        shortest * self.desirability_stretch.max(1.0)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.desirability_stretch.is_finite() {
            return Err(StrategyError::InvalidParameter {
                name: "desirability_stretch",
                reason: format!("must be finite, got {}", self.desirability_stretch),
            });
        }
        Ok(())
    }
}

/// Reject pairs whose endpoints are not grid cells
pub(crate) fn check_endpoints(pair: SdPair, grid: &GridPos) -> Result<()> {
    for cell in [pair.src, pair.dst] {
        if !grid.contains_key(&cell) {
            return Err(StrategyError::UnknownCell(cell));
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use constellation_graph::{Access, Coverage, GeoPoint, GridPos, IslLink, NetworkGraph, SatNode};

    /// Ring of `n` satellites with unit-length links
    pub fn ring(n: u32) -> NetworkGraph {
        let mut graph = NetworkGraph::new();
        for id in 0..n {
            graph.add_satellite(SatNode { id, plane: 0, slot: id }).unwrap();
        }
        for id in 0..n {
            graph.add_link(id, (id + 1) % n, IslLink::new(1.0)).unwrap();
        }
        graph
    }

    /// 3x3 mesh of satellites, ids row-major, unit-length links
    pub fn mesh() -> NetworkGraph {
        let mut graph = NetworkGraph::new();
        for id in 0..9 {
            graph.add_satellite(SatNode { id, plane: id / 3, slot: id % 3 }).unwrap();
        }
        for id in 0..9u32 {
            if id % 3 < 2 {
                graph.add_link(id, id + 1, IslLink::new(1.0)).unwrap();
            }
            if id < 6 {
                graph.add_link(id, id + 3, IslLink::new(1.0)).unwrap();
            }
        }
        graph
    }

    /// Grid and coverage where cell `i` sees exactly satellite `sats[i]`
    pub fn ground(sats: &[u32]) -> (GridPos, Coverage) {
        let mut grid = GridPos::new();
        let mut coverage = Coverage::new();
        for (cell, sat) in sats.iter().enumerate() {
            grid.insert(cell as u32, GeoPoint::new(0.0, cell as f64));
            coverage.insert(cell as u32, vec![Access { sat: *sat, cost_km: 0.5 }]);
        }
        (grid, coverage)
    }
}
