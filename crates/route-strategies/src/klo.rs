//! K load-optimised paths
//!
//! Iterated shortest paths with an edge-sharing penalty (ESX): after each
//! round every edge the chosen path used has its weight multiplied by
//! `1 + esx_theta`, steering later rounds towards less loaded links while
//! still allowing reuse when no alternative exists.

use crate::search::{undirected, Constraints, HopPath, PairSearch};
use crate::{check_endpoints, PathParams, Result, RoutingStrategy, StrategyError};
use constellation_graph::{Coverage, GridPos, LbSet, NetworkGraph, SdPair};

/// Penalised rounds attempted per requested path
const ROUNDS_PER_PATH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KloRouting {
    params: PathParams,
    esx_theta: f64,
}

impl KloRouting {
    pub fn new(desirability_stretch: f64, k: usize, esx_theta: f64) -> Self {
        Self {
            params: PathParams::new(desirability_stretch, k),
            esx_theta,
        }
    }

    pub fn params(&self) -> PathParams {
        self.params
    }

    pub fn esx_theta(&self) -> f64 {
        self.esx_theta
    }
}

impl RoutingStrategy for KloRouting {
    fn name(&self) -> &str {
        "klo"
    }

    fn param_description(&self) -> String {
        format!(
            "{}k{}t{}",
            self.params.desirability_stretch, self.params.k, self.esx_theta
        )
    }

    fn compute(
        &self,
        pair: SdPair,
        grid: &GridPos,
        network: &NetworkGraph,
        coverage: &Coverage,
    ) -> Result<LbSet> {
        self.params.validate()?;
        if !(self.esx_theta.is_finite() && self.esx_theta >= 0.0) {
            return Err(StrategyError::InvalidParameter {
                name: "esx_theta",
                reason: format!("must be a non-negative number, got {}", self.esx_theta),
            });
        }
        check_endpoints(pair, grid)?;

        let search = PairSearch::new(pair, network, coverage);
        if self.params.k == 0 || search.is_uncovered() {
            return Ok(LbSet::new());
        }

        let mut constraints = Constraints::default();
        let mut paths: Vec<HopPath> = Vec::new();
        let mut bound = f64::INFINITY;
        let factor = 1.0 + self.esx_theta;

        for _ in 0..self.params.k * ROUNDS_PER_PATH {
            if paths.len() >= self.params.k {
                break;
            }
            let Some(path) = search.shortest(&constraints) else {
                break;
            };
            if paths.is_empty() {
                bound = self.params.cost_bound(path.cost);
            }

            for edge in path.edges() {
                *constraints.penalties.entry(undirected(edge)).or_insert(1.0) *= factor;
            }

            let duplicate = paths.iter().any(|p| p.hops == path.hops);
            if !duplicate && path.cost <= bound {
                paths.push(path);
            }
        }

        Ok(paths.into_iter().map(HopPath::into_path).collect())
    }
}
