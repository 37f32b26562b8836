//! Disjoint k-path heuristics
//!
//! Both strategies repeatedly take the shortest remaining path and then
//! exclude what it used from later iterations:
//! - KDG removes every satellite of the path (geographically disjoint)
//! - KDS removes every link of the path, access links included (shared-risk
//!   link group disjoint)

use crate::search::{undirected, Constraints, Hop, HopPath, PairSearch};
use crate::{check_endpoints, PathParams, Result, RoutingStrategy};
use constellation_graph::{Coverage, GridPos, LbSet, NetworkGraph, SdPair};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exclusion {
    Satellites,
    Links,
}

fn disjoint_paths(search: &PairSearch, params: &PathParams, exclusion: Exclusion) -> Vec<HopPath> {
    let mut constraints = Constraints::default();
    let mut paths: Vec<HopPath> = Vec::new();
    let mut bound = f64::INFINITY;

    while paths.len() < params.k {
        let Some(path) = search.shortest(&constraints) else {
            break;
        };
        if paths.is_empty() {
            bound = params.cost_bound(path.cost);
        } else if path.cost > bound {
            break;
        }

        match exclusion {
            Exclusion::Satellites => {
                constraints
                    .banned_hops
                    .extend(path.hops.iter().copied().filter(|h| matches!(h, Hop::Sat(_))));
            }
            Exclusion::Links => {
                for edge in path.edges() {
                    let (a, b) = undirected(edge);
                    constraints.banned_edges.insert((a, b));
                    constraints.banned_edges.insert((b, a));
                }
            }
        }
        paths.push(path);
    }

    paths
}

/// K geographically disjoint paths: no satellite is shared between paths
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KdgRouting {
    params: PathParams,
}

impl KdgRouting {
    pub fn new(desirability_stretch: f64, k: usize) -> Self {
        Self {
            params: PathParams::new(desirability_stretch, k),
        }
    }

    pub fn params(&self) -> PathParams {
        self.params
    }
}

impl RoutingStrategy for KdgRouting {
    fn name(&self) -> &str {
        "kdg"
    }

    fn param_description(&self) -> String {
        format!("{}k{}", self.params.desirability_stretch, self.params.k)
    }

    fn compute(
        &self,
        pair: SdPair,
        grid: &GridPos,
        network: &NetworkGraph,
        coverage: &Coverage,
    ) -> Result<LbSet> {
        self.params.validate()?;
        check_endpoints(pair, grid)?;

        let search = PairSearch::new(pair, network, coverage);
        if self.params.k == 0 || search.is_uncovered() {
            return Ok(LbSet::new());
        }
        Ok(disjoint_paths(&search, &self.params, Exclusion::Satellites)
            .into_iter()
            .map(HopPath::into_path)
            .collect())
    }
}

/// K shared-risk-link-group disjoint paths: no link is shared between paths
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KdsRouting {
    params: PathParams,
}

impl KdsRouting {
    pub fn new(desirability_stretch: f64, k: usize) -> Self {
        Self {
            params: PathParams::new(desirability_stretch, k),
        }
    }

    pub fn params(&self) -> PathParams {
        self.params
    }
}

impl RoutingStrategy for KdsRouting {
    fn name(&self) -> &str {
        "kds"
    }

    fn param_description(&self) -> String {
        format!("{}k{}", self.params.desirability_stretch, self.params.k)
    }

    fn compute(
        &self,
        pair: SdPair,
        grid: &GridPos,
        network: &NetworkGraph,
        coverage: &Coverage,
    ) -> Result<LbSet> {
        self.params.validate()?;
        check_endpoints(pair, grid)?;

        let search = PairSearch::new(pair, network, coverage);
        if self.params.k == 0 || search.is_uncovered() {
            return Ok(LbSet::new());
        }
        Ok(disjoint_paths(&search, &self.params, Exclusion::Links)
            .into_iter()
            .map(HopPath::into_path)
            .collect())
    }
}
