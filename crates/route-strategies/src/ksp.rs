//! K shortest loopless paths (Yen's algorithm)

use crate::search::{Constraints, Hop, HopPath, PairSearch};
use crate::{check_endpoints, PathParams, Result, RoutingStrategy};
use constellation_graph::{Coverage, GridPos, LbSet, NetworkGraph, SdPair};

/// Up to `k` shortest loopless paths within the desirability stretch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KspRouting {
    params: PathParams,
}

impl KspRouting {
    pub fn new(desirability_stretch: f64, k: usize) -> Self {
        Self {
            params: PathParams::new(desirability_stretch, k),
        }
    }

    pub fn params(&self) -> PathParams {
        self.params
    }
}

impl RoutingStrategy for KspRouting {
    fn name(&self) -> &str {
        "ksp"
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

        let paths = yen(&search, &self.params);
        Ok(paths.into_iter().map(HopPath::into_path).collect())
    }
}

/// Yen's algorithm, stopping early once candidates exceed the cost bound
pub(crate) fn yen(search: &PairSearch, params: &PathParams) -> Vec<HopPath> {
    let Some(first) = search.shortest(&Constraints::default()) else {
        return Vec::new();
    };
    let bound = params.cost_bound(first.cost);

    let mut accepted: Vec<HopPath> = vec![first];
    let mut candidates: Vec<HopPath> = Vec::new();

    while accepted.len() < params.k {
        let last = accepted[accepted.len() - 1].hops.clone();

        for i in 0..last.len() - 1 {
            let spur = last[i];
            let root = &last[..=i];

            let mut constraints = Constraints::default();
            for path in &accepted {
                if path.hops.len() > i + 1 && path.hops[..=i] == *root {
                    constraints.banned_edges.insert((path.hops[i], path.hops[i + 1]));
                }
            }
            constraints.banned_hops.extend(root[..i].iter().copied());

            let Some(spur_path) = search.shortest_from(spur, &constraints) else {
                continue;
            };
            let Some(root_cost) = search.cost_of(root) else {
                continue;
            };

            let mut hops: Vec<Hop> = root[..i].to_vec();
            hops.extend(spur_path.hops);
            let candidate = HopPath {
                hops,
                cost: root_cost + spur_path.cost,
            };

            let known = accepted.iter().chain(candidates.iter()).any(|p| p.hops == candidate.hops);
            if !known {
                candidates.push(candidate);
            }
        }

        // Cheapest candidate next; ties broken on the hop sequence
        let Some(best) = candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.cost.total_cmp(&b.cost).then_with(|| a.hops.cmp(&b.hops)))
            .map(|(idx, _)| idx)
        else {
            break;
        };
        let next = candidates.swap_remove(best);
        if next.cost > bound {
            break;
        }
        accepted.push(next);
    }

    accepted
}
