//! Traffic demand selection and bandwidth assignment

use crate::edges::EdgeData;
use crate::keys;
use crate::routing::PathData;
use crate::{require_positive, PhaseError, Result};
use constellation_graph::{EdgeKey, GridPos, KeyedTable, SdPair};
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_pipeline::{OutputSlot, Outcome, Phase, PhaseContext, PhaseOutputs, PhaseSettings, PipelineError};
use tracing::info;

/// Capacity and assigned load of one directed edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BwInfo {
    pub capacity: f64,
    pub load: f64,
}

impl BwInfo {
    pub fn residual(&self) -> f64 {
        (self.capacity - self.load).max(0.0)
    }

    pub fn utilisation(&self) -> f64 {
        if self.capacity > 0.0 {
            self.load / self.capacity
        } else {
            0.0
        }
    }
}

pub type BwData = KeyedTable<EdgeKey, BwInfo>;

/// Traffic demand per routed pair (arbitrary units, rescaled on assignment)
pub type Demand = KeyedTable<SdPair, f64>;

/// Decides how much traffic each routed pair exchanges
pub trait BwSelectStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn param_description(&self) -> String;

    fn select(&self, grid: &GridPos, paths: &PathData) -> Result<Demand>;
}

impl<S: BwSelectStrategy + ?Sized> BwSelectStrategy for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn param_description(&self) -> String {
        (**self).param_description()
    }

    fn select(&self, grid: &GridPos, paths: &PathData) -> Result<Demand> {
        (**self).select(grid, paths)
    }
}

/// Turns pair demand into per-edge capacity and load
pub trait BwAssignStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn param_description(&self) -> String;

    fn assign(&self, demand: &Demand, paths: &PathData, edges: &EdgeData) -> Result<BwData>;
}

/// Pairs with at least one path, with their endpoint weight product
fn routed_weights(grid: &GridPos, paths: &PathData) -> Result<Vec<(SdPair, f64)>> {
    let weight = |cell: u32| grid.get(&cell).map(|p| p.weight).ok_or(PhaseError::UnknownCell(cell));
    let mut out = Vec::with_capacity(paths.len());
    for (pair, outcome) in paths.iter() {
        if outcome.ok().is_some_and(|lb| !lb.is_empty()) {
            out.push((*pair, weight(pair.src)? * weight(pair.dst)?));
        }
    }
    Ok(out)
}

/// Demand of a pair is the product of its endpoint weights
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightedBwSelect;

impl BwSelectStrategy for WeightedBwSelect {
    fn name(&self) -> &str {
        "weighted"
    }

    fn param_description(&self) -> String {
        String::new()
    }

    fn select(&self, grid: &GridPos, paths: &PathData) -> Result<Demand> {
        Ok(routed_weights(grid, paths)?.into_iter().collect())
    }
}

/// Draws `sampled_quanta` traffic quanta over the routed pairs, each pair
/// picked with probability proportional to its endpoint weight product
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampledBwSelect {
    pub sampled_quanta: u64,
    pub seed: u64,
}

impl BwSelectStrategy for SampledBwSelect {
    fn name(&self) -> &str {
        "sampled"
    }

    fn param_description(&self) -> String {
        format!("q{}s{}", self.sampled_quanta, self.seed)
    }

    fn select(&self, grid: &GridPos, paths: &PathData) -> Result<Demand> {
        let weighted = routed_weights(grid, paths)?;
        let mut demand: Demand = weighted.iter().map(|(pair, _)| (*pair, 0.0)).collect();

        let index = match WeightedIndex::<f64>::new(weighted.iter().map(|(_, w)| *w)) {
            Ok(index) => index,
            Err(WeightedError::NoItem | WeightedError::AllWeightsZero) => return Ok(demand),
            Err(e) => {
                return Err(PhaseError::InvalidParameter {
                    name: "weight",
                    reason: e.to_string(),
                })
            }
        };

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        for _ in 0..self.sampled_quanta {
            let (pair, _) = weighted[index.sample(&mut rng)];
            if let Some(quanta) = demand.get_mut(&pair) {
                *quanta += 1.0;
            }
        }
        Ok(demand)
    }
}

/// Demand is split evenly over the pair's paths and carried in both
/// directions. Loads are then scaled so that the most utilised edge sits
/// exactly at `utilisation` of its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BidirBwAssign {
    pub isl_bw: f64,
    pub udl_bw: f64,
    pub utilisation: f64,
}

impl BidirBwAssign {
    fn capacity(&self, edge: &EdgeKey) -> f64 {
        if edge.touches_ground() {
            self.udl_bw
        } else {
            self.isl_bw
        }
    }
}

impl BwAssignStrategy for BidirBwAssign {
    fn name(&self) -> &str {
        "bidir"
    }

    fn param_description(&self) -> String {
        format!("isl{}udl{}u{}", self.isl_bw, self.udl_bw, self.utilisation)
    }

    fn assign(&self, demand: &Demand, paths: &PathData, edges: &EdgeData) -> Result<BwData> {
        require_positive("isl_bw", self.isl_bw)?;
        require_positive("udl_bw", self.udl_bw)?;
        if !(self.utilisation > 0.0 && self.utilisation <= 1.0) {
            return Err(PhaseError::InvalidParameter {
                name: "utilisation",
                reason: format!("must lie in (0, 1], got {}", self.utilisation),
            });
        }

        let mut raw: Vec<(EdgeKey, f64)> = Vec::with_capacity(edges.len());
        for (edge, info) in edges.iter() {
            let mut load = 0.0;
            for used in &info.uses {
                let share = match paths.get(&used.pair).and_then(Outcome::ok) {
                    Some(lb) if !lb.is_empty() => 1.0 / lb.len() as f64,
                    _ => continue,
                };
                load += demand.get(&used.pair).copied().unwrap_or(0.0) * share;
            }
            raw.push((*edge, load));
        }

        let scale = raw
            .iter()
            .filter(|(_, load)| *load > 0.0)
            .map(|(edge, load)| self.utilisation * self.capacity(edge) / load)
            .fold(f64::INFINITY, f64::min);
        let scale = if scale.is_finite() { scale } else { 0.0 };

        Ok(raw
            .into_iter()
            .map(|(edge, load)| {
                let info = BwInfo {
                    capacity: self.capacity(&edge),
                    load: load * scale,
                };
                (edge, info)
            })
            .collect())
    }
}

pub struct TrafficPhase {
    settings: PhaseSettings,
    select: Box<dyn BwSelectStrategy>,
    assign: Box<dyn BwAssignStrategy>,
    pub grid_in: String,
    pub paths_in: String,
    pub edges_in: String,
    pub bw_out: String,
}

impl TrafficPhase {
    pub fn new(
        settings: PhaseSettings,
        select: impl BwSelectStrategy + 'static,
        assign: impl BwAssignStrategy + 'static,
    ) -> Self {
        Self {
            settings,
            select: Box::new(select),
            assign: Box::new(assign),
            grid_in: keys::FULL_GRID_POS.to_string(),
            paths_in: keys::PATH_DATA.to_string(),
            edges_in: keys::EDGE_DATA.to_string(),
            bw_out: keys::BW_DATA.to_string(),
        }
    }
}

impl Phase for TrafficPhase {
    fn name(&self) -> &str {
        "TrafficPhase"
    }

    fn description(&self) -> String {
        format!(
            "{}:{}/{}:{}",
            self.select.name(),
            self.select.param_description(),
            self.assign.name(),
            self.assign.param_description()
        )
    }

    fn settings(&self) -> &PhaseSettings {
        &self.settings
    }

    fn inputs(&self) -> Vec<&str> {
        vec![self.grid_in.as_str(), self.paths_in.as_str(), self.edges_in.as_str()]
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::of::<BwData>(self.bw_out.as_str())]
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> sim_pipeline::Result<PhaseOutputs> {
        let grid = ctx.get::<GridPos>(&self.grid_in)?;
        let paths = ctx.get::<PathData>(&self.paths_in)?;
        let edges = ctx.get::<EdgeData>(&self.edges_in)?;

        let demand = self
            .select
            .select(&grid, &paths)
            .map_err(|e| PipelineError::phase(ctx.phase(), e))?;
        let bw = self
            .assign
            .assign(&demand, &paths, &edges)
            .map_err(|e| PipelineError::phase(ctx.phase(), e))?;

        let peak = bw.values().map(BwInfo::utilisation).fold(0.0, f64::max);
        info!("Traffic: {} edges loaded, peak utilisation {:.3}", bw.len(), peak);

        Ok(PhaseOutputs::new().with(self.bw_out.as_str(), bw))
    }
}
