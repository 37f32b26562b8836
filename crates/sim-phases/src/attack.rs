//! Link-flooding attacks
//!
//! For every inter-satellite link, estimate what it takes an attacker to
//! saturate it by injecting traffic from the ground cells whose routes
//! already cross it. An attack is assembled from four roles:
//!
//! - geo constraint: the cells the attacker may send from
//! - filter: the traversals of the target those cells can inject into
//! - feasibility: whether an injection saturates the target without
//!   overflowing another link first
//! - optimisation: the smallest feasible injection per source cell
//!
//! Ground up/down links are not attack targets.

use crate::edges::{EdgeData, EdgeInfo, PathRef};
use crate::keys;
use crate::routing::PathData;
use crate::traffic::BwData;
use crate::{PhaseError, Result};
use constellation_graph::{CellId, EdgeKey, GridPos, KeyedTable, Path};
use serde::{Deserialize, Serialize};
use sim_pipeline::{OutputSlot, Outcome, Phase, PhaseContext, PhaseOutputs, PhaseSettings, PipelineError};
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    /// Extra load each source cell must inject; the attacker's most visible
    /// footprint on any single uplink
    pub detectability: f64,
    /// Total extra bandwidth injected
    pub cost: f64,
    /// Distinct ground cells the flood is sent from
    pub sources: usize,
}

pub type AtkData = KeyedTable<EdgeKey, Option<AttackResult>>;

/// Cells an attacker controls
pub trait GeoConstraintStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn param_description(&self) -> String;

    fn allowed(&self, grid: &GridPos) -> BTreeSet<CellId>;
}

/// Every covered cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NoConstraint;

impl GeoConstraintStrategy for NoConstraint {
    fn name(&self) -> &str {
        "none"
    }

    fn param_description(&self) -> String {
        String::new()
    }

    fn allowed(&self, grid: &GridPos) -> BTreeSet<CellId> {
        grid.keys().copied().collect()
    }
}

/// An explicit list of grid cells; cells outside the grid are ignored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellConstraint {
    pub grid_points: Vec<CellId>,
}

impl GeoConstraintStrategy for CellConstraint {
    fn name(&self) -> &str {
        "cells"
    }

    fn param_description(&self) -> String {
        let cells: Vec<String> = self.grid_points.iter().map(u32::to_string).collect();
        cells.join(",")
    }

    fn allowed(&self, grid: &GridPos) -> BTreeSet<CellId> {
        self.grid_points
            .iter()
            .copied()
            .filter(|cell| grid.contains_key(cell))
            .collect()
    }
}

/// Selects the traversals of a target edge usable for a flood
pub trait AttackFilterStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn filter(&self, info: &EdgeInfo, paths: &PathData, allowed: &BTreeSet<CellId>) -> Vec<PathRef>;
}

/// Traversals in the target's direction whose traffic originates from an
/// allowed cell on a routed path
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectionalFilter;

impl AttackFilterStrategy for DirectionalFilter {
    fn name(&self) -> &str {
        "directional"
    }

    fn filter(&self, info: &EdgeInfo, paths: &PathData, allowed: &BTreeSet<CellId>) -> Vec<PathRef> {
        info.uses
            .iter()
            .filter(|used| allowed.contains(&used.source_cell()))
            .filter(|used| resolve(paths, used).is_some())
            .copied()
            .collect()
    }
}

fn resolve<'a>(paths: &'a PathData, used: &PathRef) -> Option<&'a Path> {
    paths.get(&used.pair).and_then(Outcome::ok)?.get(used.index)
}

/// Extra load per directed edge when every source cell injects one unit
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloodPlan {
    pub sources: usize,
    pub unit_load: BTreeMap<EdgeKey, f64>,
}

impl FloodPlan {
    /// Each source spreads its unit evenly over its traversals; a traversal
    /// loads every edge of its path in the direction its traffic flows.
    pub fn build(traversals: &[PathRef], paths: &PathData) -> Self {
        let mut by_source: BTreeMap<CellId, Vec<(&Path, bool)>> = BTreeMap::new();
        for used in traversals {
            if let Some(path) = resolve(paths, used) {
                by_source.entry(used.source_cell()).or_default().push((path, used.reverse));
            }
        }

        let mut unit_load: BTreeMap<EdgeKey, f64> = BTreeMap::new();
        for routes in by_source.values() {
            let share = 1.0 / routes.len() as f64;
            for (path, reverse) in routes {
                let edges = path.edges();
                let directed: Vec<EdgeKey> = if *reverse {
                    edges.iter().rev().map(EdgeKey::reversed).collect()
                } else {
                    edges
                };
                for edge in directed {
                    *unit_load.entry(edge).or_insert(0.0) += share;
                }
            }
        }

        Self {
            sources: by_source.len(),
            unit_load,
        }
    }

    pub fn load(&self, edge: &EdgeKey) -> f64 {
        self.unit_load.get(edge).copied().unwrap_or(0.0)
    }
}

/// Result of trying one injection level
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Target not yet saturated
    Short,
    Feasible,
    /// Another link overflows
    Collateral(EdgeKey),
}

pub trait FeasibilityStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, target: EdgeKey, plan: &FloodPlan, bw: &BwData, injection: f64, rate: f64) -> Verdict;
}

/// The target reaches `rate` of its capacity while every other ISL the flood
/// crosses stays within capacity. Up/down links are the attacker's own
/// access and are not checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityFeasibility;

impl FeasibilityStrategy for CapacityFeasibility {
    fn name(&self) -> &str {
        "capacity"
    }

    fn check(&self, target: EdgeKey, plan: &FloodPlan, bw: &BwData, injection: f64, rate: f64) -> Verdict {
        let Some(info) = bw.get(&target) else {
            return Verdict::Short;
        };
        if info.load + injection * plan.load(&target) < rate * info.capacity {
            return Verdict::Short;
        }

        for (edge, unit) in &plan.unit_load {
            if *edge == target || edge.touches_ground() {
                continue;
            }
            if let Some(other) = bw.get(edge) {
                if other.load + injection * unit > other.capacity {
                    return Verdict::Collateral(*edge);
                }
            }
        }
        Verdict::Feasible
    }
}

pub trait OptimStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn param_description(&self) -> String;

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Smallest per-source injection, `None` when no feasible one exists
    fn optimise(&self, target: EdgeKey, plan: &FloodPlan, bw: &BwData, feasibility: &dyn FeasibilityStrategy) -> Option<f64>;
}

/// Bisection on the per-source injection, saturating the target to `rate`
/// of its capacity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BinSearchOptim {
    pub rate: f64,
}

impl BinSearchOptim {
    const MAX_STEPS: usize = 200;
    const MAX_GROWTH: usize = 64;
    const RELATIVE_TOLERANCE: f64 = 1e-13;
}

impl OptimStrategy for BinSearchOptim {
    fn name(&self) -> &str {
        "binsearch"
    }

    fn param_description(&self) -> String {
        format!("r{}", self.rate)
    }

    fn validate(&self) -> Result<()> {
        if self.rate > 0.0 && self.rate <= 1.0 {
            Ok(())
        } else {
            Err(PhaseError::InvalidParameter {
                name: "rate",
                reason: format!("must lie in (0, 1], got {}", self.rate),
            })
        }
    }

    fn optimise(&self, target: EdgeKey, plan: &FloodPlan, bw: &BwData, feasibility: &dyn FeasibilityStrategy) -> Option<f64> {
        let unit = plan.load(&target);
        let capacity = bw.get(&target)?.capacity;
        if unit <= 0.0 {
            return None;
        }
        let short = |x: f64| feasibility.check(target, plan, bw, x, self.rate) == Verdict::Short;

        let (mut lo, mut hi) = (0.0, self.rate * capacity / unit);
        if short(lo) {
            let mut growth = 0;
            while short(hi) {
                growth += 1;
                if growth > Self::MAX_GROWTH {
                    return None;
                }
                hi *= 2.0;
            }
            for _ in 0..Self::MAX_STEPS {
                if hi - lo <= Self::RELATIVE_TOLERANCE * hi {
                    break;
                }
                let mid = 0.5 * (lo + hi);
                if short(mid) {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
        } else {
            hi = lo;
        }

        match feasibility.check(target, plan, bw, hi, self.rate) {
            Verdict::Feasible => Some(hi),
            Verdict::Collateral(edge) => {
                debug!(%target, blocked_by = %edge, "flood overflows another link first");
                None
            }
            Verdict::Short => None,
        }
    }
}

/// A complete link attack: constraint, filter, feasibility and optimiser
pub struct LinkAttack {
    constraint: Box<dyn GeoConstraintStrategy>,
    filter: Box<dyn AttackFilterStrategy>,
    feasibility: Box<dyn FeasibilityStrategy>,
    optimiser: Box<dyn OptimStrategy>,
}

impl LinkAttack {
    pub fn new(
        constraint: Box<dyn GeoConstraintStrategy>,
        filter: Box<dyn AttackFilterStrategy>,
        feasibility: Box<dyn FeasibilityStrategy>,
        optimiser: Box<dyn OptimStrategy>,
    ) -> Self {
        Self {
            constraint,
            filter,
            feasibility,
            optimiser,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{}:{}/{}/{}/{}:{}",
            self.constraint.name(),
            self.constraint.param_description(),
            self.filter.name(),
            self.feasibility.name(),
            self.optimiser.name(),
            self.optimiser.param_description()
        )
    }

    pub fn validate(&self) -> Result<()> {
        self.optimiser.validate()
    }

    pub fn allowed(&self, grid: &GridPos) -> BTreeSet<CellId> {
        self.constraint.allowed(grid)
    }

    /// `None` when the edge cannot be attacked
    pub fn attack(
        &self,
        target: EdgeKey,
        info: &EdgeInfo,
        bw: &BwData,
        paths: &PathData,
        allowed: &BTreeSet<CellId>,
    ) -> Option<AttackResult> {
        if target.touches_ground() {
            return None;
        }
        let traversals = self.filter.filter(info, paths, allowed);
        let plan = FloodPlan::build(&traversals, paths);
        if plan.sources == 0 {
            return None;
        }

        let injection = self
            .optimiser
            .optimise(target, &plan, bw, self.feasibility.as_ref())?;
        Some(AttackResult {
            detectability: injection,
            cost: injection * plan.sources as f64,
            sources: plan.sources,
        })
    }
}

pub struct LinkAttackPhase {
    settings: PhaseSettings,
    attack: LinkAttack,
    pub grid_in: String,
    pub paths_in: String,
    pub edges_in: String,
    pub bw_in: String,
    pub atk_out: String,
}

impl LinkAttackPhase {
    pub fn new(settings: PhaseSettings, attack: LinkAttack) -> Self {
        Self {
            settings,
            attack,
            grid_in: keys::GRID_POS.to_string(),
            paths_in: keys::PATH_DATA.to_string(),
            edges_in: keys::EDGE_DATA.to_string(),
            bw_in: keys::BW_DATA.to_string(),
            atk_out: keys::ATK_DATA.to_string(),
        }
    }
}

impl Phase for LinkAttackPhase {
    fn name(&self) -> &str {
        "LinkAttackPhase"
    }

    fn description(&self) -> String {
        self.attack.describe()
    }

    fn settings(&self) -> &PhaseSettings {
        &self.settings
    }

    fn inputs(&self) -> Vec<&str> {
        vec![
            self.grid_in.as_str(),
            self.paths_in.as_str(),
            self.edges_in.as_str(),
            self.bw_in.as_str(),
        ]
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::of::<AtkData>(self.atk_out.as_str())]
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> sim_pipeline::Result<PhaseOutputs> {
        let grid = ctx.get::<GridPos>(&self.grid_in)?;
        let paths = ctx.get::<PathData>(&self.paths_in)?;
        let edges = ctx.get::<EdgeData>(&self.edges_in)?;
        let bw = ctx.get::<BwData>(&self.bw_in)?;
        self.attack
            .validate()
            .map_err(|e| PipelineError::phase(ctx.phase(), e))?;

        let allowed = self.attack.allowed(&grid);
        let results = ctx.for_each(edges.keys().copied(), |edge| {
            let result = edges
                .get(edge)
                .and_then(|info| self.attack.attack(*edge, info, &bw, &paths, &allowed));
            Ok::<_, Infallible>(result)
        })?;

        let atk: AtkData = results
            .into_iter()
            .map(|(edge, outcome)| {
                let result = match outcome {
                    Outcome::Done(result) => result,
                    Outcome::Failed(reason) => {
                        debug!(%edge, reason = %reason, "no attack result");
                        None
                    }
                };
                (edge, result)
            })
            .collect();

        let attackable = atk.values().filter(|r| r.is_some()).count();
        info!(
            "Link attacks: {} of {} edges attackable from {} cells",
            attackable,
            atk.len(),
            allowed.len()
        );

        Ok(PhaseOutputs::new().with(self.atk_out.as_str(), atk))
    }
}
