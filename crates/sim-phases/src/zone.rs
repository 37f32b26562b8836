//! Zone attacks: cutting traffic between two ground regions
//!
//! A zone is a cluster of nearby cells around a centre cell. For each
//! sampled pair of zones the phase collects the ISLs the zone-to-zone
//! traffic crosses, picks the bottleneck among them and reports the link
//! attack on it together with the share of zone traffic it cuts.

use crate::attack::{AtkData, AttackResult};
use crate::keys;
use crate::routing::PathData;
use crate::{PhaseError, Result};
use constellation_graph::geo::central_angle;
use constellation_graph::{CellId, EdgeKey, GridPos, KeyedTable, SdPair};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sim_pipeline::{OutputSlot, Outcome, Phase, PhaseContext, PhaseOutputs, PhaseSettings, PipelineError};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneAttackResult {
    pub bottleneck: EdgeKey,
    pub attack: AttackResult,
    /// Share of the zone-to-zone traffic crossing the bottleneck
    pub cut_fraction: f64,
}

/// Keyed by the pair of zone centres
pub type ZoneAtkData = KeyedTable<SdPair, Option<ZoneAttackResult>>;

/// Chooses the zone centre pairs to attack
pub trait ZoneSelectStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn param_description(&self) -> String;

    fn select(&self, grid: &GridPos) -> Vec<SdPair>;
}

/// Uniformly sampled centre pairs, duplicates dropped
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandZoneSelect {
    pub samples: usize,
    pub seed: u64,
}

impl ZoneSelectStrategy for RandZoneSelect {
    fn name(&self) -> &str {
        "random"
    }

    fn param_description(&self) -> String {
        format!("n{}s{}", self.samples, self.seed)
    }

    fn select(&self, grid: &GridPos) -> Vec<SdPair> {
        let cells: Vec<CellId> = grid.keys().copied().collect();
        if cells.len() < 2 {
            return Vec::new();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let pairs: BTreeSet<SdPair> = (0..self.samples)
            .map(|_| {
                let src = rng.gen_range(0..cells.len());
                let mut dst = rng.gen_range(0..cells.len() - 1);
                if dst >= src {
                    dst += 1;
                }
                SdPair::new(cells[src], cells[dst])
            })
            .collect();
        pairs.into_iter().collect()
    }
}

/// Grows a zone around its centre cell
pub trait ZoneBuildStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn param_description(&self) -> String;

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn build(&self, centre: CellId, grid: &GridPos) -> Result<Vec<CellId>>;
}

/// The `size` cells closest to the centre, the centre included
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KClosestZone {
    pub size: usize,
}

impl ZoneBuildStrategy for KClosestZone {
    fn name(&self) -> &str {
        "kclosest"
    }

    fn param_description(&self) -> String {
        format!("k{}", self.size)
    }

    fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(PhaseError::InvalidParameter {
                name: "size",
                reason: "a zone holds at least one cell".to_string(),
            });
        }
        Ok(())
    }

    fn build(&self, centre: CellId, grid: &GridPos) -> Result<Vec<CellId>> {
        let origin = grid.get(&centre).ok_or(PhaseError::UnknownCell(centre))?;
        let mut by_distance: Vec<(f64, CellId)> = grid
            .iter()
            .map(|(cell, point)| {
                let angle = central_angle(origin.lat_deg, origin.lon_deg, point.lat_deg, point.lon_deg);
                (angle, *cell)
            })
            .collect();
        by_distance.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(by_distance.into_iter().take(self.size).map(|(_, cell)| cell).collect())
    }
}

/// Zone-to-zone traffic over the links it crosses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneTraffic {
    /// Routed cell pairs between the zones
    pub pairs: usize,
    /// Per directed link, the routed pairs crossing it, each pair weighted
    /// by the share of its load-balancing set that does
    pub crossings: BTreeMap<EdgeKey, f64>,
}

pub trait ZoneEdgesStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn edges(&self, zone_a: &[CellId], zone_b: &[CellId], paths: &PathData) -> ZoneTraffic;
}

/// Inter-satellite links crossed by traffic flowing from zone A to zone B
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct IslZoneEdges;

impl ZoneEdgesStrategy for IslZoneEdges {
    fn name(&self) -> &str {
        "isl"
    }

    fn edges(&self, zone_a: &[CellId], zone_b: &[CellId], paths: &PathData) -> ZoneTraffic {
        let mut traffic = ZoneTraffic::default();
        for &src in zone_a {
            for &dst in zone_b {
                if src == dst {
                    continue;
                }
                let pair = SdPair::new(src, dst);
                let (lb, reverse) = match paths.get(&pair).and_then(Outcome::ok) {
                    Some(lb) => (lb, false),
                    None => match paths.get(&pair.reversed()).and_then(Outcome::ok) {
                        Some(lb) => (lb, true),
                        None => continue,
                    },
                };
                if lb.is_empty() {
                    continue;
                }

                traffic.pairs += 1;
                let share = 1.0 / lb.len() as f64;
                for path in lb {
                    for edge in path.edges().into_iter().filter(|e| !e.touches_ground()) {
                        let edge = if reverse { edge.reversed() } else { edge };
                        *traffic.crossings.entry(edge).or_insert(0.0) += share;
                    }
                }
            }
        }
        traffic
    }
}

pub trait ZoneBottleneckStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn bottleneck(&self, traffic: &ZoneTraffic, atk: &AtkData) -> Option<ZoneAttackResult>;
}

/// The attackable link carrying the largest share of zone traffic; ties go
/// to the least detectable attack
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectBneck;

impl ZoneBottleneckStrategy for DetectBneck {
    fn name(&self) -> &str {
        "detect"
    }

    fn bottleneck(&self, traffic: &ZoneTraffic, atk: &AtkData) -> Option<ZoneAttackResult> {
        if traffic.pairs == 0 {
            return None;
        }
        traffic
            .crossings
            .iter()
            .filter_map(|(edge, crossed)| {
                let attack = (*atk.get(edge)?)?;
                Some(ZoneAttackResult {
                    bottleneck: *edge,
                    attack,
                    cut_fraction: crossed / traffic.pairs as f64,
                })
            })
            .min_by(|a, b| {
                b.cut_fraction
                    .total_cmp(&a.cut_fraction)
                    .then(a.attack.detectability.total_cmp(&b.attack.detectability))
                    .then(a.bottleneck.cmp(&b.bottleneck))
            })
    }
}

/// The four zone roles
pub struct ZoneAttack {
    select: Box<dyn ZoneSelectStrategy>,
    build: Box<dyn ZoneBuildStrategy>,
    edges: Box<dyn ZoneEdgesStrategy>,
    bneck: Box<dyn ZoneBottleneckStrategy>,
}

impl ZoneAttack {
    pub fn new(
        select: Box<dyn ZoneSelectStrategy>,
        build: Box<dyn ZoneBuildStrategy>,
        edges: Box<dyn ZoneEdgesStrategy>,
        bneck: Box<dyn ZoneBottleneckStrategy>,
    ) -> Self {
        Self {
            select,
            build,
            edges,
            bneck,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{}:{}/{}:{}/{}/{}",
            self.select.name(),
            self.select.param_description(),
            self.build.name(),
            self.build.param_description(),
            self.edges.name(),
            self.bneck.name()
        )
    }

    /// Attack between the zones grown around the two centres of `centres`
    pub fn attack(
        &self,
        centres: SdPair,
        grid: &GridPos,
        paths: &PathData,
        atk: &AtkData,
    ) -> Result<Option<ZoneAttackResult>> {
        let zone_a = self.build.build(centres.src, grid)?;
        let zone_b = self.build.build(centres.dst, grid)?;
        let traffic = self.edges.edges(&zone_a, &zone_b, paths);
        Ok(self.bneck.bottleneck(&traffic, atk))
    }
}

pub struct ZoneAttackPhase {
    settings: PhaseSettings,
    zones: ZoneAttack,
    pub grid_in: String,
    pub paths_in: String,
    pub atk_in: String,
    pub zatk_out: String,
}

impl ZoneAttackPhase {
    pub fn new(settings: PhaseSettings, zones: ZoneAttack) -> Self {
        Self {
            settings,
            zones,
            grid_in: keys::GRID_POS.to_string(),
            paths_in: keys::PATH_DATA.to_string(),
            atk_in: keys::ATK_DATA.to_string(),
            zatk_out: keys::ZONE_ATK_DATA.to_string(),
        }
    }
}

impl Phase for ZoneAttackPhase {
    fn name(&self) -> &str {
        "ZoneAttackPhase"
    }

    fn description(&self) -> String {
        self.zones.describe()
    }

    fn settings(&self) -> &PhaseSettings {
        &self.settings
    }

    fn inputs(&self) -> Vec<&str> {
        vec![self.grid_in.as_str(), self.paths_in.as_str(), self.atk_in.as_str()]
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::of::<ZoneAtkData>(self.zatk_out.as_str())]
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> sim_pipeline::Result<PhaseOutputs> {
        let grid = ctx.get::<GridPos>(&self.grid_in)?;
        let paths = ctx.get::<PathData>(&self.paths_in)?;
        let atk = ctx.get::<AtkData>(&self.atk_in)?;
        self.zones
            .build
            .validate()
            .map_err(|e| PipelineError::phase(ctx.phase(), e))?;

        let centres = self.zones.select.select(&grid);
        let results = ctx.for_each(centres, |pair| self.zones.attack(*pair, &grid, &paths, &atk))?;

        let zatk: ZoneAtkData = results
            .into_iter()
            .map(|(pair, outcome)| {
                let result = match outcome {
                    Outcome::Done(result) => result,
                    Outcome::Failed(reason) => {
                        debug!(src = pair.src, dst = pair.dst, reason = %reason, "zone pair skipped");
                        None
                    }
                };
                (pair, result)
            })
            .collect();

        let attackable = zatk.values().filter(|r| r.is_some()).count();
        info!("Zone attacks: {} of {} zone pairs have a bottleneck", attackable, zatk.len());

        Ok(PhaseOutputs::new().with(self.zatk_out.as_str(), zatk))
    }
}
