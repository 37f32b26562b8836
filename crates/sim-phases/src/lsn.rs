//! Low-earth satellite network generation
//!
//! `WalkerLsn` places a Walker-delta shell on circular orbits, advances it by
//! `elapsed_s` and connects it with +Grid ISLs: each satellite links to its
//! in-plane neighbours and to the same slot in the adjacent planes.

use crate::keys;
use crate::{require_positive, PhaseError, Result};
use constellation_graph::geo::{self, EARTH_RADIUS_KM};
use constellation_graph::{IslLink, NetworkGraph, SatId, SatNode, SatPosition, SatPositions};
use serde::{Deserialize, Serialize};
use sim_pipeline::{OutputSlot, Phase, PhaseContext, PhaseOutputs, PhaseSettings, PipelineError};
use std::collections::BTreeSet;
use std::f64::consts::PI;
use tracing::info;

/// Earth gravitational parameter (km^3/s^2)
const MU_KM3_S2: f64 = 398_600.4418;
/// Earth sidereal rotation rate (rad/s)
const EARTH_ROTATION_RAD_S: f64 = 7.292_115_9e-5;

/// Undirected ISL list, lower id first
pub type IslList = Vec<(SatId, SatId)>;

pub trait LsnStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn param_description(&self) -> String;

    fn build(&self) -> Result<(SatPositions, NetworkGraph, IslList)>;
}

/// Walker-delta shell with +Grid ISLs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalkerLsn {
    pub inclination_deg: f64,
    pub sats_per_orbit: u32,
    pub orbits: u32,
    /// Walker phasing factor
    pub phase_offset: u32,
    pub altitude_km: f64,
    /// Time since the reference epoch
    pub elapsed_s: f64,
}

impl WalkerLsn {
    pub fn sat_id(&self, plane: u32, slot: u32) -> SatId {
        plane * self.sats_per_orbit + slot
    }

    pub fn orbital_period_s(&self) -> f64 {
        let a = EARTH_RADIUS_KM + self.altitude_km;
        2.0 * PI * (a.powi(3) / MU_KM3_S2).sqrt()
    }

    /// Sub-satellite point of `(plane, slot)` at `elapsed_s`
    pub fn position(&self, plane: u32, slot: u32) -> SatPosition {
        let total = f64::from(self.orbits * self.sats_per_orbit);
        let raan = 2.0 * PI * f64::from(plane) / f64::from(self.orbits);
        let mean_motion = 2.0 * PI / self.orbital_period_s();
        let anomaly = 2.0 * PI * f64::from(slot) / f64::from(self.sats_per_orbit)
            + 2.0 * PI * f64::from(self.phase_offset) * f64::from(plane) / total
            + mean_motion * self.elapsed_s;
        let inc = self.inclination_deg.to_radians();

        // Unit vector in the inertial frame
        let x = raan.cos() * anomaly.cos() - raan.sin() * anomaly.sin() * inc.cos();
        let y = raan.sin() * anomaly.cos() + raan.cos() * anomaly.sin() * inc.cos();
        let z = anomaly.sin() * inc.sin();

        let lat = z.clamp(-1.0, 1.0).asin().to_degrees();
        let lon = (y.atan2(x) - EARTH_ROTATION_RAD_S * self.elapsed_s).to_degrees();

        SatPosition {
            lat_deg: lat,
            lon_deg: geo::wrap_longitude(lon),
            alt_km: self.altitude_km,
            plane,
            slot,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.orbits == 0 || self.sats_per_orbit == 0 {
            return Err(PhaseError::InvalidParameter {
                name: "orbits",
                reason: format!("{} orbits x {} satellites is empty", self.orbits, self.sats_per_orbit),
            });
        }
        require_positive("altitude_km", self.altitude_km)?;
        if !self.elapsed_s.is_finite() {
            return Err(PhaseError::InvalidParameter {
                name: "elapsed_s",
                reason: format!("must be finite, got {}", self.elapsed_s),
            });
        }
        Ok(())
    }

    fn isls(&self) -> IslList {
        let mut links = BTreeSet::new();
        let mut add = |a: SatId, b: SatId| {
            if a != b {
                links.insert((a.min(b), a.max(b)));
            }
        };
        for plane in 0..self.orbits {
            for slot in 0..self.sats_per_orbit {
                let me = self.sat_id(plane, slot);
                add(me, self.sat_id(plane, (slot + 1) % self.sats_per_orbit));
                if plane + 1 < self.orbits {
                    add(me, self.sat_id(plane + 1, slot));
                } else if self.orbits > 2 {
                    // Seam between the last and first plane
                    add(me, self.sat_id(0, slot));
                }
            }
        }
        links.into_iter().collect()
    }
}

impl LsnStrategy for WalkerLsn {
    fn name(&self) -> &str {
        "walker"
    }

    fn param_description(&self) -> String {
        format!(
            "{}:{}/{}/{}@{}km+{}s",
            self.inclination_deg,
            self.orbits * self.sats_per_orbit,
            self.orbits,
            self.phase_offset,
            self.altitude_km,
            self.elapsed_s
        )
    }

    fn build(&self) -> Result<(SatPositions, NetworkGraph, IslList)> {
        self.validate()?;

        let mut positions = SatPositions::new();
        let mut network = NetworkGraph::new();
        for plane in 0..self.orbits {
            for slot in 0..self.sats_per_orbit {
                let id = self.sat_id(plane, slot);
                positions.insert(id, self.position(plane, slot));
                network.add_satellite(SatNode { id, plane, slot })?;
            }
        }

        let isls = self.isls();
        for &(a, b) in &isls {
            let length = geo::distance_km(&positions[&a].ecef_km(), &positions[&b].ecef_km());
            network.add_link(a, b, IslLink::new(length))?;
        }

        Ok((positions, network, isls))
    }
}

pub struct LsnPhase {
    settings: PhaseSettings,
    strategy: Box<dyn LsnStrategy>,
    pub pos_out: String,
    pub nw_out: String,
    pub isls_out: String,
}

impl LsnPhase {
    pub fn new(settings: PhaseSettings, strategy: impl LsnStrategy + 'static) -> Self {
        Self {
            settings,
            strategy: Box::new(strategy),
            pos_out: keys::SAT_POS.to_string(),
            nw_out: keys::SAT_NW.to_string(),
            isls_out: keys::SAT_ISLS.to_string(),
        }
    }
}

impl Phase for LsnPhase {
    fn name(&self) -> &str {
        "LSNPhase"
    }

    fn description(&self) -> String {
        format!("{}:{}", self.strategy.name(), self.strategy.param_description())
    }

    fn settings(&self) -> &PhaseSettings {
        &self.settings
    }

    fn inputs(&self) -> Vec<&str> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![
            OutputSlot::of::<SatPositions>(self.pos_out.as_str()),
            OutputSlot::of::<NetworkGraph>(self.nw_out.as_str()),
            OutputSlot::of::<IslList>(self.isls_out.as_str()),
        ]
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> sim_pipeline::Result<PhaseOutputs> {
        let (positions, network, isls) = self.strategy.build().map_err(|e| PipelineError::phase(ctx.phase(), e))?;

        let stats = network.stats();
        info!(
            "Constellation: {} satellites in {} planes, {} ISLs (mean {:.0} km), {} component(s)",
            stats.satellites, stats.planes, stats.links, stats.mean_link_km, stats.components
        );

        Ok(PhaseOutputs::new()
            .with(self.pos_out.as_str(), positions)
            .with(self.nw_out.as_str(), network)
            .with(self.isls_out.as_str(), isls))
    }
}
