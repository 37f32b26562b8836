//! Elevation-angle coverage

use crate::keys;
use crate::{PhaseError, Result};
use constellation_graph::{geo, Access, Coverage, GeoPoint, GridPos, SatPositions};
use serde::{Deserialize, Serialize};
use sim_pipeline::{OutputSlot, Phase, PhaseContext, PhaseOutputs, PhaseSettings, PipelineError};
use tracing::{debug, info};

pub trait CoverageStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn param_description(&self) -> String;

    /// Reject unusable parameters once, before any cell is evaluated
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Satellites visible from `cell`, cheapest access first
    fn visible(&self, cell: &GeoPoint, sats: &SatPositions) -> Result<Vec<Access>>;
}

/// A satellite covers a cell when it is at least `min_elev_angle_deg` above
/// the cell's horizon; the access cost is the slant range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleCoverage {
    pub min_elev_angle_deg: f64,
}

impl CoverageStrategy for AngleCoverage {
    fn name(&self) -> &str {
        "angle"
    }

    fn param_description(&self) -> String {
        format!("{}deg", self.min_elev_angle_deg)
    }

    fn validate(&self) -> Result<()> {
        if (0.0..=90.0).contains(&self.min_elev_angle_deg) {
            Ok(())
        } else {
            Err(PhaseError::InvalidParameter {
                name: "min_elev_angle_deg",
                reason: format!("must lie in [0, 90], got {}", self.min_elev_angle_deg),
            })
        }
    }

    fn visible(&self, cell: &GeoPoint, sats: &SatPositions) -> Result<Vec<Access>> {
        self.validate()?;

        let ground = cell.ecef_km();
        let mut visible: Vec<Access> = sats
            .iter()
            .filter_map(|(id, pos)| {
                let sat = pos.ecef_km();
                (geo::elevation_deg(&ground, &sat) >= self.min_elev_angle_deg).then(|| Access {
                    sat: *id,
                    cost_km: geo::distance_km(&ground, &sat),
                })
            })
            .collect();
        visible.sort_by(|a, b| a.cost_km.total_cmp(&b.cost_km).then(a.sat.cmp(&b.sat)));
        Ok(visible)
    }
}

pub struct CoveragePhase {
    settings: PhaseSettings,
    strategy: Box<dyn CoverageStrategy>,
    pub sat_in: String,
    pub grid_in: String,
    pub cov_out: String,
    pub grid_out: String,
}

impl CoveragePhase {
    pub fn new(settings: PhaseSettings, strategy: impl CoverageStrategy + 'static) -> Self {
        Self {
            settings,
            strategy: Box::new(strategy),
            sat_in: keys::SAT_POS.to_string(),
            grid_in: keys::FULL_GRID_POS.to_string(),
            cov_out: keys::COVERAGE.to_string(),
            grid_out: keys::GRID_POS.to_string(),
        }
    }
}

impl Phase for CoveragePhase {
    fn name(&self) -> &str {
        "CoveragePhase"
    }

    fn description(&self) -> String {
        format!("{}:{}", self.strategy.name(), self.strategy.param_description())
    }

    fn settings(&self) -> &PhaseSettings {
        &self.settings
    }

    fn inputs(&self) -> Vec<&str> {
        vec![self.sat_in.as_str(), self.grid_in.as_str()]
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![
            OutputSlot::of::<Coverage>(self.cov_out.as_str()),
            OutputSlot::of::<GridPos>(self.grid_out.as_str()),
        ]
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> sim_pipeline::Result<PhaseOutputs> {
        let sats = ctx.get::<SatPositions>(&self.sat_in)?;
        let full_grid = ctx.get::<GridPos>(&self.grid_in)?;
        self.strategy
            .validate()
            .map_err(|e| PipelineError::phase(ctx.phase(), e))?;

        let per_cell = ctx.for_each(full_grid.keys().copied(), |cell| {
            self.strategy.visible(&full_grid[cell], &sats)
        })?;

        let mut coverage = Coverage::new();
        let mut grid = GridPos::new();
        for (cell, outcome) in per_cell {
            match outcome {
                sim_pipeline::Outcome::Done(access) if !access.is_empty() => {
                    grid.insert(cell, full_grid[&cell]);
                    coverage.insert(cell, access);
                }
                sim_pipeline::Outcome::Done(_) => {}
                sim_pipeline::Outcome::Failed(reason) => {
                    debug!(cell, reason = %reason, "cell left uncovered");
                }
            }
        }

        info!(
            "Coverage: {} of {} cells see at least one satellite",
            grid.len(),
            full_grid.len()
        );

        Ok(PhaseOutputs::new()
            .with(self.cov_out.as_str(), coverage)
            .with(self.grid_out.as_str(), grid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use constellation_graph::SatPosition;
    use sim_pipeline::{Pipeline, PropertyStore};

    fn sat(lat_deg: f64, lon_deg: f64) -> SatPosition {
        SatPosition {
            lat_deg,
            lon_deg,
            alt_km: 550.0,
            plane: 0,
            slot: 0,
        }
    }

    #[test]
    fn test_overhead_visible_far_not() {
        let mut sats = SatPositions::new();
        sats.insert(0, sat(0.0, 0.0));
        sats.insert(1, sat(0.0, 3.0));
        sats.insert(2, sat(0.0, 90.0));

        let visible = AngleCoverage { min_elev_angle_deg: 40.0 }
            .visible(&GeoPoint::new(0.0, 0.0), &sats)
            .unwrap();

        let ids: Vec<u32> = visible.iter().map(|a| a.sat).collect();
        assert_eq!(ids, vec![0, 1]);
        assert!((visible[0].cost_km - 550.0).abs() < 1e-6);
        assert!(visible[1].cost_km > visible[0].cost_km);
    }

    #[test]
    fn test_zero_angle_sees_to_horizon() {
        let mut sats = SatPositions::new();
        sats.insert(7, sat(0.0, 20.0));

        let strict = AngleCoverage { min_elev_angle_deg: 40.0 };
        let lax = AngleCoverage { min_elev_angle_deg: 0.0 };
        let cell = GeoPoint::new(0.0, 0.0);
        assert!(strict.visible(&cell, &sats).unwrap().is_empty());
        assert_eq!(lax.visible(&cell, &sats).unwrap().len(), 1);
    }

    /// Fails on cells east of the prime meridian
    struct WestOnly;

    impl CoverageStrategy for WestOnly {
        fn name(&self) -> &str {
            "west"
        }

        fn param_description(&self) -> String {
            String::new()
        }

        fn visible(&self, cell: &GeoPoint, sats: &SatPositions) -> Result<Vec<Access>> {
            if cell.lon_deg > 0.0 {
                return Err(PhaseError::UnknownCell(0));
            }
            Ok(sats.keys().map(|&sat| Access { sat, cost_km: 600.0 }).collect())
        }
    }

    fn coverage_store() -> PropertyStore {
        let mut sats = SatPositions::new();
        sats.insert(0, sat(0.0, 0.0));
        let mut grid = GridPos::new();
        grid.insert(0, GeoPoint::new(0.0, -10.0));
        grid.insert(1, GeoPoint::new(0.0, 10.0));
        let mut store = PropertyStore::new();
        store.put(keys::SAT_POS, sats);
        store.put(keys::FULL_GRID_POS, grid);
        store
    }

    #[test]
    fn test_failed_cell_is_left_uncovered() {
        let dir = tempfile::tempdir().unwrap();
        let phase = CoveragePhase::new(PhaseSettings::default(), WestOnly);
        let mut pipeline = Pipeline::new(vec![Box::new(phase)], dir.path())
            .unwrap()
            .with_store(coverage_store());
        pipeline.run().unwrap();

        let grid = pipeline.store().get::<GridPos>(keys::GRID_POS).unwrap();
        let coverage = pipeline.store().get::<Coverage>(keys::COVERAGE).unwrap();
        assert_eq!(grid.keys().copied().collect::<Vec<_>>(), vec![0]);
        assert_eq!(coverage.len(), 1);
    }

    #[test]
    fn test_bad_angle_fails_before_fan_out() {
        let dir = tempfile::tempdir().unwrap();
        let phase = CoveragePhase::new(PhaseSettings::default(), AngleCoverage { min_elev_angle_deg: -5.0 });
        let mut pipeline = Pipeline::new(vec![Box::new(phase)], dir.path())
            .unwrap()
            .with_store(coverage_store());

        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, PipelineError::Phase { ref phase, .. } if phase == "CoveragePhase"));
        assert!(!dir.path().join("coverage.json").exists());
    }

    #[test]
    fn test_angle_out_of_range() {
        let sats = SatPositions::new();
        let err = AngleCoverage { min_elev_angle_deg: 95.0 }
            .visible(&GeoPoint::new(0.0, 0.0), &sats)
            .unwrap_err();
        assert!(matches!(err, PhaseError::InvalidParameter { .. }));
    }
}
