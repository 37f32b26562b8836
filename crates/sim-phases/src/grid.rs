//! Ground grid generation and demand weighting

use crate::keys;
use crate::{require_positive, Result};
use constellation_graph::{GeoPoint, GridPos};
use serde::{Deserialize, Serialize};
use sim_pipeline::{OutputSlot, Phase, PhaseContext, PhaseOutputs, PhaseSettings, PipelineError};
use tracing::info;

pub trait GridStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn param_description(&self) -> String;

    /// Cell centres with unit weight
    fn build(&self) -> Result<GridPos>;
}

pub trait GridWeightStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Demand weight of one cell
    fn weight(&self, point: &GeoPoint) -> f64;
}

impl<W: GridWeightStrategy + ?Sized> GridWeightStrategy for Box<W> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn weight(&self, point: &GeoPoint) -> f64 {
        (**self).weight(point)
    }
}

/// Regular latitude/longitude grid of cell centres
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLonGrid {
    pub step_deg: f64,
}

impl GridStrategy for LatLonGrid {
    fn name(&self) -> &str {
        "latlon"
    }

    fn param_description(&self) -> String {
        format!("{}deg", self.step_deg)
    }

    fn build(&self) -> Result<GridPos> {
        require_positive("step_deg", self.step_deg)?;

        let rows = (180.0 / self.step_deg).floor().max(1.0) as u32;
        let cols = (360.0 / self.step_deg).floor().max(1.0) as u32;
        let (lat_step, lon_step) = (180.0 / f64::from(rows), 360.0 / f64::from(cols));

        let mut grid = GridPos::new();
        for row in 0..rows {
            let lat = -90.0 + lat_step * (f64::from(row) + 0.5);
            for col in 0..cols {
                let lon = -180.0 + lon_step * (f64::from(col) + 0.5);
                grid.insert(row * cols + col, GeoPoint::new(lat, lon));
            }
        }
        Ok(grid)
    }
}

/// Every cell generates the same demand
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UniformWeight;

impl GridWeightStrategy for UniformWeight {
    fn name(&self) -> &str {
        "uniform"
    }

    fn weight(&self, _: &GeoPoint) -> f64 {
        1.0
    }
}

/// Demand proportional to cell area (cosine of latitude)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatitudeWeight;

impl GridWeightStrategy for LatitudeWeight {
    fn name(&self) -> &str {
        "latitude"
    }

    fn weight(&self, point: &GeoPoint) -> f64 {
        point.lat_deg.to_radians().cos().max(0.0)
    }
}

pub struct GridPhase {
    settings: PhaseSettings,
    grid: Box<dyn GridStrategy>,
    weight: Box<dyn GridWeightStrategy>,
    pub grid_out: String,
    pub size_out: String,
}

impl GridPhase {
    pub fn new(
        settings: PhaseSettings,
        grid: impl GridStrategy + 'static,
        weight: impl GridWeightStrategy + 'static,
    ) -> Self {
        Self {
            settings,
            grid: Box::new(grid),
            weight: Box::new(weight),
            grid_out: keys::FULL_GRID_POS.to_string(),
            size_out: keys::GRID_FULL_SZ.to_string(),
        }
    }
}

impl Phase for GridPhase {
    fn name(&self) -> &str {
        "GridPhase"
    }

    fn description(&self) -> String {
        format!(
            "{}:{}+{}",
            self.grid.name(),
            self.grid.param_description(),
            self.weight.name()
        )
    }

    fn settings(&self) -> &PhaseSettings {
        &self.settings
    }

    fn inputs(&self) -> Vec<&str> {
        Vec::new()
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![
            OutputSlot::of::<GridPos>(self.grid_out.as_str()),
            OutputSlot::of::<usize>(self.size_out.as_str()),
        ]
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> sim_pipeline::Result<PhaseOutputs> {
        let mut grid = self.grid.build().map_err(|e| PipelineError::phase(ctx.phase(), e))?;
        for point in grid.values_mut() {
            point.weight = self.weight.weight(point);
        }
        info!("Grid: {} cells", grid.len());

        let size = grid.len();
        Ok(PhaseOutputs::new()
            .with(self.grid_out.as_str(), grid)
            .with(self.size_out.as_str(), size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_degree_grid() {
        let grid = LatLonGrid { step_deg: 10.0 }.build().unwrap();
        assert_eq!(grid.len(), 18 * 36);

        let first = grid[&0];
        assert_eq!((first.lat_deg, first.lon_deg), (-85.0, -175.0));
        let last = grid[&(18 * 36 - 1)];
        assert_eq!((last.lat_deg, last.lon_deg), (85.0, 175.0));
    }

    #[test]
    fn test_uneven_step_still_covers_globe() {
        let grid = LatLonGrid { step_deg: 7.0 }.build().unwrap();
        // 25 rows of 7.2 degrees, 51 columns of ~7.06 degrees
        assert_eq!(grid.len(), 25 * 51);
        assert!(grid.values().all(|p| p.lat_deg.abs() < 90.0));
    }

    #[test]
    fn test_invalid_step() {
        assert!(LatLonGrid { step_deg: 0.0 }.build().is_err());
        assert!(LatLonGrid { step_deg: f64::NAN }.build().is_err());
    }

    #[test]
    fn test_latitude_weight() {
        assert!((LatitudeWeight.weight(&GeoPoint::new(0.0, 10.0)) - 1.0).abs() < 1e-12);
        assert!((LatitudeWeight.weight(&GeoPoint::new(60.0, 10.0)) - 0.5).abs() < 1e-12);
        assert_eq!(UniformWeight.weight(&GeoPoint::new(60.0, 10.0)), 1.0);
    }
}
