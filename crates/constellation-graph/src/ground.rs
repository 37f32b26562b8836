//! Ground grid, satellite positions and coverage

use crate::geo;
use crate::SatId;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ground cell identifier
pub type CellId = u32;

/// A source-destination demand pair between two ground cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SdPair {
    pub src: CellId,
    pub dst: CellId,
}

impl SdPair {
    pub fn new(src: CellId, dst: CellId) -> Self {
        Self { src, dst }
    }

    /// Same pair with endpoints ordered so that `src <= dst`
    pub fn canonical(self) -> Self {
        if self.src <= self.dst {
            self
        } else {
            Self::new(self.dst, self.src)
        }
    }

    pub fn reversed(self) -> Self {
        Self::new(self.dst, self.src)
    }
}

impl std::fmt::Display for SdPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}->{}", self.src, self.dst)
    }
}

/// A ground cell centre with its demand weight
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat_deg: f64,
    pub lon_deg: f64,
    /// Relative demand weight (0 = no traffic originates here)
    pub weight: f64,
}

impl GeoPoint {
    pub fn new(lat_deg: f64, lon_deg: f64) -> Self {
        Self {
            lat_deg,
            lon_deg,
            weight: 1.0,
        }
    }

    /// Position on the Earth's surface (km, ECEF)
    pub fn ecef_km(&self) -> Vector3<f64> {
        geo::ecef_km(self.lat_deg, self.lon_deg, 0.0)
    }
}

/// Grid position map: ground cell -> coordinate
pub type GridPos = BTreeMap<CellId, GeoPoint>;

/// Sub-satellite point and orbital slot of a satellite
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SatPosition {
    pub lat_deg: f64,
    pub lon_deg: f64,
    pub alt_km: f64,
    pub plane: u32,
    pub slot: u32,
}

impl SatPosition {
    pub fn ecef_km(&self) -> Vector3<f64> {
        geo::ecef_km(self.lat_deg, self.lon_deg, self.alt_km)
    }
}

/// Satellite position map
pub type SatPositions = BTreeMap<SatId, SatPosition>;

/// A satellite reachable from a ground cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Access {
    pub sat: SatId,
    /// Up/down link cost (slant range, km)
    pub cost_km: f64,
}

/// Coverage map: ground cell -> satellites currently visible from it
pub type Coverage = BTreeMap<CellId, Vec<Access>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_pair() {
        assert_eq!(SdPair::new(5, 2).canonical(), SdPair::new(2, 5));
        assert_eq!(SdPair::new(2, 5).canonical(), SdPair::new(2, 5));
        assert_eq!(SdPair::new(2, 5).reversed(), SdPair::new(5, 2));
    }

    #[test]
    fn test_pair_ordering_is_by_source_then_destination() {
        let mut pairs = vec![SdPair::new(1, 0), SdPair::new(0, 3), SdPair::new(0, 1)];
        pairs.sort();
        assert_eq!(pairs, vec![SdPair::new(0, 1), SdPair::new(0, 3), SdPair::new(1, 0)]);
    }

    #[test]
    fn test_pair_display() {
        assert_eq!(SdPair::new(3, 9).to_string(), "3->9");
    }
}
