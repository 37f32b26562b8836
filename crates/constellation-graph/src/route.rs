//! Paths, load-balancing sets and directed edge keys

use crate::SatId;
use serde::{Deserialize, Serialize};

/// Reserved edge index for the ground end of an up/down link
pub const GROUND: i64 = -1;

/// One route for a pair: source cell -> `sats` -> destination cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Satellites traversed, uplink satellite first
    pub sats: Vec<SatId>,
    /// Total cost including up and down links (km)
    pub cost_km: f64,
}

impl Path {
    pub fn new(sats: Vec<SatId>, cost_km: f64) -> Self {
        Self { sats, cost_km }
    }

    /// Number of inter-satellite hops
    pub fn isl_hops(&self) -> usize {
        self.sats.len().saturating_sub(1)
    }

    /// Directed edges traversed, ground access edges included
    pub fn edges(&self) -> Vec<EdgeKey> {
        let (Some(first), Some(last)) = (self.sats.first(), self.sats.last()) else {
            return Vec::new();
        };
        let mut edges = Vec::with_capacity(self.sats.len() + 1);
        edges.push(EdgeKey::uplink(*first));
        edges.extend(self.sats.windows(2).map(|hop| EdgeKey::isl(hop[0], hop[1])));
        edges.push(EdgeKey::downlink(*last));
        edges
    }
}

/// Load-balancing set: candidate paths for one pair (empty = infeasible)
pub type LbSet = Vec<Path>;

/// Directed edge between two network endpoints.
///
/// Either end may be [`GROUND`], in which case the edge is an up/down link
/// and no link attack applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeKey(pub i64, pub i64);

impl EdgeKey {
    pub fn isl(from: SatId, to: SatId) -> Self {
        Self(from as i64, to as i64)
    }

    pub fn uplink(sat: SatId) -> Self {
        Self(GROUND, sat as i64)
    }

    pub fn downlink(sat: SatId) -> Self {
        Self(sat as i64, GROUND)
    }

    pub fn touches_ground(&self) -> bool {
        self.0 == GROUND || self.1 == GROUND
    }

    pub fn reversed(&self) -> Self {
        Self(self.1, self.0)
    }
}

impl std::fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}
