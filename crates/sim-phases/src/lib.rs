//! Sim Phases - the concrete stages of a constellation attack simulation
//!
//! Phase order of a full run:
//!
//! 1. `LsnPhase` - satellite positions and the ISL network
//! 2. `GridPhase` - weighted ground grid
//! 3. `CoveragePhase` - visible satellites per cell, covered grid
//! 4. `RoutingPhase` - load-balancing set per demand pair (parallel)
//! 5. `EdgePhase` - directed edge usage (parallel)
//! 6. `TrafficPhase` - link capacity and load
//! 7. `LinkAttackPhase` - flooding attack per link (parallel)
//! 8. `ZoneAttackPhase` - bottleneck attack between zone pairs (parallel)
//!
//! Every phase takes its algorithm as a strategy object and reads/writes
//! the property keys listed in [`keys`].

use constellation_graph::{CellId, GraphError};
use thiserror::Error;

pub mod attack;
pub mod coverage;
pub mod edges;
pub mod grid;
pub mod keys;
pub mod lsn;
pub mod routing;
pub mod traffic;
pub mod zone;

pub use attack::{
    AtkData, AttackFilterStrategy, AttackResult, BinSearchOptim, CapacityFeasibility, CellConstraint,
    DirectionalFilter, FeasibilityStrategy, FloodPlan, GeoConstraintStrategy, LinkAttack, LinkAttackPhase,
    NoConstraint, OptimStrategy, Verdict,
};
pub use coverage::{AngleCoverage, CoveragePhase, CoverageStrategy};
pub use edges::{BidirEdges, EdgeData, EdgeInfo, EdgePhase, EdgeStrategy, PathRef};
pub use grid::{GridPhase, GridStrategy, GridWeightStrategy, LatLonGrid, LatitudeWeight, UniformWeight};
pub use lsn::{IslList, LsnPhase, LsnStrategy, WalkerLsn};
pub use routing::{PairSelection, PathData, RoutingPhase};
pub use traffic::{
    BidirBwAssign, BwAssignStrategy, BwData, BwInfo, BwSelectStrategy, Demand, SampledBwSelect, TrafficPhase,
    WeightedBwSelect,
};
pub use zone::{
    DetectBneck, IslZoneEdges, KClosestZone, RandZoneSelect, ZoneAtkData, ZoneAttack, ZoneAttackPhase,
    ZoneAttackResult, ZoneBottleneckStrategy, ZoneBuildStrategy, ZoneEdgesStrategy, ZoneSelectStrategy, ZoneTraffic,
};

/// Collaborator strategy errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhaseError {
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Grid cell not found: {0}")]
    UnknownCell(CellId),
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, PhaseError>;

pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PhaseError::InvalidParameter {
            name,
            reason: format!("must be a positive number, got {}", value),
        })
    }
}
