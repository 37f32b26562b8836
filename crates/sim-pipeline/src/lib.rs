//! Sim Pipeline - phase orchestration for constellation simulation
//!
//! - `PropertyStore` - keyed artifact registry, persisted as JSON dumps
//! - `Phase` - one stage with declared inputs and outputs
//! - `ParallelExecutor` - chunked per-item fan-out on a rayon pool
//! - `Pipeline` - runs phases in order, skipping those whose dumps are reusable

pub mod codec;
pub mod error;
pub mod executor;
pub mod phase;
pub mod pipeline;
pub mod store;

pub use error::{PipelineError, Result};
pub use executor::{Outcome, ParallelExecutor};
pub use phase::{OutputSlot, Phase, PhaseContext, PhaseOutputs, PhaseSettings};
pub use pipeline::{Pipeline, PhaseReport, PhaseState};
pub use store::{Artifact, ErasedArtifact, PropertyStore};
