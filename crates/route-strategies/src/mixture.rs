//! Probabilistic mixture routing
//!
//! Each call draws `a` uniformly from `[0, 1)` and hands the pair to one of
//! the four k-path heuristics according to fixed cumulative bands:
//!
//! | Band             | Delegate | Weight |
//! |------------------|----------|--------|
//! | `[0.000, 0.703)` | KSP      | 0.703  |
//! | `[0.703, 0.773)` | KDG      | 0.070  |
//! | `[0.773, 0.916)` | KDS      | 0.143  |
//! | `[0.916, 1.000)` | KLO      | 0.084  |
//!
//! Calls are independent and memoryless. The delegate is built fresh for
//! every call from the mixture's immutable parameters.

use crate::{KdgRouting, KdsRouting, KloRouting, KspRouting, Result, RoutingStrategy};
use constellation_graph::{Coverage, GridPos, LbSet, NetworkGraph, SdPair};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// The heuristics a mixture can delegate to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DelegateKind {
    Ksp,
    Kdg,
    Kds,
    Klo,
}

/// Exclusive upper bound of each cumulative band, in evaluation order
pub const MIXTURE_BANDS: [(f64, DelegateKind); 4] = [
    (0.703, DelegateKind::Ksp),
    (0.773, DelegateKind::Kdg),
    (0.916, DelegateKind::Kds),
    (1.000, DelegateKind::Klo),
];

/// Map a draw in `[0, 1)` to its delegate (left-inclusive, right-exclusive bands)
pub fn select_delegate(a: f64) -> DelegateKind {
    MIXTURE_BANDS
        .iter()
        .find(|(upper, _)| a < *upper)
        .map(|(_, kind)| *kind)
        .unwrap_or(DelegateKind::Klo)
}

/// Construction parameters of the mixture, passed through to delegates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixtureParams {
    pub desirability_stretch: f64,
    pub k: usize,
    /// Only forwarded to the KLO delegate
    pub esx_theta: f64,
}

/// Builds the delegate for one call
pub trait DelegateFactory: Send + Sync {
    fn build(&self, kind: DelegateKind, params: &MixtureParams) -> Box<dyn RoutingStrategy>;
}

/// The production delegates
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDelegates;

impl DelegateFactory for StandardDelegates {
    fn build(&self, kind: DelegateKind, params: &MixtureParams) -> Box<dyn RoutingStrategy> {
        let MixtureParams {
            desirability_stretch,
            k,
            esx_theta,
        } = *params;
        match kind {
            DelegateKind::Ksp => Box::new(KspRouting::new(desirability_stretch, k)),
            DelegateKind::Kdg => Box::new(KdgRouting::new(desirability_stretch, k)),
            DelegateKind::Kds => Box::new(KdsRouting::new(desirability_stretch, k)),
            DelegateKind::Klo => Box::new(KloRouting::new(desirability_stretch, k, esx_theta)),
        }
    }
}

/// Where the per-call uniform value comes from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DrawSource {
    /// Fresh entropy on every call (non-reproducible)
    Entropy,
    /// ChaCha8 stream keyed by the seed and the pair: reproducible and
    /// independent of how pairs are scheduled across workers
    Seeded(u64),
    /// Always the same value
    #[cfg(test)]
    Fixed(f64),
}

impl DrawSource {
    /// Suffix of the strategy parameter summary; `seed<n>` for seeded draws
    fn describe(&self) -> String {
        match self {
            DrawSource::Entropy => "entropy".to_string(),
            DrawSource::Seeded(seed) => format!("seed{}", seed),
            #[cfg(test)]
            DrawSource::Fixed(a) => format!("fixed{}", a),
        }
    }
}

/// Mixture routing strategy
pub struct MixtureRoutingStrategy {
    params: MixtureParams,
    draws: DrawSource,
    factory: Box<dyn DelegateFactory>,
}

impl MixtureRoutingStrategy {
    pub fn new(desirability_stretch: f64, k: usize, esx_theta: f64) -> Self {
        Self {
            params: MixtureParams {
                desirability_stretch,
                k,
                esx_theta,
            },
            draws: DrawSource::Entropy,
            factory: Box::new(StandardDelegates),
        }
    }

    pub fn with_draws(mut self, draws: DrawSource) -> Self {
        self.draws = draws;
        self
    }

    pub fn with_seed(self, seed: u64) -> Self {
        self.with_draws(DrawSource::Seeded(seed))
    }

    pub fn with_factory(mut self, factory: impl DelegateFactory + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    pub fn params(&self) -> MixtureParams {
        self.params
    }

    /// Label used for this strategy in reports
    pub fn label(&self) -> &str {
        "PROPOSED"
    }

    /// Draw the uniform value for `pair`
    pub fn draw(&self, pair: SdPair) -> f64 {
        match self.draws {
            DrawSource::Entropy => rand::thread_rng().gen::<f64>(),
            DrawSource::Seeded(seed) => ChaCha8Rng::seed_from_u64(mix_seed(seed, pair)).gen::<f64>(),
            #[cfg(test)]
            DrawSource::Fixed(a) => a,
        }
    }
}

impl std::fmt::Debug for MixtureRoutingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixtureRoutingStrategy")
            .field("params", &self.params)
            .field("draws", &self.draws)
            .finish_non_exhaustive()
    }
}

/// splitmix64 finaliser over the seed and the pair
fn mix_seed(seed: u64, pair: SdPair) -> u64 {
    let mut z = seed ^ ((u64::from(pair.src) << 32) | u64::from(pair.dst));
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

impl RoutingStrategy for MixtureRoutingStrategy {
    fn name(&self) -> &str {
        "random"
    }

    fn param_description(&self) -> String {
        format!(
            "{}k{}t{}:{}",
            self.params.desirability_stretch,
            self.params.k,
            self.params.esx_theta,
            self.draws.describe()
        )
    }

    fn compute(
        &self,
        pair: SdPair,
        grid: &GridPos,
        network: &NetworkGraph,
        coverage: &Coverage,
    ) -> Result<LbSet> {
        let a = self.draw(pair);
        let kind = select_delegate(a);
        trace!(%pair, a, ?kind, "mixture delegate selected");

        self.factory
            .build(kind, &self.params)
            .compute(pair, grid, network, coverage)
    }
}
