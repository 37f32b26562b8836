//! Routing phase: one load-balancing set per demand pair

use crate::keys;
use constellation_graph::{Coverage, GridPos, KeyedTable, LbSet, NetworkGraph, SdPair};
use route_strategies::RoutingStrategy;
use serde::{Deserialize, Serialize};
use sim_pipeline::{OutputSlot, Outcome, Phase, PhaseContext, PhaseOutputs, PhaseSettings};
use tracing::{info, warn};

/// Routing result per pair
pub type PathData = KeyedTable<SdPair, Outcome<LbSet>>;

/// Which pairs get routed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PairSelection {
    Explicit(Vec<SdPair>),
    /// Every unordered pair of covered cells, optionally thinned to
    /// `max_pairs` by evenly strided sampling
    AllPairs { max_pairs: Option<usize> },
}

impl PairSelection {
    pub fn pairs(&self, grid: &GridPos) -> Vec<SdPair> {
        match self {
            PairSelection::Explicit(pairs) => pairs.clone(),
            PairSelection::AllPairs { max_pairs } => {
                let cells: Vec<_> = grid.keys().copied().collect();
                let mut all = Vec::with_capacity(cells.len() * cells.len().saturating_sub(1) / 2);
                for (i, src) in cells.iter().enumerate() {
                    for dst in &cells[i + 1..] {
                        all.push(SdPair::new(*src, *dst));
                    }
                }
                match max_pairs {
                    Some(max) if *max < all.len() => stride_sample(&all, *max),
                    _ => all,
                }
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            PairSelection::Explicit(pairs) => format!("explicit{}", pairs.len()),
            PairSelection::AllPairs { max_pairs: None } => "all".to_string(),
            PairSelection::AllPairs { max_pairs: Some(max) } => format!("all<={}", max),
        }
    }
}

fn stride_sample(all: &[SdPair], count: usize) -> Vec<SdPair> {
    (0..count).map(|i| all[i * all.len() / count]).collect()
}

pub struct RoutingPhase {
    settings: PhaseSettings,
    strategy: Box<dyn RoutingStrategy>,
    selection: PairSelection,
    pub grid_in: String,
    pub cov_in: String,
    pub nw_in: String,
    pub paths_out: String,
}

impl RoutingPhase {
    pub fn new(settings: PhaseSettings, strategy: Box<dyn RoutingStrategy>, selection: PairSelection) -> Self {
        Self {
            settings,
            strategy,
            selection,
            grid_in: keys::GRID_POS.to_string(),
            cov_in: keys::COVERAGE.to_string(),
            nw_in: keys::SAT_NW.to_string(),
            paths_out: keys::PATH_DATA.to_string(),
        }
    }
}

impl Phase for RoutingPhase {
    fn name(&self) -> &str {
        "RoutingPhase"
    }

    fn description(&self) -> String {
        format!(
            "{}:{}/{}",
            self.strategy.name(),
            self.strategy.param_description(),
            self.selection.describe()
        )
    }

    fn settings(&self) -> &PhaseSettings {
        &self.settings
    }

    fn inputs(&self) -> Vec<&str> {
        vec![self.grid_in.as_str(), self.cov_in.as_str(), self.nw_in.as_str()]
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::of::<PathData>(self.paths_out.as_str())]
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> sim_pipeline::Result<PhaseOutputs> {
        let grid = ctx.get::<GridPos>(&self.grid_in)?;
        let coverage = ctx.get::<Coverage>(&self.cov_in)?;
        let network = ctx.get::<NetworkGraph>(&self.nw_in)?;

        let pairs = self.selection.pairs(&grid);
        info!("Routing {} pairs with {}", pairs.len(), self.strategy.name());

        let paths: PathData = ctx.for_each(pairs, |pair| {
            self.strategy.compute(*pair, &grid, &network, &coverage)
        })?;

        let failed = paths.values().filter(|o| !o.is_done()).count();
        let infeasible = paths.values().filter(|o| o.ok().is_some_and(|lb| lb.is_empty())).count();
        if failed > 0 {
            warn!("{} pair(s) failed to route", failed);
        }
        info!("Routed {} pairs, {} infeasible", paths.len(), infeasible);

        Ok(PhaseOutputs::new().with(self.paths_out.as_str(), paths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use constellation_graph::{Access, GeoPoint, IslLink, SatNode};
    use route_strategies::{KspRouting, MixtureRoutingStrategy};
    use sim_pipeline::{PhaseState, Pipeline, PipelineError, PropertyStore};

    fn grid(n: u32) -> GridPos {
        (0..n).map(|c| (c, GeoPoint::new(0.0, f64::from(c)))).collect()
    }

    fn ring_store(cells: u32) -> PropertyStore {
        let mut network = NetworkGraph::new();
        for id in 0..5 {
            network.add_satellite(SatNode { id, plane: 0, slot: id }).unwrap();
        }
        for id in 0..5 {
            network.add_link(id, (id + 1) % 5, IslLink::new(1000.0)).unwrap();
        }
        let coverage: Coverage = (0..cells)
            .map(|c| (c, vec![Access { sat: c % 5, cost_km: 600.0 }]))
            .collect();

        let mut store = PropertyStore::new();
        store.put(keys::SAT_NW, network);
        store.put(keys::GRID_POS, grid(cells));
        store.put(keys::COVERAGE, coverage);
        store
    }

    #[test]
    fn test_all_pairs_and_sampling() {
        let grid = grid(6);
        let all = PairSelection::AllPairs { max_pairs: None }.pairs(&grid);
        assert_eq!(all.len(), 15);
        assert!(all.iter().all(|p| p.src < p.dst));

        let sampled = PairSelection::AllPairs { max_pairs: Some(5) }.pairs(&grid);
        assert_eq!(sampled.len(), 5);
        assert_eq!(sampled[0], all[0]);
        assert_eq!(sampled[1], all[3]);

        let capped = PairSelection::AllPairs { max_pairs: Some(100) }.pairs(&grid);
        assert_eq!(capped, all);
    }

    #[test]
    fn test_ring_scenario_routes_every_pair() {
        let dir = tempfile::tempdir().unwrap();
        let pairs: Vec<SdPair> = (0..100).map(|i| SdPair::new(i % 10, 10 + i / 10)).collect();
        let phase = RoutingPhase::new(
            PhaseSettings::parallel(4, 2),
            Box::new(MixtureRoutingStrategy::new(2.3, 5, 0.5).with_seed(42)),
            PairSelection::Explicit(pairs.clone()),
        );

        let mut pipeline = Pipeline::new(vec![Box::new(phase)], dir.path())
            .unwrap()
            .with_store(ring_store(20));
        pipeline.run().unwrap();

        let paths = pipeline.store().get::<PathData>(keys::PATH_DATA).unwrap();
        assert_eq!(paths.len(), 100);
        for pair in &pairs {
            let lb = paths.get(pair).and_then(Outcome::ok).unwrap();
            assert!(lb.iter().all(|p| !p.sats.is_empty()));
        }
    }

    #[test]
    fn test_changed_seed_invalidates_resumed_paths() {
        let dir = tempfile::tempdir().unwrap();
        let routing = |settings: PhaseSettings, seed: u64| -> Vec<Box<dyn Phase>> {
            vec![Box::new(RoutingPhase::new(
                settings,
                Box::new(MixtureRoutingStrategy::new(2.3, 5, 0.5).with_seed(seed)),
                PairSelection::AllPairs { max_pairs: None },
            ))]
        };

        let mut first = Pipeline::new(routing(PhaseSettings::default(), 1), dir.path())
            .unwrap()
            .with_store(ring_store(8));
        first.run().unwrap();

        let mut same = Pipeline::new(routing(PhaseSettings::default().inactive(), 1), dir.path())
            .unwrap()
            .with_store(ring_store(8));
        same.run().unwrap();
        assert_eq!(same.reports()[0].state, PhaseState::Skipped);

        let mut other = Pipeline::new(routing(PhaseSettings::default().inactive(), 2), dir.path())
            .unwrap()
            .with_store(ring_store(8));
        let err = other.run().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StaleOrMissingDump { ref key, .. } if key == keys::PATH_DATA
        ));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let run = |settings: PhaseSettings| {
            let dir = tempfile::tempdir().unwrap();
            let phase = RoutingPhase::new(
                settings,
                Box::new(KspRouting::new(2.0, 3)),
                PairSelection::AllPairs { max_pairs: None },
            );
            let mut pipeline = Pipeline::new(vec![Box::new(phase)], dir.path())
                .unwrap()
                .with_store(ring_store(12));
            pipeline.run().unwrap();
            pipeline.into_store().get::<PathData>(keys::PATH_DATA).unwrap()
        };

        assert_eq!(run(PhaseSettings::default()), run(PhaseSettings::parallel(3, 1)));
    }

    #[test]
    fn test_unknown_cell_recorded_as_failure() {
        let dir = tempfile::tempdir().unwrap();
        let phase = RoutingPhase::new(
            PhaseSettings::default(),
            Box::new(KspRouting::new(2.0, 3)),
            PairSelection::Explicit(vec![SdPair::new(0, 1), SdPair::new(0, 99)]),
        );
        let mut pipeline = Pipeline::new(vec![Box::new(phase)], dir.path())
            .unwrap()
            .with_store(ring_store(4));
        pipeline.run().unwrap();

        let paths = pipeline.store().get::<PathData>(keys::PATH_DATA).unwrap();
        assert!(paths.get(&SdPair::new(0, 1)).unwrap().is_done());
        assert!(paths.get(&SdPair::new(0, 99)).unwrap().error().unwrap().contains("99"));
    }

    #[test]
    fn test_missing_network_names_key() {
        let dir = tempfile::tempdir().unwrap();
        let full = ring_store(4);
        let mut store = PropertyStore::new();
        store.put(keys::GRID_POS, full.get::<GridPos>(keys::GRID_POS).unwrap().as_ref().clone());
        store.put(keys::COVERAGE, full.get::<Coverage>(keys::COVERAGE).unwrap().as_ref().clone());
        let phase = RoutingPhase::new(
            PhaseSettings::default(),
            Box::new(KspRouting::new(2.0, 3)),
            PairSelection::AllPairs { max_pairs: None },
        );

        let mut pipeline = Pipeline::new(vec![Box::new(phase)], dir.path()).unwrap().with_store(store);
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, PipelineError::MissingProperty { ref key, .. } if key == keys::SAT_NW));
        assert!(!dir.path().join("path_data.json").exists());
    }
}
