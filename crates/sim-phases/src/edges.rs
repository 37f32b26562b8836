//! Directed edge usage: which paths cross which links

use crate::keys;
use crate::routing::PathData;
use constellation_graph::{EdgeKey, KeyedTable, LbSet, SdPair};
use serde::{Deserialize, Serialize};
use sim_pipeline::{OutputSlot, Outcome, Phase, PhaseContext, PhaseOutputs, PhaseSettings};
use std::convert::Infallible;
use tracing::info;

/// One traversal of an edge by a routed path
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathRef {
    pub pair: SdPair,
    /// Index of the path in the pair's load-balancing set
    pub index: usize,
    /// Traffic flowing destination to source
    pub reverse: bool,
}

impl PathRef {
    /// Ground cell the traffic on this traversal originates from
    pub fn source_cell(&self) -> u32 {
        if self.reverse {
            self.pair.dst
        } else {
            self.pair.src
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub uses: Vec<PathRef>,
}

pub type EdgeData = KeyedTable<EdgeKey, EdgeInfo>;

pub trait EdgeStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Edges traversed by every path of one pair
    fn edges(&self, pair: SdPair, lb: &LbSet) -> Vec<(EdgeKey, PathRef)>;
}

/// Paths carry traffic both ways: each path contributes its directed edges
/// forward and the reversed edges backward
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BidirEdges;

impl EdgeStrategy for BidirEdges {
    fn name(&self) -> &str {
        "bidir"
    }

    fn edges(&self, pair: SdPair, lb: &LbSet) -> Vec<(EdgeKey, PathRef)> {
        let mut out = Vec::new();
        for (index, path) in lb.iter().enumerate() {
            let forward = PathRef { pair, index, reverse: false };
            let backward = PathRef { pair, index, reverse: true };
            for edge in path.edges() {
                out.push((edge, forward));
                out.push((edge.reversed(), backward));
            }
        }
        out
    }
}

pub struct EdgePhase {
    settings: PhaseSettings,
    strategy: Box<dyn EdgeStrategy>,
    pub paths_in: String,
    pub edges_out: String,
}

impl EdgePhase {
    pub fn new(settings: PhaseSettings, strategy: impl EdgeStrategy + 'static) -> Self {
        Self {
            settings,
            strategy: Box::new(strategy),
            paths_in: keys::PATH_DATA.to_string(),
            edges_out: keys::EDGE_DATA.to_string(),
        }
    }
}

impl Phase for EdgePhase {
    fn name(&self) -> &str {
        "EdgePhase"
    }

    fn description(&self) -> String {
        self.strategy.name().to_string()
    }

    fn settings(&self) -> &PhaseSettings {
        &self.settings
    }

    fn inputs(&self) -> Vec<&str> {
        vec![self.paths_in.as_str()]
    }

    fn outputs(&self) -> Vec<OutputSlot> {
        vec![OutputSlot::of::<EdgeData>(self.edges_out.as_str())]
    }

    fn run(&self, ctx: &PhaseContext<'_>) -> sim_pipeline::Result<PhaseOutputs> {
        let paths = ctx.get::<PathData>(&self.paths_in)?;

        let per_pair = ctx.for_each(paths.keys().copied(), |pair| {
            let edges = match paths.get(pair).and_then(Outcome::ok) {
                Some(lb) => self.strategy.edges(*pair, lb),
                None => Vec::new(),
            };
            Ok::<_, Infallible>(edges)
        })?;

        let mut edges = EdgeData::new();
        for (_, outcome) in per_pair {
            if let Outcome::Done(list) = outcome {
                for (edge, used_by) in list {
                    edges.entry(edge).or_default().uses.push(used_by);
                }
            }
        }
        for info in edges.values_mut() {
            info.uses.sort();
        }

        info!("Edges: {} directed edges in use", edges.len());
        Ok(PhaseOutputs::new().with(self.edges_out.as_str(), edges))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use constellation_graph::{Path, GROUND};

    #[test]
    fn test_bidir_edges_of_single_path() {
        let pair = SdPair::new(3, 8);
        let lb = vec![Path::new(vec![1, 2], 10.0)];
        let edges = BidirEdges.edges(pair, &lb);

        let forward: Vec<EdgeKey> = edges.iter().filter(|(_, r)| !r.reverse).map(|(e, _)| *e).collect();
        let backward: Vec<EdgeKey> = edges.iter().filter(|(_, r)| r.reverse).map(|(e, _)| *e).collect();
        assert_eq!(forward, vec![EdgeKey(GROUND, 1), EdgeKey(1, 2), EdgeKey(2, GROUND)]);
        assert_eq!(backward, vec![EdgeKey(1, GROUND), EdgeKey(2, 1), EdgeKey(GROUND, 2)]);
    }

    #[test]
    fn test_source_cell_follows_direction() {
        let pair = SdPair::new(3, 8);
        assert_eq!(PathRef { pair, index: 0, reverse: false }.source_cell(), 3);
        assert_eq!(PathRef { pair, index: 0, reverse: true }.source_cell(), 8);
    }

    #[test]
    fn test_phase_merges_uses() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = PathData::new();
        paths.insert(SdPair::new(0, 1), Outcome::Done(vec![Path::new(vec![5, 6], 2.0)]));
        paths.insert(SdPair::new(0, 2), Outcome::Done(vec![Path::new(vec![5, 6, 7], 3.0)]));
        paths.insert(SdPair::new(1, 2), Outcome::Failed("unreachable".to_string()));

        let mut store = sim_pipeline::PropertyStore::new();
        store.put(keys::PATH_DATA, paths);
        let phase = EdgePhase::new(PhaseSettings::parallel(2, 0), BidirEdges);
        let mut pipeline = sim_pipeline::Pipeline::new(vec![Box::new(phase)], dir.path())
            .unwrap()
            .with_store(store);
        pipeline.run().unwrap();

        let edges = pipeline.store().get::<EdgeData>(keys::EDGE_DATA).unwrap();
        assert_eq!(edges.get(&EdgeKey(5, 6)).unwrap().uses.len(), 2);
        assert_eq!(edges.get(&EdgeKey(6, 7)).unwrap().uses.len(), 1);
        assert!(edges.get(&EdgeKey(7, 6)).unwrap().uses[0].reverse);
        assert!(edges.get(&EdgeKey(GROUND, 5)).is_some());
    }
}
