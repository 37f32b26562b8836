//! Pipeline orchestrator
//!
//! Runs an ordered list of phases against one property store. Each phase is
//! either skipped (its persisted outputs are restored) or run (its inputs
//! are resolved, its outputs committed and persisted). The first failure
//! aborts the run; nothing is persisted for the failing phase or any later
//! one.

use crate::error::{PipelineError, Result};
use crate::phase::{Phase, PhaseContext};
use crate::store::PropertyStore;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseState {
    Pending,
    Skipped,
    Running,
    Done,
    Failed,
}

/// Outcome of one phase in the last run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub description: String,
    pub fingerprint: String,
    pub state: PhaseState,
    pub elapsed_ms: u64,
}

/// Lineage fingerprint of a phase: chained over every earlier phase
fn chain_fingerprint(previous: &str, phase: &dyn Phase) -> String {
    let mut hasher = DefaultHasher::new();
    previous.hash(&mut hasher);
    phase.name().hash(&mut hasher);
    phase.description().hash(&mut hasher);
    for slot in phase.outputs() {
        slot.key().hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

enum DumpStatus {
    Usable,
    Absent,
}

pub struct Pipeline {
    phases: Vec<Box<dyn Phase>>,
    store: PropertyStore,
    reports: Vec<PhaseReport>,
}

impl Pipeline {
    /// Validate the phase list. Every output key must have exactly one writer.
    pub fn new(phases: Vec<Box<dyn Phase>>, results_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut writers: BTreeMap<String, String> = BTreeMap::new();
        for phase in &phases {
            for input in phase.inputs() {
                if !writers.contains_key(input) {
                    debug!(
                        phase = phase.name(),
                        key = input,
                        "input not produced by an earlier phase, expected from seeded store"
                    );
                }
            }
            for slot in phase.outputs() {
                if let Some(first) = writers.insert(slot.key().to_string(), phase.name().to_string()) {
                    return Err(PipelineError::Config(format!(
                        "output '{}' written by both {} and {}",
                        slot.key(),
                        first,
                        phase.name()
                    )));
                }
            }
        }

        let reports = phases
            .iter()
            .map(|p| PhaseReport {
                name: p.name().to_string(),
                description: p.description(),
                fingerprint: String::new(),
                state: PhaseState::Pending,
                elapsed_ms: 0,
            })
            .collect();

        Ok(Self {
            phases,
            store: PropertyStore::with_dump_dir(results_dir),
            reports,
        })
    }

    /// Start from `store` instead of an empty one (results directory kept)
    pub fn with_store(mut self, mut store: PropertyStore) -> Self {
        if let Some(dir) = self.store.dump_dir() {
            store.set_dump_dir(dir.to_path_buf());
        }
        self.store = store;
        self
    }

    pub fn reports(&self) -> &[PhaseReport] {
        &self.reports
    }

    pub fn store(&self) -> &PropertyStore {
        &self.store
    }

    pub fn into_store(self) -> PropertyStore {
        self.store
    }

    /// Run every phase in order.
    ///
    /// An inactive phase reading a property recomputed earlier in the same
    /// run is run again: its dumps describe inputs that no longer exist.
    pub fn run(&mut self) -> Result<()> {
        let mut lineage = String::new();
        let mut recomputed: BTreeSet<String> = BTreeSet::new();
        for index in 0..self.phases.len() {
            let fingerprint = chain_fingerprint(&lineage, self.phases[index].as_ref());
            self.reports[index].fingerprint = fingerprint.clone();

            let started = Instant::now();
            let result = self.run_phase(index, &fingerprint, &recomputed);
            self.reports[index].elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(state) => {
                    if state == PhaseState::Done {
                        recomputed.extend(self.phases[index].outputs().iter().map(|s| s.key().to_string()));
                    }
                    self.reports[index].state = state;
                }
                Err(e) => {
                    self.reports[index].state = PhaseState::Failed;
                    warn!(phase = self.phases[index].name(), error = %e, "phase failed");
                    return Err(e);
                }
            }
            lineage = fingerprint;
        }
        Ok(())
    }

    fn run_phase(&mut self, index: usize, fingerprint: &str, recomputed: &BTreeSet<String>) -> Result<PhaseState> {
        let phase = self.phases[index].as_ref();
        let span = info_span!("phase", name = phase.name());
        let _guard = span.enter();

        let upstream_rerun = phase.inputs().into_iter().find(|key| recomputed.contains(*key));
        if let (false, Some(key)) = (phase.settings().active, upstream_rerun) {
            warn!("{} is inactive but its input {} was recomputed, running it", phase.name(), key);
        } else if !phase.settings().active {
            match check_dumps(&self.store, phase, fingerprint)? {
                DumpStatus::Usable => {
                    for slot in phase.outputs() {
                        slot.restore(&mut self.store).map_err(|e| PipelineError::StaleOrMissingDump {
                            phase: phase.name().to_string(),
                            key: slot.key().to_string(),
                            reason: e.to_string(),
                        })?;
                    }
                    info!("Skipped {}, restored {} output(s)", phase.name(), phase.outputs().len());
                    return Ok(PhaseState::Skipped);
                }
                DumpStatus::Absent => {
                    warn!("{} is inactive but has no dumps, running it", phase.name());
                }
            }
        }

        self.reports[index].state = PhaseState::Running;
        info!("Running {} [{}]", phase.name(), phase.description());

        for key in phase.inputs() {
            if !self.store.contains(key) {
                return Err(PipelineError::MissingProperty {
                    phase: phase.name().to_string(),
                    key: key.to_string(),
                });
            }
        }

        let outputs = {
            let ctx = PhaseContext::new(phase.name(), &self.store, phase.settings());
            phase.run(&ctx).map_err(|e| e.in_phase(phase.name()))?
        };

        let declared: BTreeSet<String> = phase.outputs().iter().map(|s| s.key().to_string()).collect();
        let produced: BTreeSet<String> = outputs.keys().map(str::to_string).collect();
        if let Some(key) = declared.difference(&produced).next() {
            return Err(PipelineError::MissingOutput {
                phase: phase.name().to_string(),
                key: key.clone(),
            });
        }
        if let Some(key) = produced.difference(&declared).next() {
            return Err(PipelineError::UndeclaredOutput {
                phase: phase.name().to_string(),
                key: key.clone(),
            });
        }

        for (key, artifact) in outputs.into_entries() {
            self.store.commit(key.clone(), artifact, fingerprint);
            let path = self.store.persist(&key)?;
            debug!(key = %key, path = %path.display(), "output persisted");
        }

        info!("Finished {}", phase.name());
        Ok(PhaseState::Done)
    }
}

/// Decide whether an inactive phase can be restored from its dumps
fn check_dumps(store: &PropertyStore, phase: &dyn Phase, fingerprint: &str) -> Result<DumpStatus> {
    let mut present = Vec::new();
    let mut absent = Vec::new();
    for slot in phase.outputs() {
        let found = store.dump_fingerprint(slot.key()).map_err(|e| PipelineError::StaleOrMissingDump {
            phase: phase.name().to_string(),
            key: slot.key().to_string(),
            reason: e.to_string(),
        })?;
        match found {
            Some(recorded) => present.push((slot.key().to_string(), recorded)),
            None => absent.push(slot.key().to_string()),
        }
    }

    if present.is_empty() {
        return Ok(DumpStatus::Absent);
    }
    if let Some(key) = absent.into_iter().next() {
        return Err(PipelineError::StaleOrMissingDump {
            phase: phase.name().to_string(),
            key,
            reason: "dump missing while sibling outputs are persisted".to_string(),
        });
    }
    for (key, recorded) in present {
        if recorded != fingerprint {
            return Err(PipelineError::StaleOrMissingDump {
                phase: phase.name().to_string(),
                key,
                reason: format!("fingerprint {} does not match {}", recorded, fingerprint),
            });
        }
    }
    Ok(DumpStatus::Usable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Outcome;
    use crate::phase::{OutputSlot, PhaseOutputs, PhaseSettings};
    use constellation_graph::KeyedTable;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Writes `0..count` under `key`
    struct Source {
        key: &'static str,
        count: u32,
        settings: PhaseSettings,
        runs: Arc<AtomicUsize>,
    }

    impl Phase for Source {
        fn name(&self) -> &str {
            "SourcePhase"
        }

        fn description(&self) -> String {
            format!("count{}", self.count)
        }

        fn settings(&self) -> &PhaseSettings {
            &self.settings
        }

        fn inputs(&self) -> Vec<&str> {
            Vec::new()
        }

        fn outputs(&self) -> Vec<OutputSlot> {
            vec![OutputSlot::of::<Vec<u32>>(self.key)]
        }

        fn run(&self, _: &PhaseContext<'_>) -> Result<PhaseOutputs> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(PhaseOutputs::new().with(self.key, (0..self.count).collect::<Vec<u32>>()))
        }
    }

    /// Reads a list and maps every element in parallel
    struct Halve {
        input: &'static str,
        settings: PhaseSettings,
    }

    impl Phase for Halve {
        fn name(&self) -> &str {
            "HalvePhase"
        }

        fn description(&self) -> String {
            "halve".to_string()
        }

        fn settings(&self) -> &PhaseSettings {
            &self.settings
        }

        fn inputs(&self) -> Vec<&str> {
            vec![self.input]
        }

        fn outputs(&self) -> Vec<OutputSlot> {
            vec![OutputSlot::of::<KeyedTable<u32, Outcome<f64>>>("halves")]
        }

        fn run(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutputs> {
            let values = ctx.get::<Vec<u32>>(self.input)?;
            let halves = ctx.for_each(values.iter().copied(), |v| {
                if v % 5 == 4 {
                    Err(format!("odd one out: {}", v))
                } else {
                    Ok(f64::from(*v) / 3.0)
                }
            })?;
            Ok(PhaseOutputs::new().with("halves", halves))
        }
    }

    fn phases(count: u32, active: bool, runs: &Arc<AtomicUsize>) -> Vec<Box<dyn Phase>> {
        let mut settings = PhaseSettings::parallel(3, 1);
        settings.active = active;
        vec![
            Box::new(Source {
                key: "numbers",
                count,
                settings: PhaseSettings { active, ..PhaseSettings::default() },
                runs: Arc::clone(runs),
            }),
            Box::new(Halve {
                input: "numbers",
                settings,
            }),
        ]
    }

    #[test]
    fn test_run_commits_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut pipeline = Pipeline::new(phases(20, true, &runs), dir.path()).unwrap();
        pipeline.run().unwrap();

        let halves = pipeline.store().get::<KeyedTable<u32, Outcome<f64>>>("halves").unwrap();
        assert_eq!(halves.len(), 20);
        assert!(halves.get(&4).and_then(Outcome::error).is_some());
        assert_eq!(halves.get(&3).and_then(Outcome::ok), Some(&1.0));
        assert!(dir.path().join("numbers.json").exists());
        assert!(dir.path().join("halves.json").exists());
        assert!(pipeline.reports().iter().all(|r| r.state == PhaseState::Done));
    }

    #[test]
    fn test_skipped_phases_replay_identical_values() {
        let dir = tempfile::tempdir().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut cold = Pipeline::new(phases(30, true, &runs), dir.path()).unwrap();
        cold.run().unwrap();
        let cold_store = cold.into_store();

        let mut warm = Pipeline::new(phases(30, false, &runs), dir.path()).unwrap();
        warm.run().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(warm.reports().iter().all(|r| r.state == PhaseState::Skipped));
        assert_eq!(
            cold_store.get::<KeyedTable<u32, Outcome<f64>>>("halves").unwrap(),
            warm.store().get::<KeyedTable<u32, Outcome<f64>>>("halves").unwrap()
        );
        assert_eq!(
            cold_store.get::<Vec<u32>>("numbers").unwrap(),
            warm.store().get::<Vec<u32>>("numbers").unwrap()
        );
    }

    #[test]
    fn test_cold_runs_are_idempotent() {
        let runs = Arc::new(AtomicUsize::new(0));
        let first_dir = tempfile::tempdir().unwrap();
        let second_dir = tempfile::tempdir().unwrap();

        let mut first = Pipeline::new(phases(25, true, &runs), first_dir.path()).unwrap();
        first.run().unwrap();
        let mut second = Pipeline::new(phases(25, true, &runs), second_dir.path()).unwrap();
        second.run().unwrap();

        assert_eq!(
            first.store().get::<KeyedTable<u32, Outcome<f64>>>("halves").unwrap(),
            second.store().get::<KeyedTable<u32, Outcome<f64>>>("halves").unwrap()
        );
        assert_eq!(first.reports()[1].fingerprint, second.reports()[1].fingerprint);
    }

    #[test]
    fn test_missing_input_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let phases: Vec<Box<dyn Phase>> = vec![
            Box::new(Source {
                key: "numbers",
                count: 5,
                settings: PhaseSettings::default(),
                runs: Arc::clone(&runs),
            }),
            Box::new(Halve {
                input: "never_written",
                settings: PhaseSettings::default(),
            }),
        ];

        let mut pipeline = Pipeline::new(phases, dir.path()).unwrap();
        let err = pipeline.run().unwrap_err();

        assert_eq!(err.location(), Some(("HalvePhase", "never_written")));
        assert!(dir.path().join("numbers.json").exists());
        assert!(!dir.path().join("halves.json").exists());
        assert_eq!(pipeline.reports()[1].state, PhaseState::Failed);
    }

    #[test]
    fn test_seeded_store_satisfies_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut seed = PropertyStore::new();
        seed.put("given", vec![8u32, 9]);

        let phases: Vec<Box<dyn Phase>> = vec![Box::new(Halve {
            input: "given",
            settings: PhaseSettings::default(),
        })];
        let mut pipeline = Pipeline::new(phases, dir.path()).unwrap().with_store(seed);
        pipeline.run().unwrap();

        let halves = pipeline.store().get::<KeyedTable<u32, Outcome<f64>>>("halves").unwrap();
        assert_eq!(halves.len(), 2);
        assert!(dir.path().join("halves.json").exists());
    }

    #[test]
    fn test_duplicate_output_rejected() {
        let runs = Arc::new(AtomicUsize::new(0));
        let source = |count| -> Box<dyn Phase> {
            Box::new(Source {
                key: "numbers",
                count,
                settings: PhaseSettings::default(),
                runs: Arc::clone(&runs),
            })
        };

        let err = Pipeline::new(vec![source(1), source(2)], "unused").err().unwrap();
        assert!(matches!(err, PipelineError::Config(ref msg) if msg.contains("numbers")));
    }

    #[test]
    fn test_stale_dump_detected() {
        let dir = tempfile::tempdir().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        Pipeline::new(phases(10, true, &runs), dir.path()).unwrap().run().unwrap();

        // Same keys, different parameters upstream
        let mut changed = Pipeline::new(phases(11, false, &runs), dir.path()).unwrap();
        let err = changed.run().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StaleOrMissingDump { ref key, .. } if key == "numbers"
        ));
    }

    /// Two outputs from one run
    struct Split {
        settings: PhaseSettings,
    }

    impl Phase for Split {
        fn name(&self) -> &str {
            "SplitPhase"
        }

        fn description(&self) -> String {
            "split".to_string()
        }

        fn settings(&self) -> &PhaseSettings {
            &self.settings
        }

        fn inputs(&self) -> Vec<&str> {
            Vec::new()
        }

        fn outputs(&self) -> Vec<OutputSlot> {
            vec![OutputSlot::of::<u32>("left"), OutputSlot::of::<u32>("right")]
        }

        fn run(&self, _: &PhaseContext<'_>) -> Result<PhaseOutputs> {
            Ok(PhaseOutputs::new().with("left", 1u32).with("right", 2u32))
        }
    }

    #[test]
    fn test_partial_dumps_detected() {
        let dir = tempfile::tempdir().unwrap();
        let split = |active| -> Vec<Box<dyn Phase>> {
            vec![Box::new(Split {
                settings: PhaseSettings { active, ..PhaseSettings::default() },
            })]
        };
        Pipeline::new(split(true), dir.path()).unwrap().run().unwrap();
        std::fs::remove_file(dir.path().join("right.json")).unwrap();

        let err = Pipeline::new(split(false), dir.path()).unwrap().run().unwrap_err();
        assert_eq!(err.location(), Some(("SplitPhase", "right")));
    }

    #[test]
    fn test_undeclared_output_rejected() {
        struct Extra(PhaseSettings);

        impl Phase for Extra {
            fn name(&self) -> &str {
                "ExtraPhase"
            }

            fn description(&self) -> String {
                String::new()
            }

            fn settings(&self) -> &PhaseSettings {
                &self.0
            }

            fn inputs(&self) -> Vec<&str> {
                Vec::new()
            }

            fn outputs(&self) -> Vec<OutputSlot> {
                vec![OutputSlot::of::<u32>("declared")]
            }

            fn run(&self, _: &PhaseContext<'_>) -> Result<PhaseOutputs> {
                Ok(PhaseOutputs::new().with("declared", 1u32).with("sneaky", 2u32))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = Pipeline::new(vec![Box::new(Extra(PhaseSettings::default()))], dir.path()).unwrap();
        let err = pipeline.run().unwrap_err();
        assert_eq!(err.location(), Some(("ExtraPhase", "sneaky")));
        assert!(!dir.path().join("declared.json").exists());
    }

    #[test]
    fn test_missing_upstream_dump_reruns_downstream() {
        let dir = tempfile::tempdir().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        Pipeline::new(phases(10, true, &runs), dir.path()).unwrap().run().unwrap();
        std::fs::remove_file(dir.path().join("numbers.json")).unwrap();

        // Source has no dump left, so it reruns and Halve follows it
        let mut resumed = Pipeline::new(phases(10, false, &runs), dir.path()).unwrap();
        resumed.run().unwrap();
        assert_eq!(resumed.reports()[0].state, PhaseState::Done);
        assert_eq!(resumed.reports()[1].state, PhaseState::Done);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Everything is persisted again, so a third pass restores both
        let mut again = Pipeline::new(phases(10, false, &runs), dir.path()).unwrap();
        again.run().unwrap();
        assert!(again.reports().iter().all(|r| r.state == PhaseState::Skipped));
    }

    #[test]
    fn test_rerun_upstream_value_reaches_downstream() {
        let dir = tempfile::tempdir().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        Pipeline::new(phases(10, true, &runs), dir.path()).unwrap().run().unwrap();

        // Upstream active with the same parameters, downstream inactive
        let mut mixed = phases(10, false, &runs);
        mixed[0] = Box::new(Source {
            key: "numbers",
            count: 10,
            settings: PhaseSettings::default(),
            runs: Arc::clone(&runs),
        });
        let mut pipeline = Pipeline::new(mixed, dir.path()).unwrap();
        pipeline.run().unwrap();
        assert_eq!(pipeline.reports()[1].state, PhaseState::Done);
    }

    #[test]
    fn test_inactive_without_dumps_runs() {
        let dir = tempfile::tempdir().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let mut pipeline = Pipeline::new(phases(4, false, &runs), dir.path()).unwrap();
        pipeline.run().unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(pipeline.reports().iter().all(|r| r.state == PhaseState::Done));
    }
}
