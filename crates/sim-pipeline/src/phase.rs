//! Phase contract
//!
//! A phase is one pipeline stage with declared inputs and outputs. It reads
//! its inputs through a [`PhaseContext`] and returns its outputs as a
//! [`PhaseOutputs`] bundle; the orchestrator commits and persists them.

use crate::error::{PipelineError, Result};
use crate::executor::{Outcome, ParallelExecutor};
use crate::store::{Artifact, ErasedArtifact, PropertyStore};
use constellation_graph::KeyedTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

/// Execution settings shared by every phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSettings {
    /// Run the phase; when false the persisted outputs are reused
    pub active: bool,
    /// Fan per-item work out to a worker pool
    pub parallel: bool,
    pub core_count: usize,
    pub chunk_granularity_exponent: u32,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            active: true,
            parallel: false,
            core_count: 1,
            chunk_granularity_exponent: 0,
        }
    }
}

impl PhaseSettings {
    pub fn parallel(core_count: usize, chunk_granularity_exponent: u32) -> Self {
        Self {
            active: true,
            parallel: true,
            core_count,
            chunk_granularity_exponent,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    /// Executor matching these settings
    pub fn executor(&self) -> ParallelExecutor {
        if self.parallel {
            ParallelExecutor::new(self.core_count, self.chunk_granularity_exponent)
        } else {
            ParallelExecutor::sequential()
        }
    }
}

type RestoreFn = fn(&mut PropertyStore, &str) -> Result<()>;

fn restore_as<T: Artifact>(store: &mut PropertyStore, key: &str) -> Result<()> {
    store.load::<T>(key).map(|_| ())
}

/// A declared output key together with how to restore it from its dump
#[derive(Clone)]
pub struct OutputSlot {
    key: String,
    restore: RestoreFn,
}

impl OutputSlot {
    pub fn of<T: Artifact>(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            restore: restore_as::<T>,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn restore(&self, store: &mut PropertyStore) -> Result<()> {
        (self.restore)(store, &self.key)
    }
}

impl std::fmt::Debug for OutputSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OutputSlot").field(&self.key).finish()
    }
}

/// Values produced by one phase run
#[derive(Debug, Default)]
pub struct PhaseOutputs {
    values: BTreeMap<String, ErasedArtifact>,
}

impl PhaseOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Artifact>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), ErasedArtifact::new(value));
    }

    pub fn with<T: Artifact>(mut self, key: impl Into<String>, value: T) -> Self {
        self.insert(key, value);
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub(crate) fn into_entries(self) -> impl Iterator<Item = (String, ErasedArtifact)> {
        self.values.into_iter()
    }
}

/// What a running phase can see
pub struct PhaseContext<'a> {
    phase: &'a str,
    store: &'a PropertyStore,
    executor: ParallelExecutor,
}

impl<'a> PhaseContext<'a> {
    pub fn new(phase: &'a str, store: &'a PropertyStore, settings: &PhaseSettings) -> Self {
        Self {
            phase,
            store,
            executor: settings.executor(),
        }
    }

    pub fn phase(&self) -> &str {
        self.phase
    }

    /// Input value under `key`
    pub fn get<T: Artifact>(&self, key: &str) -> Result<Arc<T>> {
        self.store.get(key).map_err(|e| match e {
            PipelineError::MissingProperty { key, .. } => PipelineError::MissingProperty {
                phase: self.phase.to_string(),
                key,
            },
            other => other,
        })
    }

    pub fn executor(&self) -> &ParallelExecutor {
        &self.executor
    }

    /// Per-item fan-out on this phase's executor
    pub fn for_each<K, V, E, F>(&self, items: impl IntoIterator<Item = K>, f: F) -> Result<KeyedTable<K, Outcome<V>>>
    where
        K: Ord + Clone + Send + Sync,
        V: Send,
        E: Display,
        F: Fn(&K) -> std::result::Result<V, E> + Sync,
    {
        self.executor.run(items, f).map_err(|e| e.in_phase(self.phase))
    }
}

/// One pipeline stage
pub trait Phase {
    fn name(&self) -> &str;

    /// Strategy parameter summary; part of the lineage fingerprint
    fn description(&self) -> String;

    fn settings(&self) -> &PhaseSettings;

    /// Keys read from the store
    fn inputs(&self) -> Vec<&str>;

    /// Keys written to the store
    fn outputs(&self) -> Vec<OutputSlot>;

    fn run(&self, ctx: &PhaseContext<'_>) -> Result<PhaseOutputs>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: PhaseSettings = serde_json::from_str(r#"{"parallel": true, "core_count": 8}"#).unwrap();
        assert!(settings.active);
        assert!(settings.parallel);
        assert_eq!(settings.core_count, 8);
        assert_eq!(settings.chunk_granularity_exponent, 0);
    }

    #[test]
    fn test_sequential_unless_parallel() {
        let mut settings = PhaseSettings::parallel(8, 2);
        assert_eq!(settings.executor(), ParallelExecutor::new(8, 2));
        settings.parallel = false;
        assert_eq!(settings.executor(), ParallelExecutor::sequential());
    }

    #[test]
    fn test_context_names_phase_on_missing_input() {
        let store = PropertyStore::new();
        let ctx = PhaseContext::new("routing", &store, &PhaseSettings::default());

        let err = ctx.get::<u32>("grid_pos").unwrap_err();
        assert_eq!(err.location(), Some(("routing", "grid_pos")));
    }

    #[test]
    fn test_slot_restores_typed_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = PropertyStore::with_dump_dir(dir.path());
        store.put("n", vec![1u32, 2, 3]);
        store.persist("n").unwrap();

        let mut fresh = PropertyStore::with_dump_dir(dir.path());
        OutputSlot::of::<Vec<u32>>("n").restore(&mut fresh).unwrap();
        assert_eq!(*fresh.get::<Vec<u32>>("n").unwrap(), vec![1, 2, 3]);
    }
}
