//! Chunked data-parallel executor
//!
//! Items are deduplicated and ordered, split into `core_count * 2^exponent`
//! chunks and dispatched to a dedicated rayon pool of `core_count` threads.
//! Partial results are merged by key, so the output never depends on the
//! worker count, the granularity or the scheduling order.

use crate::error::{PipelineError, Result};
use constellation_graph::KeyedTable;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::debug;

/// Result of one item: the computed value or the recorded per-item failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<V> {
    Done(V),
    Failed(String),
}

impl<V> Outcome<V> {
    pub fn ok(&self) -> Option<&V> {
        match self {
            Outcome::Done(v) => Some(v),
            Outcome::Failed(_) => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Outcome::Done(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Outcome::Done(_) => None,
            Outcome::Failed(msg) => Some(msg),
        }
    }

    fn from_result<E: Display>(result: std::result::Result<V, E>) -> Self {
        match result {
            Ok(v) => Outcome::Done(v),
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelExecutor {
    core_count: usize,
    chunk_granularity_exponent: u32,
}

impl ParallelExecutor {
    pub fn new(core_count: usize, chunk_granularity_exponent: u32) -> Self {
        Self {
            core_count: core_count.max(1),
            chunk_granularity_exponent: chunk_granularity_exponent.min(16),
        }
    }

    /// Single worker, single chunk
    pub fn sequential() -> Self {
        Self::new(1, 0)
    }

    pub fn core_count(&self) -> usize {
        self.core_count
    }

    pub fn chunk_count(&self) -> usize {
        self.core_count << self.chunk_granularity_exponent
    }

    /// Items per chunk for `n` items (at least one)
    pub fn chunk_size(&self, n: usize) -> usize {
        n.div_ceil(self.chunk_count()).max(1)
    }

    /// Apply `f` to every distinct item.
    ///
    /// A strategy error is recorded as `Outcome::Failed` for its item; a
    /// panic inside a chunk aborts the whole batch with `WorkerFailure`.
    pub fn run<K, V, E, F>(&self, items: impl IntoIterator<Item = K>, f: F) -> Result<KeyedTable<K, Outcome<V>>>
    where
        K: Ord + Clone + Send + Sync,
        V: Send,
        E: Display,
        F: Fn(&K) -> std::result::Result<V, E> + Sync,
    {
        let items: Vec<K> = items.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        if items.is_empty() {
            return Ok(KeyedTable::new());
        }

        let chunk_size = self.chunk_size(items.len());
        let chunks: Vec<&[K]> = items.chunks(chunk_size).collect();
        debug!(
            items = items.len(),
            chunks = chunks.len(),
            chunk_size,
            workers = self.core_count,
            "dispatching work"
        );

        let work = |index: usize, chunk: &[K]| -> Result<Vec<(K, Outcome<V>)>> {
            catch_unwind(AssertUnwindSafe(|| {
                chunk
                    .iter()
                    .map(|item| (item.clone(), Outcome::from_result(f(item))))
                    .collect::<Vec<_>>()
            }))
            .map_err(|payload| PipelineError::WorkerFailure {
                phase: None,
                chunk: index,
                message: panic_message(payload.as_ref()),
            })
        };

        let partials: Vec<Result<Vec<(K, Outcome<V>)>>> = if self.core_count == 1 {
            chunks.iter().enumerate().map(|(i, c)| work(i, *c)).collect()
        } else {
            let pool = ThreadPoolBuilder::new()
                .num_threads(self.core_count)
                .thread_name(|i| format!("lsn-worker-{}", i))
                .build()
                .map_err(|e| PipelineError::Config(format!("worker pool: {}", e)))?;
            pool.install(|| chunks.par_iter().enumerate().map(|(i, c)| work(i, *c)).collect())
        };

        let mut merged = KeyedTable::new();
        for partial in partials {
            for (key, outcome) in partial? {
                merged.insert(key, outcome);
            }
        }

        if merged.len() != items.len() || !items.iter().all(|k| merged.contains_key(k)) {
            return Err(PipelineError::WorkerFailure {
                phase: None,
                chunk: chunks.len(),
                message: format!("merged {} results for {} items", merged.len(), items.len()),
            });
        }
        Ok(merged)
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::sequential()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn square(x: &u32) -> std::result::Result<u64, String> {
        if x % 7 == 3 {
            Err(format!("rejected {}", x))
        } else {
            Ok(u64::from(*x) * u64::from(*x))
        }
    }

    #[test]
    fn test_chunking() {
        let exec = ParallelExecutor::new(4, 2);
        assert_eq!(exec.chunk_count(), 16);
        assert_eq!(exec.chunk_size(100), 7);
        assert_eq!(exec.chunk_size(3), 1);
        assert_eq!(ParallelExecutor::sequential().chunk_size(100), 100);
    }

    #[test]
    fn test_totality_and_dedup() {
        let items = vec![5u32, 1, 5, 9, 1, 2];
        let result = ParallelExecutor::new(3, 1).run(items, square).unwrap();

        let keys: Vec<u32> = result.keys().copied().collect();
        assert_eq!(keys, vec![1, 2, 5, 9]);
        assert_eq!(result.get(&9), Some(&Outcome::Done(81)));
    }

    #[test]
    fn test_failures_recorded_per_item() {
        let result = ParallelExecutor::new(2, 0).run(0u32..20, square).unwrap();

        assert_eq!(result.len(), 20);
        assert_eq!(result.get(&3), Some(&Outcome::Failed("rejected 3".to_string())));
        assert_eq!(result.get(&10).and_then(Outcome::error), Some("rejected 10"));
        assert_eq!(result.get(&4).and_then(Outcome::ok), Some(&16));
    }

    #[test]
    fn test_panic_is_worker_failure() {
        let err = ParallelExecutor::new(2, 1)
            .run(0u32..10, |x| -> std::result::Result<u32, String> {
                if *x == 6 {
                    panic!("boom at {}", x);
                }
                Ok(*x)
            })
            .unwrap_err();

        match err {
            PipelineError::WorkerFailure { phase, message, .. } => {
                assert!(phase.is_none());
                assert!(message.contains("boom at 6"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_empty_input() {
        let result = ParallelExecutor::new(4, 3).run(Vec::<u32>::new(), square).unwrap();
        assert!(result.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_results_independent_of_workers(
            items in proptest::collection::vec(0u32..500, 0..200),
            cores in 1usize..6,
            exponent in 0u32..4,
        ) {
            let reference = ParallelExecutor::sequential().run(items.clone(), square).unwrap();
            let parallel = ParallelExecutor::new(cores, exponent).run(items, square).unwrap();
            prop_assert_eq!(reference, parallel);
        }
    }
}
