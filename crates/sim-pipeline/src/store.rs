//! Property store
//!
//! Keyed registry of computed artifacts. Values are held behind `Arc` so
//! phases can borrow them while the orchestrator keeps ownership. Each entry
//! remembers the lineage fingerprint it was committed with; that fingerprint
//! is written alongside the value when the entry is persisted.

use crate::codec::{self, Envelope};
use crate::error::{PipelineError, Result};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, Any};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Anything that can live in the store and be persisted
pub trait Artifact: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Artifact for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Lineage recorded for values put directly by a caller
pub const SEEDED_LINEAGE: &str = "seeded";

type EncodeFn = fn(&(dyn Any + Send + Sync), &Envelope<()>) -> Result<Vec<u8>>;

fn encode_as<T: Artifact>(value: &(dyn Any + Send + Sync), header: &Envelope<()>) -> Result<Vec<u8>> {
    let value = value
        .downcast_ref::<T>()
        .ok_or_else(|| PipelineError::TypeMismatch {
            key: header.key.clone(),
            expected: type_name::<T>(),
        })?;
    codec::encode(&Envelope {
        key: header.key.clone(),
        fingerprint: header.fingerprint.clone(),
        written_at: header.written_at,
        value,
    })
}

/// A value with its concrete type erased, still able to serialize itself
#[derive(Clone)]
pub struct ErasedArtifact {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
    encode: EncodeFn,
}

impl ErasedArtifact {
    pub fn new<T: Artifact>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    pub fn from_arc<T: Artifact>(value: Arc<T>) -> Self {
        Self {
            value,
            type_name: type_name::<T>(),
            encode: encode_as::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn downcast<T: Artifact>(&self, key: &str) -> Result<Arc<T>> {
        Arc::clone(&self.value)
            .downcast::<T>()
            .map_err(|_| PipelineError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            })
    }
}

impl std::fmt::Debug for ErasedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErasedArtifact")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    artifact: ErasedArtifact,
    lineage: String,
}

/// Keyed artifact registry with optional on-disk dumps
#[derive(Debug, Clone, Default)]
pub struct PropertyStore {
    entries: BTreeMap<String, Entry>,
    dump_dir: Option<PathBuf>,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store persisting under `dir`
    pub fn with_dump_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            entries: BTreeMap::new(),
            dump_dir: Some(dir.into()),
        }
    }

    pub fn set_dump_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dump_dir = Some(dir.into());
    }

    pub fn dump_dir(&self) -> Option<&Path> {
        self.dump_dir.as_deref()
    }

    /// Register or overwrite `key`
    pub fn put<T: Artifact>(&mut self, key: impl Into<String>, value: T) {
        self.commit(key, ErasedArtifact::new(value), SEEDED_LINEAGE);
    }

    /// Register or overwrite `key` with an already erased value and its lineage
    pub fn commit(&mut self, key: impl Into<String>, artifact: ErasedArtifact, lineage: impl Into<String>) {
        let key = key.into();
        debug!(key = %key, type_name = artifact.type_name, "property committed");
        self.entries.insert(
            key,
            Entry {
                artifact,
                lineage: lineage.into(),
            },
        );
    }

    /// Shared handle to the value under `key`
    pub fn get<T: Artifact>(&self, key: &str) -> Result<Arc<T>> {
        let entry = self.entries.get(key).ok_or_else(|| PipelineError::MissingProperty {
            phase: String::new(),
            key: key.to_string(),
        })?;
        entry.artifact.downcast(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lineage fingerprint the entry was committed with
    pub fn lineage(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.lineage.as_str())
    }

    /// Dump file location for `key`
    pub fn dump_path(&self, key: &str) -> Result<PathBuf> {
        let dir = self
            .dump_dir
            .as_ref()
            .ok_or_else(|| PipelineError::Config("property store has no dump directory".to_string()))?;
        Ok(dir.join(format!("{}.{}", key, codec::EXTENSION)))
    }

    /// Write `<dump_dir>/<key>.json`
    pub fn persist(&self, key: &str) -> Result<PathBuf> {
        let entry = self.entries.get(key).ok_or_else(|| PipelineError::MissingProperty {
            phase: String::new(),
            key: key.to_string(),
        })?;
        let path = self.dump_path(key)?;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| io_error(dir, source))?;
        }

        let header = Envelope {
            key: key.to_string(),
            fingerprint: entry.lineage.clone(),
            written_at: Utc::now(),
            value: (),
        };
        let bytes = (entry.artifact.encode)(&*entry.artifact.value, &header)?;
        std::fs::write(&path, &bytes).map_err(|source| io_error(&path, source))?;

        debug!(key, path = %path.display(), bytes = bytes.len(), "property persisted");
        Ok(path)
    }

    /// Fingerprint recorded in the dump for `key`, `None` if there is no dump
    pub fn dump_fingerprint(&self, key: &str) -> Result<Option<String>> {
        let path = self.dump_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path).map_err(|source| io_error(&path, source))?;
        Ok(Some(codec::decode_header(key, &bytes)?.fingerprint))
    }

    /// Restore `key` from its dump into the store
    pub fn load<T: Artifact>(&mut self, key: &str) -> Result<Arc<T>> {
        let path = self.dump_path(key)?;
        let bytes = std::fs::read(&path).map_err(|source| io_error(&path, source))?;
        let envelope: Envelope<T> = codec::decode(key, &bytes)?;
        if envelope.key != key {
            return Err(PipelineError::Config(format!(
                "dump {} holds '{}', expected '{}'",
                path.display(),
                envelope.key,
                key
            )));
        }

        let value = Arc::new(envelope.value);
        self.commit(key, ErasedArtifact::from_arc(Arc::clone(&value)), envelope.fingerprint);
        debug!(key, path = %path.display(), "property restored");
        Ok(value)
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PipelineError {
    PipelineError::Io {
        path: path.display().to_string(),
        source,
    }
}
