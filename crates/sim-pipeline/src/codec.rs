//! Dump file format
//!
//! Every persisted property is one JSON document wrapping the value with the
//! key it was stored under and the lineage fingerprint of the phase chain
//! that produced it.

use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

/// File extension of dump files
pub const EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<V> {
    pub key: String,
    pub fingerprint: String,
    pub written_at: DateTime<Utc>,
    pub value: V,
}

/// Envelope fields without the value
#[derive(Debug, Clone, Deserialize)]
pub struct Header {
    pub key: String,
    pub fingerprint: String,
    pub written_at: DateTime<Utc>,
    #[allow(dead_code)]
    value: IgnoredAny,
}

pub fn encode<V: Serialize>(envelope: &Envelope<V>) -> Result<Vec<u8>> {
    serde_json::to_vec(envelope).map_err(|source| PipelineError::Codec {
        key: envelope.key.clone(),
        source,
    })
}

pub fn decode<V: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<Envelope<V>> {
    serde_json::from_slice(bytes).map_err(|source| PipelineError::Codec {
        key: key.to_string(),
        source,
    })
}

/// Read only the envelope header (the value is skipped, not materialised)
pub fn decode_header(key: &str, bytes: &[u8]) -> Result<Header> {
    serde_json::from_slice(bytes).map_err(|source| PipelineError::Codec {
        key: key.to_string(),
        source,
    })
}
