//! Pipeline errors

use thiserror::Error;

/// Fatal pipeline errors. Per-item strategy failures never surface here,
/// they are recorded as `Outcome::Failed` in the phase output instead.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Phase {phase}: missing property '{key}'")]
    MissingProperty { phase: String, key: String },
    #[error("Phase {phase}: dump for '{key}' unusable: {reason}")]
    StaleOrMissingDump {
        phase: String,
        key: String,
        reason: String,
    },
    #[error("Phase {}: worker failed on chunk {chunk}: {message}", phase.as_deref().unwrap_or("-"))]
    WorkerFailure {
        phase: Option<String>,
        chunk: usize,
        message: String,
    },
    #[error("Property '{key}' is not a {expected}")]
    TypeMismatch { key: String, expected: &'static str },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Phase {phase} did not produce declared output '{key}'")]
    MissingOutput { phase: String, key: String },
    #[error("Phase {phase} produced undeclared output '{key}'")]
    UndeclaredOutput { phase: String, key: String },
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Codec error for '{key}': {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Phase {phase} failed: {source}")]
    Phase {
        phase: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl PipelineError {
    /// Attach the phase name to a worker failure raised by the executor
    pub fn in_phase(self, name: &str) -> Self {
        match self {
            PipelineError::WorkerFailure {
                phase: None,
                chunk,
                message,
            } => PipelineError::WorkerFailure {
                phase: Some(name.to_string()),
                chunk,
                message,
            },
            other => other,
        }
    }

    /// Wrap any phase-specific error
    pub fn phase(phase: &str, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        PipelineError::Phase {
            phase: phase.to_string(),
            source: Box::new(source),
        }
    }

    /// Phase and key the error is about, when it names them
    pub fn location(&self) -> Option<(&str, &str)> {
        match self {
            PipelineError::MissingProperty { phase, key }
            | PipelineError::StaleOrMissingDump { phase, key, .. }
            | PipelineError::MissingOutput { phase, key }
            | PipelineError::UndeclaredOutput { phase, key } => Some((phase, key)),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
