//! Error taxonomy for the meeting pipeline.
//!
//! Every stage failure is classified so callers can tell "retry the
//! transport" apart from "the generated output is unusable" apart from
//! "the on-disk state is unsafe to touch". A failed stage leaves all
//! prior, validated stages cached and queryable; only the failing stage
//! and everything downstream becomes unavailable.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::stage::{IllegalTransition, Stage};

/// Result alias used throughout the pipeline.
pub type SimResult<T> = Result<T, SimError>;

/// Failure of a single generation-gateway call.
///
/// These are transport-level failures: the gateway never produced a reply
/// at all. Malformed replies are not gateway errors - they surface later
/// as [`SimError::SchemaValidationFailed`] after repair attempts.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("generation call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Pipeline error taxonomy.
#[derive(Debug, Error)]
pub enum SimError {
    /// All four briefing texts are absent. One to three missing texts are
    /// a valid degenerate case and never raise this.
    #[error("no briefing material seeded for meeting '{meeting_id}'")]
    MaterialMissing { meeting_id: String },

    /// Structured output stayed unparseable or out of contract after the
    /// bounded repair attempts.
    #[error("stage {stage} output failed validation after {attempts} attempt(s): {detail}")]
    SchemaValidationFailed {
        stage: Stage,
        attempts: u32,
        detail: String,
    },

    /// An utterance, stance card, view or vote cites an id that does not
    /// exist in this run's blackboard. Never silently stripped.
    #[error("stage {stage} has invalid citations: {detail}")]
    CitationInvalid { stage: Stage, detail: String },

    /// Gateway transport failure that survived the bounded retry budget.
    #[error("generation transport failure in stage {stage}")]
    Transport {
        stage: Stage,
        #[source]
        source: GatewayError,
    },

    /// The manifest is unreadable or inconsistent. Fatal: the run must not
    /// be auto-repaired by inference.
    #[error("manifest at {path} is corrupt: {detail}")]
    ManifestCorrupt { path: PathBuf, detail: String },

    /// Another writer holds the run lock for this meeting.
    #[error("another run already holds the lock for meeting '{meeting_id}'")]
    ConcurrentRunConflict { meeting_id: String },

    /// A caller-supplied identifier reduced to nothing after sanitization.
    #[error("invalid identifier: {0:?}")]
    InvalidName(String),

    /// A stage was requested before its predecessor produced an artifact.
    #[error("stage {stage} requires the '{missing}' artifact; run that stage first")]
    MissingDependency { stage: Stage, missing: Stage },

    /// The artifact stored under a stage key holds a different payload kind.
    #[error("artifact for stage {stage} holds a '{found}' payload")]
    ArtifactMismatch { stage: Stage, found: &'static str },

    #[error("illegal pipeline transition: {0}")]
    Pipeline(#[from] IllegalTransition),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SimError {
    /// Create a schema-validation failure for a stage.
    pub fn schema(stage: Stage, attempts: u32, detail: impl Into<String>) -> Self {
        Self::SchemaValidationFailed {
            stage,
            attempts,
            detail: detail.into(),
        }
    }

    /// Create a citation failure for a stage.
    pub fn citation(stage: Stage, detail: impl Into<String>) -> Self {
        Self::CitationInvalid {
            stage,
            detail: detail.into(),
        }
    }

    /// Create a manifest-corruption error.
    pub fn manifest_corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        Self::ManifestCorrupt {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Whether retrying the same call might succeed.
    ///
    /// Only transport failures are retryable. Validation and citation
    /// failures go through the repair-reprompt path instead, and state
    /// errors (corrupt manifest, lock conflict) must surface to the caller.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
