//! Deterministic core of the committee meeting simulator.
//!
//! This crate holds everything about a meeting run that does not touch a
//! generative backend:
//! - the data model for a run (blackboard, stance cards, utterances,
//!   packages, votes, tally, drafts)
//! - the eleven-stage pipeline with its transition-guarded state machine
//! - the closed tagged union of per-stage artifacts and their validators
//!   (citation resolution, delta-set membership, vote-split equality)
//! - tolerant JSON extraction from free-form generated text
//! - deterministic vote tabulation
//! - the filesystem run store: per-meeting manifest, atomic artifact
//!   writes, exclusive run lock
//! - the job-store interface for observable long-running work
//! - bounded retry/backoff policy shared by all gateway callers
//!
//! The generative side (prompts, engines, orchestrator, CLI) lives in the
//! `committee-agents` crate and builds entirely on these types.

pub mod artifact;
pub mod citation;
pub mod error;
pub mod extract;
pub mod job;
pub mod model;
pub mod retry;
pub mod run_store;
pub mod stage;
pub mod tally;

pub use artifact::{PhaseArtifact, ValidationContext, Violation};
pub use citation::CitationIndex;
pub use error::{GatewayError, SimError, SimResult};
pub use job::{InMemoryJobStore, JobRecord, JobStatus, JobStore};
pub use model::{
    Blackboard, ChairQuestions, CommuniqueDraft, DeliberationPhase, Fact, MaterialKind,
    PackageSlate, PackageView, PolicyOption, PolicyPackage, Role, RoundSummary, StanceCard, Tally,
    Uncertainty, Utterance, Vote,
};
pub use retry::RetryPolicy;
pub use run_store::{ArtifactRecord, Manifest, MeetingRun, RunLock, RunStore};
pub use stage::{PipelineStateMachine, RunPhase, Stage, ALL_STAGES};
