//! Generative side of the committee meeting simulator.
//!
//! Builds on `meeting-core` (data model, validators, run store) and adds
//! everything that talks to the LLM backend: the generation gateway, the
//! versioned prompts, the seven engines (blackboard builder, stance
//! engine, deliberation, chair controller, ballots, draft synthesizer,
//! transcript renderer), prompt-run telemetry, and the pipeline
//! orchestrator driving the eleven cache-checked stages.

pub mod ballot;
pub mod blackboard;
pub mod chair;
pub mod config;
pub mod deliberation;
pub mod drafts;
pub mod gateway;
pub mod generate;
pub mod orchestrator;
pub mod prompts;
pub mod stance;
pub mod telemetry;
pub mod transcript;

pub use blackboard::Materials;
pub use config::{LlmEndpoint, SimConfig};
pub use gateway::{GenerationGateway, GenerationRequest, LiveGateway};
pub use generate::{Generated, Generator};
pub use orchestrator::{Orchestrator, StoredArtifact};
