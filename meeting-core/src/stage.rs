//! Pipeline stages and the run state machine.
//!
//! The eleven stages form a strict dependency chain; each one is a
//! cache-checked step whose artifact lands in the run store. The state
//! machine guards stage progression during a run so that:
//! 1. Every advance is auditable and logged.
//! 2. A later stage can never start before its predecessor completed.
//! 3. Offline replay can reconstruct the exact execution order.
//!
//! A run may *enter* the chain at any stage (earlier stages can already be
//! cached), but once running it only moves forward, one stage at a time.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The eleven pipeline stages, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Condense the four briefing texts into the shared fact base.
    Blackboard,
    /// One private stance card per role.
    Stance,
    /// One public opening statement per role.
    Opening,
    /// Chair selects 3–6 targeted questions from the pool.
    ChairQuestions,
    /// Each addressed role answers its question.
    Answers,
    /// Neutral synthesis of both public rounds.
    RoundSummary,
    /// Chair proposes 2–3 menu-constrained policy packages.
    Packages,
    /// One package-preference reply per role.
    PackageViews,
    /// One formal vote per role.
    Votes,
    /// Deterministic tabulation of the votes.
    Tally,
    /// Decision statement and minutes summary.
    Drafts,
}

/// All stages in execution order.
pub const ALL_STAGES: [Stage; 11] = [
    Stage::Blackboard,
    Stage::Stance,
    Stage::Opening,
    Stage::ChairQuestions,
    Stage::Answers,
    Stage::RoundSummary,
    Stage::Packages,
    Stage::PackageViews,
    Stage::Votes,
    Stage::Tally,
    Stage::Drafts,
];

impl Stage {
    /// Stable artifact key. Restricted to letters, digits, `-` and `_` so
    /// it can be used directly as a file stem.
    pub fn key(self) -> &'static str {
        match self {
            Self::Blackboard => "blackboard",
            Self::Stance => "stance",
            Self::Opening => "opening",
            Self::ChairQuestions => "chair-questions",
            Self::Answers => "answers",
            Self::RoundSummary => "round-summary",
            Self::Packages => "packages",
            Self::PackageViews => "package-views",
            Self::Votes => "votes",
            Self::Tally => "tally",
            Self::Drafts => "drafts",
        }
    }

    /// Position in the dependency chain (0-based).
    pub fn index(self) -> usize {
        ALL_STAGES.iter().position(|s| *s == self).unwrap_or(0)
    }

    /// The stage that must complete immediately before this one.
    pub fn predecessor(self) -> Option<Stage> {
        let idx = self.index();
        if idx == 0 {
            None
        } else {
            Some(ALL_STAGES[idx - 1])
        }
    }

    /// Parse a stage from its artifact key.
    pub fn from_key(key: &str) -> Option<Stage> {
        ALL_STAGES.iter().copied().find(|s| s.key() == key)
    }

    /// Every stage up to and including this one, in execution order.
    pub fn chain(self) -> &'static [Stage] {
        &ALL_STAGES[..=self.index()]
    }

    /// Whether this is the final stage.
    pub fn is_last(self) -> bool {
        self == Stage::Drafts
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "stage")]
pub enum RunPhase {
    /// No stage executed yet (cached stages may already exist).
    Idle,
    /// Executing the given stage.
    Running(Stage),
    /// Every requested stage has a validated artifact - terminal.
    Completed,
    /// A stage failed - terminal. Prior artifacts remain valid.
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running(stage) => write!(f, "running:{stage}"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Legal transitions:
/// ```text
/// Idle        → Running(any stage) | Completed | Failed
/// Running(s)  → Running(t) where t.index > s.index | Completed | Failed
/// ```
/// Entering at an arbitrary stage is allowed because earlier stages may be
/// served from the cache; skipping forward past cached stages is likewise
/// allowed. Moving backward or revisiting a stage within one run is not.
fn is_legal_transition(from: RunPhase, to: RunPhase) -> bool {
    use RunPhase::*;

    // Any non-terminal phase may fail.
    if to == Failed && !from.is_terminal() {
        return true;
    }

    match (from, to) {
        (Idle, Running(_)) => true,
        (Idle, Completed) => true, // everything cached
        (Running(s), Running(t)) => t.index() > s.index(),
        (Running(_), Completed) => true,
        _ => false,
    }
}

/// A single recorded phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RunPhase,
    pub to: RunPhase,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: RunPhase,
    pub to: RunPhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current phase, enforces legal transitions, and keeps a full
/// transition log for replay and diagnostics.
pub struct PipelineStateMachine {
    current: RunPhase,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl PipelineStateMachine {
    pub fn new() -> Self {
        Self {
            current: RunPhase::Idle,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RunPhase {
        self.current
    }

    /// Attempt to advance to the next phase.
    pub fn advance(&mut self, to: RunPhase, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, "pipeline transition");

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Begin executing a stage.
    pub fn begin(&mut self, stage: Stage) -> Result<(), IllegalTransition> {
        self.advance(RunPhase::Running(stage), None)
    }

    /// Mark the run complete.
    pub fn complete(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(RunPhase::Completed, Some(reason))
    }

    /// Mark the run failed. Always legal from non-terminal phases.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(RunPhase::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line history summary for logs.
    pub fn summary(&self) -> String {
        let path: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        format!(
            "{} ({} transitions{})",
            self.current,
            self.transitions.len(),
            if path.is_empty() {
                String::new()
            } else {
                format!(": {}", path.join(" → "))
            }
        )
    }
}

impl Default for PipelineStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_and_keys() {
        assert_eq!(ALL_STAGES.len(), 11);
        assert_eq!(Stage::Blackboard.index(), 0);
        assert_eq!(Stage::Drafts.index(), 10);
        assert!(Stage::Drafts.is_last());
        assert_eq!(Stage::ChairQuestions.key(), "chair-questions");
        assert_eq!(Stage::from_key("package-views"), Some(Stage::PackageViews));
        assert_eq!(Stage::from_key("nope"), None);

        // Artifact keys stay inside the allowed file-stem alphabet.
        for stage in ALL_STAGES {
            assert!(stage
                .key()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        }
    }

    #[test]
    fn test_predecessor_chain() {
        assert_eq!(Stage::Blackboard.predecessor(), None);
        assert_eq!(Stage::Stance.predecessor(), Some(Stage::Blackboard));
        assert_eq!(Stage::Tally.predecessor(), Some(Stage::Votes));
        assert_eq!(Stage::Votes.chain().len(), 9);
        assert_eq!(Stage::Votes.chain()[0], Stage::Blackboard);
    }

    #[test]
    fn test_stage_serde_key() {
        let json = serde_json::to_string(&Stage::RoundSummary).unwrap();
        assert_eq!(json, "\"round-summary\"");
        let back: Stage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Stage::RoundSummary);
    }

    #[test]
    fn test_full_run_transitions() {
        let mut sm = PipelineStateMachine::new();
        for stage in ALL_STAGES {
            sm.begin(stage).unwrap();
        }
        sm.complete("all stages validated").unwrap();
        assert!(sm.is_terminal());
        assert_eq!(sm.current(), RunPhase::Completed);
        assert_eq!(sm.transitions().len(), 12);
    }

    #[test]
    fn test_enter_mid_chain_after_cache_hits() {
        let mut sm = PipelineStateMachine::new();
        // Stages before Votes already cached.
        sm.begin(Stage::Votes).unwrap();
        sm.begin(Stage::Tally).unwrap();
        sm.begin(Stage::Drafts).unwrap();
        sm.complete("done").unwrap();
        assert!(sm.is_terminal());
    }

    #[test]
    fn test_fully_cached_run_goes_straight_to_completed() {
        let mut sm = PipelineStateMachine::new();
        sm.complete("served from cache").unwrap();
        assert_eq!(sm.current(), RunPhase::Completed);
    }

    #[test]
    fn test_backward_transition_rejected() {
        let mut sm = PipelineStateMachine::new();
        sm.begin(Stage::Votes).unwrap();
        let err = sm.begin(Stage::Opening).unwrap_err();
        assert_eq!(err.from, RunPhase::Running(Stage::Votes));
        assert_eq!(err.to, RunPhase::Running(Stage::Opening));
    }

    #[test]
    fn test_revisit_rejected() {
        let mut sm = PipelineStateMachine::new();
        sm.begin(Stage::Stance).unwrap();
        assert!(sm.begin(Stage::Stance).is_err());
    }

    #[test]
    fn test_fail_from_any_non_terminal() {
        let mut sm = PipelineStateMachine::new();
        sm.begin(Stage::Blackboard).unwrap();
        sm.fail("gateway unreachable").unwrap();
        assert_eq!(sm.current(), RunPhase::Failed);

        // Terminal phases reject everything, including another failure.
        assert!(sm.fail("again").is_err());
        assert!(sm.begin(Stage::Stance).is_err());
    }

    #[test]
    fn test_transition_record_has_reason() {
        let mut sm = PipelineStateMachine::new();
        sm.begin(Stage::Blackboard).unwrap();
        sm.fail("schema validation exhausted").unwrap();
        let last = sm.transitions().last().unwrap();
        assert_eq!(
            last.reason.as_deref(),
            Some("schema validation exhausted")
        );
    }

    #[test]
    fn test_summary_mentions_path() {
        let mut sm = PipelineStateMachine::new();
        sm.begin(Stage::Blackboard).unwrap();
        sm.begin(Stage::Stance).unwrap();
        let summary = sm.summary();
        assert!(summary.contains("running:stance"));
        assert!(summary.contains("2 transitions"));
    }
}
