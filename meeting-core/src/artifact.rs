//! Typed phase artifacts and their validators.
//!
//! Each pipeline stage persists exactly one payload kind; the closed
//! tagged union below replaces "whatever JSON the model returned" with one
//! variant per stage, dispatched by tag. Validators are fail-closed: they
//! return every violation they can find, and the caller decides between a
//! repair re-prompt and a stage failure.

use serde::{Deserialize, Serialize};

use crate::citation::CitationIndex;
use crate::error::SimError;
use crate::model::{
    Blackboard, ChairQuestions, CommuniqueDraft, DeliberationPhase, PackageSlate, PackageView,
    Role, RoundSummary, StanceCard, Tally, Utterance, Vote,
};
use crate::stage::Stage;

/// One pipeline stage's persisted payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseArtifact {
    Blackboard(Blackboard),
    StanceCards { cards: Vec<StanceCard> },
    Opening { utterances: Vec<Utterance> },
    ChairQuestions(ChairQuestions),
    Answers { utterances: Vec<Utterance> },
    RoundSummaries { rounds: Vec<RoundSummary> },
    Packages(PackageSlate),
    PackageViews { views: Vec<PackageView> },
    Votes { votes: Vec<Vote>, crisis_mode: bool },
    Tally(Tally),
    Drafts(CommuniqueDraft),
}

/// A single contract violation found by a validator.
///
/// Citation violations get their own class because the propagation policy
/// differs: they must surface as [`SimError::CitationInvalid`] when repair
/// attempts run out, never be silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    Citation(String),
    Schema(String),
}

impl Violation {
    pub fn is_citation(&self) -> bool {
        matches!(self, Self::Citation(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Citation(m) | Self::Schema(m) => m,
        }
    }
}

/// Read-only context a validator checks an artifact against.
///
/// Only the fields a given variant needs have to be present; a validator
/// that finds its required context missing reports that as a violation
/// rather than passing silently.
#[derive(Default)]
pub struct ValidationContext<'a> {
    pub roles: &'a [Role],
    pub blackboard: Option<&'a Blackboard>,
    pub packages: Option<&'a PackageSlate>,
    pub tally: Option<&'a Tally>,
    pub crisis_mode: bool,
    /// Expected number of directed answers (one per chair question).
    pub expected_answers: Option<usize>,
}

impl<'a> ValidationContext<'a> {
    pub fn new(roles: &'a [Role]) -> Self {
        Self {
            roles,
            ..Default::default()
        }
    }

    pub fn with_blackboard(mut self, blackboard: &'a Blackboard) -> Self {
        self.blackboard = Some(blackboard);
        self
    }

    pub fn with_packages(mut self, packages: &'a PackageSlate) -> Self {
        self.packages = Some(packages);
        self
    }

    pub fn with_tally(mut self, tally: &'a Tally) -> Self {
        self.tally = Some(tally);
        self
    }

    pub fn with_crisis_mode(mut self, crisis_mode: bool) -> Self {
        self.crisis_mode = crisis_mode;
        self
    }

    pub fn with_expected_answers(mut self, n: usize) -> Self {
        self.expected_answers = Some(n);
        self
    }

    fn role(&self, id: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }
}

impl PhaseArtifact {
    /// The stage this payload belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Blackboard(_) => Stage::Blackboard,
            Self::StanceCards { .. } => Stage::Stance,
            Self::Opening { .. } => Stage::Opening,
            Self::ChairQuestions(_) => Stage::ChairQuestions,
            Self::Answers { .. } => Stage::Answers,
            Self::RoundSummaries { .. } => Stage::RoundSummary,
            Self::Packages(_) => Stage::Packages,
            Self::PackageViews { .. } => Stage::PackageViews,
            Self::Votes { .. } => Stage::Votes,
            Self::Tally(_) => Stage::Tally,
            Self::Drafts(_) => Stage::Drafts,
        }
    }

    /// Tag name used in mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        self.stage().key()
    }

    /// Validate this payload against the run context.
    ///
    /// Returns every violation found; empty means the artifact honors its
    /// stage contract.
    pub fn validate(&self, ctx: &ValidationContext<'_>) -> Vec<Violation> {
        match self {
            Self::Blackboard(bb) => validate_blackboard(bb),
            Self::StanceCards { cards } => validate_stance_cards(cards, ctx),
            Self::Opening { utterances } => {
                validate_utterances(utterances, ctx, DeliberationPhase::OpeningStatements)
            }
            Self::ChairQuestions(cq) => validate_chair_questions(cq, ctx),
            Self::Answers { utterances } => {
                validate_utterances(utterances, ctx, DeliberationPhase::DirectedQa)
            }
            Self::RoundSummaries { rounds } => validate_round_summaries(rounds, ctx),
            Self::Packages(slate) => validate_packages(slate, ctx),
            Self::PackageViews { views } => validate_package_views(views, ctx),
            Self::Votes { votes, crisis_mode } => validate_votes(votes, ctx, *crisis_mode),
            Self::Tally(tally) => validate_tally(tally, ctx),
            Self::Drafts(draft) => validate_drafts(draft, ctx),
        }
    }

    pub fn expect_blackboard(&self) -> Result<&Blackboard, SimError> {
        match self {
            Self::Blackboard(bb) => Ok(bb),
            other => Err(mismatch(Stage::Blackboard, other)),
        }
    }

    pub fn expect_stance_cards(&self) -> Result<&[StanceCard], SimError> {
        match self {
            Self::StanceCards { cards } => Ok(cards),
            other => Err(mismatch(Stage::Stance, other)),
        }
    }

    pub fn expect_opening(&self) -> Result<&[Utterance], SimError> {
        match self {
            Self::Opening { utterances } => Ok(utterances),
            other => Err(mismatch(Stage::Opening, other)),
        }
    }

    pub fn expect_chair_questions(&self) -> Result<&ChairQuestions, SimError> {
        match self {
            Self::ChairQuestions(cq) => Ok(cq),
            other => Err(mismatch(Stage::ChairQuestions, other)),
        }
    }

    pub fn expect_answers(&self) -> Result<&[Utterance], SimError> {
        match self {
            Self::Answers { utterances } => Ok(utterances),
            other => Err(mismatch(Stage::Answers, other)),
        }
    }

    pub fn expect_round_summaries(&self) -> Result<&[RoundSummary], SimError> {
        match self {
            Self::RoundSummaries { rounds } => Ok(rounds),
            other => Err(mismatch(Stage::RoundSummary, other)),
        }
    }

    pub fn expect_packages(&self) -> Result<&PackageSlate, SimError> {
        match self {
            Self::Packages(slate) => Ok(slate),
            other => Err(mismatch(Stage::Packages, other)),
        }
    }

    pub fn expect_package_views(&self) -> Result<&[PackageView], SimError> {
        match self {
            Self::PackageViews { views } => Ok(views),
            other => Err(mismatch(Stage::PackageViews, other)),
        }
    }

    pub fn expect_votes(&self) -> Result<(&[Vote], bool), SimError> {
        match self {
            Self::Votes { votes, crisis_mode } => Ok((votes, *crisis_mode)),
            other => Err(mismatch(Stage::Votes, other)),
        }
    }

    pub fn expect_tally(&self) -> Result<&Tally, SimError> {
        match self {
            Self::Tally(tally) => Ok(tally),
            other => Err(mismatch(Stage::Tally, other)),
        }
    }

    pub fn expect_drafts(&self) -> Result<&CommuniqueDraft, SimError> {
        match self {
            Self::Drafts(draft) => Ok(draft),
            other => Err(mismatch(Stage::Drafts, other)),
        }
    }
}

fn mismatch(stage: Stage, found: &PhaseArtifact) -> SimError {
    SimError::ArtifactMismatch {
        stage,
        found: found.kind_name(),
    }
}

fn schema(violations: &mut Vec<Violation>, msg: impl Into<String>) {
    violations.push(Violation::Schema(msg.into()));
}

fn citation(violations: &mut Vec<Violation>, who: &str, detail: String) {
    violations.push(Violation::Citation(format!("{who}: {detail}")));
}

/// Blackboard context, or report its absence once.
fn require_blackboard<'a>(
    ctx: &'a ValidationContext<'_>,
    violations: &mut Vec<Violation>,
) -> Option<(&'a Blackboard, CitationIndex)> {
    match ctx.blackboard {
        Some(bb) => Some((bb, CitationIndex::new(bb))),
        None => {
            schema(violations, "validation context is missing the blackboard");
            None
        }
    }
}

fn validate_blackboard(bb: &Blackboard) -> Vec<Violation> {
    let mut violations = Vec::new();

    let mut seen = std::collections::HashSet::new();
    for fact in &bb.facts {
        if !seen.insert(fact.id.as_str()) {
            schema(&mut violations, format!("duplicate fact id {}", fact.id));
        }
        if fact.text.trim().is_empty() {
            schema(&mut violations, format!("fact {} has empty text", fact.id));
        }
    }
    let mut seen = std::collections::HashSet::new();
    for unc in &bb.uncertainties {
        if !seen.insert(unc.id.as_str()) {
            schema(&mut violations, format!("duplicate uncertainty id {}", unc.id));
        }
        if unc.text.trim().is_empty() {
            schema(&mut violations, format!("uncertainty {} has empty text", unc.id));
        }
    }

    if bb.policy_menu.is_empty() {
        schema(&mut violations, "policy menu is empty");
    }
    let mut seen = std::collections::HashSet::new();
    for option in &bb.policy_menu {
        if !seen.insert(option.key.as_str()) {
            schema(&mut violations, format!("duplicate menu key {}", option.key));
        }
    }
    if bb.statement_slots.is_empty() {
        schema(&mut violations, "statement slots are empty");
    }

    violations
}

fn validate_stance_cards(cards: &[StanceCard], ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let Some((_, index)) = require_blackboard(ctx, &mut violations) else {
        return violations;
    };

    for role in ctx.roles {
        match cards.iter().filter(|c| c.role == role.id).count() {
            0 => schema(&mut violations, format!("role '{}' has no stance card", role.id)),
            1 => {}
            n => schema(
                &mut violations,
                format!("role '{}' has {n} stance cards", role.id),
            ),
        }
    }

    for card in cards {
        let Some(role) = ctx.role(&card.role) else {
            schema(&mut violations, format!("stance card for unknown role '{}'", card.role));
            continue;
        };
        if !role
            .effective_deltas(ctx.crisis_mode)
            .contains(&card.preferred_delta_bps)
        {
            schema(
                &mut violations,
                format!(
                    "role '{}' prefers {}bps, outside its allowed set",
                    card.role, card.preferred_delta_bps
                ),
            );
        }
        if card.reasons.is_empty() {
            schema(&mut violations, format!("role '{}' lists no reasons", card.role));
        }
        let fact_ids: Vec<String> = card.reasons.iter().map(|r| r.fact_id.clone()).collect();
        let unc_ids: Vec<String> = card.risks.iter().map(|r| r.uncertainty_id.clone()).collect();
        if let Err(detail) = index.check(&fact_ids, &unc_ids) {
            citation(&mut violations, &format!("stance card '{}'", card.role), detail);
        }
    }

    violations
}

fn validate_utterances(
    utterances: &[Utterance],
    ctx: &ValidationContext<'_>,
    phase: DeliberationPhase,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    let Some((_, index)) = require_blackboard(ctx, &mut violations) else {
        return violations;
    };

    if phase == DeliberationPhase::OpeningStatements {
        for role in ctx.roles {
            if !utterances.iter().any(|u| u.speaker == role.id) {
                schema(
                    &mut violations,
                    format!("role '{}' has no opening statement", role.id),
                );
            }
        }
    } else if let Some(expected) = ctx.expected_answers {
        if utterances.len() != expected {
            schema(
                &mut violations,
                format!("expected {expected} answers, found {}", utterances.len()),
            );
        }
    }

    for u in utterances {
        if u.phase != phase {
            schema(
                &mut violations,
                format!("utterance by '{}' tagged {} in the {} round", u.speaker, u.phase, phase),
            );
        }
        if ctx.role(&u.speaker).is_none() {
            schema(&mut violations, format!("utterance by unknown role '{}'", u.speaker));
        }
        if u.body_md.trim().is_empty() {
            schema(&mut violations, format!("utterance by '{}' has empty body", u.speaker));
        }
        if u.cited_facts.is_empty() {
            // Public claims must be grounded; uncited speeches are out of contract.
            schema(&mut violations, format!("utterance by '{}' cites no facts", u.speaker));
        }
        if let Err(detail) = index.check(&u.cited_facts, &u.cited_uncertainties) {
            citation(&mut violations, &format!("utterance by '{}'", u.speaker), detail);
        }
        if phase == DeliberationPhase::OpeningStatements
            && u.question.as_deref().map_or(true, |q| q.trim().is_empty())
        {
            schema(
                &mut violations,
                format!("opening statement by '{}' proposes no follow-up question", u.speaker),
            );
        }
    }

    violations
}

fn validate_chair_questions(cq: &ChairQuestions, ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let Some((_, index)) = require_blackboard(ctx, &mut violations) else {
        return violations;
    };

    // 3–6 questions, clamped down only when fewer roles exist to address.
    let min = ctx.roles.len().min(3);
    if cq.directed.len() < min || cq.directed.len() > 6 {
        schema(
            &mut violations,
            format!("{} directed questions, need {min}–6", cq.directed.len()),
        );
    }

    for dq in &cq.directed {
        if ctx.role(&dq.to_role).is_none() {
            schema(
                &mut violations,
                format!("question addressed to unknown role '{}'", dq.to_role),
            );
        }
        if dq.question.trim().is_empty() {
            schema(&mut violations, format!("empty question for '{}'", dq.to_role));
        }
        if let Err(detail) = index.check(&dq.cited_facts, &[]) {
            citation(&mut violations, "chair question", detail);
        }
    }

    violations
}

fn validate_round_summaries(rounds: &[RoundSummary], ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let Some((bb, _)) = require_blackboard(ctx, &mut violations) else {
        return violations;
    };

    for phase in [
        DeliberationPhase::OpeningStatements,
        DeliberationPhase::DirectedQa,
    ] {
        match rounds.iter().filter(|r| r.phase == phase).count() {
            1 => {}
            n => schema(&mut violations, format!("{n} summaries for the {phase} round")),
        }
    }

    let slot_keys = bb.slot_keys();
    for round in rounds {
        for note in &round.slot_notes {
            if !slot_keys.contains(&note.slot_key.as_str()) {
                schema(
                    &mut violations,
                    format!("slot note for unknown slot '{}'", note.slot_key),
                );
            }
        }
    }

    violations
}

fn validate_packages(slate: &PackageSlate, ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let Some((bb, _)) = require_blackboard(ctx, &mut violations) else {
        return violations;
    };

    if slate.packages.len() < 2 || slate.packages.len() > 3 {
        schema(
            &mut violations,
            format!("{} packages proposed, need 2–3", slate.packages.len()),
        );
    }

    let menu = bb.menu_deltas();
    let mut seen = std::collections::HashSet::new();
    for pkg in &slate.packages {
        if pkg.key.trim().is_empty() {
            schema(&mut violations, "package with empty key");
        } else if !seen.insert(pkg.key.as_str()) {
            schema(&mut violations, format!("duplicate package key '{}'", pkg.key));
        }
        if !menu.contains(&pkg.delta_bps) {
            schema(
                &mut violations,
                format!("package '{}' delta {}bps is not on the policy menu", pkg.key, pkg.delta_bps),
            );
        }
    }

    violations
}

fn validate_package_views(views: &[PackageView], ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let Some((_, index)) = require_blackboard(ctx, &mut violations) else {
        return violations;
    };
    let Some(slate) = ctx.packages else {
        schema(&mut violations, "validation context is missing the packages");
        return violations;
    };

    for role in ctx.roles {
        if !views.iter().any(|v| v.role == role.id) {
            schema(&mut violations, format!("role '{}' filed no package views", role.id));
        }
    }

    let keys = slate.keys();
    let mut seen = std::collections::HashSet::new();
    for view in views {
        if ctx.role(&view.role).is_none() {
            schema(&mut violations, format!("view from unknown role '{}'", view.role));
        }
        if !keys.contains(&view.package_key.as_str()) {
            schema(
                &mut violations,
                format!("view on unknown package '{}'", view.package_key),
            );
        }
        if !seen.insert((view.role.clone(), view.package_key.clone())) {
            schema(
                &mut violations,
                format!("role '{}' filed two views on package '{}'", view.role, view.package_key),
            );
        }
        if let Err(detail) = index.check(&view.cited_facts, &[]) {
            citation(
                &mut violations,
                &format!("view '{}'/'{}'", view.role, view.package_key),
                detail,
            );
        }
    }

    violations
}

fn validate_votes(votes: &[Vote], ctx: &ValidationContext<'_>, crisis_mode: bool) -> Vec<Violation> {
    let mut violations = Vec::new();
    let Some((_, index)) = require_blackboard(ctx, &mut violations) else {
        return violations;
    };

    for role in ctx.roles {
        match votes.iter().filter(|v| v.role == role.id).count() {
            0 => schema(&mut violations, format!("role '{}' has no recorded vote", role.id)),
            1 => {}
            n => schema(&mut violations, format!("role '{}' has {n} votes", role.id)),
        }
    }

    for vote in votes {
        let Some(role) = ctx.role(&vote.role) else {
            schema(&mut violations, format!("vote from unknown role '{}'", vote.role));
            continue;
        };
        if !role.effective_deltas(crisis_mode).contains(&vote.delta_bps) {
            schema(
                &mut violations,
                format!(
                    "role '{}' voted {}bps, outside its allowed set",
                    vote.role, vote.delta_bps
                ),
            );
        }
        if vote.cited_facts.is_empty() {
            schema(&mut violations, format!("vote by '{}' cites no facts", vote.role));
        }
        if let Err(detail) = index.check(&vote.cited_facts, &vote.cited_uncertainties) {
            citation(&mut violations, &format!("vote by '{}'", vote.role), detail);
        }
        if vote.dissent && vote.dissent_sentence.as_deref().map_or(true, |s| s.trim().is_empty()) {
            schema(
                &mut violations,
                format!("role '{}' flags dissent without a dissent sentence", vote.role),
            );
        }
    }

    violations
}

fn validate_tally(tally: &Tally, ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();

    let sum: u32 = tally.counts.values().sum();
    if sum != ctx.roles.len() as u32 {
        schema(
            &mut violations,
            format!("tally counts sum to {sum}, expected {}", ctx.roles.len()),
        );
    }
    if sum != tally.total {
        schema(&mut violations, "tally total disagrees with its counts");
    }
    if !tally.counts.contains_key(&tally.majority_delta) {
        schema(
            &mut violations,
            format!("majority delta {}bps has no votes", tally.majority_delta),
        );
    }
    for dissent in &tally.dissenting {
        if ctx.role(&dissent.role).is_none() {
            schema(&mut violations, format!("dissent from unknown role '{}'", dissent.role));
        }
    }

    violations
}

fn validate_drafts(draft: &CommuniqueDraft, ctx: &ValidationContext<'_>) -> Vec<Violation> {
    let mut violations = Vec::new();
    let Some(tally) = ctx.tally else {
        schema(&mut violations, "validation context is missing the tally");
        return violations;
    };

    if draft.statement_md.trim().is_empty() {
        schema(&mut violations, "statement text is empty");
    }
    if draft.minutes_summary_md.trim().is_empty() {
        schema(&mut violations, "minutes summary text is empty");
    }

    // The reported split must match the computed tally exactly - checked
    // here, not merely requested in the prompt.
    let expected = tally.vote_split();
    if draft.vote_split != expected {
        schema(
            &mut violations,
            format!("draft reports split '{}', tally says '{expected}'", draft.vote_split),
        );
    }
    if !draft.statement_md.contains(&expected) {
        schema(
            &mut violations,
            format!("statement does not state the '{expected}' vote split"),
        );
    }

    violations
}
