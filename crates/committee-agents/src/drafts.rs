//! Draft synthesizer: the decision statement and minutes summary.
//!
//! The drafter receives the computed tally verbatim and has no vote
//! arithmetic to do. That is not trusted: after generation the reported
//! split is checked against the tally - a statement restating any other
//! split is repaired, then fails the stage.

use schemars::JsonSchema;
use serde::Deserialize;

use meeting_core::artifact::Violation;
use meeting_core::error::SimResult;
use meeting_core::{Blackboard, CommuniqueDraft, RoundSummary, Stage, Tally};

use crate::blackboard::schema_value;
use crate::gateway::GenerationRequest;
use crate::generate::{Generated, Generator};
use crate::prompts;

#[derive(Debug, Deserialize, JsonSchema)]
struct RawDraftReply {
    #[serde(default)]
    statement_md: String,
    #[serde(default)]
    minutes_summary_md: String,
    #[serde(default)]
    vote_split: String,
}

const STATEMENT_TITLE: &str = "# Committee Statement (simulated)";
const MINUTES_TITLE: &str = "# Minutes Summary (simulated)";

/// Synthesize the communique from the tally and the round summaries.
pub async fn synthesize(
    gen: &Generator<'_>,
    blackboard: &Blackboard,
    tally: &Tally,
    round_summaries: &[RoundSummary],
) -> SimResult<Generated<CommuniqueDraft>> {
    let prompt = prompts::render_drafts_prompt(blackboard, tally, round_summaries);
    let req = GenerationRequest::new(prompts::DRAFTER_PREAMBLE, prompt)
        .with_schema(schema_value::<RawDraftReply>())
        .with_tags("chair", Stage::Drafts.key())
        .with_sampling(0.25, 2000);

    let expected_split = tally.vote_split();

    gen.object::<RawDraftReply, _, _>(Stage::Drafts, req, move |raw| {
        let mut statement = raw.statement_md.trim().to_string();
        let mut minutes = raw.minutes_summary_md.trim().to_string();
        if !statement.is_empty() && !statement.starts_with('#') {
            statement = format!("{STATEMENT_TITLE}\n\n{statement}");
        }
        if !minutes.is_empty() && !minutes.starts_with('#') {
            minutes = format!("{MINUTES_TITLE}\n\n{minutes}");
        }

        let draft = CommuniqueDraft {
            statement_md: statement,
            minutes_summary_md: minutes,
            vote_split: raw.vote_split.trim().to_string(),
        };

        let mut violations = Vec::new();
        if draft.statement_md.is_empty() {
            violations.push(Violation::Schema("empty statement".into()));
        }
        if draft.minutes_summary_md.is_empty() {
            violations.push(Violation::Schema("empty minutes summary".into()));
        }
        if draft.vote_split != expected_split {
            violations.push(Violation::Schema(format!(
                "reported split '{}' does not match the computed tally '{expected_split}'",
                draft.vote_split
            )));
        }
        if !draft.statement_md.contains(&expected_split) {
            violations.push(Violation::Schema(format!(
                "the statement must state the '{expected_split}' vote split verbatim"
            )));
        }

        if violations.is_empty() {
            Ok(draft)
        } else {
            Err(violations)
        }
    })
    .await
}
