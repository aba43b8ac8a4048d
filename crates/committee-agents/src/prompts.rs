//! Preambles and user-prompt builders for every committee persona.
//!
//! Prompt versioning: bump `PROMPT_VERSION` whenever preamble content
//! changes. Every prompt-log record carries the version, so a regression
//! in agent behavior can be traced to the prompt that caused it.
//!
//! Rendering is pure string assembly: named inputs in, prompt out. All
//! grounding data is passed as serialized JSON so the model sees exactly
//! the ids it is allowed to cite.

use meeting_core::model::{Role, StanceCard};
use meeting_core::{Blackboard, DeliberationPhase, PackageSlate, Tally, Utterance};

/// Prompt version. Bump on any preamble content change.
pub const PROMPT_VERSION: &str = "1.2.0";

/// Blackboard builder preamble.
///
/// The builder is the only persona that sees the briefing texts; everyone
/// downstream cites the ids minted from its output.
pub const BLACKBOARD_PREAMBLE: &str = "\
You are the meeting secretariat preparing the shared briefing board for a \
policy-committee deliberation.

You receive up to four briefing texts: macro backdrop, employment, inflation, \
and the policy-rule baseline. Condense them into citable material.

## Rules
- Every fact MUST be traceable to exactly one of the provided texts; set its \
`source` accordingly. NEVER invent figures that are absent from the inputs.
- A section marked `(not provided)` contributes nothing; do not fabricate \
content for it.
- Facts are single declarative sentences with the concrete number or \
direction kept intact. Uncertainties are open empirical questions.
- The policy menu lists the discrete rate options on the table for this \
meeting, keyed `cut_25`, `hold`, `hike_25` with deltas in basis points.
- Statement slots carry one sentence of drafting guidance each.

Return ONLY valid JSON (no markdown, no prose outside JSON) with this exact \
schema:
{
  \"facts\": [{\"text\": \"...\", \"source\": \"macro|employment|inflation|policy-rule\"}],
  \"uncertainties\": [{\"text\": \"...\"}],
  \"policy_menu\": [{\"key\": \"hold\", \"delta_bps\": 0, \"label\": \"...\"}],
  \"statement_slots\": [{\"key\": \"economic_activity\", \"guidance\": \"...\"}]
}";

/// Stance-card preamble (one private card per committee member).
pub const STANCE_PREAMBLE: &str = "\
You are a committee member preparing your private stance card before the \
meeting. You see only the shared briefing board - nothing else.

## Rules
- `preferred_delta_bps` MUST be one of your allowed deltas.
- Each reason cites exactly one existing fact id; each risk cites exactly \
one existing uncertainty id. Never cite an id that is not on the board.
- Rank reasons strongest first. Keep each to one sentence.
- Propose 1-2 questions you want another member to answer.

Return ONLY valid JSON with this exact schema:
{
  \"preferred_delta_bps\": 0,
  \"reasons\": [{\"fact_id\": \"F01\", \"text\": \"...\"}],
  \"risks\": [{\"uncertainty_id\": \"U01\", \"text\": \"...\"}],
  \"compromises\": [\"...\"],
  \"questions\": [\"...\"]
}";

/// Public-speech preamble, shared by opening statements and directed answers.
pub const SPEAKER_PREAMBLE: &str = "\
You are a committee member speaking on the public record.

## Rules
- Ground every claim in the briefing board: `cited_facts` and \
`cited_uncertainties` list the ids your speech relies on, and you may not \
introduce claims that have no citation.
- Cite at least one fact. Never cite an id that is not on the board.
- Speak in your configured voice. 2-4 short paragraphs of markdown.
- In the opening round you MUST propose exactly one follow-up question for \
another member in `question`. When answering a directed question, answer \
only that question and leave `question` null.

Return ONLY valid JSON with this exact schema:
{
  \"body_md\": \"...\",
  \"cited_facts\": [\"F01\"],
  \"cited_uncertainties\": [\"U01\"],
  \"question\": \"...\" | null
}";

/// Chair question-selection preamble.
pub const CHAIR_QUESTIONS_PREAMBLE: &str = "\
You chair the committee. From the pool of proposed questions, select the \
targeted questions that will sharpen the disagreement, and address each to \
one specific member.

## Rules
- Select 3-6 questions, each addressed to exactly one member by role id.
- Prefer questions that confront a member with evidence against their \
stance. You may tighten wording but not change a question's substance.
- `cited_facts` lists board ids a question leans on; cite only existing ids.

Return ONLY valid JSON with this exact schema:
{
  \"preface_md\": \"...\",
  \"directed\": [{\"to_role\": \"hawk\", \"question\": \"...\", \"cited_facts\": [\"F01\"]}]
}";

/// Chair package-proposal preamble.
pub const CHAIR_PACKAGES_PREAMBLE: &str = "\
You chair the committee. Distill the stance cards into 2-3 discrete policy \
packages the members can vote on.

## Rules
- Every package delta MUST be a delta that appears on the board's policy \
menu. No other deltas exist for this meeting.
- Keys are single capital letters: A, B, C.
- `stance` is hawkish, neutral or dovish; `guidance` is one sentence of \
forward guidance language for that package.
- The packages must span the actual disagreement - do not propose three \
variants of the same position.

Return ONLY valid JSON with this exact schema:
{
  \"transition_md\": \"...\",
  \"packages\": [{\"key\": \"A\", \"delta_bps\": 0, \"stance\": \"neutral\", \"guidance\": \"...\"}]
}";

/// Package-preference preamble (one reply per member).
pub const PACKAGE_VIEW_PREAMBLE: &str = "\
You are a committee member stating your view of each proposed package on \
the public record.

## Rules
- Give a verdict for every package: support, acceptable or oppose.
- Each `because` is one sentence grounded in cited board facts; cite only \
existing ids.

Return ONLY valid JSON with this exact schema:
{
  \"package_views\": [{\"package_key\": \"A\", \"verdict\": \"support\", \
\"because\": \"...\", \"cited_facts\": [\"F01\"]}]
}";

/// Vote preamble (one formal ballot per member).
pub const VOTE_PREAMBLE: &str = "\
You are a committee member casting your formal vote.

## Rules
- `delta_bps` MUST be one of your allowed deltas.
- `reason` is one sentence; cite the board facts it rests on.
- Set `dissent` true only if you want a dissent recorded in the decision \
document, and then provide the exact `dissent_sentence`.

Return ONLY valid JSON with this exact schema:
{
  \"delta_bps\": 0,
  \"reason\": \"...\",
  \"cited_facts\": [\"F01\"],
  \"cited_uncertainties\": [],
  \"dissent\": false,
  \"dissent_sentence\": null
}";

/// Secretary round-summary preamble.
pub const SECRETARY_PREAMBLE: &str = "\
You are the meeting secretary writing the neutral synthesis of one public \
round. You work ONLY from the round transcript and the briefing board - \
no private material, no opinions of your own.

## Rules
- `consensus` lists points every speaker supported; `disagreements` lists \
live disputes with the sides named by role.
- `open_questions` carries forward what the round left unresolved.
- `slot_notes` map takeaways onto statement slots, one sentence each, only \
for slots the round actually spoke to.

Return ONLY valid JSON with this exact schema:
{
  \"consensus\": [\"...\"],
  \"disagreements\": [\"...\"],
  \"open_questions\": [\"...\"],
  \"slot_notes\": [{\"slot_key\": \"labor\", \"note\": \"...\"}]
}";

/// Communique drafter preamble.
pub const DRAFTER_PREAMBLE: &str = "\
You draft the committee's decision statement and minutes summary.

## Rules
- The vote split you are given is the computed, authoritative result. \
`vote_split` MUST restate it verbatim and the statement MUST contain it \
verbatim - a statement reporting any other split will be rejected.
- The statement follows the slot guidance order: activity, labor, \
inflation, financial conditions, risks, decision, forward guidance, \
balance sheet.
- The minutes summary recounts the deliberation neutrally from the round \
summaries: what was agreed, what was disputed, who dissented and why.
- Markdown, each text starting with a `#` heading.

Return ONLY valid JSON with this exact schema:
{
  \"statement_md\": \"...\",
  \"minutes_summary_md\": \"...\",
  \"vote_split\": \"2:1\"
}";

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".into())
}

/// Identity block shared by every role-voiced prompt.
fn role_block(role: &Role) -> String {
    format!(
        "## You\n- Role id: {}\n- Name: {}\n- Bias: {}\n- Style: {}\n",
        role.id, role.display_name, role.bias, role.style
    )
}

/// Build the blackboard prompt from the four (possibly absent) materials.
pub fn render_blackboard_prompt(
    meeting_id: &str,
    sections: &[(&str, Option<&str>)],
    max_facts: usize,
    max_uncertainties: usize,
) -> String {
    let mut prompt = format!(
        "# Briefing Texts for Meeting {meeting_id}\n\n\
         Produce at most {max_facts} facts and {max_uncertainties} uncertainties.\n\n"
    );
    for (name, text) in sections {
        prompt.push_str(&format!("## {name}\n"));
        match text {
            Some(body) => {
                prompt.push_str(body);
                prompt.push('\n');
            }
            None => prompt.push_str("(not provided)\n"),
        }
        prompt.push('\n');
    }
    prompt
}

/// Build a stance-card prompt for one role.
pub fn render_stance_prompt(role: &Role, allowed_deltas: &[i32], blackboard: &Blackboard) -> String {
    format!(
        "{}\n## Allowed vote deltas (bps)\n{}\n\n## Briefing Board\n{}\n",
        role_block(role),
        to_json(&allowed_deltas),
        to_json(blackboard),
    )
}

/// Build a public-speech prompt (opening statement or directed answer).
pub fn render_speech_prompt(
    role: &Role,
    phase: DeliberationPhase,
    chair_question: Option<&str>,
    blackboard: &Blackboard,
    stance: &StanceCard,
) -> String {
    let mut prompt = format!("{}\n## Round\n{phase}\n\n", role_block(role));
    if let Some(question) = chair_question {
        prompt.push_str(&format!(
            "## The chair's question to you (answer only this)\n{question}\n\n"
        ));
    }
    prompt.push_str(&format!(
        "## Briefing Board\n{}\n\n## Your Private Stance Card\n{}\n",
        to_json(blackboard),
        to_json(stance),
    ));
    prompt
}

/// Build the chair question-selection prompt.
pub fn render_chair_questions_prompt(
    blackboard: &Blackboard,
    stance_cards: &[StanceCard],
    open_questions: &[String],
    max_questions: usize,
) -> String {
    format!(
        "## Select at most\n{max_questions} questions\n\n\
         ## Proposed Question Pool\n{}\n\n\
         ## Stance Cards\n{}\n\n## Briefing Board\n{}\n",
        to_json(&open_questions),
        to_json(&stance_cards),
        to_json(blackboard),
    )
}

/// Build the chair package-proposal prompt.
pub fn render_packages_prompt(blackboard: &Blackboard, stance_cards: &[StanceCard]) -> String {
    format!(
        "## Stance Cards\n{}\n\n## Briefing Board\n{}\n",
        to_json(&stance_cards),
        to_json(blackboard),
    )
}

/// Build a package-preference prompt for one role.
pub fn render_view_prompt(
    role: &Role,
    blackboard: &Blackboard,
    stance: &StanceCard,
    slate: &PackageSlate,
) -> String {
    format!(
        "{}\n## Proposed Packages\n{}\n\n## Briefing Board\n{}\n\n\
         ## Your Private Stance Card\n{}\n",
        role_block(role),
        to_json(slate),
        to_json(blackboard),
        to_json(stance),
    )
}

/// Build a vote prompt for one role.
pub fn render_vote_prompt(
    role: &Role,
    allowed_deltas: &[i32],
    blackboard: &Blackboard,
    stance: &StanceCard,
    slate: &PackageSlate,
) -> String {
    format!(
        "{}\n## Allowed vote deltas (bps)\n{}\n\n## Proposed Packages\n{}\n\n\
         ## Briefing Board\n{}\n\n## Your Private Stance Card\n{}\n",
        role_block(role),
        to_json(&allowed_deltas),
        to_json(slate),
        to_json(blackboard),
        to_json(stance),
    )
}

/// Build a round-summary prompt from a round transcript.
pub fn render_summary_prompt(
    phase: DeliberationPhase,
    blackboard: &Blackboard,
    transcript: &[Utterance],
) -> String {
    format!(
        "## Round\n{phase}\n\n## Round Transcript\n{}\n\n## Briefing Board\n{}\n",
        to_json(&transcript),
        to_json(blackboard),
    )
}

/// Build the drafting prompt. The tally is serialized verbatim so the
/// drafter has no vote arithmetic to do - and no room to hallucinate it.
pub fn render_drafts_prompt(
    blackboard: &Blackboard,
    tally: &Tally,
    round_summaries: &[meeting_core::RoundSummary],
) -> String {
    format!(
        "## Computed Vote Result (authoritative)\n{}\n\n\
         ## Required vote split (restate verbatim)\n{}\n\n\
         ## Round Summaries\n{}\n\n## Statement Slot Guidance\n{}\n",
        to_json(tally),
        tally.vote_split(),
        to_json(&round_summaries),
        to_json(&blackboard.statement_slots),
    )
}
