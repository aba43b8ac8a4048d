//! Public transcript renderer.
//!
//! Pure string assembly from the finished stage artifacts: the citable
//! board, the private stance deltas, both public rounds with chair
//! questions paired to their answers, the package debate, and the formal
//! votes with dissents. Written as `discussion.md` next to the drafts.

use meeting_core::model::StanceCard;
use meeting_core::{
    Blackboard, ChairQuestions, PackageSlate, PackageView, Tally, Utterance, Vote,
};

/// Everything the renderer needs, borrowed from the finished artifacts.
pub struct TranscriptInputs<'a> {
    pub meeting_id: &'a str,
    pub blackboard: &'a Blackboard,
    pub crisis_mode: bool,
    pub stance_cards: &'a [StanceCard],
    pub opening: &'a [Utterance],
    pub chair_questions: &'a ChairQuestions,
    pub answers: &'a [Utterance],
    pub slate: &'a PackageSlate,
    pub views: &'a [PackageView],
    pub votes: &'a [Vote],
    pub tally: &'a Tally,
}

fn push_speech(lines: &mut Vec<String>, utterance: &Utterance) {
    lines.push(format!("**{}**:", utterance.speaker.to_uppercase()));
    lines.push(String::new());
    lines.push(utterance.body_md.clone());
    let mut cite = Vec::new();
    if !utterance.cited_facts.is_empty() {
        cite.push(format!("facts: {}", utterance.cited_facts.join(", ")));
    }
    if !utterance.cited_uncertainties.is_empty() {
        cite.push(format!(
            "uncertainties: {}",
            utterance.cited_uncertainties.join(", ")
        ));
    }
    if !cite.is_empty() {
        lines.push(String::new());
        lines.push(format!("> cites {}", cite.join(" | ")));
    }
    lines.push(String::new());
}

/// Render the full public transcript as markdown.
pub fn render(inputs: &TranscriptInputs<'_>) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("# Committee Discussion Transcript (simulated)".into());
    lines.push(String::new());
    lines.push(format!("Meeting: {}", inputs.meeting_id));
    lines.push(format!("- crisis_mode: `{}`", inputs.crisis_mode));
    lines.push(String::new());

    lines.push("## Citable Facts".into());
    lines.push(String::new());
    for fact in &inputs.blackboard.facts {
        lines.push(format!("- `{}` [{}] {}", fact.id, fact.source, fact.text));
    }
    lines.push(String::new());

    lines.push("## Key Uncertainties".into());
    lines.push(String::new());
    for unc in &inputs.blackboard.uncertainties {
        lines.push(format!("- `{}` {}", unc.id, unc.text));
    }
    lines.push(String::new());

    lines.push("## Policy Menu".into());
    lines.push(String::new());
    for option in &inputs.blackboard.policy_menu {
        lines.push(format!(
            "- `{}`: {} ({}bp)",
            option.key, option.label, option.delta_bps
        ));
    }
    lines.push(String::new());

    lines.push("## Phase 1: Stance Cards (private, deltas only)".into());
    lines.push(String::new());
    for card in inputs.stance_cards {
        lines.push(format!(
            "- {}: preferred_delta_bps={}",
            card.role, card.preferred_delta_bps
        ));
    }
    lines.push(String::new());

    lines.push("## Phase 2: Opening Statements (public)".into());
    lines.push(String::new());
    for utterance in inputs.opening {
        push_speech(&mut lines, utterance);
        if let Some(question) = &utterance.question {
            lines.push(format!("> proposed question: {question}"));
            lines.push(String::new());
        }
    }

    lines.push("## Phase 3: Directed Questions (public)".into());
    lines.push(String::new());
    if !inputs.chair_questions.preface_md.is_empty() {
        lines.push("**CHAIR**:".into());
        lines.push(String::new());
        lines.push(inputs.chair_questions.preface_md.clone());
        lines.push(String::new());
    }
    for (idx, dq) in inputs.chair_questions.directed.iter().enumerate() {
        lines.push(format!(
            "**CHAIR** (to `{}`): {}",
            dq.to_role, dq.question
        ));
        lines.push(String::new());
        match inputs.answers.get(idx) {
            Some(answer) => push_speech(&mut lines, answer),
            None => {
                lines.push("> (no recorded answer)".into());
                lines.push(String::new());
            }
        }
    }

    lines.push("## Phase 4: Packages and Vote".into());
    lines.push(String::new());
    if !inputs.slate.transition_md.is_empty() {
        lines.push("**CHAIR**:".into());
        lines.push(String::new());
        lines.push(inputs.slate.transition_md.clone());
        lines.push(String::new());
    }
    lines.push("### Proposed Packages".into());
    lines.push(String::new());
    for pkg in &inputs.slate.packages {
        lines.push(format!(
            "- package {}: delta_bps={} · {:?} · {}",
            pkg.key, pkg.delta_bps, pkg.stance, pkg.guidance
        ));
    }
    lines.push(String::new());

    lines.push("### Member Views".into());
    lines.push(String::new());
    let mut current_role: Option<&str> = None;
    for view in inputs.views {
        if current_role != Some(view.role.as_str()) {
            lines.push(format!("**{}**:", view.role.to_uppercase()));
            current_role = Some(view.role.as_str());
        }
        lines.push(format!(
            "- {}: {:?} · {} (cites {})",
            view.package_key,
            view.verdict,
            view.because,
            view.cited_facts.join(", ")
        ));
    }
    lines.push(String::new());

    lines.push("### Formal Vote".into());
    lines.push(String::new());
    for vote in inputs.votes {
        let mut cite = vec![format!("facts: {}", vote.cited_facts.join(", "))];
        if !vote.cited_uncertainties.is_empty() {
            cite.push(format!(
                "uncertainties: {}",
                vote.cited_uncertainties.join(", ")
            ));
        }
        lines.push(format!(
            "- **{}**: {}bp · {} ({})",
            vote.role.to_uppercase(),
            vote.delta_bps,
            vote.reason,
            cite.join(" | ")
        ));
        if vote.dissent {
            if let Some(sentence) = &vote.dissent_sentence {
                lines.push(format!("  - dissent: {sentence}"));
            }
        }
    }
    lines.push(String::new());
    lines.push(format!(
        "Result: {} at {}bp; dissenting: {}",
        inputs.tally.vote_split(),
        inputs.tally.majority_delta,
        if inputs.tally.dissenting.is_empty() {
            "none".to_string()
        } else {
            inputs
                .tally
                .dissenting
                .iter()
                .map(|d| d.role.clone())
                .collect::<Vec<_>>()
                .join(", ")
        }
    ));

    let mut text = lines.join("\n");
    text.push('\n');
    text
}
