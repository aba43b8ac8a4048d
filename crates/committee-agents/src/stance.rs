//! Stance engine: one private, grounded position card per role.
//!
//! Cards are generated independently per role (no ordering constraint)
//! from the blackboard alone. The contract is enforced here, not merely
//! requested: the preferred delta must sit in the role's effective set and
//! every reason/risk must cite an id the blackboard actually contains -
//! otherwise the reply is repaired or the stage fails.

use schemars::JsonSchema;
use serde::Deserialize;

use meeting_core::artifact::Violation;
use meeting_core::error::SimResult;
use meeting_core::model::{normalize_ws, Role, StanceCard, StanceReason, StanceRisk};
use meeting_core::{Blackboard, CitationIndex, Stage};

use crate::blackboard::schema_value;
use crate::gateway::GenerationRequest;
use crate::generate::{Generated, Generator};
use crate::prompts;

#[derive(Debug, Deserialize, JsonSchema)]
struct RawStanceReply {
    preferred_delta_bps: i32,
    #[serde(default)]
    reasons: Vec<RawReason>,
    #[serde(default)]
    risks: Vec<RawRisk>,
    #[serde(default)]
    compromises: Vec<String>,
    #[serde(default)]
    questions: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawReason {
    #[serde(default)]
    fact_id: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawRisk {
    #[serde(default)]
    uncertainty_id: String,
    #[serde(default)]
    text: String,
}

/// Generate one stance card.
pub async fn generate_stance_card(
    gen: &Generator<'_>,
    role: &Role,
    blackboard: &Blackboard,
    crisis_mode: bool,
) -> SimResult<Generated<StanceCard>> {
    let allowed = role.effective_deltas(crisis_mode);
    let prompt = prompts::render_stance_prompt(role, &allowed, blackboard);
    let req = GenerationRequest::new(prompts::STANCE_PREAMBLE, prompt)
        .with_schema(schema_value::<RawStanceReply>())
        .with_tags(&role.id, Stage::Stance.key())
        .with_sampling(0.25, 1200);

    let role_id = role.id.clone();
    let index = CitationIndex::new(blackboard);

    gen.object::<RawStanceReply, _, _>(Stage::Stance, req, move |raw| {
        let card = StanceCard {
            role: role_id.clone(),
            preferred_delta_bps: raw.preferred_delta_bps,
            reasons: raw
                .reasons
                .into_iter()
                .map(|r| StanceReason {
                    fact_id: r.fact_id.trim().to_string(),
                    text: normalize_ws(&r.text),
                })
                .collect(),
            risks: raw
                .risks
                .into_iter()
                .map(|r| StanceRisk {
                    uncertainty_id: r.uncertainty_id.trim().to_string(),
                    text: normalize_ws(&r.text),
                })
                .collect(),
            compromises: raw
                .compromises
                .into_iter()
                .map(|c| normalize_ws(&c))
                .filter(|c| !c.is_empty())
                .collect(),
            questions: raw
                .questions
                .into_iter()
                .map(|q| normalize_ws(&q))
                .filter(|q| !q.is_empty())
                .collect(),
        };

        let mut violations = Vec::new();
        if !allowed.contains(&card.preferred_delta_bps) {
            violations.push(Violation::Schema(format!(
                "preferred_delta_bps {} is not in the allowed set {allowed:?}",
                card.preferred_delta_bps
            )));
        }
        if card.reasons.is_empty() {
            violations.push(Violation::Schema("no reasons given".into()));
        }
        let fact_ids: Vec<String> = card.reasons.iter().map(|r| r.fact_id.clone()).collect();
        let unc_ids: Vec<String> = card.risks.iter().map(|r| r.uncertainty_id.clone()).collect();
        if let Err(detail) = index.check(&fact_ids, &unc_ids) {
            violations.push(Violation::Citation(detail));
        }

        if violations.is_empty() {
            Ok(card)
        } else {
            Err(violations)
        }
    })
    .await
}
