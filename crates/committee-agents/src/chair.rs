//! Chair controller: targeted question selection and package proposal.
//!
//! Two separate stages. Question selection picks 3–6 directed questions
//! from the assembled pool, with a deterministic round-robin fallback so
//! an unusable model selection never sinks the stage - the fallback only
//! redistributes questions that members themselves proposed, it invents
//! nothing. Package proposal is strict: 2–3 packages, every delta on the
//! blackboard's policy menu, or the stage fails.

use schemars::JsonSchema;
use serde::Deserialize;

use meeting_core::artifact::Violation;
use meeting_core::error::SimResult;
use meeting_core::model::{
    normalize_ws, DirectedQuestion, PackageStance, PolicyPackage, Role, StanceCard,
};
use meeting_core::{Blackboard, ChairQuestions, CitationIndex, PackageSlate, Stage};

use crate::blackboard::schema_value;
use crate::gateway::GenerationRequest;
use crate::generate::{Generated, Generator};
use crate::prompts;

#[derive(Debug, Deserialize, JsonSchema)]
struct RawChairQuestionsReply {
    #[serde(default)]
    preface_md: String,
    #[serde(default)]
    directed: Vec<RawDirected>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawDirected {
    #[serde(default)]
    to_role: String,
    #[serde(default)]
    question: String,
    #[serde(default)]
    cited_facts: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawPackagesReply {
    #[serde(default)]
    transition_md: String,
    #[serde(default)]
    packages: Vec<RawPackage>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawPackage {
    #[serde(default)]
    key: String,
    #[serde(default)]
    delta_bps: Option<i32>,
    #[serde(default)]
    stance: String,
    #[serde(default)]
    guidance: String,
}

/// Round-robin the question pool across the committee.
fn fallback_questions(pool: &[String], roles: &[Role], min: usize, max: usize) -> Vec<DirectedQuestion> {
    pool.iter()
        .take(max.min(pool.len().max(min)))
        .enumerate()
        .map(|(i, q)| DirectedQuestion {
            to_role: roles[i % roles.len()].id.clone(),
            question: normalize_ws(q),
            cited_facts: Vec::new(),
        })
        .collect()
}

/// Select 3–6 targeted questions from the pool.
pub async fn select_questions(
    gen: &Generator<'_>,
    roles: &[Role],
    blackboard: &Blackboard,
    stance_cards: &[StanceCard],
    pool: &[String],
    max_questions: usize,
) -> SimResult<Generated<ChairQuestions>> {
    let prompt =
        prompts::render_chair_questions_prompt(blackboard, stance_cards, pool, max_questions);
    let req = GenerationRequest::new(prompts::CHAIR_QUESTIONS_PREAMBLE, prompt)
        .with_schema(schema_value::<RawChairQuestionsReply>())
        .with_tags("chair", Stage::ChairQuestions.key())
        .with_sampling(0.25, 900);

    let index = CitationIndex::new(blackboard);
    let roles = roles.to_vec();
    let pool = pool.to_vec();
    let min = roles.len().min(3);

    gen.object::<RawChairQuestionsReply, _, _>(Stage::ChairQuestions, req, move |raw| {
        let mut violations = Vec::new();

        // Entries with unknown addressees or empty wording are unusable and
        // dropped; bad citations are a hard violation, never stripped.
        let mut directed: Vec<DirectedQuestion> = Vec::new();
        for item in raw.directed.into_iter().take(max_questions) {
            let to_role = item.to_role.trim().to_lowercase();
            let question = normalize_ws(&item.question);
            if question.is_empty() || !roles.iter().any(|r| r.id == to_role) {
                continue;
            }
            if let Err(detail) = index.check(&item.cited_facts, &[]) {
                violations.push(Violation::Citation(detail));
                continue;
            }
            directed.push(DirectedQuestion {
                to_role,
                question,
                cited_facts: item.cited_facts,
            });
        }

        if !violations.is_empty() {
            return Err(violations);
        }

        if directed.len() < min {
            // The model's selection came up short: redistribute the pool.
            directed = fallback_questions(&pool, &roles, min, max_questions);
            tracing::warn!(
                selected = directed.len(),
                "chair selection unusable, falling back to round-robin over the pool"
            );
        }

        if directed.len() < min {
            return Err(vec![Violation::Schema(format!(
                "only {} usable questions, need at least {min}",
                directed.len()
            ))]);
        }

        Ok(ChairQuestions {
            preface_md: raw.preface_md.trim().to_string(),
            directed,
        })
    })
    .await
}

/// Propose 2–3 packages, deltas restricted to the policy menu.
pub async fn propose_packages(
    gen: &Generator<'_>,
    blackboard: &Blackboard,
    stance_cards: &[StanceCard],
) -> SimResult<Generated<PackageSlate>> {
    let prompt = prompts::render_packages_prompt(blackboard, stance_cards);
    let req = GenerationRequest::new(prompts::CHAIR_PACKAGES_PREAMBLE, prompt)
        .with_schema(schema_value::<RawPackagesReply>())
        .with_tags("chair", Stage::Packages.key())
        .with_sampling(0.2, 900);

    let menu = blackboard.menu_deltas();

    gen.object::<RawPackagesReply, _, _>(Stage::Packages, req, move |raw| {
        let mut violations = Vec::new();
        let mut packages: Vec<PolicyPackage> = Vec::new();

        for item in raw.packages {
            let key = item.key.trim().to_string();
            let Some(delta) = item.delta_bps else {
                violations.push(Violation::Schema(format!("package '{key}' has no delta")));
                continue;
            };
            if !menu.contains(&delta) {
                violations.push(Violation::Schema(format!(
                    "package '{key}' delta {delta}bps is not on the policy menu {menu:?}"
                )));
                continue;
            }
            if key.is_empty() || packages.iter().any(|p| p.key == key) {
                violations.push(Violation::Schema(format!("missing or duplicate key '{key}'")));
                continue;
            }
            let stance = match item.stance.trim().to_lowercase().as_str() {
                "hawkish" => PackageStance::Hawkish,
                "dovish" => PackageStance::Dovish,
                _ => PackageStance::Neutral,
            };
            packages.push(PolicyPackage {
                key,
                delta_bps: delta,
                stance,
                guidance: normalize_ws(&item.guidance),
            });
        }

        if packages.len() < 2 || packages.len() > 3 {
            violations.push(Violation::Schema(format!(
                "{} usable packages, need 2-3",
                packages.len()
            )));
        }

        if violations.is_empty() {
            Ok(PackageSlate {
                transition_md: raw.transition_md.trim().to_string(),
                packages,
            })
        } else {
            Err(violations)
        }
    })
    .await
}
