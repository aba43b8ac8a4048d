//! Deliberation engine: the public rounds.
//!
//! Opening statements (one per role, each proposing exactly one follow-up
//! question), directed answers to the chair's questions, and the
//! secretary's neutral round summaries. Everything spoken on the record
//! must cite blackboard ids; the question pool for the chair is assembled
//! here from the opening round plus the stance cards.

use schemars::JsonSchema;
use serde::Deserialize;

use meeting_core::artifact::Violation;
use meeting_core::error::SimResult;
use meeting_core::model::{normalize_ws, Role, SlotNote, StanceCard};
use meeting_core::{Blackboard, CitationIndex, DeliberationPhase, RoundSummary, Stage, Utterance};

use crate::blackboard::schema_value;
use crate::gateway::GenerationRequest;
use crate::generate::{Generated, Generator};
use crate::prompts;

#[derive(Debug, Deserialize, JsonSchema)]
struct RawSpeechReply {
    #[serde(default)]
    body_md: String,
    #[serde(default)]
    cited_facts: Vec<String>,
    #[serde(default)]
    cited_uncertainties: Vec<String>,
    #[serde(default)]
    question: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawSummaryReply {
    #[serde(default)]
    consensus: Vec<String>,
    #[serde(default)]
    disagreements: Vec<String>,
    #[serde(default)]
    open_questions: Vec<String>,
    #[serde(default)]
    slot_notes: Vec<RawSlotNote>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawSlotNote {
    #[serde(default)]
    slot_key: String,
    #[serde(default)]
    note: String,
}

/// Caps applied to summary lists.
const MAX_SUMMARY_POINTS: usize = 10;
const MAX_SLOT_NOTES: usize = 16;

fn speech_stage(phase: DeliberationPhase) -> Stage {
    match phase {
        DeliberationPhase::OpeningStatements => Stage::Opening,
        DeliberationPhase::DirectedQa => Stage::Answers,
    }
}

/// Generate one public utterance for a role.
///
/// With `chair_question` set this is a directed answer; otherwise an
/// opening statement, which must carry exactly one follow-up question.
pub async fn generate_speech(
    gen: &Generator<'_>,
    role: &Role,
    blackboard: &Blackboard,
    stance: &StanceCard,
    phase: DeliberationPhase,
    chair_question: Option<&str>,
) -> SimResult<Generated<Utterance>> {
    let stage = speech_stage(phase);
    let prompt = prompts::render_speech_prompt(role, phase, chair_question, blackboard, stance);
    let req = GenerationRequest::new(prompts::SPEAKER_PREAMBLE, prompt)
        .with_schema(schema_value::<RawSpeechReply>())
        .with_tags(&role.id, stage.key())
        .with_sampling(0.35, 900);

    let role_id = role.id.clone();
    let index = CitationIndex::new(blackboard);

    gen.object::<RawSpeechReply, _, _>(stage, req, move |raw| {
        let utterance = Utterance {
            phase,
            speaker: role_id.clone(),
            cited_facts: trim_ids(raw.cited_facts),
            cited_uncertainties: trim_ids(raw.cited_uncertainties),
            body_md: raw.body_md.trim().to_string(),
            question: raw
                .question
                .map(|q| normalize_ws(&q))
                .filter(|q| !q.is_empty()),
        };

        let mut violations = Vec::new();
        if utterance.body_md.is_empty() {
            violations.push(Violation::Schema("empty speech body".into()));
        }
        if utterance.cited_facts.is_empty() {
            violations.push(Violation::Schema(
                "a public statement must cite at least one fact".into(),
            ));
        }
        if let Err(detail) = index.check(&utterance.cited_facts, &utterance.cited_uncertainties) {
            violations.push(Violation::Citation(detail));
        }
        match phase {
            DeliberationPhase::OpeningStatements if utterance.question.is_none() => {
                violations.push(Violation::Schema(
                    "an opening statement must propose exactly one follow-up question".into(),
                ));
            }
            _ => {}
        }

        if violations.is_empty() {
            Ok(utterance)
        } else {
            Err(violations)
        }
    })
    .await
}

/// Generate the secretary's neutral summary of one round.
pub async fn summarize_round(
    gen: &Generator<'_>,
    blackboard: &Blackboard,
    phase: DeliberationPhase,
    transcript: &[Utterance],
) -> SimResult<Generated<RoundSummary>> {
    let prompt = prompts::render_summary_prompt(phase, blackboard, transcript);
    let req = GenerationRequest::new(prompts::SECRETARY_PREAMBLE, prompt)
        .with_schema(schema_value::<RawSummaryReply>())
        .with_tags("secretary", Stage::RoundSummary.key())
        .with_sampling(0.2, 900);

    let slot_keys: Vec<String> = blackboard
        .statement_slots
        .iter()
        .map(|s| s.key.clone())
        .collect();

    gen.object::<RawSummaryReply, _, _>(Stage::RoundSummary, req, move |raw| {
        let summary = RoundSummary {
            phase,
            consensus: clean_points(raw.consensus),
            disagreements: clean_points(raw.disagreements),
            open_questions: clean_points(raw.open_questions),
            slot_notes: raw
                .slot_notes
                .into_iter()
                .filter_map(|n| {
                    let slot_key = n.slot_key.trim().to_string();
                    let note = normalize_ws(&n.note);
                    (slot_keys.contains(&slot_key) && !note.is_empty())
                        .then_some(SlotNote { slot_key, note })
                })
                .take(MAX_SLOT_NOTES)
                .collect(),
        };
        Ok::<_, Vec<Violation>>(summary)
    })
    .await
}

/// Assemble the chair's question pool: every opening-statement follow-up,
/// plus up to two proposed questions per stance card, normalized,
/// de-duplicated, capped.
pub fn collect_open_questions(
    opening: &[Utterance],
    stance_cards: &[StanceCard],
    cap: usize,
) -> Vec<String> {
    let mut pool: Vec<String> = Vec::new();
    let mut seen = std::collections::HashSet::new();

    let candidates = opening
        .iter()
        .filter_map(|u| u.question.clone())
        .chain(
            stance_cards
                .iter()
                .flat_map(|card| card.questions.iter().take(2).cloned()),
        );

    for question in candidates {
        let q = normalize_ws(&question);
        if q.is_empty() || !seen.insert(q.clone()) {
            continue;
        }
        pool.push(q);
        if pool.len() == cap {
            break;
        }
    }
    pool
}

fn trim_ids(ids: Vec<String>) -> Vec<String> {
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect()
}

fn clean_points(points: Vec<String>) -> Vec<String> {
    points
        .into_iter()
        .map(|p| normalize_ws(&p))
        .filter(|p| !p.is_empty())
        .take(MAX_SUMMARY_POINTS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GenerationGateway;
    use async_trait::async_trait;
    use meeting_core::model::{default_roles, Fact, MaterialKind, SlotGuidance};
    use meeting_core::{GatewayError, RetryPolicy, SimError};
    use std::sync::Mutex;

    fn board() -> Blackboard {
        Blackboard {
            meeting_id: "m1".into(),
            facts: vec![Fact {
                id: "F01".into(),
                text: "Payrolls slowed.".into(),
                source: MaterialKind::Employment,
            }],
            uncertainties: vec![],
            policy_menu: vec![],
            statement_slots: vec![SlotGuidance {
                key: "labor".into(),
                guidance: String::new(),
            }],
        }
    }

    fn stance(role: &str) -> StanceCard {
        StanceCard {
            role: role.into(),
            preferred_delta_bps: 0,
            reasons: vec![],
            risks: vec![],
            compromises: vec![],
            questions: vec![
                "What is the neutral rate now?".into(),
                "Where is quantitative tightening biting?".into(),
                "A third question that is never taken.".into(),
            ],
        }
    }

    struct Scripted(Mutex<Vec<String>>);

    #[async_trait]
    impl GenerationGateway for Scripted {
        async fn generate(&self, _req: &GenerationRequest) -> Result<String, GatewayError> {
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                return Err(GatewayError::Transport("script exhausted".into()));
            }
            Ok(replies.remove(0))
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_transport_retries: 0,
            max_repair_retries: 1,
            base_backoff_ms: 1,
            request_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_opening_statement_needs_question() {
        let no_question =
            r#"{"body_md": "We should hold.", "cited_facts": ["F01"], "question": null}"#;
        let gateway = Scripted(Mutex::new(vec![no_question.into(), no_question.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[2];
        let err = generate_speech(
            &gen,
            role,
            &board(),
            &stance("centrist"),
            DeliberationPhase::OpeningStatements,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SimError::SchemaValidationFailed { .. }));
    }

    #[tokio::test]
    async fn test_directed_answer_accepts_no_question() {
        let answer = r#"{"body_md": "On your question: patience.", "cited_facts": ["F01"]}"#;
        let gateway = Scripted(Mutex::new(vec![answer.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[1];
        let out = generate_speech(
            &gen,
            role,
            &board(),
            &stance("dove"),
            DeliberationPhase::DirectedQa,
            Some("Why so patient?"),
        )
        .await
        .unwrap();
        assert_eq!(out.value.phase, DeliberationPhase::DirectedQa);
        assert_eq!(out.value.speaker, "dove");
        assert!(out.value.question.is_none());
    }

    #[tokio::test]
    async fn test_uncited_speech_rejected() {
        let uncited = r#"{"body_md": "Trust me.", "cited_facts": [], "question": "Why?"}"#;
        let gateway = Scripted(Mutex::new(vec![uncited.into(), uncited.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[0];
        let err = generate_speech(
            &gen,
            role,
            &board(),
            &stance("hawk"),
            DeliberationPhase::OpeningStatements,
            None,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("at least one fact"));
    }

    #[tokio::test]
    async fn test_unknown_citation_rejected() {
        let bad = r#"{"body_md": "See F09.", "cited_facts": ["F09"], "question": "Why?"}"#;
        let gateway = Scripted(Mutex::new(vec![bad.into(), bad.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[0];
        let err = generate_speech(
            &gen,
            role,
            &board(),
            &stance("hawk"),
            DeliberationPhase::OpeningStatements,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SimError::CitationInvalid { .. }));
    }

    #[tokio::test]
    async fn test_summary_filters_unknown_slots() {
        let reply = r#"{
            "consensus": ["Labor is cooling."],
            "disagreements": ["How much restraint is left."],
            "open_questions": ["Neutral rate?"],
            "slot_notes": [
                {"slot_key": "labor", "note": "Note the slowdown."},
                {"slot_key": "weather", "note": "Dropped."}
            ]
        }"#;
        let gateway = Scripted(Mutex::new(vec![reply.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let out = summarize_round(&gen, &board(), DeliberationPhase::OpeningStatements, &[])
            .await
            .unwrap();
        assert_eq!(out.value.slot_notes.len(), 1);
        assert_eq!(out.value.slot_notes[0].slot_key, "labor");
        assert_eq!(out.value.phase, DeliberationPhase::OpeningStatements);
    }

    #[test]
    fn test_collect_open_questions_dedupes_and_caps() {
        let opening = vec![
            Utterance {
                phase: DeliberationPhase::OpeningStatements,
                speaker: "hawk".into(),
                cited_facts: vec!["F01".into()],
                cited_uncertainties: vec![],
                body_md: "x".into(),
                question: Some("How fast is the labor market cooling?".into()),
            },
            Utterance {
                phase: DeliberationPhase::OpeningStatements,
                speaker: "dove".into(),
                cited_facts: vec!["F01".into()],
                cited_uncertainties: vec![],
                body_md: "y".into(),
                question: Some("  How fast is the labor   market cooling? ".into()),
            },
        ];
        let cards = vec![stance("hawk")];
        let pool = collect_open_questions(&opening, &cards, 10);

        // Duplicate opening question collapsed; only two stance questions taken.
        assert_eq!(pool.len(), 3);
        assert_eq!(pool[0], "How fast is the labor market cooling?");
        assert!(pool.contains(&"What is the neutral rate now?".to_string()));
        assert!(!pool.iter().any(|q| q.contains("never taken")));

        let capped = collect_open_questions(&opening, &cards, 2);
        assert_eq!(capped.len(), 2);
    }
}
