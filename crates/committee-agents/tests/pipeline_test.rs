//! End-to-end pipeline tests over a deterministic scripted gateway.
//!
//! Exercises the full eleven-stage chain against a temp-dir run store and
//! verifies the contracts that matter:
//! - every cited id resolves inside the run's own blackboard
//! - cached stages are served with zero gateway calls, byte-identical
//! - refresh regenerates and advances the manifest
//! - two fresh runs over the same script produce identical artifacts
//! - malformed replies are repaired within the bounded budget, with the
//!   retry count recorded in the manifest
//! - a failing stage leaves every prior validated stage cached and
//!   queryable, and never lets a bad citation through

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use committee_agents::gateway::{GenerationGateway, GenerationRequest};
use committee_agents::{Materials, Orchestrator, SimConfig};
use meeting_core::model::ALL_MATERIALS;
use meeting_core::{
    GatewayError, InMemoryJobStore, JobStatus, RetryPolicy, RunStore, SimError, Stage, ALL_STAGES,
};

// ── Scripted gateway ─────────────────────────────────────────────────────────

/// Replays scripted replies keyed by `phase/role`, counting every call.
struct ScriptedGateway {
    replies: Mutex<HashMap<String, Vec<String>>>,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn push(&self, phase: &str, role: &str, reply: &str) {
        self.replies
            .lock()
            .unwrap()
            .entry(format!("{phase}/{role}"))
            .or_default()
            .push(reply.to_string());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationGateway for ScriptedGateway {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = format!("{}/{}", req.phase_tag, req.role_tag);
        let mut replies = self.replies.lock().unwrap();
        match replies.get_mut(&key) {
            Some(queue) if !queue.is_empty() => Ok(queue.remove(0)),
            _ => Err(GatewayError::Transport(format!("no scripted reply for {key}"))),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

const BOARD: &str = r#"{
    "facts": [
        {"text": "GDP growth slowed to 1.4% annualized in Q2.", "source": "macro"},
        {"text": "Payroll growth averaged 110k over three months.", "source": "employment"},
        {"text": "Core inflation ran 3.2% y/y in August.", "source": "inflation"},
        {"text": "The rule baseline puts the implied rate 40bp below the current target.", "source": "policy-rule"},
        {"text": "Financial conditions tightened over the intermeeting period.", "source": "macro"}
    ],
    "uncertainties": [
        {"text": "How quickly shelter disinflation passes through."},
        {"text": "Whether labor cooling is a trend or a pause."}
    ],
    "policy_menu": [
        {"key": "cut_25", "delta_bps": -25, "label": "Cut 25bp"},
        {"key": "hold", "delta_bps": 0, "label": "Hold"},
        {"key": "hike_25", "delta_bps": 25, "label": "Hike 25bp"}
    ],
    "statement_slots": [
        {"key": "labor", "guidance": "Acknowledge the slowdown without alarm."},
        {"key": "inflation", "guidance": "Note progress, keep vigilance."},
        {"key": "risks", "guidance": "Call the risks roughly balanced."}
    ]
}"#;

fn stance_reply(delta: i32, fact: &str, uncertainty: &str) -> String {
    format!(
        r#"{{
            "preferred_delta_bps": {delta},
            "reasons": [{{"fact_id": "{fact}", "text": "This dominates my outlook."}}],
            "risks": [{{"uncertainty_id": "{uncertainty}", "text": "Could cut the other way."}}],
            "compromises": ["guidance language"],
            "questions": ["What would change your mind about {fact}?"]
        }}"#
    )
}

fn opening_reply(fact: &str, question: &str) -> String {
    format!(
        r#"{{
            "body_md": "My read of the data starts from {fact}.",
            "cited_facts": ["{fact}"],
            "cited_uncertainties": ["U01"],
            "question": "{question}"
        }}"#
    )
}

const CHAIR_QUESTIONS: &str = r#"{
    "preface_md": "Let us test the disagreement directly.",
    "directed": [
        {"to_role": "hawk", "question": "Why is 3.2% tolerable for another quarter?", "cited_facts": ["F03"]},
        {"to_role": "dove", "question": "What if labor cooling is a pause?", "cited_facts": ["F02"]},
        {"to_role": "centrist", "question": "Which risk dominates today?", "cited_facts": ["F05"]}
    ]
}"#;

fn answer_reply(fact: &str) -> String {
    format!(
        r#"{{
            "body_md": "Directly to your question: the evidence in {fact} settles it for me.",
            "cited_facts": ["{fact}"],
            "cited_uncertainties": []
        }}"#
    )
}

const SUMMARY: &str = r#"{
    "consensus": ["Inflation is still above target.", "Labor demand has cooled."],
    "disagreements": ["hawk vs dove on the cost of waiting."],
    "open_questions": ["Where is neutral?"],
    "slot_notes": [
        {"slot_key": "labor", "note": "Members flagged the three-month payroll average."},
        {"slot_key": "risks", "note": "Risk balance contested."}
    ]
}"#;

const PACKAGES: &str = r#"{
    "transition_md": "Two packages capture the range of views.",
    "packages": [
        {"key": "A", "delta_bps": 0, "stance": "neutral", "guidance": "Hold and keep optionality."},
        {"key": "B", "delta_bps": -25, "stance": "dovish", "guidance": "Cut and watch the data."}
    ]
}"#;

fn views_reply(a: &str, b: &str, fact: &str) -> String {
    format!(
        r#"{{
            "package_views": [
                {{"package_key": "A", "verdict": "{a}", "because": "Follows from my stance.", "cited_facts": ["{fact}"]}},
                {{"package_key": "B", "verdict": "{b}", "because": "Weighed against the risks.", "cited_facts": ["{fact}"]}}
            ]
        }}"#
    )
}

fn vote_reply(delta: i32, fact: &str, dissent: bool, sentence: &str) -> String {
    let sentence_json = if dissent {
        format!("\"{sentence}\"")
    } else {
        "null".to_string()
    };
    format!(
        r#"{{
            "delta_bps": {delta},
            "reason": "On balance the cited evidence decides it.",
            "cited_facts": ["{fact}"],
            "cited_uncertainties": [],
            "dissent": {dissent},
            "dissent_sentence": {sentence_json}
        }}"#
    )
}

const DRAFTS: &str = r##"{
    "statement_md": "# Committee Statement\n\nBy a 2:1 vote, the committee decided to lower the target range by 25 basis points. Labor demand has cooled while inflation remains above target.",
    "minutes_summary_md": "# Minutes Summary\n\nMembers debated the cost of waiting against the risk of re-acceleration. One member dissented, preferring to hold.",
    "vote_split": "2:1"
}"##;

/// Load a gateway with one deterministic full run.
fn script_full_run(gateway: &ScriptedGateway) {
    gateway.push("blackboard", "secretariat", BOARD);

    gateway.push("stance", "hawk", &stance_reply(25, "F03", "U01"));
    gateway.push("stance", "dove", &stance_reply(-25, "F02", "U02"));
    gateway.push("stance", "centrist", &stance_reply(0, "F01", "U01"));

    gateway.push("opening", "hawk", &opening_reply("F03", "How long can we wait?"));
    gateway.push("opening", "dove", &opening_reply("F02", "What does a hold buy us?"));
    gateway.push("opening", "centrist", &opening_reply("F01", "Which mandate is binding?"));

    gateway.push("chair-questions", "chair", CHAIR_QUESTIONS);

    gateway.push("answers", "hawk", &answer_reply("F03"));
    gateway.push("answers", "dove", &answer_reply("F02"));
    gateway.push("answers", "centrist", &answer_reply("F05"));

    gateway.push("round-summary", "secretary", SUMMARY);
    gateway.push("round-summary", "secretary", SUMMARY);

    gateway.push("packages", "chair", PACKAGES);

    gateway.push("package-views", "hawk", &views_reply("support", "oppose", "F03"));
    gateway.push("package-views", "dove", &views_reply("acceptable", "support", "F02"));
    gateway.push("package-views", "centrist", &views_reply("acceptable", "support", "F01"));

    gateway.push("votes", "hawk", &vote_reply(0, "F03", true, "I preferred to hold."));
    gateway.push("votes", "dove", &vote_reply(-25, "F02", false, ""));
    gateway.push("votes", "centrist", &vote_reply(-25, "F01", false, ""));

    gateway.push("drafts", "chair", DRAFTS);
}

/// Gateway calls one scripted full run costs (tally is pure computation).
const FULL_RUN_CALLS: usize = 21;

fn materials() -> Materials {
    let mut materials = Materials::new();
    for kind in ALL_MATERIALS {
        materials.set(kind, format!("# {} brief\n\nNumbers and narrative.", kind.key()));
    }
    materials
}

fn fast_config() -> SimConfig {
    let mut config = SimConfig::default();
    config.retry = RetryPolicy {
        max_transport_retries: 0,
        max_repair_retries: 2,
        base_backoff_ms: 1,
        request_timeout_secs: 5,
    };
    config
}

struct Harness {
    orchestrator: Orchestrator,
    gateway: Arc<ScriptedGateway>,
    jobs: Arc<InMemoryJobStore>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let gateway = Arc::new(ScriptedGateway::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        RunStore::new(dir.path().join("runs")),
        gateway.clone(),
        fast_config(),
    )
    .with_job_store(jobs.clone());
    Harness {
        orchestrator,
        gateway,
        jobs,
        _dir: dir,
    }
}

const MEETING: &str = "2024-09-18";

// ── Full-run behavior ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_run_produces_all_stages() {
    let h = harness();
    script_full_run(&h.gateway);
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();

    let manifest = h.orchestrator.run_all(MEETING, false).await.unwrap();

    for stage in ALL_STAGES {
        assert!(manifest.has_stage(stage), "missing stage {stage}");
    }
    // Derived texts land in the same manifest.
    for key in ["discussion", "statement", "minutes_summary", "macro"] {
        assert!(manifest.artifacts.contains_key(key), "missing {key}");
    }
    assert_eq!(h.gateway.calls(), FULL_RUN_CALLS);
    assert_eq!(manifest.context["crisis_mode"], false);
}

#[tokio::test]
async fn test_stance_cards_pass_citation_validation() {
    // Three roles, allowed deltas {-25, 0, 25}, a five-fact blackboard:
    // every stance card cites at least one existing fact id.
    let h = harness();
    script_full_run(&h.gateway);
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();

    let stored = h
        .orchestrator
        .ensure_stage(MEETING, Stage::Stance, false)
        .await
        .unwrap();
    let cards = stored.artifact.expect_stance_cards().unwrap();

    assert_eq!(cards.len(), 3);
    let board = h
        .orchestrator
        .get_stage(MEETING, Stage::Blackboard)
        .unwrap()
        .unwrap();
    let board = board.artifact.expect_blackboard().unwrap();
    assert_eq!(board.facts.len(), 5);
    let fact_ids: Vec<&str> = board.facts.iter().map(|f| f.id.as_str()).collect();
    for card in cards {
        assert!(!card.reasons.is_empty());
        for reason in &card.reasons {
            assert!(fact_ids.contains(&reason.fact_id.as_str()));
        }
    }
}

#[tokio::test]
async fn test_tally_matches_votes() {
    // hawk=0, dove=-25, centrist=-25 → {-25: 2, 0: 1}, majority -25,
    // hawk dissenting with its sentence carried over.
    let h = harness();
    script_full_run(&h.gateway);
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();
    h.orchestrator.run_all(MEETING, false).await.unwrap();

    let stored = h.orchestrator.get_stage(MEETING, Stage::Tally).unwrap().unwrap();
    let tally = stored.artifact.expect_tally().unwrap();

    assert_eq!(tally.counts.get(&-25), Some(&2));
    assert_eq!(tally.counts.get(&0), Some(&1));
    assert_eq!(tally.counts.values().sum::<u32>(), 3);
    assert_eq!(tally.majority_delta, -25);
    assert_eq!(tally.dissenting.len(), 1);
    assert_eq!(tally.dissenting[0].role, "hawk");
    assert_eq!(tally.dissenting[0].sentence.as_deref(), Some("I preferred to hold."));
    assert_eq!(tally.vote_split(), "2:1");
}

#[tokio::test]
async fn test_drafts_restate_computed_split() {
    let h = harness();
    script_full_run(&h.gateway);
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();
    h.orchestrator.run_all(MEETING, false).await.unwrap();

    let stored = h.orchestrator.get_stage(MEETING, Stage::Drafts).unwrap().unwrap();
    let draft = stored.artifact.expect_drafts().unwrap();
    assert_eq!(draft.vote_split, "2:1");
    assert!(draft.statement_md.contains("2:1"));
}

// ── Cache / refresh contract ─────────────────────────────────────────────────

#[tokio::test]
async fn test_cached_run_all_makes_zero_calls_and_keeps_manifest() {
    let h = harness();
    script_full_run(&h.gateway);
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();

    let first = h.orchestrator.run_all(MEETING, false).await.unwrap();
    let calls_after_first = h.gateway.calls();

    let second = h.orchestrator.run_all(MEETING, false).await.unwrap();

    assert_eq!(h.gateway.calls(), calls_after_first, "cached run must not generate");
    assert_eq!(first.updated_at, second.updated_at, "manifest must be untouched");
    for stage in ALL_STAGES {
        assert_eq!(
            first.stage_record(stage).unwrap().updated_at,
            second.stage_record(stage).unwrap().updated_at
        );
    }
}

#[tokio::test]
async fn test_cached_ensure_stage_is_byte_identical() {
    let h = harness();
    script_full_run(&h.gateway);
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();
    h.orchestrator.run_all(MEETING, false).await.unwrap();
    let calls = h.gateway.calls();

    let run = h.orchestrator.store().ensure_run(MEETING).unwrap();
    let before = h
        .orchestrator
        .store()
        .read_stage_bytes(&run, Stage::Drafts)
        .unwrap()
        .unwrap();

    let stored = h
        .orchestrator
        .ensure_stage(MEETING, Stage::Drafts, false)
        .await
        .unwrap();
    let after = h
        .orchestrator
        .store()
        .read_stage_bytes(&run, Stage::Drafts)
        .unwrap()
        .unwrap();

    assert_eq!(h.gateway.calls(), calls, "cache hit must cost zero gateway calls");
    assert_eq!(before, after);
    assert_eq!(stored.stage, Stage::Drafts);
}

#[tokio::test]
async fn test_refresh_overwrites_and_advances_updated_at() {
    let h = harness();
    script_full_run(&h.gateway);
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();
    h.orchestrator.run_all(MEETING, false).await.unwrap();

    let before = h
        .orchestrator
        .get_stage(MEETING, Stage::Votes)
        .unwrap()
        .unwrap()
        .record
        .updated_at;
    let calls = h.gateway.calls();

    // Re-script the votes round; this time everyone holds.
    h.gateway.push("votes", "hawk", &vote_reply(0, "F03", false, ""));
    h.gateway.push("votes", "dove", &vote_reply(0, "F02", false, ""));
    h.gateway.push("votes", "centrist", &vote_reply(0, "F01", false, ""));

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let stored = h
        .orchestrator
        .ensure_stage(MEETING, Stage::Votes, true)
        .await
        .unwrap();

    assert_eq!(h.gateway.calls(), calls + 3, "refresh regenerates only the target stage");
    assert!(stored.record.updated_at > before);
    let (votes, _) = stored.artifact.expect_votes().unwrap();
    assert!(votes.iter().all(|v| v.delta_bps == 0));
}

#[tokio::test]
async fn test_two_fresh_runs_are_deterministic() {
    let mut artifacts: Vec<Vec<Vec<u8>>> = Vec::new();

    for _ in 0..2 {
        let h = harness();
        script_full_run(&h.gateway);
        h.orchestrator.seed_materials(MEETING, &materials()).unwrap();
        h.orchestrator.run_all(MEETING, false).await.unwrap();

        let run = h.orchestrator.store().ensure_run(MEETING).unwrap();
        artifacts.push(
            ALL_STAGES
                .iter()
                .map(|s| {
                    h.orchestrator
                        .store()
                        .read_stage_bytes(&run, *s)
                        .unwrap()
                        .unwrap()
                })
                .collect(),
        );
    }

    assert_eq!(artifacts[0], artifacts[1], "same inputs must produce identical artifacts");
}

// ── Resilience ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_malformed_replies_repaired_and_retry_count_recorded() {
    // Malformed JSON on attempts 1–2, valid on attempt 3 → the stage
    // succeeds and the manifest records retries = 2.
    let h = harness();
    h.gateway.push("blackboard", "secretariat", "I cannot produce JSON today.");
    h.gateway.push("blackboard", "secretariat", "{\"facts\": ");
    h.gateway.push("blackboard", "secretariat", BOARD);
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();

    let stored = h
        .orchestrator
        .ensure_stage(MEETING, Stage::Blackboard, false)
        .await
        .unwrap();

    assert_eq!(stored.record.meta["retries"], 2);
    assert_eq!(h.gateway.calls(), 3);
}

#[tokio::test]
async fn test_bad_citation_rejects_stage_and_keeps_prior_stages() {
    // The hawk's stance card insists on citing F99, which is not on the
    // board: the stage must be rejected, not passed through with the bad
    // citation stripped - and the blackboard stays cached and queryable.
    let h = harness();
    script_full_run(&h.gateway);
    let bad = stance_reply(25, "F99", "U01");
    {
        let mut replies = h.gateway.replies.lock().unwrap();
        replies.insert("stance/hawk".into(), vec![bad.clone(), bad.clone(), bad]);
    }
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();

    let err = h
        .orchestrator
        .ensure_stage(MEETING, Stage::Stance, false)
        .await
        .unwrap_err();

    assert!(matches!(err, SimError::CitationInvalid { .. }), "{err}");
    assert!(err.to_string().contains("F99"));

    // Prior validated stage intact; failed stage and downstream absent.
    assert!(h.orchestrator.get_stage(MEETING, Stage::Blackboard).unwrap().is_some());
    assert!(h.orchestrator.get_stage(MEETING, Stage::Stance).unwrap().is_none());
    assert!(h.orchestrator.get_stage(MEETING, Stage::Opening).unwrap().is_none());
}

#[tokio::test]
async fn test_out_of_set_vote_fails_run_and_keeps_upstream() {
    let h = harness();
    script_full_run(&h.gateway);
    let rogue = vote_reply(50, "F03", false, "");
    {
        let mut replies = h.gateway.replies.lock().unwrap();
        replies.insert("votes/hawk".into(), vec![rogue.clone(), rogue.clone(), rogue]);
    }
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();

    let err = h.orchestrator.run_all(MEETING, false).await.unwrap_err();
    assert!(matches!(err, SimError::SchemaValidationFailed { .. }), "{err}");

    for stage in [
        Stage::Blackboard,
        Stage::Stance,
        Stage::Opening,
        Stage::ChairQuestions,
        Stage::Answers,
        Stage::RoundSummary,
        Stage::Packages,
        Stage::PackageViews,
    ] {
        assert!(
            h.orchestrator.get_stage(MEETING, stage).unwrap().is_some(),
            "prior stage {stage} must stay cached"
        );
    }
    for stage in [Stage::Votes, Stage::Tally, Stage::Drafts] {
        assert!(h.orchestrator.get_stage(MEETING, stage).unwrap().is_none());
    }

    // The failed run is resumable once the gateway behaves: only the
    // missing stages are generated.
    {
        let mut replies = h.gateway.replies.lock().unwrap();
        replies.insert(
            "votes/hawk".into(),
            vec![vote_reply(0, "F03", true, "I preferred to hold.")],
        );
    }
    h.gateway.push("votes", "dove", &vote_reply(-25, "F02", false, ""));
    h.gateway.push("votes", "centrist", &vote_reply(-25, "F01", false, ""));
    h.gateway.push("drafts", "chair", DRAFTS);

    let manifest = h.orchestrator.run_all(MEETING, false).await.unwrap();
    for stage in ALL_STAGES {
        assert!(manifest.has_stage(stage));
    }
}

#[tokio::test]
async fn test_unseeded_meeting_fails_with_material_missing() {
    let h = harness();
    script_full_run(&h.gateway);

    let err = h.orchestrator.run_all(MEETING, false).await.unwrap_err();
    assert!(matches!(err, SimError::MaterialMissing { .. }), "{err}");
    assert_eq!(h.gateway.calls(), 0, "no generation without any material");
}

// ── Observability ────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_job_log_tracks_run_progress() {
    let h = harness();
    script_full_run(&h.gateway);
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();
    h.orchestrator.run_all(MEETING, false).await.unwrap();

    let jobs = h.jobs.list();
    assert_eq!(jobs.len(), 1);
    let job = &jobs[0];
    assert_eq!(job.status, JobStatus::Succeeded);
    assert!(job.kind.starts_with("meeting-run:"));
    assert!(job.log.iter().any(|l| l.contains("stage blackboard started")));
    assert!(job.log.iter().any(|l| l.contains("stage drafts done")));
}

#[tokio::test]
async fn test_prompt_log_records_every_generation() {
    let h = harness();
    script_full_run(&h.gateway);
    h.orchestrator.seed_materials(MEETING, &materials()).unwrap();
    h.orchestrator.run_all(MEETING, false).await.unwrap();

    let run = h.orchestrator.store().ensure_run(MEETING).unwrap();
    let log = committee_agents::telemetry::PromptLog::new(run.dir.join("prompt-log.jsonl"));
    let records = log.read_all();
    assert_eq!(records.len(), FULL_RUN_CALLS);
    assert!(records.iter().all(|r| r.ok && r.model == "scripted"));
    assert!(records.iter().any(|r| r.phase == "drafts"));
}
