//! Package preferences and formal votes, one reply per role.
//!
//! Both run as independent per-role calls against the same read-only
//! snapshot (blackboard, stance card, package slate). Deltas are
//! constrained to the role's effective allowed set and every citation
//! must resolve; out-of-contract replies are repaired, then fail the
//! stage - a vote is never clamped into validity.

use schemars::JsonSchema;
use serde::Deserialize;

use meeting_core::artifact::Violation;
use meeting_core::error::SimResult;
use meeting_core::model::{normalize_ws, Role, StanceCard, Verdict};
use meeting_core::{Blackboard, CitationIndex, PackageSlate, PackageView, Stage, Vote};

use crate::blackboard::schema_value;
use crate::gateway::GenerationRequest;
use crate::generate::{Generated, Generator};
use crate::prompts;

#[derive(Debug, Deserialize, JsonSchema)]
struct RawViewsReply {
    #[serde(default)]
    package_views: Vec<RawView>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawView {
    #[serde(default)]
    package_key: String,
    #[serde(default)]
    verdict: String,
    #[serde(default)]
    because: String,
    #[serde(default)]
    cited_facts: Vec<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawVoteReply {
    delta_bps: i32,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    cited_facts: Vec<String>,
    #[serde(default)]
    cited_uncertainties: Vec<String>,
    #[serde(default)]
    dissent: bool,
    #[serde(default)]
    dissent_sentence: Option<String>,
}

/// Generate one role's verdicts on every proposed package.
pub async fn generate_package_views(
    gen: &Generator<'_>,
    role: &Role,
    blackboard: &Blackboard,
    stance: &StanceCard,
    slate: &PackageSlate,
) -> SimResult<Generated<Vec<PackageView>>> {
    let prompt = prompts::render_view_prompt(role, blackboard, stance, slate);
    let req = GenerationRequest::new(prompts::PACKAGE_VIEW_PREAMBLE, prompt)
        .with_schema(schema_value::<RawViewsReply>())
        .with_tags(&role.id, Stage::PackageViews.key())
        .with_sampling(0.25, 900);

    let role_id = role.id.clone();
    let index = CitationIndex::new(blackboard);
    let keys: Vec<String> = slate.packages.iter().map(|p| p.key.clone()).collect();

    gen.object::<RawViewsReply, _, _>(Stage::PackageViews, req, move |raw| {
        let mut violations = Vec::new();
        let mut views: Vec<PackageView> = Vec::new();

        for item in raw.package_views {
            let package_key = item.package_key.trim().to_string();
            if !keys.contains(&package_key) {
                violations.push(Violation::Schema(format!(
                    "view on unknown package '{package_key}'"
                )));
                continue;
            }
            let verdict = match item.verdict.trim().to_lowercase().as_str() {
                "support" => Verdict::Support,
                "acceptable" => Verdict::Acceptable,
                "oppose" => Verdict::Oppose,
                other => {
                    violations.push(Violation::Schema(format!(
                        "verdict '{other}' is not support/acceptable/oppose"
                    )));
                    continue;
                }
            };
            if let Err(detail) = index.check(&item.cited_facts, &[]) {
                violations.push(Violation::Citation(detail));
                continue;
            }
            if views.iter().any(|v| v.package_key == package_key) {
                violations.push(Violation::Schema(format!(
                    "two views on package '{package_key}'"
                )));
                continue;
            }
            views.push(PackageView {
                role: role_id.clone(),
                package_key,
                verdict,
                because: normalize_ws(&item.because),
                cited_facts: item.cited_facts,
            });
        }

        for key in &keys {
            if !views.iter().any(|v| &v.package_key == key) {
                violations.push(Violation::Schema(format!(
                    "no verdict on package '{key}'"
                )));
            }
        }

        if violations.is_empty() {
            Ok(views)
        } else {
            Err(violations)
        }
    })
    .await
}

/// Generate one role's formal vote.
pub async fn generate_vote(
    gen: &Generator<'_>,
    role: &Role,
    blackboard: &Blackboard,
    stance: &StanceCard,
    slate: &PackageSlate,
    crisis_mode: bool,
) -> SimResult<Generated<Vote>> {
    let allowed = role.effective_deltas(crisis_mode);
    let prompt = prompts::render_vote_prompt(role, &allowed, blackboard, stance, slate);
    let req = GenerationRequest::new(prompts::VOTE_PREAMBLE, prompt)
        .with_schema(schema_value::<RawVoteReply>())
        .with_tags(&role.id, Stage::Votes.key())
        .with_sampling(0.25, 700);

    let role_id = role.id.clone();
    let index = CitationIndex::new(blackboard);

    gen.object::<RawVoteReply, _, _>(Stage::Votes, req, move |raw| {
        let vote = Vote {
            role: role_id.clone(),
            delta_bps: raw.delta_bps,
            reason: normalize_ws(&raw.reason),
            cited_facts: raw.cited_facts,
            cited_uncertainties: raw.cited_uncertainties,
            dissent: raw.dissent,
            dissent_sentence: raw
                .dissent_sentence
                .map(|s| normalize_ws(&s))
                .filter(|s| !s.is_empty()),
        };

        let mut violations = Vec::new();
        if !allowed.contains(&vote.delta_bps) {
            violations.push(Violation::Schema(format!(
                "delta {}bps is not in the allowed set {allowed:?}",
                vote.delta_bps
            )));
        }
        if vote.reason.is_empty() {
            violations.push(Violation::Schema("vote without a reason".into()));
        }
        if vote.cited_facts.is_empty() {
            violations.push(Violation::Schema("a vote must cite at least one fact".into()));
        }
        if let Err(detail) = index.check(&vote.cited_facts, &vote.cited_uncertainties) {
            violations.push(Violation::Citation(detail));
        }
        if vote.dissent && vote.dissent_sentence.is_none() {
            violations.push(Violation::Schema(
                "dissent flagged without a dissent sentence".into(),
            ));
        }

        if violations.is_empty() {
            Ok(vote)
        } else {
            Err(violations)
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GenerationGateway;
    use async_trait::async_trait;
    use meeting_core::model::{default_roles, Fact, MaterialKind, PackageStance, PolicyPackage};
    use meeting_core::{GatewayError, RetryPolicy, SimError};
    use std::sync::Mutex;

    fn board() -> Blackboard {
        Blackboard {
            meeting_id: "m1".into(),
            facts: vec![Fact {
                id: "F01".into(),
                text: "Payrolls slowed to 110k.".into(),
                source: MaterialKind::Employment,
            }],
            uncertainties: vec![],
            policy_menu: vec![],
            statement_slots: vec![],
        }
    }

    fn slate() -> PackageSlate {
        PackageSlate {
            transition_md: String::new(),
            packages: vec![
                PolicyPackage {
                    key: "A".into(),
                    delta_bps: 0,
                    stance: PackageStance::Neutral,
                    guidance: "Hold.".into(),
                },
                PolicyPackage {
                    key: "B".into(),
                    delta_bps: -25,
                    stance: PackageStance::Dovish,
                    guidance: "Cut.".into(),
                },
            ],
        }
    }

    fn stance(role: &str) -> StanceCard {
        StanceCard {
            role: role.into(),
            preferred_delta_bps: 0,
            reasons: vec![],
            risks: vec![],
            compromises: vec![],
            questions: vec![],
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
    async fn test_views_cover_every_package() {
        let reply = r#"{"package_views": [
            {"package_key": "A", "verdict": "acceptable", "because": "Defensible.", "cited_facts": ["F01"]},
            {"package_key": "B", "verdict": "support", "because": "Labor is cooling.", "cited_facts": ["F01"]}
        ]}"#;
        let gateway = Scripted(Mutex::new(vec![reply.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[1];
        let out = generate_package_views(&gen, role, &board(), &stance("dove"), &slate())
            .await
            .unwrap();
        assert_eq!(out.value.len(), 2);
        assert_eq!(out.value[1].verdict, Verdict::Support);
        assert!(out.value.iter().all(|v| v.role == "dove"));
    }

    #[tokio::test]
    async fn test_views_missing_package_rejected() {
        let reply = r#"{"package_views": [
            {"package_key": "A", "verdict": "support", "because": "x", "cited_facts": ["F01"]}
        ]}"#;
        let gateway = Scripted(Mutex::new(vec![reply.into(), reply.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[0];
        let err = generate_package_views(&gen, role, &board(), &stance("hawk"), &slate())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no verdict on package 'B'"));
    }

    #[tokio::test]
    async fn test_view_bad_citation_fails_hard() {
        let reply = r#"{"package_views": [
            {"package_key": "A", "verdict": "support", "because": "x", "cited_facts": ["F31"]},
            {"package_key": "B", "verdict": "oppose", "because": "y", "cited_facts": ["F01"]}
        ]}"#;
        let gateway = Scripted(Mutex::new(vec![reply.into(), reply.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[0];
        let err = generate_package_views(&gen, role, &board(), &stance("hawk"), &slate())
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::CitationInvalid { .. }));
    }

    #[tokio::test]
    async fn test_vote_accepted() {
        let reply = r#"{
            "delta_bps": -25,
            "reason": "Labor softening dominates.",
            "cited_facts": ["F01"],
            "dissent": false
        }"#;
        let gateway = Scripted(Mutex::new(vec![reply.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[1];
        let out = generate_vote(&gen, role, &board(), &stance("dove"), &slate(), false)
            .await
            .unwrap();
        assert_eq!(out.value.delta_bps, -25);
        assert_eq!(out.value.role, "dove");
        assert!(!out.value.dissent);
    }

    #[tokio::test]
    async fn test_vote_out_of_set_never_clamped() {
        let reply = r#"{"delta_bps": -50, "reason": "Go big.", "cited_facts": ["F01"]}"#;
        let gateway = Scripted(Mutex::new(vec![reply.into(), reply.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[1];
        let err = generate_vote(&gen, role, &board(), &stance("dove"), &slate(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::SchemaValidationFailed { .. }));
        assert!(err.to_string().contains("-50"));
    }

    #[tokio::test]
    async fn test_vote_crisis_widens_set() {
        let reply = r#"{"delta_bps": -50, "reason": "Stress demands it.", "cited_facts": ["F01"]}"#;
        let gateway = Scripted(Mutex::new(vec![reply.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[1];
        let out = generate_vote(&gen, role, &board(), &stance("dove"), &slate(), true)
            .await
            .unwrap();
        assert_eq!(out.value.delta_bps, -50);
    }

    #[tokio::test]
    async fn test_vote_dissent_requires_sentence() {
        let reply =
            r#"{"delta_bps": 0, "reason": "Hold.", "cited_facts": ["F01"], "dissent": true}"#;
        let gateway = Scripted(Mutex::new(vec![reply.into(), reply.into()]));
        let gen = Generator::new(&gateway, fast_policy(), "m1");
        let role = &default_roles()[0];
        let err = generate_vote(&gen, role, &board(), &stance("hawk"), &slate(), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dissent sentence"));
    }
}
