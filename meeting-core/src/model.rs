//! Data model for a meeting run.
//!
//! Everything here is plain serde data: the orchestrator and engines pass
//! these types around, the run store persists them, and the validators in
//! [`crate::artifact`] check them against the run's blackboard. Ids are
//! assigned by the pipeline (`F01..`, `U01..`), never taken from model
//! output, so citation checks always resolve against ids we minted.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// The four briefing materials a meeting run consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaterialKind {
    /// Macro backdrop brief.
    Macro,
    /// Labor-market brief.
    Employment,
    /// Inflation brief.
    Inflation,
    /// Policy-rule baseline brief.
    PolicyRule,
}

/// All material kinds, in seeding order.
pub const ALL_MATERIALS: [MaterialKind; 4] = [
    MaterialKind::Macro,
    MaterialKind::Employment,
    MaterialKind::Inflation,
    MaterialKind::PolicyRule,
];

impl MaterialKind {
    /// Stable artifact key (also the file stem of the seeded text).
    pub fn key(self) -> &'static str {
        match self {
            Self::Macro => "macro",
            Self::Employment => "employment",
            Self::Inflation => "inflation",
            Self::PolicyRule => "policy-rule",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        ALL_MATERIALS.iter().copied().find(|m| m.key() == key)
    }
}

impl fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A citable fact, traceable to exactly one briefing material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    /// `F01`, `F02`, … assigned by the blackboard builder.
    pub id: String,
    pub text: String,
    pub source: MaterialKind,
}

/// A citable uncertainty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Uncertainty {
    /// `U01`, `U02`, … assigned by the blackboard builder.
    pub id: String,
    pub text: String,
}

/// A votable policy option on the menu.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyOption {
    pub key: String,
    pub delta_bps: i32,
    pub label: String,
}

/// Drafting guidance for one statement slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotGuidance {
    pub key: String,
    pub guidance: String,
}

/// The fixed statement-slot vocabulary.
pub const STATEMENT_SLOT_KEYS: [&str; 8] = [
    "economic_activity",
    "labor",
    "inflation",
    "financial_conditions",
    "risks",
    "policy_decision",
    "forward_guidance",
    "balance_sheet",
];

/// The shared, citable fact base built once per run.
///
/// Rebuilt whole on refresh - never patched incrementally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blackboard {
    pub meeting_id: String,
    pub facts: Vec<Fact>,
    pub uncertainties: Vec<Uncertainty>,
    pub policy_menu: Vec<PolicyOption>,
    pub statement_slots: Vec<SlotGuidance>,
}

impl Blackboard {
    pub fn menu_deltas(&self) -> Vec<i32> {
        self.policy_menu.iter().map(|o| o.delta_bps).collect()
    }

    pub fn slot_keys(&self) -> Vec<&str> {
        self.statement_slots.iter().map(|s| s.key.as_str()).collect()
    }
}

/// Format the id of the `n`-th fact (1-based).
pub fn fact_id(n: usize) -> String {
    format!("F{n:02}")
}

/// Format the id of the `n`-th uncertainty (1-based).
pub fn uncertainty_id(n: usize) -> String {
    format!("U{n:02}")
}

/// A configured committee-member persona. Configuration, not runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub display_name: String,
    /// Bias descriptor injected into the role's prompts.
    pub bias: String,
    /// Style descriptor injected into the role's prompts.
    pub style: String,
    /// Vote deltas (bps) this role may cast in normal conditions.
    pub allowed_deltas: Vec<i32>,
}

/// Extra deltas every role may reach for when crisis mode is on.
pub const CRISIS_DELTAS: [i32; 2] = [-50, 50];

impl Role {
    /// The delta set in effect for this role given the crisis flag.
    pub fn effective_deltas(&self, crisis_mode: bool) -> Vec<i32> {
        let mut deltas = self.allowed_deltas.clone();
        if crisis_mode {
            for d in CRISIS_DELTAS {
                if !deltas.contains(&d) {
                    deltas.push(d);
                }
            }
        }
        deltas
    }
}

/// The built-in committee: hawk, dove, centrist, deltas {-25, 0, +25}.
pub fn default_roles() -> Vec<Role> {
    let deltas = vec![-25, 0, 25];
    vec![
        Role {
            id: "hawk".into(),
            display_name: "Hawk".into(),
            bias: "Weighs inflation and de-anchoring risk heavily; tolerates slower growth; \
                   prefers firmer guidance."
                .into(),
            style: "Direct and insistent, but evidence-bound; stresses inflation persistence \
                    and second-round effects."
                .into(),
            allowed_deltas: deltas.clone(),
        },
        Role {
            id: "dove".into(),
            display_name: "Dove".into(),
            bias: "Weighs employment and downside growth risk heavily; attentive to lagged \
                   tightening effects; prefers patience."
                .into(),
            style: "Measured and empathetic; warns against over-tightening and hard-landing \
                    scenarios."
                .into(),
            allowed_deltas: deltas.clone(),
        },
        Role {
            id: "centrist".into(),
            display_name: "Centrist".into(),
            bias: "Balances both mandates; prefers gradualism; attentive to policy lags and \
                   symmetric risks."
                .into(),
            style: "Restrained and orderly; frames choices as risk management under \
                    uncertainty."
                .into(),
            allowed_deltas: deltas,
        },
    ]
}

/// One ranked reason on a stance card, pinned to a fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StanceReason {
    pub fact_id: String,
    pub text: String,
}

/// One risk on a stance card, pinned to an uncertainty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StanceRisk {
    pub uncertainty_id: String,
    pub text: String,
}

/// A role's private, grounded position summary. Write-once per (role, run).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StanceCard {
    pub role: String,
    pub preferred_delta_bps: i32,
    pub reasons: Vec<StanceReason>,
    pub risks: Vec<StanceRisk>,
    pub compromises: Vec<String>,
    pub questions: Vec<String>,
}

/// The two public deliberation rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliberationPhase {
    OpeningStatements,
    DirectedQa,
}

impl fmt::Display for DeliberationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpeningStatements => write!(f, "opening_statements"),
            Self::DirectedQa => write!(f, "directed_qa"),
        }
    }
}

/// Speaker id the chair uses in transcripts.
pub const CHAIR_SPEAKER: &str = "chair";

/// A role-attributed public statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utterance {
    pub phase: DeliberationPhase,
    /// Role id, or [`CHAIR_SPEAKER`].
    pub speaker: String,
    pub cited_facts: Vec<String>,
    #[serde(default)]
    pub cited_uncertainties: Vec<String>,
    pub body_md: String,
    /// The single follow-up question an opening statement must carry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

/// A chair question addressed to one role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectedQuestion {
    pub to_role: String,
    pub question: String,
    #[serde(default)]
    pub cited_facts: Vec<String>,
}

/// Output of the chair's question-selection stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChairQuestions {
    pub preface_md: String,
    pub directed: Vec<DirectedQuestion>,
}

/// A per-slot note carried into drafting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotNote {
    pub slot_key: String,
    pub note: String,
}

/// Neutral synthesis of one public round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSummary {
    pub phase: DeliberationPhase,
    pub consensus: Vec<String>,
    pub disagreements: Vec<String>,
    pub open_questions: Vec<String>,
    pub slot_notes: Vec<SlotNote>,
}

/// Stance label of a proposed package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStance {
    Hawkish,
    Neutral,
    Dovish,
}

/// A discrete, menu-constrained policy option proposed by the chair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyPackage {
    pub key: String,
    pub delta_bps: i32,
    pub stance: PackageStance,
    pub guidance: String,
}

/// The chair's package proposal (2–3 packages).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageSlate {
    pub transition_md: String,
    pub packages: Vec<PolicyPackage>,
}

impl PackageSlate {
    pub fn keys(&self) -> Vec<&str> {
        self.packages.iter().map(|p| p.key.as_str()).collect()
    }
}

/// A role's verdict on one package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Support,
    Acceptable,
    Oppose,
}

/// One role's view of one package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageView {
    pub role: String,
    pub package_key: String,
    pub verdict: Verdict,
    pub because: String,
    pub cited_facts: Vec<String>,
}

/// A role's formal vote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub role: String,
    pub delta_bps: i32,
    pub reason: String,
    pub cited_facts: Vec<String>,
    #[serde(default)]
    pub cited_uncertainties: Vec<String>,
    #[serde(default)]
    pub dissent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dissent_sentence: Option<String>,
}

/// A role recorded as dissenting in the tally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dissent {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentence: Option<String>,
}

/// Serialize the integer-keyed count map as a sequence of `[delta, count]`
/// pairs. The `PhaseArtifact` envelope is an internally tagged enum, whose
/// deserializer buffers content and cannot restore non-string map keys; a
/// pairs sequence round-trips through that buffer unchanged.
mod counts_as_pairs {
    use super::BTreeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<i32, u32>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        map.iter()
            .map(|(k, v)| (*k, *v))
            .collect::<Vec<(i32, u32)>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<i32, u32>, D::Error> {
        Ok(Vec::<(i32, u32)>::deserialize(deserializer)?
            .into_iter()
            .collect())
    }
}

/// The computed vote outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tally {
    /// Votes per delta, keyed by bps.
    #[serde(with = "counts_as_pairs")]
    pub counts: BTreeMap<i32, u32>,
    pub majority_delta: i32,
    pub dissenting: Vec<Dissent>,
    pub total: u32,
}

impl Tally {
    /// The `"majority:rest"` split string (e.g. `"2:1"`) the communique
    /// must reproduce verbatim.
    pub fn vote_split(&self) -> String {
        let majority = self.counts.get(&self.majority_delta).copied().unwrap_or(0);
        format!("{}:{}", majority, self.total.saturating_sub(majority))
    }
}

/// The two final texts of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommuniqueDraft {
    pub statement_md: String,
    pub minutes_summary_md: String,
    /// Must equal [`Tally::vote_split`] and appear in `statement_md`.
    pub vote_split: String,
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize_ws(s: &str) -> String {
    static WS: OnceLock<Regex> = OnceLock::new();
    let re = WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    re.replace_all(s.trim(), " ").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_keys_roundtrip() {
        for kind in ALL_MATERIALS {
            assert_eq!(MaterialKind::from_key(kind.key()), Some(kind));
        }
        assert_eq!(MaterialKind::from_key("taylor"), None);
        assert_eq!(
            serde_json::to_string(&MaterialKind::PolicyRule).unwrap(),
            "\"policy-rule\""
        );
    }

    #[test]
    fn test_id_formats() {
        assert_eq!(fact_id(1), "F01");
        assert_eq!(fact_id(28), "F28");
        assert_eq!(uncertainty_id(8), "U08");
    }

    #[test]
    fn test_default_roles() {
        let roles = default_roles();
        assert_eq!(roles.len(), 3);
        let ids: Vec<&str> = roles.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["hawk", "dove", "centrist"]);
        for role in &roles {
            assert_eq!(role.allowed_deltas, vec![-25, 0, 25]);
        }
    }

    #[test]
    fn test_effective_deltas_crisis() {
        let role = &default_roles()[0];
        assert_eq!(role.effective_deltas(false), vec![-25, 0, 25]);
        let crisis = role.effective_deltas(true);
        assert!(crisis.contains(&-50) && crisis.contains(&50));
        assert_eq!(crisis.len(), 5);
    }

    #[test]
    fn test_vote_split() {
        let mut counts = BTreeMap::new();
        counts.insert(-25, 2);
        counts.insert(0, 1);
        let tally = Tally {
            counts,
            majority_delta: -25,
            dissenting: vec![Dissent {
                role: "hawk".into(),
                sentence: None,
            }],
            total: 3,
        };
        assert_eq!(tally.vote_split(), "2:1");
    }

    #[test]
    fn test_normalize_ws() {
        assert_eq!(normalize_ws("  a \n\t b  "), "a b");
        assert_eq!(normalize_ws(""), "");
    }

    #[test]
    fn test_utterance_serde_defaults() {
        let json = r#"{
            "phase": "opening_statements",
            "speaker": "hawk",
            "cited_facts": ["F01"],
            "body_md": "Inflation remains sticky."
        }"#;
        let u: Utterance = serde_json::from_str(json).unwrap();
        assert!(u.cited_uncertainties.is_empty());
        assert!(u.question.is_none());
        assert_eq!(u.phase, DeliberationPhase::OpeningStatements);
    }

    #[test]
    fn test_blackboard_accessors() {
        let bb = Blackboard {
            meeting_id: "2024-09-18".into(),
            facts: vec![],
            uncertainties: vec![],
            policy_menu: vec![
                PolicyOption {
                    key: "hold".into(),
                    delta_bps: 0,
                    label: "Hold".into(),
                },
                PolicyOption {
                    key: "cut_25".into(),
                    delta_bps: -25,
                    label: "Cut 25bp".into(),
                },
            ],
            statement_slots: vec![SlotGuidance {
                key: "risks".into(),
                guidance: String::new(),
            }],
        };
        assert_eq!(bb.menu_deltas(), vec![0, -25]);
        assert_eq!(bb.slot_keys(), vec!["risks"]);
    }
}
