//! Blackboard builder: condenses the four briefing texts into the shared,
//! citable fact base every later stage grounds itself in.
//!
//! The model proposes facts; this module owns the ids. Every fact is
//! traceable to exactly one input text via its `source`, items with
//! invalid sources or empty text are dropped, lists are capped, and the
//! policy menu / statement slots fall back to the fixed defaults when the
//! reply's versions are unusable. Missing materials are a valid degenerate
//! case - they are marked `(not provided)`, never fabricated.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::Deserialize;

use meeting_core::artifact::Violation;
use meeting_core::error::{SimError, SimResult};
use meeting_core::model::{
    fact_id, normalize_ws, uncertainty_id, Fact, MaterialKind, PolicyOption, SlotGuidance,
    Uncertainty, ALL_MATERIALS, STATEMENT_SLOT_KEYS,
};
use meeting_core::{Blackboard, PhaseArtifact, Stage, ValidationContext};

use crate::config::SimConfig;
use crate::gateway::GenerationRequest;
use crate::generate::{Generated, Generator};
use crate::prompts;

/// Character clip for each briefing section fed to the builder.
const MAX_SECTION_CHARS: usize = 12_000;
/// The policy-rule baseline is tabular and repetitive; clip it harder.
const MAX_POLICY_RULE_CHARS: usize = 6_000;

/// The four briefing texts, possibly partially absent.
#[derive(Debug, Clone, Default)]
pub struct Materials {
    texts: BTreeMap<MaterialKind, String>,
}

impl Materials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, kind: MaterialKind, text: impl Into<String>) {
        let text = text.into();
        if !text.trim().is_empty() {
            self.texts.insert(kind, text);
        }
    }

    /// The text for a material, `None` when absent or blank.
    pub fn get(&self, kind: MaterialKind) -> Option<&str> {
        self.texts.get(&kind).map(String::as_str)
    }

    pub fn present(&self) -> Vec<MaterialKind> {
        ALL_MATERIALS
            .into_iter()
            .filter(|k| self.texts.contains_key(k))
            .collect()
    }

    pub fn missing(&self) -> Vec<MaterialKind> {
        ALL_MATERIALS
            .into_iter()
            .filter(|k| !self.texts.contains_key(k))
            .collect()
    }

    /// All four absent - nothing to ground a meeting on.
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawBoardReply {
    #[serde(default)]
    facts: Vec<RawFact>,
    #[serde(default)]
    uncertainties: Vec<RawUncertainty>,
    #[serde(default)]
    policy_menu: Vec<RawOption>,
    #[serde(default)]
    statement_slots: Vec<RawSlot>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawFact {
    #[serde(default)]
    text: String,
    #[serde(default)]
    source: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawUncertainty {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawOption {
    #[serde(default)]
    key: String,
    #[serde(default)]
    delta_bps: Option<i32>,
    #[serde(default)]
    label: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct RawSlot {
    #[serde(default)]
    key: String,
    #[serde(default)]
    guidance: String,
}

/// The fixed fallback menu when the reply's menu is unusable.
fn default_menu() -> Vec<PolicyOption> {
    vec![
        PolicyOption {
            key: "cut_25".into(),
            delta_bps: -25,
            label: "Cut 25bp".into(),
        },
        PolicyOption {
            key: "hold".into(),
            delta_bps: 0,
            label: "Hold".into(),
        },
        PolicyOption {
            key: "hike_25".into(),
            delta_bps: 25,
            label: "Hike 25bp".into(),
        },
    ]
}

fn default_slots() -> Vec<SlotGuidance> {
    STATEMENT_SLOT_KEYS
        .iter()
        .map(|key| SlotGuidance {
            key: (*key).to_string(),
            guidance: String::new(),
        })
        .collect()
}

const VALID_MENU: [(&str, i32); 3] = [("cut_25", -25), ("hold", 0), ("hike_25", 25)];

fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        text
    } else {
        let mut end = max;
        while end > 0 && !text.is_char_boundary(end) {
            end -= 1;
        }
        &text[..end]
    }
}

/// Build the blackboard for a meeting.
///
/// Fails with [`SimError::MaterialMissing`] only when all four texts are
/// absent; anything else degrades gracefully.
pub async fn build(
    gen: &Generator<'_>,
    config: &SimConfig,
    meeting_id: &str,
    materials: &Materials,
) -> SimResult<Generated<Blackboard>> {
    if materials.is_empty() {
        return Err(SimError::MaterialMissing {
            meeting_id: meeting_id.to_string(),
        });
    }

    let sections: Vec<(&str, Option<&str>)> = ALL_MATERIALS
        .iter()
        .map(|kind| {
            let max = if *kind == MaterialKind::PolicyRule {
                MAX_POLICY_RULE_CHARS
            } else {
                MAX_SECTION_CHARS
            };
            (kind.key(), materials.get(*kind).map(|t| clip(t, max)))
        })
        .collect();

    let prompt =
        prompts::render_blackboard_prompt(meeting_id, &sections, config.max_facts, config.max_uncertainties);
    let req = GenerationRequest::new(prompts::BLACKBOARD_PREAMBLE, prompt)
        .with_schema(schema_value::<RawBoardReply>())
        .with_tags("secretariat", Stage::Blackboard.key())
        .with_sampling(0.2, 1800);

    let meeting = meeting_id.to_string();
    let max_facts = config.max_facts;
    let max_uncertainties = config.max_uncertainties;
    let roles = config.roles.clone();

    gen.object::<RawBoardReply, _, _>(Stage::Blackboard, req, move |raw| {
        let blackboard = refine(&meeting, raw, max_facts, max_uncertainties);
        let ctx = ValidationContext::new(&roles);
        let mut violations = PhaseArtifact::Blackboard(blackboard.clone()).validate(&ctx);
        if blackboard.facts.is_empty() {
            // Materials were provided, so a fact-free board means the
            // reply was unusable, not that there was nothing to condense.
            violations.push(Violation::Schema("no usable facts extracted".into()));
        }
        if violations.is_empty() {
            Ok(blackboard)
        } else {
            Err(violations)
        }
    })
    .await
}

fn refine(
    meeting_id: &str,
    raw: RawBoardReply,
    max_facts: usize,
    max_uncertainties: usize,
) -> Blackboard {
    let facts: Vec<Fact> = raw
        .facts
        .into_iter()
        .filter_map(|f| {
            let text = normalize_ws(&f.text);
            let source = MaterialKind::from_key(f.source.trim())?;
            if text.is_empty() {
                return None;
            }
            Some((text, source))
        })
        .take(max_facts)
        .enumerate()
        .map(|(i, (text, source))| Fact {
            id: fact_id(i + 1),
            text,
            source,
        })
        .collect();

    let uncertainties: Vec<Uncertainty> = raw
        .uncertainties
        .into_iter()
        .filter_map(|u| {
            let text = normalize_ws(&u.text);
            (!text.is_empty()).then_some(text)
        })
        .take(max_uncertainties)
        .enumerate()
        .map(|(i, text)| Uncertainty {
            id: uncertainty_id(i + 1),
            text,
        })
        .collect();

    let mut policy_menu: Vec<PolicyOption> = Vec::new();
    for option in raw.policy_menu {
        let key = option.key.trim().to_string();
        let Some(delta) = option.delta_bps else {
            continue;
        };
        if VALID_MENU.iter().any(|(k, d)| *k == key && *d == delta)
            && !policy_menu.iter().any(|o| o.key == key)
        {
            let label = if option.label.trim().is_empty() {
                key.clone()
            } else {
                option.label.trim().to_string()
            };
            policy_menu.push(PolicyOption {
                key,
                delta_bps: delta,
                label,
            });
        }
    }
    if policy_menu.is_empty() {
        policy_menu = default_menu();
    }

    let mut statement_slots: Vec<SlotGuidance> = Vec::new();
    for slot in raw.statement_slots {
        let key = slot.key.trim().to_string();
        if STATEMENT_SLOT_KEYS.contains(&key.as_str())
            && !statement_slots.iter().any(|s| s.key == key)
        {
            statement_slots.push(SlotGuidance {
                key,
                guidance: normalize_ws(&slot.guidance),
            });
        }
    }
    if statement_slots.is_empty() {
        statement_slots = default_slots();
    }

    Blackboard {
        meeting_id: meeting_id.to_string(),
        facts,
        uncertainties,
        policy_menu,
        statement_slots,
    }
}

/// Conservative crisis heuristic over the built blackboard.
///
/// Off unless the facts themselves signal acute stress; when on, ±50bps
/// join every role's effective delta set.
pub fn infer_crisis_mode(blackboard: &Blackboard) -> bool {
    const SIGNALS: [&str; 6] = [
        "emergency",
        "crisis",
        "crash",
        "liquidity freeze",
        "bank run",
        "contagion",
    ];
    blackboard.facts.iter().any(|fact| {
        let text = fact.text.to_lowercase();
        SIGNALS.iter().any(|s| text.contains(s))
    })
}

/// JSON schema of a raw reply type, for the gateway's schema hint.
pub(crate) fn schema_value<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| serde_json::json!({}))
}
