//! Structured generation with bounded repair.
//!
//! Every engine call goes through [`Generator::object`]: fire the gateway
//! (transport retries with backoff inside), tolerantly extract the JSON
//! object, parse it into the raw reply type, then refine - convert and
//! validate against the stage contract. A reply that fails extraction or
//! refinement triggers a repair re-prompt that names the defect; when the
//! repair budget runs out the stage fails, with citation violations kept
//! distinct from schema violations.

use std::time::Instant;

use serde::de::DeserializeOwned;

use meeting_core::artifact::Violation;
use meeting_core::error::{SimError, SimResult};
use meeting_core::retry::{with_backoff, RetryPolicy};
use meeting_core::{extract, Stage};

use crate::gateway::{GenerationGateway, GenerationRequest};
use crate::prompts::PROMPT_VERSION;
use crate::telemetry::{PromptLog, PromptRunRecord};

/// A validated value plus the repair retries it cost.
#[derive(Debug)]
pub struct Generated<T> {
    pub value: T,
    /// Repair re-prompts consumed (0 = first reply was valid).
    pub retries: u32,
}

/// Per-run generation context shared by all engines.
pub struct Generator<'a> {
    gateway: &'a dyn GenerationGateway,
    policy: RetryPolicy,
    meeting_id: String,
    log: Option<PromptLog>,
}

impl<'a> Generator<'a> {
    pub fn new(gateway: &'a dyn GenerationGateway, policy: RetryPolicy, meeting_id: &str) -> Self {
        Self {
            gateway,
            policy,
            meeting_id: meeting_id.to_string(),
            log: None,
        }
    }

    pub fn with_prompt_log(mut self, log: PromptLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Generate one structured object for `stage`.
    ///
    /// `refine` converts the raw reply into the validated value, or
    /// returns the violations that make it unacceptable.
    pub async fn object<Raw, T, F>(
        &self,
        stage: Stage,
        mut req: GenerationRequest,
        refine: F,
    ) -> SimResult<Generated<T>>
    where
        Raw: DeserializeOwned,
        F: Fn(Raw) -> Result<T, Vec<Violation>>,
    {
        let started = Instant::now();
        let mut last_violations: Vec<Violation> = Vec::new();

        for attempt in 1..=self.policy.max_attempts() {
            let label = format!("{}:{}", req.phase_tag, req.role_tag);
            let raw_text = with_backoff(&self.policy, &label, || self.gateway.generate(&req))
                .await
                .map_err(|source| {
                    self.record(&req, 0, attempt - 1, started, false);
                    SimError::Transport { stage, source }
                })?;

            let defect = match extract::json_object(&raw_text) {
                Ok(value) => match serde_json::from_value::<Raw>(value) {
                    Ok(raw) => match refine(raw) {
                        Ok(value) => {
                            let retries = attempt - 1;
                            self.record(&req, raw_text.len(), retries, started, true);
                            return Ok(Generated { value, retries });
                        }
                        Err(violations) => {
                            let detail = violations
                                .iter()
                                .map(|v| v.message().to_string())
                                .collect::<Vec<_>>()
                                .join("; ");
                            last_violations = violations;
                            detail
                        }
                    },
                    Err(e) => {
                        last_violations = vec![Violation::Schema(e.to_string())];
                        format!("reply did not match the expected fields: {e}")
                    }
                },
                Err(e) => {
                    last_violations = vec![Violation::Schema(e.to_string())];
                    format!("no parseable JSON object: {e}")
                }
            };

            tracing::warn!(
                stage = %stage,
                role = %req.role_tag,
                attempt,
                defect = %defect,
                "reply rejected, re-prompting"
            );

            // Repair: tell the model exactly what was wrong and re-ask.
            req.prompt.push_str(&format!(
                "\n\nYour previous reply was rejected: {defect}. \
                 Reply again with exactly one valid JSON object matching the schema - \
                 no markdown fences, no prose outside the object."
            ));
        }

        self.record(&req, 0, self.policy.max_repair_retries, started, false);

        let attempts = self.policy.max_attempts();
        let citations: Vec<&Violation> =
            last_violations.iter().filter(|v| v.is_citation()).collect();
        if !citations.is_empty() {
            let detail = citations
                .iter()
                .map(|v| v.message().to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SimError::citation(stage, detail));
        }
        let detail = last_violations
            .iter()
            .map(|v| v.message().to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(SimError::schema(stage, attempts, detail))
    }

    fn record(
        &self,
        req: &GenerationRequest,
        output_chars: usize,
        retries: u32,
        started: Instant,
        ok: bool,
    ) {
        let Some(log) = &self.log else { return };
        log.append(&PromptRunRecord {
            meeting_id: self.meeting_id.clone(),
            phase: req.phase_tag.clone(),
            role: req.role_tag.clone(),
            prompt_version: PROMPT_VERSION.to_string(),
            model: self.gateway.model_name().to_string(),
            prompt_chars: req.prompt.len(),
            output_chars,
            retries,
            duration_ms: started.elapsed().as_millis() as u64,
            ok,
            timestamp: chrono::Utc::now(),
        });
    }
}
