//! Generation gateway: the single door to the LLM backend.
//!
//! The pipeline treats generation as an unreliable black box behind
//! [`GenerationGateway`]: a prompt goes in, raw text comes out, and
//! nothing about the reply is trusted until the tolerant extractor and
//! the stage validators have had their say. The live implementation
//! drives an OpenAI-compatible endpoint through rig; tests swap in a
//! scripted gateway.

use std::time::Duration;

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use rig::providers::openai;

use meeting_core::GatewayError;

use crate::config::LlmEndpoint;

/// One structured-output request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// System preamble for the persona answering this call.
    pub system: String,
    /// User prompt.
    pub prompt: String,
    /// JSON schema of the expected reply, appended to the preamble so the
    /// model sees the exact contract it is held to.
    pub schema_hint: Option<serde_json::Value>,
    /// Role the call speaks for (`"chair"`, `"hawk"`, …).
    pub role_tag: String,
    /// Pipeline phase the call belongs to (stage key).
    pub phase_tag: String,
    pub temperature: f64,
    pub max_tokens: u64,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            schema_hint: None,
            role_tag: "chair".into(),
            phase_tag: String::new(),
            temperature: 0.25,
            max_tokens: 1400,
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema_hint = Some(schema);
        self
    }

    pub fn with_tags(mut self, role_tag: impl Into<String>, phase_tag: impl Into<String>) -> Self {
        self.role_tag = role_tag.into();
        self.phase_tag = phase_tag.into();
        self
    }

    pub fn with_sampling(mut self, temperature: f64, max_tokens: u64) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Preamble with the reply schema spliced in.
    pub fn full_system(&self) -> String {
        match &self.schema_hint {
            Some(schema) => format!(
                "{}\n\n## Reply Schema (JSON Schema)\nYour reply MUST validate against:\n{}",
                self.system, schema
            ),
            None => self.system.clone(),
        }
    }
}

/// The unreliable generative backend.
#[async_trait]
pub trait GenerationGateway: Send + Sync {
    /// Fire one generation call. Errors are transport-level only; a reply
    /// that arrives but is malformed is returned as text for the caller's
    /// extraction/validation layers to reject.
    async fn generate(&self, req: &GenerationRequest) -> Result<String, GatewayError>;

    /// Backend label for telemetry.
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// rig-backed gateway for OpenAI-compatible chat endpoints.
pub struct LiveGateway {
    client: openai::CompletionsClient,
    model: String,
    timeout: Duration,
}

impl LiveGateway {
    pub fn new(endpoint: &LlmEndpoint, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context as _;
        let client = openai::CompletionsClient::builder()
            .api_key(&endpoint.api_key)
            .base_url(&endpoint.url)
            .build()
            .context("failed to build completions client")?;
        Ok(Self {
            client,
            model: endpoint.model.clone(),
            timeout,
        })
    }
}

#[async_trait]
impl GenerationGateway for LiveGateway {
    async fn generate(&self, req: &GenerationRequest) -> Result<String, GatewayError> {
        let agent = self
            .client
            .agent(&self.model)
            .name(&format!("{}:{}", req.phase_tag, req.role_tag))
            .preamble(&req.full_system())
            .temperature(req.temperature)
            .max_tokens(req.max_tokens)
            .build();

        tracing::debug!(
            phase = %req.phase_tag,
            role = %req.role_tag,
            prompt_chars = req.prompt.len(),
            "gateway call"
        );

        match tokio::time::timeout(self.timeout, agent.prompt(req.prompt.as_str())).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(GatewayError::Transport(e.to_string())),
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
