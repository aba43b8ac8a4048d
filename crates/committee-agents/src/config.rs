//! Simulation configuration: endpoint, caps, retry budgets and roles.
//!
//! Everything defaults from the environment so the binary runs with no
//! flags; a TOML role file can replace the built-in committee.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

use meeting_core::model::{default_roles, Role};
use meeting_core::RetryPolicy;

/// OpenAI-compatible chat endpoint.
#[derive(Debug, Clone)]
pub struct LlmEndpoint {
    pub url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for LlmEndpoint {
    fn default() -> Self {
        Self {
            url: std::env::var("COMMITTEE_LLM_URL")
                .unwrap_or_else(|_| "https://api.deepseek.com/v1".into()),
            api_key: std::env::var("COMMITTEE_LLM_API_KEY").unwrap_or_else(|_| "not-needed".into()),
            model: std::env::var("COMMITTEE_LLM_MODEL").unwrap_or_else(|_| "deepseek-chat".into()),
        }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    pub endpoint: LlmEndpoint,
    /// Root directory holding one run directory per meeting.
    pub runs_dir: PathBuf,
    /// The committee, in speaking order.
    pub roles: Vec<Role>,
    /// Cap on blackboard facts.
    pub max_facts: usize,
    /// Cap on blackboard uncertainties.
    pub max_uncertainties: usize,
    /// Cap on chair questions per round.
    pub max_chair_questions: usize,
    /// Cap on the assembled open-question pool.
    pub max_open_questions: usize,
    pub retry: RetryPolicy,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            endpoint: LlmEndpoint::default(),
            runs_dir: std::env::var("COMMITTEE_RUNS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("runs")),
            roles: default_roles(),
            max_facts: 28,
            max_uncertainties: 8,
            max_chair_questions: 6,
            max_open_questions: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl SimConfig {
    /// Minimum number of chair questions, clamped to the committee size.
    pub fn min_chair_questions(&self) -> usize {
        self.roles.len().min(3)
    }

    pub fn role(&self, id: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }
}

#[derive(Debug, Deserialize)]
struct RoleFile {
    roles: Vec<RoleEntry>,
}

#[derive(Debug, Deserialize)]
struct RoleEntry {
    id: String,
    display_name: String,
    bias: String,
    style: String,
    allowed_deltas: Vec<i32>,
}

/// Parse a committee definition from TOML.
///
/// ```toml
/// [[roles]]
/// id = "hawk"
/// display_name = "Hawk"
/// bias = "..."
/// style = "..."
/// allowed_deltas = [-25, 0, 25]
/// ```
pub fn roles_from_toml(text: &str) -> Result<Vec<Role>> {
    let file: RoleFile = toml::from_str(text).context("invalid role file")?;
    if file.roles.is_empty() {
        anyhow::bail!("role file defines no roles");
    }
    let mut roles = Vec::with_capacity(file.roles.len());
    for entry in file.roles {
        if entry.allowed_deltas.is_empty() {
            anyhow::bail!("role '{}' allows no vote deltas", entry.id);
        }
        roles.push(Role {
            id: entry.id,
            display_name: entry.display_name,
            bias: entry.bias,
            style: entry.style,
            allowed_deltas: entry.allowed_deltas,
        });
    }
    Ok(roles)
}

/// Check whether an inference endpoint is reachable (GET /models).
pub async fn check_endpoint(url: &str) -> bool {
    let models_url = format!("{}/models", url.trim_end_matches('/'));
    match reqwest::Client::new()
        .get(&models_url)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}
