//! Prompt-run telemetry: one JSONL line per gateway call.
//!
//! Appended best-effort under the meeting's run directory so a replayed
//! or misbehaving run can be traced back to the exact prompts, sizes and
//! retry counts that produced it. Logging failures never fail a stage.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded gateway call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRunRecord {
    pub meeting_id: String,
    /// Stage key of the call.
    pub phase: String,
    /// Role the call spoke for.
    pub role: String,
    pub prompt_version: String,
    pub model: String,
    pub prompt_chars: usize,
    pub output_chars: usize,
    /// Repair re-prompts consumed before this outcome.
    pub retries: u32,
    pub duration_ms: u64,
    pub ok: bool,
    pub timestamp: DateTime<Utc>,
}

/// Append-only JSONL log for one meeting run.
#[derive(Debug, Clone)]
pub struct PromptLog {
    path: PathBuf,
}

impl PromptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Append one record. Best-effort: failures are logged and swallowed.
    pub fn append(&self, record: &PromptRunRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "prompt-log record not serializable");
                return;
            }
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "prompt-log append failed");
        }
    }

    /// Read all records back (diagnostics only).
    pub fn read_all(&self) -> Vec<PromptRunRecord> {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        text.lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}
