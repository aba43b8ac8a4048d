//! Job tracking behind a swappable store interface.
//!
//! Long-running pipeline work is observable through jobs: an enum status,
//! an append-only log, and an optional result payload, keyed by job id.
//! Durability is an implementation detail of the store - the in-memory
//! store below is enough for a single process, and a durable backend can
//! slot in behind the same trait without touching the orchestrator.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One tracked job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    /// What kind of work this is, e.g. `meeting-run`.
    pub kind: String,
    pub status: JobStatus,
    /// Append-only progress log.
    pub log: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Store interface the orchestrator reports through.
pub trait JobStore: Send + Sync {
    fn create(&self, kind: &str) -> JobRecord;
    fn get(&self, id: &str) -> Option<JobRecord>;
    fn set_status(&self, id: &str, status: JobStatus);
    fn append_log(&self, id: &str, line: &str);
    /// Record the result payload and mark the job succeeded.
    fn succeed(&self, id: &str, result: serde_json::Value);
    /// Record the error and mark the job failed.
    fn fail(&self, id: &str, error: &str);
}

/// Process-local job store.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<JobRecord> {
        let jobs = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut records: Vec<JobRecord> = jobs.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut JobRecord)) {
        let mut jobs = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(job) = jobs.get_mut(id) {
            f(job);
            job.updated_at = Utc::now();
        } else {
            tracing::warn!(job_id = id, "update for unknown job");
        }
    }
}

impl JobStore for InMemoryJobStore {
    fn create(&self, kind: &str) -> JobRecord {
        let now = Utc::now();
        let record = JobRecord {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            status: JobStatus::Pending,
            log: Vec::new(),
            created_at: now,
            updated_at: now,
            result: None,
            error: None,
        };
        let mut jobs = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        jobs.insert(record.id.clone(), record.clone());
        record
    }

    fn get(&self, id: &str) -> Option<JobRecord> {
        let jobs = match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        jobs.get(id).cloned()
    }

    fn set_status(&self, id: &str, status: JobStatus) {
        self.update(id, |job| job.status = status);
    }

    fn append_log(&self, id: &str, line: &str) {
        self.update(id, |job| job.log.push(line.to_string()));
    }

    fn succeed(&self, id: &str, result: serde_json::Value) {
        self.update(id, |job| {
            job.status = JobStatus::Succeeded;
            job.result = Some(result);
        });
    }

    fn fail(&self, id: &str, error: &str) {
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error.to_string());
        });
    }
}
