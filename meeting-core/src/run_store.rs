//! Filesystem run store: one directory per meeting, one artifact per
//! stage, one manifest as the single source of truth.
//!
//! Write discipline:
//! - Every file lands via write-to-temp + rename, so a reader never
//!   observes a partial artifact.
//! - The manifest entry is recorded immediately after the artifact rename.
//!   If the process dies between the two, the orphan file is simply not
//!   visible - absence from the manifest means the artifact does not exist.
//! - One meeting directory has one writer at a time, enforced by an
//!   exclusive lock file. Reads of finalized artifacts never take the lock.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::artifact::PhaseArtifact;
use crate::error::{SimError, SimResult};
use crate::stage::Stage;

/// Manifest entry for one artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Path relative to the store root.
    pub path: String,
    pub bytes: u64,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Per-meeting index of what exists and when it was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub meeting_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactRecord>,
}

impl Manifest {
    fn new(meeting_id: &str) -> Self {
        let now = Utc::now();
        Self {
            meeting_id: meeting_id.to_string(),
            created_at: now,
            updated_at: now,
            context: json!({}),
            artifacts: BTreeMap::new(),
        }
    }

    /// Whether a stage artifact is recorded.
    pub fn has_stage(&self, stage: Stage) -> bool {
        self.artifacts.contains_key(stage.key())
    }

    pub fn stage_record(&self, stage: Stage) -> Option<&ArtifactRecord> {
        self.artifacts.get(stage.key())
    }
}

/// Handle to one meeting's run directory.
#[derive(Debug, Clone)]
pub struct MeetingRun {
    pub meeting_id: String,
    pub dir: PathBuf,
    pub manifest_path: PathBuf,
}

/// Root of all meeting runs.
#[derive(Debug, Clone)]
pub struct RunStore {
    root: PathBuf,
}

/// Keep only characters from the artifact-key alphabet.
///
/// Caller-supplied names never reach the filesystem unfiltered; a name
/// that sanitizes to nothing is rejected.
pub fn sanitize_key(name: &str) -> SimResult<String> {
    let safe: String = name
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        return Err(SimError::InvalidName(name.to_string()));
    }
    Ok(safe)
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open the run for a meeting, creating its directory and an empty
    /// manifest on first use.
    pub fn ensure_run(&self, meeting_id: &str) -> SimResult<MeetingRun> {
        let safe_id = sanitize_key(meeting_id)?;
        let dir = self.root.join(&safe_id);
        fs::create_dir_all(&dir)?;
        let manifest_path = dir.join("manifest.json");
        let run = MeetingRun {
            meeting_id: safe_id,
            dir,
            manifest_path,
        };
        if !run.manifest_path.exists() {
            self.save_manifest(&run, &Manifest::new(&run.meeting_id))?;
        }
        Ok(run)
    }

    /// Load the manifest. Unreadable or inconsistent content is fatal for
    /// the run - it is never repaired by inference.
    pub fn load_manifest(&self, run: &MeetingRun) -> SimResult<Manifest> {
        let bytes = fs::read(&run.manifest_path).map_err(|e| {
            SimError::manifest_corrupt(&run.manifest_path, format!("unreadable: {e}"))
        })?;
        let manifest: Manifest = serde_json::from_slice(&bytes)
            .map_err(|e| SimError::manifest_corrupt(&run.manifest_path, e.to_string()))?;
        if manifest.meeting_id != run.meeting_id {
            return Err(SimError::manifest_corrupt(
                &run.manifest_path,
                format!(
                    "manifest names meeting '{}', directory is '{}'",
                    manifest.meeting_id, run.meeting_id
                ),
            ));
        }
        Ok(manifest)
    }

    fn save_manifest(&self, run: &MeetingRun, manifest: &Manifest) -> SimResult<()> {
        let mut manifest = manifest.clone();
        manifest.updated_at = Utc::now();
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        atomic_write(&run.manifest_path, &bytes)
    }

    /// Merge fields into the manifest's context object.
    pub fn merge_context(&self, run: &MeetingRun, fields: serde_json::Value) -> SimResult<()> {
        let mut manifest = self.load_manifest(run)?;
        if let (Some(ctx), Some(new)) = (manifest.context.as_object_mut(), fields.as_object()) {
            for (k, v) in new {
                ctx.insert(k.clone(), v.clone());
            }
        } else {
            manifest.context = fields;
        }
        self.save_manifest(run, &manifest)
    }

    /// Whether a stage artifact exists (manifest is authoritative).
    pub fn stage_exists(&self, run: &MeetingRun, stage: Stage) -> SimResult<bool> {
        Ok(self.load_manifest(run)?.has_stage(stage))
    }

    /// Persist a stage artifact atomically and record it in the manifest.
    pub fn write_stage(
        &self,
        run: &MeetingRun,
        artifact: &PhaseArtifact,
        meta: serde_json::Value,
    ) -> SimResult<ArtifactRecord> {
        let stage = artifact.stage();
        let path = run.dir.join(format!("{}.json", stage.key()));
        let bytes = serde_json::to_vec_pretty(artifact)?;
        atomic_write(&path, &bytes)?;
        self.record(run, stage.key(), &path, bytes.len() as u64, meta)
    }

    /// Read a stage artifact back.
    ///
    /// Returns `None` when the manifest has no entry - even if a stray
    /// file exists on disk. A manifest entry whose file is missing or
    /// whose payload belongs to another stage means the store is corrupt.
    pub fn read_stage(
        &self,
        run: &MeetingRun,
        stage: Stage,
    ) -> SimResult<Option<(PhaseArtifact, ArtifactRecord)>> {
        let manifest = self.load_manifest(run)?;
        let Some(record) = manifest.stage_record(stage) else {
            return Ok(None);
        };
        let path = run.dir.join(format!("{}.json", stage.key()));
        let bytes = fs::read(&path).map_err(|e| {
            SimError::manifest_corrupt(
                &run.manifest_path,
                format!("artifact '{}' recorded but unreadable: {e}", stage.key()),
            )
        })?;
        let artifact: PhaseArtifact = serde_json::from_slice(&bytes).map_err(|e| {
            SimError::manifest_corrupt(
                &run.manifest_path,
                format!("artifact '{}' is not valid JSON: {e}", stage.key()),
            )
        })?;
        if artifact.stage() != stage {
            return Err(SimError::ArtifactMismatch {
                stage,
                found: artifact.kind_name(),
            });
        }
        Ok(Some((artifact, record.clone())))
    }

    /// Raw bytes of a stage artifact, for byte-identity checks.
    pub fn read_stage_bytes(&self, run: &MeetingRun, stage: Stage) -> SimResult<Option<Vec<u8>>> {
        let manifest = self.load_manifest(run)?;
        if !manifest.has_stage(stage) {
            return Ok(None);
        }
        Ok(Some(fs::read(run.dir.join(format!("{}.json", stage.key())))?))
    }

    /// Persist a named text artifact (seeded materials, rendered markdown).
    pub fn write_text(
        &self,
        run: &MeetingRun,
        key: &str,
        text: &str,
        meta: serde_json::Value,
    ) -> SimResult<ArtifactRecord> {
        let safe = sanitize_key(key)?;
        let path = run.dir.join(format!("{safe}.md"));
        atomic_write(&path, text.as_bytes())?;
        self.record(run, &safe, &path, text.len() as u64, meta)
    }

    /// Read a named text artifact. Manifest-first, like `read_stage`.
    pub fn read_text(&self, run: &MeetingRun, key: &str) -> SimResult<Option<String>> {
        let safe = sanitize_key(key)?;
        let manifest = self.load_manifest(run)?;
        if !manifest.artifacts.contains_key(&safe) {
            return Ok(None);
        }
        let path = run.dir.join(format!("{safe}.md"));
        let text = fs::read_to_string(&path).map_err(|e| {
            SimError::manifest_corrupt(
                &run.manifest_path,
                format!("artifact '{safe}' recorded but unreadable: {e}"),
            )
        })?;
        Ok(Some(text))
    }

    /// Drop a stage's manifest entry (its file becomes invisible).
    pub fn remove_stage(&self, run: &MeetingRun, stage: Stage) -> SimResult<()> {
        let mut manifest = self.load_manifest(run)?;
        manifest.artifacts.remove(stage.key());
        self.save_manifest(run, &manifest)
    }

    fn record(
        &self,
        run: &MeetingRun,
        key: &str,
        path: &Path,
        bytes: u64,
        meta: serde_json::Value,
    ) -> SimResult<ArtifactRecord> {
        let rel = path
            .strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        let record = ArtifactRecord {
            path: rel,
            bytes,
            updated_at: Utc::now(),
            meta,
        };
        let mut manifest = self.load_manifest(run)?;
        manifest.artifacts.insert(key.to_string(), record.clone());
        self.save_manifest(run, &manifest)?;
        tracing::debug!(meeting = %run.meeting_id, artifact = key, bytes, "artifact recorded");
        Ok(record)
    }
}

/// Write-whole-or-nothing: temp file in the target directory, then rename.
fn atomic_write(path: &Path, bytes: &[u8]) -> SimResult<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Exclusive writer lock for one meeting directory.
///
/// Held for the duration of any generating run; dropped (and the lock file
/// removed) when the run finishes or unwinds.
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(run: &MeetingRun) -> SimResult<Self> {
        let path = run.dir.join(".lock");
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(SimError::ConcurrentRunConflict {
                    meeting_id: run.meeting_id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}
