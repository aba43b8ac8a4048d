//! Pipeline orchestrator: sequences the eleven stages under the
//! cache/refresh contract.
//!
//! `ensure_stage` / `run_all` walk the dependency chain in order. A stage
//! whose artifact already exists is served from the run store without a
//! single gateway call; `refresh` forces regeneration of the requested
//! scope. Generation only happens under the meeting's exclusive run lock,
//! per-role sub-calls fan out concurrently over read-only snapshots, and
//! every artifact is re-validated against the run context before it is
//! persisted atomically and recorded in the manifest.

use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::json;
use tracing::{info, warn};

use meeting_core::artifact::Violation;
use meeting_core::error::{SimError, SimResult};
use meeting_core::model::StanceCard;
use meeting_core::run_store::{ArtifactRecord, Manifest, MeetingRun, RunLock, RunStore};
use meeting_core::tally::tabulate;
use meeting_core::{
    DeliberationPhase, InMemoryJobStore, JobStatus, JobStore, PhaseArtifact,
    PipelineStateMachine, Stage, Utterance, ValidationContext, ALL_STAGES,
};

use crate::blackboard::{self, Materials};
use crate::config::SimConfig;
use crate::gateway::GenerationGateway;
use crate::generate::Generator;
use crate::prompts::PROMPT_VERSION;
use crate::telemetry::PromptLog;
use crate::{ballot, chair, deliberation, drafts, stance, transcript};

/// A stage artifact together with its manifest record.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub stage: Stage,
    pub artifact: PhaseArtifact,
    pub record: ArtifactRecord,
}

/// Which stages a run is allowed to regenerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshScope {
    /// Only fill gaps; every cached artifact is reused.
    Missing,
    /// Regenerate the target stage; predecessors are reused when cached.
    Target(Stage),
    /// Regenerate everything in the chain.
    All,
}

impl RefreshScope {
    fn wants(self, stage: Stage, cached: bool) -> bool {
        match self {
            Self::Missing => !cached,
            Self::Target(target) => stage == target || !cached,
            Self::All => true,
        }
    }
}

/// Drives a meeting run end to end.
pub struct Orchestrator {
    store: RunStore,
    gateway: Arc<dyn GenerationGateway>,
    config: SimConfig,
    jobs: Arc<dyn JobStore>,
}

impl Orchestrator {
    pub fn new(store: RunStore, gateway: Arc<dyn GenerationGateway>, config: SimConfig) -> Self {
        Self {
            store,
            gateway,
            config,
            jobs: Arc::new(InMemoryJobStore::new()),
        }
    }

    /// Swap the job store (durability is the store's concern, not ours).
    pub fn with_job_store(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn store(&self) -> &RunStore {
        &self.store
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Seed the four briefing texts for a meeting.
    ///
    /// Missing materials are a valid degenerate case; what is present is
    /// fingerprinted into the manifest context so a stale blackboard can
    /// be traced to the exact inputs that produced it.
    pub fn seed_materials(&self, meeting_id: &str, materials: &Materials) -> SimResult<MeetingRun> {
        let run = self.store.ensure_run(meeting_id)?;
        let mut fingerprints = serde_json::Map::new();
        for kind in materials.present() {
            let text = materials.get(kind).unwrap_or_default();
            self.store.write_text(
                &run,
                kind.key(),
                text,
                json!({"kind": "material", "material": kind.key()}),
            )?;
            fingerprints.insert(
                kind.key().to_string(),
                json!(blake3::hash(text.as_bytes()).to_hex().as_str()),
            );
        }
        self.store.merge_context(
            &run,
            json!({
                "materials_present": materials.present().iter().map(|k| k.key()).collect::<Vec<_>>(),
                "materials_missing": materials.missing().iter().map(|k| k.key()).collect::<Vec<_>>(),
                "material_fingerprints": fingerprints,
            }),
        )?;
        Ok(run)
    }

    /// Read a stage artifact without ever generating.
    pub fn get_stage(&self, meeting_id: &str, stage: Stage) -> SimResult<Option<StoredArtifact>> {
        let run = self.store.ensure_run(meeting_id)?;
        Ok(self
            .store
            .read_stage(&run, stage)?
            .map(|(artifact, record)| StoredArtifact {
                stage,
                artifact,
                record,
            }))
    }

    /// The manifest for a meeting.
    pub fn manifest(&self, meeting_id: &str) -> SimResult<Manifest> {
        let run = self.store.ensure_run(meeting_id)?;
        self.store.load_manifest(&run)
    }

    /// Ensure one stage exists, generating it (and any missing
    /// predecessors) if needed. With `refresh` the target stage is
    /// regenerated even when cached; predecessors are reused.
    pub async fn ensure_stage(
        &self,
        meeting_id: &str,
        stage: Stage,
        refresh: bool,
    ) -> SimResult<StoredArtifact> {
        let run = self.store.ensure_run(meeting_id)?;

        if !refresh {
            if let Some((artifact, record)) = self.store.read_stage(&run, stage)? {
                info!(meeting = %run.meeting_id, stage = %stage, "stage served from cache");
                return Ok(StoredArtifact {
                    stage,
                    artifact,
                    record,
                });
            }
        }

        let scope = if refresh {
            RefreshScope::Target(stage)
        } else {
            RefreshScope::Missing
        };
        self.run_chain(&run, stage, scope).await?;

        let (artifact, record) = self
            .store
            .read_stage(&run, stage)?
            .ok_or(SimError::MissingDependency {
                stage,
                missing: stage,
            })?;
        Ok(StoredArtifact {
            stage,
            artifact,
            record,
        })
    }

    /// Run the whole pipeline. With everything cached and `refresh`
    /// off this performs zero gateway calls and leaves the manifest
    /// untouched.
    pub async fn run_all(&self, meeting_id: &str, refresh: bool) -> SimResult<Manifest> {
        let run = self.store.ensure_run(meeting_id)?;

        if !refresh {
            let manifest = self.store.load_manifest(&run)?;
            if ALL_STAGES.iter().all(|s| manifest.has_stage(*s)) {
                info!(meeting = %run.meeting_id, "all stages cached, nothing to do");
                return Ok(manifest);
            }
        }

        let scope = if refresh {
            RefreshScope::All
        } else {
            RefreshScope::Missing
        };
        self.run_chain(&run, Stage::Drafts, scope).await?;
        self.store.load_manifest(&run)
    }

    /// Execute every stage the scope wants, in dependency order, under
    /// the run lock.
    async fn run_chain(&self, run: &MeetingRun, target: Stage, scope: RefreshScope) -> SimResult<()> {
        let manifest = self.store.load_manifest(run)?;
        let needed: Vec<Stage> = target
            .chain()
            .iter()
            .copied()
            .filter(|s| scope.wants(*s, manifest.has_stage(*s)))
            .collect();
        if needed.is_empty() {
            return Ok(());
        }

        let _lock = RunLock::acquire(run)?;

        let job = self.jobs.create(&format!("meeting-run:{}", run.meeting_id));
        self.jobs.set_status(&job.id, JobStatus::Running);

        let generator = Generator::new(
            self.gateway.as_ref(),
            self.config.retry.clone(),
            &run.meeting_id,
        )
        .with_prompt_log(PromptLog::new(run.dir.join("prompt-log.jsonl")));

        let mut machine = PipelineStateMachine::new();
        for stage in needed {
            machine.begin(stage)?;
            self.jobs.append_log(&job.id, &format!("stage {stage} started"));
            info!(meeting = %run.meeting_id, stage = %stage, "executing stage");

            match self.execute_stage(run, &generator, stage).await {
                Ok(()) => {
                    self.jobs.append_log(&job.id, &format!("stage {stage} done"));
                }
                Err(e) => {
                    warn!(meeting = %run.meeting_id, stage = %stage, error = %e, "stage failed");
                    self.jobs.append_log(&job.id, &format!("stage {stage} failed: {e}"));
                    self.jobs.fail(&job.id, &e.to_string());
                    machine.fail(&e.to_string())?;
                    return Err(e);
                }
            }
        }
        machine.complete("all requested stages validated")?;
        self.jobs
            .succeed(&job.id, json!({"meeting_id": run.meeting_id, "target": target.key()}));
        info!(meeting = %run.meeting_id, history = %machine.summary(), "run finished");
        Ok(())
    }

    fn load_dep(&self, run: &MeetingRun, stage: Stage, dep: Stage) -> SimResult<PhaseArtifact> {
        self.store
            .read_stage(run, dep)?
            .map(|(artifact, _)| artifact)
            .ok_or(SimError::MissingDependency {
                stage,
                missing: dep,
            })
    }

    fn crisis_mode(&self, run: &MeetingRun) -> SimResult<bool> {
        Ok(self
            .store
            .load_manifest(run)?
            .context
            .get("crisis_mode")
            .and_then(|v| v.as_bool())
            .unwrap_or(false))
    }

    fn load_materials(&self, run: &MeetingRun) -> SimResult<Materials> {
        let mut materials = Materials::new();
        for kind in meeting_core::model::ALL_MATERIALS {
            if let Some(text) = self.store.read_text(run, kind.key())? {
                materials.set(kind, text);
            }
        }
        Ok(materials)
    }

    /// Map residual validator findings onto the stage-failure taxonomy.
    fn reject_violations(stage: Stage, violations: Vec<Violation>) -> SimResult<()> {
        if violations.is_empty() {
            return Ok(());
        }
        let citations: Vec<String> = violations
            .iter()
            .filter(|v| v.is_citation())
            .map(|v| v.message().to_string())
            .collect();
        if !citations.is_empty() {
            return Err(SimError::citation(stage, citations.join("; ")));
        }
        let detail = violations
            .iter()
            .map(|v| v.message().to_string())
            .collect::<Vec<_>>()
            .join("; ");
        Err(SimError::schema(stage, 1, detail))
    }

    fn stance_for<'a>(
        cards: &'a [StanceCard],
        role_id: &str,
        stage: Stage,
    ) -> SimResult<&'a StanceCard> {
        cards
            .iter()
            .find(|c| c.role == role_id)
            .ok_or_else(|| SimError::schema(stage, 1, format!("no stance card for role '{role_id}'")))
    }

    async fn execute_stage(
        &self,
        run: &MeetingRun,
        generator: &Generator<'_>,
        stage: Stage,
    ) -> SimResult<()> {
        match stage {
            Stage::Blackboard => self.exec_blackboard(run, generator).await,
            Stage::Stance => self.exec_stance(run, generator).await,
            Stage::Opening => self.exec_opening(run, generator).await,
            Stage::ChairQuestions => self.exec_chair_questions(run, generator).await,
            Stage::Answers => self.exec_answers(run, generator).await,
            Stage::RoundSummary => self.exec_round_summary(run, generator).await,
            Stage::Packages => self.exec_packages(run, generator).await,
            Stage::PackageViews => self.exec_package_views(run, generator).await,
            Stage::Votes => self.exec_votes(run, generator).await,
            Stage::Tally => self.exec_tally(run),
            Stage::Drafts => self.exec_drafts(run, generator).await,
        }
    }

    async fn exec_blackboard(&self, run: &MeetingRun, gen: &Generator<'_>) -> SimResult<()> {
        let materials = self.load_materials(run)?;
        let built =
            blackboard::build(gen, &self.config, &run.meeting_id, &materials).await?;
        let crisis = blackboard::infer_crisis_mode(&built.value);

        self.store.write_stage(
            run,
            &PhaseArtifact::Blackboard(built.value),
            json!({
                "retries": built.retries,
                "crisis_mode": crisis,
                "materials_missing": materials.missing().iter().map(|k| k.key()).collect::<Vec<_>>(),
            }),
        )?;
        self.store.merge_context(
            run,
            json!({"crisis_mode": crisis, "prompt_version": PROMPT_VERSION}),
        )?;
        Ok(())
    }

    async fn exec_stance(&self, run: &MeetingRun, gen: &Generator<'_>) -> SimResult<()> {
        let bb = self
            .load_dep(run, Stage::Stance, Stage::Blackboard)?
            .expect_blackboard()?
            .clone();
        let crisis = self.crisis_mode(run)?;

        let results = try_join_all(
            self.config
                .roles
                .iter()
                .map(|role| stance::generate_stance_card(gen, role, &bb, crisis)),
        )
        .await?;

        let retries: u32 = results.iter().map(|r| r.retries).sum();
        let cards: Vec<StanceCard> = results.into_iter().map(|r| r.value).collect();

        let ctx = ValidationContext::new(&self.config.roles)
            .with_blackboard(&bb)
            .with_crisis_mode(crisis);
        let artifact = PhaseArtifact::StanceCards { cards };
        Self::reject_violations(Stage::Stance, artifact.validate(&ctx))?;

        self.store.write_stage(run, &artifact, json!({"retries": retries}))?;
        Ok(())
    }

    async fn exec_opening(&self, run: &MeetingRun, gen: &Generator<'_>) -> SimResult<()> {
        let bb = self
            .load_dep(run, Stage::Opening, Stage::Blackboard)?
            .expect_blackboard()?
            .clone();
        let cards_artifact = self.load_dep(run, Stage::Opening, Stage::Stance)?;
        let cards = cards_artifact.expect_stance_cards()?;
        let crisis = self.crisis_mode(run)?;

        let bb = &bb;
        let results = try_join_all(self.config.roles.iter().map(|role| {
            let card = Self::stance_for(cards, &role.id, Stage::Opening);
            async move {
                deliberation::generate_speech(
                    gen,
                    role,
                    bb,
                    card?,
                    DeliberationPhase::OpeningStatements,
                    None,
                )
                .await
            }
        }))
        .await?;

        let retries: u32 = results.iter().map(|r| r.retries).sum();
        let utterances: Vec<Utterance> = results.into_iter().map(|r| r.value).collect();

        let ctx = ValidationContext::new(&self.config.roles)
            .with_blackboard(bb)
            .with_crisis_mode(crisis);
        let artifact = PhaseArtifact::Opening { utterances };
        Self::reject_violations(Stage::Opening, artifact.validate(&ctx))?;

        self.store.write_stage(run, &artifact, json!({"retries": retries}))?;
        Ok(())
    }

    async fn exec_chair_questions(&self, run: &MeetingRun, gen: &Generator<'_>) -> SimResult<()> {
        let bb = self
            .load_dep(run, Stage::ChairQuestions, Stage::Blackboard)?
            .expect_blackboard()?
            .clone();
        let cards_artifact = self.load_dep(run, Stage::ChairQuestions, Stage::Stance)?;
        let cards = cards_artifact.expect_stance_cards()?;
        let opening_artifact = self.load_dep(run, Stage::ChairQuestions, Stage::Opening)?;
        let opening = opening_artifact.expect_opening()?;

        let pool =
            deliberation::collect_open_questions(opening, cards, self.config.max_open_questions);
        let out = chair::select_questions(
            gen,
            &self.config.roles,
            &bb,
            cards,
            &pool,
            self.config.max_chair_questions,
        )
        .await?;

        let ctx = ValidationContext::new(&self.config.roles).with_blackboard(&bb);
        let artifact = PhaseArtifact::ChairQuestions(out.value);
        Self::reject_violations(Stage::ChairQuestions, artifact.validate(&ctx))?;

        self.store.write_stage(
            run,
            &artifact,
            json!({"retries": out.retries, "pool_size": pool.len()}),
        )?;
        Ok(())
    }

    async fn exec_answers(&self, run: &MeetingRun, gen: &Generator<'_>) -> SimResult<()> {
        let bb = self
            .load_dep(run, Stage::Answers, Stage::Blackboard)?
            .expect_blackboard()?
            .clone();
        let cards_artifact = self.load_dep(run, Stage::Answers, Stage::Stance)?;
        let cards = cards_artifact.expect_stance_cards()?;
        let questions_artifact = self.load_dep(run, Stage::Answers, Stage::ChairQuestions)?;
        let questions = questions_artifact.expect_chair_questions()?;

        let bb = &bb;
        let results = try_join_all(questions.directed.iter().map(|dq| {
            let role = self.config.role(&dq.to_role).ok_or_else(|| {
                SimError::schema(
                    Stage::Answers,
                    1,
                    format!("question addressed to unknown role '{}'", dq.to_role),
                )
            });
            let card = Self::stance_for(cards, &dq.to_role, Stage::Answers);
            async move {
                deliberation::generate_speech(
                    gen,
                    role?,
                    bb,
                    card?,
                    DeliberationPhase::DirectedQa,
                    Some(&dq.question),
                )
                .await
            }
        }))
        .await?;

        let retries: u32 = results.iter().map(|r| r.retries).sum();
        let utterances: Vec<Utterance> = results.into_iter().map(|r| r.value).collect();

        let ctx = ValidationContext::new(&self.config.roles)
            .with_blackboard(bb)
            .with_expected_answers(questions.directed.len());
        let artifact = PhaseArtifact::Answers { utterances };
        Self::reject_violations(Stage::Answers, artifact.validate(&ctx))?;

        self.store.write_stage(run, &artifact, json!({"retries": retries}))?;
        Ok(())
    }

    async fn exec_round_summary(&self, run: &MeetingRun, gen: &Generator<'_>) -> SimResult<()> {
        let bb = self
            .load_dep(run, Stage::RoundSummary, Stage::Blackboard)?
            .expect_blackboard()?
            .clone();
        let opening_artifact = self.load_dep(run, Stage::RoundSummary, Stage::Opening)?;
        let opening = opening_artifact.expect_opening()?;
        let answers_artifact = self.load_dep(run, Stage::RoundSummary, Stage::Answers)?;
        let answers = answers_artifact.expect_answers()?;

        let (first, second) = futures::try_join!(
            deliberation::summarize_round(gen, &bb, DeliberationPhase::OpeningStatements, opening),
            deliberation::summarize_round(gen, &bb, DeliberationPhase::DirectedQa, answers),
        )?;

        let retries = first.retries + second.retries;
        let artifact = PhaseArtifact::RoundSummaries {
            rounds: vec![first.value, second.value],
        };
        let ctx = ValidationContext::new(&self.config.roles).with_blackboard(&bb);
        Self::reject_violations(Stage::RoundSummary, artifact.validate(&ctx))?;

        self.store.write_stage(run, &artifact, json!({"retries": retries}))?;
        Ok(())
    }

    async fn exec_packages(&self, run: &MeetingRun, gen: &Generator<'_>) -> SimResult<()> {
        let bb = self
            .load_dep(run, Stage::Packages, Stage::Blackboard)?
            .expect_blackboard()?
            .clone();
        let cards_artifact = self.load_dep(run, Stage::Packages, Stage::Stance)?;
        let cards = cards_artifact.expect_stance_cards()?;

        let out = chair::propose_packages(gen, &bb, cards).await?;

        let ctx = ValidationContext::new(&self.config.roles).with_blackboard(&bb);
        let artifact = PhaseArtifact::Packages(out.value);
        Self::reject_violations(Stage::Packages, artifact.validate(&ctx))?;

        self.store.write_stage(run, &artifact, json!({"retries": out.retries}))?;
        Ok(())
    }

    async fn exec_package_views(&self, run: &MeetingRun, gen: &Generator<'_>) -> SimResult<()> {
        let bb = self
            .load_dep(run, Stage::PackageViews, Stage::Blackboard)?
            .expect_blackboard()?
            .clone();
        let cards_artifact = self.load_dep(run, Stage::PackageViews, Stage::Stance)?;
        let cards = cards_artifact.expect_stance_cards()?;
        let slate_artifact = self.load_dep(run, Stage::PackageViews, Stage::Packages)?;
        let slate = slate_artifact.expect_packages()?;

        let bb = &bb;
        let results = try_join_all(self.config.roles.iter().map(|role| {
            let card = Self::stance_for(cards, &role.id, Stage::PackageViews);
            async move { ballot::generate_package_views(gen, role, bb, card?, slate).await }
        }))
        .await?;

        let retries: u32 = results.iter().map(|r| r.retries).sum();
        let views: Vec<_> = results.into_iter().flat_map(|r| r.value).collect();

        let ctx = ValidationContext::new(&self.config.roles)
            .with_blackboard(bb)
            .with_packages(slate);
        let artifact = PhaseArtifact::PackageViews { views };
        Self::reject_violations(Stage::PackageViews, artifact.validate(&ctx))?;

        self.store.write_stage(run, &artifact, json!({"retries": retries}))?;
        Ok(())
    }

    async fn exec_votes(&self, run: &MeetingRun, gen: &Generator<'_>) -> SimResult<()> {
        let bb = self
            .load_dep(run, Stage::Votes, Stage::Blackboard)?
            .expect_blackboard()?
            .clone();
        let cards_artifact = self.load_dep(run, Stage::Votes, Stage::Stance)?;
        let cards = cards_artifact.expect_stance_cards()?;
        let slate_artifact = self.load_dep(run, Stage::Votes, Stage::Packages)?;
        let slate = slate_artifact.expect_packages()?;
        let crisis = self.crisis_mode(run)?;

        let bb = &bb;
        let results = try_join_all(self.config.roles.iter().map(|role| {
            let card = Self::stance_for(cards, &role.id, Stage::Votes);
            async move { ballot::generate_vote(gen, role, bb, card?, slate, crisis).await }
        }))
        .await?;

        let retries: u32 = results.iter().map(|r| r.retries).sum();
        let votes: Vec<_> = results.into_iter().map(|r| r.value).collect();

        let ctx = ValidationContext::new(&self.config.roles)
            .with_blackboard(bb)
            .with_crisis_mode(crisis);
        let artifact = PhaseArtifact::Votes {
            votes,
            crisis_mode: crisis,
        };
        Self::reject_violations(Stage::Votes, artifact.validate(&ctx))?;

        self.store.write_stage(
            run,
            &artifact,
            json!({"retries": retries, "crisis_mode": crisis}),
        )?;
        Ok(())
    }

    fn exec_tally(&self, run: &MeetingRun) -> SimResult<()> {
        let votes_artifact = self.load_dep(run, Stage::Tally, Stage::Votes)?;
        let (votes, _) = votes_artifact.expect_votes()?;

        let tally = tabulate(votes, &self.config.roles)
            .map_err(|e| SimError::schema(Stage::Tally, 1, e.to_string()))?;

        let ctx = ValidationContext::new(&self.config.roles);
        let artifact = PhaseArtifact::Tally(tally);
        Self::reject_violations(Stage::Tally, artifact.validate(&ctx))?;

        self.store.write_stage(run, &artifact, json!({}))?;
        Ok(())
    }

    async fn exec_drafts(&self, run: &MeetingRun, gen: &Generator<'_>) -> SimResult<()> {
        let bb = self
            .load_dep(run, Stage::Drafts, Stage::Blackboard)?
            .expect_blackboard()?
            .clone();
        let tally_artifact = self.load_dep(run, Stage::Drafts, Stage::Tally)?;
        let tally = tally_artifact.expect_tally()?;
        let rounds_artifact = self.load_dep(run, Stage::Drafts, Stage::RoundSummary)?;
        let rounds = rounds_artifact.expect_round_summaries()?;

        let out = drafts::synthesize(gen, &bb, tally, rounds).await?;

        let ctx = ValidationContext::new(&self.config.roles).with_tally(tally);
        let artifact = PhaseArtifact::Drafts(out.value.clone());
        Self::reject_violations(Stage::Drafts, artifact.validate(&ctx))?;

        // Derived texts first; the stage artifact last, so a recorded
        // drafts stage implies the rendered texts exist too.
        let crisis = self.crisis_mode(run)?;
        let cards_artifact = self.load_dep(run, Stage::Drafts, Stage::Stance)?;
        let opening_artifact = self.load_dep(run, Stage::Drafts, Stage::Opening)?;
        let questions_artifact = self.load_dep(run, Stage::Drafts, Stage::ChairQuestions)?;
        let answers_artifact = self.load_dep(run, Stage::Drafts, Stage::Answers)?;
        let slate_artifact = self.load_dep(run, Stage::Drafts, Stage::Packages)?;
        let views_artifact = self.load_dep(run, Stage::Drafts, Stage::PackageViews)?;
        let votes_artifact = self.load_dep(run, Stage::Drafts, Stage::Votes)?;
        let (votes, _) = votes_artifact.expect_votes()?;

        let discussion = transcript::render(&transcript::TranscriptInputs {
            meeting_id: &run.meeting_id,
            blackboard: &bb,
            crisis_mode: crisis,
            stance_cards: cards_artifact.expect_stance_cards()?,
            opening: opening_artifact.expect_opening()?,
            chair_questions: questions_artifact.expect_chair_questions()?,
            answers: answers_artifact.expect_answers()?,
            slate: slate_artifact.expect_packages()?,
            views: views_artifact.expect_package_views()?,
            votes,
            tally,
        });

        self.store.write_text(
            run,
            "discussion",
            &discussion,
            json!({"kind": "discussion", "crisis_mode": crisis}),
        )?;
        self.store.write_text(
            run,
            "statement",
            &out.value.statement_md,
            json!({"kind": "statement"}),
        )?;
        self.store.write_text(
            run,
            "minutes_summary",
            &out.value.minutes_summary_md,
            json!({"kind": "minutes_summary"}),
        )?;

        self.store.write_stage(run, &artifact, json!({"retries": out.retries}))?;
        Ok(())
    }
}
