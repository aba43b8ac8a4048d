use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use committee_agents::config::{check_endpoint, roles_from_toml, SimConfig};
use committee_agents::{LiveGateway, Materials, Orchestrator};
use meeting_core::model::ALL_MATERIALS;
use meeting_core::{RunStore, Stage, ALL_STAGES};

#[derive(Parser)]
#[command(name = "committee-agents", about = "Committee meeting simulation pipeline")]
struct Cli {
    /// Optional TOML file defining the committee roles.
    #[arg(long, global = true)]
    roles: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline for a meeting.
    Run {
        /// Meeting identifier (date-based, e.g. 2024-09-18).
        meeting_id: String,
        /// Directory with the briefing texts (macro.md, employment.md,
        /// inflation.md, policy-rule.md). Missing files degrade gracefully.
        #[arg(long)]
        materials: Option<PathBuf>,
        /// Regenerate every stage instead of reusing cached artifacts.
        #[arg(long)]
        refresh: bool,
    },
    /// Ensure a single stage (and any missing predecessors).
    Stage {
        meeting_id: String,
        /// Stage key, e.g. blackboard, votes, drafts.
        stage: String,
        #[arg(long)]
        refresh: bool,
    },
    /// Show what exists for a meeting.
    Status { meeting_id: String },
}

fn load_materials_dir(dir: &PathBuf) -> Result<Materials> {
    let mut materials = Materials::new();
    for kind in ALL_MATERIALS {
        let path = dir.join(format!("{}.md", kind.key()));
        if path.exists() {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            materials.set(kind, text);
        }
    }
    Ok(materials)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = SimConfig::default();
    if let Some(path) = &cli.roles {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        config.roles = roles_from_toml(&text)?;
    }

    let store = RunStore::new(config.runs_dir.clone());
    let gateway = LiveGateway::new(&config.endpoint, config.retry.request_timeout())?;
    info!(
        endpoint = %config.endpoint.url,
        model = %config.endpoint.model,
        roles = config.roles.len(),
        "committee pipeline starting"
    );
    let orchestrator = Orchestrator::new(store, Arc::new(gateway), config.clone());

    match cli.command {
        Command::Run {
            meeting_id,
            materials,
            refresh,
        } => {
            if !check_endpoint(&config.endpoint.url).await {
                tracing::warn!(url = %config.endpoint.url, "endpoint probe failed, continuing anyway");
            }
            if let Some(dir) = materials {
                let materials = load_materials_dir(&dir)?;
                orchestrator.seed_materials(&meeting_id, &materials)?;
                info!(
                    present = materials.present().len(),
                    missing = materials.missing().len(),
                    "materials seeded"
                );
            }
            let manifest = orchestrator.run_all(&meeting_id, refresh).await?;
            println!("meeting {} - {} artifacts:", manifest.meeting_id, manifest.artifacts.len());
            for (key, record) in &manifest.artifacts {
                println!("  {key:16} {:>8}B  {}", record.bytes, record.updated_at);
            }
        }
        Command::Stage {
            meeting_id,
            stage,
            refresh,
        } => {
            let stage = Stage::from_key(&stage)
                .with_context(|| format!("unknown stage '{stage}'"))?;
            let stored = orchestrator.ensure_stage(&meeting_id, stage, refresh).await?;
            println!(
                "{}: {} ({}B, updated {})",
                stored.stage, stored.record.path, stored.record.bytes, stored.record.updated_at
            );
        }
        Command::Status { meeting_id } => {
            let manifest = orchestrator.manifest(&meeting_id)?;
            println!("meeting {}", manifest.meeting_id);
            println!("context: {}", serde_json::to_string_pretty(&manifest.context)?);
            for stage in ALL_STAGES {
                match manifest.stage_record(stage) {
                    Some(record) => {
                        println!("  [x] {:16} {:>8}B  {}", stage.key(), record.bytes, record.updated_at)
                    }
                    None => println!("  [ ] {}", stage.key()),
                }
            }
        }
    }

    Ok(())
}
