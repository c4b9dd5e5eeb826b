//! `waypoint` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`  validate a workflow JSON file.
//! - `plan`      print the stages grouped into parallel waves.
//! - `simulate`  dry-run a workflow with stand-in collaborators.

mod dry_run;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use agents::Worker;
use engine::{
    ExecutorConfig, ParallelConfig, ParallelExecutor, Workflow, WorkflowExecutor, WorkerRegistry,
};

use dry_run::{AutopilotOracle, EchoWorker, ECHO_WORKER};

#[derive(Parser)]
#[command(
    name = "waypoint",
    about = "Oracle-driven workflow orchestration core",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Show which stages can run side by side.
    Plan {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Dry-run a workflow with an autopilot oracle and an echo worker.
    Simulate {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// Run the dependency graph concurrently instead of walking transitions.
        #[arg(long)]
        parallel: bool,
        /// Maximum stages running at once (parallel mode).
        #[arg(long, env = "WAYPOINT_MAX_CONCURRENT")]
        max_concurrent: Option<usize>,
        /// Per-stage timeout in milliseconds (parallel mode).
        #[arg(long, env = "WAYPOINT_STAGE_TIMEOUT_MS")]
        stage_timeout_ms: Option<u64>,
        /// Maximum oracle turns (sequential mode).
        #[arg(long, env = "WAYPOINT_MAX_TURNS", default_value_t = 100)]
        max_turns: usize,
        /// JSON input handed to the run.
        #[arg(long, default_value = "null")]
        input: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Validate { path } => {
            let workflow = load_workflow(&path)?;
            match engine::topological_order(&workflow) {
                Ok(order) => {
                    println!("✅ Workflow '{}' is valid. Dependency order: {order:?}", workflow.name);
                }
                Err(e) => {
                    eprintln!("❌ Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Plan { path } => {
            let workflow = load_workflow(&path)?;
            let waves = engine::execution_waves(&workflow)?;
            for (i, wave) in waves.iter().enumerate() {
                println!("wave {}: {}", i + 1, wave.join(", "));
            }
        }
        Command::Simulate {
            path,
            parallel,
            max_concurrent,
            stage_timeout_ms,
            max_turns,
            input,
        } => {
            let workflow = Arc::new(load_workflow(&path)?);
            let input: Value = serde_json::from_str(&input).context("--input is not valid JSON")?;
            info!(workflow = %workflow.name, parallel, "simulating");

            let report = if parallel {
                let config = ParallelConfig {
                    max_concurrent,
                    stage_timeout: stage_timeout_ms.map(Duration::from_millis),
                };
                let report = ParallelExecutor::new(Arc::new(EchoWorker), config)
                    .run(workflow, input)
                    .await?;
                json!({
                    "run_id": report.run_id,
                    "completion_order": report.completion_order,
                    "events": report.events,
                })
            } else {
                let mut workers: WorkerRegistry = HashMap::new();
                workers.insert(ECHO_WORKER.to_string(), Arc::new(EchoWorker) as Arc<dyn Worker>);
                let config = ExecutorConfig {
                    max_turns: Some(max_turns),
                };
                let report = WorkflowExecutor::new(Arc::new(AutopilotOracle), workers, config)
                    .run(workflow, input)
                    .await?;
                json!({
                    "run_id": report.run_id,
                    "final_stage": report.final_stage,
                    "summary": report.summary,
                    "history": report.history,
                })
            };

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Read and parse a workflow definition; validation is left to the caller.
fn load_workflow(path: &Path) -> Result<Workflow> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let workflow: Workflow = serde_json::from_str(&content)
        .with_context(|| format!("invalid workflow JSON in {}", path.display()))?;
    Ok(workflow)
}
