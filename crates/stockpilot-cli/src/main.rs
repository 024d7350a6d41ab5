//! `stockpilot`: command line front end for stockpilot-core.
//!
//! Usage:
//!   stockpilot [-c stockpilot.toml] submit --owner u1 --subject 600519:name=Moutai
//!   stockpilot status task-01HV...
//!
//! The CLI process drives the tasks it submits (or retries) until they reach a
//! terminal status. Control commands issued from another process only update
//! the persisted status, since that process holds no control handle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::info;

use stockpilot_core::app::{Orchestrator, OrchestratorBuilder};
use stockpilot_core::config::StockpilotConfig;
use stockpilot_core::domain::{ErrorKind, Subject, SubmitOptions, SubmitRequest, TaskId, TaskKind};
use stockpilot_core::impls::{FileTaskStore, InMemoryTaskStore, ScriptedProvider};

/// Stock analysis task runner.
#[derive(Parser, Debug)]
#[command(name = "stockpilot", about = "Run and control LLM stock-analysis tasks")]
struct Cli {
    /// Path to the config file.
    #[arg(short = 'c', long = "config", default_value = "stockpilot.toml")]
    config: PathBuf,

    /// Task store directory (overrides `data_dir`).
    #[arg(long = "data-dir")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a task and drive it to a terminal status.
    Submit {
        #[arg(long)]
        owner: String,

        /// Provider name (defaults to `default_provider`).
        #[arg(long)]
        provider: Option<String>,

        /// `CODE[:key=value,...]`; repeat for a batch.
        #[arg(long = "subject", required = true)]
        subjects: Vec<String>,

        /// Force the task kind (default: single for one subject, batch otherwise).
        #[arg(long, value_enum)]
        kind: Option<KindArg>,

        #[arg(long)]
        max_retries: Option<u32>,

        /// File holding a prompt template that overrides the configured one.
        #[arg(long)]
        prompt_file: Option<PathBuf>,
    },
    /// Print a task record.
    Status { task_id: TaskId },
    /// List an owner's tasks, newest first.
    List {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    Pause { task_id: TaskId },
    Resume { task_id: TaskId },
    Stop { task_id: TaskId },
    /// Re-run a failed task and drive it to a terminal status.
    Retry { task_id: TaskId },
    /// Delete a terminal task.
    Delete { task_id: TaskId },
    /// Mark tasks left non-terminal by a crashed process as failed.
    Recover,
    /// Task counts per status.
    Counts {
        #[arg(long)]
        owner: Option<String>,
    },
    /// List configured providers.
    Providers {
        /// Also send a probe request to each provider.
        #[arg(long)]
        check: bool,
    },
    /// In-memory walkthrough with scripted providers.
    Demo,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Single,
    Batch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Demo => demo().await,
        command => {
            let mut config = StockpilotConfig::load(&cli.config)?;
            if let Some(data_dir) = cli.data_dir {
                config.data_dir = data_dir;
            }
            let orchestrator = build(&config).await?;
            execute(&orchestrator, &config, command).await
        }
    }
}

async fn execute(orchestrator: &Orchestrator, config: &StockpilotConfig, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Submit {
            owner,
            provider,
            subjects,
            kind,
            max_retries,
            prompt_file,
        } => {
            let subjects = subjects
                .iter()
                .map(|s| parse_subject(s))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let kind = match kind {
                Some(KindArg::Single) => TaskKind::Single,
                Some(KindArg::Batch) => TaskKind::Batch,
                None if subjects.len() == 1 => TaskKind::Single,
                None => TaskKind::Batch,
            };
            let prompt_template = match prompt_file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read prompt file {}", path.display()))?,
                ),
                None => None,
            };
            let request = SubmitRequest {
                kind,
                owner_id: owner,
                subjects,
                provider: provider.unwrap_or_else(|| config.default_provider.clone()),
                options: SubmitOptions {
                    max_retries,
                    prompt_template,
                },
            };
            let task_id = orchestrator.submit(request).await?;
            info!(%task_id, "submitted; press Ctrl-C to stop");
            drive(orchestrator, task_id).await?;
        }
        Command::Status { task_id } => print_json(&orchestrator.get_status(task_id).await?)?,
        Command::List { owner, limit } => print_json(&orchestrator.list_tasks(&owner, limit).await?)?,
        Command::Pause { task_id } => print_ack(task_id, orchestrator.pause(task_id).await?)?,
        Command::Resume { task_id } => print_ack(task_id, orchestrator.resume(task_id).await?)?,
        Command::Stop { task_id } => print_ack(task_id, orchestrator.stop(task_id).await?)?,
        Command::Retry { task_id } => {
            orchestrator.retry(task_id).await?;
            drive(orchestrator, task_id).await?;
        }
        Command::Delete { task_id } => {
            orchestrator.delete(task_id).await?;
            print_ack(task_id, true)?;
        }
        Command::Recover => print_json(&orchestrator.recover_interrupted().await?)?,
        Command::Counts { owner } => print_json(&orchestrator.counts(owner.as_deref()).await?)?,
        Command::Providers { check } => {
            let mut rows = Vec::new();
            for name in orchestrator.providers().names() {
                let Some(provider) = orchestrator.providers().get(&name) else {
                    continue;
                };
                let reachable = if check { Some(provider.test_connection().await) } else { None };
                rows.push(ProviderRow {
                    name,
                    model: provider.model().to_string(),
                    reachable,
                });
            }
            print_json(&rows)?;
        }
        Command::Demo => demo().await?,
    }
    Ok(())
}

async fn build(config: &StockpilotConfig) -> anyhow::Result<Orchestrator> {
    let store = FileTaskStore::open(&config.data_dir)
        .await
        .with_context(|| format!("failed to open task store at {}", config.data_dir.display()))?;
    info!("task store at {}", store.root().display());
    let orchestrator = OrchestratorBuilder::from_config(config)?
        .store(Arc::new(store))
        .build()?;
    Ok(orchestrator)
}

/// Wait for a terminal status, turning Ctrl-C into a stop.
async fn drive(orchestrator: &Orchestrator, task_id: TaskId) -> anyhow::Result<()> {
    let poll = orchestrator.poll_interval().min(Duration::from_millis(200));
    let record = tokio::select! {
        record = orchestrator.wait_until_terminal(task_id, poll) => record?,
        _ = tokio::signal::ctrl_c() => {
            info!(%task_id, "interrupt received; stopping task");
            orchestrator.stop(task_id).await?;
            orchestrator.wait_until_terminal(task_id, poll).await?
        }
    };
    print_json(&record)
}

/// Parse `CODE[:key=value,...]`.
fn parse_subject(raw: &str) -> anyhow::Result<Subject> {
    let (code, meta) = match raw.split_once(':') {
        Some((code, meta)) => (code.trim(), Some(meta)),
        None => (raw.trim(), None),
    };
    if code.is_empty() {
        bail!("subject '{raw}' has an empty code");
    }
    let mut subject = Subject::new(code);
    for pair in meta.into_iter().flat_map(|m| m.split(',')).filter(|p| !p.trim().is_empty()) {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("expected key=value in subject '{raw}', got '{pair}'");
        };
        subject = subject.with_meta(key.trim(), value.trim());
    }
    Ok(subject)
}

#[derive(Serialize)]
struct ProviderRow {
    name: String,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reachable: Option<bool>,
}

#[derive(Serialize)]
struct Ack {
    task_id: TaskId,
    ok: bool,
}

fn print_ack(task_id: TaskId, ok: bool) -> anyhow::Result<()> {
    print_json(&Ack { task_id, ok })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Scripted walkthrough: a single task that recovers after two network
/// failures, and a batch in which one subject fails authentication.
async fn demo() -> anyhow::Result<()> {
    let flaky = ScriptedProvider::new("flaky").failing("600519", 2, ErrorKind::Network);
    let strict = ScriptedProvider::new("strict").failing("000001", 1, ErrorKind::Auth);
    let orchestrator = OrchestratorBuilder::new()
        .store(Arc::new(InMemoryTaskStore::new()))
        .provider(Arc::new(flaky))?
        .provider(Arc::new(strict))?
        .retry_policy(stockpilot_core::app::RetryPolicy::new(
            3,
            Duration::from_millis(50),
            Duration::from_secs(1),
        ))
        .poll_interval(Duration::from_millis(100))
        .expect_providers(&["flaky", "strict"])
        .build()?;

    let single = orchestrator
        .submit(SubmitRequest::single(
            "demo",
            "flaky",
            Subject::new("600519").with_meta("name", "Kweichow Moutai"),
        ))
        .await?;
    let batch = orchestrator
        .submit(SubmitRequest::batch(
            "demo",
            "strict",
            vec![Subject::new("000001"), Subject::new("000002")],
        ))
        .await?;

    for task_id in [single, batch] {
        let record = orchestrator
            .wait_until_terminal(task_id, Duration::from_millis(20))
            .await?;
        print_json(&record)?;
    }
    print_json(&orchestrator.counts(Some("demo")).await?)
}
