//! MiroFlow binary: single-task runner and the HTTP service wrapper.

mod config_file;
mod service;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "miroflow", about = "Multi-agent task execution runtime")]
struct Cli {
    /// Path to the TOML run configuration.
    #[arg(long, global = true, default_value = "miroflow.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single task and print the summary and boxed answer.
    Run {
        /// Natural-language task description.
        #[arg(long)]
        task: String,
        /// Optional file attached to the task.
        #[arg(long)]
        file: Option<String>,
        /// Task id used for the trace file; defaults to a fresh UUID.
        #[arg(long)]
        task_id: Option<String>,
        /// Directory for trace JSON snapshots.
        #[arg(long, default_value = "logs")]
        log_dir: PathBuf,
    },
    /// Serve the task API over HTTP.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        addr: String,
        #[arg(long, default_value = "logs")]
        log_dir: PathBuf,
    },
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
    let config = config_file::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    match cli.command {
        Command::Run {
            task,
            file,
            task_id,
            log_dir,
        } => {
            let task_id = task_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let trace_path = log_dir.join(format!("{task_id}.json"));

            let mut orchestrator = mf_orchestrator::Orchestrator::from_config(
                config,
                task_id.as_str(),
                Some(trace_path),
            )?;

            let cancel = orchestrator.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling task");
                    cancel.cancel();
                }
            });

            let outcome = orchestrator.run_task(&task, file.as_deref()).await;

            println!("{}", outcome.final_summary);
            if !outcome.boxed_answer.is_empty() {
                println!("\nBoxed answer: {}", outcome.boxed_answer);
            }
            eprintln!(
                "status: {:?}; tokens: {} in / {} out",
                outcome.trajectory.status, outcome.usage.input_tokens, outcome.usage.output_tokens,
            );
            Ok(())
        }
        Command::Serve { addr, log_dir } => service::serve(&addr, config, log_dir).await,
    }
}
