//! CLI argument parsing for the worker and the interactive client

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use growth_sdk::{Action, Envelope};

/// Worker CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(
    name = "growth-worker",
    about = "Runs one growth orchestrator action and answers with frames on stdout"
)]
pub struct WorkerArgs {
    /// Action to run (kebab-case, e.g. expand-task)
    #[arg(long)]
    pub action: String,

    /// JSON envelope written by the client
    #[arg(long)]
    pub input_file: PathBuf,
}

impl WorkerArgs {
    pub fn action(&self) -> Result<Action> {
        Ok(self.action.parse::<Action>()?)
    }

    /// Read the envelope and check it is for the action we were started with
    pub fn read_envelope(&self) -> Result<Envelope> {
        let action = self.action()?;
        let text = std::fs::read_to_string(&self.input_file)
            .with_context(|| format!("Failed to read envelope {}", self.input_file.display()))?;
        let envelope: Envelope = serde_json::from_str(&text).context("Envelope is not valid JSON")?;
        if envelope.action != action {
            bail!(
                "envelope is for '{}' but the worker was started for '{}'",
                envelope.action,
                action
            );
        }
        Ok(envelope)
    }
}

/// Interactive client CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "growth", about = "Talk to the growth consultant from the terminal")]
pub struct ClientArgs {
    /// Worker binary (default: growth-worker next to this executable)
    #[arg(long)]
    pub worker: Option<PathBuf>,

    /// Override the analysis budget in seconds
    #[arg(long)]
    pub analyze_timeout: Option<u64>,
}

impl ClientArgs {
    pub fn validate(&self) -> Result<()> {
        if let Some(worker) = &self.worker {
            if !worker.is_file() {
                bail!("worker binary not found: {}", worker.display());
            }
        }
        if self.analyze_timeout == Some(0) {
            bail!("--analyze-timeout must be positive");
        }
        Ok(())
    }
}
