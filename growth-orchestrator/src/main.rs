/*
┌─────────────────────────────────────────────────────────────────────────────┐
│                            GROWTH WORKER                                     │
└─────────────────────────────────────────────────────────────────────────────┘

  growth-worker --action <action> --input-file <envelope.json>

  One process per action. Reads the envelope, runs the action and writes
  frames to stdout:

    __GROWTH_FRAME__:{"type":"thought","message":"...","phase":2}
    __GROWTH_FRAME__:{"type":"result","marker":"GROWTH_RESULT","payload":{...}}

  Diagnostics go to stderr through tracing (GROWTH_LOG=debug for more).
*/

use clap::Parser;
use tracing_subscriber::EnvFilter;

use growth_orchestrator::cli::WorkerArgs;
use growth_orchestrator::config::Settings;
use growth_orchestrator::database::Database;
use growth_orchestrator::providers::Capabilities;
use growth_orchestrator::worker::WorkerContext;
use growth_sdk::{emit_error, ErrorKind, StdoutSink};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GROWTH_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = WorkerArgs::parse();
    let sink = StdoutSink;

    let envelope = match args.read_envelope() {
        Ok(envelope) => envelope,
        Err(e) => {
            emit_error!(&sink, ErrorKind::Input, "{:#}", e);
            std::process::exit(2);
        }
    };
    tracing::info!("request {} ({})", envelope.request_id, envelope.action);

    let context = match build_context() {
        Ok(context) => context,
        Err(e) => {
            emit_error!(&sink, ErrorKind::Worker, "worker setup failed: {:#}", e);
            std::process::exit(1);
        }
    };

    if !context.dispatch(envelope.action, envelope.payload, &sink).await {
        std::process::exit(1);
    }
}

fn build_context() -> anyhow::Result<WorkerContext> {
    let settings = Settings::load()?;
    let db = Database::open(settings.database_path.clone())?;
    let caps = Capabilities::from_settings(&settings)?;
    Ok(WorkerContext::new(db, caps, settings))
}
