//! Client side of the process boundary
//!
//! [`ProcessBoundary`] runs one worker process per action. The request
//! envelope goes through a temporary file, frames come back on stdout and
//! worker diagnostics on stderr are forwarded to `tracing`.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;

use growth_sdk::{async_trait, Action, BoundaryError, Envelope, ErrorKind, Frame, GrowthRuntime};

use crate::text::preview;

/// Characters of raw output kept when reporting malformed output
pub const PREVIEW_CHARS: usize = 500;

/// Program (plus leading arguments) that runs one action
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The `growth-worker` binary installed next to the running executable
    pub fn sibling_worker() -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        let dir = exe.parent().map(PathBuf::from).unwrap_or_default();
        Ok(Self::new(dir.join(format!("growth-worker{}", std::env::consts::EXE_SUFFIX))))
    }
}

/// Process-based [`GrowthRuntime`]
pub struct ProcessBoundary {
    command: WorkerCommand,
    timeouts: HashMap<Action, Duration>,
}

impl ProcessBoundary {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            timeouts: HashMap::new(),
        }
    }

    /// Override the catalogue budget for one action
    pub fn with_timeout(mut self, action: Action, budget: Duration) -> Self {
        self.timeouts.insert(action, budget);
        self
    }

    fn budget(&self, action: Action) -> Duration {
        self.timeouts
            .get(&action)
            .copied()
            .unwrap_or_else(|| action.timeout())
    }

    async fn invoke(
        &self,
        action: Action,
        payload: Value,
        events: Option<&UnboundedSender<Frame>>,
    ) -> Result<Value, BoundaryError> {
        // Nothing is written or spawned for an invalid payload
        action.validate(&payload)?;

        let budget = self.budget(action);
        match tokio::time::timeout(budget, self.run(action, payload, events)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!("{} exceeded its {:?} budget, worker killed", action, budget);
                Err(BoundaryError::Timeout { action, budget })
            }
        }
    }

    async fn run(
        &self,
        action: Action,
        payload: Value,
        events: Option<&UnboundedSender<Frame>>,
    ) -> Result<Value, BoundaryError> {
        let envelope = Envelope::new(action, payload);
        let request_id = envelope.request_id;

        let mut file = tempfile::Builder::new()
            .prefix("growth-envelope-")
            .suffix(".json")
            .tempfile()?;
        serde_json::to_writer(&mut file, &envelope).map_err(std::io::Error::from)?;
        file.flush()?;
        // Deleted when this future completes or is dropped
        let envelope_path = file.into_temp_path();

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .arg("--action")
            .arg(action.as_str())
            .arg("--input-file")
            .arg(envelope_path.as_os_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(BoundaryError::Spawn)?;
        tracing::debug!("spawned worker for {} ({})", action, request_id);

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "growth_worker", "{}", line);
                }
            });
        }

        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdout unavailable")
        })?;

        let mut collector = OutputCollector::new(action);
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(thought) = collector.push_line(&line) {
                if let Some(events) = events {
                    let _ = events.send(thought);
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            tracing::debug!("worker for {} exited with {}", action, status);
        }

        let outcome = collector.finish();
        drop(envelope_path);
        outcome
    }
}

#[async_trait]
impl GrowthRuntime for ProcessBoundary {
    async fn call(&self, action: Action, payload: Value) -> Result<Value, BoundaryError> {
        self.invoke(action, payload, None).await
    }

    async fn call_streamed(
        &self,
        action: Action,
        payload: Value,
        events: UnboundedSender<Frame>,
    ) -> Result<Value, BoundaryError> {
        self.invoke(action, payload, Some(&events)).await
    }
}

/// Accumulates worker stdout and decides the outcome of one call
#[derive(Debug)]
pub struct OutputCollector {
    action: Action,
    terminal: Option<Frame>,
    unframed: Vec<String>,
}

impl OutputCollector {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            terminal: None,
            unframed: Vec::new(),
        }
    }

    /// Feed one stdout line; returns a `thought` frame to forward
    pub fn push_line(&mut self, line: &str) -> Option<Frame> {
        match Frame::decode(line) {
            None => {
                self.unframed.push(line.to_string());
                None
            }
            Some(Err(e)) => {
                tracing::warn!("dropping unreadable frame from {} worker: {}", self.action, e);
                None
            }
            Some(Ok(frame)) if frame.is_terminal() => {
                if self.terminal.is_some() {
                    tracing::warn!("{} worker sent a second terminal frame, ignoring it", self.action);
                } else {
                    self.terminal = Some(frame);
                }
                None
            }
            Some(Ok(thought)) => Some(thought),
        }
    }

    /// The terminal payload, the legacy fallback object, or `MalformedOutput`
    pub fn finish(self) -> Result<Value, BoundaryError> {
        let action = self.action;
        match self.terminal {
            Some(Frame::Result { marker, payload }) if marker == action.marker() => Ok(payload),
            Some(Frame::Result { marker, .. }) => Err(BoundaryError::MalformedOutput {
                action,
                preview: format!("result frame carried marker {} instead of {}", marker, action.marker()),
            }),
            Some(Frame::Error { kind, message }) => Err(BoundaryError::Worker { action, kind, message }),
            Some(Frame::Thought { .. }) | None => match last_json_object(&self.unframed) {
                Some(payload) => {
                    tracing::warn!("{} worker sent no terminal frame, using its last JSON object", action);
                    legacy_outcome(action, payload)
                }
                None => {
                    let raw = self.unframed.join("\n");
                    let preview = preview(&raw, PREVIEW_CHARS);
                    tracing::warn!("malformed output from {} worker: {}", action, preview);
                    Err(BoundaryError::MalformedOutput { action, preview })
                }
            },
        }
    }
}

/// Unframed `{success: false, error}` objects are worker failures
fn legacy_outcome(action: Action, payload: Value) -> Result<Value, BoundaryError> {
    if payload.get("success").and_then(Value::as_bool) == Some(false) {
        let message = payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("worker reported failure")
            .to_string();
        return Err(BoundaryError::Worker {
            action,
            kind: ErrorKind::Worker,
            message,
        });
    }
    Ok(payload)
}

/// Last well-formed JSON object in unframed output
///
/// Single-line objects are tried first, newest first. After that, objects
/// spanning several lines are tried from each line that starts with `{`.
pub fn last_json_object(lines: &[String]) -> Option<Value> {
    let single = lines.iter().rev().find_map(|line| {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return None;
        }
        serde_json::from_str::<Value>(trimmed)
            .ok()
            .filter(Value::is_object)
    });
    if single.is_some() {
        return single;
    }

    (0..lines.len())
        .rev()
        .filter(|&start| lines[start].trim_start().starts_with('{'))
        .find_map(|start| {
            let joined = lines[start..].join("\n");
            let first = serde_json::Deserializer::from_str(&joined)
                .into_iter::<Value>()
                .next()?;
            first.ok().filter(Value::is_object)
        })
}
