//! Wire protocol shared by the growth orchestrator client and its worker process.
//!
//! Every request is one [`Action`] plus a JSON payload, wrapped in an [`Envelope`]
//! that travels to the worker through a temporary file. The worker answers on
//! stdout with newline-delimited [`Frame`]s, each line prefixed with
//! [`FRAME_PREFIX`]. Zero or more `thought` frames precede exactly one terminal
//! `result` or `error` frame.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

// Re-export async trait for convenience
pub use async_trait::async_trait;

/// Prefix marking a framed line on worker stdout
pub const FRAME_PREFIX: &str = "__GROWTH_FRAME__:";

// ============================================================================
// Action catalogue
// ============================================================================

/// Every operation the worker understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Profile,
    Analyze,
    Assist,
    Chat,
    DimensionChat,
    TaskChat,
    ExpandTask,
    SetTaskComplete,
    ListBusinesses,
    GetBusiness,
    CreateBusiness,
    DeleteBusiness,
    SaveAnalysis,
    ListAnalyses,
    Register,
    Login,
    Logout,
    ValidateSession,
}

impl Action {
    pub const ALL: [Action; 18] = [
        Action::Profile,
        Action::Analyze,
        Action::Assist,
        Action::Chat,
        Action::DimensionChat,
        Action::TaskChat,
        Action::ExpandTask,
        Action::SetTaskComplete,
        Action::ListBusinesses,
        Action::GetBusiness,
        Action::CreateBusiness,
        Action::DeleteBusiness,
        Action::SaveAnalysis,
        Action::ListAnalyses,
        Action::Register,
        Action::Login,
        Action::Logout,
        Action::ValidateSession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Profile => "profile",
            Action::Analyze => "analyze",
            Action::Assist => "assist",
            Action::Chat => "chat",
            Action::DimensionChat => "dimension-chat",
            Action::TaskChat => "task-chat",
            Action::ExpandTask => "expand-task",
            Action::SetTaskComplete => "set-task-complete",
            Action::ListBusinesses => "list-businesses",
            Action::GetBusiness => "get-business",
            Action::CreateBusiness => "create-business",
            Action::DeleteBusiness => "delete-business",
            Action::SaveAnalysis => "save-analysis",
            Action::ListAnalyses => "list-analyses",
            Action::Register => "register",
            Action::Login => "login",
            Action::Logout => "logout",
            Action::ValidateSession => "validate-session",
        }
    }

    /// Wall-clock budget for one invocation of this action
    pub fn timeout(&self) -> Duration {
        let secs = match self {
            Action::Analyze => 300,
            Action::Chat | Action::DimensionChat | Action::TaskChat => 120,
            Action::Profile | Action::Assist | Action::ExpandTask => 60,
            Action::Logout | Action::ValidateSession => 10,
            _ => 30,
        };
        Duration::from_secs(secs)
    }

    /// Marker carried by this action's result frame
    pub fn marker(&self) -> &'static str {
        match self {
            Action::Profile => "PROFILE_RESULT",
            Action::Analyze => "GROWTH_RESULT",
            Action::Assist => "ASSIST_RESULT",
            Action::Chat => "CHAT_RESULT",
            Action::DimensionChat => "DIMENSION_CHAT_RESULT",
            Action::TaskChat => "TASK_CHAT_RESULT",
            Action::ExpandTask => "EXPAND_TASK_RESULT",
            Action::SetTaskComplete => "SET_TASK_COMPLETE_RESULT",
            Action::ListBusinesses => "LIST_BUSINESSES_RESULT",
            Action::GetBusiness => "GET_BUSINESS_RESULT",
            Action::CreateBusiness => "CREATE_BUSINESS_RESULT",
            Action::DeleteBusiness => "DELETE_BUSINESS_RESULT",
            Action::SaveAnalysis => "SAVE_ANALYSIS_RESULT",
            Action::ListAnalyses => "LIST_ANALYSES_RESULT",
            Action::Register => "REGISTER_RESULT",
            Action::Login => "LOGIN_RESULT",
            Action::Logout => "LOGOUT_RESULT",
            Action::ValidateSession => "VALIDATE_SESSION_RESULT",
        }
    }

    /// Whether the worker emits `thought` frames before the terminal frame
    pub fn is_streamed(&self) -> bool {
        matches!(self, Action::Analyze)
    }

    /// Payload keys that must be present and non-empty before dispatch
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Action::Profile => &["onboardingData"],
            Action::Analyze => &["profile"],
            Action::Assist => &["task", "profile"],
            Action::Chat => &["messages"],
            Action::DimensionChat => &["analysis_id", "dimension", "message"],
            Action::TaskChat => &["plan_id", "task_id", "message"],
            Action::ExpandTask => &["plan_id", "task_id", "task_title"],
            Action::SetTaskComplete => &["plan_id", "task_id", "completed"],
            Action::ListBusinesses | Action::CreateBusiness => &["session_token"],
            Action::GetBusiness | Action::DeleteBusiness | Action::ListAnalyses => {
                &["session_token", "business_id"]
            }
            Action::SaveAnalysis => &["session_token", "business_id", "analysis"],
            Action::Register => &["email", "password", "name"],
            Action::Login => &["email", "password"],
            Action::Logout | Action::ValidateSession => &["session_token"],
        }
    }

    /// Reject a payload that is missing required fields
    ///
    /// Runs on the client before any temp file is written or process spawned.
    pub fn validate(&self, payload: &Value) -> Result<(), BoundaryError> {
        let object = payload.as_object().ok_or_else(|| BoundaryError::Input {
            action: *self,
            message: "payload must be a JSON object".to_string(),
        })?;

        let missing: Vec<&str> = self
            .required_fields()
            .iter()
            .copied()
            .filter(|field| match (*self, *field) {
                // An empty chat transcript is legal on the first turn
                (Action::Chat, "messages") => !object.get("messages").is_some_and(Value::is_array),
                _ => !is_present(object.get(*field)),
            })
            .collect();

        if !missing.is_empty() {
            return Err(BoundaryError::Input {
                action: *self,
                message: format!("missing required field(s): {}", missing.join(", ")),
            });
        }

        if *self == Action::SetTaskComplete && !object.get("completed").is_some_and(Value::is_boolean) {
            return Err(BoundaryError::Input {
                action: *self,
                message: "completed must be true or false".to_string(),
            });
        }

        if *self == Action::Analyze {
            let profile = object.get("profile").unwrap_or(&Value::Null);
            if !is_present(profile_segment(profile)) {
                return Err(BoundaryError::Input {
                    action: *self,
                    message: "profile is missing required field: segmento".to_string(),
                });
            }
        }

        Ok(())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown action '{0}'")]
pub struct UnknownAction(pub String);

/// `segmento` may sit at the top of the profile or inside its `perfil` block
fn profile_segment(profile: &Value) -> Option<&Value> {
    profile
        .get("perfil")
        .and_then(|perfil| perfil.get("segmento"))
        .filter(|value| is_present(Some(*value)))
        .or_else(|| profile.get("segmento"))
}

fn is_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(_) => true,
    }
}

// ============================================================================
// Envelope and frames
// ============================================================================

/// Request body handed to the worker through a temporary file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub request_id: Uuid,
    pub action: Action,
    pub payload: Value,
    pub sent_at: DateTime<Utc>,
}

impl Envelope {
    pub fn new(action: Action, payload: Value) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            action,
            payload,
            sent_at: Utc::now(),
        }
    }
}

/// Failure categories shared by worker error frames and client errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid payload field
    Input,
    /// A phase or action exceeded its budget
    Timeout,
    /// No parseable result in worker output
    MalformedOutput,
    /// Business-level failure inside the worker
    Worker,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Input => "input",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MalformedOutput => "malformed_output",
            ErrorKind::Worker => "worker",
        };
        f.write_str(s)
    }
}

/// One line of worker output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Human-readable progress line
    Thought {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        phase: Option<u8>,
    },
    /// Terminal success payload
    Result { marker: String, payload: Value },
    /// Terminal failure
    Error { kind: ErrorKind, message: String },
}

impl Frame {
    /// Build the success frame for `action`, stamping `success: true` on object payloads
    pub fn result(action: Action, mut payload: Value) -> Self {
        if let Value::Object(map) = &mut payload {
            map.insert("success".to_string(), Value::Bool(true));
        }
        Frame::Result {
            marker: action.marker().to_string(),
            payload,
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Frame::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Thought { .. })
    }

    /// Serialize to one prefixed line (without the trailing newline)
    pub fn encode(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => format!("{}{}", FRAME_PREFIX, json),
            Err(e) => format!(
                "{}{{\"type\":\"error\",\"kind\":\"worker\",\"message\":\"frame encoding failed: {}\"}}",
                FRAME_PREFIX,
                e.to_string().replace('"', "'")
            ),
        }
    }

    /// Parse a line of worker output
    ///
    /// Returns `None` for unframed lines, `Some(Err)` for a framed line whose JSON is broken.
    pub fn decode(line: &str) -> Option<Result<Frame, serde_json::Error>> {
        line.trim_end()
            .strip_prefix(FRAME_PREFIX)
            .map(serde_json::from_str::<Frame>)
    }

    /// Write this frame to stdout for the client to parse
    pub fn emit(&self) {
        use std::io::Write;
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", self.encode());
        // Force flush so streamed thoughts reach the client immediately
        let _ = stdout.flush();
    }
}

/// Destination for frames produced while an action runs
pub trait FrameSink: Send + Sync {
    fn push(&self, frame: Frame);
}

/// Sink used by the worker binary
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl FrameSink for StdoutSink {
    fn push(&self, frame: Frame) {
        frame.emit();
    }
}

impl FrameSink for tokio::sync::mpsc::UnboundedSender<Frame> {
    fn push(&self, frame: Frame) {
        let _ = self.send(frame);
    }
}

/// Emit a `thought` frame to a sink
#[macro_export]
macro_rules! emit_thought {
    ($sink:expr, $phase:expr, $($arg:tt)*) => {
        $crate::FrameSink::push(
            $sink,
            $crate::Frame::Thought {
                message: format!($($arg)*),
                phase: Some($phase),
            },
        )
    };
}

/// Emit the terminal `result` frame for an action
#[macro_export]
macro_rules! emit_result {
    ($sink:expr, $action:expr, $payload:expr) => {
        $crate::FrameSink::push($sink, $crate::Frame::result($action, $payload))
    };
}

/// Emit the terminal `error` frame
#[macro_export]
macro_rules! emit_error {
    ($sink:expr, $kind:expr, $($arg:tt)*) => {
        $crate::FrameSink::push($sink, $crate::Frame::error($kind, format!($($arg)*)))
    };
}

// ============================================================================
// Client-side errors and runtime seam
// ============================================================================

/// Everything that can go wrong submitting one action
#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    #[error("invalid input for '{action}': {message}")]
    Input { action: Action, message: String },

    #[error("'{action}' exceeded its {budget:?} budget")]
    Timeout { action: Action, budget: Duration },

    #[error("malformed output from '{action}' worker: {preview}")]
    MalformedOutput { action: Action, preview: String },

    #[error("'{action}' failed ({kind}): {message}")]
    Worker {
        action: Action,
        kind: ErrorKind,
        message: String,
    },

    #[error("failed to launch worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

impl BoundaryError {
    /// Category the caller uses to decide between "retry" and "fix input"
    pub fn kind(&self) -> ErrorKind {
        match self {
            BoundaryError::Input { .. } => ErrorKind::Input,
            BoundaryError::Timeout { .. } => ErrorKind::Timeout,
            BoundaryError::MalformedOutput { .. } => ErrorKind::MalformedOutput,
            BoundaryError::Worker { kind, .. } => *kind,
            BoundaryError::Spawn(_) | BoundaryError::Io(_) => ErrorKind::Worker,
        }
    }
}

/// Submits actions to a worker and returns their terminal payloads
#[async_trait]
pub trait GrowthRuntime: Send + Sync {
    /// Run a non-streamed action
    async fn call(&self, action: Action, payload: Value) -> Result<Value, BoundaryError>;

    /// Run an action, forwarding every `thought` frame to `events` as it arrives
    async fn call_streamed(
        &self,
        action: Action,
        payload: Value,
        events: tokio::sync::mpsc::UnboundedSender<Frame>,
    ) -> Result<Value, BoundaryError>;
}

// ============================================================================
// Console Logging Macros (for the interactive client)
// ============================================================================
// Colored console output for humans, complementing the structured frames.
// ============================================================================

/// Logs the start of an orchestrator phase.
///
/// Outputs:
/// ```text
/// ═══ PHASE 2: Market research ═══
/// Searching sources per dimension
/// ```
#[macro_export]
macro_rules! log_phase_start_console {
    ($phase:expr, $title:expr, $description:expr) => {
        println!("\x1b[1;36m═══ PHASE {}: {} ═══\x1b[0m", $phase, $title);
        println!("\x1b[36m{}\x1b[0m", $description);
    };
}

/// Logs the completion of an orchestrator phase.
#[macro_export]
macro_rules! log_phase_complete_console {
    ($phase:expr) => {
        println!("\x1b[32m✓ Phase {} complete\x1b[0m", $phase);
    };
}

/// Logs the number of items found.
///
/// Outputs:
/// ```text
/// Found 3 businesses
/// ```
#[macro_export]
macro_rules! log_found {
    ($count:expr, $item_type:expr) => {
        println!("\x1b[36mFound {} {}\x1b[0m", $count, $item_type);
    };
}

/// Logs an informational message.
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message.
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a debug message (intended to be used conditionally).
#[macro_export]
macro_rules! log_debug {
    ($message:expr) => {
        println!("\x1b[2m[DEBUG] {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[2m[DEBUG] {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

// ============================================================================
// End of Console Logging Macros
// ============================================================================
