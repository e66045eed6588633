//! Client session controller
//!
//! One [`SessionController`] owns everything the interactive client knows:
//! the login, the selected business, the dialogue, the latest analysis and
//! the scoped transcripts. Views borrow only the slice they render.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

use growth_sdk::{Action, BoundaryError, Frame, GrowthRuntime};

use crate::chat::ChatMessage;
use crate::database::{Business, TaskCompletion, UserRecord};
use crate::dialogue::{DialogueState, DialogueTurn, PendingResearch, ProfileField};
use crate::expansion::{AssistOutput, TaskDetail};
use crate::pipeline::{Analysis, Dimension, DimensionScore, Task};

#[derive(Debug, Default)]
pub struct SessionState {
    pub session_token: Option<String>,
    pub user: Option<UserRecord>,
    pub selected_business: Option<Business>,
    pub dialogue: DialogueState,
    pub latest_analysis: Option<Analysis>,
    /// Profile of the last analysis that completed
    pub last_good_profile: Option<Value>,
    pub selected_dimension: Option<Dimension>,
    pub selected_task: Option<String>,
    pub task_details: HashMap<(String, String), TaskDetail>,
    pub task_completions: HashMap<(String, String), TaskCompletion>,
    pub task_transcripts: HashMap<(String, String), Vec<ChatMessage>>,
    pub dimension_transcripts: HashMap<(String, Dimension), Vec<ChatMessage>>,
}

/// What the dialogue screen renders
#[derive(Debug)]
pub struct DialogueView<'a> {
    pub messages: &'a [ChatMessage],
    pub fields_missing: &'a [ProfileField],
    pub ready_for_analysis: bool,
    pub pending_research: Option<&'a PendingResearch>,
}

/// What the task screen renders
#[derive(Debug)]
pub struct TaskView<'a> {
    pub plan_id: &'a str,
    pub task: &'a Task,
    pub detail: Option<&'a TaskDetail>,
    pub completion: Option<&'a TaskCompletion>,
    pub transcript: &'a [ChatMessage],
}

#[derive(Debug)]
pub struct DimensionView<'a> {
    pub score: &'a DimensionScore,
    pub tasks: Vec<&'a Task>,
    pub transcript: &'a [ChatMessage],
}

/// How an analysis request ended
#[derive(Debug)]
pub enum AnalysisOutcome {
    Completed(Box<Analysis>),
    Failed(BoundaryError),
    /// The worker vanished before a terminal frame; `recovered` is what the
    /// store held afterwards, if it holds something newer
    Unknown {
        error: BoundaryError,
        recovered: Option<Box<Analysis>>,
    },
}

/// No terminal frame arrived, so the run may or may not have finished
fn is_transport_drop(error: &BoundaryError) -> bool {
    matches!(error, BoundaryError::Io(_) | BoundaryError::MalformedOutput { .. })
}

pub struct SessionController {
    runtime: Arc<dyn GrowthRuntime>,
    state: SessionState,
}

impl SessionController {
    pub fn new(runtime: Arc<dyn GrowthRuntime>) -> Self {
        Self {
            runtime,
            state: SessionState::default(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn token(&self) -> Result<&str> {
        self.state
            .session_token
            .as_deref()
            .ok_or_else(|| anyhow!("not logged in"))
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub fn dialogue_view(&self) -> DialogueView<'_> {
        let dialogue = &self.state.dialogue;
        DialogueView {
            messages: &dialogue.messages,
            fields_missing: &dialogue.fields_missing,
            ready_for_analysis: dialogue.ready_for_analysis,
            pending_research: dialogue.pending_research.as_ref(),
        }
    }

    pub fn task_view(&self) -> Option<TaskView<'_>> {
        let analysis = self.state.latest_analysis.as_ref()?;
        let task = analysis.task(self.state.selected_task.as_deref()?)?;
        let key = (analysis.plan_id().to_string(), task.id.clone());
        Some(TaskView {
            plan_id: analysis.plan_id(),
            task,
            detail: self.state.task_details.get(&key),
            completion: self.state.task_completions.get(&key),
            transcript: self
                .state
                .task_transcripts
                .get(&key)
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        })
    }

    pub fn dimension_view(&self) -> Option<DimensionView<'_>> {
        let analysis = self.state.latest_analysis.as_ref()?;
        let dimension = self.state.selected_dimension?;
        Some(DimensionView {
            score: analysis.score.dimension(dimension)?,
            tasks: analysis.tasks_in(dimension).collect(),
            transcript: self
                .state
                .dimension_transcripts
                .get(&(analysis.id.clone(), dimension))
                .map(Vec::as_slice)
                .unwrap_or(&[]),
        })
    }

    // ========================================================================
    // Account and businesses
    // ========================================================================

    fn accept_grant(&mut self, grant: Value) -> Result<()> {
        let token = grant
            .get("session_token")
            .and_then(Value::as_str)
            .context("login response has no session_token")?;
        let user: UserRecord = serde_json::from_value(grant.get("user").cloned().unwrap_or(Value::Null))
            .context("login response has no user")?;
        self.state = SessionState {
            session_token: Some(token.to_string()),
            user: Some(user),
            ..SessionState::default()
        };
        Ok(())
    }

    pub async fn register(&mut self, email: &str, password: &str, name: &str) -> Result<()> {
        let grant = self
            .runtime
            .call(
                Action::Register,
                json!({ "email": email, "password": password, "name": name }),
            )
            .await?;
        self.accept_grant(grant)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<()> {
        let grant = self
            .runtime
            .call(Action::Login, json!({ "email": email, "password": password }))
            .await?;
        self.accept_grant(grant)
    }

    pub async fn logout(&mut self) -> Result<()> {
        if let Some(token) = self.state.session_token.clone() {
            self.runtime
                .call(Action::Logout, json!({ "session_token": token }))
                .await?;
        }
        self.state = SessionState::default();
        Ok(())
    }

    pub async fn list_businesses(&self) -> Result<Vec<Business>> {
        let response = self
            .runtime
            .call(Action::ListBusinesses, json!({ "session_token": self.token()? }))
            .await?;
        Ok(serde_json::from_value(
            response.get("businesses").cloned().unwrap_or(Value::Null),
        )?)
    }

    pub async fn create_business(&mut self, name: &str) -> Result<Business> {
        let profile = serde_json::to_value(&self.state.dialogue.extracted_profile)?;
        let response = self
            .runtime
            .call(
                Action::CreateBusiness,
                json!({ "session_token": self.token()?, "name": name, "profile": profile }),
            )
            .await?;
        let business: Business =
            serde_json::from_value(response.get("business").cloned().unwrap_or(Value::Null))?;
        self.state.selected_business = Some(business.clone());
        Ok(business)
    }

    /// Load a business and its latest analysis; returns that analysis
    pub async fn select_business(&mut self, business_id: &str) -> Result<Option<Analysis>> {
        let response = self
            .runtime
            .call(
                Action::GetBusiness,
                json!({ "session_token": self.token()?, "business_id": business_id }),
            )
            .await?;
        let business: Business =
            serde_json::from_value(response.get("business").cloned().unwrap_or(Value::Null))?;
        let latest: Option<Analysis> =
            serde_json::from_value(response.get("latest_analysis").cloned().unwrap_or(Value::Null))?;

        if let Some(analysis) = &latest {
            self.state.last_good_profile = Some(serde_json::to_value(&analysis.profile.perfil)?);
        }
        self.state.selected_business = Some(business);
        self.state.latest_analysis = latest.clone();
        self.state.selected_dimension = None;
        self.state.selected_task = None;
        Ok(latest)
    }

    pub async fn delete_selected_business(&mut self) -> Result<()> {
        let business = self
            .state
            .selected_business
            .take()
            .context("no business selected")?;
        self.runtime
            .call(
                Action::DeleteBusiness,
                json!({ "session_token": self.token()?, "business_id": business.id }),
            )
            .await?;
        self.state.latest_analysis = None;
        Ok(())
    }

    // ========================================================================
    // Dialogue and analysis
    // ========================================================================

    /// One dialogue turn; on failure the dialogue is left as it was
    pub async fn send_message(&mut self, message: &str) -> Result<String> {
        let payload = json!({
            "messages": self.state.dialogue.messages,
            "message": message,
            "state": self.state.dialogue,
        });
        let response = self.runtime.call(Action::Chat, payload).await?;
        let turn: DialogueTurn = serde_json::from_value(response)?;
        self.state.dialogue = turn.state;
        Ok(turn.reply)
    }

    /// Analyze the profile collected by the dialogue
    pub async fn analyze(&mut self, events: UnboundedSender<Frame>) -> Result<AnalysisOutcome> {
        let profile = serde_json::to_value(&self.state.dialogue.extracted_profile)?;
        Ok(self.submit_analysis(profile, events).await)
    }

    /// Re-run the pipeline on the last profile that produced an analysis
    ///
    /// The dialogue is not touched and nothing is asked again.
    pub async fn redo_analysis(&mut self, events: UnboundedSender<Frame>) -> Result<AnalysisOutcome> {
        let profile = self
            .state
            .last_good_profile
            .clone()
            .context("no completed analysis to redo")?;
        Ok(self.submit_analysis(profile, events).await)
    }

    async fn submit_analysis(&mut self, profile: Value, events: UnboundedSender<Frame>) -> AnalysisOutcome {
        let mut payload = json!({ "profile": profile });
        if let (Some(business), Some(token)) = (&self.state.selected_business, &self.state.session_token) {
            payload["business_id"] = json!(business.id);
            payload["session_token"] = json!(token);
        }

        match self.runtime.call_streamed(Action::Analyze, payload, events).await {
            Ok(response) => {
                match serde_json::from_value::<Analysis>(response.get("analysis").cloned().unwrap_or(Value::Null)) {
                    Ok(analysis) => {
                        self.state.last_good_profile = Some(profile);
                        self.adopt_analysis(analysis.clone());
                        AnalysisOutcome::Completed(Box::new(analysis))
                    }
                    Err(e) => AnalysisOutcome::Failed(BoundaryError::MalformedOutput {
                        action: Action::Analyze,
                        preview: format!("analysis payload did not parse: {}", e),
                    }),
                }
            }
            Err(error) if is_transport_drop(&error) => {
                tracing::warn!("analysis outcome unknown ({}), re-querying the store", error);
                let recovered = self.recover_latest().await;
                AnalysisOutcome::Unknown {
                    error,
                    recovered: recovered.map(Box::new),
                }
            }
            Err(error) => AnalysisOutcome::Failed(error),
        }
    }

    /// A newer stored analysis than the one we hold, if any
    async fn recover_latest(&mut self) -> Option<Analysis> {
        let business_id = self.state.selected_business.as_ref()?.id.clone();
        let token = self.state.session_token.clone()?;
        let response = match self
            .runtime
            .call(
                Action::GetBusiness,
                json!({ "session_token": token, "business_id": business_id }),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("could not re-query business {}: {}", business_id, e);
                return None;
            }
        };
        let stored: Analysis = serde_json::from_value(response.get("latest_analysis")?.clone()).ok()?;
        let known = self.state.latest_analysis.as_ref().map(|a| a.id.as_str());
        if known == Some(stored.id.as_str()) {
            return None;
        }
        self.state.last_good_profile = serde_json::to_value(&stored.profile.perfil).ok();
        self.adopt_analysis(stored.clone());
        Some(stored)
    }

    fn adopt_analysis(&mut self, analysis: Analysis) {
        self.state.latest_analysis = Some(analysis);
        self.state.selected_dimension = None;
        self.state.selected_task = None;
    }

    // ========================================================================
    // Drill-down
    // ========================================================================

    pub fn select_dimension(&mut self, dimension: Dimension) {
        self.state.selected_dimension = Some(dimension);
    }

    pub fn select_task(&mut self, task_id: &str) -> Result<()> {
        let analysis = self.state.latest_analysis.as_ref().context("no analysis yet")?;
        analysis
            .task(task_id)
            .with_context(|| format!("unknown task {}", task_id))?;
        self.state.selected_task = Some(task_id.to_string());
        Ok(())
    }

    fn selected(&self) -> Result<(&Analysis, &Task)> {
        let analysis = self.state.latest_analysis.as_ref().context("no analysis yet")?;
        let task_id = self.state.selected_task.as_deref().context("no task selected")?;
        let task = analysis
            .task(task_id)
            .with_context(|| format!("unknown task {}", task_id))?;
        Ok((analysis, task))
    }

    pub async fn expand_selected_task(&mut self) -> Result<TaskDetail> {
        let (analysis, task) = self.selected()?;
        let payload = json!({
            "plan_id": analysis.plan_id(),
            "task_id": task.id,
            "task_title": task.title,
            "category": task.category.key(),
            "profile": { "perfil": analysis.profile.perfil },
            "plan_context": analysis.execution_plan,
        });
        let key = (analysis.plan_id().to_string(), task.id.clone());

        let response = self.runtime.call(Action::ExpandTask, payload).await?;
        let detail: TaskDetail =
            serde_json::from_value(response.get("detail").cloned().unwrap_or(Value::Null))?;
        if let Some(completion) = response.get("completion") {
            let completion: TaskCompletion = serde_json::from_value(completion.clone())?;
            self.state.task_completions.insert(key.clone(), completion);
        }
        self.state.task_details.insert(key, detail.clone());
        Ok(detail)
    }

    /// Mark the selected task, or one of its subtasks, done or not done
    pub async fn mark_selected_task(&mut self, subtask_id: Option<&str>, completed: bool) -> Result<TaskCompletion> {
        let (analysis, task) = self.selected()?;
        let mut payload = json!({
            "plan_id": analysis.plan_id(),
            "task_id": task.id,
            "completed": completed,
        });
        if let Some(subtask_id) = subtask_id {
            payload["subtask_id"] = json!(subtask_id);
        }
        let key = (analysis.plan_id().to_string(), task.id.clone());

        let response = self.runtime.call(Action::SetTaskComplete, payload).await?;
        let completion: TaskCompletion =
            serde_json::from_value(response.get("completion").cloned().unwrap_or(Value::Null))?;
        self.state.task_completions.insert(key, completion.clone());
        Ok(completion)
    }

    pub async fn ask_about_task(&mut self, message: &str) -> Result<ChatMessage> {
        let (analysis, task) = self.selected()?;
        let payload = json!({
            "plan_id": analysis.plan_id(),
            "task_id": task.id,
            "task_title": task.title,
            "message": message,
            "profile": { "perfil": analysis.profile.perfil },
        });
        let key = (analysis.plan_id().to_string(), task.id.clone());

        let response = self.runtime.call(Action::TaskChat, payload).await?;
        let reply: ChatMessage =
            serde_json::from_value(response.get("message").cloned().unwrap_or(Value::Null))?;
        let transcript = self.state.task_transcripts.entry(key).or_default();
        transcript.push(ChatMessage::user(message));
        transcript.push(reply.clone());
        Ok(reply)
    }

    pub async fn ask_about_dimension(&mut self, message: &str) -> Result<ChatMessage> {
        let analysis = self.state.latest_analysis.as_ref().context("no analysis yet")?;
        let dimension = self.state.selected_dimension.context("no dimension selected")?;
        let payload = json!({
            "analysis_id": analysis.id,
            "dimension": dimension.key(),
            "message": message,
            "analysis": analysis,
        });
        let key = (analysis.id.clone(), dimension);

        let response = self.runtime.call(Action::DimensionChat, payload).await?;
        let reply: ChatMessage =
            serde_json::from_value(response.get("message").cloned().unwrap_or(Value::Null))?;
        let transcript = self.state.dimension_transcripts.entry(key).or_default();
        transcript.push(ChatMessage::user(message));
        transcript.push(reply.clone());
        Ok(reply)
    }

    pub async fn assist_selected_task(&self) -> Result<AssistOutput> {
        let (analysis, task) = self.selected()?;
        let payload = json!({
            "task": task,
            "profile": { "perfil": analysis.profile.perfil },
        });
        let response = self.runtime.call(Action::Assist, payload).await?;
        Ok(serde_json::from_value(response)?)
    }
}
