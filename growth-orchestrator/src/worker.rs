//! Worker-side dispatch: one envelope in, frames out
//!
//! The worker is stateless between calls. Every action reads what it needs
//! from its payload or the store, runs, and finishes with exactly one
//! terminal frame.

use serde::Deserialize;
use serde_json::{json, Value};

use growth_sdk::{emit_error, emit_result, Action, FrameSink};

use crate::auth::Auth;
use crate::chat::ChatMessage;
use crate::config::Settings;
use crate::database::{Database, UserRecord};
use crate::dialogue::{DialogueEngine, DialogueState, ProfileField};
use crate::error::ActionError;
use crate::expansion::{self, ExpandRequest, TaskChatRequest};
use crate::pipeline::profile::formalize;
use crate::pipeline::{merge_profile_sources, run_analysis, Analysis, AnalyzeRequest, Dimension, ProfileSources};
use crate::providers::Capabilities;

/// Everything an action may touch
pub struct WorkerContext {
    pub db: Database,
    pub caps: Capabilities,
    pub settings: Settings,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    state: Option<DialogueState>,
}

#[derive(Debug, Deserialize)]
struct DimensionChatRequest {
    analysis_id: String,
    dimension: String,
    message: String,
    #[serde(default)]
    analysis: Option<Analysis>,
}

#[derive(Debug, Deserialize)]
struct CreateBusinessRequest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    profile: Value,
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Result<&'a str, ActionError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ActionError::input(format!("{} must be a non-empty string", key)))
}

impl WorkerContext {
    pub fn new(db: Database, caps: Capabilities, settings: Settings) -> Self {
        Self { db, caps, settings }
    }

    fn auth(&self) -> Auth<'_> {
        Auth::new(&self.db, self.settings.session_ttl_days)
    }

    fn user(&self, payload: &Value) -> Result<UserRecord, ActionError> {
        let token = str_field(payload, "session_token")?;
        Ok(self.auth().validate_session(token)?)
    }

    /// Run `action` and push its terminal frame; returns whether it succeeded
    pub async fn dispatch(&self, action: Action, payload: Value, sink: &dyn FrameSink) -> bool {
        tracing::info!("dispatching {}", action);
        match self.handle(action, payload, sink).await {
            Ok(result) => {
                emit_result!(sink, action, result);
                true
            }
            Err(e) => {
                tracing::error!("{} failed ({}): {:#}", action, e.kind(), e);
                emit_error!(sink, e.kind(), "{:#}", e);
                false
            }
        }
    }

    async fn handle(&self, action: Action, payload: Value, sink: &dyn FrameSink) -> Result<Value, ActionError> {
        action
            .validate(&payload)
            .map_err(|e| ActionError::input(e.to_string()))?;

        match action {
            Action::Profile => self.profile(&payload).await,
            Action::Analyze => self.analyze(payload, sink).await,
            Action::Assist => {
                let profile = expansion::profile_from_value(payload.get("profile").unwrap_or(&Value::Null));
                let task = payload.get("task").unwrap_or(&Value::Null);
                let output = expansion::generate_assist(&self.caps, task, &profile).await?;
                Ok(serde_json::to_value(output).map_err(anyhow::Error::from)?)
            }
            Action::Chat => self.chat(payload).await,
            Action::DimensionChat => self.dimension_chat(payload).await,
            Action::TaskChat => {
                let request: TaskChatRequest = serde_json::from_value(payload)?;
                if request.message.trim().is_empty() {
                    return Err(ActionError::input("message must not be empty"));
                }
                let reply = expansion::task_chat(&self.db, &self.caps, &request).await?;
                Ok(json!({ "message": reply }))
            }
            Action::ExpandTask => {
                let request: ExpandRequest = serde_json::from_value(payload)?;
                let expansion = expansion::expand_task(&self.db, &self.caps, &request).await?;
                Ok(json!({
                    "detail": expansion.detail,
                    "cached": expansion.cached,
                    "completion": expansion.completion
                }))
            }
            Action::SetTaskComplete => self.set_task_complete(&payload),
            Action::ListBusinesses => {
                let user = self.user(&payload)?;
                Ok(json!({ "businesses": self.db.list_businesses(&user.id)? }))
            }
            Action::GetBusiness => {
                let user = self.user(&payload)?;
                let id = str_field(&payload, "business_id")?;
                let business = self
                    .db
                    .get_business(id, &user.id)?
                    .ok_or_else(|| ActionError::input(format!("business {} not found", id)))?;
                let latest = self.db.latest_analysis(&business.id)?;
                Ok(json!({ "business": business, "latest_analysis": latest }))
            }
            Action::CreateBusiness => {
                let user = self.user(&payload)?;
                let request: CreateBusinessRequest = serde_json::from_value(payload)?;
                let name = request
                    .name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| {
                        let profile = expansion::profile_from_value(&request.profile);
                        let name = profile.field(ProfileField::BusinessName);
                        if name.is_empty() { "Meu negócio".to_string() } else { name }
                    });
                let profile = if request.profile.is_null() { json!({}) } else { request.profile };
                let business = self.db.create_business(&user.id, name.trim(), &profile)?;
                Ok(json!({ "business": business }))
            }
            Action::DeleteBusiness => {
                let user = self.user(&payload)?;
                let id = str_field(&payload, "business_id")?;
                if !self.db.soft_delete_business(id, &user.id)? {
                    return Err(ActionError::input(format!("business {} not found", id)));
                }
                Ok(json!({ "deleted": true }))
            }
            Action::SaveAnalysis => {
                let user = self.user(&payload)?;
                let id = str_field(&payload, "business_id")?.to_string();
                self.owned_business(&id, &user)?;
                let mut analysis: Analysis =
                    serde_json::from_value(payload.get("analysis").cloned().unwrap_or(Value::Null))?;
                analysis.business_id = Some(id.clone());
                self.db.save_analysis(&id, &analysis)?;
                Ok(json!({ "analysis_id": analysis.id }))
            }
            Action::ListAnalyses => {
                let user = self.user(&payload)?;
                let id = str_field(&payload, "business_id")?;
                self.owned_business(id, &user)?;
                Ok(json!({ "analyses": self.db.list_analyses(id)? }))
            }
            Action::Register => {
                let grant = self.auth().register(
                    str_field(&payload, "email")?,
                    str_field(&payload, "password")?,
                    str_field(&payload, "name")?,
                )?;
                Ok(serde_json::to_value(grant).map_err(anyhow::Error::from)?)
            }
            Action::Login => {
                let grant = self
                    .auth()
                    .login(str_field(&payload, "email")?, str_field(&payload, "password")?)?;
                Ok(serde_json::to_value(grant).map_err(anyhow::Error::from)?)
            }
            Action::Logout => {
                self.auth().logout(str_field(&payload, "session_token")?)?;
                Ok(json!({ "logged_out": true }))
            }
            Action::ValidateSession => Ok(json!({ "user": self.user(&payload)? })),
        }
    }

    fn set_task_complete(&self, payload: &Value) -> Result<Value, ActionError> {
        let plan_id = str_field(payload, "plan_id")?;
        let task_id = str_field(payload, "task_id")?;
        let completed = payload
            .get("completed")
            .and_then(Value::as_bool)
            .ok_or_else(|| ActionError::input("completed must be true or false"))?;
        let subtask_id = payload
            .get("subtask_id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty());

        if let Some(subtask_id) = subtask_id {
            let detail: Option<expansion::TaskDetail> = self
                .db
                .get_task_detail(plan_id, task_id)?
                .and_then(|raw| serde_json::from_str(&raw).ok());
            let known = detail.is_some_and(|d| d.subtasks.iter().any(|s| s.id == subtask_id));
            if !known {
                return Err(ActionError::input(format!(
                    "subtask {} not found in {}/{}",
                    subtask_id, plan_id, task_id
                )));
            }
        }

        self.db.set_task_complete(plan_id, task_id, subtask_id, completed)?;
        let completion = self.db.task_completion(plan_id, task_id)?;
        Ok(json!({ "plan_id": plan_id, "task_id": task_id, "completion": completion }))
    }

    fn owned_business(&self, id: &str, user: &UserRecord) -> Result<(), ActionError> {
        match self.db.get_business(id, &user.id)? {
            Some(_) => Ok(()),
            None => Err(ActionError::input(format!("business {} not found", id))),
        }
    }

    async fn profile(&self, payload: &Value) -> Result<Value, ActionError> {
        let onboarding = payload.get("onboardingData").unwrap_or(&Value::Null);
        let formal = formalize(self.caps.llm.as_ref(), onboarding).await?;

        // The onboarding answers themselves still win over the profiler
        let sources = ProfileSources::from_payload(onboarding)
            .unwrap_or_default()
            .with_formal(formal.clone());
        let profile = merge_profile_sources(&sources);
        Ok(json!({ "formal": formal.0, "profile": profile }))
    }

    async fn analyze(&self, payload: Value, sink: &dyn FrameSink) -> Result<Value, ActionError> {
        let request: AnalyzeRequest = serde_json::from_value(payload.clone())?;

        let owner = match &request.business_id {
            Some(id) => {
                let user = self.user(&payload)?;
                self.owned_business(id, &user)?;
                Some(id.clone())
            }
            None => None,
        };

        let analysis = run_analysis(&request, &self.caps, &self.settings.pipeline, sink).await?;

        let saved = match &owner {
            Some(business_id) => match self.db.save_analysis(business_id, &analysis) {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("analysis {} finished but was not saved: {:#}", analysis.id, e);
                    false
                }
            },
            None => false,
        };

        Ok(json!({ "analysis": analysis, "saved": saved }))
    }

    async fn chat(&self, payload: Value) -> Result<Value, ActionError> {
        let request: ChatRequest = serde_json::from_value(payload)?;
        let state = request.state.unwrap_or_else(|| DialogueState {
            messages: request.messages,
            ..DialogueState::default()
        });

        let engine = DialogueEngine::new(self.caps.llm.clone(), self.caps.search.clone());
        let turn = engine.turn(state, &request.message).await;
        Ok(serde_json::to_value(turn).map_err(anyhow::Error::from)?)
    }

    async fn dimension_chat(&self, payload: Value) -> Result<Value, ActionError> {
        let request: DimensionChatRequest = serde_json::from_value(payload)?;
        if request.message.trim().is_empty() {
            return Err(ActionError::input("message must not be empty"));
        }
        let dimension = Dimension::from_category(&request.dimension)
            .ok_or_else(|| ActionError::input(format!("unknown dimension {}", request.dimension)))?;

        let analysis = match self.db.get_analysis(&request.analysis_id)? {
            Some(stored) => stored,
            None => request
                .analysis
                .filter(|a| a.id == request.analysis_id)
                .ok_or_else(|| ActionError::input(format!("analysis {} not found", request.analysis_id)))?,
        };

        let reply = expansion::dimension_chat(&self.db, &self.caps, &analysis, dimension, &request.message).await?;
        Ok(json!({ "message": reply }))
    }
}
