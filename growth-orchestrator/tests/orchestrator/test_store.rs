//! Tests for accounts, businesses and saved analyses through worker dispatch

use super::common::*;
use growth_orchestrator::config::Settings;
use growth_orchestrator::worker::WorkerContext;
use growth_sdk::{Action, ErrorKind};
use serde_json::{json, Value};
use std::sync::Arc;

struct Harness {
    ctx: WorkerContext,
    llm: Arc<ScriptedLlm>,
}

impl Harness {
    fn new() -> Self {
        let search = Arc::new(CountingSearch::new(1));
        let llm = Arc::new(pipeline_llm().on(EXPANDER, expansion_answer()));
        let ctx = WorkerContext::new(memory_db(), caps(&search, &llm), Settings::default());
        Self { ctx, llm }
    }

    /// Dispatch and return every frame the action wrote
    async fn frames(&self, action: Action, payload: Value) -> Vec<Frame> {
        let (tx, mut rx) = frame_channel();
        self.ctx.dispatch(action, payload, &tx).await;
        drop(tx);
        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }
        frames
    }

    async fn ok(&self, action: Action, payload: Value) -> Value {
        match self.frames(action, payload).await.pop() {
            Some(Frame::Result { marker, payload }) => {
                assert_eq!(marker, action.marker());
                payload
            }
            other => panic!("{} did not succeed: {:?}", action, other),
        }
    }

    async fn err(&self, action: Action, payload: Value) -> ErrorKind {
        match self.frames(action, payload).await.pop() {
            Some(Frame::Error { kind, .. }) => kind,
            other => panic!("{} should have failed: {:?}", action, other),
        }
    }

    async fn register(&self, email: &str) -> String {
        let grant = self
            .ok(
                Action::Register,
                json!({ "email": email, "password": "segredo1", "name": "Dona" }),
            )
            .await;
        grant["session_token"].as_str().unwrap().to_string()
    }

    async fn create_business(&self, token: &str) -> String {
        let created = self
            .ok(
                Action::CreateBusiness,
                json!({ "session_token": token, "profile": padaria_profile() }),
            )
            .await;
        assert_eq!(created["business"]["name"], "Padaria Pão Quente");
        assert_eq!(created["business"]["segment"], "padaria artesanal");
        created["business"]["id"].as_str().unwrap().to_string()
    }
}

// ============================================================================
// Accounts
// ============================================================================

#[tokio::test]
async fn test_register_login_logout() {
    let h = Harness::new();
    h.register("Ana@Padaria.com").await;

    assert_eq!(
        h.err(Action::Register, json!({ "email": "ana@padaria.com", "password": "outra123", "name": "Ana" }))
            .await,
        ErrorKind::Input
    );
    assert_eq!(
        h.err(Action::Login, json!({ "email": "ana@padaria.com", "password": "errada" }))
            .await,
        ErrorKind::Input
    );

    let grant = h
        .ok(Action::Login, json!({ "email": "ana@padaria.com", "password": "segredo1" }))
        .await;
    let token = grant["session_token"].as_str().unwrap();
    let user = h.ok(Action::ValidateSession, json!({ "session_token": token })).await;
    assert_eq!(user["user"]["email"], "ana@padaria.com");

    h.ok(Action::Logout, json!({ "session_token": token })).await;
    assert_eq!(
        h.err(Action::ValidateSession, json!({ "session_token": token })).await,
        ErrorKind::Input
    );
}

// ============================================================================
// Businesses and analyses
// ============================================================================

#[tokio::test]
async fn test_analysis_is_saved_under_business() {
    let h = Harness::new();
    let token = h.register("ana@padaria.com").await;
    let business_id = h.create_business(&token).await;

    let frames = h
        .frames(
            Action::Analyze,
            json!({ "session_token": token, "business_id": business_id, "profile": padaria_profile() }),
        )
        .await;
    assert!(frames.iter().any(|f| matches!(f, Frame::Thought { phase: Some(2), .. })));
    let Some(Frame::Result { payload, .. }) = frames.last() else {
        panic!("analyze did not finish");
    };
    assert_eq!(payload["saved"], true);
    assert_eq!(payload["success"], true);
    let analysis_id = payload["analysis"]["id"].as_str().unwrap().to_string();

    let fetched = h
        .ok(Action::GetBusiness, json!({ "session_token": token, "business_id": business_id }))
        .await;
    assert_eq!(fetched["latest_analysis"]["id"], analysis_id.as_str());
    assert_eq!(fetched["business"]["latest_analysis_id"], analysis_id.as_str());

    let listed = h
        .ok(Action::ListAnalyses, json!({ "session_token": token, "business_id": business_id }))
        .await;
    assert_eq!(listed["analyses"].as_array().unwrap().len(), 1);
    assert_eq!(listed["analyses"][0]["overall"], 52);
}

#[tokio::test]
async fn test_latest_analysis_follows_the_last_save() {
    let db = memory_db();
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(pipeline_llm());
    let first = analyze_padaria(&search, &llm).await;
    let business_id = save_under_business(&db, &first);

    // Saved later but stamped earlier, so timestamp order would pick `first`
    let mut redo = first.clone();
    redo.id = uuid::Uuid::new_v4().to_string();
    redo.created_at = first.created_at - chrono::Duration::seconds(30);
    db.save_analysis(&business_id, &redo).unwrap();

    let latest = db.latest_analysis(&business_id).unwrap().unwrap();
    assert_eq!(latest.id, redo.id);
    assert_eq!(db.list_analyses(&business_id).unwrap().len(), 2);
}

#[tokio::test]
async fn test_businesses_are_private_to_their_owner() {
    let h = Harness::new();
    let ana = h.register("ana@padaria.com").await;
    let bia = h.register("bia@doceria.com").await;
    let business_id = h.create_business(&ana).await;

    assert_eq!(
        h.err(Action::GetBusiness, json!({ "session_token": bia, "business_id": business_id }))
            .await,
        ErrorKind::Input
    );

    let completions = h.llm.calls();
    assert_eq!(
        h.err(
            Action::Analyze,
            json!({ "session_token": bia, "business_id": business_id, "profile": padaria_profile() }),
        )
        .await,
        ErrorKind::Input
    );
    // Ownership is checked before the pipeline starts
    assert_eq!(h.llm.calls(), completions);

    let listed = h.ok(Action::ListBusinesses, json!({ "session_token": bia })).await;
    assert!(listed["businesses"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_deleted_business_disappears() {
    let h = Harness::new();
    let token = h.register("ana@padaria.com").await;
    let business_id = h.create_business(&token).await;

    h.ok(Action::DeleteBusiness, json!({ "session_token": token, "business_id": business_id }))
        .await;

    let listed = h.ok(Action::ListBusinesses, json!({ "session_token": token })).await;
    assert!(listed["businesses"].as_array().unwrap().is_empty());
    assert_eq!(
        h.err(Action::GetBusiness, json!({ "session_token": token, "business_id": business_id }))
            .await,
        ErrorKind::Input
    );
}

#[tokio::test]
async fn test_expand_task_action_reports_cache_hits() {
    let h = Harness::new();
    let payload = json!({
        "plan_id": "plan-a",
        "task_id": "task_001",
        "task_title": "Cadastrar a padaria no Google Meu Negócio",
        "profile": padaria_profile()
    });

    let first = h.ok(Action::ExpandTask, payload.clone()).await;
    let second = h.ok(Action::ExpandTask, payload).await;

    assert_eq!(first["cached"], false);
    assert_eq!(second["cached"], true);
    assert_eq!(first["detail"], second["detail"]);
}

#[tokio::test]
async fn test_task_completion_is_tracked_per_plan() {
    let h = Harness::new();
    let expand = json!({
        "plan_id": "plan-a",
        "task_id": "task_001",
        "task_title": "Cadastrar a padaria no Google Meu Negócio",
        "profile": padaria_profile()
    });
    let first = h.ok(Action::ExpandTask, expand.clone()).await;
    assert_eq!(first["completion"]["completed"], false);

    h.ok(
        Action::SetTaskComplete,
        json!({ "plan_id": "plan-a", "task_id": "task_001", "subtask_id": "st_1", "completed": true }),
    )
    .await;
    let marked = h
        .ok(
            Action::SetTaskComplete,
            json!({ "plan_id": "plan-a", "task_id": "task_001", "completed": true }),
        )
        .await;
    assert_eq!(marked["completion"]["completed"], true);
    assert_eq!(marked["completion"]["completed_subtasks"], json!(["st_1"]));

    let again = h.ok(Action::ExpandTask, expand).await;
    assert_eq!(again["cached"], true);
    assert_eq!(again["completion"], marked["completion"]);

    assert_eq!(
        h.err(
            Action::SetTaskComplete,
            json!({ "plan_id": "plan-a", "task_id": "task_001", "subtask_id": "st_9", "completed": true }),
        )
        .await,
        ErrorKind::Input
    );

    // a redone plan starts unmarked
    let redone = h
        .ok(
            Action::ExpandTask,
            json!({ "plan_id": "plan-b", "task_id": "task_001", "task_title": "Cadastrar a padaria no Google Meu Negócio" }),
        )
        .await;
    assert_eq!(redone["completion"]["completed"], false);
}

#[tokio::test]
async fn test_missing_fields_are_input_errors() {
    let h = Harness::new();

    assert_eq!(
        h.err(Action::ExpandTask, json!({ "plan_id": "p", "task_id": "" })).await,
        ErrorKind::Input
    );
    assert_eq!(h.err(Action::Analyze, json!({})).await, ErrorKind::Input);
}
