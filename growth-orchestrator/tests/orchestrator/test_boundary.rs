//! Tests for the process boundary against shell-script workers
//!
//! Each script stands in for growth-worker and is launched through `sh`.

use super::common::*;
use growth_orchestrator::runtime::{ProcessBoundary, WorkerCommand};
use growth_sdk::{Action, BoundaryError, Envelope, ErrorKind, GrowthRuntime};
use serde_json::json;
use std::time::{Duration, Instant};

fn boundary(script: &std::path::Path) -> ProcessBoundary {
    ProcessBoundary::new(WorkerCommand::new("sh").arg(script.to_string_lossy()))
}

fn chat_payload() -> serde_json::Value {
    json!({ "messages": [], "message": "oi" })
}

// ============================================================================
// Framed output
// ============================================================================

#[tokio::test]
async fn test_framed_result_and_streamed_thoughts() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "worker.sh",
        r#"echo '__GROWTH_FRAME__:{"type":"thought","message":"pensando","phase":1}'
echo 'linha de log sem moldura'
echo '__GROWTH_FRAME__:{"type":"result","marker":"CHAT_RESULT","payload":{"reply":"oi"}}'
"#,
    );
    let (tx, mut rx) = frame_channel();

    let payload = boundary(&script)
        .call_streamed(Action::Chat, chat_payload(), tx)
        .await
        .unwrap();

    assert_eq!(payload["reply"], "oi");
    assert_eq!(
        rx.recv().await,
        Some(Frame::Thought {
            message: "pensando".to_string(),
            phase: Some(1)
        })
    );
}

#[tokio::test]
async fn test_envelope_is_written_then_removed() {
    let dir = tempfile::tempdir().unwrap();
    let copy = dir.path().join("seen.json");
    let script = write_script(
        dir.path(),
        "worker.sh",
        &format!(
            r#"[ "$1" = "--action" ] || exit 3
cp "$4" '{copy}'
echo "__GROWTH_FRAME__:{{\"type\":\"result\",\"marker\":\"EXPAND_TASK_RESULT\",\"payload\":{{\"path\":\"$4\"}}}}"
"#,
            copy = copy.display()
        ),
    );
    let request = json!({ "plan_id": "p1", "task_id": "task_001", "task_title": "Criar ficha" });

    let payload = boundary(&script)
        .call(Action::ExpandTask, request.clone())
        .await
        .unwrap();

    let envelope: Envelope = serde_json::from_str(&std::fs::read_to_string(&copy).unwrap()).unwrap();
    assert_eq!(envelope.action, Action::ExpandTask);
    assert_eq!(envelope.payload, request);

    let path = payload["path"].as_str().unwrap();
    assert!(!std::path::Path::new(path).exists());
}

#[tokio::test]
async fn test_marker_mismatch_is_malformed() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "worker.sh",
        r#"echo '__GROWTH_FRAME__:{"type":"result","marker":"PROFILE_RESULT","payload":{"reply":"oi"}}'
"#,
    );

    let err = boundary(&script).call(Action::Chat, chat_payload()).await.unwrap_err();

    assert!(matches!(err, BoundaryError::MalformedOutput { action: Action::Chat, .. }));
}

#[tokio::test]
async fn test_error_frame_keeps_its_kind() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "worker.sh",
        r#"echo '__GROWTH_FRAME__:{"type":"error","kind":"input","message":"faltou o campo"}'
exit 1
"#,
    );

    let err = boundary(&script).call(Action::Chat, chat_payload()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Input);
    assert!(err.to_string().contains("faltou o campo"));
}

// ============================================================================
// Unframed fallback
// ============================================================================

#[tokio::test]
async fn test_legacy_json_line_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "worker.sh",
        r#"echo 'iniciando worker antigo'
echo '{"reply":"legado"}'
echo 'fim'
"#,
    );

    let payload = boundary(&script).call(Action::Chat, chat_payload()).await.unwrap();

    assert_eq!(payload["reply"], "legado");
}

#[tokio::test]
async fn test_legacy_pretty_json_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "worker.sh",
        r#"echo '{'
echo '  "reply": "multilinha"'
echo '}'
"#,
    );

    let payload = boundary(&script).call(Action::Chat, chat_payload()).await.unwrap();

    assert_eq!(payload["reply"], "multilinha");
}

#[tokio::test]
async fn test_legacy_failure_object_is_a_worker_error() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(
        dir.path(),
        "worker.sh",
        r#"echo '{"success": false, "error": "quebrou"}'
"#,
    );

    let err = boundary(&script).call(Action::Chat, chat_payload()).await.unwrap_err();

    assert!(matches!(err, BoundaryError::Worker { .. }));
}

#[tokio::test]
async fn test_unparseable_output_is_malformed_with_preview() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "worker.sh", "echo 'nada de json aqui'\n");

    let err = boundary(&script).call(Action::Chat, chat_payload()).await.unwrap_err();

    match err {
        BoundaryError::MalformedOutput { preview, .. } => assert!(preview.contains("nada de json aqui")),
        other => panic!("expected malformed output, got {:?}", other),
    }
}

// ============================================================================
// Budgets and validation
// ============================================================================

#[tokio::test]
async fn test_slow_worker_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(dir.path(), "worker.sh", "sleep 10\n");
    let boundary = boundary(&script).with_timeout(Action::Chat, Duration::from_millis(300));

    let started = Instant::now();
    let err = boundary.call(Action::Chat, chat_payload()).await.unwrap_err();

    assert!(matches!(err, BoundaryError::Timeout { action: Action::Chat, .. }));
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_invalid_payload_never_spawns() {
    let boundary = ProcessBoundary::new(WorkerCommand::new("/definitely/not/a/worker"));

    let err = boundary
        .call(Action::TaskChat, json!({ "plan_id": "p1", "task_id": "task_001" }))
        .await
        .unwrap_err();
    assert!(matches!(err, BoundaryError::Input { action: Action::TaskChat, .. }));

    let err = boundary.call(Action::Chat, chat_payload()).await.unwrap_err();
    assert!(matches!(err, BoundaryError::Spawn(_)));
}
