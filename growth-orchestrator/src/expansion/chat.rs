//! Scoped Q&A about one task or one dimension of an analysis
//!
//! Each call reads its transcript, does at most one search, asks the
//! completion capability and appends the user turn plus one assistant turn.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::expand::TaskDetail;
use super::{optional_search, profile_from_value, render_sources, source_urls};
use crate::chat::{render_transcript, ChatMessage};
use crate::database::Database;
use crate::dialogue::ProfileField;
use crate::pipeline::{Analysis, Dimension, Task};
use crate::providers::{complete_as, Capabilities, CompletionRequest};

pub const TASK_CHAT_WINDOW: usize = 5;
pub const DIMENSION_CHAT_WINDOW: usize = 8;
/// Task questions shorter than this are answered without a search
pub const TASK_SEARCH_MIN_CHARS: usize = 15;
const TASK_CHAT_RESULTS: usize = 3;
const DIMENSION_CHAT_RESULTS: usize = 4;

/// Payload of the `task-chat` action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskChatRequest {
    pub plan_id: String,
    pub task_id: String,
    pub message: String,
    #[serde(default)]
    pub task_title: Option<String>,
    #[serde(default)]
    pub profile: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Answer {
    resposta: String,
}

const CHAT_SYSTEM: &str = "Você é um consultor de crescimento respondendo dúvidas de um \
empreendedor. Seja direto e prático, cite as fontes quando usar. Responda em JSON \
{\"resposta\": \"...\"}.";

async fn answer(caps: &Capabilities, prompt: String) -> Result<String> {
    let answer: Answer =
        complete_as(caps.llm.as_ref(), &CompletionRequest::new(CHAT_SYSTEM, prompt).temperature(0.5))
            .await?;
    let text = answer.resposta.trim();
    anyhow::ensure!(!text.is_empty(), "completion returned an empty answer");
    Ok(text.to_string())
}

pub async fn task_chat(db: &Database, caps: &Capabilities, request: &TaskChatRequest) -> Result<ChatMessage> {
    let message = request.message.trim();
    let transcript = db.task_chat(&request.plan_id, &request.task_id)?;
    let detail: Option<TaskDetail> = db
        .get_task_detail(&request.plan_id, &request.task_id)?
        .and_then(|raw| serde_json::from_str(&raw).ok());
    let analysis = db.get_analysis(&request.plan_id)?;
    let task = analysis.as_ref().and_then(|a| a.task(&request.task_id));
    let profile = match &analysis {
        Some(analysis) => analysis.profile.clone(),
        None => profile_from_value(&request.profile),
    };

    let title = request
        .task_title
        .clone()
        .or_else(|| task.map(|t| t.title.clone()))
        .unwrap_or_else(|| request.task_id.clone());

    let hits = if message.chars().count() > TASK_SEARCH_MIN_CHARS {
        let query = format!("{} {} {}", message, title, profile.segment());
        optional_search(caps.search.as_ref(), query.trim(), TASK_CHAT_RESULTS).await
    } else {
        Vec::new()
    };

    let detail_block = match &detail {
        Some(detail) => detail
            .subtasks
            .iter()
            .map(|s| format!("- {}: {} ({})", s.id, s.title, s.estimated_time))
            .collect::<Vec<_>>()
            .join("\n"),
        None => "(tarefa ainda não detalhada)".to_string(),
    };

    let analysis_block = match (&analysis, task) {
        (Some(analysis), Some(task)) => task_context(analysis, task),
        _ => "(análise não disponível)".to_string(),
    };

    let prompt = format!(
        r#"NEGÓCIO: {segment} em {location}
TAREFA: {title}
CONTEXTO DA ANÁLISE:
{analysis}
SUBTAREFAS:
{detail}

CONVERSA ANTERIOR:
{transcript}

FONTES:
{sources}

PERGUNTA: {message}"#,
        segment = profile.segment(),
        location = profile.field(ProfileField::Location),
        title = title,
        analysis = analysis_block,
        detail = detail_block,
        transcript = render_transcript(&transcript, TASK_CHAT_WINDOW),
        sources = render_sources(&hits),
        message = message,
    );

    let reply = ChatMessage::assistant(answer(caps, prompt).await?).with_sources(source_urls(&hits));
    db.append_task_chat(
        &request.plan_id,
        &request.task_id,
        &[ChatMessage::user(message), reply.clone()],
    )?;
    Ok(reply)
}

/// Where a task sits in its analysis: dimension score, plan phase and steps
fn task_context(analysis: &Analysis, task: &Task) -> String {
    let mut lines = vec![format!(
        "Dimensão: {} (impacto {}, esforço {}, prioridade {})",
        task.category.label(),
        task.impact,
        task.effort,
        task.computed_priority
    )];
    if let Some(score) = analysis.score.dimension(task.category) {
        lines.push(format!("Pontuação da dimensão: {}/100: {}", score.score, score.justification));
    }
    let phase = analysis
        .execution_plan
        .as_ref()
        .and_then(|plan| plan.phases.iter().find(|p| p.task_ids.contains(&task.id)));
    if let Some(phase) = phase {
        lines.push(format!("Fase do plano: {} ({})", phase.title, phase.weeks));
    }
    if !task.description.is_empty() {
        lines.push(format!("Descrição: {}", task.description));
    }
    if !task.steps.is_empty() {
        lines.push(format!("Passos: {}", task.steps.join("; ")));
    }
    lines.join("\n")
}

pub async fn dimension_chat(
    db: &Database,
    caps: &Capabilities,
    analysis: &Analysis,
    dimension: Dimension,
    message: &str,
) -> Result<ChatMessage> {
    let message = message.trim();
    let transcript = db.dimension_chat(&analysis.id, dimension)?;
    let profile = &analysis.profile;

    let query = format!(
        "{} {} {} {}",
        dimension.label(),
        profile.segment(),
        profile.field(ProfileField::Location),
        message
    );
    let hits = optional_search(caps.search.as_ref(), query.trim(), DIMENSION_CHAT_RESULTS).await;

    let score_block = match analysis.score.dimension(dimension) {
        Some(score) => format!(
            "{}/100 ({:?}): {}\nAções imediatas: {}",
            score.score,
            score.status,
            score.justification,
            score.immediate_actions.join("; ")
        ),
        None => "(sem pontuação)".to_string(),
    };
    let tasks_block = analysis
        .tasks_in(dimension)
        .map(|t| format!("- {} (prioridade {})", t.title, t.computed_priority))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        r#"NEGÓCIO: {segment} em {location}
DIMENSÃO: {label}
PONTUAÇÃO: {score}
TAREFAS DESTA DIMENSÃO:
{tasks}

CONVERSA ANTERIOR:
{transcript}

FONTES:
{sources}

PERGUNTA: {message}"#,
        segment = profile.segment(),
        location = profile.field(ProfileField::Location),
        label = dimension.label(),
        score = score_block,
        tasks = if tasks_block.is_empty() { "(nenhuma)".to_string() } else { tasks_block },
        transcript = render_transcript(&transcript, DIMENSION_CHAT_WINDOW),
        sources = render_sources(&hits),
        message = message,
    );

    let reply = ChatMessage::assistant(answer(caps, prompt).await?).with_sources(source_urls(&hits));
    db.append_dimension_chat(&analysis.id, dimension, &[ChatMessage::user(message), reply.clone()])?;
    Ok(reply)
}
