//! Lazy, memoized breakdown of one task into subtasks and tools
//!
//! A detail is generated at most once per `(plan_id, task_id)`. Later calls
//! return the stored bytes without searching or generating again, so a
//! checklist the user is working through never changes under them.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{optional_search, profile_from_value, render_sources, source_urls};
use crate::database::{Database, TaskCompletion};
use crate::dialogue::ProfileField;
use crate::pipeline::Dimension;
use crate::providers::{complete_as, Capabilities, CompletionRequest};

const GUIDANCE_RESULTS: usize = 5;

/// Payload of the `expand-task` action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandRequest {
    pub plan_id: String,
    pub task_id: String,
    pub task_title: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub profile: Value,
    #[serde(default)]
    pub plan_context: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: String,
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "descricao", default)]
    pub description: String,
    #[serde(rename = "tempo_estimado", default)]
    pub estimated_time: String,
    #[serde(rename = "ferramenta", default)]
    pub tool: String,
    #[serde(rename = "dica_especialista", default)]
    pub expert_tip: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredTool {
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "custo", default)]
    pub cost: String,
    #[serde(rename = "para_que", default)]
    pub purpose: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetail {
    pub plan_id: String,
    pub task_id: String,
    #[serde(rename = "subtarefas")]
    pub subtasks: Vec<Subtask>,
    #[serde(rename = "ferramentas_necessarias", default)]
    pub tools: Vec<RequiredTool>,
    #[serde(rename = "tempo_total_estimado", default)]
    pub total_time: String,
    #[serde(rename = "resultado_esperado", default)]
    pub expected_outcome: String,
    #[serde(rename = "dica_principal", default)]
    pub main_tip: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

/// A detail and whether it came from the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expansion {
    pub detail: TaskDetail,
    pub cached: bool,
    pub completion: TaskCompletion,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DetailDraft {
    subtarefas: Vec<SubtaskDraft>,
    ferramentas_necessarias: Vec<RequiredToolDraft>,
    tempo_total_estimado: String,
    resultado_esperado: String,
    dica_principal: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SubtaskDraft {
    titulo: String,
    descricao: String,
    tempo_estimado: String,
    ferramenta: String,
    dica_especialista: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RequiredToolDraft {
    nome: String,
    url: String,
    custo: String,
    para_que: String,
}

fn category_hint(category: Option<Dimension>) -> &'static str {
    match category {
        Some(Dimension::DigitalPresence) => "presença digital instagram google meu negócio",
        Some(Dimension::Competitiveness) => "diferenciação e conversão de clientes",
        Some(Dimension::ChannelDiversification) => "novos canais de venda",
        Some(Dimension::Pricing) => "precificação e margem",
        Some(Dimension::MarketPotential) => "expansão de mercado",
        Some(Dimension::OperationalMaturity) => "gestão e processos",
        None => "pequenos negócios",
    }
}

/// Search query for task guidance: title, category hint and segment
pub fn guidance_query(title: &str, category: Option<Dimension>, segment: &str) -> String {
    let mut query = format!("como {} {}", title.trim().to_lowercase(), category_hint(category));
    if !segment.trim().is_empty() {
        query.push(' ');
        query.push_str(segment.trim());
    }
    query.push_str(" passo a passo ferramentas");
    query
}

impl DetailDraft {
    fn into_detail(self, request: &ExpandRequest, sources: Vec<String>) -> Result<TaskDetail> {
        let subtasks: Vec<Subtask> = self
            .subtarefas
            .into_iter()
            .filter(|s| !s.titulo.trim().is_empty())
            .enumerate()
            .map(|(i, s)| Subtask {
                id: format!("st_{}", i + 1),
                title: s.titulo.trim().to_string(),
                description: s.descricao,
                estimated_time: s.tempo_estimado,
                tool: s.ferramenta,
                expert_tip: s.dica_especialista,
            })
            .collect();
        if subtasks.is_empty() {
            bail!("expansion for {} has no subtasks", request.task_id);
        }

        let tools = self
            .ferramentas_necessarias
            .into_iter()
            .filter(|t| !t.nome.trim().is_empty())
            .map(|t| RequiredTool {
                name: t.nome.trim().to_string(),
                url: t.url,
                cost: t.custo,
                purpose: t.para_que,
            })
            .collect();

        Ok(TaskDetail {
            plan_id: request.plan_id.clone(),
            task_id: request.task_id.clone(),
            subtasks,
            tools,
            total_time: self.tempo_total_estimado,
            expected_outcome: self.resultado_esperado,
            main_tip: self.dica_principal,
            sources,
        })
    }
}

const EXPANDER_SYSTEM: &str = "Você é um consultor prático de pequenos negócios. Quebre tarefas \
em subtarefas executáveis com ferramentas reais e estimativas de tempo. Retorne APENAS JSON válido.";

/// Return the stored detail for the task or generate, store and return one
pub async fn expand_task(db: &Database, caps: &Capabilities, request: &ExpandRequest) -> Result<Expansion> {
    if let Some(stored) = db.get_task_detail(&request.plan_id, &request.task_id)? {
        tracing::debug!("task detail cache hit for {}/{}", request.plan_id, request.task_id);
        return Ok(Expansion {
            detail: serde_json::from_str(&stored).context("Stored task detail is corrupt")?,
            cached: true,
            completion: db.task_completion(&request.plan_id, &request.task_id)?,
        });
    }

    let profile = profile_from_value(&request.profile);
    let category = request.category.as_deref().and_then(Dimension::from_category);
    let query = guidance_query(&request.task_title, category, &profile.segment());
    let hits = optional_search(caps.search.as_ref(), &query, GUIDANCE_RESULTS).await;

    let prompt = format!(
        r#"NEGÓCIO: {name} ({segment}, {location})
MODELO: {model}
TAREFA: {title}
CATEGORIA: {category}
CONTEXTO DO PLANO: {plan}

FONTES:
{sources}

Responda com JSON:
{{
  "subtarefas": [{{ "titulo": "...", "descricao": "...", "tempo_estimado": "30 min", "ferramenta": "...", "dica_especialista": "..." }}],
  "ferramentas_necessarias": [{{ "nome": "...", "url": "...", "custo": "gratuito", "para_que": "..." }}],
  "tempo_total_estimado": "...",
  "resultado_esperado": "...",
  "dica_principal": "..."
}}"#,
        name = profile.field(ProfileField::BusinessName),
        segment = profile.segment(),
        location = profile.field(ProfileField::Location),
        model = profile.field(ProfileField::Model),
        title = request.task_title,
        category = category.map(|c| c.label()).unwrap_or("geral"),
        plan = if request.plan_context.is_null() {
            "(sem plano)".to_string()
        } else {
            request.plan_context.to_string()
        },
        sources = render_sources(&hits),
    );

    let draft: DetailDraft =
        complete_as(caps.llm.as_ref(), &CompletionRequest::new(EXPANDER_SYSTEM, prompt).temperature(0.4))
            .await?;
    let detail = draft.into_detail(request, source_urls(&hits))?;

    let inserted = db.insert_task_detail(
        &request.plan_id,
        &request.task_id,
        &serde_json::to_string(&detail)?,
    )?;
    if !inserted {
        tracing::info!(
            "task detail for {}/{} was written concurrently, keeping the first",
            request.plan_id,
            request.task_id
        );
    }

    // Always answer with what the store holds
    let stored = db
        .get_task_detail(&request.plan_id, &request.task_id)?
        .context("Task detail vanished after insert")?;
    Ok(Expansion {
        detail: serde_json::from_str(&stored).context("Stored task detail is corrupt")?,
        cached: !inserted,
        completion: db.task_completion(&request.plan_id, &request.task_id)?,
    })
}
