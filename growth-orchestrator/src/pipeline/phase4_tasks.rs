//! Phase 4: ranked task list
//!
//! The model drafts tasks; ranking is done here so the same drafts always
//! come out in the same order.

use std::cmp::Ordering;

use anyhow::{bail, Result};
use serde_json::Value;

use growth_sdk::{emit_thought, FrameSink};

use super::profile::Profile;
use super::types::{
    lenient_number, lenient_strings, AiAssist, AssistKind, BusinessScore, Dimension, MarketData,
    Task,
};
use crate::dialogue::ProfileField;
use crate::providers::{CompletionProvider, CompletionRequest};

pub const MAX_TASKS: usize = 8;

/// A task as the model proposed it, before ranking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDraft {
    pub id: String,
    pub title: String,
    pub category: String,
    pub impact: f64,
    pub effort: f64,
    pub description: String,
    pub deadline: String,
    pub steps: Vec<String>,
    pub tools: Vec<String>,
    pub ai_assist: Option<AiAssist>,
}

impl TaskDraft {
    pub fn from_json(value: &Value) -> Option<Self> {
        let text = |key: &str| {
            value
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        let title = text("titulo");
        if title.is_empty() {
            return None;
        }
        let ai_assist = value.get("suporte_ia").and_then(|assist| {
            let kind = AssistKind::parse(assist.get("tipo")?.as_str()?)?;
            Some(AiAssist {
                kind,
                description: assist
                    .get("descricao")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        });

        Some(TaskDraft {
            id: text("id"),
            title,
            category: text("categoria"),
            impact: value.get("impacto").and_then(lenient_number).unwrap_or(5.0),
            effort: value.get("esforco").and_then(lenient_number).unwrap_or(5.0),
            description: text("descricao"),
            deadline: text("prazo_sugerido"),
            steps: value.get("passos").map(lenient_strings).unwrap_or_default(),
            tools: value.get("ferramentas").map(lenient_strings).unwrap_or_default(),
            ai_assist,
        })
    }
}

pub fn parse_drafts(answer: &Value) -> Vec<TaskDraft> {
    answer
        .get("tasks")
        .or_else(|| answer.get("tarefas"))
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(TaskDraft::from_json).collect())
        .unwrap_or_default()
}

/// `round2(0.6·impact + 0.25·(10 − effort) + 0.15·weakness)`
///
/// `weakness` is `(100 − dimension score) / 10`, so all three terms live on 0..=10.
pub fn compute_priority(impact: u8, effort: u8, dimension_score: u8) -> f64 {
    let weakness = (100.0 - f64::from(dimension_score.min(100))) / 10.0;
    let raw = 0.6 * f64::from(impact) + 0.25 * (10.0 - f64::from(effort)) + 0.15 * weakness;
    (raw * 100.0).round() / 100.0
}

// Near-duplicate groups, checked in order against title + description
const SIMILARITY_GROUPS: &[(&str, &[&str])] = &[
    ("estoque", &["estoque", "inventario", "erp", "bling", "tiny"]),
    ("redes_sociais", &["instagram", "rede social", "redes sociais", "facebook", "tiktok", "presenca digital"]),
    ("conteudo", &["conteudo", "calendario", "posts"]),
    ("crm", &["crm", "hubspot", "rd station", "relacionamento"]),
    ("credibilidade", &["credibilidade", "confianca", "depoimento", "avaliacao", "prova social"]),
    ("precificacao", &["preco", "precificacao", "margem", "desconto"]),
];

fn similarity_group(task: &Task) -> Option<&'static str> {
    let combined = crate::text::fold(&format!("{} {}", task.title, task.description));
    SIMILARITY_GROUPS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| combined.contains(k)))
        .map(|(group, _)| *group)
}

/// Rank drafts against the score
///
/// Unknown categories land on the weakest dimension. Ties on priority break
/// by title, then by the drafted id. Only the best-ranked task of each
/// similarity group survives, and ids are re-issued in final order.
pub fn rank_tasks(drafts: Vec<TaskDraft>, score: &BusinessScore) -> Vec<Task> {
    let weakest = score.weakest();
    let mut tasks: Vec<Task> = drafts
        .into_iter()
        .map(|draft| {
            let category = Dimension::from_category(&draft.category).unwrap_or(weakest);
            let impact = clamp_ten(draft.impact);
            let effort = clamp_ten(draft.effort);
            let dimension_score = score.dimension(category).map(|d| d.score).unwrap_or(50);
            Task {
                id: draft.id,
                title: draft.title,
                category,
                impact,
                effort,
                computed_priority: compute_priority(impact, effort, dimension_score),
                description: draft.description,
                deadline: draft.deadline,
                steps: draft.steps,
                tools: draft.tools,
                ai_assist: draft.ai_assist,
            }
        })
        .collect();

    tasks.sort_by(|a, b| {
        b.computed_priority
            .partial_cmp(&a.computed_priority)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.title.cmp(&b.title))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut seen_groups: Vec<&'static str> = Vec::new();
    tasks.retain(|task| match similarity_group(task) {
        Some(group) if seen_groups.contains(&group) => false,
        Some(group) => {
            seen_groups.push(group);
            true
        }
        None => true,
    });
    tasks.truncate(MAX_TASKS);

    for (idx, task) in tasks.iter_mut().enumerate() {
        task.id = format!("task_{:03}", idx + 1);
    }
    tasks
}

fn clamp_ten(value: f64) -> u8 {
    value.round().clamp(0.0, 10.0) as u8
}

/// Restriction warnings injected into the task prompt
fn restriction_warnings(profile: &Profile) -> Vec<String> {
    let r = &profile.restrictions;
    let mut warnings = Vec::new();
    if !r.has_inventory {
        warnings.push("PROIBIDO: tarefas sobre gestão de estoque, ERP ou inventário. O negócio opera sob encomenda.".to_string());
    }
    if matches!(r.available_capital.as_str(), "zero" | "baixo") {
        warnings.push("PROIBIDO: ferramentas pagas e anúncios caros. Apenas opções gratuitas ou até R$50/mês.".to_string());
    }
    if r.solo_team {
        warnings.push("PROIBIDO: estratégias que exigem equipe. Tudo deve ser executável por uma pessoa em poucas horas.".to_string());
    }
    for channel in ["instagram", "whatsapp"] {
        if r.existing_channels.iter().any(|c| c.to_lowercase().contains(channel)) {
            warnings.push(format!(
                "ATENÇÃO: já usa {}. Sugira otimização, não criação de presença.",
                channel
            ));
        }
    }
    warnings
}

const PLANNER_SYSTEM: &str = "Você é um consultor de negócios sênior criando um plano de ação \
ultra-específico e viável para um pequeno negócio brasileiro. Retorne APENAS JSON válido.";

pub async fn generate_tasks(
    llm: &dyn CompletionProvider,
    profile: &Profile,
    score: &BusinessScore,
    market: &MarketData,
    sink: &dyn FrameSink,
) -> Result<Vec<Task>> {
    emit_thought!(sink, 4, "Gerando tarefas para as dimensões mais fracas...");

    let warnings = restriction_warnings(profile);
    let weak: Vec<String> = score
        .dimensions
        .iter()
        .filter(|d| d.score < 70)
        .map(|d| format!("{} ({}/100): {}", d.dimension, d.score, d.justification))
        .collect();
    let categories: Vec<&str> = Dimension::ALL.iter().map(|d| d.key()).collect();

    let prompt = format!(
        r#"PERFIL DO NEGÓCIO:
{profile}

RESTRIÇÕES:
{warnings}

DIFICULDADE PRINCIPAL: "{pain}"

DIMENSÕES FRACAS:
{weak}

FONTES DE MERCADO: {sources}

Gere entre 4 e 8 tarefas únicas, específicas e executáveis esta semana.
Responda com JSON:
{{
  "tasks": [{{
    "id": "task_001",
    "titulo": "título ultra-específico",
    "categoria": "{categories}",
    "impacto": 1-10,
    "esforco": 1-10,
    "prazo_sugerido": "1 semana",
    "descricao": "por que resolve o problema do usuário",
    "passos": ["passo concreto"],
    "ferramentas": ["ferramenta"],
    "suporte_ia": {{ "tipo": "copywriting|analise_concorrente|lista_leads|script_abordagem|plano_conteudo|precificacao", "descricao": "..." }}
  }}]
}}"#,
        profile = serde_json::to_string_pretty(&profile.to_prompt_json())?,
        warnings = if warnings.is_empty() {
            "Sem restrições especiais.".to_string()
        } else {
            warnings.join("\n")
        },
        pain = profile.field(ProfileField::Pains),
        weak = if weak.is_empty() { "nenhuma".to_string() } else { weak.join("\n") },
        sources = market.total_sources(),
        categories = categories.join(" / "),
    );

    let request = CompletionRequest::new(PLANNER_SYSTEM, prompt).temperature(0.3);
    let answer = llm.complete(&request).await?;
    let tasks = rank_tasks(parse_drafts(&answer), score);
    if tasks.is_empty() {
        bail!("task generator returned no usable tasks");
    }

    emit_thought!(
        sink,
        4,
        "{} tarefas priorizadas; primeira: {}",
        tasks.len(),
        tasks[0].title
    );
    Ok(tasks)
}
