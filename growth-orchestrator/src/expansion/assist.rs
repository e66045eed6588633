//! Ready-to-use content for tasks that carry an AI assist

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{optional_search, render_sources, source_urls};
use crate::dialogue::ProfileField;
use crate::pipeline::{AssistKind, Profile};
use crate::providers::{complete_as, Capabilities, CompletionRequest};

const ASSIST_RESULTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistOutput {
    pub tipo: AssistKind,
    pub conteudo: String,
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Generated {
    conteudo: Value,
}

/// Which assist the task asks for, in either task shape
pub fn assist_kind(task: &Value) -> Option<AssistKind> {
    task.get("suporte_ia")
        .and_then(|s| s.get("tipo"))
        .or_else(|| task.get("ai_assist").and_then(|s| s.get("kind")))
        .and_then(Value::as_str)
        .and_then(AssistKind::parse)
}

fn instruction(kind: AssistKind) -> &'static str {
    match kind {
        AssistKind::Copywriting => {
            "Escreva 3 variações de texto de venda curtas (post, anúncio e mensagem de WhatsApp)."
        }
        AssistKind::CompetitorAnalysis => {
            "Compare os principais concorrentes encontrados: pontos fortes, fracos e como se diferenciar."
        }
        AssistKind::LeadList => {
            "Liste perfis de potenciais clientes ou parceiros e onde encontrá-los, usando as fontes."
        }
        AssistKind::OutreachScript => {
            "Escreva um roteiro de abordagem com abertura, perguntas e resposta às objeções comuns."
        }
        AssistKind::ContentPlan => {
            "Monte um calendário de conteúdo de 2 semanas com tema, formato e chamada para ação."
        }
        AssistKind::Pricing => {
            "Proponha uma tabela de preços com custo, margem sugerida e preço final por item."
        }
    }
}

fn needs_search(kind: AssistKind) -> bool {
    matches!(kind, AssistKind::CompetitorAnalysis | AssistKind::LeadList)
}

fn content_text(value: Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => serde_json::to_string_pretty(&other).unwrap_or_default(),
    }
}

const ASSIST_SYSTEM: &str = "Você produz material pronto para um pequeno negócio usar hoje. \
Responda em JSON {\"conteudo\": ...}.";

pub async fn generate_assist(caps: &Capabilities, task: &Value, profile: &Profile) -> Result<AssistOutput> {
    let kind = assist_kind(task).ok_or_else(|| anyhow!("task has no known suporte_ia.tipo"))?;
    let title = task
        .get("titulo")
        .or_else(|| task.get("title"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let hits = if needs_search(kind) {
        let query = match kind {
            AssistKind::CompetitorAnalysis => format!(
                "concorrentes {} {}",
                profile.segment(),
                profile.field(ProfileField::Location)
            ),
            _ => format!(
                "clientes {} {} {}",
                profile.field(ProfileField::IdealCustomer),
                profile.segment(),
                profile.field(ProfileField::Location)
            ),
        };
        optional_search(caps.search.as_ref(), query.trim(), ASSIST_RESULTS).await
    } else {
        Vec::new()
    };

    let prompt = format!(
        r#"PERFIL:
{profile}

TAREFA: {title}
PEDIDO: {instruction}

FONTES:
{sources}"#,
        profile = serde_json::to_string_pretty(&profile.to_prompt_json())?,
        title = title,
        instruction = instruction(kind),
        sources = render_sources(&hits),
    );

    let generated: Generated =
        complete_as(caps.llm.as_ref(), &CompletionRequest::new(ASSIST_SYSTEM, prompt).temperature(0.7))
            .await?;
    let conteudo = content_text(generated.conteudo);
    anyhow::ensure!(!conteudo.is_empty(), "completion returned no content");

    Ok(AssistOutput {
        tipo: kind,
        conteudo,
        sources: source_urls(&hits),
    })
}
