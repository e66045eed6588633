//! Phase 3: six-dimension health score

use std::collections::BTreeMap;

use anyhow::Result;
use serde_json::Value;

use growth_sdk::{emit_thought, FrameSink};

use super::profile::Profile;
use super::types::{
    lenient_number, lenient_strings, BusinessScore, Classification, DegradedReason, Dimension,
    DimensionScore, DimensionSources, DimensionStatus, MarketData,
};
use crate::providers::{CompletionProvider, CompletionRequest};
use crate::text::preview;

pub const NEUTRAL_SCORE: u8 = 50;
const INSUFFICIENT_DATA: &str =
    "Dados insuficientes para avaliar esta dimensão; atribuída nota neutra.";
const INSUFFICIENT_SOURCES: &str =
    "Dados insuficientes: nenhuma fonte de mercado encontrada; nota estimada apenas pelo perfil.";

/// What the model proposed for one dimension
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreProposal {
    pub score: Option<f64>,
    pub justification: String,
    pub immediate_actions: Vec<String>,
}

/// Read `{dimensoes: {key: {score, justificativa, acoes_imediatas}}, resumo_executivo}`
pub fn parse_proposals(answer: &Value) -> (BTreeMap<Dimension, ScoreProposal>, String) {
    let mut proposals = BTreeMap::new();
    if let Some(dimensions) = answer.get("dimensoes").and_then(Value::as_object) {
        for (key, entry) in dimensions {
            let Some(dimension) = Dimension::from_category(key) else {
                continue;
            };
            proposals.insert(
                dimension,
                ScoreProposal {
                    score: entry.get("score").and_then(lenient_number),
                    justification: entry
                        .get("justificativa")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .trim()
                        .to_string(),
                    immediate_actions: entry
                        .get("acoes_imediatas")
                        .map(lenient_strings)
                        .unwrap_or_default(),
                },
            );
        }
    }
    let summary = answer
        .get("resumo_executivo")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();
    (proposals, summary)
}

/// Turn proposals plus research into a sourced, weighted score
///
/// The overall value is the fixed-weight sum of the six dimension scores,
/// rounded, and is never renormalized.
pub fn assemble_score(
    proposals: &BTreeMap<Dimension, ScoreProposal>,
    market: &MarketData,
    summary: String,
) -> (BusinessScore, Vec<DegradedReason>) {
    let mut degraded = Vec::new();
    let mut dimensions = Vec::with_capacity(Dimension::ALL.len());

    for dimension in Dimension::ALL {
        let urls: Vec<String> = market
            .sources(dimension)
            .iter()
            .map(|hit| hit.url.clone())
            .collect();
        let proposal = proposals.get(&dimension).cloned().unwrap_or_default();

        let (score, justification) = match proposal.score {
            Some(raw) => {
                let justification = if urls.is_empty() {
                    INSUFFICIENT_SOURCES.to_string()
                } else if proposal.justification.is_empty() {
                    format!("Nota atribuída com base no perfil para {}.", dimension.label())
                } else {
                    proposal.justification
                };
                (raw.round().clamp(0.0, 100.0) as u8, justification)
            }
            None => {
                degraded.push(DegradedReason::ScoreDefaulted { dimension });
                (NEUTRAL_SCORE, INSUFFICIENT_DATA.to_string())
            }
        };

        dimensions.push(DimensionScore {
            dimension,
            score,
            weight: dimension.weight(),
            status: DimensionStatus::from_score(score),
            justification,
            immediate_actions: proposal.immediate_actions,
            sources: DimensionSources::from_urls(urls),
        });
    }

    let overall = weighted_overall(&dimensions);
    let score = BusinessScore {
        overall,
        classification: Classification::from_score(overall),
        dimensions,
        summary,
    };
    (score, degraded)
}

pub fn weighted_overall(dimensions: &[DimensionScore]) -> u8 {
    let total: f64 = dimensions
        .iter()
        .map(|d| d.dimension.weight() * f64::from(d.score))
        .sum();
    total.round().clamp(0.0, 100.0) as u8
}

const SCORER_SYSTEM: &str = "Você é um analista de negócios quantitativo e pragmático. \
Avalie a saúde de pequenos negócios brasileiros de forma realista, respeitando o modelo \
que o empreendedor escolheu operar. Retorne APENAS JSON válido.";

fn research_digest(market: &MarketData) -> String {
    market
        .dimensions
        .iter()
        .map(|d| {
            let lines = d
                .sources
                .iter()
                .map(|h| format!("  - {} ({}): {}", h.title, h.url, preview(&h.snippet, 300)))
                .collect::<Vec<_>>();
            if lines.is_empty() {
                format!("{}: sem fontes", d.dimension)
            } else {
                format!("{}:\n{}", d.dimension, lines.join("\n"))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ask the scorer and assemble the result
pub async fn score_business(
    llm: &dyn CompletionProvider,
    profile: &Profile,
    market: &MarketData,
    sink: &dyn FrameSink,
) -> Result<(BusinessScore, Vec<DegradedReason>)> {
    emit_thought!(sink, 3, "Calculando o score de saúde do negócio...");

    let dimension_keys: Vec<&str> = Dimension::ALL.iter().map(|d| d.key()).collect();
    let prompt = format!(
        r#"PERFIL DO NEGÓCIO:
{profile}

DADOS DE MERCADO:
{research}

REGRAS:
- Cada score vai de 0 (crítico) a 100 (excelente).
- Se o modelo operacional for sob encomenda ou dropshipping, não penalize falta de estoque.
- Se não houver dados suficientes para uma dimensão, use 50.
- Ações imediatas devem ser gratuitas ou baratas e executáveis esta semana.

Responda com JSON:
{{
  "dimensoes": {{ "<{keys}>": {{ "score": 0-100, "justificativa": "...", "acoes_imediatas": ["..."] }} }},
  "resumo_executivo": "2-3 frases"
}}"#,
        profile = serde_json::to_string_pretty(&profile.to_prompt_json())?,
        research = research_digest(market),
        keys = dimension_keys.join("|"),
    );

    let request = CompletionRequest::new(SCORER_SYSTEM, prompt).temperature(0.2);
    let answer = llm.complete(&request).await?;
    let (proposals, summary) = parse_proposals(&answer);
    let (score, degraded) = assemble_score(&proposals, market, summary);

    emit_thought!(
        sink,
        3,
        "Score geral: {}/100 ({})",
        score.overall,
        score.classification.label()
    );
    Ok((score, degraded))
}
