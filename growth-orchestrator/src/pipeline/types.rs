//! Data structures for the analysis pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::profile::Profile;
use crate::providers::SearchHit;

// ============================================================================
// Dimensions and scores
// ============================================================================

/// One of the six fixed axes of business health
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dimension {
    #[serde(rename = "presenca_digital")]
    DigitalPresence,
    #[serde(rename = "competitividade")]
    Competitiveness,
    #[serde(rename = "diversificacao_canais")]
    ChannelDiversification,
    #[serde(rename = "precificacao")]
    Pricing,
    #[serde(rename = "potencial_mercado")]
    MarketPotential,
    #[serde(rename = "maturidade_operacional")]
    OperationalMaturity,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::DigitalPresence,
        Dimension::Competitiveness,
        Dimension::ChannelDiversification,
        Dimension::Pricing,
        Dimension::MarketPotential,
        Dimension::OperationalMaturity,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Dimension::DigitalPresence => "presenca_digital",
            Dimension::Competitiveness => "competitividade",
            Dimension::ChannelDiversification => "diversificacao_canais",
            Dimension::Pricing => "precificacao",
            Dimension::MarketPotential => "potencial_mercado",
            Dimension::OperationalMaturity => "maturidade_operacional",
        }
    }

    /// Fixed weight in the overall score; the six weights sum to 1
    pub fn weight(&self) -> f64 {
        match self {
            Dimension::DigitalPresence | Dimension::Competitiveness => 0.20,
            _ => 0.15,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Dimension::DigitalPresence => "Presença Digital",
            Dimension::Competitiveness => "Competitividade",
            Dimension::ChannelDiversification => "Diversificação de Canais",
            Dimension::Pricing => "Precificação",
            Dimension::MarketPotential => "Potencial de Mercado",
            Dimension::OperationalMaturity => "Maturidade Operacional",
        }
    }

    /// Parse a dimension key or one of the task category aliases
    pub fn from_category(category: &str) -> Option<Dimension> {
        let folded = crate::text::fold(category.trim());
        let dimension = match folded.as_str() {
            "presenca_digital" | "credibilidade" | "presenca digital" => Dimension::DigitalPresence,
            "competitividade" | "conversao" => Dimension::Competitiveness,
            "diversificacao_canais" | "canais" => Dimension::ChannelDiversification,
            "precificacao" | "preco" => Dimension::Pricing,
            "potencial_mercado" | "mercado" => Dimension::MarketPotential,
            "maturidade_operacional" | "operacional" => Dimension::OperationalMaturity,
            _ => return None,
        };
        Some(dimension)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionStatus {
    Critico,
    Atencao,
    Forte,
}

impl DimensionStatus {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=39 => DimensionStatus::Critico,
            40..=69 => DimensionStatus::Atencao,
            _ => DimensionStatus::Forte,
        }
    }
}

/// Where a dimension score came from; never left implicit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DimensionSources {
    Cited { urls: Vec<String> },
    NoSource { reason: String },
}

impl DimensionSources {
    pub fn from_urls(urls: Vec<String>) -> Self {
        if urls.is_empty() {
            DimensionSources::NoSource {
                reason: "nenhuma fonte encontrada na pesquisa de mercado".to_string(),
            }
        } else {
            DimensionSources::Cited { urls }
        }
    }

    pub fn urls(&self) -> &[String] {
        match self {
            DimensionSources::Cited { urls } => urls,
            DimensionSources::NoSource { .. } => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    pub score: u8,
    pub weight: f64,
    pub status: DimensionStatus,
    pub justification: String,
    #[serde(default)]
    pub immediate_actions: Vec<String>,
    pub sources: DimensionSources,
}

/// Ordinal bucket of the overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Critical,
    Weak,
    Medium,
    Strong,
    Excellent,
}

impl Classification {
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=29 => Classification::Critical,
            30..=49 => Classification::Weak,
            50..=69 => Classification::Medium,
            70..=84 => Classification::Strong,
            _ => Classification::Excellent,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classification::Critical => "Crítico",
            Classification::Weak => "Em Risco",
            Classification::Medium => "Estável",
            Classification::Strong => "Saudável",
            Classification::Excellent => "Forte",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessScore {
    pub overall: u8,
    pub classification: Classification,
    pub dimensions: Vec<DimensionScore>,
    #[serde(default)]
    pub summary: String,
}

impl BusinessScore {
    pub fn dimension(&self, dimension: Dimension) -> Option<&DimensionScore> {
        self.dimensions.iter().find(|d| d.dimension == dimension)
    }

    /// Lowest-scoring dimension, first in registry order on ties
    pub fn weakest(&self) -> Dimension {
        self.dimensions
            .iter()
            .min_by_key(|d| d.score)
            .map(|d| d.dimension)
            .unwrap_or(Dimension::OperationalMaturity)
    }
}

// ============================================================================
// Tasks and plan
// ============================================================================

/// Content template the assist action can generate for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssistKind {
    #[serde(rename = "copywriting")]
    Copywriting,
    #[serde(rename = "analise_concorrente")]
    CompetitorAnalysis,
    #[serde(rename = "lista_leads")]
    LeadList,
    #[serde(rename = "script_abordagem")]
    OutreachScript,
    #[serde(rename = "plano_conteudo")]
    ContentPlan,
    #[serde(rename = "precificacao")]
    Pricing,
}

impl AssistKind {
    pub fn key(&self) -> &'static str {
        match self {
            AssistKind::Copywriting => "copywriting",
            AssistKind::CompetitorAnalysis => "analise_concorrente",
            AssistKind::LeadList => "lista_leads",
            AssistKind::OutreachScript => "script_abordagem",
            AssistKind::ContentPlan => "plano_conteudo",
            AssistKind::Pricing => "precificacao",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let folded = crate::text::fold(value.trim());
        let kind = match folded.as_str() {
            "copywriting" | "copy" => AssistKind::Copywriting,
            "analise_concorrente" | "analise de concorrente" => AssistKind::CompetitorAnalysis,
            "lista_leads" | "leads" => AssistKind::LeadList,
            "script_abordagem" | "script" => AssistKind::OutreachScript,
            "plano_conteudo" | "conteudo" => AssistKind::ContentPlan,
            "precificacao" | "preco" => AssistKind::Pricing,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAssist {
    pub kind: AssistKind,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub category: Dimension,
    pub impact: u8,
    pub effort: u8,
    pub computed_priority: f64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub deadline: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_assist: Option<AiAssist>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanPhase {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub weeks: String,
    pub task_ids: Vec<String>,
}

/// Tasks grouped into time-boxed phases under one goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub goal: String,
    #[serde(default)]
    pub horizon: String,
    #[serde(default)]
    pub strategy_summary: String,
    pub phases: Vec<PlanPhase>,
}

// ============================================================================
// Research and analysis snapshot
// ============================================================================

/// Sources collected for one dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionResearch {
    pub dimension: Dimension,
    pub queries: Vec<String>,
    pub sources: Vec<SearchHit>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub dimensions: Vec<DimensionResearch>,
}

impl MarketData {
    pub fn sources(&self, dimension: Dimension) -> &[SearchHit] {
        self.dimensions
            .iter()
            .find(|d| d.dimension == dimension)
            .map(|d| d.sources.as_slice())
            .unwrap_or(&[])
    }

    pub fn total_sources(&self) -> usize {
        self.dimensions.iter().map(|d| d.sources.len()).sum()
    }
}

/// Partial data the analysis completed with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradedReason {
    /// The profiler could not run; only conversation data was used
    FormalProfileUnavailable,
    NoSources { dimension: Dimension },
    /// No usable score came back, the neutral default was used
    ScoreDefaulted { dimension: Dimension },
    ExecutionPlanOmitted,
}

/// Immutable snapshot produced by one pipeline run
///
/// The id doubles as the `plan_id` that scopes task expansions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
    pub profile: Profile,
    pub score: BusinessScore,
    pub tasks: Vec<Task>,
    pub market_data: MarketData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub degraded: Vec<DegradedReason>,
    pub created_at: DateTime<Utc>,
}

impl Analysis {
    pub fn plan_id(&self) -> &str {
        &self.id
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn tasks_in(&self, dimension: Dimension) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(move |t| t.category == dimension)
    }
}

/// Read a 0–`max` number from a loosely typed LLM value
pub fn lenient_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s
            .trim()
            .trim_end_matches('%')
            .replace(',', ".")
            .parse::<f64>()
            .ok(),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

/// Read a list of strings, accepting a single string too
pub fn lenient_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Value::Object(map) => map
                    .get("nome")
                    .or_else(|| map.get("titulo"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
