//! Phase 1: profile formalization
//!
//! Three overlapping sources describe the same business:
//! - the `perfil` block the dialogue extracted in the user's own words
//! - the formal base written by the business profiler
//! - context fields the dialogue picked up along the way
//!
//! [`merge_profile_sources`] is the single place their precedence is decided.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use growth_sdk::{emit_thought, FrameSink};

use super::types::DegradedReason;
use crate::dialogue::{FieldContent, FieldGroup, FieldMap, ProfileField, Provenance};
use crate::providers::{CompletionProvider, CompletionRequest};
use crate::text::fold;

/// Fields from the dialogue's `perfil` block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatPerfil(pub FieldMap);

/// Fields inferred by the business profiler
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormalBase(pub FieldMap);

/// Context fields collected in passing during the dialogue
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatContext(pub FieldMap);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSources {
    pub chat_perfil: ChatPerfil,
    pub formal_base: FormalBase,
    pub chat_context: ChatContext,
}

impl ProfileSources {
    /// Split a client-supplied profile into its conversational sources
    ///
    /// Accepts either `{perfil: {...}, contexto: {...}}` or the flat field map
    /// the dialogue produces. In the flat form, context-group fields are the
    /// chat context and everything else is the chat perfil.
    pub fn from_payload(profile: &Value) -> Result<Self> {
        let sources = match profile.get("perfil") {
            Some(perfil) => {
                let chat_perfil: FieldMap = serde_json::from_value(perfil.clone())
                    .context("profile.perfil is not a field map")?;
                let chat_context: FieldMap = match profile.get("contexto") {
                    Some(context) => serde_json::from_value(context.clone())
                        .context("profile.contexto is not a field map")?,
                    None => FieldMap::new(),
                };
                ProfileSources {
                    chat_perfil: ChatPerfil(chat_perfil),
                    formal_base: FormalBase::default(),
                    chat_context: ChatContext(chat_context),
                }
            }
            None => {
                let flat: FieldMap = serde_json::from_value(profile.clone())
                    .context("profile is not a field map")?;
                ProfileSources {
                    chat_perfil: ChatPerfil(flat.filter_groups(&[
                        FieldGroup::Required,
                        FieldGroup::Optional,
                        FieldGroup::Digital,
                    ])),
                    formal_base: FormalBase::default(),
                    chat_context: ChatContext(flat.filter_groups(&[FieldGroup::Context])),
                }
            }
        };
        Ok(sources)
    }

    pub fn with_formal(mut self, formal: FormalBase) -> Self {
        self.formal_base = formal;
        self
    }
}

/// Constraints that shape scoring and task generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Restrictions {
    /// zero / baixo / medio / alto
    #[serde(rename = "capital_disponivel")]
    pub available_capital: String,
    #[serde(rename = "equipe_solo")]
    pub solo_team: bool,
    #[serde(rename = "modelo_operacional")]
    pub operating_model: String,
    #[serde(rename = "canais_existentes")]
    pub existing_channels: Vec<String>,
    #[serde(rename = "tem_estoque")]
    pub has_inventory: bool,
}

impl Default for Restrictions {
    fn default() -> Self {
        Self {
            available_capital: "medio".to_string(),
            solo_team: false,
            operating_model: String::new(),
            existing_channels: Vec::new(),
            has_inventory: true,
        }
    }
}

/// Canonical profile handed to the rest of the pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub perfil: FieldMap,
    #[serde(default)]
    pub restrictions: Restrictions,
}

impl Profile {
    pub fn segment(&self) -> String {
        self.perfil.text(ProfileField::Segment)
    }

    pub fn field(&self, field: ProfileField) -> String {
        self.perfil.text(field)
    }

    /// `{perfil, restricoes}` without provenance, for prompts
    pub fn to_prompt_json(&self) -> Value {
        serde_json::json!({
            "perfil": self.perfil.to_prompt_json(),
            "restricoes": self.restrictions,
        })
    }
}

/// Merge the three sources field by field
///
/// The first non-empty value wins, in this order: chat perfil, formal base,
/// chat context. The winner's provenance comes along with it.
pub fn merge_profile_sources(sources: &ProfileSources) -> Profile {
    let layers = [
        &sources.chat_perfil.0,
        &sources.formal_base.0,
        &sources.chat_context.0,
    ];
    let mut perfil = FieldMap::new();

    for field in ProfileField::ALL {
        let winner = layers.iter().find_map(|layer| {
            layer
                .get(field)
                .filter(|content| !content.is_empty())
                .map(|content| (content.clone(), layer.provenance(field)))
        });
        if let Some((content, provenance)) = winner {
            perfil.set(field, content, provenance.unwrap_or(Provenance::UserStated));
        }
    }

    let restrictions = derive_restrictions(&perfil);
    Profile {
        perfil,
        restrictions,
    }
}

pub fn derive_restrictions(perfil: &FieldMap) -> Restrictions {
    let operating_model = fold(&perfil.text(ProfileField::OperatingModel))
        .trim()
        .replace(' ', "_");
    let employees = fold(perfil.text(ProfileField::Employees).trim());
    let solo_team = matches!(employees.as_str(), "1" | "solo" | "so eu" | "sozinho" | "sozinha")
        || employees.starts_with("1 ");

    let existing_channels = match perfil.get(ProfileField::SalesChannels) {
        Some(FieldContent::List(items)) => items.clone(),
        Some(FieldContent::Text(text)) => text
            .split([',', ';', '/'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };

    let capital = if perfil.is_filled(ProfileField::AvailableCapital) {
        perfil.text(ProfileField::AvailableCapital)
    } else {
        perfil.text(ProfileField::MarketingBudget)
    };

    Restrictions {
        available_capital: capital_bracket(&capital).to_string(),
        solo_team,
        has_inventory: !matches!(operating_model.as_str(), "sob_encomenda" | "dropshipping"),
        operating_model,
        existing_channels,
    }
}

/// Bucket a free-text monthly budget
fn capital_bracket(text: &str) -> &'static str {
    let folded = fold(text);
    if folded.trim().is_empty() {
        return "medio";
    }
    if ["zero", "nada", "nenhum", "sem dinheiro", "sem capital"]
        .iter()
        .any(|w| folded.contains(w))
    {
        return "zero";
    }
    match leading_amount(&folded) {
        Some(amount) if amount <= 0.0 => "zero",
        Some(amount) if amount < 500.0 => "baixo",
        Some(amount) if amount < 5000.0 => "medio",
        Some(_) => "alto",
        None if folded.contains("pouco") || folded.contains("baixo") => "baixo",
        None if folded.contains("alto") => "alto",
        None => "medio",
    }
}

/// First amount in a Brazilian-formatted string: "R$ 1.500,00" -> 1500.0
fn leading_amount(text: &str) -> Option<f64> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let raw: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();
    let mut amount = raw.replace('.', "").replace(',', ".").parse::<f64>().ok()?;
    let rest = text[start + raw.len()..].trim_start();
    if rest.starts_with("mil") || rest.starts_with('k') {
        amount *= 1000.0;
    }
    Some(amount)
}

// ============================================================================
// Business profiler
// ============================================================================

const PROFILER_SYSTEM: &str = "Você é um analista que organiza dados de onboarding de pequenos negócios \
brasileiros em um perfil estruturado. Use somente o que foi informado ou é uma inferência direta; \
deixe vazio o que não souber.";

/// Ask the profiler for a formal base built from raw onboarding data
pub async fn formalize(llm: &dyn CompletionProvider, onboarding: &Value) -> Result<FormalBase> {
    let keys: Vec<&str> = ProfileField::ALL.iter().map(|f| f.key()).collect();
    let prompt = format!(
        "DADOS DO ONBOARDING:\n{}\n\nCHAVES DO PERFIL: {}\n\n\
         Responda APENAS com JSON {{\"perfil\": {{\"chave\": \"valor\"}}}}. \
         Para canais_venda e concorrentes use listas.",
        serde_json::to_string_pretty(onboarding)?,
        keys.join(", ")
    );
    let request = CompletionRequest::new(PROFILER_SYSTEM, prompt).temperature(0.2);
    let answer = llm.complete(&request).await?;

    let fields = answer
        .get("perfil")
        .and_then(Value::as_object)
        .or_else(|| answer.as_object())
        .cloned()
        .unwrap_or_else(Map::new);

    let mut base = FieldMap::new();
    for (key, value) in &fields {
        if let (Ok(field), Some(content)) = (key.parse::<ProfileField>(), FieldContent::from_json(value)) {
            base.set(field, content, Provenance::Researched);
        }
    }
    Ok(FormalBase(base))
}

/// Run phase 1 for an analysis request
///
/// A profiler failure is not fatal: the conversation sources are used alone
/// and the run is flagged as degraded.
pub async fn formalize_profile(
    llm: &dyn CompletionProvider,
    profile: &Value,
    formal: Option<&Value>,
    sink: &dyn FrameSink,
) -> Result<(Profile, Option<DegradedReason>)> {
    let sources = ProfileSources::from_payload(profile)?;
    let mut degraded = None;

    let formal_base = match formal {
        Some(formal) => {
            let map: FieldMap =
                serde_json::from_value(formal.clone()).context("formal profile is not a field map")?;
            FormalBase(map)
        }
        None => {
            emit_thought!(sink, 1, "Organizando o perfil do negócio...");
            let onboarding = merge_profile_sources(&sources).perfil.to_prompt_json();
            match formalize(llm, &onboarding).await {
                Ok(base) => base,
                Err(e) => {
                    tracing::warn!("business profiler failed, using conversation only: {:#}", e);
                    degraded = Some(DegradedReason::FormalProfileUnavailable);
                    FormalBase::default()
                }
            }
        }
    };

    let profile = merge_profile_sources(&sources.with_formal(formal_base));
    Ok((profile, degraded))
}
