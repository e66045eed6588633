//! Profile field registry and the field map accumulated during the dialogue.
//!
//! This module provides:
//! - [`ProfileField`]: every field the dialogue can collect, with its wire key and question
//! - [`FieldContent`]: a text or list value
//! - [`Provenance`]: whether the user said it or a lookup found it
//! - [`FieldMap`]: the never-deleting map of collected values

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Field registry
// ============================================================================

/// A named business profile field
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProfileField {
    #[serde(rename = "nome_negocio")]
    BusinessName,
    #[serde(rename = "segmento")]
    Segment,
    #[serde(rename = "modelo")]
    Model,
    #[serde(rename = "localizacao")]
    Location,
    #[serde(rename = "dificuldades")]
    Pains,
    #[serde(rename = "objetivos")]
    Goals,
    #[serde(rename = "tempo_operacao")]
    TimeInBusiness,
    #[serde(rename = "num_funcionarios")]
    Employees,
    #[serde(rename = "tipo_produto")]
    ProductType,
    #[serde(rename = "ticket_medio")]
    AverageTicket,
    #[serde(rename = "faturamento_mensal")]
    MonthlyRevenue,
    #[serde(rename = "canais_venda")]
    SalesChannels,
    #[serde(rename = "concorrentes")]
    Competitors,
    #[serde(rename = "diferencial")]
    Differentiator,
    #[serde(rename = "cliente_ideal")]
    IdealCustomer,
    #[serde(rename = "investimento_marketing")]
    MarketingBudget,
    #[serde(rename = "modelo_operacional")]
    OperatingModel,
    #[serde(rename = "capital_disponivel")]
    AvailableCapital,
    #[serde(rename = "principal_gargalo")]
    MainBottleneck,
    #[serde(rename = "margem_lucro")]
    ProfitMargin,
    #[serde(rename = "tempo_entrega")]
    DeliveryTime,
    #[serde(rename = "origem_clientes")]
    CustomerOrigin,
    #[serde(rename = "maior_objecao")]
    MainObjection,
    #[serde(rename = "instagram_handle")]
    InstagramHandle,
    #[serde(rename = "site_url")]
    SiteUrl,
    #[serde(rename = "email_contato")]
    ContactEmail,
    #[serde(rename = "whatsapp_numero")]
    WhatsappNumber,
}

/// Which block of the canonical profile a field belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldGroup {
    Required,
    Optional,
    Context,
    Digital,
}

impl ProfileField {
    pub const REQUIRED: [ProfileField; 6] = [
        ProfileField::BusinessName,
        ProfileField::Segment,
        ProfileField::Model,
        ProfileField::Location,
        ProfileField::Pains,
        ProfileField::Goals,
    ];

    pub const ALL: [ProfileField; 27] = [
        ProfileField::BusinessName,
        ProfileField::Segment,
        ProfileField::Model,
        ProfileField::Location,
        ProfileField::Pains,
        ProfileField::Goals,
        ProfileField::TimeInBusiness,
        ProfileField::Employees,
        ProfileField::ProductType,
        ProfileField::AverageTicket,
        ProfileField::MonthlyRevenue,
        ProfileField::SalesChannels,
        ProfileField::Competitors,
        ProfileField::Differentiator,
        ProfileField::IdealCustomer,
        ProfileField::MarketingBudget,
        ProfileField::OperatingModel,
        ProfileField::AvailableCapital,
        ProfileField::MainBottleneck,
        ProfileField::ProfitMargin,
        ProfileField::DeliveryTime,
        ProfileField::CustomerOrigin,
        ProfileField::MainObjection,
        ProfileField::InstagramHandle,
        ProfileField::SiteUrl,
        ProfileField::ContactEmail,
        ProfileField::WhatsappNumber,
    ];

    /// Wire key, identical to the serde name
    pub fn key(&self) -> &'static str {
        match self {
            ProfileField::BusinessName => "nome_negocio",
            ProfileField::Segment => "segmento",
            ProfileField::Model => "modelo",
            ProfileField::Location => "localizacao",
            ProfileField::Pains => "dificuldades",
            ProfileField::Goals => "objetivos",
            ProfileField::TimeInBusiness => "tempo_operacao",
            ProfileField::Employees => "num_funcionarios",
            ProfileField::ProductType => "tipo_produto",
            ProfileField::AverageTicket => "ticket_medio",
            ProfileField::MonthlyRevenue => "faturamento_mensal",
            ProfileField::SalesChannels => "canais_venda",
            ProfileField::Competitors => "concorrentes",
            ProfileField::Differentiator => "diferencial",
            ProfileField::IdealCustomer => "cliente_ideal",
            ProfileField::MarketingBudget => "investimento_marketing",
            ProfileField::OperatingModel => "modelo_operacional",
            ProfileField::AvailableCapital => "capital_disponivel",
            ProfileField::MainBottleneck => "principal_gargalo",
            ProfileField::ProfitMargin => "margem_lucro",
            ProfileField::DeliveryTime => "tempo_entrega",
            ProfileField::CustomerOrigin => "origem_clientes",
            ProfileField::MainObjection => "maior_objecao",
            ProfileField::InstagramHandle => "instagram_handle",
            ProfileField::SiteUrl => "site_url",
            ProfileField::ContactEmail => "email_contato",
            ProfileField::WhatsappNumber => "whatsapp_numero",
        }
    }

    pub fn group(&self) -> FieldGroup {
        use ProfileField::*;
        match self {
            BusinessName | Segment | Model | Location | Pains | Goals => FieldGroup::Required,
            OperatingModel | AvailableCapital | MainBottleneck | ProfitMargin | DeliveryTime
            | CustomerOrigin | MainObjection => FieldGroup::Context,
            InstagramHandle | SiteUrl | ContactEmail | WhatsappNumber => FieldGroup::Digital,
            _ => FieldGroup::Optional,
        }
    }

    pub fn is_required(&self) -> bool {
        self.group() == FieldGroup::Required
    }

    /// Question asked when this is the top missing field
    pub fn question(&self) -> &'static str {
        match self {
            ProfileField::BusinessName => "Qual o nome do seu negócio?",
            ProfileField::Segment => "Em que segmento/área você atua?",
            ProfileField::Model => "Você atende empresas (B2B) ou pessoas físicas (B2C)?",
            ProfileField::Location => "Em que cidade você atende?",
            ProfileField::Pains => "Qual seu maior desafio hoje no negócio?",
            ProfileField::Goals => "Qual sua principal meta para os próximos meses?",
            ProfileField::TimeInBusiness => "Há quanto tempo o negócio está operando?",
            ProfileField::Employees => "Você trabalha sozinho ou tem equipe? Quantas pessoas?",
            ProfileField::ProductType => "Você vende produto, serviço, ou ambos?",
            ProfileField::AverageTicket => "Qual o valor médio de cada venda?",
            ProfileField::MonthlyRevenue => {
                "Qual seu faturamento médio mensal aproximadamente?"
            }
            ProfileField::SalesChannels => {
                "Onde/como você vende hoje? Instagram, loja física, site?"
            }
            ProfileField::Competitors => "Quais são seus principais concorrentes?",
            ProfileField::Differentiator => "Qual é o diferencial do seu negócio?",
            ProfileField::IdealCustomer => {
                "Descreva seu cliente ideal: idade, perfil, características."
            }
            ProfileField::MarketingBudget | ProfileField::AvailableCapital => {
                "Quanto você pode investir por mês em marketing/crescimento?"
            }
            ProfileField::OperatingModel => {
                "Como funciona sua operação? Tem estoque, trabalha sob encomenda?"
            }
            ProfileField::MainBottleneck => "Qual é o principal gargalo da sua operação?",
            ProfileField::ProfitMargin => "Qual é sua margem de lucro aproximada?",
            ProfileField::DeliveryTime => "Qual é o prazo médio de entrega?",
            ProfileField::CustomerOrigin => "De onde vêm seus clientes? Como eles te encontram?",
            ProfileField::MainObjection => "Qual é a principal objeção dos seus clientes?",
            ProfileField::InstagramHandle => "Qual o @ do seu Instagram?",
            ProfileField::SiteUrl => "Qual o endereço do seu site?",
            ProfileField::ContactEmail => "Qual o e-mail de contato do negócio?",
            ProfileField::WhatsappNumber => "Qual o número do WhatsApp do negócio?",
        }
    }

    /// Short human label used in consent questions
    pub fn label(&self) -> &'static str {
        match self {
            ProfileField::Competitors => "seus principais concorrentes",
            ProfileField::IdealCustomer => "o perfil do seu cliente ideal",
            ProfileField::Differentiator => "diferenciais comuns no seu segmento",
            ProfileField::ProfitMargin => "a margem de lucro típica do setor",
            ProfileField::AverageTicket => "o ticket médio praticado na sua região",
            ProfileField::MainBottleneck => "os gargalos mais comuns no seu segmento",
            ProfileField::CustomerOrigin => "os canais que mais trazem clientes no seu segmento",
            ProfileField::MainObjection => "as objeções mais comuns dos clientes",
            other => other.key(),
        }
    }

    /// Search template for fields the engine may offer to look up
    ///
    /// `{segmento}`, `{tipo_produto}` and `{localizacao}` are filled from the profile.
    pub fn search_template(&self) -> Option<&'static str> {
        let template = match self {
            ProfileField::Competitors => {
                "concorrentes de {tipo_produto} {segmento} em {localizacao} lojas similares marcas"
            }
            ProfileField::IdealCustomer => {
                "{segmento} {tipo_produto} {localizacao} perfil cliente típico público-alvo"
            }
            ProfileField::Differentiator => {
                "{segmento} {tipo_produto} diferencial competitivo como se destacar"
            }
            ProfileField::ProfitMargin => {
                "{segmento} {tipo_produto} margem de lucro média percentual setor brasil"
            }
            ProfileField::AverageTicket => {
                "{segmento} {tipo_produto} {localizacao} preço médio quanto custa"
            }
            ProfileField::MainBottleneck => {
                "{segmento} {tipo_produto} pequena empresa gargalos operacionais desafios comuns"
            }
            ProfileField::CustomerOrigin => {
                "{segmento} {tipo_produto} {localizacao} como conseguir clientes canais aquisição"
            }
            ProfileField::MainObjection => {
                "{segmento} {tipo_produto} objeções clientes motivos para não comprar"
            }
            _ => return None,
        };
        Some(template)
    }

    pub fn is_researchable(&self) -> bool {
        self.search_template().is_some()
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ProfileField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim();
        ProfileField::ALL
            .iter()
            .copied()
            .find(|field| field.key() == key)
            .ok_or_else(|| format!("unknown profile field '{}'", key))
    }
}

// ============================================================================
// Values and provenance
// ============================================================================

/// A field value: free text or a list of items
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldContent {
    Text(String),
    List(Vec<String>),
}

impl FieldContent {
    pub fn text(value: impl Into<String>) -> Self {
        FieldContent::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldContent::Text(s) => s.trim().is_empty(),
            FieldContent::List(items) => items.iter().all(|i| i.trim().is_empty()),
        }
    }

    /// Convert a loosely-typed JSON value; `None` for null, empty or nested objects
    pub fn from_json(value: &Value) -> Option<Self> {
        let content = match value {
            Value::String(s) => FieldContent::Text(s.trim().to_string()),
            Value::Number(n) => FieldContent::Text(n.to_string()),
            Value::Bool(b) => FieldContent::Text(if *b { "sim" } else { "não" }.to_string()),
            Value::Array(items) => FieldContent::List(
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) => Some(s.trim().to_string()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            Value::Null | Value::Object(_) => return None,
        };
        (!content.is_empty()).then_some(content)
    }

    pub fn to_json(&self) -> Value {
        match self {
            FieldContent::Text(s) => Value::String(s.clone()),
            FieldContent::List(items) => {
                Value::Array(items.iter().cloned().map(Value::String).collect())
            }
        }
    }
}

impl fmt::Display for FieldContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldContent::Text(s) => f.write_str(s),
            FieldContent::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

/// Where a field value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    UserStated,
    Researched,
}

// ============================================================================
// Field map
// ============================================================================

/// Collected profile values with per-field provenance
///
/// Serializes as a flat `{field: value}` object plus a `_provenance` map.
/// Unknown keys and empty values are dropped on input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFieldMap", into = "RawFieldMap")]
pub struct FieldMap {
    values: BTreeMap<ProfileField, FieldContent>,
    provenance: BTreeMap<ProfileField, Provenance>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RawFieldMap {
    #[serde(rename = "_provenance", default, skip_serializing_if = "BTreeMap::is_empty")]
    provenance: BTreeMap<String, Provenance>,
    #[serde(flatten)]
    values: Map<String, Value>,
}

impl From<RawFieldMap> for FieldMap {
    fn from(raw: RawFieldMap) -> Self {
        let mut map = FieldMap::default();
        for (key, value) in &raw.values {
            let (Ok(field), Some(content)) = (key.parse::<ProfileField>(), FieldContent::from_json(value))
            else {
                continue;
            };
            let provenance = raw
                .provenance
                .get(key)
                .copied()
                .unwrap_or(Provenance::UserStated);
            map.set(field, content, provenance);
        }
        map
    }
}

impl From<FieldMap> for RawFieldMap {
    fn from(map: FieldMap) -> Self {
        RawFieldMap {
            provenance: map
                .provenance
                .iter()
                .map(|(field, p)| (field.key().to_string(), *p))
                .collect(),
            values: map
                .values
                .iter()
                .map(|(field, content)| (field.key().to_string(), content.to_json()))
                .collect(),
        }
    }
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: ProfileField) -> Option<&FieldContent> {
        self.values.get(&field)
    }

    /// Text form of a field, empty when absent
    pub fn text(&self, field: ProfileField) -> String {
        self.get(field).map(|c| c.to_string()).unwrap_or_default()
    }

    pub fn provenance(&self, field: ProfileField) -> Option<Provenance> {
        self.provenance.get(&field).copied()
    }

    pub fn is_filled(&self, field: ProfileField) -> bool {
        self.values.get(&field).is_some_and(|c| !c.is_empty())
    }

    /// Store a value; empty values never replace what is there
    ///
    /// Returns whether the map changed.
    pub fn set(&mut self, field: ProfileField, content: FieldContent, provenance: Provenance) -> bool {
        if content.is_empty() {
            return false;
        }
        let changed = self.values.get(&field) != Some(&content)
            || self.provenance.get(&field) != Some(&provenance);
        self.values.insert(field, content);
        self.provenance.insert(field, provenance);
        changed
    }

    /// Remove a field outright; only used when moving a misplaced value
    pub(crate) fn take(&mut self, field: ProfileField) -> Option<(FieldContent, Provenance)> {
        let content = self.values.remove(&field)?;
        let provenance = self
            .provenance
            .remove(&field)
            .unwrap_or(Provenance::UserStated);
        Some((content, provenance))
    }

    /// Merge an extraction result as user-stated values
    ///
    /// Unknown keys and empty values are ignored, so nothing is ever deleted.
    /// A value equal to the stored one keeps its provenance. Returns the fields
    /// that changed.
    pub fn merge_json(&mut self, updates: &Map<String, Value>) -> Vec<ProfileField> {
        let mut changed = Vec::new();
        for (key, value) in updates {
            let Ok(field) = key.parse::<ProfileField>() else {
                continue;
            };
            if let Some(content) = FieldContent::from_json(value) {
                if self.values.get(&field) == Some(&content) {
                    continue;
                }
                if self.set(field, content, Provenance::UserStated) {
                    changed.push(field);
                }
            }
        }
        changed
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProfileField, &FieldContent)> {
        self.values.iter().map(|(field, content)| (*field, content))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Required fields currently filled, in registry order
    pub fn collected_required(&self) -> Vec<ProfileField> {
        ProfileField::REQUIRED
            .into_iter()
            .filter(|f| self.is_filled(*f))
            .collect()
    }

    /// Required fields still empty, in registry order
    pub fn missing_required(&self) -> Vec<ProfileField> {
        ProfileField::REQUIRED
            .into_iter()
            .filter(|f| !self.is_filled(*f))
            .collect()
    }

    /// Subset of this map restricted to the given groups
    pub fn filter_groups(&self, groups: &[FieldGroup]) -> FieldMap {
        let mut out = FieldMap::default();
        for (field, content) in self.iter() {
            if groups.contains(&field.group()) {
                let provenance = self.provenance(field).unwrap_or(Provenance::UserStated);
                out.set(field, content.clone(), provenance);
            }
        }
        out
    }

    /// Plain `{key: value}` JSON for prompts
    pub fn to_prompt_json(&self) -> Value {
        Value::Object(
            self.values
                .iter()
                .map(|(field, content)| (field.key().to_string(), content.to_json()))
                .collect(),
        )
    }
}
