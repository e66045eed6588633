//! Turn-by-turn extraction of a business profile from chat.
//!
//! Each turn feeds the transcript and the current field map to the
//! completion capability. The answer is merged without ever deleting a field.
//! The engine may then propose a web lookup for one field, but it only
//! searches after the user explicitly agrees on a later turn.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::consent::{carries_answer, classify, ConsentSignal};
use super::fields::{FieldContent, FieldMap, ProfileField, Provenance};
use super::inference::{apply_inferred, normalize};
use crate::chat::{render_transcript, ChatMessage};
use crate::providers::{complete_as, CompletionProvider, CompletionRequest, SearchProvider};

pub const GREETING: &str = "Olá! Sou seu consultor de crescimento. Me conta um pouco sobre o seu negócio: o que você vende e onde atende?";
pub const READY_INVITATION: &str = "Já tenho o que preciso para analisar seu negócio. Quando quiser, é só pedir a análise completa!";
const RETRY_PROMPT: &str = "Tive um problema para processar sua última mensagem. Pode enviar de novo?";

/// Transcript messages handed to the extraction prompt
const TRANSCRIPT_WINDOW: usize = 12;
const RESEARCH_RESULTS: usize = 3;

/// An engine-proposed lookup waiting for the user's consent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingResearch {
    pub field: ProfileField,
    pub rationale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchOrigin {
    /// User agreed and the lookup ran
    Assisted,
    /// User declined the proposal
    Rejected,
}

/// Record of one research proposal outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchTask {
    pub field: ProfileField,
    pub origin: ResearchOrigin,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

/// Everything the dialogue carries between turns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueState {
    pub messages: Vec<ChatMessage>,
    pub extracted_profile: FieldMap,
    pub fields_collected: Vec<ProfileField>,
    pub fields_missing: Vec<ProfileField>,
    pub pending_research: Option<PendingResearch>,
    pub ready_for_analysis: bool,
    pub fields_researched: Vec<ProfileField>,
    pub research_tasks: Vec<ResearchTask>,
}

impl DialogueState {
    /// Recompute collected/missing; readiness only ever turns on
    fn refresh(&mut self) {
        self.fields_collected = self.extracted_profile.collected_required();
        self.fields_missing = self.extracted_profile.missing_required();
        self.ready_for_analysis = self.ready_for_analysis || self.fields_missing.is_empty();
    }

    fn last_assistant_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == crate::chat::ChatRole::Assistant)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Greeting,
    /// Empty input; nothing changed
    Ignored,
    Answered,
    /// A capability failed; the previous state is returned untouched
    Failed,
}

/// Result of one dialogue turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub kind: TurnKind,
    pub reply: String,
    pub state: DialogueState,
}

/// Shape requested from the completion capability
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Extraction {
    reply: String,
    updated_fields: Map<String, Value>,
    research_proposal: Option<Proposal>,
}

#[derive(Debug, Deserialize)]
struct Proposal {
    field: String,
    #[serde(default)]
    rationale: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Condensed {
    value: Value,
}

pub struct DialogueEngine {
    llm: Arc<dyn CompletionProvider>,
    search: Arc<dyn SearchProvider>,
}

impl DialogueEngine {
    pub fn new(llm: Arc<dyn CompletionProvider>, search: Arc<dyn SearchProvider>) -> Self {
        Self { llm, search }
    }

    /// Process one user message against `state`
    pub async fn turn(&self, state: DialogueState, user_message: &str) -> DialogueTurn {
        let message = user_message.trim();

        if message.is_empty() {
            return if state.messages.is_empty() {
                let mut state = state;
                state.refresh();
                state.messages.push(ChatMessage::assistant(GREETING));
                DialogueTurn {
                    kind: TurnKind::Greeting,
                    reply: GREETING.to_string(),
                    state,
                }
            } else {
                let reply = state
                    .last_assistant_message()
                    .map(str::to_string)
                    .unwrap_or_else(|| next_question(&state));
                DialogueTurn {
                    kind: TurnKind::Ignored,
                    reply,
                    state,
                }
            };
        }

        match self.advance(&state, message).await {
            Ok(turn) => turn,
            Err(e) => {
                tracing::warn!("dialogue turn failed, keeping previous state: {:#}", e);
                DialogueTurn {
                    kind: TurnKind::Failed,
                    reply: RETRY_PROMPT.to_string(),
                    state,
                }
            }
        }
    }

    /// Work on a copy so a failure leaves the caller's state intact
    async fn advance(&self, state: &DialogueState, message: &str) -> anyhow::Result<DialogueTurn> {
        let mut next = state.clone();
        let was_ready = next.ready_for_analysis;
        next.messages.push(ChatMessage::user(message));
        apply_inferred(message, &mut next.extracted_profile);

        let mut reply = String::new();
        let mut sources = Vec::new();
        let mut extract = true;
        let mut self_report = None;

        if let Some(pending) = next.pending_research.take() {
            match classify(message) {
                ConsentSignal::Confirm => {
                    extract = false;
                    let found = self.research_field(&next.extracted_profile, pending.field).await?;
                    match found {
                        Some((content, urls)) => {
                            reply = format!(
                                "Pesquisei e encontrei o seguinte sobre {}: {}.",
                                pending.field.label(),
                                content
                            );
                            next.extracted_profile
                                .set(pending.field, content, Provenance::Researched);
                            sources = urls.clone();
                            next.research_tasks.push(ResearchTask {
                                field: pending.field,
                                origin: ResearchOrigin::Assisted,
                                sources: urls,
                            });
                        }
                        None => {
                            reply = format!(
                                "Não encontrei dados confiáveis sobre {}. {}",
                                pending.field.label(),
                                pending.field.question()
                            );
                            next.research_tasks.push(ResearchTask {
                                field: pending.field,
                                origin: ResearchOrigin::Assisted,
                                sources: Vec::new(),
                            });
                        }
                    }
                    if !next.fields_researched.contains(&pending.field) {
                        next.fields_researched.push(pending.field);
                    }
                }
                ConsentSignal::Reject => {
                    next.research_tasks.push(ResearchTask {
                        field: pending.field,
                        origin: ResearchOrigin::Rejected,
                        sources: Vec::new(),
                    });
                    if carries_answer(message) {
                        self_report = Some(pending.field);
                    } else {
                        extract = false;
                        reply = format!("Sem problemas! {}", pending.field.question());
                    }
                }
                ConsentSignal::Other => {
                    next.extracted_profile.set(
                        pending.field,
                        FieldContent::text(message),
                        Provenance::UserStated,
                    );
                }
            }
        }

        let mut proposed = None;
        if extract {
            let extraction = self.extract(&next).await?;
            next.extracted_profile.merge_json(&extraction.updated_fields);
            if let Some(field) = self_report {
                if !next.extracted_profile.is_filled(field) {
                    next.extracted_profile.set(field, FieldContent::text(message), Provenance::UserStated);
                }
            }
            reply = extraction.reply.trim().to_string();
            proposed = extraction
                .research_proposal
                .and_then(|p| self.accept_proposal(&next, p));
        }

        normalize(&mut next.extracted_profile);
        next.refresh();

        if let Some(pending) = proposed {
            let ask = consent_question(&pending);
            reply = if reply.is_empty() {
                ask
            } else {
                format!("{}\n\n{}", reply, ask)
            };
            next.pending_research = Some(pending);
        } else if next.ready_for_analysis && !was_ready {
            reply = if reply.is_empty() {
                READY_INVITATION.to_string()
            } else {
                format!("{}\n\n{}", reply, READY_INVITATION)
            };
        } else if reply.is_empty() {
            reply = next_question(&next);
        }

        next.messages
            .push(ChatMessage::assistant(reply.clone()).with_sources(sources));

        Ok(DialogueTurn {
            kind: TurnKind::Answered,
            reply,
            state: next,
        })
    }

    async fn extract(&self, state: &DialogueState) -> anyhow::Result<Extraction> {
        let missing: Vec<&str> = state.extracted_profile.missing_required().iter().map(|f| f.key()).collect();
        let researchable: Vec<&str> = ProfileField::ALL
            .iter()
            .filter(|f| f.is_researchable() && !state.fields_researched.contains(f))
            .map(|f| f.key())
            .collect();
        let known_keys: Vec<&str> = ProfileField::ALL.iter().map(|f| f.key()).collect();

        let prompt = format!(
            r#"CONVERSA ATÉ AGORA:
{transcript}

CAMPOS JÁ COLETADOS:
{fields}

CAMPOS OBRIGATÓRIOS FALTANDO: {missing}
CAMPOS QUE PODEM SER PESQUISADOS: {researchable}
CHAVES VÁLIDAS: {keys}

Responda APENAS com JSON:
{{
  "reply": "próxima mensagem curta e amigável para o empreendedor, com no máximo uma pergunta",
  "updated_fields": {{ "chave": "valor dito pelo usuário" }},
  "research_proposal": null ou {{ "field": "chave pesquisável", "rationale": "por que pesquisar ajuda" }}
}}"#,
            transcript = render_transcript(&state.messages, TRANSCRIPT_WINDOW),
            fields = serde_json::to_string_pretty(&state.extracted_profile.to_prompt_json())?,
            missing = missing.join(", "),
            researchable = researchable.join(", "),
            keys = known_keys.join(", "),
        );

        let request = CompletionRequest::new(EXTRACTION_SYSTEM, prompt).temperature(0.3);
        complete_as(self.llm.as_ref(), &request).await
    }

    /// Keep a proposal only for researchable fields the user has not stated
    fn accept_proposal(&self, state: &DialogueState, proposal: Proposal) -> Option<PendingResearch> {
        let field: ProfileField = proposal.field.parse().ok()?;
        if !field.is_researchable()
            || state.extracted_profile.is_filled(field)
            || state.fields_researched.contains(&field)
        {
            return None;
        }
        Some(PendingResearch {
            field,
            rationale: proposal.rationale,
        })
    }

    /// Look up one field; only reachable after an explicit confirmation
    async fn research_field(
        &self,
        profile: &FieldMap,
        field: ProfileField,
    ) -> anyhow::Result<Option<(FieldContent, Vec<String>)>> {
        let Some(template) = field.search_template() else {
            return Ok(None);
        };
        let query = fill_template(template, profile);
        let hits = self.search.search(&query, RESEARCH_RESULTS).await?;
        if hits.is_empty() {
            return Ok(None);
        }

        let findings = hits
            .iter()
            .map(|h| format!("- {}: {}", h.title, crate::text::preview(&h.snippet, 400)))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Campo: {}\nPergunta original: {}\nNegócio: {}\n\nRESULTADOS DA PESQUISA:\n{}\n\n\
             Responda APENAS com JSON {{\"value\": \"resposta curta\"}} ou, para listas, \
             {{\"value\": [\"item\", ...]}}. Use string vazia se os resultados não ajudarem.",
            field.key(),
            field.question(),
            serde_json::to_string(&profile.to_prompt_json())?,
            findings
        );
        let request = CompletionRequest::new(CONDENSE_SYSTEM, prompt).temperature(0.2);
        let condensed: Condensed = complete_as(self.llm.as_ref(), &request).await?;

        let urls = hits.into_iter().map(|h| h.url).collect();
        Ok(FieldContent::from_json(&condensed.value).map(|content| (content, urls)))
    }
}

const EXTRACTION_SYSTEM: &str = "Você é um consultor de crescimento para pequenos negócios brasileiros. \
Extraia do diálogo apenas informações ditas pelo usuário, sem inventar valores. \
Nunca apague campos: omita chaves sobre as quais nada foi dito. \
Proponha pesquisa apenas para um campo pesquisável que o usuário não soube responder.";

const CONDENSE_SYSTEM: &str = "Você resume resultados de busca em uma resposta curta e factual para um campo de perfil de negócio.";

/// Ask permission before any lookup
fn consent_question(pending: &PendingResearch) -> String {
    format!(
        "Posso pesquisar {} para você? Responda \"eu concordo\" para eu pesquisar ou \"definir eu mesmo\" para responder você.",
        pending.field.label()
    )
}

/// Question for the top missing required field, or the invitation once ready
pub fn next_question(state: &DialogueState) -> String {
    match state.extracted_profile.missing_required().first() {
        Some(field) => field.question().to_string(),
        None => READY_INVITATION.to_string(),
    }
}

/// Fill `{key}` placeholders from the profile, collapsing unknowns
pub fn fill_template(template: &str, profile: &FieldMap) -> String {
    let mut query = template.to_string();
    for field in ProfileField::ALL {
        let placeholder = format!("{{{}}}", field.key());
        if query.contains(&placeholder) {
            query = query.replace(&placeholder, &profile.text(field));
        }
    }
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}
