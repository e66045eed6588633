//! Tests for the dialogue extraction engine
//!
//! Covers the greeting, field accumulation, readiness and the research
//! consent gate with scripted capabilities.

use super::common::*;
use growth_orchestrator::dialogue::engine::{GREETING, READY_INVITATION};
use growth_orchestrator::dialogue::{
    DialogueEngine, DialogueState, FieldContent, ProfileField, Provenance, ResearchOrigin, TurnKind,
};
use serde_json::json;
use std::sync::Arc;

fn engine(search: &Arc<CountingSearch>, llm: &Arc<ScriptedLlm>) -> DialogueEngine {
    DialogueEngine::new(llm.clone(), search.clone())
}

fn proposing_competitors() -> serde_json::Value {
    json!({
        "reply": "Anotado!",
        "updated_fields": { "segmento": "padaria artesanal", "localizacao": "Campinas, SP" },
        "research_proposal": { "field": "concorrentes", "rationale": "ajuda a comparar preços" }
    })
}

// ============================================================================
// Greeting and accumulation
// ============================================================================

#[tokio::test]
async fn test_first_empty_turn_greets() {
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(ScriptedLlm::new());

    let turn = engine(&search, &llm).turn(DialogueState::default(), "").await;

    assert_eq!(turn.kind, TurnKind::Greeting);
    assert_eq!(turn.reply, GREETING);
    assert_eq!(turn.state.messages.len(), 1);
    assert_eq!(turn.state.fields_missing.len(), ProfileField::REQUIRED.len());
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_padaria_conversation_reaches_ready() {
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(
        ScriptedLlm::new()
            .on(
                EXTRACTION,
                json!({
                    "reply": "Que legal! Como se chama a padaria?",
                    "updated_fields": { "segmento": "padaria artesanal", "localizacao": "Campinas, SP" }
                }),
            )
            .on(
                EXTRACTION,
                json!({
                    "reply": "Perfeito.",
                    "updated_fields": {
                        "nome_negocio": "Pão Quente",
                        "modelo": "B2C",
                        "dificuldades": "poucos clientes durante a semana",
                        "objetivos": "dobrar as vendas"
                    },
                    "research_proposal": null
                }),
            ),
    );
    let engine = engine(&search, &llm);

    let greeting = engine.turn(DialogueState::default(), "").await;
    let first = engine
        .turn(
            greeting.state,
            "Tenho uma padaria artesanal em Campinas, trabalho sozinho e vendo pelo Instagram e WhatsApp",
        )
        .await;
    assert_eq!(first.kind, TurnKind::Answered);
    assert!(!first.state.ready_for_analysis);
    assert_eq!(
        first.state.extracted_profile.get(ProfileField::Employees),
        Some(&FieldContent::text("1"))
    );
    assert_eq!(
        first.state.extracted_profile.get(ProfileField::SalesChannels),
        Some(&FieldContent::List(vec!["Instagram".to_string(), "WhatsApp".to_string()]))
    );

    let second = engine
        .turn(first.state, "Chama Pão Quente, vendo direto pro consumidor e quero dobrar as vendas")
        .await;
    assert!(second.state.ready_for_analysis);
    assert!(second.state.fields_missing.is_empty());
    assert!(second.reply.contains(READY_INVITATION));
    // Earlier values survive a turn that does not mention them
    assert_eq!(second.state.extracted_profile.text(ProfileField::Location), "Campinas, SP");
    assert_eq!(second.state.messages.len(), 5);
    assert_eq!(search.calls(), 0);
}

fn recife_llm() -> ScriptedLlm {
    ScriptedLlm::new()
        .on(
            EXTRACTION,
            json!({
                "reply": "Que bom! Em qual bairro fica?",
                "updated_fields": { "segmento": "padaria", "localizacao": "Recife" }
            }),
        )
        .on(
            EXTRACTION,
            json!({
                "reply": "Entendi, atendimento local.",
                "updated_fields": { "modelo": "B2C", "nome_negocio": "Padaria de Recife" }
            }),
        )
        .on(
            EXTRACTION,
            json!({
                "reply": "Isso é comum no começo.",
                "updated_fields": { "dificuldades": "dificuldade em vender mais" }
            }),
        )
        .on(
            EXTRACTION,
            json!({
                "reply": "Ótima meta.",
                "updated_fields": { "objetivos": "dobrar faturamento em 1 ano" }
            }),
        )
        .on(
            EXTRACTION,
            json!({
                "reply": "Anotado.",
                "updated_fields": { "localizacao": "Recife, PE", "dificuldades": "" }
            }),
        )
}

#[tokio::test]
async fn test_recife_conversation_reaches_ready() {
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(recife_llm());
    let engine = engine(&search, &llm);

    let mut state = engine.turn(DialogueState::default(), "").await.state;
    let script = [
        "Tenho uma padaria em Recife",
        "Vendo só local, sem site",
        "dificuldade em vender mais",
    ];
    for message in script {
        let turn = engine.turn(state, message).await;
        assert_eq!(turn.kind, TurnKind::Answered);
        assert!(!turn.state.ready_for_analysis, "ready too early at {:?}", message);
        state = turn.state;
    }
    assert_eq!(state.fields_missing, vec![ProfileField::Goals]);
    assert_eq!(
        state.extracted_profile.get(ProfileField::SalesChannels),
        Some(&FieldContent::List(vec!["Loja física".to_string()]))
    );

    let last = engine.turn(state, "quero dobrar faturamento em 1 ano").await;

    assert!(last.state.ready_for_analysis);
    assert!(last.state.fields_missing.is_empty());
    assert_eq!(last.state.fields_collected.len(), ProfileField::REQUIRED.len());
    assert!(last.reply.contains(READY_INVITATION));
    assert_eq!(search.calls(), 0);
}

#[tokio::test]
async fn test_readiness_survives_a_restated_field() {
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(recife_llm());
    let engine = engine(&search, &llm);

    let mut state = DialogueState::default();
    for message in [
        "Tenho uma padaria em Recife",
        "Vendo só local, sem site",
        "dificuldade em vender mais",
        "quero dobrar faturamento em 1 ano",
    ] {
        state = engine.turn(state, message).await.state;
    }
    assert!(state.ready_for_analysis);

    let restated = engine.turn(state, "na real fica em Recife, Pernambuco").await;

    assert!(restated.state.ready_for_analysis);
    assert!(restated.state.fields_missing.is_empty());
    assert_eq!(restated.state.extracted_profile.text(ProfileField::Location), "Recife, PE");
    assert_eq!(
        restated.state.extracted_profile.text(ProfileField::Pains),
        "dificuldade em vender mais"
    );
    // The invitation is only sent on the turn that crosses into readiness
    assert!(!restated.reply.contains(READY_INVITATION));
}

#[tokio::test]
async fn test_failed_turn_keeps_previous_state() {
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(ScriptedLlm::new());
    let engine = engine(&search, &llm);

    let greeting = engine.turn(DialogueState::default(), "").await;
    let before = greeting.state.clone();
    let turn = engine.turn(greeting.state, "vendo bolos").await;

    assert_eq!(turn.kind, TurnKind::Failed);
    assert_eq!(turn.state, before);
    assert!(!turn.reply.is_empty());
}

#[tokio::test]
async fn test_blank_message_is_ignored_after_greeting() {
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(ScriptedLlm::new());
    let engine = engine(&search, &llm);

    let greeting = engine.turn(DialogueState::default(), "").await;
    let turn = engine.turn(greeting.state.clone(), "   ").await;

    assert_eq!(turn.kind, TurnKind::Ignored);
    assert_eq!(turn.state, greeting.state);
    assert_eq!(turn.reply, GREETING);
}

// ============================================================================
// Research consent gate
// ============================================================================

#[tokio::test]
async fn test_proposal_does_not_search_until_confirmed() {
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(
        ScriptedLlm::new()
            .on(EXTRACTION, proposing_competitors())
            .on(CONDENSE, json!({ "value": ["Padaria Trigo", "Padaria Sol"] })),
    );
    let engine = engine(&search, &llm);

    let proposed = engine.turn(DialogueState::default(), "Tenho uma padaria em Campinas").await;
    let pending = proposed.state.pending_research.clone().unwrap();
    assert_eq!(pending.field, ProfileField::Competitors);
    assert_eq!(search.calls(), 0);

    let extractions = llm.calls_to(EXTRACTION);
    let confirmed = engine.turn(proposed.state, "sim, pode pesquisar").await;

    assert_eq!(search.calls(), 1);
    assert_eq!(llm.calls_to(EXTRACTION), extractions);
    assert!(confirmed.state.pending_research.is_none());
    assert_eq!(
        confirmed.state.extracted_profile.provenance(ProfileField::Competitors),
        Some(Provenance::Researched)
    );
    assert!(confirmed.state.fields_researched.contains(&ProfileField::Competitors));
    assert_eq!(confirmed.state.research_tasks[0].origin, ResearchOrigin::Assisted);

    let last = confirmed.state.messages.last().unwrap();
    assert!(!last.sources.is_empty());
    assert!(confirmed.reply.contains("Padaria Trigo"));
}

#[tokio::test]
async fn test_rejected_proposal_never_searches() {
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(ScriptedLlm::new().on(EXTRACTION, proposing_competitors()));
    let engine = engine(&search, &llm);

    let proposed = engine.turn(DialogueState::default(), "Tenho uma padaria em Campinas").await;
    let rejected = engine.turn(proposed.state, "não, prefiro responder eu mesmo").await;

    assert_eq!(search.calls(), 0);
    assert!(rejected.state.pending_research.is_none());
    assert!(!rejected.state.extracted_profile.is_filled(ProfileField::Competitors));
    assert_eq!(rejected.state.research_tasks[0].origin, ResearchOrigin::Rejected);
    assert!(rejected.reply.starts_with("Sem problemas!"));
}

#[tokio::test]
async fn test_other_answer_fills_the_proposed_field() {
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(ScriptedLlm::new().on(EXTRACTION, proposing_competitors()));
    let engine = engine(&search, &llm);

    let proposed = engine.turn(DialogueState::default(), "Tenho uma padaria em Campinas").await;
    let answered = engine.turn(proposed.state, "Padaria Trigo e Padaria Sol").await;

    assert_eq!(search.calls(), 0);
    assert_eq!(
        answered.state.extracted_profile.provenance(ProfileField::Competitors),
        Some(Provenance::UserStated)
    );
    // Already stated, so the repeated proposal is dropped
    assert!(answered.state.pending_research.is_none());
}

#[tokio::test]
async fn test_rejection_with_own_answer_is_recorded() {
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(ScriptedLlm::new().on(EXTRACTION, proposing_competitors()));
    let engine = engine(&search, &llm);

    let proposed = engine.turn(DialogueState::default(), "Tenho uma padaria em Campinas").await;
    let extractions = llm.calls_to(EXTRACTION);
    let answered = engine
        .turn(proposed.state, "na verdade meus concorrentes são a Padaria Trigo e a Padaria Sol")
        .await;

    assert_eq!(search.calls(), 0);
    assert_eq!(llm.calls_to(EXTRACTION), extractions + 1);
    assert_eq!(answered.state.research_tasks[0].origin, ResearchOrigin::Rejected);
    assert!(answered
        .state
        .extracted_profile
        .text(ProfileField::Competitors)
        .contains("Padaria Trigo"));
    assert_eq!(
        answered.state.extracted_profile.provenance(ProfileField::Competitors),
        Some(Provenance::UserStated)
    );
    assert!(answered.state.pending_research.is_none());
}
