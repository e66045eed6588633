//! Tests for task expansion, scoped chats and assists

use super::common::*;
use growth_orchestrator::chat::ChatRole;
use growth_orchestrator::expansion::{
    dimension_chat, expand_task, generate_assist, task_chat, ExpandRequest, TaskChatRequest,
};
use growth_orchestrator::pipeline::AssistKind;
use serde_json::json;
use std::sync::Arc;

fn expand_request(plan_id: &str) -> ExpandRequest {
    ExpandRequest {
        plan_id: plan_id.to_string(),
        task_id: "task_001".to_string(),
        task_title: "Cadastrar a padaria no Google Meu Negócio".to_string(),
        category: Some("presenca_digital".to_string()),
        profile: padaria_profile(),
        plan_context: json!({ "meta": "Dobrar o faturamento" }),
    }
}

// ============================================================================
// Expansion cache
// ============================================================================

#[tokio::test]
async fn test_expand_task_is_idempotent() {
    let db = memory_db();
    let search = Arc::new(CountingSearch::new(3));
    let llm = Arc::new(ScriptedLlm::new().on(EXPANDER, expansion_answer()));
    let caps = caps(&search, &llm);

    let first = expand_task(&db, &caps, &expand_request("plan-a")).await.unwrap();
    assert!(!first.cached);
    assert_eq!(first.detail.subtasks.len(), 2);
    assert_eq!(first.detail.subtasks[0].id, "st_1");
    assert_eq!(first.detail.sources.len(), 3);
    let (searches, completions) = (search.calls(), llm.calls());

    let second = expand_task(&db, &caps, &expand_request("plan-a")).await.unwrap();

    assert!(second.cached);
    assert_eq!(second.detail, first.detail);
    assert_eq!(search.calls(), searches);
    assert_eq!(llm.calls(), completions);
}

#[tokio::test]
async fn test_new_plan_id_misses_the_cache() {
    let db = memory_db();
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(ScriptedLlm::new().on(EXPANDER, expansion_answer()));
    let caps = caps(&search, &llm);

    expand_task(&db, &caps, &expand_request("plan-a")).await.unwrap();
    let redone = expand_task(&db, &caps, &expand_request("plan-b")).await.unwrap();

    assert!(!redone.cached);
    assert_eq!(redone.detail.plan_id, "plan-b");
    assert_eq!(llm.calls_to(EXPANDER), 2);
}

#[tokio::test]
async fn test_expansion_survives_search_outage() {
    let db = memory_db();
    let search = Arc::new(CountingSearch::failing());
    let llm = Arc::new(ScriptedLlm::new().on(EXPANDER, expansion_answer()));

    let expansion = expand_task(&db, &caps(&search, &llm), &expand_request("plan-a"))
        .await
        .unwrap();

    assert!(expansion.detail.sources.is_empty());
    assert_eq!(expansion.detail.main_tip, "Peça avaliações aos clientes fiéis");
}

#[tokio::test]
async fn test_empty_expansion_is_not_cached() {
    let db = memory_db();
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(ScriptedLlm::new().on(EXPANDER, json!({ "subtarefas": [] })));

    let result = expand_task(&db, &caps(&search, &llm), &expand_request("plan-a")).await;

    assert!(result.is_err());
    assert!(db.get_task_detail("plan-a", "task_001").unwrap().is_none());
}

// ============================================================================
// Scoped chats
// ============================================================================

#[tokio::test]
async fn test_task_chat_uses_detail_and_keeps_transcript() {
    let db = memory_db();
    let search = Arc::new(CountingSearch::new(2));
    let llm = Arc::new(
        ScriptedLlm::new()
            .on(EXPANDER, expansion_answer())
            .on(CHAT, json!({ "resposta": "Comece pela foto da fachada." })),
    );
    let caps = caps(&search, &llm);
    expand_task(&db, &caps, &expand_request("plan-a")).await.unwrap();
    let searches = search.calls();

    let short = TaskChatRequest {
        plan_id: "plan-a".to_string(),
        task_id: "task_001".to_string(),
        message: "e agora?".to_string(),
        task_title: None,
        profile: padaria_profile(),
    };
    let reply = task_chat(&db, &caps, &short).await.unwrap();
    assert_eq!(reply.role, ChatRole::Assistant);
    assert_eq!(reply.content, "Comece pela foto da fachada.");
    // Short questions are answered without a lookup
    assert_eq!(search.calls(), searches);
    assert!(llm.last_prompt_to(CHAT).unwrap().contains("Subir fotos"));

    let long = TaskChatRequest {
        message: "quanto tempo leva para a ficha ser verificada pelo Google?".to_string(),
        ..short
    };
    task_chat(&db, &caps, &long).await.unwrap();
    assert_eq!(search.calls(), searches + 1);

    let transcript = db.task_chat("plan-a", "task_001").unwrap();
    assert_eq!(transcript.len(), 4);
    assert_eq!(transcript[0].role, ChatRole::User);
    assert!(db.task_chat("plan-a", "task_002").unwrap().is_empty());
}

#[tokio::test]
async fn test_task_chat_sees_the_stored_analysis() {
    let db = memory_db();
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(pipeline_llm().on(CHAT, json!({ "resposta": "Comece pelo cadastro." })));
    let analysis = analyze_padaria(&search, &llm).await;
    save_under_business(&db, &analysis);

    let request = TaskChatRequest {
        plan_id: analysis.plan_id().to_string(),
        task_id: "task_001".to_string(),
        message: "e agora?".to_string(),
        task_title: None,
        profile: serde_json::Value::Null,
    };
    task_chat(&db, &caps(&search, &llm), &request).await.unwrap();

    let prompt = llm.last_prompt_to(CHAT).unwrap();
    assert!(prompt.contains("Cadastrar a padaria no Google Meu Negócio"));
    assert!(prompt.contains("40/100: Perfil pouco ativo"));
    assert!(prompt.contains("Fase do plano: Base"));
    assert!(prompt.contains("padaria artesanal em Campinas, SP"));
}

#[tokio::test]
async fn test_task_chat_without_stored_analysis_uses_payload() {
    let db = memory_db();
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(ScriptedLlm::new().on(CHAT, json!({ "resposta": "Use fotos boas." })));
    let request = TaskChatRequest {
        plan_id: "plan-solto".to_string(),
        task_id: "task_001".to_string(),
        message: "e agora?".to_string(),
        task_title: Some("Subir fotos".to_string()),
        profile: padaria_profile(),
    };

    task_chat(&db, &caps(&search, &llm), &request).await.unwrap();

    let prompt = llm.last_prompt_to(CHAT).unwrap();
    assert!(prompt.contains("análise não disponível"));
    assert!(prompt.contains("padaria artesanal em Campinas, SP"));
}

#[tokio::test]
async fn test_dimension_chat_is_scoped_to_dimension() {
    let db = memory_db();
    let search = Arc::new(CountingSearch::new(2));
    let llm = Arc::new(pipeline_llm().on(CHAT, json!({ "resposta": "Poste fotos diárias." })));
    let analysis = analyze_padaria(&search, &llm).await;
    let searches = search.calls();

    let reply = dimension_chat(&db, &caps(&search, &llm), &analysis, Dimension::DigitalPresence, "por onde começo?")
        .await
        .unwrap();

    assert_eq!(search.calls(), searches + 1);
    assert!(!reply.sources.is_empty());
    let prompt = llm.last_prompt_to(CHAT).unwrap();
    assert!(prompt.contains("Cadastrar a padaria no Google Meu Negócio"));
    assert!(!prompt.contains("Fechar parceria"));

    assert_eq!(db.dimension_chat(&analysis.id, Dimension::DigitalPresence).unwrap().len(), 2);
    assert!(db.dimension_chat(&analysis.id, Dimension::Pricing).unwrap().is_empty());
}

#[tokio::test]
async fn test_blank_chat_answer_is_an_error() {
    let db = memory_db();
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(ScriptedLlm::new().on(CHAT, json!({ "resposta": "  " })));
    let request = TaskChatRequest {
        plan_id: "plan-a".to_string(),
        task_id: "task_001".to_string(),
        message: "oi".to_string(),
        task_title: Some("Qualquer".to_string()),
        profile: json!({}),
    };

    assert!(task_chat(&db, &caps(&search, &llm), &request).await.is_err());
    assert!(db.task_chat("plan-a", "task_001").unwrap().is_empty());
}

// ============================================================================
// Assists
// ============================================================================

#[tokio::test]
async fn test_competitor_assist_searches_first() {
    let search = Arc::new(CountingSearch::new(2));
    let llm = Arc::new(pipeline_llm().on(ASSIST, json!({ "conteudo": "| Padaria | Preço |" })));
    let analysis = analyze_padaria(&search, &llm).await;
    let searches = search.calls();
    let task = analysis
        .tasks
        .iter()
        .find(|t| t.title.starts_with("Mapear"))
        .unwrap();

    let output = generate_assist(&caps(&search, &llm), &serde_json::to_value(task).unwrap(), &analysis.profile)
        .await
        .unwrap();

    assert_eq!(output.tipo, AssistKind::CompetitorAnalysis);
    assert_eq!(output.conteudo, "| Padaria | Preço |");
    assert_eq!(search.calls(), searches + 1);
    assert!(!output.sources.is_empty());
}

#[tokio::test]
async fn test_copywriting_assist_skips_search() {
    let search = Arc::new(CountingSearch::new(2));
    let llm = Arc::new(ScriptedLlm::new().on(ASSIST, json!({ "conteudo": "Pão quentinho toda manhã!" })));
    let task = json!({
        "titulo": "Escrever a bio do perfil",
        "suporte_ia": { "tipo": "copywriting", "descricao": "bio curta" }
    });
    let profile = growth_orchestrator::expansion::profile_from_value(&padaria_profile());

    let output = generate_assist(&caps(&search, &llm), &task, &profile).await.unwrap();

    assert_eq!(output.tipo, AssistKind::Copywriting);
    assert_eq!(search.calls(), 0);
    assert!(output.sources.is_empty());
}
