//! Tests for the five-phase analysis pipeline
//!
//! Runs `run_analysis` end to end against scripted search and completion.

use super::common::*;
use growth_orchestrator::error::PipelineError;
use growth_orchestrator::pipeline::{Classification, DegradedReason, DimensionSources};
use serde_json::json;
use std::sync::Arc;

async fn run(
    search: &Arc<CountingSearch>,
    llm: &Arc<ScriptedLlm>,
    profile: serde_json::Value,
) -> Result<Analysis, PipelineError> {
    let (tx, _rx) = frame_channel();
    let request = AnalyzeRequest {
        profile,
        formal: None,
        business_id: None,
    };
    run_analysis(&request, &caps(search, llm), &PipelineSettings::default(), &tx).await
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_full_analysis() {
    let search = Arc::new(CountingSearch::new(2));
    let llm = Arc::new(pipeline_llm());

    let analysis = run(&search, &llm, padaria_profile()).await.unwrap();

    assert_eq!(analysis.score.dimensions.len(), 6);
    // 0.2*40 + 0.2*55 + 0.15*(30 + 65 + 75 + 50) = 52
    assert_eq!(analysis.score.overall, 52);
    assert_eq!(analysis.score.classification, Classification::from_score(52));
    assert_eq!(analysis.score.summary, "Negócio promissor com pouca visibilidade.");
    assert!(analysis.degraded.is_empty());

    let ids: Vec<&str> = analysis.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["task_001", "task_002", "task_003", "task_004"]);
    assert!(analysis
        .tasks
        .windows(2)
        .all(|pair| pair[0].computed_priority >= pair[1].computed_priority));
    assert_eq!(analysis.tasks[0].title, "Cadastrar a padaria no Google Meu Negócio");

    let plan = analysis.execution_plan.as_ref().unwrap();
    assert_eq!(plan.phases.len(), 2);
    assert_eq!(plan.phases[0].id, "fase_1");
    assert_eq!(analysis.plan_id(), analysis.id);
}

#[tokio::test]
async fn test_profiler_output_fills_gaps_only() {
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(pipeline_llm());

    let analysis = run(&search, &llm, padaria_profile()).await.unwrap();

    assert_eq!(analysis.profile.segment(), "padaria artesanal");
    assert_eq!(
        analysis
            .profile
            .field(growth_orchestrator::dialogue::ProfileField::ProductType),
        "pães de fermentação natural"
    );
    assert!(analysis.profile.restrictions.solo_team);
}

#[tokio::test]
async fn test_unknown_category_goes_to_weakest_dimension() {
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(pipeline_llm());

    let analysis = run(&search, &llm, padaria_profile()).await.unwrap();
    let mapped = analysis
        .tasks
        .iter()
        .find(|t| t.title.starts_with("Mapear"))
        .unwrap();

    assert_eq!(mapped.category, analysis.score.weakest());
    assert_eq!(mapped.category, Dimension::ChannelDiversification);
}

#[tokio::test]
async fn test_task_order_is_deterministic() {
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(pipeline_llm());

    let first = run(&search, &llm, padaria_profile()).await.unwrap();
    let second = run(&search, &llm, padaria_profile()).await.unwrap();

    let titles = |a: &Analysis| a.tasks.iter().map(|t| t.title.clone()).collect::<Vec<_>>();
    assert_eq!(titles(&first), titles(&second));
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn test_progress_frames_follow_phase_order() {
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(pipeline_llm());
    let (tx, mut rx) = frame_channel();
    let request = AnalyzeRequest {
        profile: padaria_profile(),
        formal: None,
        business_id: None,
    };

    run_analysis(&request, &caps(&search, &llm), &PipelineSettings::default(), &tx)
        .await
        .unwrap();
    let phases = drain_phases(&mut rx);

    assert!(phases.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(phases.first(), Some(&1));
    assert_eq!(phases.last(), Some(&5));
}

// ============================================================================
// Sources and degradation
// ============================================================================

#[tokio::test]
async fn test_every_dimension_declares_sources() {
    let search = Arc::new(CountingSearch::new(2));
    let llm = Arc::new(pipeline_llm());

    let analysis = run(&search, &llm, padaria_profile()).await.unwrap();

    for dimension in &analysis.score.dimensions {
        match &dimension.sources {
            DimensionSources::Cited { urls } => assert!(!urls.is_empty()),
            DimensionSources::NoSource { .. } => panic!("{} has hits but no citation", dimension.dimension),
        }
    }
    assert!(analysis.market_data.total_sources() <= PipelineSettings::default().max_sources_total);
}

#[tokio::test]
async fn test_search_outage_degrades_instead_of_failing() {
    let search = Arc::new(CountingSearch::failing());
    let llm = Arc::new(pipeline_llm());

    let analysis = run(&search, &llm, padaria_profile()).await.unwrap();

    for dimension in &analysis.score.dimensions {
        match &dimension.sources {
            DimensionSources::NoSource { reason } => assert!(!reason.is_empty()),
            DimensionSources::Cited { .. } => panic!("no search succeeded"),
        }
        assert!(dimension.justification.starts_with("Dados insuficientes"));
    }
    let no_sources = analysis
        .degraded
        .iter()
        .filter(|d| matches!(d, DegradedReason::NoSources { .. }))
        .count();
    assert_eq!(no_sources, 6);
}

#[tokio::test]
async fn test_profiler_failure_is_not_fatal() {
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(
        ScriptedLlm::new()
            .on(SCORER, scorer_answer())
            .on(PLANNER, tasks_answer())
            .on(MACRO_PLANNER, plan_answer()),
    );

    let analysis = run(&search, &llm, padaria_profile()).await.unwrap();

    assert!(analysis
        .degraded
        .contains(&DegradedReason::FormalProfileUnavailable));
    assert_eq!(analysis.profile.segment(), "padaria artesanal");
}

#[tokio::test]
async fn test_missing_scores_fall_back_to_neutral() {
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(
        ScriptedLlm::new()
            .on(PROFILER, profiler_answer())
            .on(SCORER, json!({ "dimensoes": { "presenca_digital": { "score": 20 } } }))
            .on(PLANNER, tasks_answer())
            .on(MACRO_PLANNER, plan_answer()),
    );

    let analysis = run(&search, &llm, padaria_profile()).await.unwrap();

    let defaulted = analysis
        .degraded
        .iter()
        .filter(|d| matches!(d, DegradedReason::ScoreDefaulted { .. }))
        .count();
    assert_eq!(defaulted, 5);
    assert_eq!(analysis.score.dimension(Dimension::Pricing).unwrap().score, 50);
}

#[tokio::test]
async fn test_incoherent_plan_is_omitted() {
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(
        ScriptedLlm::new()
            .on(PROFILER, profiler_answer())
            .on(SCORER, scorer_answer())
            .on(PLANNER, tasks_answer())
            .on(
                MACRO_PLANNER,
                json!({
                    "meta": "Crescer",
                    "fases": [
                        { "titulo": "A", "tarefas": ["task_001"] },
                        { "titulo": "B", "tarefas": ["task_999"] }
                    ]
                }),
            ),
    );

    let analysis = run(&search, &llm, padaria_profile()).await.unwrap();

    assert!(analysis.execution_plan.is_none());
    assert!(analysis.degraded.contains(&DegradedReason::ExecutionPlanOmitted));
    assert_eq!(analysis.tasks.len(), 4);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_no_usable_tasks_fails_phase_four() {
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(
        ScriptedLlm::new()
            .on(PROFILER, profiler_answer())
            .on(SCORER, scorer_answer())
            .on(PLANNER, json!({ "tasks": [{ "titulo": "" }] })),
    );

    let err = run(&search, &llm, padaria_profile()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Phase { phase: 4, .. }));
}

#[tokio::test]
async fn test_profile_without_segment_is_rejected() {
    let search = Arc::new(CountingSearch::new(1));
    let llm = Arc::new(ScriptedLlm::new().on(PROFILER, json!({ "perfil": {} })));

    let err = run(&search, &llm, json!({ "nome_negocio": "Sem Segmento" }))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidProfile(_)));
    assert_eq!(search.calls(), 0);
}
