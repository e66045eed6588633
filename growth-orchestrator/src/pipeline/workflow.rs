//! Phase sequencing for one analysis run
//!
//! The primary entry point is [`run_analysis`]. Every phase runs under its
//! own budget and emits a `thought` frame before and after. A mandatory phase
//! (1 to 4) that fails or overruns aborts the run with a [`PipelineError`].
//! The execution plan (phase 5) degrades to `None` instead.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use growth_sdk::{emit_thought, FrameSink};

use super::phase2_research::research_market;
use super::phase3_score::score_business;
use super::phase4_tasks::generate_tasks;
use super::phase5_execution_plan::plan_execution;
use super::profile::formalize_profile;
use super::types::{Analysis, DegradedReason};
use crate::config::PipelineSettings;
use crate::error::PipelineError;
use crate::providers::Capabilities;

/// Payload of the `analyze` action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    /// Flat dialogue field map or `{perfil, contexto}`
    pub profile: Value,
    /// Profiler output from an earlier `profile` call; skips the profiler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formal: Option<Value>,
    /// Persist the result under this business
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_id: Option<String>,
}

/// Run one phase under `budget`, mapping failure onto [`PipelineError`]
async fn run_phase<T, Fut>(
    sink: &dyn FrameSink,
    phase: u8,
    name: &'static str,
    budget: Duration,
    work: Fut,
) -> Result<T, PipelineError>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    emit_thought!(sink, phase, "Fase {}/5 iniciada: {}", phase, name);
    let started = std::time::Instant::now();

    let outcome = match tokio::time::timeout(budget, work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(PipelineError::Phase {
            phase,
            name,
            source,
        }),
        Err(_) => Err(PipelineError::PhaseTimeout {
            phase,
            name,
            budget,
        }),
    };

    match &outcome {
        Ok(_) => {
            tracing::info!("phase {} ({}) finished in {:?}", phase, name, started.elapsed());
            emit_thought!(sink, phase, "Fase {}/5 concluída: {}", phase, name);
        }
        Err(e) => tracing::warn!("{}", e),
    }
    outcome
}

/// Profile → research → score → tasks → execution plan
///
/// # Errors
///
/// - [`PipelineError::InvalidProfile`] when the merged profile has no segment
/// - [`PipelineError::PhaseTimeout`] when phases 1 to 4 overrun their budget
/// - [`PipelineError::Phase`] when phases 1 to 4 fail
pub async fn run_analysis(
    request: &AnalyzeRequest,
    caps: &Capabilities,
    settings: &PipelineSettings,
    sink: &dyn FrameSink,
) -> Result<Analysis, PipelineError> {
    let mut degraded: Vec<DegradedReason> = Vec::new();

    let (profile, profile_degraded) = run_phase(
        sink,
        1,
        "profile",
        settings.profile_budget(),
        formalize_profile(caps.llm.as_ref(), &request.profile, request.formal.as_ref(), sink),
    )
    .await?;
    degraded.extend(profile_degraded);
    if profile.segment().trim().is_empty() {
        return Err(PipelineError::InvalidProfile(
            "merged profile has no segmento".to_string(),
        ));
    }

    let (market_data, research_degraded) = run_phase(
        sink,
        2,
        "market research",
        settings.research_budget(),
        research_market(caps.search.clone(), &profile, settings, sink),
    )
    .await?;
    degraded.extend(research_degraded);

    let (score, score_degraded) = run_phase(
        sink,
        3,
        "scoring",
        settings.scoring_budget(),
        score_business(caps.llm.as_ref(), &profile, &market_data, sink),
    )
    .await?;
    degraded.extend(score_degraded);

    let tasks = run_phase(
        sink,
        4,
        "tasks",
        settings.tasks_budget(),
        generate_tasks(caps.llm.as_ref(), &profile, &score, &market_data, sink),
    )
    .await?;

    let execution_plan = match run_phase(
        sink,
        5,
        "execution plan",
        settings.plan_budget(),
        plan_execution(caps.llm.as_ref(), &profile, &score, &tasks, sink),
    )
    .await
    {
        Ok(plan) => plan,
        Err(e) => {
            tracing::warn!("omitting execution plan: {}", e);
            None
        }
    };
    if execution_plan.is_none() {
        emit_thought!(sink, 5, "Plano de execução omitido; use o quadro de tarefas");
        degraded.push(DegradedReason::ExecutionPlanOmitted);
    }

    Ok(Analysis {
        id: Uuid::new_v4().to_string(),
        business_id: request.business_id.clone(),
        profile,
        score,
        tasks,
        market_data,
        execution_plan,
        degraded,
        created_at: Utc::now(),
    })
}
