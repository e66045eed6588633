//! Phase 5: optional execution plan
//!
//! Anything short of a coherent grouping yields `None`; the caller then
//! shows the flat task board.

use std::collections::HashSet;

use anyhow::Result;
use serde_json::Value;

use growth_sdk::{emit_thought, FrameSink};

use super::profile::Profile;
use super::types::{lenient_strings, BusinessScore, ExecutionPlan, PlanPhase, Task};
use crate::dialogue::ProfileField;
use crate::providers::{CompletionProvider, CompletionRequest};

pub const MIN_PHASES: usize = 2;
pub const MAX_PHASES: usize = 4;

fn text(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Accept a drafted plan only if it is coherent with `tasks`
///
/// Coherent means 2 to 4 phases, none empty, every task id known and no id
/// used twice. Phase ids are re-issued as `fase_N`.
pub fn validate_plan(draft: &Value, tasks: &[Task]) -> Option<ExecutionPlan> {
    let goal = text(draft, "meta");
    let phases = draft.get("fases")?.as_array()?;
    if goal.is_empty() || !(MIN_PHASES..=MAX_PHASES).contains(&phases.len()) {
        return None;
    }

    let known: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
    let mut used: HashSet<String> = HashSet::new();
    let mut plan_phases = Vec::with_capacity(phases.len());

    for (idx, phase) in phases.iter().enumerate() {
        let task_ids = phase.get("tarefas").map(lenient_strings).unwrap_or_default();
        if task_ids.is_empty() {
            return None;
        }
        for id in &task_ids {
            if !known.contains(id.as_str()) || !used.insert(id.clone()) {
                return None;
            }
        }
        let title = text(phase, "titulo");
        plan_phases.push(PlanPhase {
            id: format!("fase_{}", idx + 1),
            title: if title.is_empty() {
                format!("Fase {}", idx + 1)
            } else {
                title
            },
            summary: text(phase, "descricao_curta"),
            weeks: text(phase, "semanas"),
            task_ids,
        });
    }

    Some(ExecutionPlan {
        goal,
        horizon: text(draft, "horizonte"),
        strategy_summary: text(draft, "resumo_estrategia"),
        phases: plan_phases,
    })
}

const MACRO_PLANNER_SYSTEM: &str = "Você organiza tarefas de crescimento em fases cronológicas \
com uma meta única e mensurável. Retorne APENAS JSON válido.";

/// Draft a plan; `Ok(None)` when the draft is not coherent
pub async fn plan_execution(
    llm: &dyn CompletionProvider,
    profile: &Profile,
    score: &BusinessScore,
    tasks: &[Task],
    sink: &dyn FrameSink,
) -> Result<Option<ExecutionPlan>> {
    emit_thought!(sink, 5, "Organizando as tarefas em fases...");

    let task_lines = tasks
        .iter()
        .map(|t| format!("- {} | {} | {} | prioridade {}", t.id, t.title, t.category, t.computed_priority))
        .collect::<Vec<_>>()
        .join("\n");
    let prompt = format!(
        r#"NEGÓCIO: {name} ({segment}, {location})
OBJETIVO DECLARADO: {goals}
SCORE ATUAL: {overall}/100

TAREFAS:
{tasks}

Agrupe as tarefas em {min} a {max} fases cronológicas. Use apenas os ids listados, sem repetir.
Responda com JSON:
{{
  "meta": "meta principal mensurável",
  "horizonte": "ex: 8 semanas",
  "resumo_estrategia": "1-2 frases",
  "fases": [{{ "titulo": "...", "descricao_curta": "...", "semanas": "1-2", "tarefas": ["task_001"] }}]
}}"#,
        name = profile.field(ProfileField::BusinessName),
        segment = profile.segment(),
        location = profile.field(ProfileField::Location),
        goals = profile.field(ProfileField::Goals),
        overall = score.overall,
        tasks = task_lines,
        min = MIN_PHASES,
        max = MAX_PHASES,
    );

    let request = CompletionRequest::new(MACRO_PLANNER_SYSTEM, prompt).temperature(0.3);
    let draft = llm.complete(&request).await?;
    let plan = validate_plan(&draft, tasks);

    match &plan {
        Some(plan) => emit_thought!(sink, 5, "Plano gerado: {} fases", plan.phases.len()),
        None => tracing::warn!("execution plan draft was not coherent, omitting it"),
    }
    Ok(plan)
}
