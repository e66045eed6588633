//! Analysis pipeline: profile → research → score → tasks → execution plan
//!
//! Each phase lives in its own module; [`workflow::run_analysis`] sequences
//! them under per-phase budgets and streams progress as frames.

pub mod batch;
pub mod phase2_research;
pub mod phase3_score;
pub mod phase4_tasks;
pub mod phase5_execution_plan;
pub mod profile;
pub mod types;
pub mod workflow;

pub use profile::{merge_profile_sources, Profile, ProfileSources, Restrictions};
pub use types::{
    AiAssist, Analysis, AssistKind, BusinessScore, Classification, DegradedReason, Dimension,
    DimensionScore, DimensionSources, DimensionStatus, ExecutionPlan, MarketData, PlanPhase, Task,
};
pub use workflow::{run_analysis, AnalyzeRequest};
