//! Plan-and-Execute 编排：计划类型、依赖图、规划器、专家分派与执行引擎

pub mod engine;
pub mod graph;
pub mod planner;
pub mod specialist;
pub mod types;

pub use engine::{build_context, OrchestratorMetadata, OrchestratorResult, PlanExecuteAgent};
pub use graph::PlanGraph;
pub use planner::{extract_json, parse_plan, TaskPlanner};
pub use specialist::{
    build_sub_task, LlmSpecialists, ReactSpecialists, SpecialistDispatcher, SpecialistRole,
};
pub use types::{Plan, PlanStep, PlanValidationError, StepNumber, StepOutcome, StepResults};
