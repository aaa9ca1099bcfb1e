//! Plan-and-Execute 编排器
//!
//! 1. Plan：TaskPlanner 生成并校验计划
//! 2. Execute：按依赖顺序分派给专家；依赖结果以 "Step N (task): result" 行注入上下文，
//!    失败的依赖以 upstream-failed 标记代替。parallel_steps 时同一 wave 内并发执行。
//!    单步失败只记录为失败注记，不中断运行
//! 3. Synthesize：汇总查询与全部步骤结果（含失败注记）生成最终答案，保留引用

use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;

use crate::core::AgentError;
use crate::llm::{CompletionRequest, LlmClient};
use crate::memory::Message;
use crate::workflow::graph::PlanGraph;
use crate::workflow::planner::TaskPlanner;
use crate::workflow::specialist::SpecialistDispatcher;
use crate::workflow::types::{Plan, PlanStep, StepNumber, StepOutcome, StepResults};

pub const SYNTHESIS_PROMPT: &str = "You are the editor combining the work of several specialists into one final answer. \
Use only the step results provided. Preserve every citation and source reference exactly. \
If a step failed, acknowledge the gap instead of inventing its content. \
Answer the original query directly and coherently.";

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorMetadata {
    pub plan: Plan,
    pub step_results: StepResults,
    /// 实际执行顺序（并发 wave 内按步号）
    pub execution_order: Vec<StepNumber>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorResult {
    pub answer: String,
    pub metadata: OrchestratorMetadata,
}

/// 依赖上下文：按 depends_on 顺序逐行拼接
pub fn build_context(step: &PlanStep, plan: &Plan, results: &StepResults) -> String {
    step.depends_on
        .iter()
        .map(|dep| {
            let task = plan.get(*dep).map(|s| s.task.as_str()).unwrap_or("unknown task");
            let text = results
                .get(dep)
                .map(StepOutcome::context_text)
                .unwrap_or_else(|| "[upstream step failed: no result]".to_string());
            format!("Step {} ({}): {}", dep, task, text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct PlanExecuteAgent {
    planner: TaskPlanner,
    dispatcher: Arc<dyn SpecialistDispatcher>,
    llm: Arc<dyn LlmClient>,
    model: String,
    parallel_steps: bool,
}

impl PlanExecuteAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        dispatcher: Arc<dyn SpecialistDispatcher>,
    ) -> Self {
        let model = model.into();
        Self {
            planner: TaskPlanner::new(llm.clone(), model.clone()),
            dispatcher,
            llm,
            model,
            parallel_steps: true,
        }
    }

    pub fn with_parallel_steps(mut self, parallel: bool) -> Self {
        self.parallel_steps = parallel;
        self
    }

    async fn run_step(&self, step: &PlanStep, plan: &Plan, results: &StepResults) -> StepOutcome {
        let context = build_context(step, plan, results);
        tracing::info!(step = step.step, specialist = %step.specialist, deps = ?step.depends_on, "executing plan step");
        match self
            .dispatcher
            .dispatch(&step.specialist, &step.task, &context)
            .await
        {
            Ok(output) => StepOutcome::Success { output },
            Err(e) => {
                tracing::warn!(step = step.step, error = %e, "plan step failed");
                StepOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    async fn execute(&self, plan: &Plan) -> (StepResults, Vec<StepNumber>) {
        let mut results = StepResults::new();
        let mut order = Vec::with_capacity(plan.steps.len());

        if self.parallel_steps {
            for wave in PlanGraph::new(plan).waves() {
                let steps: Vec<&PlanStep> = wave.iter().filter_map(|n| plan.get(*n)).collect();
                let outcomes = {
                    let snapshot = &results;
                    join_all(steps.iter().map(|s| self.run_step(s, plan, snapshot))).await
                };
                for (s, outcome) in steps.into_iter().zip(outcomes) {
                    order.push(s.step);
                    results.insert(s.step, outcome);
                }
            }
        } else {
            for step in &plan.steps {
                let outcome = self.run_step(step, plan, &results).await;
                order.push(step.step);
                results.insert(step.step, outcome);
            }
        }
        (results, order)
    }

    async fn synthesize(
        &self,
        query: &str,
        plan: &Plan,
        results: &StepResults,
    ) -> Result<String, AgentError> {
        let results_text = plan
            .steps
            .iter()
            .map(|s| {
                let text = results
                    .get(&s.step)
                    .map(StepOutcome::synthesis_text)
                    .unwrap_or_default();
                format!("Step {} ({}): {}", s.step, s.task, text)
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let request = CompletionRequest::new(
            &self.model,
            vec![
                Message::system(SYNTHESIS_PROMPT),
                Message::user(format!(
                    "Original query: {}\n\nStep results:\n{}",
                    query, results_text
                )),
            ],
        );
        let completion = self.llm.complete(&request).await?;
        Ok(completion
            .text_content()
            .map(str::to_string)
            .unwrap_or(results_text))
    }

    pub async fn run(&self, query: &str) -> Result<OrchestratorResult, AgentError> {
        tracing::info!(phase = "plan", "plan-and-execute started");
        let plan = self.planner.create_plan(query).await?;

        tracing::info!(phase = "execute", steps = plan.steps.len(), parallel = self.parallel_steps, "executing plan");
        let (step_results, execution_order) = self.execute(&plan).await;

        tracing::info!(phase = "synthesize", "synthesizing final answer");
        let answer = self.synthesize(query, &plan, &step_results).await?;

        Ok(OrchestratorResult {
            answer,
            metadata: OrchestratorMetadata {
                plan,
                step_results,
                execution_order,
            },
        })
    }
}
