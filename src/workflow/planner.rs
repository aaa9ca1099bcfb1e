//! 任务规划器：把复杂查询拆成带依赖的专家步骤
//!
//! 以 JSON Schema 结构化输出请求计划；回复里的 ```json 代码块或首尾花括号之间的 JSON 都会被提取。
//! 解析失败或计划为空时退回单步 researcher 计划；补全服务失败则向上返回。

use std::sync::Arc;

use crate::core::AgentError;
use crate::llm::{CompletionRequest, LlmClient, ResponseFormat};
use crate::memory::Message;
use crate::tools::schema::parameters_for;
use crate::workflow::types::{Plan, PlanStep, PlanValidationError};

pub const PLANNER_PROMPT: &str = r#"You are a task planning assistant for a team of specialists.
Decompose the user's request into a minimal, ordered plan. Each step is assigned to exactly one specialist:

- researcher: finds and retrieves factual information with sources. Never analyzes or writes reports.
- analyst: evaluates gathered information, cross-references claims, extracts insights with confidence levels.
- writer: produces the final polished document from the analysis, preserving citations.
- fact_checker: verifies claims in a draft and lists issues and corrections.

Rules:
1. Number steps 1, 2, 3, ... in execution order.
2. depends_on lists the earlier step numbers whose results the step needs. Never reference a later step.
3. Use as few steps as the request allows; simple questions need a single researcher step.

Respond with JSON only: {"steps": [{"step": 1, "task": "...", "specialist": "researcher", "depends_on": []}]}"#;

/// 从 LLM 回复中提取 JSON 文本
pub fn extract_json(output: &str) -> &str {
    let trimmed = output.trim();
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        return rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
    }
    if let Some(start) = trimmed.find("```") {
        let rest = &trimmed[start + 3..];
        if let Some(end) = rest.find("```") {
            return rest[..end].trim();
        }
    }
    let obj = trimmed.find('{').zip(trimmed.rfind('}'));
    let arr = trimmed.find('[').zip(trimmed.rfind(']'));
    match (obj, arr) {
        (Some((s, e)), Some((as_, ae))) if as_ < s && ae > e => &trimmed[as_..=ae],
        (Some((s, e)), _) if s < e => &trimmed[s..=e],
        (None, Some((s, e))) if s < e => &trimmed[s..=e],
        _ => trimmed,
    }
}

/// 解析计划：接受 {"steps": [...]} 或裸数组
pub fn parse_plan(output: &str) -> Result<Plan, PlanValidationError> {
    let json = extract_json(output);
    if let Ok(plan) = serde_json::from_str::<Plan>(json) {
        return Ok(plan);
    }
    serde_json::from_str::<Vec<PlanStep>>(json)
        .map(Plan::new)
        .map_err(|e| PlanValidationError::Unparseable(e.to_string()))
}

pub struct TaskPlanner {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl TaskPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }

    /// 请求并校验计划；非法边被丢弃并记录
    pub async fn create_plan(&self, query: &str) -> Result<Plan, AgentError> {
        let request = CompletionRequest::new(
            &self.model,
            vec![Message::system(PLANNER_PROMPT), Message::user(query)],
        )
        .with_response_format(ResponseFormat {
            name: "plan".to_string(),
            schema: parameters_for::<Plan>(),
        });
        let completion = self.llm.complete(&request).await?;
        let raw = completion.text_content().unwrap_or_default();

        let plan = match parse_plan(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "planner output unusable, falling back to single-step plan");
                return Ok(Plan::single_step(query));
            }
        };

        let (plan, issues) = plan.validated();
        for issue in &issues {
            tracing::warn!(issue = %issue, "plan validation");
        }
        if plan.is_empty() {
            tracing::warn!("planner returned an empty plan, falling back to single-step plan");
            return Ok(Plan::single_step(query));
        }
        for s in &plan.steps {
            tracing::info!(step = s.step, specialist = %s.specialist, depends_on = ?s.depends_on, task = %s.task, "plan step");
        }
        Ok(plan)
    }
}
