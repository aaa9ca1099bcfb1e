//! 计划类型定义
//!
//! PlanStep / Plan 是规划器要求 LLM 返回的结构（schemars 生成 JSON Schema）；
//! Plan::validated 去重、排序并丢弃非法依赖边，保证依赖只指向更小且存在的步号。

use std::collections::{BTreeMap, HashSet};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type StepNumber = u32;

/// 计划中的一步
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PlanStep {
    /// Sequence number of the step.
    pub step: StepNumber,
    /// The specific, actionable task to perform.
    pub task: String,
    /// Specialist to use: 'researcher', 'analyst', 'writer' or 'fact_checker'.
    pub specialist: String,
    /// Step numbers this step depends on.
    #[serde(default)]
    pub depends_on: Vec<StepNumber>,
}

/// 有序步骤列表
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    /// Ordered list of steps to achieve the goal.
    pub steps: Vec<PlanStep>,
}

/// 计划校验问题（只记录，不致命）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanValidationError {
    #[error("duplicate step number {0}; keeping the first occurrence")]
    DuplicateStep(StepNumber),

    #[error("step {step} depends on {depends_on}, which is not an earlier step in the plan")]
    InvalidDependency {
        step: StepNumber,
        depends_on: StepNumber,
    },

    #[error("plan has no steps")]
    EmptyPlan,

    #[error("plan could not be parsed: {0}")]
    Unparseable(String),
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    /// 单步兜底计划：由 researcher 处理整个查询
    pub fn single_step(query: &str) -> Self {
        Self::new(vec![PlanStep {
            step: 1,
            task: query.to_string(),
            specialist: "researcher".to_string(),
            depends_on: Vec::new(),
        }])
    }

    pub fn get(&self, step: StepNumber) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step == step)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// 规范化：重复步号保留首个；按步号升序；丢弃指向不存在或不更小步号的依赖边，并去重
    pub fn validated(self) -> (Plan, Vec<PlanValidationError>) {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();
        let mut steps: Vec<PlanStep> = Vec::with_capacity(self.steps.len());
        for s in self.steps {
            if seen.insert(s.step) {
                steps.push(s);
            } else {
                issues.push(PlanValidationError::DuplicateStep(s.step));
            }
        }
        steps.sort_by_key(|s| s.step);

        for s in steps.iter_mut() {
            let mut kept = Vec::with_capacity(s.depends_on.len());
            for &dep in &s.depends_on {
                if dep < s.step && seen.contains(&dep) {
                    if !kept.contains(&dep) {
                        kept.push(dep);
                    }
                } else {
                    issues.push(PlanValidationError::InvalidDependency {
                        step: s.step,
                        depends_on: dep,
                    });
                }
            }
            s.depends_on = kept;
        }

        if steps.is_empty() {
            issues.push(PlanValidationError::EmptyPlan);
        }
        (Plan { steps }, issues)
    }
}

/// 单步执行结果：成功文本或失败注记
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Success { output: String },
    Failed { error: String },
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StepOutcome::Success { .. })
    }

    /// 依赖方上下文中的文本
    pub fn context_text(&self) -> String {
        match self {
            StepOutcome::Success { output } => output.clone(),
            StepOutcome::Failed { error } => format!("[upstream step failed: {}]", error),
        }
    }

    /// 综合阶段中的文本
    pub fn synthesis_text(&self) -> String {
        match self {
            StepOutcome::Success { output } => output.clone(),
            StepOutcome::Failed { error } => format!("[FAILED: {}]", error),
        }
    }
}

pub type StepResults = BTreeMap<StepNumber, StepOutcome>;

#[cfg(test)]
mod tests {
    use super::*;

    fn step(n: StepNumber, deps: &[StepNumber]) -> PlanStep {
        PlanStep {
            step: n,
            task: format!("task {}", n),
            specialist: "researcher".into(),
            depends_on: deps.to_vec(),
        }
    }

    #[test]
    fn test_valid_plan_is_unchanged() {
        let plan = Plan::new(vec![step(1, &[]), step(2, &[1]), step(3, &[1, 2])]);
        let (out, issues) = plan.clone().validated();
        assert_eq!(out, plan);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_forward_self_and_missing_edges_are_dropped() {
        let plan = Plan::new(vec![step(1, &[2]), step(2, &[2, 9, 1, 1])]);
        let (out, issues) = plan.validated();
        assert!(out.steps[0].depends_on.is_empty());
        assert_eq!(out.steps[1].depends_on, vec![1]);
        assert_eq!(issues.len(), 3);
        assert!(issues.contains(&PlanValidationError::InvalidDependency {
            step: 2,
            depends_on: 9
        }));
    }

    #[test]
    fn test_duplicates_keep_first_and_steps_are_sorted() {
        let mut dup = step(1, &[]);
        dup.task = "second copy".into();
        let plan = Plan::new(vec![step(3, &[1]), step(1, &[]), dup]);
        let (out, issues) = plan.validated();
        let nums: Vec<_> = out.steps.iter().map(|s| s.step).collect();
        assert_eq!(nums, vec![1, 3]);
        assert_eq!(out.steps[0].task, "task 1");
        assert_eq!(issues, vec![PlanValidationError::DuplicateStep(1)]);
    }

    #[test]
    fn test_empty_plan_is_reported() {
        let (_, issues) = Plan::default().validated();
        assert_eq!(issues, vec![PlanValidationError::EmptyPlan]);
    }

    #[test]
    fn test_outcome_texts() {
        let failed = StepOutcome::Failed {
            error: "timeout".into(),
        };
        assert!(failed.context_text().contains("upstream step failed"));
        assert!(!failed.is_success());
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["status"], "failed");
    }
}
