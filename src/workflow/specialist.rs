//! 专家角色与分派
//!
//! 每个角色有一段限定职责的 system prompt（要求拒绝职责外的工作）和一组可用工具。
//! SpecialistDispatcher 是编排器与执行方之间的接缝：
//! - ReactSpecialists：每步启动一个受限 ReactAgent，专家可经网关使用工具
//! - LlmSpecialists：单次补全，不使用工具

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::{CompletionRequest, LlmClient};
use crate::memory::Message;
use crate::observability::{TraceStatus, Tracer};
use crate::react::{ReactAgent, ReactConfig};
use crate::tools::ToolExecutor;

const RESEARCHER_PROMPT: &str = "You are a Research Specialist. Your ONLY job is to find and retrieve relevant information. \
You do NOT analyze or write reports.

Standards:
1. Source everything: every claim must have a URL or document reference.
2. Consult multiple sources to avoid bias; reformulate queries if results are thin.
3. Return factual, well-sourced findings without editorializing.

If asked to analyze, write, or verify, refuse and state that this is outside your role.";

const ANALYST_PROMPT: &str = "You are an Analysis Specialist. Your ONLY job is to evaluate information and extract insights.

Standards:
1. Cross-reference claims across sources and flag contradictions.
2. Distinguish hard data from speculation and highlight what is missing.
3. Use tools only to fill critical gaps; do not fall into a research loop.
4. Rate confidence: High (multiple independent credible sources), Medium (single credible source), Low (unverified or conflicting).

Output a structured analysis (Key Insights, Evidence, Confidence). If asked to write the final report, refuse and state that this is outside your role.";

const WRITER_PROMPT: &str = "You are a Writing Specialist. Your ONLY job is to produce a polished, structured document based on the provided analysis.

Standards:
1. Write for an informed professional audience with clear Markdown headings and bullet points.
2. Preserve every source citation from the research.
3. Reflect confidence levels in wording and avoid fluff.

Do not research new facts. If asked to, refuse and state that this is outside your role.";

const FACT_CHECKER_PROMPT: &str = "You are a Fact Checker. Your ONLY job is to verify claims and identify issues.

Review the draft for verifiable claims, verify them with the available tools, and check for inconsistencies.

Output format:
VERIFICATION_RESULT: [PASS/FAIL]
ISSUES_FOUND: [list of issues, if any]
CORRECTIONS_NEEDED: [specific corrections required]
CONFIDENCE: [HIGH/MEDIUM/LOW]

If asked to write or rewrite content, refuse and state that this is outside your role.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpecialistRole {
    Researcher,
    Analyst,
    Writer,
    FactChecker,
}

impl SpecialistRole {
    pub const ALL: [SpecialistRole; 4] = [
        SpecialistRole::Researcher,
        SpecialistRole::Analyst,
        SpecialistRole::Writer,
        SpecialistRole::FactChecker,
    ];

    /// 大小写、连字符、空格不敏感
    pub fn parse(name: &str) -> Option<Self> {
        let norm = name.trim().to_lowercase().replace(['-', ' '], "_");
        match norm.as_str() {
            "researcher" => Some(SpecialistRole::Researcher),
            "analyst" => Some(SpecialistRole::Analyst),
            "writer" => Some(SpecialistRole::Writer),
            "fact_checker" | "factchecker" => Some(SpecialistRole::FactChecker),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SpecialistRole::Researcher => "researcher",
            SpecialistRole::Analyst => "analyst",
            SpecialistRole::Writer => "writer",
            SpecialistRole::FactChecker => "fact_checker",
        }
    }

    pub fn system_prompt(&self) -> &'static str {
        match self {
            SpecialistRole::Researcher => RESEARCHER_PROMPT,
            SpecialistRole::Analyst => ANALYST_PROMPT,
            SpecialistRole::Writer => WRITER_PROMPT,
            SpecialistRole::FactChecker => FACT_CHECKER_PROMPT,
        }
    }

    /// 角色可见的工具
    pub fn tools(&self) -> Vec<String> {
        let names: &[&str] = match self {
            SpecialistRole::Researcher => &["read_webpage", "list_files", "read_file"],
            SpecialistRole::Analyst => &["execute_calculation", "read_file"],
            SpecialistRole::Writer => &[],
            SpecialistRole::FactChecker => &["read_webpage", "read_file"],
        };
        names.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for SpecialistRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 把上游结果拼到任务后面
pub fn build_sub_task(task: &str, context: &str) -> String {
    if context.trim().is_empty() {
        task.to_string()
    } else {
        format!("{}\n\nContext from previous steps:\n{}", task, context)
    }
}

#[async_trait]
pub trait SpecialistDispatcher: Send + Sync {
    /// 以 role 执行 task；未知角色返回 AgentError::UnknownSpecialist
    async fn dispatch(&self, role: &str, task: &str, context: &str) -> Result<String, AgentError>;
}

fn resolve_role(role: &str) -> Result<SpecialistRole, AgentError> {
    SpecialistRole::parse(role).ok_or_else(|| AgentError::UnknownSpecialist(role.to_string()))
}

/// 每步一个受限 ReactAgent
pub struct ReactSpecialists {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    tracer: Arc<Tracer>,
    base: ReactConfig,
}

impl ReactSpecialists {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        tracer: Arc<Tracer>,
        base: ReactConfig,
    ) -> Self {
        Self {
            llm,
            executor,
            tracer,
            base,
        }
    }
}

#[async_trait]
impl SpecialistDispatcher for ReactSpecialists {
    async fn dispatch(&self, role: &str, task: &str, context: &str) -> Result<String, AgentError> {
        let role = resolve_role(role)?;
        let config = ReactConfig {
            agent_name: format!("{}:{}", self.base.agent_name, role),
            system_prompt: role.system_prompt().to_string(),
            allowed_tools: Some(role.tools()),
            ..self.base.clone()
        };
        let agent = ReactAgent::new(
            self.llm.clone(),
            self.executor.clone(),
            self.tracer.clone(),
            config,
        );
        let result = agent.run(&build_sub_task(task, context)).await?;
        tracing::info!(role = %role, trace_id = %result.trace_id, steps = result.total_steps, status = result.status.as_str(), "specialist finished");
        if result.status != TraceStatus::Completed {
            return Err(AgentError::AgentExecution(format!(
                "{} specialist stopped without a final answer ({})",
                role,
                result.status.as_str()
            )));
        }
        Ok(result.answer)
    }
}

/// 单次补全的专家（无工具）
pub struct LlmSpecialists {
    llm: Arc<dyn LlmClient>,
    model: String,
}

impl LlmSpecialists {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>) -> Self {
        Self {
            llm,
            model: model.into(),
        }
    }
}

#[async_trait]
impl SpecialistDispatcher for LlmSpecialists {
    async fn dispatch(&self, role: &str, task: &str, context: &str) -> Result<String, AgentError> {
        let role = resolve_role(role)?;
        let request = CompletionRequest::new(
            &self.model,
            vec![
                Message::system(role.system_prompt()),
                Message::user(build_sub_task(task, context)),
            ],
        );
        let completion = self.llm.complete(&request).await?;
        completion
            .text_content()
            .map(str::to_string)
            .ok_or_else(|| AgentError::AgentExecution(format!("{} returned an empty response", role)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::tools::CapabilityRegistry;

    #[test]
    fn test_role_parsing_is_lenient() {
        assert_eq!(SpecialistRole::parse("Researcher"), Some(SpecialistRole::Researcher));
        assert_eq!(SpecialistRole::parse("fact-checker"), Some(SpecialistRole::FactChecker));
        assert_eq!(SpecialistRole::parse("fact checker"), Some(SpecialistRole::FactChecker));
        assert_eq!(SpecialistRole::parse("poet"), None);
    }

    #[test]
    fn test_every_prompt_instructs_refusal() {
        for role in SpecialistRole::ALL {
            assert!(role.system_prompt().contains("refuse"), "{}", role);
        }
        assert!(SpecialistRole::Writer.tools().is_empty());
    }

    #[test]
    fn test_sub_task_with_and_without_context() {
        assert_eq!(build_sub_task("t", ""), "t");
        assert!(build_sub_task("t", "Step 1 (x): y").ends_with("Step 1 (x): y"));
    }

    #[tokio::test]
    async fn test_llm_specialist_uses_role_prompt() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_text("findings [1]");
        let s = LlmSpecialists::new(llm.clone(), "m");
        let out = s.dispatch("researcher", "find data", "").await.unwrap();
        assert_eq!(out, "findings [1]");
        let req = &llm.requests()[0];
        assert_eq!(req.messages[0].content, RESEARCHER_PROMPT);
        assert_eq!(req.messages[1].content, "find data");
    }

    #[tokio::test]
    async fn test_unknown_role_is_error() {
        let llm = Arc::new(MockLlmClient::new());
        let s = LlmSpecialists::new(llm.clone(), "m");
        let err = s.dispatch("poet", "t", "").await.unwrap_err();
        assert!(matches!(err, AgentError::UnknownSpecialist(ref r) if r == "poet"));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_react_specialist_exports_only_role_tools() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push_text("draft");
        let mut reg = CapabilityRegistry::new();
        reg.register(crate::tools::CalculatorTool);
        let executor = Arc::new(ToolExecutor::new(Arc::new(reg), 30));
        let tracer = Arc::new(Tracer::new());
        let s = ReactSpecialists::new(llm.clone(), executor, tracer, ReactConfig::default());

        let out = s.dispatch("writer", "write", "Step 1 (r): facts").await.unwrap();
        assert_eq!(out, "draft");
        let req = &llm.requests()[0];
        assert!(req.tools.is_empty());
        assert_eq!(req.messages[0].content, WRITER_PROMPT);
        assert!(req.messages[1].content.contains("Step 1 (r): facts"));
    }

    #[tokio::test]
    async fn test_react_specialist_out_of_steps_is_step_failure() {
        let llm = Arc::new(MockLlmClient::new());
        llm.push(Ok(crate::llm::Completion::with_tool_calls(vec![crate::llm::ToolCall::new(
            "c1",
            "execute_calculation",
            serde_json::json!({"operation": "add", "operand_a": 1, "operand_b": 1}),
        )])));
        let mut reg = CapabilityRegistry::new();
        reg.register(crate::tools::CalculatorTool);
        let executor = Arc::new(ToolExecutor::new(Arc::new(reg), 30));
        let tracer = Arc::new(Tracer::new());
        let base = ReactConfig {
            max_steps: 1,
            ..ReactConfig::default()
        };
        let s = ReactSpecialists::new(llm.clone(), executor, tracer, base);

        let err = s.dispatch("analyst", "sum it", "").await.unwrap_err();
        assert!(matches!(err, AgentError::AgentExecution(ref m) if m.contains("max_steps")));
    }
}
