//! Plan-and-Execute 集成测试：记录型专家分派器 + Mock LLM（规划与汇总）

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hive::core::AgentError;
use hive::llm::MockLlmClient;
use hive::workflow::{PlanExecuteAgent, SpecialistDispatcher};

/// 记录每次分派的 (role, task, context)，输出固定为 "out:{task}"
#[derive(Default)]
struct RecordingDispatcher {
    calls: Mutex<Vec<(String, String, String)>>,
    fail_task: Option<String>,
}

impl RecordingDispatcher {
    fn calls(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn context_of(&self, task: &str) -> String {
        self.calls()
            .into_iter()
            .find(|(_, t, _)| t == task)
            .map(|(_, _, c)| c)
            .unwrap_or_default()
    }
}

#[async_trait]
impl SpecialistDispatcher for RecordingDispatcher {
    async fn dispatch(&self, role: &str, task: &str, context: &str) -> Result<String, AgentError> {
        self.calls
            .lock()
            .unwrap()
            .push((role.to_string(), task.to_string(), context.to_string()));
        if self.fail_task.as_deref() == Some(task) {
            return Err(AgentError::AgentExecution(format!("{} exploded", task)));
        }
        Ok(format!("out:{}", task))
    }
}

const CHAIN_PLAN: &str = r#"```json
{"steps": [
  {"step": 1, "task": "gather EU data", "specialist": "researcher", "depends_on": []},
  {"step": 2, "task": "gather US data", "specialist": "researcher", "depends_on": [1]},
  {"step": 3, "task": "compare", "specialist": "analyst", "depends_on": [1, 2]}
]}
```"#;

#[tokio::test]
async fn test_dependent_step_sees_all_upstream_outputs_verbatim() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_text(CHAIN_PLAN);
    llm.push_text("EU and US compared.");
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let agent = PlanExecuteAgent::new(llm.clone(), "m", dispatcher.clone());

    let result = agent.run("compare EU and US policy").await.unwrap();
    assert_eq!(result.answer, "EU and US compared.");
    assert_eq!(result.metadata.execution_order, vec![1, 2, 3]);

    let ctx = dispatcher.context_of("compare");
    assert!(ctx.contains("out:gather EU data"));
    assert!(ctx.contains("out:gather US data"));
    assert_eq!(dispatcher.context_of("gather EU data"), "");

    let synthesis = llm.requests().last().unwrap().clone();
    let body = &synthesis.messages[1].content;
    assert!(body.contains("compare EU and US policy"));
    assert!(body.contains("out:compare"));
}

#[tokio::test]
async fn test_forward_and_missing_dependencies_are_dropped() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_text(
        r#"{"steps": [
  {"step": 1, "task": "first", "specialist": "researcher", "depends_on": [2, 9]},
  {"step": 2, "task": "second", "specialist": "writer", "depends_on": [1]}
]}"#,
    );
    llm.push_text("done");
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let agent = PlanExecuteAgent::new(llm.clone(), "m", dispatcher.clone());

    let result = agent.run("q").await.unwrap();
    assert_eq!(result.metadata.execution_order, vec![1, 2]);
    assert!(result.metadata.plan.steps[0].depends_on.is_empty());
    assert_eq!(result.metadata.plan.steps[1].depends_on, vec![1]);
    assert_eq!(dispatcher.calls().len(), 2);
}

#[tokio::test]
async fn test_failed_step_does_not_abort_remaining_steps() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_text(CHAIN_PLAN);
    llm.push_text("partial answer");
    let dispatcher = Arc::new(RecordingDispatcher {
        fail_task: Some("gather US data".into()),
        ..Default::default()
    });
    let agent = PlanExecuteAgent::new(llm.clone(), "m", dispatcher.clone()).with_parallel_steps(false);

    let result = agent.run("q").await.unwrap();
    assert_eq!(result.answer, "partial answer");
    assert_eq!(result.metadata.execution_order, vec![1, 2, 3]);
    assert!(!result.metadata.step_results[&2].is_success());
    assert!(result.metadata.step_results[&3].is_success());

    let ctx = dispatcher.context_of("compare");
    assert!(ctx.contains("out:gather EU data"));
    assert!(ctx.contains("upstream step failed"));

    let body = llm.requests().last().unwrap().messages[1].content.clone();
    assert!(body.contains("FAILED"));
}

#[tokio::test]
async fn test_unparseable_plan_falls_back_to_single_researcher_step() {
    let llm = Arc::new(MockLlmClient::new());
    llm.push_text("I would rather not plan today.");
    llm.push_text("answer");
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let agent = PlanExecuteAgent::new(llm.clone(), "m", dispatcher.clone());

    let result = agent.run("what is rust?").await.unwrap();
    assert_eq!(result.metadata.plan.steps.len(), 1);
    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "researcher");
    assert_eq!(calls[0].1, "what is rust?");
}
