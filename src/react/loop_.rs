//! ReAct 主循环
//!
//! Reason -> (Loop check) -> Act（同一步内多个工具并发）-> Observe -> 下一轮 Reason；
//! 以 max_steps 与可选的墙钟 deadline 保证终止，可选 CancellationToken 支持外部取消。
//! 每次运行独立：新的 Conversation、新的 LoopDetector、新的 trace；所有退出路径都只 end_trace 一次。
//! 可选 event_tx：向前端推送 StepUpdate / ToolCall / Observation / LoopDetected / Done 等事件。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, AgentPhase, PhaseTracker};
use crate::llm::{CompletionRequest, LlmClient, ToolCall, ToolChoice, Usage};
use crate::memory::{Conversation, Message};
use crate::observability::{
    canonical_args, LoopDetector, LoopDetectorConfig, Step, ToolCallRecord, TraceStatus, Tracer,
};
use crate::react::ReactEvent;
use crate::tools::{ToolError, ToolExecutor, ToolResult, ToolSchema};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Reason step-by-step and use tools \
when needed. When you have enough information, provide your final answer.";

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

const EMPTY_REPLY_NUDGE: &str =
    "Your last reply was empty. Either call a tool or give your final answer.";

/// 引擎消费的唯一配置记录
#[derive(Debug, Clone)]
pub struct ReactConfig {
    pub agent_name: String,
    pub model: String,
    pub max_steps: usize,
    /// 单次运行的墙钟上限
    pub deadline: Option<Duration>,
    pub loop_detection: LoopDetectorConfig,
    pub system_prompt: String,
    /// 本次运行授予的权限（网关 execute_secure 校验）
    pub granted_permissions: Vec<String>,
    /// 限制可用工具；None 表示注册表中全部工具
    pub allowed_tools: Option<Vec<String>>,
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            agent_name: "hive".to_string(),
            model: "gpt-4o".to_string(),
            max_steps: 10,
            deadline: None,
            loop_detection: LoopDetectorConfig::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            granted_permissions: Vec::new(),
            allowed_tools: None,
        }
    }
}

/// 一次运行的结果
#[derive(Debug, Clone)]
pub struct AgentRunResult {
    pub answer: String,
    pub trace_id: String,
    pub total_steps: usize,
    pub status: TraceStatus,
    pub usage: Usage,
}

pub struct ReactAgent {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    tracer: Arc<Tracer>,
    config: ReactConfig,
    event_tx: Option<UnboundedSender<ReactEvent>>,
    cancel_token: Option<CancellationToken>,
}

impl ReactAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<ToolExecutor>,
        tracer: Arc<Tracer>,
        config: ReactConfig,
    ) -> Self {
        Self {
            llm,
            executor,
            tracer,
            config,
            event_tx: None,
            cancel_token: None,
        }
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<ReactEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel_token = Some(token);
        self
    }

    pub fn config(&self) -> &ReactConfig {
        &self.config
    }

    pub fn tracer(&self) -> &Arc<Tracer> {
        &self.tracer
    }

    fn send_event(&self, ev: ReactEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(ev);
        }
    }

    fn exported_schemas(&self) -> Vec<ToolSchema> {
        let registry = self.executor.registry();
        match &self.config.allowed_tools {
            Some(names) => registry.schemas_for(names),
            None => registry.get_schemas(),
        }
    }

    fn tool_allowed(&self, name: &str) -> bool {
        match &self.config.allowed_tools {
            Some(names) => names.iter().any(|n| n == name),
            None => true,
        }
    }

    fn finish(
        &self,
        trace_id: &str,
        answer: &str,
        status: TraceStatus,
        error: Option<&str>,
    ) {
        self.tracer.end_trace(trace_id, Some(answer), status, error);
        self.send_event(ReactEvent::Done {
            trace_id: trace_id.to_string(),
            status: status.as_str().to_string(),
            answer: answer.to_string(),
        });
    }

    fn fail(&self, trace_id: &str, phase: &mut PhaseTracker, err: AgentError) -> AgentError {
        phase.transition(AgentPhase::Error);
        let text = err.to_string();
        tracing::error!(trace_id = %trace_id, error = %text, "react run failed");
        self.tracer
            .end_trace(trace_id, None, TraceStatus::Error, Some(&text));
        self.send_event(ReactEvent::Error { text });
        err
    }

    /// 执行一次 ReAct 运行
    pub async fn run(&self, query: &str) -> Result<AgentRunResult, AgentError> {
        let cfg = &self.config;
        let trace_id = self.tracer.start_trace(&cfg.agent_name, query);
        let mut conversation = Conversation::new(&cfg.system_prompt, query);
        let mut detector = LoopDetector::new(cfg.loop_detection.clone());
        let mut phase = PhaseTracker::new();
        let schemas = self.exported_schemas();
        let started = Instant::now();
        let mut usage_total = Usage::default();
        let mut steps = 0usize;
        let mut deadline_hit = false;

        tracing::info!(trace_id = %trace_id, agent = %cfg.agent_name, max_steps = cfg.max_steps, tools = schemas.len(), "react run started");

        while steps < cfg.max_steps {
            if self
                .cancel_token
                .as_ref()
                .map(|t| t.is_cancelled())
                .unwrap_or(false)
            {
                return Err(self.fail(&trace_id, &mut phase, AgentError::Cancelled));
            }
            if cfg.deadline.map(|d| started.elapsed() >= d).unwrap_or(false) {
                tracing::warn!(trace_id = %trace_id, step = steps, "run deadline exceeded");
                deadline_hit = true;
                break;
            }

            steps += 1;
            let step_started = Instant::now();
            phase.transition(AgentPhase::Reasoning);
            self.send_event(ReactEvent::StepUpdate {
                step: steps,
                max_steps: cfg.max_steps,
            });

            let request = CompletionRequest::new(&cfg.model, conversation.messages().to_vec())
                .with_tools(schemas.clone(), ToolChoice::Auto);
            let completion = match self.llm.complete(&request).await {
                Ok(c) => c,
                Err(e) => return Err(self.fail(&trace_id, &mut phase, e.into())),
            };
            usage_total += completion.usage;

            let reasoning = completion.text_content().map(str::to_string);
            let mut step = Step::new(reasoning.clone());
            step.input_tokens = completion.usage.input_tokens;
            step.output_tokens = completion.usage.output_tokens;
            step.cost_usd = completion.usage.cost_usd;

            if completion.tool_calls.is_empty() {
                if let Some(answer) = reasoning {
                    step.duration_ms = elapsed_ms(step_started);
                    self.record_step(&trace_id, steps, step);
                    phase.transition(AgentPhase::Done);
                    self.finish(&trace_id, &answer, TraceStatus::Completed, None);
                    tracing::info!(trace_id = %trace_id, steps, "react run completed");
                    return Ok(AgentRunResult {
                        answer,
                        trace_id,
                        total_steps: steps,
                        status: TraceStatus::Completed,
                        usage: usage_total,
                    });
                }
                tracing::warn!(trace_id = %trace_id, step = steps, "empty completion, nudging");
                conversation.push(Message::user(EMPTY_REPLY_NUDGE));
                step.duration_ms = elapsed_ms(step_started);
                self.record_step(&trace_id, steps, step);
                continue;
            }

            // 推理文本停滞检查
            let stagnation = match &reasoning {
                Some(text) => {
                    self.send_event(ReactEvent::ThinkingContent { text: text.clone() });
                    let r = detector.check_output_stagnation(text);
                    r.is_looping.then_some(r)
                }
                None => None,
            };

            conversation.push(Message::assistant_with_tools(
                reasoning.clone().unwrap_or_default(),
                completion.tool_calls.clone(),
            ));
            phase.transition(AgentPhase::ToolDispatch);

            let records = self
                .dispatch_tools(&completion.tool_calls, &mut detector)
                .await;

            phase.transition(AgentPhase::Observing);
            for (call, record) in completion.tool_calls.iter().zip(&records) {
                conversation.push(Message::tool(&call.id, &call.name, &record.tool_output));
                self.send_event(ReactEvent::Observation {
                    tool: record.tool_name.clone(),
                    success: record.success,
                    preview: preview(&record.tool_output, OBSERVATION_PREVIEW_CHARS),
                });
            }
            if let Some(r) = stagnation {
                self.send_event(ReactEvent::LoopDetected {
                    tool: None,
                    strategy: r.strategy,
                    message: r.message.clone(),
                });
                conversation.push(Message::user(r.message));
            }

            step.tool_calls = records;
            step.duration_ms = elapsed_ms(step_started);
            self.record_step(&trace_id, steps, step);
        }

        phase.transition(AgentPhase::MaxSteps);
        let answer = degraded_answer(&conversation, cfg.max_steps, deadline_hit);
        let error = deadline_hit.then_some("deadline exceeded");
        tracing::warn!(trace_id = %trace_id, steps, deadline_hit, "react run stopped without final answer");
        self.finish(&trace_id, &answer, TraceStatus::MaxSteps, error);
        Ok(AgentRunResult {
            answer,
            trace_id,
            total_steps: steps,
            status: TraceStatus::MaxSteps,
            usage: usage_total,
        })
    }

    /// 分派前逐个做循环检查；未命中的调用并发执行，结果按请求顺序返回
    async fn dispatch_tools(
        &self,
        calls: &[ToolCall],
        detector: &mut LoopDetector,
    ) -> Vec<ToolCallRecord> {
        let mut slots: Vec<Option<ToolCallRecord>> = Vec::with_capacity(calls.len());
        let mut pending = Vec::new();

        for (idx, call) in calls.iter().enumerate() {
            self.send_event(ReactEvent::ToolCall {
                tool: call.name.clone(),
                args: call.arguments.clone(),
            });
            let check = detector.check_tool_call(&call.name, &canonical_args(&call.arguments));
            if check.is_looping {
                self.send_event(ReactEvent::LoopDetected {
                    tool: Some(call.name.clone()),
                    strategy: check.strategy,
                    message: check.message.clone(),
                });
                slots.push(Some(synthetic_record(call, check.message)));
            } else if !self.tool_allowed(&call.name) {
                let result = ToolResult::failed(ToolError::NotFound(call.name.clone()));
                slots.push(Some(synthetic_record(call, result.observation())));
            } else {
                slots.push(None);
                pending.push(idx);
            }
        }

        let batch = pending
            .iter()
            .map(|&i| (calls[i].name.clone(), calls[i].arguments.clone()))
            .collect();
        let invocations = self
            .executor
            .execute_all(batch, &self.config.granted_permissions)
            .await;

        for (idx, inv) in pending.into_iter().zip(invocations) {
            slots[idx] = Some(ToolCallRecord {
                tool_name: inv.name,
                tool_input: inv.args,
                tool_output: inv.result.observation(),
                success: inv.result.success,
                duration_ms: inv.duration.as_secs_f64() * 1000.0,
            });
        }

        slots.into_iter().flatten().collect()
    }

    fn record_step(&self, trace_id: &str, step_no: usize, step: Step) {
        self.send_event(ReactEvent::StepRecorded {
            step: step_no,
            input_tokens: step.input_tokens,
            output_tokens: step.output_tokens,
            cost_usd: step.cost_usd,
            duration_ms: step.duration_ms,
        });
        self.tracer.log_step(trace_id, step);
    }
}

fn synthetic_record(call: &ToolCall, message: String) -> ToolCallRecord {
    ToolCallRecord {
        tool_name: call.name.clone(),
        tool_input: call.arguments.clone(),
        tool_output: message,
        success: false,
        duration_ms: 0.0,
    }
}

fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 步数或时间耗尽时的降级回答：尽量带上最后一次推理
fn degraded_answer(conversation: &Conversation, max_steps: usize, deadline_hit: bool) -> String {
    let reason = if deadline_hit {
        "before the run deadline".to_string()
    } else {
        format!("within {} steps", max_steps)
    };
    match conversation.last_assistant_text() {
        Some(last) => format!(
            "I could not reach a final answer {}. Best partial answer: {}",
            reason, last
        ),
        None => format!("I could not reach a final answer {}.", reason),
    }
}
