//! 执行追踪
//!
//! Tracer 持有 trace_id → Trace 的共享表；每条 Trace 自带一把锁，同一 trace 的写入串行，
//! 不同运行互不干扰。生命周期：start_trace → log_step* → end_trace（只生效一次）。
//! 未知 trace_id 或已结束的 trace 上的写入仅记录日志，不会打断引擎。

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Completed,
    Error,
    MaxSteps,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Running => "running",
            TraceStatus::Completed => "completed",
            TraceStatus::Error => "error",
            TraceStatus::MaxSteps => "max_steps",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_output: String,
    pub success: bool,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub step_number: usize,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallRecord>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl Step {
    pub fn new(reasoning: Option<String>) -> Self {
        Self {
            step_number: 0,
            reasoning,
            tool_calls: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
            cost_usd: 0.0,
            duration_ms: 0.0,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub agent_name: String,
    pub input_query: String,
    pub steps: Vec<Step>,
    pub status: TraceStatus,
    pub answer: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Trace {
    pub fn is_finalized(&self) -> bool {
        self.status != TraceStatus::Running
    }

    pub fn total_cost(&self) -> f64 {
        self.steps.iter().map(|s| s.cost_usd).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.steps
            .iter()
            .map(|s| s.input_tokens + s.output_tokens)
            .sum()
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }

    pub fn tool_call_count(&self) -> usize {
        self.steps.iter().map(|s| s.tool_calls.len()).sum()
    }
}

#[derive(Debug, Default)]
pub struct Tracer {
    traces: RwLock<HashMap<String, Arc<Mutex<Trace>>>>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, trace_id: &str) -> Option<Arc<Mutex<Trace>>> {
        let map = self.traces.read().unwrap_or_else(|e| e.into_inner());
        map.get(trace_id).cloned()
    }

    pub fn start_trace(&self, agent_name: &str, query: &str) -> String {
        let trace_id = uuid::Uuid::new_v4().to_string();
        let trace = Trace {
            trace_id: trace_id.clone(),
            agent_name: agent_name.to_string(),
            input_query: query.to_string(),
            steps: Vec::new(),
            status: TraceStatus::Running,
            answer: None,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        };
        self.traces
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(trace_id.clone(), Arc::new(Mutex::new(trace)));
        tracing::info!(trace_id = %trace_id, agent = %agent_name, "trace started");
        trace_id
    }

    /// 追加一步；步号由 Tracer 按顺序分配，保证连续递增
    pub fn log_step(&self, trace_id: &str, mut step: Step) {
        let Some(entry) = self.lookup(trace_id) else {
            tracing::warn!(trace_id = %trace_id, "log_step on unknown trace ignored");
            return;
        };
        let mut trace = entry.lock().unwrap_or_else(|e| e.into_inner());
        if trace.is_finalized() {
            tracing::debug!(trace_id = %trace_id, "log_step after end_trace ignored");
            return;
        }
        step.step_number = trace.steps.len() + 1;
        tracing::debug!(
            trace_id = %trace_id,
            step = step.step_number,
            tool_calls = step.tool_calls.len(),
            duration_ms = step.duration_ms,
            "step logged"
        );
        trace.steps.push(step);
    }

    /// 设置终态与答案；已结束的 trace 再次调用为 no-op，返回 false
    pub fn end_trace(
        &self,
        trace_id: &str,
        answer: Option<&str>,
        status: TraceStatus,
        error: Option<&str>,
    ) -> bool {
        let Some(entry) = self.lookup(trace_id) else {
            tracing::warn!(trace_id = %trace_id, "end_trace on unknown trace ignored");
            return false;
        };
        let mut trace = entry.lock().unwrap_or_else(|e| e.into_inner());
        if trace.is_finalized() {
            tracing::debug!(trace_id = %trace_id, status = trace.status.as_str(), "trace already finalized");
            return false;
        }
        trace.status = if status == TraceStatus::Running {
            TraceStatus::Completed
        } else {
            status
        };
        trace.answer = answer.map(str::to_string);
        trace.error = error.map(str::to_string);
        trace.ended_at = Some(Utc::now());
        tracing::info!(
            trace_id = %trace_id,
            status = trace.status.as_str(),
            steps = trace.steps.len(),
            cost_usd = trace.total_cost(),
            "trace finalized"
        );
        true
    }

    /// 快照
    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        self.lookup(trace_id)
            .map(|t| t.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    pub fn export_json(&self, trace_id: &str) -> Option<String> {
        let trace = self.get_trace(trace_id)?;
        serde_json::to_string_pretty(&trace).ok()
    }

    pub fn render_summary(&self, trace_id: &str) -> Option<String> {
        self.get_trace(trace_id).map(|t| render(&t))
    }

    pub fn print_summary(&self, trace_id: &str) {
        match self.render_summary(trace_id) {
            Some(s) => println!("{}", s),
            None => tracing::warn!(trace_id = %trace_id, "print_summary on unknown trace"),
        }
    }
}

fn preview(s: &str, max: usize) -> String {
    let one_line = s.replace('\n', " ");
    if one_line.chars().count() > max {
        format!("{}...", one_line.chars().take(max).collect::<String>())
    } else {
        one_line
    }
}

fn render(t: &Trace) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Trace {} [{}]", t.trace_id, t.status.as_str());
    let _ = writeln!(out, "  agent: {}", t.agent_name);
    let _ = writeln!(out, "  query: {}", preview(&t.input_query, 120));
    let mut cumulative = 0.0;
    for s in &t.steps {
        cumulative += s.cost_usd;
        let _ = writeln!(
            out,
            "  step {}: {:.0}ms, tokens {}/{}, cost ${:.6} (cumulative ${:.6})",
            s.step_number, s.duration_ms, s.input_tokens, s.output_tokens, s.cost_usd, cumulative
        );
        if let Some(r) = s.reasoning.as_deref().filter(|r| !r.trim().is_empty()) {
            let _ = writeln!(out, "    thought: {}", preview(r, 160));
        }
        for c in &s.tool_calls {
            let mark = if c.success { "ok" } else { "failed" };
            let _ = writeln!(
                out,
                "    -> {}({}) [{}, {:.0}ms]: {}",
                c.tool_name,
                preview(&c.tool_input.to_string(), 80),
                mark,
                c.duration_ms,
                preview(&c.tool_output, 120)
            );
        }
    }
    let _ = writeln!(
        out,
        "  total: {} steps, {} tool calls, {} tokens, ${:.6}, {:.0}ms",
        t.steps.len(),
        t.tool_call_count(),
        t.total_tokens(),
        t.total_cost(),
        t.total_duration_ms()
    );
    if let Some(e) = &t.error {
        let _ = writeln!(out, "  error: {}", e);
    }
    if let Some(a) = &t.answer {
        let _ = write!(out, "  answer: {}", preview(a, 200));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step_with_call(cost: f64) -> Step {
        let mut s = Step::new(Some("look it up".into()));
        s.cost_usd = cost;
        s.input_tokens = 10;
        s.output_tokens = 5;
        s.duration_ms = 12.0;
        s.tool_calls.push(ToolCallRecord {
            tool_name: "execute_calculation".into(),
            tool_input: json!({"operation": "add", "operand_a": 1, "operand_b": 2}),
            tool_output: "3".into(),
            success: true,
            duration_ms: 1.5,
        });
        s
    }

    #[test]
    fn test_trace_ids_are_unique() {
        let tracer = Tracer::new();
        let a = tracer.start_trace("hive", "q");
        let b = tracer.start_trace("hive", "q");
        assert_ne!(a, b);
        assert_eq!(tracer.get_trace(&a).unwrap().status, TraceStatus::Running);
    }

    #[test]
    fn test_step_numbers_are_contiguous() {
        let tracer = Tracer::new();
        let id = tracer.start_trace("hive", "q");
        let mut odd = Step::new(None);
        odd.step_number = 42;
        tracer.log_step(&id, odd);
        tracer.log_step(&id, Step::new(None));
        let nums: Vec<_> = tracer
            .get_trace(&id)
            .unwrap()
            .steps
            .iter()
            .map(|s| s.step_number)
            .collect();
        assert_eq!(nums, vec![1, 2]);
    }

    #[test]
    fn test_unknown_trace_is_ignored() {
        let tracer = Tracer::new();
        tracer.log_step("missing", Step::new(None));
        assert!(!tracer.end_trace("missing", None, TraceStatus::Completed, None));
        assert!(tracer.get_trace("missing").is_none());
    }

    #[test]
    fn test_end_trace_is_once_and_log_after_end_is_noop() {
        let tracer = Tracer::new();
        let id = tracer.start_trace("hive", "q");
        tracer.log_step(&id, step_with_call(0.01));
        assert!(tracer.end_trace(&id, Some("42"), TraceStatus::Completed, None));
        assert!(!tracer.end_trace(&id, Some("other"), TraceStatus::Error, Some("late")));
        tracer.log_step(&id, Step::new(None));

        let t = tracer.get_trace(&id).unwrap();
        assert_eq!(t.status, TraceStatus::Completed);
        assert_eq!(t.answer.as_deref(), Some("42"));
        assert!(t.error.is_none());
        assert_eq!(t.steps.len(), 1);
        assert!(t.ended_at.is_some());
    }

    #[test]
    fn test_summary_and_export() {
        let tracer = Tracer::new();
        let id = tracer.start_trace("hive", "what is 1+2");
        tracer.log_step(&id, step_with_call(0.01));
        tracer.log_step(&id, step_with_call(0.02));
        tracer.end_trace(&id, Some("3"), TraceStatus::Completed, None);

        let summary = tracer.render_summary(&id).unwrap();
        assert!(summary.contains("step 2"));
        assert!(summary.contains("execute_calculation"));
        assert!(summary.contains("$0.030000"));

        let json = tracer.export_json(&id).unwrap();
        let back: Trace = serde_json::from_str(&json).unwrap();
        assert_eq!(back.status, TraceStatus::Completed);
        assert_eq!(back.steps.len(), 2);
        assert!(json.contains("\"completed\""));
    }

    #[test]
    fn test_concurrent_traces_do_not_interact() {
        let tracer = Arc::new(Tracer::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let tr = tracer.clone();
                std::thread::spawn(move || {
                    let id = tr.start_trace("hive", &format!("q{}", i));
                    for _ in 0..10 {
                        tr.log_step(&id, Step::new(None));
                    }
                    id
                })
            })
            .collect();
        for h in handles {
            let id = h.join().unwrap();
            assert_eq!(tracer.get_trace(&id).unwrap().steps.len(), 10);
        }
    }
}
