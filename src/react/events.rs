//! ReAct 过程事件：用于流式展示思考、工具调用、观察、循环检测与结果

use serde::Serialize;

use crate::observability::LoopStrategy;

/// 单步过程事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReactEvent {
    /// ReAct 步数更新（当前第几步）
    StepUpdate { step: usize, max_steps: usize },
    /// LLM 的推理内容
    ThinkingContent { text: String },
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览，避免过长）
    Observation {
        tool: String,
        success: bool,
        preview: String,
    },
    /// 循环检测命中，工具未被调用
    LoopDetected {
        tool: Option<String>,
        strategy: LoopStrategy,
        message: String,
    },
    /// 一步结束并写入 trace
    StepRecorded {
        step: usize,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
        duration_ms: f64,
    },
    /// 运行结束
    Done {
        trace_id: String,
        status: String,
        answer: String,
    },
    /// 错误
    Error { text: String },
}
