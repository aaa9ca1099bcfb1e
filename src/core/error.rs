//! Agent 运行级错误
//!
//! 工具失败、权限拒绝、限流等都在网关边界内转为 ToolResult，不会以错误形式冒泡；
//! 只有补全服务重试耗尽（AgentExecution）会终止一次运行并传给调用方。

use thiserror::Error;

use crate::llm::LlmError;

/// 单次运行（ReAct / Plan-and-Execute）可能返回给调用方的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 补全服务在自身重试策略耗尽后仍失败，运行终止
    #[error("Agent execution failed: {0}")]
    AgentExecution(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    /// 专家角色不存在（Plan 步骤级失败，记录为失败注记而不终止运行）
    #[error("Unknown specialist: {0}")]
    UnknownSpecialist(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        AgentError::AgentExecution(e.to_string())
    }
}
