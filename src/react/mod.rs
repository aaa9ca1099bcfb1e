//! 认知层：ReAct 主循环、过程事件与工具路由

pub mod events;
pub mod loop_;
pub mod router;

pub use events::ReactEvent;
pub use loop_::{AgentRunResult, ReactAgent, ReactConfig, DEFAULT_SYSTEM_PROMPT};
pub use router::{RouteDecision, SemanticToolSelector, ToolRouter, ToolRouting};
