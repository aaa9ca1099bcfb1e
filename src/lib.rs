//! Hive - 工具驱动的自主智能体运行时
//!
//! 模块划分：
//! - **agent**: 启动装配（AgentBuilder → AgentRuntime）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 运行级错误、ReAct 状态机阶段、工具并发调度
//! - **llm**: 补全服务契约与实现（OpenAI 兼容 / 重试 / 缓存 / Mock）、嵌入
//! - **memory**: 对话消息
//! - **observability**: 日志初始化、执行追踪、循环检测
//! - **react**: ReAct 主循环与工具路由
//! - **tools**: 能力注册表与网关、路径净化、执行器、内置工具
//! - **workflow**: Plan-and-Execute 编排

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;
pub mod workflow;

pub use agent::{AgentBuilder, AgentRuntime};
pub use config::{load_config, AppConfig};
pub use crate::core::AgentError;
pub use react::{AgentRunResult, ReactAgent, ReactConfig};
pub use workflow::{OrchestratorResult, PlanExecuteAgent};
