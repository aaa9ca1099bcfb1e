//! 工具执行器
//!
//! 持有共享的 CapabilityRegistry、单次调用超时与并发调度器。
//! 每次调用都在独立的 tokio 任务中运行 registry.execute_secure（许可随任务持有），
//! 推理循环只等待任务句柄：阻塞型工具体不会卡住主循环，也不会把同一轮的调用串行化。
//! 超时转为 ToolError::Timeout 并中止任务；任务 panic 或被取消转为 ExecutionFailed。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::Value;
use tokio::time::timeout;

use crate::core::TaskScheduler;
use crate::tools::{CapabilityRegistry, ToolError, ToolResult};

/// 单次调用的结果与耗时
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Value,
    pub result: ToolResult,
    pub duration: Duration,
}

pub struct ToolExecutor {
    registry: Arc<CapabilityRegistry>,
    timeout: Duration,
    scheduler: TaskScheduler,
}

impl ToolExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            scheduler: TaskScheduler::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scheduler(mut self, scheduler: TaskScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    /// 执行单个工具（权限校验 + 限流 + 超时），永不返回 Err
    pub async fn execute(&self, tool_name: &str, args: Value, granted: &[String]) -> ToolInvocation {
        let permit = self.scheduler.acquire_tool().await;
        let start = Instant::now();
        let preview = args_preview(&args);

        let registry = self.registry.clone();
        let name = tool_name.to_string();
        let call_args = args.clone();
        let granted = granted.to_vec();
        let mut handle = tokio::spawn(async move {
            let _permit = permit;
            registry.execute_secure(&name, call_args, &granted).await
        });

        let result = match timeout(self.timeout, &mut handle).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                tracing::error!(tool = %tool_name, error = %e, "tool task failed");
                ToolResult::failed(ToolError::ExecutionFailed(format!("tool task failed: {}", e)))
            }
            Err(_) => {
                handle.abort();
                ToolResult::failed(ToolError::Timeout {
                    tool: tool_name.to_string(),
                    secs: self.timeout.as_secs(),
                })
            }
        };

        let duration = start.elapsed();
        let outcome = match &result.error {
            None => "ok",
            Some(ToolError::Timeout { .. }) => "timeout",
            Some(ToolError::AccessDenied { .. }) => "denied",
            Some(ToolError::RateLimited { .. }) => "rate_limited",
            Some(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": result.success,
            "outcome": outcome,
            "duration_ms": duration.as_millis() as u64,
            "args_preview": preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        ToolInvocation {
            name: tool_name.to_string(),
            args,
            result,
            duration,
        }
    }

    /// 并发执行一批调用，返回顺序与输入一致
    pub async fn execute_all(&self, calls: Vec<(String, Value)>, granted: &[String]) -> Vec<ToolInvocation> {
        let futures = calls
            .into_iter()
            .map(|(name, args)| async move { self.execute(&name, args, granted).await });
        join_all(futures).await
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}
