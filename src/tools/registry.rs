//! 能力注册表与网关
//!
//! 所有工具实现 Tool trait（name / description / parameters_schema / permissions / execute），
//! 启动时由 CapabilityRegistry 按名注册（同名覆盖），之后只读共享。
//! execute 是失败边界：未注册、限流、工具报错乃至 panic 都被转成 success=false 的 ToolResult，不会冒泡。
//! execute_secure 在此之上先做权限校验，缺哪些权限就列出哪些。

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::tools::rate_limit::{FixedWindowLimiter, DEFAULT_CALLS_PER_MINUTE};
use crate::tools::sanitizer::SecurityError;

/// 网关层错误（总是包在 ToolResult 里返回）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool '{0}' not found")]
    NotFound(String),

    #[error("Access denied for '{}'. Missing permissions: {}", .tool, .missing.join(", "))]
    AccessDenied { tool: String, missing: Vec<String> },

    #[error("Rate limit exceeded for '{}' ({} calls per minute)", .tool, .limit)]
    RateLimited { tool: String, limit: u32 },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool '{}' timed out after {}s", .tool, .secs)]
    Timeout { tool: String, secs: u64 },

    #[error("Security violation: {0}")]
    SecurityViolation(String),
}

impl From<SecurityError> for ToolError {
    fn from(e: SecurityError) -> Self {
        ToolError::SecurityViolation(e.to_string())
    }
}

/// 工具调用结果：success 标志 + 输出或错误
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<ToolError>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: ToolError) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error),
        }
    }

    /// 写回对话的观察文本
    pub fn observation(&self) -> String {
        match &self.error {
            None => self.output.clone(),
            Some(e) => format!("Error: {}", e),
        }
    }
}

/// 导出给补全服务的工具描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    /// OpenAI 函数调用格式
    pub fn to_function_definition(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters
            }
        })
    }
}

/// 工具 trait
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（注册表中的唯一键）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数 JSON Schema；默认无参数
    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    /// 调用所需权限，如 "filesystem:read"
    fn permissions(&self) -> &[&str] {
        &[]
    }

    /// 路由用的领域分类
    fn category(&self) -> &str {
        "general"
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError>;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    limiter: FixedWindowLimiter,
}

/// 能力注册表：name → 工具 + 限流器，保留注册顺序
pub struct CapabilityRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
    default_rate_limit: u32,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::with_default_rate_limit(DEFAULT_CALLS_PER_MINUTE)
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_rate_limit(calls_per_minute: u32) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            default_rate_limit: calls_per_minute,
        }
    }

    /// 按默认限流注册
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let limit = self.default_rate_limit;
        self.register_arc(Arc::new(tool), limit);
    }

    pub fn register_with_limit(&mut self, tool: impl Tool + 'static, calls_per_minute: u32) {
        self.register_arc(Arc::new(tool), calls_per_minute);
    }

    /// 同名工具覆盖旧实现并重置限流器，注册顺序保持首次位置
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>, calls_per_minute: u32) {
        let name = tool.name().to_string();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        tracing::info!(tool = %name, calls_per_minute, "tool registered");
        self.tools.insert(
            name,
            RegisteredTool {
                tool,
                limiter: FixedWindowLimiter::per_minute(calls_per_minute),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| r.tool.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// 注册顺序的工具名
    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// 某一分类下的工具名（注册顺序）
    pub fn tools_by_category(&self, category: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| {
                self.tools
                    .get(*name)
                    .map(|r| r.tool.category() == category)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// 出现过的分类，按首次注册顺序去重
    pub fn categories(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for name in &self.order {
            if let Some(r) = self.tools.get(name) {
                let c = r.tool.category();
                if !out.iter().any(|x| x == c) {
                    out.push(c.to_string());
                }
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 每个已注册工具一条描述，按注册顺序，无重复
    pub fn get_schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|r| ToolSchema {
                name: r.tool.name().to_string(),
                description: r.tool.description().to_string(),
                parameters: r.tool.parameters_schema(),
            })
            .collect()
    }

    /// 仅导出 names 中列出的工具（仍按注册顺序）；未注册的名字被忽略
    pub fn schemas_for(&self, names: &[String]) -> Vec<ToolSchema> {
        self.get_schemas()
            .into_iter()
            .filter(|s| names.iter().any(|n| n == &s.name))
            .collect()
    }

    pub fn to_function_definitions(&self) -> Vec<Value> {
        self.get_schemas()
            .iter()
            .map(ToolSchema::to_function_definition)
            .collect()
    }

    /// 查找 → 限流 → 执行（捕获错误与 panic）
    pub async fn execute(&self, name: &str, args: Value) -> ToolResult {
        let Some(entry) = self.tools.get(name) else {
            tracing::warn!(tool = %name, "tool not found");
            return ToolResult::failed(ToolError::NotFound(name.to_string()));
        };

        if !entry.limiter.try_acquire() {
            tracing::warn!(tool = %name, limit = entry.limiter.limit(), "tool rate limited");
            return ToolResult::failed(ToolError::RateLimited {
                tool: name.to_string(),
                limit: entry.limiter.limit(),
            });
        }

        let outcome = AssertUnwindSafe(entry.tool.execute(args))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(output)) => ToolResult::ok(output),
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, error = %e, "tool returned error");
                ToolResult::failed(e)
            }
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(tool = %name, panic = %msg, "tool panicked");
                ToolResult::failed(ToolError::ExecutionFailed(format!("tool panicked: {}", msg)))
            }
        }
    }

    /// 权限校验后再执行；missing = tool.permissions − granted
    pub async fn execute_secure(&self, name: &str, args: Value, granted: &[String]) -> ToolResult {
        let Some(tool) = self.get(name) else {
            tracing::warn!(tool = %name, "tool not found");
            return ToolResult::failed(ToolError::NotFound(name.to_string()));
        };
        let missing: Vec<String> = tool
            .permissions()
            .iter()
            .filter(|p| !granted.iter().any(|g| g == *p))
            .map(|p| p.to_string())
            .collect();
        if !missing.is_empty() {
            tracing::warn!(tool = %name, missing = ?missing, "access denied");
            return ToolResult::failed(ToolError::AccessDenied {
                tool: name.to_string(),
                missing,
            });
        }
        self.execute(name, args).await
    }
}
