//! 工具层：能力注册表 / 网关、限流、路径净化、执行器与内置工具

pub mod calculator;
pub mod executor;
pub mod filesystem;
pub mod rate_limit;
pub mod registry;
pub mod sanitizer;
pub mod schema;
pub mod web;

pub use calculator::CalculatorTool;
pub use executor::{ToolExecutor, ToolInvocation};
pub use filesystem::{ListFilesTool, ReadFileTool, FILESYSTEM_READ};
pub use rate_limit::{FixedWindowLimiter, DEFAULT_CALLS_PER_MINUTE};
pub use registry::{CapabilityRegistry, Tool, ToolError, ToolResult, ToolSchema};
pub use sanitizer::{validate_safe_path, SecurityError};
pub use web::{ReadWebpageTool, NETWORK_HTTP};
