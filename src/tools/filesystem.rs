//! 沙箱文件系统工具
//!
//! ListFilesTool / ReadFileTool 绑定 root_dir，所有路径经 validate_safe_path 校验必须在 root 下；
//! 两者都要求 "filesystem:read" 权限（由网关 execute_secure 校验）。
//! 阻塞 IO 放在 spawn_blocking 中执行。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::sanitizer::validate_safe_path;
use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolError};

pub const FILESYSTEM_READ: &str = "filesystem:read";

const DEFAULT_MAX_READ_CHARS: usize = 20_000;

fn default_path() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFilesArgs {
    /// The directory path to list files from.
    #[serde(default = "default_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadFileArgs {
    /// The file path to read, relative to the workspace.
    pub path: String,
}

fn list_dir(dir: &Path) -> Result<Vec<String>, ToolError> {
    let mut entries = Vec::new();
    let read = std::fs::read_dir(dir)
        .map_err(|e| ToolError::ExecutionFailed(format!("List failed: {}", e)))?;
    for e in read {
        let e = e.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        let name = e.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let suffix = if e.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            "/"
        } else {
            ""
        };
        entries.push(format!("{}{}", name, suffix));
    }
    entries.sort();
    Ok(entries)
}

fn read_truncated(path: &Path, max_chars: usize) -> Result<String, ToolError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ToolError::ExecutionFailed(format!("Read failed: {}", e)))?;
    if content.chars().count() > max_chars {
        Ok(content.chars().take(max_chars).collect::<String>() + "\n...[truncated]")
    } else {
        Ok(content)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, ToolError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ToolError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("blocking task failed: {}", e)))?
}

/// list_files：列出目录内容（隐藏文件除外，目录带 / 后缀）
pub struct ListFilesTool {
    root_dir: PathBuf,
}

impl ListFilesTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "Lists files in a specific directory. Requires filesystem:read permission."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ListFilesArgs>()
    }

    fn permissions(&self) -> &[&str] {
        &[FILESYSTEM_READ]
    }

    fn category(&self) -> &str {
        "workspace"
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: ListFilesArgs = parse_args(args)?;
        let dir = validate_safe_path(&self.root_dir, &args.path)?;
        let entries = run_blocking(move || list_dir(&dir)).await?;
        if entries.is_empty() {
            return Ok("(empty directory)".to_string());
        }
        Ok(entries.join("\n"))
    }
}

/// read_file：读取文本文件，超长截断
pub struct ReadFileTool {
    root_dir: PathBuf,
    max_chars: usize,
}

impl ReadFileTool {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            max_chars: DEFAULT_MAX_READ_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text file from the workspace. Requires filesystem:read permission."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ReadFileArgs>()
    }

    fn permissions(&self) -> &[&str] {
        &[FILESYSTEM_READ]
    }

    fn category(&self) -> &str {
        "workspace"
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: ReadFileArgs = parse_args(args)?;
        let path = validate_safe_path(&self.root_dir, &args.path)?;
        let max = self.max_chars;
        run_blocking(move || read_truncated(&path, max)).await
    }
}
