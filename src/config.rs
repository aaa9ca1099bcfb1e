//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__LLM__PROVIDER=mock`）。
//! 引擎只消费由 AppConfig 派生的 ReactConfig。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::observability::LoopDetectorConfig;
use crate::react::{ReactConfig, DEFAULT_SYSTEM_PROMPT};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub llm: LlmSection,
    pub loop_detection: LoopDetectorConfig,
    pub tools: ToolsSection,
    pub cache: CacheSection,
    pub orchestrator: OrchestratorSection,
    pub routing: RoutingSection,
    pub logging: LoggingSection,
}

/// [agent] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub name: String,
    pub max_steps: usize,
    /// 单次运行墙钟上限（秒）
    pub deadline_secs: Option<u64>,
    pub system_prompt: Option<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            name: "hive".to_string(),
            max_steps: 10,
            deadline_secs: None,
            system_prompt: None,
        }
    }
}

/// [llm] 段：后端选择、重试与计价
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 存放 API Key 的环境变量名
    pub api_key_env: String,
    pub request_timeout_secs: u64,
    /// 总尝试次数
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub prompt_price_per_1k: f64,
    pub completion_price_per_1k: f64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_secs: 120,
            max_retries: 3,
            retry_base_delay_ms: 500,
            prompt_price_per_1k: 0.0025,
            completion_price_per_1k: 0.01,
        }
    }
}

/// [tools] 段：限流、超时、并发、沙箱根与授予权限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 每个工具每分钟默认调用上限
    pub default_rate_limit: u32,
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    pub max_concurrent_tools: usize,
    pub workspace_root: PathBuf,
    pub granted_permissions: Vec<String>,
    pub web: WebSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            default_rate_limit: 60,
            tool_timeout_secs: 30,
            max_concurrent_tools: 4,
            workspace_root: PathBuf::from("workspace"),
            granted_permissions: vec!["filesystem:read".to_string(), "network:http".to_string()],
            web: WebSection::default(),
        }
    }
}

/// [tools.web] 段：read_webpage 的超时、最大字符数、域名白名单
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub timeout_secs: u64,
    pub max_result_chars: usize,
    pub allowed_domains: Vec<String>,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            max_result_chars: 8000,
            allowed_domains: default_allowed_domains(),
        }
    }
}

/// 白名单按后缀匹配，子域名自动放行
fn default_allowed_domains() -> Vec<String> {
    [
        "wikipedia.org",
        "arxiv.org",
        "github.com",
        "raw.githubusercontent.com",
        "stackoverflow.com",
        "docs.rs",
        "crates.io",
        "rust-lang.org",
        "docs.python.org",
        "developer.mozilla.org",
        "news.ycombinator.com",
        "reuters.com",
        "apnews.com",
        "bbc.co.uk",
        "europa.eu",
        "epa.gov",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// [cache] 段：LLM 响应缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from(".cache/llm_responses"),
        }
    }
}

/// [orchestrator] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    /// 同一 wave 内的步骤并发执行
    pub parallel_steps: bool,
    /// 每个专家 ReactAgent 的步数上限
    pub specialist_max_steps: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            parallel_steps: true,
            specialist_max_steps: 6,
        }
    }
}

/// [routing] 段：单智能体运行前的工具路由
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    /// none / llm / semantic
    pub mode: String,
    /// 领域分类用的模型；未设置时沿用 llm.model
    pub router_model: Option<String>,
    /// semantic 模式保留的工具数
    pub top_k: usize,
    pub embedding_model: String,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            mode: "none".to_string(),
            router_model: None,
            top_k: 5,
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

/// [logging] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
    /// console / json
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "console".to_string(),
        }
    }
}

impl AppConfig {
    /// 派生引擎配置
    pub fn react_config(&self) -> ReactConfig {
        ReactConfig {
            agent_name: self.agent.name.clone(),
            model: self.llm.model.clone(),
            max_steps: self.agent.max_steps,
            deadline: self.agent.deadline_secs.map(Duration::from_secs),
            loop_detection: self.loop_detection.clone(),
            system_prompt: self
                .agent
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            granted_permissions: self.tools.granted_permissions.clone(),
            allowed_tools: None,
        }
    }

    /// 专家使用的引擎配置：步数上限单独配置
    pub fn specialist_react_config(&self) -> ReactConfig {
        ReactConfig {
            max_steps: self.orchestrator.specialist_max_steps,
            ..self.react_config()
        }
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default"] {
        if std::path::Path::new(&format!("{}.toml", name)).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, skipped");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let c = AppConfig::default();
        assert_eq!(c.agent.max_steps, 10);
        assert_eq!(c.llm.max_retries, 3);
        assert_eq!(c.loop_detection.exact_threshold, 2);
        assert_eq!(c.tools.default_rate_limit, 60);
        assert_eq!(c.tools.tool_timeout_secs, 30);
        assert!(c.orchestrator.parallel_steps);
        assert_eq!(c.routing.mode, "none");
        assert_eq!(c.routing.top_k, 5);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            r#"
[agent]
max_steps = 4
deadline_secs = 90

[loop_detection]
fuzzy_threshold = 0.9

[tools.web]
allowed_domains = ["docs.rs"]

[routing]
mode = "semantic"
top_k = 2
"#,
        )
        .unwrap();
        let c = load_config(Some(path)).unwrap();
        assert_eq!(c.agent.max_steps, 4);
        assert_eq!(c.agent.name, "hive");
        assert_eq!(c.loop_detection.fuzzy_threshold, 0.9);
        assert_eq!(c.loop_detection.stagnation_window, 3);
        assert_eq!(c.tools.web.allowed_domains, vec!["docs.rs"]);
        assert_eq!(c.tools.web.max_result_chars, 8000);
        assert_eq!(c.routing.mode, "semantic");
        assert_eq!(c.routing.top_k, 2);
        assert_eq!(c.routing.embedding_model, "text-embedding-3-small");

        let rc = c.react_config();
        assert_eq!(rc.max_steps, 4);
        assert_eq!(rc.deadline, Some(Duration::from_secs(90)));
        assert_eq!(rc.system_prompt, DEFAULT_SYSTEM_PROMPT);
    }

    #[test]
    fn test_specialist_config_overrides_step_bound() {
        let c = AppConfig::default();
        assert_eq!(c.specialist_react_config().max_steps, 6);
        assert_eq!(c.specialist_react_config().model, "gpt-4o");
    }
}
