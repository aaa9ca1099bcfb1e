//! Agent 构建器：统一的启动装配逻辑
//!
//! 由 AppConfig 构建补全服务（OpenAI 兼容 / Mock，外包重试与可选缓存）、能力注册表（内置工具一次性注册，之后只读）、
//! 工具执行器、Tracer 与可选的工具路由，再组装出 ReactAgent 与 PlanExecuteAgent。测试可注入自己的 LLM、嵌入与工具。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{AgentError, TaskScheduler};
use crate::llm::{
    CachedLlmClient, EmbeddingProvider, LlmClient, MockLlmClient, OpenAiClient, OpenAiEmbedder,
    Pricing, RetryConfig, RetryingLlmClient,
};
use crate::observability::Tracer;
use crate::react::{ReactAgent, SemanticToolSelector, ToolRouter, ToolRouting};
use crate::tools::{
    CalculatorTool, CapabilityRegistry, ListFilesTool, ReadFileTool, ReadWebpageTool, Tool,
    ToolExecutor,
};
use crate::workflow::{PlanExecuteAgent, ReactSpecialists};

/// 装配完成的运行时组件，可多次 run
pub struct AgentRuntime {
    pub config: AppConfig,
    pub llm: Arc<dyn LlmClient>,
    pub executor: Arc<ToolExecutor>,
    pub tracer: Arc<Tracer>,
    /// routing.mode = none 时为 None
    pub routing: Option<Arc<ToolRouting>>,
}

impl AgentRuntime {
    pub fn react_agent(&self) -> ReactAgent {
        ReactAgent::new(
            self.llm.clone(),
            self.executor.clone(),
            self.tracer.clone(),
            self.config.react_config(),
        )
    }

    /// 先按配置路由出本次查询的工具子集，再构建 ReactAgent
    pub async fn routed_react_agent(&self, query: &str) -> ReactAgent {
        let config = match &self.routing {
            Some(routing) => routing.apply(self.config.react_config(), query).await,
            None => self.config.react_config(),
        };
        ReactAgent::new(
            self.llm.clone(),
            self.executor.clone(),
            self.tracer.clone(),
            config,
        )
    }

    /// 专家为受限 ReactAgent，经同一网关使用工具
    pub fn plan_execute_agent(&self) -> PlanExecuteAgent {
        let dispatcher = Arc::new(ReactSpecialists::new(
            self.llm.clone(),
            self.executor.clone(),
            self.tracer.clone(),
            self.config.specialist_react_config(),
        ));
        PlanExecuteAgent::new(self.llm.clone(), &self.config.llm.model, dispatcher)
            .with_parallel_steps(self.config.orchestrator.parallel_steps)
    }
}

pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    tracer: Option<Arc<Tracer>>,
    extra_tools: Vec<(Arc<dyn Tool>, Option<u32>)>,
    builtin_tools: bool,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            embedder: None,
            tracer: None,
            extra_tools: Vec::new(),
            builtin_tools: true,
        }
    }

    /// 注入补全服务（跳过配置中的 provider）
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 注入嵌入提供方（semantic 路由使用）
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_tracer(mut self, tracer: Arc<Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.extra_tools.push((tool, None));
        self
    }

    pub fn with_rate_limited_tool(mut self, tool: Arc<dyn Tool>, calls_per_minute: u32) -> Self {
        self.extra_tools.push((tool, Some(calls_per_minute)));
        self
    }

    /// 是否注册内置工具（calculator / list_files / read_file / read_webpage）
    pub fn with_builtin_tools(mut self, enable: bool) -> Self {
        self.builtin_tools = enable;
        self
    }

    /// 按配置构建补全服务：provider → 重试 → 可选缓存
    pub fn build_llm(&self) -> Result<Arc<dyn LlmClient>, AgentError> {
        let llm_cfg = &self.config.llm;
        let base: Arc<dyn LlmClient> = match llm_cfg.provider.to_lowercase().as_str() {
            "mock" => return Ok(Arc::new(MockLlmClient::new())),
            "openai" => {
                let api_key = self.api_key()?;
                Arc::new(
                    OpenAiClient::new(
                        llm_cfg.base_url.as_deref(),
                        api_key,
                        llm_cfg.request_timeout_secs,
                    )
                    .with_pricing(Pricing {
                        prompt_per_1k: llm_cfg.prompt_price_per_1k,
                        completion_per_1k: llm_cfg.completion_price_per_1k,
                    }),
                )
            }
            other => {
                return Err(AgentError::ConfigError(format!(
                    "unknown llm provider '{}'",
                    other
                )))
            }
        };

        let retrying: Arc<dyn LlmClient> = Arc::new(RetryingLlmClient::new(
            base,
            RetryConfig {
                max_retries: llm_cfg.max_retries,
                base_delay: Duration::from_millis(llm_cfg.retry_base_delay_ms),
            },
        ));

        if self.config.cache.enabled {
            tracing::info!(dir = %self.config.cache.dir.display(), "llm response cache enabled");
            Ok(Arc::new(CachedLlmClient::new(retrying, &self.config.cache.dir)))
        } else {
            Ok(retrying)
        }
    }

    fn api_key(&self) -> Result<String, AgentError> {
        let env = &self.config.llm.api_key_env;
        std::env::var(env)
            .map_err(|_| AgentError::ConfigError(format!("environment variable {} is not set", env)))
    }

    /// 按 [routing] 构建路由策略
    pub fn build_routing(
        &self,
        llm: &Arc<dyn LlmClient>,
        registry: &Arc<CapabilityRegistry>,
    ) -> Result<Option<Arc<ToolRouting>>, AgentError> {
        let routing_cfg = &self.config.routing;
        let routing = match routing_cfg.mode.to_lowercase().as_str() {
            "none" | "" => return Ok(None),
            "llm" => {
                let model = routing_cfg
                    .router_model
                    .clone()
                    .unwrap_or_else(|| self.config.llm.model.clone());
                ToolRouting::Domain(ToolRouter::new(llm.clone(), model, registry.clone()))
            }
            "semantic" => {
                let embedder: Arc<dyn EmbeddingProvider> = match &self.embedder {
                    Some(e) => e.clone(),
                    None if self.config.llm.provider.eq_ignore_ascii_case("openai") => {
                        Arc::new(OpenAiEmbedder::new(
                            self.config.llm.base_url.as_deref(),
                            &routing_cfg.embedding_model,
                            self.api_key()?,
                            self.config.llm.request_timeout_secs,
                        ))
                    }
                    None => {
                        return Err(AgentError::ConfigError(
                            "semantic routing needs an embedding provider".to_string(),
                        ))
                    }
                };
                ToolRouting::Semantic {
                    selector: SemanticToolSelector::new(embedder, registry.clone()),
                    top_k: routing_cfg.top_k.max(1),
                }
            }
            other => {
                return Err(AgentError::ConfigError(format!(
                    "unknown routing mode '{}'",
                    other
                )))
            }
        };
        tracing::info!(mode = %routing_cfg.mode, "tool routing enabled");
        Ok(Some(Arc::new(routing)))
    }

    /// 启动时一次性注册全部工具
    pub fn build_registry(&self) -> CapabilityRegistry {
        let tools_cfg = &self.config.tools;
        let mut registry = CapabilityRegistry::with_default_rate_limit(tools_cfg.default_rate_limit);

        if self.builtin_tools {
            if let Err(e) = std::fs::create_dir_all(&tools_cfg.workspace_root) {
                tracing::warn!(path = %tools_cfg.workspace_root.display(), error = %e, "failed to create workspace");
            }
            registry.register(CalculatorTool);
            registry.register(ListFilesTool::new(&tools_cfg.workspace_root));
            registry.register(ReadFileTool::new(&tools_cfg.workspace_root));
            registry.register(ReadWebpageTool::new(
                tools_cfg.web.allowed_domains.clone(),
                tools_cfg.web.timeout_secs,
                tools_cfg.web.max_result_chars,
            ));
        }

        for (tool, limit) in &self.extra_tools {
            registry.register_arc(tool.clone(), limit.unwrap_or(tools_cfg.default_rate_limit));
        }
        registry
    }

    pub fn build(self) -> Result<AgentRuntime, AgentError> {
        let llm = match &self.llm {
            Some(llm) => llm.clone(),
            None => self.build_llm()?,
        };
        let registry = Arc::new(self.build_registry());
        let routing = self.build_routing(&llm, &registry)?;
        let tools_cfg = &self.config.tools;
        let executor = Arc::new(
            ToolExecutor::new(registry, tools_cfg.tool_timeout_secs)
                .with_scheduler(TaskScheduler::new(tools_cfg.max_concurrent_tools)),
        );
        tracing::info!(
            tools = ?executor.registry().tool_names(),
            model = %self.config.llm.model,
            "agent runtime ready"
        );
        Ok(AgentRuntime {
            llm,
            executor,
            tracer: self.tracer.unwrap_or_default(),
            routing,
            config: self.config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> AppConfig {
        let mut c = AppConfig::default();
        c.tools.workspace_root = dir.path().join("ws");
        c
    }

    #[test]
    fn test_builtin_tools_are_registered_in_order() {
        let dir = TempDir::new().unwrap();
        let registry = AgentBuilder::new(config_in(&dir)).build_registry();
        assert_eq!(
            registry.tool_names(),
            vec!["execute_calculation", "list_files", "read_file", "read_webpage"]
        );
        assert!(dir.path().join("ws").is_dir());
    }

    #[test]
    fn test_mock_provider_needs_no_key() {
        let dir = TempDir::new().unwrap();
        let mut c = config_in(&dir);
        c.llm.provider = "mock".into();
        assert!(AgentBuilder::new(c).build().is_ok());
    }

    #[test]
    fn test_unknown_provider_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut c = config_in(&dir);
        c.llm.provider = "carrier-pigeon".into();
        assert!(matches!(
            AgentBuilder::new(c).build(),
            Err(AgentError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_llm_routing_narrows_exported_tools() {
        let dir = TempDir::new().unwrap();
        let mut c = config_in(&dir);
        c.routing.mode = "llm".into();
        let llm = Arc::new(MockLlmClient::new());
        llm.push_text("workspace");
        llm.push_text("nothing to read");
        let runtime = AgentBuilder::new(c).with_llm(llm.clone()).build().unwrap();
        assert!(runtime.routing.is_some());

        let out = runtime
            .routed_react_agent("what files do I have?")
            .await
            .run("what files do I have?")
            .await
            .unwrap();
        assert_eq!(out.answer, "nothing to read");
        let exported: Vec<_> = llm.requests()[1].tools.iter().map(|t| t.name.clone()).collect();
        assert_eq!(exported, vec!["list_files", "read_file"]);
    }

    #[test]
    fn test_semantic_routing_without_embedder_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut c = config_in(&dir);
        c.llm.provider = "mock".into();
        c.routing.mode = "semantic".into();
        assert!(matches!(
            AgentBuilder::new(c).build(),
            Err(AgentError::ConfigError(_))
        ));
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let dir = TempDir::new().unwrap();
        let mut c = config_in(&dir);
        c.llm.api_key_env = "HIVE_TEST_KEY_THAT_IS_NEVER_SET".into();
        assert!(matches!(
            AgentBuilder::new(c).build_llm(),
            Err(AgentError::ConfigError(_))
        ));
    }
}
