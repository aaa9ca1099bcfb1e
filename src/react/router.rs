//! 工具路由：在进入 ReAct 循环前缩小导出给模型的工具集
//!
//! - ToolRouter：一次补全把查询归入一个领域（注册表中的工具分类），取该分类下的工具；
//!   回复无法识别或补全失败时归入 "general"
//! - SemanticToolSelector：工具 "name: description" 与查询做嵌入，按余弦相似度取 top-k
//!
//! 路由结果写入 ReactConfig::allowed_tools。

use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::llm::{cosine_similarity, CompletionRequest, EmbeddingProvider, LlmClient, LlmError};
use crate::memory::Message;
use crate::react::ReactConfig;
use crate::tools::CapabilityRegistry;

pub const FALLBACK_DOMAIN: &str = "general";

/// 一次路由的结果
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub domain: String,
    pub tools: Vec<String>,
}

/// LLM 领域分类路由
pub struct ToolRouter {
    llm: Arc<dyn LlmClient>,
    model: String,
    registry: Arc<CapabilityRegistry>,
}

impl ToolRouter {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        registry: Arc<CapabilityRegistry>,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            registry,
        }
    }

    /// 可选领域：注册表里出现过的分类，"general" 总在其中
    pub fn domains(&self) -> Vec<String> {
        let mut domains = self.registry.categories();
        if !domains.iter().any(|d| d == FALLBACK_DOMAIN) {
            domains.push(FALLBACK_DOMAIN.to_string());
        }
        domains
    }

    fn system_prompt(&self) -> String {
        let mut lines = Vec::new();
        for domain in self.domains() {
            let tools = self.registry.tools_by_category(&domain);
            let described: Vec<String> = tools
                .iter()
                .filter_map(|name| self.registry.get(name))
                .map(|t| format!("{} ({})", t.name(), t.description()))
                .collect();
            let summary = if described.is_empty() {
                "general knowledge, no tools".to_string()
            } else {
                described.join("; ")
            };
            lines.push(format!("- \"{}\": {}", domain, summary));
        }
        format!(
            "You are a query router. Classify the user's query into exactly one domain. \
Respond with ONLY the domain name, nothing else.\n\nAvailable domains:\n{}\n\nIf unsure, respond with \"{}\".",
            lines.join("\n"),
            FALLBACK_DOMAIN
        )
    }

    /// 归类查询；补全失败或回复不在领域列表中时返回 "general"
    pub async fn classify(&self, query: &str) -> String {
        let request = CompletionRequest::new(
            &self.model,
            vec![Message::system(self.system_prompt()), Message::user(query)],
        );
        let reply = match self.llm.complete(&request).await {
            Ok(c) => c.text_content().map(str::to_string).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "router classification failed, using fallback domain");
                return FALLBACK_DOMAIN.to_string();
            }
        };
        let domain = normalize_domain(&reply);
        if self.domains().contains(&domain) {
            domain
        } else {
            tracing::debug!(reply = %reply, "router reply is not a known domain");
            FALLBACK_DOMAIN.to_string()
        }
    }

    pub async fn route(&self, query: &str) -> RouteDecision {
        let domain = self.classify(query).await;
        let tools = self.registry.tools_by_category(&domain);
        tracing::info!(domain = %domain, tools = ?tools, "query routed");
        RouteDecision { domain, tools }
    }
}

/// 去空白、小写、去引号与句点
fn normalize_domain(reply: &str) -> String {
    reply
        .trim()
        .to_lowercase()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`' || c == '.')
        .trim()
        .to_string()
}

/// 嵌入相似度工具筛选；索引在首次使用时构建一次
pub struct SemanticToolSelector {
    embedder: Arc<dyn EmbeddingProvider>,
    registry: Arc<CapabilityRegistry>,
    index: OnceCell<Vec<(String, Vec<f32>)>>,
}

impl SemanticToolSelector {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, registry: Arc<CapabilityRegistry>) -> Self {
        Self {
            embedder,
            registry,
            index: OnceCell::new(),
        }
    }

    /// 一次批量嵌入所有工具描述
    pub async fn build_index(&self) -> Result<usize, LlmError> {
        let index = self
            .index
            .get_or_try_init(|| async {
                let schemas = self.registry.get_schemas();
                let texts: Vec<String> = schemas
                    .iter()
                    .map(|s| format!("{}: {}", s.name, s.description))
                    .collect();
                let vectors = self.embedder.embed(&texts).await?;
                tracing::info!(tools = schemas.len(), "tool embedding index built");
                Ok::<_, LlmError>(
                    schemas
                        .into_iter()
                        .map(|s| s.name)
                        .zip(vectors)
                        .collect::<Vec<_>>(),
                )
            })
            .await?;
        Ok(index.len())
    }

    /// 相似度最高的 top_k 个工具，降序
    pub async fn select_tools(&self, query: &str, top_k: usize) -> Result<Vec<(String, f32)>, LlmError> {
        self.build_index().await?;
        let query_vec = self
            .embedder
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no embedding for query".to_string()))?;

        let mut scored: Vec<(String, f32)> = self
            .index
            .get()
            .map(|index| {
                index
                    .iter()
                    .map(|(name, v)| (name.clone(), cosine_similarity(&query_vec, v)))
                    .collect()
            })
            .unwrap_or_default();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// 运行时使用的路由策略
pub enum ToolRouting {
    Domain(ToolRouter),
    Semantic {
        selector: SemanticToolSelector,
        top_k: usize,
    },
}

impl ToolRouting {
    /// 本次查询可用的工具；语义筛选失败时返回 None（不限制）
    pub async fn allowed_tools(&self, query: &str) -> Option<Vec<String>> {
        match self {
            ToolRouting::Domain(router) => Some(router.route(query).await.tools),
            ToolRouting::Semantic { selector, top_k } => {
                match selector.select_tools(query, *top_k).await {
                    Ok(selected) => {
                        tracing::info!(tools = ?selected, "tools selected by similarity");
                        Some(selected.into_iter().map(|(name, _)| name).collect())
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "semantic tool selection failed, exporting all tools");
                        None
                    }
                }
            }
        }
    }

    /// 在 base 上写入本次查询的工具子集
    pub async fn apply(&self, base: ReactConfig, query: &str) -> ReactConfig {
        ReactConfig {
            allowed_tools: self.allowed_tools(query).await,
            ..base
        }
    }
}
