//! 网页读取工具 read_webpage：域名白名单、超时、结果大小限制
//!
//! 仅允许配置中的域名；GET 请求带超时与 User-Agent；
//! HTML 响应用 html2text 提取可读文本，超过 max_result_chars 时截断并追加 ...[truncated]。
//! 需要 "network:http" 权限。

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, Url};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::schema::{parameters_for, parse_args};
use crate::tools::{Tool, ToolError};

pub const NETWORK_HTTP: &str = "network:http";

const USER_AGENT: &str = "Mozilla/5.0 (compatible; hive-agent/0.1)";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReadWebpageArgs {
    /// Absolute http(s) URL to fetch.
    pub url: String,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    let lower: String = s.chars().take(64).collect::<String>().to_lowercase();
    lower.starts_with("<!doctype")
        || lower.starts_with("<html")
        || (s.contains("</") && (s.contains("<head") || s.contains("<body") || s.contains("<p")))
}

/// 从 URL 中提取 host（仅 http/https；IPv6 字面量保留方括号）
fn extract_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed.host_str().map(|h| h.to_lowercase())
}

fn truncate_chars(body: String, max_chars: usize) -> String {
    if body.chars().count() > max_chars {
        body.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        body
    }
}

pub struct ReadWebpageTool {
    client: Client,
    allowed_domains: HashSet<String>,
    max_result_chars: usize,
}

impl ReadWebpageTool {
    pub fn new(allowed_domains: Vec<String>, timeout_secs: u64, max_result_chars: usize) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,text/plain;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en,zh-CN;q=0.8"));
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self {
            client,
            allowed_domains: allowed_domains.into_iter().map(|d| d.to_lowercase()).collect(),
            max_result_chars,
        }
    }

    /// 域名精确匹配或为白名单域名的子域
    fn check_allowed(&self, url: &str) -> Result<(), ToolError> {
        let domain = extract_domain(url)
            .ok_or_else(|| ToolError::InvalidArguments(format!("Invalid or missing URL: {}", url)))?;
        let allowed = self.allowed_domains.iter().any(|d| {
            domain == *d || domain.ends_with(&format!(".{}", d))
        });
        if allowed {
            Ok(())
        } else {
            Err(ToolError::SecurityViolation(format!(
                "Domain not in allowlist: {}",
                domain
            )))
        }
    }

    fn html_to_text(html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String, ToolError> {
        self.check_allowed(url)?;
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ToolError::ExecutionFailed(format!("Request timed out: {}", url))
            } else {
                ToolError::ExecutionFailed(format!("Request failed: {}", e))
            }
        })?;
        if !resp.status().is_success() {
            return Err(ToolError::ExecutionFailed(format!("HTTP {}", resp.status())));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("Read body: {}", e)))?;
        let body = body.trim_start_matches('\u{FEFF}');
        let text = if looks_like_html(body) {
            Self::html_to_text(body)
        } else {
            body.to_string()
        };
        Ok(truncate_chars(text, self.max_result_chars))
    }
}

#[async_trait]
impl Tool for ReadWebpageTool {
    fn name(&self) -> &str {
        "read_webpage"
    }

    fn description(&self) -> &str {
        "Fetches a web page from an allowlisted domain and returns its readable text. Args: {\"url\": \"https://...\"}."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<ReadWebpageArgs>()
    }

    fn permissions(&self) -> &[&str] {
        &[NETWORK_HTTP]
    }

    fn category(&self) -> &str {
        "web"
    }

    async fn execute(&self, args: Value) -> Result<String, ToolError> {
        let args: ReadWebpageArgs = parse_args(args)?;
        let url = args.url.trim();
        if url.is_empty() {
            return Err(ToolError::InvalidArguments("Missing url".to_string()));
        }
        tracing::info!(url = %url, "read_webpage fetch");
        self.fetch(url).await
    }
}
