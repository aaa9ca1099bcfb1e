//! 补全服务重试包装：对可重试错误做有界指数退避
//!
//! 第 n 次重试前等待 base_delay * 2^n；超过 max_retries 次仍失败则返回 RetriesExhausted。
//! 不可重试的错误（鉴权、响应格式错误等）立即返回。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{Completion, CompletionRequest, LlmClient, LlmError};

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 总尝试次数上限（含首次）
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次失败后（从 0 开始）的等待时长
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// 带重试的 LLM 客户端
pub struct RetryingLlmClient {
    inner: Arc<dyn LlmClient>,
    config: RetryConfig,
}

impl RetryingLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl LlmClient for RetryingLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let attempts = self.config.max_retries.max(1);
        let mut last = String::new();
        for attempt in 0..attempts {
            match self.inner.complete(request).await {
                Ok(c) => return Ok(c),
                Err(e) if e.is_retryable() => {
                    last = e.to_string();
                    if attempt + 1 < attempts {
                        let wait = self.config.backoff(attempt);
                        tracing::warn!(
                            attempt = attempt + 1,
                            max = attempts,
                            wait_ms = wait.as_millis() as u64,
                            error = %e,
                            "completion failed, backing off"
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "completion failed (not retryable)");
                    return Err(e);
                }
            }
        }
        tracing::error!(attempts, last = %last, "completion retries exhausted");
        Err(LlmError::RetriesExhausted { attempts, last })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;

    fn fast() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_backoff_is_exponential() {
        let cfg = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(cfg.backoff(0), Duration::from_millis(100));
        assert_eq!(cfg.backoff(2), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::Timeout);
        mock.push_error(LlmError::Http { status: 502, body: "bad gateway".into() });
        mock.push_text("finally");
        let client = RetryingLlmClient::new(mock.clone(), fast());
        let out = client
            .complete(&CompletionRequest::new("m", vec![]))
            .await
            .unwrap();
        assert_eq!(out.text_content(), Some("finally"));
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let mock = Arc::new(MockLlmClient::new());
        for _ in 0..3 {
            mock.push_error(LlmError::Transport("connection reset".into()));
        }
        let client = RetryingLlmClient::new(mock.clone(), fast());
        let err = client
            .complete(&CompletionRequest::new("m", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let mock = Arc::new(MockLlmClient::new());
        mock.push_error(LlmError::Http { status: 401, body: "unauthorized".into() });
        mock.push_text("never reached");
        let client = RetryingLlmClient::new(mock.clone(), fast());
        assert!(client
            .complete(&CompletionRequest::new("m", vec![]))
            .await
            .is_err());
        assert_eq!(mock.call_count(), 1);
    }
}
