//! 响应缓存：内容寻址的本地补全缓存
//!
//! 缓存键为 (model id, 消息列表) 规范化 JSON 的 SHA-256；结果存放在 `{dir}/{key}.json`。
//! 命中时不调用内层客户端且不计成本；文件损坏或读取失败按未命中处理。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError};
use crate::memory::Message;

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    response: Completion,
}

/// 计算缓存键：serde_json 的对象键按字典序输出，序列化结果即规范形式
pub fn cache_key(model: &str, messages: &[Message]) -> String {
    let content = serde_json::json!({ "model": model, "messages": messages }).to_string();
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// 带本地缓存的 LLM 客户端
pub struct CachedLlmClient {
    inner: Arc<dyn LlmClient>,
    cache_dir: PathBuf,
}

impl CachedLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, cache_dir: impl AsRef<Path>) -> Self {
        Self {
            inner,
            cache_dir: cache_dir.as_ref().to_path_buf(),
        }
    }

    pub fn cache_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key))
    }

    async fn load(&self, path: &Path) -> Option<Completion> {
        let raw = tokio::fs::read_to_string(path).await.ok()?;
        match serde_json::from_str::<CacheEntry>(&raw) {
            Ok(entry) => Some(entry.response),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt cache entry ignored");
                None
            }
        }
    }

    async fn store(&self, path: &Path, completion: &Completion) {
        let entry = CacheEntry {
            response: completion.clone(),
        };
        let write = async {
            tokio::fs::create_dir_all(&self.cache_dir).await?;
            let content = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
            tokio::fs::write(path, content).await
        };
        if let Err(e) = write.await {
            tracing::warn!(path = %path.display(), error = %e, "failed to write cache entry");
        }
    }
}

#[async_trait]
impl LlmClient for CachedLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let key = cache_key(&request.model, &request.messages);
        let path = self.cache_path(&key);

        if let Some(mut hit) = self.load(&path).await {
            tracing::debug!(key = %key, "cache hit");
            hit.usage.cost_usd = 0.0;
            return Ok(hit);
        }

        tracing::debug!(key = %key, "cache miss");
        let result = self.inner.complete(request).await?;
        self.store(&path, &result).await;
        Ok(result)
    }
}
