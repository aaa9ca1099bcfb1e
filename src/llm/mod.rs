//! LLM 层：补全服务契约与实现（OpenAI 兼容 / 重试 / 缓存 / Mock）与嵌入

pub mod cache;
pub mod embedding;
pub mod mock;
pub mod openai;
pub mod retry;
pub mod traits;

pub use cache::{cache_key, CachedLlmClient};
pub use embedding::{cosine_similarity, EmbeddingProvider, OpenAiEmbedder};
pub use mock::MockLlmClient;
pub use openai::{OpenAiClient, Pricing};
pub use retry::{RetryConfig, RetryingLlmClient};
pub use traits::{
    Completion, CompletionRequest, LlmClient, LlmError, ResponseFormat, ToolCall, ToolChoice,
    Usage,
};
