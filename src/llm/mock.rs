//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 按脚本顺序返回预设结果；脚本耗尽后若设置了 responder 则交给它，
//! 否则取最后一条 User 消息回显为最终文本。每次请求都会被记录，便于断言 prompt 与上下文。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError, ToolCall, Usage};
use crate::memory::Role;

type Responder = Box<dyn Fn(&CompletionRequest) -> Result<Completion, LlmError> + Send + Sync>;

/// Mock 客户端
#[derive(Default)]
pub struct MockLlmClient {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    responder: Option<Responder>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 脚本耗尽后按请求动态生成回复
    pub fn with_responder(
        responder: impl Fn(&CompletionRequest) -> Result<Completion, LlmError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Some(Box::new(responder)),
            ..Default::default()
        }
    }

    pub fn push(&self, result: Result<Completion, LlmError>) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    pub fn push_text(&self, text: &str) {
        self.push(Ok(Completion::text(text)));
    }

    pub fn push_tool_call(&self, name: &str, args: Value) {
        let id = format!("call_{}", self.call_count() + self.pending());
        self.push(Ok(Completion::with_tool_calls(vec![ToolCall::new(id, name, args)])));
    }

    pub fn push_error(&self, err: LlmError) {
        self.push(Err(err));
    }

    fn pending(&self) -> usize {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 已收到的全部请求（按时间顺序）
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let scripted = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(result) = scripted {
            return result;
        }
        if let Some(responder) = &self.responder {
            return responder(request);
        }

        let last_user = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        Ok(Completion::text(format!("Echo from Mock: {}", last_user)).with_usage(Usage {
            input_tokens: 1,
            output_tokens: 1,
            cost_usd: 0.0,
        }))
    }
}
