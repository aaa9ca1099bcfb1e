//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url；支持 DeepSeek、OpenAI、OpenRouter、自建代理等）。
//! 支持函数调用（tools / tool_choice）与 JSON Schema 结构化输出；成本按配置的每千 token 单价估算。
//! 单次请求超时由 tokio::time::timeout 约束，超时转为 LlmError::Timeout。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::llm::{Completion, CompletionRequest, LlmClient, LlmError, ToolCall, ToolChoice, Usage};
use crate::memory::{Message, Role};

/// 每千 token 单价（美元）
#[derive(Debug, Clone, Copy, Default)]
pub struct Pricing {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

impl Pricing {
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 / 1000.0 * self.prompt_per_1k
            + output_tokens as f64 / 1000.0 * self.completion_per_1k
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    timeout: Duration,
    pricing: Pricing,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new()
                .with_api_base(url.trim_end_matches('/'))
                .with_api_key(api_key.into()),
            None => OpenAIConfig::new().with_api_key(api_key.into()),
        };
        Self {
            client: Client::with_config(config),
            timeout: Duration::from_secs(timeout_secs),
            pricing: Pricing::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }
}

fn invalid(e: impl std::fmt::Display) -> LlmError {
    LlmError::InvalidResponse(e.to_string())
}

pub(crate) fn map_openai_error(e: OpenAIError) -> LlmError {
    match e {
        OpenAIError::Reqwest(e) if e.is_timeout() => LlmError::Timeout,
        OpenAIError::Reqwest(e) => LlmError::Transport(e.to_string()),
        OpenAIError::ApiError(e) => {
            let text = e.to_string();
            if text.to_lowercase().contains("rate limit") {
                LlmError::RateLimited(text)
            } else {
                LlmError::ApiError(text)
            }
        }
        other => invalid(other),
    }
}

/// 工具调用的线上形状：arguments 为 JSON 字符串
fn wire_tool_call(tc: &ToolCall) -> Value {
    json!({
        "id": tc.id,
        "type": "function",
        "function": {
            "name": tc.name,
            "arguments": tc.arguments.to_string(),
        }
    })
}

fn to_openai_message(m: &Message) -> Result<ChatCompletionRequestMessage, LlmError> {
    let msg = match m.role {
        Role::System => ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(invalid)?,
        ),
        Role::User => ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(invalid)?,
        ),
        Role::Assistant => {
            let mut assistant = ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(invalid)?;
            if !m.tool_calls.is_empty() {
                let calls: Vec<Value> = m.tool_calls.iter().map(wire_tool_call).collect();
                assistant.tool_calls = Some(serde_json::from_value(Value::Array(calls)).map_err(invalid)?);
            }
            ChatCompletionRequestMessage::Assistant(assistant)
        }
        Role::Tool => ChatCompletionRequestMessage::Tool(
            ChatCompletionRequestToolMessageArgs::default()
                .content(m.content.clone())
                .tool_call_id(m.tool_call_id.clone().unwrap_or_default())
                .build()
                .map_err(invalid)?,
        ),
    };
    Ok(msg)
}

/// 组装请求；工具列表为空时不发送 tools / tool_choice
fn build_request(request: &CompletionRequest) -> Result<CreateChatCompletionRequest, LlmError> {
    let messages = request
        .messages
        .iter()
        .map(to_openai_message)
        .collect::<Result<Vec<_>, _>>()?;
    let mut req = CreateChatCompletionRequestArgs::default()
        .model(request.model.clone())
        .messages(messages)
        .build()
        .map_err(invalid)?;

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|t| t.to_function_definition())
            .collect();
        req.tools = Some(serde_json::from_value(Value::Array(tools)).map_err(invalid)?);
        let choice = match request.tool_choice {
            ToolChoice::Auto => "auto",
            ToolChoice::None => "none",
            ToolChoice::Required => "required",
        };
        req.tool_choice = Some(serde_json::from_value(json!(choice)).map_err(invalid)?);
    }
    if let Some(format) = &request.response_format {
        req.response_format = Some(
            serde_json::from_value(json!({
                "type": "json_schema",
                "json_schema": {
                    "name": format.name,
                    "schema": format.schema,
                }
            }))
            .map_err(invalid)?,
        );
    }
    Ok(req)
}

/// 把线上工具调用（序列化后的 JSON）转为 ToolCall；参数不是合法 JSON 时原样保留为字符串，由工具参数校验报错
fn parse_tool_call(raw: &Value) -> Result<ToolCall, LlmError> {
    let id = raw["id"]
        .as_str()
        .ok_or_else(|| invalid("tool call without id"))?;
    let function = &raw["function"];
    let name = function["name"]
        .as_str()
        .ok_or_else(|| invalid("tool call without function name"))?;
    let arguments = function["arguments"].as_str().unwrap_or_default();
    let args = serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()));
    Ok(ToolCall::new(id, name, args))
}

fn build_completion(
    content: Option<String>,
    raw_tool_calls: &[Value],
    tokens: Option<(u64, u64)>,
    pricing: &Pricing,
) -> Result<Completion, LlmError> {
    let tool_calls = raw_tool_calls
        .iter()
        .map(parse_tool_call)
        .collect::<Result<Vec<_>, _>>()?;
    let usage = tokens
        .map(|(input, output)| Usage {
            input_tokens: input,
            output_tokens: output,
            cost_usd: pricing.cost(input, output),
        })
        .unwrap_or_default();
    Ok(Completion {
        content,
        tool_calls,
        usage,
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let req = build_request(request)?;
        tracing::debug!(model = %request.model, messages = request.messages.len(), tools = request.tools.len(), "chat completion");

        let response = timeout(self.timeout, self.client.chat().create(req))
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(map_openai_error)?;

        let tokens = response
            .usage
            .as_ref()
            .map(|u| (u.prompt_tokens as u64, u.completion_tokens as u64));
        let choice = response
            .choices
            .first()
            .ok_or_else(|| invalid("no choices in response"))?;
        let raw_tool_calls = match &choice.message.tool_calls {
            Some(calls) => calls
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()
                .map_err(invalid)?,
            None => Vec::new(),
        };
        build_completion(
            choice.message.content.clone(),
            &raw_tool_calls,
            tokens,
            &self.pricing,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ResponseFormat;
    use crate::tools::ToolSchema;

    fn body(req: &CompletionRequest) -> Value {
        serde_json::to_value(build_request(req).unwrap()).unwrap()
    }

    #[test]
    fn test_request_includes_tools_and_tool_messages() {
        let messages = vec![
            Message::system("sys"),
            Message::user("q"),
            Message::assistant_with_tools(
                "",
                vec![ToolCall::new("c1", "search", json!({"query": "rust"}))],
            ),
            Message::tool("c1", "search", "result"),
        ];
        let req = CompletionRequest::new("gpt-4o", messages).with_tools(
            vec![ToolSchema {
                name: "search".into(),
                description: "Search".into(),
                parameters: json!({"type": "object"}),
            }],
            ToolChoice::Auto,
        );
        let body = body(&req);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["tools"][0]["function"]["name"], "search");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(
            body["messages"][2]["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"rust"}"#
        );
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "c1");
    }

    #[test]
    fn test_request_without_tools_omits_tool_choice() {
        let req = CompletionRequest::new("m", vec![Message::user("hi")]).with_response_format(
            ResponseFormat {
                name: "plan".into(),
                schema: json!({"type": "object"}),
            },
        );
        let body = body(&req);
        assert!(body.get("tools").map_or(true, Value::is_null));
        assert!(body.get("tool_choice").map_or(true, Value::is_null));
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "plan");
    }

    #[test]
    fn test_completion_with_tool_calls_and_cost() {
        let raw = vec![json!({
            "id": "call_1",
            "type": "function",
            "function": {"name": "search", "arguments": "{\"query\":\"cats\"}"}
        })];
        let pricing = Pricing {
            prompt_per_1k: 0.01,
            completion_per_1k: 0.03,
        };
        let c = build_completion(None, &raw, Some((1000, 500)), &pricing).unwrap();
        assert_eq!(c.tool_calls.len(), 1);
        assert_eq!(c.tool_calls[0].id, "call_1");
        assert_eq!(c.tool_calls[0].arguments["query"], "cats");
        assert!((c.usage.cost_usd - 0.025).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_arguments_are_kept_as_string() {
        let raw = json!({
            "id": "call_2",
            "function": {"name": "search", "arguments": "{not json"}
        });
        let tc = parse_tool_call(&raw).unwrap();
        assert_eq!(tc.arguments, Value::String("{not json".into()));
        assert!(matches!(
            parse_tool_call(&json!({"function": {"name": "x"}})),
            Err(LlmError::InvalidResponse(_))
        ));
    }
}
