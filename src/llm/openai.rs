//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；支持 DeepSeek、OpenAI、自建代理等。
//! 请求先按线上格式拼成 JSON 再交给 async_openai 反序列化，响应同理转回 JSON 后按需取字段，
//! 这样 tool_calls、refusal、finish_reason 都能原样交给 classifier。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::CreateChatCompletionRequest;
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::llm::types::{
    FinishReason, ModelMessage, ModelRequest, RawCompletion, RawOutcome, ToolInvocation,
    TransportFault,
};
use crate::llm::LlmClient;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// 默认单次请求超时
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// 关闭 async_openai 内置的 429/5xx 重试：限流与服务端错误要原样交给 classifier，
/// 重试与否由编排器决定
fn no_retry() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::ZERO))
        .build()
}

/// OpenAI 兼容客户端：持有 Client、model 名与单次请求超时
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new()
                .with_api_base(url)
                .with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config).with_backoff(no_retry()),
            model: model.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            usage: TokenUsage::new(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// 线上请求体（chat/completions）
    fn request_body(&self, request: &ModelRequest) -> Value {
        let mut messages = vec![json!({
            "role": "system",
            "content": request.instructions,
        })];
        messages.extend(request.messages.iter().map(wire_message));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
        });
        if let Some(tool) = &request.tool {
            body["tools"] = json!([{
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            }]);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

fn wire_message(message: &ModelMessage) -> Value {
    match message {
        ModelMessage::User(text) => json!({ "role": "user", "content": text }),
        ModelMessage::Assistant(text) => json!({ "role": "assistant", "content": text }),
        ModelMessage::ToolCall(call) => json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": call.id,
                "type": "function",
                "function": {
                    "name": call.name,
                    "arguments": call.arguments.to_string(),
                }
            }]
        }),
        ModelMessage::ToolResult {
            call_id, payload, ..
        } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": payload.to_string(),
        }),
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    finish_reason: Option<String>,
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    refusal: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// 把响应 JSON 转为 RawCompletion；没有 choice 视为信封无效
fn parse_completion(
    response: Value,
) -> Result<(RawCompletion, Option<WireUsage>), TransportFault> {
    let wire: WireResponse = serde_json::from_value(response)
        .map_err(|e| TransportFault::InvalidEnvelope(e.to_string()))?;
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TransportFault::InvalidEnvelope("response has no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| ToolInvocation {
            id: c.id,
            name: c.function.name,
            // 参数不是合法 JSON 时保留原文，交由上层判定为缺少 query
            arguments: serde_json::from_str(&c.function.arguments)
                .unwrap_or(Value::String(c.function.arguments)),
        })
        .collect();

    Ok((
        RawCompletion {
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::parse),
            text: choice.message.content,
            refusal: choice.message.refusal,
            tool_calls,
        },
        wire.usage,
    ))
}

/// 服务端返回的 API 错误 -> 传输故障
fn fault_from_api_error(
    error_type: Option<&str>,
    code: Option<&str>,
    message: &str,
) -> TransportFault {
    let tag = format!(
        "{} {}",
        error_type.unwrap_or_default(),
        code.unwrap_or_default()
    )
    .to_ascii_lowercase();
    let lower = message.to_ascii_lowercase();

    if tag.contains("rate_limit")
        || tag.contains("insufficient_quota")
        || lower.contains("rate limit")
    {
        TransportFault::RateLimited(message.to_string())
    } else if tag.contains("content_filter")
        || tag.contains("content_policy")
        || lower.contains("content management policy")
    {
        TransportFault::Blocked(message.to_string())
    } else if tag.contains("server_error") || tag.contains("overloaded") {
        TransportFault::Status {
            code: 500,
            message: message.to_string(),
        }
    } else if tag.contains("invalid_request")
        || tag.contains("authentication")
        || tag.contains("permission")
        || tag.contains("not_found")
    {
        TransportFault::InvalidRequest(message.to_string())
    } else {
        TransportFault::Status {
            code: 500,
            message: message.to_string(),
        }
    }
}

/// HTTP 层错误：优先看状态码，其次区分超时与连接失败
fn fault_from_http(status: Option<u16>, timed_out: bool, message: String) -> TransportFault {
    match status {
        Some(429) => TransportFault::RateLimited(message),
        Some(code) => TransportFault::Status { code, message },
        None if timed_out => TransportFault::Network(format!("request timed out: {message}")),
        None => TransportFault::Network(message),
    }
}

fn fault_from_openai_error(err: OpenAIError) -> TransportFault {
    match err {
        OpenAIError::ApiError(api) => {
            fault_from_api_error(api.r#type.as_deref(), api.code.as_deref(), &api.message)
        }
        OpenAIError::Reqwest(e) => {
            let status = e.status().map(|s| s.as_u16());
            let timed_out = e.is_timeout();
            if e.is_connect() {
                tracing::warn!(error = %e, "cannot connect to reasoning service");
            }
            fault_from_http(status, timed_out, e.to_string())
        }
        invalid @ OpenAIError::JSONDeserialize(..) => {
            TransportFault::InvalidEnvelope(invalid.to_string())
        }
        OpenAIError::InvalidArgument(msg) => TransportFault::InvalidRequest(msg),
        other => TransportFault::Network(other.to_string()),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, request: &ModelRequest) -> RawOutcome {
        let body = self.request_body(request);
        let wire_request: CreateChatCompletionRequest = serde_json::from_value(body)
            .map_err(|e| TransportFault::InvalidRequest(e.to_string()))?;

        tracing::debug!(
            model = %self.model,
            messages = request.messages.len(),
            tool = request.tool.is_some(),
            "chat completion request"
        );

        let chat = self.client.chat();
        let call = chat.create(wire_request);
        let response = tokio::time::timeout(self.request_timeout, call)
            .await
            .map_err(|_| {
                TransportFault::Network(format!(
                    "request timed out after {}s",
                    self.request_timeout.as_secs()
                ))
            })?
            .map_err(fault_from_openai_error)?;

        let response = serde_json::to_value(&response)
            .map_err(|e| TransportFault::InvalidEnvelope(e.to_string()))?;
        let (completion, usage) = parse_completion(response)?;

        // 提取 token 使用统计
        if let Some(usage) = usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        Ok(completion)
    }
}
