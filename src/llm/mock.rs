//! Mock 推理服务（用于测试与离线运行，无需 API）
//!
//! - MockLlmClient：未配置 API Key 时的兜底，直接以文本回复，不调用工具
//! - ScriptedLlmClient：按顺序返回预置结果并记录每次请求，用于驱动编排器测试

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::llm::types::{
    FinishReason, ModelMessage, ModelRequest, RawCompletion, RawOutcome, ToolInvocation,
    TransportFault,
};
use crate::llm::LlmClient;

/// 离线兜底客户端：说明推理服务未配置，并复述用户最后一个问题
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, request: &ModelRequest) -> RawOutcome {
        let last_user = request
            .messages
            .iter()
            .rev()
            .find_map(|m| match m {
                ModelMessage::User(text) => Some(text.as_str()),
                _ => None,
            })
            .unwrap_or("(no input)");

        Ok(text_completion(format!(
            "No reasoning service is configured, so I can't look that up yet. You asked: {last_user}"
        )))
    }
}

/// 普通文本回复
pub fn text_completion(text: impl Into<String>) -> RawCompletion {
    RawCompletion {
        finish_reason: Some(FinishReason::Stop),
        text: Some(text.into()),
        refusal: None,
        tool_calls: Vec::new(),
    }
}

/// 调用 execute_sql 的回复
pub fn sql_call_completion(id: impl Into<String>, query: impl Into<String>) -> RawCompletion {
    tool_call_completion(id, "execute_sql", json!({ "query": query.into() }))
}

/// 任意工具调用回复
pub fn tool_call_completion(
    id: impl Into<String>,
    name: impl Into<String>,
    arguments: serde_json::Value,
) -> RawCompletion {
    RawCompletion {
        finish_reason: Some(FinishReason::ToolCalls),
        text: None,
        refusal: None,
        tool_calls: vec![ToolInvocation {
            id: id.into(),
            name: name.into(),
            arguments,
        }],
    }
}

/// 预置脚本客户端：每次 complete 弹出一个结果；脚本耗尽后返回 InvalidEnvelope
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<RawOutcome>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(outcomes: impl IntoIterator<Item = RawOutcome>) -> Self {
        Self {
            script: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// 目前收到的全部请求（按时间顺序）
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: &ModelRequest) -> RawOutcome {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| {
                Err(TransportFault::InvalidEnvelope(
                    "scripted client has no more responses".to_string(),
                ))
            })
    }
}
