//! 与推理服务交换的数据：出站请求、对话记录、原始返回信号
//!
//! 与具体厂商协议无关；各适配器（openai 等）负责与线上格式互转。

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 声明给推理服务的唯一能力
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// 参数 JSON Schema
    pub parameters: Value,
}

/// 推理服务请求调用工具（只在一次尝试内存活）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

impl ToolInvocation {
    /// `query` 参数；缺失或全空白时返回 None
    pub fn query(&self) -> Option<&str> {
        self.arguments
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
    }
}

/// 出站对话记录
#[derive(Clone, Debug, PartialEq)]
pub enum ModelMessage {
    User(String),
    Assistant(String),
    /// function-call 记录：推理服务在本轮发起的工具调用
    ToolCall(ToolInvocation),
    /// function-result 记录：工具执行结果或错误反馈
    ToolResult {
        call_id: String,
        name: String,
        payload: Value,
    },
}

/// 一次推理请求
#[derive(Clone, Debug, PartialEq)]
pub struct ModelRequest {
    pub instructions: String,
    pub messages: Vec<ModelMessage>,
    /// None 表示本次不声明工具（如最终叙述请求）
    pub tool: Option<ToolDeclaration>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl ModelRequest {
    /// 本次请求中的全部 function-result 载荷
    pub fn tool_results(&self) -> Vec<&Value> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                ModelMessage::ToolResult { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }
}

/// 推理服务给出的结束原因
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "stop" | "end_turn" => FinishReason::Stop,
            "tool_calls" | "function_call" | "tool_use" => FinishReason::ToolCalls,
            "length" | "max_tokens" => FinishReason::Length,
            "content_filter" | "safety" => FinishReason::ContentFilter,
            other => FinishReason::Other(other.to_string()),
        }
    }

    /// 正常结束（可以读取内容）
    pub fn is_normal(&self) -> bool {
        matches!(self, FinishReason::Stop | FinishReason::ToolCalls)
    }
}

/// 推理服务正常返回的信封（尚未分类）
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawCompletion {
    pub finish_reason: Option<FinishReason>,
    pub text: Option<String>,
    /// 模型拒答说明（部分服务单独返回）
    pub refusal: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
}

/// 传输 / 服务级故障
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportFault {
    RateLimited(String),
    /// 带 HTTP 状态码的服务错误
    Status { code: u16, message: String },
    /// 服务端以内容策略为由拒绝了请求
    Blocked(String),
    /// 请求本身无法构造或被服务拒收
    InvalidRequest(String),
    /// 响应信封不符合预期结构
    InvalidEnvelope(String),
    /// 网络错误、超时
    Network(String),
}

/// 推理服务的原始结果，交给 classifier 归类
pub type RawOutcome = Result<RawCompletion, TransportFault>;
