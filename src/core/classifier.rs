//! 响应分类：把推理服务的原始返回归入封闭集合，编排器只按分类结果分支
//!
//! 纯函数，无共享状态。

use crate::core::error::{AssistantError, FaultSide};
use crate::llm::types::{FinishReason, RawOutcome, ToolInvocation, TransportFault};

/// 可用的推理结果：文本、工具调用，或二者兼有
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelReply {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    /// 去掉首尾空白后的非空文本
    pub fn usable_text(&self) -> Option<&str> {
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// 分类结果
#[derive(Clone, Debug, PartialEq)]
pub enum Classified {
    Ok(ModelReply),
    ContentFiltered(String),
    RateLimited(String),
    ClientError(String),
    ServerError(String),
    /// 响应信封未通过结构校验
    ValidationError(String),
    /// 结束原因异常或没有任何可用内容
    Malformed(String),
}

impl Classified {
    /// 映射为编排器使用的错误分类
    pub fn into_result(self) -> Result<ModelReply, AssistantError> {
        match self {
            Classified::Ok(reply) => Ok(reply),
            Classified::ContentFiltered(d) => Err(AssistantError::ContentFiltered(d)),
            Classified::RateLimited(d) => Err(AssistantError::RateLimited(d)),
            Classified::ClientError(detail) => Err(AssistantError::ServiceUnavailable {
                side: FaultSide::Client,
                detail,
            }),
            Classified::ServerError(detail) => Err(AssistantError::ServiceUnavailable {
                side: FaultSide::Server,
                detail,
            }),
            Classified::ValidationError(d) | Classified::Malformed(d) => {
                Err(AssistantError::MalformedModelResponse(d))
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Classified::Ok(_) => "ok",
            Classified::ContentFiltered(_) => "content_filtered",
            Classified::RateLimited(_) => "rate_limited",
            Classified::ClientError(_) => "client_error",
            Classified::ServerError(_) => "server_error",
            Classified::ValidationError(_) => "validation_error",
            Classified::Malformed(_) => "malformed",
        }
    }
}

pub fn classify(raw: RawOutcome) -> Classified {
    let completion = match raw {
        Ok(c) => c,
        Err(fault) => return classify_fault(fault),
    };

    match &completion.finish_reason {
        Some(FinishReason::ContentFilter) => {
            return Classified::ContentFiltered(
                completion
                    .refusal
                    .unwrap_or_else(|| "response blocked by the safety filter".to_string()),
            );
        }
        Some(reason) if !reason.is_normal() => {
            return Classified::Malformed(format!(
                "model response did not finish successfully: {reason:?}"
            ));
        }
        _ => {}
    }

    let has_text = completion
        .text
        .as_deref()
        .is_some_and(|t| !t.trim().is_empty());
    if !has_text && completion.tool_calls.is_empty() {
        return match completion.refusal {
            Some(refusal) if !refusal.trim().is_empty() => Classified::ContentFiltered(refusal),
            _ => Classified::Malformed(
                "model response contained no text and no tool call".to_string(),
            ),
        };
    }

    Classified::Ok(ModelReply {
        text: completion.text,
        tool_calls: completion.tool_calls,
    })
}

fn classify_fault(fault: TransportFault) -> Classified {
    match fault {
        TransportFault::RateLimited(m) => Classified::RateLimited(m),
        TransportFault::Status { code: 429, message } => Classified::RateLimited(message),
        TransportFault::Status { code, message } if (400..500).contains(&code) => {
            Classified::ClientError(format!("HTTP {code}: {message}"))
        }
        TransportFault::Status { code, message } => {
            Classified::ServerError(format!("HTTP {code}: {message}"))
        }
        TransportFault::Blocked(m) => Classified::ContentFiltered(m),
        TransportFault::InvalidRequest(m) => Classified::ClientError(m),
        TransportFault::InvalidEnvelope(m) => Classified::ValidationError(m),
        TransportFault::Network(m) => Classified::ServerError(m),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::RawCompletion;
    use serde_json::json;

    fn completion(finish: Option<FinishReason>, text: Option<&str>) -> RawCompletion {
        RawCompletion {
            finish_reason: finish,
            text: text.map(String::from),
            refusal: None,
            tool_calls: vec![],
        }
    }

    #[test]
    fn test_plain_text_is_ok() {
        let c = classify(Ok(completion(Some(FinishReason::Stop), Some("Hello"))));
        assert_eq!(c, Classified::Ok(ModelReply::text("Hello")));
    }

    #[test]
    fn test_missing_finish_reason_with_content_is_ok() {
        let c = classify(Ok(completion(None, Some("Hi"))));
        assert!(matches!(c, Classified::Ok(_)));
    }

    #[test]
    fn test_tool_call_without_text_is_ok() {
        let mut raw = completion(Some(FinishReason::ToolCalls), None);
        raw.tool_calls.push(ToolInvocation {
            id: "c1".into(),
            name: "execute_sql".into(),
            arguments: json!({"query": "SELECT 1"}),
        });
        let Classified::Ok(reply) = classify(Ok(raw)) else {
            panic!("expected Ok");
        };
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.usable_text(), None);
    }

    #[test]
    fn test_safety_finish_is_content_filtered() {
        let c = classify(Ok(completion(Some(FinishReason::ContentFilter), None)));
        assert!(matches!(c, Classified::ContentFiltered(_)));
    }

    #[test]
    fn test_refusal_is_content_filtered() {
        let mut raw = completion(Some(FinishReason::Stop), None);
        raw.refusal = Some("I can't help with that".into());
        assert_eq!(
            classify(Ok(raw)),
            Classified::ContentFiltered("I can't help with that".into())
        );
    }

    #[test]
    fn test_non_normal_finish_is_malformed() {
        let c = classify(Ok(completion(Some(FinishReason::Length), Some("truncated"))));
        assert!(matches!(c, Classified::Malformed(_)));
    }

    #[test]
    fn test_empty_content_is_malformed() {
        let c = classify(Ok(completion(Some(FinishReason::Stop), Some("   "))));
        assert!(matches!(c, Classified::Malformed(_)));
    }

    #[test]
    fn test_transport_faults() {
        assert!(matches!(
            classify(Err(TransportFault::Status { code: 429, message: "slow".into() })),
            Classified::RateLimited(_)
        ));
        assert!(matches!(
            classify(Err(TransportFault::Status { code: 401, message: "key".into() })),
            Classified::ClientError(_)
        ));
        assert!(matches!(
            classify(Err(TransportFault::Status { code: 503, message: "down".into() })),
            Classified::ServerError(_)
        ));
        assert!(matches!(
            classify(Err(TransportFault::Network("reset".into()))),
            Classified::ServerError(_)
        ));
        assert!(matches!(
            classify(Err(TransportFault::InvalidEnvelope("bad json".into()))),
            Classified::ValidationError(_)
        ));
        assert!(matches!(
            classify(Err(TransportFault::Blocked("policy".into()))),
            Classified::ContentFiltered(_)
        ));
    }

    #[test]
    fn test_into_result_mapping() {
        let err = Classified::ServerError("x".into()).into_result().unwrap_err();
        assert!(matches!(
            err,
            AssistantError::ServiceUnavailable { side: FaultSide::Server, .. }
        ));
        let err = Classified::ValidationError("x".into()).into_result().unwrap_err();
        assert!(matches!(err, AssistantError::MalformedModelResponse(_)));
        let err = Classified::RateLimited("x".into()).into_result().unwrap_err();
        assert_eq!(err.kind(), "rate_limited");
    }
}
