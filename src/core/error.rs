//! 错误分类：单轮对话可能出现的全部错误（封闭集合）
//!
//! 调用方只需按 AssistantError 的变体分支处理；QueryError 由查询执行器抛出，
//! 在重试预算内由编排器就地恢复，不直接暴露给调用方。

use std::time::Duration;

use thiserror::Error;

/// 查询执行失败的类别（由执行器给出）
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// 执行器拒绝了该语句（如写操作）
    Rejected,
    /// 语句本身执行出错（列名、表名、语法等）
    Execution,
    /// 后端不可用（连接失败等），改写查询也无济于事
    Unavailable,
}

impl QueryErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::Rejected => "rejected",
            QueryErrorKind::Execution => "execution",
            QueryErrorKind::Unavailable => "unavailable",
        }
    }
}

/// 查询执行器返回的错误
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{message}")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl QueryError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Execution,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Unavailable,
            message: message.into(),
        }
    }

    /// 是否值得让推理服务改写查询后重试
    pub fn is_recoverable(&self) -> bool {
        !matches!(self.kind, QueryErrorKind::Unavailable)
    }
}

/// 传输层故障的来源
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultSide {
    Client,
    Server,
}

/// 单轮对话的错误分类
#[derive(Error, Clone, Debug)]
pub enum AssistantError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Content was filtered for safety: {0}")]
    ContentFiltered(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Reasoning service unavailable ({side:?} error): {detail}")]
    ServiceUnavailable { side: FaultSide, detail: String },

    #[error("Malformed model response: {0}")]
    MalformedModelResponse(String),

    #[error("Query execution failed: {0}")]
    QueryExecution(QueryError),

    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted { attempts: u32, last_error: String },

    #[error("Turn timed out after {0:?}")]
    Timeout(Duration),
}

impl AssistantError {
    /// 稳定的错误标签（用于诊断信息与日志）
    pub fn kind(&self) -> &'static str {
        match self {
            AssistantError::UnknownSession(_) => "unknown_session",
            AssistantError::ContentFiltered(_) => "content_filtered",
            AssistantError::RateLimited(_) => "rate_limited",
            AssistantError::ServiceUnavailable { .. } => "service_unavailable",
            AssistantError::MalformedModelResponse(_) => "malformed_model_response",
            AssistantError::QueryExecution(_) => "query_execution_error",
            AssistantError::RetryBudgetExhausted { .. } => "retry_budget_exhausted",
            AssistantError::Timeout(_) => "timeout",
        }
    }
}
