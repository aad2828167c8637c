//! 单轮编排状态机
//!
//! `transition(state, event)` 是纯函数：给出下一状态与需要执行的副作用（Effect），
//! 由 Orchestrator 执行副作用并把结果作为下一个事件送回。无需真实推理服务即可逐步测试。

use std::fmt;
use std::sync::Arc;

use crate::core::classifier::ModelReply;
use crate::core::error::{AssistantError, QueryError};
use crate::llm::types::ToolInvocation;
use crate::tools::{Row, SQL_TOOL_NAME};

/// 一次成功查询的完整结果集（状态与副作用之间共享）
pub type RowSet = Arc<Vec<Row>>;

#[derive(Clone, Debug)]
pub enum TurnState {
    Start,
    /// attempts：本轮已执行的查询次数
    AwaitingModel { attempts: u32 },
    /// 终态：推理服务直接给出文本
    ModelRespondedWithText(String),
    ModelRespondedWithToolCall { attempt: u32, call: ToolInvocation },
    ExecutingTool { attempt: u32, call: ToolInvocation },
    /// 查询成功，等待（或已完成）叙述
    ToolSucceeded { attempt: u32, call: ToolInvocation, rows: RowSet },
    ToolFailed { attempt: u32, call: ToolInvocation, error: QueryError },
    /// 终态：重试预算耗尽或后端不可用
    RetryLimitReached { attempts: u32, query: String, error: QueryError },
    /// 终态：整轮失败
    TransportOrContentError(AssistantError),
}

impl TurnState {
    pub fn name(&self) -> &'static str {
        match self {
            TurnState::Start => "Start",
            TurnState::AwaitingModel { .. } => "AwaitingModel",
            TurnState::ModelRespondedWithText(_) => "ModelRespondedWithText",
            TurnState::ModelRespondedWithToolCall { .. } => "ModelRespondedWithToolCall",
            TurnState::ExecutingTool { .. } => "ExecutingTool",
            TurnState::ToolSucceeded { .. } => "ToolSucceeded",
            TurnState::ToolFailed { .. } => "ToolFailed",
            TurnState::RetryLimitReached { .. } => "RetryLimitReached",
            TurnState::TransportOrContentError(_) => "TransportOrContentError",
        }
    }
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 送入状态机的事件（副作用的结果）
#[derive(Clone, Debug)]
pub enum TurnEvent {
    Begin,
    /// 声明了工具的请求的分类结果
    ModelReplied(Result<ModelReply, AssistantError>),
    ToolCallRecorded,
    QuerySucceeded(RowSet),
    QueryFailed(QueryError),
    FeedbackSent,
    /// 不声明工具的叙述请求的分类结果
    Narrated(Result<ModelReply, AssistantError>),
}

impl TurnEvent {
    fn name(&self) -> &'static str {
        match self {
            TurnEvent::Begin => "Begin",
            TurnEvent::ModelReplied(_) => "ModelReplied",
            TurnEvent::ToolCallRecorded => "ToolCallRecorded",
            TurnEvent::QuerySucceeded(_) => "QuerySucceeded",
            TurnEvent::QueryFailed(_) => "QueryFailed",
            TurnEvent::FeedbackSent => "FeedbackSent",
            TurnEvent::Narrated(_) => "Narrated",
        }
    }
}

/// 需要 Orchestrator 执行的副作用
#[derive(Clone, Debug)]
pub enum Effect {
    /// 带工具声明调用推理服务
    CallModel,
    /// 把工具调用写入本轮出站记录
    RecordToolCall(ToolInvocation),
    ExecuteQuery(String),
    /// 把错误反馈写入本轮出站记录
    SendFeedback { call: ToolInvocation, error: QueryError },
    /// 写入成功结果并发起不带工具的叙述请求
    Narrate { call: ToolInvocation, rows: RowSet },
    /// 结束本轮，提交 user + assistant 两条记录
    Finish(TurnOutcome),
    /// 整轮失败，不写入任何记录
    Fail(AssistantError),
}

/// 单轮结果
#[derive(Clone, Debug)]
pub struct TurnOutcome {
    pub answer: String,
    /// 最后一次尝试的查询
    pub query: Option<String>,
    /// 最后一次成功查询的完整结果
    pub rows: Option<Vec<Row>>,
    /// 诊断信息（重试耗尽等），不影响 answer 的展示
    pub error: Option<AssistantError>,
    pub attempts: u32,
}

impl TurnOutcome {
    fn text(answer: String, attempts: u32) -> Self {
        Self {
            answer,
            query: None,
            rows: None,
            error: None,
            attempts,
        }
    }
}

/// 重试耗尽时给用户的说明
pub fn exhaustion_message(attempts: u32, last_error: &str) -> String {
    let approaches = if attempts == 1 { "approach" } else { "approaches" };
    format!(
        "I tried {attempts} different {approaches} to get that information, but ran into database errors. \
         The most recent issue was: {last_error}. \
         Please try rephrasing your question or asking for different information."
    )
}

/// 查询成功但叙述失败时的兜底回答
pub fn narration_fallback(row_count: usize) -> String {
    format!("I found {row_count} results for your query, but had trouble phrasing the final answer.")
}

fn malformed(detail: impl Into<String>) -> (TurnState, Effect) {
    let err = AssistantError::MalformedModelResponse(detail.into());
    (TurnState::TransportOrContentError(err.clone()), Effect::Fail(err))
}

fn take_rows(rows: RowSet) -> Vec<Row> {
    Arc::try_unwrap(rows).unwrap_or_else(|shared| shared.as_ref().clone())
}

/// 状态转移：max_attempts 为单轮允许的查询总次数（首次 + 纠正重试）
pub fn transition(state: TurnState, event: TurnEvent, max_attempts: u32) -> (TurnState, Effect) {
    match (state, event) {
        (TurnState::Start, TurnEvent::Begin) => {
            (TurnState::AwaitingModel { attempts: 0 }, Effect::CallModel)
        }

        (TurnState::AwaitingModel { .. }, TurnEvent::ModelReplied(Err(err))) => {
            (TurnState::TransportOrContentError(err.clone()), Effect::Fail(err))
        }

        (TurnState::AwaitingModel { attempts }, TurnEvent::ModelReplied(Ok(reply))) => {
            if reply.tool_calls.len() > 1 {
                tracing::warn!(
                    count = reply.tool_calls.len(),
                    "multiple tool calls in one response, executing the first only"
                );
            }
            if let Some(call) = reply.tool_calls.into_iter().next() {
                if call.name != SQL_TOOL_NAME {
                    return malformed(format!("model called undeclared tool '{}'", call.name));
                }
                if call.query().is_none() {
                    return malformed(format!(
                        "tool call '{}' has no query argument",
                        call.id
                    ));
                }
                let attempt = attempts + 1;
                return (
                    TurnState::ModelRespondedWithToolCall {
                        attempt,
                        call: call.clone(),
                    },
                    Effect::RecordToolCall(call),
                );
            }
            match reply.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                Some(text) => {
                    let text = text.to_string();
                    (
                        TurnState::ModelRespondedWithText(text.clone()),
                        Effect::Finish(TurnOutcome::text(text, attempts)),
                    )
                }
                None => malformed("model response contained no text and no tool call"),
            }
        }

        (TurnState::ModelRespondedWithToolCall { attempt, call }, TurnEvent::ToolCallRecorded) => {
            let query = call.query().unwrap_or_default().to_string();
            (
                TurnState::ExecutingTool { attempt, call },
                Effect::ExecuteQuery(query),
            )
        }

        (TurnState::ExecutingTool { attempt, call }, TurnEvent::QuerySucceeded(rows)) => (
            TurnState::ToolSucceeded {
                attempt,
                call: call.clone(),
                rows: rows.clone(),
            },
            Effect::Narrate { call, rows },
        ),

        (TurnState::ExecutingTool { attempt, call }, TurnEvent::QueryFailed(error)) => {
            if error.is_recoverable() && attempt < max_attempts {
                return (
                    TurnState::ToolFailed {
                        attempt,
                        call: call.clone(),
                        error: error.clone(),
                    },
                    Effect::SendFeedback { call, error },
                );
            }

            let query = call.query().unwrap_or_default().to_string();
            let diagnostic = if error.is_recoverable() {
                AssistantError::RetryBudgetExhausted {
                    attempts: attempt,
                    last_error: error.message.clone(),
                }
            } else {
                AssistantError::QueryExecution(error.clone())
            };
            let outcome = TurnOutcome {
                answer: exhaustion_message(attempt, &error.message),
                query: Some(query.clone()),
                rows: None,
                error: Some(diagnostic),
                attempts: attempt,
            };
            (
                TurnState::RetryLimitReached {
                    attempts: attempt,
                    query,
                    error,
                },
                Effect::Finish(outcome),
            )
        }

        (TurnState::ToolFailed { attempt, .. }, TurnEvent::FeedbackSent) => {
            (TurnState::AwaitingModel { attempts: attempt }, Effect::CallModel)
        }

        (TurnState::ToolSucceeded { attempt, call, rows }, TurnEvent::Narrated(result)) => {
            let narrated = match &result {
                Ok(reply) => reply.usable_text().map(String::from),
                Err(err) => {
                    tracing::warn!(error = %err, "narration request failed, using fallback answer");
                    None
                }
            };
            let answer = narrated.unwrap_or_else(|| narration_fallback(rows.len()));
            let query = call.query().map(String::from);
            let outcome = TurnOutcome {
                answer,
                query,
                rows: Some(take_rows(rows.clone())),
                error: None,
                attempts: attempt,
            };
            (
                TurnState::ToolSucceeded { attempt, call, rows },
                Effect::Finish(outcome),
            )
        }

        (state, event) => {
            tracing::warn!(state = %state, event = event.name(), "invalid turn transition");
            malformed(format!(
                "unexpected {} while in state {}",
                event.name(),
                state.name()
            ))
        }
    }
}
