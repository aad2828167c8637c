//! 工具调用编排器：驱动单轮对话直到得到最终回答
//!
//! 循环执行 `state::transition` 给出的副作用：调用推理服务、执行查询、回传错误反馈、请求叙述。
//! 整轮在会话事务内进行，只有到达 Finish 才一次性提交 user + assistant 两条 Turn；
//! 整轮失败、超时或被取消时事务被丢弃，会话保持上一次一致的状态。

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::core::classifier::{classify, Classified, ModelReply};
use crate::core::error::AssistantError;
use crate::core::recovery::RecoveryEngine;
use crate::core::state::{transition, Effect, RowSet, TurnEvent, TurnOutcome, TurnState};
use crate::llm::types::{ModelMessage, ModelRequest, ToolDeclaration};
use crate::llm::LlmClient;
use crate::memory::{Role, SessionStore, Turn};
use crate::prompt::PromptCompiler;
use crate::schema::SchemaDescription;
use crate::tools::{sql_tool_declaration, ToolExecutor};

/// 单轮查询总次数上限（首次 + 2 次纠正）
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// 回传给推理服务的结果预览行数
pub const DEFAULT_PREVIEW_ROWS: usize = 5;

#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub max_attempts: u32,
    pub preview_rows: usize,
    pub temperature: f32,
    /// 声明工具的请求
    pub max_output_tokens: u32,
    /// 最终叙述请求
    pub narration_max_output_tokens: u32,
    pub turn_deadline: Duration,
    pub max_columns_per_table: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            temperature: 0.1,
            max_output_tokens: 2048,
            narration_max_output_tokens: 1024,
            turn_deadline: Duration::from_secs(90),
            max_columns_per_table: crate::prompt::DEFAULT_MAX_COLUMNS_PER_TABLE,
        }
    }
}

pub struct Orchestrator {
    llm: Arc<dyn LlmClient>,
    executor: ToolExecutor,
    compiler: PromptCompiler,
    recovery: RecoveryEngine,
    tool: ToolDeclaration,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolExecutor,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            llm,
            executor,
            compiler: PromptCompiler::new(config.max_attempts, config.max_columns_per_table),
            recovery: RecoveryEngine::new(),
            tool: sql_tool_declaration(),
            config,
        }
    }

    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 执行一轮对话；超过 turn_deadline 返回 Timeout，会话内容不变
    pub async fn run_turn(
        &self,
        store: &SessionStore,
        session_id: &str,
        user_message: &str,
        schema: &SchemaDescription,
    ) -> Result<TurnOutcome, AssistantError> {
        let deadline = self.config.turn_deadline;
        let turn = self.drive(store, session_id, user_message, schema);
        match tokio::time::timeout(deadline, turn).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(session = %session_id, ?deadline, "turn deadline exceeded");
                Err(AssistantError::Timeout(deadline))
            }
        }
    }

    async fn drive(
        &self,
        store: &SessionStore,
        session_id: &str,
        user_message: &str,
        schema: &SchemaDescription,
    ) -> Result<TurnOutcome, AssistantError> {
        let txn = store.begin(session_id).await?;
        let instructions = self.compiler.compile(schema);

        let mut messages: Vec<ModelMessage> = txn
            .turns()
            .iter()
            .filter_map(|turn| match turn.role {
                Role::User => Some(ModelMessage::User(turn.content.clone())),
                Role::Assistant => Some(ModelMessage::Assistant(turn.content.clone())),
                Role::System => None,
            })
            .collect();
        messages.push(ModelMessage::User(user_message.to_string()));

        let mut state = TurnState::Start;
        let mut event = TurnEvent::Begin;
        loop {
            let (next, effect) = transition(state, event, self.config.max_attempts);
            tracing::debug!(session = %session_id, state = %next, "turn transition");
            state = next;

            event = match effect {
                Effect::CallModel => {
                    let reply = self.call_model(&instructions, &messages, true).await;
                    TurnEvent::ModelReplied(reply)
                }
                Effect::RecordToolCall(call) => {
                    messages.push(ModelMessage::ToolCall(call));
                    TurnEvent::ToolCallRecorded
                }
                Effect::ExecuteQuery(query) => {
                    tracing::info!(session = %session_id, state = %state, "executing query");
                    match self.executor.execute(&query).await {
                        Ok(rows) => TurnEvent::QuerySucceeded(Arc::new(rows)),
                        Err(e) => {
                            tracing::warn!(kind = e.kind.as_str(), error = %e, "query failed");
                            TurnEvent::QueryFailed(e)
                        }
                    }
                }
                Effect::SendFeedback { call, error } => {
                    messages.push(ModelMessage::ToolResult {
                        call_id: call.id,
                        name: call.name,
                        payload: self.recovery.feedback(&error),
                    });
                    TurnEvent::FeedbackSent
                }
                Effect::Narrate { call, rows } => {
                    messages.push(ModelMessage::ToolResult {
                        call_id: call.id,
                        name: call.name,
                        payload: self.result_payload(&rows),
                    });
                    let reply = self.call_model(&instructions, &messages, false).await;
                    TurnEvent::Narrated(reply)
                }
                Effect::Finish(outcome) => {
                    tracing::info!(
                        session = %session_id,
                        attempts = outcome.attempts,
                        has_query = outcome.query.is_some(),
                        rows = ?outcome.rows.as_ref().map(Vec::len),
                        "turn finished"
                    );
                    txn.commit(vec![Turn::user(user_message), Turn::assistant(&outcome.answer)]);
                    return Ok(outcome);
                }
                Effect::Fail(err) => {
                    tracing::warn!(
                        session = %session_id,
                        kind = err.kind(),
                        error = %err,
                        "turn failed"
                    );
                    return Err(err);
                }
            };
        }
    }

    /// 调用推理服务并分类；with_tool = false 为最终叙述请求
    async fn call_model(
        &self,
        instructions: &str,
        messages: &[ModelMessage],
        with_tool: bool,
    ) -> Result<ModelReply, AssistantError> {
        let request = ModelRequest {
            instructions: instructions.to_string(),
            messages: messages.to_vec(),
            tool: with_tool.then(|| self.tool.clone()),
            temperature: self.config.temperature,
            max_output_tokens: if with_tool {
                self.config.max_output_tokens
            } else {
                self.config.narration_max_output_tokens
            },
        };
        tracing::info!(messages = messages.len(), with_tool, "calling reasoning service");

        let classified = classify(self.llm.complete(&request).await);
        if !matches!(classified, Classified::Ok(_)) {
            tracing::warn!(
                classification = classified.label(),
                with_tool,
                "model response rejected"
            );
        }
        classified.into_result()
    }

    /// 成功结果的 function-result 载荷：行数 + 至多 preview_rows 行预览
    fn result_payload(&self, rows: &RowSet) -> serde_json::Value {
        let preview = &rows[..rows.len().min(self.config.preview_rows)];
        let preview = serde_json::to_string_pretty(preview).unwrap_or_else(|_| "[]".to_string());
        json!({
            "result": format!("Query returned {} results: {}...", rows.len(), preview),
        })
    }
}
