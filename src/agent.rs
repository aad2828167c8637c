//! 调用方 API：会话管理 + 单轮问答
//!
//! Assistant 把 SessionStore、SchemaCache 与 Orchestrator 组装在一起，对外只暴露
//! create_session / run_turn / chat / clear_session / get_history。
//! 整轮失败会转换为通俗的提示语；技术细节只放在 `ChatResponse::error` 里，开发模式下才拼进回复。

use std::sync::Arc;

use serde::Serialize;

use crate::config::AppConfig;
use crate::core::{AssistantError, Orchestrator, OrchestratorConfig, QueryError, TurnOutcome};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::{SessionId, SessionStore, Turn};
use crate::schema::{SchemaCache, SchemaProvider};
use crate::tools::{QueryExecutor, Row, SqliteExecutor, ToolExecutor};

/// 整轮失败时展示给用户的提示
pub const FAILURE_MESSAGE: &str =
    "I encountered an error processing your request. Please try rephrasing your question.";

/// 诊断信息
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub detail: String,
}

impl From<&AssistantError> for ErrorInfo {
    fn from(err: &AssistantError) -> Self {
        Self {
            kind: err.kind().to_string(),
            detail: err.to_string(),
        }
    }
}

/// 单轮回复
#[derive(Clone, Debug, Serialize)]
pub struct ChatResponse {
    pub message: String,
    /// 最后一次尝试的查询
    pub query: Option<String>,
    /// 最后一次成功查询的完整结果
    pub rows: Option<Vec<Row>>,
    pub error: Option<ErrorInfo>,
    pub session_id: SessionId,
    pub has_query: bool,
}

impl ChatResponse {
    fn from_outcome(session_id: &str, outcome: TurnOutcome) -> Self {
        Self {
            has_query: outcome.query.is_some(),
            message: outcome.answer,
            query: outcome.query,
            rows: outcome.rows,
            error: outcome.error.as_ref().map(ErrorInfo::from),
            session_id: session_id.to_string(),
        }
    }

    fn failure(session_id: &str, err: &AssistantError, dev_mode: bool) -> Self {
        let message = if dev_mode {
            format!("{FAILURE_MESSAGE}\n\nTechnical details: {err}")
        } else {
            FAILURE_MESSAGE.to_string()
        };
        Self {
            message,
            query: None,
            rows: None,
            error: Some(ErrorInfo::from(err)),
            session_id: session_id.to_string(),
            has_query: false,
        }
    }
}

pub struct Assistant {
    sessions: SessionStore,
    orchestrator: Orchestrator,
    schema: SchemaCache,
    dev_mode: bool,
}

impl Assistant {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: Arc<dyn QueryExecutor>,
        schema_provider: Arc<dyn SchemaProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            sessions: SessionStore::new(),
            orchestrator: Orchestrator::new(llm, ToolExecutor::new(executor), config),
            schema: SchemaCache::new(schema_provider),
            dev_mode: false,
        }
    }

    pub fn with_dev_mode(mut self, dev_mode: bool) -> Self {
        self.dev_mode = dev_mode;
        self
    }

    /// 按配置组装：推理服务后端 + 只读 SQLite（同时作为查询执行器与结构来源）
    pub fn from_config(cfg: &AppConfig) -> Result<Self, QueryError> {
        let db = Arc::new(SqliteExecutor::open(&cfg.database.path, cfg.database.max_rows)?);
        if !db.health_check() {
            return Err(QueryError::unavailable(format!(
                "database {} failed health check",
                cfg.database.path.display()
            )));
        }
        let llm = create_llm_from_config(cfg);
        Ok(Self::new(llm, db.clone(), db, cfg.orchestrator_config())
            .with_dev_mode(cfg.app.dev_mode))
    }

    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    pub async fn create_session(&self) -> SessionId {
        self.sessions.create().await
    }

    /// 执行一轮问答；只有 UnknownSession 作为 Err 返回，其余失败都转换为带诊断信息的回复
    pub async fn run_turn(
        &self,
        session_id: &str,
        text: &str,
    ) -> Result<ChatResponse, AssistantError> {
        if !self.sessions.exists(session_id).await {
            return Err(AssistantError::UnknownSession(session_id.to_string()));
        }

        let schema = match self.schema.get().await {
            Ok(schema) => schema,
            Err(e) => {
                tracing::error!(error = %e, "schema unavailable");
                let err = AssistantError::QueryExecution(e);
                return Ok(ChatResponse::failure(session_id, &err, self.dev_mode));
            }
        };

        match self
            .orchestrator
            .run_turn(&self.sessions, session_id, text, &schema)
            .await
        {
            Ok(outcome) => Ok(ChatResponse::from_outcome(session_id, outcome)),
            Err(err @ AssistantError::UnknownSession(_)) => Err(err),
            Err(err) => Ok(ChatResponse::failure(session_id, &err, self.dev_mode)),
        }
    }

    /// 未给出会话时新建一个
    pub async fn chat(
        &self,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<ChatResponse, AssistantError> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => self.create_session().await,
        };
        self.run_turn(&session_id, message).await
    }

    pub async fn clear_session(&self, session_id: &str) -> Result<(), AssistantError> {
        self.sessions.clear(session_id).await
    }

    pub async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>, AssistantError> {
        self.sessions.read(session_id).await
    }

    /// 丢弃缓存的结构描述，下一轮重新内省
    pub async fn invalidate_schema(&self) {
        self.schema.invalidate().await;
    }

    /// 推理服务累计 token 使用 (prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.orchestrator.token_usage()
    }
}
