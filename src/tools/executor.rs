//! 查询执行器
//!
//! QueryExecutor 是同步的单方法能力接口（只读语义与危险语句拦截由实现方负责）；
//! ToolExecutor 把它放到阻塞线程池执行，避免占用异步工作线程，并为每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::core::QueryError;

/// 一行结果：列名 -> 值
pub type Row = serde_json::Map<String, Value>;

/// 执行一条查询，返回结果行或分类错误
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, query: &str) -> Result<Vec<Row>, QueryError>;
}

impl<F> QueryExecutor for F
where
    F: Fn(&str) -> Result<Vec<Row>, QueryError> + Send + Sync,
{
    fn execute(&self, query: &str) -> Result<Vec<Row>, QueryError> {
        self(query)
    }
}

/// 异步包装：spawn_blocking 调用 QueryExecutor 并输出审计日志
#[derive(Clone)]
pub struct ToolExecutor {
    inner: Arc<dyn QueryExecutor>,
}

impl ToolExecutor {
    pub fn new(inner: Arc<dyn QueryExecutor>) -> Self {
        Self { inner }
    }

    /// 执行查询；执行线程 panic 视为后端不可用
    pub async fn execute(&self, query: &str) -> Result<Vec<Row>, QueryError> {
        let start = Instant::now();
        let inner = self.inner.clone();
        let owned = query.to_string();
        let result = tokio::task::spawn_blocking(move || inner.execute(&owned))
            .await
            .unwrap_or_else(|e| Err(QueryError::unavailable(format!("query task failed: {e}"))));

        let (ok, outcome, row_count) = match &result {
            Ok(rows) => (true, "ok", rows.len()),
            Err(e) => (false, e.kind.as_str(), 0),
        };
        let audit = serde_json::json!({
            "event": "query_audit",
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "row_count": row_count,
            "query_preview": query_preview(query),
        });
        tracing::info!(audit = %audit.to_string(), "query");

        result
    }
}

fn query_preview(query: &str) -> String {
    let one_line = query.split_whitespace().collect::<Vec<_>>().join(" ");
    if one_line.chars().count() > 200 {
        format!("{}...", one_line.chars().take(200).collect::<String>())
    } else {
        one_line
    }
}
