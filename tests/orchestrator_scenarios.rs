//! 单轮编排集成测试：预置推理服务回复 + 假查询执行器，经 Assistant 公共 API 驱动

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aquifer::core::{AssistantError, OrchestratorConfig, QueryError};
use aquifer::llm::mock::{sql_call_completion, text_completion, tool_call_completion};
use aquifer::llm::{LlmClient, ModelRequest, RawOutcome, ScriptedLlmClient, TransportFault};
use aquifer::memory::Role;
use aquifer::prompt::COLUMN_LOCATION_RULE;
use aquifer::schema::StaticSchema;
use aquifer::tools::{QueryExecutor, Row};
use aquifer::Assistant;
use serde_json::json;

/// 按调用顺序返回预置结果；用完后重复最后一个
struct SequenceExecutor {
    results: Vec<Result<Vec<Row>, QueryError>>,
    calls: AtomicUsize,
}

impl SequenceExecutor {
    fn new(results: Vec<Result<Vec<Row>, QueryError>>) -> Self {
        Self {
            results,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl QueryExecutor for SequenceExecutor {
    fn execute(&self, _query: &str) -> Result<Vec<Row>, QueryError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let idx = n.min(self.results.len() - 1);
        self.results[idx].clone()
    }
}

/// 每次调用先睡眠，用于触发整轮期限
struct SlowLlm(Duration);

#[async_trait::async_trait]
impl LlmClient for SlowLlm {
    async fn complete(&self, _request: &ModelRequest) -> RawOutcome {
        tokio::time::sleep(self.0).await;
        Ok(text_completion("too late"))
    }
}

fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn build(
    llm: Arc<dyn LlmClient>,
    executor: Arc<dyn QueryExecutor>,
    config: OrchestratorConfig,
) -> Assistant {
    Assistant::new(llm, executor, Arc::new(StaticSchema::default()), config)
}

#[tokio::test]
async fn active_system_count_is_answered_from_query() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(sql_call_completion(
            "call_1",
            "SELECT COUNT(*) AS count FROM sdwa_pub_water_systems WHERE pws_activity_code = 'A'",
        )),
        Ok(text_completion("There are 42 active water systems in Georgia.")),
    ]));
    let executor = Arc::new(SequenceExecutor::new(vec![Ok(vec![row(&[("count", json!(42))])])]));
    let assistant = build(llm.clone(), executor.clone(), OrchestratorConfig::default());
    let s1 = assistant.create_session().await;

    let response = assistant
        .run_turn(&s1, "how many active systems are there")
        .await
        .unwrap();

    assert!(response.message.contains("42"));
    assert!(response.has_query);
    assert!(response.query.is_some());
    assert_eq!(response.rows, Some(vec![row(&[("count", json!(42))])]));
    assert!(response.error.is_none());

    let history = assistant.get_history(&s1).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "how many active systems are there");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn corrected_query_after_unknown_column() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(sql_call_completion("call_1", "SELECT city_served FROM sdwa_pub_water_systems")),
        Ok(sql_call_completion("call_2", "SELECT pws_name AS name FROM sdwa_pub_water_systems")),
        Ok(text_completion("The system is called X.")),
    ]));
    let executor = Arc::new(SequenceExecutor::new(vec![
        Err(QueryError::execution("column city_served does not exist")),
        Ok(vec![row(&[("name", json!("X"))])]),
    ]));
    let assistant = build(llm.clone(), executor.clone(), OrchestratorConfig::default());
    let id = assistant.create_session().await;

    let response = assistant.run_turn(&id, "which system serves Macon?").await.unwrap();

    assert_eq!(llm.call_count(), 3);
    assert_eq!(executor.calls(), 2);
    assert_eq!(response.rows, Some(vec![row(&[("name", json!("X"))])]));
    assert_eq!(
        response.query.as_deref(),
        Some("SELECT pws_name AS name FROM sdwa_pub_water_systems")
    );

    // 第二次请求带着错误反馈，且包含与指令相同的列归属规则
    let requests = llm.requests();
    let feedback = requests[1].tool_results();
    assert_eq!(feedback.len(), 1);
    assert!(feedback[0]["error"]
        .as_str()
        .unwrap()
        .starts_with("SQL Error: column city_served does not exist"));
    assert!(feedback[0]["hint"].as_str().unwrap().contains(COLUMN_LOCATION_RULE));
    assert!(requests[0].instructions.contains(COLUMN_LOCATION_RULE));
    assert!(requests[1].tool.is_some());
    assert!(requests[2].tool.is_none());
}

#[tokio::test]
async fn always_failing_executor_exhausts_budget() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(sql_call_completion("call_1", "SELECT a FROM t")),
        Ok(sql_call_completion("call_2", "SELECT b FROM t")),
        Ok(sql_call_completion("call_3", "SELECT c FROM t")),
        Ok(text_completion("should never be requested")),
    ]));
    let executor = Arc::new(SequenceExecutor::new(vec![Err(QueryError::execution(
        "no such table: t",
    ))]));
    let assistant = build(llm.clone(), executor.clone(), OrchestratorConfig::default());
    let id = assistant.create_session().await;

    let response = assistant.run_turn(&id, "show me t").await.unwrap();

    assert_eq!(executor.calls(), 3);
    assert_eq!(llm.call_count(), 3);
    assert!(response.message.contains("3"));
    assert!(response.message.contains("no such table: t"));
    assert_eq!(response.query.as_deref(), Some("SELECT c FROM t"));
    assert!(response.rows.is_none());
    assert_eq!(response.error.unwrap().kind, "retry_budget_exhausted");

    // 重试耗尽的说明会写入会话
    let history = assistant.get_history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, response.message);
}

#[tokio::test]
async fn unavailable_backend_stops_after_first_attempt() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(sql_call_completion("call_1", "SELECT COUNT(*) FROM sdwa_pub_water_systems")),
        Ok(sql_call_completion("call_2", "should never be requested")),
    ]));
    let executor = Arc::new(SequenceExecutor::new(vec![Err(QueryError::unavailable(
        "database is locked",
    ))]));
    let assistant = build(llm.clone(), executor.clone(), OrchestratorConfig::default());
    let id = assistant.create_session().await;

    let response = assistant.run_turn(&id, "how many systems?").await.unwrap();

    assert_eq!(executor.calls(), 1);
    assert_eq!(llm.call_count(), 1);
    assert!(response.message.contains("I tried 1 different approach "));
    assert!(response.message.contains("database is locked"));
    assert!(response.rows.is_none());
    assert_eq!(response.error.unwrap().kind, "query_execution_error");

    let history = assistant.get_history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "how many systems?");
    assert_eq!(history[1].content, response.message);
}

#[tokio::test]
async fn plain_text_after_error_feedback_ends_turn() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(sql_call_completion("call_1", "SELECT lead_ppb FROM sdwa_lcr_samples")),
        Ok(text_completion(
            "The database does not track lead sample results at that level of detail.",
        )),
    ]));
    let executor = Arc::new(SequenceExecutor::new(vec![Err(QueryError::execution(
        "no such table: sdwa_lcr_samples",
    ))]));
    let assistant = build(llm.clone(), executor.clone(), OrchestratorConfig::default());
    let id = assistant.create_session().await;

    let response = assistant.run_turn(&id, "lead levels in Atlanta?").await.unwrap();

    assert_eq!(executor.calls(), 1);
    assert_eq!(llm.call_count(), 2);
    assert_eq!(
        response.message,
        "The database does not track lead sample results at that level of detail."
    );
    assert!(response.query.is_none());
    assert!(response.rows.is_none());
    assert!(response.error.is_none());

    // 第二次请求仍声明工具，并带着第一次的错误反馈
    let requests = llm.requests();
    assert!(requests[1].tool.is_some());
    assert!(requests[1].tool_results()[0]["error"]
        .as_str()
        .unwrap()
        .contains("no such table: sdwa_lcr_samples"));

    let history = assistant.get_history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, response.message);
}

#[tokio::test]
async fn narration_failure_still_returns_rows() {
    let rows: Vec<Row> = (0..8).map(|i| row(&[("pwsid", json!(format!("GA{i:07}")))])).collect();
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(sql_call_completion("call_1", "SELECT pwsid FROM sdwa_pub_water_systems")),
        Err(TransportFault::Status {
            code: 500,
            message: "internal error".into(),
        }),
    ]));
    let executor = Arc::new(SequenceExecutor::new(vec![Ok(rows.clone())]));
    let assistant = build(llm, executor, OrchestratorConfig::default());
    let id = assistant.create_session().await;

    let response = assistant.run_turn(&id, "list system ids").await.unwrap();

    assert_eq!(
        response.message,
        "I found 8 results for your query, but had trouble phrasing the final answer."
    );
    assert_eq!(response.rows, Some(rows));
    assert!(response.query.is_some());
    assert_eq!(assistant.get_history(&id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn plain_text_reply_needs_no_query() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(text_completion(
        "Hi! Ask me about Georgia water systems.",
    ))]));
    let executor = Arc::new(SequenceExecutor::new(vec![Ok(vec![])]));
    let assistant = build(llm, executor.clone(), OrchestratorConfig::default());
    let id = assistant.create_session().await;

    let response = assistant.run_turn(&id, "hello").await.unwrap();

    assert_eq!(response.message, "Hi! Ask me about Georgia water systems.");
    assert!(response.query.is_none());
    assert!(response.rows.is_none());
    assert!(!response.has_query);
    assert_eq!(executor.calls(), 0);

    let history = assistant.get_history(&id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[1].role, Role::Assistant);
}

#[tokio::test]
async fn transcript_only_grows() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(text_completion("first answer")),
        Ok(sql_call_completion("call_1", "SELECT 1 AS one")),
        Ok(text_completion("second answer")),
        Err(TransportFault::RateLimited("slow down".into())),
        Ok(text_completion("third answer")),
    ]));
    let executor = Arc::new(SequenceExecutor::new(vec![Ok(vec![row(&[("one", json!(1))])])]));
    let assistant = build(llm, executor, OrchestratorConfig::default());
    let id = assistant.create_session().await;

    let mut previous = Vec::new();
    for question in ["q1", "q2", "q3", "q4"] {
        assistant.run_turn(&id, question).await.unwrap();
        let history = assistant.get_history(&id).await.unwrap();
        assert!(history.len() >= previous.len());
        assert_eq!(&history[..previous.len()], previous.as_slice());
        previous = history;
    }
    // q3 被限流，不留下任何记录
    let contents: Vec<&str> = previous.iter().map(|t| t.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["q1", "first answer", "q2", "second answer", "q4", "third answer"]
    );
}

#[tokio::test]
async fn clear_resets_history_but_keeps_session() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(text_completion("one")),
        Ok(text_completion("two")),
    ]));
    let executor = Arc::new(SequenceExecutor::new(vec![Ok(vec![])]));
    let assistant = build(llm.clone(), executor, OrchestratorConfig::default());
    let id = assistant.create_session().await;

    assistant.run_turn(&id, "first").await.unwrap();
    assistant.clear_session(&id).await.unwrap();
    assert!(assistant.get_history(&id).await.unwrap().is_empty());

    let response = assistant.run_turn(&id, "second").await.unwrap();
    assert_eq!(response.message, "two");
    assert_eq!(assistant.get_history(&id).await.unwrap().len(), 2);
    // 清空后的请求里看不到之前的对话
    assert_eq!(llm.requests()[1].messages.len(), 1);
}

#[tokio::test]
async fn sessions_are_distinct_and_independent() {
    let replies: Vec<RawOutcome> = (0..4).map(|i| Ok(text_completion(format!("answer {i}")))).collect();
    let llm = Arc::new(ScriptedLlmClient::new(replies));
    let executor = Arc::new(SequenceExecutor::new(vec![Ok(vec![])]));
    let assistant = Arc::new(build(llm, executor, OrchestratorConfig::default()));

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(assistant.create_session().await);
    }
    let mut unique = ids.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 4);

    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let assistant = assistant.clone();
            tokio::spawn(async move { assistant.run_turn(&id, "hello").await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for id in &ids {
        let history = assistant.get_history(id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hello");
    }
}

#[tokio::test]
async fn content_filter_and_rate_limit_append_nothing() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![
        Ok(aquifer::llm::RawCompletion {
            finish_reason: Some(aquifer::llm::FinishReason::ContentFilter),
            ..Default::default()
        }),
        Err(TransportFault::Status {
            code: 429,
            message: "Too Many Requests".into(),
        }),
    ]));
    let executor = Arc::new(SequenceExecutor::new(vec![Ok(vec![])]));
    let assistant = build(llm, executor, OrchestratorConfig::default());
    let id = assistant.create_session().await;

    let filtered = assistant.run_turn(&id, "something unsafe").await.unwrap();
    assert_eq!(filtered.error.unwrap().kind, "content_filtered");
    assert!(filtered.query.is_none());

    let limited = assistant.run_turn(&id, "again").await.unwrap();
    assert_eq!(limited.error.unwrap().kind, "rate_limited");

    assert!(assistant.get_history(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn turn_deadline_leaves_history_untouched() {
    let config = OrchestratorConfig {
        turn_deadline: Duration::from_millis(50),
        ..OrchestratorConfig::default()
    };
    let executor = Arc::new(SequenceExecutor::new(vec![Ok(vec![])]));
    let assistant = build(Arc::new(SlowLlm(Duration::from_secs(5))), executor, config);
    let id = assistant.create_session().await;

    let response = assistant.run_turn(&id, "slow question").await.unwrap();
    assert_eq!(response.error.unwrap().kind, "timeout");
    assert!(assistant.get_history(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn undeclared_tool_is_malformed() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(tool_call_completion(
        "call_1",
        "delete_everything",
        json!({"query": "SELECT 1"}),
    ))]));
    let executor = Arc::new(SequenceExecutor::new(vec![Ok(vec![])]));
    let assistant = build(llm, executor.clone(), OrchestratorConfig::default());
    let id = assistant.create_session().await;

    let response = assistant.run_turn(&id, "hi").await.unwrap();
    assert_eq!(response.error.unwrap().kind, "malformed_model_response");
    assert_eq!(executor.calls(), 0);
    assert!(assistant.get_history(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_session_is_a_contract_error() {
    let llm = Arc::new(ScriptedLlmClient::new(vec![]));
    let executor = Arc::new(SequenceExecutor::new(vec![Ok(vec![])]));
    let assistant = build(llm, executor, OrchestratorConfig::default());
    let err = assistant.run_turn("session_unknown", "hi").await.unwrap_err();
    assert!(matches!(err, AssistantError::UnknownSession(_)));
}
