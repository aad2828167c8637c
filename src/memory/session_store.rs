//! 会话存储：session id -> 有序 Turn 序列
//!
//! 外层 RwLock 只保护 id 映射，每个会话自带一把 Mutex：同一会话的操作串行，
//! 不同会话之间互不争用。编排器通过 `begin` 在整轮期间持有会话锁，结束时一次性提交。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::core::AssistantError;
use crate::memory::{Role, Turn};

/// 会话 ID（不透明字符串）
pub type SessionId = String;

type Transcript = Arc<Mutex<Vec<Turn>>>;

/// 内存会话存储（进程退出即丢失）
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Transcript>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分配一个新的空会话
    pub async fn create(&self) -> SessionId {
        let mut sessions = self.sessions.write().await;
        loop {
            let id = format!("session_{}", uuid::Uuid::new_v4());
            if !sessions.contains_key(&id) {
                sessions.insert(id.clone(), Arc::new(Mutex::new(Vec::new())));
                tracing::debug!(session = %id, "session created");
                return id;
            }
        }
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    async fn transcript(&self, id: &str) -> Result<Transcript, AssistantError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AssistantError::UnknownSession(id.to_string()))
    }

    /// 在末尾追加一条 Turn
    pub async fn append(
        &self,
        id: &str,
        role: Role,
        content: impl Into<String>,
    ) -> Result<(), AssistantError> {
        let transcript = self.transcript(id).await?;
        transcript.lock().await.push(Turn::new(role, content));
        Ok(())
    }

    /// 按写入顺序返回全部 Turn（副本）
    pub async fn read(&self, id: &str) -> Result<Vec<Turn>, AssistantError> {
        let transcript = self.transcript(id).await?;
        let turns = transcript.lock().await.clone();
        Ok(turns)
    }

    /// 清空会话内容，id 保持有效
    pub async fn clear(&self, id: &str) -> Result<(), AssistantError> {
        let transcript = self.transcript(id).await?;
        transcript.lock().await.clear();
        tracing::debug!(session = %id, "session cleared");
        Ok(())
    }

    /// 独占一个会话直到事务结束：期间同一会话的其它操作会等待
    pub async fn begin(&self, id: &str) -> Result<SessionTxn, AssistantError> {
        let transcript = self.transcript(id).await?;
        let guard = transcript.lock_owned().await;
        Ok(SessionTxn {
            id: id.to_string(),
            guard,
        })
    }
}

/// 单个会话上的独占事务；未 commit 即 drop 时不写入任何内容
pub struct SessionTxn {
    id: SessionId,
    guard: OwnedMutexGuard<Vec<Turn>>,
}

impl SessionTxn {
    /// 当前已提交的历史
    pub fn turns(&self) -> &[Turn] {
        &self.guard
    }

    /// 一次性追加本轮产生的全部 Turn
    pub fn commit(mut self, turns: Vec<Turn>) {
        tracing::debug!(session = %self.id, appended = turns.len(), "turn committed");
        self.guard.extend(turns);
    }
}
