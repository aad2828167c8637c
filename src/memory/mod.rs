//! 记忆层：对话轮次与会话存储（纯内存，不跨进程持久化）

pub mod conversation;
pub mod session_store;

pub use conversation::{Role, Turn};
pub use session_store::{SessionId, SessionStore, SessionTxn};
