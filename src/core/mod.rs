//! 核心编排层：错误分类、响应分类、状态机、查询错误恢复、主控循环

pub mod classifier;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod state;

pub use classifier::{classify, Classified, ModelReply};
pub use error::{AssistantError, FaultSide, QueryError, QueryErrorKind};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, DEFAULT_MAX_ATTEMPTS, DEFAULT_PREVIEW_ROWS,
};
pub use recovery::RecoveryEngine;
pub use state::{
    exhaustion_message, narration_fallback, transition, Effect, RowSet, TurnEvent, TurnOutcome,
    TurnState,
};
