//! 推理服务客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：给定指令、对话与可选工具声明，
//! 返回未分类的原始结果，由 core::classifier 统一归类。

use async_trait::async_trait;

use crate::llm::types::{ModelRequest, RawOutcome};

/// 推理服务客户端
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, request: &ModelRequest) -> RawOutcome;

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
