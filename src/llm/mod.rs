//! LLM 层：推理服务抽象与实现（OpenAI 兼容 / DeepSeek / Mock）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;

pub use deepseek::{create_deepseek_client, DEEPSEEK_BASE_URL, DEEPSEEK_CHAT};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::LlmClient;
pub use types::{
    FinishReason, ModelMessage, ModelRequest, RawCompletion, RawOutcome, ToolDeclaration,
    ToolInvocation, TransportFault,
};

/// provider = "openai" 且未指定 model 时使用的模型
pub const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";

/// 根据配置与环境变量选择推理服务后端（DeepSeek / OpenAI 兼容 / Mock）
///
/// provider = "mock" 或未设置任何 API Key 时退回 MockLlmClient。
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = Duration::from_secs(cfg.llm.timeouts.request);
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();

    match provider.as_str() {
        "mock" => {
            tracing::info!("Using Mock LLM (configured)");
            Arc::new(MockLlmClient)
        }
        "deepseek" if has_deepseek_key || has_openai_key => {
            let client = create_deepseek_client(cfg.llm.model.as_deref(), timeout);
            tracing::info!("Using DeepSeek LLM ({})", client.model());
            Arc::new(client)
        }
        "openai" if has_openai_key => {
            let model = cfg.llm.model.as_deref().unwrap_or(OPENAI_DEFAULT_MODEL);
            let client = OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            )
            .with_request_timeout(timeout);
            tracing::info!("Using OpenAI LLM ({})", client.model());
            Arc::new(client)
        }
        _ => {
            tracing::warn!(
                provider = %provider,
                "No API key set or provider unknown, using Mock LLM"
            );
            Arc::new(MockLlmClient)
        }
    }
}
