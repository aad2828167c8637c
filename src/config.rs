//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `AQUIFER__*` 覆盖（双下划线表示嵌套，如 `AQUIFER__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::OrchestratorConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub orchestrator: OrchestratorSection,
    pub database: DatabaseSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 开发模式：在面向用户的回复中附带技术细节（查询、原始错误）
    pub dev_mode: bool,
}

/// [llm] 段：后端选择、生成参数与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / mock
    pub provider: String,
    /// 未设置时按后端取默认模型
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub narration_max_output_tokens: u32,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: None,
            base_url: None,
            temperature: 0.1,
            max_output_tokens: 2048,
            narration_max_output_tokens: 1024,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 60 }
    }
}

/// [orchestrator] 段：重试预算、预览行数、整轮期限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_attempts: u32,
    pub preview_rows: usize,
    pub turn_deadline_secs: u64,
    pub max_columns_per_table: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            preview_rows: 5,
            turn_deadline_secs: 90,
            max_columns_per_table: 15,
        }
    }
}

/// [database] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// SQLite 数据库文件
    pub path: PathBuf,
    pub max_rows: usize,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/sdwis_georgia.db"),
            max_rows: 100,
        }
    }
}

impl AppConfig {
    /// 组合 [llm] 生成参数与 [orchestrator] 段
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_attempts: self.orchestrator.max_attempts.max(1),
            preview_rows: self.orchestrator.preview_rows,
            temperature: self.llm.temperature,
            max_output_tokens: self.llm.max_output_tokens,
            narration_max_output_tokens: self.llm.narration_max_output_tokens,
            turn_deadline: Duration::from_secs(self.orchestrator.turn_deadline_secs),
            max_columns_per_table: self.orchestrator.max_columns_per_table,
        }
    }
}

/// 从 config 目录加载配置，环境变量 AQUIFER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 AQUIFER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("AQUIFER")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
