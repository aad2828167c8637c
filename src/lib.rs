//! Aquifer - Georgia 饮用水数据问答助手
//!
//! 用户用自然语言提问，推理服务决定是否调用 execute_sql，回答始终以真实查询结果为依据。
//!
//! 模块划分：
//! - **agent**: 调用方 API（Assistant、ChatResponse）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、响应分类、单轮状态机、查询错误恢复、编排器
//! - **llm**: 推理服务抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **memory**: 对话轮次与会话存储
//! - **observability**: 日志初始化
//! - **prompt**: 系统指令编译与纠错规则
//! - **schema**: 数据库结构描述与缓存
//! - **tools**: execute_sql 声明、查询执行接口与只读 SQLite 实现

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod prompt;
pub mod schema;
pub mod tools;

pub use agent::{Assistant, ChatResponse, ErrorInfo};
