//! execute_sql 工具声明：参数 JSON Schema 由 schemars 自动生成

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::llm::types::ToolDeclaration;

/// 声明给推理服务的唯一工具名
pub const SQL_TOOL_NAME: &str = "execute_sql";

const SQL_TOOL_DESCRIPTION: &str = "Execute a SQL query against the Georgia water quality database";

/// execute_sql 的参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunSqlArgs {
    /// The SELECT SQL query to execute (read-only queries only)
    pub query: String,
}

/// 参数 JSON Schema（去掉 $schema / title，只保留 function calling 需要的部分）
pub fn sql_tool_parameters() -> Value {
    let schema = schema_for!(RunSqlArgs);
    let mut value =
        serde_json::to_value(&schema).unwrap_or_else(|_| Value::Object(Default::default()));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

pub fn sql_tool_declaration() -> ToolDeclaration {
    ToolDeclaration {
        name: SQL_TOOL_NAME.to_string(),
        description: SQL_TOOL_DESCRIPTION.to_string(),
        parameters: sql_tool_parameters(),
    }
}
