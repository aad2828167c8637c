//! 工具层：execute_sql 声明、查询执行接口与只读 SQLite 实现

pub mod executor;
pub mod schema;
pub mod sqlite;

pub use executor::{QueryExecutor, Row, ToolExecutor};
pub use schema::{sql_tool_declaration, RunSqlArgs, SQL_TOOL_NAME};
pub use sqlite::{forbidden_operation, SqliteExecutor, DEFAULT_MAX_ROWS, FORBIDDEN_OPERATIONS};
