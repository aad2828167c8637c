//! 只读 SQLite 查询执行器与结构内省
//!
//! - 以只读方式打开数据库，并开启 `query_only`
//! - 含写操作关键字（整词、不区分大小写）的语句直接拒绝
//! - 结果集最多返回 max_rows 行，值转换为 JSON

use std::path::Path;
use std::sync::Mutex;

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Value};

use crate::core::QueryError;
use crate::schema::{ColumnInfo, ForeignKey, SchemaDescription, SchemaProvider, TableInfo};
use crate::tools::executor::{QueryExecutor, Row};

/// 默认结果行数上限
pub const DEFAULT_MAX_ROWS: usize = 100;

/// 禁止出现的写操作关键字
pub const FORBIDDEN_OPERATIONS: &[&str] = &[
    "DELETE", "DROP", "TRUNCATE", "UPDATE", "INSERT", "ALTER", "CREATE",
];

/// SQLite 在内省结果中使用的 schema 名
const SQLITE_SCHEMA: &str = "main";

pub struct SqliteExecutor {
    conn: Mutex<Connection>,
    max_rows: usize,
}

impl SqliteExecutor {
    /// 只读打开数据库文件；文件不存在或无法打开视为后端不可用
    pub fn open(path: impl AsRef<Path>, max_rows: usize) -> Result<Self, QueryError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| {
            QueryError::unavailable(format!("cannot open database {}: {e}", path.display()))
        })?;
        Self::from_connection(conn, max_rows)
    }

    /// 包装已有连接（测试中常用内存库）；连接随即切换为只读
    pub fn from_connection(conn: Connection, max_rows: usize) -> Result<Self, QueryError> {
        conn.pragma_update(None, "query_only", true)
            .map_err(|e| QueryError::unavailable(format!("cannot enable query_only: {e}")))?;
        tracing::info!(max_rows, "sqlite executor ready");
        Ok(Self {
            conn: Mutex::new(conn),
            max_rows,
        })
    }

    /// 连接可用性检查：读取 sqlite_master，文件不是有效数据库时失败
    pub fn health_check(&self) -> bool {
        match self.execute("SELECT count(*) FROM sqlite_master") {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, "database health check failed");
                false
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, QueryError> {
        self.conn
            .lock()
            .map_err(|_| QueryError::unavailable("database connection lock poisoned"))
    }
}

/// 检查写操作关键字；返回第一个命中的关键字
pub fn forbidden_operation(query: &str) -> Option<&'static str> {
    query
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .find_map(|word| {
            FORBIDDEN_OPERATIONS
                .iter()
                .copied()
                .find(|op| word.eq_ignore_ascii_case(op))
        })
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<{} bytes>", bytes.len())),
    }
}

fn execution_error(e: rusqlite::Error) -> QueryError {
    QueryError::execution(format!("Error executing query: {e}"))
}

impl QueryExecutor for SqliteExecutor {
    fn execute(&self, query: &str) -> Result<Vec<Row>, QueryError> {
        if let Some(op) = forbidden_operation(query) {
            tracing::error!(operation = op, "forbidden operation detected");
            return Err(QueryError::rejected(format!("{op} queries are not allowed.")));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(query).map_err(execution_error)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query([]).map_err(execution_error)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(execution_error)? {
            if out.len() >= self.max_rows {
                tracing::warn!(max_rows = self.max_rows, "result truncated");
                break;
            }
            let mut record = Row::new();
            for (i, name) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(execution_error)?;
                record.insert(name.clone(), to_json(value));
            }
            out.push(record);
        }
        tracing::info!(rows = out.len(), "query executed successfully");
        Ok(out)
    }
}

impl SchemaProvider for SqliteExecutor {
    fn describe_schema(&self) -> Result<SchemaDescription, QueryError> {
        let conn = self.lock()?;
        let err = |e: rusqlite::Error| QueryError::execution(format!("Error getting schema: {e}"));

        let mut table_stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
                 ORDER BY name",
            )
            .map_err(err)?;
        let table_names = table_stmt
            .query_map([], |r| r.get::<_, String>(0))
            .map_err(err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(err)?;

        let mut column_stmt = conn
            .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(err)?;
        let mut fk_stmt = conn
            .prepare("SELECT \"from\", \"table\", \"to\" FROM pragma_foreign_key_list(?1)")
            .map_err(err)?;

        let mut tables = std::collections::BTreeMap::new();
        for name in table_names {
            let columns = column_stmt
                .query_map([&name], |r| {
                    Ok(ColumnInfo::new(
                        r.get::<_, String>(0)?,
                        r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    ))
                })
                .map_err(err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(err)?;
            let foreign_keys = fk_stmt
                .query_map([&name], |r| {
                    Ok(ForeignKey {
                        column: r.get(0)?,
                        foreign_table: r.get(1)?,
                        foreign_column: r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    })
                })
                .map_err(err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(err)?;
            tables.insert(
                name,
                TableInfo {
                    columns,
                    foreign_keys,
                    description: None,
                },
            );
        }

        tracing::info!(tables = tables.len(), "schema built");
        let mut schema = SchemaDescription::new();
        schema.insert(SQLITE_SCHEMA.to_string(), tables);
        Ok(schema)
    }
}
