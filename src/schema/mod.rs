//! 数据库结构描述与缓存
//!
//! SchemaProvider 由负责结构内省的外部组件实现；SchemaCache 只取一次并复用，
//! 直到调用方显式 invalidate。

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::core::QueryError;

/// 列：名称与类型
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// 外键：本表列 -> 目标表.列
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub foreign_table: String,
    pub foreign_column: String,
}

/// 单表描述
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub description: Option<String>,
}

/// schema 名 -> (表名 -> 表描述)
pub type SchemaDescription = BTreeMap<String, BTreeMap<String, TableInfo>>;

/// 结构内省接口（同步调用，可能访问数据库）
pub trait SchemaProvider: Send + Sync {
    fn describe_schema(&self) -> Result<SchemaDescription, QueryError>;
}

/// 进程内结构缓存
pub struct SchemaCache {
    provider: Arc<dyn SchemaProvider>,
    cached: RwLock<Option<Arc<SchemaDescription>>>,
}

impl SchemaCache {
    pub fn new(provider: Arc<dyn SchemaProvider>) -> Self {
        Self {
            provider,
            cached: RwLock::new(None),
        }
    }

    /// 已缓存则直接返回，否则在阻塞线程池里调用 provider 并写入缓存
    pub async fn get(&self) -> Result<Arc<SchemaDescription>, QueryError> {
        if let Some(schema) = self.cached.read().await.as_ref() {
            return Ok(schema.clone());
        }

        let mut slot = self.cached.write().await;
        if let Some(schema) = slot.as_ref() {
            return Ok(schema.clone());
        }

        let provider = self.provider.clone();
        let schema = tokio::task::spawn_blocking(move || provider.describe_schema())
            .await
            .map_err(|e| QueryError::unavailable(format!("schema introspection panicked: {e}")))??;
        let tables: usize = schema.values().map(|t| t.len()).sum();
        tracing::info!(schemas = schema.len(), tables, "schema description cached");

        let schema = Arc::new(schema);
        *slot = Some(schema.clone());
        Ok(schema)
    }

    /// 丢弃缓存，下次 get 重新内省
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
        tracing::info!("schema cache invalidated");
    }
}

/// 直接返回固定结构（测试、离线演示用）
#[derive(Clone, Debug, Default)]
pub struct StaticSchema(pub SchemaDescription);

impl SchemaProvider for StaticSchema {
    fn describe_schema(&self) -> Result<SchemaDescription, QueryError> {
        Ok(self.0.clone())
    }
}
