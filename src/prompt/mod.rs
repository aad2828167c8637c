//! 指令编译：根据结构描述生成每次调用推理服务时附带的系统指令
//!
//! 输出对其它模块而言是不透明字符串；措辞是与推理服务之间的行为约定。
//! 纯函数，无共享可变状态，可被多个会话并发调用。

pub mod rules;

use std::collections::BTreeMap;

use serde::Serialize;

use crate::schema::{ForeignKey, SchemaDescription};

pub use rules::{
    hint_for, schema_hint, FailureSignature, RecoveryHint, COLUMN_LOCATION_RULE, JOIN_RULE,
    RECOVERY_HINTS,
};

/// 每张表默认最多写入指令的列数
pub const DEFAULT_MAX_COLUMNS_PER_TABLE: usize = 15;

#[derive(Serialize)]
struct CondensedTable<'a> {
    description: &'a str,
    columns: Vec<String>,
    foreign_keys: &'a [ForeignKey],
}

/// 指令编译器
#[derive(Clone, Debug)]
pub struct PromptCompiler {
    max_attempts: u32,
    max_columns_per_table: usize,
}

impl Default for PromptCompiler {
    fn default() -> Self {
        Self::new(3, DEFAULT_MAX_COLUMNS_PER_TABLE)
    }
}

impl PromptCompiler {
    /// max_attempts 为单轮内允许的查询总次数（首次 + 纠正重试）
    pub fn new(max_attempts: u32, max_columns_per_table: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_columns_per_table,
        }
    }

    pub fn compile(&self, schema: &SchemaDescription) -> String {
        let mut s = String::new();
        s.push_str(rules::PREAMBLE);
        s.push_str("\n\n");
        s.push_str(&self.workflow_section());
        s.push_str("\n\n");
        s.push_str(&error_handling_section());
        s.push_str("\n\n");
        for section in [
            rules::SEARCH_CAPABILITIES,
            rules::SAMPLE_MAPPING,
            rules::RESPONSE_STYLE,
            rules::KEY_TABLES,
            rules::SQL_GUIDELINES,
        ] {
            s.push_str(section);
            s.push_str("\n\n");
        }
        s.push_str("Database Schema: ");
        s.push_str(&self.condense_schema(schema));
        s.push('\n');
        s
    }

    fn workflow_section(&self) -> String {
        let retries = self.max_attempts - 1;
        format!(
            "WORKFLOW:\n\
             1. When users ask about water data, call execute_sql with an appropriate query\n\
             2. If the SQL query fails, you will be told the error message\n\
             3. If there's an error, analyze it and try a corrected query\n\
             4. You can retry up to {retries} times with different approaches\n\
             5. Wait for the tool result and explain the results in friendly, conversational language\n\
             6. Focus on what the data means for drinking water safety"
        )
    }

    /// 结构摘要：每表截断到 max_columns_per_table 列，保证指令长度与库规模无关
    pub fn condense_schema(&self, schema: &SchemaDescription) -> String {
        let condensed: BTreeMap<&str, BTreeMap<&str, CondensedTable<'_>>> = schema
            .iter()
            .map(|(schema_name, tables)| {
                let tables = tables
                    .iter()
                    .map(|(table_name, info)| {
                        let columns = info
                            .columns
                            .iter()
                            .take(self.max_columns_per_table)
                            .map(|c| format!("{} ({})", c.name, c.data_type))
                            .collect();
                        let table = CondensedTable {
                            description: info.description.as_deref().unwrap_or("No description"),
                            columns,
                            foreign_keys: &info.foreign_keys,
                        };
                        (table_name.as_str(), table)
                    })
                    .collect();
                (schema_name.as_str(), tables)
            })
            .collect();
        serde_json::to_string_pretty(&condensed).unwrap_or_else(|_| "{}".to_string())
    }
}

fn error_handling_section() -> String {
    let mut s = String::from("SQL ERROR HANDLING:\n");
    s.push_str(&format!("- {COLUMN_LOCATION_RULE}\n"));
    s.push_str(&format!("- {JOIN_RULE}\n"));
    for hint in RECOVERY_HINTS {
        s.push_str(&format!("- {}\n", hint.rule));
    }
    s.push_str("- Always explain what went wrong and how you fixed it");
    s
}
