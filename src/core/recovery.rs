//! 查询错误恢复
//!
//! 识别执行器错误的已知特征，生成回传给推理服务的 function-result 载荷：
//! 原始错误 + 通用结构提示 + 与指令中同一份措辞的纠错规则。

use regex::Regex;
use serde_json::{json, Value};

use crate::core::error::{QueryError, QueryErrorKind};
use crate::prompt::{hint_for, schema_hint, FailureSignature};

/// 按顺序匹配，先命中者生效
const SIGNATURE_PATTERNS: &[(FailureSignature, &str)] = &[
    (
        FailureSignature::UnknownColumn,
        r"(?i)\bcolumn\b.*\bdoes not exist|no such column|unknown column|has no column",
    ),
    (
        FailureSignature::UnknownTable,
        r"(?i)\b(relation|table)\b.*\bdoes not exist|no such table|unknown table",
    ),
    (
        FailureSignature::AmbiguousReference,
        r"(?i)ambiguous|missing from-clause entry|\bjoin\b",
    ),
    (
        FailureSignature::Syntax,
        r"(?i)syntax error|incomplete input|unrecognized token",
    ),
];

/// 查询错误诊断与反馈构造
#[derive(Debug)]
pub struct RecoveryEngine {
    patterns: Vec<(FailureSignature, Regex)>,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryEngine {
    pub fn new() -> Self {
        let patterns = SIGNATURE_PATTERNS
            .iter()
            .filter_map(|(sig, pattern)| Regex::new(pattern).ok().map(|re| (*sig, re)))
            .collect();
        Self { patterns }
    }

    /// 识别错误特征；执行器拒绝的语句一律视为 RejectedOperation
    pub fn diagnose(&self, error: &QueryError) -> Option<FailureSignature> {
        if error.kind == QueryErrorKind::Rejected {
            return Some(FailureSignature::RejectedOperation);
        }
        self.patterns
            .iter()
            .find(|(_, re)| re.is_match(&error.message))
            .map(|(sig, _)| *sig)
    }

    /// 回传给推理服务的 function-result 载荷
    ///
    /// `{"error": "SQL Error: <msg>[ <remember>]", "hint": "<schema hint>[; <rule>]"}`
    pub fn feedback(&self, error: &QueryError) -> Value {
        let mut message = format!("SQL Error: {}", error.message);
        let mut hint = schema_hint();

        if let Some(recovery) = self.diagnose(error).and_then(hint_for) {
            message.push(' ');
            message.push_str(recovery.remember);
            hint.push_str("; ");
            hint.push_str(recovery.rule);
        }

        json!({ "error": message, "hint": hint })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::COLUMN_LOCATION_RULE;

    #[test]
    fn test_diagnose_known_signatures() {
        let engine = RecoveryEngine::new();
        let cases = [
            ("column city_served does not exist", FailureSignature::UnknownColumn),
            ("no such column: city_served", FailureSignature::UnknownColumn),
            ("relation \"water\" does not exist", FailureSignature::UnknownTable),
            ("no such table: systems", FailureSignature::UnknownTable),
            ("ambiguous column name: pwsid", FailureSignature::AmbiguousReference),
            ("near \"SELEC\": syntax error", FailureSignature::Syntax),
        ];
        for (message, expected) in cases {
            assert_eq!(
                engine.diagnose(&QueryError::execution(message)),
                Some(expected),
                "{message}"
            );
        }
    }

    #[test]
    fn test_rejected_operation() {
        let engine = RecoveryEngine::new();
        let err = QueryError::rejected("DELETE queries are not allowed.");
        assert_eq!(engine.diagnose(&err), Some(FailureSignature::RejectedOperation));
        let payload = engine.feedback(&err);
        assert!(payload["error"]
            .as_str()
            .unwrap()
            .contains("only read-only SELECT queries are allowed"));
    }

    #[test]
    fn test_unknown_column_feedback_carries_rule_verbatim() {
        let engine = RecoveryEngine::new();
        let payload = engine.feedback(&QueryError::execution("column city_served does not exist"));
        let error = payload["error"].as_str().unwrap();
        assert!(error.starts_with("SQL Error: column city_served does not exist Remember:"));
        assert!(payload["hint"].as_str().unwrap().contains(COLUMN_LOCATION_RULE));
    }

    #[test]
    fn test_unrecognised_error_keeps_generic_hint() {
        let engine = RecoveryEngine::new();
        let payload = engine.feedback(&QueryError::execution("disk I/O error"));
        assert_eq!(payload["error"], "SQL Error: disk I/O error");
        assert_eq!(payload["hint"], schema_hint());
    }
}
