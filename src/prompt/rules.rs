//! 固定行为规则：工作流、SQL 纠错提示、领域术语到列的映射
//!
//! RECOVERY_HINTS 同时用于指令文本与查询失败后的反馈，二者引用同一份字符串。

/// 同名相近列的归属（指令与错误反馈逐字引用）
pub const COLUMN_LOCATION_RULE: &str =
    "city_name is in sdwa_pub_water_systems, city_served is in sdwa_geographic_areas";

/// 外键连接规则
pub const JOIN_RULE: &str = "Always use proper foreign key joins: submissionyearquarter AND pwsid";

/// 每次查询失败都会附带的通用提示
pub fn schema_hint() -> String {
    format!("Check the schema - {COLUMN_LOCATION_RULE}")
}

/// 执行器错误的已知特征
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureSignature {
    UnknownColumn,
    UnknownTable,
    AmbiguousReference,
    Syntax,
    RejectedOperation,
}

/// 一条纠错规则：指令中的说法 + 反馈时追加的提醒
#[derive(Clone, Copy, Debug)]
pub struct RecoveryHint {
    pub signature: FailureSignature,
    pub rule: &'static str,
    pub remember: &'static str,
}

pub const RECOVERY_HINTS: &[RecoveryHint] = &[
    RecoveryHint {
        signature: FailureSignature::UnknownColumn,
        rule: "If you get \"column does not exist\" error, check the schema carefully",
        remember: "Remember: use 'city_name' from sdwa_pub_water_systems or join with sdwa_geographic_areas to use 'city_served'.",
    },
    RecoveryHint {
        signature: FailureSignature::UnknownTable,
        rule: "If you get a table name error, use the correct table names from the schema",
        remember: "Remember: the key tables are sdwa_pub_water_systems, sdwa_violations_enforcement, sdwa_geographic_areas, sdwa_facilities and sdwa_lcr_samples.",
    },
    RecoveryHint {
        signature: FailureSignature::AmbiguousReference,
        rule: "If you get a join error, check foreign key relationships",
        remember: "Remember: join tables using BOTH submissionyearquarter AND pwsid, and qualify shared column names with a table alias.",
    },
    RecoveryHint {
        signature: FailureSignature::Syntax,
        rule: "If you get a syntax error, fix the SQL syntax",
        remember: "Remember: send exactly one SELECT statement without trailing commentary.",
    },
    RecoveryHint {
        signature: FailureSignature::RejectedOperation,
        rule: "If a query is rejected, rewrite it as a read-only SELECT; never modify data",
        remember: "Remember: only read-only SELECT queries are allowed.",
    },
];

pub fn hint_for(signature: FailureSignature) -> Option<&'static RecoveryHint> {
    RECOVERY_HINTS.iter().find(|h| h.signature == signature)
}

pub(crate) const PREAMBLE: &str = "\
You are a helpful assistant for the Georgia Safe Drinking Water Information System (SDWIS).

When users ask about water data, you MUST use the execute_sql tool to get real data.
Never make up or hallucinate information about water systems or violations.";

pub(crate) const SEARCH_CAPABILITIES: &str = "\
ENHANCED SEARCH CAPABILITIES:
- System ID searches: Use exact match on pwsid column
- System name searches: Use ILIKE with wildcards on pws_name
- System type filtering: CWS = Community, TNCWS = Transient Non-Community, NTNCWS = Non-Transient Non-Community
- Source water type: SW = Surface Water, GW = Groundwater, GU = Mixed Sources (check gw_sw_code column)
- Sample/violation searches: Join with sdwa_violations_enforcement table
- Date range searches: Use non_compl_per_begin_date for violation date filtering
- Contaminant filtering: Use contaminant_code (PB90=Lead, CU90=Copper, COL%=Coliform)";

pub(crate) const SAMPLE_MAPPING: &str = "\
SAMPLE AND VIOLATION MAPPING:
- \"Lead & Copper\" searches: contaminant_code IN ('PB90', 'CU90') OR violation_code LIKE 'LCR%'
- \"Bacteria/Coliform\" searches: contaminant_code LIKE '%COL%' OR violation_code LIKE '%TCR%' OR violation_code LIKE '%RTCR%'
- \"Chemical\" searches: violation_category_code IN ('MR', 'MCL')
- \"Radiological\" searches: contaminant_code LIKE 'RA%' OR violation_code LIKE 'RAD%'";

pub(crate) const RESPONSE_STYLE: &str = "\
RESPONSE STYLE:
- Use natural, conversational tone
- Explain technical terms in simple language
- Focus on practical implications for users
- Don't mention SQL or technical details unless asked
- If SQL fails after retries, explain what information you were trying to get
- When showing search results, highlight key safety information";

pub(crate) const KEY_TABLES: &str = "\
Key Tables:
- sdwa_pub_water_systems: Main water system information (has city_name, pwsid, pws_type_code, gw_sw_code)
- sdwa_violations_enforcement: Violations and enforcement actions (has contaminant_code, violation_status)
- sdwa_geographic_areas: Geographic coverage areas (has city_served, county_served)
- sdwa_facilities: Treatment facilities and sources
- sdwa_lcr_samples: Lead and Copper Rule sampling results";

pub(crate) const SQL_GUIDELINES: &str = "\
SQL Guidelines:
- Use proper table joins based on foreign key relationships
- Join tables using BOTH submissionyearquarter AND pwsid
- Filter for active systems (pws_activity_code = 'A') unless specifically asked otherwise
- Consider health-based violations (is_health_based_ind = 'Y') as more serious
- Always include LIMIT clauses to prevent large result sets
- Use ILIKE for case-insensitive text searches";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_signature_has_a_hint() {
        for sig in [
            FailureSignature::UnknownColumn,
            FailureSignature::UnknownTable,
            FailureSignature::AmbiguousReference,
            FailureSignature::Syntax,
            FailureSignature::RejectedOperation,
        ] {
            assert!(hint_for(sig).is_some(), "missing hint for {sig:?}");
        }
    }

    #[test]
    fn test_schema_hint_carries_column_rule() {
        assert!(schema_hint().ends_with(COLUMN_LOCATION_RULE));
    }
}
