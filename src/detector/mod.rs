//! Plan Normalizer & Issue Detector (C4) — §4.4.
//!
//! One file per issue type, mirroring the teacher's rule-per-operator
//! layout (`profile_analyzer::analyzer::rules`). Every rule is a pure
//! function over `(plan, normalized_sql, engine, schema hints)`; none
//! perform I/O, matching the teacher's `DiagnosticRule` contract.

mod rules;

use std::collections::HashMap;

use chrono::Utc;

use crate::config::DetectorConfig;
use crate::models::{DetectionResult, Engine, PerformanceMetrics};
use crate::plan::PlanNode;

/// What the detector knows about the target schema beyond the plan
/// itself: which columns are indexed, and how large each table is.
/// Populated by the orchestrator from `EngineGateway::list_indexes` and
/// the engine's catalog, never queried by a detector rule directly.
#[derive(Debug, Clone, Default)]
pub struct SchemaHints {
    /// table -> one entry per index, each a list of columns in order.
    pub indexes: HashMap<String, Vec<Vec<String>>>,
    pub table_row_counts: HashMap<String, u64>,
}

impl SchemaHints {
    pub fn has_matching_index(&self, table: &str, column: &str) -> bool {
        self.indexes
            .get(table)
            .map(|idxs| idxs.iter().any(|cols| cols.first().is_some_and(|c| c == column)))
            .unwrap_or(false)
    }

    pub fn row_count(&self, table: &str) -> Option<u64> {
        self.table_row_counts.get(table).copied()
    }
}

/// One observed execution of a query with the same fingerprint, used by
/// the ORM_GENERATED (N+1) and HIGH_IO_WORKLOAD rules. The orchestrator
/// assembles this from the connection's recent `top_queries` samples;
/// it is never fetched by a rule.
#[derive(Debug, Clone)]
pub struct WorkloadObservation {
    pub fingerprint: String,
    pub metrics: PerformanceMetrics,
}

/// Everything a detector rule needs, gathered once per optimization
/// request by the orchestrator (§4.5 step 3).
pub struct DetectorContext<'a> {
    pub plan: &'a PlanNode,
    pub normalized_sql: &'a str,
    pub engine: Engine,
    pub schema_hints: &'a SchemaHints,
    pub config: &'a DetectorConfig,
    pub recent_observations: &'a [WorkloadObservation],
}

/// A single detectable-problem rule. Implementations must not suspend or
/// perform I/O — everything they need is already in `DetectorContext`.
pub trait IssueRule: Send + Sync {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<crate::models::DetectedIssue>;
}

fn get_all_rules() -> Vec<Box<dyn IssueRule>> {
    vec![
        Box::new(rules::missing_index::MissingIndexRule),
        Box::new(rules::inefficient_index::InefficientIndexRule),
        Box::new(rules::poor_join_strategy::PoorJoinStrategyRule),
        Box::new(rules::full_table_scan::FullTableScanRule),
        Box::new(rules::suboptimal_pattern::SuboptimalPatternRule),
        Box::new(rules::stale_statistics::StaleStatisticsRule),
        Box::new(rules::wrong_cardinality::WrongCardinalityRule),
        Box::new(rules::orm_generated::OrmGeneratedRule),
        Box::new(rules::high_io_workload::HighIoWorkloadRule),
        Box::new(rules::inefficient_reporting::InefficientReportingRule),
    ]
}

/// Runs every rule over `ctx` and folds the findings into a
/// `DetectionResult` with the stable ordering §4.4 requires.
pub fn detect(ctx: &DetectorContext) -> DetectionResult {
    let mut issues = Vec::new();
    for rule in get_all_rules() {
        issues.extend(rule.evaluate(ctx));
    }
    DetectionResult::from_issues(issues)
}

/// Shared helper: walks `node.extra`'s `Filter`/`Index Cond`/`filtered`
/// engine-specific text and pulls out identifiers that look like bare
/// column references (`col = ?`, `col IN (...)`, ...), skipping the
/// relation name itself and SQL keywords.
pub(crate) fn filter_columns(node: &PlanNode) -> Vec<String> {
    use once_cell::sync::Lazy;
    use regex::Regex;

    static COLUMN_REF: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i)\b([a-z_][a-z0-9_]*)\s*(?:=|>|<|>=|<=|<>|!=|like|in)\b").unwrap());

    let mut out = Vec::new();
    for key in ["Filter", "Index Cond", "filtered", "key"] {
        if let Some(value) = node.extra.get(key) {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            for caps in COLUMN_REF.captures_iter(&text) {
                let col = caps[1].to_lowercase();
                if !is_keyword(&col) && !out.contains(&col) {
                    out.push(col);
                }
            }
        }
    }
    out
}

fn is_keyword(word: &str) -> bool {
    matches!(
        word,
        "and" | "or" | "not" | "null" | "true" | "false" | "is" | "like" | "in" | "between"
    )
}

pub(crate) fn now_metric(name: &str, value: f64) -> (String, crate::models::MetricValue) {
    (name.to_string(), crate::models::MetricValue::Number(value))
}

pub(crate) fn detected_at() -> chrono::DateTime<Utc> {
    Utc::now()
}
