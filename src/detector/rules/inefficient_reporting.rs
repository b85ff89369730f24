//! INEFFICIENT_REPORTING (§4.4): an aggregation or window-function plan
//! with no `LIMIT` node over a large estimated row count, or three or
//! more window functions in one SELECT — the shape of an unbounded
//! reporting query.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::detector::{detected_at, DetectorContext, IssueRule};
use crate::models::{DetectedIssue, IssueType, MetricValue, Severity};
use crate::plan::OperatorKind;

const UNBOUNDED_ROW_THRESHOLD: f64 = 10_000.0;
const WINDOW_FUNCTION_THRESHOLD: usize = 3;

static WINDOW_FN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(row_number|rank|dense_rank|lag|lead|ntile|sum|avg|count|min|max)\s*\([^()]*\)\s*over\s*\(").unwrap()
});

pub struct InefficientReportingRule;

impl IssueRule for InefficientReportingRule {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();
        let has_limit = ctx.plan.iter().any(|n| n.op_type == OperatorKind::Limit);

        if !has_limit {
            for node in ctx.plan.iter() {
                if !matches!(node.op_type, OperatorKind::Aggregate) {
                    continue;
                }
                let estimated_rows = node.rows.estimated.unwrap_or(0.0);
                if estimated_rows <= UNBOUNDED_ROW_THRESHOLD {
                    continue;
                }

                let mut metrics = HashMap::new();
                metrics.insert("estimated_rows".to_string(), MetricValue::Number(estimated_rows));
                issues.push(DetectedIssue {
                    issue_type: IssueType::InefficientReporting,
                    severity: Severity::Medium,
                    title: "unbounded aggregation over a large result set".to_string(),
                    description: format!(
                        "this aggregation produces an estimated {estimated_rows:.0} rows with no LIMIT, a \
                         shape typical of a reporting query that should page its output"
                    ),
                    affected_objects: vec!["query".to_string()],
                    recommendations: vec![
                        "add a LIMIT/pagination clause, or pre-aggregate into a summary table".to_string(),
                    ],
                    metrics,
                    detected_at: detected_at(),
                });
                break;
            }
        }

        let window_count = WINDOW_FN.find_iter(ctx.normalized_sql).count();
        if window_count >= WINDOW_FUNCTION_THRESHOLD {
            let mut metrics = HashMap::new();
            metrics.insert("window_function_count".to_string(), MetricValue::Number(window_count as f64));
            issues.push(DetectedIssue {
                issue_type: IssueType::InefficientReporting,
                severity: Severity::Low,
                title: format!("{window_count} window functions in one SELECT"),
                description: "several window functions over the same result set each re-materialize the \
                              partition; this can often be consolidated"
                    .to_string(),
                affected_objects: vec!["query".to_string()],
                recommendations: vec![
                    "share a single window definition (WINDOW clause) across functions where the \
                     partition/order match"
                        .to_string(),
                ],
                metrics,
                detected_at: detected_at(),
            });
        }

        issues
    }
}
