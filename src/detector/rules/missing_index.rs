//! MISSING_INDEX (§4.4): a `SEQ_SCAN` over a large estimated table with a
//! filtered column that has no matching single-column or prefix-matching
//! composite index in the schema hints.

use std::collections::HashMap;

use crate::detector::{detected_at, filter_columns, now_metric, DetectorContext, IssueRule};
use crate::models::{DetectedIssue, IssueType, MetricValue, Severity};
use crate::plan::OperatorKind;

const DEFAULT_ROW_THRESHOLD: f64 = 10_000.0;

pub struct MissingIndexRule;

impl IssueRule for MissingIndexRule {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();

        for node in ctx.plan.iter() {
            if node.op_type != OperatorKind::SeqScan {
                continue;
            }
            let Some(table) = &node.relation else { continue };
            let estimated_rows = node.rows.estimated.unwrap_or(0.0);
            if estimated_rows <= DEFAULT_ROW_THRESHOLD {
                continue;
            }

            let columns = filter_columns(node);
            if columns.is_empty() {
                continue;
            }

            let unindexed: Vec<String> =
                columns.iter().filter(|c| !ctx.schema_hints.has_matching_index(table, c)).cloned().collect();
            if unindexed.is_empty() {
                continue;
            }

            let mut affected_objects = vec![table.clone()];
            affected_objects.extend(unindexed.iter().cloned());

            let severity = if estimated_rows > DEFAULT_ROW_THRESHOLD * 10.0 { Severity::Critical } else { Severity::High };

            let mut metrics = HashMap::new();
            metrics.insert("estimated_rows".to_string(), MetricValue::Number(estimated_rows));
            let (k, v) = now_metric("row_threshold", DEFAULT_ROW_THRESHOLD);
            metrics.insert(k, v);

            issues.push(DetectedIssue {
                issue_type: IssueType::MissingIndex,
                severity,
                title: format!("missing index on {table}({})", unindexed.join(", ")),
                description: format!(
                    "sequential scan over an estimated {estimated_rows:.0} rows of {table} filters on \
                     {} with no supporting index",
                    unindexed.join(", ")
                ),
                affected_objects,
                recommendations: unindexed
                    .iter()
                    .map(|c| format!("CREATE INDEX ON {table}({c})"))
                    .collect(),
                metrics,
                detected_at: detected_at(),
            });
        }

        issues
    }
}
