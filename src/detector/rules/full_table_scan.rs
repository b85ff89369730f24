//! FULL_TABLE_SCAN (§4.4): a sequential scan on a table whose estimated
//! rows exceed the engine's configured large-table threshold. Distinct
//! from MISSING_INDEX in that it fires even without an identifiable
//! filter column — it's a blanket size signal, not an indexability one.

use std::collections::HashMap;

use crate::detector::{detected_at, DetectorContext, IssueRule};
use crate::models::{DetectedIssue, IssueType, MetricValue, Severity};
use crate::plan::OperatorKind;

pub struct FullTableScanRule;

impl IssueRule for FullTableScanRule {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<DetectedIssue> {
        let threshold = ctx.config.large_table_rows as f64;
        let mut issues = Vec::new();

        for node in ctx.plan.iter() {
            if node.op_type != OperatorKind::SeqScan {
                continue;
            }
            let Some(table) = &node.relation else { continue };
            let estimated_rows = node.rows.estimated.unwrap_or(0.0);
            if estimated_rows <= threshold {
                continue;
            }

            let mut metrics = HashMap::new();
            metrics.insert("estimated_rows".to_string(), MetricValue::Number(estimated_rows));
            metrics.insert("threshold".to_string(), MetricValue::Number(threshold));

            issues.push(DetectedIssue {
                issue_type: IssueType::FullTableScan,
                severity: if estimated_rows > threshold * 5.0 { Severity::High } else { Severity::Medium },
                title: format!("full table scan of {table}"),
                description: format!(
                    "sequential scan reads an estimated {estimated_rows:.0} rows of {table}, above the \
                     configured large-table threshold of {threshold:.0}"
                ),
                affected_objects: vec![table.clone()],
                recommendations: vec![format!(
                    "narrow the predicate on {table} or add a supporting index so the planner can avoid \
                     scanning the whole table"
                )],
                metrics,
                detected_at: detected_at(),
            });
        }

        issues
    }
}
