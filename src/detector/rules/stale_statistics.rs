//! STALE_STATISTICS (§4.4): a scan node whose estimated rows differs
//! from actual rows by 10x or more, when the plan was captured with
//! `analyze=true` so actual rows are available at all.

use std::collections::HashMap;

use crate::detector::{detected_at, DetectorContext, IssueRule};
use crate::models::{DetectedIssue, IssueType, MetricValue, Severity};
use crate::plan::OperatorKind;

const CARDINALITY_RATIO_THRESHOLD: f64 = 10.0;

pub struct StaleStatisticsRule;

impl IssueRule for StaleStatisticsRule {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();

        for node in ctx.plan.iter() {
            if !matches!(
                node.op_type,
                OperatorKind::SeqScan | OperatorKind::IndexScan | OperatorKind::IndexOnlyScan | OperatorKind::BitmapScan
            ) {
                continue;
            }
            let Some(table) = &node.relation else { continue };
            let (Some(estimated), Some(actual)) = (node.rows.estimated, node.rows.actual) else { continue };
            if estimated <= 0.0 || actual <= 0.0 {
                continue;
            }

            let ratio = (actual / estimated).max(estimated / actual);
            if ratio < CARDINALITY_RATIO_THRESHOLD {
                continue;
            }

            let mut metrics = HashMap::new();
            metrics.insert("estimated_rows".to_string(), MetricValue::Number(estimated));
            metrics.insert("actual_rows".to_string(), MetricValue::Number(actual));
            metrics.insert("ratio".to_string(), MetricValue::Number(ratio));

            issues.push(DetectedIssue {
                issue_type: IssueType::StaleStatistics,
                severity: if ratio > 100.0 { Severity::High } else { Severity::Medium },
                title: format!("stale statistics on {table}"),
                description: format!(
                    "the planner estimated {estimated:.0} rows from {table} but the scan actually produced \
                     {actual:.0} — a {ratio:.0}x miss consistent with stale table statistics"
                ),
                affected_objects: vec![table.clone()],
                recommendations: vec![format!("run ANALYZE on {table} to refresh its statistics")],
                metrics,
                detected_at: detected_at(),
            });
        }

        issues
    }
}
