//! INEFFICIENT_INDEX (§4.4): an index scan whose predicate selectivity
//! exceeds 0.2, or a composite index whose leading column isn't
//! constrained by the query's filter.

use std::collections::HashMap;

use crate::detector::{detected_at, filter_columns, DetectorContext, IssueRule};
use crate::models::{DetectedIssue, IssueType, MetricValue, Severity};
use crate::plan::OperatorKind;

const SELECTIVITY_THRESHOLD: f64 = 0.2;

pub struct InefficientIndexRule;

impl IssueRule for InefficientIndexRule {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();

        for node in ctx.plan.iter() {
            if node.op_type != OperatorKind::IndexScan {
                continue;
            }
            let Some(table) = &node.relation else { continue };
            let index_name = node.extra.get("Index Name").and_then(|v| v.as_str()).unwrap_or("unknown_index");

            let rows_returned = node.rows.actual.or(node.rows.estimated);
            let table_rows = ctx.schema_hints.row_count(table).map(|n| n as f64);

            if let (Some(returned), Some(total)) = (rows_returned, table_rows) {
                if total > 0.0 {
                    let selectivity = returned / total;
                    if selectivity > SELECTIVITY_THRESHOLD {
                        let mut metrics = HashMap::new();
                        metrics.insert("selectivity".to_string(), MetricValue::Number(selectivity));
                        issues.push(DetectedIssue {
                            issue_type: IssueType::InefficientIndex,
                            severity: if selectivity > 0.5 { Severity::High } else { Severity::Medium },
                            title: format!("low-selectivity index scan on {table}.{index_name}"),
                            description: format!(
                                "index {index_name} on {table} returns {selectivity:.0%} of the table's rows; \
                                 a sequential scan may be cheaper"
                            ),
                            affected_objects: vec![table.clone(), index_name.to_string()],
                            recommendations: vec![format!(
                                "review whether {index_name} still narrows the result set for this query shape"
                            )],
                            metrics,
                            detected_at: detected_at(),
                        });
                        continue;
                    }
                }
            }

            let filtered = filter_columns(node);
            if let Some(leading) = ctx
                .schema_hints
                .indexes
                .get(table)
                .and_then(|idxs| idxs.iter().find(|cols| cols.len() > 1))
                .and_then(|cols| cols.first())
            {
                if !filtered.iter().any(|c| c == leading) {
                    issues.push(DetectedIssue {
                        issue_type: IssueType::InefficientIndex,
                        severity: Severity::Medium,
                        title: format!("composite index on {table} unused by leading column"),
                        description: format!(
                            "{table}.{index_name}'s leading column {leading} is not constrained by this query, \
                             so the composite index cannot be used efficiently"
                        ),
                        affected_objects: vec![table.clone(), index_name.to_string()],
                        recommendations: vec![format!(
                            "add a predicate on {leading}, or create a supporting index that leads with \
                             a constrained column"
                        )],
                        metrics: HashMap::new(),
                        detected_at: detected_at(),
                    });
                }
            }
        }

        issues
    }
}
