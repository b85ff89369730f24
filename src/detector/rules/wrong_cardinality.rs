//! WRONG_CARDINALITY (§4.4): the same estimate/actual mismatch check as
//! STALE_STATISTICS, but over joins and aggregations — where it can fire
//! even with fresh statistics, because the miss comes from correlated
//! columns or skew rather than an out-of-date histogram.

use std::collections::HashMap;

use crate::detector::{detected_at, DetectorContext, IssueRule};
use crate::models::{DetectedIssue, IssueType, MetricValue, Severity};
use crate::plan::OperatorKind;

const CARDINALITY_RATIO_THRESHOLD: f64 = 10.0;

pub struct WrongCardinalityRule;

impl IssueRule for WrongCardinalityRule {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();

        for (path, node) in node_paths(ctx.plan) {
            if !matches!(
                node.op_type,
                OperatorKind::NestedLoop
                    | OperatorKind::HashJoin
                    | OperatorKind::MergeJoin
                    | OperatorKind::Aggregate
            ) {
                continue;
            }
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
                issue_type: IssueType::WrongCardinality,
                severity: if ratio > 100.0 { Severity::High } else { Severity::Medium },
                title: format!("cardinality misestimate at {path}"),
                description: format!(
                    "{path} estimated {estimated:.0} rows but produced {actual:.0} — a {ratio:.0}x miss that \
                     can mislead the planner's choice of join strategy even with fresh statistics"
                ),
                affected_objects: vec![path],
                recommendations: vec![
                    "check for correlated predicates the planner can't model, or increase statistics \
                     target on the join columns"
                        .to_string(),
                ],
                metrics,
                detected_at: detected_at(),
            });
        }

        issues
    }
}

fn node_paths(root: &crate::plan::PlanNode) -> Vec<(String, &crate::plan::PlanNode)> {
    fn walk<'a>(node: &'a crate::plan::PlanNode, path: String, out: &mut Vec<(String, &'a crate::plan::PlanNode)>) {
        out.push((path.clone(), node));
        for (i, child) in node.children.iter().enumerate() {
            walk(child, format!("{path}/{i}"), out);
        }
    }
    let mut out = Vec::new();
    walk(root, "root".to_string(), &mut out);
    out
}
