//! POOR_JOIN_STRATEGY (§4.4): a nested loop whose two sides' estimated
//! row counts multiply past a threshold, or a hash join whose build side
//! looks too large for a reasonable work-memory budget.

use std::collections::HashMap;

use crate::detector::{detected_at, DetectorContext, IssueRule};
use crate::models::{DetectedIssue, IssueType, MetricValue, Severity};
use crate::plan::{OperatorKind, PlanNode};

const NESTED_LOOP_PRODUCT_THRESHOLD: f64 = 10_000_000.0;
const HASH_BUILD_ROW_THRESHOLD: f64 = 1_000_000.0;

pub struct PoorJoinStrategyRule;

impl IssueRule for PoorJoinStrategyRule {
    fn evaluate(&self, ctx: &DetectorContext) -> Vec<DetectedIssue> {
        let mut issues = Vec::new();

        for node in ctx.plan.iter() {
            match node.op_type {
                OperatorKind::NestedLoop if node.children.len() == 2 => {
                    let outer = node.children[0].rows.estimated.unwrap_or(0.0);
                    let inner = node.children[1].rows.estimated.unwrap_or(0.0);
                    let product = outer * inner;
                    if product > NESTED_LOOP_PRODUCT_THRESHOLD {
                        let tables = join_tables(node);
                        let mut metrics = HashMap::new();
                        metrics.insert("outer_rows".to_string(), MetricValue::Number(outer));
                        metrics.insert("inner_rows".to_string(), MetricValue::Number(inner));
                        issues.push(DetectedIssue {
                            issue_type: IssueType::PoorJoinStrategy,
                            severity: Severity::High,
                            title: format!("nested loop over {} rows combined", product as u64),
                            description: format!(
                                "nested loop join multiplies an estimated {outer:.0} outer rows by {inner:.0} \
                                 inner rows; a hash or merge join is likely cheaper"
                            ),
                            affected_objects: tables,
                            recommendations: vec![
                                "ensure the inner side has a supporting index, or let the planner pick a \
                                 hash/merge join by refreshing statistics"
                                    .to_string(),
                            ],
                            metrics,
                            detected_at: detected_at(),
                        });
                    }
                },
                OperatorKind::HashJoin if !node.children.is_empty() => {
                    let build_rows =
                        node.children.iter().map(|c| c.rows.estimated.unwrap_or(0.0)).fold(0.0, f64::max);
                    if build_rows > HASH_BUILD_ROW_THRESHOLD {
                        let tables = join_tables(node);
                        let mut metrics = HashMap::new();
                        metrics.insert("build_rows".to_string(), MetricValue::Number(build_rows));
                        issues.push(DetectedIssue {
                            issue_type: IssueType::PoorJoinStrategy,
                            severity: Severity::Medium,
                            title: "hash join build side exceeds work-memory heuristic".to_string(),
                            description: format!(
                                "hash join's build side is estimated at {build_rows:.0} rows, likely spilling \
                                 to disk under typical work-memory settings"
                            ),
                            affected_objects: tables,
                            recommendations: vec![
                                "filter the build side earlier, or raise the engine's per-query work-memory \
                                 budget"
                                    .to_string(),
                            ],
                            metrics,
                            detected_at: detected_at(),
                        });
                    }
                },
                _ => {},
            }
        }

        issues
    }
}

fn join_tables(node: &PlanNode) -> Vec<String> {
    node.iter().filter_map(|n| n.relation.clone()).collect()
}
