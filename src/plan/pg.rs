//! Maps PostgreSQL's `EXPLAIN (FORMAT JSON)` tree into the canonical shape.

use serde_json::Value;

use super::{OperatorKind, PlanNode};

pub fn map_pg_plan(json: &Value) -> PlanNode {
    let root = json
        .get(0)
        .and_then(|v| v.get("Plan"))
        .or_else(|| json.get("Plan"))
        .unwrap_or(json);
    map_node(root)
}

fn map_node(node: &Value) -> PlanNode {
    let node_type = node.get("Node Type").and_then(Value::as_str).unwrap_or("");
    let mut plan = PlanNode::new(classify(node_type));

    plan.relation = node
        .get("Relation Name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| node.get("Index Name").and_then(Value::as_str).map(str::to_string));

    plan.cost.estimated = node.get("Total Cost").and_then(Value::as_f64);
    plan.cost.actual = node.get("Actual Total Time").and_then(Value::as_f64);
    plan.rows.estimated = node.get("Plan Rows").and_then(Value::as_f64);
    plan.rows.actual = node.get("Actual Rows").and_then(Value::as_f64);
    plan.width = node.get("Plan Width").and_then(Value::as_i64);

    for key in ["Index Name", "Join Type", "Hash Cond", "Filter", "Index Cond"] {
        if let Some(v) = node.get(key) {
            plan.extra.insert(key.to_string(), v.clone());
        }
    }

    if let Some(children) = node.get("Plans").and_then(Value::as_array) {
        plan.children = children.iter().map(map_node).collect();
    }

    plan
}

fn classify(node_type: &str) -> OperatorKind {
    match node_type {
        "Seq Scan" => OperatorKind::SeqScan,
        "Index Scan" => OperatorKind::IndexScan,
        "Index Only Scan" => OperatorKind::IndexOnlyScan,
        "Bitmap Heap Scan" | "Bitmap Index Scan" => OperatorKind::BitmapScan,
        "Nested Loop" => OperatorKind::NestedLoop,
        "Hash Join" => OperatorKind::HashJoin,
        "Merge Join" => OperatorKind::MergeJoin,
        "Aggregate" | "HashAggregate" | "GroupAggregate" => OperatorKind::Aggregate,
        "Sort" => OperatorKind::Sort,
        "Limit" => OperatorKind::Limit,
        "Gather" | "Gather Merge" => OperatorKind::Gather,
        "CTE Scan" => OperatorKind::Cte,
        "Materialize" => OperatorKind::Materialize,
        "Hash" => OperatorKind::Hash,
        "Filter" => OperatorKind::Filter,
        _ => OperatorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_seq_scan_with_children() {
        let json = serde_json::json!([{
            "Plan": {
                "Node Type": "Hash Join",
                "Total Cost": 100.0,
                "Plans": [
                    { "Node Type": "Seq Scan", "Relation Name": "users", "Plan Rows": 50000, "Actual Rows": 49000 },
                    { "Node Type": "Hash", "Plans": [] }
                ]
            }
        }]);

        let plan = map_pg_plan(&json);
        assert_eq!(plan.op_type, OperatorKind::HashJoin);
        assert_eq!(plan.children.len(), 2);
        assert_eq!(plan.children[0].op_type, OperatorKind::SeqScan);
        assert_eq!(plan.children[0].relation.as_deref(), Some("users"));
    }
}
