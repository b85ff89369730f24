//! Maps Oracle's `DBMS_XPLAN` JSON rendering (as produced by the gateway
//! adapter from `V$SQL_PLAN`) into the canonical shape. MSSQL plans share
//! this mapper: `sys.dm_exec_query_plan`'s showplan XML is converted to
//! the same intermediate JSON shape by the MSSQL adapter before reaching
//! here, since both engines expose a flat operator-id/parent-id table
//! rather than PG/MySQL's nested tree.

use std::collections::HashMap;

use serde_json::Value;

use super::{OperatorKind, PlanNode};

pub fn map_oracle_plan(json: &Value) -> PlanNode {
    let rows = json.get("rows").and_then(Value::as_array).cloned().unwrap_or_default();
    if rows.is_empty() {
        return PlanNode::new(OperatorKind::Unknown);
    }

    let mut by_id: HashMap<i64, &Value> = HashMap::new();
    let mut children_of: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut root_id = 0i64;

    for row in &rows {
        let id = row.get("id").and_then(Value::as_i64).unwrap_or(0);
        by_id.insert(id, row);
        if let Some(parent) = row.get("parent_id").and_then(Value::as_i64) {
            children_of.entry(parent).or_default().push(id);
        } else {
            root_id = id;
        }
    }

    build(root_id, &by_id, &children_of)
}

fn build(
    id: i64,
    by_id: &HashMap<i64, &Value>,
    children_of: &HashMap<i64, Vec<i64>>,
) -> PlanNode {
    let Some(row) = by_id.get(&id) else {
        return PlanNode::new(OperatorKind::Unknown);
    };

    let operation = row.get("operation").and_then(Value::as_str).unwrap_or("");
    let options = row.get("options").and_then(Value::as_str).unwrap_or("");
    let mut node = PlanNode::new(classify(operation, options));

    node.relation = row.get("object_name").and_then(Value::as_str).map(str::to_string);
    node.cost.estimated = row.get("cost").and_then(Value::as_f64);
    node.rows.estimated = row.get("cardinality").and_then(Value::as_f64);
    node.rows.actual = row.get("actual_rows").and_then(Value::as_f64);

    if let Some(ids) = children_of.get(&id) {
        node.children = ids.iter().map(|&child_id| build(child_id, by_id, children_of)).collect();
    }

    node
}

fn classify(operation: &str, options: &str) -> OperatorKind {
    match (operation, options) {
        ("TABLE ACCESS", "FULL") => OperatorKind::SeqScan,
        ("TABLE ACCESS", "BY INDEX ROWID") => OperatorKind::IndexScan,
        ("INDEX", "UNIQUE SCAN") | ("INDEX", "RANGE SCAN") => OperatorKind::IndexScan,
        ("INDEX", "FULL SCAN") | ("INDEX", "FAST FULL SCAN") => OperatorKind::IndexOnlyScan,
        ("BITMAP CONVERSION", _) | ("BITMAP INDEX", _) => OperatorKind::BitmapScan,
        ("NESTED LOOPS", _) => OperatorKind::NestedLoop,
        ("HASH JOIN", _) => OperatorKind::HashJoin,
        ("MERGE JOIN", _) => OperatorKind::MergeJoin,
        ("SORT", "AGGREGATE") | ("HASH", "GROUP BY") => OperatorKind::Aggregate,
        ("SORT", _) => OperatorKind::Sort,
        ("COUNT", "STOPKEY") => OperatorKind::Limit,
        ("VIEW", _) => OperatorKind::Materialize,
        ("FILTER", _) => OperatorKind::Filter,
        _ => OperatorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_flat_operator_table_into_tree() {
        let json = serde_json::json!({
            "rows": [
                { "id": 0, "operation": "HASH JOIN", "options": "" },
                { "id": 1, "parent_id": 0, "operation": "TABLE ACCESS", "options": "FULL", "object_name": "ORDERS", "cardinality": 200000.0 },
                { "id": 2, "parent_id": 0, "operation": "INDEX", "options": "UNIQUE SCAN", "object_name": "PK_CUSTOMERS" }
            ]
        });

        let plan = map_oracle_plan(&json);
        assert_eq!(plan.op_type, OperatorKind::HashJoin);
        assert_eq!(plan.children.len(), 2);
        assert_eq!(plan.children[0].relation.as_deref(), Some("ORDERS"));
    }
}
