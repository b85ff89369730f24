//! Maps MySQL's `EXPLAIN FORMAT=JSON` tree into the canonical shape.

use serde_json::Value;

use super::{OperatorKind, PlanNode};

pub fn map_mysql_plan(json: &Value) -> PlanNode {
    let query_block = json.get("query_block").unwrap_or(json);
    map_block(query_block)
}

fn map_block(block: &Value) -> PlanNode {
    if let Some(table) = block.get("table") {
        return map_table(table);
    }

    if let Some(nested) = block.get("nested_loop").and_then(Value::as_array) {
        let mut node = PlanNode::new(OperatorKind::NestedLoop);
        node.children = nested.iter().filter_map(|n| n.get("table").map(map_table)).collect();
        return node;
    }

    if let Some(order) = block.get("ordering_operation") {
        let mut node = PlanNode::new(OperatorKind::Sort);
        node.children = vec![map_block(order)];
        return node;
    }

    if let Some(group) = block.get("grouping_operation") {
        let mut node = PlanNode::new(OperatorKind::Aggregate);
        node.children = vec![map_block(group)];
        return node;
    }

    PlanNode::new(OperatorKind::Unknown)
}

fn map_table(table: &Value) -> PlanNode {
    let access_type = table.get("access_type").and_then(Value::as_str).unwrap_or("");
    let mut node = PlanNode::new(classify(access_type));

    node.relation = table.get("table_name").and_then(Value::as_str).map(str::to_string);
    node.cost.estimated = table
        .get("cost_info")
        .and_then(|c| c.get("read_cost"))
        .and_then(Value::as_str)
        .and_then(|s| s.parse().ok());
    node.rows.estimated = table.get("rows_examined_per_scan").and_then(Value::as_f64);
    node.rows.actual = table.get("rows_produced_per_join").and_then(Value::as_f64);

    if let Some(key) = table.get("key") {
        node.extra.insert("key".to_string(), key.clone());
    }
    if let Some(filtered) = table.get("filtered") {
        node.extra.insert("filtered".to_string(), filtered.clone());
    }

    node
}

fn classify(access_type: &str) -> OperatorKind {
    match access_type {
        "ALL" => OperatorKind::SeqScan,
        "index" => OperatorKind::IndexOnlyScan,
        "ref" | "eq_ref" | "range" => OperatorKind::IndexScan,
        _ => OperatorKind::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_full_table_scan() {
        let json = serde_json::json!({
            "query_block": {
                "table": {
                    "table_name": "orders",
                    "access_type": "ALL",
                    "rows_examined_per_scan": 120000
                }
            }
        });
        let plan = map_mysql_plan(&json);
        assert_eq!(plan.op_type, OperatorKind::SeqScan);
        assert_eq!(plan.relation.as_deref(), Some("orders"));
    }
}
