//! Engine-agnostic execution plan representation (§4.4).
//!
//! Each gateway adapter maps its engine's native `EXPLAIN` JSON into a
//! `PlanNode` tree using the controlled `OperatorKind` vocabulary below,
//! so the detector suite never has to know which engine produced a plan.

mod mysql;
mod oracle;
mod pg;

use serde::{Deserialize, Serialize};

pub use mysql::map_mysql_plan;
pub use oracle::map_oracle_plan;
pub use pg::map_pg_plan;

/// Controlled vocabulary of plan operators. Engine-specific node types
/// that don't map cleanly fall back to `Unknown` rather than growing
/// this enum per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorKind {
    SeqScan,
    IndexScan,
    IndexOnlyScan,
    BitmapScan,
    NestedLoop,
    HashJoin,
    MergeJoin,
    Aggregate,
    Sort,
    Limit,
    Gather,
    Cte,
    Materialize,
    Hash,
    Filter,
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlanCost {
    pub estimated: Option<f64>,
    pub actual: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PlanRows {
    pub estimated: Option<f64>,
    pub actual: Option<f64>,
}

/// One operator in a normalized execution plan tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub op_type: OperatorKind,
    pub relation: Option<String>,
    pub cost: PlanCost,
    pub rows: PlanRows,
    pub width: Option<i64>,
    pub children: Vec<PlanNode>,
    /// Engine-specific extras (index name, join condition text, filter
    /// predicate text, ...) that don't warrant their own typed field.
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// Derived once per normalized plan by the hotspot annotator — the
    /// node with the largest actual-or-estimated cost in the tree.
    pub is_most_consuming: bool,
    /// Second-largest-cost node, used to prioritize severity when two
    /// nodes both look expensive (e.g. a poor join feeding a full scan).
    pub is_second_most_consuming: bool,
}

impl PlanNode {
    pub fn new(op_type: OperatorKind) -> Self {
        Self {
            op_type,
            relation: None,
            cost: PlanCost::default(),
            rows: PlanRows::default(),
            width: None,
            children: Vec::new(),
            extra: serde_json::Map::new(),
            is_most_consuming: false,
            is_second_most_consuming: false,
        }
    }

    /// Depth-first iterator over this node and all descendants.
    pub fn iter(&self) -> PlanNodeIter<'_> {
        PlanNodeIter { stack: vec![self] }
    }

    fn cost_for_ranking(&self) -> f64 {
        self.cost.actual.or(self.cost.estimated).unwrap_or(0.0)
    }

    /// Annotates `is_most_consuming`/`is_second_most_consuming` across the
    /// whole tree in place. Grounded in the teacher's hotspot detector,
    /// which ranks nodes by cost and flags the top two.
    pub fn annotate_hotspots(&mut self) {
        let mut costs = Vec::new();
        collect_costs(self, &mut Vec::new(), &mut costs);
        costs.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((path, _)) = costs.first().cloned() {
            set_flag(self, &path, true, false);
        }
        if let Some((path, _)) = costs.get(1).cloned() {
            set_flag(self, &path, false, true);
        }
    }
}

/// Collects `(path-from-root-as-child-indices, cost)` for every node.
fn collect_costs(node: &PlanNode, path: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, f64)>) {
    out.push((path.clone(), node.cost_for_ranking()));
    for (i, child) in node.children.iter().enumerate() {
        path.push(i);
        collect_costs(child, path, out);
        path.pop();
    }
}

fn set_flag(node: &mut PlanNode, path: &[usize], most: bool, second: bool) {
    match path.split_first() {
        None => {
            if most {
                node.is_most_consuming = true;
            }
            if second {
                node.is_second_most_consuming = true;
            }
        },
        Some((&idx, rest)) => set_flag(&mut node.children[idx], rest, most, second),
    }
}

pub struct PlanNodeIter<'a> {
    stack: Vec<&'a PlanNode>,
}

impl<'a> Iterator for PlanNodeIter<'a> {
    type Item = &'a PlanNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

/// A captured plan in both canonical and engine-native form, as returned
/// by `EngineGateway::explain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub root: PlanNode,
    pub engine_native: serde_json::Value,
    pub analyzed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotate_hotspots_picks_top_two_by_cost() {
        let mut leaf_a = PlanNode::new(OperatorKind::SeqScan);
        leaf_a.cost.actual = Some(10.0);
        let mut leaf_b = PlanNode::new(OperatorKind::IndexScan);
        leaf_b.cost.actual = Some(500.0);
        let mut leaf_c = PlanNode::new(OperatorKind::Sort);
        leaf_c.cost.actual = Some(200.0);

        let mut root = PlanNode::new(OperatorKind::HashJoin);
        root.cost.actual = Some(5.0);
        root.children = vec![leaf_a, leaf_b, leaf_c];

        root.annotate_hotspots();

        assert!(root.children[1].is_most_consuming);
        assert!(root.children[2].is_second_most_consuming);
        assert!(!root.is_most_consuming);
    }

    #[test]
    fn iter_visits_every_node() {
        let mut root = PlanNode::new(OperatorKind::Aggregate);
        root.children.push(PlanNode::new(OperatorKind::SeqScan));
        root.children.push(PlanNode::new(OperatorKind::Sort));
        assert_eq!(root.iter().count(), 3);
    }
}
