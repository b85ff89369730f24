//! `Optimizer.*` (§6.1).

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::applicator::{Applicator, Validator};
use crate::error::{EngineError, EngineResult};
use crate::gateway::GatewayRegistry;
use crate::models::{AppliedFix, ApplyResult, DecryptedCredentials, FixType, Optimization, ValidationResult};
use crate::optimizer::Orchestrator;
use crate::plan::OperatorKind;
use crate::secrets::SecretStore;
use crate::store::ObservabilityStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanExplanation {
    pub explanation: String,
    pub summary: String,
    pub key_operations: Vec<String>,
    pub bottlenecks: Vec<String>,
    pub estimated_cost: Option<f64>,
}

/// Categories `Optimizer.generate_fixes` can be asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixCategory {
    Indexes,
    Maintenance,
    Rewrites,
    Config,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixSuggestions {
    pub indexes: Vec<String>,
    pub maintenance: Vec<String>,
    pub rewrites: Vec<String>,
    pub config: Vec<String>,
}

pub struct OptimizerApi {
    store: Arc<dyn ObservabilityStore>,
    gateways: Arc<GatewayRegistry>,
    secrets: Arc<dyn SecretStore>,
    orchestrator: Arc<Orchestrator>,
    applicator: Arc<Applicator>,
    validator: Arc<Validator>,
}

impl OptimizerApi {
    pub fn new(
        store: Arc<dyn ObservabilityStore>,
        gateways: Arc<GatewayRegistry>,
        secrets: Arc<dyn SecretStore>,
        orchestrator: Arc<Orchestrator>,
        applicator: Arc<Applicator>,
        validator: Arc<Validator>,
    ) -> Self {
        Self { store, gateways, secrets, orchestrator, applicator, validator }
    }

    pub async fn optimize(&self, connection_id: i64, sql: &str) -> EngineResult<Optimization> {
        let connection = self.store.get_connection(connection_id).await?;
        self.orchestrator.optimize(&connection, sql, None).await
    }

    /// `include_plan` governs only whether the transport layer echoes the
    /// raw `execution_plan` back to the caller; the core always captures
    /// it as part of `optimize`, so this wrapper has nothing to branch on.
    pub async fn optimize_with_plan_flag(&self, connection_id: i64, sql: &str, _include_plan: bool) -> EngineResult<Optimization> {
        self.optimize(connection_id, sql).await
    }

    /// Explains a plan in prose without persisting an `Optimization`:
    /// captures the plan fresh (or reuses the one supplied) and reduces
    /// it to the summary shape the transport layer wants.
    pub async fn explain_plan(&self, connection_id: i64, sql: &str) -> EngineResult<PlanExplanation> {
        let connection = self.store.get_connection(connection_id).await?;
        let gateway = self.gateways.get(connection.engine)?.clone();
        let password = self.secrets.decrypt(&connection.encrypted_password).await?;
        let creds = DecryptedCredentials {
            host: connection.host,
            port: connection.port,
            database: connection.database,
            username: connection.username,
            password,
        };

        let mut plan = match gateway.explain(connection_id, &creds, sql, true).await {
            Ok(plan) => plan,
            Err(EngineError::Capability(_)) => gateway.explain(connection_id, &creds, sql, false).await?,
            Err(other) => return Err(other),
        };
        plan.root.annotate_hotspots();

        let mut key_operations = Vec::new();
        let mut bottlenecks = Vec::new();
        for node in plan.root.iter() {
            if !matches!(node.op_type, OperatorKind::Unknown) {
                key_operations.push(describe_operation(node));
            }
            if node.is_most_consuming || node.is_second_most_consuming {
                bottlenecks.push(describe_operation(node));
            }
        }

        let estimated_cost = plan.root.cost.actual.or(plan.root.cost.estimated);
        let summary = if bottlenecks.is_empty() {
            format!("{} operation(s), no clear hotspot", key_operations.len())
        } else {
            format!("{} operation(s), {} likely bottleneck(s)", key_operations.len(), bottlenecks.len())
        };

        Ok(PlanExplanation {
            explanation: format!("plan for `{sql}` has {} top-level operation(s)", plan.root.children.len()),
            summary,
            key_operations,
            bottlenecks,
            estimated_cost,
        })
    }

    /// Buckets an already-generated optimization's recommendations and
    /// detected issues into the four fix categories. Categories outside
    /// `categories` (when non-empty) are omitted.
    pub async fn generate_fixes(&self, optimization_id: i64, categories: &HashSet<FixCategory>) -> EngineResult<FixSuggestions> {
        let optimization = self.store.get_optimization(optimization_id).await?;
        let want = |c: FixCategory| categories.is_empty() || categories.contains(&c);

        let mut suggestions = FixSuggestions::default();
        for issue in &optimization.detected_issues {
            use crate::models::IssueType;
            match issue.issue_type {
                IssueType::MissingIndex | IssueType::InefficientIndex if want(FixCategory::Indexes) => {
                    suggestions.indexes.extend(issue.recommendations.clone());
                },
                IssueType::StaleStatistics if want(FixCategory::Maintenance) => {
                    suggestions.maintenance.extend(issue.recommendations.clone());
                },
                IssueType::SuboptimalPattern | IssueType::OrmGenerated | IssueType::PoorJoinStrategy
                    if want(FixCategory::Rewrites) =>
                {
                    suggestions.rewrites.extend(issue.recommendations.clone());
                },
                IssueType::HighIoWorkload | IssueType::WrongCardinality | IssueType::InefficientReporting
                    if want(FixCategory::Config) =>
                {
                    suggestions.config.extend(issue.recommendations.clone());
                },
                _ => {},
            }
        }
        if want(FixCategory::Rewrites) && !optimization.optimized_sql.is_empty() {
            suggestions.rewrites.push(optimization.optimized_sql.clone());
        }
        Ok(suggestions)
    }

    pub async fn apply_fix(
        &self,
        optimization_id: i64,
        fix_type: FixType,
        sql: String,
        dry_run: bool,
        skip_safety: bool,
    ) -> EngineResult<ApplyResult> {
        self.applicator.apply(optimization_id, fix_type, sql, dry_run, skip_safety).await
    }

    pub async fn validate(&self, optimization_id: i64, _iterations: u32) -> EngineResult<ValidationResult> {
        self.validator.validate(optimization_id, &self.applicator).await
    }

    /// Rolls back one fix, or the last-applied fix on the connection when
    /// `fix_id` is `None`.
    pub async fn rollback(&self, connection_id: i64, fix_id: Option<i64>) -> EngineResult<Option<AppliedFix>> {
        match fix_id {
            None => self.applicator.rollback_last(connection_id).await,
            Some(id) => {
                let stack = self.store.rollback_stack(connection_id).await?;
                if !stack.iter().any(|f| f.id == id) {
                    return Err(EngineError::not_found("applied_fix", id.to_string()));
                }
                // Only the top of the stack is ever a valid rollback target;
                // anything else would desync forward/rollback SQL ordering.
                if stack.first().map(|f| f.id) != Some(id) {
                    return Err(EngineError::conflict("fix is not at the top of the rollback stack"));
                }
                self.applicator.rollback_last(connection_id).await
            },
        }
    }
}

fn describe_operation(node: &crate::plan::PlanNode) -> String {
    match &node.relation {
        Some(rel) => format!("{:?} on {rel}", node.op_type),
        None => format!("{:?}", node.op_type),
    }
}
