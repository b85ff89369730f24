use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FixType {
    IndexCreate,
    IndexDrop,
    StatisticsUpdate,
    Vacuum,
    QueryRewriteRecord,
    ConfigChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum FixStatus {
    DryRunOk,
    DryRunFailed,
    Applied,
    Reverted,
    Failed,
}

/// A DDL/DML change executed against a target database.
///
/// Every `Applied` fix carries a non-empty `rollback_sql`; a `Reverted`
/// fix has `reverted_at` strictly after `applied_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedFix {
    pub id: i64,
    pub optimization_id: i64,
    pub fix_type: FixType,
    pub forward_sql: String,
    pub rollback_sql: String,
    pub status: FixStatus,
    pub execution_time_seconds: f64,
    pub safety_check: SafetyCheckResult,
    pub applied_at: DateTime<Utc>,
    pub reverted_at: Option<DateTime<Utc>>,
}

/// Structured outcome of the applicator's safety-gate evaluation (§4.6.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub checks_performed: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl SafetyCheckResult {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of `apply(...)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyResult {
    pub fix: AppliedFix,
    pub dry_run: bool,
}
