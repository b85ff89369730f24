//! Fix Applicator & Performance Validator (C6) — §4.6.
//!
//! Grounded on the gateway's own transactional primitive
//! (`EngineGateway::execute_in_tx`, read-only runs always rolled back) and
//! on `GatewayPoolManager`'s per-connection `DashMap` cache for the
//! per-connection serialization the rollback stack requires.

pub mod validator;

use std::sync::Arc;

use chrono::{Timelike, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Mutex;

use crate::config::ApplicatorConfig;
use crate::error::{EngineError, EngineResult};
use crate::gateway::{EngineGateway, GatewayRegistry};
use crate::models::{
    AppliedFix, ApplyResult, Connection, DecryptedCredentials, Engine, FixStatus, FixType,
    OptimizationStatus, SafetyCheckResult,
};
use crate::secrets::SecretStore;
use crate::store::ObservabilityStore;

pub use validator::Validator;

static DANGEROUS_STATEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(drop\s+table|drop\s+database|truncate)\b").unwrap());
static CREATE_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)create\s+(?:unique\s+)?index\s+(?:if\s+not\s+exists\s+)?(\w+)\s+on\s+(\w+)").unwrap());
static DROP_INDEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)drop\s+index\s+(?:if\s+exists\s+)?(\w+)(?:\s+on\s+(\w+))?").unwrap());
static ALTER_TABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)alter\s+table\s+(\w+)").unwrap());
static TABLE_HINT_COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)--\s*table:\s*(\w+)").unwrap());

/// Applies and rolls back fixes. One instance serves every connection;
/// `apply`/`rollback_*` serialize per connection via `locks`, mirroring
/// `GatewayPoolManager`'s per-connection cache keyed by the same id.
pub struct Applicator {
    store: Arc<dyn ObservabilityStore>,
    gateways: Arc<GatewayRegistry>,
    secrets: Arc<dyn SecretStore>,
    config: ApplicatorConfig,
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl Applicator {
    pub fn new(
        store: Arc<dyn ObservabilityStore>,
        gateways: Arc<GatewayRegistry>,
        secrets: Arc<dyn SecretStore>,
        config: ApplicatorConfig,
    ) -> Self {
        Self { store, gateways, secrets, config, locks: DashMap::new() }
    }

    fn lock_for(&self, connection_id: i64) -> Arc<Mutex<()>> {
        self.locks.entry(connection_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// §4.6.1. Evaluates the safety gates in order, then executes (or, on
    /// `dry_run`, prepares without executing) and records an `AppliedFix`.
    pub async fn apply(
        &self,
        optimization_id: i64,
        fix_type: FixType,
        fix_sql: String,
        dry_run: bool,
        skip_safety: bool,
    ) -> EngineResult<ApplyResult> {
        if !self.config.enable_ddl_execution {
            return Err(EngineError::fatal("DDL execution is disabled by configuration"));
        }

        let optimization = self.store.get_optimization(optimization_id).await?;
        let connection = self.store.get_connection(optimization.connection_id).await?;
        let gateway = self.gateways.get(connection.engine)?.clone();
        let password = self.secrets.decrypt(&connection.encrypted_password).await?;
        let creds = DecryptedCredentials {
            host: connection.host.clone(),
            port: connection.port,
            database: connection.database.clone(),
            username: connection.username.clone(),
            password,
        };

        let guard = self.lock_for(connection.id);
        let _permit = guard.lock().await;

        let mut checks = SafetyCheckResult::default();

        // Gate 1: dangerous multi-statement classifier.
        checks.checks_performed.push("dangerous_statement_classifier".to_string());
        if !skip_safety && is_dangerous_batch(&fix_sql) {
            checks.errors.push("multi-statement batch contains a destructive statement (DROP TABLE/DROP DATABASE/TRUNCATE)".to_string());
            return Err(EngineError::SafetyCheckFailed(checks));
        }

        // Gate 2: business hours. Not skip_safety-overridable — blocks the
        // apply outright and records a DRY_RUN_FAILED fix for the audit trail.
        checks.checks_performed.push("business_hours".to_string());
        if self.config.business_hours_enabled && in_business_hours(&self.config) {
            checks.warnings.push(format!(
                "apply rejected: current time is within business hours ({:02}:00-{:02}:00)",
                self.config.business_hours_start, self.config.business_hours_end
            ));
            let fix = AppliedFix {
                id: 0,
                optimization_id,
                fix_type,
                forward_sql: fix_sql,
                rollback_sql: String::new(),
                status: FixStatus::DryRunFailed,
                execution_time_seconds: 0.0,
                safety_check: checks,
                applied_at: Utc::now(),
                reverted_at: None,
            };
            let fix = self.store.create_applied_fix(fix).await?;
            return Ok(ApplyResult { fix, dry_run: true });
        }

        let table = extract_target_table(&fix_sql);

        // Gate 3: active-lock check. Never skip_safety-overridable: an
        // in-progress conflicting lock means the statement would simply hang
        // or deadlock, not merely violate policy.
        checks.checks_performed.push("active_lock_check".to_string());
        if let Some(table) = &table
            && gateway.has_conflicting_lock(connection.id, &creds, table).await?
        {
            checks.errors.push(format!("table {table} is currently held with a conflicting lock"));
            return Err(EngineError::SafetyCheckFailed(checks));
        }

        // Gate 4: rollback derivability (§4.6.3).
        checks.checks_performed.push("rollback_derivability".to_string());
        let rollback_sql = match derive_rollback(gateway.as_ref(), &connection, &creds, fix_type, &fix_sql, table.as_deref()).await {
            Ok(sql) => sql,
            Err(reason) if skip_safety => {
                checks.warnings.push(format!("rollback not derivable ({reason}); proceeding because skip_safety=true"));
                format!("-- no-op: rollback could not be derived ({reason})")
            },
            Err(reason) => {
                checks.errors.push(format!("rollback not derivable: {reason}"));
                return Err(EngineError::SafetyCheckFailed(checks));
            },
        };

        if dry_run {
            let fix = AppliedFix {
                id: 0,
                optimization_id,
                fix_type,
                forward_sql: fix_sql,
                rollback_sql,
                status: FixStatus::DryRunOk,
                execution_time_seconds: 0.0,
                safety_check: checks,
                applied_at: Utc::now(),
                reverted_at: None,
            };
            let fix = self.store.create_applied_fix(fix).await?;
            return Ok(ApplyResult { fix, dry_run: true });
        }

        let started = std::time::Instant::now();
        let exec_outcome = match connection.engine {
            // MySQL DDL auto-commits; the derivability gate already took the
            // catalog snapshot it needs, so the statement runs standalone.
            Engine::Mysql => gateway.execute_ddl(connection.id, &creds, &fix_sql).await.map(|_| ()),
            _ => gateway.execute_in_tx(connection.id, &creds, &[fix_sql.clone()], false).await.map(|_| ()),
        };
        let execution_time_seconds = started.elapsed().as_secs_f64();

        let status = if exec_outcome.is_ok() { FixStatus::Applied } else { FixStatus::Failed };
        if let Err(e) = &exec_outcome {
            checks.errors.push(format!("execution failed: {e}"));
        }

        let fix = AppliedFix {
            id: 0,
            optimization_id,
            fix_type,
            forward_sql: fix_sql,
            rollback_sql,
            status,
            execution_time_seconds,
            safety_check: checks,
            applied_at: Utc::now(),
            reverted_at: None,
        };
        let fix = self.store.create_applied_fix(fix).await?;

        if status == FixStatus::Applied {
            self.store
                .transition_optimization(optimization_id, OptimizationStatus::Generated, OptimizationStatus::Applied, Some(fix.applied_at), None)
                .await?;
        }

        exec_outcome?;
        Ok(ApplyResult { fix, dry_run: false })
    }

    /// Pops the most recently applied fix for `connection_id` and executes
    /// its rollback SQL.
    pub async fn rollback_last(&self, connection_id: i64) -> EngineResult<Option<AppliedFix>> {
        let guard = self.lock_for(connection_id);
        let _permit = guard.lock().await;

        let stack = self.store.rollback_stack(connection_id).await?;
        let Some(fix) = stack.into_iter().next() else {
            return Ok(None);
        };

        let connection = self.store.get_connection(connection_id).await?;
        let gateway = self.gateways.get(connection.engine)?.clone();
        let password = self.secrets.decrypt(&connection.encrypted_password).await?;
        let creds = DecryptedCredentials {
            host: connection.host.clone(),
            port: connection.port,
            database: connection.database.clone(),
            username: connection.username.clone(),
            password,
        };

        if !fix.rollback_sql.trim_start().starts_with("--") {
            match connection.engine {
                Engine::Mysql => {
                    gateway.execute_ddl(connection.id, &creds, &fix.rollback_sql).await?;
                },
                _ => {
                    gateway.execute_in_tx(connection.id, &creds, &[fix.rollback_sql.clone()], false).await?;
                },
            }
        }

        let reverted = self.store.mark_fix_reverted(fix.id, Utc::now()).await?;
        Ok(Some(reverted))
    }

    /// Drains the connection's rollback stack in LIFO order.
    pub async fn rollback_all(&self, connection_id: i64) -> EngineResult<Vec<AppliedFix>> {
        let mut reverted = Vec::new();
        while let Some(fix) = self.rollback_last(connection_id).await? {
            reverted.push(fix);
        }
        Ok(reverted)
    }
}

/// True when `sql` has more than one statement and at least one of them
/// is a destructive DDL statement.
fn is_dangerous_batch(sql: &str) -> bool {
    let statements: Vec<&str> = sql.split(';').map(str::trim).filter(|s| !s.is_empty()).collect();
    statements.len() > 1 && statements.iter().any(|s| DANGEROUS_STATEMENT.is_match(s))
}

fn in_business_hours(config: &ApplicatorConfig) -> bool {
    let hour = Utc::now().hour() as u8;
    hour >= config.business_hours_start && hour < config.business_hours_end
}

/// Best-effort table extraction for the lock check and the MySQL
/// catalog-snapshot gate; tries the common DDL shapes and finally an
/// explicit `-- table: name` annotation.
fn extract_target_table(sql: &str) -> Option<String> {
    if let Some(caps) = CREATE_INDEX.captures(sql) {
        return Some(caps[2].to_string());
    }
    if let Some(caps) = DROP_INDEX.captures(sql)
        && let Some(table) = caps.get(2)
    {
        return Some(table.as_str().to_string());
    }
    if let Some(caps) = ALTER_TABLE.captures(sql) {
        return Some(caps[1].to_string());
    }
    TABLE_HINT_COMMENT.captures(sql).map(|caps| caps[1].to_string())
}

/// §4.6.3. Returns the rollback statement, or `Err(reason)` when it
/// cannot be derived (the caller decides whether `skip_safety` lets that slide).
async fn derive_rollback(
    gateway: &dyn EngineGateway,
    connection: &Connection,
    creds: &DecryptedCredentials,
    fix_type: FixType,
    forward_sql: &str,
    table: Option<&str>,
) -> Result<String, String> {
    match fix_type {
        FixType::IndexCreate => {
            let caps = CREATE_INDEX.captures(forward_sql).ok_or("could not find an index name in CREATE INDEX statement")?;
            Ok(format!("DROP INDEX IF EXISTS {}", &caps[1]))
        },
        FixType::IndexDrop => {
            let caps = DROP_INDEX.captures(forward_sql).ok_or("could not find an index name in DROP INDEX statement")?;
            let index_name = &caps[1];
            let table = table.ok_or("DROP INDEX has no resolvable table for the catalog snapshot")?;
            let snapshot = gateway
                .list_indexes(connection.id, creds, table)
                .await
                .map_err(|e| format!("catalog snapshot unavailable: {e}"))?;
            let index = snapshot
                .into_iter()
                .find(|i| i.name.eq_ignore_ascii_case(index_name))
                .ok_or("index not present in catalog snapshot")?;
            let unique = if index.is_unique { "UNIQUE " } else { "" };
            Ok(format!("CREATE {unique}INDEX {} ON {}({})", index.name, index.table, index.columns.join(", ")))
        },
        FixType::StatisticsUpdate | FixType::Vacuum => Ok("-- no-op: statistics/vacuum operations are not reversible".to_string()),
        FixType::QueryRewriteRecord => Ok("-- no-op: query rewrite record carries no DDL to revert".to_string()),
        FixType::ConfigChange => Err("configuration prior value is not captured by this gateway contract".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_dangerous_multi_statement_batch() {
        assert!(is_dangerous_batch("DROP TABLE orders; CREATE INDEX idx ON orders(id)"));
    }

    #[test]
    fn single_dangerous_statement_is_not_flagged_as_a_batch() {
        assert!(!is_dangerous_batch("TRUNCATE orders"));
    }

    #[test]
    fn harmless_multi_statement_batch_passes() {
        assert!(!is_dangerous_batch("CREATE INDEX a ON t(x); ANALYZE t"));
    }

    #[test]
    fn extracts_table_from_create_index() {
        assert_eq!(extract_target_table("CREATE INDEX idx_email ON users(email)"), Some("users".to_string()));
    }

    #[test]
    fn extracts_table_from_hint_comment() {
        assert_eq!(extract_target_table("DROP INDEX idx_email -- table: users"), Some("users".to_string()));
    }
}
