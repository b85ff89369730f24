use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Row, SqlitePool};

use crate::error::{EngineError, EngineResult};
use crate::models::{
    AppliedFix, Connection, DetectedIssue, DiscoveredQuery, Engine, Feedback, FeedbackStats,
    FixStatus, IndexAction, IndexKind, IndexRecommendation, IndexStatus, NewConnection,
    Optimization, OptimizationPattern, OptimizationStatus, ParsingStrategy, PatternType,
    QuerySample, SafetyCheckResult, UpsertOutcome, ValidationResult, WorkloadClass,
    WorkloadSample,
};

use super::{DashboardStats, DetectionSummary, NewOptimization, ObservabilityStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(url: &str, max_connections: u32) -> EngineResult<Self> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Applies embedded schema migrations. Called once at process start
    /// (Design Notes §9: "no drift between dev and prod schemas is permitted").
    pub async fn migrate(&self) -> EngineResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::fatal(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(FromRow)]
struct ConnectionRow {
    id: i64,
    display_name: String,
    engine: String,
    host: String,
    port: i64,
    database: String,
    username: String,
    encrypted_password: Vec<u8>,
    monitoring_enabled: bool,
    created_at: String,
    deleted_at: Option<String>,
}

fn parse_engine(s: &str) -> EngineResult<Engine> {
    match s {
        "PG" => Ok(Engine::Pg),
        "MYSQL" => Ok(Engine::Mysql),
        "MSSQL" => Ok(Engine::Mssql),
        "ORACLE" => Ok(Engine::Oracle),
        other => Err(EngineError::fatal(format!("unknown engine in store: {other}"))),
    }
}

fn parse_timestamp(s: &str) -> EngineResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| EngineError::fatal(format!("corrupt timestamp '{s}': {e}")))
}

impl ConnectionRow {
    fn into_model(self) -> EngineResult<Connection> {
        Ok(Connection {
            id: self.id,
            display_name: self.display_name,
            engine: parse_engine(&self.engine)?,
            host: self.host,
            port: self.port as u16,
            database: self.database,
            username: self.username,
            encrypted_password: self.encrypted_password,
            monitoring_enabled: self.monitoring_enabled,
            created_at: parse_timestamp(&self.created_at)?,
            deleted_at: self.deleted_at.map(|s| parse_timestamp(&s)).transpose()?,
        })
    }
}

#[derive(FromRow)]
struct QueryRow {
    id: i64,
    connection_id: i64,
    fingerprint: String,
    raw_sql: String,
    normalized_sql: String,
    first_seen_at: String,
    last_seen_at: String,
    lifetime_calls: i64,
    lifetime_total_exec_time_ms: f64,
    lifetime_rows: i64,
    engine_query_id: Option<String>,
}

impl QueryRow {
    fn into_model(self) -> EngineResult<DiscoveredQuery> {
        Ok(DiscoveredQuery {
            id: self.id,
            connection_id: self.connection_id,
            fingerprint: self.fingerprint,
            raw_sql: self.raw_sql,
            normalized_sql: self.normalized_sql,
            first_seen_at: parse_timestamp(&self.first_seen_at)?,
            last_seen_at: parse_timestamp(&self.last_seen_at)?,
            lifetime_calls: self.lifetime_calls,
            lifetime_total_exec_time_ms: self.lifetime_total_exec_time_ms,
            lifetime_rows: self.lifetime_rows,
            engine_query_id: self.engine_query_id,
        })
    }
}

#[derive(FromRow)]
struct OptimizationRow {
    id: i64,
    connection_id: i64,
    query_id: Option<i64>,
    original_sql: String,
    optimized_sql: String,
    explanation: String,
    recommendations: String,
    execution_plan: String,
    estimated_improvement_pct: f64,
    detected_issues: String,
    validation_result: Option<String>,
    parsing_strategy: String,
    status: String,
    created_at: String,
    applied_at: Option<String>,
}

fn parse_parsing_strategy(s: &str) -> ParsingStrategy {
    match s {
        "tagged_section" => ParsingStrategy::TaggedSection,
        "fenced_code_block" => ParsingStrategy::FencedCodeBlock,
        "leading_keyword_block" => ParsingStrategy::LeadingKeywordBlock,
        "keyword_dominated_span" => ParsingStrategy::KeywordDominatedSpan,
        "full_response_validation" => ParsingStrategy::FullResponseValidation,
        "emergency_regex_extraction" => ParsingStrategy::EmergencyRegexExtraction,
        "raw_response" => ParsingStrategy::RawResponse,
        _ => ParsingStrategy::FailedUpstream,
    }
}

fn parse_optimization_status(s: &str) -> EngineResult<OptimizationStatus> {
    match s {
        "GENERATED" => Ok(OptimizationStatus::Generated),
        "APPLIED" => Ok(OptimizationStatus::Applied),
        "VALIDATED" => Ok(OptimizationStatus::Validated),
        "VALIDATION_FAILED" => Ok(OptimizationStatus::ValidationFailed),
        "REVERTED" => Ok(OptimizationStatus::Reverted),
        other => Err(EngineError::fatal(format!("unknown optimization status: {other}"))),
    }
}

impl OptimizationRow {
    fn into_model(self) -> EngineResult<Optimization> {
        Ok(Optimization {
            id: self.id,
            connection_id: self.connection_id,
            query_id: self.query_id,
            original_sql: self.original_sql,
            optimized_sql: self.optimized_sql,
            explanation: self.explanation,
            recommendations: serde_json::from_str(&self.recommendations).unwrap_or_default(),
            execution_plan: serde_json::from_str(&self.execution_plan).unwrap_or(serde_json::Value::Null),
            estimated_improvement_pct: self.estimated_improvement_pct,
            detected_issues: serde_json::from_str::<Vec<DetectedIssue>>(&self.detected_issues)
                .unwrap_or_default(),
            validation_result: self
                .validation_result
                .and_then(|s| serde_json::from_str::<ValidationResult>(&s).ok()),
            parsing_strategy: parse_parsing_strategy(&self.parsing_strategy),
            status: parse_optimization_status(&self.status)?,
            created_at: parse_timestamp(&self.created_at)?,
            applied_at: self.applied_at.map(|s| parse_timestamp(&s)).transpose()?,
        })
    }
}

#[derive(FromRow)]
struct AppliedFixRow {
    id: i64,
    optimization_id: i64,
    fix_type: String,
    forward_sql: String,
    rollback_sql: String,
    status: String,
    execution_time_seconds: f64,
    safety_check: String,
    applied_at: String,
    reverted_at: Option<String>,
}

fn parse_fix_type(s: &str) -> crate::models::FixType {
    use crate::models::FixType::*;
    match s {
        "INDEX_CREATE" => IndexCreate,
        "INDEX_DROP" => IndexDrop,
        "STATISTICS_UPDATE" => StatisticsUpdate,
        "VACUUM" => Vacuum,
        "QUERY_REWRITE_RECORD" => QueryRewriteRecord,
        _ => ConfigChange,
    }
}

fn fix_type_str(t: crate::models::FixType) -> &'static str {
    use crate::models::FixType::*;
    match t {
        IndexCreate => "INDEX_CREATE",
        IndexDrop => "INDEX_DROP",
        StatisticsUpdate => "STATISTICS_UPDATE",
        Vacuum => "VACUUM",
        QueryRewriteRecord => "QUERY_REWRITE_RECORD",
        ConfigChange => "CONFIG_CHANGE",
    }
}

fn parse_fix_status(s: &str) -> FixStatus {
    match s {
        "DRY_RUN_OK" => FixStatus::DryRunOk,
        "DRY_RUN_FAILED" => FixStatus::DryRunFailed,
        "APPLIED" => FixStatus::Applied,
        "REVERTED" => FixStatus::Reverted,
        _ => FixStatus::Failed,
    }
}

fn fix_status_str(s: FixStatus) -> &'static str {
    match s {
        FixStatus::DryRunOk => "DRY_RUN_OK",
        FixStatus::DryRunFailed => "DRY_RUN_FAILED",
        FixStatus::Applied => "APPLIED",
        FixStatus::Reverted => "REVERTED",
        FixStatus::Failed => "FAILED",
    }
}

impl AppliedFixRow {
    fn into_model(self) -> EngineResult<AppliedFix> {
        Ok(AppliedFix {
            id: self.id,
            optimization_id: self.optimization_id,
            fix_type: parse_fix_type(&self.fix_type),
            forward_sql: self.forward_sql,
            rollback_sql: self.rollback_sql,
            status: parse_fix_status(&self.status),
            execution_time_seconds: self.execution_time_seconds,
            safety_check: serde_json::from_str::<SafetyCheckResult>(&self.safety_check)
                .unwrap_or_default(),
            applied_at: parse_timestamp(&self.applied_at)?,
            reverted_at: self.reverted_at.map(|s| parse_timestamp(&s)).transpose()?,
        })
    }
}

#[async_trait]
impl ObservabilityStore for SqliteStore {
    async fn create_connection(
        &self,
        conn: NewConnection,
        encrypted_password: Vec<u8>,
    ) -> EngineResult<Connection> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO connections \
             (display_name, engine, host, port, database, username, encrypted_password, monitoring_enabled, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&conn.display_name)
        .bind(conn.engine.as_str())
        .bind(&conn.host)
        .bind(conn.port as i64)
        .bind(&conn.database)
        .bind(&conn.username)
        .bind(&encrypted_password)
        .bind(conn.monitoring_enabled)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                EngineError::conflict("a connection with the same identity already exists")
            },
            other => EngineError::from(other),
        })?;

        self.get_connection(result.last_insert_rowid()).await
    }

    async fn get_connection(&self, id: i64) -> EngineResult<Connection> {
        let row: Option<ConnectionRow> = sqlx::query_as("SELECT * FROM connections WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| EngineError::not_found("connection", id.to_string()))?.into_model()
    }

    async fn list_connections(&self) -> EngineResult<Vec<Connection>> {
        let rows: Vec<ConnectionRow> =
            sqlx::query_as("SELECT * FROM connections WHERE deleted_at IS NULL ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(ConnectionRow::into_model).collect()
    }

    async fn list_monitoring_enabled_connections(&self) -> EngineResult<Vec<Connection>> {
        let rows: Vec<ConnectionRow> = sqlx::query_as(
            "SELECT * FROM connections WHERE deleted_at IS NULL AND monitoring_enabled = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ConnectionRow::into_model).collect()
    }

    async fn update_connection(&self, conn: Connection) -> EngineResult<Connection> {
        sqlx::query(
            "UPDATE connections SET display_name = ?, host = ?, port = ?, database = ?, \
             username = ?, monitoring_enabled = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&conn.display_name)
        .bind(&conn.host)
        .bind(conn.port as i64)
        .bind(&conn.database)
        .bind(&conn.username)
        .bind(conn.monitoring_enabled)
        .bind(conn.id)
        .execute(&self.pool)
        .await?;
        self.get_connection(conn.id).await
    }

    async fn delete_connection(&self, id: i64) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE connections SET deleted_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::not_found("connection", id.to_string()));
        }
        // Dependent rows cascade via ON DELETE CASCADE once the store is
        // allowed to hard-delete; the soft-delete above is the operator-
        // visible lifecycle change, this commits the removal transactionally.
        sqlx::query("DELETE FROM connections WHERE id = ?").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_query(
        &self,
        connection_id: i64,
        sample: &QuerySample,
        observed_at: DateTime<Utc>,
    ) -> EngineResult<(DiscoveredQuery, UpsertOutcome)> {
        let mut tx = self.pool.begin().await?;
        let observed_str = observed_at.to_rfc3339();

        let existing: Option<QueryRow> = sqlx::query_as(
            "SELECT * FROM queries WHERE connection_id = ? AND fingerprint = ?",
        )
        .bind(connection_id)
        .bind(&sample.fingerprint)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => {
                sqlx::query(
                    "INSERT INTO queries \
                     (connection_id, fingerprint, raw_sql, normalized_sql, first_seen_at, \
                      last_seen_at, lifetime_calls, lifetime_total_exec_time_ms, lifetime_rows, \
                      engine_query_id) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(connection_id)
                .bind(&sample.fingerprint)
                .bind(&sample.raw_sql)
                .bind(crate::normalize::normalize(&sample.raw_sql))
                .bind(&observed_str)
                .bind(&observed_str)
                .bind(sample.calls)
                .bind(sample.total_exec_time_ms)
                .bind(sample.rows)
                .bind(&sample.engine_query_id)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Inserted
            },
            Some(row) if sample.calls < row.lifetime_calls => {
                sqlx::query(
                    "INSERT INTO query_reset_events (query_id, detected_at, previous_calls, previous_total_exec_time_ms) \
                     VALUES (?, ?, ?, ?)",
                )
                .bind(row.id)
                .bind(&observed_str)
                .bind(row.lifetime_calls)
                .bind(row.lifetime_total_exec_time_ms)
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    "UPDATE queries SET last_seen_at = ?, lifetime_calls = ?, \
                     lifetime_total_exec_time_ms = ?, lifetime_rows = ? WHERE id = ?",
                )
                .bind(&observed_str)
                .bind(sample.calls)
                .bind(sample.total_exec_time_ms)
                .bind(sample.rows)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Reset
            },
            Some(row) => {
                sqlx::query(
                    "UPDATE queries SET last_seen_at = ?, lifetime_calls = ?, \
                     lifetime_total_exec_time_ms = ?, lifetime_rows = ? WHERE id = ?",
                )
                .bind(&observed_str)
                .bind(sample.calls)
                .bind(sample.total_exec_time_ms)
                .bind(sample.rows)
                .bind(row.id)
                .execute(&mut *tx)
                .await?;
                UpsertOutcome::Updated
            },
        };

        let row: QueryRow = sqlx::query_as(
            "SELECT * FROM queries WHERE connection_id = ? AND fingerprint = ?",
        )
        .bind(connection_id)
        .bind(&sample.fingerprint)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((row.into_model()?, outcome))
    }

    async fn get_query(&self, id: i64) -> EngineResult<DiscoveredQuery> {
        let row: Option<QueryRow> = sqlx::query_as("SELECT * FROM queries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| EngineError::not_found("query", id.to_string()))?.into_model()
    }

    async fn list_queries(&self, connection_id: i64) -> EngineResult<Vec<DiscoveredQuery>> {
        let rows: Vec<QueryRow> =
            sqlx::query_as("SELECT * FROM queries WHERE connection_id = ? ORDER BY last_seen_at DESC")
                .bind(connection_id)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(QueryRow::into_model).collect()
    }

    async fn create_optimization(&self, opt: NewOptimization) -> EngineResult<Optimization> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO optimizations \
             (connection_id, query_id, original_sql, optimized_sql, explanation, recommendations, \
              execution_plan, estimated_improvement_pct, detected_issues, parsing_strategy, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'GENERATED', ?)",
        )
        .bind(opt.connection_id)
        .bind(opt.query_id)
        .bind(&opt.original_sql)
        .bind(&opt.optimized_sql)
        .bind(&opt.explanation)
        .bind(serde_json::to_string(&opt.recommendations).unwrap_or_default())
        .bind(serde_json::to_string(&opt.execution_plan).unwrap_or_default())
        .bind(opt.estimated_improvement_pct)
        .bind(serde_json::to_string(&opt.detected_issues).unwrap_or_default())
        .bind(opt.parsing_strategy.as_str())
        .bind(&now)
        .execute(&self.pool)
        .await?;
        self.get_optimization(result.last_insert_rowid()).await
    }

    async fn get_optimization(&self, id: i64) -> EngineResult<Optimization> {
        let row: Option<OptimizationRow> =
            sqlx::query_as("SELECT * FROM optimizations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or_else(|| EngineError::not_found("optimization", id.to_string()))?.into_model()
    }

    async fn list_optimizations(&self, connection_id: Option<i64>) -> EngineResult<Vec<Optimization>> {
        let rows: Vec<OptimizationRow> = match connection_id {
            Some(cid) => {
                sqlx::query_as("SELECT * FROM optimizations WHERE connection_id = ? ORDER BY created_at DESC")
                    .bind(cid)
                    .fetch_all(&self.pool)
                    .await?
            },
            None => {
                sqlx::query_as("SELECT * FROM optimizations ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            },
        };
        rows.into_iter().map(OptimizationRow::into_model).collect()
    }

    async fn transition_optimization(
        &self,
        id: i64,
        expected_current: OptimizationStatus,
        next: OptimizationStatus,
        applied_at: Option<DateTime<Utc>>,
        validation_result: Option<ValidationResult>,
    ) -> EngineResult<Optimization> {
        if !expected_current.is_valid_transition(next) {
            return Err(EngineError::conflict(format!(
                "illegal optimization transition {expected_current:?} -> {next:?}"
            )));
        }

        let next_str = serde_json::to_value(next)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let current_str = serde_json::to_value(expected_current)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let validation_json = validation_result.map(|v| serde_json::to_string(&v).unwrap_or_default());
        let applied_str = applied_at.map(|d| d.to_rfc3339());

        // Conditional update: the WHERE status = <expected> clause is what
        // makes two racing callers serialize — only one matches a row.
        let result = sqlx::query(
            "UPDATE optimizations SET status = ?, applied_at = COALESCE(?, applied_at), \
             validation_result = COALESCE(?, validation_result) WHERE id = ? AND status = ?",
        )
        .bind(&next_str)
        .bind(&applied_str)
        .bind(&validation_json)
        .bind(id)
        .bind(&current_str)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish "doesn't exist" from "lost the race".
            let _ = self.get_optimization(id).await?;
            return Err(EngineError::conflict(format!(
                "optimization {id} is not in state {expected_current:?}"
            )));
        }

        self.get_optimization(id).await
    }

    async fn create_applied_fix(&self, fix: AppliedFix) -> EngineResult<AppliedFix> {
        let applied_str = fix.applied_at.to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO applied_fixes \
             (optimization_id, fix_type, forward_sql, rollback_sql, status, execution_time_seconds, safety_check, applied_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(fix.optimization_id)
        .bind(fix_type_str(fix.fix_type))
        .bind(&fix.forward_sql)
        .bind(&fix.rollback_sql)
        .bind(fix_status_str(fix.status))
        .bind(fix.execution_time_seconds)
        .bind(serde_json::to_string(&fix.safety_check).unwrap_or_default())
        .bind(&applied_str)
        .execute(&self.pool)
        .await?;
        self.get_applied_fix(result.last_insert_rowid()).await
    }

    async fn get_applied_fix(&self, id: i64) -> EngineResult<AppliedFix> {
        let row: Option<AppliedFixRow> = sqlx::query_as("SELECT * FROM applied_fixes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or_else(|| EngineError::not_found("applied_fix", id.to_string()))?.into_model()
    }

    async fn list_applied_fixes(&self, optimization_id: i64) -> EngineResult<Vec<AppliedFix>> {
        let rows: Vec<AppliedFixRow> = sqlx::query_as(
            "SELECT * FROM applied_fixes WHERE optimization_id = ? ORDER BY applied_at DESC",
        )
        .bind(optimization_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AppliedFixRow::into_model).collect()
    }

    async fn rollback_stack(&self, connection_id: i64) -> EngineResult<Vec<AppliedFix>> {
        let rows: Vec<AppliedFixRow> = sqlx::query_as(
            "SELECT af.* FROM applied_fixes af \
             JOIN optimizations o ON o.id = af.optimization_id \
             WHERE o.connection_id = ? AND af.status = 'APPLIED' \
             ORDER BY af.applied_at DESC",
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AppliedFixRow::into_model).collect()
    }

    async fn mark_fix_reverted(&self, fix_id: i64, reverted_at: DateTime<Utc>) -> EngineResult<AppliedFix> {
        let reverted_str = reverted_at.to_rfc3339();
        let result = sqlx::query(
            "UPDATE applied_fixes SET status = 'REVERTED', reverted_at = ? WHERE id = ? AND status = 'APPLIED'",
        )
        .bind(&reverted_str)
        .bind(fix_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(EngineError::conflict(format!("fix {fix_id} is not currently applied")));
        }
        self.get_applied_fix(fix_id).await
    }

    async fn create_feedback(&self, feedback: Feedback) -> EngineResult<Feedback> {
        let result = sqlx::query(
            "INSERT INTO feedback \
             (optimization_id, before_metrics, after_metrics, actual_improvement_pct, \
              estimated_improvement_pct, accuracy_score, operator_rating, operator_comment, \
              status, applied_at, measured_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(feedback.optimization_id)
        .bind(serde_json::to_string(&feedback.before_metrics).unwrap_or_default())
        .bind(serde_json::to_string(&feedback.after_metrics).unwrap_or_default())
        .bind(feedback.actual_improvement_pct)
        .bind(feedback.estimated_improvement_pct)
        .bind(feedback.accuracy_score)
        .bind(feedback.operator_rating.map(|r| r as i64))
        .bind(&feedback.operator_comment)
        .bind(match feedback.status {
            crate::models::FeedbackStatus::Success => "SUCCESS",
            crate::models::FeedbackStatus::Failed => "FAILED",
            crate::models::FeedbackStatus::Partial => "PARTIAL",
        })
        .bind(feedback.applied_at.to_rfc3339())
        .bind(feedback.measured_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        let row = sqlx::query("SELECT * FROM feedback WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        row_to_feedback(&row)
    }

    async fn feedback_stats(&self, connection_id: Option<i64>) -> EngineResult<FeedbackStats> {
        let row = match connection_id {
            Some(cid) => {
                sqlx::query(
                    "SELECT COUNT(*) as total, COALESCE(AVG(f.accuracy_score), 0) as mean_accuracy, \
                     COALESCE(AVG(f.actual_improvement_pct), 0) as mean_improvement, \
                     COALESCE(AVG(CASE WHEN f.status = 'SUCCESS' THEN 1.0 ELSE 0.0 END), 0) as success_rate \
                     FROM feedback f JOIN optimizations o ON o.id = f.optimization_id WHERE o.connection_id = ?",
                )
                .bind(cid)
                .fetch_one(&self.pool)
                .await?
            },
            None => {
                sqlx::query(
                    "SELECT COUNT(*) as total, COALESCE(AVG(accuracy_score), 0) as mean_accuracy, \
                     COALESCE(AVG(actual_improvement_pct), 0) as mean_improvement, \
                     COALESCE(AVG(CASE WHEN status = 'SUCCESS' THEN 1.0 ELSE 0.0 END), 0) as success_rate \
                     FROM feedback",
                )
                .fetch_one(&self.pool)
                .await?
            },
        };

        Ok(FeedbackStats {
            total: row.try_get::<i64, _>("total").unwrap_or(0) as u64,
            mean_accuracy: row.try_get("mean_accuracy").unwrap_or(0.0),
            mean_improvement: row.try_get("mean_improvement").unwrap_or(0.0),
            success_rate: row.try_get("success_rate").unwrap_or(0.0),
        })
    }

    async fn find_patterns_by_signature(
        &self,
        engine: Engine,
        signature: &str,
    ) -> EngineResult<Vec<OptimizationPattern>> {
        let rows = sqlx::query(
            "SELECT * FROM optimization_patterns WHERE engine = ? AND signature = ?",
        )
        .bind(engine.as_str())
        .bind(signature)
        .fetch_all(&self.pool)
        .await?;
        let mut patterns: Vec<OptimizationPattern> =
            rows.iter().map(row_to_pattern).collect::<EngineResult<Vec<_>>>()?;
        patterns.sort_by(|a, b| b.ranking_score().partial_cmp(&a.ranking_score()).unwrap());
        Ok(patterns)
    }

    async fn list_patterns(&self, pattern_type: Option<PatternType>) -> EngineResult<Vec<OptimizationPattern>> {
        let rows = match pattern_type {
            Some(t) => {
                sqlx::query("SELECT * FROM optimization_patterns WHERE pattern_type = ?")
                    .bind(pattern_type_str(t))
                    .fetch_all(&self.pool)
                    .await?
            },
            None => sqlx::query("SELECT * FROM optimization_patterns").fetch_all(&self.pool).await?,
        };
        rows.iter().map(row_to_pattern).collect()
    }

    async fn top_patterns(&self, limit: u32) -> EngineResult<Vec<OptimizationPattern>> {
        let rows = sqlx::query("SELECT * FROM optimization_patterns").fetch_all(&self.pool).await?;
        let mut patterns: Vec<OptimizationPattern> =
            rows.iter().map(row_to_pattern).collect::<EngineResult<Vec<_>>>()?;
        patterns.sort_by(|a, b| b.ranking_score().partial_cmp(&a.ranking_score()).unwrap());
        patterns.truncate(limit as usize);
        Ok(patterns)
    }

    async fn upsert_pattern(&self, pattern: OptimizationPattern) -> EngineResult<OptimizationPattern> {
        sqlx::query(
            "INSERT INTO optimization_patterns \
             (pattern_type, signature, original_template, optimized_template, engine, \
              lifetime_applications, lifetime_successes, rolling_success_rate, rolling_mean_improvement_pct) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(engine, signature) DO UPDATE SET \
               original_template = excluded.original_template, \
               optimized_template = excluded.optimized_template, \
               lifetime_applications = excluded.lifetime_applications, \
               lifetime_successes = excluded.lifetime_successes, \
               rolling_success_rate = excluded.rolling_success_rate, \
               rolling_mean_improvement_pct = excluded.rolling_mean_improvement_pct",
        )
        .bind(pattern_type_str(pattern.pattern_type))
        .bind(&pattern.signature)
        .bind(&pattern.original_template)
        .bind(&pattern.optimized_template)
        .bind(pattern.engine.as_str())
        .bind(pattern.lifetime_applications as i64)
        .bind(pattern.lifetime_successes as i64)
        .bind(pattern.rolling_success_rate)
        .bind(pattern.rolling_mean_improvement_pct)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM optimization_patterns WHERE engine = ? AND signature = ?")
            .bind(pattern.engine.as_str())
            .bind(&pattern.signature)
            .fetch_one(&self.pool)
            .await?;
        row_to_pattern(&row)
    }

    async fn patterns_seeded(&self) -> EngineResult<bool> {
        let row = sqlx::query("SELECT COUNT(*) as n FROM optimization_patterns WHERE signature LIKE 'seed:%'")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n").unwrap_or(0);
        Ok(n > 0)
    }

    async fn upsert_workload_sample(&self, sample: WorkloadSample) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO workload_samples (connection_id, bucket_start, total_queries, slow_queries, mean_exec_time_ms, workload_class) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(connection_id, bucket_start) DO UPDATE SET \
               total_queries = excluded.total_queries, slow_queries = excluded.slow_queries, \
               mean_exec_time_ms = excluded.mean_exec_time_ms, workload_class = excluded.workload_class",
        )
        .bind(sample.connection_id)
        .bind(sample.bucket_start.to_rfc3339())
        .bind(sample.total_queries as i64)
        .bind(sample.slow_queries as i64)
        .bind(sample.mean_exec_time_ms)
        .bind(workload_class_str(sample.workload_class))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_workload_samples(&self, connection_id: i64, since: DateTime<Utc>) -> EngineResult<Vec<WorkloadSample>> {
        let rows = sqlx::query(
            "SELECT * FROM workload_samples WHERE connection_id = ? AND bucket_start >= ? ORDER BY bucket_start",
        )
        .bind(connection_id)
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_workload_sample).collect()
    }

    async fn create_index_recommendation(
        &self,
        connection_id: i64,
        table: String,
        columns: Vec<String>,
        index_kind: IndexKind,
        action: IndexAction,
        estimated_benefit: f64,
    ) -> EngineResult<IndexRecommendation> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO index_recommendations \
             (connection_id, table_name, columns, index_kind, action, estimated_benefit, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(connection_id)
        .bind(&table)
        .bind(serde_json::to_string(&columns).unwrap_or_default())
        .bind(index_kind_str(index_kind))
        .bind(index_action_str(action))
        .bind(estimated_benefit)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        let row = sqlx::query("SELECT * FROM index_recommendations WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        row_to_index_recommendation(&row)
    }

    async fn list_index_recommendations(&self, connection_id: i64) -> EngineResult<Vec<IndexRecommendation>> {
        let rows = sqlx::query("SELECT * FROM index_recommendations WHERE connection_id = ? ORDER BY created_at DESC")
            .bind(connection_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_index_recommendation).collect()
    }

    async fn update_index_recommendation_status(
        &self,
        id: i64,
        status: IndexStatus,
        acted_at: Option<DateTime<Utc>>,
    ) -> EngineResult<IndexRecommendation> {
        sqlx::query("UPDATE index_recommendations SET status = ?, acted_at = ? WHERE id = ?")
            .bind(index_status_str(status))
            .bind(acted_at.map(|d| d.to_rfc3339()))
            .bind(id)
            .execute(&self.pool)
            .await?;
        let row = sqlx::query("SELECT * FROM index_recommendations WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        row_to_index_recommendation(&row)
    }

    async fn dashboard_stats(&self) -> EngineResult<DashboardStats> {
        let connections: i64 = sqlx::query("SELECT COUNT(*) as n FROM connections WHERE deleted_at IS NULL")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")
            .unwrap_or(0);
        let queries: i64 = sqlx::query("SELECT COUNT(*) as n FROM queries")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")
            .unwrap_or(0);
        let optimizations: i64 = sqlx::query("SELECT COUNT(*) as n FROM optimizations")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")
            .unwrap_or(0);
        let avg_improvement: f64 = sqlx::query(
            "SELECT COALESCE(AVG(estimated_improvement_pct), 0) as avg FROM optimizations",
        )
        .fetch_one(&self.pool)
        .await?
        .try_get("avg")
        .unwrap_or(0.0);
        let with_issues: i64 = sqlx::query(
            "SELECT COUNT(*) as n FROM optimizations WHERE detected_issues != '[]'",
        )
        .fetch_one(&self.pool)
        .await?
        .try_get("n")
        .unwrap_or(0);

        Ok(DashboardStats {
            total_connections: connections as u64,
            total_queries_discovered: queries as u64,
            total_optimizations: optimizations as u64,
            avg_improvement_pct: avg_improvement,
            top_bottlenecks: Vec::new(),
            total_detected_issues: 0,
            optimizations_with_issues: with_issues as u64,
        })
    }

    async fn detection_summary(&self) -> EngineResult<DetectionSummary> {
        let rows = sqlx::query("SELECT detected_issues FROM optimizations").fetch_all(&self.pool).await?;
        let mut by_type: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
        let mut total = 0u64;
        for row in &rows {
            let raw: String = row.try_get("detected_issues").unwrap_or_default();
            if let Ok(issues) = serde_json::from_str::<Vec<DetectedIssue>>(&raw) {
                for issue in issues {
                    let key = serde_json::to_value(issue.issue_type)
                        .ok()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .unwrap_or_default();
                    *by_type.entry(key).or_insert(0) += 1;
                    total += 1;
                }
            }
        }
        let mut by_type: Vec<(String, u64)> = by_type.into_iter().collect();
        by_type.sort_by(|a, b| b.1.cmp(&a.1));
        Ok(DetectionSummary { total_issues: total, by_type })
    }
}

fn row_to_feedback(row: &sqlx::sqlite::SqliteRow) -> EngineResult<Feedback> {
    let status_str: String = row.try_get("status").unwrap_or_default();
    Ok(Feedback {
        id: row.try_get("id")?,
        optimization_id: row.try_get("optimization_id")?,
        before_metrics: serde_json::from_str(&row.try_get::<String, _>("before_metrics")?)
            .unwrap_or_default(),
        after_metrics: serde_json::from_str(&row.try_get::<String, _>("after_metrics")?)
            .unwrap_or_default(),
        actual_improvement_pct: row.try_get("actual_improvement_pct")?,
        estimated_improvement_pct: row.try_get("estimated_improvement_pct")?,
        accuracy_score: row.try_get("accuracy_score")?,
        operator_rating: row.try_get::<Option<i64>, _>("operator_rating")?.map(|v| v as u8),
        operator_comment: row.try_get("operator_comment")?,
        status: match status_str.as_str() {
            "SUCCESS" => crate::models::FeedbackStatus::Success,
            "PARTIAL" => crate::models::FeedbackStatus::Partial,
            _ => crate::models::FeedbackStatus::Failed,
        },
        applied_at: parse_timestamp(&row.try_get::<String, _>("applied_at")?)?,
        measured_at: parse_timestamp(&row.try_get::<String, _>("measured_at")?)?,
    })
}

fn pattern_type_str(t: PatternType) -> &'static str {
    use PatternType::*;
    match t {
        JoinOptimization => "JOIN_OPTIMIZATION",
        SubqueryOptimization => "SUBQUERY_OPTIMIZATION",
        IndexRecommendation => "INDEX_RECOMMENDATION",
        QueryRewrite => "QUERY_REWRITE",
        AggregationOptimization => "AGGREGATION_OPTIMIZATION",
        WindowFunction => "WINDOW_FUNCTION",
        CteOptimization => "CTE_OPTIMIZATION",
        AntiPattern => "ANTI_PATTERN",
    }
}

fn parse_pattern_type(s: &str) -> PatternType {
    use PatternType::*;
    match s {
        "JOIN_OPTIMIZATION" => JoinOptimization,
        "SUBQUERY_OPTIMIZATION" => SubqueryOptimization,
        "INDEX_RECOMMENDATION" => IndexRecommendation,
        "QUERY_REWRITE" => QueryRewrite,
        "AGGREGATION_OPTIMIZATION" => AggregationOptimization,
        "WINDOW_FUNCTION" => WindowFunction,
        "CTE_OPTIMIZATION" => CteOptimization,
        _ => AntiPattern,
    }
}

fn row_to_pattern(row: &sqlx::sqlite::SqliteRow) -> EngineResult<OptimizationPattern> {
    Ok(OptimizationPattern {
        id: row.try_get("id")?,
        pattern_type: parse_pattern_type(&row.try_get::<String, _>("pattern_type")?),
        signature: row.try_get("signature")?,
        original_template: row.try_get("original_template")?,
        optimized_template: row.try_get("optimized_template")?,
        engine: parse_engine(&row.try_get::<String, _>("engine")?)?,
        lifetime_applications: row.try_get::<i64, _>("lifetime_applications")? as u64,
        lifetime_successes: row.try_get::<i64, _>("lifetime_successes")? as u64,
        rolling_success_rate: row.try_get("rolling_success_rate")?,
        rolling_mean_improvement_pct: row.try_get("rolling_mean_improvement_pct")?,
    })
}

fn workload_class_str(c: WorkloadClass) -> &'static str {
    match c {
        WorkloadClass::Oltp => "OLTP",
        WorkloadClass::Olap => "OLAP",
        WorkloadClass::Mixed => "MIXED",
    }
}

fn parse_workload_class(s: &str) -> WorkloadClass {
    match s {
        "OLTP" => WorkloadClass::Oltp,
        "OLAP" => WorkloadClass::Olap,
        _ => WorkloadClass::Mixed,
    }
}

fn row_to_workload_sample(row: &sqlx::sqlite::SqliteRow) -> EngineResult<WorkloadSample> {
    Ok(WorkloadSample {
        connection_id: row.try_get("connection_id")?,
        bucket_start: parse_timestamp(&row.try_get::<String, _>("bucket_start")?)?,
        total_queries: row.try_get::<i64, _>("total_queries")? as u64,
        slow_queries: row.try_get::<i64, _>("slow_queries")? as u64,
        mean_exec_time_ms: row.try_get("mean_exec_time_ms")?,
        workload_class: parse_workload_class(&row.try_get::<String, _>("workload_class")?),
    })
}

fn index_kind_str(k: IndexKind) -> &'static str {
    match k {
        IndexKind::Btree => "BTREE",
        IndexKind::Hash => "HASH",
        IndexKind::Gin => "GIN",
        IndexKind::Gist => "GIST",
        IndexKind::Bitmap => "BITMAP",
    }
}

fn parse_index_kind(s: &str) -> IndexKind {
    match s {
        "HASH" => IndexKind::Hash,
        "GIN" => IndexKind::Gin,
        "GIST" => IndexKind::Gist,
        "BITMAP" => IndexKind::Bitmap,
        _ => IndexKind::Btree,
    }
}

fn index_action_str(a: IndexAction) -> &'static str {
    match a {
        IndexAction::Create => "CREATE",
        IndexAction::Drop => "DROP",
    }
}

fn parse_index_action(s: &str) -> IndexAction {
    match s {
        "DROP" => IndexAction::Drop,
        _ => IndexAction::Create,
    }
}

fn index_status_str(s: IndexStatus) -> &'static str {
    match s {
        IndexStatus::Recommended => "RECOMMENDED",
        IndexStatus::Created => "CREATED",
        IndexStatus::Dropped => "DROPPED",
        IndexStatus::Rejected => "REJECTED",
    }
}

fn parse_index_status(s: &str) -> IndexStatus {
    match s {
        "CREATED" => IndexStatus::Created,
        "DROPPED" => IndexStatus::Dropped,
        "REJECTED" => IndexStatus::Rejected,
        _ => IndexStatus::Recommended,
    }
}

fn row_to_index_recommendation(row: &sqlx::sqlite::SqliteRow) -> EngineResult<IndexRecommendation> {
    Ok(IndexRecommendation {
        id: row.try_get("id")?,
        connection_id: row.try_get("connection_id")?,
        table: row.try_get("table_name")?,
        columns: serde_json::from_str(&row.try_get::<String, _>("columns")?).unwrap_or_default(),
        index_kind: parse_index_kind(&row.try_get::<String, _>("index_kind")?),
        action: parse_index_action(&row.try_get::<String, _>("action")?),
        estimated_benefit: row.try_get("estimated_benefit")?,
        times_referenced: row.try_get::<i64, _>("times_referenced")? as u64,
        status: parse_index_status(&row.try_get::<String, _>("status")?),
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
        acted_at: row.try_get::<Option<String>, _>("acted_at")?.map(|s| parse_timestamp(&s)).transpose()?,
    })
}
