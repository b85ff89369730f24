//! Observability Store (C1) — durable, transactional storage of every
//! entity in the data model. Exposes only repository operations, never
//! raw query strings, to callers (§4.1).
//!
//! Mirrors the teacher's choice of SQLite as the backing driver behind a
//! single repository interface: one trait, one driver, migrations applied
//! at process start (Design Notes §9).

mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use sqlite::SqliteStore;

use crate::error::EngineResult;
use crate::models::{
    AppliedFix, Connection, DetectedIssue, Engine, Feedback, FeedbackStats, IndexAction,
    IndexKind, IndexRecommendation, IndexStatus, NewConnection, Optimization,
    OptimizationPattern, OptimizationStatus, ParsingStrategy, PatternType, QuerySample,
    UpsertOutcome, ValidationResult, WorkloadSample,
};

#[derive(Debug, Clone, Default)]
pub struct DashboardStats {
    pub total_connections: u64,
    pub total_queries_discovered: u64,
    pub total_optimizations: u64,
    pub avg_improvement_pct: f64,
    pub top_bottlenecks: Vec<String>,
    pub total_detected_issues: u64,
    pub optimizations_with_issues: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionSummary {
    pub total_issues: u64,
    pub by_type: Vec<(String, u64)>,
}

pub struct NewOptimization {
    pub connection_id: i64,
    pub query_id: Option<i64>,
    pub original_sql: String,
    pub optimized_sql: String,
    pub explanation: String,
    pub recommendations: Vec<String>,
    pub execution_plan: serde_json::Value,
    pub estimated_improvement_pct: f64,
    pub detected_issues: Vec<DetectedIssue>,
    pub parsing_strategy: ParsingStrategy,
}

#[async_trait]
pub trait ObservabilityStore: Send + Sync {
    // -- Connections --------------------------------------------------
    async fn create_connection(&self, conn: NewConnection, encrypted_password: Vec<u8>)
    -> EngineResult<Connection>;
    async fn get_connection(&self, id: i64) -> EngineResult<Connection>;
    async fn list_connections(&self) -> EngineResult<Vec<Connection>>;
    async fn list_monitoring_enabled_connections(&self) -> EngineResult<Vec<Connection>>;
    async fn update_connection(&self, conn: Connection) -> EngineResult<Connection>;
    /// Soft-deletes the connection and, in the same transaction, hard-
    /// deletes all dependent rows (§3 "Ownership & lifecycle summary").
    async fn delete_connection(&self, id: i64) -> EngineResult<()>;

    // -- Discovered queries --------------------------------------------
    /// Atomic insert-or-update preserving monotonic counter semantics; on
    /// reset detection (new total < stored total) rebaselines and records
    /// the event (§4.1, DESIGN.md Open Question 1).
    async fn upsert_query(
        &self,
        connection_id: i64,
        sample: &QuerySample,
        observed_at: DateTime<Utc>,
    ) -> EngineResult<(crate::models::DiscoveredQuery, UpsertOutcome)>;
    async fn get_query(&self, id: i64) -> EngineResult<crate::models::DiscoveredQuery>;
    async fn list_queries(&self, connection_id: i64) -> EngineResult<Vec<crate::models::DiscoveredQuery>>;

    // -- Optimizations --------------------------------------------------
    async fn create_optimization(&self, opt: NewOptimization) -> EngineResult<Optimization>;
    async fn get_optimization(&self, id: i64) -> EngineResult<Optimization>;
    async fn list_optimizations(&self, connection_id: Option<i64>) -> EngineResult<Vec<Optimization>>;
    /// Enforces the state machine (§4.6.4) with a conditional update so
    /// two concurrent transitions out of the same state race safely:
    /// exactly one succeeds, the other gets `ErrConflict`.
    async fn transition_optimization(
        &self,
        id: i64,
        expected_current: OptimizationStatus,
        next: OptimizationStatus,
        applied_at: Option<DateTime<Utc>>,
        validation_result: Option<ValidationResult>,
    ) -> EngineResult<Optimization>;

    // -- Applied fixes ----------------------------------------------------
    async fn create_applied_fix(&self, fix: AppliedFix) -> EngineResult<AppliedFix>;
    async fn get_applied_fix(&self, id: i64) -> EngineResult<AppliedFix>;
    async fn list_applied_fixes(&self, optimization_id: i64) -> EngineResult<Vec<AppliedFix>>;
    /// The connection's rollback stack, most-recently-applied first.
    async fn rollback_stack(&self, connection_id: i64) -> EngineResult<Vec<AppliedFix>>;
    async fn mark_fix_reverted(&self, fix_id: i64, reverted_at: DateTime<Utc>) -> EngineResult<AppliedFix>;

    // -- Feedback ---------------------------------------------------------
    async fn create_feedback(&self, feedback: Feedback) -> EngineResult<Feedback>;
    async fn feedback_stats(&self, connection_id: Option<i64>) -> EngineResult<FeedbackStats>;

    // -- Patterns -----------------------------------------------------------
    async fn find_patterns_by_signature(
        &self,
        engine: Engine,
        signature: &str,
    ) -> EngineResult<Vec<OptimizationPattern>>;
    async fn list_patterns(&self, pattern_type: Option<PatternType>) -> EngineResult<Vec<OptimizationPattern>>;
    async fn top_patterns(&self, limit: u32) -> EngineResult<Vec<OptimizationPattern>>;
    async fn upsert_pattern(&self, pattern: OptimizationPattern) -> EngineResult<OptimizationPattern>;
    /// Idempotent: calling this twice leaves the library identical (§8).
    async fn patterns_seeded(&self) -> EngineResult<bool>;

    // -- Workload samples -----------------------------------------------------
    async fn upsert_workload_sample(&self, sample: WorkloadSample) -> EngineResult<()>;
    async fn list_workload_samples(&self, connection_id: i64, since: DateTime<Utc>) -> EngineResult<Vec<WorkloadSample>>;

    // -- Index recommendations --------------------------------------------------
    async fn create_index_recommendation(
        &self,
        connection_id: i64,
        table: String,
        columns: Vec<String>,
        index_kind: IndexKind,
        action: IndexAction,
        estimated_benefit: f64,
    ) -> EngineResult<IndexRecommendation>;
    async fn list_index_recommendations(&self, connection_id: i64) -> EngineResult<Vec<IndexRecommendation>>;
    async fn update_index_recommendation_status(
        &self,
        id: i64,
        status: IndexStatus,
        acted_at: Option<DateTime<Utc>>,
    ) -> EngineResult<IndexRecommendation>;

    // -- Dashboard ---------------------------------------------------------------
    async fn dashboard_stats(&self) -> EngineResult<DashboardStats>;
    async fn detection_summary(&self) -> EngineResult<DetectionSummary>;
}
