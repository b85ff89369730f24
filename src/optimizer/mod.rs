//! Optimization Orchestrator (C5) — §4.5.
//!
//! Mirrors the teacher's `analyze_profile_with_context` pipeline (parse ->
//! rule engine -> suggestions -> score) but adds the I/O steps that engine
//! lives outside: capture a plan, run the detector suite, call out to a
//! `CompletionService`, then persist. The `CompletionService` contract
//! (§6.3) guarantees it never raises past this module — a failed or timed
//! out call still produces a `GENERATED` `Optimization` row, tagged
//! `failed_upstream`, rather than aborting the request.

pub mod estimate;
pub mod parsing;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::completion::{CompletionRequest, CompletionRole, CompletionService};
use crate::config::{DetectorConfig, OptimizerConfig};
use crate::detector::{self, DetectorContext, SchemaHints, WorkloadObservation};
use crate::error::{EngineError, EngineResult};
use crate::gateway::GatewayRegistry;
use crate::models::{
    Connection, DecryptedCredentials, Optimization, OptimizationPattern, ParsingStrategy,
    PerformanceMetrics,
};
use crate::normalize;
use crate::plan::{OperatorKind, Plan};
use crate::secrets::SecretStore;
use crate::store::{NewOptimization, ObservabilityStore};

const MAX_CANDIDATE_PATTERNS: usize = 3;
const TOP_QUERIES_SAMPLE_LIMIT: u32 = 500;
const MAX_SYNTHESIZED_OBSERVATIONS: i64 = 10_000;

pub struct Orchestrator {
    store: Arc<dyn ObservabilityStore>,
    gateways: Arc<GatewayRegistry>,
    completion: Arc<dyn CompletionService>,
    secrets: Arc<dyn SecretStore>,
    detector_config: DetectorConfig,
    optimizer_config: OptimizerConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn ObservabilityStore>,
        gateways: Arc<GatewayRegistry>,
        completion: Arc<dyn CompletionService>,
        secrets: Arc<dyn SecretStore>,
        detector_config: DetectorConfig,
        optimizer_config: OptimizerConfig,
    ) -> Self {
        Self { store, gateways, completion, secrets, detector_config, optimizer_config }
    }

    /// Runs the full pipeline for one SQL statement against `connection`
    /// and persists the result. `query_id` links back to the originating
    /// `DiscoveredQuery` when this came from the workload rather than an
    /// ad-hoc submission.
    pub async fn optimize(
        &self,
        connection: &Connection,
        sql: &str,
        query_id: Option<i64>,
    ) -> EngineResult<Optimization> {
        if sql.trim().is_empty() {
            return Err(EngineError::input("sql must not be blank"));
        }

        let gateway = self.gateways.get(connection.engine)?.clone();
        let password = self.secrets.decrypt(&connection.encrypted_password).await?;
        let creds = DecryptedCredentials {
            host: connection.host.clone(),
            port: connection.port,
            database: connection.database.clone(),
            username: connection.username.clone(),
            password,
        };

        let normalized_sql = normalize::normalize(sql);
        let fingerprint = normalize::fingerprint(&normalized_sql);

        // Step 1: capture the execution plan. `analyze=true` gives real
        // cardinalities for the cardinality-mismatch rules; fall back to
        // an estimate-only plan when the connection lacks EXPLAIN ANALYZE
        // privileges rather than failing the whole request.
        let mut plan = match gateway.explain(connection.id, &creds, sql, true).await {
            Ok(plan) => plan,
            Err(EngineError::Capability(_)) => gateway.explain(connection.id, &creds, sql, false).await?,
            Err(other) => return Err(other),
        };
        plan.root.annotate_hotspots();

        let tables = distinct_tables(&plan);

        // Step 2: schema DDL for prompt context. Best-effort — a locked-down
        // connection without catalog read access still gets a detection pass.
        let schema_ddl = match gateway.schema_ddl(connection.id, &creds, &tables).await {
            Ok(ddl) => ddl,
            Err(EngineError::Capability(_)) => String::new(),
            Err(other) => return Err(other),
        };

        let schema_hints = self.gather_schema_hints(gateway.as_ref(), connection, &creds, &tables, &plan).await;
        let recent_observations =
            self.recent_observations(gateway.as_ref(), connection, &creds, &fingerprint).await;

        // Step 3: run the pure detector suite.
        let detector_ctx = DetectorContext {
            plan: &plan.root,
            normalized_sql: &normalized_sql,
            engine: connection.engine,
            schema_hints: &schema_hints,
            config: &self.detector_config,
            recent_observations: &recent_observations,
        };
        let detection = detector::detect(&detector_ctx);

        // Step 4: candidate patterns, ranked, capped.
        let signature = normalize::pattern_signature(&normalized_sql);
        let mut candidate_patterns = self.store.find_patterns_by_signature(connection.engine, &signature).await?;
        candidate_patterns.sort_by(|a, b| b.ranking_score().partial_cmp(&a.ranking_score()).unwrap());
        candidate_patterns.truncate(MAX_CANDIDATE_PATTERNS);

        let plan_json = serde_json::to_value(&plan).map_err(|e| EngineError::fatal(format!("plan not serializable: {e}")))?;

        // Step 5: assemble the request and call out.
        let request = CompletionRequest {
            role: CompletionRole::Optimizer,
            engine: connection.engine.as_str().to_string(),
            sql: sql.to_string(),
            schema_ddl,
            plan_json: plan_json.clone(),
            detected_issues: detection.issues.clone(),
            candidate_patterns: candidate_patterns.clone(),
            soft_timeout: Duration::from_secs(self.optimizer_config.completion_soft_timeout_sec),
        };

        let hard_timeout = Duration::from_secs(self.optimizer_config.completion_hard_timeout_sec);
        let outcome = tokio::time::timeout(hard_timeout, self.completion.complete(request)).await;

        let (optimized_sql, explanation, estimated_improvement_pct, parsing_strategy) = match outcome {
            Ok(Ok(raw_response)) => {
                let (sql, strategy) = parsing::parse_response(&raw_response);
                let estimate = estimate::estimate_improvement_pct(&raw_response, &detection.issues);
                let explanation = extract_explanation(&raw_response, &sql);
                (sql, explanation, estimate, strategy)
            },
            Ok(Err(_)) | Err(_) => (
                String::new(),
                "the optimization service did not return a usable response".to_string(),
                0.0,
                ParsingStrategy::FailedUpstream,
            ),
        };

        let recommendations = detection.issues.iter().flat_map(|i| i.recommendations.clone()).collect();

        let new_opt = NewOptimization {
            connection_id: connection.id,
            query_id,
            original_sql: sql.to_string(),
            optimized_sql,
            explanation,
            recommendations,
            execution_plan: plan_json,
            estimated_improvement_pct,
            detected_issues: detection.issues,
            parsing_strategy,
        };

        self.store.create_optimization(new_opt).await
    }

    async fn gather_schema_hints(
        &self,
        gateway: &dyn crate::gateway::EngineGateway,
        connection: &Connection,
        creds: &DecryptedCredentials,
        tables: &[String],
        plan: &Plan,
    ) -> SchemaHints {
        let mut hints = SchemaHints::default();

        for table in tables {
            if let Ok(indexes) = gateway.list_indexes(connection.id, creds, table).await {
                hints.indexes.insert(table.clone(), indexes.into_iter().map(|idx| idx.columns).collect());
            }
        }

        // No catalog row-count call exists in the gateway contract; use
        // the plan's own scan estimate as a stand-in, keyed by relation.
        for node in plan.root.iter() {
            if matches!(node.op_type, OperatorKind::SeqScan | OperatorKind::IndexScan | OperatorKind::BitmapScan) {
                if let (Some(table), Some(rows)) = (&node.relation, node.rows.estimated) {
                    let entry = hints.table_row_counts.entry(table.clone()).or_insert(0);
                    *entry = (*entry).max(rows.max(0.0) as u64);
                }
            }
        }

        hints
    }

    /// Synthesizes a recent-observation window from `top_queries`: the
    /// call counter on the matching digest stands in for "how many times
    /// was this shape executed recently" since the gateway only exposes
    /// per-digest aggregates, not a raw event log.
    async fn recent_observations(
        &self,
        gateway: &dyn crate::gateway::EngineGateway,
        connection: &Connection,
        creds: &DecryptedCredentials,
        fingerprint: &str,
    ) -> Vec<WorkloadObservation> {
        let Ok(samples) = gateway.top_queries(connection.id, creds, TOP_QUERIES_SAMPLE_LIMIT).await else {
            return Vec::new();
        };
        let Some(sample) = samples.into_iter().find(|s| s.fingerprint == fingerprint) else {
            return Vec::new();
        };

        let avg_exec_ms = if sample.calls > 0 { sample.total_exec_time_ms / sample.calls as f64 } else { 0.0 };
        let metrics = PerformanceMetrics {
            execution_time_ms: Some(avg_exec_ms),
            rows_returned: Some(sample.rows),
            ..Default::default()
        };

        let count = sample.calls.clamp(0, MAX_SYNTHESIZED_OBSERVATIONS) as usize;
        (0..count).map(|_| WorkloadObservation { fingerprint: fingerprint.to_string(), metrics: metrics.clone() }).collect()
    }
}

fn distinct_tables(plan: &Plan) -> Vec<String> {
    let mut seen = HashMap::new();
    let mut tables = Vec::new();
    for node in plan.root.iter() {
        if let Some(table) = &node.relation
            && seen.insert(table.clone(), ()).is_none()
        {
            tables.push(table.clone());
        }
    }
    tables
}

/// Best-effort explanation: the response text with the extracted SQL
/// stripped out, trimmed to a reasonable length for storage/display.
fn extract_explanation(raw_response: &str, extracted_sql: &str) -> String {
    let without_sql = if extracted_sql.is_empty() { raw_response.to_string() } else { raw_response.replace(extracted_sql, "") };
    let trimmed = without_sql.trim();
    if trimmed.is_empty() {
        "no explanation provided".to_string()
    } else {
        trimmed.chars().take(2000).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::StaticCompletionService;
    use crate::gateway::{ConnectionTest, EngineGateway, ExecResult, GatewayRegistry, IndexInfo};
    use crate::models::{Engine, NewConnection, QuerySample};
    use crate::plan::{OperatorKind, PlanNode};
    use crate::secrets::AesGcmSecretStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StubGateway {
        plan: Plan,
    }

    #[async_trait]
    impl EngineGateway for StubGateway {
        async fn test(&self, _connection_id: i64, _creds: &DecryptedCredentials) -> EngineResult<ConnectionTest> {
            Ok(ConnectionTest { ok: true, latency_ms: 1.0, reason: None })
        }
        async fn schema_ddl(&self, _c: i64, _creds: &DecryptedCredentials, _tables: &[String]) -> EngineResult<String> {
            Ok("CREATE TABLE orders (id bigint, customer_id bigint)".to_string())
        }
        async fn top_queries(&self, _c: i64, _creds: &DecryptedCredentials, _limit: u32) -> EngineResult<Vec<QuerySample>> {
            Ok(vec![])
        }
        async fn explain(&self, _c: i64, _creds: &DecryptedCredentials, _sql: &str, _analyze: bool) -> EngineResult<Plan> {
            Ok(self.plan.clone())
        }
        async fn execute_ddl(&self, _c: i64, _creds: &DecryptedCredentials, _sql: &str) -> EngineResult<ExecResult> {
            Ok(ExecResult::default())
        }
        async fn execute_in_tx(
            &self,
            _c: i64,
            _creds: &DecryptedCredentials,
            _sqls: &[String],
            _read_only: bool,
        ) -> EngineResult<Vec<ExecResult>> {
            Ok(vec![])
        }
        async fn list_indexes(&self, _c: i64, _creds: &DecryptedCredentials, _table: &str) -> EngineResult<Vec<IndexInfo>> {
            Ok(vec![])
        }
        async fn has_conflicting_lock(&self, _c: i64, _creds: &DecryptedCredentials, _table: &str) -> EngineResult<bool> {
            Ok(false)
        }
    }

    struct InMemoryStore {
        created: Mutex<Vec<NewOptimization>>,
    }

    #[async_trait]
    impl ObservabilityStore for InMemoryStore {
        async fn create_connection(&self, _conn: NewConnection, _encrypted_password: Vec<u8>) -> EngineResult<Connection> {
            unimplemented!()
        }
        async fn get_connection(&self, _id: i64) -> EngineResult<Connection> {
            unimplemented!()
        }
        async fn list_connections(&self) -> EngineResult<Vec<Connection>> {
            Ok(vec![])
        }
        async fn list_monitoring_enabled_connections(&self) -> EngineResult<Vec<Connection>> {
            Ok(vec![])
        }
        async fn update_connection(&self, conn: Connection) -> EngineResult<Connection> {
            Ok(conn)
        }
        async fn delete_connection(&self, _id: i64) -> EngineResult<()> {
            Ok(())
        }
        async fn upsert_query(
            &self,
            _connection_id: i64,
            _sample: &QuerySample,
            _observed_at: chrono::DateTime<chrono::Utc>,
        ) -> EngineResult<(crate::models::DiscoveredQuery, crate::models::UpsertOutcome)> {
            unimplemented!()
        }
        async fn get_query(&self, _id: i64) -> EngineResult<crate::models::DiscoveredQuery> {
            unimplemented!()
        }
        async fn list_queries(&self, _connection_id: i64) -> EngineResult<Vec<crate::models::DiscoveredQuery>> {
            Ok(vec![])
        }
        async fn create_optimization(&self, opt: NewOptimization) -> EngineResult<Optimization> {
            let estimated = opt.estimated_improvement_pct;
            let strategy = opt.parsing_strategy;
            let optimized_sql = opt.optimized_sql.clone();
            let issues = opt.detected_issues.clone();
            self.created.lock().unwrap().push(opt);
            Ok(Optimization {
                id: 1,
                connection_id: 1,
                query_id: None,
                original_sql: String::new(),
                optimized_sql,
                explanation: String::new(),
                recommendations: vec![],
                execution_plan: serde_json::json!({}),
                estimated_improvement_pct: estimated,
                detected_issues: issues,
                validation_result: None,
                parsing_strategy: strategy,
                status: crate::models::OptimizationStatus::Generated,
                created_at: chrono::Utc::now(),
                applied_at: None,
            })
        }
        async fn get_optimization(&self, _id: i64) -> EngineResult<Optimization> {
            unimplemented!()
        }
        async fn list_optimizations(&self, _connection_id: Option<i64>) -> EngineResult<Vec<Optimization>> {
            Ok(vec![])
        }
        async fn transition_optimization(
            &self,
            _id: i64,
            _expected_current: crate::models::OptimizationStatus,
            _next: crate::models::OptimizationStatus,
            _applied_at: Option<chrono::DateTime<chrono::Utc>>,
            _validation_result: Option<crate::models::ValidationResult>,
        ) -> EngineResult<Optimization> {
            unimplemented!()
        }
        async fn create_applied_fix(&self, fix: crate::models::AppliedFix) -> EngineResult<crate::models::AppliedFix> {
            Ok(fix)
        }
        async fn get_applied_fix(&self, _id: i64) -> EngineResult<crate::models::AppliedFix> {
            unimplemented!()
        }
        async fn list_applied_fixes(&self, _optimization_id: i64) -> EngineResult<Vec<crate::models::AppliedFix>> {
            Ok(vec![])
        }
        async fn rollback_stack(&self, _connection_id: i64) -> EngineResult<Vec<crate::models::AppliedFix>> {
            Ok(vec![])
        }
        async fn mark_fix_reverted(
            &self,
            _fix_id: i64,
            _reverted_at: chrono::DateTime<chrono::Utc>,
        ) -> EngineResult<crate::models::AppliedFix> {
            unimplemented!()
        }
        async fn create_feedback(&self, feedback: crate::models::Feedback) -> EngineResult<crate::models::Feedback> {
            Ok(feedback)
        }
        async fn feedback_stats(&self, _connection_id: Option<i64>) -> EngineResult<crate::models::FeedbackStats> {
            Ok(crate::models::FeedbackStats::default())
        }
        async fn find_patterns_by_signature(&self, _engine: Engine, _signature: &str) -> EngineResult<Vec<OptimizationPattern>> {
            Ok(vec![])
        }
        async fn list_patterns(&self, _pattern_type: Option<crate::models::PatternType>) -> EngineResult<Vec<OptimizationPattern>> {
            Ok(vec![])
        }
        async fn top_patterns(&self, _limit: u32) -> EngineResult<Vec<OptimizationPattern>> {
            Ok(vec![])
        }
        async fn upsert_pattern(&self, pattern: OptimizationPattern) -> EngineResult<OptimizationPattern> {
            Ok(pattern)
        }
        async fn patterns_seeded(&self) -> EngineResult<bool> {
            Ok(true)
        }
        async fn upsert_workload_sample(&self, _sample: crate::models::WorkloadSample) -> EngineResult<()> {
            Ok(())
        }
        async fn list_workload_samples(
            &self,
            _connection_id: i64,
            _since: chrono::DateTime<chrono::Utc>,
        ) -> EngineResult<Vec<crate::models::WorkloadSample>> {
            Ok(vec![])
        }
        async fn create_index_recommendation(
            &self,
            _connection_id: i64,
            _table: String,
            _columns: Vec<String>,
            _index_kind: crate::models::IndexKind,
            _action: crate::models::IndexAction,
            _estimated_benefit: f64,
        ) -> EngineResult<crate::models::IndexRecommendation> {
            unimplemented!()
        }
        async fn list_index_recommendations(&self, _connection_id: i64) -> EngineResult<Vec<crate::models::IndexRecommendation>> {
            Ok(vec![])
        }
        async fn update_index_recommendation_status(
            &self,
            _id: i64,
            _status: crate::models::IndexStatus,
            _acted_at: Option<chrono::DateTime<chrono::Utc>>,
        ) -> EngineResult<crate::models::IndexRecommendation> {
            unimplemented!()
        }
        async fn dashboard_stats(&self) -> EngineResult<crate::store::DashboardStats> {
            Ok(crate::store::DashboardStats::default())
        }
        async fn detection_summary(&self) -> EngineResult<crate::store::DetectionSummary> {
            Ok(crate::store::DetectionSummary::default())
        }
    }

    fn seq_scan_plan() -> Plan {
        let mut scan = PlanNode::new(OperatorKind::SeqScan);
        scan.relation = Some("orders".to_string());
        scan.rows.estimated = Some(500_000.0);
        scan.rows.actual = Some(500_000.0);
        scan.extra.insert("Filter".to_string(), serde_json::json!("customer_id = ?"));
        Plan { root: scan, engine_native: serde_json::json!({}), analyzed: true }
    }

    fn test_connection() -> Connection {
        Connection {
            id: 1,
            display_name: "test".to_string(),
            engine: Engine::Pg,
            host: "localhost".to_string(),
            port: 5432,
            database: "db".to_string(),
            username: "user".to_string(),
            encrypted_password: vec![],
            monitoring_enabled: true,
            created_at: chrono::Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn end_to_end_produces_a_persisted_optimization() {
        let secrets = Arc::new(AesGcmSecretStore::generate_ephemeral());
        let encrypted = secrets.encrypt("password123").await.unwrap();
        let mut connection = test_connection();
        connection.encrypted_password = encrypted;

        let stub: Arc<dyn EngineGateway> = Arc::new(StubGateway { plan: seq_scan_plan() });
        let gateways = Arc::new(GatewayRegistry::new(stub.clone(), stub.clone(), stub.clone(), stub));
        let completion = Arc::new(StaticCompletionService {
            response: "<SQL>SELECT id FROM orders WHERE customer_id = ?</SQL> expect a 45% improvement".to_string(),
        });
        let store = Arc::new(InMemoryStore { created: Mutex::new(vec![]) });

        let orchestrator = Orchestrator::new(
            store,
            gateways,
            completion,
            secrets,
            DetectorConfig::default(),
            OptimizerConfig::default(),
        );

        let result = orchestrator.optimize(&connection, "SELECT * FROM orders WHERE customer_id = 1", None).await.unwrap();
        assert_eq!(result.estimated_improvement_pct, 45.0);
        assert!(!result.detected_issues.is_empty());
    }

    #[tokio::test]
    async fn upstream_failure_falls_back_to_failed_upstream() {
        let secrets = Arc::new(AesGcmSecretStore::generate_ephemeral());
        let encrypted = secrets.encrypt("password123").await.unwrap();
        let mut connection = test_connection();
        connection.encrypted_password = encrypted;

        let stub: Arc<dyn EngineGateway> = Arc::new(StubGateway { plan: seq_scan_plan() });
        let gateways = Arc::new(GatewayRegistry::new(stub.clone(), stub.clone(), stub.clone(), stub));
        let completion = Arc::new(crate::completion::FailingCompletionService);
        let store = Arc::new(InMemoryStore { created: Mutex::new(vec![]) });

        let mut config = OptimizerConfig::default();
        config.completion_soft_timeout_sec = 0;
        config.completion_hard_timeout_sec = 1;

        let orchestrator = Orchestrator::new(store, gateways, completion, secrets, DetectorConfig::default(), config);

        let result = orchestrator.optimize(&connection, "SELECT * FROM orders", None).await.unwrap();
        assert!(matches!(result.parsing_strategy, ParsingStrategy::FailedUpstream));
        assert_eq!(result.estimated_improvement_pct, 0.0);
    }
}
