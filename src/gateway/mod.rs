//! Target DB Gateway (C2) — one capability set, four engine adapters (§4.2).
//!
//! Mirrors the teacher's `StarRocksClient` + `MySQLPoolManager` split: a
//! thin per-engine client holding a pooled connection, and a pool manager
//! keyed by connection identity that hands out bounded, cached pools.

pub mod mssql;
pub mod mysql;
pub mod oracle;
pub mod pg;
pub mod pool_manager;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::models::{DecryptedCredentials, Engine, QuerySample};
use crate::plan::Plan;

pub use pool_manager::GatewayPoolManager;

/// Outcome of `EngineGateway::test`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTest {
    pub ok: bool,
    pub latency_ms: f64,
    pub reason: Option<String>,
}

/// Result of one DDL/DML execution, with timing and (when the engine
/// exposes them) buffer statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    pub duration_ms: f64,
    pub buffer_hits: Option<i64>,
    pub buffer_reads: Option<i64>,
}

/// One index as reported by the engine's catalog, with usage counters
/// when the engine exposes them (used by `IndexRecommendation` upkeep).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub scans: Option<i64>,
}

/// Engine-specific adapter implementing the capability set spec.md §4.2
/// requires of every variant. One instance per engine type; connection
/// identity (which physical database) is threaded through via `credentials`
/// and pooled by `GatewayPoolManager`.
#[async_trait]
pub trait EngineGateway: Send + Sync {
    /// `connection_id` keys the adapter's internal pool cache; `creds` is
    /// used to build that pool on first use for this id.
    async fn test(&self, connection_id: i64, creds: &DecryptedCredentials) -> EngineResult<ConnectionTest>;

    /// DDL for every table named, concatenated; used to build the
    /// optimizer's prompt context (§4.5 step 1).
    async fn schema_ddl(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        tables: &[String],
    ) -> EngineResult<String>;

    /// Reads the engine's performance catalog. Returns `ErrCapability` if
    /// the view is disabled so the poller can mark the connection degraded.
    async fn top_queries(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        limit: u32,
    ) -> EngineResult<Vec<QuerySample>>;

    /// `analyze=true` must run inside a read-only transaction that is
    /// always rolled back, never committed.
    async fn explain(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        sql: &str,
        analyze: bool,
    ) -> EngineResult<Plan>;

    async fn execute_ddl(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        sql: &str,
    ) -> EngineResult<ExecResult>;

    /// Runs every statement in one transaction; rolled back when
    /// `read_only` regardless of outcome.
    async fn execute_in_tx(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        sqls: &[String],
        read_only: bool,
    ) -> EngineResult<Vec<ExecResult>>;

    async fn list_indexes(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>>;

    /// Whether the target table is currently held with a lock that would
    /// conflict with DDL (the applicator's active-lock safety gate, §4.6.1).
    async fn has_conflicting_lock(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        table: &str,
    ) -> EngineResult<bool>;
}

/// Dispatches to the right adapter by `Engine`. Every caller above the
/// gateway layer (optimizer, applicator, discovery, capability facade)
/// goes through this rather than holding a concrete adapter.
pub struct GatewayRegistry {
    adapters: HashMap<Engine, Arc<dyn EngineGateway>>,
}

impl GatewayRegistry {
    pub fn new(
        pg: Arc<dyn EngineGateway>,
        mysql: Arc<dyn EngineGateway>,
        mssql: Arc<dyn EngineGateway>,
        oracle: Arc<dyn EngineGateway>,
    ) -> Self {
        let mut adapters: HashMap<Engine, Arc<dyn EngineGateway>> = HashMap::new();
        adapters.insert(Engine::Pg, pg);
        adapters.insert(Engine::Mysql, mysql);
        adapters.insert(Engine::Mssql, mssql);
        adapters.insert(Engine::Oracle, oracle);
        Self { adapters }
    }

    pub fn get(&self, engine: Engine) -> EngineResult<&Arc<dyn EngineGateway>> {
        self.adapters
            .get(&engine)
            .ok_or_else(|| EngineError::fatal(format!("no gateway adapter registered for {engine}")))
    }
}
