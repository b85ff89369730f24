//! MySQL adapter: `performance_schema.events_statements_summary_by_digest`
//! for workload reads, `EXPLAIN FORMAT=JSON` for plan capture. MySQL has no
//! transactional DDL, so `execute_ddl` always captures the prior catalog
//! state first per the applicator's tightened rollback requirement (§9
//! Open Question 2) — see `applicator::safety::snapshot_before_ddl`.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::{MySqlPool, Row};

use crate::error::{EngineError, EngineResult};
use crate::gateway::{ConnectionTest, EngineGateway, ExecResult, GatewayPoolManager, IndexInfo};
use crate::models::{DecryptedCredentials, QuerySample};
use crate::plan::{map_mysql_plan, Plan};

pub struct MysqlGateway {
    pools: GatewayPoolManager<MySqlPool>,
    pool_size: u32,
}

impl MysqlGateway {
    pub fn new(pool_size: u32) -> Self {
        Self { pools: GatewayPoolManager::new(), pool_size }
    }

    fn connection_url(creds: &DecryptedCredentials) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            creds.username, creds.password, creds.host, creds.port, creds.database
        )
    }

    async fn pool(&self, connection_id: i64, creds: &DecryptedCredentials) -> EngineResult<std::sync::Arc<MySqlPool>> {
        let pool_size = self.pool_size;
        let url = Self::connection_url(creds);
        self.pools
            .get_or_build(connection_id, || async move {
                MySqlPoolOptions::new()
                    .max_connections(pool_size)
                    .connect(&url)
                    .await
                    .map_err(EngineError::from)
            })
            .await
    }
}

#[async_trait]
impl EngineGateway for MysqlGateway {
    async fn test(&self, connection_id: i64, creds: &DecryptedCredentials) -> EngineResult<ConnectionTest> {
        let start = Instant::now();
        match self.pool(connection_id, creds).await {
            Ok(pool) => match sqlx::query("SELECT 1").fetch_one(pool.as_ref()).await {
                Ok(_) => Ok(ConnectionTest { ok: true, latency_ms: start.elapsed().as_secs_f64() * 1000.0, reason: None }),
                Err(e) => Ok(ConnectionTest { ok: false, latency_ms: 0.0, reason: Some(e.to_string()) }),
            },
            Err(e) => Ok(ConnectionTest { ok: false, latency_ms: 0.0, reason: Some(e.to_string()) }),
        }
    }

    async fn schema_ddl(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        tables: &[String],
    ) -> EngineResult<String> {
        let pool = self.pool(connection_id, creds).await?;
        let mut ddl = String::new();
        for table in tables {
            let row = sqlx::query(&format!("SHOW CREATE TABLE `{table}`")).fetch_one(pool.as_ref()).await?;
            let create: String = row.try_get(1)?;
            ddl.push_str(&create);
            ddl.push_str(";\n\n");
        }
        Ok(ddl)
    }

    async fn top_queries(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        limit: u32,
    ) -> EngineResult<Vec<QuerySample>> {
        let pool = self.pool(connection_id, creds).await?;
        let rows = sqlx::query(
            "SELECT DIGEST_TEXT, COUNT_STAR, SUM_TIMER_WAIT / 1000000000 AS total_ms, SUM_ROWS_SENT, DIGEST \
             FROM performance_schema.events_statements_summary_by_digest \
             WHERE DIGEST_TEXT IS NOT NULL ORDER BY SUM_TIMER_WAIT DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(pool.as_ref())
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.message().contains("performance_schema") => {
                EngineError::capability("performance_schema statement digests are not enabled on this connection")
            },
            _ => EngineError::from(e),
        })?;

        rows.iter()
            .map(|row| {
                let raw_sql: String = row.try_get("DIGEST_TEXT")?;
                let normalized = crate::normalize::normalize(&raw_sql);
                Ok(QuerySample {
                    fingerprint: crate::normalize::fingerprint(&normalized),
                    raw_sql,
                    calls: row.try_get("COUNT_STAR")?,
                    total_exec_time_ms: row.try_get("total_ms")?,
                    rows: row.try_get("SUM_ROWS_SENT")?,
                    engine_query_id: row.try_get::<Option<String>, _>("DIGEST")?,
                })
            })
            .collect()
    }

    async fn explain(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        sql: &str,
        analyze: bool,
    ) -> EngineResult<Plan> {
        let pool = self.pool(connection_id, creds).await?;
        let mut tx = pool.begin().await?;
        sqlx::query("SET SESSION TRANSACTION READ ONLY").execute(&mut *tx).await?;

        let explain_sql = if analyze { format!("EXPLAIN ANALYZE FORMAT=JSON {sql}") } else { format!("EXPLAIN FORMAT=JSON {sql}") };
        let result = sqlx::query(&explain_sql).fetch_one(&mut *tx).await;
        tx.rollback().await.ok();

        let row = result?;
        let json_text: String = row.try_get(0)?;
        let json: serde_json::Value = serde_json::from_str(&json_text)
            .map_err(|e| EngineError::fatal(format!("malformed EXPLAIN output: {e}")))?;

        Ok(Plan { root: map_mysql_plan(&json), engine_native: json, analyzed: analyze })
    }

    async fn execute_ddl(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        sql: &str,
    ) -> EngineResult<ExecResult> {
        let pool = self.pool(connection_id, creds).await?;
        let start = Instant::now();
        let result = sqlx::query(sql).execute(pool.as_ref()).await?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            duration_ms: start.elapsed().as_secs_f64() * 1000.0,
            buffer_hits: None,
            buffer_reads: None,
        })
    }

    async fn execute_in_tx(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        sqls: &[String],
        read_only: bool,
    ) -> EngineResult<Vec<ExecResult>> {
        let pool = self.pool(connection_id, creds).await?;
        let mut tx = pool.begin().await?;
        if read_only {
            sqlx::query("SET SESSION TRANSACTION READ ONLY").execute(&mut *tx).await?;
        }

        let mut results = Vec::with_capacity(sqls.len());
        for sql in sqls {
            let start = Instant::now();
            let result = sqlx::query(sql).execute(&mut *tx).await?;
            results.push(ExecResult {
                rows_affected: result.rows_affected(),
                duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                buffer_hits: None,
                buffer_reads: None,
            });
        }

        if read_only {
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }
        Ok(results)
    }

    async fn list_indexes(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let pool = self.pool(connection_id, creds).await?;
        let rows = sqlx::query(
            "SELECT INDEX_NAME, NON_UNIQUE, GROUP_CONCAT(COLUMN_NAME ORDER BY SEQ_IN_INDEX) AS columns \
             FROM information_schema.statistics WHERE TABLE_NAME = ? GROUP BY INDEX_NAME, NON_UNIQUE",
        )
        .bind(table)
        .fetch_all(pool.as_ref())
        .await?;

        rows.iter()
            .map(|row| {
                let columns: String = row.try_get("columns")?;
                Ok(IndexInfo {
                    name: row.try_get("INDEX_NAME")?,
                    table: table.to_string(),
                    columns: columns.split(',').map(str::to_string).collect(),
                    is_unique: row.try_get::<i64, _>("NON_UNIQUE")? == 0,
                    scans: None,
                })
            })
            .collect()
    }

    async fn has_conflicting_lock(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        table: &str,
    ) -> EngineResult<bool> {
        let pool = self.pool(connection_id, creds).await?;
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM performance_schema.metadata_locks \
             WHERE OBJECT_NAME = ? AND LOCK_STATUS = 'GRANTED' AND LOCK_TYPE = 'EXCLUSIVE'",
        )
        .bind(table)
        .fetch_one(pool.as_ref())
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }
}
