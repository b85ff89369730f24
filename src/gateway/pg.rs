//! PostgreSQL adapter: `pg_stat_statements` for workload reads, native
//! `EXPLAIN (FORMAT JSON, ANALYZE ...)` for plan capture.

use std::time::Instant;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::{EngineError, EngineResult};
use crate::gateway::{ConnectionTest, EngineGateway, ExecResult, GatewayPoolManager, IndexInfo};
use crate::models::{DecryptedCredentials, QuerySample};
use crate::plan::{map_pg_plan, Plan};

pub struct PgGateway {
    pools: GatewayPoolManager<PgPool>,
    pool_size: u32,
}

impl PgGateway {
    pub fn new(pool_size: u32) -> Self {
        Self { pools: GatewayPoolManager::new(), pool_size }
    }

    fn connection_url(creds: &DecryptedCredentials) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            creds.username, creds.password, creds.host, creds.port, creds.database
        )
    }

    async fn pool(&self, connection_id: i64, creds: &DecryptedCredentials) -> EngineResult<std::sync::Arc<PgPool>> {
        let pool_size = self.pool_size;
        let url = Self::connection_url(creds);
        self.pools
            .get_or_build(connection_id, || async move {
                PgPoolOptions::new()
                    .max_connections(pool_size)
                    .connect(&url)
                    .await
                    .map_err(EngineError::from)
            })
            .await
    }
}

#[async_trait]
impl EngineGateway for PgGateway {
    async fn test(&self, connection_id: i64, creds: &DecryptedCredentials) -> EngineResult<ConnectionTest> {
        let start = Instant::now();
        match self.pool(connection_id, creds).await {
            Ok(pool) => match sqlx::query("SELECT 1").fetch_one(pool.as_ref()).await {
                Ok(_) => {
                    self.pools.record_health_check(connection_id, true, std::time::Duration::from_secs(0));
                    Ok(ConnectionTest { ok: true, latency_ms: start.elapsed().as_secs_f64() * 1000.0, reason: None })
                },
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
            let rows = sqlx::query(
                "SELECT column_name, data_type, is_nullable \
                 FROM information_schema.columns WHERE table_name = $1 ORDER BY ordinal_position",
            )
            .bind(table)
            .fetch_all(pool.as_ref())
            .await?;

            ddl.push_str(&format!("CREATE TABLE {table} (\n"));
            for (i, row) in rows.iter().enumerate() {
                let name: String = row.try_get("column_name")?;
                let data_type: String = row.try_get("data_type")?;
                let nullable: String = row.try_get("is_nullable")?;
                let comma = if i + 1 < rows.len() { "," } else { "" };
                ddl.push_str(&format!(
                    "  {name} {data_type}{}{comma}\n",
                    if nullable == "NO" { " NOT NULL" } else { "" }
                ));
            }
            ddl.push_str(");\n\n");
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
            "SELECT query, calls, total_exec_time, rows, queryid \
             FROM pg_stat_statements ORDER BY total_exec_time DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(pool.as_ref())
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.message().contains("pg_stat_statements") => {
                EngineError::capability("pg_stat_statements is not enabled on this connection")
            },
            _ => EngineError::from(e),
        })?;

        let samples = rows
            .iter()
            .map(|row| {
                let raw_sql: String = row.try_get("query")?;
                let normalized = crate::normalize::normalize(&raw_sql);
                Ok(QuerySample {
                    fingerprint: crate::normalize::fingerprint(&normalized),
                    raw_sql,
                    calls: row.try_get("calls")?,
                    total_exec_time_ms: row.try_get("total_exec_time")?,
                    rows: row.try_get("rows")?,
                    engine_query_id: row.try_get::<Option<i64>, _>("queryid")?.map(|id| id.to_string()),
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(samples)
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
        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;

        let explain_sql =
            if analyze { format!("EXPLAIN (FORMAT JSON, ANALYZE true) {sql}") } else { format!("EXPLAIN (FORMAT JSON) {sql}") };

        let result = sqlx::query(&explain_sql).fetch_one(&mut *tx).await;
        tx.rollback().await.ok();

        let row = result?;
        let json_text: String = row.try_get(0)?;
        let json: serde_json::Value = serde_json::from_str(&json_text)
            .map_err(|e| EngineError::fatal(format!("malformed EXPLAIN output: {e}")))?;

        Ok(Plan { root: map_pg_plan(&json), engine_native: json, analyzed: analyze })
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
            sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
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
            "SELECT i.relname AS index_name, ix.indisunique, \
             array_to_string(array_agg(a.attname ORDER BY a.attnum), ',') AS columns, \
             s.idx_scan \
             FROM pg_index ix \
             JOIN pg_class t ON t.oid = ix.indrelid \
             JOIN pg_class i ON i.oid = ix.indexrelid \
             JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(ix.indkey) \
             LEFT JOIN pg_stat_user_indexes s ON s.indexrelid = i.oid \
             WHERE t.relname = $1 \
             GROUP BY i.relname, ix.indisunique, s.idx_scan",
        )
        .bind(table)
        .fetch_all(pool.as_ref())
        .await?;

        rows.iter()
            .map(|row| {
                let columns: String = row.try_get("columns")?;
                Ok(IndexInfo {
                    name: row.try_get("index_name")?,
                    table: table.to_string(),
                    columns: columns.split(',').map(str::to_string).collect(),
                    is_unique: row.try_get("indisunique")?,
                    scans: row.try_get("idx_scan")?,
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
            "SELECT count(*) AS n FROM pg_locks l \
             JOIN pg_class c ON c.oid = l.relation \
             WHERE c.relname = $1 AND l.mode IN ('AccessExclusiveLock', 'ExclusiveLock') AND l.granted",
        )
        .bind(table)
        .fetch_one(pool.as_ref())
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n > 0)
    }
}
