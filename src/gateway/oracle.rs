//! Oracle adapter: `V$SQLAREA` for workload reads, `DBMS_XPLAN` via
//! `V$SQL_PLAN` for plan capture. The `oracle` crate is synchronous, so
//! every call is dispatched through `tokio::task::spawn_blocking`.

use std::time::Instant;

use async_trait::async_trait;
use oracle::Connection as OraConnection;

use crate::error::{EngineError, EngineResult};
use crate::gateway::{ConnectionTest, EngineGateway, ExecResult, GatewayPoolManager, IndexInfo};
use crate::models::{DecryptedCredentials, QuerySample};
use crate::plan::{map_oracle_plan, Plan};

pub struct OracleGateway {
    pools: GatewayPoolManager<OraConnection>,
}

impl OracleGateway {
    pub fn new() -> Self {
        Self { pools: GatewayPoolManager::new() }
    }

    fn connect_string(creds: &DecryptedCredentials) -> String {
        format!("{}:{}/{}", creds.host, creds.port, creds.database)
    }

    async fn build_connection(creds: DecryptedCredentials) -> EngineResult<OraConnection> {
        tokio::task::spawn_blocking(move || {
            OraConnection::connect(&creds.username, &creds.password, &Self::connect_string(&creds))
                .map_err(|e| EngineError::unavailable(format!("oracle connect failed: {e}")))
        })
        .await
        .map_err(|e| EngineError::fatal(format!("blocking task panicked: {e}")))?
    }

    async fn conn(&self, connection_id: i64, creds: &DecryptedCredentials) -> EngineResult<std::sync::Arc<OraConnection>> {
        let owned = DecryptedCredentials {
            host: creds.host.clone(),
            port: creds.port,
            database: creds.database.clone(),
            username: creds.username.clone(),
            password: creds.password.clone(),
        };
        self.pools.get_or_build(connection_id, || Self::build_connection(owned)).await
    }

    /// Runs a blocking closure against the cached connection off the async
    /// runtime's worker threads.
    async fn with_conn<F, T>(&self, connection_id: i64, creds: &DecryptedCredentials, f: F) -> EngineResult<T>
    where
        F: FnOnce(&OraConnection) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn(connection_id, creds).await?;
        tokio::task::spawn_blocking(move || f(&conn))
            .await
            .map_err(|e| EngineError::fatal(format!("blocking task panicked: {e}")))?
    }
}

#[async_trait]
impl EngineGateway for OracleGateway {
    async fn test(&self, connection_id: i64, creds: &DecryptedCredentials) -> EngineResult<ConnectionTest> {
        let start = Instant::now();
        let result = self
            .with_conn(connection_id, creds, |conn| {
                conn.query_row("SELECT 1 FROM DUAL", &[]).map_err(|e| EngineError::unavailable(e.to_string()))?;
                Ok(())
            })
            .await;

        match result {
            Ok(()) => Ok(ConnectionTest { ok: true, latency_ms: start.elapsed().as_secs_f64() * 1000.0, reason: None }),
            Err(e) => Ok(ConnectionTest { ok: false, latency_ms: 0.0, reason: Some(e.to_string()) }),
        }
    }

    async fn schema_ddl(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        tables: &[String],
    ) -> EngineResult<String> {
        let tables = tables.to_vec();
        self.with_conn(connection_id, creds, move |conn| {
            let mut ddl = String::new();
            for table in &tables {
                let rows = conn
                    .query(
                        "SELECT column_name, data_type, nullable FROM user_tab_columns \
                         WHERE table_name = UPPER(:1) ORDER BY column_id",
                        &[table],
                    )
                    .map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;

                ddl.push_str(&format!("CREATE TABLE {table} (\n"));
                let mut cols = Vec::new();
                for row in rows {
                    let row = row.map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
                    let name: String = row.get(0).map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
                    let data_type: String = row.get(1).map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
                    let nullable: String = row.get(2).map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
                    cols.push(format!("  {name} {data_type}{}", if nullable == "N" { " NOT NULL" } else { "" }));
                }
                ddl.push_str(&cols.join(",\n"));
                ddl.push_str("\n);\n\n");
            }
            Ok(ddl)
        })
        .await
    }

    async fn top_queries(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        limit: u32,
    ) -> EngineResult<Vec<QuerySample>> {
        self.with_conn(connection_id, creds, move |conn| {
            let rows = conn
                .query(
                    "SELECT * FROM (SELECT sql_fulltext, executions, elapsed_time / 1000 AS total_ms, \
                     rows_processed, sql_id FROM v$sqlarea ORDER BY elapsed_time DESC) WHERE ROWNUM <= :1",
                    &[&(limit as i32)],
                )
                .map_err(|e| {
                    if e.to_string().contains("V$SQLAREA") || e.to_string().contains("insufficient privileges") {
                        EngineError::capability("V$SQLAREA requires the SELECT_CATALOG_ROLE privilege")
                    } else {
                        EngineError::from(anyhow::anyhow!(e))
                    }
                })?;

            let mut samples = Vec::new();
            for row in rows {
                let row = row.map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
                let raw_sql: String = row.get(0).unwrap_or_default();
                let normalized = crate::normalize::normalize(&raw_sql);
                samples.push(QuerySample {
                    fingerprint: crate::normalize::fingerprint(&normalized),
                    raw_sql,
                    calls: row.get(1).unwrap_or(0),
                    total_exec_time_ms: row.get(2).unwrap_or(0.0),
                    rows: row.get(3).unwrap_or(0),
                    engine_query_id: row.get(4).ok(),
                });
            }
            Ok(samples)
        })
        .await
    }

    async fn explain(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        sql: &str,
        analyze: bool,
    ) -> EngineResult<Plan> {
        let sql = sql.to_string();
        let json = self
            .with_conn(connection_id, creds, move |conn| {
                let statement_id = uuid::Uuid::new_v4().to_string();
                let explain_sql = format!("EXPLAIN PLAN SET STATEMENT_ID = '{statement_id}' FOR {sql}");
                conn.execute(&explain_sql, &[]).map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;

                let rows = conn
                    .query(
                        "SELECT id, parent_id, operation, options, object_name, cost, cardinality \
                         FROM plan_table WHERE statement_id = :1 ORDER BY id",
                        &[&statement_id],
                    )
                    .map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;

                let mut out = Vec::new();
                for row in rows {
                    let row = row.map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
                    let id: i64 = row.get(0).unwrap_or(0);
                    let parent_id: Option<i64> = row.get(1).ok();
                    out.push(serde_json::json!({
                        "id": id,
                        "parent_id": parent_id,
                        "operation": row.get::<_, String>(2).unwrap_or_default(),
                        "options": row.get::<_, String>(3).unwrap_or_default(),
                        "object_name": row.get::<_, Option<String>>(4).unwrap_or(None),
                        "cost": row.get::<_, Option<f64>>(5).unwrap_or(None),
                        "cardinality": row.get::<_, Option<f64>>(6).unwrap_or(None),
                    }));
                }

                conn.execute("DELETE FROM plan_table WHERE statement_id = :1", &[&statement_id]).ok();
                conn.rollback().ok();
                Ok(serde_json::json!({ "rows": out }))
            })
            .await?;

        Ok(Plan { root: map_oracle_plan(&json), engine_native: json, analyzed: analyze })
    }

    async fn execute_ddl(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        sql: &str,
    ) -> EngineResult<ExecResult> {
        let sql = sql.to_string();
        self.with_conn(connection_id, creds, move |conn| {
            let start = Instant::now();
            conn.execute(&sql, &[]).map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
            conn.commit().map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
            Ok(ExecResult {
                rows_affected: conn.row_count().unwrap_or(0),
                duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                buffer_hits: None,
                buffer_reads: None,
            })
        })
        .await
    }

    async fn execute_in_tx(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        sqls: &[String],
        read_only: bool,
    ) -> EngineResult<Vec<ExecResult>> {
        let sqls = sqls.to_vec();
        self.with_conn(connection_id, creds, move |conn| {
            let mut results = Vec::with_capacity(sqls.len());
            for sql in &sqls {
                let start = Instant::now();
                match conn.execute(sql, &[]) {
                    Ok(_) => results.push(ExecResult {
                        rows_affected: conn.row_count().unwrap_or(0),
                        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                        buffer_hits: None,
                        buffer_reads: None,
                    }),
                    Err(e) => {
                        conn.rollback().ok();
                        return Err(EngineError::from(anyhow::anyhow!(e)));
                    },
                }
            }

            if read_only {
                conn.rollback().map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
            } else {
                conn.commit().map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
            }
            Ok(results)
        })
        .await
    }

    async fn list_indexes(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let table = table.to_string();
        self.with_conn(connection_id, creds, move |conn| {
            let rows = conn
                .query(
                    "SELECT ui.index_name, ui.uniqueness, \
                     LISTAGG(uic.column_name, ',') WITHIN GROUP (ORDER BY uic.column_position) AS cols \
                     FROM user_indexes ui JOIN user_ind_columns uic ON uic.index_name = ui.index_name \
                     WHERE ui.table_name = UPPER(:1) GROUP BY ui.index_name, ui.uniqueness",
                    &[&table],
                )
                .map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;

            let mut out = Vec::new();
            for row in rows {
                let row = row.map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
                let columns: String = row.get(2).unwrap_or_default();
                let uniqueness: String = row.get(1).unwrap_or_default();
                out.push(IndexInfo {
                    name: row.get(0).unwrap_or_default(),
                    table: table.clone(),
                    columns: columns.split(',').map(str::to_string).collect(),
                    is_unique: uniqueness == "UNIQUE",
                    scans: None,
                });
            }
            Ok(out)
        })
        .await
    }

    async fn has_conflicting_lock(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        table: &str,
    ) -> EngineResult<bool> {
        let table = table.to_string();
        self.with_conn(connection_id, creds, move |conn| {
            let count: i64 = conn
                .query_row_as(
                    "SELECT COUNT(*) FROM v$locked_object lo \
                     JOIN user_objects o ON o.object_id = lo.object_id \
                     WHERE o.object_name = UPPER(:1) AND lo.locked_mode IN (3, 6)",
                    &[&table],
                )
                .map_err(|e| EngineError::from(anyhow::anyhow!(e)))?;
            Ok(count > 0)
        })
        .await
    }
}
