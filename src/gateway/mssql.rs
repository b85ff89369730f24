//! SQL Server adapter: `sys.dm_exec_query_stats` joined to
//! `sys.dm_exec_sql_text` for workload reads, `sys.dm_exec_query_plan`'s
//! showplan XML converted into the flat operator-id/parent-id JSON shape
//! `plan::map_oracle_plan` already understands (both engines expose a flat
//! table rather than PG/MySQL's nested tree).

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::error::{EngineError, EngineResult};
use crate::gateway::{ConnectionTest, EngineGateway, ExecResult, GatewayPoolManager, IndexInfo};
use crate::models::{DecryptedCredentials, QuerySample};
use crate::plan::{map_oracle_plan, Plan};

type MssqlConn = tokio::sync::Mutex<Client<Compat<TcpStream>>>;

pub struct MssqlGateway {
    pools: GatewayPoolManager<MssqlConn>,
}

impl MssqlGateway {
    pub fn new() -> Self {
        Self { pools: GatewayPoolManager::new() }
    }

    async fn build_client(creds: &DecryptedCredentials) -> EngineResult<MssqlConn> {
        let mut config = Config::new();
        config.host(&creds.host);
        config.port(creds.port);
        config.database(&creds.database);
        config.authentication(AuthMethod::sql_server(&creds.username, &creds.password));
        config.trust_cert();

        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| EngineError::unavailable(format!("tcp connect failed: {e}")))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| EngineError::unavailable(format!("tds handshake failed: {e}")))?;
        Ok(tokio::sync::Mutex::new(client))
    }

    async fn conn(&self, connection_id: i64, creds: &DecryptedCredentials) -> EngineResult<Arc<MssqlConn>> {
        self.pools.get_or_build(connection_id, || Self::build_client(creds)).await
    }
}

#[async_trait]
impl EngineGateway for MssqlGateway {
    async fn test(&self, connection_id: i64, creds: &DecryptedCredentials) -> EngineResult<ConnectionTest> {
        let start = Instant::now();
        match self.conn(connection_id, creds).await {
            Ok(conn) => {
                let mut client = conn.lock().await;
                match client.simple_query("SELECT 1").await {
                    Ok(_) => Ok(ConnectionTest { ok: true, latency_ms: start.elapsed().as_secs_f64() * 1000.0, reason: None }),
                    Err(e) => Ok(ConnectionTest { ok: false, latency_ms: 0.0, reason: Some(e.to_string()) }),
                }
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
        let conn = self.conn(connection_id, creds).await?;
        let mut client = conn.lock().await;
        let mut ddl = String::new();
        for table in tables {
            let rows = client
                .query(
                    "SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE FROM INFORMATION_SCHEMA.COLUMNS \
                     WHERE TABLE_NAME = @P1 ORDER BY ORDINAL_POSITION",
                    &[table],
                )
                .await?
                .into_first_result()
                .await?;

            ddl.push_str(&format!("CREATE TABLE {table} (\n"));
            for (i, row) in rows.iter().enumerate() {
                let name: &str = row.get("COLUMN_NAME").unwrap_or_default();
                let data_type: &str = row.get("DATA_TYPE").unwrap_or_default();
                let nullable: &str = row.get("IS_NULLABLE").unwrap_or_default();
                let comma = if i + 1 < rows.len() { "," } else { "" };
                ddl.push_str(&format!("  {name} {data_type}{}{comma}\n", if nullable == "NO" { " NOT NULL" } else { "" }));
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
        let conn = self.conn(connection_id, creds).await?;
        let mut client = conn.lock().await;
        let rows = client
            .query(
                "SELECT TOP (@P1) t.text AS sql_text, s.execution_count, \
                 s.total_worker_time / 1000.0 AS total_ms, s.total_rows, \
                 CONVERT(VARCHAR(32), s.query_hash, 2) AS query_hash \
                 FROM sys.dm_exec_query_stats s \
                 CROSS APPLY sys.dm_exec_sql_text(s.sql_handle) t \
                 WHERE t.text IS NOT NULL ORDER BY s.total_worker_time DESC",
                &[&(limit as i32)],
            )
            .await
            .map_err(|e| {
                if e.to_string().contains("dm_exec_query_stats") {
                    EngineError::capability("dm_exec_query_stats requires VIEW SERVER STATE permission")
                } else {
                    EngineError::from(e)
                }
            })?
            .into_first_result()
            .await?;

        rows.iter()
            .map(|row| {
                let raw_sql: &str = row.get("sql_text").unwrap_or_default();
                let normalized = crate::normalize::normalize(raw_sql);
                Ok(QuerySample {
                    fingerprint: crate::normalize::fingerprint(&normalized),
                    raw_sql: raw_sql.to_string(),
                    calls: row.get::<i32, _>("execution_count").unwrap_or(0) as i64,
                    total_exec_time_ms: row.get::<f64, _>("total_ms").unwrap_or(0.0),
                    rows: row.get::<i64, _>("total_rows").unwrap_or(0),
                    engine_query_id: row.get::<&str, _>("query_hash").map(str::to_string),
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
        let conn = self.conn(connection_id, creds).await?;
        let mut client = conn.lock().await;

        client.simple_query("SET SHOWPLAN_XML ON").await?;
        let plan_rows = client.simple_query(sql).await?.into_first_result().await;
        client.simple_query("SET SHOWPLAN_XML OFF").await?;
        let rows = plan_rows?;

        let xml: &str = rows.first().and_then(|r| r.get(0)).unwrap_or_default();
        let json = showplan_xml_to_flat_json(xml)?;
        Ok(Plan { root: map_oracle_plan(&json), engine_native: json, analyzed: analyze })
    }

    async fn execute_ddl(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        sql: &str,
    ) -> EngineResult<ExecResult> {
        let conn = self.conn(connection_id, creds).await?;
        let mut client = conn.lock().await;
        let start = Instant::now();
        let result = client.execute(sql, &[]).await?;
        Ok(ExecResult {
            rows_affected: result.rows_affected().iter().sum(),
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
        let conn = self.conn(connection_id, creds).await?;
        let mut client = conn.lock().await;
        client.simple_query("BEGIN TRANSACTION").await?;

        let mut results = Vec::with_capacity(sqls.len());
        let mut failed = false;
        for sql in sqls {
            let start = Instant::now();
            match client.execute(sql.as_str(), &[]).await {
                Ok(result) => results.push(ExecResult {
                    rows_affected: result.rows_affected().iter().sum(),
                    duration_ms: start.elapsed().as_secs_f64() * 1000.0,
                    buffer_hits: None,
                    buffer_reads: None,
                }),
                Err(e) => {
                    failed = true;
                    client.simple_query("ROLLBACK TRANSACTION").await.ok();
                    return Err(EngineError::from(e));
                },
            }
        }

        if read_only || failed {
            client.simple_query("ROLLBACK TRANSACTION").await?;
        } else {
            client.simple_query("COMMIT TRANSACTION").await?;
        }
        Ok(results)
    }

    async fn list_indexes(
        &self,
        connection_id: i64,
        creds: &DecryptedCredentials,
        table: &str,
    ) -> EngineResult<Vec<IndexInfo>> {
        let conn = self.conn(connection_id, creds).await?;
        let mut client = conn.lock().await;
        let rows = client
            .query(
                "SELECT i.name AS index_name, i.is_unique, \
                 STRING_AGG(c.name, ',') WITHIN GROUP (ORDER BY ic.key_ordinal) AS columns, \
                 s.user_seeks + s.user_scans AS scans \
                 FROM sys.indexes i \
                 JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id \
                 JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id \
                 JOIN sys.tables t ON t.object_id = i.object_id \
                 LEFT JOIN sys.dm_db_index_usage_stats s ON s.object_id = i.object_id AND s.index_id = i.index_id \
                 WHERE t.name = @P1 AND i.name IS NOT NULL \
                 GROUP BY i.name, i.is_unique, s.user_seeks, s.user_scans",
                &[table],
            )
            .await?
            .into_first_result()
            .await?;

        rows.iter()
            .map(|row| {
                let columns: &str = row.get("columns").unwrap_or_default();
                Ok(IndexInfo {
                    name: row.get::<&str, _>("index_name").unwrap_or_default().to_string(),
                    table: table.to_string(),
                    columns: columns.split(',').map(str::to_string).collect(),
                    is_unique: row.get("is_unique").unwrap_or(false),
                    scans: row.get::<i32, _>("scans").map(|n| n as i64),
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
        let conn = self.conn(connection_id, creds).await?;
        let mut client = conn.lock().await;
        let rows = client
            .query(
                "SELECT COUNT(*) AS n FROM sys.dm_tran_locks l \
                 JOIN sys.tables t ON t.object_id = l.resource_associated_entity_id \
                 WHERE t.name = @P1 AND l.request_mode IN ('X', 'IX') AND l.request_status = 'GRANT'",
                &[table],
            )
            .await?
            .into_first_result()
            .await?;
        let n: i32 = rows.first().and_then(|r| r.get("n")).unwrap_or(0);
        Ok(n > 0)
    }
}

/// Converts a `SET SHOWPLAN_XML` result into the flat `{rows: [{id,
/// parent_id, operation, options, ...}]}` shape `map_oracle_plan` expects.
/// SQL Server's showplan nests `<RelOp>` elements rather than listing a
/// parent id, so this walks the XML tree assigning synthetic ids as it goes.
fn showplan_xml_to_flat_json(xml: &str) -> EngineResult<serde_json::Value> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| EngineError::fatal(format!("malformed showplan XML: {e}")))?;
    let mut rows = Vec::new();
    let mut next_id = 0i64;

    fn walk(node: roxmltree::Node, parent_id: Option<i64>, next_id: &mut i64, rows: &mut Vec<serde_json::Value>) {
        if node.tag_name().name() == "RelOp" {
            let id = *next_id;
            *next_id += 1;
            let physical_op = node.attribute("PhysicalOp").unwrap_or("Unknown");
            let est_rows = node.attribute("EstimateRows").and_then(|s| s.parse::<f64>().ok());
            let est_cost = node.attribute("EstimatedTotalSubtreeCost").and_then(|s| s.parse::<f64>().ok());
            let object_name = node
                .descendants()
                .find(|n| n.tag_name().name() == "Object")
                .and_then(|n| n.attribute("Table"))
                .map(str::to_string);

            let mut row = serde_json::Map::new();
            row.insert("id".into(), serde_json::json!(id));
            if let Some(p) = parent_id {
                row.insert("parent_id".into(), serde_json::json!(p));
            }
            let (operation, options) = classify_physical_op(physical_op);
            row.insert("operation".into(), serde_json::json!(operation));
            row.insert("options".into(), serde_json::json!(options));
            row.insert("object_name".into(), serde_json::json!(object_name));
            row.insert("cardinality".into(), serde_json::json!(est_rows));
            row.insert("cost".into(), serde_json::json!(est_cost));
            rows.push(serde_json::Value::Object(row));

            for child in node.children() {
                walk(child, Some(id), next_id, rows);
            }
        } else {
            for child in node.children() {
                walk(child, parent_id, next_id, rows);
            }
        }
    }

    walk(doc.root(), None, &mut next_id, &mut rows);
    Ok(serde_json::json!({ "rows": rows }))
}

fn classify_physical_op(op: &str) -> (&'static str, &'static str) {
    match op {
        "Table Scan" => ("TABLE ACCESS", "FULL"),
        "Clustered Index Scan" => ("TABLE ACCESS", "FULL"),
        "Index Scan" => ("INDEX", "FULL SCAN"),
        "Index Seek" | "Clustered Index Seek" => ("INDEX", "RANGE SCAN"),
        "Nested Loops" => ("NESTED LOOPS", ""),
        "Hash Match" => ("HASH JOIN", ""),
        "Merge Join" => ("MERGE JOIN", ""),
        "Sort" => ("SORT", ""),
        "Stream Aggregate" | "Hash Match Aggregate" => ("HASH", "GROUP BY"),
        "Top" => ("COUNT", "STOPKEY"),
        "Filter" => ("FILTER", ""),
        _ => ("UNKNOWN", ""),
    }
}
