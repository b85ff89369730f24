use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One logically distinct query observed on a connection, identified by
/// `(connection_id, fingerprint)`.
///
/// Counters are monotonic across polls unless the source resets them —
/// see `ObservabilityStore::upsert_query`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredQuery {
    pub id: i64,
    pub connection_id: i64,
    pub fingerprint: String,
    pub raw_sql: String,
    pub normalized_sql: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub lifetime_calls: i64,
    pub lifetime_total_exec_time_ms: f64,
    pub lifetime_rows: i64,
    /// Opaque engine-reported identifier (e.g. PG `queryid`). Stored but
    /// never interpreted by the core.
    pub engine_query_id: Option<String>,
}

impl DiscoveredQuery {
    pub fn avg_exec_time_ms(&self) -> f64 {
        if self.lifetime_calls == 0 {
            0.0
        } else {
            self.lifetime_total_exec_time_ms / self.lifetime_calls as f64
        }
    }

    pub fn avg_rows(&self) -> f64 {
        if self.lifetime_calls == 0 { 0.0 } else { self.lifetime_rows as f64 / self.lifetime_calls as f64 }
    }
}

/// A single polled sample for one query, as reported by the gateway's
/// `top_queries` call. Mirrors `PerformanceMetrics` but always carries
/// calls/rows since it comes straight off a performance catalog row.
#[derive(Debug, Clone)]
pub struct QuerySample {
    pub fingerprint: String,
    pub raw_sql: String,
    pub calls: i64,
    pub total_exec_time_ms: f64,
    pub rows: i64,
    pub engine_query_id: Option<String>,
}

/// Outcome of one `upsert_query` call, distinguishing a fresh lifetime
/// from ordinary monotonic growth. Used by the scheduler to record a
/// reset event (end-to-end scenario 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// `new_total < stored_total`; the baseline was rebaselined from the
    /// current sample per the Open Question decision in DESIGN.md.
    Reset,
}
