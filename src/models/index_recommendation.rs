use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexKind {
    Btree,
    Hash,
    Gin,
    Gist,
    Bitmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexAction {
    Create,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexStatus {
    Recommended,
    Created,
    Dropped,
    Rejected,
}

/// An index a query plan suggests should exist or be dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecommendation {
    pub id: i64,
    pub connection_id: i64,
    pub table: String,
    pub columns: Vec<String>,
    pub index_kind: IndexKind,
    pub action: IndexAction,
    pub estimated_benefit: f64,
    pub times_referenced: u64,
    pub status: IndexStatus,
    pub created_at: DateTime<Utc>,
    pub acted_at: Option<DateTime<Utc>>,
}
