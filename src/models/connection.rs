use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target database engines the gateway knows how to speak to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum Engine {
    Pg,
    Mysql,
    Mssql,
    Oracle,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Pg => "PG",
            Engine::Mysql => "MYSQL",
            Engine::Mssql => "MSSQL",
            Engine::Oracle => "ORACLE",
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A target database the system monitors.
///
/// `(engine, host, port, database, username)` is unique among non-deleted
/// rows — enforced by a partial unique index in the store, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: i64,
    pub display_name: String,
    pub engine: Engine,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Opaque ciphertext. Decryptable only via `SecretStore::decrypt`.
    pub encrypted_password: Vec<u8>,
    pub monitoring_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Connection {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Plaintext credentials for a single connection attempt. Callers must not
/// persist this value; it exists only for the lifetime of a gateway call.
pub struct DecryptedCredentials {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

/// Input to `Connection.create`, prior to a successful connectivity test.
pub struct NewConnection {
    pub display_name: String,
    pub engine: Engine,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub monitoring_enabled: bool,
}
