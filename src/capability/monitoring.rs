//! `Monitoring.*` (§6.1) — a thin read/control surface over the
//! discovery scheduler; this module holds no state of its own.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::Discovery;
use crate::error::EngineResult;
use crate::store::ObservabilityStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringStatus {
    pub running: bool,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub next_poll_time: Option<DateTime<Utc>>,
    pub queries_discovered_lifetime: u64,
    pub active_connections: u64,
}

pub struct MonitoringApi {
    store: Arc<dyn ObservabilityStore>,
    discovery: Arc<Discovery>,
}

impl MonitoringApi {
    pub fn new(store: Arc<dyn ObservabilityStore>, discovery: Arc<Discovery>) -> Self {
        Self { store, discovery }
    }

    pub async fn status(&self) -> EngineResult<MonitoringStatus> {
        let stats = self.store.dashboard_stats().await?;
        let active_connections = self.store.list_monitoring_enabled_connections().await?.len() as u64;
        Ok(MonitoringStatus {
            running: self.discovery.is_running(),
            last_poll_time: self.discovery.last_poll_time(),
            next_poll_time: self.discovery.next_poll_time(),
            queries_discovered_lifetime: stats.total_queries_discovered,
            active_connections,
        })
    }

    pub fn start(&self) {
        self.discovery.resume();
    }

    pub fn stop(&self) {
        self.discovery.pause();
    }

    /// Runs one poll synchronously for `connection_id`, or every
    /// monitoring-enabled connection when `None`.
    pub async fn trigger(&self, connection_id: Option<i64>) -> EngineResult<()> {
        self.discovery.trigger(connection_id).await
    }
}
