//! Per-connection bounded pool cache, modeled on the teacher's
//! `MySQLPoolManager`: a `DashMap` keyed by connection id handing out
//! `Arc<Pool>` values, built lazily and reused across polls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::error::{EngineError, EngineResult};

/// Tracks consecutive health-check failures per connection so the
/// scheduler can quarantine a connection for its poll interval after
/// three consecutive failures (§4.2).
#[derive(Debug, Clone, Copy)]
struct Health {
    consecutive_failures: u32,
    quarantined_until: Option<Instant>,
}

impl Default for Health {
    fn default() -> Self {
        Self { consecutive_failures: 0, quarantined_until: None }
    }
}

/// Caches one pooled handle of type `P` per connection id, plus health
/// state for the quarantine policy. `build` is invoked at most once per
/// connection id until the entry is evicted.
pub struct GatewayPoolManager<P> {
    pools: DashMap<i64, Arc<P>>,
    health: DashMap<i64, Health>,
}

impl<P> Default for GatewayPoolManager<P> {
    fn default() -> Self {
        Self { pools: DashMap::new(), health: DashMap::new() }
    }
}

impl<P> GatewayPoolManager<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached pool for `connection_id`, building it with
    /// `build` on first use.
    pub async fn get_or_build<F, Fut>(&self, connection_id: i64, build: F) -> EngineResult<Arc<P>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = EngineResult<P>>,
    {
        if let Some(pool) = self.pools.get(&connection_id) {
            return Ok(pool.clone());
        }
        let pool = Arc::new(build().await?);
        self.pools.insert(connection_id, pool.clone());
        Ok(pool)
    }

    pub fn evict(&self, connection_id: i64) {
        self.pools.remove(&connection_id);
    }

    /// Whether `connection_id` is currently quarantined.
    pub fn is_quarantined(&self, connection_id: i64) -> bool {
        self.health
            .get(&connection_id)
            .map(|h| h.quarantined_until.is_some_and(|until| Instant::now() < until))
            .unwrap_or(false)
    }

    /// Records a health-check outcome; quarantines for `poll_interval`
    /// once three consecutive failures are observed.
    pub fn record_health_check(&self, connection_id: i64, ok: bool, poll_interval: Duration) {
        let mut entry = self.health.entry(connection_id).or_default();
        if ok {
            entry.consecutive_failures = 0;
            entry.quarantined_until = None;
        } else {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= 3 {
                entry.quarantined_until = Some(Instant::now() + poll_interval);
            }
        }
    }

    pub fn assert_not_quarantined(&self, connection_id: i64) -> EngineResult<()> {
        if self.is_quarantined(connection_id) {
            Err(EngineError::unavailable(format!("connection {connection_id} is quarantined")))
        } else {
            Ok(())
        }
    }
}
