//! Discovery Scheduler (C3) — §5 concurrency model.
//!
//! A scheduler fiber built on the rebuilt `ScheduledExecutor` enqueues one
//! `PollJob` per monitoring-enabled connection; a fixed worker pool
//! drains the bounded `JobQueue`, each worker owning one gateway session
//! per job, same as the teacher's single-fiber-per-job baseline task.

pub mod job_queue;
pub mod scheduled_executor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};

use crate::config::DiscoveryConfig;
use crate::error::{EngineError, EngineResult};
use crate::gateway::GatewayRegistry;
use crate::models::{DecryptedCredentials, UpsertOutcome, WorkloadSample, SLOW_QUERY_THRESHOLD_MS};
use crate::secrets::SecretStore;
use crate::store::ObservabilityStore;
use job_queue::{JobQueue, PollJob};
use scheduled_executor::{ScheduledExecutor, ScheduledTask};

const QUEUE_CAPACITY: usize = 256;
const MAX_WORKERS: usize = 8;

pub struct Discovery {
    store: Arc<dyn ObservabilityStore>,
    gateways: Arc<GatewayRegistry>,
    secrets: Arc<dyn SecretStore>,
    config: DiscoveryConfig,
    queue: Arc<JobQueue>,
    shutdown: Arc<AtomicBool>,
    /// Flipped by `Monitoring.stop()`/`.start()`; the scheduler fiber
    /// keeps ticking but skips enqueuing while paused, so resuming needs
    /// no respawn.
    paused: AtomicBool,
    last_poll: Mutex<Option<DateTime<Utc>>>,
}

impl Discovery {
    pub fn new(
        store: Arc<dyn ObservabilityStore>,
        gateways: Arc<GatewayRegistry>,
        secrets: Arc<dyn SecretStore>,
        config: DiscoveryConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            gateways,
            secrets,
            config,
            queue: Arc::new(JobQueue::new(QUEUE_CAPACITY)),
            shutdown: Arc::new(AtomicBool::new(false)),
            paused: AtomicBool::new(false),
            last_poll: Mutex::new(None),
        })
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// `Monitoring.stop()`.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    /// `Monitoring.start()`.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        !self.paused.load(Ordering::Relaxed) && !self.shutdown.load(Ordering::Relaxed)
    }

    pub fn last_poll_time(&self) -> Option<DateTime<Utc>> {
        *self.last_poll.lock().expect("last_poll mutex poisoned")
    }

    pub fn next_poll_time(&self) -> Option<DateTime<Utc>> {
        self.last_poll_time().map(|t| t + chrono::Duration::seconds(self.config.interval_seconds as i64))
    }

    /// `Monitoring.trigger(connection_id?)`: runs one poll synchronously,
    /// bypassing the queue entirely, for one connection or for all
    /// monitoring-enabled connections.
    pub async fn trigger(&self, connection_id: Option<i64>) -> EngineResult<()> {
        let result = match connection_id {
            Some(id) => self.poll_connection(id).await,
            None => {
                let connections = self.store.list_monitoring_enabled_connections().await?;
                let mut result = Ok(());
                for connection in connections {
                    result = self.poll_connection(connection.id).await;
                    if result.is_err() {
                        break;
                    }
                }
                result
            },
        };
        *self.last_poll.lock().expect("last_poll mutex poisoned") = Some(Utc::now());
        result
    }

    /// Spawns the scheduler fiber and `min(cpu_count, 8)` worker fibers.
    pub fn spawn(self: &Arc<Self>) {
        let worker_count = num_cpus::get().clamp(1, MAX_WORKERS);
        for _ in 0..worker_count {
            let this = self.clone();
            tokio::spawn(async move { this.run_worker().await });
        }

        let interval = Duration::from_secs(self.config.interval_seconds);
        let executor = ScheduledExecutor::new("discovery-scheduler", interval);
        let this = self.clone();
        tokio::spawn(async move { executor.start(SchedulerAdapter { discovery: this }).await });
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }
            let job = self.queue.pop().await;
            if let Err(e) = self.poll_connection(job.connection_id).await {
                tracing::warn!(connection_id = job.connection_id, error = %e, "discovery poll failed");
            }
        }
    }

    async fn enqueue_all(&self) -> EngineResult<()> {
        if self.paused.load(Ordering::Relaxed) {
            return Ok(());
        }
        let connections = self.store.list_monitoring_enabled_connections().await?;
        for connection in connections {
            if let Some(dropped) = self.queue.push(PollJob { connection_id: connection.id }).await {
                tracing::warn!(
                    connection_id = dropped.connection_id,
                    "discovery queue at capacity; dropped oldest poll job, connection considered degraded this cycle"
                );
            }
        }
        *self.last_poll.lock().expect("last_poll mutex poisoned") = Some(Utc::now());
        Ok(())
    }

    /// One poll of one connection: pulls `top_queries`, upserts each
    /// sample, then rolls the batch up into one hourly `WorkloadSample`.
    pub async fn poll_connection(&self, connection_id: i64) -> EngineResult<()> {
        let connection = self.store.get_connection(connection_id).await?;
        let gateway = self.gateways.get(connection.engine)?.clone();
        let password = self.secrets.decrypt(&connection.encrypted_password).await?;
        let creds = DecryptedCredentials {
            host: connection.host.clone(),
            port: connection.port,
            database: connection.database.clone(),
            username: connection.username.clone(),
            password,
        };

        let samples = match gateway.top_queries(connection.id, &creds, self.config.max_queries_per_poll).await {
            Ok(samples) => samples,
            Err(EngineError::Capability(reason)) => {
                tracing::warn!(connection_id, reason = %reason, "connection degraded: performance view unavailable");
                return Ok(());
            },
            Err(other) => return Err(other),
        };

        let observed_at = Utc::now();
        let mut total_queries: u64 = 0;
        let mut slow_queries: u64 = 0;
        let mut total_calls: i64 = 0;
        let mut total_exec_time_ms: f64 = 0.0;

        // Sequential on purpose: writes for one connection's poll must be
        // serialized (§5 ordering guarantees).
        for sample in &samples {
            let (_, outcome) = self.store.upsert_query(connection.id, sample, observed_at).await?;
            if outcome == UpsertOutcome::Reset {
                tracing::info!(connection_id, fingerprint = %sample.fingerprint, "query counters reset, rebaselined");
            }

            total_queries += 1;
            total_calls += sample.calls;
            total_exec_time_ms += sample.total_exec_time_ms;
            let avg = if sample.calls > 0 { sample.total_exec_time_ms / sample.calls as f64 } else { 0.0 };
            if avg > SLOW_QUERY_THRESHOLD_MS {
                slow_queries += 1;
            }
        }

        let mean_exec_time_ms = if total_calls > 0 { total_exec_time_ms / total_calls as f64 } else { 0.0 };
        let workload_class = WorkloadSample::classify(total_queries, mean_exec_time_ms);
        let bucket_start = observed_at
            .date_naive()
            .and_hms_opt(observed_at.hour(), 0, 0)
            .expect("hour is always in range")
            .and_utc();

        self.store
            .upsert_workload_sample(WorkloadSample { connection_id: connection.id, bucket_start, total_queries, slow_queries, mean_exec_time_ms, workload_class })
            .await?;

        Ok(())
    }
}

/// Bridges `Discovery::enqueue_all` to `ScheduledTask`, reading the shared
/// shutdown flag owned by `Discovery` rather than keeping its own.
struct SchedulerAdapter {
    discovery: Arc<Discovery>,
}

impl ScheduledTask for SchedulerAdapter {
    fn run(&self) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move { self.discovery.enqueue_all().await.map_err(anyhow::Error::from) })
    }

    fn should_terminate(&self) -> bool {
        self.discovery.shutdown.load(Ordering::Relaxed)
    }
}
