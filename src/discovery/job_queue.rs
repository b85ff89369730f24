//! Bounded discovery work queue (§5 concurrency model).
//!
//! `tokio::sync::mpsc` has no evict-oldest-on-full semantics, so this is a
//! small `VecDeque` behind a `Mutex` plus a `Notify`, sized in the same
//! DashMap-per-connection spirit as `GatewayPoolManager` but keyed by
//! nothing — one shared queue drained by every worker.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollJob {
    pub connection_id: i64,
}

pub struct JobQueue {
    capacity: usize,
    inner: Mutex<VecDeque<PollJob>>,
    notify: Notify,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        Self { capacity: capacity.max(1), inner: Mutex::new(VecDeque::new()), notify: Notify::new() }
    }

    /// Pushes `job`; when the queue is already at capacity the oldest
    /// entry is evicted and returned to the caller so it can record the
    /// degraded-connection event.
    pub async fn push(&self, job: PollJob) -> Option<PollJob> {
        let mut guard = self.inner.lock().await;
        let dropped = if guard.len() >= self.capacity { guard.pop_front() } else { None };
        guard.push_back(job);
        drop(guard);
        self.notify.notify_one();
        dropped
    }

    /// Blocks until a job is available.
    pub async fn pop(&self) -> PollJob {
        loop {
            {
                let mut guard = self.inner.lock().await;
                if let Some(job) = guard.pop_front() {
                    return job;
                }
            }
            self.notify.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_under_capacity_drops_nothing() {
        let q = JobQueue::new(2);
        assert!(q.push(PollJob { connection_id: 1 }).await.is_none());
        assert!(q.push(PollJob { connection_id: 2 }).await.is_none());
    }

    #[tokio::test]
    async fn push_over_capacity_evicts_oldest() {
        let q = JobQueue::new(1);
        assert!(q.push(PollJob { connection_id: 1 }).await.is_none());
        let dropped = q.push(PollJob { connection_id: 2 }).await;
        assert_eq!(dropped, Some(PollJob { connection_id: 1 }));
        assert_eq!(q.pop().await, PollJob { connection_id: 2 });
    }
}
