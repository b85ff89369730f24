//! `CompletionService` contract (§6.3, §4.5).
//!
//! Generalizes the teacher's `LLMService` trait from a single scenario
//! (root-cause analysis) to the one OPTIMIZER role this system needs. The
//! vendor binding itself stays external — §1 explicitly scopes it out.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{issue::DetectedIssue, pattern::OptimizationPattern};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompletionRole {
    Optimizer,
}

/// Everything the orchestrator gathers before calling out (§4.5 step 5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub role: CompletionRole,
    pub engine: String,
    pub sql: String,
    pub schema_ddl: String,
    pub plan_json: serde_json::Value,
    pub detected_issues: Vec<DetectedIssue>,
    pub candidate_patterns: Vec<OptimizationPattern>,
    /// Soft deadline for the call; the hard deadline is
    /// `optimizer.completion_hard_timeout_sec` above this, enforced by
    /// the caller, not the service itself.
    pub soft_timeout: Duration,
}

/// Exactly one operation, per §6.3: `complete(request) -> raw_text`.
/// Implementations must honour cancellation (drop the future) and should
/// treat `request.soft_timeout` as advisory — the orchestrator enforces
/// the hard deadline regardless of what the implementation does.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<String>;
}

/// A `CompletionService` that always fails, for orchestrator tests that
/// exercise the `failed_upstream` path (end-to-end scenario 2).
pub struct FailingCompletionService;

#[async_trait]
impl CompletionService for FailingCompletionService {
    async fn complete(&self, _request: CompletionRequest) -> anyhow::Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        unreachable!("caller is expected to time out before this resolves")
    }
}

/// A `CompletionService` that echoes back a fixed response, for tests
/// that exercise the parsing-strategy layers without a live vendor.
pub struct StaticCompletionService {
    pub response: String,
}

#[async_trait]
impl CompletionService for StaticCompletionService {
    async fn complete(&self, _request: CompletionRequest) -> anyhow::Result<String> {
        Ok(self.response.clone())
    }
}
