//! Capability façade exposed to the (out-of-scope) transport layer (§6.1).
//!
//! One struct per noun in the operation list, each a thin wrapper over the
//! service/store layer built by C1-C7. No HTTP/RPC binding lives here —
//! a transport adapter maps these operation names onto whatever wire
//! protocol it speaks, the way the teacher's `handlers/` module maps
//! `AppState` methods onto axum routes, minus axum itself.
//!
//! Every read operation honours the empty-state contract: with no
//! connections, no optimizations, no patterns, these never fail, they
//! return zeroed/empty results.

pub mod connection;
pub mod dashboard;
pub mod feedback;
pub mod indexes;
pub mod monitoring;
pub mod optimizer;
pub mod patterns;
pub mod workload;

pub use connection::ConnectionApi;
pub use dashboard::DashboardApi;
pub use feedback::FeedbackApi;
pub use indexes::IndexesApi;
pub use monitoring::{MonitoringApi, MonitoringStatus};
pub use optimizer::{FixSuggestions, OptimizerApi, PlanExplanation};
pub use patterns::PatternsApi;
pub use workload::{WorkloadAnalysis, WorkloadApi};

use std::sync::Arc;

use crate::applicator::{Applicator, Validator};
use crate::discovery::Discovery;
use crate::feedback::FeedbackService;
use crate::gateway::GatewayRegistry;
use crate::optimizer::Orchestrator;
use crate::secrets::SecretStore;
use crate::store::ObservabilityStore;

/// Everything a transport adapter needs, built once at startup and
/// injected wherever it's needed — no global singletons (§9 Design Notes).
pub struct Capability {
    pub connection: ConnectionApi,
    pub monitoring: MonitoringApi,
    pub optimizer: OptimizerApi,
    pub feedback: FeedbackApi,
    pub patterns: PatternsApi,
    pub indexes: IndexesApi,
    pub workload: WorkloadApi,
    pub dashboard: DashboardApi,
}

impl Capability {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ObservabilityStore>,
        gateways: Arc<GatewayRegistry>,
        secrets: Arc<dyn SecretStore>,
        discovery: Arc<Discovery>,
        orchestrator: Arc<Orchestrator>,
        applicator: Arc<Applicator>,
        validator: Arc<Validator>,
        feedback_service: Arc<FeedbackService>,
    ) -> Self {
        Self {
            connection: ConnectionApi::new(store.clone(), gateways.clone(), secrets.clone()),
            monitoring: MonitoringApi::new(store.clone(), discovery),
            optimizer: OptimizerApi::new(store.clone(), gateways.clone(), secrets, orchestrator, applicator, validator),
            feedback: FeedbackApi::new(feedback_service.clone()),
            patterns: PatternsApi::new(store.clone(), feedback_service),
            indexes: IndexesApi::new(store.clone()),
            workload: WorkloadApi::new(store.clone()),
            dashboard: DashboardApi::new(store),
        }
    }
}
