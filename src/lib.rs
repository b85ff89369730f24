//! Cross-database SQL workload observability and optimization engine.
//!
//! Wires the seven components (§2 system overview) into one `Engine`:
//! the store (C1) and gateways (C2) are handed to everything above them,
//! the discovery scheduler (C3) runs in the background, and the detector
//! (C4), orchestrator (C5), applicator/validator (C6) and feedback/pattern
//! library (C7) are exposed to a transport layer only through
//! [`capability::Capability`]. No global state: every service is built
//! once in [`Engine::bootstrap`] and handed out by reference.

pub mod applicator;
pub mod capability;
pub mod completion;
pub mod config;
pub mod detector;
pub mod discovery;
pub mod error;
pub mod feedback;
pub mod gateway;
pub mod models;
pub mod normalize;
pub mod optimizer;
pub mod plan;
pub mod secrets;
pub mod store;

use std::sync::Arc;

use config::Config;
use error::EngineResult;
use gateway::mssql::MssqlGateway;
use gateway::mysql::MysqlGateway;
use gateway::oracle::OracleGateway;
use gateway::pg::PgGateway;
use gateway::{EngineGateway, GatewayRegistry};
use secrets::{AesGcmSecretStore, SecretStore};
use store::{ObservabilityStore, SqliteStore};

/// Everything the process needs, constructed once at startup. Holds the
/// long-lived services; [`capability::Capability`] is the surface a
/// transport binding actually calls.
pub struct Engine {
    pub config: Config,
    pub store: Arc<dyn ObservabilityStore>,
    pub gateways: Arc<GatewayRegistry>,
    pub secrets: Arc<dyn SecretStore>,
    pub discovery: Arc<discovery::Discovery>,
    pub capability: capability::Capability,
}

impl Engine {
    /// Connects the store, applies migrations, builds the gateway
    /// registry, seeds the pattern library and assembles every service.
    /// Does not start the discovery scheduler — call [`Engine::start`].
    pub async fn bootstrap(config: Config) -> EngineResult<Self> {
        let sqlite = SqliteStore::connect(&config.store.url, config.store.connection_pool_size).await?;
        sqlite.migrate().await?;
        let store: Arc<dyn ObservabilityStore> = Arc::new(sqlite);

        let secrets: Arc<dyn SecretStore> = match &config.secrets.key_base64 {
            Some(key) => Arc::new(AesGcmSecretStore::from_base64(key)?),
            None => Arc::new(AesGcmSecretStore::generate_ephemeral()),
        };

        let pg: Arc<dyn EngineGateway> = Arc::new(PgGateway::new(config.store.connection_pool_size));
        let mysql: Arc<dyn EngineGateway> = Arc::new(MysqlGateway::new(config.store.connection_pool_size));
        let mssql: Arc<dyn EngineGateway> = Arc::new(MssqlGateway::new());
        let oracle: Arc<dyn EngineGateway> = Arc::new(OracleGateway::new());
        let gateways = Arc::new(GatewayRegistry::new(pg, mysql, mssql, oracle));

        // The vendor completion binding is out of scope for the core (§1);
        // a real deployment replaces this with its own `CompletionService`.
        let completion: Arc<dyn completion::CompletionService> = Arc::new(completion::FailingCompletionService);

        let discovery = discovery::Discovery::new(store.clone(), gateways.clone(), secrets.clone(), config.discovery.clone());

        let orchestrator = Arc::new(optimizer::Orchestrator::new(
            store.clone(),
            gateways.clone(),
            completion,
            secrets.clone(),
            config.detector.clone(),
            config.optimizer.clone(),
        ));

        let applicator = Arc::new(applicator::Applicator::new(store.clone(), gateways.clone(), secrets.clone(), config.applicator.clone()));
        let validator = Arc::new(applicator::Validator::new(
            store.clone(),
            gateways.clone(),
            secrets.clone(),
            config.validator.clone(),
            config.optimizer.clone(),
        ));

        let feedback_service = Arc::new(feedback::FeedbackService::new(store.clone(), config.optimizer.clone()));
        feedback_service.seed_common_patterns().await?;

        let capability = capability::Capability::new(
            store.clone(),
            gateways.clone(),
            secrets.clone(),
            discovery.clone(),
            orchestrator,
            applicator,
            validator,
            feedback_service,
        );

        Ok(Self { config, store, gateways, secrets, discovery, capability })
    }

    /// Spawns the discovery scheduler's fiber and worker pool.
    pub fn start(&self) {
        self.discovery.spawn();
    }
}
