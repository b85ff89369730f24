//! `Connection.*` (§6.1).

use std::sync::Arc;

use crate::error::EngineResult;
use crate::gateway::{ConnectionTest, GatewayRegistry};
use crate::models::{Connection, DecryptedCredentials, Engine, NewConnection};
use crate::secrets::SecretStore;
use crate::store::ObservabilityStore;

pub struct ConnectionApi {
    store: Arc<dyn ObservabilityStore>,
    gateways: Arc<GatewayRegistry>,
    secrets: Arc<dyn SecretStore>,
}

impl ConnectionApi {
    pub fn new(store: Arc<dyn ObservabilityStore>, gateways: Arc<GatewayRegistry>, secrets: Arc<dyn SecretStore>) -> Self {
        Self { store, gateways, secrets }
    }

    /// Persists only after a successful `test()` against the supplied
    /// credentials; the password never reaches storage in plaintext.
    pub async fn create(&self, new: NewConnection) -> EngineResult<Connection> {
        let creds = DecryptedCredentials {
            host: new.host.clone(),
            port: new.port,
            database: new.database.clone(),
            username: new.username.clone(),
            password: new.password.clone(),
        };
        let gateway = self.gateways.get(new.engine)?.clone();
        let outcome = gateway.test(0, &creds).await?;
        if !outcome.ok {
            return Err(crate::error::EngineError::input(
                outcome.reason.unwrap_or_else(|| "connection test failed".to_string()),
            ));
        }

        let encrypted = self.secrets.encrypt(&new.password).await?;
        self.store.create_connection(new, encrypted).await
    }

    pub async fn list(&self) -> EngineResult<Vec<Connection>> {
        self.store.list_connections().await
    }

    pub async fn get(&self, id: i64) -> EngineResult<Connection> {
        self.store.get_connection(id).await
    }

    pub async fn update(&self, conn: Connection) -> EngineResult<Connection> {
        self.store.update_connection(conn).await
    }

    pub async fn delete(&self, id: i64) -> EngineResult<()> {
        self.store.delete_connection(id).await
    }

    pub async fn test(&self, id: i64) -> EngineResult<ConnectionTest> {
        let connection = self.store.get_connection(id).await?;
        let gateway = self.gateways.get(connection.engine)?.clone();
        let password = self.secrets.decrypt(&connection.encrypted_password).await?;
        let creds = DecryptedCredentials {
            host: connection.host,
            port: connection.port,
            database: connection.database,
            username: connection.username,
            password,
        };
        gateway.test(id, &creds).await
    }

    pub async fn test_engine(&self, engine: Engine, creds: &DecryptedCredentials) -> EngineResult<ConnectionTest> {
        self.gateways.get(engine)?.test(0, creds).await
    }
}
