use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::store::SyncStore;
use crate::transport::{Connector, WsConnector};
use std::sync::Arc;
use tokio::sync::watch;

/// A connection manager with a `SyncStore` subscribed to it.
pub struct LiveClient<C: Connector = WsConnector> {
    connection: ConnectionManager<C>,
    store: SyncStore,
}

impl LiveClient<WsConnector> {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_connector(WsConnector::new(), config)
    }
}

impl<C: Connector> LiveClient<C> {
    pub fn with_connector(connector: C, config: &Config) -> Result<Self> {
        let mut connection = ConnectionManager::from_config(connector, &config.connection)?;
        let store = SyncStore::with_user(config.user.id.clone());
        connection.subscribe(Arc::new(store.clone()));
        Ok(Self { connection, store })
    }

    pub fn store(&self) -> &SyncStore {
        &self.store
    }

    pub fn connection(&self) -> &ConnectionManager<C> {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut ConnectionManager<C> {
        &mut self.connection
    }

    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) {
        self.connection.run(shutdown).await;
    }
}
