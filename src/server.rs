use crate::config::HaConfig;
use haplog_core::{HaError, LogStore, Result};
use haplog_ha::HaService;
use haplog_storage::LogStorage;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Wires a `LogStore` and an `HaService` together behind a minimal accept
/// loop. The wire protocol itself is out of scope, so connections are
/// accepted and logged only.
pub struct DemoServer {
    config: HaConfig,
    ha: Arc<HaService>,
    store: Arc<LogStorage>,
}

impl DemoServer {
    pub async fn new(config: HaConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.node.data_dir).map_err(HaError::from)?;

        let store_path = config.node.data_dir.join("log");
        let store = Arc::new(LogStorage::open(store_path, config.storage.clone()).await?);

        let epoch_file = config.node.data_dir.join(&config.ha.store_path_epoch_file);
        let mut ha_config = config.ha.clone();
        ha_config.store_path_epoch_file = epoch_file.to_string_lossy().to_string();

        let ha = Arc::new(HaService::new(ha_config, store.clone() as Arc<dyn LogStore>)?);

        Ok(Self { config, ha, store })
    }

    pub fn ha(&self) -> &Arc<HaService> {
        &self.ha
    }

    pub fn store(&self) -> &Arc<LogStorage> {
        &self.store
    }

    /// Bring this node up as leader of a fresh epoch, then accept
    /// connections. A real deployment would have an external cluster
    /// controller drive `change_to_leader` / `change_to_follower` instead
    /// of bootstrapping to leader unconditionally.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let next_epoch = self.ha.get_last_epoch() + 1;
        if !self.ha.change_to_leader(next_epoch).await {
            return Err(HaError::InvalidRequest("failed to bootstrap as leader".to_string()));
        }

        let listener = TcpListener::bind(&self.config.network.listen_address)
            .await
            .map_err(HaError::from)?;
        tracing::info!(address = %self.config.network.listen_address, "demo server listening");

        loop {
            match listener.accept().await {
                Ok((_socket, addr)) => {
                    tracing::debug!(%addr, "accepted connection (protocol handling out of scope)");
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to accept connection");
                }
            }
        }
    }
}
