use serde::{Deserialize, Serialize};

/// Recognized configuration options for the HA service, mirroring the
/// options a broker would load alongside its own settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaServiceConfig {
    /// Filesystem path of the durable epoch log.
    pub store_path_epoch_file: String,
    /// Shrink threshold, in milliseconds, for ISR eviction.
    pub ha_max_time_slave_not_catchup_ms: i64,
    /// Externally observed role hint. This core sets its own state-machine
    /// version but never mutates this field.
    pub broker_role: Option<String>,
    /// Whether role transitions switch the transient write-buffer pool
    /// between buffered and real-commit modes.
    pub transient_store_pool_enable: bool,
    /// Telemetry-only naming for the internal accept service.
    pub in_broker_container: bool,
    pub identifier: Option<String>,
}

impl Default for HaServiceConfig {
    fn default() -> Self {
        Self {
            store_path_epoch_file: "epochCheckpoint".to_string(),
            ha_max_time_slave_not_catchup_ms: 15_000,
            broker_role: None,
            transient_store_pool_enable: false,
            in_broker_container: false,
            identifier: None,
        }
    }
}

impl HaServiceConfig {
    pub fn from_file(path: impl AsRef<std::path::Path>) -> haplog_core::Result<Self> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| haplog_core::HaError::ConfigError(e.to_string()))
    }

    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> haplog_core::Result<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| haplog_core::HaError::ConfigError(e.to_string()))?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn config_round_trips_through_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ha.json");
        let mut config = HaServiceConfig::default();
        config.ha_max_time_slave_not_catchup_ms = 5_000;
        config.identifier = Some("broker-1".to_string());

        config.to_file(&path).unwrap();
        let reloaded = HaServiceConfig::from_file(&path).unwrap();
        assert_eq!(reloaded.ha_max_time_slave_not_catchup_ms, 5_000);
        assert_eq!(reloaded.identifier.as_deref(), Some("broker-1"));
    }
}
