use haplog_ha::HaServiceConfig;
use haplog_storage::{LogStorageConfig, SegmentConfig, WriteCacheConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HaConfig {
    /// Node identity and data directory.
    pub node: NodeConfig,

    /// Segment/index/write-cache configuration for the demo log store.
    pub storage: LogStorageConfig,

    /// HA replication core configuration (epoch file, ISR shrink threshold,
    /// transient buffer pool behavior).
    pub ha: HaServiceConfig,

    /// Demo accept-service configuration; the wire protocol itself is out
    /// of scope, this only exists so `server::DemoServer` has somewhere to
    /// listen.
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: u64,
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen_address: String,
    pub max_connections: usize,
}

impl Default for HaConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig { node_id: 1, data_dir: PathBuf::from("./data") },
            storage: LogStorageConfig {
                segment_config: SegmentConfig {
                    max_size: 1024 * 1024 * 1024,
                    use_mmap: true,
                    sync_on_write: false,
                },
                cache_config: WriteCacheConfig {
                    max_size: 16 * 1024 * 1024,
                    max_buffer_time: Duration::from_millis(10),
                    enabled: true,
                },
            },
            ha: HaServiceConfig::default(),
            network: NetworkConfig { listen_address: "0.0.0.0:9092".to_string(), max_connections: 10_000 },
        }
    }
}

impl HaConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
