use serde::Serialize;

/// Per-connection leader-side diagnostic snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct FollowerConnectionInfo {
    pub follower_address: String,
    pub slave_ack_offset: i64,
    pub diff: i64,
    pub throughput: f64,
    pub transfer_from_offset: i64,
    pub in_sync: bool,
}

/// Follower-side diagnostic snapshot of the single upstream channel.
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamConnectionInfo {
    pub master_address: Option<String>,
    pub max_offset: i64,
    pub last_read_ts: i64,
    pub last_write_ts: i64,
    pub throughput: f64,
    pub master_flush_offset: i64,
}

/// A structured diagnostic snapshot of the HA service, shaped differently
/// for a leader (one entry per follower connection) than a follower (its
/// single upstream channel).
#[derive(Debug, Clone, Serialize)]
pub struct HaRuntimeInfo {
    pub is_master: bool,
    pub in_sync_slave_nums: Option<usize>,
    pub followers: Vec<FollowerConnectionInfo>,
    pub upstream: Option<UpstreamConnectionInfo>,
}

impl HaRuntimeInfo {
    pub fn leader(followers: Vec<FollowerConnectionInfo>, in_sync_slave_nums: usize) -> Self {
        Self {
            is_master: true,
            in_sync_slave_nums: Some(in_sync_slave_nums),
            followers,
            upstream: None,
        }
    }

    pub fn follower(upstream: UpstreamConnectionInfo) -> Self {
        Self { is_master: false, in_sync_slave_nums: None, followers: Vec::new(), upstream: Some(upstream) }
    }
}
