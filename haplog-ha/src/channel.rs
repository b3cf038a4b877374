use dashmap::DashMap;
use haplog_core::{FollowerChannel, LogOffset, UpstreamChannel};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Leader-side registry of connected follower channels.
///
/// The actual replication wire protocol lives outside this core (see the
/// `FollowerChannel` contract in `haplog-core`); this supervisor only tracks
/// which channels exist and reads their bookkeeping for the confirm-offset
/// tracker and ISR registry to consume.
pub struct ChannelSupervisor {
    channels: DashMap<String, Arc<dyn FollowerChannel>>,
}

impl ChannelSupervisor {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    pub fn register(&self, channel: Arc<dyn FollowerChannel>) {
        self.channels.insert(channel.follower_address().to_string(), channel);
    }

    pub fn remove(&self, follower: &str) -> Option<Arc<dyn FollowerChannel>> {
        self.channels.remove(follower).map(|(_, v)| v)
    }

    pub fn get(&self, follower: &str) -> Option<Arc<dyn FollowerChannel>> {
        self.channels.get(follower).map(|entry| entry.value().clone())
    }

    pub fn follower_ack_offsets(&self) -> Vec<(String, i64)> {
        self.channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().slave_ack_offset().as_u64() as i64))
            .collect()
    }

    /// Tear down every inbound follower channel, as `changeToLeader` does
    /// when abandoning the old term's connections. Returns the addresses
    /// that were torn down.
    pub fn teardown_all(&self) -> Vec<String> {
        let keys: Vec<String> = self.channels.iter().map(|entry| entry.key().clone()).collect();
        self.channels.clear();
        keys
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

/// A test/demo-only `FollowerChannel`: no network I/O, just atomics an
/// operator (or a test) can push updates through to simulate a follower
/// acking data.
pub struct InMemoryFollowerChannel {
    follower_address: String,
    client_address: String,
    ack_offset: AtomicU64,
    transfer_from: AtomicU64,
    bytes_per_second: AtomicU64,
}

impl InMemoryFollowerChannel {
    pub fn new(follower_address: impl Into<String>, client_address: impl Into<String>) -> Self {
        Self {
            follower_address: follower_address.into(),
            client_address: client_address.into(),
            ack_offset: AtomicU64::new(0),
            transfer_from: AtomicU64::new(0),
            bytes_per_second: AtomicU64::new(0),
        }
    }

    pub fn ack(&self, offset: LogOffset) {
        self.ack_offset.store(offset.as_u64(), Ordering::Release);
    }

    pub fn set_transfer_from(&self, offset: LogOffset) {
        self.transfer_from.store(offset.as_u64(), Ordering::Release);
    }

    pub fn set_throughput(&self, bytes_per_second: u64) {
        self.bytes_per_second.store(bytes_per_second, Ordering::Release);
    }
}

impl FollowerChannel for InMemoryFollowerChannel {
    fn follower_address(&self) -> &str {
        &self.follower_address
    }

    fn slave_ack_offset(&self) -> LogOffset {
        LogOffset::new(self.ack_offset.load(Ordering::Acquire))
    }

    fn transferred_bytes_per_second(&self) -> f64 {
        self.bytes_per_second.load(Ordering::Acquire) as f64
    }

    fn transfer_from_offset(&self) -> LogOffset {
        LogOffset::new(self.transfer_from.load(Ordering::Acquire))
    }

    fn client_address(&self) -> &str {
        &self.client_address
    }
}

/// A follower's single upstream channel to its leader, simulated the same
/// way: atomics a test can drive, no real network I/O.
pub struct InMemoryUpstreamChannel {
    master_address: Option<String>,
    max_offset: AtomicU64,
    last_read_ts: AtomicI64,
    last_write_ts: AtomicI64,
    bytes_per_second: AtomicU64,
    master_flush_offset: AtomicU64,
}

impl InMemoryUpstreamChannel {
    pub fn new(master_address: impl Into<String>) -> Self {
        Self {
            master_address: Some(master_address.into()),
            max_offset: AtomicU64::new(0),
            last_read_ts: AtomicI64::new(0),
            last_write_ts: AtomicI64::new(0),
            bytes_per_second: AtomicU64::new(0),
            master_flush_offset: AtomicU64::new(0),
        }
    }

    pub fn record_read(&self, max_offset: LogOffset, at_ms: i64) {
        self.max_offset.store(max_offset.as_u64(), Ordering::Release);
        self.last_read_ts.store(at_ms, Ordering::Release);
    }

    pub fn record_write(&self, at_ms: i64) {
        self.last_write_ts.store(at_ms, Ordering::Release);
    }

    pub fn set_master_flush_offset(&self, offset: LogOffset) {
        self.master_flush_offset.store(offset.as_u64(), Ordering::Release);
    }
}

impl UpstreamChannel for InMemoryUpstreamChannel {
    fn ha_master_address(&self) -> Option<String> {
        self.master_address.clone()
    }

    fn max_offset(&self) -> LogOffset {
        LogOffset::new(self.max_offset.load(Ordering::Acquire))
    }

    fn last_read_timestamp(&self) -> i64 {
        self.last_read_ts.load(Ordering::Acquire)
    }

    fn last_write_timestamp(&self) -> i64 {
        self.last_write_ts.load(Ordering::Acquire)
    }

    fn transferred_bytes_per_second(&self) -> f64 {
        self.bytes_per_second.load(Ordering::Acquire) as f64
    }

    fn master_flush_offset(&self) -> LogOffset {
        LogOffset::new(self.master_flush_offset.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_ack_offsets() {
        let supervisor = ChannelSupervisor::new();
        let chan = Arc::new(InMemoryFollowerChannel::new("f1", "127.0.0.1:9000"));
        chan.ack(LogOffset::new(42));
        supervisor.register(chan);

        let acks = supervisor.follower_ack_offsets();
        assert_eq!(acks, vec![("f1".to_string(), 42)]);
    }

    #[test]
    fn teardown_all_clears_and_returns_keys() {
        let supervisor = ChannelSupervisor::new();
        supervisor.register(Arc::new(InMemoryFollowerChannel::new("f1", "a")));
        supervisor.register(Arc::new(InMemoryFollowerChannel::new("f2", "b")));

        let mut torn_down = supervisor.teardown_all();
        torn_down.sort();
        assert_eq!(torn_down, vec!["f1".to_string(), "f2".to_string()]);
        assert!(supervisor.is_empty());
    }
}
