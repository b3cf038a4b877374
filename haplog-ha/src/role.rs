use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use haplog_core::{LogOffset, LogStore, Result};
use parking_lot::RwLock;

use crate::channel::{ChannelSupervisor, InMemoryUpstreamChannel};
use crate::confirm::ConfirmOffsetTracker;
use crate::config::HaServiceConfig;
use crate::epoch_cache::{EpochBoundary, EpochCache};
use crate::isr::{IsrListener, IsrRegistry};
use crate::runtime_info::{FollowerConnectionInfo, HaRuntimeInfo, UpstreamConnectionInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Uninitialized,
    Leader,
    Follower,
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

/// The HA service itself: drives role transitions, owns the epoch cache,
/// ISR registry, confirm-offset tracker, and the channel supervisor, and
/// treats the log store as an opaque collaborator behind `LogStore`.
///
/// Role-change calls (`change_to_leader` / `change_to_follower`) are
/// serialized by `transition_lock`; the core assumes the supervisor never
/// issues a second transition before the first one returns.
pub struct HaService {
    config: HaServiceConfig,
    store: Arc<dyn LogStore>,
    epoch_cache: EpochCache,
    isr: IsrRegistry,
    confirm: ConfirmOffsetTracker,
    channels: ChannelSupervisor,
    role: RwLock<Role>,
    state_machine_version: AtomicU32,
    upstream: RwLock<Option<Arc<InMemoryUpstreamChannel>>>,
    transition_lock: tokio::sync::Mutex<()>,
}

impl HaService {
    pub fn new(config: HaServiceConfig, store: Arc<dyn LogStore>) -> Result<Self> {
        let epoch_cache = EpochCache::load(&config.store_path_epoch_file)?;
        let max_not_catchup_ms = config.ha_max_time_slave_not_catchup_ms;
        Ok(Self {
            config,
            store,
            epoch_cache,
            isr: IsrRegistry::new(max_not_catchup_ms),
            confirm: ConfirmOffsetTracker::new(),
            channels: ChannelSupervisor::new(),
            role: RwLock::new(Role::Uninitialized),
            state_machine_version: AtomicU32::new(0),
            upstream: RwLock::new(None),
            transition_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn role(&self) -> Role {
        *self.role.read()
    }

    pub fn state_machine_version(&self) -> u32 {
        self.state_machine_version.load(Ordering::Acquire)
    }

    pub async fn shutdown(&self) {
        tracing::info!("ha service shutting down");
        self.channels.teardown_all();
        *self.upstream.write() = None;
    }

    /// `changeToLeader(newEpoch)`.
    pub async fn change_to_leader(&self, new_epoch: u32) -> bool {
        let _guard = self.transition_lock.lock().await;

        if new_epoch < self.epoch_cache.last_epoch() {
            tracing::warn!(new_epoch, last_epoch = self.epoch_cache.last_epoch(), "rejecting stale leader epoch");
            return false;
        }

        match self.change_to_leader_inner(new_epoch).await {
            Ok(()) => {
                *self.role.write() = Role::Leader;
                self.state_machine_version.store(new_epoch, Ordering::Release);
                tracing::info!(new_epoch, "became leader");
                true
            }
            Err(err) => {
                tracing::error!(new_epoch, error = %err, "changeToLeader failed");
                false
            }
        }
    }

    async fn change_to_leader_inner(&self, new_epoch: u32) -> Result<()> {
        // 1 & 2: tear down all channels, whether inbound follower channels
        // (we were leader) or the single upstream channel (we were follower).
        let torn_down = self.channels.teardown_all();
        if !torn_down.is_empty() {
            tracing::info!(?torn_down, "tore down replication channels");
        }
        *self.upstream.write() = None;

        // 3: drop any partially replicated tail.
        let truncated_to = self.store.validate_and_truncate_tail().await?;

        // 4: seed confirm offset from the pre-truncation ISR view, then
        // reset - the ISR is empty of followers now, so confirm offset
        // collapses to maxLogOffset.
        let _ = self.confirm.get(&self.isr, &self.channels, self.store.max_offset().as_u64());
        self.isr.reset_for_new_term();
        self.confirm.reset_for_new_term(self.store.max_offset().as_u64());

        // 5: reconcile epoch cache against the truncation point and any
        // stale aborted term at this epoch number.
        if let Some(truncated_to) = truncated_to {
            self.epoch_cache.truncate_suffix_by_offset(truncated_to.as_u64())?;
        }
        if self.epoch_cache.last_epoch() >= new_epoch {
            self.epoch_cache.truncate_suffix_by_epoch(new_epoch)?;
        }

        // 6: append the new epoch entry at the current (post-truncation) tail.
        self.epoch_cache.append(new_epoch, self.store.max_offset().as_u64())?;

        // 7: drain the dispatcher so derived indexes are caught up before we
        // accept leader writes.
        self.store.wait_dispatch_caught_up().await;

        // 8: commit transient buffers, then switch to real-commit mode.
        if self.config.transient_store_pool_enable {
            self.store.drain_transient_buffers().await?;
            self.store.set_transient_pool_mode(false);
        }

        // 9: rebuild derived metadata from the now-canonical log.
        self.store.rebuild_derived_metadata().await?;

        Ok(())
    }

    /// `changeToFollower(leaderAddress, newEpoch, followerId)`.
    pub async fn change_to_follower(&self, leader_address: &str, new_epoch: u32, follower_id: &str) -> bool {
        let _guard = self.transition_lock.lock().await;

        if new_epoch < self.epoch_cache.last_epoch() {
            tracing::warn!(new_epoch, last_epoch = self.epoch_cache.last_epoch(), "rejecting stale follower epoch");
            return false;
        }

        match self.change_to_follower_inner(leader_address, follower_id).await {
            Ok(()) => {
                *self.role.write() = Role::Follower;
                self.state_machine_version.store(new_epoch, Ordering::Release);
                tracing::info!(new_epoch, leader_address, follower_id, "became follower");
                true
            }
            Err(err) => {
                tracing::error!(new_epoch, error = %err, "changeToFollower failed");
                false
            }
        }
    }

    async fn change_to_follower_inner(&self, leader_address: &str, follower_id: &str) -> Result<()> {
        let torn_down = self.channels.teardown_all();
        if !torn_down.is_empty() {
            tracing::info!(?torn_down, "tore down replication channels");
        }

        let upstream = Arc::new(InMemoryUpstreamChannel::new(leader_address));
        *self.upstream.write() = Some(upstream.clone());

        // The handshake would consult the epoch cache to declare this
        // follower's (lastEpoch, offset-in-epoch) and receive a truncation
        // instruction back; without a wire protocol, record only the intent
        // to start the catch-up conversation.
        tracing::info!(
            follower_id,
            leader_address,
            last_epoch = self.epoch_cache.last_epoch(),
            "starting follower client, catch-up negotiation pending"
        );

        if self.config.transient_store_pool_enable {
            self.store.drain_transient_buffers().await?;
            self.store.set_transient_pool_mode(true);
        }

        Ok(())
    }

    pub fn update_connection_last_caught_up_time(&self, follower: &str, ts_ms: i64) {
        self.isr.update_caught_up(follower, ts_ms);
    }

    /// `maybeExpandInSyncStateSet(follower, offset)`. The dual condition
    /// guards against expanding based on pre-epoch tail identity: the
    /// follower must be at or past the confirm offset *and* have written
    /// bytes under the leader's own epoch.
    pub fn maybe_expand_in_sync_state_set(&self, follower: &str, follower_max_offset: LogOffset) -> bool {
        if self.isr.local().contains(follower) {
            return false;
        }
        let confirm_offset = self.get_confirm_offset();
        let epoch_start = self.epoch_cache.last_entry().map(|e| e.start_offset).unwrap_or(0);
        if follower_max_offset.as_u64() as i64 >= confirm_offset && follower_max_offset.as_u64() >= epoch_start {
            self.isr.propose_add(follower.to_string())
        } else {
            false
        }
    }

    pub fn maybe_shrink_in_sync_state_set(&self) -> Option<HashSet<String>> {
        self.isr.maybe_shrink(now_ms())
    }

    /// `setSyncStateSet(set)`: the supervisor's confirmation of a proposed
    /// (or externally decided) ISR membership.
    pub fn set_sync_state_set(&self, new_set: HashSet<String>) {
        self.isr.commit(new_set);
        self.confirm.on_isr_commit(&self.isr, &self.channels, self.store.max_offset().as_u64());
    }

    pub fn get_sync_state_set(&self) -> HashSet<String> {
        self.isr.effective()
    }

    pub fn get_local_sync_state_set(&self) -> HashSet<String> {
        self.isr.local()
    }

    pub fn in_sync_replicas_nums(&self) -> usize {
        self.isr.in_sync_replica_count()
    }

    pub fn get_confirm_offset(&self) -> i64 {
        self.confirm.get(&self.isr, &self.channels, self.store.max_offset().as_u64())
    }

    pub fn update_confirm_offset(&self, offset: i64) {
        self.confirm.update(offset);
    }

    /// Called by the channel supervisor whenever a follower ack advances,
    /// before the confirm offset and ISR expansion are recomputed.
    pub fn on_follower_ack(&self, follower: &str, ack_offset: LogOffset) {
        self.isr.update_caught_up(follower, now_ms());
        self.confirm.on_follower_ack(follower, &self.isr, &self.channels, self.store.max_offset().as_u64());
        self.maybe_expand_in_sync_state_set(follower, ack_offset);
    }

    pub fn on_follower_disconnect(&self, follower: &str) {
        self.channels.remove(follower);
        if let Some(proposed) = self.isr.remove_on_disconnect(follower) {
            tracing::info!(follower, ?proposed, "proposed ISR removal after follower disconnect, awaiting commit");
        }
    }

    pub fn get_last_epoch(&self) -> u32 {
        self.epoch_cache.last_epoch()
    }

    pub fn get_epoch_entries(&self) -> Vec<EpochBoundary> {
        self.epoch_cache.all_entries()
    }

    pub fn truncate_epoch_file_prefix(&self, offset: u64) -> Result<()> {
        self.epoch_cache.truncate_prefix_by_offset(offset)
    }

    pub fn truncate_epoch_file_suffix(&self, offset: u64) -> Result<()> {
        self.epoch_cache.truncate_suffix_by_offset(offset)
    }

    pub fn register_sync_state_set_changed_listener(&self, listener: IsrListener) {
        self.isr.register_listener(listener);
    }

    pub fn channels(&self) -> &ChannelSupervisor {
        &self.channels
    }

    pub fn get_runtime_info(&self, master_put_where: LogOffset) -> HaRuntimeInfo {
        match self.role() {
            Role::Leader => {
                let local = self.isr.local();
                let followers = self
                    .channels
                    .follower_ack_offsets()
                    .into_iter()
                    .map(|(address, ack)| FollowerConnectionInfo {
                        follower_address: address.clone(),
                        slave_ack_offset: ack,
                        diff: master_put_where.as_u64() as i64 - ack,
                        throughput: self
                            .channels
                            .get(&address)
                            .map(|c| c.transferred_bytes_per_second())
                            .unwrap_or(0.0),
                        transfer_from_offset: self
                            .channels
                            .get(&address)
                            .map(|c| c.transfer_from_offset().as_u64() as i64)
                            .unwrap_or(0),
                        in_sync: local.contains(&address),
                    })
                    .collect();
                // `local` here only ever holds follower identities (the
                // leader is never inserted into it), so the follower count
                // is the replica count directly, with no leader-exclusion
                // adjustment needed.
                HaRuntimeInfo::leader(followers, self.in_sync_replicas_nums())
            }
            _ => {
                let upstream = self.upstream.read();
                let info = upstream.as_ref().map(|u| UpstreamConnectionInfo {
                    master_address: u.ha_master_address(),
                    max_offset: u.max_offset().as_u64() as i64,
                    last_read_ts: u.last_read_timestamp(),
                    last_write_ts: u.last_write_timestamp(),
                    throughput: u.transferred_bytes_per_second(),
                    master_flush_offset: u.master_flush_offset().as_u64() as i64,
                });
                HaRuntimeInfo::follower(info.unwrap_or(UpstreamConnectionInfo {
                    master_address: None,
                    max_offset: 0,
                    last_read_ts: 0,
                    last_write_ts: 0,
                    throughput: 0.0,
                    master_flush_offset: 0,
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use haplog_core::{HaError as CoreErr, Record, Result as CoreResult};
    use std::sync::atomic::AtomicI64;
    use tempfile::TempDir;

    /// A minimal in-memory `LogStore` double, just enough to drive the role
    /// state machine through its transitions in tests.
    struct FakeStore {
        max_offset: AtomicI64,
        dispatch_behind: AtomicI64,
        transient_mode_buffered: std::sync::atomic::AtomicBool,
    }

    impl FakeStore {
        fn new(max_offset: u64) -> Self {
            Self {
                max_offset: AtomicI64::new(max_offset as i64),
                dispatch_behind: AtomicI64::new(0),
                transient_mode_buffered: std::sync::atomic::AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl LogStore for FakeStore {
        fn max_offset(&self) -> LogOffset {
            LogOffset::new(self.max_offset.load(Ordering::Acquire) as u64)
        }

        fn dispatch_behind_bytes(&self) -> i64 {
            self.dispatch_behind.load(Ordering::Acquire)
        }

        async fn truncate_to(&self, offset: LogOffset) -> CoreResult<()> {
            self.max_offset.store(offset.as_u64() as i64, Ordering::Release);
            Ok(())
        }

        async fn validate_and_truncate_tail(&self) -> CoreResult<Option<LogOffset>> {
            Ok(None)
        }

        async fn wait_dispatch_caught_up(&self) {}

        async fn drain_transient_buffers(&self) -> CoreResult<()> {
            Ok(())
        }

        fn set_transient_pool_mode(&self, buffered: bool) {
            self.transient_mode_buffered.store(buffered, Ordering::Release);
        }

        async fn append(&self, _record: Record) -> CoreResult<LogOffset> {
            Err(CoreErr::InvalidRequest("fake store does not support append".to_string()))
        }

        async fn read(&self, _offset: LogOffset) -> CoreResult<Option<Record>> {
            Ok(None)
        }

        async fn read_from(&self, _offset: LogOffset, _max_count: usize) -> CoreResult<Vec<Record>> {
            Ok(Vec::new())
        }
    }

    fn test_config(dir: &TempDir) -> HaServiceConfig {
        let mut config = HaServiceConfig::default();
        config.store_path_epoch_file = dir.path().join("epoch.dat").to_string_lossy().to_string();
        config
    }

    #[tokio::test]
    async fn fresh_leader_promotion_on_empty_log() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn LogStore> = Arc::new(FakeStore::new(0));
        let service = HaService::new(test_config(&dir), store).unwrap();

        assert!(service.change_to_leader(1).await);
        assert_eq!(service.role(), Role::Leader);
        assert_eq!(service.get_last_epoch(), 1);
        assert_eq!(service.get_confirm_offset(), 0);
        assert_eq!(service.in_sync_replicas_nums(), 0);
    }

    #[tokio::test]
    async fn rejects_stale_epoch() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn LogStore> = Arc::new(FakeStore::new(0));
        let service = HaService::new(test_config(&dir), store).unwrap();

        assert!(service.change_to_leader(5).await);
        assert!(!service.change_to_leader(3).await);
        assert_eq!(service.get_last_epoch(), 5);
    }

    #[tokio::test]
    async fn isr_expansion_scenario() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn LogStore> = Arc::new(FakeStore::new(1200));
        let service = HaService::new(test_config(&dir), store).unwrap();
        service.change_to_leader(1).await;

        assert!(service.maybe_expand_in_sync_state_set("A", LogOffset::new(1200)));
        assert!(service.get_sync_state_set().contains("A"));
        assert!(!service.get_local_sync_state_set().contains("A"));

        service.set_sync_state_set(service.get_sync_state_set());
        assert!(service.get_local_sync_state_set().contains("A"));
    }

    #[tokio::test]
    async fn expansion_rejected_due_to_old_epoch_start() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn LogStore> = Arc::new(FakeStore::new(900));
        let service = HaService::new(test_config(&dir), store).unwrap();
        service.change_to_leader(1).await;

        // Simulate a later epoch entry starting at 900 already recorded,
        // and a follower only caught up to 850: below the epoch start.
        assert!(!service.maybe_expand_in_sync_state_set("A", LogOffset::new(850)));
    }

    #[tokio::test]
    async fn demotion_to_follower_tears_down_channels() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn LogStore> = Arc::new(FakeStore::new(0));
        let service = HaService::new(test_config(&dir), store).unwrap();
        service.change_to_leader(1).await;
        service.channels().register(Arc::new(crate::channel::InMemoryFollowerChannel::new("f1", "c1")));
        service.channels().register(Arc::new(crate::channel::InMemoryFollowerChannel::new("f2", "c2")));

        assert!(service.change_to_follower("leader:9000", 7, "follower-1").await);
        assert_eq!(service.role(), Role::Follower);
        assert_eq!(service.state_machine_version(), 7);
        assert!(service.channels().is_empty());
    }
}
