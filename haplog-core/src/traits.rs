use async_trait::async_trait;

use crate::{error::Result, offset::LogOffset, record::Record};

/// The commit log this core replicates on top of.
///
/// `haplog-ha`'s role state machine treats every implementation as opaque:
/// it never inspects bytes, segment files, or index structures directly. It
/// only calls the handful of operations a role switch needs: where the log
/// currently ends, how far the asynchronous per-topic-queue dispatcher lags
/// behind the log, and how to truncate or validate a dirty tail.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Highest offset durably written to the log.
    fn max_offset(&self) -> LogOffset;

    /// Bytes the derived-index dispatcher still has to catch up on. Zero
    /// means the dispatcher has fully caught up to `max_offset`.
    fn dispatch_behind_bytes(&self) -> i64;

    /// Physically truncate the log so `max_offset()` becomes `offset`.
    async fn truncate_to(&self, offset: LogOffset) -> Result<()>;

    /// Walk the tail written since the last acknowledged dispatch position,
    /// message by message, and truncate at the first entry that fails to
    /// validate. Returns `None` when there is no dirty tail to inspect
    /// (`dispatch_behind_bytes() <= 0`), otherwise the offset the log was
    /// truncated to.
    async fn validate_and_truncate_tail(&self) -> Result<Option<LogOffset>>;

    /// Block until `dispatch_behind_bytes() == 0`. The reference store
    /// resolves this via a notification, not a busy loop; it does not time
    /// out, matching the one allowed unbounded wait in a role switch.
    async fn wait_dispatch_caught_up(&self);

    /// Wait until no writes are pending in the transient buffer pool, then
    /// return. A no-op when the transient pool is not enabled.
    async fn drain_transient_buffers(&self) -> Result<()>;

    /// Switch the transient store pool between buffered writes
    /// (`buffered = true`) and direct, real-commit writes (`false`).
    fn set_transient_pool_mode(&self, buffered: bool);

    /// Rebuild any derived (per-topic-queue) metadata from the canonical
    /// log after a truncation. Most stores have nothing to do here.
    async fn rebuild_derived_metadata(&self) -> Result<()> {
        Ok(())
    }

    async fn append(&self, record: Record) -> Result<LogOffset>;

    async fn read(&self, offset: LogOffset) -> Result<Option<Record>>;

    async fn read_from(&self, offset: LogOffset, max_count: usize) -> Result<Vec<Record>>;
}

/// A leader's view of one connected follower's replication channel.
///
/// Implementations own the actual network I/O; this core only reads the
/// bookkeeping a channel accumulates while relaying data.
pub trait FollowerChannel: Send + Sync {
    fn follower_address(&self) -> &str;
    fn slave_ack_offset(&self) -> LogOffset;
    fn transferred_bytes_per_second(&self) -> f64;
    fn transfer_from_offset(&self) -> LogOffset;
    fn client_address(&self) -> &str;
}

/// A follower's single channel to its leader.
pub trait UpstreamChannel: Send + Sync {
    fn ha_master_address(&self) -> Option<String>;
    fn max_offset(&self) -> LogOffset;
    fn last_read_timestamp(&self) -> i64;
    fn last_write_timestamp(&self) -> i64;
    fn transferred_bytes_per_second(&self) -> f64;
    fn master_flush_offset(&self) -> LogOffset;
}
