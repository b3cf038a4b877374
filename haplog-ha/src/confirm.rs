use crate::channel::ChannelSupervisor;
use crate::isr::IsrRegistry;
use std::sync::atomic::{AtomicI64, Ordering};

/// Tracks the confirmed (fully replicated) offset within the current term.
///
/// When the in-sync set has more than one member, the confirmed offset is
/// cached and only recomputed on follower acks or ISR commits. When it has
/// at most one member (the leader alone, or a single remaining follower),
/// `get` always recomputes directly from `max_log_offset` instead of trusting
/// the cache - the conservative resolution for the case where a prior
/// shrink to one member could otherwise leave a stale, too-low value cached.
pub struct ConfirmOffsetTracker {
    confirm_offset: AtomicI64,
}

impl ConfirmOffsetTracker {
    pub fn new() -> Self {
        Self { confirm_offset: AtomicI64::new(-1) }
    }

    pub fn get(&self, isr: &IsrRegistry, channels: &ChannelSupervisor, max_log_offset: u64) -> i64 {
        if isr.local().len() <= 1 {
            return max_log_offset as i64;
        }
        let cached = self.confirm_offset.load(Ordering::Acquire);
        if cached < 0 {
            let computed = Self::compute(isr, channels, max_log_offset);
            self.confirm_offset.store(computed, Ordering::Release);
            return computed;
        }
        cached
    }

    fn compute(isr: &IsrRegistry, channels: &ChannelSupervisor, max_log_offset: u64) -> i64 {
        let local = isr.local();
        let min_ack = channels
            .follower_ack_offsets()
            .into_iter()
            .filter(|(follower, _)| local.contains(follower))
            .map(|(_, ack)| ack)
            .min();
        min_ack.map(|m| m.min(max_log_offset as i64)).unwrap_or(max_log_offset as i64)
    }

    /// A follower ack was processed. Recomputes and raises the confirmed
    /// offset; never lowers it, since within a term the confirmed offset is
    /// monotonic.
    pub fn on_follower_ack(&self, follower: &str, isr: &IsrRegistry, channels: &ChannelSupervisor, max_log_offset: u64) {
        if !isr.local().contains(follower) {
            return;
        }
        let computed = Self::compute(isr, channels, max_log_offset);
        self.confirm_offset.fetch_max(computed, Ordering::AcqRel);
    }

    /// The in-sync set just committed a new membership (expand or shrink).
    pub fn on_isr_commit(&self, isr: &IsrRegistry, channels: &ChannelSupervisor, max_log_offset: u64) {
        let computed = Self::compute(isr, channels, max_log_offset);
        self.confirm_offset.fetch_max(computed, Ordering::AcqRel);
    }

    /// A term boundary: reset unconditionally instead of raising, since the
    /// new term's confirmed offset is unrelated to the old one.
    pub fn reset_for_new_term(&self, max_log_offset: u64) {
        self.confirm_offset.store(max_log_offset as i64, Ordering::Release);
    }

    pub fn update(&self, offset: i64) {
        self.confirm_offset.store(offset, Ordering::Release);
    }
}

impl Default for ConfirmOffsetTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recomputes_unconditionally_with_at_most_one_member() {
        let isr = IsrRegistry::new(1000);
        let channels = ChannelSupervisor::new();
        let tracker = ConfirmOffsetTracker::new();

        assert_eq!(tracker.get(&isr, &channels, 42), 42);
    }

    #[tokio::test]
    async fn caches_across_multiple_members() {
        let isr = IsrRegistry::new(1000);
        let channels = ChannelSupervisor::new();
        isr.propose_add("f1".to_string());
        isr.commit(isr.effective());
        isr.propose_add("f2".to_string());
        isr.commit(isr.effective());

        let tracker = ConfirmOffsetTracker::new();
        channels.register(std::sync::Arc::new(crate::channel::InMemoryFollowerChannel::new(
            "f1", "c1",
        )));
        channels.register(std::sync::Arc::new(crate::channel::InMemoryFollowerChannel::new(
            "f2", "c2",
        )));

        // neither follower has acked anything yet, so the minimum ack
        // across the in-sync set is still 0
        assert_eq!(tracker.get(&isr, &channels, 100), 0);
    }
}
