use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Callback invoked with the newly committed in-sync set. Exceptions inside
/// a listener are caught and logged; they never stop the notification loop.
pub type IsrListener = Box<dyn Fn(HashSet<String>) + Send + Sync>;

struct IsrState {
    local: HashSet<String>,
    remote: HashSet<String>,
    synchronizing: bool,
}

/// Leader-side membership of the in-sync replica set.
///
/// `local` is the last committed set; `remote` is a pending proposal while
/// `synchronizing` is set. Per-follower "last caught up" timestamps live in
/// a sharded concurrent map (`dashmap`) so a busy leader can update them
/// without contending on the registry's own lock. Listener fan-out runs on
/// a dedicated tokio task reading from a bounded channel, so a slow listener
/// never blocks the caller committing an ISR change.
pub struct IsrRegistry {
    state: RwLock<IsrState>,
    caught_up: DashMap<String, i64>,
    listeners: Arc<RwLock<Vec<IsrListener>>>,
    notify_tx: mpsc::Sender<HashSet<String>>,
    max_not_catchup_ms: i64,
}

impl IsrRegistry {
    pub fn new(max_not_catchup_ms: i64) -> Self {
        let (tx, mut rx) = mpsc::channel::<HashSet<String>>(64);
        let listeners = Arc::new(RwLock::new(Vec::new()));

        let worker_listeners = listeners.clone();
        tokio::spawn(async move {
            while let Some(new_set) = rx.recv().await {
                for listener in worker_listeners.read().iter() {
                    let set = new_set.clone();
                    if catch_unwind(AssertUnwindSafe(|| listener(set))).is_err() {
                        tracing::error!("in-sync-set listener panicked, continuing");
                    }
                }
            }
        });

        Self {
            state: RwLock::new(IsrState {
                local: HashSet::new(),
                remote: HashSet::new(),
                synchronizing: false,
            }),
            caught_up: DashMap::new(),
            listeners,
            notify_tx: tx,
            max_not_catchup_ms,
        }
    }

    pub fn local(&self) -> HashSet<String> {
        self.state.read().local.clone()
    }

    pub fn effective(&self) -> HashSet<String> {
        let state = self.state.read();
        if state.synchronizing {
            state.local.union(&state.remote).cloned().collect()
        } else {
            state.local.clone()
        }
    }

    pub fn is_synchronizing(&self) -> bool {
        self.state.read().synchronizing
    }

    /// `max(|local|, |remote|)` while synchronizing, else `|local|` - chosen
    /// so acknowledgement requirements during a reconfiguration are at least
    /// as strict as either endpoint of the transition.
    pub fn in_sync_replica_count(&self) -> usize {
        let state = self.state.read();
        if state.synchronizing {
            state.local.len().max(state.remote.len())
        } else {
            state.local.len()
        }
    }

    pub fn update_caught_up(&self, follower: &str, ts_ms: i64) {
        self.caught_up
            .entry(follower.to_string())
            .and_modify(|v| *v = (*v).max(ts_ms))
            .or_insert(ts_ms);
    }

    /// Propose adding `follower` to the in-sync set. Returns `true` if a new
    /// proposal was made (it was not already in `local`).
    pub fn propose_add(&self, follower: String) -> bool {
        let mut state = self.state.write();
        if state.local.contains(&follower) {
            return false;
        }
        let mut proposed = state.local.clone();
        proposed.insert(follower.clone());
        state.remote = proposed.clone();
        state.synchronizing = true;
        drop(state);
        tracing::info!(follower, "proposing ISR expansion");
        self.notify(proposed);
        true
    }

    /// Inspect caught-up timestamps against `max_not_catchup_ms` and propose
    /// dropping any stale local members. Returns the proposed set if a
    /// shrink was made, `None` if every member is still within the window.
    pub fn maybe_shrink(&self, now_ms: i64) -> Option<HashSet<String>> {
        let local = self.local();
        let stale: Vec<String> = local
            .iter()
            .filter(|follower| {
                let last = self.caught_up.get(follower.as_str()).map(|v| *v).unwrap_or(0);
                now_ms - last > self.max_not_catchup_ms
            })
            .cloned()
            .collect();

        if stale.is_empty() {
            return None;
        }

        let mut state = self.state.write();
        let mut proposed = state.local.clone();
        for follower in &stale {
            proposed.remove(follower);
        }
        state.remote = proposed.clone();
        state.synchronizing = true;
        drop(state);
        tracing::warn!(?stale, "proposing ISR shrink for stale followers");
        Some(proposed)
    }

    /// Propose removing a follower whose channel just disconnected. Same
    /// shape as `maybe_shrink`: sets `remote`/`synchronizing` and notifies,
    /// leaving `local` untouched until the supervisor calls `commit`.
    pub fn remove_on_disconnect(&self, follower: &str) -> Option<HashSet<String>> {
        let mut state = self.state.write();
        if !state.local.contains(follower) {
            return None;
        }
        let mut proposed = state.local.clone();
        proposed.remove(follower);
        state.remote = proposed.clone();
        state.synchronizing = true;
        drop(state);
        self.caught_up.remove(follower);
        tracing::info!(follower, "proposing ISR removal after disconnect");
        self.notify(proposed.clone());
        Some(proposed)
    }

    /// Commit a proposed set as the new local membership.
    pub fn commit(&self, new_set: HashSet<String>) -> HashSet<String> {
        let mut state = self.state.write();
        state.local = new_set.clone();
        state.remote = new_set.clone();
        state.synchronizing = false;
        drop(state);
        tracing::info!(?new_set, "committed in-sync set");
        new_set
    }

    /// Clear membership down to just the leader itself, for a new term.
    pub fn reset_for_new_term(&self) {
        let mut state = self.state.write();
        state.local = HashSet::new();
        state.remote = HashSet::new();
        state.synchronizing = false;
    }

    pub fn register_listener(&self, listener: IsrListener) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, new_set: HashSet<String>) {
        // Fire-and-forget onto the dedicated notification task; a full
        // channel means a burst of changes, not a reason to block the
        // caller holding no lock at this point.
        if self.notify_tx.try_send(new_set).is_err() {
            tracing::warn!("in-sync-set notification channel full, dropping update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn propose_add_sets_synchronizing_and_effective() {
        let isr = IsrRegistry::new(1000);
        assert!(isr.propose_add("f1".to_string()));
        assert!(isr.is_synchronizing());
        assert!(isr.effective().contains("f1"));
        assert!(!isr.local().contains("f1"));
    }

    #[tokio::test]
    async fn replica_count_is_max_of_both_sets_while_synchronizing() {
        let isr = IsrRegistry::new(1000);
        isr.propose_add("f1".to_string());
        isr.commit(isr.effective());
        assert_eq!(isr.in_sync_replica_count(), 1);

        // shrink proposes removing f1: local={f1}, remote={}
        isr.update_caught_up("f1", 0);
        isr.maybe_shrink(100_000);
        assert_eq!(isr.in_sync_replica_count(), 1);
    }

    #[tokio::test]
    async fn commit_moves_proposal_into_local() {
        let isr = IsrRegistry::new(1000);
        isr.propose_add("f1".to_string());
        let committed = isr.commit(isr.effective());
        assert!(committed.contains("f1"));
        assert!(isr.local().contains("f1"));
        assert!(!isr.is_synchronizing());
    }

    #[tokio::test]
    async fn maybe_shrink_drops_stale_followers() {
        let isr = IsrRegistry::new(100);
        isr.propose_add("f1".to_string());
        isr.commit(isr.effective());
        isr.update_caught_up("f1", 0);

        let proposed = isr.maybe_shrink(1000).unwrap();
        assert!(!proposed.contains("f1"));
    }

    #[tokio::test]
    async fn maybe_shrink_keeps_fresh_followers() {
        let isr = IsrRegistry::new(1000);
        isr.propose_add("f1".to_string());
        isr.commit(isr.effective());
        isr.update_caught_up("f1", 900);

        assert!(isr.maybe_shrink(1000).is_none());
    }

    #[tokio::test]
    async fn remove_on_disconnect_only_proposes() {
        let isr = IsrRegistry::new(1000);
        isr.propose_add("f1".to_string());
        isr.commit(isr.effective());

        let proposed = isr.remove_on_disconnect("f1").unwrap();
        assert!(!proposed.contains("f1"));
        assert!(isr.local().contains("f1"));
        assert!(isr.is_synchronizing());

        isr.commit(proposed);
        assert!(!isr.local().contains("f1"));
        assert!(!isr.is_synchronizing());
    }

    #[tokio::test]
    async fn listener_is_notified_on_propose_and_remove() {
        let isr = IsrRegistry::new(1000);
        let seen = std::sync::Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        isr.register_listener(Box::new(move |set| seen_clone.lock().push(set)));

        isr.propose_add("f1".to_string());
        for _ in 0..100 {
            if !seen.lock().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(seen.lock().len(), 1);
    }
}
