use haplog_core::Record;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Configuration for the transient write-buffering pool.
#[derive(Debug, Clone)]
pub struct WriteCacheConfig {
    pub max_size: u64,
    pub max_buffer_time: Duration,
    pub enabled: bool,
}

impl Default for WriteCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 16 * 1024 * 1024,
            max_buffer_time: Duration::from_millis(10),
            enabled: true,
        }
    }
}

/// Buffers records in memory before they are committed to a segment.
///
/// This is the transient store pool the HA core drains and switches off
/// during `changeToLeader`/`changeToFollower`: while `enabled`, `push`
/// accepts records into memory and `LogStorage` only flushes them to disk on
/// a size/time threshold or an explicit drain; once disabled, every write
/// goes straight to the segment.
pub struct WriteCache {
    records: Mutex<VecDeque<Record>>,
    pending_bytes: AtomicU64,
    started_at: Mutex<Instant>,
    enabled: AtomicBool,
    config: WriteCacheConfig,
}

impl WriteCache {
    pub fn new(config: WriteCacheConfig) -> Self {
        let enabled = config.enabled;
        Self {
            records: Mutex::new(VecDeque::new()),
            pending_bytes: AtomicU64::new(0),
            started_at: Mutex::new(Instant::now()),
            enabled: AtomicBool::new(enabled),
            config,
        }
    }

    /// Try to buffer `record`. Returns `true` if it was accepted into the
    /// cache, `false` if the caller should write it directly (cache
    /// disabled or full).
    pub fn push(&self, record: Record) -> bool {
        if !self.enabled.load(Ordering::Acquire) {
            return false;
        }
        let size = record.size_bytes() as u64;
        if self.pending_bytes.load(Ordering::Acquire) + size > self.config.max_size {
            return false;
        }
        let mut records = self.records.lock();
        if records.is_empty() {
            *self.started_at.lock() = Instant::now();
        }
        self.pending_bytes.fetch_add(size, Ordering::AcqRel);
        records.push_back(record);
        true
    }

    pub fn should_flush(&self) -> bool {
        if self.pending_bytes.load(Ordering::Acquire) >= self.config.max_size {
            return true;
        }
        !self.records.lock().is_empty() && self.started_at.lock().elapsed() >= self.config.max_buffer_time
    }

    /// Drain every buffered record for a flush to durable storage.
    pub fn drain(&self) -> Vec<Record> {
        let mut records = self.records.lock();
        self.pending_bytes.store(0, Ordering::Release);
        records.drain(..).collect()
    }

    pub fn pending_bytes(&self) -> u64 {
        self.pending_bytes.load(Ordering::Acquire)
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn rec(n: usize) -> Record {
        Record::new(1, None, Bytes::from(vec![0u8; n]))
    }

    #[test]
    fn push_accepts_until_full() {
        let cache = WriteCache::new(WriteCacheConfig { max_size: 10, ..Default::default() });
        assert!(cache.push(rec(5)));
        assert!(cache.push(rec(4)));
        assert!(!cache.push(rec(4)));
    }

    #[test]
    fn disabled_cache_rejects_everything() {
        let cache = WriteCache::new(WriteCacheConfig { enabled: false, ..Default::default() });
        assert!(!cache.push(rec(1)));
    }

    #[test]
    fn drain_empties_and_resets_pending_bytes() {
        let cache = WriteCache::new(WriteCacheConfig::default());
        cache.push(rec(5));
        assert_eq!(cache.drain().len(), 1);
        assert_eq!(cache.pending_bytes(), 0);
    }
}
