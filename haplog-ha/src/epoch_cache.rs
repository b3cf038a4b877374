use haplog_core::{HaError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const RECORD_SIZE: usize = 12;

/// One leader term: the epoch number and the log offset its writes began
/// at. `end_offset` is never stored - it is derived from the following
/// entry's `start_offset` (or left open for the newest entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochEntry {
    pub epoch: u32,
    pub start_offset: u64,
}

/// An epoch entry as returned to callers, with its derived end bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochBoundary {
    pub epoch: u32,
    pub start_offset: u64,
    pub end_offset: Option<u64>,
}

struct Inner {
    file: File,
    entries: Vec<EpochEntry>,
}

/// Append-only record of every leader term this node has held or observed,
/// persisted as fixed-width 12-byte big-endian records (`epoch: u32 |
/// start_offset: u64`). Appends are serialized behind a single mutex and
/// fsynced before returning; truncations rewrite the file via a
/// write-temp-then-rename so a crash mid-truncation never leaves a
/// half-written file in place.
pub struct EpochCache {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl EpochCache {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut buf = Vec::new();
        if path.exists() {
            File::open(&path)?.read_to_end(&mut buf)?;
        }

        let full = buf.len() / RECORD_SIZE;
        let mut entries = Vec::with_capacity(full);
        for i in 0..full {
            let chunk = &buf[i * RECORD_SIZE..(i + 1) * RECORD_SIZE];
            let epoch = u32::from_be_bytes(chunk[0..4].try_into().unwrap());
            let start_offset = u64::from_be_bytes(chunk[4..12].try_into().unwrap());

            let ok = match entries.last() {
                Some(&EpochEntry { epoch: pe, start_offset: ps }) => epoch > pe && start_offset >= ps,
                None => true,
            };

            if !ok {
                if i == full - 1 {
                    tracing::warn!(path = %path.display(), index = i, "discarding torn tail epoch record");
                    break;
                }
                return Err(HaError::EpochPersistenceFailure(format!(
                    "non-tail epoch record at index {i} violates monotonicity"
                )));
            }

            entries.push(EpochEntry { epoch, start_offset });
        }

        let torn_trailing_bytes = buf.len() % RECORD_SIZE != 0;
        if torn_trailing_bytes {
            tracing::warn!(path = %path.display(), "discarding torn trailing bytes in epoch file");
        }

        let needs_rewrite = torn_trailing_bytes || entries.len() != full;
        let snapshot = entries.clone();
        let file = Self::open_append(&path)?;
        let cache = Self { path: path.clone(), inner: Mutex::new(Inner { file, entries }) };
        if needs_rewrite {
            cache.rewrite_locked(&snapshot)?;
        }
        Ok(cache)
    }

    fn open_append(path: &Path) -> Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| HaError::EpochPersistenceFailure(e.to_string()))
    }

    pub fn last_epoch(&self) -> u32 {
        self.inner.lock().entries.last().map(|e| e.epoch).unwrap_or(0)
    }

    pub fn last_entry(&self) -> Option<EpochEntry> {
        self.inner.lock().entries.last().copied()
    }

    pub fn all_entries(&self) -> Vec<EpochBoundary> {
        let inner = self.inner.lock();
        let entries = &inner.entries;
        entries
            .iter()
            .enumerate()
            .map(|(i, e)| EpochBoundary {
                epoch: e.epoch,
                start_offset: e.start_offset,
                end_offset: entries.get(i + 1).map(|next| next.start_offset),
            })
            .collect()
    }

    pub fn find_epoch_at_offset(&self, offset: u64) -> Option<EpochBoundary> {
        self.all_entries().into_iter().rev().find(|e| e.start_offset <= offset)
    }

    pub fn append(&self, epoch: u32, start_offset: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(last) = inner.entries.last() {
            if epoch <= last.epoch {
                return Err(HaError::InvalidEpochOrder { last: last.epoch, attempted: epoch });
            }
            if start_offset < last.start_offset {
                return Err(HaError::InvalidEpochStartOffset {
                    epoch,
                    last: last.start_offset,
                    attempted: start_offset,
                });
            }
        }

        let mut rec = [0u8; RECORD_SIZE];
        rec[0..4].copy_from_slice(&epoch.to_be_bytes());
        rec[4..12].copy_from_slice(&start_offset.to_be_bytes());

        inner
            .file
            .write_all(&rec)
            .map_err(|e| HaError::EpochPersistenceFailure(e.to_string()))?;
        inner
            .file
            .sync_all()
            .map_err(|e| HaError::EpochPersistenceFailure(e.to_string()))?;

        inner.entries.push(EpochEntry { epoch, start_offset });
        tracing::info!(epoch, start_offset, "appended epoch entry");
        Ok(())
    }

    /// Drop every entry whose epoch is >= `epoch`.
    pub fn truncate_suffix_by_epoch(&self, epoch: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.entries.retain(|e| e.epoch < epoch);
        let snapshot = inner.entries.clone();
        drop(inner);
        self.rewrite_locked(&snapshot)
    }

    /// Drop every entry whose start_offset is >= `offset`.
    pub fn truncate_suffix_by_offset(&self, offset: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.entries.retain(|e| e.start_offset < offset);
        let snapshot = inner.entries.clone();
        drop(inner);
        self.rewrite_locked(&snapshot)
    }

    /// Drop every entry that ends at or before `offset`, i.e. the log's
    /// retention has moved past that term entirely.
    pub fn truncate_prefix_by_offset(&self, offset: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        let cutoff = inner
            .entries
            .iter()
            .rposition(|e| e.start_offset <= offset)
            .unwrap_or(0);
        inner.entries.drain(0..cutoff);
        let snapshot = inner.entries.clone();
        drop(inner);
        self.rewrite_locked(&snapshot)
    }

    fn rewrite_locked(&self, entries: &[EpochEntry]) -> Result<()> {
        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| HaError::EpochPersistenceFailure(e.to_string()))?;

        for entry in entries {
            let mut rec = [0u8; RECORD_SIZE];
            rec[0..4].copy_from_slice(&entry.epoch.to_be_bytes());
            rec[4..12].copy_from_slice(&entry.start_offset.to_be_bytes());
            tmp.write_all(&rec).map_err(|e| HaError::EpochPersistenceFailure(e.to_string()))?;
        }
        tmp.sync_all().map_err(|e| HaError::EpochPersistenceFailure(e.to_string()))?;
        drop(tmp);

        std::fs::rename(&tmp_path, &self.path).map_err(|e| HaError::EpochPersistenceFailure(e.to_string()))?;

        let mut inner = self.inner.lock();
        inner.file = Self::open_append(&self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_path(dir: &TempDir) -> PathBuf {
        dir.path().join("epoch.dat")
    }

    #[test]
    fn append_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = cache_path(&dir);
        {
            let cache = EpochCache::load(&path).unwrap();
            cache.append(1, 0).unwrap();
            cache.append(2, 100).unwrap();
        }
        let reloaded = EpochCache::load(&path).unwrap();
        assert_eq!(reloaded.last_epoch(), 2);
        let entries = reloaded.all_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].end_offset, Some(100));
        assert_eq!(entries[1].end_offset, None);
    }

    #[test]
    fn append_rejects_non_increasing_epoch() {
        let dir = TempDir::new().unwrap();
        let cache = EpochCache::load(cache_path(&dir)).unwrap();
        cache.append(5, 0).unwrap();
        assert!(matches!(cache.append(5, 10), Err(HaError::InvalidEpochOrder { .. })));
        assert!(matches!(cache.append(4, 10), Err(HaError::InvalidEpochOrder { .. })));
    }

    #[test]
    fn append_rejects_regressed_start_offset_even_with_valid_epoch() {
        let dir = TempDir::new().unwrap();
        let cache = EpochCache::load(cache_path(&dir)).unwrap();
        cache.append(1, 100).unwrap();
        assert!(matches!(
            cache.append(2, 50),
            Err(HaError::InvalidEpochStartOffset { .. })
        ));
        assert_eq!(cache.last_epoch(), 1);
    }

    #[test]
    fn torn_tail_is_discarded_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = cache_path(&dir);
        {
            let cache = EpochCache::load(&path).unwrap();
            cache.append(1, 0).unwrap();
            cache.append(2, 50).unwrap();
        }
        // simulate a torn trailing write: a few extra garbage bytes
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0u8; 5]).unwrap();

        let reloaded = EpochCache::load(&path).unwrap();
        assert_eq!(reloaded.last_epoch(), 2);
        assert_eq!(reloaded.all_entries().len(), 2);
    }

    #[test]
    fn truncate_suffix_by_epoch_drops_newer_terms() {
        let dir = TempDir::new().unwrap();
        let cache = EpochCache::load(cache_path(&dir)).unwrap();
        cache.append(1, 0).unwrap();
        cache.append(2, 50).unwrap();
        cache.append(3, 120).unwrap();

        cache.truncate_suffix_by_epoch(2).unwrap();
        assert_eq!(cache.last_epoch(), 1);
    }

    #[test]
    fn find_epoch_at_offset_locates_containing_term() {
        let dir = TempDir::new().unwrap();
        let cache = EpochCache::load(cache_path(&dir)).unwrap();
        cache.append(1, 0).unwrap();
        cache.append(2, 50).unwrap();

        let found = cache.find_epoch_at_offset(30).unwrap();
        assert_eq!(found.epoch, 1);
        let found = cache.find_epoch_at_offset(75).unwrap();
        assert_eq!(found.epoch, 2);
    }
}
