use bytes::Bytes;
use haplog_core::{HaError, LogOffset, Result};
use memmap2::Mmap;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Configuration for segment files
#[derive(Debug, Clone)]
pub struct SegmentConfig {
    pub max_size: u64,
    pub use_mmap: bool,
    pub sync_on_write: bool,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            max_size: 1024 * 1024 * 1024, // 1GB
            use_mmap: true,
            sync_on_write: false,
        }
    }
}

/// A segment file holding a contiguous byte range of the log. Records are
/// stored back to back with no gaps, so a forward byte scan from any
/// position always lands on a frame boundary or runs off the end of
/// `current_size` - the property the dirty-tail validator relies on.
pub struct Segment {
    base_offset: LogOffset,
    path: PathBuf,
    file: RwLock<File>,
    mmap: RwLock<Option<Mmap>>,
    config: SegmentConfig,
    current_size: RwLock<u64>,
}

impl Segment {
    pub fn create(base_offset: LogOffset, directory: &Path, config: SegmentConfig) -> Result<Self> {
        let path = directory.join(format!("{:020}.log", base_offset.as_u64()));

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| HaError::StorageError(e.to_string()))?;

        Ok(Self {
            base_offset,
            path,
            file: RwLock::new(file),
            mmap: RwLock::new(None),
            config,
            current_size: RwLock::new(0),
        })
    }

    pub fn open(path: PathBuf, config: SegmentConfig) -> Result<Self> {
        let filename = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| HaError::StorageError("invalid segment path".to_string()))?;

        let base_offset = filename
            .parse::<u64>()
            .map_err(|e| HaError::StorageError(format!("invalid offset in filename: {e}")))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| HaError::StorageError(e.to_string()))?;

        let current_size = file
            .metadata()
            .map_err(|e| HaError::StorageError(e.to_string()))?
            .len();

        let mut segment = Self {
            base_offset: LogOffset::new(base_offset),
            path,
            file: RwLock::new(file),
            mmap: RwLock::new(None),
            config,
            current_size: RwLock::new(current_size),
        };

        if segment.config.use_mmap && current_size > 0 {
            segment.create_mmap()?;
        }

        Ok(segment)
    }

    /// Append raw bytes, returning the byte position they were written at.
    pub fn append(&self, data: &[u8]) -> Result<u64> {
        let mut file = self.file.write();
        let mut size = self.current_size.write();

        if *size + data.len() as u64 > self.config.max_size {
            return Err(HaError::StorageError("segment is full".to_string()));
        }

        let position = *size;

        file.write_all(data).map_err(|e| HaError::StorageError(e.to_string()))?;

        if self.config.sync_on_write {
            file.sync_all().map_err(|e| HaError::StorageError(e.to_string()))?;
        }

        *size += data.len() as u64;
        // Dropping the mmap forces a remap on next read; cheap relative to
        // the write itself and keeps reads consistent with what was just
        // appended.
        *self.mmap.write() = None;

        Ok(position)
    }

    /// Read `length` bytes starting at `position`. Returns `None` (rather
    /// than an error) when the read would run past the current size, so
    /// callers scanning forward can treat it as "nothing more here" instead
    /// of a storage failure.
    pub fn try_read(&self, position: u64, length: usize) -> Result<Option<Bytes>> {
        let size = *self.current_size.read();
        if position + length as u64 > size {
            return Ok(None);
        }

        if self.mmap.read().is_none() && size > 0 {
            self.ensure_mmap()?;
        }

        if let Some(mmap) = self.mmap.read().as_ref() {
            let start = position as usize;
            let end = start + length;
            return Ok(Some(Bytes::copy_from_slice(&mmap[start..end])));
        }

        use std::io::{Read, Seek, SeekFrom};
        let mut file = self.file.write();
        let mut buffer = vec![0u8; length];
        file.seek(SeekFrom::Start(position))
            .map_err(|e| HaError::StorageError(e.to_string()))?;
        file.read_exact(&mut buffer)
            .map_err(|e| HaError::StorageError(e.to_string()))?;
        Ok(Some(Bytes::from(buffer)))
    }

    pub fn read(&self, position: u64, length: usize) -> Result<Bytes> {
        self.try_read(position, length)?
            .ok_or_else(|| HaError::StorageError(format!("read past end of segment at {position}")))
    }

    pub fn sync(&self) -> Result<()> {
        let file = self.file.read();
        file.sync_all().map_err(|e| HaError::StorageError(e.to_string()))?;
        Ok(())
    }

    /// Truncate the segment so only the first `new_size` bytes remain.
    pub fn truncate(&self, new_size: u64) -> Result<()> {
        let mut file = self.file.write();
        let mut size = self.current_size.write();
        if new_size > *size {
            return Err(HaError::LogTruncationFailure(format!(
                "cannot truncate segment to {new_size}, current size is {size}"
            )));
        }
        file.set_len(new_size).map_err(|e| HaError::StorageError(e.to_string()))?;
        file.sync_all().map_err(|e| HaError::StorageError(e.to_string()))?;
        *size = new_size;
        *self.mmap.write() = None;
        Ok(())
    }

    pub fn base_offset(&self) -> LogOffset {
        self.base_offset
    }

    pub fn size(&self) -> u64 {
        *self.current_size.read()
    }

    pub fn can_fit(&self, size: u64) -> bool {
        *self.current_size.read() + size <= self.config.max_size
    }

    fn create_mmap(&mut self) -> Result<()> {
        let file = self.file.read();
        let mmap = unsafe { Mmap::map(&*file).map_err(|e| HaError::StorageError(e.to_string()))? };
        *self.mmap.write() = Some(mmap);
        Ok(())
    }

    fn ensure_mmap(&self) -> Result<()> {
        let file = self.file.read();
        let mmap = unsafe { Mmap::map(&*file).map_err(|e| HaError::StorageError(e.to_string()))? };
        *self.mmap.write() = Some(mmap);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn create_and_write_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let config = SegmentConfig::default();

        let segment = Segment::create(LogOffset::new(0), temp_dir.path(), config).unwrap();

        let data = b"hello world";
        let position = segment.append(data).unwrap();
        assert_eq!(position, 0);

        let read_data = segment.read(position, data.len()).unwrap();
        assert_eq!(read_data.as_ref(), data);
    }

    #[test]
    fn try_read_past_end_returns_none() {
        let temp_dir = TempDir::new().unwrap();
        let segment = Segment::create(LogOffset::new(0), temp_dir.path(), SegmentConfig::default()).unwrap();
        segment.append(b"abc").unwrap();
        assert!(segment.try_read(0, 10).unwrap().is_none());
    }

    #[test]
    fn truncate_shrinks_segment() {
        let temp_dir = TempDir::new().unwrap();
        let segment = Segment::create(LogOffset::new(0), temp_dir.path(), SegmentConfig::default()).unwrap();
        segment.append(b"hello world").unwrap();
        segment.truncate(5).unwrap();
        assert_eq!(segment.size(), 5);
        assert_eq!(segment.read(0, 5).unwrap().as_ref(), b"hello");
    }
}
