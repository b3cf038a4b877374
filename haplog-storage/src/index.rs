use haplog_core::{HaError, LogOffset, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// Index entry: maps a logical offset to the physical frame position (the
/// start of the length prefix) and the payload length.
#[derive(Debug, Clone, Copy)]
struct IndexEntry {
    offset: LogOffset,
    frame_position: u64,
    payload_len: u32,
}

const INDEX_ENTRY_SIZE: usize = 20; // 8 + 8 + 4 bytes

/// An index for quickly locating records in a segment by logical offset.
/// Entries here track the derived-index dispatcher's progress: a record can
/// exist in the segment bytes before it is indexed, which is exactly the
/// "dirty tail" the tail validator is built to find.
pub struct Index {
    file: RwLock<File>,
    entries: RwLock<BTreeMap<u64, IndexEntry>>,
}

impl Index {
    pub fn create(segment_path: &Path) -> Result<Self> {
        let path = segment_path.with_extension("index");

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| HaError::StorageError(e.to_string()))?;

        Ok(Self {
            file: RwLock::new(file),
            entries: RwLock::new(BTreeMap::new()),
        })
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| HaError::StorageError(e.to_string()))?;

        let mut entries = BTreeMap::new();
        let mut buffer = vec![0u8; INDEX_ENTRY_SIZE];

        loop {
            match file.read_exact(&mut buffer) {
                Ok(_) => {
                    let offset = u64::from_le_bytes(buffer[0..8].try_into().unwrap());
                    let frame_position = u64::from_le_bytes(buffer[8..16].try_into().unwrap());
                    let payload_len = u32::from_le_bytes(buffer[16..20].try_into().unwrap());

                    entries.insert(
                        offset,
                        IndexEntry {
                            offset: LogOffset::new(offset),
                            frame_position,
                            payload_len,
                        },
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(HaError::StorageError(e.to_string())),
            }
        }

        Ok(Self {
            file: RwLock::new(file),
            entries: RwLock::new(entries),
        })
    }

    pub fn append(&self, offset: LogOffset, frame_position: u64, payload_len: u32) -> Result<()> {
        let entry = IndexEntry { offset, frame_position, payload_len };

        let mut file = self.file.write();
        let mut buffer = [0u8; INDEX_ENTRY_SIZE];
        buffer[0..8].copy_from_slice(&offset.as_u64().to_le_bytes());
        buffer[8..16].copy_from_slice(&frame_position.to_le_bytes());
        buffer[16..20].copy_from_slice(&payload_len.to_le_bytes());

        file.write_all(&buffer).map_err(|e| HaError::StorageError(e.to_string()))?;

        self.entries.write().insert(offset.as_u64(), entry);

        Ok(())
    }

    pub fn lookup(&self, offset: LogOffset) -> Option<(u64, u32)> {
        self.entries
            .read()
            .get(&offset.as_u64())
            .map(|entry| (entry.frame_position, entry.payload_len))
    }

    pub fn last(&self) -> Option<(LogOffset, u64, u32)> {
        self.entries
            .read()
            .values()
            .next_back()
            .map(|entry| (entry.offset, entry.frame_position, entry.payload_len))
    }

    /// Remove every entry at or beyond `offset`; used when a truncation
    /// shortens the log.
    pub fn truncate_suffix(&self, offset: LogOffset) -> Result<()> {
        let mut entries = self.entries.write();
        let retained: BTreeMap<u64, IndexEntry> = entries
            .iter()
            .filter(|(o, _)| **o < offset.as_u64())
            .map(|(o, e)| (*o, *e))
            .collect();
        *entries = retained;
        self.rewrite_locked(&entries)
    }

    fn rewrite_locked(&self, entries: &BTreeMap<u64, IndexEntry>) -> Result<()> {
        let mut file = self.file.write();
        file.set_len(0).map_err(|e| HaError::StorageError(e.to_string()))?;
        use std::io::{Seek, SeekFrom};
        file.seek(SeekFrom::Start(0)).map_err(|e| HaError::StorageError(e.to_string()))?;
        for entry in entries.values() {
            let mut buffer = [0u8; INDEX_ENTRY_SIZE];
            buffer[0..8].copy_from_slice(&entry.offset.as_u64().to_le_bytes());
            buffer[8..16].copy_from_slice(&entry.frame_position.to_le_bytes());
            buffer[16..20].copy_from_slice(&entry.payload_len.to_le_bytes());
            file.write_all(&buffer).map_err(|e| HaError::StorageError(e.to_string()))?;
        }
        file.sync_all().map_err(|e| HaError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let file = self.file.read();
        file.sync_all().map_err(|e| HaError::StorageError(e.to_string()))?;
        Ok(())
    }
}
