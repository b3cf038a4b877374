use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::offset::LogOffset;

/// A single log record as the HA core and its reference log store exchange it.
///
/// `epoch` marks which leader term produced the record; the epoch cache (C1)
/// uses it to locate where a term's writes began when walking history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub offset: LogOffset,
    pub epoch: u32,
    pub timestamp: SystemTime,
    pub key: Option<Bytes>,
    pub value: Bytes,
    pub headers: Vec<RecordHeader>,
}

impl Record {
    pub fn new(epoch: u32, key: Option<Bytes>, value: Bytes) -> Self {
        Self {
            offset: LogOffset::ZERO,
            epoch,
            timestamp: SystemTime::now(),
            key,
            value,
            headers: Vec::new(),
        }
    }

    pub fn with_offset(mut self, offset: LogOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_headers(mut self, headers: Vec<RecordHeader>) -> Self {
        self.headers = headers;
        self
    }

    pub fn size_bytes(&self) -> usize {
        self.key.as_ref().map_or(0, |k| k.len()) + self.value.len()
    }
}

/// Record header for metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordHeader {
    pub key: String,
    pub value: Bytes,
}

impl RecordHeader {
    pub fn new(key: String, value: Bytes) -> Self {
        Self { key, value }
    }
}
