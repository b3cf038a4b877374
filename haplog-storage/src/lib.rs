//! haplog-storage - a concrete, segment-based `LogStore`
//!
//! Features:
//! - Segment-based log storage with length-framed records
//! - Memory-mapped reads
//! - A transient write-buffering pool the HA core drains on role switches
//! - A simulated derived-index dispatcher for dirty-tail detection

pub mod dispatch;
pub mod index;
pub mod log_storage;
pub mod segment;
pub mod write_cache;

pub use log_storage::{LogStorage, LogStorageConfig};
pub use segment::{Segment, SegmentConfig};
pub use write_cache::{WriteCache, WriteCacheConfig};
