//! haplog-core - fundamental types for the auto-switching HA replication core
//!
//! Provides log offsets, records, the shared error type, and the collaborator
//! traits (`LogStore`, `FollowerChannel`, `UpstreamChannel`) that the HA core
//! treats as opaque externals owned by the rest of the broker.

pub mod error;
pub mod offset;
pub mod record;
pub mod traits;

pub use error::{HaError, Result};
pub use offset::{LogOffset, OffsetRange};
pub use record::{Record, RecordHeader};
pub use traits::{FollowerChannel, LogStore, UpstreamChannel};
