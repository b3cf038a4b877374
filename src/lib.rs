//! haplog - an auto-switching HA replication core for a commit-log message store
//!
//! This crate wires a concrete log store (`haplog_storage::LogStorage`) to
//! the HA replication core (`haplog_ha::HaService`): role lifecycle, ISR
//! membership, the epoch cache, and confirm-offset computation. The wire
//! protocol, cluster controller, and leader election are out of scope; see
//! `haplog_core::traits` for the collaborator contracts this core assumes
//! are supplied externally.

pub mod config;
pub mod server;

pub use haplog_core as core;
pub use haplog_ha as ha;
pub use haplog_storage as storage;

pub use config::HaConfig;
pub use server::DemoServer;

pub mod prelude {
    pub use crate::core::{HaError, LogOffset, LogStore, Record, RecordHeader, Result};
    pub use crate::ha::{HaRuntimeInfo, HaService, Role};
}
