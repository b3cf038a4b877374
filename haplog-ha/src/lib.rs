//! haplog-ha - the auto-switching HA replication core
//!
//! Ties together the epoch cache (C1), ISR registry (C2), confirm-offset
//! tracker (C3), role state machine (C4), and replication channel
//! supervisor (C5) behind a single `HaService` facade. The log store itself
//! is an opaque collaborator behind `haplog_core::LogStore`.

pub mod channel;
pub mod confirm;
pub mod config;
pub mod epoch_cache;
pub mod isr;
pub mod role;
pub mod runtime_info;

pub use channel::{ChannelSupervisor, InMemoryFollowerChannel, InMemoryUpstreamChannel};
pub use confirm::ConfirmOffsetTracker;
pub use config::HaServiceConfig;
pub use epoch_cache::{EpochBoundary, EpochCache, EpochEntry};
pub use isr::{IsrListener, IsrRegistry};
pub use role::{HaService, Role};
pub use runtime_info::{FollowerConnectionInfo, HaRuntimeInfo, UpstreamConnectionInfo};
