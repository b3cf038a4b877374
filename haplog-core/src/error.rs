use thiserror::Error;

pub type Result<T> = std::result::Result<T, HaError>;

#[derive(Error, Debug, Clone)]
pub enum HaError {
    #[error("epoch {attempted} is not greater than the last known epoch {last}")]
    InvalidEpochOrder { last: u32, attempted: u32 },

    #[error("epoch {epoch} start offset {attempted} regresses before last start offset {last}")]
    InvalidEpochStartOffset { epoch: u32, last: u64, attempted: u64 },

    #[error("epoch file persistence failed: {0}")]
    EpochPersistenceFailure(String),

    #[error("log truncation failed: {0}")]
    LogTruncationFailure(String),

    /// Reserved for `LogStore` implementations that choose to bound the
    /// dispatcher-drain wait in `changeToLeader`. The reference store never
    /// raises it; it waits on dispatcher progress unconditionally.
    #[error("timed out waiting for the dispatcher to catch up")]
    DispatchStallTimeout,

    /// Informational only. A channel disconnecting is expected broker
    /// traffic, never constructed as a hard error; it is logged and fed into
    /// `removeOnDisconnect` instead of propagated.
    #[error("replication channel to {0} disconnected")]
    ChannelDisconnect(String),

    #[error("follower client failed to start: {0}")]
    StartFollowerFailure(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("not leader")]
    NotLeader,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("io error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for HaError {
    fn from(err: std::io::Error) -> Self {
        HaError::IoError(err.to_string())
    }
}
