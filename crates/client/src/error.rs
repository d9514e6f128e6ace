#![forbid(unsafe_code)]

use dray_core::arg::ArgError;
use dray_storage::StoreError;

#[derive(Debug)]
pub enum ClientError {
    NoShardAvailable,
    Storage(StoreError),
    SerializationFailed(ArgError),
    LeaseLost { jobid: i64 },
    UnknownFunction { funcname: String },
    InvalidInput(&'static str),
}

impl ClientError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoShardAvailable => "NO_SHARD_AVAILABLE",
            Self::Storage(_) => "STORAGE",
            Self::SerializationFailed(_) => "SERIALIZATION_FAILED",
            Self::LeaseLost { .. } => "LEASE_LOST",
            Self::UnknownFunction { .. } => "UNKNOWN_FUNCTION",
            Self::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoShardAvailable => write!(f, "no shard available"),
            Self::Storage(err) => write!(f, "storage: {err}"),
            Self::SerializationFailed(err) => write!(f, "serialization failed: {err}"),
            Self::LeaseLost { jobid } => write!(f, "lease lost for job {jobid}"),
            Self::UnknownFunction { funcname } => write!(f, "unknown function: {funcname}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<StoreError> for ClientError {
    fn from(value: StoreError) -> Self {
        Self::Storage(value)
    }
}

impl From<ArgError> for ClientError {
    fn from(value: ArgError) -> Self {
        Self::SerializationFailed(value)
    }
}
