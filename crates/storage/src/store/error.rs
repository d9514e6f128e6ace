#![forbid(unsafe_code)]

use rusqlite::ErrorCode;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    ConnectionLost(rusqlite::Error),
    SerializationConflict(rusqlite::Error),
    ConstraintViolated(rusqlite::Error),
    InvalidInput(&'static str),
    UnknownJob { jobid: i64 },
    ReplaceAborted,
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "IO",
            Self::Sql(_) => "SQL",
            Self::ConnectionLost(_) => "CONNECTION_LOST",
            Self::SerializationConflict(_) => "SERIALIZATION_CONFLICT",
            Self::ConstraintViolated(_) => "CONSTRAINT_VIOLATED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::UnknownJob { .. } => "UNKNOWN_JOB",
            Self::ReplaceAborted => "REPLACE_ABORTED",
        }
    }

    /// Transient kinds put the owning shard into backoff; the rest are
    /// caller mistakes or ordinary data states.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::ConnectionLost(_) | Self::SerializationConflict(_)
        )
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::ConnectionLost(err) => write!(f, "connection lost: {err}"),
            Self::SerializationConflict(err) => write!(f, "serialization conflict: {err}"),
            Self::ConstraintViolated(err) => write!(f, "constraint violated: {err}"),
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::UnknownJob { jobid } => write!(f, "unknown job: {jobid}"),
            Self::ReplaceAborted => write!(f, "replace aborted before commit"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        match &value {
            rusqlite::Error::SqliteFailure(err, _) => match err.code {
                ErrorCode::ConstraintViolation => Self::ConstraintViolated(value),
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    Self::SerializationConflict(value)
                }
                ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::DiskFull => {
                    Self::ConnectionLost(value)
                }
                _ => Self::Sql(value),
            },
            _ => Self::Sql(value),
        }
    }
}
