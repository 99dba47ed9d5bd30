use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = SolarDbError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum SolarDbError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid plant identity '{input}': {reason}")]
    InvalidIdentity { input: String, reason: String },
    #[error("Invalid time '{input}': {reason}")]
    InvalidTime { input: String, reason: String },
    #[error("Data contract violation: {0}")]
    DataContract(String),
    #[error("Target {path} already exists and overwrite is not permitted")]
    AlreadyExists { path: PathBuf },
    #[error("Database file {path} does not exist and create_db is false")]
    DatabaseMissing { path: PathBuf },
    #[error("Database operation failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Coarse failure classes, used by callers that only care about how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    DataContract,
    Existence,
    Storage,
}

impl SolarDbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SolarDbError::Config(_)
            | SolarDbError::InvalidIdentity { .. }
            | SolarDbError::InvalidTime { .. } => ErrorKind::Configuration,
            SolarDbError::DataContract(_) => ErrorKind::DataContract,
            SolarDbError::AlreadyExists { .. } | SolarDbError::DatabaseMissing { .. } => {
                ErrorKind::Existence
            }
            SolarDbError::Database(_) | SolarDbError::Io { .. } | SolarDbError::Csv(_) => {
                ErrorKind::Storage
            }
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SolarDbError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn contract(message: impl Into<String>) -> Self {
        SolarDbError::DataContract(message.into())
    }
}
