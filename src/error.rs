//! Error types and exit codes for idcanon

use std::process::ExitCode;
use thiserror::Error;

use crate::external::MatchError;

/// Main error type for the identity-matching pipeline
#[derive(Error, Debug)]
pub enum IdcanonError {
    #[error("invalid input: {message}")]
    InputFormat { message: String },

    #[error("database error: {0}")]
    Database(#[from] mysql::Error),

    #[error(
        "conflicting external identities: person {first_id} is {first_username:?}, \
         person {second_id} is {second_username:?}"
    )]
    ConflictingExternalId {
        first_id: i64,
        first_username: String,
        second_id: i64,
        second_username: String,
    },

    #[error("external API retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

impl IdcanonError {
    /// Exit code per error kind:
    /// - 0: success
    /// - 1: IO / malformed input
    /// - 2: database failure
    /// - 3: conflicting external identities
    /// - 4: external API retries exhausted
    /// - 5: internal invariant violation
    /// - 6: cancelled by signal
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::InputFormat { .. } => ExitCode::from(1),
            Self::Io(_) => ExitCode::from(1),
            Self::Parquet(_) | Self::Arrow(_) => ExitCode::from(1),
            Self::Database(_) => ExitCode::from(2),
            Self::ConflictingExternalId { .. } => ExitCode::from(3),
            Self::RetriesExhausted(_) => ExitCode::from(4),
            Self::InvariantViolation(_) => ExitCode::from(5),
            Self::Cancelled => ExitCode::from(6),
        }
    }
}

impl From<csv::Error> for IdcanonError {
    fn from(err: csv::Error) -> Self {
        IdcanonError::InputFormat {
            message: err.to_string(),
        }
    }
}

impl From<MatchError> for IdcanonError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::Cancelled => IdcanonError::Cancelled,
            MatchError::RetriesExhausted(msg) => IdcanonError::RetriesExhausted(msg),
            MatchError::Cache(msg) => {
                IdcanonError::Io(std::io::Error::new(std::io::ErrorKind::Other, msg))
            }
            other => IdcanonError::InputFormat {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, IdcanonError>;
