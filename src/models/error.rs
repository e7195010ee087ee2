//! Defines basic error and result types used throughout the crate.

use std::{error::Error, fmt};

use redis::RedisError;

/// Result type used throughout the crate.
pub type UcaResult<T> = Result<T, UcaError>;

/// Error type used throughout the crate.
#[derive(Debug, PartialEq)]
pub enum UcaError {
    /// Error occurred during interaction with Redis.
    Redis(RedisError),

    /// Error occurred while trying to get a connection to Redis.
    RedisConnection(String),

    /// Operation attempted on a job hash that does not exist.
    NoSuchJob(String),

    /// Job has no lock key, i.e. its lock expired out from under the caller.
    MissingLock(String),

    /// Job was expected in the active list but was not found there.
    NotInActiveList(String),

    /// Job still has unfinished children in its dependency set.
    PendingDependencies(String),

    /// Job's lock is held under a different worker's token.
    LockNotOwned(String),

    /// Could not complete request with given parameters.
    BadRequest(String),

    /// Parsing of some data structure failed. Typically used when parsing JSON.
    ParseError(String),
}

impl UcaError {
    /// Construct a new UcaError::BadRequest with given message.
    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        UcaError::BadRequest(msg.into())
    }

    /// Stable numeric code for the errors that are part of the wire contract.
    ///
    /// Clients of the queue protocol map these codes to typed exceptions, so
    /// the values are fixed. `-5` is deliberately never produced; the
    /// numbering gap is part of the contract.
    pub fn code(&self) -> Option<i8> {
        match self {
            UcaError::NoSuchJob(_) => Some(-1),
            UcaError::MissingLock(_) => Some(-2),
            UcaError::NotInActiveList(_) => Some(-3),
            UcaError::PendingDependencies(_) => Some(-4),
            UcaError::LockNotOwned(_) => Some(-6),
            _ => None,
        }
    }
}

impl From<RedisError> for UcaError {
    fn from(err: RedisError) -> Self {
        UcaError::Redis(err)
    }
}

impl From<serde_json::Error> for UcaError {
    fn from(err: serde_json::Error) -> Self {
        UcaError::ParseError(err.to_string())
    }
}

impl fmt::Display for UcaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UcaError::Redis(err) => err.fmt(f),
            UcaError::RedisConnection(msg) => write!(f, "Failed to connect to Redis: {}", msg),
            UcaError::NoSuchJob(job_id) => write!(f, "Job '{}' does not exist", job_id),
            UcaError::MissingLock(job_id) => write!(f, "Job '{}' has no lock", job_id),
            UcaError::NotInActiveList(job_id) => {
                write!(f, "Job '{}' is not in the active list", job_id)
            }
            UcaError::PendingDependencies(job_id) => {
                write!(f, "Job '{}' has pending dependencies", job_id)
            }
            UcaError::LockNotOwned(job_id) => {
                write!(f, "Job '{}' is locked by another worker", job_id)
            }
            UcaError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            UcaError::BadRequest(msg) => write!(f, "{}", msg),
        }
    }
}

impl Error for UcaError {
    fn cause(&self) -> Option<&dyn Error> {
        match self {
            UcaError::Redis(err) => err.source(),
            _ => None,
        }
    }
}
