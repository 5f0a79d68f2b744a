use std::fmt;
use thiserror::Error;

use crate::RunIdentity;

/// Main error type for run-metrics
#[derive(Error, Debug)]
pub enum Error {
    #[error("Track parse error: {0}")]
    TrackParse(#[from] TrackParseError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[cfg(feature = "http")]
    #[error("Remote fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Goal not found: {0}")]
    GoalNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a track document produced no run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackParseError {
    #[error("document is not well-formed: {0}")]
    Malformed(String),

    #[error("document contains no track with at least one valid point")]
    NoUsableTracks,

    #[error("document is not valid UTF-8")]
    InvalidUtf8,
}

/// A single structural problem in a remote stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamProblem {
    Missing(&'static str),
    Empty(&'static str),
    Malformed(&'static str),
    LengthMismatch { field: &'static str, expected: usize, actual: usize },
}

impl fmt::Display for StreamProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamProblem::Missing(field) => write!(f, "{} stream missing", field),
            StreamProblem::Empty(field) => write!(f, "{} stream empty", field),
            StreamProblem::Malformed(field) => write!(f, "{} stream malformed", field),
            StreamProblem::LengthMismatch { field, expected, actual } => {
                write!(f, "{} stream has {} samples, expected {}", field, actual, expected)
            }
        }
    }
}

/// Remote stream payload could not be normalized into a track.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Invalid stream data: {}", join_problems(.problems))]
    InvalidStreamData { problems: Vec<StreamProblem> },
}

impl StreamError {
    pub fn problems(&self) -> &[StreamProblem] {
        match self {
            StreamError::InvalidStreamData { problems } => problems,
        }
    }
}

fn join_problems(problems: &[StreamProblem]) -> String {
    problems.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
}

/// Failure from a key-value store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: usize, available: usize },

    #[error("Invalid store key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure from the run repository.
#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error(
        "Storage is full: {payload_bytes} bytes of run data do not fit in the {quota_bytes} byte quota \
         even after reducing GPS detail. Delete older runs to free space; unsaved changes remain in memory."
    )]
    StorageExhausted { payload_bytes: usize, quota_bytes: usize },

    #[error("Run not found: {0}")]
    NotFound(RunIdentity),

    #[error("Persisted data under '{key}' is corrupt: {source}")]
    Corrupt { key: &'static str, source: serde_json::Error },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure talking to the remote fitness API.
#[cfg(feature = "http")]
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Rate limited, gave up after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("HTTP {status}")]
    Http { status: u16 },

    #[error("Request error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[cfg(feature = "http")]
impl FetchError {
    /// Rate limiting is recoverable: pause and resume rather than abort.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }
}
