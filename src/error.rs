//! Error types for tarsum operations

use thiserror::Error;

/// Result type for digest-engine operations
pub type Result<T> = std::result::Result<T, DigestError>;

/// Fatal digest-engine faults.
///
/// Every archive-level failure carries the stage the session was in and the
/// number of bytes consumed when the fault triggered. The enum is `Clone` so
/// a session can retain its terminal error while callers keep a copy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    /// Unknown canonicalization policy version string
    #[error("unsupported tarsum version: {0:?}")]
    UnsupportedVersion(String),

    /// Undecodable or invalid entry header bytes
    #[error("malformed archive at byte {offset} ({stage}): {reason}")]
    MalformedArchive {
        stage: &'static str,
        offset: u64,
        reason: String,
    },

    /// Input ended before the two-zero-block terminator was seen
    #[error("truncated archive at byte {offset} ({stage}): end of input before terminator")]
    TruncatedArchive { stage: &'static str, offset: u64 },

    /// Checkpoint blob failed to decode or validate
    #[error("corrupt checkpoint state: {0}")]
    CorruptState(String),
}

/// Build cache store errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O error reading or writing the cache file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cache file is not a valid JSON object
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Top-level error for orchestrator-facing helpers that mix digest and I/O
/// work (e.g. digesting an archive read from a local path).
#[derive(Error, Debug)]
pub enum TarSumError {
    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
