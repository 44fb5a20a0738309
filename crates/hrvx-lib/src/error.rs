use std::path::PathBuf;
use thiserror::Error;

/// Case and recording lookup failures.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("data root does not exist: {0}")]
    MissingRoot(PathBuf),
    #[error("directory name does not follow <pathology>_<case>/<case>: {0}")]
    PathologyPattern(PathBuf),
    #[error("recording not found: {0}")]
    RecordingNotFound(PathBuf),
    #[error("malformed header {path}: {reason}")]
    Header { path: PathBuf, reason: String },
    #[error("reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

/// Signal-level failures. These mark a record or case as skipped, never
/// the whole batch.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("record {record} has no channel {channel:?}")]
    ChannelMissing { record: String, channel: String },
    #[error("case {0}: no valid signal for processing")]
    NoUsableChannel(String),
    #[error("case {case} timed out after {secs}s")]
    Timeout { case: String, secs: u64 },
}

/// Persisted-artifact failures (cache entries and table output).
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache entry {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("encoding case {case}: {reason}")]
    Encode { case: String, reason: String },
    #[error("writing table {path}: {reason}")]
    Table { path: PathBuf, reason: String },
    #[error("cache io {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
}

/// Invalid analysis geometry. Raised at construction, before any
/// windowing loop runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("window length must be nonzero")]
    EmptyWindow,
    #[error("window overlap must lie in [0, 1), got {0}")]
    OverlapOutOfRange(f64),
    #[error("window length {window} with overlap {overlap} rounds to a zero stride")]
    ZeroStride { window: usize, overlap: f64 },
}

/// Umbrella error for whole-pipeline operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Signal(#[from] SignalError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;
