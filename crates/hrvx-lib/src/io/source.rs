//! Read access to recording stores.
//!
//! A [`SignalSource`] answers three questions about one case directory:
//! which recordings qualify, what a recording's header says, and what
//! one channel of it contains. Implementations re-read the backing
//! store on every call; any caching happens in the caller.

use crate::error::{DiscoveryError, Error};
use crate::signal::TimeSeries;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One qualifying recording inside a case directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingEntry {
    /// Record base path without extension; header and data paths derive
    /// from it.
    pub path: PathBuf,
    /// Declared sample count.
    pub length: u64,
}

/// Channel description from a recording header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub name: String,
    pub unit: String,
}

/// Recording metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingHeader {
    pub name: String,
    pub fs: f64,
    pub length: u64,
    pub channels: Vec<ChannelInfo>,
    pub base_time: Option<String>,
    pub base_date: Option<String>,
}

pub trait SignalSource: Send + Sync {
    /// Recordings under `case_dir` with at least `min_length` samples,
    /// in deterministic order.
    fn list_recordings(&self, case_dir: &Path, min_length: u64) -> Result<Vec<RecordingEntry>, DiscoveryError>;

    /// Parsed header of one recording.
    fn read_header(&self, record: &Path) -> Result<RecordingHeader, DiscoveryError>;

    /// One channel of one recording, in physical units.
    fn read_channel(&self, record: &Path, channel: &str) -> Result<TimeSeries, Error>;
}
