//! One pathology case: discovery of its qualifying recordings, channel
//! selection across them, and the per-record feature pass.

use crate::analysis::window::{
    linear_features, nonlinear_features, LinearFeatures, NonlinearFeatures, WindowConfig,
};
use crate::detectors::peaks::{rr_from_channel, PeakConfig};
use crate::error::{DiscoveryError, Error, SignalError};
use crate::io::source::{ChannelInfo, SignalSource};
use crate::signal::RRSeries;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Channels never eligible for beat detection: pressures, plethysmram
/// and respiration leads.
pub const NON_CARDIAC_CHANNELS: &[&str] =
    &["ABP", "APB", "CVP", "PAP", "PLETH", "PLETH R", "RESP", "UAP"];

/// Which feature batteries run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    Linear,
    Nonlinear,
    Full,
}

impl AnalysisMode {
    pub fn linear(&self) -> bool {
        matches!(self, AnalysisMode::Linear | AnalysisMode::Full)
    }

    pub fn nonlinear(&self) -> bool {
        matches!(self, AnalysisMode::Nonlinear | AnalysisMode::Full)
    }
}

/// Window geometry per battery.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisWindows {
    pub linear: WindowConfig,
    pub nonlinear: WindowConfig,
}

impl AnalysisWindows {
    /// The conventional geometry: 1024 samples at 95% overlap for the
    /// descriptive battery, 2048 at 95% for the complexity battery.
    pub fn standard() -> Self {
        Self {
            linear: WindowConfig::new(1024, 0.95).expect("valid default geometry"),
            nonlinear: WindowConfig::new(2048, 0.95).expect("valid default geometry"),
        }
    }
}

/// Options for one processing run.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOptions {
    pub mode: AnalysisMode,
    pub windows: AnalysisWindows,
    pub peaks: PeakConfig,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::Full,
            windows: AnalysisWindows::standard(),
            peaks: PeakConfig::default(),
        }
    }
}

/// Immutable description of one recording segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub case_id: String,
    pub path: PathBuf,
    pub fs: f64,
    pub length: u64,
    pub channels: Vec<ChannelInfo>,
    pub base_time: Option<String>,
    pub base_date: Option<String>,
}

impl Record {
    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.iter().any(|c| c.name == name)
    }
}

/// Derived per-record output, kept separate from the record itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureBundle {
    pub rr: RRSeries,
    pub linear: Option<LinearFeatures>,
    pub nonlinear: Option<NonlinearFeatures>,
}

/// One case with its qualifying recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub pathology: String,
    pub sig_thresh: u64,
    pub records: Vec<Record>,
}

impl Case {
    /// Scan a `<root>/<pathology>_<id>/<id>` directory for qualifying
    /// recordings. The directory names carry the case identity;
    /// anything else fails discovery.
    pub fn discover(source: &dyn SignalSource, case_dir: &Path, sig_thresh: u64) -> Result<Self, Error> {
        let (id, pathology) = parse_case_path(case_dir)?;
        let mut records = Vec::new();
        for entry in source.list_recordings(case_dir, sig_thresh)? {
            let header = source.read_header(&entry.path)?;
            records.push(Record {
                name: header.name,
                case_id: id.clone(),
                path: entry.path,
                fs: header.fs,
                length: entry.length,
                channels: header.channels,
                base_time: header.base_time,
                base_date: header.base_date,
            });
        }
        debug!("case {id} ({pathology}): {} qualifying records", records.len());
        Ok(Self { id, pathology, sig_thresh, records })
    }
}

/// A fully processed case: inputs, the channel used, and one feature
/// bundle per successfully analyzed record, keyed by record name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedCase {
    pub case: Case,
    pub channel: String,
    pub bundles: BTreeMap<String, FeatureBundle>,
}

/// Pick the channel present in the most records, skipping non-cardiac
/// leads. Ties break to the lexicographically smaller name.
pub fn select_channel(records: &[Record]) -> Option<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        for channel in &record.channels {
            *counts.entry(channel.name.as_str()).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(name, _)| !name.is_empty() && !NON_CARDIAC_CHANNELS.contains(name))
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(name, count)| (name.to_string(), count))
}

/// Run the configured batteries over every record of `case`.
///
/// Records that lack the selected channel or fail to read are skipped
/// with a warning; they simply have no bundle in the result. A case
/// with no usable channel at all is a signal error.
pub fn process(source: &dyn SignalSource, case: Case, opts: &ProcessOptions) -> Result<ProcessedCase, Error> {
    let (channel, present) = match select_channel(&case.records) {
        Some(pick) => pick,
        None => return Err(SignalError::NoUsableChannel(case.id.clone()).into()),
    };
    info!(
        "case {}: optimal channel {:?} present in {}/{} records",
        case.id,
        channel,
        present,
        case.records.len()
    );
    let mut bundles = BTreeMap::new();
    for record in &case.records {
        if !record.has_channel(&channel) {
            warn!("case {}: record {} lacks channel {:?}, skipped", case.id, record.name, channel);
            continue;
        }
        match analyze_record(source, record, &channel, opts) {
            Ok(bundle) => {
                bundles.insert(record.name.clone(), bundle);
            }
            Err(err) => {
                warn!("case {}: record {} skipped: {err}", case.id, record.name);
            }
        }
    }
    Ok(ProcessedCase { case, channel, bundles })
}

/// The RR sequence is derived once per record no matter how many
/// batteries run over it.
fn analyze_record(
    source: &dyn SignalSource,
    record: &Record,
    channel: &str,
    opts: &ProcessOptions,
) -> Result<FeatureBundle, Error> {
    let ts = source.read_channel(&record.path, channel)?;
    let rr = rr_from_channel(&ts, &opts.peaks);
    debug!("record {}: {} rr intervals from {} samples", record.name, rr.len(), ts.len());
    let linear = if opts.mode.linear() {
        Some(linear_features(&rr, &opts.windows.linear))
    } else {
        None
    };
    let nonlinear = if opts.mode.nonlinear() {
        Some(nonlinear_features(&rr, &opts.windows.nonlinear))
    } else {
        None
    };
    Ok(FeatureBundle { rr, linear, nonlinear })
}

fn parse_case_path(case_dir: &Path) -> Result<(String, String), DiscoveryError> {
    let id = case_dir.file_name().and_then(|s| s.to_str()).unwrap_or_default();
    let parent = case_dir
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let label = parent.strip_suffix(id).and_then(|p| p.strip_suffix('_'));
    match label {
        Some(pathology) if !pathology.is_empty() && is_case_id(id) => {
            Ok((id.to_string(), pathology.to_string()))
        }
        _ => Err(DiscoveryError::PathologyPattern(case_dir.to_path_buf())),
    }
}

/// `p` followed by six decimal digits.
pub(crate) fn is_case_id(name: &str) -> bool {
    name.len() == 7 && name.starts_with('p') && name[1..].bytes().all(|b| b.is_ascii_digit())
}
