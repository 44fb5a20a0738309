//! WFDB directory reader.
//!
//! A case directory holds master headers (`<case>...<digit>.hea`) whose
//! segment lists name the actual recordings, plus one `.hea`/`.dat`
//! pair per segment. Headers are plain text: a record line, then one
//! signal-spec line per channel. Channels are matched by the
//! description field at the end of each signal line.

use crate::error::{DiscoveryError, Error, SignalError};
use crate::io::source::{ChannelInfo, RecordingEntry, RecordingHeader, SignalSource};
use crate::signal::TimeSeries;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Segment names containing this marker denote recording gaps.
pub const SKIP_MARKER: char = '~';

/// Suffix of the pseudo-segment that only describes channel layout.
pub const LAYOUT_SUFFIX: &str = "_layout";

const DEFAULT_GAIN: f64 = 200.0;
const DEFAULT_FS: f64 = 250.0;
const DEFAULT_UNIT: &str = "mV";

/// Filesystem-backed WFDB source.
#[derive(Debug, Clone, Copy, Default)]
pub struct WfdbSource;

impl SignalSource for WfdbSource {
    fn list_recordings(&self, case_dir: &Path, min_length: u64) -> Result<Vec<RecordingEntry>, DiscoveryError> {
        let stem = case_dir
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string();
        let mut masters = Vec::new();
        let entries = fs::read_dir(case_dir)
            .map_err(|source| DiscoveryError::Io { path: case_dir.to_path_buf(), source })?;
        for entry in entries {
            let entry = entry
                .map_err(|source| DiscoveryError::Io { path: case_dir.to_path_buf(), source })?;
            let path = entry.path();
            if is_master_header(&path, &stem) {
                masters.push(path);
            }
        }
        masters.sort();
        let mut recordings = Vec::new();
        for master in &masters {
            let text = fs::read_to_string(master)
                .map_err(|source| DiscoveryError::Io { path: master.clone(), source })?;
            for (name, length) in parse_master_segments(&text, master)? {
                if name.contains(SKIP_MARKER) || name.ends_with(LAYOUT_SUFFIX) {
                    continue;
                }
                if length < min_length {
                    debug!("segment {name} below threshold ({length} < {min_length})");
                    continue;
                }
                recordings.push(RecordingEntry { path: case_dir.join(&name), length });
            }
        }
        Ok(recordings)
    }

    fn read_header(&self, record: &Path) -> Result<RecordingHeader, DiscoveryError> {
        let parsed = read_header_file(&record.with_extension("hea"))?;
        Ok(RecordingHeader {
            name: parsed.record.name,
            fs: parsed.record.fs,
            length: parsed.record.n_samples,
            channels: parsed
                .signals
                .into_iter()
                .map(|s| ChannelInfo { name: s.description, unit: s.unit })
                .collect(),
            base_time: parsed.record.base_time,
            base_date: parsed.record.base_date,
        })
    }

    fn read_channel(&self, record: &Path, channel: &str) -> Result<TimeSeries, Error> {
        let header_path = record.with_extension("hea");
        let parsed = read_header_file(&header_path)?;
        let target = parsed
            .signals
            .iter()
            .position(|s| s.description == channel)
            .ok_or_else(|| SignalError::ChannelMissing {
                record: parsed.record.name.clone(),
                channel: channel.to_string(),
            })?;
        let spec = &parsed.signals[target];
        // channels sharing one data file interleave in header order
        let group: Vec<usize> = parsed
            .signals
            .iter()
            .enumerate()
            .filter(|(_, s)| s.file == spec.file)
            .map(|(i, _)| i)
            .collect();
        let lane = group.iter().position(|&i| i == target).unwrap_or(0);
        let dat_path = match record.parent() {
            Some(dir) => dir.join(&spec.file),
            None => PathBuf::from(&spec.file),
        };
        let bytes = fs::read(&dat_path)
            .map_err(|source| DiscoveryError::Io { path: dat_path.clone(), source })?;
        let samples = decode_channel(&bytes, spec.format, group.len(), lane)
            .map_err(|reason| DiscoveryError::Header { path: header_path, reason })?;
        let mut data: Vec<f64> = samples
            .into_iter()
            .map(|adc| match adc {
                Some(v) => (v as f64 - spec.baseline) / spec.gain,
                None => f64::NAN,
            })
            .collect();
        if parsed.record.n_samples > 0 {
            data.truncate(parsed.record.n_samples as usize);
        }
        Ok(TimeSeries { fs: parsed.record.fs, data })
    }
}

/// Master headers are named after the case stem and end in a digit,
/// which filters out the numerics variants ending in `n`.
fn is_master_header(path: &Path, stem: &str) -> bool {
    if stem.is_empty() {
        return false;
    }
    let name = match path.file_name().and_then(|s| s.to_str()) {
        Some(name) => name,
        None => return false,
    };
    match name.strip_suffix(".hea") {
        Some(base) => base.starts_with(stem) && base.ends_with(|c: char| c.is_ascii_digit()),
        None => false,
    }
}

#[derive(Debug, Clone)]
struct RecordLine {
    name: String,
    segments: Option<usize>,
    n_sig: usize,
    fs: f64,
    n_samples: u64,
    base_time: Option<String>,
    base_date: Option<String>,
}

#[derive(Debug, Clone)]
struct SignalSpec {
    file: String,
    format: u32,
    gain: f64,
    baseline: f64,
    description: String,
    unit: String,
}

#[derive(Debug, Clone)]
struct ParsedHeader {
    record: RecordLine,
    signals: Vec<SignalSpec>,
}

fn read_header_file(path: &Path) -> Result<ParsedHeader, DiscoveryError> {
    if !path.is_file() {
        return Err(DiscoveryError::RecordingNotFound(path.to_path_buf()));
    }
    let text = fs::read_to_string(path)
        .map_err(|source| DiscoveryError::Io { path: path.to_path_buf(), source })?;
    parse_header(&text, path)
}

fn parse_header(text: &str, path: &Path) -> Result<ParsedHeader, DiscoveryError> {
    let mut lines = content_lines(text);
    let first = lines.next().ok_or_else(|| header_err(path, "no record line"))?;
    let record = parse_record_line(first, path)?;
    let mut signals = Vec::with_capacity(record.n_sig);
    if record.segments.is_none() {
        for _ in 0..record.n_sig {
            let line = lines
                .next()
                .ok_or_else(|| header_err(path, "truncated signal block"))?;
            signals.push(parse_signal_line(line, path)?);
        }
    }
    Ok(ParsedHeader { record, signals })
}

/// Segment (name, length) pairs from a multi-segment header.
fn parse_master_segments(text: &str, path: &Path) -> Result<Vec<(String, u64)>, DiscoveryError> {
    let mut lines = content_lines(text);
    let first = lines.next().ok_or_else(|| header_err(path, "no record line"))?;
    let record = parse_record_line(first, path)?;
    let count = record
        .segments
        .ok_or_else(|| header_err(path, "not a multi-segment header"))?;
    let mut segments = Vec::with_capacity(count);
    for line in lines.take(count) {
        let mut parts = line.split_whitespace();
        let name = parts
            .next()
            .ok_or_else(|| header_err(path, "empty segment line"))?
            .to_string();
        let length = parts.next().and_then(|t| t.parse().ok()).unwrap_or(0);
        segments.push((name, length));
    }
    if segments.len() < count {
        return Err(header_err(path, "truncated segment list"));
    }
    Ok(segments)
}

fn content_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
}

fn header_err(path: &Path, reason: &str) -> DiscoveryError {
    DiscoveryError::Header { path: path.to_path_buf(), reason: reason.to_string() }
}

/// `NAME[/NSEG] NSIG FS[/...] NSAMP [TIME [DATE]]`, with everything
/// after NAME optional in old files.
fn parse_record_line(line: &str, path: &Path) -> Result<RecordLine, DiscoveryError> {
    let mut parts = line.split_whitespace();
    let name_tok = parts.next().ok_or_else(|| header_err(path, "empty record line"))?;
    let (name, segments) = match name_tok.split_once('/') {
        Some((name, seg)) => {
            let count = seg
                .parse()
                .map_err(|_| header_err(path, "bad segment count"))?;
            (name.to_string(), Some(count))
        }
        None => (name_tok.to_string(), None),
    };
    let n_sig = parts.next().and_then(|t| t.parse().ok()).unwrap_or(0);
    let fs = parts
        .next()
        .and_then(|t| t.split(|c| c == '/' || c == '(').next())
        .and_then(|t| t.parse().ok())
        .unwrap_or(DEFAULT_FS);
    let n_samples = parts.next().and_then(|t| t.parse().ok()).unwrap_or(0);
    let base_time = parts.next().map(str::to_string);
    let base_date = parts.next().map(str::to_string);
    Ok(RecordLine { name, segments, n_sig, fs, n_samples, base_time, base_date })
}

/// `FILE FMT[xN] [GAIN[(BASELINE)][/UNITS] [ADCRES [ADCZERO [INITVAL
/// [CKSUM [BLKSZ [DESCRIPTION...]]]]]]]`. The description keeps its
/// internal spaces.
fn parse_signal_line(line: &str, path: &Path) -> Result<SignalSpec, DiscoveryError> {
    let mut parts = line.split_whitespace();
    let file = parts
        .next()
        .ok_or_else(|| header_err(path, "empty signal line"))?
        .to_string();
    let fmt_tok = parts
        .next()
        .ok_or_else(|| header_err(path, "missing signal format"))?;
    let format: u32 = fmt_tok
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| header_err(path, "bad signal format"))?;

    let mut gain = DEFAULT_GAIN;
    let mut baseline: Option<f64> = None;
    let mut unit = DEFAULT_UNIT.to_string();
    if let Some(tok) = parts.next() {
        let (gain_part, unit_part) = match tok.split_once('/') {
            Some((g, u)) => (g, Some(u)),
            None => (tok, None),
        };
        let (gain_tok, baseline_tok) = match gain_part.split_once('(') {
            Some((g, rest)) => (g, rest.strip_suffix(')')),
            None => (gain_part, None),
        };
        // a zero or unparseable gain falls back to the default
        let parsed_gain: f64 = gain_tok.parse().unwrap_or(0.0);
        if parsed_gain != 0.0 {
            gain = parsed_gain;
        }
        baseline = baseline_tok.and_then(|b| b.parse().ok());
        if let Some(u) = unit_part {
            if !u.is_empty() {
                unit = u.to_string();
            }
        }
    }
    let _adc_res = parts.next();
    let adc_zero: f64 = parts.next().and_then(|t| t.parse().ok()).unwrap_or(0.0);
    let _init_value = parts.next();
    let _checksum = parts.next();
    let _block_size = parts.next();
    let description = parts.collect::<Vec<_>>().join(" ");
    Ok(SignalSpec {
        file,
        format,
        gain,
        baseline: baseline.unwrap_or(adc_zero),
        description,
        unit,
    })
}

/// Decode one interleaved channel. `None` marks the format's
/// invalid-sample code.
fn decode_channel(bytes: &[u8], format: u32, n_channels: usize, lane: usize) -> Result<Vec<Option<i32>>, String> {
    if n_channels == 0 {
        return Ok(Vec::new());
    }
    let all = match format {
        212 => decode_fmt212(bytes),
        16 => decode_fmt16(bytes),
        80 => decode_fmt80(bytes),
        other => return Err(format!("unsupported signal format {other}")),
    };
    Ok(all.into_iter().skip(lane).step_by(n_channels).collect())
}

/// Format 212: two 12-bit two's-complement samples packed into three
/// bytes.
fn decode_fmt212(bytes: &[u8]) -> Vec<Option<i32>> {
    let mut out = Vec::with_capacity(bytes.len() / 3 * 2);
    for chunk in bytes.chunks_exact(3) {
        let first = ((chunk[1] as i32 & 0x0F) << 8) | chunk[0] as i32;
        let second = ((chunk[1] as i32 & 0xF0) << 4) | chunk[2] as i32;
        out.push(sign12(first));
        out.push(sign12(second));
    }
    out
}

fn sign12(raw: i32) -> Option<i32> {
    let value = if raw > 2047 { raw - 4096 } else { raw };
    if value == -2048 {
        None
    } else {
        Some(value)
    }
}

/// Format 16: little-endian i16.
fn decode_fmt16(bytes: &[u8]) -> Vec<Option<i32>> {
    bytes
        .chunks_exact(2)
        .map(|b| {
            let v = i16::from_le_bytes([b[0], b[1]]);
            if v == i16::MIN {
                None
            } else {
                Some(v as i32)
            }
        })
        .collect()
}

/// Format 80: offset binary, one byte per sample.
fn decode_fmt80(bytes: &[u8]) -> Vec<Option<i32>> {
    bytes.iter().map(|&b| Some(b as i32 - 128)).collect()
}
