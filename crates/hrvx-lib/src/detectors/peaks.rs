//! Beat detection on a raw cardiac channel.
//!
//! Candidate peaks are strict local maxima thinned by a physiological
//! minimum spacing, then settled by two snap-to-maximum correction
//! passes. NaN samples never win a comparison, so unreadable stretches
//! of signal produce no peaks instead of poisoning the output.

use crate::signal::{RRSeries, TimeSeries};
use log::debug;

/// Peak-search tuning.
#[derive(Debug, Clone, Copy)]
pub struct PeakConfig {
    /// Ceiling on plausible beat rate; sets the minimum peak spacing
    /// fs * 60 / max_bpm.
    pub max_bpm: f64,
    /// Backward radius of the correction window, in samples.
    pub search_back: usize,
    /// Forward radius of the correction window, in samples.
    pub search_forward: usize,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self { max_bpm: 220.0, search_back: 30, search_forward: 35 }
    }
}

/// Detect beat peaks. The result is strictly increasing with no
/// duplicates.
pub fn detect_beats(ts: &TimeSeries, cfg: &PeakConfig) -> Vec<usize> {
    if ts.is_empty() {
        return Vec::new();
    }
    let min_distance = ((ts.fs * 60.0 / cfg.max_bpm) as usize).max(1);
    let candidates = local_maxima(&ts.data, min_distance);
    let snapped = snap_to_maxima(&ts.data, &candidates, cfg);
    let peaks = snap_to_maxima(&ts.data, &snapped, cfg);
    debug!("{} candidate peaks, {} after correction", candidates.len(), peaks.len());
    peaks
}

/// Beat detection straight to the RR sequence in seconds.
pub fn rr_from_channel(ts: &TimeSeries, cfg: &PeakConfig) -> RRSeries {
    RRSeries::from_peaks(&detect_beats(ts, cfg), ts.fs)
}

/// Strict local maxima with plateaus collapsed to their midpoint, then
/// minimum-distance thinning that keeps taller peaks first.
fn local_maxima(data: &[f64], min_distance: usize) -> Vec<usize> {
    let mut peaks = Vec::new();
    let mut i = 1;
    while i + 1 < data.len() {
        if data[i] > data[i - 1] {
            let mut ahead = i + 1;
            while ahead + 1 < data.len() && data[ahead] == data[i] {
                ahead += 1;
            }
            if data[ahead] < data[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    enforce_distance(data, peaks, min_distance)
}

fn enforce_distance(data: &[f64], peaks: Vec<usize>, min_distance: usize) -> Vec<usize> {
    if min_distance <= 1 || peaks.len() < 2 {
        return peaks;
    }
    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| {
        data[peaks[b]]
            .partial_cmp(&data[peaks[a]])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut keep = vec![true; peaks.len()];
    for &k in &order {
        if !keep[k] {
            continue;
        }
        let mut j = k;
        while j > 0 {
            j -= 1;
            if peaks[k] - peaks[j] < min_distance {
                keep[j] = false;
            } else {
                break;
            }
        }
        let mut j = k + 1;
        while j < peaks.len() && peaks[j] - peaks[k] < min_distance {
            keep[j] = false;
            j += 1;
        }
    }
    peaks
        .iter()
        .zip(&keep)
        .filter(|(_, &kept)| kept)
        .map(|(&p, _)| p)
        .collect()
}

/// Snap each candidate to the tallest finite sample inside its search
/// window. Candidates whose window holds no finite sample are dropped.
/// Ties go to the earliest sample, so a snapped peak is a fixed point
/// of this pass.
fn snap_to_maxima(data: &[f64], peaks: &[usize], cfg: &PeakConfig) -> Vec<usize> {
    let mut out = Vec::with_capacity(peaks.len());
    for &p in peaks {
        let start = p.saturating_sub(cfg.search_back);
        let end = (p + cfg.search_forward + 1).min(data.len());
        let mut best: Option<(usize, f64)> = None;
        for i in start..end {
            let v = data[i];
            if v.is_nan() {
                continue;
            }
            let better = match best {
                Some((_, top)) => v > top,
                None => true,
            };
            if better {
                best = Some((i, v));
            }
        }
        if let Some((idx, _)) = best {
            out.push(idx);
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}
