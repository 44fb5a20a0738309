//! Whole-record HRV summary metrics, computed from a cached RR
//! sequence at aggregation time.

use crate::analysis::window::poincare_sds;
use crate::signal::RRSeries;
use realfft::RealFftPlanner;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Time-domain indices. Intervals are reported in milliseconds, the
/// conventional NN-interval unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeDomain {
    pub n: usize,
    pub mean_nni: f64,
    pub sdnn: f64,
    pub rmssd: f64,
    /// sdnn / mean_nni
    pub cvnni: f64,
    /// rmssd / mean_nni
    pub cvsd: f64,
}

/// Frequency-domain indices from a Welch periodogram of the evenly
/// resampled RR signal. Band powers integrate over VLF 0.003-0.04 Hz,
/// LF 0.04-0.15 Hz and HF 0.15-0.40 Hz; total power spans all three.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FreqDomain {
    pub vlf: f64,
    pub lf: f64,
    pub hf: f64,
    pub lf_hf_ratio: f64,
    pub total_power: f64,
}

/// Whole-record Poincare descriptors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoincareSummary {
    pub sd1: f64,
    pub sd2: f64,
    /// sd2 / sd1, +inf when sd1 is zero.
    pub sd_ratio: f64,
}

pub fn time_domain(rr: &RRSeries) -> TimeDomain {
    let nni: Vec<f64> = rr.rr.iter().map(|s| s * 1000.0).collect();
    let n = nni.len();
    let mean_nni = if n > 0 { nni.iter().sum::<f64>() / n as f64 } else { 0.0 };
    let sdnn = if n > 1 {
        (nni.iter().map(|x| (x - mean_nni).powi(2)).sum::<f64>() / (n as f64 - 1.0)).sqrt()
    } else {
        0.0
    };
    let rmssd = if n > 1 {
        let diffs = nni.windows(2).map(|w| (w[1] - w[0]).powi(2));
        (diffs.sum::<f64>() / (n as f64 - 1.0)).sqrt()
    } else {
        0.0
    };
    let cvnni = if mean_nni > 0.0 { sdnn / mean_nni } else { 0.0 };
    let cvsd = if mean_nni > 0.0 { rmssd / mean_nni } else { 0.0 };
    TimeDomain { n, mean_nni, sdnn, rmssd, cvnni, cvsd }
}

pub fn freq_domain(rr: &RRSeries, fs_interp: f64) -> FreqDomain {
    let (freqs, powers) = welch_psd(rr, fs_interp);
    let vlf = integrate_band(&freqs, &powers, (0.003, 0.04));
    let lf = integrate_band(&freqs, &powers, (0.04, 0.15));
    let hf = integrate_band(&freqs, &powers, (0.15, 0.4));
    let lf_hf_ratio = if hf > 0.0 { lf / hf } else { 0.0 };
    let total_power = integrate_band(&freqs, &powers, (0.003, 0.4));
    FreqDomain { vlf, lf, hf, lf_hf_ratio, total_power }
}

pub fn poincare_summary(rr: &RRSeries) -> PoincareSummary {
    let (sd1, sd2) = poincare_sds(&rr.rr);
    let sd_ratio = if sd1 == 0.0 { f64::INFINITY } else { sd2 / sd1 };
    PoincareSummary { sd1, sd2, sd_ratio }
}

fn integrate_band(freqs: &[f64], powers: &[f64], band: (f64, f64)) -> f64 {
    freqs
        .iter()
        .zip(powers)
        .filter(|(f, _)| **f >= band.0 && **f < band.1)
        .map(|(_, p)| *p)
        .sum()
}

/// Hann-windowed, half-overlapped Welch periodogram of the resampled
/// beat-rate signal. One-sided, with the usual doubling of the interior
/// bins.
fn welch_psd(rr: &RRSeries, fs_interp: f64) -> (Vec<f64>, Vec<f64>) {
    let signal = interpolate_rr(rr, fs_interp);
    let n = signal.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let window = ((fs_interp * 30.0).max(4.0).min(n as f64)) as usize;
    let step = window / 2;
    let mut planner = RealFftPlanner::<f64>::new();
    let r2c = planner.plan_fft_forward(window);
    let window_func = hann(window);
    let mut freqs = Vec::new();
    let mut powers = Vec::new();
    let mut pos = 0;
    let mut segments = 0;
    while pos + window <= n {
        let mut frame: Vec<f64> = signal[pos..pos + window]
            .iter()
            .zip(window_func.iter())
            .map(|(x, w)| x * w)
            .collect();
        let mut spectrum = r2c.make_output_vec();
        r2c.process(&mut frame, &mut spectrum).unwrap();
        let scale = 1.0 / window as f64;
        for (k, val) in spectrum.iter().enumerate() {
            if segments == 0 {
                freqs.push(k as f64 * fs_interp / window as f64);
                powers.push(0.0);
            }
            let power = if k == 0 || (window % 2 == 0 && k == window / 2) {
                val.norm_sqr()
            } else {
                2.0 * val.norm_sqr()
            } * scale;
            powers[k] += power;
        }
        segments += 1;
        pos += step;
    }
    if segments > 0 {
        for p in powers.iter_mut() {
            *p /= segments as f64;
        }
    }
    (freqs, powers)
}

/// Step interpolation of the RR sequence onto a uniform grid, expressed
/// as instantaneous beat rate.
fn interpolate_rr(rr: &RRSeries, fs: f64) -> Vec<f64> {
    let mut times = Vec::new();
    let mut acc = 0.0;
    for interval in &rr.rr {
        acc += interval;
        times.push(acc);
    }
    if times.is_empty() {
        return Vec::new();
    }
    let duration = *times.last().unwrap();
    let n = (duration * fs).ceil() as usize;
    let mut signal = Vec::with_capacity(n);
    let mut idx = 0;
    for i in 0..n {
        let t = i as f64 / fs;
        while idx + 1 < times.len() && times[idx] < t {
            idx += 1;
        }
        let delta = if idx == 0 { rr.rr[0] } else { rr.rr[idx] };
        let value = if delta == 0.0 { 60.0 } else { 60.0 / delta };
        signal.push(value);
    }
    signal
}

fn hann(size: usize) -> Vec<f64> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f64 / (size as f64)).cos()))
        .collect()
}
