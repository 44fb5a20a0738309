//! Sliding-window feature engine.
//!
//! Feature batteries are tables of named reducers mapped over every
//! window of an RR sequence. All series produced from one geometry are
//! index-aligned: entry i of every series comes from the window that
//! starts at sample i * stride.

use crate::analysis::measures::{app_entropy, detrended_fluctuation, higuchi_fd, sample_entropy};
use crate::analysis::stats::{describe, population_std};
use crate::error::ConfigError;
use crate::signal::{RRSeries, WindowSeries};
use std::f64::consts::SQRT_2;

/// Sliding-window geometry.
///
/// Constructed through [`WindowConfig::new`], which validates the
/// geometry once. Windowing loops rely on the stride being nonzero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    window_len: usize,
    overlap: f64,
    stride: usize,
}

impl WindowConfig {
    /// Build a geometry with `window_len` samples per window and a
    /// fractional `overlap` in [0, 1). The stride is
    /// round(window_len * (1 - overlap)) and must come out nonzero.
    pub fn new(window_len: usize, overlap: f64) -> Result<Self, ConfigError> {
        if window_len == 0 {
            return Err(ConfigError::EmptyWindow);
        }
        if !(0.0..1.0).contains(&overlap) {
            return Err(ConfigError::OverlapOutOfRange(overlap));
        }
        let stride = (window_len as f64 * (1.0 - overlap)).round() as usize;
        if stride == 0 {
            return Err(ConfigError::ZeroStride { window: window_len, overlap });
        }
        Ok(Self { window_len, overlap, stride })
    }

    pub fn window_len(&self) -> usize {
        self.window_len
    }

    pub fn overlap(&self) -> f64 {
        self.overlap
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Number of windows over a sequence of length `n`:
    /// floor((n - window_len) / stride) + 1, or 0 when n < window_len.
    pub fn count(&self, n: usize) -> usize {
        if n < self.window_len {
            0
        } else {
            (n - self.window_len) / self.stride + 1
        }
    }
}

/// Apply one reducer to every window slice, in start order.
pub fn map_windows(data: &[f64], cfg: &WindowConfig, mut reduce: impl FnMut(&[f64]) -> f64) -> WindowSeries {
    let mut values = Vec::with_capacity(cfg.count(data.len()));
    let mut start = 0;
    while start + cfg.window_len() <= data.len() {
        values.push(reduce(&data[start..start + cfg.window_len()]));
        start += cfg.stride();
    }
    WindowSeries { values }
}

/// A named per-window scalar reducer.
#[derive(Clone, Copy)]
pub struct Reducer {
    pub name: &'static str,
    pub apply: fn(&[f64]) -> f64,
}

/// Run a whole battery over the sliding windows of `data`, one aligned
/// series per reducer.
pub fn window_reduce(
    data: &[f64],
    cfg: &WindowConfig,
    reducers: &[Reducer],
) -> Vec<(&'static str, WindowSeries)> {
    reducers
        .iter()
        .map(|r| (r.name, map_windows(data, cfg, r.apply)))
        .collect()
}

fn window_mean(w: &[f64]) -> f64 {
    describe(w).mean
}

fn window_variance(w: &[f64]) -> f64 {
    describe(w).variance
}

fn window_skewness(w: &[f64]) -> f64 {
    describe(w).skewness
}

fn window_kurtosis(w: &[f64]) -> f64 {
    describe(w).kurtosis
}

fn window_app_entropy(w: &[f64]) -> f64 {
    app_entropy(w, 2)
}

fn window_sample_entropy(w: &[f64]) -> f64 {
    sample_entropy(w, 2)
}

fn window_higuchi(w: &[f64]) -> f64 {
    higuchi_fd(w, 10)
}

fn window_dfa(w: &[f64]) -> f64 {
    detrended_fluctuation(w)
}

/// Descriptive statistics battery.
pub const LINEAR_BATTERY: &[Reducer] = &[
    Reducer { name: "mean", apply: window_mean },
    Reducer { name: "variance", apply: window_variance },
    Reducer { name: "skewness", apply: window_skewness },
    Reducer { name: "kurtosis", apply: window_kurtosis },
];

/// Complexity-measure battery.
pub const NONLINEAR_BATTERY: &[Reducer] = &[
    Reducer { name: "app_entropy", apply: window_app_entropy },
    Reducer { name: "sample_entropy", apply: window_sample_entropy },
    Reducer { name: "higuchi_fd", apply: window_higuchi },
    Reducer { name: "dfa", apply: window_dfa },
];

/// Per-window descriptive statistics plus the derived CV series.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinearFeatures {
    pub mean: WindowSeries,
    pub variance: WindowSeries,
    pub skewness: WindowSeries,
    pub kurtosis: WindowSeries,
    /// variance / mean, element-wise over the aligned series.
    pub cv: WindowSeries,
}

/// Per-window complexity measures plus the Poincare ratio series.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NonlinearFeatures {
    pub app_entropy: WindowSeries,
    pub sample_entropy: WindowSeries,
    pub higuchi_fd: WindowSeries,
    pub dfa: WindowSeries,
    pub sd_ratio: WindowSeries,
}

/// Run the descriptive battery and derive the CV series afterwards.
pub fn linear_features(rr: &RRSeries, cfg: &WindowConfig) -> LinearFeatures {
    let mut reduced = window_reduce(&rr.rr, cfg, LINEAR_BATTERY).into_iter();
    let mean = next_series(&mut reduced);
    let variance = next_series(&mut reduced);
    let skewness = next_series(&mut reduced);
    let kurtosis = next_series(&mut reduced);
    let cv = WindowSeries {
        values: variance
            .values
            .iter()
            .zip(&mean.values)
            .map(|(v, m)| v / m)
            .collect(),
    };
    LinearFeatures { mean, variance, skewness, kurtosis, cv }
}

/// Run the complexity battery plus the Poincare ratio pass.
pub fn nonlinear_features(rr: &RRSeries, cfg: &WindowConfig) -> NonlinearFeatures {
    let mut reduced = window_reduce(&rr.rr, cfg, NONLINEAR_BATTERY).into_iter();
    let app_entropy = next_series(&mut reduced);
    let sample_entropy = next_series(&mut reduced);
    let higuchi_fd = next_series(&mut reduced);
    let dfa = next_series(&mut reduced);
    let sd_ratio = map_windows(&rr.rr, cfg, poincare_ratio);
    NonlinearFeatures { app_entropy, sample_entropy, higuchi_fd, dfa, sd_ratio }
}

fn next_series(iter: &mut impl Iterator<Item = (&'static str, WindowSeries)>) -> WindowSeries {
    iter.next().map(|(_, series)| series).unwrap_or_default()
}

/// Poincare descriptors of one interval sequence: population standard
/// deviations across and along the identity line.
pub fn poincare_sds(values: &[f64]) -> (f64, f64) {
    let diffs: Vec<f64> = values.windows(2).map(|w| (w[0] - w[1]) / SQRT_2).collect();
    let sums: Vec<f64> = values.windows(2).map(|w| (w[0] + w[1]) / SQRT_2).collect();
    (population_std(&diffs), population_std(&sums))
}

/// SD2/SD1 of one window. A perfectly regular window has SD1 = 0 and
/// maps to the +inf sentinel instead of failing.
pub fn poincare_ratio(window: &[f64]) -> f64 {
    let (sd1, sd2) = poincare_sds(window);
    if sd1 == 0.0 {
        return f64::INFINITY;
    }
    sd2 / sd1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn noisy_rr(n: usize, seed: u64) -> RRSeries {
        let mut rng = StdRng::seed_from_u64(seed);
        RRSeries { rr: (0..n).map(|_| rng.gen_range(0.6..1.0)).collect() }
    }

    #[test]
    fn count_matches_closed_form() {
        let cfg = WindowConfig::new(1024, 0.95).unwrap();
        assert_eq!(cfg.stride(), 51);
        assert_eq!(cfg.count(3000), 39);
        assert_eq!(cfg.count(1024), 1);
        assert_eq!(cfg.count(1023), 0);
        let series = map_windows(&vec![1.0; 3000], &cfg, |w| w[0]);
        assert_eq!(series.len(), 39);

        let cfg = WindowConfig::new(2048, 0.95).unwrap();
        assert_eq!(cfg.stride(), 102);
    }

    #[test]
    fn rejects_bad_geometry() {
        assert!(matches!(WindowConfig::new(0, 0.5), Err(ConfigError::EmptyWindow)));
        assert!(matches!(
            WindowConfig::new(64, 1.0),
            Err(ConfigError::OverlapOutOfRange(_))
        ));
        assert!(matches!(
            WindowConfig::new(64, -0.1),
            Err(ConfigError::OverlapOutOfRange(_))
        ));
        assert!(matches!(
            WindowConfig::new(4, 0.999),
            Err(ConfigError::ZeroStride { .. })
        ));
    }

    #[test]
    fn battery_series_are_aligned() {
        let rr = noisy_rr(300, 5);
        let cfg = WindowConfig::new(64, 0.75).unwrap();
        let expected = cfg.count(300);
        let non = nonlinear_features(&rr, &cfg);
        assert_eq!(non.app_entropy.len(), expected);
        assert_eq!(non.sample_entropy.len(), expected);
        assert_eq!(non.higuchi_fd.len(), expected);
        assert_eq!(non.dfa.len(), expected);
        assert_eq!(non.sd_ratio.len(), expected);
    }

    #[test]
    fn battery_names_keep_table_order() {
        let names: Vec<&str> = window_reduce(&[0.8; 16], &WindowConfig::new(8, 0.5).unwrap(), LINEAR_BATTERY)
            .iter()
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(names, ["mean", "variance", "skewness", "kurtosis"]);
    }

    #[test]
    fn cv_is_variance_over_mean_elementwise() {
        let rr = noisy_rr(400, 7);
        let cfg = WindowConfig::new(64, 0.5).unwrap();
        let lin = linear_features(&rr, &cfg);
        assert_eq!(lin.cv.len(), lin.mean.len());
        for i in 0..lin.cv.len() {
            assert_eq!(lin.cv.values[i], lin.variance.values[i] / lin.mean.values[i]);
        }
    }

    #[test]
    fn constant_rr_keeps_moments_defined() {
        let rr = RRSeries { rr: vec![0.8; 3000] };
        let cfg = WindowConfig::new(1024, 0.95).unwrap();
        let lin = linear_features(&rr, &cfg);
        assert_eq!(lin.mean.len(), 39);
        for i in 0..lin.mean.len() {
            assert!((lin.mean.values[i] - 0.8).abs() < 1e-12);
            assert!(lin.variance.values[i].abs() < 1e-12);
            assert!(lin.skewness.values[i].is_finite());
            assert!(lin.kurtosis.values[i].is_finite());
        }
    }

    #[test]
    fn poincare_ratio_of_a_regular_window_is_infinite() {
        assert_eq!(poincare_ratio(&[0.8; 32]), f64::INFINITY);
        let varied = [0.8, 0.9, 0.7, 0.85, 0.75, 0.95];
        assert!(poincare_ratio(&varied).is_finite());
    }

    #[test]
    fn short_sequence_yields_empty_series() {
        let cfg = WindowConfig::new(2048, 0.95).unwrap();
        let lin = linear_features(&RRSeries { rr: vec![0.8; 100] }, &cfg);
        assert!(lin.mean.is_empty());
        assert!(lin.cv.is_empty());
        let non = nonlinear_features(&RRSeries::default(), &cfg);
        assert!(non.app_entropy.is_empty());
        assert!(non.sd_ratio.is_empty());
    }
}
