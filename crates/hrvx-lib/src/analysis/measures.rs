//! Nonlinear signal measures: entropies, fractal dimension, detrended
//! fluctuation and rescaled-range exponents.
//!
//! All of them are tolerant of degenerate input. A series too short or
//! too flat to support the estimate yields 0.0 rather than NaN, so one
//! pathological window cannot poison a whole batch.

use crate::analysis::stats::population_std;
use realfft::RealFftPlanner;

/// Fraction of the population standard deviation used as the match
/// tolerance by both entropy estimates.
const TOLERANCE_FRACTION: f64 = 0.2;

/// Approximate entropy (Pincus) with Chebyshev distance.
///
/// Self-matches are counted, so every template has at least one match
/// and the logarithms stay finite.
pub fn app_entropy(data: &[f64], order: usize) -> f64 {
    if data.len() <= order + 1 {
        return 0.0;
    }
    let r = TOLERANCE_FRACTION * population_std(data);
    phi(data, order, r) - phi(data, order + 1, r)
}

fn phi(data: &[f64], dim: usize, r: f64) -> f64 {
    let count = data.len() - dim + 1;
    let mut total = 0.0;
    for i in 0..count {
        let mut matches = 0usize;
        for j in 0..count {
            if chebyshev(data, i, j, dim) <= r {
                matches += 1;
            }
        }
        total += (matches as f64 / count as f64).ln();
    }
    total / count as f64
}

/// Sample entropy (Richman-Moorman) with Chebyshev distance.
pub fn sample_entropy(data: &[f64], order: usize) -> f64 {
    if data.len() <= order + 1 {
        return 0.0;
    }
    let r = TOLERANCE_FRACTION * population_std(data);
    let templates = data.len() - order;
    let mut count_m = 0u64;
    let mut count_m1 = 0u64;
    for i in 0..templates {
        for j in (i + 1)..templates {
            if chebyshev(data, i, j, order) <= r {
                count_m += 1;
                if chebyshev(data, i, j, order + 1) <= r {
                    count_m1 += 1;
                }
            }
        }
    }
    if count_m == 0 || count_m1 == 0 {
        0.0
    } else {
        -((count_m1 as f64) / (count_m as f64)).ln()
    }
}

fn chebyshev(data: &[f64], i: usize, j: usize, len: usize) -> f64 {
    data[i..i + len]
        .iter()
        .zip(&data[j..j + len])
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max)
}

/// Higuchi fractal dimension from the usual curve-length construction.
///
/// Scores near 1 for smooth series and approach 2 for white noise.
pub fn higuchi_fd(data: &[f64], k_max: usize) -> f64 {
    let n = data.len();
    if k_max < 2 || n < k_max + 2 {
        return 0.0;
    }
    let mut points = Vec::with_capacity(k_max);
    for k in 1..=k_max {
        let mut total = 0.0;
        let mut curves = 0usize;
        for m in 0..k {
            let steps = (n - 1 - m) / k;
            if steps == 0 {
                continue;
            }
            let mut length = 0.0;
            for i in 1..=steps {
                length += (data[m + i * k] - data[m + (i - 1) * k]).abs();
            }
            total += length * (n - 1) as f64 / (steps * k) as f64 / k as f64;
            curves += 1;
        }
        if curves == 0 {
            continue;
        }
        let mean_len = total / curves as f64;
        if mean_len > 0.0 {
            points.push((1.0 / k as f64, mean_len));
        }
    }
    if points.len() < 2 {
        return 0.0;
    }
    log_log_slope(&points)
}

/// Detrended fluctuation exponent over log-spaced box sizes, factor 1.2
/// from 4 samples up to a tenth of the series.
pub fn detrended_fluctuation(data: &[f64]) -> f64 {
    const MIN_BOX: usize = 4;
    let n = data.len();
    if n < MIN_BOX * 4 {
        return 0.0;
    }
    let max_box = (n / 10).max(MIN_BOX + 1);
    let mean = data.iter().sum::<f64>() / n as f64;
    let mut profile = Vec::with_capacity(n);
    let mut acc = 0.0;
    for &x in data {
        acc += x - mean;
        profile.push(acc);
    }
    let mut points = Vec::new();
    for size in logspace_sizes(MIN_BOX, max_box, 1.2) {
        let mut total = 0.0;
        let mut segments = 0usize;
        let mut idx = 0;
        while idx + size <= profile.len() {
            let segment = &profile[idx..idx + size];
            let (slope, intercept) = linear_fit(segment);
            let mut err = 0.0;
            for (i, &y) in segment.iter().enumerate() {
                let trend = slope * i as f64 + intercept;
                err += (y - trend) * (y - trend);
            }
            total += err / size as f64;
            segments += 1;
            idx += size;
        }
        if segments == 0 {
            continue;
        }
        let rms = (total / segments as f64).sqrt();
        if rms.is_finite() && rms > 0.0 {
            points.push((size as f64, rms));
        }
    }
    if points.len() < 2 {
        return 0.0;
    }
    log_log_slope(&points)
}

/// Hurst exponent by rescaled-range analysis of the increment series,
/// chunk sizes log-spaced by factor 1.5 up to half the series.
pub fn hurst_exponent(data: &[f64]) -> f64 {
    const MIN_CHUNK: usize = 10;
    let n = data.len();
    if n < MIN_CHUNK * 2 {
        return 0.0;
    }
    let mut points = Vec::new();
    for size in logspace_sizes(MIN_CHUNK, n / 2, 1.5) {
        let mut ratios = Vec::new();
        let mut idx = 0;
        while idx + size <= n {
            if let Some(rs) = rescaled_range(&data[idx..idx + size]) {
                ratios.push(rs);
            }
            idx += size;
        }
        if ratios.is_empty() {
            continue;
        }
        let mean_rs = ratios.iter().sum::<f64>() / ratios.len() as f64;
        if mean_rs > 0.0 {
            points.push((size as f64, mean_rs));
        }
    }
    if points.len() < 2 {
        return 0.0;
    }
    log_log_slope(&points)
}

/// R/S of one chunk. None when the increments have no spread.
fn rescaled_range(chunk: &[f64]) -> Option<f64> {
    if chunk.len() < 2 {
        return None;
    }
    let incs: Vec<f64> = chunk.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = incs.iter().sum::<f64>() / incs.len() as f64;
    let mut acc = 0.0;
    let mut low = f64::MAX;
    let mut high = f64::MIN;
    for &x in &incs {
        acc += x - mean;
        if acc < low {
            low = acc;
        }
        if acc > high {
            high = acc;
        }
    }
    let spread = population_std(&incs);
    if spread == 0.0 {
        return None;
    }
    Some((high - low) / spread)
}

/// Shannon spectral entropy (log2) of the unit-normalized one-sided
/// power spectrum. Zero for empty, constant, or single-tone input at an
/// exact bin.
pub fn spectral_entropy(data: &[f64]) -> f64 {
    let n = data.len();
    if n < 2 {
        return 0.0;
    }
    let mut planner = RealFftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buffer = data.to_vec();
    let mut spectrum = fft.make_output_vec();
    fft.process(&mut buffer, &mut spectrum).unwrap();

    let mut total_power = 0.0;
    let powers: Vec<f64> = spectrum
        .iter()
        .map(|c| {
            let p = c.norm_sqr();
            total_power += p;
            p
        })
        .collect();
    if total_power == 0.0 {
        return 0.0;
    }
    let mut entropy = 0.0;
    for power in powers {
        if power <= 0.0 {
            continue;
        }
        let p = power / total_power;
        entropy -= p * p.log2();
    }
    entropy
}

/// Geometric size ladder: min, min*factor, ... capped at max, deduped
/// after rounding.
fn logspace_sizes(min: usize, max: usize, factor: f64) -> Vec<usize> {
    let mut out = Vec::new();
    let mut current = min as f64;
    loop {
        let size = current.round() as usize;
        if size > max {
            break;
        }
        if out.last() != Some(&size) {
            out.push(size);
        }
        current *= factor;
    }
    out
}

/// Least-squares line through (0, y0), (1, y1), ...
fn linear_fit(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den < f64::EPSILON {
        return (0.0, y_mean);
    }
    let slope = num / den;
    (slope, y_mean - slope * x_mean)
}

/// Slope of ln(y) against ln(x).
fn log_log_slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    let x_mean = points.iter().map(|(x, _)| x.ln()).sum::<f64>() / n;
    let y_mean = points.iter().map(|(_, y)| y.ln()).sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for &(x, y) in points {
        let dx = x.ln() - x_mean;
        num += dx * (y.ln() - y_mean);
        den += dx * dx;
    }
    if den < f64::EPSILON {
        return 0.0;
    }
    num / den
}
