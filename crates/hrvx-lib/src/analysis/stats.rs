//! Descriptive statistics shared by the windowed batteries and the
//! whole-record summaries.

/// First four moments of a sample.
///
/// Variance uses the n-1 estimator. Skewness is the biased g1 moment
/// ratio and kurtosis is biased excess kurtosis, so a normal sample
/// scores near 0 and a constant sample scores exactly -3. A degenerate
/// window therefore stays finite instead of going NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Moments {
    pub mean: f64,
    pub variance: f64,
    pub skewness: f64,
    pub kurtosis: f64,
}

pub fn describe(data: &[f64]) -> Moments {
    let n = data.len();
    if n == 0 {
        return Moments { mean: f64::NAN, variance: 0.0, skewness: 0.0, kurtosis: -3.0 };
    }
    let n_f = n as f64;
    let mean = data.iter().sum::<f64>() / n_f;
    let mut m2 = 0.0;
    let mut m3 = 0.0;
    let mut m4 = 0.0;
    for &x in data {
        let d = x - mean;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    m2 /= n_f;
    m3 /= n_f;
    m4 /= n_f;
    let variance = if n > 1 { m2 * n_f / (n_f - 1.0) } else { 0.0 };
    let (skewness, kurtosis) = if m2 > 0.0 {
        (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
    } else {
        (0.0, -3.0)
    };
    Moments { mean, variance, skewness, kurtosis }
}

/// Population (ddof = 0) standard deviation.
pub fn population_std(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let n = data.len() as f64;
    let mean = data.iter().sum::<f64>() / n;
    (data.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n).sqrt()
}
