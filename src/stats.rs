//! Summary statistics over pixel samples.
//!
//! Sample slices are expected to be free of sentinel values already. A NaN
//! sample makes every statistic NaN.

/// Scale turning a median absolute deviation into a Gaussian σ estimate
/// (`1 / Φ⁻¹(3/4)`).
pub const MAD_SCALE: f64 = 1.482602218505602;

/// Median, averaging the two middle values for even-length input.
/// Returns NaN for an empty slice or one containing NaN.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if n % 2 == 0 {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    } else {
        sorted[n / 2]
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divides by `n`).
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Robust σ estimate: `MAD_SCALE * median(|x - median(x)|)`.
pub fn mad_std(values: &[f64]) -> f64 {
    let m = median(values);
    if m.is_nan() {
        return f64::NAN;
    }
    let abs_devs: Vec<f64> = values.iter().map(|v| (v - m).abs()).collect();
    MAD_SCALE * median(&abs_devs)
}
