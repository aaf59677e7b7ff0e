//! Statistical helpers for the trend operators.
//!
//! Population statistics over a history window, plus the percent-change
//! and z-score measures. Degenerate inputs return `None` so callers fail
//! the condition instead of dividing by zero.

/// Arithmetic mean. `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`, not `n - 1`).
pub fn population_stddev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// `|current - baseline| / |baseline| * 100`. `None` when the baseline is zero.
pub fn percent_change(current: f64, baseline: f64) -> Option<f64> {
    if baseline.abs() < f64::EPSILON {
        return None;
    }
    Some((current - baseline).abs() / baseline.abs() * 100.0)
}

/// Minimum history length for a meaningful z-score.
pub const MIN_ZSCORE_POINTS: usize = 3;

/// `|current - mean| / stddev` over `history`.
///
/// `None` with fewer than [`MIN_ZSCORE_POINTS`] points or zero spread.
pub fn z_score(current: f64, history: &[f64]) -> Option<f64> {
    if history.len() < MIN_ZSCORE_POINTS {
        return None;
    }
    let m = mean(history)?;
    let sd = population_stddev(history)?;
    if sd < f64::EPSILON {
        return None;
    }
    Some((current - m).abs() / sd)
}
