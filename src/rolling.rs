//! Rolling statistics over optional-valued series.
//!
//! Every statistic ending at index `t` reads exactly the strictly-past
//! window `{t-m, ..., t-1}`, never index `t` itself. Insufficient
//! history yields `None`; that is the expected cold-start state, not
//! an error.

/// Strictly-past window of length `window` ending before `t`, with all
/// entries present. `None` while any observation is still missing.
fn past_window(series: &[Option<f64>], t: usize, window: usize) -> Option<Vec<f64>> {
    if window == 0 || t < window || t > series.len() {
        return None;
    }
    let slice = &series[t - window..t];
    let mut values = Vec::with_capacity(window);
    for value in slice {
        values.push((*value)?);
    }
    Some(values)
}

fn mean_of(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean of the `window` observations strictly before `t`.
pub fn rolling_mean_at(series: &[Option<f64>], t: usize, window: usize) -> Option<f64> {
    past_window(series, t, window).map(|values| mean_of(&values))
}

/// Bessel-corrected sample standard deviation of the `window`
/// observations strictly before `t`. Needs `window >= 2`.
pub fn rolling_std_at(series: &[Option<f64>], t: usize, window: usize) -> Option<f64> {
    if window < 2 {
        return None;
    }
    let values = past_window(series, t, window)?;
    let mean = mean_of(&values);
    let sum_sq: f64 = values
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum();
    Some((sum_sq / (window as f64 - 1.0)).sqrt())
}

/// Z-score of `series[t]` against the strictly-past rolling mean and
/// std, with an epsilon-stabilized denominator.
pub fn rolling_zscore_at(
    series: &[Option<f64>],
    t: usize,
    window: usize,
    epsilon: f64,
) -> Option<f64> {
    let current = *series.get(t)?;
    let current = current?;
    let mean = rolling_mean_at(series, t, window)?;
    let std = rolling_std_at(series, t, window)?;
    Some((current - mean) / (std + epsilon))
}

/// Median of all valid observations up to and including `t`
/// (expanding causal window).
pub fn expanding_median_at(series: &[Option<f64>], t: usize) -> Option<f64> {
    if t >= series.len() {
        return None;
    }
    let mut values: Vec<f64> = series[..=t].iter().filter_map(|value| *value).collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Best-effort shrinking-window mean: average of every valid
/// observation strictly before `t`. `None` only when no past
/// observation exists at all.
pub fn shrinking_mean_at(series: &[Option<f64>], t: usize) -> Option<f64> {
    let end = t.min(series.len());
    let values: Vec<f64> = series[..end].iter().filter_map(|value| *value).collect();
    if values.is_empty() {
        None
    } else {
        Some(mean_of(&values))
    }
}

/// Full-series rolling mean, aligned with the input.
pub fn rolling_mean(series: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..series.len())
        .map(|t| rolling_mean_at(series, t, window))
        .collect()
}

/// Full-series rolling standard deviation, aligned with the input.
pub fn rolling_std(series: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..series.len())
        .map(|t| rolling_std_at(series, t, window))
        .collect()
}

/// Full-series rolling z-score, aligned with the input.
pub fn rolling_zscore(series: &[Option<f64>], window: usize, epsilon: f64) -> Vec<Option<f64>> {
    (0..series.len())
        .map(|t| rolling_zscore_at(series, t, window, epsilon))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-8;

    fn series(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    #[test]
    fn mean_uses_only_strictly_past_observations() {
        let s = series(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(rolling_mean_at(&s, 0, 2), None);
        assert_eq!(rolling_mean_at(&s, 1, 2), None);
        assert_eq!(rolling_mean_at(&s, 2, 2), Some(1.5));
        assert_eq!(rolling_mean_at(&s, 3, 2), Some(2.5));
    }

    #[test]
    fn std_undefined_until_window_filled_then_non_negative() {
        let s = series(&[0.5, -0.25, 0.75, 0.1, 0.0, 0.3]);
        let out = rolling_std(&s, 3);
        for (t, value) in out.iter().enumerate() {
            if t < 3 {
                assert!(value.is_none(), "std defined too early at t={t}");
            } else {
                assert!(value.unwrap() >= 0.0);
            }
        }
    }

    #[test]
    fn std_requires_window_of_at_least_two() {
        let s = series(&[1.0, 2.0, 3.0]);
        assert_eq!(rolling_std_at(&s, 2, 1), None);
        assert!(rolling_std_at(&s, 2, 2).is_some());
    }

    #[test]
    fn leading_missing_values_delay_the_window() {
        // r = [missing, 0.01, -0.02, 0.03, 0.015] with m = 2:
        // momentum_2(3) = mean(r[1], r[2]) = -0.005
        // vol_2(3) = sample std of (0.01, -0.02) ~= 0.02121
        let r = vec![None, Some(0.01), Some(-0.02), Some(0.03), Some(0.015)];
        assert_eq!(rolling_mean_at(&r, 2, 2), None);
        let momentum = rolling_mean_at(&r, 3, 2).unwrap();
        assert!((momentum + 0.005).abs() < 1e-12);
        let vol = rolling_std_at(&r, 3, 2).unwrap();
        assert!((vol - 0.021213203435596427).abs() < 1e-9);
    }

    #[test]
    fn zscore_matches_hand_computation() {
        let s = series(&[1.0, 3.0, 2.0]);
        // window over [1.0, 3.0]: mean 2.0, std sqrt(2)
        let z = rolling_zscore_at(&s, 2, 2, EPS).unwrap();
        let expected = (2.0 - 2.0) / (2.0f64.sqrt() + EPS);
        assert!((z - expected).abs() < 1e-12);
    }

    #[test]
    fn expanding_median_is_causal() {
        let s = series(&[3.0, 1.0, 2.0, 100.0]);
        assert_eq!(expanding_median_at(&s, 0), Some(3.0));
        assert_eq!(expanding_median_at(&s, 1), Some(2.0));
        assert_eq!(expanding_median_at(&s, 2), Some(2.0));
        // the outlier only enters once its own index is reached
        assert_eq!(expanding_median_at(&s, 3), Some(2.5));
    }

    #[test]
    fn shrinking_mean_ignores_missing_and_needs_some_history() {
        let s = vec![None, Some(2.0), None, Some(4.0)];
        assert_eq!(shrinking_mean_at(&s, 0), None);
        assert_eq!(shrinking_mean_at(&s, 1), None);
        assert_eq!(shrinking_mean_at(&s, 2), Some(2.0));
        assert_eq!(shrinking_mean_at(&s, 3), Some(2.0));
        assert_eq!(shrinking_mean_at(&s, 4), Some(3.0));
    }
}
