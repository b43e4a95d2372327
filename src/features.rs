use crate::config::ConfigError;
use crate::models::FeatureMatrix;
use crate::rolling::{
    expanding_median_at, rolling_mean, rolling_mean_at, rolling_std, rolling_zscore,
};
use anyhow::{anyhow, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-12;

/// Window sets for the engineered feature columns. All windows are
/// strictly past relative to the index they describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub lags: Vec<usize>,
    pub momentum_windows: Vec<usize>,
    pub volatility_windows: Vec<usize>,
    pub zscore_windows: Vec<usize>,
    /// Raw data-file columns to z-score against their own rolling
    /// statistics, using `zscore_windows`. Resolved by name once the
    /// raw columns have been inserted into the matrix.
    #[serde(default)]
    pub zscore_columns: Vec<String>,
    pub trend_windows: Vec<usize>,
    pub vol_regime_windows: Vec<usize>,
    pub epsilon: f64,
    pub correlation_threshold: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: vec![1, 2, 3, 5, 10, 20],
            momentum_windows: vec![5, 10, 20],
            volatility_windows: vec![5, 10, 20],
            zscore_windows: vec![20],
            zscore_columns: Vec::new(),
            trend_windows: vec![20, 50, 200],
            vol_regime_windows: vec![20],
            epsilon: 1e-8,
            correlation_threshold: 0.999,
        }
    }
}

impl FeatureConfig {
    /// Rejects configurations that could never be causal or whose
    /// windows are too short for the statistic they feed. Checked at
    /// pipeline construction, never silently corrected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for &lag in &self.lags {
            if lag == 0 {
                return Err(ConfigError::ZeroLag);
            }
        }
        for &window in &self.momentum_windows {
            if window == 0 {
                return Err(ConfigError::ZeroWindow("momentum"));
            }
        }
        for &window in self
            .volatility_windows
            .iter()
            .chain(&self.zscore_windows)
            .chain(&self.vol_regime_windows)
        {
            if window < 2 {
                return Err(ConfigError::StdWindowTooShort(window));
            }
        }
        for &window in &self.trend_windows {
            if window == 0 {
                return Err(ConfigError::ZeroWindow("trend"));
            }
        }
        if !(self.epsilon > 0.0) {
            return Err(ConfigError::NonPositiveEpsilon(self.epsilon));
        }
        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            return Err(ConfigError::InvalidCorrelationThreshold(
                self.correlation_threshold,
            ));
        }
        Ok(())
    }
}

enum ColumnSpec {
    Lag(usize),
    Momentum(usize),
    Volatility(usize),
    ReturnZscore(usize),
    TrendUp(usize),
    VolHigh(usize),
}

impl ColumnSpec {
    fn name(&self) -> String {
        match self {
            ColumnSpec::Lag(k) => format!("lag_{k}"),
            ColumnSpec::Momentum(m) => format!("momentum_{m}"),
            ColumnSpec::Volatility(m) => format!("vol_{m}"),
            ColumnSpec::ReturnZscore(m) => format!("ret_zscore_{m}"),
            ColumnSpec::TrendUp(w) => format!("trend_up_{w}"),
            ColumnSpec::VolHigh(w) => format!("vol_high_{w}"),
        }
    }

    fn compute(
        &self,
        prices: &[Option<f64>],
        returns: &[Option<f64>],
        epsilon: f64,
    ) -> Vec<Option<f64>> {
        match *self {
            ColumnSpec::Lag(k) => lagged(returns, k),
            ColumnSpec::Momentum(m) => rolling_mean(returns, m),
            ColumnSpec::Volatility(m) => rolling_std(returns, m),
            ColumnSpec::ReturnZscore(m) => rolling_zscore(returns, m, epsilon),
            ColumnSpec::TrendUp(w) => trend_up(prices, w),
            ColumnSpec::VolHigh(w) => vol_high(returns, w),
        }
    }
}

fn lagged(series: &[Option<f64>], k: usize) -> Vec<Option<f64>> {
    (0..series.len())
        .map(|t| if t < k { None } else { series[t - k] })
        .collect()
}

/// 1 when the price sits above its strictly-past simple moving
/// average, 0 otherwise.
fn trend_up(prices: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..prices.len())
        .map(|t| {
            let price = prices[t]?;
            let sma = rolling_mean_at(prices, t, window)?;
            Some(if price > sma { 1.0 } else { 0.0 })
        })
        .collect()
}

/// 1 when the rolling volatility exceeds its own expanding causal
/// median (median over vol values up to and including t). Using the
/// full-sample median here would leak future data into the regime
/// flag.
fn vol_high(returns: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    let vol = rolling_std(returns, window);
    (0..vol.len())
        .map(|t| {
            let current = vol[t]?;
            let median = expanding_median_at(&vol, t)?;
            Some(if current > median { 1.0 } else { 0.0 })
        })
        .collect()
}

/// Builds every configured feature column from the raw price and
/// return series. Columns are independent of one another, so they are
/// computed in parallel; each column still fills strictly forward in
/// time.
pub fn build_feature_matrix(
    ids: &[i64],
    prices: &[Option<f64>],
    returns: &[Option<f64>],
    config: &FeatureConfig,
) -> Result<FeatureMatrix> {
    config.validate()?;

    let mut specs: Vec<ColumnSpec> = Vec::new();
    specs.extend(config.lags.iter().map(|&k| ColumnSpec::Lag(k)));
    specs.extend(config.momentum_windows.iter().map(|&m| ColumnSpec::Momentum(m)));
    specs.extend(
        config
            .volatility_windows
            .iter()
            .map(|&m| ColumnSpec::Volatility(m)),
    );
    specs.extend(
        config
            .zscore_windows
            .iter()
            .map(|&m| ColumnSpec::ReturnZscore(m)),
    );
    specs.extend(config.trend_windows.iter().map(|&w| ColumnSpec::TrendUp(w)));
    specs.extend(
        config
            .vol_regime_windows
            .iter()
            .map(|&w| ColumnSpec::VolHigh(w)),
    );

    let columns: Vec<(String, Vec<Option<f64>>)> = specs
        .par_iter()
        .map(|spec| (spec.name(), spec.compute(prices, returns, config.epsilon)))
        .collect();

    let mut matrix = FeatureMatrix::new(ids.to_vec());
    for (name, values) in columns {
        matrix.insert(&name, values)?;
    }
    Ok(matrix)
}

/// Z-scores the named columns against their own rolling statistics,
/// appending a `{name}_zscore_{m}` column per target and window. The
/// targets must already sit in the matrix, so raw data-file columns
/// qualify once they have been inserted.
pub fn append_zscore_columns(
    matrix: &mut FeatureMatrix,
    targets: &[String],
    windows: &[usize],
    epsilon: f64,
) -> Result<()> {
    let mut jobs: Vec<(String, Vec<Option<f64>>, usize)> = Vec::new();
    for target in targets {
        let column = matrix
            .column(target)
            .ok_or_else(|| anyhow!("z-score target column {target} not present in the data"))?
            .to_vec();
        for &window in windows {
            jobs.push((format!("{target}_zscore_{window}"), column.clone(), window));
        }
    }

    let computed: Vec<(String, Vec<Option<f64>>)> = jobs
        .par_iter()
        .map(|(name, column, window)| (name.clone(), rolling_zscore(column, *window, epsilon)))
        .collect();
    for (name, values) in computed {
        matrix.insert(&name, values)?;
    }
    Ok(())
}

fn column_variance(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().filter_map(|v| *v).collect();
    if present.len() < 2 {
        return None;
    }
    let mean = present.iter().sum::<f64>() / present.len() as f64;
    Some(
        present
            .iter()
            .map(|value| {
                let diff = value - mean;
                diff * diff
            })
            .sum::<f64>()
            / (present.len() as f64 - 1.0),
    )
}

fn column_correlation(x: &[Option<f64>], y: &[Option<f64>]) -> Option<f64> {
    let mut paired: Vec<(f64, f64)> = Vec::new();
    for (a, b) in x.iter().zip(y.iter()) {
        if let (Some(a), Some(b)) = (a, b) {
            paired.push((*a, *b));
        }
    }
    if paired.len() < 2 {
        return None;
    }

    let mean_x = paired.iter().map(|(a, _)| *a).sum::<f64>() / paired.len() as f64;
    let mean_y = paired.iter().map(|(_, b)| *b).sum::<f64>() / paired.len() as f64;

    let mut numerator = 0.0;
    let mut denom_x = 0.0;
    let mut denom_y = 0.0;
    for (a, b) in paired {
        let dx = a - mean_x;
        let dy = b - mean_y;
        numerator += dx * dy;
        denom_x += dx * dx;
        denom_y += dy * dy;
    }

    let denom = (denom_x * denom_y).sqrt();
    if denom <= EPSILON {
        None
    } else {
        Some(numerator / denom)
    }
}

/// Drops constant columns and near-duplicates (absolute correlation at
/// or above the configured threshold, later column loses). Filtering
/// policy only; returns the names that were removed.
pub fn drop_redundant_columns(
    matrix: &mut FeatureMatrix,
    correlation_threshold: f64,
) -> Vec<String> {
    let names = matrix.names().to_vec();
    let mut kept: Vec<String> = Vec::new();
    let mut kept_indices: Vec<usize> = Vec::new();
    let mut dropped: Vec<String> = Vec::new();

    for (idx, name) in names.iter().enumerate() {
        let column = matrix.column_by_index(idx);
        let variance = column_variance(column);
        let constant = matches!(variance, Some(v) if v <= EPSILON) || variance.is_none();
        if constant {
            dropped.push(name.clone());
            continue;
        }

        let duplicate = kept_indices.iter().any(|&kept_idx| {
            column_correlation(matrix.column_by_index(kept_idx), column)
                .map(|corr| corr.abs() >= correlation_threshold)
                .unwrap_or(false)
        });
        if duplicate {
            dropped.push(name.clone());
        } else {
            kept.push(name.clone());
            kept_indices.push(idx);
        }
    }

    matrix.retain_columns(&kept);
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(values: &[f64]) -> Vec<Option<f64>> {
        values.iter().copied().map(Some).collect()
    }

    fn small_config() -> FeatureConfig {
        FeatureConfig {
            lags: vec![1, 2],
            momentum_windows: vec![2],
            volatility_windows: vec![2],
            zscore_windows: vec![2],
            zscore_columns: Vec::new(),
            trend_windows: vec![2],
            vol_regime_windows: vec![2],
            epsilon: 1e-8,
            correlation_threshold: 0.999,
        }
    }

    fn sample_inputs() -> (Vec<i64>, Vec<Option<f64>>, Vec<Option<f64>>) {
        let returns = vec![
            None,
            Some(0.01),
            Some(-0.02),
            Some(0.03),
            Some(0.015),
            Some(-0.005),
            Some(0.02),
        ];
        let mut prices = Vec::with_capacity(returns.len());
        let mut level = 1.0;
        for value in &returns {
            if let Some(r) = value {
                level *= 1.0 + r;
            }
            prices.push(Some(level));
        }
        let ids = (0..returns.len() as i64).collect();
        (ids, prices, returns)
    }

    #[test]
    fn builds_expected_columns_with_lag_semantics() {
        let (ids, prices, returns) = sample_inputs();
        let matrix = build_feature_matrix(&ids, &prices, &returns, &small_config()).unwrap();

        let lag_1 = matrix.column("lag_1").unwrap();
        assert_eq!(lag_1[0], None);
        assert_eq!(lag_1[2], Some(0.01));
        assert_eq!(lag_1[3], Some(-0.02));

        let momentum = matrix.column("momentum_2").unwrap();
        assert!((momentum[3].unwrap() + 0.005).abs() < 1e-12);

        let vol = matrix.column("vol_2").unwrap();
        assert!((vol[3].unwrap() - 0.021213203435596427).abs() < 1e-9);
    }

    #[test]
    fn trend_flag_compares_price_to_past_only_sma() {
        let prices = opt(&[1.0, 2.0, 3.0, 0.5]);
        let flags = trend_up(&prices, 2);
        assert_eq!(flags[0], None);
        assert_eq!(flags[1], None);
        // SMA over [1.0, 2.0] = 1.5 < 3.0
        assert_eq!(flags[2], Some(1.0));
        // SMA over [2.0, 3.0] = 2.5 > 0.5
        assert_eq!(flags[3], Some(0.0));
    }

    #[test]
    fn vol_regime_uses_expanding_causal_median() {
        let mut returns = vec![Some(0.01), Some(-0.01)];
        // quiet stretch then a volatile stretch
        for i in 0..12 {
            returns.push(Some(if i % 2 == 0 { 0.001 } else { -0.001 }));
        }
        for i in 0..6 {
            returns.push(Some(if i % 2 == 0 { 0.05 } else { -0.05 }));
        }
        let flags = vol_high(&returns, 2);
        let last = flags.last().copied().flatten();
        assert_eq!(last, Some(1.0));
        // early flags never consult the later volatile stretch: a
        // truncated series must agree with the full one
        let truncated = vol_high(&returns[..10], 2);
        assert_eq!(&flags[..10], &truncated[..]);
    }

    #[test]
    fn zscore_targets_normalize_any_named_column() {
        let mut matrix = FeatureMatrix::new(vec![0, 1, 2, 3, 4]);
        matrix
            .insert(
                "M1",
                vec![Some(1.0), Some(3.0), Some(2.0), Some(4.0), Some(6.0)],
            )
            .unwrap();

        append_zscore_columns(&mut matrix, &["M1".to_string()], &[2], 1e-8).unwrap();
        let z = matrix.column("M1_zscore_2").unwrap();
        assert_eq!(z[0], None);
        assert_eq!(z[1], None);
        // window [1.0, 3.0]: mean 2.0, std sqrt(2); current value 2.0
        assert!(z[2].unwrap().abs() < 1e-9);
        // window [3.0, 2.0]: mean 2.5, std sqrt(0.5); current value 4.0
        let expected = (4.0 - 2.5) / (0.5f64.sqrt() + 1e-8);
        assert!((z[3].unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn unknown_zscore_target_is_an_error() {
        let mut matrix = FeatureMatrix::new(vec![0, 1]);
        matrix.insert("M1", vec![Some(1.0), Some(2.0)]).unwrap();
        assert!(
            append_zscore_columns(&mut matrix, &["absent".to_string()], &[2], 1e-8).is_err()
        );
    }

    #[test]
    fn rejects_non_causal_or_degenerate_configuration() {
        let mut config = small_config();
        config.lags = vec![0];
        assert!(config.validate().is_err());

        let mut config = small_config();
        config.volatility_windows = vec![1];
        assert!(config.validate().is_err());

        let mut config = small_config();
        config.epsilon = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn redundancy_filter_drops_constants_and_duplicates() {
        let mut matrix = FeatureMatrix::new(vec![0, 1, 2, 3]);
        matrix
            .insert("base", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)])
            .unwrap();
        matrix
            .insert("twice", vec![Some(2.0), Some(4.0), Some(6.0), Some(8.0)])
            .unwrap();
        matrix
            .insert("flat", vec![Some(7.0), Some(7.0), Some(7.0), Some(7.0)])
            .unwrap();
        matrix
            .insert("noise", vec![Some(0.3), Some(-0.6), Some(0.8), Some(-0.1)])
            .unwrap();

        let dropped = drop_redundant_columns(&mut matrix, 0.999);
        assert_eq!(dropped, vec!["twice".to_string(), "flat".to_string()]);
        assert_eq!(matrix.names(), &["base".to_string(), "noise".to_string()]);
    }

    #[test]
    fn rebuilding_is_deterministic() {
        let (ids, prices, returns) = sample_inputs();
        let config = small_config();
        let first = build_feature_matrix(&ids, &prices, &returns, &config).unwrap();
        let second = build_feature_matrix(&ids, &prices, &returns, &config).unwrap();
        assert_eq!(first, second);
    }
}
