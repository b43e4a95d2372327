//! Sharpe-style position sizing with volatility targeting.
//!
//! A forecast and a risk estimate map to a leverage in [0, 2]:
//!
//! ```text
//! raw_weight = mu / (sigma^2 + eps)
//! scale      = target_vol / (current_vol + eps)
//! weight     = clamp(raw_weight * scale, min_weight, max_weight)
//! ```
//!
//! Extreme raw weights from near-zero volatility are expected and are
//! absorbed by the clip step; they are never an error.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    /// Target daily volatility of the strategy return stream.
    pub target_vol: f64,
    /// Additive guard for every denominator. Tunable; 1e-8 is small
    /// enough not to distort normal-magnitude daily signals.
    pub epsilon: f64,
    /// Leverage floor (no shorting).
    pub min_weight: f64,
    /// Leverage cap.
    pub max_weight: f64,
    /// Trailing window of realized strategy returns used as
    /// `current_vol`.
    pub realized_vol_lookback: usize,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            target_vol: 0.01,
            epsilon: 1e-8,
            min_weight: 0.0,
            max_weight: 2.0,
            realized_vol_lookback: 20,
        }
    }
}

impl AllocationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.epsilon > 0.0) {
            return Err(ConfigError::NonPositiveEpsilon(self.epsilon));
        }
        if !(self.target_vol > 0.0) {
            return Err(ConfigError::NonPositiveTargetVol(self.target_vol));
        }
        if self.min_weight < 0.0 || self.max_weight <= self.min_weight {
            return Err(ConfigError::InvalidLeverageBounds(
                self.min_weight,
                self.max_weight,
            ));
        }
        if self.realized_vol_lookback < 2 {
            return Err(ConfigError::VolLookbackTooShort(self.realized_vol_lookback));
        }
        Ok(())
    }
}

/// Forecast divided by epsilon-guarded variance. Monotone
/// non-decreasing in `mu` and non-increasing in `sigma` for positive
/// forecasts.
pub fn raw_weight(mu: f64, sigma: f64, epsilon: f64) -> f64 {
    mu / (sigma * sigma + epsilon)
}

/// Volatility-targeting multiplier.
pub fn vol_scale(target_vol: f64, current_vol: f64, epsilon: f64) -> f64 {
    target_vol / (current_vol + epsilon)
}

/// Fully sized and clipped portfolio weight. Clipping is total: the
/// result is inside the bounds whatever the inputs.
pub fn weight(
    mu: f64,
    sigma: f64,
    current_vol: f64,
    config: &AllocationConfig,
) -> f64 {
    let unclipped = raw_weight(mu, sigma, config.epsilon)
        * vol_scale(config.target_vol, current_vol, config.epsilon);
    if unclipped.is_nan() {
        return config.min_weight;
    }
    unclipped.clamp(config.min_weight, config.max_weight)
}

/// Streaming allocator. Weights are produced one index at a time and
/// past weights are never revised; the trailing realized-volatility
/// window advances only through `record_return`.
pub struct OnlineAllocator {
    config: AllocationConfig,
    realized: VecDeque<f64>,
    last_weight: f64,
}

impl OnlineAllocator {
    pub fn new(config: AllocationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            realized: VecDeque::new(),
            last_weight: 0.0,
        })
    }

    /// Trailing sample std of realized strategy returns, once the
    /// lookback window has filled.
    fn current_vol(&self) -> Option<f64> {
        let lookback = self.config.realized_vol_lookback;
        if self.realized.len() < lookback {
            return None;
        }
        let window = self
            .realized
            .iter()
            .skip(self.realized.len() - lookback)
            .copied();
        Some(window.std_dev())
    }

    /// Sizes the next position from the forecast and its risk
    /// estimate. A missing risk estimate (cold start) falls back to a
    /// neutral fully-invested weight, still subject to the bounds.
    pub fn next_weight(&mut self, mu: f64, sigma: Option<f64>) -> f64 {
        let next = match sigma {
            Some(sigma) => {
                // Before the realized window fills, target the forecast
                // vol itself so the scale stays near 1.
                let current_vol = self.current_vol().unwrap_or(self.config.target_vol);
                weight(mu, sigma, current_vol, &self.config)
            }
            None => 1.0f64.clamp(self.config.min_weight, self.config.max_weight),
        };
        self.last_weight = next;
        next
    }

    /// Feeds back the realized market return for the index the last
    /// weight applied to.
    pub fn record_return(&mut self, market_return: f64) {
        self.realized.push_back(self.last_weight * market_return);
        // retain a bounded history
        let cap = self.config.realized_vol_lookback * 4;
        while self.realized.len() > cap.max(self.config.realized_vol_lookback) {
            self.realized.pop_front();
        }
    }
}

/// Batch sizing over aligned forecast / risk / realized-return series.
/// Identical to driving `OnlineAllocator` one index at a time.
pub fn allocate_series(
    forecasts: &[f64],
    sigmas: &[Option<f64>],
    market_returns: &[Option<f64>],
    config: &AllocationConfig,
) -> Result<Vec<f64>, ConfigError> {
    let mut allocator = OnlineAllocator::new(config.clone())?;
    let mut weights = Vec::with_capacity(forecasts.len());
    for t in 0..forecasts.len() {
        let sigma = sigmas.get(t).copied().flatten();
        let w = allocator.next_weight(forecasts[t], sigma);
        weights.push(w);
        if let Some(r) = market_returns.get(t).copied().flatten() {
            allocator.record_return(r);
        }
    }
    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn config() -> AllocationConfig {
        AllocationConfig::default()
    }

    #[test]
    fn sizing_example_clips_at_the_leverage_cap() {
        // mu = 0.002, sigma^2 = 0.0001, eps = 1e-8
        let cfg = config();
        let raw = raw_weight(0.002, 0.01, cfg.epsilon);
        assert!((raw - 19.998000199980003).abs() < 1e-6);

        // target_vol = 0.01, current_vol = 0.015 -> scale ~ 0.6667
        let scale = vol_scale(0.01, 0.015, cfg.epsilon);
        assert!((scale - 0.6666662).abs() < 1e-4);

        // pre-clip ~ 13.33 -> clipped to 2.0
        assert_eq!(weight(0.002, 0.01, 0.015, &cfg), 2.0);
    }

    #[test]
    fn clipping_is_total_over_extreme_inputs() {
        let cfg = config();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let mu = rng.gen_range(-10.0..10.0) * 10f64.powi(rng.gen_range(-6..6));
            let sigma = rng.gen_range(0.0..1.0) * 10f64.powi(rng.gen_range(-8..2));
            let current_vol = rng.gen_range(0.0..1.0) * 10f64.powi(rng.gen_range(-8..2));
            let w = weight(mu, sigma, current_vol, &cfg);
            assert!((0.0..=2.0).contains(&w), "weight {w} escaped bounds");
        }
    }

    #[test]
    fn zero_volatility_is_absorbed_not_fatal() {
        let cfg = config();
        let w = weight(0.001, 0.0, 0.0, &cfg);
        assert_eq!(w, 2.0);
        let w = weight(-0.001, 0.0, 0.0, &cfg);
        assert_eq!(w, 0.0);
    }

    #[test]
    fn pre_clip_weight_is_monotone_in_the_forecast() {
        let cfg = config();
        let sigma = 0.01;
        let scale = vol_scale(cfg.target_vol, 0.012, cfg.epsilon);
        let mut previous = f64::NEG_INFINITY;
        for step in 0..200 {
            let mu = -0.01 + step as f64 * 1e-4;
            let pre_clip = raw_weight(mu, sigma, cfg.epsilon) * scale;
            assert!(pre_clip >= previous);
            previous = pre_clip;
        }
    }

    #[test]
    fn missing_risk_estimate_falls_back_to_neutral_weight() {
        let mut allocator = OnlineAllocator::new(config()).unwrap();
        assert_eq!(allocator.next_weight(0.5, None), 1.0);
    }

    #[test]
    fn batch_and_streaming_agree() {
        let cfg = config();
        let n = 60;
        let forecasts: Vec<f64> = (0..n).map(|i| ((i * 13) % 7) as f64 * 1e-4 - 2e-4).collect();
        let sigmas: Vec<Option<f64>> = (0..n)
            .map(|i| if i < 5 { None } else { Some(0.008 + (i % 3) as f64 * 0.002) })
            .collect();
        let returns: Vec<Option<f64>> = (0..n)
            .map(|i| Some(((i * 7) % 11) as f64 * 1e-3 - 5e-3))
            .collect();

        let batch = allocate_series(&forecasts, &sigmas, &returns, &cfg).unwrap();

        let mut allocator = OnlineAllocator::new(cfg).unwrap();
        for t in 0..n {
            let w = allocator.next_weight(forecasts[t], sigmas[t]);
            assert_eq!(w, batch[t]);
            allocator.record_return(returns[t].unwrap());
        }
    }

    #[test]
    fn past_weights_never_revised_by_new_observations() {
        let cfg = config();
        let forecasts = vec![1e-3; 80];
        let sigmas: Vec<Option<f64>> = vec![Some(0.01); 80];
        let mut returns: Vec<Option<f64>> =
            (0..80).map(|i| Some((i % 5) as f64 * 1e-3 - 2e-3)).collect();

        let base = allocate_series(&forecasts, &sigmas, &returns, &cfg).unwrap();
        returns[79] = Some(0.5);
        let shocked = allocate_series(&forecasts, &sigmas, &returns, &cfg).unwrap();
        assert_eq!(&base[..79], &shocked[..79]);
    }
}
