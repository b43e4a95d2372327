use crate::models::StrategyDiagnostics;
use anyhow::{anyhow, Result};
use statrs::statistics::Statistics;

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Per-day strategy return: leverage applied to the realized market
/// return.
pub fn strategy_returns(weights: &[f64], returns: &[f64]) -> Vec<f64> {
    weights
        .iter()
        .zip(returns.iter())
        .map(|(w, r)| w * r)
        .collect()
}

/// Tri-state direction: negative, flat, positive. `f64::signum` will
/// not do here, it maps 0.0 to 1.0.
fn direction(value: f64) -> i8 {
    if value > 0.0 {
        1
    } else if value < 0.0 {
        -1
    } else {
        0
    }
}

/// Fraction of days where the forecast called the realized direction.
/// Zero-forecast days count as wrong unless the return is also zero.
pub fn directional_accuracy(forecasts: &[f64], actuals: &[f64]) -> f64 {
    if forecasts.is_empty() {
        return 0.0;
    }
    let hits = forecasts
        .iter()
        .zip(actuals.iter())
        .filter(|(f, a)| direction(**f) == direction(**a))
        .count();
    hits as f64 / forecasts.len() as f64
}

/// The simplest admissible policy: fully leveraged when the forecast
/// is positive, fully in cash otherwise. Used as a relative baseline.
pub fn sign_baseline_weights(forecasts: &[f64], max_weight: f64) -> Vec<f64> {
    forecasts
        .iter()
        .map(|f| if *f > 0.0 { max_weight } else { 0.0 })
        .collect()
}

/// Mean, volatility, annualized Sharpe (risk-free 0) and directional
/// accuracy for one weighted return stream.
pub fn evaluate_strategy(
    weights: &[f64],
    returns: &[f64],
    forecasts: &[f64],
) -> StrategyDiagnostics {
    let daily = strategy_returns(weights, returns);
    let observations = daily.len();
    if observations < 2 {
        return StrategyDiagnostics {
            observations,
            mean_daily_return: daily.first().copied().unwrap_or(0.0),
            std_daily_return: 0.0,
            annualized_sharpe: 0.0,
            directional_accuracy: directional_accuracy(forecasts, returns),
        };
    }

    let mean = daily.clone().mean();
    let std_dev = daily.std_dev();
    let annualized_sharpe = if std_dev > 0.0 {
        mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
    } else {
        0.0
    };

    StrategyDiagnostics {
        observations,
        mean_daily_return: mean,
        std_daily_return: std_dev,
        annualized_sharpe,
        directional_accuracy: directional_accuracy(forecasts, returns),
    }
}

fn population_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values
        .iter()
        .map(|value| {
            let diff = value - mean;
            diff * diff
        })
        .sum::<f64>()
        / n)
        .sqrt()
}

/// Geometric mean of daily excess returns, falling back to the
/// arithmetic mean when the cumulative product is non-positive.
fn mean_excess(excess: &[f64]) -> f64 {
    let cumulative: f64 = excess.iter().map(|e| 1.0 + e).product();
    let n = excess.len() as f64;
    if cumulative <= 0.0 {
        excess.iter().sum::<f64>() / n
    } else {
        cumulative.powf(1.0 / n) - 1.0
    }
}

/// Volatility-adjusted Sharpe ratio of a weight series against the
/// market, the local stand-in for the official score.
///
/// The strategy return blends cash and market exposure:
/// `rf * (1 - w) + w * fwd`. The raw annualized Sharpe of its excess
/// return is divided by two penalties: one proportional to volatility
/// above 1.2x the market's, one quadratic in any mean-excess-return
/// shortfall versus the market. Capped at 1,000,000.
pub fn adjusted_sharpe(
    weights: &[f64],
    forward_returns: &[f64],
    risk_free: &[f64],
) -> Result<f64> {
    let n = weights.len();
    if n == 0 || forward_returns.len() != n || risk_free.len() != n {
        return Err(anyhow!(
            "adjusted Sharpe needs equally sized non-empty weight/return/rate series"
        ));
    }
    for w in weights {
        if !(0.0..=2.0).contains(w) {
            return Err(anyhow!("weight {} outside the allowed bounds [0, 2]", w));
        }
    }

    let strategy: Vec<f64> = (0..n)
        .map(|t| risk_free[t] * (1.0 - weights[t]) + weights[t] * forward_returns[t])
        .collect();
    let strategy_excess: Vec<f64> = (0..n).map(|t| strategy[t] - risk_free[t]).collect();
    let strategy_mean_excess = mean_excess(&strategy_excess);

    let strategy_std = population_std(&strategy);
    if strategy_std == 0.0 {
        return Err(anyhow!("strategy volatility is zero, Sharpe undefined"));
    }
    let sharpe = strategy_mean_excess / strategy_std * TRADING_DAYS_PER_YEAR.sqrt();
    let strategy_volatility = strategy_std * TRADING_DAYS_PER_YEAR.sqrt() * 100.0;

    let market_excess: Vec<f64> = (0..n).map(|t| forward_returns[t] - risk_free[t]).collect();
    let market_mean_excess = mean_excess(&market_excess);
    let market_std = population_std(forward_returns);
    let market_volatility = market_std * TRADING_DAYS_PER_YEAR.sqrt() * 100.0;
    if market_volatility == 0.0 {
        return Err(anyhow!("market volatility is zero, penalty undefined"));
    }

    let excess_vol = (strategy_volatility / market_volatility - 1.2).max(0.0);
    let vol_penalty = 1.0 + excess_vol;

    let return_gap =
        ((market_mean_excess - strategy_mean_excess) * 100.0 * TRADING_DAYS_PER_YEAR).max(0.0);
    let return_penalty = 1.0 + return_gap * return_gap / 100.0;

    Ok((sharpe / (vol_penalty * return_penalty)).min(1_000_000.0))
}
