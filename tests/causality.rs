//! Leakage checks: nothing computed at index t may change when data at
//! any index >= t changes.

use tactical::allocation::{AllocationConfig, OnlineAllocator};
use tactical::features::{build_feature_matrix, FeatureConfig};
use tactical::rolling::{expanding_median_at, rolling_mean_at, rolling_std_at};

fn synthetic_returns(rows: usize) -> Vec<Option<f64>> {
    (0..rows)
        .map(|idx| {
            if idx % 11 == 0 {
                None
            } else {
                Some(((idx * 13) % 9) as f64 * 1e-3 - 4e-3)
            }
        })
        .collect()
}

fn synthetic_prices(returns: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut level = 1.0;
    returns
        .iter()
        .map(|value| {
            if let Some(r) = value {
                level *= 1.0 + r;
            }
            Some(level)
        })
        .collect()
}

#[test]
fn feature_values_are_invariant_to_future_perturbations() {
    let rows = 120;
    let cut = 80;
    let returns = synthetic_returns(rows);
    let prices = synthetic_prices(&returns);
    let ids: Vec<i64> = (0..rows as i64).collect();
    let config = FeatureConfig::default();

    let baseline = build_feature_matrix(&ids, &prices, &returns, &config).expect("baseline");

    // rewrite everything from the cut onward with wild values
    let mut perturbed_returns = returns.clone();
    let mut perturbed_prices = prices.clone();
    for idx in cut..rows {
        perturbed_returns[idx] = Some(0.5);
        perturbed_prices[idx] = Some(1000.0 + idx as f64);
    }
    let perturbed =
        build_feature_matrix(&ids, &perturbed_prices, &perturbed_returns, &config)
            .expect("perturbed");

    assert_eq!(baseline.names(), perturbed.names());
    for name in baseline.names() {
        let before = baseline.column(name).expect("baseline column");
        let after = perturbed.column(name).expect("perturbed column");
        for t in 0..cut {
            assert_eq!(
                before[t], after[t],
                "column {name} at index {t} saw the future"
            );
        }
    }
}

#[test]
fn rolling_statistics_ignore_the_value_at_their_own_index() {
    let mut series = synthetic_returns(60);
    let baseline_mean = rolling_mean_at(&series, 40, 10);
    let baseline_std = rolling_std_at(&series, 40, 10);

    series[40] = Some(99.0);
    assert_eq!(rolling_mean_at(&series, 40, 10), baseline_mean);
    assert_eq!(rolling_std_at(&series, 40, 10), baseline_std);
}

#[test]
fn expanding_median_includes_its_own_index_but_nothing_later() {
    let mut series = synthetic_returns(60);
    let baseline = expanding_median_at(&series, 30);

    series[31] = Some(99.0);
    series[59] = Some(-99.0);
    assert_eq!(expanding_median_at(&series, 30), baseline);
}

#[test]
fn allocator_never_revises_previously_emitted_weights() {
    let config = AllocationConfig::default();
    let mus = [0.002, -0.001, 0.0005, 0.003, -0.002, 0.001];
    let sigmas = [0.01, 0.012, 0.008, 0.011, 0.009, 0.01];

    let mut full = OnlineAllocator::new(config.clone()).expect("allocator");
    let mut full_weights = Vec::new();
    for (mu, sigma) in mus.iter().zip(sigmas.iter()) {
        full_weights.push(full.next_weight(*mu, Some(*sigma)));
        full.record_return(0.001);
    }

    // replay only the first half: its weights must match the full run
    let mut half = OnlineAllocator::new(config).expect("allocator");
    for (idx, (mu, sigma)) in mus.iter().zip(sigmas.iter()).take(3).enumerate() {
        let weight = half.next_weight(*mu, Some(*sigma));
        assert_eq!(weight, full_weights[idx]);
        half.record_return(0.001);
    }
}
