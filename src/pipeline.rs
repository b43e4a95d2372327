//! Walk-forward orchestration: features -> model -> allocation ->
//! evaluation. All steps consume only past data relative to each
//! index; the pipeline is a finite deterministic transform of its
//! inputs and configuration.

use crate::allocation::OnlineAllocator;
use crate::config::{ModelKind, PipelineConfig};
use crate::data::MarketData;
use crate::features::{append_zscore_columns, build_feature_matrix, drop_redundant_columns};
use crate::fill;
use crate::model::{create_model, walk_forward_splits};
use crate::models::{EvaluationReport, FeatureMatrix};
use crate::performance::{adjusted_sharpe, evaluate_strategy, sign_baseline_weights};
use crate::rolling::rolling_std;
use anyhow::{anyhow, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

/// Everything a backtest run produces: per-index outputs plus the
/// aggregate report.
pub struct BacktestOutcome {
    pub report: EvaluationReport,
    /// date_ids of the evaluated rows.
    pub ids: Vec<i64>,
    pub forecasts: Vec<f64>,
    pub weights: Vec<f64>,
}

/// Builds the frozen feature matrix for one dataset pass and applies
/// the redundancy filter when configured. Raw data-file feature
/// columns ride along with the engineered ones.
pub fn prepare_features(
    data: &MarketData,
    config: &PipelineConfig,
) -> Result<(FeatureMatrix, Vec<String>)> {
    let prices = data.price_levels();
    let returns = data.realized_returns();
    let mut matrix = build_feature_matrix(data.ids(), &prices, &returns, &config.features)?;
    for (name, column) in data.feature_names.iter().zip(data.features.iter()) {
        matrix.insert(name, column.clone())?;
    }
    append_zscore_columns(
        &mut matrix,
        &config.features.zscore_columns,
        &config.features.zscore_windows,
        config.features.epsilon,
    )?;

    let dropped = if config.drop_redundant {
        drop_redundant_columns(&mut matrix, config.features.correlation_threshold)
    } else {
        Vec::new()
    };
    Ok((matrix, dropped))
}

/// Next-day excess return target; `None` where either leg is missing.
fn excess_targets(data: &MarketData) -> Vec<Option<f64>> {
    let forward = data.forward_returns.values();
    let risk_free = data.risk_free_rate.values();
    (0..data.num_rows())
        .map(|t| match (forward[t], risk_free[t]) {
            (Some(fwd), Some(rf)) => Some(fwd - rf),
            (Some(fwd), None) => Some(fwd),
            _ => None,
        })
        .collect()
}

/// Models that treat a missing value as a first-class input: the
/// booster routes it down the tree, the momentum rule stays flat.
/// Everything else receives causally filled features.
fn handles_missing_natively(kind: &ModelKind) -> bool {
    matches!(
        kind,
        ModelKind::Gbdt { .. } | ModelKind::MomentumRule { .. }
    )
}

/// Walk-forward forecasts over the whole dataset: refits a fresh model
/// per fold on all rows before the fold, predicts the fold, never
/// looks ahead. Rows before the first fold carry no forecast.
pub fn walk_forward_forecasts(
    matrix: &FeatureMatrix,
    targets: &[Option<f64>],
    config: &PipelineConfig,
) -> Result<Vec<Option<f64>>> {
    let rows = matrix.num_rows();
    let splits = walk_forward_splits(rows, config.initial_train_rows, config.validation_horizon);
    if splits.is_empty() {
        return Err(anyhow!(
            "not enough rows ({rows}) for an initial training range of {}",
            config.initial_train_rows
        ));
    }

    // Fill over the full history before slicing, so gaps at a fold
    // boundary keep their valid prefix.
    let filled;
    let source: &FeatureMatrix = if handles_missing_natively(&config.model) {
        matrix
    } else {
        filled = fill::filled_matrix(matrix)?;
        &filled
    };

    let pb = ProgressBar::new(splits.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );

    let mut forecasts: Vec<Option<f64>> = vec![None; rows];
    for (train, validate) in splits {
        let trainable: Vec<usize> = train.clone().filter(|&t| targets[t].is_some()).collect();
        if trainable.is_empty() {
            pb.inc(1);
            continue;
        }
        let train_matrix = source.select_rows(&trainable);
        let train_targets: Vec<f64> = trainable
            .iter()
            .filter_map(|&t| targets[t])
            .collect();

        let mut model = create_model(&config.model)?;
        // Pretrained models refuse fitting; that is a caller error for
        // a walk-forward run and is propagated unmodified.
        model.fit(&train_matrix, &train_targets)?;

        let validate_matrix = source.slice_rows(validate.start, validate.end);
        let fold_forecasts = model.predict(&validate_matrix)?;
        for (offset, t) in validate.enumerate() {
            forecasts[t] = Some(fold_forecasts[offset]);
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
    Ok(forecasts)
}

/// Full local backtest: the evaluator here approximates the official
/// score for development, it is not authoritative.
pub fn run_backtest(data: &MarketData, config: &PipelineConfig) -> Result<BacktestOutcome> {
    config.validate()?;
    let (matrix, dropped) = prepare_features(data, config)?;
    info!(
        "feature matrix: {} rows x {} columns ({} dropped as redundant)",
        matrix.num_rows(),
        matrix.num_columns(),
        dropped.len()
    );

    let targets = excess_targets(data);
    let forecasts = walk_forward_forecasts(&matrix, &targets, config)?;

    let realized = data.realized_returns();
    let sigma = rolling_std(&realized, config.allocation.realized_vol_lookback);

    let forward_values = data.forward_returns.values();
    let risk_free_values = data.risk_free_rate.values();

    // evaluate only where a forecast and a realized next-day return exist
    let evaluated: Vec<usize> = (0..data.num_rows())
        .filter(|&t| forecasts[t].is_some() && forward_values[t].is_some())
        .collect();
    if evaluated.is_empty() {
        return Err(anyhow!("no rows left to evaluate after walk-forward"));
    }

    let mut allocator = OnlineAllocator::new(config.allocation.clone())?;
    let mut weights = Vec::with_capacity(evaluated.len());
    let mut dense_forecasts = Vec::with_capacity(evaluated.len());
    let mut forward = Vec::with_capacity(evaluated.len());
    let mut risk_free = Vec::with_capacity(evaluated.len());
    let mut ids = Vec::with_capacity(evaluated.len());
    for &t in &evaluated {
        let (Some(mu), Some(fwd)) = (forecasts[t], forward_values[t]) else {
            continue;
        };
        let w = allocator.next_weight(mu, sigma[t]);
        allocator.record_return(fwd);

        weights.push(w);
        dense_forecasts.push(mu);
        forward.push(fwd);
        risk_free.push(risk_free_values[t].unwrap_or(0.0));
        ids.push(data.ids()[t]);
    }

    let strategy = evaluate_strategy(&weights, &forward, &dense_forecasts);
    let baseline_weights = sign_baseline_weights(&dense_forecasts, config.allocation.max_weight);
    let sign_baseline = evaluate_strategy(&baseline_weights, &forward, &dense_forecasts);

    let score = adjusted_sharpe(&weights, &forward, &risk_free)?;
    let baseline_score = adjusted_sharpe(&baseline_weights, &forward, &risk_free)?;

    info!(
        "backtest: {} rows, adjusted Sharpe {:.4} (sign baseline {:.4}), directional accuracy {:.1}%",
        evaluated.len(),
        score,
        baseline_score,
        strategy.directional_accuracy * 100.0
    );

    Ok(BacktestOutcome {
        report: EvaluationReport {
            strategy,
            sign_baseline,
            adjusted_sharpe: score,
            sign_baseline_adjusted_sharpe: baseline_score,
            evaluated_rows: evaluated.len(),
            dropped_columns: dropped,
            last_updated: Utc::now(),
        },
        ids,
        forecasts: dense_forecasts,
        weights,
    })
}

/// Fits on the training file, forecasts the test file, and sizes
/// positions for submission. Feature columns are matched to the
/// training matrix so the model sees the layout it was fitted on.
pub fn run_predict(
    train: &MarketData,
    test: &MarketData,
    config: &PipelineConfig,
) -> Result<Vec<(i64, f64)>> {
    config.validate()?;
    let (train_matrix, _) = prepare_features(train, config)?;
    let targets = excess_targets(train);
    let trainable: Vec<usize> = (0..train.num_rows())
        .filter(|&t| targets[t].is_some())
        .collect();
    if trainable.is_empty() {
        return Err(anyhow!("training data has no usable target rows"));
    }
    let pretrained = matches!(config.model, ModelKind::Gbdt { .. });
    let raw_missing = handles_missing_natively(&config.model);
    let fit_source = if raw_missing {
        train_matrix.clone()
    } else {
        fill::filled_matrix(&train_matrix)?
    };
    let fit_matrix = fit_source.select_rows(&trainable);
    let fit_targets: Vec<f64> = trainable.iter().filter_map(|&t| targets[t]).collect();

    let mut model = create_model(&config.model)?;
    if pretrained {
        // pretrained booster is used as loaded
        info!("model {} used without refitting", model.name());
    } else {
        model.fit(&fit_matrix, &fit_targets)?;
    }

    // test features are reordered into the training column layout
    let mut predict_config = config.clone();
    predict_config.drop_redundant = false;
    let (test_matrix, _) = prepare_features(test, &predict_config)?;
    let mut aligned = FeatureMatrix::new(test_matrix.ids().to_vec());
    let mut absent: Vec<&str> = Vec::new();
    for name in train_matrix.names() {
        match test_matrix.column(name) {
            Some(column) => aligned.insert(name, column.to_vec())?,
            None => absent.push(name),
        }
    }
    if !absent.is_empty() {
        return Err(anyhow!(
            "test data lacks feature columns used in training: {}",
            absent.join(", ")
        ));
    }
    let aligned = if raw_missing {
        aligned
    } else {
        fill::filled_matrix(&aligned)?
    };

    let forecasts = model.predict(&aligned)?;
    let realized = test.realized_returns();
    let sigma = rolling_std(&realized, config.allocation.realized_vol_lookback);

    let mut allocator = OnlineAllocator::new(config.allocation.clone())?;
    let mut out = Vec::with_capacity(test.num_rows());
    for t in 0..test.num_rows() {
        let w = allocator.next_weight(forecasts[t], sigma[t]);
        if let Some(r) = realized[t] {
            allocator.record_return(r);
        }
        out.push((test.ids()[t], w));
    }
    Ok(out)
}
