use crate::config::ModelKind;
use crate::fill;
use crate::gbdt::GbdtModel;
use crate::models::FeatureMatrix;
use anyhow::{anyhow, Result};
use std::ops::Range;

/// Capability contract every forecaster implements. Rows arrive in
/// strict chronological order and must never be reordered; validation
/// is forward-looking only (see [`walk_forward_splits`]). The
/// allocation engine and evaluator depend only on this interface.
pub trait ForecastModel {
    fn name(&self) -> &str;
    fn fit(&mut self, features: &FeatureMatrix, target: &[f64]) -> Result<()>;
    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>>;
}

/// Forward-only train/validate splits: train on `[0, k)`, validate on
/// `[k, k + horizon)`, expanding. No shuffling, no row mixing across
/// time.
pub fn walk_forward_splits(
    rows: usize,
    initial_train: usize,
    horizon: usize,
) -> Vec<(Range<usize>, Range<usize>)> {
    let mut splits = Vec::new();
    if initial_train == 0 || horizon == 0 {
        return splits;
    }
    let mut k = initial_train;
    while k < rows {
        let end = (k + horizon).min(rows);
        splits.push((0..k, k..end));
        k = end;
    }
    splits
}

/// Closed-form ridge regression on densified features (normal
/// equations with an L2 penalty, intercept unpenalized).
pub struct RidgeModel {
    lambda: f64,
    feature_names: Vec<String>,
    coefficients: Vec<f64>,
}

impl RidgeModel {
    pub fn new(lambda: f64) -> Self {
        Self {
            lambda: lambda.max(0.0),
            feature_names: Vec::new(),
            coefficients: Vec::new(),
        }
    }
}

/// Gaussian elimination with partial pivoting. The ridge penalty keeps
/// the system well conditioned for any non-degenerate input.
fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>> {
    let n = b.len();
    for pivot in 0..n {
        let (best_row, best_abs) = (pivot..n)
            .map(|row| (row, a[row][pivot].abs()))
            .max_by(|x, y| x.1.partial_cmp(&y.1).unwrap_or(std::cmp::Ordering::Equal))
            .ok_or_else(|| anyhow!("empty system"))?;
        if best_abs < 1e-12 {
            return Err(anyhow!("singular normal equations, cannot fit model"));
        }
        a.swap(pivot, best_row);
        b.swap(pivot, best_row);

        for row in pivot + 1..n {
            let factor = a[row][pivot] / a[pivot][pivot];
            for col in pivot..n {
                a[row][col] -= factor * a[pivot][col];
            }
            b[row] -= factor * b[pivot];
        }
    }

    let mut x = vec![0.0; n];
    for pivot in (0..n).rev() {
        let mut sum = b[pivot];
        for col in pivot + 1..n {
            sum -= a[pivot][col] * x[col];
        }
        x[pivot] = sum / a[pivot][pivot];
    }
    Ok(x)
}

impl ForecastModel for RidgeModel {
    fn name(&self) -> &str {
        "ridge"
    }

    fn fit(&mut self, features: &FeatureMatrix, target: &[f64]) -> Result<()> {
        let rows = fill::to_dense_rows(features);
        if rows.len() != target.len() {
            return Err(anyhow!(
                "target has {} rows but features have {}",
                target.len(),
                rows.len()
            ));
        }
        if rows.is_empty() {
            return Err(anyhow!("cannot fit on an empty training range"));
        }

        // design matrix with a leading intercept column
        let p = features.num_columns() + 1;
        let mut xtx = vec![vec![0.0; p]; p];
        let mut xty = vec![0.0; p];
        for (row, &y) in rows.iter().zip(target.iter()) {
            let mut design = Vec::with_capacity(p);
            design.push(1.0);
            design.extend_from_slice(row);
            for i in 0..p {
                xty[i] += design[i] * y;
                for j in 0..p {
                    xtx[i][j] += design[i] * design[j];
                }
            }
        }
        for (i, diag) in xtx.iter_mut().enumerate().skip(1) {
            diag[i] += self.lambda;
        }

        self.coefficients = solve_linear_system(xtx, xty)?;
        self.feature_names = features.names().to_vec();
        Ok(())
    }

    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        if self.coefficients.is_empty() {
            return Err(anyhow!("ridge model has not been fitted"));
        }
        if features.names() != self.feature_names.as_slice() {
            return Err(anyhow!(
                "prediction features do not match the fitted columns"
            ));
        }
        let rows = fill::to_dense_rows(features);
        Ok(rows
            .iter()
            .map(|row| {
                let mut value = self.coefficients[0];
                for (coef, x) in self.coefficients[1..].iter().zip(row.iter()) {
                    value += coef * x;
                }
                value
            })
            .collect())
    }
}

/// Trend-following sanity baseline: a positive lagged market return
/// forecasts `+bias`, anything else `-bias`. Stateless.
pub struct MomentumRuleModel {
    bias: f64,
    signal_column: String,
}

impl MomentumRuleModel {
    pub fn new(bias: f64) -> Self {
        Self {
            bias,
            signal_column: "lag_1".to_string(),
        }
    }
}

impl ForecastModel for MomentumRuleModel {
    fn name(&self) -> &str {
        "momentum_rule"
    }

    fn fit(&mut self, _features: &FeatureMatrix, _target: &[f64]) -> Result<()> {
        Ok(())
    }

    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let column = features.column(&self.signal_column).ok_or_else(|| {
            anyhow!(
                "momentum rule needs a {} feature column",
                self.signal_column
            )
        })?;
        Ok(column
            .iter()
            .map(|lagged| match lagged {
                Some(value) if *value > 0.0 => self.bias,
                Some(_) => -self.bias,
                None => 0.0,
            })
            .collect())
    }
}

/// Equal-weight average of member forecasts.
pub struct EnsembleModel {
    members: Vec<Box<dyn ForecastModel>>,
}

impl EnsembleModel {
    pub fn new(members: Vec<Box<dyn ForecastModel>>) -> Result<Self> {
        if members.is_empty() {
            return Err(anyhow!("ensemble needs at least one member"));
        }
        Ok(Self { members })
    }
}

impl ForecastModel for EnsembleModel {
    fn name(&self) -> &str {
        "ensemble"
    }

    fn fit(&mut self, features: &FeatureMatrix, target: &[f64]) -> Result<()> {
        for member in self.members.iter_mut() {
            member.fit(features, target)?;
        }
        Ok(())
    }

    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let mut combined = vec![0.0; features.num_rows()];
        for member in &self.members {
            let forecasts = member.predict(features)?;
            for (slot, value) in combined.iter_mut().zip(forecasts) {
                *slot += value;
            }
        }
        let count = self.members.len() as f64;
        for slot in combined.iter_mut() {
            *slot /= count;
        }
        Ok(combined)
    }
}

/// Instantiates the configured model family.
pub fn create_model(kind: &ModelKind) -> Result<Box<dyn ForecastModel>> {
    match kind {
        ModelKind::Ridge { lambda } => Ok(Box::new(RidgeModel::new(*lambda))),
        ModelKind::MomentumRule { bias } => Ok(Box::new(MomentumRuleModel::new(*bias))),
        ModelKind::Gbdt { model_path } => Ok(Box::new(GbdtModel::from_model_file(model_path)?)),
        ModelKind::Ensemble { lambda, bias } => Ok(Box::new(EnsembleModel::new(vec![
            Box::new(RidgeModel::new(*lambda)),
            Box::new(MomentumRuleModel::new(*bias)),
        ])?)),
    }
}
