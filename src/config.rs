use crate::allocation::AllocationConfig;
use crate::features::FeatureConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Configuration violations rejected at pipeline construction time.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("lag offsets must be >= 1")]
    ZeroLag,
    #[error("{0} windows must be >= 1")]
    ZeroWindow(&'static str),
    #[error("standard-deviation windows need at least 2 observations (got {0})")]
    StdWindowTooShort(usize),
    #[error("epsilon must be strictly positive (got {0})")]
    NonPositiveEpsilon(f64),
    #[error("correlation threshold must be in [0, 1] (got {0})")]
    InvalidCorrelationThreshold(f64),
    #[error("target volatility must be strictly positive (got {0})")]
    NonPositiveTargetVol(f64),
    #[error("leverage bounds are inverted or negative: [{0}, {1}]")]
    InvalidLeverageBounds(f64, f64),
    #[error("realized-volatility lookback needs at least 2 observations (got {0})")]
    VolLookbackTooShort(usize),
    #[error("walk-forward needs a non-empty initial training range")]
    EmptyTrainRange,
    #[error("walk-forward validation horizon must be >= 1")]
    ZeroValidationHorizon,
}

/// Which concrete forecast model the pipeline instantiates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelKind {
    Ridge { lambda: f64 },
    MomentumRule { bias: f64 },
    /// Pretrained booster loaded from a LightGBM-format text file.
    Gbdt { model_path: String },
    /// Equal-weight average of a ridge fit and the momentum rule.
    Ensemble { lambda: f64, bias: f64 },
}

impl Default for ModelKind {
    fn default() -> Self {
        ModelKind::Ridge { lambda: 1.0 }
    }
}

/// Main pipeline configuration grouping all tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub features: FeatureConfig,
    pub allocation: AllocationConfig,
    pub model: ModelKind,
    /// Rows in the first walk-forward training range.
    pub initial_train_rows: usize,
    /// Rows predicted per walk-forward fold before refitting.
    pub validation_horizon: usize,
    /// Whether to drop constant / near-duplicate feature columns.
    pub drop_redundant: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            features: FeatureConfig::default(),
            allocation: AllocationConfig::default(),
            model: ModelKind::default(),
            initial_train_rows: 252,
            validation_horizon: 21,
            drop_redundant: true,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.features.validate()?;
        self.allocation.validate()?;
        if self.initial_train_rows == 0 {
            return Err(ConfigError::EmptyTrainRange);
        }
        if self.validation_horizon == 0 {
            return Err(ConfigError::ZeroValidationHorizon);
        }
        Ok(())
    }

    /// Builds a configuration from a flat parameter map, as produced
    /// by an optimizer or CLI overrides. Unknown keys are ignored;
    /// known keys replace the defaults. Validation still applies.
    pub fn from_parameters(parameters: &HashMap<String, f64>) -> Self {
        let mut config = Self::default();
        config.allocation.target_vol =
            get_param(parameters, "targetVol", config.allocation.target_vol);
        config.allocation.epsilon = get_param(parameters, "epsilon", config.allocation.epsilon);
        config.allocation.realized_vol_lookback = get_usize_param_min(
            parameters,
            "volLookback",
            config.allocation.realized_vol_lookback,
            2,
        );
        config.features.epsilon = get_param(parameters, "epsilon", config.features.epsilon);
        config.features.correlation_threshold = get_param(
            parameters,
            "correlationThreshold",
            config.features.correlation_threshold,
        );
        config.initial_train_rows =
            get_usize_param_min(parameters, "initialTrainRows", config.initial_train_rows, 1);
        config.validation_horizon =
            get_usize_param_min(parameters, "validationHorizon", config.validation_horizon, 1);
        config.drop_redundant =
            get_param(parameters, "dropRedundant", bool_to_param(config.drop_redundant)) >= 0.5;
        config
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }
}

fn bool_to_param(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Get a parameter value with a default fallback.
pub fn get_param(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params.get(key).copied().unwrap_or(default)
}

/// Extract a parameter as usize with a minimum value.
pub fn get_usize_param_min(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    let raw = params.get(key).copied().unwrap_or(default as f64);
    if !raw.is_finite() {
        return default;
    }
    (raw.round().max(min as f64)) as usize
}
