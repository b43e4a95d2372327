//! Pretrained gradient-boosted tree regressor.
//!
//! Loads LightGBM-format model text and sums tree outputs; training is
//! the external trainer's job, so `fit` propagates an error instead of
//! silently substituting a fallback. Missing feature values are a
//! first-class split outcome: a `None` routes to the left child.

use crate::model::ForecastModel;
use crate::models::FeatureMatrix;
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug)]
struct BoosterTree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
    shrinkage: f64,
}

impl BoosterTree {
    fn from_lines(lines: &mut std::iter::Peekable<std::str::Lines<'_>>) -> Result<Self> {
        // gather this tree's key=value block, then pull fields out of it
        let mut fields: HashMap<&str, &str> = HashMap::new();
        while let Some(peeked) = lines.peek() {
            if peeked.starts_with("Tree=") {
                break;
            }
            let Some(line) = lines.next() else { break };
            if let Some((key, value)) = line.trim().split_once('=') {
                fields.insert(key, value);
            }
        }

        let split_features: Vec<usize> = number_list(&fields, "split_feature")?;
        let thresholds: Vec<f64> = number_list(&fields, "threshold")?;
        let left_child: Vec<i32> = number_list(&fields, "left_child")?;
        let right_child: Vec<i32> = number_list(&fields, "right_child")?;
        let leaf_values: Vec<f64> = number_list(&fields, "leaf_value")?;
        let shrinkage = scalar_field::<f64>(&fields, "shrinkage")?.unwrap_or(1.0);

        let internal_nodes = split_features.len();
        if thresholds.len() != internal_nodes
            || left_child.len() != internal_nodes
            || right_child.len() != internal_nodes
        {
            return Err(anyhow!(
                "tree definition invalid: split/child/threshold length mismatch"
            ));
        }

        if let Some(declared) = scalar_field::<usize>(&fields, "num_leaves")? {
            if declared != leaf_values.len() {
                return Err(anyhow!(
                    "tree leaf count mismatch: expected {declared}, found {}",
                    leaf_values.len()
                ));
            }
        }

        Ok(Self {
            split_features,
            thresholds,
            left_child,
            right_child,
            leaf_values,
            shrinkage,
        })
    }

    fn predict(&self, features: &[Option<f64>]) -> f64 {
        if self.split_features.is_empty() {
            // single-leaf tree
            return self.leaf_values.first().copied().unwrap_or_default() * self.shrinkage;
        }
        let mut node_idx = 0usize;
        loop {
            let feature_idx = self
                .split_features
                .get(node_idx)
                .copied()
                .unwrap_or_default();
            let threshold = self.thresholds.get(node_idx).copied().unwrap_or(0.0);
            let go_left = match features.get(feature_idx).copied().flatten() {
                Some(value) => value <= threshold,
                // missing values take the left branch
                None => true,
            };
            let child = if go_left {
                self.left_child.get(node_idx).copied().unwrap_or(-1)
            } else {
                self.right_child.get(node_idx).copied().unwrap_or(-1)
            };

            if child < 0 {
                let leaf_idx = (-child - 1) as usize;
                return self.leaf_values.get(leaf_idx).copied().unwrap_or_default()
                    * self.shrinkage;
            }

            node_idx = child as usize;
        }
    }
}

/// Additive regression booster parsed from LightGBM model text.
#[derive(Debug)]
pub struct GbdtModel {
    trees: Vec<BoosterTree>,
    feature_count: usize,
}

impl GbdtModel {
    pub fn from_model_text(text: &str) -> Result<Self> {
        let mut lines = text.lines().peekable();
        let mut trees = Vec::new();
        let mut max_feature_idx: Option<usize> = None;

        while let Some(line) = lines.next() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if trimmed.starts_with("objective=") && !trimmed.contains("regression") {
                return Err(anyhow!(
                    "only regression objectives are supported (found {trimmed})"
                ));
            }
            if let Some(raw) = trimmed.strip_prefix("max_feature_idx=") {
                let parsed = raw.trim().parse::<usize>().map_err(|err| {
                    anyhow!("bad max_feature_idx value \"{raw}\": {err}")
                })?;
                max_feature_idx = Some(parsed);
            }
            if trimmed.starts_with("Tree=") {
                trees.push(BoosterTree::from_lines(&mut lines)?);
            }
        }

        if trees.is_empty() {
            return Err(anyhow!("model text contained no trees"));
        }

        let inferred_max_feature = trees
            .iter()
            .flat_map(|tree| tree.split_features.iter())
            .copied()
            .max()
            .unwrap_or(0);
        let feature_count = max_feature_idx
            .map(|idx| idx + 1)
            .unwrap_or(inferred_max_feature + 1);

        Ok(Self {
            trees,
            feature_count,
        })
    }

    pub fn from_model_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model file {}", path.display()))?;
        Self::from_model_text(&text)
    }

    pub fn num_features(&self) -> usize {
        self.feature_count
    }
}

impl ForecastModel for GbdtModel {
    fn name(&self) -> &str {
        "gbdt"
    }

    fn fit(&mut self, _features: &FeatureMatrix, _target: &[f64]) -> Result<()> {
        Err(anyhow!(
            "gbdt model is pretrained; retrain with the external trainer and reload the model file"
        ))
    }

    fn predict(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        if features.num_columns() < self.feature_count {
            return Err(anyhow!(
                "model expects {} features but the matrix has {}",
                self.feature_count,
                features.num_columns()
            ));
        }
        Ok((0..features.num_rows())
            .map(|row_idx| {
                let row = features.row(row_idx);
                self.trees.iter().map(|tree| tree.predict(&row)).sum()
            })
            .collect())
    }
}

fn scalar_field<T>(fields: &HashMap<&str, &str>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    match fields.get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| anyhow!("bad {key} value \"{raw}\": {err}")),
        None => Ok(None),
    }
}

fn number_list<T>(fields: &HashMap<&str, &str>, key: &str) -> Result<Vec<T>>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let Some(raw) = fields.get(key) else {
        return Ok(Vec::new());
    };
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<T>()
                .map_err(|err| anyhow!("bad {key} entry \"{token}\": {err}"))
        })
        .collect()
}
