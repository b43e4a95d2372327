use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ordered sequence of (date_id, value) pairs with strictly
/// increasing ids. Missing observations are explicit `None`s rather
/// than NaN sentinels so gaps cannot silently propagate through
/// arithmetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    ids: Vec<i64>,
    values: Vec<Option<f64>>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self {
            ids: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn from_parts(ids: Vec<i64>, values: Vec<Option<f64>>) -> Result<Self> {
        if ids.len() != values.len() {
            return Err(anyhow!(
                "time series id/value length mismatch: {} ids vs {} values",
                ids.len(),
                values.len()
            ));
        }
        for pair in ids.windows(2) {
            if pair[1] <= pair[0] {
                return Err(anyhow!(
                    "time series ids must be strictly increasing ({} followed by {})",
                    pair[0],
                    pair[1]
                ));
            }
        }
        Ok(Self { ids, values })
    }

    pub fn push(&mut self, id: i64, value: Option<f64>) -> Result<()> {
        if let Some(&last) = self.ids.last() {
            if id <= last {
                return Err(anyhow!(
                    "time series ids must be strictly increasing ({} followed by {})",
                    last,
                    id
                ));
            }
        }
        self.ids.push(id);
        self.values.push(value);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }
}

impl Default for TimeSeries {
    fn default() -> Self {
        Self::new()
    }
}

/// Named feature columns aligned on a shared id index. Every column
/// holds an entry (possibly `None`) at every index; insertion enforces
/// the alignment.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    ids: Vec<i64>,
    names: Vec<String>,
    columns: Vec<Vec<Option<f64>>>,
}

impl FeatureMatrix {
    pub fn new(ids: Vec<i64>) -> Self {
        Self {
            ids,
            names: Vec::new(),
            columns: Vec::new(),
        }
    }

    pub fn insert(&mut self, name: &str, values: Vec<Option<f64>>) -> Result<()> {
        if values.len() != self.ids.len() {
            return Err(anyhow!(
                "column {} has {} values but the index has {} entries",
                name,
                values.len(),
                self.ids.len()
            ));
        }
        if self.names.iter().any(|existing| existing == name) {
            return Err(anyhow!("duplicate feature column: {}", name));
        }
        self.names.push(name.to_string());
        self.columns.push(values);
        Ok(())
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn num_rows(&self) -> usize {
        self.ids.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.names
            .iter()
            .position(|existing| existing == name)
            .map(|idx| self.columns[idx].as_slice())
    }

    pub fn column_by_index(&self, idx: usize) -> &[Option<f64>] {
        &self.columns[idx]
    }

    /// Copies one row across all columns, in column insertion order.
    pub fn row(&self, row_idx: usize) -> Vec<Option<f64>> {
        self.columns.iter().map(|column| column[row_idx]).collect()
    }

    /// Keeps only the named columns, preserving their current order.
    pub fn retain_columns(&mut self, keep: &[String]) {
        let mut names = Vec::new();
        let mut columns = Vec::new();
        for (name, column) in self.names.drain(..).zip(self.columns.drain(..)) {
            if keep.contains(&name) {
                names.push(name);
                columns.push(column);
            }
        }
        self.names = names;
        self.columns = columns;
    }

    /// Copies the given rows (indices must be ascending) into a new
    /// matrix, preserving chronological order.
    pub fn select_rows(&self, rows: &[usize]) -> FeatureMatrix {
        FeatureMatrix {
            ids: rows.iter().map(|&r| self.ids[r]).collect(),
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|column| rows.iter().map(|&r| column[r]).collect())
                .collect(),
        }
    }

    /// Restricts the matrix to the half-open row range [start, end).
    pub fn slice_rows(&self, start: usize, end: usize) -> FeatureMatrix {
        FeatureMatrix {
            ids: self.ids[start..end].to_vec(),
            names: self.names.clone(),
            columns: self
                .columns
                .iter()
                .map(|column| column[start..end].to_vec())
                .collect(),
        }
    }
}

/// Aggregate diagnostics for one daily return stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyDiagnostics {
    pub observations: usize,
    pub mean_daily_return: f64,
    pub std_daily_return: f64,
    pub annualized_sharpe: f64,
    pub directional_accuracy: f64,
}

/// Full evaluation output for one backtest run. The adjusted Sharpe is
/// a local approximation of the official score, not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub strategy: StrategyDiagnostics,
    pub sign_baseline: StrategyDiagnostics,
    pub adjusted_sharpe: f64,
    pub sign_baseline_adjusted_sharpe: f64,
    pub evaluated_rows: usize,
    pub dropped_columns: Vec<String>,
    pub last_updated: DateTime<Utc>,
}
