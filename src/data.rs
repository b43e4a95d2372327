//! Tabular data boundary: reads competition-style CSV files, writes
//! submission files. The core pipeline never touches files itself.

use crate::models::TimeSeries;
use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use serde::Serialize;
use std::io::Read;
use std::path::Path;

const DATE_ID_COLUMN: &str = "date_id";
const FORWARD_RETURNS_COLUMN: &str = "forward_returns";
const RISK_FREE_COLUMN: &str = "risk_free_rate";
const LAGGED_RETURNS_COLUMN: &str = "lagged_forward_returns";

/// One dataset pass: the market columns the pipeline understands as
/// id-indexed series, and every remaining numeric column as a raw
/// feature. Empty cells become `None`; id ordering is enforced by the
/// series themselves.
#[derive(Debug, Clone)]
pub struct MarketData {
    pub forward_returns: TimeSeries,
    pub risk_free_rate: TimeSeries,
    pub lagged_forward_returns: TimeSeries,
    pub feature_names: Vec<String>,
    pub features: Vec<Vec<Option<f64>>>,
}

impl MarketData {
    pub fn ids(&self) -> &[i64] {
        self.forward_returns.ids()
    }

    pub fn num_rows(&self) -> usize {
        self.forward_returns.len()
    }

    /// Realized market return for day t. Prefers the explicit lagged
    /// column; otherwise shifts forward_returns by one day.
    pub fn realized_returns(&self) -> Vec<Option<f64>> {
        let lagged = self.lagged_forward_returns.values();
        if lagged.iter().any(|value| value.is_some()) {
            return lagged.to_vec();
        }
        let forward = self.forward_returns.values();
        let mut shifted = vec![None; self.num_rows()];
        for t in 1..self.num_rows() {
            shifted[t] = forward[t - 1];
        }
        shifted
    }

    /// Synthetic price level: cumulative product of (1 + r) starting
    /// at 1.0, used by trend features. Strictly causal.
    pub fn price_levels(&self) -> Vec<Option<f64>> {
        let returns = self.realized_returns();
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
}

pub fn load_market_csv(path: &Path) -> Result<MarketData> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open data file {}", path.display()))?;
    parse_market_csv(file).with_context(|| format!("failed to parse {}", path.display()))
}

fn parse_cell(raw: &str) -> Result<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value: f64 = trimmed
        .parse()
        .map_err(|_| anyhow!("non-numeric cell value: {trimmed}"))?;
    if value.is_finite() {
        Ok(Some(value))
    } else {
        Ok(None)
    }
}

pub fn parse_market_csv<R: Read>(reader: R) -> Result<MarketData> {
    let mut csv_reader = ReaderBuilder::new().flexible(false).from_reader(reader);
    let headers = csv_reader.headers()?.clone();

    let date_idx = headers
        .iter()
        .position(|h| h == DATE_ID_COLUMN)
        .ok_or_else(|| anyhow!("missing required column {DATE_ID_COLUMN}"))?;
    let forward_idx = headers.iter().position(|h| h == FORWARD_RETURNS_COLUMN);
    let risk_free_idx = headers.iter().position(|h| h == RISK_FREE_COLUMN);
    let lagged_idx = headers.iter().position(|h| h == LAGGED_RETURNS_COLUMN);

    let feature_indices: Vec<usize> = (0..headers.len())
        .filter(|idx| {
            *idx != date_idx
                && Some(*idx) != forward_idx
                && Some(*idx) != risk_free_idx
                && Some(*idx) != lagged_idx
        })
        .collect();
    let feature_names: Vec<String> = feature_indices
        .iter()
        .map(|&idx| headers[idx].to_string())
        .collect();

    let mut forward_returns = TimeSeries::new();
    let mut risk_free_rate = TimeSeries::new();
    let mut lagged_forward_returns = TimeSeries::new();
    let mut features: Vec<Vec<Option<f64>>> = vec![Vec::new(); feature_indices.len()];

    let optional_cell = |record: &csv::StringRecord, idx: Option<usize>| match idx {
        Some(idx) => parse_cell(record.get(idx).unwrap_or_default()),
        None => Ok(None),
    };

    for (row_number, record) in csv_reader.records().enumerate() {
        let record = record?;
        let id: i64 = record
            .get(date_idx)
            .unwrap_or_default()
            .trim()
            .parse()
            .map_err(|_| anyhow!("row {}: invalid {DATE_ID_COLUMN}", row_number + 1))?;

        // the ordering invariant lives in TimeSeries::push
        forward_returns
            .push(id, optional_cell(&record, forward_idx)?)
            .map_err(|err| anyhow!("row {}: {err}", row_number + 1))?;
        risk_free_rate.push(id, optional_cell(&record, risk_free_idx)?)?;
        lagged_forward_returns.push(id, optional_cell(&record, lagged_idx)?)?;

        for (slot, &idx) in features.iter_mut().zip(feature_indices.iter()) {
            slot.push(parse_cell(record.get(idx).unwrap_or_default())?);
        }
    }

    if forward_returns.is_empty() {
        return Err(anyhow!("data file contains no rows"));
    }

    Ok(MarketData {
        forward_returns,
        risk_free_rate,
        lagged_forward_returns,
        feature_names,
        features,
    })
}

/// Writes the two-column `date_id,prediction` submission file.
pub fn write_submission(path: &Path, ids: &[i64], weights: &[f64]) -> Result<()> {
    if ids.len() != weights.len() {
        return Err(anyhow!(
            "submission id/weight length mismatch: {} vs {}",
            ids.len(),
            weights.len()
        ));
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer.write_record([DATE_ID_COLUMN, "prediction"])?;
    for (id, weight) in ids.iter().zip(weights.iter()) {
        writer.write_record([id.to_string(), format!("{weight}")])?;
    }
    writer.flush()?;
    Ok(())
}

/// Per-column missing counts, sorted by percentage descending.
#[derive(Debug, Clone, Serialize)]
pub struct MissingSummaryRow {
    pub column: String,
    pub missing: usize,
    pub percent: f64,
}

pub fn missing_summary(data: &MarketData) -> Vec<MissingSummaryRow> {
    let rows = data.num_rows();
    let mut summary: Vec<MissingSummaryRow> = data
        .feature_names
        .iter()
        .zip(data.features.iter())
        .map(|(name, column)| {
            let missing = column.iter().filter(|value| value.is_none()).count();
            MissingSummaryRow {
                column: name.clone(),
                missing,
                percent: if rows > 0 {
                    missing as f64 / rows as f64 * 100.0
                } else {
                    0.0
                },
            }
        })
        .collect();
    summary.sort_by(|a, b| {
        b.percent
            .partial_cmp(&a.percent)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.column.cmp(&b.column))
    });
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
date_id,forward_returns,risk_free_rate,lagged_forward_returns,M1,V2
0,0.01,0.0001,,0.5,
1,-0.02,0.0001,0.01,0.6,1.2
2,0.03,0.0002,-0.02,,1.1
";

    #[test]
    fn parses_columns_and_missing_cells() {
        let data = parse_market_csv(SAMPLE.as_bytes()).unwrap();
        assert_eq!(data.ids(), &[0, 1, 2]);
        assert_eq!(data.forward_returns.values()[2], Some(0.03));
        assert_eq!(data.lagged_forward_returns.values()[0], None);
        assert_eq!(data.feature_names, vec!["M1".to_string(), "V2".to_string()]);
        assert_eq!(data.features[0][2], None);
        assert_eq!(data.features[1][1], Some(1.2));
    }

    #[test]
    fn rejects_duplicate_or_decreasing_ids() {
        let bad = "date_id,forward_returns\n1,0.01\n1,0.02\n";
        assert!(parse_market_csv(bad.as_bytes()).is_err());
        let bad = "date_id,forward_returns\n2,0.01\n1,0.02\n";
        assert!(parse_market_csv(bad.as_bytes()).is_err());
    }

    #[test]
    fn realized_returns_prefer_the_lagged_column() {
        let data = parse_market_csv(SAMPLE.as_bytes()).unwrap();
        let realized = data.realized_returns();
        assert_eq!(realized, vec![None, Some(0.01), Some(-0.02)]);
    }

    #[test]
    fn realized_returns_shift_forward_returns_when_no_lagged_column() {
        let csv = "date_id,forward_returns\n0,0.01\n1,-0.02\n2,0.03\n";
        let data = parse_market_csv(csv.as_bytes()).unwrap();
        assert_eq!(
            data.realized_returns(),
            vec![None, Some(0.01), Some(-0.02)]
        );
    }

    #[test]
    fn price_levels_compound_causally() {
        let csv = "date_id,forward_returns\n0,0.1\n1,0.1\n2,0.1\n";
        let data = parse_market_csv(csv.as_bytes()).unwrap();
        let prices = data.price_levels();
        assert_eq!(prices[0], Some(1.0));
        assert!((prices[1].unwrap() - 1.1).abs() < 1e-12);
        assert!((prices[2].unwrap() - 1.21).abs() < 1e-12);
    }

    #[test]
    fn missing_summary_sorts_by_percentage() {
        let data = parse_market_csv(SAMPLE.as_bytes()).unwrap();
        let summary = missing_summary(&data);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].missing, 1);
        assert!((summary[0].percent - 100.0 / 3.0).abs() < 1e-9);
    }
}
