//! Missing-value policy for models without native missing support.
//!
//! Gaps come only from insufficient window history, so each one is
//! filled with the best-effort shrinking-window mean of the valid past.
//! With no valid past at all (only possible at the very start) the
//! neutral constant 0.0 is the last resort. Tree models bypass this
//! adapter and consume `Option` values directly.

use crate::models::FeatureMatrix;
use crate::rolling::shrinking_mean_at;
use anyhow::Result;

/// Neutral substitute when no past observation exists.
pub const NEUTRAL_FILL: f64 = 0.0;

/// Fills a single column causally: each missing entry becomes the mean
/// of the valid observations strictly before it.
pub fn fill_column(values: &[Option<f64>]) -> Vec<f64> {
    (0..values.len())
        .map(|t| match values[t] {
            Some(value) => value,
            None => shrinking_mean_at(values, t).unwrap_or(NEUTRAL_FILL),
        })
        .collect()
}

/// Fills every column of the matrix over its full history, so row
/// slices taken afterwards keep fill values derived from the complete
/// valid prefix rather than from the slice alone.
pub fn filled_matrix(matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
    let mut out = FeatureMatrix::new(matrix.ids().to_vec());
    for (idx, name) in matrix.names().iter().enumerate() {
        let filled: Vec<Option<f64>> = fill_column(matrix.column_by_index(idx))
            .into_iter()
            .map(Some)
            .collect();
        out.insert(name, filled)?;
    }
    Ok(out)
}

/// Densifies a feature matrix into row-major form for models that
/// require complete inputs. Column order follows the matrix.
pub fn to_dense_rows(matrix: &FeatureMatrix) -> Vec<Vec<f64>> {
    let filled: Vec<Vec<f64>> = (0..matrix.num_columns())
        .map(|idx| fill_column(matrix.column_by_index(idx)))
        .collect();

    (0..matrix.num_rows())
        .map(|row| filled.iter().map(|column| column[row]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_gaps_with_causal_prefix_mean() {
        let column = vec![None, Some(2.0), Some(4.0), None, Some(10.0)];
        let filled = fill_column(&column);
        assert_eq!(filled[0], NEUTRAL_FILL);
        assert_eq!(filled[1], 2.0);
        assert_eq!(filled[2], 4.0);
        // mean of (2.0, 4.0), the 10.0 after the gap is never consulted
        assert_eq!(filled[3], 3.0);
        assert_eq!(filled[4], 10.0);
    }

    #[test]
    fn filled_matrix_preserves_history_across_later_slices() {
        let mut matrix = FeatureMatrix::new(vec![0, 1, 2]);
        matrix
            .insert("a", vec![Some(2.0), Some(4.0), None])
            .unwrap();
        let filled = filled_matrix(&matrix).unwrap();

        // slicing after the fill keeps the prefix mean of (2.0, 4.0);
        // filling the slice alone would have fallen back to 0.0
        let tail = filled.slice_rows(2, 3);
        assert_eq!(tail.column("a").unwrap(), &[Some(3.0)]);
    }

    #[test]
    fn dense_rows_follow_column_order() {
        let mut matrix = FeatureMatrix::new(vec![0, 1]);
        matrix.insert("a", vec![Some(1.0), None]).unwrap();
        matrix.insert("b", vec![None, Some(5.0)]).unwrap();
        let rows = to_dense_rows(&matrix);
        assert_eq!(rows, vec![vec![1.0, 0.0], vec![1.0, 5.0]]);
    }
}
