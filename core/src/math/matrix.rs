use crate::math::stats::StatsHelper;
use crate::prelude::{StageError, StageResult};
use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

pub struct MatrixHelper;

impl MatrixHelper {
    /// Replaces non-finite entries with their column median and returns the
    /// medians used. A column with no finite value cannot be imputed.
    pub fn impute_column_medians(
        matrix: &mut Array2<f64>,
        names: &[&str],
    ) -> StageResult<Vec<f64>> {
        let mut medians = Vec::with_capacity(matrix.ncols());
        for (col, mut column) in matrix.axis_iter_mut(Axis(1)).enumerate() {
            let median = StatsHelper::nanmedian(column.iter()).ok_or_else(|| {
                StageError::model_fit(
                    "median imputation",
                    format!("feature {} has no finite values", column_name(names, col)),
                )
            })?;
            column.mapv_inplace(|v| if v.is_finite() { v } else { median });
            medians.push(median);
        }
        Ok(medians)
    }
}

fn column_name(names: &[&str], col: usize) -> String {
    names
        .get(col)
        .map(|name| name.to_string())
        .unwrap_or_else(|| format!("#{}", col))
}

/// Z-score parameters fitted on a batch. Kept with the fit so new rows can be
/// scored on the same scale without refitting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    pub features: Vec<String>,
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl Standardizer {
    /// Columns whose population standard deviation falls below this are
    /// treated as constant.
    pub const MIN_SCALE: f64 = 1e-12;

    pub fn fit(matrix: ArrayView2<f64>, names: &[&str]) -> StageResult<Self> {
        if matrix.nrows() == 0 {
            return Err(StageError::model_fit(
                "standardization",
                "feature matrix has no rows",
            ));
        }
        let mut means = Vec::with_capacity(matrix.ncols());
        let mut scales = Vec::with_capacity(matrix.ncols());
        for (col, column) in matrix.axis_iter(Axis(1)).enumerate() {
            let name = column_name(names, col);
            if column.iter().any(|v| !v.is_finite()) {
                return Err(StageError::model_fit(
                    "standardization",
                    format!("feature {} contains non-finite values", name),
                ));
            }
            let values = column.to_vec();
            let mean = StatsHelper::nanmean(&values).unwrap_or(0.0);
            let std = StatsHelper::nanstd(&values).unwrap_or(0.0);
            if !(std > Self::MIN_SCALE) {
                return Err(StageError::model_fit(
                    "standardization",
                    format!(
                        "feature {} is constant (value {:.6}); its covariance would be singular",
                        name, mean
                    ),
                ));
            }
            means.push(mean);
            scales.push(std);
        }
        Ok(Self {
            features: (0..matrix.ncols()).map(|col| column_name(names, col)).collect(),
            means,
            scales,
        })
    }

    pub fn transform(&self, matrix: ArrayView2<f64>) -> StageResult<Array2<f64>> {
        if matrix.ncols() != self.means.len() {
            return Err(StageError::InvalidInput(format!(
                "expected {} feature columns, got {}",
                self.means.len(),
                matrix.ncols()
            )));
        }
        let mut scaled = matrix.to_owned();
        for (col, mut column) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, scale) = (self.means[col], self.scales[col]);
            column.mapv_inplace(|v| (v - mean) / scale);
        }
        if let Some((row, col)) = scaled
            .indexed_iter()
            .find(|(_, v)| !v.is_finite())
            .map(|(idx, _)| idx)
        {
            return Err(StageError::model_fit(
                "standardization",
                format!(
                    "non-finite standardized value for feature {} at row {}",
                    self.features[col], row
                ),
            ));
        }
        Ok(scaled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn impute_fills_missing_with_median() {
        let mut matrix = array![[1.0, 10.0], [f64::NAN, 20.0], [3.0, f64::NAN], [5.0, 40.0]];
        let medians = MatrixHelper::impute_column_medians(&mut matrix, &["a", "b"]).unwrap();
        assert_eq!(medians, vec![3.0, 20.0]);
        assert_eq!(matrix[[1, 0]], 3.0);
        assert_eq!(matrix[[2, 1]], 20.0);
    }

    #[test]
    fn impute_names_empty_column() {
        let mut matrix = array![[1.0, f64::NAN], [2.0, f64::NAN]];
        let err = MatrixHelper::impute_column_medians(&mut matrix, &["step_length", "turning_angle"])
            .unwrap_err();
        assert!(err.to_string().contains("turning_angle"));
    }

    #[test]
    fn standardizer_produces_zero_mean_unit_variance() {
        let matrix = array![[1.0, 100.0], [2.0, 200.0], [3.0, 300.0], [4.0, 400.0]];
        let scaler = Standardizer::fit(matrix.view(), &["x", "y"]).unwrap();
        let scaled = scaler.transform(matrix.view()).unwrap();
        for column in scaled.axis_iter(Axis(1)) {
            let mean = column.sum() / column.len() as f64;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / column.len() as f64;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn constant_column_fails_with_feature_name() {
        let matrix = array![[1.0, 5.0], [2.0, 5.0], [3.0, 5.0]];
        let err = Standardizer::fit(matrix.view(), &["step_length", "sst"]).unwrap_err();
        match err {
            StageError::ModelFit { computation, detail } => {
                assert_eq!(computation, "standardization");
                assert!(detail.contains("sst"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn transform_rejects_wrong_width() {
        let matrix = array![[1.0, 2.0], [2.0, 3.0]];
        let scaler = Standardizer::fit(matrix.view(), &["a", "b"]).unwrap();
        let narrow = array![[1.0], [2.0]];
        assert!(scaler.transform(narrow.view()).is_err());
    }
}
