//! Diagonal-covariance Gaussian mixture fitted by expectation maximisation.
//!
//! Rows are treated as independent draws: there is no transition matrix, so
//! this is an approximation of a two-state hidden Markov model that ignores
//! temporal ordering. Fitting runs for at most `max_iterations` EM rounds.

use crate::math::random::PipelineRng;
use crate::prelude::{StageError, StageResult};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, PartialEq)]
pub struct MixtureConfig {
    pub components: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub reg_covar: f64,
}

impl Default for MixtureConfig {
    fn default() -> Self {
        Self {
            components: 2,
            max_iterations: 5000,
            tolerance: 1e-4,
            reg_covar: 1e-6,
        }
    }
}

/// Fitted mixture parameters. `means` and `variances` are components × features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianMixture {
    pub weights: Vec<f64>,
    pub means: Vec<Vec<f64>>,
    pub variances: Vec<Vec<f64>>,
    pub iterations: usize,
    pub converged: bool,
    /// Mean per-row log-likelihood after the last E-step.
    pub log_likelihood: f64,
}

struct Params {
    weights: Array1<f64>,
    means: Array2<f64>,
    variances: Array2<f64>,
}

impl GaussianMixture {
    pub fn fit(
        data: ArrayView2<f64>,
        config: &MixtureConfig,
        rng: &mut PipelineRng,
    ) -> StageResult<Self> {
        let (rows, _) = data.dim();
        if config.components < 2 {
            return Err(StageError::InvalidInput(
                "mixture needs at least two components".into(),
            ));
        }
        if rows < config.components {
            return Err(StageError::model_fit(
                "mixture initialisation",
                format!(
                    "{} rows cannot support {} components",
                    rows, config.components
                ),
            ));
        }

        let centres = farthest_first_centres(data, config.components, rng)?;
        let initial = hard_responsibilities(data, &centres);
        let mut params = maximisation(data, &initial, config.reg_covar)?;

        let mut previous = f64::NEG_INFINITY;
        let mut log_likelihood = f64::NEG_INFINITY;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < config.max_iterations {
            iterations += 1;
            let (log_resp, mean_ll) = expectation(data, &params);
            if !mean_ll.is_finite() {
                return Err(StageError::model_fit(
                    "expectation step",
                    format!("log-likelihood became {} at iteration {}", mean_ll, iterations),
                ));
            }
            log_likelihood = mean_ll;
            params = maximisation(data, &log_resp.mapv(f64::exp), config.reg_covar)?;

            if (log_likelihood - previous).abs() < config.tolerance {
                converged = true;
                break;
            }
            previous = log_likelihood;
        }

        let (_, final_ll) = expectation(data, &params);
        if final_ll.is_finite() {
            log_likelihood = final_ll;
        }

        Ok(Self {
            weights: params.weights.to_vec(),
            means: params.means.outer_iter().map(|row| row.to_vec()).collect(),
            variances: params
                .variances
                .outer_iter()
                .map(|row| row.to_vec())
                .collect(),
            iterations,
            converged,
            log_likelihood,
        })
    }

    pub fn components(&self) -> usize {
        self.weights.len()
    }

    /// Posterior component probabilities, one row per observation.
    pub fn predict_proba(&self, data: ArrayView2<f64>) -> StageResult<Array2<f64>> {
        let params = self.params()?;
        if data.ncols() != params.means.ncols() {
            return Err(StageError::InvalidInput(format!(
                "mixture expects {} features, got {}",
                params.means.ncols(),
                data.ncols()
            )));
        }
        let (log_resp, mean_ll) = expectation(data, &params);
        if !mean_ll.is_finite() {
            return Err(StageError::model_fit(
                "posterior decode",
                format!("log-likelihood is {}", mean_ll),
            ));
        }
        Ok(log_resp.mapv(f64::exp))
    }

    fn params(&self) -> StageResult<Params> {
        let k = self.weights.len();
        let d = self.means.first().map(Vec::len).unwrap_or(0);
        let flatten = |rows: &[Vec<f64>]| -> StageResult<Array2<f64>> {
            let flat: Vec<f64> = rows.iter().flatten().copied().collect();
            Array2::from_shape_vec((k, d), flat)
                .map_err(|err| StageError::Internal(format!("mixture shape: {}", err)))
        };
        Ok(Params {
            weights: Array1::from(self.weights.clone()),
            means: flatten(&self.means)?,
            variances: flatten(&self.variances)?,
        })
    }
}

fn squared_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// One random seed row, then repeatedly the row farthest from every chosen centre.
fn farthest_first_centres(
    data: ArrayView2<f64>,
    components: usize,
    rng: &mut PipelineRng,
) -> StageResult<Array2<f64>> {
    let rows = data.nrows();
    let mut chosen = vec![rng.index(rows)];
    let mut nearest: Vec<f64> = (0..rows)
        .map(|row| squared_distance(data.row(row), data.row(chosen[0])))
        .collect();

    while chosen.len() < components {
        let (next, distance) = nearest
            .iter()
            .copied()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (idx, d)| {
                if d > best.1 {
                    (idx, d)
                } else {
                    best
                }
            });
        if !(distance > 0.0) {
            return Err(StageError::model_fit(
                "mixture initialisation",
                "all feature rows are identical; components cannot be separated",
            ));
        }
        chosen.push(next);
        for (row, slot) in nearest.iter_mut().enumerate() {
            *slot = slot.min(squared_distance(data.row(row), data.row(next)));
        }
    }

    Ok(data.select(Axis(0), &chosen))
}

fn hard_responsibilities(data: ArrayView2<f64>, centres: &Array2<f64>) -> Array2<f64> {
    let mut resp = Array2::zeros((data.nrows(), centres.nrows()));
    for (row, obs) in data.outer_iter().enumerate() {
        let best = centres
            .outer_iter()
            .enumerate()
            .map(|(k, centre)| (k, squared_distance(obs, centre)))
            .fold((0, f64::INFINITY), |best, (k, d)| if d < best.1 { (k, d) } else { best })
            .0;
        resp[[row, best]] = 1.0;
    }
    resp
}

fn maximisation(
    data: ArrayView2<f64>,
    resp: &Array2<f64>,
    reg_covar: f64,
) -> StageResult<Params> {
    let rows = data.nrows() as f64;
    let counts = resp.sum_axis(Axis(0));
    if let Some((k, &count)) = counts
        .iter()
        .enumerate()
        .find(|(_, &count)| !(count > 10.0 * f64::EPSILON))
    {
        return Err(StageError::model_fit(
            "maximisation step",
            format!("component {} collapsed (responsibility mass {:e})", k, count),
        ));
    }

    let weights = counts.mapv(|c| c / rows);
    let mut means = resp.t().dot(&data);
    for (mut row, &count) in means.outer_iter_mut().zip(counts.iter()) {
        row.mapv_inplace(|v| v / count);
    }

    let mut variances = Array2::zeros(means.dim());
    for (k, mut var_row) in variances.outer_iter_mut().enumerate() {
        let mean = means.row(k);
        for (obs, &r) in data.outer_iter().zip(resp.column(k).iter()) {
            if r == 0.0 {
                continue;
            }
            for ((acc, &x), &mu) in var_row.iter_mut().zip(obs.iter()).zip(mean.iter()) {
                *acc += r * (x - mu) * (x - mu);
            }
        }
        let count = counts[k];
        var_row.mapv_inplace(|v| v / count + reg_covar);
    }

    Ok(Params {
        weights,
        means,
        variances,
    })
}

/// Log responsibilities and the mean per-row log-likelihood.
fn expectation(data: ArrayView2<f64>, params: &Params) -> (Array2<f64>, f64) {
    let k = params.weights.len();
    let log_norm: Vec<f64> = params
        .variances
        .outer_iter()
        .map(|var| var.iter().map(|v| (2.0 * PI * v).ln()).sum::<f64>())
        .collect();

    let mut log_resp = Array2::zeros((data.nrows(), k));
    let mut total = 0.0;
    for (row, obs) in data.outer_iter().enumerate() {
        for comp in 0..k {
            let quad: f64 = obs
                .iter()
                .zip(params.means.row(comp).iter())
                .zip(params.variances.row(comp).iter())
                .map(|((x, mu), var)| (x - mu) * (x - mu) / var)
                .sum();
            log_resp[[row, comp]] = params.weights[comp].ln() - 0.5 * (log_norm[comp] + quad);
        }
        let max = log_resp
            .row(row)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max);
        let lse = max
            + log_resp
                .row(row)
                .iter()
                .map(|v| (v - max).exp())
                .sum::<f64>()
                .ln();
        log_resp.row_mut(row).mapv_inplace(|v| v - lse);
        total += lse;
    }
    (log_resp, total / data.nrows().max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs(rng: &mut PipelineRng, per_cluster: usize) -> Array2<f64> {
        let mut flat = Vec::with_capacity(per_cluster * 4);
        for i in 0..per_cluster * 2 {
            let centre = if i % 2 == 0 { -3.0 } else { 3.0 };
            flat.push(centre + 0.5 * rng.standard_normal());
            flat.push(centre + 0.5 * rng.standard_normal());
        }
        Array2::from_shape_vec((per_cluster * 2, 2), flat).unwrap()
    }

    #[test]
    fn fit_separates_two_blobs() {
        let mut rng = PipelineRng::seeded(21);
        let data = two_blobs(&mut rng, 100);
        let model = GaussianMixture::fit(data.view(), &MixtureConfig::default(), &mut rng).unwrap();

        assert_eq!(model.components(), 2);
        assert!((model.weights[0] - 0.5).abs() < 0.05);
        let mut centres: Vec<f64> = model.means.iter().map(|m| m[0]).collect();
        centres.sort_by(f64::total_cmp);
        assert!((centres[0] + 3.0).abs() < 0.3);
        assert!((centres[1] - 3.0).abs() < 0.3);
        assert!(model.converged);

        let proba = model.predict_proba(data.view()).unwrap();
        for row in proba.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        // Neighbouring rows come from opposite blobs.
        let a = proba[[0, 0]] > 0.5;
        let b = proba[[1, 0]] > 0.5;
        assert_ne!(a, b);
    }

    #[test]
    fn identical_rows_cannot_be_fitted() {
        let data = Array2::from_elem((10, 3), 1.0);
        let mut rng = PipelineRng::seeded(0);
        let err = GaussianMixture::fit(data.view(), &MixtureConfig::default(), &mut rng).unwrap_err();
        assert!(matches!(err, StageError::ModelFit { .. }));
    }

    #[test]
    fn too_few_rows_is_a_fit_error() {
        let data = Array2::from_elem((1, 2), 0.5);
        let mut rng = PipelineRng::seeded(0);
        assert!(GaussianMixture::fit(data.view(), &MixtureConfig::default(), &mut rng).is_err());
    }

    #[test]
    fn iteration_cap_is_respected() {
        let mut rng = PipelineRng::seeded(4);
        let data = two_blobs(&mut rng, 30);
        let config = MixtureConfig {
            max_iterations: 1,
            tolerance: 0.0,
            ..Default::default()
        };
        let model = GaussianMixture::fit(data.view(), &config, &mut rng).unwrap();
        assert_eq!(model.iterations, 1);
        assert!(!model.converged);
    }
}
