//! Behavioral state inference over the fused feature table.
//!
//! The whole batch is standardized together and fitted with a two-component
//! diagonal Gaussian mixture. Components carry no meaning of their own; the
//! faster one is labeled migrating after decoding.

use crate::interface::{Behavior, ClassifiedObservation, FeatureVector, StateAssignment};
use crate::math::matrix::{MatrixHelper, Standardizer};
use crate::math::mixture::{GaussianMixture, MixtureConfig};
use crate::math::random::PipelineRng;
use crate::prelude::{
    InferenceConfig, ProcessingStage, StageConfig, StageContext, StageError, StageMetadata,
    StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

pub const STATES: usize = 2;

/// Model inputs, in matrix column order.
pub const FEATURE_COLUMNS: [&str; 8] = [
    "step_length",
    "turning_angle",
    "chlor_a",
    "carbon_phyto",
    "poc",
    "water_depth",
    "eddy_speed",
    "sst",
];

/// Feature matrix with `NaN` where a value is missing.
pub fn feature_matrix(rows: &[FeatureVector]) -> Array2<f64> {
    let mut matrix = Array2::from_elem((rows.len(), FEATURE_COLUMNS.len()), f64::NAN);
    for (mut out, row) in matrix.outer_iter_mut().zip(rows) {
        let env = &row.environment;
        let values = [
            row.step_length,
            row.turning_angle.unwrap_or(f64::NAN),
            env.chlor_a,
            env.carbon_phyto,
            env.poc,
            env.water_depth,
            env.eddy_speed,
            env.sst,
        ];
        for (slot, value) in out.iter_mut().zip(values) {
            *slot = value;
        }
    }
    matrix
}

/// Per-state statistics after the final state assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateProfile {
    pub state: usize,
    pub behavior: Behavior,
    pub observations: usize,
    pub mean_speed_km_day: f64,
    pub mean_chlor_a: Option<f64>,
}

/// Everything needed to audit a fit or score new rows on the same scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub rows: usize,
    pub iterations: usize,
    pub converged: bool,
    pub log_likelihood: f64,
    pub weights: Vec<f64>,
    /// Component means in standardized units, components × features.
    pub means: Vec<Vec<f64>>,
    pub imputation_medians: Vec<f64>,
    pub standardizer: Standardizer,
    pub mixture: GaussianMixture,
    pub thinning: Option<u32>,
    pub redrawn: usize,
    pub states: Vec<StateProfile>,
}

impl FitSummary {
    pub fn behavior_of(&self, state: usize) -> Option<Behavior> {
        self.states
            .iter()
            .find(|profile| profile.state == state)
            .map(|profile| profile.behavior)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub observations: Vec<ClassifiedObservation>,
    pub summary: FitSummary,
}

/// Arg-max state per row; component 0 wins exact ties.
pub fn decode_states(posteriors: ArrayView2<f64>) -> Vec<usize> {
    posteriors
        .outer_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (k, &p)| {
                    if p > best.1 {
                        (k, p)
                    } else {
                        best
                    }
                })
                .0
        })
        .collect()
}

/// With probability `1 / thinning` a row's state is redrawn from its
/// posterior. This approximates posterior sampling and is not an HMM
/// decode. One Bernoulli draw is consumed per row whatever the outcome.
pub fn thin_states(
    states: &mut [usize],
    posteriors: ArrayView2<f64>,
    thinning: u32,
    rng: &mut PipelineRng,
) -> usize {
    let rate = 1.0 / f64::from(thinning.max(1));
    let mut redrawn = 0;
    for (state, row) in states.iter_mut().zip(posteriors.outer_iter()) {
        if rng.bernoulli(rate) {
            *state = rng.categorical(&row.to_vec());
            redrawn += 1;
        }
    }
    redrawn
}

/// Behavior of each state index. The state with the higher mean speed is
/// migrating; a state with no rows uses the posterior-weighted speed, and
/// on a tie state 0 is foraging.
pub fn label_states(
    states: &[usize],
    speeds: &[f64],
    posteriors: ArrayView2<f64>,
) -> [Behavior; STATES] {
    let mut mean_speed = [0.0; STATES];
    for (state, slot) in mean_speed.iter_mut().enumerate() {
        let assigned: Vec<f64> = states
            .iter()
            .zip(speeds)
            .filter(|(s, _)| **s == state)
            .map(|(_, v)| *v)
            .collect();
        *slot = if assigned.is_empty() {
            let column = posteriors.column(state);
            let mass: f64 = column.sum();
            if mass > 0.0 {
                column.iter().zip(speeds).map(|(p, v)| p * v).sum::<f64>() / mass
            } else {
                0.0
            }
        } else {
            assigned.iter().sum::<f64>() / assigned.len() as f64
        };
    }

    if mean_speed[0] > mean_speed[1] {
        [Behavior::Migrating, Behavior::Foraging]
    } else {
        [Behavior::Foraging, Behavior::Migrating]
    }
}

fn profiles(
    rows: &[FeatureVector],
    states: &[usize],
    behaviors: &[Behavior; STATES],
) -> Vec<StateProfile> {
    (0..STATES)
        .map(|state| {
            let members: Vec<&FeatureVector> = rows
                .iter()
                .zip(states)
                .filter(|(_, s)| **s == state)
                .map(|(row, _)| row)
                .collect();
            let count = members.len();
            let mean = |f: fn(&FeatureVector) -> f64| {
                (count > 0).then(|| members.iter().map(|r| f(r)).sum::<f64>() / count as f64)
            };
            StateProfile {
                state,
                behavior: behaviors[state],
                observations: count,
                mean_speed_km_day: mean(|r| r.speed_km_day).unwrap_or(0.0),
                mean_chlor_a: mean(|r| r.environment.chlor_a),
            }
        })
        .collect()
}

/// Fits the mixture to `rows` and classifies every one of them.
pub fn infer(
    rows: Vec<FeatureVector>,
    config: &InferenceConfig,
    rng: &mut PipelineRng,
) -> StageResult<InferenceResult> {
    if rows.len() < STATES {
        return Err(StageError::model_fit(
            "state inference",
            format!("{} feature rows cannot support {} states", rows.len(), STATES),
        ));
    }

    let mut matrix = feature_matrix(&rows);
    let imputation_medians = MatrixHelper::impute_column_medians(&mut matrix, &FEATURE_COLUMNS)?;
    let standardizer = Standardizer::fit(matrix.view(), &FEATURE_COLUMNS)?;
    let scaled = standardizer.transform(matrix.view())?;

    let mixture_config = MixtureConfig {
        components: STATES,
        max_iterations: config.max_iterations,
        tolerance: config.tolerance,
        reg_covar: config.reg_covar,
    };
    let mixture = GaussianMixture::fit(scaled.view(), &mixture_config, rng)?;
    let posteriors = mixture.predict_proba(scaled.view())?;

    let mut states = decode_states(posteriors.view());
    let redrawn = match config.thinning {
        Some(k) => thin_states(&mut states, posteriors.view(), k, rng),
        None => 0,
    };

    let speeds: Vec<f64> = rows.iter().map(|r| r.speed_km_day).collect();
    let behaviors = label_states(&states, &speeds, posteriors.view());
    let states_summary = profiles(&rows, &states, &behaviors);

    let observations = rows
        .into_iter()
        .zip(states)
        .zip(posteriors.outer_iter())
        .map(|((features, state), row)| {
            let posteriors = [row[0], row[1]];
            let max = posteriors[0].max(posteriors[1]);
            ClassifiedObservation {
                features,
                state: StateAssignment {
                    predicted_state: state,
                    posteriors,
                    uncertainty: 1.0 - max,
                    behavior: behaviors[state],
                },
            }
        })
        .collect::<Vec<_>>();

    let summary = FitSummary {
        rows: observations.len(),
        iterations: mixture.iterations,
        converged: mixture.converged,
        log_likelihood: mixture.log_likelihood,
        weights: mixture.weights.clone(),
        means: mixture.means.clone(),
        imputation_medians,
        standardizer,
        mixture,
        thinning: config.thinning,
        redrawn,
        states: states_summary,
    };

    Ok(InferenceResult {
        observations,
        summary,
    })
}

pub struct InferenceStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl InferenceStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new(),
        }
    }
}

impl Default for InferenceStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for InferenceStage {
    type Input = Vec<FeatureVector>;
    type Output = InferenceResult;

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        config.validate()?;
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(
        &mut self,
        input: Self::Input,
        ctx: &mut StageContext,
    ) -> StageResult<StageOutput<Self::Output>> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| StageError::not_initialized("InferenceStage"))?;

        let result = match infer(input, &config.inference, &mut ctx.rng) {
            Ok(result) => result,
            Err(err) => {
                ctx.metrics.record_error();
                return Err(err);
            }
        };
        ctx.metrics.record_processed(result.observations.len());

        let mut metadata = StageMetadata::default();
        let summary = &result.summary;
        if !summary.converged {
            let note = format!(
                "InferenceStage stopped at the iteration cap ({}) without converging",
                summary.iterations
            );
            self.logger.record(&note);
            metadata.notes.push(note);
        }
        for profile in &summary.states {
            let note = format!(
                "InferenceStage state {} = {} ({} rows, mean speed {:.1} km/day)",
                profile.state, profile.behavior, profile.observations, profile.mean_speed_km_day
            );
            self.logger.record(&note);
            metadata.notes.push(note);
        }

        Ok(StageOutput {
            records: result,
            metadata,
        })
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{DataQuality, EnvironmentalSample, SpeedFlag};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use ndarray::array;

    /// Alternating fast-directed and slow-tortuous rows in productive water.
    fn two_behaviours(rng: &mut PipelineRng, per_state: usize) -> Vec<FeatureVector> {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        (0..per_state * 2)
            .map(|i| {
                let fast = i % 2 == 0;
                let jitter = |rng: &mut PipelineRng, scale: f64| scale * rng.standard_normal();
                let (step, speed, turn, chlor) = if fast {
                    (125.0, 500.0, 0.05, 0.3)
                } else {
                    (12.0, 48.0, 2.0, 1.5)
                };
                let step_length = step + jitter(rng, step * 0.05);
                FeatureVector {
                    subject_id: format!("s{}", i % 3),
                    timestamp: start + Duration::hours(6 * i as i64),
                    latitude: 20.0,
                    longitude: -60.0,
                    composite_date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                    step_length,
                    turning_angle: if i == 3 { None } else { Some(turn + jitter(rng, 0.05)) },
                    speed_km_day: speed + jitter(rng, speed * 0.05),
                    speed_flag: SpeedFlag::Normal,
                    data_quality: DataQuality::Good,
                    environment: EnvironmentalSample {
                        chlor_a: chlor + jitter(rng, 0.02),
                        carbon_phyto: chlor * 40.0 + jitter(rng, 1.0),
                        poc: chlor * 80.0 + jitter(rng, 2.0),
                        sst: (if fast { 22.0 } else { 26.0 }) + jitter(rng, 0.2),
                        water_depth: (if fast { -4000.0 } else { -800.0 }) + jitter(rng, 50.0),
                        eddy_speed: (if fast { 0.05 } else { 0.2 }) + jitter(rng, 0.01),
                    },
                }
            })
            .collect()
    }

    fn exact() -> InferenceConfig {
        InferenceConfig {
            thinning: None,
            ..InferenceConfig::default()
        }
    }

    #[test]
    fn faster_state_is_labeled_migrating() {
        let mut rng = PipelineRng::seeded(17);
        let rows = two_behaviours(&mut rng, 40);
        let result = infer(rows, &exact(), &mut rng).unwrap();

        for obs in &result.observations {
            let expected = if obs.features.speed_km_day > 200.0 {
                Behavior::Migrating
            } else {
                Behavior::Foraging
            };
            assert_eq!(obs.state.behavior, expected);
            assert!((obs.state.posteriors[0] + obs.state.posteriors[1] - 1.0).abs() < 1e-9);
            assert!(obs.state.uncertainty >= 0.0 && obs.state.uncertainty <= 0.5);
        }
        assert_eq!(result.summary.states.len(), 2);
        assert_eq!(result.summary.rows, 80);
        assert_eq!(result.summary.redrawn, 0);
        assert!(result.summary.standardizer.features.iter().any(|f| f == "turning_angle"));
    }

    #[test]
    fn labels_follow_speed_not_component_index() {
        let posteriors = array![[0.9, 0.1], [0.8, 0.2], [0.1, 0.9], [0.2, 0.8]];
        let speeds = [400.0, 420.0, 30.0, 35.0];
        assert_eq!(
            label_states(&[0, 0, 1, 1], &speeds, posteriors.view()),
            [Behavior::Migrating, Behavior::Foraging]
        );
        assert_eq!(
            label_states(&[1, 1, 0, 0], &speeds, posteriors.view()),
            [Behavior::Foraging, Behavior::Migrating]
        );
    }

    #[test]
    fn empty_state_falls_back_to_posterior_weighted_speed() {
        let posteriors = array![[0.6, 0.4], [0.7, 0.3]];
        let speeds = [10.0, 500.0];
        // Everything is assigned to state 0; state 1 leans on the faster row less.
        let labels = label_states(&[0, 0], &speeds, posteriors.view());
        let state0 = 255.0;
        let state1 = (0.4 * 10.0 + 0.3 * 500.0) / 0.7;
        assert!(state1 < state0);
        assert_eq!(labels, [Behavior::Migrating, Behavior::Foraging]);
    }

    #[test]
    fn equal_speeds_make_state_zero_foraging() {
        let posteriors = array![[1.0, 0.0], [0.0, 1.0]];
        assert_eq!(
            label_states(&[0, 1], &[50.0, 50.0], posteriors.view()),
            [Behavior::Foraging, Behavior::Migrating]
        );
    }

    #[test]
    fn decode_prefers_component_zero_on_ties() {
        let posteriors = array![[0.5, 0.5], [0.2, 0.8], [0.7, 0.3]];
        assert_eq!(decode_states(posteriors.view()), vec![0, 1, 0]);
    }

    #[test]
    fn thinning_leaves_posteriors_untouched() {
        let mut rng = PipelineRng::seeded(5);
        let rows = two_behaviours(&mut rng, 30);
        let exact_result = infer(rows.clone(), &exact(), &mut PipelineRng::seeded(8)).unwrap();
        let config = InferenceConfig {
            thinning: Some(1),
            ..InferenceConfig::default()
        };
        let thinned = infer(rows, &config, &mut PipelineRng::seeded(8)).unwrap();

        assert_eq!(thinned.summary.redrawn, 60);
        for (a, b) in exact_result.observations.iter().zip(&thinned.observations) {
            assert_eq!(a.state.posteriors, b.state.posteriors);
            assert_eq!(a.state.uncertainty, b.state.uncertainty);
        }
    }

    #[test]
    fn default_thinning_redraws_about_one_row_in_ten() {
        let rows = 2000;
        let posteriors = Array2::from_shape_fn((rows, STATES), |(i, s)| match (i % 2, s) {
            (0, 0) | (1, 1) => 1.0,
            _ => 0.0,
        });
        let mut states = decode_states(posteriors.view());
        let decoded = states.clone();
        let k = InferenceConfig::default().thinning.unwrap();
        assert_eq!(k, 10);

        let redrawn = thin_states(&mut states, posteriors.view(), k, &mut PipelineRng::seeded(21));
        // Binomial(2000, 0.1): mean 200, sd about 13.
        assert!((140..=260).contains(&redrawn), "{} rows redrawn", redrawn);
        // Certain posteriors redraw to the same state.
        assert_eq!(states, decoded);
    }

    #[test]
    fn single_row_is_a_fit_error() {
        let mut rng = PipelineRng::seeded(1);
        let rows = two_behaviours(&mut rng, 1).into_iter().take(1).collect();
        assert!(matches!(
            infer(rows, &exact(), &mut rng),
            Err(StageError::ModelFit { .. })
        ));
    }

    #[test]
    fn constant_feature_is_named_in_the_error() {
        let mut rng = PipelineRng::seeded(2);
        let mut rows = two_behaviours(&mut rng, 10);
        for row in &mut rows {
            row.environment.sst = 20.0;
        }
        match infer(rows, &exact(), &mut rng) {
            Err(StageError::ModelFit { detail, .. }) => assert!(detail.contains("sst")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_turning_angle_is_imputed_with_the_median() {
        let mut rng = PipelineRng::seeded(3);
        let rows = two_behaviours(&mut rng, 10);
        let mut matrix = feature_matrix(&rows);
        assert!(matrix[[3, 1]].is_nan());
        let medians = MatrixHelper::impute_column_medians(&mut matrix, &FEATURE_COLUMNS).unwrap();
        assert_eq!(matrix[[3, 1]], medians[1]);
    }

    #[test]
    fn stage_records_processed_rows() {
        let mut rng = PipelineRng::seeded(23);
        let rows = two_behaviours(&mut rng, 20);
        let mut stage = InferenceStage::new();
        stage.initialize(&StageConfig::default()).unwrap();
        let mut ctx = StageContext::seeded(23);
        let output = stage.execute(rows, &mut ctx).unwrap();
        assert_eq!(output.records.observations.len(), 40);
        assert_eq!(ctx.metrics.snapshot().processed, 40);
        assert!(!output.metadata.notes.is_empty());
    }
}
