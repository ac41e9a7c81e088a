use crate::interface::satellite::{CARBON_PHYTO, CHLOR_A, FUSED_VARIABLES, POC};
use crate::interface::{
    CompositeSummary, ConstrainedStep, EddyStats, EnvironmentalSample, FeatureVector,
    VariableMean,
};
use crate::math::random::PipelineRng;
use crate::prelude::{
    DataQualityEvent, DateMapping, ProcessingStage, StageConfig, StageContext, StageError,
    StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use chrono::NaiveDate;
use std::collections::BTreeSet;

/// Standard-normal draws are truncated to this many sigmas.
pub const JITTER_BOUND: f64 = 3.0;

const DEFAULT_CHLOR_A: f64 = 0.3;
const DEFAULT_CARBON_PHYTO: f64 = 40.0;
const DEFAULT_POC: f64 = 100.0;

/// Scalar inputs the covariate model reads from one composite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeBase {
    pub chlor_a: f64,
    pub carbon_phyto: f64,
    pub poc: f64,
}

impl CompositeBase {
    pub fn from_summary(summary: &CompositeSummary) -> Self {
        let base = |name: &str, fallback: f64| match summary.variable(name) {
            VariableMean::Mean(mean) => mean,
            VariableMean::Absent | VariableMean::NoFiniteValues => fallback,
        };
        Self {
            chlor_a: base(CHLOR_A, DEFAULT_CHLOR_A),
            carbon_phyto: base(CARBON_PHYTO, DEFAULT_CARBON_PHYTO),
            poc: base(POC, DEFAULT_POC),
        }
    }
}

/// Covariates for a position. Draw order is fixed (chlor_a, carbon_phyto,
/// poc, sst, depth band, depth noise, eddy) so a seed reproduces every row.
pub fn sample_environment(
    latitude: f64,
    longitude: f64,
    base: &CompositeBase,
    eddy: &EddyStats,
    rng: &mut PipelineRng,
) -> EnvironmentalSample {
    let lat_rad = latitude.to_radians();
    let abs_lat = latitude.abs();

    let lat_factor = 1.0 + 0.2 * lat_rad.sin();
    let coastal = if abs_lat < 30.0 && longitude.abs() < 60.0 {
        1.2
    } else {
        0.9
    };
    let chlor_a = base.chlor_a * lat_factor * coastal + 0.05 * rng.bounded_normal(JITTER_BOUND);

    let shelf = if abs_lat < 40.0 { 1.3 } else { 0.85 };
    let productivity = if latitude > -60.0 && latitude < 60.0 {
        1.1
    } else {
        0.9
    };
    let carbon_phyto =
        base.carbon_phyto * shelf * productivity + 2.0 * rng.bounded_normal(JITTER_BOUND);

    let seasonal = 1.1 + 0.1 * (2.0 * lat_rad).sin();
    let poc = base.poc * seasonal + 5.0 * rng.bounded_normal(JITTER_BOUND);

    let sst = 26.0 - 0.5 * abs_lat + 2.0 * lat_rad.sin() + 1.5 * rng.bounded_normal(JITTER_BOUND);

    let u = rng.uniform();
    let band = if abs_lat < 10.0 {
        -2500.0 + 1000.0 * u
    } else if abs_lat < 30.0 {
        -3000.0 + 800.0 * u
    } else {
        -2000.0 + 1500.0 * u
    };
    let water_depth = band
        + 1500.0 * (-longitude.abs() / 50.0).exp()
        + 300.0 * rng.bounded_normal(JITTER_BOUND);

    let eddy_lat = 1.0 + 0.3 * (2.0 * lat_rad).sin();
    let variability = (eddy.ssh_variability / 0.1).min(2.0);
    let eddy_speed = 0.2 * eddy.mean_eddy_intensity * eddy_lat * variability
        + 0.1 * eddy.std_eddy_intensity * rng.bounded_normal(JITTER_BOUND);

    EnvironmentalSample {
        chlor_a,
        carbon_phyto,
        poc,
        sst,
        water_depth,
        eddy_speed,
    }
    .clamped()
}

/// Index of the composite closest to `date`. `composites` must be sorted by
/// date; the earlier one wins ties.
fn nearest_composite(composites: &[CompositeSummary], date: NaiveDate) -> Option<usize> {
    composites
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| ((c.date - date).num_days().abs(), c.date))
        .map(|(idx, _)| idx)
}

/// Attaches satellite-derived covariates to each constrained motion row.
pub struct EnvironmentStage {
    config: Option<StageConfig>,
    composites: Vec<CompositeSummary>,
    eddy: EddyStats,
    logger: LogManager,
}

impl EnvironmentStage {
    pub fn new(mut composites: Vec<CompositeSummary>, eddy: EddyStats) -> Self {
        composites.sort_by_key(|c| c.date);
        Self {
            config: None,
            composites,
            eddy,
            logger: LogManager::new(),
        }
    }

    fn pick(&self, mapping: DateMapping, row: usize, date: NaiveDate) -> Option<usize> {
        match mapping {
            DateMapping::Nearest => nearest_composite(&self.composites, date),
            DateMapping::Cyclic => {
                let cycled = self.composites.get(row % self.composites.len())?.date;
                nearest_composite(&self.composites, cycled)
            }
        }
    }
}

impl ProcessingStage for EnvironmentStage {
    type Input = Vec<ConstrainedStep>;
    type Output = Vec<FeatureVector>;

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(
        &mut self,
        input: Self::Input,
        ctx: &mut StageContext,
    ) -> StageResult<StageOutput<Self::Output>> {
        let mapping = self
            .config
            .as_ref()
            .ok_or_else(|| StageError::not_initialized("EnvironmentStage"))?
            .date_mapping;
        if self.composites.is_empty() {
            return Err(StageError::MissingInput(
                "no satellite composites available for environment fusion".into(),
            ));
        }

        let mut metadata = StageMetadata::default();
        let mut reported = BTreeSet::new();
        let bases: Vec<CompositeBase> = self
            .composites
            .iter()
            .map(CompositeBase::from_summary)
            .collect();

        let mut rows = Vec::with_capacity(input.len());
        for (idx, step) in input.into_iter().enumerate() {
            let motion = step.motion;
            let chosen = self
                .pick(mapping, idx, motion.timestamp.date_naive())
                .ok_or_else(|| StageError::Internal("composite lookup failed".into()))?;
            let composite = &self.composites[chosen];

            if reported.insert(chosen) {
                for variable in FUSED_VARIABLES {
                    if !matches!(composite.variable(variable), VariableMean::Mean(_)) {
                        ctx.flag(
                            &mut metadata,
                            DataQualityEvent::VariableAbsent {
                                date: composite.date,
                                variable: variable.to_string(),
                            },
                        );
                    }
                }
            }

            let environment = sample_environment(
                motion.position.latitude,
                motion.position.longitude,
                &bases[chosen],
                &self.eddy,
                &mut ctx.rng,
            );
            rows.push(FeatureVector {
                subject_id: motion.subject_id,
                timestamp: motion.timestamp,
                latitude: motion.position.latitude,
                longitude: motion.position.longitude,
                composite_date: composite.date,
                step_length: motion.step_length,
                turning_angle: motion.turning_angle,
                speed_km_day: motion.speed_km_day,
                speed_flag: step.speed_flag,
                data_quality: step.data_quality,
                environment,
            });
        }

        ctx.metrics.record_processed(rows.len());
        let note = format!(
            "EnvironmentStage fused {} rows against {} composites ({} used)",
            rows.len(),
            self.composites.len(),
            reported.len()
        );
        self.logger.record(&note);
        metadata.notes.push(note);

        Ok(StageOutput {
            records: rows,
            metadata,
        })
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}
