use crate::interface::{Behavior, ClassifiedObservation, EnvironmentalSample, HotspotBin};
use crate::prelude::{
    DataQualityEvent, ProcessingStage, StageConfig, StageContext, StageError, StageMetadata,
    StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use std::collections::{BTreeMap, BTreeSet};

/// Integer cell index of a coordinate pair at `resolution` degrees.
pub fn bin_key(latitude: f64, longitude: f64, resolution: f64) -> (i64, i64) {
    (
        (latitude / resolution).round() as i64,
        (longitude / resolution).round() as i64,
    )
}

#[derive(Default)]
struct Accumulator<'a> {
    subjects: BTreeSet<&'a str>,
    count: usize,
    uncertainty: f64,
    confidence: f64,
    speed: f64,
    env: [f64; 6],
}

impl<'a> Accumulator<'a> {
    fn add(&mut self, obs: &'a ClassifiedObservation) {
        let f = &obs.features;
        let e = &f.environment;
        self.subjects.insert(f.subject_id.as_str());
        self.count += 1;
        self.uncertainty += obs.state.uncertainty;
        self.confidence += obs.state.confidence();
        self.speed += f.speed_km_day;
        for (acc, value) in self.env.iter_mut().zip([
            e.chlor_a,
            e.carbon_phyto,
            e.poc,
            e.sst,
            e.water_depth,
            e.eddy_speed,
        ]) {
            *acc += value;
        }
    }

    fn finish(self, key: (i64, i64), resolution: f64) -> HotspotBin {
        let n = self.count as f64;
        let avg_uncertainty = self.uncertainty / n;
        let [chlor_a, carbon_phyto, poc, sst, water_depth, eddy_speed] = self.env.map(|v| v / n);
        HotspotBin {
            latitude: key.0 as f64 * resolution,
            longitude: key.1 as f64 * resolution,
            unique_subjects: self.subjects.len(),
            observation_count: self.count,
            avg_uncertainty,
            avg_confidence: self.confidence / n,
            avg_speed_km_day: self.speed / n,
            avg_environment: EnvironmentalSample {
                chlor_a,
                carbon_phyto,
                poc,
                sst,
                water_depth,
                eddy_speed,
            },
            foraging_intensity: n * (1.0 - avg_uncertainty),
            subject_diversity: self.subjects.len() as f64 / n,
        }
    }
}

/// Aggregates foraging observations into spatial cells, most intense first.
/// Ties keep the cell order.
pub fn aggregate_hotspots(observations: &[ClassifiedObservation], resolution: f64) -> Vec<HotspotBin> {
    let mut cells: BTreeMap<(i64, i64), Accumulator> = BTreeMap::new();
    for obs in observations
        .iter()
        .filter(|obs| obs.state.behavior == Behavior::Foraging)
    {
        let key = bin_key(obs.features.latitude, obs.features.longitude, resolution);
        cells.entry(key).or_default().add(obs);
    }

    let mut bins: Vec<HotspotBin> = cells
        .into_iter()
        .map(|(key, acc)| acc.finish(key, resolution))
        .collect();
    // Stable sort over key-ordered cells.
    bins.sort_by(|a, b| b.foraging_intensity.total_cmp(&a.foraging_intensity));
    bins
}

pub struct HotspotStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl HotspotStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new(),
        }
    }
}

impl Default for HotspotStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for HotspotStage {
    type Input = Vec<ClassifiedObservation>;
    type Output = Vec<HotspotBin>;

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
        let resolution = self
            .config
            .as_ref()
            .ok_or_else(|| StageError::not_initialized("HotspotStage"))?
            .hotspot_resolution_deg;

        let mut metadata = StageMetadata::default();
        let bins = aggregate_hotspots(&input, resolution);
        if bins.is_empty() {
            ctx.flag(&mut metadata, DataQualityEvent::NoForagingObservations);
        }

        let foraging: usize = bins.iter().map(|b| b.observation_count).sum();
        let note = format!(
            "HotspotStage {} cells from {} foraging observations",
            bins.len(),
            foraging
        );
        self.logger.record(&note);
        metadata.notes.push(note);

        Ok(StageOutput {
            records: bins,
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
    use crate::interface::{DataQuality, FeatureVector, SpeedFlag, StateAssignment};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn observation(subject: &str, lat: f64, lon: f64, behavior: Behavior, uncertainty: f64) -> ClassifiedObservation {
        ClassifiedObservation {
            features: FeatureVector {
                subject_id: subject.into(),
                timestamp: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
                latitude: lat,
                longitude: lon,
                composite_date: NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
                step_length: 5.0,
                turning_angle: Some(1.0),
                speed_km_day: 20.0,
                speed_flag: SpeedFlag::Normal,
                data_quality: DataQuality::Good,
                environment: EnvironmentalSample {
                    chlor_a: 1.0,
                    carbon_phyto: 50.0,
                    poc: 100.0,
                    sst: 25.0,
                    water_depth: -500.0,
                    eddy_speed: 0.1,
                },
            },
            state: StateAssignment {
                predicted_state: 0,
                posteriors: [1.0 - uncertainty, uncertainty],
                uncertainty,
                behavior,
            },
        }
    }

    #[test]
    fn one_cell_counts_rows_and_unique_subjects() {
        let observations = vec![
            observation("a", 10.01, 20.02, Behavior::Foraging, 0.1),
            observation("a", 10.02, 20.01, Behavior::Foraging, 0.3),
            observation("b", 10.04, 19.98, Behavior::Foraging, 0.2),
            observation("c", 10.0, 20.0, Behavior::Migrating, 0.0),
        ];
        let bins = aggregate_hotspots(&observations, 0.1);
        assert_eq!(bins.len(), 1);
        let bin = &bins[0];
        assert_eq!(bin.observation_count, 3);
        assert_eq!(bin.unique_subjects, 2);
        assert!((bin.latitude - 10.0).abs() < 1e-9);
        assert!((bin.longitude - 20.0).abs() < 1e-9);
        assert!((bin.avg_uncertainty - 0.2).abs() < 1e-12);
        assert!((bin.foraging_intensity - 2.4).abs() < 1e-12);
        assert!((bin.subject_diversity - 2.0 / 3.0).abs() < 1e-12);
        assert!((bin.avg_environment.chlor_a - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bins_sorted_by_intensity_then_key() {
        let observations = vec![
            observation("a", 5.0, 5.0, Behavior::Foraging, 0.0),
            observation("a", 1.0, 1.0, Behavior::Foraging, 0.0),
            observation("b", 3.0, 3.0, Behavior::Foraging, 0.0),
            observation("c", 3.0, 3.0, Behavior::Foraging, 0.0),
        ];
        let bins = aggregate_hotspots(&observations, 0.1);
        let lats: Vec<f64> = bins.iter().map(|b| b.latitude.round()).collect();
        assert_eq!(lats, vec![3.0, 1.0, 5.0]);
    }

    #[test]
    fn negative_coordinates_round_to_nearest_cell() {
        assert_eq!(bin_key(-10.04, -0.06, 0.1), (-100, -1));
        assert_eq!(bin_key(0.049, 0.051, 0.1), (0, 1));
    }

    #[test]
    fn no_foraging_rows_is_reported() {
        let mut stage = HotspotStage::new();
        stage.initialize(&StageConfig::default()).unwrap();
        let mut ctx = StageContext::seeded(0);
        let output = stage
            .execute(vec![observation("a", 0.0, 0.0, Behavior::Migrating, 0.1)], &mut ctx)
            .unwrap();
        assert!(output.records.is_empty());
        assert_eq!(
            output.metadata.events,
            vec![DataQualityEvent::NoForagingObservations]
        );
    }
}
