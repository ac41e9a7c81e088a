//! Flat CSV row shapes and their rounding rules.

use crate::interface::{
    Behavior, ClassifiedObservation, DataQuality, EnvironmentalSample, FeatureVector, HotspotBin,
    SpeedCategory, SpeedFlag,
};
use crate::math::stats::StatsHelper;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Decimal places per exported quantity.
pub mod precision {
    pub const COORDINATE: u32 = 6;
    pub const HOTSPOT_COORDINATE: u32 = 3;
    pub const CHLOR_A: u32 = 4;
    pub const CARBON_PHYTO: u32 = 2;
    pub const POC: u32 = 2;
    pub const SST: u32 = 2;
    pub const WATER_DEPTH: u32 = 1;
    pub const EDDY_SPEED: u32 = 4;
    pub const SPEED: u32 = 2;
    pub const STEP: u32 = 3;
    pub const TURNING_ANGLE: u32 = 4;
    pub const PROBABILITY: u32 = 3;
    pub const INTENSITY: u32 = 2;
    pub const DIVERSITY: u32 = 3;
}

fn round(value: f64, decimals: u32) -> f64 {
    StatsHelper::round_to(value, decimals)
}

fn flag(value: bool) -> u8 {
    u8::from(value)
}

fn rounded_environment(env: &EnvironmentalSample) -> EnvironmentalSample {
    EnvironmentalSample {
        chlor_a: round(env.chlor_a, precision::CHLOR_A),
        carbon_phyto: round(env.carbon_phyto, precision::CARBON_PHYTO),
        poc: round(env.poc, precision::POC),
        sst: round(env.sst, precision::SST),
        water_depth: round(env.water_depth, precision::WATER_DEPTH),
        eddy_speed: round(env.eddy_speed, precision::EDDY_SPEED),
    }
}

/// One fused feature row; reloadable for inference-only runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub composite_date: NaiveDate,
    pub step_length: f64,
    pub turning_angle: Option<f64>,
    pub speed_km_day: f64,
    pub speed_flag: SpeedFlag,
    pub data_quality: DataQuality,
    pub chlor_a: f64,
    pub carbon_phyto: f64,
    pub poc: f64,
    pub sst: f64,
    pub water_depth: f64,
    pub eddy_speed: f64,
}

impl From<&FeatureVector> for FeatureRecord {
    fn from(row: &FeatureVector) -> Self {
        let env = rounded_environment(&row.environment);
        Self {
            subject_id: row.subject_id.clone(),
            timestamp: row.timestamp,
            latitude: round(row.latitude, precision::COORDINATE),
            longitude: round(row.longitude, precision::COORDINATE),
            composite_date: row.composite_date,
            step_length: round(row.step_length, precision::STEP),
            turning_angle: row
                .turning_angle
                .map(|turn| round(turn, precision::TURNING_ANGLE)),
            speed_km_day: round(row.speed_km_day, precision::SPEED),
            speed_flag: row.speed_flag,
            data_quality: row.data_quality,
            chlor_a: env.chlor_a,
            carbon_phyto: env.carbon_phyto,
            poc: env.poc,
            sst: env.sst,
            water_depth: env.water_depth,
            eddy_speed: env.eddy_speed,
        }
    }
}

impl From<FeatureRecord> for FeatureVector {
    fn from(record: FeatureRecord) -> Self {
        Self {
            subject_id: record.subject_id,
            timestamp: record.timestamp,
            latitude: record.latitude,
            longitude: record.longitude,
            composite_date: record.composite_date,
            step_length: record.step_length,
            turning_angle: record.turning_angle,
            speed_km_day: record.speed_km_day,
            speed_flag: record.speed_flag,
            data_quality: record.data_quality,
            environment: EnvironmentalSample {
                chlor_a: record.chlor_a,
                carbon_phyto: record.carbon_phyto,
                poc: record.poc,
                sst: record.sst,
                water_depth: record.water_depth,
                eddy_speed: record.eddy_speed,
            },
        }
    }
}

/// One classified observation with its export-only derived columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedRecord {
    pub subject_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    pub behavior: Behavior,
    pub predicted_state: usize,
    pub state_probability_0: f64,
    pub state_probability_1: f64,
    pub state_uncertainty: f64,
    pub speed_km_day: f64,
    pub step_length: f64,
    pub turning_angle: Option<f64>,
    pub chlor_a: f64,
    pub carbon_phyto: f64,
    pub poc: f64,
    pub sst: f64,
    pub water_depth: f64,
    pub eddy_speed: f64,
    pub speed_flag: SpeedFlag,
    pub data_quality: DataQuality,
    pub is_foraging: u8,
    pub is_migrating: u8,
    pub confidence: f64,
    pub high_confidence: u8,
    pub speed_category: Option<SpeedCategory>,
}

impl DetailedRecord {
    /// `high_confidence` is decided on the unrounded confidence.
    pub fn from_observation(obs: &ClassifiedObservation, high_confidence_threshold: f64) -> Self {
        let features = FeatureRecord::from(&obs.features);
        let state = &obs.state;
        let confidence = state.confidence();
        Self {
            subject_id: features.subject_id,
            latitude: features.latitude,
            longitude: features.longitude,
            timestamp: features.timestamp,
            behavior: state.behavior,
            predicted_state: state.predicted_state,
            state_probability_0: round(state.posteriors[0], precision::PROBABILITY),
            state_probability_1: round(state.posteriors[1], precision::PROBABILITY),
            state_uncertainty: round(state.uncertainty, precision::PROBABILITY),
            speed_km_day: features.speed_km_day,
            step_length: features.step_length,
            turning_angle: features.turning_angle,
            chlor_a: features.chlor_a,
            carbon_phyto: features.carbon_phyto,
            poc: features.poc,
            sst: features.sst,
            water_depth: features.water_depth,
            eddy_speed: features.eddy_speed,
            speed_flag: features.speed_flag,
            data_quality: features.data_quality,
            is_foraging: flag(state.behavior == Behavior::Foraging),
            is_migrating: flag(state.behavior == Behavior::Migrating),
            confidence: round(confidence, precision::PROBABILITY),
            high_confidence: flag(confidence >= high_confidence_threshold),
            speed_category: SpeedCategory::from_speed(obs.features.speed_km_day),
        }
    }
}

/// One foraging hotspot cell. Column names follow the published hotspot
/// table, hence `unique_sharks` and `shark_diversity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub unique_sharks: usize,
    pub foraging_observations: usize,
    pub avg_uncertainty: f64,
    pub avg_speed_km_day: f64,
    pub avg_chlor_a: f64,
    pub avg_carbon_phyto: f64,
    pub avg_poc: f64,
    pub avg_sst: f64,
    pub avg_water_depth: f64,
    pub avg_eddy_speed: f64,
    pub avg_confidence: f64,
    pub foraging_intensity: f64,
    pub shark_diversity: f64,
}

impl From<&HotspotBin> for HotspotRecord {
    fn from(bin: &HotspotBin) -> Self {
        let env = rounded_environment(&bin.avg_environment);
        Self {
            latitude: round(bin.latitude, precision::HOTSPOT_COORDINATE),
            longitude: round(bin.longitude, precision::HOTSPOT_COORDINATE),
            unique_sharks: bin.unique_subjects,
            foraging_observations: bin.observation_count,
            avg_uncertainty: round(bin.avg_uncertainty, precision::PROBABILITY),
            avg_speed_km_day: round(bin.avg_speed_km_day, precision::SPEED),
            avg_chlor_a: env.chlor_a,
            avg_carbon_phyto: env.carbon_phyto,
            avg_poc: env.poc,
            avg_sst: env.sst,
            avg_water_depth: env.water_depth,
            avg_eddy_speed: env.eddy_speed,
            avg_confidence: round(bin.avg_confidence, precision::PROBABILITY),
            foraging_intensity: round(bin.foraging_intensity, precision::INTENSITY),
            shark_diversity: round(bin.subject_diversity, precision::DIVERSITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::StateAssignment;
    use chrono::TimeZone;

    fn observation() -> ClassifiedObservation {
        ClassifiedObservation {
            features: FeatureVector {
                subject_id: "T-01".into(),
                timestamp: Utc.with_ymd_and_hms(2024, 9, 2, 6, 0, 0).unwrap(),
                latitude: 24.123_456_78,
                longitude: -81.987_654_32,
                composite_date: NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(),
                step_length: 12.345_67,
                turning_angle: Some(-1.234_567),
                speed_km_day: 49.456,
                speed_flag: SpeedFlag::Normal,
                data_quality: DataQuality::Good,
                environment: EnvironmentalSample {
                    chlor_a: 0.123_456,
                    carbon_phyto: 45.678,
                    poc: 110.004,
                    sst: 27.456,
                    water_depth: -1234.56,
                    eddy_speed: 0.061_23,
                },
            },
            state: StateAssignment {
                predicted_state: 1,
                posteriors: [0.28, 0.72],
                uncertainty: 0.28,
                behavior: Behavior::Foraging,
            },
        }
    }

    #[test]
    fn detailed_record_rounds_and_derives_flags() {
        let record = DetailedRecord::from_observation(&observation(), 0.7);
        assert_eq!(record.latitude, 24.123_457);
        assert_eq!(record.longitude, -81.987_654);
        assert_eq!(record.step_length, 12.346);
        assert_eq!(record.turning_angle, Some(-1.2346));
        assert_eq!(record.speed_km_day, 49.46);
        assert_eq!(record.chlor_a, 0.1235);
        assert_eq!(record.water_depth, -1234.6);
        assert_eq!(record.is_foraging, 1);
        assert_eq!(record.is_migrating, 0);
        assert_eq!(record.confidence, 0.72);
        assert_eq!(record.high_confidence, 1);
        assert_eq!(record.speed_category, Some(SpeedCategory::Low));
    }

    #[test]
    fn stationary_row_has_no_speed_category() {
        let mut obs = observation();
        obs.features.speed_km_day = 0.0;
        let record = DetailedRecord::from_observation(&obs, 0.7);
        assert_eq!(record.speed_km_day, 0.0);
        assert_eq!(record.speed_category, None);
    }

    #[test]
    fn below_threshold_is_not_high_confidence() {
        let mut obs = observation();
        obs.state.uncertainty = 0.35;
        let record = DetailedRecord::from_observation(&obs, 0.7);
        assert_eq!(record.high_confidence, 0);
    }

    #[test]
    fn hotspot_record_uses_hotspot_precision() {
        let bin = HotspotBin {
            latitude: 10.000_000_000_2,
            longitude: -20.1,
            unique_subjects: 2,
            observation_count: 3,
            avg_uncertainty: 0.2,
            avg_confidence: 0.8,
            avg_speed_km_day: 20.005,
            avg_environment: observation().features.environment,
            foraging_intensity: 2.4000001,
            subject_diversity: 2.0 / 3.0,
        };
        let record = HotspotRecord::from(&bin);
        assert_eq!(record.latitude, 10.0);
        assert_eq!(record.foraging_intensity, 2.4);
        assert_eq!(record.shark_diversity, 0.667);
        assert_eq!(record.unique_sharks, 2);
    }
}
