use crate::math::geo::LatLon;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Semantic label of a fitted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Behavior {
    Foraging,
    Migrating,
}

impl Behavior {
    pub fn name(&self) -> &'static str {
        match self {
            Behavior::Foraging => "Foraging",
            Behavior::Migrating => "Migrating",
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Constraint-filter tag on the speed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedFlag {
    Normal,
    High,
    VeryHigh,
    Capped,
}

/// Constraint-filter tag on the step length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Good,
    Suspicious,
    Poor,
}

/// Export bucket of the speed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedCategory {
    Low,
    Medium,
    High,
    #[serde(rename = "Very_High")]
    VeryHigh,
}

impl SpeedCategory {
    /// Right-inclusive bins over (0, 50], (50, 150], (150, 300], (300, 2000]
    /// km/day. A stationary row (speed 0) and anything above the last edge
    /// have no category.
    pub const EDGES: [f64; 5] = [0.0, 50.0, 150.0, 300.0, 2000.0];

    pub fn from_speed(speed_km_day: f64) -> Option<Self> {
        const BUCKETS: [SpeedCategory; 4] = [
            SpeedCategory::Low,
            SpeedCategory::Medium,
            SpeedCategory::High,
            SpeedCategory::VeryHigh,
        ];
        if !speed_km_day.is_finite() || speed_km_day <= Self::EDGES[0] {
            return None;
        }
        Self::EDGES[1..]
            .iter()
            .position(|&upper| speed_km_day <= upper)
            .map(|idx| BUCKETS[idx])
    }
}

/// Inclusive physical bounds of an environmental covariate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }
}

/// Fused ocean covariates for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalSample {
    /// Chlorophyll-a, mg/m³.
    pub chlor_a: f64,
    /// Phytoplankton carbon, mg/m³.
    pub carbon_phyto: f64,
    /// Particulate organic carbon, mg/m³.
    pub poc: f64,
    /// Sea-surface temperature, °C.
    pub sst: f64,
    /// Bathymetry, metres (negative below sea level).
    pub water_depth: f64,
    /// Eddy speed, m/s.
    pub eddy_speed: f64,
}

impl EnvironmentalSample {
    pub const CHLOR_A_BOUNDS: Bounds = Bounds::new(0.05, 5.0);
    pub const CARBON_PHYTO_BOUNDS: Bounds = Bounds::new(5.0, 300.0);
    pub const POC_BOUNDS: Bounds = Bounds::new(20.0, 500.0);
    pub const SST_BOUNDS: Bounds = Bounds::new(10.0, 32.0);
    pub const WATER_DEPTH_BOUNDS: Bounds = Bounds::new(-6000.0, -10.0);
    pub const EDDY_SPEED_BOUNDS: Bounds = Bounds::new(0.0, 2.0);

    pub fn clamped(self) -> Self {
        Self {
            chlor_a: Self::CHLOR_A_BOUNDS.clamp(self.chlor_a),
            carbon_phyto: Self::CARBON_PHYTO_BOUNDS.clamp(self.carbon_phyto),
            poc: Self::POC_BOUNDS.clamp(self.poc),
            sst: Self::SST_BOUNDS.clamp(self.sst),
            water_depth: Self::WATER_DEPTH_BOUNDS.clamp(self.water_depth),
            eddy_speed: Self::EDDY_SPEED_BOUNDS.clamp(self.eddy_speed),
        }
    }
}

/// Motion values for one observation, before constraints are applied.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionRow {
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
    pub position: LatLon,
    pub step_length: f64,
    /// Missing on the second observation of a track and after stationary legs.
    pub turning_angle: Option<f64>,
    pub speed_km_day: f64,
    pub elapsed_hours: f64,
}

/// Motion row after the constraint filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstrainedStep {
    pub motion: MotionRow,
    pub speed_flag: SpeedFlag,
    pub data_quality: DataQuality,
}

/// Motion and environment values of one observation, the inference input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
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
    pub environment: EnvironmentalSample,
}

/// Decoded state of one observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateAssignment {
    pub predicted_state: usize,
    pub posteriors: [f64; 2],
    /// `1 - max(posteriors)`.
    pub uncertainty: f64,
    pub behavior: Behavior,
}

impl StateAssignment {
    pub fn confidence(&self) -> f64 {
        1.0 - self.uncertainty
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedObservation {
    pub features: FeatureVector,
    pub state: StateAssignment,
}

/// Foraging activity aggregated over one spatial cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotspotBin {
    /// Cell centre.
    pub latitude: f64,
    pub longitude: f64,
    pub unique_subjects: usize,
    pub observation_count: usize,
    pub avg_uncertainty: f64,
    pub avg_confidence: f64,
    pub avg_speed_km_day: f64,
    pub avg_environment: EnvironmentalSample,
    /// `observation_count × (1 - avg_uncertainty)`.
    pub foraging_intensity: f64,
    /// `unique_subjects / observation_count`.
    pub subject_diversity: f64,
}
