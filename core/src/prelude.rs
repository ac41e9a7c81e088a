use crate::math::random::PipelineRng;
use crate::telemetry::{LogManager, MetricsRecorder};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid resampling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleConfig {
    /// When false, raw pings are featurized as they arrive.
    pub enabled: bool,
    /// Grid interval in days (0.25 = 6 hours).
    pub tstep_days: f64,
    /// Maximum distance between a grid point and its matched ping.
    pub tolerance_hours: f64,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tstep_days: 0.25,
            tolerance_hours: 3.0,
        }
    }
}

impl ResampleConfig {
    pub fn step_seconds(&self) -> i64 {
        (self.tstep_days * 86_400.0).round() as i64
    }

    pub fn tolerance_seconds(&self) -> i64 {
        (self.tolerance_hours * 3_600.0).round() as i64
    }
}

/// How a feature row picks the satellite composite it is fused with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DateMapping {
    /// Use the row's own UTC date and the closest composite to it.
    #[default]
    Nearest,
    /// Cycle through composite dates in row order. Useful when the tracks
    /// predate the satellite record entirely.
    Cyclic,
}

/// Mixture fit and decode parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub max_iterations: usize,
    /// Convergence threshold on the change of mean log-likelihood.
    pub tolerance: f64,
    /// Variance floor added to every diagonal entry.
    pub reg_covar: f64,
    /// Posterior redraw rate `1 / thinning`; `None` keeps the arg-max states.
    pub thinning: Option<u32>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            tolerance: 1e-4,
            reg_covar: 1e-6,
            thinning: Some(10),
        }
    }
}

/// Shared configuration for each processing stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub resample: ResampleConfig,
    /// Tracks with fewer observations are not featurized.
    pub min_track_observations: usize,
    pub date_mapping: DateMapping,
    pub inference: InferenceConfig,
    /// Hotspot cell size in degrees.
    pub hotspot_resolution_deg: f64,
    /// Confidence at or above which an assignment counts as high confidence.
    pub high_confidence_threshold: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            resample: ResampleConfig::default(),
            min_track_observations: 3,
            date_mapping: DateMapping::Nearest,
            inference: InferenceConfig::default(),
            hotspot_resolution_deg: 0.1,
            high_confidence_threshold: 0.7,
        }
    }
}

impl StageConfig {
    /// Rejects values no stage can work with.
    pub fn validate(&self) -> StageResult<()> {
        if self.resample.step_seconds() <= 0 {
            return Err(StageError::InvalidInput(format!(
                "resample.tstep_days must be positive, got {}",
                self.resample.tstep_days
            )));
        }
        if self.resample.tolerance_hours < 0.0 {
            return Err(StageError::InvalidInput(format!(
                "resample.tolerance_hours must not be negative, got {}",
                self.resample.tolerance_hours
            )));
        }
        if self.min_track_observations < 3 {
            return Err(StageError::InvalidInput(
                "min_track_observations must be at least 3".into(),
            ));
        }
        if self.inference.max_iterations == 0 {
            return Err(StageError::InvalidInput(
                "inference.max_iterations must be positive".into(),
            ));
        }
        if self.inference.thinning == Some(0) {
            return Err(StageError::InvalidInput(
                "inference.thinning must be at least 1 when set".into(),
            ));
        }
        if !(self.hotspot_resolution_deg > 0.0) {
            return Err(StageError::InvalidInput(
                "hotspot_resolution_deg must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Where a rejected input record sits in its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPosition {
    /// 1-based line of a text file, header included.
    Line(usize),
    /// 0-based element of a JSON array.
    Index(usize),
}

impl fmt::Display for RecordPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordPosition::Line(line) => write!(f, "line {}", line),
            RecordPosition::Index(index) => write!(f, "element {}", index),
        }
    }
}

/// Non-fatal data-quality findings. The affected unit is skipped or
/// corrected and the batch keeps going.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityEvent {
    InvalidRecord {
        position: RecordPosition,
        reason: String,
    },
    DuplicateTimestamps {
        subject_id: String,
        dropped: usize,
    },
    TrackTooShort {
        subject_id: String,
        stage: String,
        count: usize,
        minimum: usize,
    },
    UnmatchedGridPoints {
        subject_id: String,
        skipped: usize,
    },
    EmptyResample {
        subject_id: String,
    },
    VariableAbsent {
        date: NaiveDate,
        variable: String,
    },
    ClampedValue {
        subject_id: String,
        timestamp: DateTime<Utc>,
        field: String,
        original: f64,
        clamped: f64,
    },
    NoForagingObservations,
}

impl DataQualityEvent {
    /// Clamps are informational; everything else is a warning.
    pub fn is_notice(&self) -> bool {
        matches!(self, DataQualityEvent::ClampedValue { .. })
    }
}

impl fmt::Display for DataQualityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataQualityEvent::InvalidRecord { position, reason } => {
                write!(f, "record at {} rejected: {}", position, reason)
            }
            DataQualityEvent::DuplicateTimestamps {
                subject_id,
                dropped,
            } => write!(
                f,
                "subject {} had {} duplicate timestamps collapsed",
                subject_id, dropped
            ),
            DataQualityEvent::TrackTooShort {
                subject_id,
                stage,
                count,
                minimum,
            } => write!(
                f,
                "{}: subject {} skipped with {} points (needs {})",
                stage, subject_id, count, minimum
            ),
            DataQualityEvent::UnmatchedGridPoints {
                subject_id,
                skipped,
            } => write!(
                f,
                "subject {} skipped {} grid points without a ping in tolerance",
                subject_id, skipped
            ),
            DataQualityEvent::EmptyResample { subject_id } => {
                write!(f, "subject {} produced no resampled observations", subject_id)
            }
            DataQualityEvent::VariableAbsent { date, variable } => write!(
                f,
                "composite {} has no {}; using synthetic base value",
                date, variable
            ),
            DataQualityEvent::ClampedValue {
                subject_id,
                timestamp,
                field,
                original,
                clamped,
            } => write!(
                f,
                "subject {} at {}: {} {:.3} clamped to {:.3}",
                subject_id, timestamp, field, original, clamped
            ),
            DataQualityEvent::NoForagingObservations => {
                write!(f, "no foraging observations to aggregate")
            }
        }
    }
}

/// Metadata used for chaining stages and telemetry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageMetadata {
    pub notes: Vec<String>,
    pub events: Vec<DataQualityEvent>,
}

/// Output produced by each stage.
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub records: T,
    pub metadata: StageMetadata,
}

/// Per-run state threaded through every stage: the single random source
/// and the telemetry sinks.
pub struct StageContext {
    pub rng: PipelineRng,
    pub metrics: MetricsRecorder,
    logger: LogManager,
}

impl StageContext {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: PipelineRng::seeded(seed),
            metrics: MetricsRecorder::new(),
            logger: LogManager::new(),
        }
    }

    /// Logs and counts a data-quality event and attaches it to the stage metadata.
    pub fn flag(&self, metadata: &mut StageMetadata, event: DataQualityEvent) {
        self.logger.event(&event);
        self.metrics.record_event(&event);
        metadata.events.push(event);
    }
}

/// Common error type for stage execution.
#[derive(thiserror::Error, Debug)]
pub enum StageError {
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("model fit failed during {computation}: {detail}")]
    ModelFit { computation: String, detail: String },
    #[error("csv failure: {0}")]
    Csv(#[from] csv::Error),
    #[error("json failure: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal failure: {0}")]
    Internal(String),
}

impl StageError {
    pub fn model_fit(computation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ModelFit {
            computation: computation.into(),
            detail: detail.into(),
        }
    }

    pub fn not_initialized(stage: &str) -> Self {
        Self::Internal(format!("{} not initialized", stage))
    }
}

pub type StageResult<T> = Result<T, StageError>;

/// Trait describing the batch pipeline stages.
pub trait ProcessingStage {
    type Input;
    type Output;

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()>;
    fn execute(
        &mut self,
        input: Self::Input,
        ctx: &mut StageContext,
    ) -> StageResult<StageOutput<Self::Output>>;
    fn cleanup(&mut self);
}
