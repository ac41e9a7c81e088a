use crate::interface::{ConstrainedStep, DataQuality, MotionRow, SpeedFlag};
use crate::prelude::{
    DataQualityEvent, ProcessingStage, StageConfig, StageContext, StageError, StageMetadata,
    StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;

/// Typical cruising ceiling, km/day.
pub const TYPICAL_MAX: f64 = 10.0 * 24.0;
/// Sustained swimming ceiling, km/day.
pub const MAX_SUSTAINED: f64 = 20.0 * 24.0;
/// Species burst speed expressed per day, km/day.
pub const MAX_BURST: f64 = 74.0 * 24.0;
/// Longest plausible time spent at burst speed, hours.
pub const MAX_BURST_HOURS: f64 = 12.0;
/// Step length cap applied together with a burst-speed clamp, km.
pub const MAX_BURST_STEP: f64 = MAX_BURST / 24.0 * MAX_BURST_HOURS;

pub const SUSPICIOUS_STEP_KM: f64 = 200.0;
pub const POOR_STEP_KM: f64 = 500.0;

/// Result of bounding one speed/step pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constrained {
    pub speed_km_day: f64,
    pub step_length: f64,
    pub speed_flag: SpeedFlag,
    pub data_quality: DataQuality,
}

pub fn classify_speed(speed_km_day: f64) -> SpeedFlag {
    if speed_km_day >= MAX_BURST {
        SpeedFlag::Capped
    } else if speed_km_day > MAX_SUSTAINED {
        SpeedFlag::VeryHigh
    } else if speed_km_day > TYPICAL_MAX {
        SpeedFlag::High
    } else {
        SpeedFlag::Normal
    }
}

pub fn classify_step(step_length: f64) -> DataQuality {
    if step_length > POOR_STEP_KM {
        DataQuality::Poor
    } else if step_length > SUSPICIOUS_STEP_KM {
        DataQuality::Suspicious
    } else {
        DataQuality::Good
    }
}

/// Clamps speed into [0, MAX_BURST]. A speed that ends on the burst ceiling
/// also has its step capped so the pair stays consistent.
pub fn constrain(speed_km_day: f64, step_length: f64) -> Constrained {
    let raw_speed = if speed_km_day.is_finite() { speed_km_day } else { 0.0 };
    let speed = raw_speed.clamp(0.0, MAX_BURST);
    let step = if !step_length.is_finite() {
        0.0
    } else if speed >= MAX_BURST {
        step_length.min(MAX_BURST_STEP)
    } else {
        step_length
    };
    Constrained {
        speed_km_day: speed,
        step_length: step,
        speed_flag: classify_speed(raw_speed),
        data_quality: classify_step(step),
    }
}

/// Bounds physically implausible motion values and tags every row. Rows
/// are corrected, never dropped.
pub struct ConstraintStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl ConstraintStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new(),
        }
    }
}

impl Default for ConstraintStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for ConstraintStage {
    type Input = Vec<MotionRow>;
    type Output = Vec<ConstrainedStep>;

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(
        &mut self,
        input: Self::Input,
        ctx: &mut StageContext,
    ) -> StageResult<StageOutput<Self::Output>> {
        if self.config.is_none() {
            return Err(StageError::not_initialized("ConstraintStage"));
        }

        let mut metadata = StageMetadata::default();
        let mut rows = Vec::with_capacity(input.len());
        for mut motion in input {
            let bounded = constrain(motion.speed_km_day, motion.step_length);
            for (field, original, clamped) in [
                ("speed_km_day", motion.speed_km_day, bounded.speed_km_day),
                ("step_length", motion.step_length, bounded.step_length),
            ] {
                if original.to_bits() != clamped.to_bits() {
                    ctx.flag(
                        &mut metadata,
                        DataQualityEvent::ClampedValue {
                            subject_id: motion.subject_id.clone(),
                            timestamp: motion.timestamp,
                            field: field.into(),
                            original,
                            clamped,
                        },
                    );
                }
            }
            motion.speed_km_day = bounded.speed_km_day;
            motion.step_length = bounded.step_length;
            rows.push(ConstrainedStep {
                motion,
                speed_flag: bounded.speed_flag,
                data_quality: bounded.data_quality,
            });
        }

        let capped = rows
            .iter()
            .filter(|r| r.speed_flag == SpeedFlag::Capped)
            .count();
        let poor = rows
            .iter()
            .filter(|r| r.data_quality == DataQuality::Poor)
            .count();
        let note = format!(
            "ConstraintStage rows {} capped {} poor {}",
            rows.len(),
            capped,
            poor
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::geo::LatLon;
    use chrono::{TimeZone, Utc};

    #[test]
    fn burst_speed_is_clamped_and_capped() {
        let bounded = constrain(3000.0, 750.0);
        assert_eq!(bounded.speed_km_day, 1776.0);
        assert_eq!(bounded.speed_flag, SpeedFlag::Capped);
        assert_eq!(bounded.step_length, 750.0);

        let long_step = constrain(3000.0, 1200.0);
        assert_eq!(long_step.step_length, 888.0);
        assert_eq!(long_step.data_quality, DataQuality::Poor);
    }

    #[test]
    fn speed_categories_follow_thresholds() {
        assert_eq!(constrain(100.0, 25.0).speed_flag, SpeedFlag::Normal);
        assert_eq!(constrain(240.0, 60.0).speed_flag, SpeedFlag::Normal);
        assert_eq!(constrain(300.0, 75.0).speed_flag, SpeedFlag::High);
        assert_eq!(constrain(600.0, 150.0).speed_flag, SpeedFlag::VeryHigh);
        assert_eq!(constrain(1776.0, 150.0).speed_flag, SpeedFlag::Capped);
    }

    #[test]
    fn data_quality_follows_step_thresholds() {
        assert_eq!(constrain(10.0, 150.0).data_quality, DataQuality::Good);
        assert_eq!(constrain(10.0, 350.0).data_quality, DataQuality::Suspicious);
        assert_eq!(constrain(10.0, 650.0).data_quality, DataQuality::Poor);
    }

    #[test]
    fn negative_and_nan_speeds_become_zero() {
        assert_eq!(constrain(-5.0, 1.0).speed_km_day, 0.0);
        assert_eq!(constrain(f64::NAN, 1.0).speed_km_day, 0.0);
    }

    #[test]
    fn stage_keeps_every_row_and_reports_clamps() {
        let mut stage = ConstraintStage::new();
        stage.initialize(&StageConfig::default()).unwrap();
        let mut ctx = StageContext::seeded(0);
        let timestamp = Utc.with_ymd_and_hms(2024, 2, 1, 6, 0, 0).unwrap();
        let row = |speed: f64, step: f64| MotionRow {
            subject_id: "s".into(),
            timestamp,
            position: LatLon::new(0.0, 0.0),
            step_length: step,
            turning_angle: None,
            speed_km_day: speed,
            elapsed_hours: 6.0,
        };

        let output = stage
            .execute(vec![row(3000.0, 1000.0), row(40.0, 10.0)], &mut ctx)
            .unwrap();
        assert_eq!(output.records.len(), 2);
        assert_eq!(output.records[0].motion.speed_km_day, 1776.0);
        assert_eq!(output.records[0].motion.step_length, 888.0);
        assert_eq!(output.records[1].speed_flag, SpeedFlag::Normal);
        assert_eq!(output.metadata.events.len(), 2);
        assert_eq!(ctx.metrics.snapshot().clamped, 2);
        stage.cleanup();
    }
}
