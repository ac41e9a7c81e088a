use crate::interface::{MotionRow, ObservationTrack};
use crate::math::geo::{haversine_km, speed_km_day, turning_angle};
use crate::prelude::{
    DataQualityEvent, ProcessingStage, StageConfig, StageContext, StageError, StageMetadata,
    StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;

/// Derives step length, turning angle and speed from consecutive
/// observations of each track.
pub struct MotionStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl MotionStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new(),
        }
    }
}

impl Default for MotionStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Motion rows for one track. The first observation has no step and emits no
/// row; the second has a step but no turning angle.
pub fn track_motion(track: &ObservationTrack) -> Vec<MotionRow> {
    let obs = &track.observations;
    (1..obs.len())
        .map(|i| {
            let prev = &obs[i - 1];
            let curr = &obs[i];
            let step_length = haversine_km(prev.position, curr.position);
            let elapsed_hours =
                (curr.grid_time - prev.grid_time).num_milliseconds() as f64 / 3_600_000.0;
            let turn = if i >= 2 {
                turning_angle(obs[i - 2].position, prev.position, curr.position)
            } else {
                None
            };
            MotionRow {
                subject_id: track.subject_id.clone(),
                timestamp: curr.grid_time,
                position: curr.position,
                step_length,
                turning_angle: turn,
                speed_km_day: speed_km_day(step_length, elapsed_hours),
                elapsed_hours,
            }
        })
        .collect()
}

impl ProcessingStage for MotionStage {
    type Input = Vec<ObservationTrack>;
    type Output = Vec<MotionRow>;

    fn initialize(&mut self, config: &StageConfig) -> StageResult<()> {
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
            .ok_or_else(|| StageError::not_initialized("MotionStage"))?;

        let mut metadata = StageMetadata::default();
        let mut rows = Vec::new();
        for track in &input {
            if track.observations.len() < config.min_track_observations {
                ctx.flag(
                    &mut metadata,
                    DataQualityEvent::TrackTooShort {
                        subject_id: track.subject_id.clone(),
                        stage: "motion".into(),
                        count: track.observations.len(),
                        minimum: config.min_track_observations,
                    },
                );
                continue;
            }
            rows.extend(track_motion(track));
        }

        ctx.metrics.record_processed(rows.len());
        let missing_turns = rows.iter().filter(|r| r.turning_angle.is_none()).count();
        let note = format!(
            "MotionStage rows {} (turning angle missing on {})",
            rows.len(),
            missing_turns
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
