use crate::interface::{ObservationTrack, Ping, ResampledObservation, Track};
use crate::prelude::{
    DataQualityEvent, ProcessingStage, ResampleConfig, StageConfig, StageContext, StageError,
    StageMetadata, StageOutput, StageResult,
};
use crate::telemetry::log::LogManager;
use chrono::{DateTime, TimeZone, Utc};

/// Maps each subject's irregular pings onto a fixed-interval grid by
/// nearest-ping matching within a tolerance window.
pub struct ResampleStage {
    config: Option<StageConfig>,
    logger: LogManager,
}

impl ResampleStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new(),
        }
    }
}

impl Default for ResampleStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of resampling a single track.
#[derive(Debug, Clone, PartialEq)]
pub struct GridMatch {
    pub observations: Vec<ResampledObservation>,
    pub unmatched: usize,
}

/// Floors `seconds` to a multiple of `step` (works for pre-1970 times too).
fn floor_to_step(seconds: i64, step: i64) -> i64 {
    seconds.div_euclid(step) * step
}

/// Index of the ping closest in time to `target`; the earlier ping wins ties.
fn nearest_ping(pings: &[Ping], target: i64) -> Option<(usize, i64)> {
    let after = pings.partition_point(|p| p.timestamp.timestamp() < target);
    let candidates = [after.checked_sub(1), Some(after)];
    candidates
        .into_iter()
        .flatten()
        .filter(|&idx| idx < pings.len())
        .map(|idx| (idx, (pings[idx].timestamp.timestamp() - target).abs()))
        .fold(None, |best: Option<(usize, i64)>, candidate| match best {
            Some(current) if current.1 <= candidate.1 => Some(current),
            _ => Some(candidate),
        })
}

/// Resamples one time-sorted track. Tracks with fewer than two pings yield
/// nothing.
pub fn resample_track(track: &Track, config: &ResampleConfig) -> GridMatch {
    let step = config.step_seconds();
    let tolerance = config.tolerance_seconds();
    let (first, last) = match (track.pings.first(), track.pings.last()) {
        (Some(first), Some(last)) if track.pings.len() >= 2 && step > 0 => {
            (first.timestamp.timestamp(), last.timestamp.timestamp())
        }
        _ => {
            return GridMatch {
                observations: Vec::new(),
                unmatched: 0,
            }
        }
    };

    let mut observations = Vec::new();
    let mut unmatched = 0;
    let mut grid = floor_to_step(first, step);
    while grid <= last {
        match nearest_ping(&track.pings, grid) {
            Some((idx, delta)) if delta <= tolerance => {
                let ping = &track.pings[idx];
                if let Some(grid_time) = epoch_to_utc(grid) {
                    observations.push(ResampledObservation {
                        subject_id: track.subject_id.clone(),
                        grid_time,
                        ping_time: ping.timestamp,
                        position: ping.position,
                        offset_seconds: ping.timestamp.timestamp() - grid,
                    });
                }
            }
            _ => unmatched += 1,
        }
        grid += step;
    }

    GridMatch {
        observations,
        unmatched,
    }
}

fn epoch_to_utc(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}

/// Pings used as-is when resampling is switched off.
fn passthrough(track: &Track) -> Vec<ResampledObservation> {
    track
        .pings
        .iter()
        .map(|ping| ResampledObservation {
            subject_id: track.subject_id.clone(),
            grid_time: ping.timestamp,
            ping_time: ping.timestamp,
            position: ping.position,
            offset_seconds: 0,
        })
        .collect()
}

impl ProcessingStage for ResampleStage {
    type Input = Vec<Track>;
    type Output = Vec<ObservationTrack>;

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
            .ok_or_else(|| StageError::not_initialized("ResampleStage"))?;

        let mut metadata = StageMetadata::default();
        let mut tracks = Vec::with_capacity(input.len());
        let mut total = 0;

        for track in &input {
            if track.len() < 2 {
                ctx.flag(
                    &mut metadata,
                    DataQualityEvent::TrackTooShort {
                        subject_id: track.subject_id.clone(),
                        stage: "resample".into(),
                        count: track.len(),
                        minimum: 2,
                    },
                );
                continue;
            }

            let observations = if config.resample.enabled {
                let matched = resample_track(track, &config.resample);
                if matched.unmatched > 0 {
                    ctx.flag(
                        &mut metadata,
                        DataQualityEvent::UnmatchedGridPoints {
                            subject_id: track.subject_id.clone(),
                            skipped: matched.unmatched,
                        },
                    );
                }
                matched.observations
            } else {
                passthrough(track)
            };

            if observations.is_empty() {
                ctx.flag(
                    &mut metadata,
                    DataQualityEvent::EmptyResample {
                        subject_id: track.subject_id.clone(),
                    },
                );
                continue;
            }
            total += observations.len();
            tracks.push(ObservationTrack {
                subject_id: track.subject_id.clone(),
                observations,
            });
        }

        ctx.metrics.record_processed(total);
        let note = format!(
            "ResampleStage kept {} of {} subjects, {} observations",
            tracks.len(),
            input.len(),
            total
        );
        self.logger.record(&note);
        metadata.notes.push(note);

        Ok(StageOutput {
            records: tracks,
            metadata,
        })
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}
