use anyhow::Context;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use foragecore::interface::satellite::{GridRows, CARBON_PHYTO, CHLOR_A, POC};
use foragecore::interface::{CompositeFile, CompositeSummary, Ping, SatelliteComposite};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

const KM_PER_DEGREE: f64 = 111.195;

/// Configuration for generating synthetic tracks and composites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub subjects: usize,
    pub days: u32,
    pub start: DateTime<Utc>,
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    /// Mean spacing between pings.
    pub ping_interval_hours: f64,
    /// Uniform jitter applied to each spacing.
    pub interval_jitter_hours: f64,
    pub foraging_speed_km_day: f64,
    pub migrating_speed_km_day: f64,
    /// Pings per behavioural bout before switching.
    pub bout_length: usize,
    pub composites: usize,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            subjects: 4,
            days: 20,
            start: Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).single().unwrap_or_default(),
            origin_latitude: 25.5,
            origin_longitude: -79.0,
            ping_interval_hours: 4.0,
            interval_jitter_hours: 1.5,
            foraging_speed_km_day: 25.0,
            migrating_speed_km_day: 320.0,
            bout_length: 18,
            composites: 3,
            seed: 7,
        }
    }
}

/// Pings for every synthetic subject. Slow tortuous bouts alternate with
/// fast directed ones; spacing between pings is irregular.
pub fn build_tracks(config: &GeneratorConfig) -> anyhow::Result<Vec<Ping>> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let horizon = Duration::days(i64::from(config.days));
    let bout = config.bout_length.max(1);
    let mut pings = Vec::new();

    for subject in 0..config.subjects {
        let subject_id = format!("SYN-{:03}", subject + 1);
        let mut latitude = config.origin_latitude + rng.gen_range(-1.0..1.0);
        let mut longitude = config.origin_longitude + rng.gen_range(-1.0..1.0);
        let mut heading: f64 = rng.gen_range(0.0..2.0 * PI);
        let mut elapsed = Duration::minutes(rng.gen_range(0..120));
        let mut index = 0usize;

        while elapsed <= horizon {
            let timestamp = config
                .start
                .checked_add_signed(elapsed)
                .context("synthetic timestamp overflow")?;
            pings.push(Ping::new(subject_id.clone(), timestamp, latitude, longitude));

            let jitter = if config.interval_jitter_hours > 0.0 {
                rng.gen_range(-config.interval_jitter_hours..config.interval_jitter_hours)
            } else {
                0.0
            };
            let hours = (config.ping_interval_hours + jitter).max(0.25);
            let migrating = (index / bout) % 2 == 1;
            let speed = if migrating {
                heading += rng.gen_range(-0.1..0.1);
                config.migrating_speed_km_day * rng.gen_range(0.85..1.15)
            } else {
                heading = rng.gen_range(0.0..2.0 * PI);
                config.foraging_speed_km_day * rng.gen_range(0.3..1.7)
            };
            let distance = speed * hours / 24.0;
            latitude = (latitude + distance * heading.cos() / KM_PER_DEGREE).clamp(-89.0, 89.0);
            longitude += distance * heading.sin() / (KM_PER_DEGREE * latitude.to_radians().cos());
            longitude = (longitude + 540.0).rem_euclid(360.0) - 180.0;

            elapsed = elapsed + Duration::seconds((hours * 3600.0).round() as i64);
            index += 1;
        }
    }
    Ok(pings)
}

/// 4x4 grid around `mean` with a cloud-masked corner.
fn grid(rng: &mut StdRng, mean: f64, spread: f64) -> GridRows {
    (0..4)
        .map(|row| {
            (0..4)
                .map(|col| {
                    (row + col > 0).then(|| (mean + rng.gen_range(-spread..spread)).max(0.0))
                })
                .collect()
        })
        .collect()
}

/// One composite per requested date, spread over the track period. The
/// last one lacks particulate organic carbon when more than one is built.
pub fn build_composite_files(config: &GeneratorConfig) -> anyhow::Result<Vec<CompositeFile>> {
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let count = config.composites.max(1);
    let spacing = i64::from(config.days.max(1)) / count as i64;
    let first: NaiveDate = config.start.date_naive();

    (0..count)
        .map(|idx| {
            let date = first
                .checked_add_signed(Duration::days(spacing * idx as i64))
                .context("synthetic composite date overflow")?;
            let mut variables = BTreeMap::new();
            variables.insert(CHLOR_A.to_string(), grid(&mut rng, 0.3, 0.15));
            variables.insert(CARBON_PHYTO.to_string(), grid(&mut rng, 40.0, 10.0));
            if count == 1 || idx + 1 < count {
                variables.insert(POC.to_string(), grid(&mut rng, 100.0, 20.0));
            }
            Ok(CompositeFile { date, variables })
        })
        .collect()
}

pub fn build_composites(config: &GeneratorConfig) -> anyhow::Result<Vec<CompositeSummary>> {
    build_composite_files(config)?
        .into_iter()
        .map(|file| {
            let date = file.date;
            let composite = SatelliteComposite::try_from(file)
                .with_context(|| format!("building synthetic composite {}", date))?;
            Ok(composite.summarize())
        })
        .collect()
}
