use crate::workflow::runner::WorkflowResult;
use anyhow::Context;
use foragecore::export;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const FEATURES_FILE: &str = "features.csv";
pub const DETAILED_FILE: &str = "behavioral_states_detailed.csv";
pub const HOTSPOTS_FILE: &str = "foraging_hotspots.csv";
pub const SUMMARY_FILE: &str = "fit_summary.json";
pub const REPORT_FILE: &str = "run_report.log";

#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub features: PathBuf,
    pub detailed: PathBuf,
    pub hotspots: PathBuf,
    pub summary: PathBuf,
    pub report: PathBuf,
}

fn create(path: &Path) -> anyhow::Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}

/// Writes every artefact of a run into `dir`, creating it when needed.
pub fn write_outputs(
    dir: &Path,
    result: &WorkflowResult,
    high_confidence_threshold: f64,
) -> anyhow::Result<OutputPaths> {
    fs::create_dir_all(dir).with_context(|| format!("creating output dir {}", dir.display()))?;
    let paths = OutputPaths {
        features: dir.join(FEATURES_FILE),
        detailed: dir.join(DETAILED_FILE),
        hotspots: dir.join(HOTSPOTS_FILE),
        summary: dir.join(SUMMARY_FILE),
        report: dir.join(REPORT_FILE),
    };

    export::write_features(create(&paths.features)?, &result.features)
        .with_context(|| format!("writing {}", paths.features.display()))?;
    export::write_detailed(
        create(&paths.detailed)?,
        &result.inference.observations,
        high_confidence_threshold,
    )
    .with_context(|| format!("writing {}", paths.detailed.display()))?;
    export::write_hotspots(create(&paths.hotspots)?, &result.hotspots)
        .with_context(|| format!("writing {}", paths.hotspots.display()))?;
    export::write_summary(create(&paths.summary)?, &result.inference.summary)
        .with_context(|| format!("writing {}", paths.summary.display()))?;

    let mut report = create(&paths.report)?;
    for note in &result.notes {
        writeln!(report, "{}", note)?;
    }
    for event in &result.events {
        writeln!(report, "event: {}", event)?;
    }
    writeln!(
        report,
        "metrics: {}",
        serde_json::to_string(&result.metrics).context("encoding metrics")?
    )?;
    report.flush()?;

    Ok(paths)
}
