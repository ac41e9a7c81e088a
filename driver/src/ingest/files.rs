use anyhow::{bail, Context};
use foragecore::export;
use foragecore::interface::{
    read_pings_csv, read_pings_json, CompositeFile, CompositeSummary, EddyStats, FeatureVector,
    Ping, SatelliteComposite, SshPass, SshPassFile,
};
use foragecore::prelude::DataQualityEvent;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

fn open(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(BufReader::new(file))
}

/// A single JSON file, or every `*.json` in a directory in name order.
fn json_files(path: &Path) -> anyhow::Result<Vec<PathBuf>> {
    if !path.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(path).with_context(|| format!("listing {}", path.display()))? {
        let entry = entry.with_context(|| format!("listing {}", path.display()))?;
        let candidate = entry.path();
        if candidate.is_file() && is_json(&candidate) {
            files.push(candidate);
        }
    }
    files.sort();
    Ok(files)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    serde_json::from_reader(open(path)?).with_context(|| format!("parsing {}", path.display()))
}

/// Track pings from CSV, or JSON when the extension says so.
pub fn load_pings(path: &Path) -> anyhow::Result<(Vec<Ping>, Vec<DataQualityEvent>)> {
    let reader = open(path)?;
    let loaded = if is_json(path) {
        read_pings_json(reader)
    } else {
        read_pings_csv(reader)
    };
    loaded.with_context(|| format!("reading tracks from {}", path.display()))
}

pub fn load_composites(path: &Path) -> anyhow::Result<Vec<CompositeSummary>> {
    let files = json_files(path)?;
    if files.is_empty() {
        bail!("no satellite composites found in {}", path.display());
    }
    files
        .iter()
        .map(|file| {
            let raw: CompositeFile = read_json(file)?;
            let composite = SatelliteComposite::try_from(raw)
                .with_context(|| format!("decoding composite {}", file.display()))?;
            log::info!(
                "composite {} loaded from {} ({} variables)",
                composite.date,
                file.display(),
                composite.variables.len()
            );
            Ok(composite.summarize())
        })
        .collect()
}

/// Eddy statistics from altimetry passes; defaults when none are given.
pub fn load_eddy_stats(path: Option<&Path>) -> anyhow::Result<EddyStats> {
    let Some(path) = path else {
        return Ok(EddyStats::default());
    };
    let passes = json_files(path)?
        .iter()
        .map(|file| {
            let raw: SshPassFile = read_json(file)?;
            SshPass::try_from(raw).with_context(|| format!("decoding ssh pass {}", file.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(EddyStats::from_passes(&passes))
}

pub fn load_features(path: &Path) -> anyhow::Result<Vec<FeatureVector>> {
    export::read_features(open(path)?)
        .with_context(|| format!("reading features from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn pings_load_from_csv_and_report_bad_rows() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"subject_id,timestamp,latitude,longitude\n\
              A,2024-01-01T00:00:00Z,10.0,20.0\n\
              A,2024-01-01T06:00:00Z,95.0,20.0\n",
        )
        .unwrap();
        let (pings, events) = load_pings(temp.path()).unwrap();
        assert_eq!(pings.len(), 1);
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn composites_load_from_a_directory() {
        let dir = tempdir().unwrap();
        for (name, date) in [("b.json", "2024-08-09"), ("a.json", "2024-08-01")] {
            fs::write(
                dir.path().join(name),
                format!(r#"{{"date": "{}", "variables": {{"chlor_a": [[0.2, null]]}}}}"#, date),
            )
            .unwrap();
        }
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let composites = load_composites(dir.path()).unwrap();
        assert_eq!(composites.len(), 2);
        assert_eq!(composites[0].date.to_string(), "2024-08-01");
    }

    #[test]
    fn empty_composite_directory_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(load_composites(dir.path()).is_err());
    }

    #[test]
    fn eddy_stats_default_without_passes() {
        assert_eq!(load_eddy_stats(None).unwrap(), EddyStats::default());
    }

    #[test]
    fn missing_track_file_names_the_path() {
        let err = load_pings(Path::new("/nonexistent/tracks.csv")).unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/tracks.csv"));
    }
}
