use crate::generator::profile::GeneratorConfig;
use anyhow::Context;
use foragecore::prelude::StageConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SEED: u64 = 42;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("workflow config is missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),
    #[error("workflow config is invalid: {0}")]
    Invalid(String),
}

/// Where a run takes its rows from.
#[derive(Clone, Debug, PartialEq)]
pub enum InputSource {
    Files {
        tracks: PathBuf,
        composites: PathBuf,
        ssh_passes: Option<PathBuf>,
    },
    /// A feature CSV from an earlier run; only inference and export rerun.
    Features(PathBuf),
    Synthetic(GeneratorConfig),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Track CSV or JSON.
    pub tracks: Option<PathBuf>,
    /// A composite JSON file or a directory of them.
    pub composites: Option<PathBuf>,
    /// Optional altimetry pass JSON file or directory.
    pub ssh_passes: Option<PathBuf>,
    pub features: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub seed: Option<u64>,
    /// Present when the run should use generated data.
    pub synthetic: Option<GeneratorConfig>,
    pub stages: StageConfig,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    pub fn from_args(
        tracks: Option<PathBuf>,
        composites: Option<PathBuf>,
        output_dir: Option<PathBuf>,
        seed: Option<u64>,
    ) -> Self {
        Self {
            tracks,
            composites,
            output_dir,
            seed,
            ..Default::default()
        }
    }

    /// Command-line values win over the file.
    pub fn merge(mut self, overrides: WorkflowConfig) -> Self {
        self.tracks = overrides.tracks.or(self.tracks);
        self.composites = overrides.composites.or(self.composites);
        self.ssh_passes = overrides.ssh_passes.or(self.ssh_passes);
        self.features = overrides.features.or(self.features);
        self.output_dir = overrides.output_dir.or(self.output_dir);
        self.seed = overrides.seed.or(self.seed);
        self.synthetic = overrides.synthetic.or(self.synthetic);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed.unwrap_or(DEFAULT_SEED)
    }

    /// Every missing field is reported at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut missing = Vec::new();
        if self.output_dir.is_none() {
            missing.push("output_dir".to_string());
        }
        if self.synthetic.is_none() && self.features.is_none() {
            if self.tracks.is_none() {
                missing.push("tracks".to_string());
            }
            if self.composites.is_none() {
                missing.push("composites".to_string());
            }
        }
        if !missing.is_empty() {
            return Err(ConfigError::MissingFields(missing));
        }
        self.stages
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    pub fn input_source(&self) -> Result<InputSource, ConfigError> {
        self.validate()?;
        if let Some(generator) = &self.synthetic {
            return Ok(InputSource::Synthetic(generator.clone()));
        }
        if let Some(features) = &self.features {
            return Ok(InputSource::Features(features.clone()));
        }
        match (&self.tracks, &self.composites) {
            (Some(tracks), Some(composites)) => Ok(InputSource::Files {
                tracks: tracks.clone(),
                composites: composites.clone(),
                ssh_passes: self.ssh_passes.clone(),
            }),
            _ => Err(ConfigError::MissingFields(vec![
                "tracks".into(),
                "composites".into(),
            ])),
        }
    }

    pub fn output_dir(&self) -> Result<&Path, ConfigError> {
        self.output_dir
            .as_deref()
            .ok_or_else(|| ConfigError::MissingFields(vec!["output_dir".into()]))
    }

    pub fn to_stage_config(&self) -> StageConfig {
        self.stages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foragecore::prelude::DateMapping;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_from_args_produces_stage_config() {
        let cfg = WorkflowConfig::from_args(
            Some("tracks.csv".into()),
            Some("composites".into()),
            Some("out".into()),
            None,
        );
        assert_eq!(cfg.seed(), DEFAULT_SEED);
        assert_eq!(cfg.to_stage_config(), StageConfig::default());
        assert!(matches!(cfg.input_source(), Ok(InputSource::Files { .. })));
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"tracks: data/tracks.csv\ncomposites: data/pace\noutput_dir: out\nseed: 9\n\
              stages:\n  date_mapping: cyclic\n  inference:\n    thinning: null\n  resample:\n    tstep_days: 0.5\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.seed(), 9);
        assert_eq!(cfg.stages.date_mapping, DateMapping::Cyclic);
        assert_eq!(cfg.stages.inference.thinning, None);
        assert_eq!(cfg.stages.inference.max_iterations, 5000);
        assert_eq!(cfg.stages.resample.step_seconds(), 12 * 3600);
        assert_eq!(cfg.stages.resample.tolerance_hours, 3.0);
    }

    #[test]
    fn validate_lists_every_missing_field() {
        let err = WorkflowConfig::default().validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingFields(vec![
                "output_dir".into(),
                "tracks".into(),
                "composites".into()
            ])
        );
        assert!(err.to_string().contains("output_dir, tracks, composites"));
    }

    #[test]
    fn synthetic_runs_need_only_an_output_dir() {
        let cfg = WorkflowConfig {
            output_dir: Some("out".into()),
            synthetic: Some(GeneratorConfig::default()),
            ..Default::default()
        };
        assert!(matches!(cfg.input_source(), Ok(InputSource::Synthetic(_))));
    }

    #[test]
    fn command_line_overrides_file_values() {
        let file = WorkflowConfig::from_args(Some("a.csv".into()), Some("c".into()), Some("out".into()), Some(1));
        let cli = WorkflowConfig::from_args(Some("b.csv".into()), None, None, None);
        let merged = file.merge(cli);
        assert_eq!(merged.tracks, Some(PathBuf::from("b.csv")));
        assert_eq!(merged.seed(), 1);
    }

    #[test]
    fn invalid_stage_values_are_rejected() {
        let mut cfg = WorkflowConfig::from_args(Some("a.csv".into()), Some("c".into()), Some("out".into()), None);
        cfg.stages.hotspot_resolution_deg = 0.0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }
}
