use crate::math::stats::StatsHelper;
use crate::prelude::{StageError, StageResult};
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CHLOR_A: &str = "chlor_a";
pub const CARBON_PHYTO: &str = "carbon_phyto";
pub const POC: &str = "poc";

/// Variables the environment fusion reads from each composite.
pub const FUSED_VARIABLES: [&str; 3] = [CHLOR_A, CARBON_PHYTO, POC];

/// Row-major grid as stored on disk; `null` marks a missing pixel.
pub type GridRows = Vec<Vec<Option<f64>>>;

/// On-disk shape of an extracted satellite composite. Coordinate grids and
/// other extra keys are ignored; only per-variable means are consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeFile {
    pub date: NaiveDate,
    #[serde(default)]
    pub variables: BTreeMap<String, GridRows>,
}

fn grid_to_array(name: &str, rows: &GridRows) -> StageResult<Array2<f64>> {
    let height = rows.len();
    let width = rows.first().map(Vec::len).unwrap_or(0);
    if let Some(bad) = rows.iter().position(|row| row.len() != width) {
        return Err(StageError::InvalidInput(format!(
            "grid {} row {} has {} columns, expected {}",
            name,
            bad,
            rows[bad].len(),
            width
        )));
    }
    let flat: Vec<f64> = rows
        .iter()
        .flatten()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect();
    Array2::from_shape_vec((height, width), flat)
        .map_err(|err| StageError::InvalidInput(format!("grid {}: {}", name, err)))
}

/// A satellite composite keyed by date, with its named 2-D variables.
#[derive(Debug, Clone, PartialEq)]
pub struct SatelliteComposite {
    pub date: NaiveDate,
    pub variables: BTreeMap<String, Array2<f64>>,
}

impl SatelliteComposite {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            variables: BTreeMap::new(),
        }
    }

    pub fn with_variable(mut self, name: &str, values: Array2<f64>) -> Self {
        self.variables.insert(name.to_string(), values);
        self
    }

    /// Reduces every variable to its NaN-ignoring mean. Spatial co-location is
    /// approximated by this batch statistic.
    pub fn summarize(&self) -> CompositeSummary {
        CompositeSummary {
            date: self.date,
            means: self
                .variables
                .iter()
                .map(|(name, values)| (name.clone(), StatsHelper::nanmean(values.iter())))
                .collect(),
        }
    }
}

impl TryFrom<CompositeFile> for SatelliteComposite {
    type Error = StageError;

    fn try_from(file: CompositeFile) -> StageResult<Self> {
        let variables = file
            .variables
            .iter()
            .map(|(name, rows)| Ok((name.clone(), grid_to_array(name, rows)?)))
            .collect::<StageResult<BTreeMap<_, _>>>()?;
        Ok(Self {
            date: file.date,
            variables,
        })
    }
}

/// Outcome of looking up a variable in a composite summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariableMean {
    Absent,
    NoFiniteValues,
    Mean(f64),
}

/// Scalar statistics of one composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeSummary {
    pub date: NaiveDate,
    pub means: BTreeMap<String, Option<f64>>,
}

impl CompositeSummary {
    pub fn variable(&self, name: &str) -> VariableMean {
        match self.means.get(name) {
            None => VariableMean::Absent,
            Some(None) => VariableMean::NoFiniteValues,
            Some(Some(mean)) => VariableMean::Mean(*mean),
        }
    }
}

/// On-disk shape of one altimetry pass. Only `ssh` feeds the eddy
/// statistics; anomaly grids are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SshPassFile {
    pub ssh: GridRows,
}

/// Sea-surface-height samples of one altimetry pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SshPass {
    pub ssh: Array2<f64>,
}

impl TryFrom<SshPassFile> for SshPass {
    type Error = StageError;

    fn try_from(file: SshPassFile) -> StageResult<Self> {
        Ok(Self {
            ssh: grid_to_array("ssh", &file.ssh)?,
        })
    }
}

/// Global eddy statistics feeding the synthetic eddy-speed covariate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EddyStats {
    pub mean_eddy_intensity: f64,
    pub std_eddy_intensity: f64,
    pub ssh_variability: f64,
}

impl Default for EddyStats {
    fn default() -> Self {
        Self {
            mean_eddy_intensity: 0.3,
            std_eddy_intensity: 0.15,
            ssh_variability: 0.1,
        }
    }
}

impl EddyStats {
    /// Eddy intensity per pass is 0.1 × the SSH standard deviation; passes
    /// without finite SSH are ignored. Falls back to the defaults when no
    /// pass is usable.
    pub fn from_passes(passes: &[SshPass]) -> Self {
        let per_pass: Vec<(f64, f64)> = passes
            .iter()
            .filter_map(|pass| {
                let std = StatsHelper::nanstd(pass.ssh.iter().collect::<Vec<_>>())?;
                Some((std * 0.1, std))
            })
            .collect();
        if per_pass.is_empty() {
            return Self::default();
        }
        let intensities: Vec<f64> = per_pass.iter().map(|(i, _)| *i).collect();
        let stds: Vec<f64> = per_pass.iter().map(|(_, s)| *s).collect();
        Self {
            mean_eddy_intensity: StatsHelper::nanmean(&intensities).unwrap_or(0.3),
            std_eddy_intensity: StatsHelper::nanstd(&intensities).unwrap_or(0.15),
            ssh_variability: StatsHelper::nanmean(&stds).unwrap_or(0.1),
        }
    }
}
