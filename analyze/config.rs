//! Run configuration, loaded from a YAML file.
//!
//! A minimal configuration names the three input files; analysis and
//! reporting parameters all carry defaults:
//!
//! ```yaml
//! files:
//!   clinical: data/clinical.tsv
//!   model: data/registry.toml
//!   genetic: data/cohort
//!   results: results
//! analysis_params:
//!   min_freq: 10
//!   required_vars: [severity, hospitalization, asymptomatic]
//!   p_threshold: 0.05
//! report_params:
//!   confidence_level: 0.95
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read configuration file '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse configuration file '{path}': {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("analysis_params.min_freq must be at least 1 (got {0})")]
    BadMinFreq(usize),
    #[error("analysis_params.required_vars must name at least one outcome column")]
    NoRequiredVars,
    #[error("analysis_params.p_threshold must lie in (0, 1] (got {0})")]
    BadPThreshold(f64),
    #[error("report_params.confidence_level must lie in (0, 1) (got {0})")]
    BadConfidenceLevel(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub files: FilesConfig,
    #[serde(default)]
    pub analysis_params: AnalysisParams,
    #[serde(default)]
    pub report_params: ReportParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Tab-separated clinical table with one row per sample.
    pub clinical: PathBuf,
    /// Serialized per-locus imputation model registry.
    pub model: PathBuf,
    /// PLINK fileset prefix; `<prefix>.bed/.bim/.fam` must all exist.
    pub genetic: PathBuf,
    /// Directory receiving per-locus statistics, imputation and report files.
    #[serde(default = "default_results_dir")]
    pub results: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisParams {
    /// Minimum carrier count an allele needs to be tested.
    #[serde(default = "default_min_freq")]
    pub min_freq: usize,
    /// Outcome columns a sample must have observed to enter analysis.
    /// The first listed variable is the outcome tested for association.
    #[serde(default = "default_required_vars")]
    pub required_vars: Vec<String>,
    /// Wald p-value cutoff for the report's significant-findings section.
    #[serde(default = "default_p_threshold")]
    pub p_threshold: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            min_freq: default_min_freq(),
            required_vars: default_required_vars(),
            p_threshold: default_p_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportParams {
    /// Coverage of the odds-ratio confidence intervals.
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
}

impl Default for ReportParams {
    fn default() -> Self {
        Self {
            confidence_level: default_confidence_level(),
        }
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_min_freq() -> usize {
    10
}

fn default_required_vars() -> Vec<String> {
    vec![
        "severity".to_string(),
        "hospitalization".to_string(),
        "asymptomatic".to_string(),
    ]
}

fn default_p_threshold() -> f64 {
    0.05
}

fn default_confidence_level() -> f64 {
    0.95
}

impl RunConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.analysis_params.min_freq < 1 {
            return Err(ConfigError::BadMinFreq(self.analysis_params.min_freq));
        }
        if self.analysis_params.required_vars.is_empty() {
            return Err(ConfigError::NoRequiredVars);
        }
        let p = self.analysis_params.p_threshold;
        if !(p > 0.0 && p <= 1.0) {
            return Err(ConfigError::BadPThreshold(p));
        }
        let level = self.report_params.confidence_level;
        if !(level > 0.0 && level < 1.0) {
            return Err(ConfigError::BadConfidenceLevel(level));
        }
        Ok(())
    }

    /// The outcome variable tested for association: the first required var.
    pub fn primary_outcome(&self) -> &str {
        &self.analysis_params.required_vars[0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(yaml: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let file = write_config(
            "files:\n  clinical: data/clinical.tsv\n  model: data/registry.toml\n  genetic: data/cohort\n",
        );
        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.files.results, PathBuf::from("results"));
        assert_eq!(config.analysis_params.min_freq, 10);
        assert_eq!(config.analysis_params.p_threshold, 0.05);
        assert_eq!(config.report_params.confidence_level, 0.95);
        assert_eq!(config.primary_outcome(), "severity");
        assert_eq!(
            config.analysis_params.required_vars,
            vec!["severity", "hospitalization", "asymptomatic"]
        );
    }

    #[test]
    fn explicit_values_override_defaults() {
        let file = write_config(
            "files:\n  clinical: c.tsv\n  model: m.toml\n  genetic: g\n  results: out\nanalysis_params:\n  min_freq: 5\n  required_vars: [hospitalization]\n  p_threshold: 0.01\nreport_params:\n  confidence_level: 0.9\n",
        );
        let config = RunConfig::load(file.path()).unwrap();
        assert_eq!(config.files.results, PathBuf::from("out"));
        assert_eq!(config.analysis_params.min_freq, 5);
        assert_eq!(config.primary_outcome(), "hospitalization");
        assert_eq!(config.report_params.confidence_level, 0.9);
    }

    #[test]
    fn rejects_empty_required_vars() {
        let file = write_config(
            "files:\n  clinical: c.tsv\n  model: m.toml\n  genetic: g\nanalysis_params:\n  required_vars: []\n",
        );
        assert!(matches!(
            RunConfig::load(file.path()),
            Err(ConfigError::NoRequiredVars)
        ));
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let file = write_config(
            "files:\n  clinical: c.tsv\n  model: m.toml\n  genetic: g\nanalysis_params:\n  p_threshold: 1.5\n",
        );
        assert!(matches!(
            RunConfig::load(file.path()),
            Err(ConfigError::BadPThreshold(_))
        ));

        let file = write_config(
            "files:\n  clinical: c.tsv\n  model: m.toml\n  genetic: g\nreport_params:\n  confidence_level: 1.0\n",
        );
        assert!(matches!(
            RunConfig::load(file.path()),
            Err(ConfigError::BadConfidenceLevel(_))
        ));
    }

    #[test]
    fn missing_file_is_unreadable() {
        assert!(matches!(
            RunConfig::load(Path::new("/nonexistent/config.yml")),
            Err(ConfigError::Unreadable { .. })
        ));
    }
}
