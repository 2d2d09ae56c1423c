//! # Run Configuration
//!
//! Every entry point receives an explicit [`RunConfig`]; there is no
//! process-wide path or constant state. Configurations deserialize from TOML
//! with serde defaults, so a partial file only overrides what it names, and
//! CLI flags override the file in turn.

use crate::fitter::RegWeights;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not parse config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Parameters of an active-learning run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Fraction of the cohort observed before the first round.
    pub init_proportion: f64,
    /// Minimum finite-ASE observations per gene before it stops being needed.
    pub ase_threshold: usize,
    /// Maximum number of sampling rounds before the loop gives up.
    pub max_rounds: usize,
    /// Fixed regularization weights used for every per-round fit.
    pub fit_weights: RegWeights,
    /// Seed for the initial cohort split; `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Directory receiving per-round partition files and fitter outputs.
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            init_proportion: 0.05,
            ase_threshold: 65,
            max_rounds: 2,
            fit_weights: RegWeights::default(),
            seed: None,
            output_dir: PathBuf::from("active_learning"),
        }
    }
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: RunConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.init_proportion > 0.0 && self.init_proportion <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "init_proportion must lie in (0, 1], got {}",
                self.init_proportion
            )));
        }
        let w = &self.fit_weights;
        if [w.v, w.f, w.gamma, w.psi].iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(ConfigError::Invalid(format!(
                "regularization weights must be finite and non-negative, got {w:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let config = RunConfig::default();
        assert_eq!(config.init_proportion, 0.05);
        assert_eq!(config.ase_threshold, 65);
        assert_eq!(config.max_rounds, 2);
        assert_eq!(config.fit_weights, RegWeights::uniform(0.01));
    }

    #[test]
    fn partial_toml_only_overrides_named_fields() {
        let config: RunConfig =
            toml::from_str("ase_threshold = 10\nmax_rounds = 4\n").unwrap();
        assert_eq!(config.ase_threshold, 10);
        assert_eq!(config.max_rounds, 4);
        assert_eq!(config.init_proportion, 0.05);
    }

    #[test]
    fn negative_weight_is_rejected() {
        let config = RunConfig {
            fit_weights: RegWeights {
                v: -0.1,
                ..RegWeights::default()
            },
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn out_of_range_proportion_is_rejected() {
        let config = RunConfig {
            init_proportion: 0.0,
            ..RunConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
