//! # BIC Grid Search
//!
//! Drives hyperparameter selection: for each candidate weight configuration,
//! invoke the external fitter and score the result with the BIC evaluator;
//! the caller picks the minimizer.
//!
//! Two grid semantics exist and the configuration chooses between them:
//!
//! - [`GridMode::Paired`] (canonical, the default): configuration `i` takes
//!   the i-th value of *each* of the four lists, which must therefore have
//!   equal lengths. All four weights move together along one axis.
//! - [`GridMode::Cartesian`]: the full cross product of the four lists.
//!
//! Configurations are mutually independent, so they are evaluated on a rayon
//! pool; each one fits under its own output label (`grid0`, `grid1`, ...) so
//! concurrent fitter invocations never collide on output files.

use crate::data::Dataset;
use crate::fitter::{Fitter, FitterError, RegWeights};
use crate::likelihood::{self, FitScore, LikelihoodError};
use itertools::Itertools;
use rayon::prelude::*;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridMode {
    #[default]
    Paired,
    Cartesian,
}

/// Candidate values for the four regularization weights.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridSpec {
    pub v: Vec<f64>,
    pub f: Vec<f64>,
    pub gamma: Vec<f64>,
    pub psi: Vec<f64>,
    #[serde(default)]
    pub mode: GridMode,
}

#[derive(Error, Debug)]
pub enum SelectionError {
    #[error(
        "Paired grids require equal-length value lists, got v={v}, f={f}, gamma={gamma}, psi={psi}"
    )]
    UnequalPairedLists {
        v: usize,
        f: usize,
        gamma: usize,
        psi: usize,
    },
    #[error("Grid contains no configurations")]
    EmptyGrid,
    #[error(transparent)]
    Fitter(#[from] FitterError),
    #[error(transparent)]
    Likelihood(#[from] LikelihoodError),
}

impl GridSpec {
    /// Expands the candidate lists into concrete weight configurations.
    pub fn configurations(&self) -> Result<Vec<RegWeights>, SelectionError> {
        let configs: Vec<RegWeights> = match self.mode {
            GridMode::Paired => {
                let len = self.v.len();
                if self.f.len() != len || self.gamma.len() != len || self.psi.len() != len {
                    return Err(SelectionError::UnequalPairedLists {
                        v: self.v.len(),
                        f: self.f.len(),
                        gamma: self.gamma.len(),
                        psi: self.psi.len(),
                    });
                }
                (0..len)
                    .map(|i| RegWeights {
                        v: self.v[i],
                        f: self.f[i],
                        gamma: self.gamma[i],
                        psi: self.psi[i],
                    })
                    .collect()
            }
            GridMode::Cartesian => [&self.v, &self.f, &self.gamma, &self.psi]
                .into_iter()
                .map(|axis| axis.iter().copied())
                .multi_cartesian_product()
                .map(|values| RegWeights {
                    v: values[0],
                    f: values[1],
                    gamma: values[2],
                    psi: values[3],
                })
                .collect(),
        };
        if configs.is_empty() {
            return Err(SelectionError::EmptyGrid);
        }
        Ok(configs)
    }
}

/// One evaluated grid configuration.
#[derive(Debug, Clone, Copy)]
pub struct GridPoint {
    pub weights: RegWeights,
    pub score: FitScore,
}

/// Fits and scores every configuration of the grid, in grid order.
pub fn grid_search<F: Fitter>(
    fitter: &F,
    observed: &Dataset,
    spec: &GridSpec,
) -> Result<Vec<GridPoint>, SelectionError> {
    let configs = spec.configurations()?;
    log::info!(
        "BIC grid search over {} configurations ({:?} mode)",
        configs.len(),
        spec.mode
    );

    configs
        .par_iter()
        .enumerate()
        .map(|(i, weights)| -> Result<GridPoint, SelectionError> {
            let params = fitter.fit(observed, weights, &format!("grid{i}"))?;
            let score = likelihood::bic(observed, &params, weights)?;
            log::info!(
                "grid{i}: weights {weights:?} -> BIC {:.4}, NLL {:.4}, dof {}",
                score.bic,
                score.nll,
                score.dof
            );
            Ok(GridPoint {
                weights: *weights,
                score,
            })
        })
        .collect()
}

/// The BIC-minimizing grid point, if any point has a finite BIC.
pub fn best(points: &[GridPoint]) -> Option<&GridPoint> {
    points
        .iter()
        .filter(|p| p.score.bic.is_finite())
        .min_by(|a, b| a.score.bic.total_cmp(&b.score.bic))
}
