//! # External Model Fitter Interface
//!
//! The CGGM estimation procedure is a black box behind the [`Fitter`] trait:
//! callers hand it the observed dataset plus four regularization weights and
//! get back the four sparse parameter matrices (or a failure). The production
//! implementation, [`ProcessFitter`], shells out to an external estimator
//! with a fixed positional argument contract and reads its four plain-text
//! output matrices. Tests substitute an in-process implementation.
//!
//! There is no retry, timeout or cancellation: a non-zero exit aborts the
//! caller, and a hung estimator blocks the run.

use crate::data::{Dataset, DataError, read_matrix, write_matrix};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// The four L1 regularization weights, one per parameter matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegWeights {
    /// Weight on the sum-model coupling matrix `V`.
    pub v: f64,
    /// Weight on the sum-model weight matrix `F`.
    pub f: f64,
    /// Weight on the difference-model precision matrix `Gamma`.
    pub gamma: f64,
    /// Weight on the difference-model coupling matrix `Psi`.
    pub psi: f64,
}

impl RegWeights {
    pub fn uniform(w: f64) -> Self {
        RegWeights {
            v: w,
            f: w,
            gamma: w,
            psi: w,
        }
    }
}

impl Default for RegWeights {
    /// The fixed per-round weights used inside the sampling loop.
    fn default() -> Self {
        RegWeights::uniform(0.01)
    }
}

/// The four fitted parameter matrices of the conditional Gaussian model.
#[derive(Debug, Clone)]
pub struct ModelParams {
    /// Sum-model weight matrix, p×q (genotype features × genes).
    pub f: Array2<f64>,
    /// Sum-model coupling matrix, q×q.
    pub v: Array2<f64>,
    /// Difference-model precision matrix, q×q.
    pub gamma: Array2<f64>,
    /// Difference-model coupling matrix, p×q.
    pub psi: Array2<f64>,
}

impl ModelParams {
    /// Validates the mutual shapes of the four matrices.
    pub fn new(
        f: Array2<f64>,
        v: Array2<f64>,
        gamma: Array2<f64>,
        psi: Array2<f64>,
    ) -> Result<Self, FitterError> {
        let q = v.nrows();
        let p = f.nrows();
        let expect = |name: &'static str, found: (usize, usize), expected: (usize, usize)| {
            if found == expected {
                Ok(())
            } else {
                Err(FitterError::ParameterShape {
                    name,
                    expected,
                    found,
                })
            }
        };
        expect("V", v.dim(), (q, q))?;
        expect("F", f.dim(), (p, q))?;
        expect("Gamma", gamma.dim(), (q, q))?;
        expect("Psi", psi.dim(), (p, q))?;
        Ok(Self { f, v, gamma, psi })
    }

    /// Loads `{prefix}F.txt`, `{prefix}V.txt`, `{prefix}Gamma.txt` and
    /// `{prefix}Psi.txt`, the file-name contract of the external estimator.
    pub fn load(prefix: &Path) -> Result<Self, FitterError> {
        let f = read_matrix(&suffixed(prefix, "F.txt"))?;
        let v = read_matrix(&suffixed(prefix, "V.txt"))?;
        let gamma = read_matrix(&suffixed(prefix, "Gamma.txt"))?;
        let psi = read_matrix(&suffixed(prefix, "Psi.txt"))?;
        Self::new(f, v, gamma, psi)
    }

    /// Effective degrees of freedom: finite nonzero entries across all four
    /// matrices. This is the `k` of the BIC complexity penalty.
    pub fn dof(&self) -> usize {
        crate::likelihood::nnz(self.f.view())
            + crate::likelihood::nnz(self.v.view())
            + crate::likelihood::nnz(self.gamma.view())
            + crate::likelihood::nnz(self.psi.view())
    }
}

/// Appends a file-name suffix directly onto a path prefix (no separator).
fn suffixed(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

#[derive(Error, Debug)]
pub enum FitterError {
    #[error("Failed to launch fitter '{program}': {source}")]
    Launch {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Fitter exited with {status}; stderr:\n{stderr}")]
    NonZeroExit { status: String, stderr: String },
    #[error("Fitter input/output data error: {0}")]
    Data(#[from] DataError),
    #[error("Fitter produced misshapen parameters: {name} is {found:?}, expected {expected:?}")]
    ParameterShape {
        name: &'static str,
        expected: (usize, usize),
        found: (usize, usize),
    },
}

/// The estimator abstraction: observed data + weights in, parameters out.
///
/// Implementations must be callable from rayon workers (grid-search
/// configurations run concurrently), hence the `Sync` bound. The `label`
/// distinguishes concurrent or successive invocations; implementations that
/// write files must key their outputs on it.
pub trait Fitter: Sync {
    fn fit(
        &self,
        observed: &Dataset,
        weights: &RegWeights,
        label: &str,
    ) -> Result<ModelParams, FitterError>;
}

/// Runs the external estimator as a blocking subprocess.
///
/// Positional argument contract, in order: cohort size `N`, gene count `q`,
/// genotype-feature count `p`, the five input matrix paths (Ysum, Ym, Yp,
/// Xm, Xp), an output path prefix, and the four weights as decimal strings
/// (V, F, Gamma, Psi). On success the estimator writes the four parameter
/// matrices next to the prefix.
pub struct ProcessFitter {
    program: PathBuf,
    workdir: PathBuf,
}

impl ProcessFitter {
    pub fn new(program: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        ProcessFitter {
            program: program.into(),
            workdir: workdir.into(),
        }
    }
}

impl Fitter for ProcessFitter {
    fn fit(
        &self,
        observed: &Dataset,
        weights: &RegWeights,
        label: &str,
    ) -> Result<ModelParams, FitterError> {
        std::fs::create_dir_all(&self.workdir).map_err(|e| FitterError::Launch {
            program: self.program.clone(),
            source: e,
        })?;

        let input = |name: &str| self.workdir.join(format!("{label}{name}.txt"));
        let f_ysum = input("Ysum");
        let f_ym = input("Ym");
        let f_yp = input("Yp");
        let f_xm = input("Xm");
        let f_xp = input("Xp");
        write_matrix(&f_ysum, observed.ysum.view())?;
        write_matrix(&f_ym, observed.ym.view())?;
        write_matrix(&f_yp, observed.yp.view())?;
        write_matrix(&f_xm, observed.xm.view())?;
        write_matrix(&f_xp, observed.xp.view())?;

        let prefix = self.workdir.join(label);
        log::info!(
            "Invoking fitter '{}' on {} individuals (label {label})",
            self.program.display(),
            observed.n_individuals()
        );

        let output = Command::new(&self.program)
            .arg(observed.n_individuals().to_string())
            .arg(observed.n_genes().to_string())
            .arg(observed.n_markers().to_string())
            .arg(&f_ysum)
            .arg(&f_ym)
            .arg(&f_yp)
            .arg(&f_xm)
            .arg(&f_xp)
            .arg(&prefix)
            .arg(weights.v.to_string())
            .arg(weights.f.to_string())
            .arg(weights.gamma.to_string())
            .arg(weights.psi.to_string())
            .output()
            .map_err(|e| FitterError::Launch {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(FitterError::NonZeroExit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        ModelParams::load(&prefix)
    }
}
