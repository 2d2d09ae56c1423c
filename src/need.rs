//! # Need Evaluation
//!
//! Decides, from freshly fitted model parameters and the observed partition,
//! which genes still lack sufficient allele-specific expression data.
//!
//! The fitted parameters are first reassembled into the effect matrices of
//! the underlying model: `omega = V − Gamma`, `pi = 2·Psi`, and `xi`, a copy
//! of `F` with entries zeroed wherever `pi` is nonzero. The derivation works
//! on explicit copies and never writes through to the caller's parameter
//! matrices. A gene with an all-zero column in both `xi` and `pi` has no
//! predicted genetic effect and is never "needed"; any other gene is needed
//! when fewer than `threshold` observed individuals carry a finite ASE
//! observation for it.

use crate::fitter::ModelParams;
use ndarray::{Array2, ArrayView2, Zip};

/// Effect matrices derived from the fitted parameters.
#[derive(Debug, Clone)]
pub struct EffectMatrices {
    /// Expression-network precision, `V − Gamma` (q×q).
    pub omega: Array2<f64>,
    /// Total-expression eQTL effects, `F` masked where `pi` acts (p×q).
    pub xi: Array2<f64>,
    /// ASE eQTL effects, `2·Psi` (p×q).
    pub pi: Array2<f64>,
}

/// Reassembles the effect matrices from fitted parameters.
///
/// The inputs are read-only; `xi` is built on a copy of `F`.
pub fn derive_effects(params: &ModelParams) -> EffectMatrices {
    let omega = &params.v - &params.gamma;
    let pi = params.psi.mapv(|x| 2.0 * x);
    let mut xi = params.f.clone();
    Zip::from(&mut xi).and(&pi).for_each(|x, &p| {
        if p != 0.0 {
            *x = 0.0;
        }
    });
    EffectMatrices { omega, xi, pi }
}

/// Number of observed individuals with a finite ASE observation, per gene.
///
/// Precondition: maternal and paternal finiteness masks must agree
/// elementwise; a mismatch indicates corrupted input and panics.
pub fn ase_counts(ym: ArrayView2<f64>, yp: ArrayView2<f64>) -> Vec<usize> {
    assert_eq!(
        ym.dim(),
        yp.dim(),
        "maternal and paternal expression matrices must be the same shape"
    );
    let (n, q) = ym.dim();
    let mut counts = vec![0usize; q];
    for gene in 0..q {
        for row in 0..n {
            let m_finite = ym[[row, gene]].is_finite();
            assert_eq!(
                m_finite,
                yp[[row, gene]].is_finite(),
                "maternal and paternal allele-specific expression do not match \
                 (individual {row}, gene {gene})"
            );
            if m_finite {
                counts[gene] += 1;
            }
        }
    }
    counts
}

/// Returns the genes that need more ASE observations, in ascending order.
///
/// `ym`/`yp` are the observed partition's expression matrices. A gene is
/// skipped when both `xi` and `pi` predict no effect for it; otherwise it is
/// needed when its finite-ASE count is below `threshold`.
pub fn determine_needed_genes(
    ym: ArrayView2<f64>,
    yp: ArrayView2<f64>,
    xi: &Array2<f64>,
    pi: &Array2<f64>,
    threshold: usize,
) -> Vec<usize> {
    let q = ym.ncols();
    assert_eq!(xi.ncols(), q, "xi must have one column per gene");
    assert_eq!(pi.ncols(), q, "pi must have one column per gene");

    let counts = ase_counts(ym, yp);
    let mut needed = Vec::new();
    for gene in 0..q {
        let has_effect = xi.column(gene).iter().any(|&v| v != 0.0)
            || pi.column(gene).iter().any(|&v| v != 0.0);
        if !has_effect {
            continue;
        }
        if counts[gene] < threshold {
            needed.push(gene);
        }
    }
    needed
}
