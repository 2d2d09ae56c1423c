//! # Likelihood and BIC Evaluation
//!
//! Scores a fitted conditional Gaussian model against observed data. Each
//! individual contributes two component densities:
//!
//! - a *sum* density over total genotype and total expression, governed by
//!   the sum-model weight matrix `F` and coupling matrix `V` (a multivariate
//!   Gaussian form whose log-partition term involves `ln det V` and a
//!   quadratic form in `V⁻¹`);
//! - a *difference* density over parental-difference genotype and
//!   expression, restricted per individual to the genes with a finite ASE
//!   observation, governed by the diagonal of the precision matrix `Gamma`
//!   and the coupling matrix `Psi` restricted to that gene subset.
//!
//! Every density exists in both log space and exponential space and the two
//! must agree (`exp(log_density) == density` up to floating tolerance); this
//! is a contract of the module, verified in its tests.
//!
//! Numerical degeneracy: a zero or negative `det V` is detected and reported
//! as a fatal [`LikelihoodError`]. A positive but near-singular `V` is *not*
//! guarded against and silently produces extreme or non-finite values; this
//! is a known limitation, exercised in the tests below. Shape disagreement
//! between data and parameters is a programming error and panics.

use crate::data::Dataset;
use crate::fitter::{ModelParams, RegWeights};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::{Determinant, Inverse};
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LikelihoodError {
    #[error(
        "Sum-model coupling matrix is singular or not positive definite (det = {det:.6e}); \
         the log-density is undefined"
    )]
    NonPositiveDeterminant { det: f64 },
    #[error("Linear algebra failure in the likelihood computation: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

/// The BIC of a fitted model together with its ingredients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitScore {
    pub bic: f64,
    /// Penalized negative log-likelihood.
    pub nll: f64,
    /// Effective degrees of freedom (finite nonzero parameter entries).
    pub dof: usize,
}

/// Counts the finite nonzero entries of a matrix.
///
/// Sentinel (non-finite) entries are never counted as parameters.
pub fn nnz(m: ArrayView2<f64>) -> usize {
    m.iter().filter(|v| v.is_finite() && **v != 0.0).count()
}

/// Log-density of one individual's total expression given total genotype.
pub fn sum_log_density(
    ys: ArrayView1<f64>,
    xs: ArrayView1<f64>,
    v: ArrayView2<f64>,
    f: ArrayView2<f64>,
) -> Result<f64, LikelihoodError> {
    let q = v.nrows();
    assert_eq!(v.ncols(), q, "coupling matrix V must be square");
    assert_eq!(
        f.dim(),
        (xs.len(), q),
        "weight matrix F must be (markers x genes)"
    );
    assert_eq!(ys.len(), q, "total expression row length must match V");

    let det = v.det()?;
    if det <= 0.0 {
        return Err(LikelihoodError::NonPositiveDeterminant { det });
    }
    let v_inv = v.inv()?;
    // fx = Fᵀ xs, the gene-space image of the total genotype.
    let fx = f.t().dot(&xs);
    let c1 = (q as f64 / 2.0) * (2.0 * PI).ln();
    let c2 = -0.5 * det.ln();
    let c3 = -0.5 * fx.dot(&v_inv.dot(&fx));
    let quad = ys.dot(&v.dot(&ys)) - fx.dot(&ys);
    Ok(-0.5 * quad - (c1 + c2 + c3))
}

/// Exponential-space counterpart of [`sum_log_density`], computed without
/// going through log space so the two formulations check each other.
pub fn sum_density(
    ys: ArrayView1<f64>,
    xs: ArrayView1<f64>,
    v: ArrayView2<f64>,
    f: ArrayView2<f64>,
) -> Result<f64, LikelihoodError> {
    let q = v.nrows();
    let det = v.det()?;
    if det <= 0.0 {
        return Err(LikelihoodError::NonPositiveDeterminant { det });
    }
    let v_inv = v.inv()?;
    let fx = f.t().dot(&xs);
    let z = (2.0 * PI).powf(q as f64 / 2.0)
        * det.powf(-0.5)
        * (-0.5 * fx.dot(&v_inv.dot(&fx))).exp();
    let quad = ys.dot(&v.dot(&ys)) - fx.dot(&ys);
    Ok((-0.5 * quad).exp() / z)
}

/// Log-density of one individual's parental expression difference, restricted
/// to the genes with a finite ASE observation.
///
/// `gamma_diag` is the diagonal of `Gamma` on that subset and `psi` is
/// `Psi` restricted to those columns. An empty subset contributes zero.
pub fn diff_log_density(
    yd: ArrayView1<f64>,
    xd: ArrayView1<f64>,
    gamma_diag: ArrayView1<f64>,
    psi: ArrayView2<f64>,
) -> f64 {
    let qf = gamma_diag.len();
    assert_eq!(yd.len(), qf, "difference expression must match gene subset");
    assert_eq!(
        psi.dim(),
        (xd.len(), qf),
        "Psi restriction must be (markers x subset genes)"
    );

    // px = Ψᵀ xd on the restricted gene set.
    let px = psi.t().dot(&xd);
    let c1 = (qf as f64 / 2.0) * (2.0 * PI).ln();
    let c2 = -0.5 * gamma_diag.iter().map(|g| g.ln()).sum::<f64>();
    let c3 = -0.5
        * px.iter()
            .zip(gamma_diag.iter())
            .map(|(p, g)| p * p / g)
            .sum::<f64>();
    let quad = yd
        .iter()
        .zip(gamma_diag.iter())
        .map(|(y, g)| g * y * y)
        .sum::<f64>()
        - px.dot(&yd);
    -0.5 * quad - (c1 + c2 + c3)
}

/// Exponential-space counterpart of [`diff_log_density`].
pub fn diff_density(
    yd: ArrayView1<f64>,
    xd: ArrayView1<f64>,
    gamma_diag: ArrayView1<f64>,
    psi: ArrayView2<f64>,
) -> f64 {
    let qf = gamma_diag.len();
    let px = psi.t().dot(&xd);
    let z = (2.0 * PI).powf(qf as f64 / 2.0)
        * gamma_diag.iter().product::<f64>().powf(-0.5)
        * (-0.5
            * px.iter()
                .zip(gamma_diag.iter())
                .map(|(p, g)| p * p / g)
                .sum::<f64>())
        .exp();
    let quad = yd
        .iter()
        .zip(gamma_diag.iter())
        .map(|(y, g)| g * y * y)
        .sum::<f64>()
        - px.dot(&yd);
    (-0.5 * quad).exp() / z
}

/// Joint log-density of individual `i`: sum component plus difference
/// component on the genes where that individual has a finite ASE observation.
pub fn individual_log_density(
    data: &Dataset,
    params: &ModelParams,
    i: usize,
) -> Result<f64, LikelihoodError> {
    let xm = data.xm.row(i);
    let xp = data.xp.row(i);
    let xs = &xm + &xp;
    let xd = &xm - &xp;
    let ys = data.ysum.row(i);
    let yd_full = &data.ym.row(i) - &data.yp.row(i);

    let finite: Vec<usize> = yd_full
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .map(|(j, _)| j)
        .collect();
    let yd = Array1::from_iter(finite.iter().map(|&j| yd_full[j]));
    let gamma_diag = Array1::from_iter(finite.iter().map(|&j| params.gamma[[j, j]]));
    let psi_sub = params.psi.select(Axis(1), &finite);

    let sum_part = sum_log_density(ys, xs.view(), params.v.view(), params.f.view())?;
    let diff_part = diff_log_density(yd.view(), xd.view(), gamma_diag.view(), psi_sub.view());
    Ok(sum_part + diff_part)
}

fn l1(m: &Array2<f64>) -> f64 {
    m.iter().map(|v| v.abs()).sum()
}

/// Penalized negative log-likelihood of the model over a dataset:
/// `−Σᵢ log p(i)` plus the weighted L1 penalty on each parameter matrix.
pub fn neg_log_likelihood(
    data: &Dataset,
    params: &ModelParams,
    weights: &RegWeights,
) -> Result<f64, LikelihoodError> {
    assert_eq!(
        data.n_genes(),
        params.v.nrows(),
        "gene count of data and parameters must match"
    );
    assert_eq!(
        data.n_markers(),
        params.f.nrows(),
        "marker count of data and parameters must match"
    );

    let mut total = 0.0;
    for i in 0..data.n_individuals() {
        total += individual_log_density(data, params, i)?;
    }
    Ok(-total
        + weights.f * l1(&params.f)
        + weights.v * l1(&params.v)
        + weights.gamma * l1(&params.gamma)
        + weights.psi * l1(&params.psi))
}

/// BIC from its three ingredients: `dof · ln(n) + 2 · nll`.
pub fn bic_from_parts(dof: usize, n_individuals: usize, nll: f64) -> f64 {
    dof as f64 * (n_individuals as f64).ln() + 2.0 * nll
}

/// Scores a fitted model: penalized NLL, degrees of freedom, and BIC.
pub fn bic(
    data: &Dataset,
    params: &ModelParams,
    weights: &RegWeights,
) -> Result<FitScore, LikelihoodError> {
    let nll = neg_log_likelihood(data, params, weights)?;
    let dof = params.dof();
    Ok(FitScore {
        bic: bic_from_parts(dof, data.n_individuals(), nll),
        nll,
        dof,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn single_individual() -> (Dataset, ModelParams) {
        // One individual, two genes, one genotype feature. Gene 1 has no ASE
        // observation so the difference component is restricted to gene 0.
        let data = Dataset::new(
            array![[0.8, -0.3]],
            array![[0.5, f64::NAN]],
            array![[0.2, f64::NAN]],
            array![[1.0]],
            array![[0.0]],
        )
        .unwrap();
        let params = ModelParams::new(
            array![[0.4, -0.2]],
            array![[2.0, 0.3], [0.3, 1.5]],
            array![[1.2, 0.0], [0.0, 0.8]],
            array![[0.6, 0.0]],
        )
        .unwrap();
        (data, params)
    }

    #[test]
    fn nnz_ignores_zero_and_sentinel_entries() {
        let m = array![[0.0, 1.5, f64::NAN], [-2.0, 0.0, f64::INFINITY]];
        assert_eq!(nnz(m.view()), 2);
    }

    #[test]
    fn sum_density_agrees_with_its_log_form() {
        let ys = array![0.8, -0.3];
        let xs = array![1.0];
        let v = array![[2.0, 0.3], [0.3, 1.5]];
        let f = array![[0.4, -0.2]];
        let log_val = sum_log_density(ys.view(), xs.view(), v.view(), f.view()).unwrap();
        let lin_val = sum_density(ys.view(), xs.view(), v.view(), f.view()).unwrap();
        assert_abs_diff_eq!(log_val.exp(), lin_val, epsilon = 1e-8);
    }

    #[test]
    fn diff_density_agrees_with_its_log_form() {
        let yd = array![0.3, -0.1];
        let xd = array![1.0];
        let gamma_diag = array![1.2, 0.8];
        let psi = array![[0.6, -0.4]];
        let log_val = diff_log_density(yd.view(), xd.view(), gamma_diag.view(), psi.view());
        let lin_val = diff_density(yd.view(), xd.view(), gamma_diag.view(), psi.view());
        assert_abs_diff_eq!(log_val.exp(), lin_val, epsilon = 1e-8);
    }

    #[test]
    fn empty_ase_subset_contributes_nothing() {
        let yd = Array1::<f64>::zeros(0);
        let xd = array![1.0, -1.0];
        let gamma_diag = Array1::<f64>::zeros(0);
        let psi = Array2::<f64>::zeros((2, 0));
        assert_eq!(
            diff_log_density(yd.view(), xd.view(), gamma_diag.view(), psi.view()),
            0.0
        );
        assert_eq!(
            diff_density(yd.view(), xd.view(), gamma_diag.view(), psi.view()),
            1.0
        );
    }

    #[test]
    fn individual_log_density_restricts_to_finite_genes() {
        let (data, params) = single_individual();
        let joint = individual_log_density(&data, &params, 0).unwrap();

        let sum_part = sum_log_density(
            data.ysum.row(0),
            array![1.0].view(),
            params.v.view(),
            params.f.view(),
        )
        .unwrap();
        // Only gene 0 is heterozygous: yd = 0.5 - 0.2, Gamma_00 = 1.2.
        let diff_part = diff_log_density(
            array![0.3].view(),
            array![1.0].view(),
            array![1.2].view(),
            array![[0.6]].view(),
        );
        assert_abs_diff_eq!(joint, sum_part + diff_part, epsilon = 1e-12);
    }

    #[test]
    fn bic_matches_closed_form() {
        assert_eq!(
            bic_from_parts(5, 100, 50.0),
            5.0 * (100.0f64).ln() + 2.0 * 50.0
        );
    }

    #[test]
    fn penalty_adds_weighted_l1_norms() {
        let (data, params) = single_individual();
        let unpenalized = neg_log_likelihood(&data, &params, &RegWeights::uniform(0.0)).unwrap();
        let weights = RegWeights {
            v: 0.1,
            f: 0.2,
            gamma: 0.3,
            psi: 0.4,
        };
        let penalized = neg_log_likelihood(&data, &params, &weights).unwrap();
        let expected = 0.2 * (0.4 + 0.2)
            + 0.1 * (2.0 + 0.3 + 0.3 + 1.5)
            + 0.3 * (1.2 + 0.8)
            + 0.4 * 0.6;
        assert_abs_diff_eq!(penalized - unpenalized, expected, epsilon = 1e-12);
    }

    #[test]
    fn non_positive_determinant_is_a_fatal_error() {
        let ys = array![1.0, 1.0];
        let xs = array![1.0];
        // Indefinite coupling matrix: det = -1.
        let v = array![[0.0, 1.0], [1.0, 0.0]];
        let f = array![[0.0, 0.0]];
        match sum_log_density(ys.view(), xs.view(), v.view(), f.view()) {
            Err(LikelihoodError::NonPositiveDeterminant { det }) => assert!(det < 0.0),
            other => panic!("expected NonPositiveDeterminant, got {other:?}"),
        }
    }

    #[test]
    fn near_singular_matrix_is_not_guarded() {
        // Known limitation: det > 0 passes the check even when V is nearly
        // singular, so the quadratic form explodes instead of erroring.
        let ys = array![1.0, 1.0];
        let xs = array![1.0];
        let v = array![[1.0, 1.0], [1.0, 1.0 + 1e-12]];
        // F maps the genotype onto the near-null direction of V, so the
        // quadratic form in V^-1 blows up.
        let f = array![[0.5, -0.5]];
        let value = sum_log_density(ys.view(), xs.view(), v.view(), f.view()).unwrap();
        assert!(value.abs() > 1e6 || !value.is_finite());
    }

    #[test]
    #[should_panic(expected = "gene count")]
    fn mismatched_shapes_fail_fast() {
        let (data, _) = single_individual();
        let params = ModelParams::new(
            Array2::zeros((1, 3)),
            Array2::eye(3),
            Array2::eye(3),
            Array2::zeros((1, 3)),
        )
        .unwrap();
        let _ = neg_log_likelihood(&data, &params, &RegWeights::default());
    }
}
