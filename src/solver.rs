//! The regularized weighted least-squares solve.
//!
//! Builds the penalized normal equations
//! `X = Aᵗ(W⊙A) + Σ_kind α_kind·Γ_kind`, `y = Aᵗ(W⊙b)` and solves `X·C = y`
//! through the SVD: with weak regularization `X` is routinely near-singular,
//! so a naive inverse is never formed. The optional covariance is the
//! sandwich estimator `dC = H·(AᵗWA)·Hᵗ` with `H = pinv(X)`, valid under the
//! linear-Gaussian approximation.
//!
//! The solver is deterministic and does no filtering: zero or non-finite
//! weights are an upstream contract violation, screened out by the record
//! filter before anything reaches this point.

use crate::linalg::{LinalgError, lstsq, pinv};
use crate::penalty::{RegKind, RegMatrices};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use std::collections::BTreeMap;

/// Scalar weights per regularization kind for one solve.
pub type RegParams = BTreeMap<RegKind, f64>;

/// Solve for the coefficient vector, and the covariance matrix when
/// requested.
pub fn solve_coefficients(
    a: ArrayView2<f64>,
    b: ArrayView1<f64>,
    w: ArrayView1<f64>,
    reg_matrices: &RegMatrices,
    reg_params: &RegParams,
    want_covariance: bool,
) -> Result<(Array1<f64>, Option<Array2<f64>>), LinalgError> {
    // W ⊙ A: scale each sample row by its inverse-variance weight.
    let mut wa = a.to_owned();
    for (mut row, &wi) in wa.rows_mut().into_iter().zip(w.iter()) {
        row.mapv_inplace(|v| v * wi);
    }
    let awa = a.t().dot(&wa);

    let wb = Array1::from_iter(b.iter().zip(w.iter()).map(|(&bi, &wi)| bi * wi));
    let y = a.t().dot(&wb);

    let mut x = awa.clone();
    for (kind, matrix) in reg_matrices {
        let alpha = reg_params.get(kind).copied().unwrap_or(0.0);
        if alpha != 0.0 {
            x.scaled_add(alpha, matrix);
        }
    }

    let c = lstsq(&x, &y)?;

    if !want_covariance {
        return Ok((c, None));
    }

    let h = pinv(&x)?;
    let dc = h.dot(&awa).dot(&h.t());
    Ok((c, Some(dc)))
}

/// Weighted residual sum of squares `Σ W·(A·C - b)²` of a solved fit.
pub fn chi_squared(
    a: ArrayView2<f64>,
    b: ArrayView1<f64>,
    w: ArrayView1<f64>,
    c: ArrayView1<f64>,
) -> f64 {
    let fitted = a.dot(&c);
    fitted
        .iter()
        .zip(b.iter())
        .zip(w.iter())
        .map(|((&f, &bi), &wi)| {
            let r = f - bi;
            r * r * wi
        })
        .sum()
}
