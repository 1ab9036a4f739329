//! Regularization matrices over the basis-function index space.
//!
//! Each supported penalty is an `nbasis × nbasis` matrix of integrals of
//! basis-function products over the model domain (scaled altitude up to a
//! configured ceiling, colatitude up to the cap limit, full azimuth). The
//! basis is separable, so every entry is a product of three one-dimensional
//! Gauss-Legendre panels. The matrices depend only on the basis
//! configuration, never on the data: they are computed once per session and
//! shared read-only across every record and every parameter-search
//! iteration, with the index-pair loop fanned out across threads.

use crate::model::CapBasis;
use crate::quadrature::GaussLegendre;
use crate::special::{genlaguerre, laguerre, lpmv};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Closed set of regularization kinds the fitting engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegKind {
    /// Second-order (vertical curvature) smoothing penalty, Ω.
    Curvature,
    /// Zeroth-order amplitude penalty, Ψ.
    ZerothOrder,
}

impl RegKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegKind::Curvature => "curvature",
            RegKind::ZerothOrder => "0thorder",
        }
    }
}

impl fmt::Display for RegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "curvature" => Ok(RegKind::Curvature),
            "0thorder" => Ok(RegKind::ZerothOrder),
            other => Err(other.to_string()),
        }
    }
}

/// Read-only map from regularization kind to its penalty matrix.
pub type RegMatrices = BTreeMap<RegKind, ndarray::Array2<f64>>;

/// Nodes per integration axis. The integrands are smooth products of
/// damped polynomials and low-order trigonometry, well inside the
/// spectral-convergence regime at this order.
const QUAD_POINTS: usize = 64;

/// Radial factor `Z_k(z) = e^{-z/2} L_k(z)`.
#[inline]
fn radial(k: usize, z: f64) -> f64 {
    (-0.5 * z).exp() * laguerre(k, z)
}

/// Second derivative of the radial factor:
/// `Z_k'' = e^{-z/2} (L_k/4 + L¹_{k-1} + L²_{k-2})`.
#[inline]
fn radial_dd(k: usize, z: f64) -> f64 {
    let ki = k as i64;
    (-0.5 * z).exp()
        * (0.25 * laguerre(k, z) + genlaguerre(ki - 1, 1.0, z) + genlaguerre(ki - 2, 2.0, z))
}

struct BasisTerm {
    k: usize,
    m: i64,
    v: f64,
}

fn basis_terms(basis: &CapBasis) -> Vec<BasisTerm> {
    (0..basis.nbasis())
        .map(|n| {
            let (k, l, m) = basis.basis_numbers(n);
            BasisTerm {
                k,
                m,
                v: basis.nu(l),
            }
        })
        .collect()
}

/// Evaluate the penalty matrix of one kind for the given basis over
/// `z ∈ [0, max_z]`.
pub fn eval_penalty_matrix(basis: &CapBasis, kind: RegKind, max_z: f64) -> ndarray::Array2<f64> {
    let terms = basis_terms(basis);
    let nb = terms.len();
    let z_rule = GaussLegendre::new(QUAD_POINTS);
    let t_rule = GaussLegendre::new(QUAD_POINTS);
    let p_rule = GaussLegendre::new(QUAD_POINTS);
    let two_pi = 2.0 * std::f64::consts::PI;
    let cap = basis.cap_lim();

    // Upper triangle only; the integrands are symmetric in the pair.
    let pairs: Vec<(usize, usize)> = (0..nb)
        .flat_map(|i| (i..nb).map(move |j| (i, j)))
        .collect();

    let entries: Vec<((usize, usize), f64)> = pairs
        .into_par_iter()
        .map(|(i, j)| {
            let (ti, tj) = (&terms[i], &terms[j]);
            let z_panel = match kind {
                RegKind::Curvature => {
                    z_rule.integrate(0.0, max_z, |z| radial_dd(ti.k, z) * radial_dd(tj.k, z))
                }
                RegKind::ZerothOrder => {
                    z_rule.integrate(0.0, max_z, |z| radial(ti.k, z) * radial(tj.k, z))
                }
            };
            let t_panel = t_rule.integrate(0.0, cap, |t| {
                lpmv(ti.m, ti.v, t.cos()) * lpmv(tj.m, tj.v, t.cos()) * t.sin()
            });
            let p_panel = p_rule.integrate(0.0, two_pi, |p| {
                CapBasis::az(ti.v, ti.m, p) * CapBasis::az(tj.v, tj.m, p)
            });
            ((i, j), z_panel * t_panel * p_panel)
        })
        .collect();

    let mut omega = ndarray::Array2::<f64>::zeros((nb, nb));
    for ((i, j), val) in entries {
        omega[[i, j]] = val;
        omega[[j, i]] = val;
    }
    omega
}

/// Evaluate every requested penalty matrix once for the session.
pub fn eval_penalty_matrices(basis: &CapBasis, kinds: &[RegKind], max_z: f64) -> RegMatrices {
    kinds
        .iter()
        .map(|&kind| (kind, eval_penalty_matrix(basis, kind, max_z)))
        .collect()
}
