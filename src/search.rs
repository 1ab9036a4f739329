//! Regularization-parameter selection.
//!
//! One scalar weight per regularization kind, found by one of four
//! interchangeable strategies behind a single contract. Parameters are
//! solved independently per kind with every other kind pinned to zero.
//! This is a known approximation, not a joint optimum: standard selection
//! criteria provide one condition per unknown, and the decoupled search is
//! the behavior downstream numeric expectations are calibrated against.
//!
//! A failed search is a record-scoped condition: the orchestrator receives
//! NaN for that kind, logs the cause, and disqualifies the record's fit.
//! Nothing here ever aborts the session.

use crate::penalty::{RegKind, RegMatrices};
use crate::solver::{RegParams, chi_squared, solve_coefficients};
use ndarray::{ArrayView1, ArrayView2, Axis};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::str::FromStr;
use thiserror::Error;

/// Strategy selector, one of the four configured search methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegMethod {
    Chi2,
    Gcv,
    Manual,
    Prompt,
}

impl RegMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegMethod::Chi2 => "chi2",
            RegMethod::Gcv => "gcv",
            RegMethod::Manual => "manual",
            RegMethod::Prompt => "prompt",
        }
    }
}

impl fmt::Display for RegMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "chi2" => Ok(RegMethod::Chi2),
            "gcv" => Ok(RegMethod::Gcv),
            "manual" => Ok(RegMethod::Manual),
            "prompt" => Ok(RegMethod::Prompt),
            other => Err(other.to_string()),
        }
    }
}

/// Record-scoped search failure. Recovered by substituting NaN for the
/// affected kind, which cascades to an all-NaN fit for the record.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("could not bracket a root of chi²-ν in (1e-100, 1)")]
    NoRoot,
    #[error("root refinement did not converge within {0} iterations")]
    RootIterations(usize),
    #[error("minimum of the GCV objective could not be found")]
    NoConvergence,
    #[error("no manual regularization parameter configured for kind {0}")]
    MissingManual(RegKind),
    #[error("failed to obtain regularization parameter interactively: {0}")]
    Prompt(String),
}

/// Pluggable source for interactively supplied parameters. Selected by
/// configuration only; automated pipelines simply never construct one.
pub trait ParamPrompt: Sync {
    fn ask(&self, kind: RegKind) -> Result<f64, SearchError>;
}

/// Blocking stdin implementation of [`ParamPrompt`].
pub struct StdinPrompt;

impl ParamPrompt for StdinPrompt {
    fn ask(&self, kind: RegKind) -> Result<f64, SearchError> {
        print!("Enter {kind} regularization parameter: ");
        std::io::stdout()
            .flush()
            .map_err(|e| SearchError::Prompt(e.to_string()))?;
        let mut line = String::new();
        std::io::stdin()
            .read_line(&mut line)
            .map_err(|e| SearchError::Prompt(e.to_string()))?;
        line.trim()
            .parse::<f64>()
            .map_err(|e| SearchError::Prompt(e.to_string()))
    }
}

/// The per-record parameter search: configured method, kind list, manual
/// constants, and an optional interactive source.
pub struct ParamSearch<'a> {
    pub method: RegMethod,
    pub kinds: &'a [RegKind],
    pub manual: &'a BTreeMap<RegKind, f64>,
    pub prompt: Option<&'a dyn ParamPrompt>,
}

impl ParamSearch<'_> {
    /// Find one parameter per configured kind. Per-kind failures are logged
    /// and mapped to NaN rather than propagated.
    pub fn find_reg_params(
        &self,
        a: ArrayView2<f64>,
        b: ArrayView1<f64>,
        w: ArrayView1<f64>,
        reg_matrices: &RegMatrices,
    ) -> RegParams {
        let mut out = RegParams::new();
        for &kind in self.kinds {
            match self.search_one(a, b, w, reg_matrices, kind) {
                Ok(p) => {
                    out.insert(kind, p);
                }
                Err(e) => {
                    log::warn!("[REG SEARCH] {kind}: {e}; substituting NaN for this record");
                    out.insert(kind, f64::NAN);
                }
            }
        }
        out
    }

    /// The single-strategy contract: one kind in, one parameter out.
    pub fn search_one(
        &self,
        a: ArrayView2<f64>,
        b: ArrayView1<f64>,
        w: ArrayView1<f64>,
        reg_matrices: &RegMatrices,
        kind: RegKind,
    ) -> Result<f64, SearchError> {
        match self.method {
            RegMethod::Chi2 => self.chi2_search(a, b, w, reg_matrices, kind),
            RegMethod::Gcv => self.gcv_search(a, b, w, reg_matrices, kind),
            RegMethod::Manual => self
                .manual
                .get(&kind)
                .copied()
                .ok_or(SearchError::MissingManual(kind)),
            RegMethod::Prompt => self
                .prompt
                .ok_or_else(|| {
                    SearchError::Prompt("no interactive parameter source configured".into())
                })?
                .ask(kind),
        }
    }

    /// Parameter map with `10^alpha` for the searched kind and zero for the
    /// rest; the searches are decoupled by construction.
    fn single_kind_params(&self, kind: RegKind, value: f64) -> RegParams {
        self.kinds
            .iter()
            .map(|&k| (k, if k == kind { value } else { 0.0 }))
            .collect()
    }

    /// `chi²(10^alpha) - ν`, the root-find objective. Solve failures map to
    /// NaN, which the bracketing logic treats as unusable.
    fn chi2_objective(
        &self,
        alpha: f64,
        a: ArrayView2<f64>,
        b: ArrayView1<f64>,
        w: ArrayView1<f64>,
        reg_matrices: &RegMatrices,
        nu: f64,
        kind: RegKind,
    ) -> f64 {
        let params = self.single_kind_params(kind, 10f64.powf(alpha));
        match solve_coefficients(a, b, w, reg_matrices, &params, false) {
            Ok((c, _)) => chi_squared(a, b, w, c.view()) - nu,
            Err(_) => f64::NAN,
        }
    }

    /// Root of `chi²(α) = ν` for one explicit target, searched in log10
    /// space. Brackets by stepping one decade at a time from α = 0 down to
    /// α = -100, then refines with Brent's method.
    fn chi2_root_for_target(
        &self,
        a: ArrayView2<f64>,
        b: ArrayView1<f64>,
        w: ArrayView1<f64>,
        reg_matrices: &RegMatrices,
        nu: f64,
        kind: RegKind,
    ) -> Result<Option<f64>, SearchError> {
        let mut alpha0 = 0.0;
        let mut val0 = 1.0;
        let mut alpha = 0.0;
        let mut val = self.chi2_objective(alpha, a, b, w, reg_matrices, nu, kind);
        if val < 0.0 {
            log::info!(
                "[REG SEARCH] {kind}: data too smooth to regularize (chi² < {nu:.1} unpenalized); returning 0"
            );
            return Ok(Some(0.0));
        }

        let mut bracket = false;
        while val0 * val > 0.0 {
            bracket = true;
            val0 = val;
            alpha0 = alpha;
            alpha -= 1.0;
            val = self.chi2_objective(alpha, a, b, w, reg_matrices, nu, kind);
            if alpha < -100.0 {
                bracket = false;
                break;
            }
        }
        if !bracket {
            return Ok(None);
        }
        let root = brentq(
            |x| self.chi2_objective(x, a, b, w, reg_matrices, nu, kind),
            alpha,
            alpha0,
            2e-12,
            100,
        )?;
        Ok(Some(10f64.powf(root)))
    }

    /// chi2 strategy: enforce `chi² = ν`, sweeping the target over
    /// `{0.6, …, 1.0}·N` until some target admits a sign-changing bracket.
    fn chi2_search(
        &self,
        a: ArrayView2<f64>,
        b: ArrayView1<f64>,
        w: ArrayView1<f64>,
        reg_matrices: &RegMatrices,
        kind: RegKind,
    ) -> Result<f64, SearchError> {
        const SCALE_FACTORS: [f64; 5] = [0.6, 0.7, 0.8, 0.9, 1.0];
        let n = b.len() as f64;
        for sf in SCALE_FACTORS {
            if let Some(param) = self.chi2_root_for_target(a, b, w, reg_matrices, n * sf, kind)? {
                return Ok(param);
            }
        }
        Err(SearchError::NoRoot)
    }

    /// Exact leave-one-out cross-validation score at `10^alpha`: drop each
    /// sample in turn, refit, and accumulate the weighted squared residual
    /// at the held-out point. The per-sample refits are independent and fan
    /// out across threads.
    fn gcv_objective(
        &self,
        alpha: f64,
        a: ArrayView2<f64>,
        b: ArrayView1<f64>,
        w: ArrayView1<f64>,
        reg_matrices: &RegMatrices,
        kind: RegKind,
    ) -> f64 {
        let params = self.single_kind_params(kind, 10f64.powf(alpha));
        let n = b.len();
        (0..n)
            .into_par_iter()
            .map(|i| {
                let keep: Vec<usize> = (0..n).filter(|&j| j != i).collect();
                let a_loo = a.select(Axis(0), &keep);
                let b_loo = b.select(Axis(0), &keep);
                let w_loo = w.select(Axis(0), &keep);
                match solve_coefficients(
                    a_loo.view(),
                    b_loo.view(),
                    w_loo.view(),
                    reg_matrices,
                    &params,
                    false,
                ) {
                    Ok((c, _)) => {
                        let r = a.row(i).dot(&c) - b[i];
                        r * r * w[i]
                    }
                    Err(_) => f64::NAN,
                }
            })
            .sum()
    }

    /// gcv strategy: minimize the leave-one-out score over log10 α with a
    /// derivative-free simplex from the fixed initial guess of -20.
    fn gcv_search(
        &self,
        a: ArrayView2<f64>,
        b: ArrayView1<f64>,
        w: ArrayView1<f64>,
        reg_matrices: &RegMatrices,
        kind: RegKind,
    ) -> Result<f64, SearchError> {
        let alpha = nelder_mead_1d(
            |x| {
                let score = self.gcv_objective(x, a, b, w, reg_matrices, kind);
                if score.is_nan() { f64::INFINITY } else { score }
            },
            -20.0,
            1e-4,
            1e-4,
            200,
        )?;
        Ok(10f64.powf(alpha))
    }
}

/// Brent's method for a root of `f` bracketed by `[xa, xb]`.
///
/// Combination of bisection, secant, and inverse quadratic interpolation;
/// requires a sign change over the bracket and fails cleanly if an
/// evaluation inside the bracket goes non-finite.
pub fn brentq<F: Fn(f64) -> f64>(
    f: F,
    xa: f64,
    xb: f64,
    xtol: f64,
    max_iter: usize,
) -> Result<f64, SearchError> {
    let mut a = xa;
    let mut b = xb;
    let mut fa = f(a);
    let mut fb = f(b);
    if !fa.is_finite() || !fb.is_finite() || fa * fb > 0.0 {
        return Err(SearchError::NoRoot);
    }
    if fa == 0.0 {
        return Ok(a);
    }
    if fb == 0.0 {
        return Ok(b);
    }

    let mut c = b;
    let mut fc = fb;
    let mut d = 0.0_f64;
    let mut e = 0.0_f64;

    for _ in 0..max_iter {
        if (fb > 0.0) == (fc > 0.0) {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            b = c;
            c = a;
            fa = fb;
            fb = fc;
            fc = fa;
        }
        let tol1 = 2.0 * f64::EPSILON * b.abs() + 0.5 * xtol;
        let xm = 0.5 * (c - b);
        if xm.abs() <= tol1 || fb == 0.0 {
            return Ok(b);
        }
        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // Attempt inverse quadratic interpolation (secant when a == c).
            let s = fb / fa;
            let (mut p, mut q);
            if a == c {
                p = 2.0 * xm * s;
                q = 1.0 - s;
            } else {
                let t = fa / fc;
                let r = fb / fc;
                p = s * (2.0 * xm * t * (t - r) - (b - a) * (r - 1.0));
                q = (t - 1.0) * (r - 1.0) * (s - 1.0);
            }
            if p > 0.0 {
                q = -q;
            }
            p = p.abs();
            let min1 = 3.0 * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if 2.0 * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }
        a = b;
        fa = fb;
        if d.abs() > tol1 {
            b += d;
        } else {
            b += tol1.copysign(xm);
        }
        fb = f(b);
        if !fb.is_finite() {
            return Err(SearchError::NoRoot);
        }
    }
    Err(SearchError::RootIterations(max_iter))
}

/// One-dimensional Nelder-Mead: a two-point simplex with reflection,
/// expansion, contraction, and shrink steps.
pub fn nelder_mead_1d<F: Fn(f64) -> f64>(
    f: F,
    x0: f64,
    xatol: f64,
    fatol: f64,
    max_iter: usize,
) -> Result<f64, SearchError> {
    let x1 = if x0 != 0.0 { 1.05 * x0 } else { 0.00025 };
    let mut simplex = [(x0, f(x0)), (x1, f(x1))];

    for _ in 0..max_iter {
        if simplex[0].1 > simplex[1].1 {
            simplex.swap(0, 1);
        }
        let (best, worst) = (simplex[0], simplex[1]);
        if (worst.0 - best.0).abs() <= xatol && (worst.1 - best.1).abs() <= fatol {
            return Ok(best.0);
        }

        let xr = best.0 + (best.0 - worst.0);
        let fr = f(xr);
        if fr < best.1 {
            // Reflection improved on the best point: try expanding further.
            let xe = best.0 + 2.0 * (best.0 - worst.0);
            let fe = f(xe);
            simplex[1] = if fe < fr { (xe, fe) } else { (xr, fr) };
        } else if fr < worst.1 {
            simplex[1] = (xr, fr);
        } else {
            // Contraction; with a two-point simplex the shrink step lands on
            // the same halved point, so the cases coincide.
            let xc = best.0 + 0.5 * (worst.0 - best.0);
            simplex[1] = (xc, f(xc));
        }
    }
    Err(SearchError::NoConvergence)
}
