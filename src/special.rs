//! Special-function kernels for the spherical-cap basis.
//!
//! The model multiplies three factors per basis function: an exponentially
//! damped Laguerre polynomial in the scaled altitude, a Ferrers associated
//! Legendre function of non-integer degree in colatitude, and a normalized
//! sine/cosine in azimuth. Everything here is real-valued and restricted to
//! the parameter ranges the cap basis actually produces: integer order `m`
//! with |m| well below the degree, degree `v > 0`, and argument `x = cos θ`
//! inside the cap (so the hypergeometric series below is evaluated far from
//! its `x = -1` singularity and converges quickly).

use statrs::function::gamma::ln_gamma;

/// Series cutoff for the Gauss hypergeometric sum. The cap geometry keeps
/// `(1 - x)/2` small, so convergence is typically reached in well under
/// fifty terms; the cap bounds pathological inputs instead of spinning.
const HYP2F1_MAX_TERMS: usize = 500;

/// Ordinary Laguerre polynomial `L_k(z)` by the three-term recurrence.
#[inline]
pub fn laguerre(k: usize, z: f64) -> f64 {
    genlaguerre(k as i64, 0.0, z)
}

/// Generalized Laguerre polynomial `L_k^{(a)}(z)`.
///
/// Negative polynomial order is the empty polynomial (identically zero);
/// the radial-derivative formulas rely on this for `k = 0` and `k = 1`.
pub fn genlaguerre(k: i64, a: f64, z: f64) -> f64 {
    if k < 0 {
        return 0.0;
    }
    let mut prev = 1.0;
    if k == 0 {
        return prev;
    }
    let mut cur = 1.0 + a - z;
    for n in 1..k {
        let nf = n as f64;
        let next = ((2.0 * nf + 1.0 + a - z) * cur - (nf + a) * prev) / (nf + 1.0);
        prev = cur;
        cur = next;
    }
    cur
}

/// Gauss hypergeometric series `₂F₁(a, b; c; t)` by direct term summation.
///
/// Terminates early when `a` is a non-positive integer (the polynomial
/// case, which covers integer-degree Legendre functions exactly).
fn hyp2f1(a: f64, b: f64, c: f64, t: f64) -> f64 {
    let mut term = 1.0_f64;
    let mut sum = 1.0_f64;
    for j in 0..HYP2F1_MAX_TERMS {
        let jf = j as f64;
        term *= (a + jf) * (b + jf) / ((c + jf) * (jf + 1.0)) * t;
        if term == 0.0 {
            break;
        }
        sum += term;
        if term.abs() <= f64::EPSILON * sum.abs() {
            break;
        }
    }
    sum
}

/// `Γ(v + m + 1) / Γ(v - m + 1)` as an exact falling product.
///
/// The two arguments differ by the integer `2m`, so the ratio collapses to
/// `∏ (v - m + 1 + i)` and never touches the gamma function itself. This
/// stays finite for large `v` where the individual gammas overflow.
fn gamma_ratio(v: f64, m: i64) -> f64 {
    let mut ratio = 1.0;
    for i in 0..(2 * m) {
        ratio *= v - m as f64 + 1.0 + i as f64;
    }
    ratio
}

/// Ferrers associated Legendre function `P_v^m(x)` for integer order `m`
/// (either sign) and real non-negative degree `v`, with the Condon-Shortley
/// phase.
///
/// Evaluated through the hypergeometric representation
/// `P_v^m(x) = (-1)^m Γ(v+m+1)/(2^m m! Γ(v-m+1)) (1-x²)^{m/2}
///  ₂F₁(m-v, v+m+1; m+1; (1-x)/2)`
/// with the reflection `P_v^{-m} = (-1)^m Γ(v-m+1)/Γ(v+m+1) P_v^m` for
/// negative order. Arguments outside [-1, 1] produce NaN, which the design
/// matrix deliberately lets propagate.
pub fn lpmv(m: i64, v: f64, x: f64) -> f64 {
    if !x.is_finite() || x.abs() > 1.0 || !v.is_finite() {
        return f64::NAN;
    }
    if m < 0 {
        let mm = -m;
        let ratio = gamma_ratio(v, mm);
        if ratio == 0.0 {
            return f64::NAN;
        }
        let sign = if mm % 2 == 0 { 1.0 } else { -1.0 };
        return sign / ratio * lpmv(mm, v, x);
    }

    let mu = m as f64;
    let t = 0.5 * (1.0 - x);
    let series = hyp2f1(mu - v, v + mu + 1.0, mu + 1.0, t);

    let mut prefactor = gamma_ratio(v, m) / 2f64.powi(m as i32);
    for i in 1..=m {
        prefactor /= i as f64;
    }
    if m % 2 != 0 {
        prefactor = -prefactor;
    }

    prefactor * (1.0 - x * x).powf(0.5 * mu) * series
}

/// Spherical-cap harmonic normalization constant
/// `K_v^m = sqrt((2v+1)/(4π) · Γ(v-m+1)/Γ(v+m+1))`, doubled by `√2` for
/// `m ≠ 0`.
///
/// Computed in log-gamma space: the cap degrees `v` routinely reach the
/// range where `Γ(v+m+1)` itself overflows while the ratio is benign.
pub fn kvm(v: f64, m: i64) -> f64 {
    let m = m.unsigned_abs() as f64;
    let log_ratio = ln_gamma(v - m + 1.0) - ln_gamma(v + m + 1.0);
    let mut k = ((2.0 * v + 1.0) / (4.0 * std::f64::consts::PI)).sqrt() * (0.5 * log_ratio).exp();
    if m != 0.0 {
        k *= std::f64::consts::SQRT_2;
    }
    k
}
