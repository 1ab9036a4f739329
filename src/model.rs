//! The 3-D analytic model: radial Laguerre functions crossed with
//! spherical-cap harmonics.
//!
//! A single basis index `n` decomposes into a radial order `k`, an angular
//! degree `l`, and an angular order `m`. The colatitude factor uses the
//! non-integer degree ν(l) of Thébault-style cap harmonics, because the data
//! footprint covers a polar cap rather than the full sphere. Model
//! coordinates are geocentric spherical, rotated so the data centroid sits
//! at the pole, with the radius rescaled to `z = 100·(r/RE - 1)` so the
//! altitude range lands near zero.

use crate::coords::{self, RE};
use crate::special::{genlaguerre, kvm, laguerre, lpmv};
use ndarray::{Array1, Array2, Array3, ArrayView1};
use serde::{Deserialize, Serialize};

/// Session-scoped expansion center: the pole the raw coordinates are rotated
/// onto. Computed once from the full coordinate grid and passed explicitly
/// into every transform, so the model itself stays stateless.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterPoint {
    /// Rotation angle: negative mean colatitude of the footprint (rad).
    pub theta0: f64,
    /// Mean azimuth of the footprint (rad).
    pub phi0: f64,
}

impl CenterPoint {
    /// Center of a footprint given its geocentric colatitude/azimuth arrays.
    pub fn from_spherical(theta: ArrayView1<f64>, phi: ArrayView1<f64>) -> Self {
        let n = theta.len().max(1) as f64;
        CenterPoint {
            theta0: -theta.sum() / n,
            phi0: phi.sum() / n,
        }
    }

    /// Rotation axis in the equatorial plane, perpendicular to the center
    /// azimuth.
    #[inline]
    fn rotation_axis(&self) -> [f64; 3] {
        let a = self.phi0 + std::f64::consts::FRAC_PI_2;
        [a.cos(), a.sin(), 0.0]
    }
}

/// Coordinates in the model frame: scaled altitude `z`, colatitude, azimuth.
#[derive(Debug, Clone)]
pub struct ModelCoords {
    pub z: Array1<f64>,
    pub theta: Array1<f64>,
    pub phi: Array1<f64>,
}

impl ModelCoords {
    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }
}

/// Model evaluation output: fitted values, and optionally gradients and
/// delta-method variances when the covariance matrix is available.
#[derive(Debug, Clone)]
pub struct ModelEval {
    pub value: Array1<f64>,
    pub gradient: Option<Array2<f64>>,
    pub value_var: Option<Array1<f64>>,
    pub gradient_var: Option<Array2<f64>>,
}

/// Basis configuration: `maxk` radial orders × `maxl`² angular terms over a
/// polar cap of half-width `cap_lim`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapBasis {
    maxk: usize,
    maxl: usize,
    /// Cap half-width in radians.
    cap_lim: f64,
}

impl CapBasis {
    /// Build a basis from the configured orders and cap half-width in
    /// degrees (the configuration surface speaks degrees; everything
    /// internal is radians).
    pub fn new(maxk: usize, maxl: usize, cap_lim_deg: f64) -> Self {
        CapBasis {
            maxk,
            maxl,
            cap_lim: cap_lim_deg.to_radians(),
        }
    }

    pub fn maxk(&self) -> usize {
        self.maxk
    }

    pub fn maxl(&self) -> usize {
        self.maxl
    }

    /// Cap half-width (radians).
    pub fn cap_lim(&self) -> f64 {
        self.cap_lim
    }

    /// Total number of 3-D basis functions.
    pub fn nbasis(&self) -> usize {
        self.maxk * self.maxl * self.maxl
    }

    /// Decompose a flat basis index into `(k, l, m)`.
    ///
    /// `k = n div L²`, `l = floor(sqrt(n mod L²))`, `m = (n mod L²) - l(l+1)`;
    /// the inverse is `n = k·L² + l(l+1) + m`, an exact bijection.
    pub fn basis_numbers(&self, n: usize) -> (usize, usize, i64) {
        let l2 = self.maxl * self.maxl;
        let k = n / l2;
        let r = n % l2;
        let mut l = (r as f64).sqrt() as usize;
        // Guard the float sqrt at perfect squares.
        while (l + 1) * (l + 1) <= r {
            l += 1;
        }
        while l * l > r {
            l -= 1;
        }
        let m = r as i64 - (l * (l + 1)) as i64;
        (k, l, m)
    }

    /// Non-integer degree ν(l) of the cap harmonics (Thébault et al., 2006
    /// approximation): `ν = (2l + 0.5)·π/(2·cap_lim) - 0.5`.
    pub fn nu(&self, l: usize) -> f64 {
        (2.0 * l as f64 + 0.5) * std::f64::consts::PI / (2.0 * self.cap_lim) - 0.5
    }

    /// Azimuthal factor: `K_v^m sin(|m|φ)` for negative order, `K_v^m cos(|m|φ)`
    /// otherwise.
    pub fn az(v: f64, m: i64, phi: f64) -> f64 {
        let ma = m.abs() as f64;
        if m < 0 {
            kvm(v, m) * (ma * phi).sin()
        } else {
            kvm(v, m) * (ma * phi).cos()
        }
    }

    /// Derivative of the azimuthal factor with respect to φ.
    pub fn daz(v: f64, m: i64, phi: f64) -> f64 {
        let ma = m.abs() as f64;
        if m < 0 {
            ma * kvm(v, m) * (ma * phi).cos()
        } else {
            -ma * kvm(v, m) * (ma * phi).sin()
        }
    }

    /// Rotate geocentric spherical coordinates so the center point lands on
    /// the pole, and rescale the radius to the model's vertical coordinate.
    pub fn transform_coord(
        r: ArrayView1<f64>,
        theta: ArrayView1<f64>,
        phi: ArrayView1<f64>,
        cp: &CenterPoint,
    ) -> ModelCoords {
        let axis = cp.rotation_axis();
        let n = r.len();
        let mut z_t = Array1::<f64>::zeros(n);
        let mut theta_t = Array1::<f64>::zeros(n);
        let mut phi_t = Array1::<f64>::zeros(n);
        for i in 0..n {
            let cart = coords::spherical_to_cartesian(r[i], theta[i], phi[i]);
            let rot = coords::rodrigues_rotate(axis, cp.theta0, cart);
            let (rr, tt, pp) = coords::cartesian_to_spherical(rot);
            z_t[i] = 100.0 * (rr / RE - 1.0);
            theta_t[i] = tt;
            phi_t[i] = pp;
        }
        ModelCoords {
            z: z_t,
            theta: theta_t,
            phi: phi_t,
        }
    }

    /// Rotate vector components at model-frame positions back to the
    /// original geocentric frame. Needed to report fitted gradients in the
    /// coordinates the data came in.
    pub fn inverse_transform(rc: &ModelCoords, vec: &Array2<f64>, cp: &CenterPoint) -> Array2<f64> {
        let axis = cp.rotation_axis();
        let angle = -cp.theta0;
        let n = rc.len();
        let mut out = Array2::<f64>::zeros((n, 3));
        for i in 0..n {
            let r = (rc.z[i] / 100.0 + 1.0) * RE;
            let pos = coords::spherical_to_cartesian(r, rc.theta[i], rc.phi[i]);
            let v_cart = coords::vector_spherical_to_cartesian(
                [vec[[i, 0]], vec[[i, 1]], vec[[i, 2]]],
                rc.theta[i],
                rc.phi[i],
            );
            let pos_rot = coords::rodrigues_rotate(axis, angle, pos);
            let v_rot = coords::rodrigues_rotate(axis, angle, v_cart);
            let (_, tt, pp) = coords::cartesian_to_spherical(pos_rot);
            let v_sph = coords::vector_cartesian_to_spherical(v_rot, tt, pp);
            out[[i, 0]] = v_sph[0];
            out[[i, 1]] = v_sph[1];
            out[[i, 2]] = v_sph[2];
        }
        out
    }

    /// Evaluate every basis function at every model-frame point:
    /// `(npoints × nbasis)` design matrix. Non-finite coordinates propagate
    /// as NaN entries, surfaced downstream by the record filter.
    pub fn eval_basis(&self, rc: &ModelCoords) -> Array2<f64> {
        let npts = rc.len();
        let mut a = Array2::<f64>::zeros((npts, self.nbasis()));
        for n in 0..self.nbasis() {
            let (k, l, m) = self.basis_numbers(n);
            let v = self.nu(l);
            for i in 0..npts {
                let z = rc.z[i];
                a[[i, n]] = (-0.5 * z).exp()
                    * laguerre(k, z)
                    * Self::az(v, m, rc.phi[i])
                    * lpmv(m, v, rc.theta[i].cos());
            }
        }
        a
    }

    /// Evaluate the gradient of every basis function at every model-frame
    /// point: `(npoints × nbasis × 3)` with the vertical, colatitude, and
    /// azimuth components in physical units (per meter).
    pub fn eval_grad_basis(&self, rc: &ModelCoords) -> Array3<f64> {
        let npts = rc.len();
        let mut g = Array3::<f64>::zeros((npts, self.nbasis(), 3));
        for n in 0..self.nbasis() {
            let (k, l, m) = self.basis_numbers(n);
            let v = self.nu(l);
            let mf = m as f64;
            for i in 0..npts {
                let z = rc.z[i];
                let x = rc.theta[i].cos();
                let y = rc.theta[i].sin();
                let e = (-0.5 * z).exp();
                let l0 = laguerre(k, z);
                let l1 = genlaguerre(k as i64 - 1, 1.0, z);
                let p = lpmv(m, v, x);
                let p1 = lpmv(m, v + 1.0, x);
                let a = Self::az(v, m, rc.phi[i]);
                // Horizontal components carry the local radius of the shell.
                let r_inv = 1.0 / (y * (z / 100.0 + 1.0) * RE);
                g[[i, n, 0]] = -0.5 * e * (l0 + 2.0 * l1) * p * a * 100.0 / RE;
                g[[i, n, 1]] = e * l0 * (-(v + 1.0) * x * p + (v - mf + 1.0) * p1) * a * r_inv;
                g[[i, n, 2]] = e * l0 * p * Self::daz(v, m, rc.phi[i]) * r_inv;
            }
        }
        g
    }

    /// Design matrix for geodetic sample positions: transform into the model
    /// frame around `cp`, then evaluate the basis.
    pub fn basis(
        &self,
        cp: &CenterPoint,
        lat: ArrayView1<f64>,
        lon: ArrayView1<f64>,
        alt: ArrayView1<f64>,
    ) -> Array2<f64> {
        self.eval_basis(&self.model_coords(cp, lat, lon, alt))
    }

    /// Gradient design tensor for geodetic sample positions.
    pub fn basis_gradient(
        &self,
        cp: &CenterPoint,
        lat: ArrayView1<f64>,
        lon: ArrayView1<f64>,
        alt: ArrayView1<f64>,
    ) -> Array3<f64> {
        self.eval_grad_basis(&self.model_coords(cp, lat, lon, alt))
    }

    /// Geodetic positions to model-frame coordinates around `cp`.
    pub fn model_coords(
        &self,
        cp: &CenterPoint,
        lat: ArrayView1<f64>,
        lon: ArrayView1<f64>,
        alt: ArrayView1<f64>,
    ) -> ModelCoords {
        let n = lat.len();
        let mut r = Array1::<f64>::zeros(n);
        let mut theta = Array1::<f64>::zeros(n);
        let mut phi = Array1::<f64>::zeros(n);
        for i in 0..n {
            let (ri, ti, pi) = coords::geodetic_to_spherical(lat[i], lon[i], alt[i]);
            r[i] = ri;
            theta[i] = ti;
            phi[i] = pi;
        }
        Self::transform_coord(r.view(), theta.view(), phi.view(), cp)
    }

    /// Evaluate the fitted model at geocentric spherical positions.
    ///
    /// `value = A·C`; with `calcgrad` the gradient `Ag·C` is added, and with
    /// `calcerr` (and a covariance matrix) the delta-method variances
    /// `diag(A·dC·Aᵗ)` and their gradient counterparts.
    pub fn eval_model(
        &self,
        cp: &CenterPoint,
        r: ArrayView1<f64>,
        theta: ArrayView1<f64>,
        phi: ArrayView1<f64>,
        c: ArrayView1<f64>,
        dc: Option<&Array2<f64>>,
        calcgrad: bool,
        calcerr: bool,
    ) -> ModelEval {
        let rc = Self::transform_coord(r, theta, phi, cp);
        let a = self.eval_basis(&rc);
        let npts = rc.len();
        let nb = self.nbasis();
        let value = a.dot(&c);

        let ag = if calcgrad {
            Some(self.eval_grad_basis(&rc))
        } else {
            None
        };

        let gradient = ag.as_ref().map(|ag| {
            let mut grad = Array2::<f64>::zeros((npts, 3));
            for i in 0..npts {
                for d in 0..3 {
                    let mut acc = 0.0;
                    for n in 0..nb {
                        acc += ag[[i, n, d]] * c[n];
                    }
                    grad[[i, d]] = acc;
                }
            }
            grad
        });

        let (value_var, gradient_var) = if calcerr {
            match dc {
                None => {
                    log::debug!("[CAP MODEL] covariance not provided; skipping error propagation");
                    (None, None)
                }
                Some(dc) => {
                    let mut var = Array1::<f64>::zeros(npts);
                    for i in 0..npts {
                        let ai = a.row(i);
                        var[i] = ai.dot(&dc.dot(&ai));
                    }
                    let gvar = ag.as_ref().map(|ag| {
                        let mut gv = Array2::<f64>::zeros((npts, 3));
                        for i in 0..npts {
                            for d in 0..3 {
                                let mut acc = 0.0;
                                for n in 0..nb {
                                    for n2 in 0..nb {
                                        acc += ag[[i, n, d]] * dc[[n, n2]] * ag[[i, n2, d]];
                                    }
                                }
                                gv[[i, d]] = acc;
                            }
                        }
                        gv
                    });
                    (Some(var), gvar)
                }
            }
        } else {
            (None, None)
        };

        ModelEval {
            value,
            gradient,
            value_var,
            gradient_var,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn basis() -> CapBasis {
        CapBasis::new(3, 4, 40.0)
    }

    #[test]
    fn basis_index_bijection() {
        let b = basis();
        for n in 0..b.nbasis() {
            let (k, l, m) = b.basis_numbers(n);
            let rebuilt = k * b.maxl() * b.maxl() + l * (l + 1);
            let rebuilt = rebuilt as i64 + m;
            assert_eq!(rebuilt, n as i64, "index {n} does not survive the round trip");
        }
    }

    #[test]
    fn basis_sub_indices_stay_in_range() {
        let b = basis();
        for n in 0..b.nbasis() {
            let (k, l, m) = b.basis_numbers(n);
            assert!(k < b.maxk());
            assert!(l < b.maxl());
            assert!(m >= -(l as i64) && m <= l as i64);
        }
    }

    #[test]
    fn nu_is_integer_for_a_ninety_degree_cap() {
        // cap_lim = π/2 collapses ν(l) to the even integers 2l.
        let b = CapBasis::new(1, 4, 90.0);
        for l in 0..4 {
            assert_relative_eq!(b.nu(l), 2.0 * l as f64, max_relative = 1e-13);
        }
    }

    #[test]
    fn transform_sends_the_centroid_to_the_pole() {
        let r = array![RE + 300e3, RE + 300e3, RE + 300e3];
        let theta = array![0.18, 0.20, 0.22];
        let phi = array![0.95, 1.00, 1.05];
        let cp = CenterPoint::from_spherical(theta.view(), phi.view());
        let rc = CapBasis::transform_coord(r.view(), theta.view(), phi.view(), &cp);
        // The middle point is the centroid and should sit essentially at the
        // pole; the companions stay within the footprint spread of it.
        assert!(rc.theta[1] < 1e-10, "centroid colatitude {}", rc.theta[1]);
        assert!(rc.theta[0] < 0.1 && rc.theta[2] < 0.1);
        // Altitude scaling: 300 km is ~4.7 scaled units.
        for &z in rc.z.iter() {
            assert_relative_eq!(z, 100.0 * ((RE + 300e3) / RE - 1.0), max_relative = 1e-10);
        }
    }

    #[test]
    fn inverse_transform_round_trips_vector_components() {
        let r = array![RE + 250e3, RE + 350e3];
        let theta = array![0.21, 0.19];
        let phi = array![1.0, 1.1];
        let cp = CenterPoint::from_spherical(theta.view(), phi.view());
        let rc = CapBasis::transform_coord(r.view(), theta.view(), phi.view(), &cp);

        // A purely radial unit vector is invariant under the rotation.
        let vec = array![[1.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
        let back = CapBasis::inverse_transform(&rc, &vec, &cp);
        for i in 0..2 {
            assert_relative_eq!(back[[i, 0]], 1.0, max_relative = 1e-10);
            assert!(back[[i, 1]].abs() < 1e-10 && back[[i, 2]].abs() < 1e-10);
        }
    }

    #[test]
    fn first_basis_function_is_the_normalized_constant_column() {
        // n = 0 has k = l = m = 0: no z dependence beyond the damping, no
        // azimuth dependence, and P_ν^0 near the pole approaches 1 only for
        // integer ν; what matters here is column-wise consistency.
        let b = CapBasis::new(1, 1, 40.0);
        let rc = ModelCoords {
            z: array![0.0, 0.0],
            theta: array![0.01, 0.01],
            phi: array![0.3, 2.9],
        };
        let a = b.eval_basis(&rc);
        assert_eq!(a.dim(), (2, 1));
        // Same z and θ, different φ, m = 0: identical entries.
        assert_relative_eq!(a[[0, 0]], a[[1, 0]], max_relative = 1e-12);
    }

    #[test]
    fn non_finite_coordinates_propagate_nan_rows() {
        let b = basis();
        let rc = ModelCoords {
            z: array![0.5, f64::NAN],
            theta: array![0.05, 0.05],
            phi: array![0.1, 0.1],
        };
        let a = b.eval_basis(&rc);
        assert!(a.row(0).iter().all(|v| v.is_finite()));
        assert!(a.row(1).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let b = CapBasis::new(2, 3, 40.0);
        let (z0, t0, p0) = (1.5, 0.25, 0.8);
        let point = |z: f64, t: f64, p: f64| ModelCoords {
            z: array![z],
            theta: array![t],
            phi: array![p],
        };
        let g = b.eval_grad_basis(&point(z0, t0, p0));
        let h = 1e-6;
        let a = |z: f64, t: f64, p: f64| b.eval_basis(&point(z, t, p));
        for n in 0..b.nbasis() {
            let dz = (a(z0 + h, t0, p0)[[0, n]] - a(z0 - h, t0, p0)[[0, n]]) / (2.0 * h);
            let dt = (a(z0, t0 + h, p0)[[0, n]] - a(z0, t0 - h, p0)[[0, n]]) / (2.0 * h);
            let dp = (a(z0, t0, p0 + h)[[0, n]] - a(z0, t0, p0 - h)[[0, n]]) / (2.0 * h);
            let r = (z0 / 100.0 + 1.0) * RE;
            assert_relative_eq!(g[[0, n, 0]], dz * 100.0 / RE, max_relative = 1e-4, epsilon = 1e-18);
            assert_relative_eq!(g[[0, n, 1]], dt / r, max_relative = 1e-4, epsilon = 1e-18);
            assert_relative_eq!(
                g[[0, n, 2]],
                dp / (r * t0.sin()),
                max_relative = 1e-4,
                epsilon = 1e-18
            );
        }
    }

    #[test]
    fn eval_model_contracts_coefficients_and_propagates_variance() {
        let b = CapBasis::new(1, 2, 40.0);
        let nb = b.nbasis();
        let r = array![RE + 300e3, RE + 320e3];
        let theta = array![0.2, 0.21];
        let phi = array![1.0, 1.02];
        let cp = CenterPoint::from_spherical(theta.view(), phi.view());

        let c = Array1::from_elem(nb, 0.5);
        let dc = Array2::<f64>::eye(nb) * 0.04;
        let out = b.eval_model(
            &cp,
            r.view(),
            theta.view(),
            phi.view(),
            c.view(),
            Some(&dc),
            true,
            true,
        );

        let rc = CapBasis::transform_coord(r.view(), theta.view(), phi.view(), &cp);
        let a = b.eval_basis(&rc);
        let expect = a.dot(&c);
        for i in 0..2 {
            assert_relative_eq!(out.value[i], expect[i], max_relative = 1e-12);
        }
        let var = out.value_var.expect("variance requested");
        for i in 0..2 {
            let direct = 0.04 * a.row(i).dot(&a.row(i));
            assert_relative_eq!(var[i], direct, max_relative = 1e-10);
        }
        assert!(out.gradient.is_some());
        assert!(out.gradient_var.is_some());
    }
}
