//! Coordinate transforms between geodetic, earth-centered cartesian, and
//! geocentric spherical frames.
//!
//! These are the pure-function collaborators of the fitting core: arrays of
//! coordinate triples in, arrays of coordinate triples out, no state. The
//! spherical convention throughout is physics-style `(r, θ, φ)` with θ the
//! colatitude measured from the +z axis and φ the azimuth from +x.

/// Mean Earth radius used by the model's altitude scaling (m).
pub const RE: f64 = 6371.2e3;

/// WGS84 semi-major axis (m).
const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Geodetic latitude/longitude (degrees) and height (m) to ECEF cartesian (m).
pub fn geodetic_to_ecef(lat_deg: f64, lon_deg: f64, alt_m: f64) -> [f64; 3] {
    let lat = lat_deg.to_radians();
    let lon = lon_deg.to_radians();
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    // Prime-vertical radius of curvature.
    let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    [
        (n + alt_m) * cos_lat * lon.cos(),
        (n + alt_m) * cos_lat * lon.sin(),
        (n * (1.0 - e2) + alt_m) * sin_lat,
    ]
}

/// Geocentric spherical `(r, θ, φ)` to cartesian.
pub fn spherical_to_cartesian(r: f64, theta: f64, phi: f64) -> [f64; 3] {
    let st = theta.sin();
    [r * st * phi.cos(), r * st * phi.sin(), r * theta.cos()]
}

/// Cartesian to geocentric spherical `(r, θ, φ)`.
pub fn cartesian_to_spherical(p: [f64; 3]) -> (f64, f64, f64) {
    let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
    let theta = if r > 0.0 { (p[2] / r).acos() } else { 0.0 };
    let phi = p[1].atan2(p[0]);
    (r, theta, phi)
}

/// Geodetic latitude/longitude (degrees) and height (m) to geocentric
/// spherical `(r, θ, φ)` via ECEF.
pub fn geodetic_to_spherical(lat_deg: f64, lon_deg: f64, alt_m: f64) -> (f64, f64, f64) {
    cartesian_to_spherical(geodetic_to_ecef(lat_deg, lon_deg, alt_m))
}

/// Local spherical unit vectors `(r̂, θ̂, φ̂)` at colatitude θ, azimuth φ.
#[inline]
fn spherical_frame(theta: f64, phi: f64) -> ([f64; 3], [f64; 3], [f64; 3]) {
    let (st, ct) = (theta.sin(), theta.cos());
    let (sp, cp) = (phi.sin(), phi.cos());
    (
        [st * cp, st * sp, ct],
        [ct * cp, ct * sp, -st],
        [-sp, cp, 0.0],
    )
}

/// Vector components `(v_r, v_θ, v_φ)` at a spherical position to cartesian.
pub fn vector_spherical_to_cartesian(v: [f64; 3], theta: f64, phi: f64) -> [f64; 3] {
    let (rh, th, ph) = spherical_frame(theta, phi);
    [
        v[0] * rh[0] + v[1] * th[0] + v[2] * ph[0],
        v[0] * rh[1] + v[1] * th[1] + v[2] * ph[1],
        v[0] * rh[2] + v[1] * th[2] + v[2] * ph[2],
    ]
}

/// Cartesian vector components at a spherical position back to `(v_r, v_θ, v_φ)`.
pub fn vector_cartesian_to_spherical(v: [f64; 3], theta: f64, phi: f64) -> [f64; 3] {
    let (rh, th, ph) = spherical_frame(theta, phi);
    [dot(v, rh), dot(v, th), dot(v, ph)]
}

#[inline]
pub fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Rodrigues rotation of `p` about the unit axis `k` by `angle`.
pub fn rodrigues_rotate(k: [f64; 3], angle: f64, p: [f64; 3]) -> [f64; 3] {
    let (s, c) = angle.sin_cos();
    let kxp = cross(k, p);
    let kdp = dot(k, p) * (1.0 - c);
    [
        p[0] * c + kxp[0] * s + k[0] * kdp,
        p[1] * c + kxp[1] * s + k[1] * kdp,
        p[2] * c + kxp[2] * s + k[2] * kdp,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn spherical_cartesian_round_trip() {
        let (r0, t0, p0) = (RE + 300e3, 0.25, -1.1);
        let c = spherical_to_cartesian(r0, t0, p0);
        let (r, t, p) = cartesian_to_spherical(c);
        assert_relative_eq!(r, r0, max_relative = 1e-12);
        assert_relative_eq!(t, t0, max_relative = 1e-12);
        assert_relative_eq!(p, p0, max_relative = 1e-12);
    }

    #[test]
    fn ecef_matches_reference_points() {
        // Equator/prime meridian at zero height sits on the semi-major axis.
        let p = geodetic_to_ecef(0.0, 0.0, 0.0);
        assert_relative_eq!(p[0], 6_378_137.0, max_relative = 1e-9);
        assert!(p[1].abs() < 1e-6 && p[2].abs() < 1e-6);

        // North pole at zero height sits on the semi-minor axis.
        let q = geodetic_to_ecef(90.0, 0.0, 0.0);
        assert_relative_eq!(q[2], 6_356_752.314_245, max_relative = 1e-9);
        assert!(q[0].abs() < 1e-3);
    }

    #[test]
    fn vector_transform_round_trip() {
        let (theta, phi) = (0.7, 2.1);
        let v_sph = [1.3, -0.4, 0.9];
        let v_cart = vector_spherical_to_cartesian(v_sph, theta, phi);
        let back = vector_cartesian_to_spherical(v_cart, theta, phi);
        for i in 0..3 {
            assert_relative_eq!(back[i], v_sph[i], max_relative = 1e-12);
        }
    }

    #[test]
    fn rodrigues_rotation_preserves_length_and_axis() {
        let k = [0.0, 0.0, 1.0];
        let p = [1.0, 0.0, 0.5];
        let r = rodrigues_rotate(k, std::f64::consts::FRAC_PI_2, p);
        assert_relative_eq!(r[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(r[1], 1.0, max_relative = 1e-12);
        assert_relative_eq!(r[2], 0.5, max_relative = 1e-12);
    }
}
