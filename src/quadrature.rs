//! Gauss-Legendre quadrature for the penalty-matrix integrals.
//!
//! The regularization matrices are triple integrals of separable
//! basis-function products over a box-shaped domain (scaled altitude ×
//! colatitude × azimuth), so a fixed-order panel rule per axis is all the
//! machinery required. Nodes and weights come from Newton iteration on the
//! Legendre recurrence; the iteration converges to machine precision in a
//! handful of steps from the Chebyshev-like initial guess.

/// A Gauss-Legendre rule on the reference interval [-1, 1].
pub struct GaussLegendre {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl GaussLegendre {
    /// Build an `n`-point rule (exact for polynomials of degree `2n - 1`).
    pub fn new(n: usize) -> Self {
        assert!(n >= 2, "a quadrature rule needs at least two nodes");
        let mut nodes = vec![0.0; n];
        let mut weights = vec![0.0; n];
        let nf = n as f64;

        // Roots are symmetric about zero; solve for one half and mirror.
        for i in 0..n.div_ceil(2) {
            let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (nf + 0.5)).cos();
            let mut dp = 0.0;
            for _ in 0..100 {
                // Evaluate P_n and P_{n-1} by recurrence.
                let mut p_prev = 1.0_f64;
                let mut p = x;
                for k in 1..n {
                    let kf = k as f64;
                    let p_next = ((2.0 * kf + 1.0) * x * p - kf * p_prev) / (kf + 1.0);
                    p_prev = p;
                    p = p_next;
                }
                dp = nf * (x * p - p_prev) / (x * x - 1.0);
                let dx = p / dp;
                x -= dx;
                if dx.abs() < 1e-15 {
                    break;
                }
            }
            let w = 2.0 / ((1.0 - x * x) * dp * dp);
            nodes[i] = -x.abs();
            nodes[n - 1 - i] = x.abs();
            weights[i] = w;
            weights[n - 1 - i] = w;
        }

        GaussLegendre { nodes, weights }
    }

    /// Integrate `f` over [a, b] with the affine-mapped rule.
    pub fn integrate<F: Fn(f64) -> f64>(&self, a: f64, b: f64, f: F) -> f64 {
        let half = 0.5 * (b - a);
        let mid = 0.5 * (a + b);
        let mut acc = 0.0;
        for (&x, &w) in self.nodes.iter().zip(&self.weights) {
            acc += w * f(mid + half * x);
        }
        acc * half
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn weights_sum_to_interval_length() {
        for &n in &[2usize, 8, 33, 64] {
            let rule = GaussLegendre::new(n);
            let total: f64 = rule.weights.iter().sum();
            assert_relative_eq!(total, 2.0, max_relative = 1e-13);
        }
    }

    #[test]
    fn exact_on_polynomials_up_to_degree_bound() {
        let rule = GaussLegendre::new(5);
        // degree 9 is the exactness bound for 5 nodes: ∫₀¹ x⁹ dx = 0.1
        assert_relative_eq!(rule.integrate(0.0, 1.0, |x| x.powi(9)), 0.1, max_relative = 1e-12);
        assert_relative_eq!(rule.integrate(0.0, 1.0, |x| x.powi(3)), 0.25, max_relative = 1e-13);
    }

    #[test]
    fn converges_on_smooth_transcendentals() {
        let rule = GaussLegendre::new(48);
        assert_relative_eq!(
            rule.integrate(0.0, std::f64::consts::PI, f64::sin),
            2.0,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            rule.integrate(0.0, 1.0, |x| (-x).exp()),
            1.0 - (-1.0_f64).exp(),
            max_relative = 1e-12
        );
    }

    #[test]
    fn trig_products_integrate_to_orthogonality_values() {
        // The azimuth panels of the penalty matrices are exactly these.
        let rule = GaussLegendre::new(64);
        let two_pi = 2.0 * std::f64::consts::PI;
        let c23 = rule.integrate(0.0, two_pi, |p| (2.0 * p).cos() * (3.0 * p).cos());
        let c22 = rule.integrate(0.0, two_pi, |p| (2.0 * p).cos() * (2.0 * p).cos());
        assert!(c23.abs() < 1e-11);
        assert_relative_eq!(c22, std::f64::consts::PI, max_relative = 1e-11);
    }
}
