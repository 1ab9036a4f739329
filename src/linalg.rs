//! ndarray ↔ faer interop for the dense solves.
//!
//! The regularized normal equations are small (nbasis × nbasis) but can be
//! arbitrarily close to singular when the regularization weight is tiny, so
//! every solve here goes through the SVD: least squares with a singular-value
//! cutoff for the coefficient solve, and the Moore-Penrose pseudo-inverse for
//! the covariance sandwich. faer does the factorization work; ndarray stays
//! the public array type.

use dyn_stack::{MemBuffer, MemStack};
use faer::diag::{Diag, DiagRef};
use faer::linalg::svd::{self, ComputeSvdVectors};
use faer::{Mat, MatRef, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("non-finite values in linear system")]
    NonFiniteSystem,
}

/// Zero-copy view of an ndarray matrix as a faer `MatRef`.
///
/// Layouts faer cannot consume directly (zero or negative strides) are
/// materialized into a compact owned copy held inside the wrapper.
pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.to_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = if let Some(owned) = &self.owned {
            let strides = owned.strides();
            (owned.as_ptr(), owned.nrows(), owned.ncols(), strides[0], strides[1])
        } else {
            (self.ptr, self.rows, self.cols, self.row_stride, self.col_stride)
        };
        // SAFETY: pointer/shape/strides either come from a live ndarray view
        // with positive strides, or from the owned compact copy stored inside
        // this wrapper, valid for the lifetime of the returned view.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    let mut out = Array1::<f64>::zeros(mat.nrows());
    for i in 0..mat.nrows() {
        out[i] = mat[(i, 0)];
    }
    out
}

/// Full SVD `A = U diag(s) Vᵗ`, returned as `(U, s, Vᵗ)`.
pub fn svd_decompose<S: Data<Elem = f64>>(
    a: &ArrayBase<S, Ix2>,
) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), LinalgError> {
    let view = FaerArrayView::new(a);
    let mat = view.as_ref();
    let (rows, cols) = mat.shape();

    let mut singular = Diag::<f64>::zeros(rows.min(cols));
    let mut u_storage = Mat::<f64>::zeros(rows, rows);
    let mut v_storage = Mat::<f64>::zeros(cols, cols);

    let par = get_global_parallelism();
    let mut mem = MemBuffer::new(svd::svd_scratch::<f64>(
        rows,
        cols,
        ComputeSvdVectors::Full,
        ComputeSvdVectors::Full,
        par,
        Default::default(),
    ));
    let stack = MemStack::new(&mut mem);

    svd::svd(
        mat,
        singular.as_mut(),
        Some(u_storage.as_mut()),
        Some(v_storage.as_mut()),
        par,
        stack,
        Default::default(),
    )
    .map_err(|_| LinalgError::SvdNoConvergence)?;

    let s = diag_to_array(singular.as_ref());
    let u = mat_to_array(u_storage.as_ref());
    // faer returns V; transpose into Vᵗ for the solve formulas below.
    let v_ref = v_storage.as_ref();
    let mut vt = Array2::<f64>::zeros((v_ref.ncols(), v_ref.nrows()));
    for j in 0..v_ref.nrows() {
        for i in 0..v_ref.ncols() {
            vt[[i, j]] = v_ref[(j, i)];
        }
    }
    Ok((u, s, vt))
}

/// numpy-style singular-value cutoff: values at or below
/// `eps · max(m, n) · s_max` count as zero rank.
#[inline]
fn rank_cutoff(rows: usize, cols: usize, s: &Array1<f64>) -> f64 {
    let smax = s.iter().cloned().fold(0.0_f64, f64::max);
    f64::EPSILON * rows.max(cols) as f64 * smax
}

/// Minimum-norm least-squares solution of `A x = b` via the SVD.
///
/// Rank-deficient and near-singular systems are handled by truncating
/// singular values below the cutoff instead of amplifying them.
pub fn lstsq<S: Data<Elem = f64>>(
    a: &ArrayBase<S, Ix2>,
    b: &Array1<f64>,
) -> Result<Array1<f64>, LinalgError> {
    let (rows, cols) = a.dim();
    if a.iter().any(|v| !v.is_finite()) || b.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFiniteSystem);
    }
    let (u, s, vt) = svd_decompose(a)?;
    let cutoff = rank_cutoff(rows, cols, &s);

    let mut x = Array1::<f64>::zeros(cols);
    for i in 0..s.len() {
        if s[i] <= cutoff {
            continue;
        }
        let mut utb = 0.0;
        for r in 0..rows {
            utb += u[[r, i]] * b[r];
        }
        let scale = utb / s[i];
        for j in 0..cols {
            x[j] += vt[[i, j]] * scale;
        }
    }
    Ok(x)
}

/// Moore-Penrose pseudo-inverse via the SVD, with the same rank cutoff as
/// [`lstsq`].
pub fn pinv<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Result<Array2<f64>, LinalgError> {
    let (rows, cols) = a.dim();
    if a.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFiniteSystem);
    }
    let (u, s, vt) = svd_decompose(a)?;
    let cutoff = rank_cutoff(rows, cols, &s);

    let mut p = Array2::<f64>::zeros((cols, rows));
    for i in 0..s.len() {
        if s[i] <= cutoff {
            continue;
        }
        let inv = 1.0 / s[i];
        for j in 0..cols {
            let vij = vt[[i, j]] * inv;
            if vij == 0.0 {
                continue;
            }
            for r in 0..rows {
                p[[j, r]] += vij * u[[r, i]];
            }
        }
    }
    Ok(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn svd_reconstructs_the_input() {
        let a = array![[3.0, 1.0, -2.0], [0.5, -1.0, 4.0]];
        let (u, s, vt) = svd_decompose(&a).expect("svd");
        let mut rec = Array2::<f64>::zeros(a.dim());
        for i in 0..a.nrows() {
            for j in 0..a.ncols() {
                for k in 0..s.len() {
                    rec[[i, j]] += u[[i, k]] * s[k] * vt[[k, j]];
                }
            }
        }
        for (x, y) in rec.iter().zip(a.iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-12, epsilon = 1e-12);
        }
    }

    #[test]
    fn lstsq_solves_a_well_conditioned_system() {
        let a = array![[2.0, 0.0], [0.0, 4.0], [1.0, 1.0]];
        let x_true = array![1.5, -0.5];
        let b = a.dot(&x_true);
        let x = lstsq(&a, &b).expect("lstsq");
        assert_relative_eq!(x[0], x_true[0], max_relative = 1e-12);
        assert_relative_eq!(x[1], x_true[1], max_relative = 1e-12);
    }

    #[test]
    fn lstsq_handles_exactly_singular_systems() {
        // Second column is a copy of the first; the min-norm solution splits
        // the coefficient evenly and stays finite.
        let a = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let b = array![2.0, 4.0, 6.0];
        let x = lstsq(&a, &b).expect("lstsq");
        assert!(x.iter().all(|v| v.is_finite()));
        assert_relative_eq!(x[0], 1.0, max_relative = 1e-10);
        assert_relative_eq!(x[1], 1.0, max_relative = 1e-10);
    }

    #[test]
    fn lstsq_rejects_non_finite_input() {
        let a = array![[1.0, f64::NAN], [0.0, 1.0]];
        let b = array![1.0, 1.0];
        assert!(matches!(lstsq(&a, &b), Err(LinalgError::NonFiniteSystem)));
    }

    #[test]
    fn pinv_satisfies_moore_penrose_on_a_singular_matrix() {
        let a = array![[2.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let p = pinv(&a).expect("pinv");
        // A P A = A
        let apa = a.dot(&p).dot(&a);
        for (x, y) in apa.iter().zip(a.iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-12, epsilon = 1e-12);
        }
        // P A P = P
        let pap = p.dot(&a).dot(&p);
        for (x, y) in pap.iter().zip(p.iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-12, epsilon = 1e-12);
        }
    }

    #[test]
    fn pinv_of_invertible_matrix_is_the_inverse() {
        let a = array![[4.0, 1.0], [2.0, 3.0]];
        let p = pinv(&a).expect("pinv");
        let eye = a.dot(&p);
        assert_relative_eq!(eye[[0, 0]], 1.0, max_relative = 1e-12);
        assert_relative_eq!(eye[[1, 1]], 1.0, max_relative = 1e-12);
        assert!(eye[[0, 1]].abs() < 1e-12 && eye[[1, 0]].abs() < 1e-12);
    }
}
