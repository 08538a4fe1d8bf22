//! Dense tile kernels operating on [`DenseView`]s, backed by faer.
//!
//! These are the leaf operations of the by-blocks algorithms and also back
//! the reference oracle in [`crate::reference`]. All of them are `unsafe`:
//! the caller guarantees that the written view is not accessed by anyone
//! else for the duration of the call.

use blockwise_core::BlockwiseError;
use faer::linalg::matmul::matmul;
use faer::linalg::matmul::triangular::{self as triangular_matmul, BlockStructure};
use faer::linalg::solvers::Llt;
use faer::linalg::triangular_solve::solve_lower_triangular_in_place;
use faer::prelude::ReborrowMut;
use faer::{Accum, MatMut, MatRef, Par, Side};

use crate::view::{DenseView, Scalar};

/// Whether an operand enters a product as itself or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Trans {
    NoTranspose,
    Transpose,
}

impl Trans {
    /// Extents of `op(view)`.
    pub fn dims<T>(self, view: &DenseView<'_, T>) -> (usize, usize) {
        match self {
            Trans::NoTranspose => (view.nrows(), view.ncols()),
            Trans::Transpose => (view.ncols(), view.nrows()),
        }
    }

    fn apply<'m, T>(self, m: MatRef<'m, T>) -> MatRef<'m, T> {
        match self {
            Trans::NoTranspose => m,
            Trans::Transpose => m.transpose(),
        }
    }
}

/// `C = beta C`, or zero when `beta` is zero so stale NaNs do not survive.
/// With `upper_only` the strictly lower triangle is left alone.
fn scale<T: Scalar>(mut c: MatMut<'_, T>, beta: T, upper_only: bool) {
    if beta == T::one() {
        return;
    }
    for j in 0..c.ncols() {
        let rows = if upper_only { (j + 1).min(c.nrows()) } else { c.nrows() };
        for i in 0..rows {
            let scaled = if beta == T::zero() { T::zero() } else { beta * c[(i, j)] };
            c[(i, j)] = scaled;
        }
    }
}

/// Whether the leading `k x k` block of `a` has a Cholesky factor.
fn leading_minor_factors<T: Scalar>(a: MatRef<'_, T>, k: usize) -> bool {
    Llt::<T>::new(a.submatrix(0, 0, k, k), Side::Upper).is_ok()
}

/// In-place upper Cholesky `A = Rᵗ R` of a square view. The strictly lower
/// triangle is neither read nor written. On failure `A` is untouched and
/// the error names the first column whose pivot is not positive.
///
/// # Safety
/// `a` must be attached, writable, and exclusively owned by the caller.
pub unsafe fn chol_upper<T: Scalar>(a: &DenseView<'_, T>) -> Result<(), BlockwiseError> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());
    if n == 0 {
        return Ok(());
    }

    let factor = match Llt::<T>::new(a.as_mat_ref(), Side::Upper) {
        Ok(factor) => factor,
        Err(_) => {
            // Smallest leading block that fails to factor.
            let (mut lo, mut hi) = (0, n);
            while hi - lo > 1 {
                let mid = lo + (hi - lo) / 2;
                if leading_minor_factors(a.as_mat_ref(), mid) {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            return Err(BlockwiseError::NotPositiveDefinite { column: hi - 1 });
        }
    };

    let l = factor.L();
    let mut r = a.as_mat_mut();
    for j in 0..n {
        for i in 0..=j {
            r[(i, j)] = l[(j, i)];
        }
    }
    Ok(())
}

/// Solve `Aᵗ X = alpha B` in place of `B`, with `A` upper triangular and
/// non-unit diagonal.
///
/// # Safety
/// `b` must be exclusively owned by the caller; `a` must not be written
/// concurrently.
pub unsafe fn trsm_left_upper_trans<T: Scalar>(alpha: T, a: &DenseView<'_, T>, b: &DenseView<'_, T>) {
    debug_assert_eq!(a.nrows(), b.nrows());
    debug_assert_eq!(a.ncols(), b.nrows());

    let mut rhs = b.as_mat_mut();
    scale(rhs.rb_mut(), alpha, false);
    solve_lower_triangular_in_place(a.as_mat_ref().transpose(), rhs, Par::Seq);
}

/// `C = alpha Aᵗ A + beta C` on the upper triangle of the square view `C`.
///
/// # Safety
/// `c` must be exclusively owned by the caller; `a` must not be written
/// concurrently.
pub unsafe fn herk_upper_trans<T: Scalar>(alpha: T, a: &DenseView<'_, T>, beta: T, c: &DenseView<'_, T>) {
    debug_assert_eq!(c.nrows(), c.ncols());
    debug_assert_eq!(a.ncols(), c.nrows());

    let mut dst = c.as_mat_mut();
    scale(dst.rb_mut(), beta, true);
    let lhs = a.as_mat_ref();
    triangular_matmul::matmul(
        dst,
        BlockStructure::TriangularUpper,
        Accum::Add,
        lhs.transpose(),
        BlockStructure::Rectangular,
        lhs,
        BlockStructure::Rectangular,
        alpha,
        Par::Seq,
    );
}

/// `C = alpha op(A) op(B) + beta C`. A zero `beta` overwrites `C` without
/// reading it.
///
/// # Safety
/// `c` must be exclusively owned by the caller and must not alias `a` or `b`.
pub unsafe fn gemm<T: Scalar>(
    trans_a: Trans,
    trans_b: Trans,
    alpha: T,
    a: &DenseView<'_, T>,
    b: &DenseView<'_, T>,
    beta: T,
    c: &DenseView<'_, T>,
) {
    debug_assert_eq!(trans_a.dims(a).1, trans_b.dims(b).0);
    debug_assert_eq!((trans_a.dims(a).0, trans_b.dims(b).1), (c.nrows(), c.ncols()));

    let mut dst = c.as_mat_mut();
    scale(dst.rb_mut(), beta, false);
    if trans_a.dims(a).1 == 0 {
        return;
    }
    matmul(
        dst,
        Accum::Add,
        trans_a.apply(a.as_mat_ref()),
        trans_b.apply(b.as_mat_ref()),
        alpha,
        Par::Seq,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chol_of_2x2() {
        // [[4, 2], [2, 5]] = Rᵗ R with R = [[2, 1], [0, 2]]
        let mut buf = vec![4.0, 2.0, 2.0, 5.0];
        let a = DenseView::col_major(&mut buf, 2, 2).unwrap();
        unsafe { chol_upper(&a).unwrap() };
        assert_eq!(buf, vec![2.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn chol_reports_indefinite_pivot() {
        let mut buf = vec![1.0, 2.0, 2.0, 1.0];
        let a = DenseView::col_major(&mut buf, 2, 2).unwrap();
        let err = unsafe { chol_upper(&a).unwrap_err() };
        assert!(matches!(err, BlockwiseError::NotPositiveDefinite { column: 1 }));
    }

    #[test]
    fn trsm_solves_transposed_system() {
        // A = [[2, 1], [0, 4]], Aᵗ = [[2, 0], [1, 4]], X = [1, 2]ᵗ
        let mut abuf = vec![2.0, 0.0, 1.0, 4.0];
        let mut bbuf = vec![2.0, 9.0];
        let a = DenseView::col_major(&mut abuf, 2, 2).unwrap();
        let b = DenseView::col_major(&mut bbuf, 2, 1).unwrap();
        unsafe { trsm_left_upper_trans(1.0, &a, &b) };
        assert_eq!(bbuf, vec![1.0, 2.0]);
    }

    #[test]
    fn gemm_transposed_a() {
        // Aᵗ B with A = [[1, 2], [3, 4]], B = I
        let mut abuf = vec![1.0, 3.0, 2.0, 4.0];
        let mut bbuf = vec![1.0, 0.0, 0.0, 1.0];
        let mut cbuf = vec![1.0; 4];
        let a = DenseView::col_major(&mut abuf, 2, 2).unwrap();
        let b = DenseView::col_major(&mut bbuf, 2, 2).unwrap();
        let c = DenseView::col_major(&mut cbuf, 2, 2).unwrap();
        unsafe { gemm(Trans::Transpose, Trans::NoTranspose, 1.0, &a, &b, 0.0, &c) };
        assert_eq!(cbuf, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn gemm_empty_inner_dimension_scales_c() {
        let mut cbuf = vec![1.0, 2.0];
        let c = DenseView::col_major(&mut cbuf, 2, 1).unwrap();
        let mut a = DenseView::<f64>::new();
        a.set_view(2, 0);
        let mut b = DenseView::<f64>::new();
        b.set_view(0, 1);
        unsafe { gemm(Trans::NoTranspose, Trans::NoTranspose, 1.0, &a, &b, 3.0, &c) };
        assert_eq!(cbuf, vec![3.0, 6.0]);
    }

    #[test]
    fn herk_touches_upper_triangle_only() {
        // A = [[1, 2]] -> AᵗA = [[1, 2], [2, 4]]
        let mut abuf = vec![1.0, 2.0];
        let mut cbuf = vec![10.0, 10.0, 10.0, 10.0];
        let a = DenseView::col_major(&mut abuf, 1, 2).unwrap();
        let c = DenseView::col_major(&mut cbuf, 2, 2).unwrap();
        unsafe { herk_upper_trans(-1.0, &a, 1.0, &c) };
        assert_eq!(cbuf, vec![9.0, 10.0, 8.0, 6.0]);
    }
}
