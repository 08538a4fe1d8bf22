//! Unblocked reference operations over whole column-major buffers.
//!
//! Same mathematical operation and layout as the by-blocks functors, no
//! tiling and no scheduler. Used as the comparison oracle.

use blockwise_core::BlockwiseError;

use crate::kernels::{self, Trans};
use crate::view::{DenseView, Scalar};

/// Upper Cholesky of the `n x n` matrix in `a` (leading dimension `lda`).
pub fn chol_upper<T: Scalar>(a: &mut [T], n: usize, lda: usize) -> Result<(), BlockwiseError> {
    let a = DenseView::from_slice(a, n, n, 1, lda)?;
    // SAFETY: `a` borrows the whole buffer exclusively.
    unsafe { kernels::chol_upper(&a) }
}

/// Solve `Aᵗ X = alpha B` for the `m x n` right-hand side `b`, `A` upper
/// triangular `m x m`.
pub fn trsm_left_upper_trans<T: Scalar>(
    alpha: T,
    a: &[T],
    lda: usize,
    b: &mut [T],
    m: usize,
    n: usize,
    ldb: usize,
) -> Result<(), BlockwiseError> {
    let a = DenseView::read_only(a, m, m, 1, lda)?;
    let b = DenseView::from_slice(b, m, n, 1, ldb)?;
    // SAFETY: `b` is borrowed exclusively and cannot alias the shared `a`.
    unsafe { kernels::trsm_left_upper_trans(alpha, &a, &b) };
    Ok(())
}

/// `C = alpha Aᵗ A + beta C` on the upper triangle, `A` is `k x n`.
#[allow(clippy::too_many_arguments)]
pub fn herk_upper_trans<T: Scalar>(
    alpha: T,
    a: &[T],
    k: usize,
    lda: usize,
    beta: T,
    c: &mut [T],
    n: usize,
    ldc: usize,
) -> Result<(), BlockwiseError> {
    let a = DenseView::read_only(a, k, n, 1, lda)?;
    let c = DenseView::from_slice(c, n, n, 1, ldc)?;
    // SAFETY: `c` is borrowed exclusively.
    unsafe { kernels::herk_upper_trans(alpha, &a, beta, &c) };
    Ok(())
}

/// Column-major operand of a reference product: data, rows, cols, leading dimension.
pub struct Operand<'a, T> {
    pub data: &'a [T],
    pub nrows: usize,
    pub ncols: usize,
    pub ld: usize,
}

/// `C = alpha op(A) op(B) + beta C` with `C` `m x n`.
#[allow(clippy::too_many_arguments)]
pub fn gemm<T: Scalar>(
    trans_a: Trans,
    trans_b: Trans,
    alpha: T,
    a: Operand<'_, T>,
    b: Operand<'_, T>,
    beta: T,
    c: &mut [T],
    ldc: usize,
) -> Result<(), BlockwiseError> {
    let a = DenseView::read_only(a.data, a.nrows, a.ncols, 1, a.ld)?;
    let b = DenseView::read_only(b.data, b.nrows, b.ncols, 1, b.ld)?;
    let (m, k) = trans_a.dims(&a);
    let (kb, n) = trans_b.dims(&b);
    if k != kb {
        return Err(BlockwiseError::ShapeMismatch(format!(
            "inner dimensions differ: op(A) is {}x{}, op(B) is {}x{}",
            m, k, kb, n
        )));
    }
    let c = DenseView::from_slice(c, m, n, 1, ldc)?;
    // SAFETY: `c` is borrowed exclusively.
    unsafe { kernels::gemm(trans_a, trans_b, alpha, &a, &b, beta, &c) };
    Ok(())
}

/// Relative Frobenius distance `‖x - y‖ / ‖x‖` (0 when both are zero).
pub fn relative_error<T: Scalar>(reference: &[T], actual: &[T]) -> T {
    let (mut diff, mut norm) = (T::zero(), T::zero());
    for (&r, &a) in reference.iter().zip(actual) {
        norm = norm + r * r;
        diff = diff + (r - a) * (r - a);
    }
    if norm == T::zero() {
        diff.sqrt()
    } else {
        (diff / norm).sqrt()
    }
}
