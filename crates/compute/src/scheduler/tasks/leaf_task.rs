//! Leaf functors: one dense kernel call on fixed tiles.
//!
//! Leaves are only created by the by-blocks functors, which wire them
//! through tile handles so that no two of them touch a tile concurrently
//! unless both only read it.

use blockwise_core::BlockwiseError;

use crate::kernels::{self, Trans};
use crate::scheduler::arena::TaskCensus;
use crate::scheduler::task::{record_footprint, TaskContext, TaskFunctor};
use crate::view::{DenseView, Scalar};

/// Upper Cholesky of a diagonal tile.
pub struct CholLeaf<'a, T> {
    a: DenseView<'a, T>,
    /// Global index of the tile's first column, for error reporting.
    offset: usize,
}

impl<'a, T> CholLeaf<'a, T> {
    pub(crate) fn new(a: DenseView<'a, T>, offset: usize) -> Self {
        Self { a, offset }
    }
}

impl<'a, T: Scalar> TaskFunctor<'a, T> for CholLeaf<'a, T> {
    fn name(&self) -> &'static str {
        "chol"
    }

    fn census(&self, census: &mut TaskCensus) {
        census.add(record_footprint::<Self>(), 1);
    }

    fn execute(self, _ctx: &TaskContext<'_, 'a, T>) -> Result<(), BlockwiseError> {
        // SAFETY: the tile handle of `a` names this task as its writer and
        // every earlier access to the tile has retired.
        unsafe { kernels::chol_upper(&self.a) }.map_err(|e| match e {
            BlockwiseError::NotPositiveDefinite { column } => BlockwiseError::NotPositiveDefinite {
                column: column + self.offset,
            },
            other => other,
        })
    }
}

/// `B = alpha A⁻ᵗ B` with `A` an upper triangular tile.
pub struct TrsmLeaf<'a, T> {
    alpha: T,
    a: DenseView<'a, T>,
    b: DenseView<'a, T>,
}

impl<'a, T> TrsmLeaf<'a, T> {
    pub(crate) fn new(alpha: T, a: DenseView<'a, T>, b: DenseView<'a, T>) -> Self {
        Self { alpha, a, b }
    }
}

impl<'a, T: Scalar> TaskFunctor<'a, T> for TrsmLeaf<'a, T> {
    fn name(&self) -> &'static str {
        "trsm"
    }

    fn census(&self, census: &mut TaskCensus) {
        census.add(record_footprint::<Self>(), 1);
    }

    fn execute(self, _ctx: &TaskContext<'_, 'a, T>) -> Result<(), BlockwiseError> {
        // SAFETY: sole writer of `b`; the writer of `a` has retired.
        unsafe { kernels::trsm_left_upper_trans(self.alpha, &self.a, &self.b) };
        Ok(())
    }
}

/// `C = alpha Aᵗ A + beta C` on the upper triangle of a diagonal tile.
pub struct HerkLeaf<'a, T> {
    alpha: T,
    beta: T,
    a: DenseView<'a, T>,
    c: DenseView<'a, T>,
}

impl<'a, T> HerkLeaf<'a, T> {
    pub(crate) fn new(alpha: T, a: DenseView<'a, T>, beta: T, c: DenseView<'a, T>) -> Self {
        Self { alpha, beta, a, c }
    }
}

impl<'a, T: Scalar> TaskFunctor<'a, T> for HerkLeaf<'a, T> {
    fn name(&self) -> &'static str {
        "herk"
    }

    fn census(&self, census: &mut TaskCensus) {
        census.add(record_footprint::<Self>(), 1);
    }

    fn execute(self, _ctx: &TaskContext<'_, 'a, T>) -> Result<(), BlockwiseError> {
        // SAFETY: sole writer of `c`; the writer of `a` has retired.
        unsafe { kernels::herk_upper_trans(self.alpha, &self.a, self.beta, &self.c) };
        Ok(())
    }
}

/// `C = alpha op(A) op(B) + beta C` on tiles.
pub struct GemmLeaf<'a, T> {
    trans_a: Trans,
    trans_b: Trans,
    alpha: T,
    beta: T,
    a: DenseView<'a, T>,
    b: DenseView<'a, T>,
    c: DenseView<'a, T>,
}

impl<'a, T> GemmLeaf<'a, T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        trans_a: Trans,
        trans_b: Trans,
        alpha: T,
        a: DenseView<'a, T>,
        b: DenseView<'a, T>,
        beta: T,
        c: DenseView<'a, T>,
    ) -> Self {
        Self { trans_a, trans_b, alpha, beta, a, b, c }
    }
}

impl<'a, T: Scalar> TaskFunctor<'a, T> for GemmLeaf<'a, T> {
    fn name(&self) -> &'static str {
        "gemm"
    }

    fn census(&self, census: &mut TaskCensus) {
        census.add(record_footprint::<Self>(), 1);
    }

    fn execute(self, _ctx: &TaskContext<'_, 'a, T>) -> Result<(), BlockwiseError> {
        // SAFETY: sole writer of `c`; the writers of `a` and `b` have retired.
        unsafe {
            kernels::gemm(self.trans_a, self.trans_b, self.alpha, &self.a, &self.b, self.beta, &self.c)
        };
        Ok(())
    }
}

/// An unattached operand whose `op()` is `rows x cols`, for products with
/// an empty inner dimension. The kernels never dereference it.
pub(crate) fn empty_operand<'a, T>(trans: Trans, rows: usize, cols: usize) -> DenseView<'a, T> {
    let mut view = DenseView::new();
    match trans {
        Trans::NoTranspose => view.set_view(rows, cols),
        Trans::Transpose => view.set_view(cols, rows),
    }
    view
}
