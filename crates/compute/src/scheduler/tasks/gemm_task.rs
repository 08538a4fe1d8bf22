use std::ops::Range;
use std::sync::Arc;

use blockwise_core::BlockwiseError;
use tracing::debug;

use crate::blocks::BlockMatrix;
use crate::handle::TileHandle;
use crate::kernels::Trans;
use crate::scheduler::arena::TaskCensus;
use crate::scheduler::runner::TaskScheduler;
use crate::scheduler::task::{record_footprint, GridAccess, TaskContext, TaskFunctor};
use crate::scheduler::types::TaskPriority;
use crate::view::{DenseView, Scalar};

use super::leaf_task::{empty_operand, GemmLeaf};
use super::{require_distinct, require_destination, require_operand, require_same_blocking, split_records};

/// General product `C = alpha op(A) op(B) + beta C` by blocks.
///
/// The destination block rectangle is halved along its longer side until
/// a single tile remains; that tile then chains one leaf per inner block
/// through its handle, with `beta` applied by the first link only.
pub struct GemmByBlocks<'a, T> {
    trans_a: Trans,
    trans_b: Trans,
    alpha: T,
    beta: T,
    a: Arc<BlockMatrix<'a, T>>,
    b: Arc<BlockMatrix<'a, T>>,
    c: Arc<BlockMatrix<'a, T>>,
    rows: Range<usize>,
    cols: Range<usize>,
}

impl<'a, T> GemmByBlocks<'a, T> {
    pub fn new(
        trans_a: Trans,
        trans_b: Trans,
        alpha: T,
        a: Arc<BlockMatrix<'a, T>>,
        b: Arc<BlockMatrix<'a, T>>,
        beta: T,
        c: Arc<BlockMatrix<'a, T>>,
    ) -> Self {
        let rows = 0..c.nrow_blocks();
        let cols = 0..c.ncol_blocks();
        Self { trans_a, trans_b, alpha, beta, a, b, c, rows, cols }
    }

    fn with_range(&self, rows: Range<usize>, cols: Range<usize>) -> Self
    where
        T: Copy,
    {
        Self {
            trans_a: self.trans_a,
            trans_b: self.trans_b,
            alpha: self.alpha,
            beta: self.beta,
            a: Arc::clone(&self.a),
            b: Arc::clone(&self.b),
            c: Arc::clone(&self.c),
            rows,
            cols,
        }
    }

    /// Number of inner blocks.
    fn inner_blocks(&self) -> usize {
        match self.trans_a {
            Trans::NoTranspose => self.a.ncol_blocks(),
            Trans::Transpose => self.a.nrow_blocks(),
        }
    }

    /// Tile `(i, p)` of `op(A)`.
    fn a_tile(&self, i: usize, p: usize) -> (&DenseView<'a, T>, &TileHandle) {
        match self.trans_a {
            Trans::NoTranspose => (self.a.tile(i, p), self.a.handle(i, p)),
            Trans::Transpose => (self.a.tile(p, i), self.a.handle(p, i)),
        }
    }

    /// Tile `(p, j)` of `op(B)`.
    fn b_tile(&self, p: usize, j: usize) -> (&DenseView<'a, T>, &TileHandle) {
        match self.trans_b {
            Trans::NoTranspose => (self.b.tile(p, j), self.b.handle(p, j)),
            Trans::Transpose => (self.b.tile(j, p), self.b.handle(j, p)),
        }
    }
}

fn op_dims<T>(trans: Trans, m: &BlockMatrix<'_, T>) -> (usize, usize) {
    match trans {
        Trans::NoTranspose => (m.nrows(), m.ncols()),
        Trans::Transpose => (m.ncols(), m.nrows()),
    }
}

impl<'a, T: Scalar> TaskFunctor<'a, T> for GemmByBlocks<'a, T> {
    fn name(&self) -> &'static str {
        "gemm_by_blocks"
    }

    fn validate(&self) -> Result<(), BlockwiseError> {
        let (m, k) = op_dims(self.trans_a, &self.a);
        let (kb, n) = op_dims(self.trans_b, &self.b);
        if k != kb || (m, n) != (self.c.nrows(), self.c.ncols()) {
            return Err(BlockwiseError::ShapeMismatch(format!(
                "product of {}x{} and {}x{} into {}x{}",
                m,
                k,
                kb,
                n,
                self.c.nrows(),
                self.c.ncols()
            )));
        }
        require_same_blocking(&self.a, &self.c)?;
        require_same_blocking(&self.b, &self.c)?;
        require_operand(&self.a)?;
        require_operand(&self.b)?;
        require_destination(&self.c)?;
        require_distinct(&self.c, &self.a)?;
        require_distinct(&self.c, &self.b)
    }

    fn census(&self, census: &mut TaskCensus) {
        let (r, c) = (self.rows.len(), self.cols.len());
        census.add(record_footprint::<Self>(), split_records(r, c));
        census.add(record_footprint::<GemmLeaf<'a, T>>(), r * c * self.inner_blocks().max(1));
    }

    fn grids(&self, visit: &mut dyn FnMut(&Arc<BlockMatrix<'a, T>>, GridAccess)) {
        visit(&self.a, GridAccess::Read);
        visit(&self.b, GridAccess::Read);
        visit(&self.c, GridAccess::Write);
    }

    fn execute(self, ctx: &TaskContext<'_, 'a, T>) -> Result<(), BlockwiseError> {
        let (r, c) = (self.rows.len(), self.cols.len());
        if r == 0 || c == 0 {
            return Ok(());
        }
        if r > 1 || c > 1 {
            let (first, second) = if r >= c {
                let mid = self.rows.start + r / 2;
                (
                    self.with_range(self.rows.start..mid, self.cols.clone()),
                    self.with_range(mid..self.rows.end, self.cols.clone()),
                )
            } else {
                let mid = self.cols.start + c / 2;
                (
                    self.with_range(self.rows.clone(), self.cols.start..mid),
                    self.with_range(self.rows.clone(), mid..self.cols.end),
                )
            };
            ctx.spawn(first, TaskPriority::High)?;
            ctx.spawn(second, TaskPriority::High)?;
            return Ok(());
        }

        let (i, j) = (self.rows.start, self.cols.start);
        let target = *self.c.tile(i, j);
        let inner = self.inner_blocks();
        if inner == 0 {
            ctx.spawn_leaf(
                GemmLeaf::new(
                    self.trans_a,
                    self.trans_b,
                    self.alpha,
                    empty_operand(self.trans_a, target.nrows(), 0),
                    empty_operand(self.trans_b, 0, target.ncols()),
                    self.beta,
                    target,
                ),
                TaskPriority::Regular,
                &[],
                self.c.handle(i, j),
            )?;
            return Ok(());
        }

        for p in 0..inner {
            let beta = if p == 0 { self.beta } else { T::one() };
            let (a_tile, a_handle) = self.a_tile(i, p);
            let (b_tile, b_handle) = self.b_tile(p, j);
            ctx.spawn_leaf(
                GemmLeaf::new(self.trans_a, self.trans_b, self.alpha, *a_tile, *b_tile, beta, target),
                TaskPriority::Regular,
                &[a_handle, b_handle],
                self.c.handle(i, j),
            )?;
        }
        Ok(())
    }
}

/// Multiply into `c` and wait. Handles of all three grids are cleared
/// afterwards.
#[allow(clippy::too_many_arguments)]
pub fn gemm_by_blocks<'a, T: Scalar>(
    scheduler: &TaskScheduler<'a, T>,
    trans_a: Trans,
    trans_b: Trans,
    alpha: T,
    a: &Arc<BlockMatrix<'a, T>>,
    b: &Arc<BlockMatrix<'a, T>>,
    beta: T,
    c: &Arc<BlockMatrix<'a, T>>,
) -> Result<(), BlockwiseError> {
    debug!("Matrix product by blocks: {}x{} destination", c.nrows(), c.ncols());
    let functor = GemmByBlocks::new(trans_a, trans_b, alpha, Arc::clone(a), Arc::clone(b), beta, Arc::clone(c));
    let result = scheduler
        .spawn(functor, TaskPriority::High)
        .and_then(|_| scheduler.wait());
    a.clear_handles();
    b.clear_handles();
    c.clear_handles();
    result
}
