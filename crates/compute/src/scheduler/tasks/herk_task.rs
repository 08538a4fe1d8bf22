use std::ops::Range;
use std::sync::Arc;

use blockwise_core::BlockwiseError;
use tracing::debug;

use crate::blocks::BlockMatrix;
use crate::kernels::Trans;
use crate::scheduler::arena::TaskCensus;
use crate::scheduler::runner::TaskScheduler;
use crate::scheduler::task::{record_footprint, GridAccess, TaskContext, TaskFunctor};
use crate::scheduler::types::TaskPriority;
use crate::view::Scalar;

use super::leaf_task::{empty_operand, GemmLeaf, HerkLeaf};
use super::{require_distinct, require_destination, require_operand, require_same_blocking, split_records};

/// Rank-k update `C = alpha Aᵗ A + beta C` on the upper block triangle of
/// `C`, with `A` `k x n` and `C` `n x n`.
///
/// The block columns of `C` are halved recursively; each single column
/// `j` then chains one leaf per block row `p` of `A` through every tile
/// `C(i,j)`, `i <= j`. `beta` is applied by the first link only.
pub struct HerkByBlocks<'a, T> {
    alpha: T,
    beta: T,
    a: Arc<BlockMatrix<'a, T>>,
    c: Arc<BlockMatrix<'a, T>>,
    cols: Range<usize>,
}

impl<'a, T> HerkByBlocks<'a, T> {
    pub fn new(alpha: T, a: Arc<BlockMatrix<'a, T>>, beta: T, c: Arc<BlockMatrix<'a, T>>) -> Self {
        let cols = 0..c.ncol_blocks();
        Self { alpha, beta, a, c, cols }
    }

    fn with_cols(&self, cols: Range<usize>) -> Self
    where
        T: Copy,
    {
        Self {
            alpha: self.alpha,
            beta: self.beta,
            a: Arc::clone(&self.a),
            c: Arc::clone(&self.c),
            cols,
        }
    }
}

impl<'a, T: Scalar> TaskFunctor<'a, T> for HerkByBlocks<'a, T> {
    fn name(&self) -> &'static str {
        "herk_by_blocks"
    }

    fn validate(&self) -> Result<(), BlockwiseError> {
        if self.c.nrows() != self.c.ncols() || self.a.ncols() != self.c.nrows() {
            return Err(BlockwiseError::ShapeMismatch(format!(
                "rank-k update of a {}x{} matrix by a {}x{} factor",
                self.c.nrows(),
                self.c.ncols(),
                self.a.nrows(),
                self.a.ncols()
            )));
        }
        require_same_blocking(&self.a, &self.c)?;
        require_operand(&self.a)?;
        require_destination(&self.c)?;
        require_distinct(&self.c, &self.a)
    }

    fn census(&self, census: &mut TaskCensus) {
        let links = self.a.nrow_blocks().max(1);
        let (mut diagonal, mut off_diagonal) = (0, 0);
        for j in self.cols.clone() {
            diagonal += links;
            off_diagonal += j * links;
        }
        census.add(record_footprint::<Self>(), split_records(1, self.cols.len()));
        census.add(record_footprint::<HerkLeaf<'a, T>>(), diagonal);
        census.add(record_footprint::<GemmLeaf<'a, T>>(), off_diagonal);
    }

    fn grids(&self, visit: &mut dyn FnMut(&Arc<BlockMatrix<'a, T>>, GridAccess)) {
        visit(&self.a, GridAccess::Read);
        visit(&self.c, GridAccess::Write);
    }

    fn execute(self, ctx: &TaskContext<'_, 'a, T>) -> Result<(), BlockwiseError> {
        if self.cols.len() > 1 {
            let mid = self.cols.start + self.cols.len() / 2;
            ctx.spawn(self.with_cols(self.cols.start..mid), TaskPriority::High)?;
            ctx.spawn(self.with_cols(mid..self.cols.end), TaskPriority::High)?;
            return Ok(());
        }
        let Some(j) = self.cols.clone().next() else {
            return Ok(());
        };

        let (a, c) = (&self.a, &self.c);
        for i in 0..=j {
            let target = *c.tile(i, j);
            if a.nrow_blocks() == 0 {
                // Empty inner dimension: only the beta scaling remains.
                if i == j {
                    let factor = empty_operand(Trans::Transpose, target.ncols(), 0);
                    ctx.spawn_leaf(
                        HerkLeaf::new(self.alpha, factor, self.beta, target),
                        TaskPriority::Regular,
                        &[],
                        c.handle(i, j),
                    )?;
                } else {
                    ctx.spawn_leaf(
                        GemmLeaf::new(
                            Trans::Transpose,
                            Trans::NoTranspose,
                            self.alpha,
                            empty_operand(Trans::Transpose, target.nrows(), 0),
                            empty_operand(Trans::NoTranspose, 0, target.ncols()),
                            self.beta,
                            target,
                        ),
                        TaskPriority::Regular,
                        &[],
                        c.handle(i, j),
                    )?;
                }
                continue;
            }

            for p in 0..a.nrow_blocks() {
                let beta = if p == 0 { self.beta } else { T::one() };
                if i == j {
                    ctx.spawn_leaf(
                        HerkLeaf::new(self.alpha, *a.tile(p, j), beta, target),
                        TaskPriority::Regular,
                        &[a.handle(p, j)],
                        c.handle(j, j),
                    )?;
                } else {
                    ctx.spawn_leaf(
                        GemmLeaf::new(
                            Trans::Transpose,
                            Trans::NoTranspose,
                            self.alpha,
                            *a.tile(p, i),
                            *a.tile(p, j),
                            beta,
                            target,
                        ),
                        TaskPriority::Regular,
                        &[a.handle(p, i), a.handle(p, j)],
                        c.handle(i, j),
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Update `c` and wait. Handles of both grids are cleared afterwards.
pub fn herk_by_blocks<'a, T: Scalar>(
    scheduler: &TaskScheduler<'a, T>,
    alpha: T,
    a: &Arc<BlockMatrix<'a, T>>,
    beta: T,
    c: &Arc<BlockMatrix<'a, T>>,
) -> Result<(), BlockwiseError> {
    debug!("Rank-k update by blocks: {}x{} from a {}x{} factor", c.nrows(), c.ncols(), a.nrows(), a.ncols());
    let result = scheduler
        .spawn(HerkByBlocks::new(alpha, Arc::clone(a), beta, Arc::clone(c)), TaskPriority::High)
        .and_then(|_| scheduler.wait());
    a.clear_handles();
    c.clear_handles();
    result
}
