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

use super::leaf_task::{CholLeaf, GemmLeaf, HerkLeaf, TrsmLeaf};
use super::require_destination;

/// Upper Cholesky `A = Rᵗ R` of a square block matrix, in place.
///
/// Step `k` factors the diagonal tile, solves the panel to its right,
/// updates the trailing upper triangle, then spawns step `k + 1`. Panel
/// work and the first trailing row run at high priority so the next
/// diagonal tile is reached as early as possible.
pub struct CholByBlocks<'a, T> {
    a: Arc<BlockMatrix<'a, T>>,
    step: usize,
}

impl<'a, T> CholByBlocks<'a, T> {
    pub fn new(a: Arc<BlockMatrix<'a, T>>) -> Self {
        Self { a, step: 0 }
    }
}

impl<'a, T: Scalar> TaskFunctor<'a, T> for CholByBlocks<'a, T> {
    fn name(&self) -> &'static str {
        "chol_by_blocks"
    }

    fn validate(&self) -> Result<(), BlockwiseError> {
        if self.a.nrows() != self.a.ncols() {
            return Err(BlockwiseError::ShapeMismatch(format!(
                "Cholesky of a non-square {}x{} matrix",
                self.a.nrows(),
                self.a.ncols()
            )));
        }
        require_destination(&self.a)
    }

    fn census(&self, census: &mut TaskCensus) {
        let n = self.a.nrow_blocks().saturating_sub(self.step);
        let pairs = n * n.saturating_sub(1) / 2;
        let triples = n * n.saturating_sub(1) * n.saturating_sub(2) / 6;
        census.add(record_footprint::<Self>(), n.max(1));
        census.add(record_footprint::<CholLeaf<'a, T>>(), n);
        census.add(record_footprint::<TrsmLeaf<'a, T>>(), pairs);
        census.add(record_footprint::<HerkLeaf<'a, T>>(), pairs);
        census.add(record_footprint::<GemmLeaf<'a, T>>(), triples);
    }

    fn grids(&self, visit: &mut dyn FnMut(&Arc<BlockMatrix<'a, T>>, GridAccess)) {
        visit(&self.a, GridAccess::Write);
    }

    fn execute(self, ctx: &TaskContext<'_, 'a, T>) -> Result<(), BlockwiseError> {
        let a = &self.a;
        let k = self.step;
        let bm = a.nrow_blocks();
        if k >= bm {
            return Ok(());
        }
        let (one, minus_one) = (T::one(), -T::one());

        ctx.spawn_leaf(
            CholLeaf::new(*a.tile(k, k), k * a.block_size()),
            TaskPriority::High,
            &[],
            a.handle(k, k),
        )?;

        for j in (k + 1)..bm {
            ctx.spawn_leaf(
                TrsmLeaf::new(one, *a.tile(k, k), *a.tile(k, j)),
                TaskPriority::High,
                &[a.handle(k, k)],
                a.handle(k, j),
            )?;
        }

        for j in (k + 1)..bm {
            for i in (k + 1)..=j {
                let priority = if i == k + 1 { TaskPriority::High } else { TaskPriority::Regular };
                if i == j {
                    ctx.spawn_leaf(
                        HerkLeaf::new(minus_one, *a.tile(k, j), one, *a.tile(j, j)),
                        priority,
                        &[a.handle(k, j)],
                        a.handle(j, j),
                    )?;
                } else {
                    ctx.spawn_leaf(
                        GemmLeaf::new(
                            Trans::Transpose,
                            Trans::NoTranspose,
                            minus_one,
                            *a.tile(k, i),
                            *a.tile(k, j),
                            one,
                            *a.tile(i, j),
                        ),
                        priority,
                        &[a.handle(k, i), a.handle(k, j)],
                        a.handle(i, j),
                    )?;
                }
            }
        }

        if k + 1 < bm {
            ctx.spawn(
                CholByBlocks { a: Arc::clone(&self.a), step: k + 1 },
                TaskPriority::High,
            )?;
        }
        Ok(())
    }
}

/// Factor `a` in place and wait for the result. The tile handles are
/// cleared afterwards, also on failure, so the grid can be reused.
pub fn chol_by_blocks<'a, T: Scalar>(
    scheduler: &TaskScheduler<'a, T>,
    a: &Arc<BlockMatrix<'a, T>>,
) -> Result<(), BlockwiseError> {
    debug!("Cholesky by blocks: {}x{} in {}-blocks", a.nrows(), a.ncols(), a.block_size());
    let result = scheduler
        .spawn(CholByBlocks::new(Arc::clone(a)), TaskPriority::High)
        .and_then(|_| scheduler.wait());
    a.clear_handles();
    result
}
