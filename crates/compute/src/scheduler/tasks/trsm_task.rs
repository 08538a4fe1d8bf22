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

use super::leaf_task::{GemmLeaf, TrsmLeaf};
use super::{require_distinct, require_destination, require_operand, require_same_blocking};

/// Solve `Aᵗ X = alpha B` in place of `B`, `A` upper triangular by blocks.
///
/// Step `k` solves block row `k` of `B` against the diagonal tile `A(k,k)`,
/// then updates every block row below it. `alpha` is applied once, on the
/// first step; later steps see already scaled data.
pub struct TrsmByBlocks<'a, T> {
    alpha: T,
    a: Arc<BlockMatrix<'a, T>>,
    b: Arc<BlockMatrix<'a, T>>,
    step: usize,
}

impl<'a, T> TrsmByBlocks<'a, T> {
    pub fn new(alpha: T, a: Arc<BlockMatrix<'a, T>>, b: Arc<BlockMatrix<'a, T>>) -> Self {
        Self { alpha, a, b, step: 0 }
    }
}

impl<'a, T: Scalar> TaskFunctor<'a, T> for TrsmByBlocks<'a, T> {
    fn name(&self) -> &'static str {
        "trsm_by_blocks"
    }

    fn validate(&self) -> Result<(), BlockwiseError> {
        if self.a.nrows() != self.a.ncols() || self.a.nrows() != self.b.nrows() {
            return Err(BlockwiseError::ShapeMismatch(format!(
                "triangular solve with a {}x{} factor against a {}x{} right-hand side",
                self.a.nrows(),
                self.a.ncols(),
                self.b.nrows(),
                self.b.ncols()
            )));
        }
        require_same_blocking(&self.a, &self.b)?;
        require_operand(&self.a)?;
        require_destination(&self.b)?;
        require_distinct(&self.b, &self.a)
    }

    fn census(&self, census: &mut TaskCensus) {
        let n = self.a.nrow_blocks().saturating_sub(self.step);
        let bn = self.b.ncol_blocks();
        census.add(record_footprint::<Self>(), n.max(1));
        census.add(record_footprint::<TrsmLeaf<'a, T>>(), n * bn);
        census.add(record_footprint::<GemmLeaf<'a, T>>(), bn * n * n.saturating_sub(1) / 2);
    }

    fn grids(&self, visit: &mut dyn FnMut(&Arc<BlockMatrix<'a, T>>, GridAccess)) {
        visit(&self.a, GridAccess::Read);
        visit(&self.b, GridAccess::Write);
    }

    fn execute(self, ctx: &TaskContext<'_, 'a, T>) -> Result<(), BlockwiseError> {
        let (a, b) = (&self.a, &self.b);
        let k = self.step;
        let bm = a.nrow_blocks();
        if k >= bm {
            return Ok(());
        }
        let alpha = if k == 0 { self.alpha } else { T::one() };

        for j in 0..b.ncol_blocks() {
            ctx.spawn_leaf(
                TrsmLeaf::new(alpha, *a.tile(k, k), *b.tile(k, j)),
                TaskPriority::High,
                &[a.handle(k, k)],
                b.handle(k, j),
            )?;
        }

        for j in 0..b.ncol_blocks() {
            for i in (k + 1)..bm {
                let priority = if i == k + 1 { TaskPriority::High } else { TaskPriority::Regular };
                ctx.spawn_leaf(
                    GemmLeaf::new(
                        Trans::Transpose,
                        Trans::NoTranspose,
                        -T::one(),
                        *a.tile(k, i),
                        *b.tile(k, j),
                        alpha,
                        *b.tile(i, j),
                    ),
                    priority,
                    &[a.handle(k, i), b.handle(k, j)],
                    b.handle(i, j),
                )?;
            }
        }

        if k + 1 < bm {
            ctx.spawn(
                TrsmByBlocks {
                    alpha: self.alpha,
                    a: Arc::clone(&self.a),
                    b: Arc::clone(&self.b),
                    step: k + 1,
                },
                TaskPriority::High,
            )?;
        }
        Ok(())
    }
}

/// Solve in place of `b` and wait. Handles of both grids are cleared
/// afterwards.
pub fn trsm_by_blocks<'a, T: Scalar>(
    scheduler: &TaskScheduler<'a, T>,
    alpha: T,
    a: &Arc<BlockMatrix<'a, T>>,
    b: &Arc<BlockMatrix<'a, T>>,
) -> Result<(), BlockwiseError> {
    debug!("Triangular solve by blocks: {}x{} right-hand side", b.nrows(), b.ncols());
    let result = scheduler
        .spawn(TrsmByBlocks::new(alpha, Arc::clone(a), Arc::clone(b)), TaskPriority::High)
        .and_then(|_| scheduler.wait());
    a.clear_handles();
    b.clear_handles();
    result
}
