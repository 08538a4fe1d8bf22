mod chol_task;
mod gemm_task;
mod herk_task;
mod leaf_task;
mod trsm_task;

use std::sync::Arc;

use blockwise_core::BlockwiseError;

use crate::blocks::BlockMatrix;

pub use chol_task::{chol_by_blocks, CholByBlocks};
pub use gemm_task::{gemm_by_blocks, GemmByBlocks};
pub use herk_task::{herk_by_blocks, HerkByBlocks};
pub use leaf_task::{CholLeaf, GemmLeaf, HerkLeaf, TrsmLeaf};
pub use trsm_task::{trsm_by_blocks, TrsmByBlocks};

/// Records created by recursively halving an `r x c` block rectangle down
/// to single tiles, the rectangle itself included.
pub(crate) fn split_records(r: usize, c: usize) -> usize {
    (2 * r * c).saturating_sub(1).max(1)
}

fn require_operand<T>(m: &BlockMatrix<'_, T>) -> Result<(), BlockwiseError> {
    if m.is_attached() {
        Ok(())
    } else {
        Err(BlockwiseError::InvalidLayout(format!(
            "{}x{} operand has no base buffer",
            m.nrows(),
            m.ncols()
        )))
    }
}

fn require_destination<T>(m: &BlockMatrix<'_, T>) -> Result<(), BlockwiseError> {
    require_operand(m)?;
    if m.is_writable() {
        Ok(())
    } else {
        Err(BlockwiseError::InvalidLayout(format!(
            "{}x{} destination is read-only",
            m.nrows(),
            m.ncols()
        )))
    }
}

/// The destination must not be an operand grid as well.
fn require_distinct<T>(dest: &Arc<BlockMatrix<'_, T>>, operand: &Arc<BlockMatrix<'_, T>>) -> Result<(), BlockwiseError> {
    if Arc::ptr_eq(dest, operand) {
        Err(BlockwiseError::InvalidLayout("destination aliases an operand".into()))
    } else {
        Ok(())
    }
}

fn require_same_blocking<T>(x: &BlockMatrix<'_, T>, y: &BlockMatrix<'_, T>) -> Result<(), BlockwiseError> {
    if x.block_size() == y.block_size() {
        Ok(())
    } else {
        Err(BlockwiseError::ShapeMismatch(format!(
            "block sizes differ: {} and {}",
            x.block_size(),
            y.block_size()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::Trans;
    use crate::scheduler::arena::TaskCensus;
    use crate::scheduler::task::{GridAccess, TaskFunctor};

    #[test]
    fn halving_records() {
        assert_eq!(split_records(0, 5), 1);
        assert_eq!(split_records(1, 1), 1);
        assert_eq!(split_records(2, 3), 11);
    }

    #[test]
    fn chol_census_counts_every_record() {
        let grid = Arc::new(BlockMatrix::<f64>::new(9, 9, 3).unwrap());
        let mut census = TaskCensus::default();
        CholByBlocks::new(grid).census(&mut census);
        // 3 steps, 3 chol, 3 trsm, 3 herk, 1 gemm.
        assert_eq!(census.total_records(), 13);
    }

    #[test]
    fn gemm_census_counts_every_record() {
        let a = Arc::new(BlockMatrix::<f64>::new(4, 6, 2).unwrap());
        let b = Arc::new(BlockMatrix::<f64>::new(6, 4, 2).unwrap());
        let c = Arc::new(BlockMatrix::<f64>::new(4, 4, 2).unwrap());
        let mut census = TaskCensus::default();
        GemmByBlocks::new(Trans::NoTranspose, Trans::NoTranspose, 1.0, a, b, 0.0, c).census(&mut census);
        // 2x2 destination: 7 halving records and 3 leaves per tile.
        assert_eq!(census.total_records(), 7 + 12);
    }

    #[test]
    fn unattached_destination_is_rejected() {
        let a = Arc::new(BlockMatrix::<f64>::new(4, 4, 2).unwrap());
        let err = CholByBlocks::new(a).validate().unwrap_err();
        assert!(matches!(err, BlockwiseError::InvalidLayout(_)));
    }

    #[test]
    fn non_square_cholesky_is_rejected() {
        let mut buf = vec![0.0f64; 12];
        let a = Arc::new(BlockMatrix::col_major(&mut buf, 3, 4, 2).unwrap());
        let err = CholByBlocks::new(a).validate().unwrap_err();
        assert!(matches!(err, BlockwiseError::ShapeMismatch(_)));
    }

    #[test]
    fn aliased_destination_is_rejected() {
        let mut buf = vec![0.0f64; 16];
        let a = Arc::new(BlockMatrix::col_major(&mut buf, 4, 4, 2).unwrap());
        let functor = TrsmByBlocks::new(1.0, Arc::clone(&a), a);
        let err = functor.validate().unwrap_err();
        assert!(matches!(err, BlockwiseError::InvalidLayout(_)));
    }

    #[test]
    fn mismatched_blocking_is_rejected() {
        let mut abuf = vec![0.0f64; 16];
        let mut bbuf = vec![0.0f64; 16];
        let a = Arc::new(BlockMatrix::col_major(&mut abuf, 4, 4, 2).unwrap());
        let b = Arc::new(BlockMatrix::col_major(&mut bbuf, 4, 4, 3).unwrap());
        let err = TrsmByBlocks::new(1.0, a, b).validate().unwrap_err();
        assert!(matches!(err, BlockwiseError::ShapeMismatch(_)));
    }

    #[test]
    fn roots_report_their_grids() {
        let a = Arc::new(BlockMatrix::<f64>::new(4, 4, 2).unwrap());
        let b = Arc::new(BlockMatrix::<f64>::new(4, 4, 2).unwrap());
        let c = Arc::new(BlockMatrix::<f64>::new(4, 4, 2).unwrap());
        let functor = GemmByBlocks::new(Trans::NoTranspose, Trans::NoTranspose, 1.0, a.clone(), b.clone(), 0.0, c.clone());
        let mut seen = Vec::new();
        functor.grids(&mut |grid, access| seen.push((Arc::as_ptr(grid), access)));
        assert_eq!(
            seen,
            vec![
                (Arc::as_ptr(&a), GridAccess::Read),
                (Arc::as_ptr(&b), GridAccess::Read),
                (Arc::as_ptr(&c), GridAccess::Write),
            ]
        );

        let mut seen = Vec::new();
        CholByBlocks::new(a.clone()).grids(&mut |grid, access| seen.push((Arc::as_ptr(grid), access)));
        assert_eq!(seen, vec![(Arc::as_ptr(&a), GridAccess::Write)]);
    }
}
