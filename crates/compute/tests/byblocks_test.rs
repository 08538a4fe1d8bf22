//! Integration tests for the by-blocks operations.
//!
//! Every operation is checked against the unblocked reference on the same
//! inputs, for block sizes that divide the matrix and block sizes that
//! leave ragged edge tiles.

use std::sync::Arc;

use blockwise_compute::reference::{self, Operand};
use blockwise_compute::scheduler::task::record_footprints;
use blockwise_compute::*;
use blockwise_core::BlockwiseError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ── Helpers ──────────────────────────────────────────────────────────

fn random(len: usize, seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// `Bᵗ B + n I` for a random `n x n` matrix `B`, column-major.
fn spd(n: usize, seed: u64) -> Vec<f64> {
    let b = random(n * n, seed);
    let mut a = vec![0.0; n * n];
    for j in 0..n {
        for i in 0..n {
            let dot: f64 = (0..n).map(|p| b[p + i * n] * b[p + j * n]).sum();
            a[i + j * n] = dot + if i == j { n as f64 } else { 0.0 };
        }
    }
    a
}

/// 4 on the diagonal, 1 on both off-diagonals.
fn tridiagonal(n: usize) -> Vec<f64> {
    let mut a = vec![0.0; n * n];
    for i in 0..n {
        a[i + i * n] = 4.0;
        if i + 1 < n {
            a[i + (i + 1) * n] = 1.0;
            a[(i + 1) + i * n] = 1.0;
        }
    }
    a
}

/// Copy of `a` with the strictly lower triangle zeroed.
fn upper(a: &[f64], n: usize) -> Vec<f64> {
    let mut r = a.to_vec();
    for j in 0..n {
        for i in (j + 1)..n {
            r[i + j * n] = 0.0;
        }
    }
    r
}

fn config(workers: usize, n: usize, mb: usize) -> SchedulerConfig {
    SchedulerConfig::for_problem::<f64>(workers, n.div_ceil(mb))
}

fn run_chol(a: &mut [f64], n: usize, mb: usize, workers: usize) -> Result<(), BlockwiseError> {
    let scheduler = TaskScheduler::configure(config(workers, n, mb))?;
    let grid = Arc::new(BlockMatrix::col_major(a, n, n, mb)?);
    chol_by_blocks(&scheduler, &grid)?;
    assert!(grid.handles_clear());
    assert_eq!(scheduler.live_tasks(), 0);
    Ok(())
}

fn run_trsm(alpha: f64, a: &[f64], b: &mut [f64], m: usize, n: usize, mb: usize) -> Result<(), BlockwiseError> {
    let scheduler = TaskScheduler::configure(config(4, m.max(n), mb))?;
    let ga = Arc::new(BlockMatrix::read_only(a, m, m, 1, m, mb)?);
    let gb = Arc::new(BlockMatrix::col_major(b, m, n, mb)?);
    trsm_by_blocks(&scheduler, alpha, &ga, &gb)
}

// ── Cholesky ─────────────────────────────────────────────────────────

#[test]
fn test_chol_tridiagonal_reconstructs_input() {
    let n = 4;
    let a = tridiagonal(n);
    let mut r = a.clone();
    run_chol(&mut r, n, 2, 2).unwrap();
    let r = upper(&r, n);

    for j in 0..n {
        for i in 0..n {
            let rtr: f64 = (0..=i.min(j)).map(|p| r[p + i * n] * r[p + j * n]).sum();
            assert!((rtr - a[i + j * n]).abs() < 1e-10, "({}, {}): {} vs {}", i, j, rtr, a[i + j * n]);
        }
    }
}

#[test]
fn test_chol_matches_reference_for_even_and_ragged_blocks() {
    let n = 12;
    let a = spd(n, 11);
    let mut expected = a.clone();
    reference::chol_upper(&mut expected, n, n).unwrap();

    for mb in [1, 3, 4, 5, 12, 16] {
        let mut actual = a.clone();
        run_chol(&mut actual, n, mb, 4).unwrap();
        let err = reference::relative_error(&expected, &actual);
        assert!(err < 1e-12, "mb={}: relative error {}", mb, err);
    }
}

#[test]
fn test_chol_leaves_lower_triangle_untouched() {
    let n = 7;
    let a = spd(n, 3);
    let mut r = a.clone();
    run_chol(&mut r, n, 3, 3).unwrap();
    for j in 0..n {
        for i in (j + 1)..n {
            assert_eq!(r[i + j * n], a[i + j * n]);
        }
    }
}

#[test]
fn test_chol_result_is_independent_of_block_and_worker_count() {
    let n = 10;
    let a = spd(n, 5);

    let mut one = a.clone();
    let mut two = a.clone();
    run_chol(&mut one, n, 1, 1).unwrap();
    run_chol(&mut two, n, 2, 4).unwrap();
    assert!(reference::relative_error(&one, &two) < 1e-12);

    // Each tile's updates are chained in a fixed order, so the worker
    // count cannot change a single bit.
    let mut serial = a.clone();
    let mut parallel = a.clone();
    run_chol(&mut serial, n, 3, 1).unwrap();
    run_chol(&mut parallel, n, 3, 8).unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn test_chol_not_positive_definite_reports_global_column() {
    let n = 6;
    let mut a = spd(n, 9);
    // The leading 4x4 minor stays positive definite; the pivot of column 4 cannot.
    a[4 + 4 * n] = -100.0;
    let err = run_chol(&mut a, n, 2, 2).unwrap_err();
    assert!(matches!(err, BlockwiseError::NotPositiveDefinite { column: 4 }), "{:?}", err);
}

#[test]
fn test_scheduler_reusable_after_failed_factorization() {
    let n = 6;
    let mut bad = spd(n, 2);
    bad[0] = -1.0;
    let good_src = spd(n, 2);
    let mut good = good_src.clone();
    {
        let scheduler = TaskScheduler::configure(config(3, n, 2)).unwrap();
        let grid = Arc::new(BlockMatrix::col_major(&mut bad, n, n, 2).unwrap());
        let err = chol_by_blocks(&scheduler, &grid).unwrap_err();
        assert!(matches!(err, BlockwiseError::NotPositiveDefinite { column: 0 }));
        assert!(grid.handles_clear());

        let grid = Arc::new(BlockMatrix::col_major(&mut good, n, n, 2).unwrap());
        chol_by_blocks(&scheduler, &grid).unwrap();
        assert_eq!(scheduler.metrics().operations_aborted, 1);
        assert_eq!(scheduler.metrics().operations_completed, 1);
    }
    let mut expected = good_src;
    reference::chol_upper(&mut expected, n, n).unwrap();
    assert!(reference::relative_error(&expected, &good) < 1e-12);
}

// ── Triangular solve ─────────────────────────────────────────────────

#[test]
fn test_trsm_small_against_reference() {
    let (m, n, mb) = (5, 5, 2);
    let mut factor = spd(m, 21);
    reference::chol_upper(&mut factor, m, m).unwrap();
    let b = random(m * n, 22);

    let mut expected = b.clone();
    reference::trsm_left_upper_trans(-1.0, &factor, m, &mut expected, m, n, m).unwrap();
    let mut actual = b.clone();
    run_trsm(-1.0, &factor, &mut actual, m, n, mb).unwrap();

    let err = reference::relative_error(&expected, &actual);
    assert!(err < 1e-9, "relative error {}", err);
}

#[test]
fn test_trsm_ragged_blocks_solve_the_system() {
    let (m, n) = (11, 4);
    let mut factor = spd(m, 31);
    reference::chol_upper(&mut factor, m, m).unwrap();
    let r = upper(&factor, m);
    let b = random(m * n, 32);

    for mb in [3, 4, 7] {
        let mut x = b.clone();
        run_trsm(2.0, &factor, &mut x, m, n, mb).unwrap();

        // Rᵗ X must equal 2 B.
        let mut rtx = vec![0.0; m * n];
        reference::gemm(
            Trans::Transpose,
            Trans::NoTranspose,
            1.0,
            Operand { data: &r, nrows: m, ncols: m, ld: m },
            Operand { data: &x, nrows: m, ncols: n, ld: m },
            0.0,
            &mut rtx,
            m,
        )
        .unwrap();
        let twice: Vec<f64> = b.iter().map(|v| 2.0 * v).collect();
        let err = reference::relative_error(&twice, &rtx);
        assert!(err < 1e-12, "mb={}: relative error {}", mb, err);
    }
}

#[test]
fn test_trsm_upper_5x5_ragged_residual() {
    let (m, mb, alpha) = (5, 2, 1.5);
    // Upper triangle with a dominant diagonal; the strictly lower triangle
    // holds values the solve must ignore.
    let mut a = random(m * m, 41);
    for j in 0..m {
        a[j + j * m] = 3.0 + j as f64;
        for i in (j + 1)..m {
            a[i + j * m] = 100.0;
        }
    }
    let b = random(m * m, 42);
    let mut x = b.clone();
    run_trsm(alpha, &a, &mut x, m, m, mb).unwrap();

    let r = upper(&a, m);
    let mut atx = vec![0.0; m * m];
    reference::gemm(
        Trans::Transpose,
        Trans::NoTranspose,
        1.0,
        Operand { data: &r, nrows: m, ncols: m, ld: m },
        Operand { data: &x, nrows: m, ncols: m, ld: m },
        0.0,
        &mut atx,
        m,
    )
    .unwrap();
    for (got, rhs) in atx.iter().zip(&b) {
        assert!((got - alpha * rhs).abs() < 1e-9, "{} vs {}", got, alpha * rhs);
    }
}

#[test]
fn test_trsm_rejects_mismatched_shapes() {
    let a = spd(4, 1);
    let mut b = vec![0.0; 5 * 2];
    let err = {
        let scheduler = TaskScheduler::configure(config(1, 5, 2)).unwrap();
        let ga = Arc::new(BlockMatrix::read_only(&a, 4, 4, 1, 4, 2).unwrap());
        let gb = Arc::new(BlockMatrix::col_major(&mut b, 5, 2, 2).unwrap());
        trsm_by_blocks(&scheduler, 1.0, &ga, &gb).unwrap_err()
    };
    assert!(matches!(err, BlockwiseError::ShapeMismatch(_)));
}

// ── Rank-k update ────────────────────────────────────────────────────

#[test]
fn test_herk_against_reference() {
    let (k, n) = (5, 7);
    let a = random(k * n, 41);
    let c = spd(n, 42);

    let mut expected = c.clone();
    reference::herk_upper_trans(-1.0, &a, k, k, 0.5, &mut expected, n, n).unwrap();

    for mb in [2, 3, 7] {
        let mut actual = c.clone();
        {
            let scheduler = TaskScheduler::configure(config(4, n, mb)).unwrap();
            let ga = Arc::new(BlockMatrix::read_only(&a, k, n, 1, k, mb).unwrap());
            let gc = Arc::new(BlockMatrix::col_major(&mut actual, n, n, mb).unwrap());
            herk_by_blocks(&scheduler, -1.0, &ga, 0.5, &gc).unwrap();
        }
        let err = reference::relative_error(&expected, &actual);
        assert!(err < 1e-12, "mb={}: relative error {}", mb, err);
    }
}

// ── Matrix product ───────────────────────────────────────────────────

#[test]
fn test_gemm_square_against_reference() {
    let (n, mb) = (6, 3);
    let a = random(n * n, 51);
    let b = random(n * n, 52);
    let c = random(n * n, 53);

    let mut expected = c.clone();
    reference::gemm(
        Trans::NoTranspose,
        Trans::NoTranspose,
        -1.0,
        Operand { data: &a, nrows: n, ncols: n, ld: n },
        Operand { data: &b, nrows: n, ncols: n, ld: n },
        1.0,
        &mut expected,
        n,
    )
    .unwrap();

    let mut actual = c.clone();
    {
        let scheduler = TaskScheduler::configure(config(4, n, mb)).unwrap();
        let ga = Arc::new(BlockMatrix::read_only(&a, n, n, 1, n, mb).unwrap());
        let gb = Arc::new(BlockMatrix::read_only(&b, n, n, 1, n, mb).unwrap());
        let gc = Arc::new(BlockMatrix::col_major(&mut actual, n, n, mb).unwrap());
        gemm_by_blocks(&scheduler, Trans::NoTranspose, Trans::NoTranspose, -1.0, &ga, &gb, 1.0, &gc).unwrap();
    }
    let err = reference::relative_error(&expected, &actual);
    assert!(err < 1e-9, "relative error {}", err);
}

#[test]
fn test_gemm_transposes_and_ragged_blocks() {
    let (m, n, k) = (7, 6, 5);
    let c = random(m * n, 60);

    for (trans_a, trans_b) in [
        (Trans::NoTranspose, Trans::NoTranspose),
        (Trans::Transpose, Trans::NoTranspose),
        (Trans::NoTranspose, Trans::Transpose),
        (Trans::Transpose, Trans::Transpose),
    ] {
        let (ar, ac) = if trans_a == Trans::NoTranspose { (m, k) } else { (k, m) };
        let (br, bc) = if trans_b == Trans::NoTranspose { (k, n) } else { (n, k) };
        let a = random(ar * ac, 61);
        let b = random(br * bc, 62);

        let mut expected = c.clone();
        reference::gemm(
            trans_a,
            trans_b,
            0.75,
            Operand { data: &a, nrows: ar, ncols: ac, ld: ar },
            Operand { data: &b, nrows: br, ncols: bc, ld: br },
            -2.0,
            &mut expected,
            m,
        )
        .unwrap();

        for mb in [2, 3, 4] {
            let mut actual = c.clone();
            {
                let scheduler = TaskScheduler::configure(config(3, m, mb)).unwrap();
                let ga = Arc::new(BlockMatrix::read_only(&a, ar, ac, 1, ar, mb).unwrap());
                let gb = Arc::new(BlockMatrix::read_only(&b, br, bc, 1, br, mb).unwrap());
                let gc = Arc::new(BlockMatrix::col_major(&mut actual, m, n, mb).unwrap());
                gemm_by_blocks(&scheduler, trans_a, trans_b, 0.75, &ga, &gb, -2.0, &gc).unwrap();
            }
            let err = reference::relative_error(&expected, &actual);
            assert!(err < 1e-12, "{:?}/{:?} mb={}: relative error {}", trans_a, trans_b, mb, err);
        }
    }
}

#[test]
fn test_gemm_empty_inner_dimension_scales_destination() {
    let (m, n, mb) = (5, 4, 2);
    let c = random(m * n, 70);
    let a: Vec<f64> = Vec::new();
    let b: Vec<f64> = Vec::new();
    let mut actual = c.clone();
    {
        let scheduler = TaskScheduler::configure(config(2, m, mb)).unwrap();
        let ga = Arc::new(BlockMatrix::read_only(&a, m, 0, 1, m, mb).unwrap());
        let gb = Arc::new(BlockMatrix::read_only(&b, 0, n, 1, 1, mb).unwrap());
        let gc = Arc::new(BlockMatrix::col_major(&mut actual, m, n, mb).unwrap());
        gemm_by_blocks(&scheduler, Trans::NoTranspose, Trans::NoTranspose, 1.0, &ga, &gb, 3.0, &gc).unwrap();
    }
    let expected: Vec<f64> = c.iter().map(|v| 3.0 * v).collect();
    assert!(reference::relative_error(&expected, &actual) < 1e-15);
}

// ── Grids and handles ────────────────────────────────────────────────

#[test]
fn test_partition_is_idempotent() {
    let (m, n, mb) = (7, 5, 3);
    let mut buf = vec![0.0f64; m * n];
    fn layout(grid: &BlockMatrix<'_, f64>) -> Vec<(usize, usize, usize)> {
        grid.tiles()
            .iter()
            .map(|t| (t.as_ptr() as usize, t.nrows(), t.ncols()))
            .collect()
    }

    let first = layout(&BlockMatrix::col_major(&mut buf, m, n, mb).unwrap());
    let second = layout(&BlockMatrix::col_major(&mut buf, m, n, mb).unwrap());
    assert_eq!(first, second);

    let mut grid = BlockMatrix::new(m, n, mb).unwrap();
    grid.set_matrix_of_blocks(m, n, mb).unwrap();
    grid.attach_base_buffer(&mut buf, 1, m).unwrap();
    assert_eq!(layout(&grid), first);
}

#[test]
fn test_handles_reused_after_clear() {
    let (n, mb) = (9, 4);
    let source = spd(n, 81);
    let mut buf = vec![0.0f64; n * n];

    let scheduler = TaskScheduler::configure(config(4, n, mb)).unwrap();
    let mut grid = Arc::new(BlockMatrix::col_major(&mut buf, n, n, mb).unwrap());

    let mut results = Vec::new();
    for _ in 0..3 {
        Arc::get_mut(&mut grid).unwrap().fill_from_col_major(&source).unwrap();
        chol_by_blocks(&scheduler, &grid).unwrap();
        assert!(grid.handles_clear());
        results.push(Arc::get_mut(&mut grid).unwrap().to_col_major().unwrap());
    }
    assert_eq!(results[0], results[1]);
    assert_eq!(results[1], results[2]);
    assert_eq!(scheduler.metrics().operations_completed, 3);
}

#[test]
fn test_chol_then_trsm_with_separate_waits() {
    let (n, nrhs, mb) = (9, 4, 2);
    let a_src = spd(n, 91);
    let b_src = random(n * nrhs, 92);
    let mut a = a_src.clone();
    let mut b = b_src.clone();
    {
        let scheduler = TaskScheduler::configure(config(4, n, mb)).unwrap();
        let ga = Arc::new(BlockMatrix::col_major(&mut a, n, n, mb).unwrap());
        let gb = Arc::new(BlockMatrix::col_major(&mut b, n, nrhs, mb).unwrap());

        // Handles of `ga` still name the retired Cholesky leaves when the
        // solve is spawned; retired writers impose no wait.
        scheduler.spawn(CholByBlocks::new(Arc::clone(&ga)), TaskPriority::High).unwrap();
        scheduler.wait().unwrap();
        scheduler
            .spawn(TrsmByBlocks::new(1.0, Arc::clone(&ga), Arc::clone(&gb)), TaskPriority::High)
            .unwrap();
        scheduler.wait().unwrap();
    }

    let r = upper(&a, n);
    let mut rtx = vec![0.0; n * nrhs];
    reference::gemm(
        Trans::Transpose,
        Trans::NoTranspose,
        1.0,
        Operand { data: &r, nrows: n, ncols: n, ld: n },
        Operand { data: &b, nrows: n, ncols: nrhs, ld: n },
        0.0,
        &mut rtx,
        n,
    )
    .unwrap();
    assert!(reference::relative_error(&b_src, &rtx) < 1e-12);
}

#[test]
fn test_chol_then_trsm_in_one_wait() {
    let (n, nrhs, mb) = (9, 4, 2);
    let a_src = spd(n, 93);
    let b_src = random(n * nrhs, 94);
    let mut a = a_src.clone();
    let mut b = b_src.clone();
    {
        let scheduler = TaskScheduler::configure(config(4, n, mb)).unwrap();
        let ga = Arc::new(BlockMatrix::col_major(&mut a, n, n, mb).unwrap());
        let gb = Arc::new(BlockMatrix::col_major(&mut b, n, nrhs, mb).unwrap());

        scheduler.spawn(CholByBlocks::new(Arc::clone(&ga)), TaskPriority::High).unwrap();
        scheduler
            .spawn(TrsmByBlocks::new(1.0, Arc::clone(&ga), Arc::clone(&gb)), TaskPriority::High)
            .unwrap();
        scheduler.wait().unwrap();
        ga.clear_handles();
        gb.clear_handles();
        assert!(ga.handles_clear());
    }

    let r = upper(&a, n);
    let mut rtx = vec![0.0; n * nrhs];
    reference::gemm(
        Trans::Transpose,
        Trans::NoTranspose,
        1.0,
        Operand { data: &r, nrows: n, ncols: n, ld: n },
        Operand { data: &b, nrows: n, ncols: nrhs, ld: n },
        0.0,
        &mut rtx,
        n,
    )
    .unwrap();
    assert!(reference::relative_error(&b_src, &rtx) < 1e-12);
}

/// `C = X I` and the Cholesky of `X`, spawned in the given order before a
/// single wait. Returns `(c, x)`.
fn product_and_factor(product_first: bool, workers: usize) -> (Vec<f64>, Vec<f64>) {
    let identity = [1.0, 0.0, 0.0, 1.0];
    let mut x = vec![4.0, 2.0, 2.0, 5.0];
    let mut c = vec![-1.0; 4];
    {
        let scheduler = TaskScheduler::configure(config(workers, 2, 1)).unwrap();
        let gx = Arc::new(BlockMatrix::col_major(&mut x, 2, 2, 1).unwrap());
        let gi = Arc::new(BlockMatrix::read_only(&identity, 2, 2, 1, 2, 1).unwrap());
        let gc = Arc::new(BlockMatrix::col_major(&mut c, 2, 2, 1).unwrap());

        let product = || {
            GemmByBlocks::new(
                Trans::NoTranspose,
                Trans::NoTranspose,
                1.0,
                Arc::clone(&gx),
                Arc::clone(&gi),
                0.0,
                Arc::clone(&gc),
            )
        };
        if product_first {
            scheduler.spawn(product(), TaskPriority::Low).unwrap();
            scheduler.spawn(CholByBlocks::new(Arc::clone(&gx)), TaskPriority::High).unwrap();
        } else {
            scheduler.spawn(CholByBlocks::new(Arc::clone(&gx)), TaskPriority::Low).unwrap();
            scheduler.spawn(product(), TaskPriority::High).unwrap();
        }
        scheduler.wait().unwrap();
        assert_eq!(scheduler.live_tasks(), 0);
    }
    (c, x)
}

#[test]
fn test_reader_root_completes_before_later_writer_root() {
    // R = [[2, 1], [0, 2]]; the lower triangle of X keeps its input.
    for workers in [1, 4] {
        let (c, x) = product_and_factor(true, workers);
        assert_eq!(c, vec![4.0, 2.0, 2.0, 5.0], "workers={}", workers);
        assert_eq!(x, vec![2.0, 2.0, 1.0, 2.0], "workers={}", workers);
    }
}

#[test]
fn test_writer_root_completes_before_later_reader_root() {
    for workers in [1, 4] {
        let (c, x) = product_and_factor(false, workers);
        assert_eq!(x, vec![2.0, 2.0, 1.0, 2.0], "workers={}", workers);
        assert_eq!(c, x, "workers={}", workers);
    }
}

#[test]
fn test_independent_reader_roots_share_an_operand() {
    let (n, mb) = (6, 2);
    let a = random(n * n, 95);
    let b = random(n * n, 96);
    let mut c1 = vec![0.0; n * n];
    let mut c2 = vec![0.0; n * n];
    let mut expected = vec![0.0; n * n];
    reference::gemm(
        Trans::NoTranspose,
        Trans::NoTranspose,
        1.0,
        Operand { data: &a, nrows: n, ncols: n, ld: n },
        Operand { data: &b, nrows: n, ncols: n, ld: n },
        0.0,
        &mut expected,
        n,
    )
    .unwrap();
    {
        let scheduler = TaskScheduler::configure(config(4, n, mb)).unwrap();
        let ga = Arc::new(BlockMatrix::read_only(&a, n, n, 1, n, mb).unwrap());
        let gb = Arc::new(BlockMatrix::read_only(&b, n, n, 1, n, mb).unwrap());
        let gc1 = Arc::new(BlockMatrix::col_major(&mut c1, n, n, mb).unwrap());
        let gc2 = Arc::new(BlockMatrix::col_major(&mut c2, n, n, mb).unwrap());
        for gc in [gc1, gc2] {
            let functor = GemmByBlocks::new(
                Trans::NoTranspose,
                Trans::NoTranspose,
                1.0,
                Arc::clone(&ga),
                Arc::clone(&gb),
                0.0,
                gc,
            );
            scheduler.spawn(functor, TaskPriority::Regular).unwrap();
        }
        scheduler.wait().unwrap();
        assert_eq!(ga.grid_handle().readers().len(), 2);
    }
    assert!(reference::relative_error(&expected, &c1) < 1e-12);
    assert_eq!(c1, c2);
}

// ── Arena admission ──────────────────────────────────────────────────

#[test]
fn test_queue_exhausted_leaves_buffer_untouched() {
    let n = 16;
    let largest = record_footprints::<f64>().into_iter().max().unwrap().next_power_of_two();
    let tiny = SchedulerConfig::new(
        2,
        ArenaConfig {
            queue_capacity: 8 * largest,
            min_task_size: 16,
            max_task_size: largest,
            superblock_size: 4 * largest,
        },
    );
    let source = spd(n, 101);
    let mut a = source.clone();
    {
        let scheduler = TaskScheduler::configure(tiny).unwrap();
        let grid = Arc::new(BlockMatrix::col_major(&mut a, n, n, 1).unwrap());
        let err = chol_by_blocks(&scheduler, &grid).unwrap_err();
        assert!(matches!(err, BlockwiseError::QueueExhausted { .. }));
        assert!(err.is_fatal());
        assert_eq!(scheduler.live_tasks(), 0);
    }
    assert_eq!(a, source);
}

#[test]
fn test_problem_sizing_admits_largest_graph() {
    let (n, mb) = (24, 3);
    let a = random(n * n, 111);
    let b = random(n * n, 112);
    let mut c = vec![0.0; n * n];
    let scheduler = TaskScheduler::configure(config(4, n, mb)).unwrap();
    let ga = Arc::new(BlockMatrix::read_only(&a, n, n, 1, n, mb).unwrap());
    let gb = Arc::new(BlockMatrix::read_only(&b, n, n, 1, n, mb).unwrap());
    let gc = Arc::new(BlockMatrix::col_major(&mut c, n, n, mb).unwrap());
    gemm_by_blocks(&scheduler, Trans::NoTranspose, Trans::NoTranspose, 1.0, &ga, &gb, 0.0, &gc).unwrap();

    let metrics = scheduler.metrics();
    assert_eq!(metrics.tasks_executed["gemm"], 8 * 8 * 8);
    assert!(metrics.peak_arena_bytes <= scheduler.arena_stats().layout.capacity);
}
