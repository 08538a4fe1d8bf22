//! Floating-point operation counts for reporting throughput.

/// Upper/lower Cholesky of an `m x m` matrix.
pub fn chol(m: usize) -> f64 {
    let m = m as f64;
    m * m * m / 3.0 + m * m / 2.0 + m / 6.0
}

/// Triangular solve with an `m x m` (left side) or `n x n` (right side)
/// factor against an `m x n` right-hand side.
pub fn trsm(left_side: bool, m: usize, n: usize) -> f64 {
    let (m, n) = (m as f64, n as f64);
    if left_side { n * m * m } else { m * n * n }
}

/// Rank-k update of an `n x n` symmetric matrix.
pub fn herk(n: usize, k: usize) -> f64 {
    let (n, k) = (n as f64, k as f64);
    k * n * (n + 1.0)
}

/// `m x k` times `k x n`.
pub fn gemm(m: usize, n: usize, k: usize) -> f64 {
    2.0 * m as f64 * n as f64 * k as f64
}

/// Gigaflop rate for `flops` executed in `seconds` (binary giga, as the
/// driver reports).
pub fn gflops_per_sec(flops: f64, seconds: f64) -> f64 {
    const KILO: f64 = 1024.0;
    if seconds > 0.0 {
        flops / KILO / KILO / KILO / seconds
    } else {
        0.0
    }
}
