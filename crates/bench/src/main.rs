//! dense-byblocks: timing and verification driver for the by-blocks operations.
//!
//! For every matrix size in `[begin, end]` this runs Cholesky, the
//! triangular solve, the rank-k update and the matrix product twice: once
//! through the unblocked reference kernels and once through the task
//! scheduler. Each path gets two untimed warm-up runs and is then timed as
//! the mean of three runs, resetting its input before every run. Each
//! by-blocks result is compared against the reference; the run fails if
//! any relative error exceeds `1000 ε`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};

use blockwise_compute::reference::{self, Operand};
use blockwise_compute::{
    chol_by_blocks, flops, gemm_by_blocks, herk_by_blocks, trsm_by_blocks, BlockMatrix, SchedulerConfig,
    SchedulerMetrics, TaskScheduler, Trans,
};
use blockwise_core::{config, BlockwiseError, Config};

/// Untimed runs before measuring.
const DRY_RUNS: usize = 2;
/// Timed runs averaged per measurement.
const ITERATIONS: usize = 3;

// ── CLI ─────────────────────────────────────────────────────────────

/// Blocked dense factorizations on a task-graph scheduler, checked against
/// the unblocked kernels.
#[derive(Parser, Debug)]
#[command(name = "dense-byblocks", version, about)]
struct Cli {
    /// Optional TOML config file; environment variables are used otherwise.
    #[arg(long, env = "BLOCKWISE_CONFIG")]
    config: Option<String>,

    /// Worker threads (overrides the configured value, 0 = all cores).
    #[arg(long, env = "BLOCKWISE_THREADS")]
    threads: Option<usize>,

    /// First matrix size.
    #[arg(long, default_value_t = 256)]
    begin: usize,

    /// Last matrix size (inclusive).
    #[arg(long, default_value_t = 1024)]
    end: usize,

    /// Size increment.
    #[arg(long, default_value_t = 256)]
    step: usize,

    /// Tile edge length (overrides the configured block size).
    #[arg(long)]
    mb: Option<usize>,

    /// Run the by-blocks path on a single worker.
    #[arg(long)]
    serial: bool,

    /// Log per-operation scheduler metrics.
    #[arg(long)]
    verbose: bool,

    /// Print every check as JSON on stdout when done.
    #[arg(long)]
    json: bool,
}

// ── Checks ──────────────────────────────────────────────────────────

/// Outcome of one operation at one size.
struct Check {
    name: &'static str,
    flops: f64,
    reference_secs: f64,
    byblocks_secs: f64,
    error: f64,
    metrics: SchedulerMetrics,
}

impl Check {
    fn tolerance() -> f64 {
        1000.0 * f64::EPSILON
    }

    fn passed(&self) -> bool {
        self.error <= Self::tolerance()
    }

    fn report(&self, m: usize, mb: usize) -> serde_json::Value {
        serde_json::json!({
            "op": self.name,
            "m": m,
            "mb": mb,
            "reference_gflops": flops::gflops_per_sec(self.flops, self.reference_secs),
            "byblocks_gflops": flops::gflops_per_sec(self.flops, self.byblocks_secs),
            "error": self.error,
            "passed": self.passed(),
            "metrics": self.metrics.summary(),
        })
    }
}

fn random(len: usize, rng: &mut StdRng) -> Vec<f64> {
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// 4 on the diagonal, 1 on both off-diagonals: SPD for every size.
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

/// Random upper triangle with a dominant diagonal, so the solve stays
/// well conditioned as `n` grows.
fn upper_triangular(n: usize, rng: &mut StdRng) -> Vec<f64> {
    let mut a = random(n * n, rng);
    for j in 0..n {
        a[j + j * n] = n as f64 + 1.0;
        for i in (j + 1)..n {
            a[i + j * n] = 0.0;
        }
    }
    a
}

fn timed<R>(f: impl FnOnce() -> R) -> (R, f64) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed().as_secs_f64())
}

/// Call `run` `DRY_RUNS` times, then `ITERATIONS` times, and return the
/// mean of the seconds the timed calls report.
fn mean_secs(mut run: impl FnMut() -> anyhow::Result<f64>) -> anyhow::Result<f64> {
    for _ in 0..DRY_RUNS {
        run()?;
    }
    let mut total = 0.0;
    for _ in 0..ITERATIONS {
        total += run()?;
    }
    Ok(total / ITERATIONS as f64)
}

/// Time a reference kernel that works in place on `work`, restored from
/// `input` before every run.
fn time_reference(
    input: &[f64],
    work: &mut [f64],
    mut kernel: impl FnMut(&mut [f64]) -> Result<(), BlockwiseError>,
) -> anyhow::Result<f64> {
    mean_secs(|| {
        work.copy_from_slice(input);
        let (result, secs) = timed(|| kernel(&mut *work));
        result?;
        Ok(secs)
    })
}

/// Writable `m x n` grid over `buffer`: an empty grid is shaped, then
/// attached, the way a grid is refitted to a new buffer.
fn destination_grid<'a>(buffer: &'a mut [f64], m: usize, n: usize, mb: usize) -> anyhow::Result<BlockMatrix<'a, f64>> {
    let mut grid = BlockMatrix::new(0, 0, mb)?;
    grid.set_matrix_of_blocks(m, n, mb)?;
    grid.attach_base_buffer(buffer, 1, m.max(1))?;
    Ok(grid)
}

/// Time a by-blocks operation on `grid`, restored from `input` before every
/// run, and return its final contents with the mean time.
fn time_byblocks<'a>(
    grid: BlockMatrix<'a, f64>,
    input: &[f64],
    mut op: impl FnMut(&Arc<BlockMatrix<'a, f64>>) -> Result<(), BlockwiseError>,
) -> anyhow::Result<(Vec<f64>, f64)> {
    let mut grid = Arc::new(grid);
    let secs = mean_secs(|| {
        let reset = Arc::get_mut(&mut grid).context("grid still held by a task")?;
        reset.clear_handles();
        reset.fill_from_col_major(input)?;
        let (result, secs) = timed(|| op(&grid));
        result?;
        Ok(secs)
    })?;
    let out = Arc::get_mut(&mut grid)
        .context("grid still held by a task")?
        .to_col_major()?;
    Ok((out, secs))
}

fn cholesky(config: &SchedulerConfig, m: usize, mb: usize) -> anyhow::Result<Check> {
    let input = tridiagonal(m);

    let mut expected = input.clone();
    let reference_secs =
        time_reference(&input, &mut expected, |a| reference::chol_upper(a, m, m)).context("reference Cholesky")?;

    let mut work = vec![0.0; m * m];
    let scheduler = TaskScheduler::configure(config.clone())?;
    let grid = destination_grid(&mut work, m, m, mb)?;
    let (actual, byblocks_secs) =
        time_byblocks(grid, &input, |a| chol_by_blocks(&scheduler, a)).context("Cholesky by blocks")?;

    Ok(Check {
        name: "chol",
        flops: flops::chol(m),
        reference_secs,
        byblocks_secs,
        error: reference::relative_error(&expected, &actual),
        metrics: scheduler.metrics(),
    })
}

fn triangular_solve(config: &SchedulerConfig, m: usize, mb: usize, rng: &mut StdRng) -> anyhow::Result<Check> {
    let alpha = -1.0;
    let a = upper_triangular(m, rng);
    let rhs = random(m * m, rng);

    let mut expected = rhs.clone();
    let reference_secs = time_reference(&rhs, &mut expected, |b| {
        reference::trsm_left_upper_trans(alpha, &a, m, b, m, m, m)
    })
    .context("reference triangular solve")?;

    let mut work = vec![0.0; m * m];
    let scheduler = TaskScheduler::configure(config.clone())?;
    let ga = Arc::new(BlockMatrix::read_only(&a, m, m, 1, m, mb)?);
    let gb = destination_grid(&mut work, m, m, mb)?;
    let (actual, byblocks_secs) = time_byblocks(gb, &rhs, |b| trsm_by_blocks(&scheduler, alpha, &ga, b))
        .context("triangular solve by blocks")?;

    Ok(Check {
        name: "trsm",
        flops: flops::trsm(true, m, m),
        reference_secs,
        byblocks_secs,
        error: reference::relative_error(&expected, &actual),
        metrics: scheduler.metrics(),
    })
}

fn rank_k_update(config: &SchedulerConfig, m: usize, mb: usize, rng: &mut StdRng) -> anyhow::Result<Check> {
    let (alpha, beta) = (-1.0, 1.0);
    let a = random(m * m, rng);
    let c = random(m * m, rng);

    let mut expected = c.clone();
    let reference_secs = time_reference(&c, &mut expected, |out| {
        reference::herk_upper_trans(alpha, &a, m, m, beta, out, m, m)
    })
    .context("reference rank-k update")?;

    let mut work = vec![0.0; m * m];
    let scheduler = TaskScheduler::configure(config.clone())?;
    let ga = Arc::new(BlockMatrix::read_only(&a, m, m, 1, m, mb)?);
    let gc = destination_grid(&mut work, m, m, mb)?;
    let (actual, byblocks_secs) = time_byblocks(gc, &c, |out| herk_by_blocks(&scheduler, alpha, &ga, beta, out))
        .context("rank-k update by blocks")?;

    Ok(Check {
        name: "herk",
        flops: flops::herk(m, m),
        reference_secs,
        byblocks_secs,
        error: reference::relative_error(&expected, &actual),
        metrics: scheduler.metrics(),
    })
}

fn product(config: &SchedulerConfig, m: usize, mb: usize, rng: &mut StdRng) -> anyhow::Result<Check> {
    let (alpha, beta) = (-1.0, 1.0);
    let a = random(m * m, rng);
    let b = random(m * m, rng);
    let c = random(m * m, rng);

    let mut expected = c.clone();
    let reference_secs = time_reference(&c, &mut expected, |out| {
        let lhs = Operand { data: &a, nrows: m, ncols: m, ld: m };
        let rhs = Operand { data: &b, nrows: m, ncols: m, ld: m };
        reference::gemm(Trans::NoTranspose, Trans::NoTranspose, alpha, lhs, rhs, beta, out, m)
    })
    .context("reference matrix product")?;

    let mut work = vec![0.0; m * m];
    let scheduler = TaskScheduler::configure(config.clone())?;
    let ga = Arc::new(BlockMatrix::read_only(&a, m, m, 1, m, mb)?);
    let gb = Arc::new(BlockMatrix::read_only(&b, m, m, 1, m, mb)?);
    let gc = destination_grid(&mut work, m, m, mb)?;
    let (actual, byblocks_secs) = time_byblocks(gc, &c, |out| {
        gemm_by_blocks(&scheduler, Trans::NoTranspose, Trans::NoTranspose, alpha, &ga, &gb, beta, out)
    })
    .context("matrix product by blocks")?;

    Ok(Check {
        name: "gemm",
        flops: flops::gemm(m, m, m),
        reference_secs,
        byblocks_secs,
        error: reference::relative_error(&expected, &actual),
        metrics: scheduler.metrics(),
    })
}

// ── Main ────────────────────────────────────────────────────────────

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    config::load_dotenv();
    let mut config = match &cli.config {
        Some(path) => {
            let cfg = Config::from_file(path).with_context(|| format!("loading config from {}", path))?;
            info!(path = %path, "loaded config file");
            cfg
        }
        None => Config::from_env(),
    };

    if let Some(threads) = cli.threads {
        config.engine.worker_threads = threads;
    }
    if cli.serial {
        config.engine.worker_threads = 1;
    }
    if let Some(mb) = cli.mb {
        config.engine.block_size = mb;
    }
    config.engine.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    if cli.step == 0 {
        anyhow::bail!("--step must be positive");
    }

    let config = load_config(&cli)?;
    config.log_summary();
    let mb = config.engine.block_size;

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut failures = 0usize;
    let mut reports = Vec::new();

    for m in (cli.begin..=cli.end).step_by(cli.step) {
        let scheduler_config = SchedulerConfig::from_engine::<f64>(&config.engine, m.div_ceil(mb))?;
        info!(
            "m={} mb={} workers={} arena={} bytes",
            m,
            mb,
            scheduler_config.resolved_worker_threads(),
            scheduler_config.arena.queue_capacity
        );

        let checks = [
            cholesky(&scheduler_config, m, mb),
            triangular_solve(&scheduler_config, m, mb, &mut rng),
            rank_k_update(&scheduler_config, m, mb, &mut rng),
            product(&scheduler_config, m, mb, &mut rng),
        ];

        for check in checks {
            let check = match check {
                Ok(check) => check,
                Err(e) => {
                    let cause = format!("{:#}", e);
                    error!(m, error = %cause, "operation failed");
                    failures += 1;
                    continue;
                }
            };

            info!(
                "  {:<4} reference {:>8.3} GFlop/s | by-blocks {:>8.3} GFlop/s | error {:.3e}",
                check.name,
                flops::gflops_per_sec(check.flops, check.reference_secs),
                flops::gflops_per_sec(check.flops, check.byblocks_secs),
                check.error
            );
            if cli.verbose {
                let metrics = check.metrics.summary();
                info!(metrics = %metrics, "  {} scheduler metrics", check.name);
            }
            if cli.json {
                reports.push(check.report(m, mb));
            }
            if !check.passed() {
                warn!(
                    m,
                    op = check.name,
                    error = check.error,
                    tolerance = Check::tolerance(),
                    "by-blocks result differs from reference"
                );
                failures += 1;
            }
        }
    }

    if cli.json {
        let report = serde_json::to_string_pretty(&reports)?;
        println!("{}", report);
    }

    if failures > 0 {
        anyhow::bail!("{} check(s) failed", failures);
    }
    info!("all checks passed");
    Ok(())
}
