//! Dependency-driven task scheduler for by-blocks dense algorithms.
//!
//! A root functor spawned on the [`TaskScheduler`] expands into a graph of
//! leaf tile operations. Leaves are ordered only through the
//! [`TileHandle`](crate::handle::TileHandle) of the tiles they touch; ready
//! leaves run concurrently on a rayon worker pool, highest priority first.
//! Task records live in a bounded [`TaskArena`] sized at configure time.
//! Roots that share a [`BlockMatrix`](crate::blocks::BlockMatrix) are
//! ordered through its grid handle, in spawn order.

pub mod arena;
pub mod metrics;
pub mod runner;
pub mod task;
pub mod tasks;
pub mod types;

pub use arena::{ArenaLayout, ArenaStats, TaskArena, TaskCensus};
pub use metrics::SchedulerMetrics;
pub use runner::TaskScheduler;
pub use task::{GridAccess, TaskContext, TaskFunctor};
pub use tasks::{
    chol_by_blocks, gemm_by_blocks, herk_by_blocks, trsm_by_blocks, CholByBlocks, GemmByBlocks, HerkByBlocks,
    TrsmByBlocks,
};
pub use types::{ArenaConfig, SchedulerConfig, TaskPriority, TaskRef};
