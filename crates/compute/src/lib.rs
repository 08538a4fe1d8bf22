pub mod blocks;
pub mod flops;
pub mod handle;
pub mod kernels;
pub mod reference;
pub mod scheduler;
pub mod view;

pub use blocks::BlockMatrix;
pub use handle::TileHandle;
pub use kernels::Trans;
pub use scheduler::{
    chol_by_blocks, gemm_by_blocks, herk_by_blocks, trsm_by_blocks, ArenaConfig, CholByBlocks, GemmByBlocks,
    GridAccess, HerkByBlocks, SchedulerConfig, SchedulerMetrics, TaskPriority, TaskRef, TaskScheduler, TrsmByBlocks,
};
pub use view::{DenseView, Scalar};
