//! Task scheduler runner -- owns the worker pool and runs task graphs.
//!
//! Split into focused submodules:
//! - `core`: TaskScheduler struct, configuration, and accessor methods
//! - `scheduling`: Root admission, record allocation, and dependency wiring
//! - `execution`: `wait`, the worker loop, abort, and retirement

mod core;
mod execution;
mod scheduling;

pub use self::core::TaskScheduler;
pub(crate) use self::core::SchedulerCore;
