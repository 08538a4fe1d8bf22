use blockwise_core::{BlockwiseError, EngineConfig};
use serde::{Deserialize, Serialize};

use super::task::record_footprints;
use crate::view::Scalar;

/// Task priority among ready tasks. Lower numeric value = higher priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum TaskPriority {
    /// Critical path: diagonal factorizations, panel solves, graph expansion.
    High = 0,
    /// Trailing updates.
    Regular = 1,
    /// Work nothing else is waiting for.
    Low = 2,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 3] = [TaskPriority::High, TaskPriority::Regular, TaskPriority::Low];

    pub(crate) fn lane(self) -> usize {
        self as usize
    }
}

/// Reference to one incarnation of a task record.
///
/// Arena slots are reused, so the generation distinguishes a live task from
/// a retired one that used to occupy the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskRef {
    pub(crate) slot: usize,
    pub(crate) generation: u64,
}

impl TaskRef {
    pub(crate) fn new(slot: usize, generation: u64) -> Self {
        Self { slot, generation }
    }
}

/// Task arena sizing, in bytes.
///
/// Records are served from power-of-two size classes between
/// `min_task_size` and `max_task_size`. The arena is split into
/// superblocks of `superblock_size` bytes; each superblock serves one size
/// class at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaConfig {
    pub queue_capacity: usize,
    #[serde(default = "default_min_task_size")]
    pub min_task_size: usize,
    pub max_task_size: usize,
    pub superblock_size: usize,
}

fn default_min_task_size() -> usize { 16 }

impl ArenaConfig {
    /// Sizing for a by-blocks run over a grid of `block_count` blocks per
    /// side.
    ///
    /// Gemm over `bc x bc` blocks is the widest graph: `bc³` leaves plus the
    /// `2bc² - 1` split records. Every size class gets one superblock large
    /// enough for that many of the largest record.
    pub fn for_problem<T: Scalar>(block_count: usize, num_superblocks: usize) -> Self {
        let footprints = record_footprints::<T>();
        let min_task_size = default_min_task_size();
        let largest = footprints.iter().copied().max().unwrap_or(min_task_size).next_power_of_two();
        let mut classes: Vec<usize> = footprints
            .iter()
            .map(|&f| f.max(min_task_size).next_power_of_two())
            .collect();
        classes.sort_unstable();
        classes.dedup();

        let bc = block_count.max(1);
        let records = bc * bc * bc + 2 * bc * bc;
        let superblock_size = (records * largest).next_power_of_two();
        let num_superblocks = num_superblocks.max(classes.len());

        Self {
            queue_capacity: superblock_size * num_superblocks,
            min_task_size,
            max_task_size: 4 * largest,
            superblock_size,
        }
    }

    /// Arena sizing from engine configuration, deriving whatever the engine
    /// leaves at zero from the problem size.
    pub fn from_engine<T: Scalar>(engine: &EngineConfig, block_count: usize) -> Self {
        let derived = Self::for_problem::<T>(block_count, engine.num_superblocks);
        if engine.queue_capacity == 0 {
            return derived;
        }
        let max_task_size = if engine.max_task_size == 0 {
            derived.max_task_size
        } else {
            engine.max_task_size
        };
        Self {
            queue_capacity: engine.queue_capacity,
            min_task_size: engine.min_task_size,
            max_task_size,
            superblock_size: engine.queue_capacity / engine.num_superblocks.max(1),
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default)]
    pub worker_threads: usize,
    pub arena: ArenaConfig,
}

impl SchedulerConfig {
    pub fn new(worker_threads: usize, arena: ArenaConfig) -> Self {
        Self { worker_threads, arena }
    }

    /// Default sizing for a grid of `block_count` blocks per side.
    pub fn for_problem<T: Scalar>(worker_threads: usize, block_count: usize) -> Self {
        Self::new(worker_threads, ArenaConfig::for_problem::<T>(block_count, 4))
    }

    pub fn from_engine<T: Scalar>(engine: &EngineConfig, block_count: usize) -> Result<Self, BlockwiseError> {
        engine.validate()?;
        Ok(Self::new(engine.worker_threads, ArenaConfig::from_engine::<T>(engine, block_count)))
    }

    /// Resolve worker thread count (0 means use available parallelism).
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.worker_threads
        }
    }
}
