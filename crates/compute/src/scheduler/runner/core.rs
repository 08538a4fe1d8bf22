use std::collections::VecDeque;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError, RwLock};

use blockwise_core::BlockwiseError;
use tracing::info;

use crate::scheduler::arena::{ArenaBlock, ArenaLayout, ArenaStats, TaskArena, TaskCensus};
use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::task::{record_footprints, RecordBody};
use crate::scheduler::types::{SchedulerConfig, TaskPriority, TaskRef};
use crate::view::Scalar;

pub(super) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The task scheduler. Owns a worker pool and a bounded arena of task
/// records, and runs task graphs over buffers that outlive `'a`.
///
/// `spawn` only enqueues; the graph executes inside [`wait`](Self::wait).
pub struct TaskScheduler<'a, T> {
    pub(super) config: SchedulerConfig,
    pub(super) workers: usize,
    pub(super) pool: rayon::ThreadPool,
    pub(crate) core: SchedulerCore<'a, T>,
}

/// State shared by every worker and every [`TaskContext`](crate::scheduler::TaskContext).
///
/// `slots` drops before `arena`, whose memory holds the unrun bodies.
pub(crate) struct SchedulerCore<'a, T> {
    /// One slot per block of the smallest class; a record's bookkeeping
    /// lives in the slot its block maps to, its body in the block itself.
    pub(super) slots: Vec<Slot<'a, T>>,
    pub(super) arena: TaskArena,
    pub(super) ready: Mutex<ReadyQueue>,
    pub(super) ready_signal: Condvar,
    /// Records spawned and not yet retired.
    pub(super) live: AtomicUsize,
    pub(super) peak_live: AtomicUsize,
    pub(super) aborted: AtomicBool,
    pub(super) failure: Mutex<Option<BlockwiseError>>,
    pub(super) metrics: RwLock<SchedulerMetrics>,
}

pub(super) struct Slot<'a, T> {
    pub(super) state: Mutex<SlotState<'a, T>>,
    /// Unretired dependencies, plus one held by the spawner until the
    /// record is fully wired.
    pub(super) pending: AtomicUsize,
    /// One for the record's own body plus one per unretired child.
    pub(super) outstanding: AtomicUsize,
}

pub(super) struct SlotState<'a, T> {
    pub(super) generation: u64,
    pub(super) task: Option<RecordBody<'a, T>>,
    pub(super) parent: Option<TaskRef>,
    /// Records waiting on this one, with the priority they enqueue at.
    pub(super) successors: Vec<(usize, TaskPriority)>,
    pub(super) retired: bool,
    pub(super) block: Option<ArenaBlock>,
    /// Admission reservation held by a root until it retires.
    pub(super) reservation: Option<TaskCensus>,
}

/// Successor capacity reserved per slot. A slot keeps whatever capacity its
/// busiest record grew it to, so reuse does not allocate again.
const SUCCESSOR_RESERVE: usize = 4;

impl<T> Slot<'_, T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                generation: 0,
                task: None,
                parent: None,
                successors: Vec::with_capacity(SUCCESSOR_RESERVE),
                retired: true,
                block: None,
                reservation: None,
            }),
            pending: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
        }
    }
}

/// Ready records, one FIFO lane per priority.
pub(super) struct ReadyQueue {
    lanes: [VecDeque<usize>; 3],
}

impl ReadyQueue {
    /// Every lane can hold every slot, so pushes never reallocate.
    fn with_capacity(slots: usize) -> Self {
        Self {
            lanes: [
                VecDeque::with_capacity(slots),
                VecDeque::with_capacity(slots),
                VecDeque::with_capacity(slots),
            ],
        }
    }

    pub(super) fn push(&mut self, slot: usize, priority: TaskPriority) {
        self.lanes[priority.lane()].push_back(slot);
    }

    /// Oldest record of the highest non-empty priority.
    pub(super) fn pop(&mut self) -> Option<usize> {
        self.lanes.iter_mut().find_map(VecDeque::pop_front)
    }

    pub(super) fn len(&self) -> usize {
        self.lanes.iter().map(VecDeque::len).sum()
    }
}

impl<'a, T: Scalar> TaskScheduler<'a, T> {
    /// Build the worker pool and the task arena. Sizes are fixed from here on.
    pub fn configure(config: SchedulerConfig) -> Result<Self, BlockwiseError> {
        let smallest = record_footprints::<T>().into_iter().min().unwrap_or(0);
        let layout = ArenaLayout::resolve(&config.arena, smallest)?;
        let workers = config.resolved_worker_threads();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("blockwise-worker-{}", i))
            .build()
            .map_err(|e| BlockwiseError::InvalidConfig(format!("worker pool: {}", e)))?;

        let slot_count = layout.slot_count();
        let slots = (0..slot_count).map(|_| Slot::new()).collect();
        let per_slot = size_of::<Slot<'a, T>>()
            + SUCCESSOR_RESERVE * size_of::<(usize, TaskPriority)>()
            + TaskPriority::ALL.len() * size_of::<usize>();
        let slot_table_bytes = slot_count * per_slot;
        info!(
            "Task scheduler configured with {} workers, {} byte arena ({} superblocks of {} bytes, classes {}..={}), {} slots using {} bytes",
            workers,
            layout.capacity,
            layout.num_superblocks,
            layout.superblock_size,
            layout.min_class,
            layout.max_class,
            slot_count,
            slot_table_bytes
        );

        Ok(Self {
            config,
            workers,
            pool,
            core: SchedulerCore {
                slots,
                arena: TaskArena::new(layout, slot_table_bytes),
                ready: Mutex::new(ReadyQueue::with_capacity(slot_count)),
                ready_signal: Condvar::new(),
                live: AtomicUsize::new(0),
                peak_live: AtomicUsize::new(0),
                aborted: AtomicBool::new(false),
                failure: Mutex::new(None),
                metrics: RwLock::new(SchedulerMetrics::default()),
            },
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn worker_threads(&self) -> usize {
        self.workers
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut metrics = self
            .core
            .metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        metrics.peak_live_tasks = self.core.peak_live.load(Ordering::Relaxed);
        metrics.peak_arena_bytes = self.core.arena.stats().peak_bytes;
        metrics
    }

    pub fn arena_stats(&self) -> ArenaStats {
        self.core.arena.stats()
    }

    /// Records spawned and not yet retired.
    pub fn live_tasks(&self) -> usize {
        self.core.live.load(Ordering::Acquire)
    }

    /// Whether `task` has retired. A slot reused by a later record counts
    /// as retired for every earlier reference.
    pub fn is_retired(&self, task: TaskRef) -> bool {
        self.core.is_retired(task)
    }
}

impl<T> SchedulerCore<'_, T> {
    pub(super) fn is_retired(&self, task: TaskRef) -> bool {
        let state = lock(&self.slots[task.slot].state);
        state.generation != task.generation || state.retired
    }
}
