use std::sync::atomic::Ordering;
use std::sync::Arc;

use blockwise_core::BlockwiseError;
use tracing::{debug, warn};

use crate::scheduler::arena::TaskCensus;
use crate::scheduler::task::{record_footprint, GridAccess, RecordBody, TaskFunctor};
use crate::scheduler::types::{TaskPriority, TaskRef};
use crate::view::Scalar;

use super::core::{lock, SchedulerCore};
use super::TaskScheduler;

impl<'a, T: Scalar> TaskScheduler<'a, T> {
    /// Spawn a root task. Nothing runs until [`wait`](Self::wait).
    ///
    /// The task's whole graph is admitted against the arena up front: if
    /// it cannot fit next to the graphs already admitted, this fails with
    /// [`BlockwiseError::QueueExhausted`] before any record is created.
    ///
    /// Roots spawned before one `wait` that share a block matrix run in
    /// spawn order unless all of them only read it.
    pub fn spawn<P: TaskFunctor<'a, T>>(&self, task: P, priority: TaskPriority) -> Result<TaskRef, BlockwiseError> {
        task.validate()?;
        let name = task.name();

        let mut census = TaskCensus::default();
        task.census(&mut census);
        if let Err(e) = self.core.arena.reserve(&census) {
            warn!(
                "Refusing {}: {} records ({} bytes) do not fit: {}",
                name,
                census.total_records(),
                census.total_bytes(),
                e
            );
            return Err(e);
        }

        let mut grids = Vec::new();
        task.grids(&mut |grid, access| grids.push((Arc::clone(grid), access)));

        let records = census.total_records();
        let spawned = self
            .core
            .spawn_task(task, priority, None, Some(census.clone()), |me, wait_on| {
                for (grid, access) in &grids {
                    match access {
                        GridAccess::Read => grid.grid_handle().claim_read(me, wait_on),
                        GridAccess::Write => grid.grid_handle().claim_write(me, wait_on),
                    }
                }
            });
        match spawned {
            Ok(root) => {
                debug!("Spawned {} ({:?}) with {} records admitted", name, priority, records);
                Ok(root)
            }
            Err(e) => {
                self.core.arena.release(&census);
                Err(e)
            }
        }
    }
}

impl<'a, T: Scalar> SchedulerCore<'a, T> {
    /// Allocate a record for `task`, let `wire` report every task it must
    /// wait on, and enqueue it once none of them is pending.
    ///
    /// `wire` runs without any slot lock held and receives the new record's
    /// reference, so tile handles can name it before it becomes ready.
    pub(crate) fn spawn_task<P, W>(
        &self,
        task: P,
        priority: TaskPriority,
        parent: Option<TaskRef>,
        reservation: Option<TaskCensus>,
        wire: W,
    ) -> Result<TaskRef, BlockwiseError>
    where
        P: TaskFunctor<'a, T>,
        W: FnOnce(TaskRef, &mut dyn FnMut(TaskRef)),
    {
        let block = self.arena.allocate(record_footprint::<P>())?;
        let index = self.arena.slot_index(block);
        let slot = &self.slots[index];
        // SAFETY: `allocate` hands out each block once until it is freed,
        // and the block's class is at least the record footprint.
        let body = unsafe { RecordBody::write(self.arena.block_ptr(block), task) };

        // The extra pending count keeps the record from running while
        // dependencies are still being attached.
        slot.pending.store(1, Ordering::Relaxed);
        slot.outstanding.store(1, Ordering::Relaxed);
        let me = {
            let mut state = lock(&slot.state);
            state.generation += 1;
            state.task = Some(body);
            state.parent = parent;
            state.successors.clear();
            state.retired = false;
            state.block = Some(block);
            state.reservation = reservation;
            TaskRef::new(index, state.generation)
        };

        if let Some(parent) = parent {
            self.slots[parent.slot].outstanding.fetch_add(1, Ordering::AcqRel);
        }
        let live = self.live.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_live.fetch_max(live, Ordering::Relaxed);

        wire(me, &mut |dep| self.add_dependency(me, priority, dep));

        if slot.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.make_ready(index, priority);
        }
        Ok(me)
    }

    /// Hold `task` back until `dep` retires. Retired deps are skipped.
    fn add_dependency(&self, task: TaskRef, priority: TaskPriority, dep: TaskRef) {
        if dep == task {
            return;
        }
        let mut state = lock(&self.slots[dep.slot].state);
        if state.generation == dep.generation && !state.retired {
            self.slots[task.slot].pending.fetch_add(1, Ordering::AcqRel);
            state.successors.push((task.slot, priority));
        }
    }

    pub(super) fn make_ready(&self, slot: usize, priority: TaskPriority) {
        lock(&self.ready).push(slot, priority);
        self.ready_signal.notify_one();
    }
}
