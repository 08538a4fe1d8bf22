use std::sync::atomic::Ordering;
use std::sync::PoisonError;
use std::time::Instant;

use blockwise_core::BlockwiseError;
use tracing::{debug, info, warn};

use crate::scheduler::metrics::SchedulerMetrics;
use crate::scheduler::task::TaskContext;
use crate::scheduler::types::TaskRef;
use crate::view::Scalar;

use super::core::{lock, SchedulerCore};
use super::TaskScheduler;

impl<'a, T: Scalar> TaskScheduler<'a, T> {
    /// Run every spawned task graph to completion on the worker pool.
    ///
    /// Returns the first task failure, if any. After a failure the
    /// remaining records are retired without running their bodies, so the
    /// scheduler is idle and reusable when this returns either way.
    pub fn wait(&self) -> Result<(), BlockwiseError> {
        let started = Instant::now();
        let live = self.core.live.load(Ordering::Acquire);
        if live > 0 {
            debug!(
                "Waiting on {} live tasks ({} ready) with {} workers",
                live,
                lock(&self.core.ready).len(),
                self.workers
            );
            let core = &self.core;
            self.pool.scope(|scope| {
                for _ in 0..self.workers {
                    scope.spawn(move |_| core.worker_loop());
                }
            });
        }

        let failure = lock(&self.core.failure).take();
        self.core.aborted.store(false, Ordering::Release);
        let elapsed = started.elapsed();

        let mut metrics = self.core.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.last_wait = elapsed;
        match failure {
            Some(e) => {
                metrics.operations_aborted += 1;
                warn!("Task graph aborted after {:?}: {}", elapsed, e);
                Err(e)
            }
            None => {
                metrics.operations_completed += 1;
                if live > 0 {
                    info!("Task graph of {} tasks completed in {:?}", live, elapsed);
                }
                Ok(())
            }
        }
    }
}

impl<'a, T: Scalar> SchedulerCore<'a, T> {
    fn worker_loop(&self) {
        let mut local = SchedulerMetrics::default();
        while let Some(slot) = self.next_ready() {
            self.run_task(slot, &mut local);
        }
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.merge(&local);
        }
    }

    /// Block until a record is ready, or return `None` once nothing is live.
    fn next_ready(&self) -> Option<usize> {
        let mut queue = lock(&self.ready);
        loop {
            if let Some(slot) = queue.pop() {
                return Some(slot);
            }
            if self.live.load(Ordering::Acquire) == 0 {
                return None;
            }
            queue = self
                .ready_signal
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn run_task(&self, slot: usize, local: &mut SchedulerMetrics) {
        let (task, current) = {
            let mut state = lock(&self.slots[slot].state);
            (state.task.take(), TaskRef::new(slot, state.generation))
        };

        if let Some(task) = task {
            // Once aborted, bodies are dropped unrun; the graph only drains.
            if !self.aborted.load(Ordering::Acquire) {
                let name = task.name();
                let started = Instant::now();
                let ctx = TaskContext { core: self, current };
                match task.run(&ctx) {
                    Ok(()) => local.record_execution(name, started.elapsed()),
                    Err(e) => self.abort(name, e),
                }
            }
        }
        self.finish(slot);
    }

    fn abort(&self, name: &str, error: BlockwiseError) {
        warn!("Task {} failed: {}", name, error);
        self.aborted.store(true, Ordering::Release);
        let mut failure = lock(&self.failure);
        if failure.is_none() {
            *failure = Some(error);
        }
    }

    /// The record's body is done; it retires once its children have.
    fn finish(&self, slot: usize) {
        if self.slots[slot].outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.retire(slot);
        }
    }

    /// Retire a record: wake its successors, return its block, and walk up
    /// to parents whose last child this was.
    fn retire(&self, slot: usize) {
        let mut next = Some(slot);
        while let Some(slot) = next {
            let (parent, block, reservation) = {
                let mut state = lock(&self.slots[slot].state);
                state.retired = true;
                for (successor, priority) in state.successors.drain(..) {
                    if self.slots[successor].pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                        self.make_ready(successor, priority);
                    }
                }
                (state.parent.take(), state.block.take(), state.reservation.take())
            };

            if let Some(block) = block {
                self.arena.free(block);
            }
            if let Some(reservation) = reservation {
                self.arena.release(&reservation);
            }
            if self.live.fetch_sub(1, Ordering::AcqRel) == 1 {
                // Hold the queue lock so no worker misses the wakeup between
                // its emptiness check and its wait.
                let _queue = lock(&self.ready);
                self.ready_signal.notify_all();
            }

            next = parent
                .filter(|p| self.slots[p.slot].outstanding.fetch_sub(1, Ordering::AcqRel) == 1)
                .map(|p| p.slot);
        }
    }
}
