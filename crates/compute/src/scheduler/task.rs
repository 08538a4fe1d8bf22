use std::marker::PhantomData;
use std::mem::{align_of, size_of, ManuallyDrop};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use blockwise_core::BlockwiseError;

use super::arena::{TaskCensus, BLOCK_ALIGN};
use super::runner::SchedulerCore;
use super::types::{TaskPriority, TaskRef};
use super::tasks::{
    CholByBlocks, CholLeaf, GemmByBlocks, GemmLeaf, HerkByBlocks, HerkLeaf, TrsmByBlocks, TrsmLeaf,
};
use crate::blocks::BlockMatrix;
use crate::handle::TileHandle;
use crate::view::Scalar;

/// How a root operation uses one of its block matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridAccess {
    Read,
    Write,
}

/// A unit of work the scheduler can execute.
///
/// Leaf functors do arithmetic on a fixed set of tiles. By-blocks functors
/// decompose a block-matrix operation by spawning children through the
/// [`TaskContext`]; they retire only once every child has retired.
pub trait TaskFunctor<'a, T: Scalar>: Sized + Send {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Checked when the functor is spawned as a root, before anything runs.
    fn validate(&self) -> Result<(), BlockwiseError> {
        Ok(())
    }

    /// Every task record this functor and its descendants will allocate.
    fn census(&self, census: &mut TaskCensus);

    /// The block matrices this functor reads or writes. A root waits for
    /// earlier roots that write what it touches, or read what it writes.
    fn grids(&self, _visit: &mut dyn FnMut(&Arc<BlockMatrix<'a, T>>, GridAccess)) {}

    fn execute(self, ctx: &TaskContext<'_, 'a, T>) -> Result<(), BlockwiseError>;
}

/// Type-erased entry points of a record, stored in front of its body.
struct RecordHeader {
    name: &'static str,
    execute: unsafe fn(NonNull<u8>, *const ()) -> Result<(), BlockwiseError>,
    drop: unsafe fn(NonNull<u8>),
}

#[repr(C)]
struct Record<P> {
    header: RecordHeader,
    body: P,
}

unsafe fn execute_record<'a, T: Scalar, P: TaskFunctor<'a, T>>(
    record: NonNull<u8>,
    ctx: *const (),
) -> Result<(), BlockwiseError> {
    let record = record.cast::<Record<P>>().as_ptr();
    let body = ptr::read(ptr::addr_of!((*record).body));
    body.execute(&*ctx.cast::<TaskContext<'_, 'a, T>>())
}

unsafe fn drop_record<P>(record: NonNull<u8>) {
    let record = record.cast::<Record<P>>().as_ptr();
    ptr::drop_in_place(ptr::addr_of_mut!((*record).body));
}

/// Arena bytes taken by a record whose body is a `P`.
pub const fn record_footprint<P>() -> usize {
    size_of::<Record<P>>()
}

/// Footprints of every record kind, used to size the arena.
pub fn record_footprints<T: Scalar>() -> [usize; 8] {
    [
        record_footprint::<CholLeaf<'static, T>>(),
        record_footprint::<TrsmLeaf<'static, T>>(),
        record_footprint::<HerkLeaf<'static, T>>(),
        record_footprint::<GemmLeaf<'static, T>>(),
        record_footprint::<CholByBlocks<'static, T>>(),
        record_footprint::<TrsmByBlocks<'static, T>>(),
        record_footprint::<HerkByBlocks<'static, T>>(),
        record_footprint::<GemmByBlocks<'static, T>>(),
    ]
}

/// Owning pointer to a functor stored in an arena block.
///
/// Dropping it drops the functor without running it.
pub(crate) struct RecordBody<'a, T> {
    record: NonNull<u8>,
    _functor: PhantomData<fn(&'a T) -> &'a T>,
}

// SAFETY: the pointee is a `TaskFunctor`, which is `Send`, and the pointer is
// the only way to reach it.
unsafe impl<T> Send for RecordBody<'_, T> {}

impl<'a, T: Scalar> RecordBody<'a, T> {
    /// Move `body` into the block at `record`.
    ///
    /// # Safety
    /// `record` must be aligned to [`BLOCK_ALIGN`], valid for
    /// `record_footprint::<P>()` bytes, and hold no other record until the
    /// returned value is run or dropped.
    pub(crate) unsafe fn write<P: TaskFunctor<'a, T>>(record: NonNull<u8>, body: P) -> Self {
        const { assert!(align_of::<Record<P>>() <= BLOCK_ALIGN) };
        let header = RecordHeader {
            name: body.name(),
            execute: execute_record::<T, P>,
            drop: drop_record::<P>,
        };
        record.cast::<Record<P>>().as_ptr().write(Record { header, body });
        Self {
            record,
            _functor: PhantomData,
        }
    }

    fn header(&self) -> &RecordHeader {
        // SAFETY: `Record` is `repr(C)`, so the header sits at offset zero.
        unsafe { &*self.record.cast::<RecordHeader>().as_ptr() }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.header().name
    }

    /// Move the functor out of its block and execute it.
    pub(crate) fn run(self, ctx: &TaskContext<'_, 'a, T>) -> Result<(), BlockwiseError> {
        let this = ManuallyDrop::new(self);
        let execute = this.header().execute;
        let ctx: *const TaskContext<'_, 'a, T> = ctx;
        // SAFETY: the header was written for a functor over the same `'a`
        // and `T`, and `this` is never dropped, so the body moves out once.
        unsafe { execute(this.record, ctx.cast()) }
    }
}

impl<T> Drop for RecordBody<'_, T> {
    fn drop(&mut self) {
        // SAFETY: `Record` is `repr(C)` and the body was not moved out.
        unsafe {
            let drop = (*self.record.cast::<RecordHeader>().as_ptr()).drop;
            drop(self.record);
        }
    }
}

/// Scheduler handle passed to a running task body.
///
/// Children spawned through the context belong to the running task, which
/// stays live until all of them retire.
pub struct TaskContext<'s, 'a, T> {
    pub(crate) core: &'s SchedulerCore<'a, T>,
    pub(crate) current: TaskRef,
}

impl<'s, 'a, T: Scalar> TaskContext<'s, 'a, T> {
    pub fn current(&self) -> TaskRef {
        self.current
    }

    /// Spawn a child with no tile dependencies (a decomposition step).
    pub fn spawn<P: TaskFunctor<'a, T>>(&self, task: P, priority: TaskPriority) -> Result<TaskRef, BlockwiseError> {
        self.core
            .spawn_task(task, priority, Some(self.current), None, |_, _| {})
    }

    /// Spawn a child that reads the tiles behind `reads` and overwrites the
    /// tile behind `write`. It becomes ready once the earlier writer of each
    /// of those tiles has retired, and for `write` also every earlier reader.
    pub fn spawn_leaf<P: TaskFunctor<'a, T>>(
        &self,
        task: P,
        priority: TaskPriority,
        reads: &[&TileHandle],
        write: &TileHandle,
    ) -> Result<TaskRef, BlockwiseError> {
        self.core
            .spawn_task(task, priority, Some(self.current), None, |me, wait_on| {
                for handle in reads {
                    handle.claim_read(me, wait_on);
                }
                write.claim_write(me, wait_on);
            })
    }
}
