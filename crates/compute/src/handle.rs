use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::scheduler::TaskRef;

#[derive(Debug, Default)]
struct Accesses {
    writer: Option<TaskRef>,
    /// Tasks that read the tile since `writer` claimed it.
    readers: Vec<TaskRef>,
}

/// Completion token attached to one tile of a block matrix, or to a whole
/// grid.
///
/// The handle remembers the last task that claimed the tile for writing and
/// every task that claimed it for reading since. A reader waits on the
/// writer; the next writer waits on the writer and on every reader, then
/// replaces them. Claims are made in spawn order, so the waits always point
/// from later tasks to earlier ones.
#[derive(Debug, Default)]
pub struct TileHandle {
    accesses: Mutex<Accesses>,
}

impl TileHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle whose reader list will not reallocate until more than
    /// `readers` tasks read between two writes.
    pub fn with_reader_capacity(readers: usize) -> Self {
        Self {
            accesses: Mutex::new(Accesses {
                writer: None,
                readers: Vec::with_capacity(readers),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Accesses> {
        self.accesses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `me` as a reader, after reporting the writer it must wait on.
    pub(crate) fn claim_read(&self, me: TaskRef, wait_on: &mut dyn FnMut(TaskRef)) {
        let mut accesses = self.lock();
        if let Some(writer) = accesses.writer.filter(|&w| w != me) {
            wait_on(writer);
        }
        if !accesses.readers.contains(&me) {
            accesses.readers.push(me);
        }
    }

    /// Make `me` the writer, after reporting the previous writer and every
    /// reader since it.
    pub(crate) fn claim_write(&self, me: TaskRef, wait_on: &mut dyn FnMut(TaskRef)) {
        let mut accesses = self.lock();
        if let Some(writer) = accesses.writer.filter(|&w| w != me) {
            wait_on(writer);
        }
        for &reader in accesses.readers.iter().filter(|&&r| r != me) {
            wait_on(reader);
        }
        accesses.readers.clear();
        accesses.writer = Some(me);
    }

    /// The task that last claimed this tile for writing.
    pub fn writer(&self) -> Option<TaskRef> {
        self.lock().writer
    }

    /// Tasks that claimed this tile for reading since the last writer.
    pub fn readers(&self) -> Vec<TaskRef> {
        self.lock().readers.clone()
    }

    /// Reset to unset so the grid can be reused by an independent operation.
    /// The reader list keeps its capacity.
    pub fn clear(&self) {
        let mut accesses = self.lock();
        accesses.writer = None;
        accesses.readers.clear();
    }

    pub fn is_clear(&self) -> bool {
        let accesses = self.lock();
        accesses.writer.is_none() && accesses.readers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waits(handle: &TileHandle, me: TaskRef, write: bool) -> Vec<TaskRef> {
        let mut deps = Vec::new();
        if write {
            handle.claim_write(me, &mut |t| deps.push(t));
        } else {
            handle.claim_read(me, &mut |t| deps.push(t));
        }
        deps
    }

    #[test]
    fn new_handle_is_clear() {
        let handle = TileHandle::new();
        assert!(handle.is_clear());
        assert!(waits(&handle, TaskRef::new(0, 1), false).is_empty());
    }

    #[test]
    fn readers_wait_on_writer_only() {
        let handle = TileHandle::new();
        let writer = TaskRef::new(3, 7);
        assert!(waits(&handle, writer, true).is_empty());
        assert_eq!(handle.writer(), Some(writer));

        assert_eq!(waits(&handle, TaskRef::new(4, 1), false), vec![writer]);
        assert_eq!(waits(&handle, TaskRef::new(5, 1), false), vec![writer]);
        assert_eq!(handle.readers().len(), 2);
    }

    #[test]
    fn writer_waits_on_every_reader() {
        let handle = TileHandle::with_reader_capacity(2);
        let readers: Vec<TaskRef> = (0..5).map(|i| TaskRef::new(i, 1)).collect();
        for &r in &readers {
            assert!(waits(&handle, r, false).is_empty());
        }

        let next = TaskRef::new(9, 1);
        assert_eq!(waits(&handle, next, true), readers);
        assert!(handle.readers().is_empty());

        // A later reader only sees the new writer.
        assert_eq!(waits(&handle, TaskRef::new(10, 1), false), vec![next]);
    }

    #[test]
    fn task_never_waits_on_itself() {
        let handle = TileHandle::new();
        let me = TaskRef::new(2, 3);
        assert!(waits(&handle, me, false).is_empty());
        assert!(waits(&handle, me, true).is_empty());
        assert!(waits(&handle, me, false).is_empty());
        assert_eq!(handle.readers(), vec![me]);
    }

    #[test]
    fn clear_forgets_every_access() {
        let handle = TileHandle::new();
        waits(&handle, TaskRef::new(0, 1), true);
        waits(&handle, TaskRef::new(1, 1), false);
        handle.clear();
        assert!(handle.is_clear());
        assert!(waits(&handle, TaskRef::new(2, 1), true).is_empty());
    }
}
