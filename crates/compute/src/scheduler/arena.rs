//! Bounded task-record arena.
//!
//! Sized once at configure time and never grown. Record bodies are stored
//! in the arena's own memory, in power-of-two size classes; each superblock
//! serves a single class while it holds live records and returns to the
//! free pool when it empties. Alloc and free take only the superblock's
//! lock; claiming an empty superblock for a class goes through one
//! arena-wide lock.

use std::cell::UnsafeCell;
use std::collections::BTreeMap;
use std::mem::MaybeUninit;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use blockwise_core::BlockwiseError;
use serde::Serialize;

use super::types::ArenaConfig;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Alignment of every block. Size classes are powers of two of at least
/// this many bytes, so every block start is aligned to it.
pub const BLOCK_ALIGN: usize = 16;

#[repr(C, align(16))]
struct Chunk(UnsafeCell<MaybeUninit<[u8; BLOCK_ALIGN]>>);

/// Resolved, validated arena geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArenaLayout {
    pub capacity: usize,
    pub min_class: usize,
    pub max_class: usize,
    pub superblock_size: usize,
    pub num_superblocks: usize,
}

impl ArenaLayout {
    /// Validate `config`. `smallest_record` raises the minimum class so the
    /// slot table is not sized for records that can never exist.
    pub fn resolve(config: &ArenaConfig, smallest_record: usize) -> Result<Self, BlockwiseError> {
        let invalid = |msg: String| Err(BlockwiseError::InvalidConfig(msg));
        if config.min_task_size == 0 || config.max_task_size == 0 || config.superblock_size == 0 {
            return invalid(format!("arena sizes must be positive: {:?}", config));
        }
        if config.min_task_size > config.max_task_size {
            return invalid(format!(
                "min_task_size {} exceeds max_task_size {}",
                config.min_task_size, config.max_task_size
            ));
        }
        let min_class = config
            .min_task_size
            .max(smallest_record)
            .max(BLOCK_ALIGN)
            .next_power_of_two();
        let max_class = config.max_task_size.next_power_of_two().max(min_class);
        let superblock_size = config.superblock_size.next_power_of_two();
        if max_class > superblock_size {
            return invalid(format!(
                "max_task_size {} exceeds superblock_size {}",
                max_class, superblock_size
            ));
        }
        if config.queue_capacity < superblock_size {
            return invalid(format!(
                "queue_capacity {} is smaller than one superblock ({})",
                config.queue_capacity, superblock_size
            ));
        }
        let num_superblocks = config.queue_capacity / superblock_size;
        Ok(Self {
            capacity: num_superblocks * superblock_size,
            min_class,
            max_class,
            superblock_size,
            num_superblocks,
        })
    }

    /// Size class serving a record of `bytes`, or `None` if it is larger
    /// than the biggest class.
    pub fn class_for(&self, bytes: usize) -> Option<usize> {
        let class = bytes.max(self.min_class).next_power_of_two();
        (class <= self.max_class).then_some(class)
    }

    pub fn blocks_per_superblock(&self, class: usize) -> usize {
        self.superblock_size / class
    }

    /// Record slots needed to back every block of every superblock.
    pub fn slot_count(&self) -> usize {
        self.num_superblocks * self.blocks_per_superblock(self.min_class)
    }
}

/// Number of task records of each footprint (bytes) an operation may
/// allocate over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskCensus {
    counts: BTreeMap<usize, usize>,
}

impl TaskCensus {
    pub fn add(&mut self, footprint: usize, count: usize) {
        if count > 0 {
            *self.counts.entry(footprint).or_default() += count;
        }
    }

    pub fn total_records(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn total_bytes(&self) -> usize {
        self.counts.iter().map(|(f, c)| f * c).sum()
    }

    fn by_class(&self, layout: &ArenaLayout) -> Result<BTreeMap<usize, usize>, usize> {
        let mut classes = BTreeMap::new();
        for (&footprint, &count) in &self.counts {
            let class = layout.class_for(footprint).ok_or(footprint)?;
            *classes.entry(class).or_default() += count;
        }
        Ok(classes)
    }
}

/// Location of an allocated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaBlock {
    pub superblock: usize,
    pub index: usize,
    pub class: usize,
}

#[derive(Debug)]
struct Superblock {
    class: Option<usize>,
    free: Vec<usize>,
    used: usize,
}

/// Snapshot of arena occupancy.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ArenaStats {
    pub layout: ArenaLayout,
    pub bytes_in_use: usize,
    pub peak_bytes: usize,
    pub superblocks_claimed: usize,
    /// Scheduler bookkeeping allocated next to the arena: one slot per
    /// block of the smallest class plus the ready lanes.
    pub slot_table_bytes: usize,
}

pub struct TaskArena {
    layout: ArenaLayout,
    memory: Box<[Chunk]>,
    slot_table_bytes: usize,
    superblocks: Vec<Mutex<Superblock>>,
    claim: Mutex<()>,
    reserved: Mutex<BTreeMap<usize, usize>>,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

// SAFETY: block memory is only reached through `block_ptr`, and a block is
// handed to one record at a time by `allocate`/`free` under the superblock
// locks.
unsafe impl Sync for TaskArena {}

impl TaskArena {
    /// `slot_table_bytes` is what the caller spends on per-slot bookkeeping,
    /// reported through [`stats`](Self::stats).
    pub fn new(layout: ArenaLayout, slot_table_bytes: usize) -> Self {
        let memory = (0..layout.capacity / BLOCK_ALIGN)
            .map(|_| Chunk(UnsafeCell::new(MaybeUninit::uninit())))
            .collect();
        let per = layout.blocks_per_superblock(layout.min_class);
        let superblocks = (0..layout.num_superblocks)
            .map(|_| {
                Mutex::new(Superblock {
                    class: None,
                    free: Vec::with_capacity(per),
                    used: 0,
                })
            })
            .collect();
        Self {
            layout,
            memory,
            slot_table_bytes,
            superblocks,
            claim: Mutex::new(()),
            reserved: Mutex::new(BTreeMap::new()),
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn layout(&self) -> &ArenaLayout {
        &self.layout
    }

    /// Slot-table index backing `block`.
    pub fn slot_index(&self, block: ArenaBlock) -> usize {
        block.superblock * self.layout.blocks_per_superblock(self.layout.min_class) + block.index
    }

    /// Start of the memory behind `block`, aligned to [`BLOCK_ALIGN`] and
    /// valid for `block.class` bytes.
    pub fn block_ptr(&self, block: ArenaBlock) -> NonNull<u8> {
        let offset = block.superblock * self.layout.superblock_size + block.index * block.class;
        debug_assert!(offset + block.class <= self.memory.len() * BLOCK_ALIGN);
        let base = UnsafeCell::raw_get(self.memory.as_ptr().cast::<UnsafeCell<MaybeUninit<[u8; BLOCK_ALIGN]>>>());
        // SAFETY: `offset` stays inside `memory`, which is never empty.
        unsafe { NonNull::new_unchecked(base.cast::<u8>().add(offset)) }
    }

    fn exhausted(&self, requested: usize) -> BlockwiseError {
        BlockwiseError::QueueExhausted {
            requested,
            available: self.layout.capacity.saturating_sub(self.in_use.load(Ordering::Relaxed)),
            capacity: self.layout.capacity,
        }
    }

    /// Admit an operation whose records are described by `census`.
    ///
    /// Succeeds only if the arena can hold every admitted operation's
    /// records at once, so an admitted operation never runs out of space
    /// mid-graph.
    pub fn reserve(&self, census: &TaskCensus) -> Result<(), BlockwiseError> {
        let wanted = census
            .by_class(&self.layout)
            .map_err(|footprint| self.exhausted(footprint))?;
        let mut reserved = lock(&self.reserved);
        let mut total = reserved.clone();
        for (&class, &count) in &wanted {
            *total.entry(class).or_default() += count;
        }
        let superblocks: usize = total
            .iter()
            .map(|(&class, &count)| count.div_ceil(self.layout.blocks_per_superblock(class)))
            .sum();
        if superblocks > self.layout.num_superblocks {
            return Err(self.exhausted(census.total_bytes()));
        }
        *reserved = total;
        Ok(())
    }

    pub fn release(&self, census: &TaskCensus) {
        let Ok(wanted) = census.by_class(&self.layout) else {
            return;
        };
        let mut reserved = lock(&self.reserved);
        for (class, count) in wanted {
            if let Some(r) = reserved.get_mut(&class) {
                *r = r.saturating_sub(count);
                if *r == 0 {
                    reserved.remove(&class);
                }
            }
        }
    }

    /// Allocate a block for a record of `bytes`.
    pub fn allocate(&self, bytes: usize) -> Result<ArenaBlock, BlockwiseError> {
        let class = self.layout.class_for(bytes).ok_or_else(|| self.exhausted(bytes))?;
        let start = rayon::current_thread_index().unwrap_or(0);

        if let Some(block) = self.allocate_in_claimed(class, start) {
            return Ok(self.account(block));
        }

        let _claim = lock(&self.claim);
        // Another worker may have claimed a superblock for this class meanwhile.
        if let Some(block) = self.allocate_in_claimed(class, start) {
            return Ok(self.account(block));
        }
        for (superblock, sb) in self.superblocks.iter().enumerate() {
            let mut sb = lock(sb);
            if sb.class.is_none() {
                sb.class = Some(class);
                sb.free.clear();
                sb.free.extend((0..self.layout.blocks_per_superblock(class)).rev());
                let index = sb.free.pop().ok_or_else(|| self.exhausted(bytes))?;
                sb.used = 1;
                return Ok(self.account(ArenaBlock { superblock, index, class }));
            }
        }
        Err(self.exhausted(bytes))
    }

    fn allocate_in_claimed(&self, class: usize, start: usize) -> Option<ArenaBlock> {
        let n = self.superblocks.len();
        for offset in 0..n {
            let superblock = (start + offset) % n;
            let mut sb = lock(&self.superblocks[superblock]);
            if sb.class == Some(class) {
                if let Some(index) = sb.free.pop() {
                    sb.used += 1;
                    return Some(ArenaBlock { superblock, index, class });
                }
            }
        }
        None
    }

    fn account(&self, block: ArenaBlock) -> ArenaBlock {
        let now = self.in_use.fetch_add(block.class, Ordering::Relaxed) + block.class;
        self.peak.fetch_max(now, Ordering::Relaxed);
        block
    }

    pub fn free(&self, block: ArenaBlock) {
        let mut sb = lock(&self.superblocks[block.superblock]);
        debug_assert_eq!(sb.class, Some(block.class));
        sb.free.push(block.index);
        sb.used -= 1;
        if sb.used == 0 {
            sb.class = None;
            sb.free.clear();
        }
        self.in_use.fetch_sub(block.class, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ArenaStats {
        let superblocks_claimed = self
            .superblocks
            .iter()
            .filter(|sb| lock(sb).class.is_some())
            .count();
        ArenaStats {
            layout: self.layout,
            bytes_in_use: self.in_use.load(Ordering::Relaxed),
            peak_bytes: self.peak.load(Ordering::Relaxed),
            superblocks_claimed,
            slot_table_bytes: self.slot_table_bytes,
        }
    }
}
