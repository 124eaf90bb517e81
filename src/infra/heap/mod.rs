//! Bounded-arena allocator backing every message buffer of the stack.
//!
//! The arena is a single `&'static mut [u8]` installed once. It is carved into
//! 8-byte units; each block starts with one header unit:
//!
//! ```text
//! bytes 0..4 : block size in units (header included), little endian
//! bytes 4..8 : index of the next free block, or IN_USE_TAG when allocated
//! ```
//!
//! Free blocks form a singly linked list ordered by address so that release
//! can coalesce with both neighbours. Allocation is first fit and splits the
//! front of a larger block.
use alloc::sync::Arc;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};

use crate::error::HeapError;

/// Allocation granule in bytes.
pub const UNIT: usize = 8;
/// Smallest block the arena can hand out: one header and one data unit.
const MIN_BLOCK_UNITS: u32 = 2;
const IN_USE_TAG: u32 = 0xA5A5_A5A5;
const END_OF_LIST: u32 = u32::MAX;

/// Handle to an allocated block. Not `Copy`/`Clone`: a block can be released
/// only once.
#[derive(Debug, PartialEq, Eq)]
pub struct HeapBlock {
    offset: usize,
    len: usize,
}

impl HeapBlock {
    /// Byte offset of the block data inside the arena.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes requested at allocation time.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn header_unit(&self) -> usize {
        self.offset / UNIT - 1
    }

    #[cfg(test)]
    pub(crate) fn forged(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }
}

/// First-fit allocator over an installed arena.
pub struct HeapAllocator {
    arena: Option<&'static mut [u8]>,
    total_units: u32,
    free_head: u32,
    free_units: u32,
    low_water_units: u32,
    live_blocks: usize,
    malloc_failures: u16,
    fault: Option<HeapError>,
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapAllocator {
    /// Allocator without an arena; every allocation fails until `install`.
    pub const fn new() -> Self {
        Self {
            arena: None,
            total_units: 0,
            free_head: END_OF_LIST,
            free_units: 0,
            low_water_units: 0,
            live_blocks: 0,
            malloc_failures: 0,
            fault: None,
        }
    }

    /// Attach the arena. The whole arena becomes one free block.
    pub fn install(&mut self, arena: &'static mut [u8]) -> Result<(), HeapError> {
        if self.arena.is_some() {
            return Err(HeapError::AlreadyInstalled);
        }
        let units = (arena.len() / UNIT).min(u32::MAX as usize - 1) as u32;
        if units < MIN_BLOCK_UNITS {
            return Err(HeapError::ArenaTooSmall { size: arena.len() });
        }
        self.arena = Some(arena);
        self.total_units = units;
        self.free_units = units;
        self.low_water_units = units;
        self.live_blocks = 0;
        self.free_head = 0;
        self.fault = None;
        self.write_header(0, units, END_OF_LIST);

        #[cfg(feature = "defmt")]
        defmt::info!("heap: arena installed, {} units", units);
        Ok(())
    }

    /// Detach the arena and hand the raw buffer back. Refused while blocks are live.
    pub fn destroy(&mut self) -> Result<&'static mut [u8], HeapError> {
        if self.live_blocks != 0 {
            return Err(HeapError::BlocksInUse {
                count: self.live_blocks,
            });
        }
        let arena = self.arena.take().ok_or(HeapError::NotInstalled)?;
        self.total_units = 0;
        self.free_units = 0;
        self.free_head = END_OF_LIST;
        Ok(arena)
    }

    pub fn is_installed(&self) -> bool {
        self.arena.is_some()
    }

    /// Allocate at least `n` bytes. Returns `None` on exhaustion and bumps the
    /// failure counter; callers drop the message they were building.
    pub fn allocate(&mut self, n: usize) -> Option<HeapBlock> {
        if self.arena.is_none() {
            self.malloc_failures = self.malloc_failures.saturating_add(1);
            return None;
        }
        let data_units = n.max(1).div_ceil(UNIT);
        let needed = match u32::try_from(data_units + 1) {
            Ok(units) => units,
            Err(_) => {
                self.malloc_failures = self.malloc_failures.saturating_add(1);
                return None;
            }
        };

        let mut previous = END_OF_LIST;
        let mut current = self.free_head;
        while current != END_OF_LIST {
            let (size, next) = self.read_header(current);
            if size >= needed {
                let taken = if size - needed >= MIN_BLOCK_UNITS {
                    let remainder = current + needed;
                    self.write_header(remainder, size - needed, next);
                    self.relink(previous, remainder);
                    needed
                } else {
                    self.relink(previous, next);
                    size
                };
                self.write_header(current, taken, IN_USE_TAG);
                self.free_units -= taken;
                self.low_water_units = self.low_water_units.min(self.free_units);
                self.live_blocks += 1;
                return Some(HeapBlock {
                    offset: (current as usize + 1) * UNIT,
                    len: n,
                });
            }
            previous = current;
            current = next;
        }

        self.malloc_failures = self.malloc_failures.saturating_add(1);
        #[cfg(feature = "defmt")]
        defmt::warn!("heap: allocation of {} bytes failed", n);
        None
    }

    /// Return a block to the free list, merging it with free neighbours.
    pub fn release(&mut self, block: HeapBlock) -> Result<(), HeapError> {
        let unit = match self.check_live(&block) {
            Ok(unit) => unit,
            Err(HeapError::Corrupted { offset }) => return self.corrupted(offset),
            Err(error) => return Err(error),
        };
        let (size, _) = self.read_header(unit);

        // Locate neighbours in the address-ordered free list.
        let mut previous = END_OF_LIST;
        let mut next = self.free_head;
        while next != END_OF_LIST && next < unit {
            previous = next;
            next = self.read_header(next).1;
        }
        if next == unit || (next != END_OF_LIST && unit + size > next) {
            return self.corrupted(block.offset);
        }

        let mut merged_size = size;
        let mut link = next;
        if next != END_OF_LIST && unit + size == next {
            let (next_size, next_next) = self.read_header(next);
            merged_size += next_size;
            link = next_next;
        }

        if previous != END_OF_LIST {
            let (previous_size, _) = self.read_header(previous);
            if previous + previous_size == unit {
                self.write_header(previous, previous_size + merged_size, link);
                self.write_header(unit, 0, 0);
            } else if previous + previous_size > unit {
                return self.corrupted(block.offset);
            } else {
                self.write_header(unit, merged_size, link);
                self.relink(previous, unit);
            }
        } else {
            self.write_header(unit, merged_size, link);
            self.free_head = unit;
        }

        self.free_units += size;
        self.live_blocks -= 1;
        Ok(())
    }

    /// Bytes currently free, headers included.
    pub fn free_bytes(&self) -> usize {
        self.free_units as usize * UNIT
    }

    /// Lowest value `free_bytes` has reached since install.
    pub fn free_low_water(&self) -> usize {
        self.low_water_units as usize * UNIT
    }

    /// Number of failed allocations since install.
    pub fn malloc_failures(&self) -> u16 {
        self.malloc_failures
    }

    /// Number of blocks currently allocated.
    pub fn live_blocks(&self) -> usize {
        self.live_blocks
    }

    /// Fault recorded by a release that could not be propagated (drop path).
    pub fn take_fault(&mut self) -> Option<HeapError> {
        self.fault.take()
    }

    /// Read-only view over a live block.
    pub fn bytes(&self, block: &HeapBlock) -> Result<&[u8], HeapError> {
        self.check_live(block)?;
        let arena = self.arena.as_deref().ok_or(HeapError::NotInstalled)?;
        Ok(&arena[block.offset..block.offset + block.len])
    }

    /// Mutable view over a live block.
    pub fn bytes_mut(&mut self, block: &HeapBlock) -> Result<&mut [u8], HeapError> {
        self.check_live(block)?;
        let arena = self.arena.as_deref_mut().ok_or(HeapError::NotInstalled)?;
        Ok(&mut arena[block.offset..block.offset + block.len])
    }

    /// Simultaneous mutable views over distinct live blocks, returned in the
    /// order the blocks were given.
    pub fn disjoint_mut<const N: usize>(
        &mut self,
        blocks: [&HeapBlock; N],
    ) -> Result<[&mut [u8]; N], HeapError> {
        for block in blocks.iter() {
            self.check_live(block)?;
        }
        let mut order: [usize; N] = core::array::from_fn(|index| index);
        order.sort_unstable_by_key(|&index| blocks[index].offset);

        let arena = self.arena.as_deref_mut().ok_or(HeapError::NotInstalled)?;
        let mut views: [Option<&mut [u8]>; N] = core::array::from_fn(|_| None);
        let mut rest: &mut [u8] = arena;
        let mut consumed = 0usize;
        for &index in order.iter() {
            let block = blocks[index];
            if block.offset < consumed {
                return Err(HeapError::InvalidBlock {
                    offset: block.offset,
                });
            }
            let tail = core::mem::take(&mut rest);
            let (_, tail) = tail.split_at_mut(block.offset - consumed);
            let (view, tail) = tail.split_at_mut(block.len);
            views[index] = Some(view);
            rest = tail;
            consumed = block.offset + block.len;
        }
        Ok(views.map(|view| view.unwrap_or_default()))
    }

    fn check_live(&self, block: &HeapBlock) -> Result<u32, HeapError> {
        let invalid = HeapError::InvalidBlock {
            offset: block.offset,
        };
        if self.arena.is_none() {
            return Err(HeapError::NotInstalled);
        }
        if block.offset < UNIT || block.offset % UNIT != 0 {
            return Err(invalid);
        }
        let unit = block.header_unit();
        if unit as u32 >= self.total_units {
            return Err(invalid);
        }
        let unit = unit as u32;
        let (size, tag) = self.read_header(unit);
        if tag != IN_USE_TAG {
            return Err(invalid);
        }
        if size < MIN_BLOCK_UNITS
            || unit + size > self.total_units
            || block.len > (size as usize - 1) * UNIT
        {
            return Err(HeapError::Corrupted {
                offset: block.offset,
            });
        }
        Ok(unit)
    }

    fn corrupted(&mut self, offset: usize) -> Result<(), HeapError> {
        let error = HeapError::Corrupted { offset };
        self.fault = Some(error);
        #[cfg(feature = "defmt")]
        defmt::error!("heap: corruption detected at offset {}", offset);
        Err(error)
    }

    fn relink(&mut self, previous: u32, next: u32) {
        if previous == END_OF_LIST {
            self.free_head = next;
        } else {
            let (size, _) = self.read_header(previous);
            self.write_header(previous, size, next);
        }
    }

    fn read_header(&self, unit: u32) -> (u32, u32) {
        let Some(arena) = self.arena.as_deref() else {
            return (0, END_OF_LIST);
        };
        let base = unit as usize * UNIT;
        let mut size = [0u8; 4];
        let mut link = [0u8; 4];
        size.copy_from_slice(&arena[base..base + 4]);
        link.copy_from_slice(&arena[base + 4..base + 8]);
        (u32::from_le_bytes(size), u32::from_le_bytes(link))
    }

    fn write_header(&mut self, unit: u32, size: u32, link: u32) {
        if let Some(arena) = self.arena.as_deref_mut() {
            let base = unit as usize * UNIT;
            arena[base..base + 4].copy_from_slice(&size.to_le_bytes());
            arena[base + 4..base + 8].copy_from_slice(&link.to_le_bytes());
        }
    }
}

//==================================================================================SHARED_HEAP
/// Allocator shared between the engine and envelope holders. The raw mutex
/// type is the host's choice: `NoopRawMutex` for a single thread,
/// `CriticalSectionRawMutex` when envelopes cross threads or interrupts.
pub type SharedHeap<M> = Arc<Mutex<M, RefCell<HeapAllocator>>>;

/// Wrap an allocator for sharing.
pub fn shared_heap<M: RawMutex>(allocator: HeapAllocator) -> SharedHeap<M> {
    Arc::new(Mutex::new(RefCell::new(allocator)))
}

/// Run `f` with exclusive access to the allocator.
///
/// Must not be nested, and no [`HeapBox`] may be dropped inside `f`.
pub fn with_heap<M: RawMutex, R>(heap: &SharedHeap<M>, f: impl FnOnce(&mut HeapAllocator) -> R) -> R {
    heap.lock(|cell| f(&mut cell.borrow_mut()))
}

/// Owned block released on drop.
pub struct HeapBox<M: RawMutex> {
    heap: SharedHeap<M>,
    block: Option<HeapBlock>,
}

impl<M: RawMutex> HeapBox<M> {
    /// Allocate `len` bytes; `None` when the arena is exhausted.
    pub fn new(heap: &SharedHeap<M>, len: usize) -> Option<Self> {
        let block = with_heap(heap, |allocator| allocator.allocate(len))?;
        Some(Self::from_block(heap.clone(), block))
    }

    /// Take ownership of a block allocated from `heap`.
    pub fn from_block(heap: SharedHeap<M>, block: HeapBlock) -> Self {
        Self {
            heap,
            block: Some(block),
        }
    }

    /// Allocator the block belongs to.
    pub fn heap(&self) -> &SharedHeap<M> {
        &self.heap
    }

    pub fn len(&self) -> usize {
        self.block.as_ref().map_or(0, HeapBlock::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Underlying block, for multi-block access through [`HeapAllocator::disjoint_mut`].
    pub fn block(&self) -> Option<&HeapBlock> {
        self.block.as_ref()
    }

    /// Read the block contents under the heap lock.
    pub fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Result<R, HeapError> {
        let block = self.block.as_ref().ok_or(HeapError::NotInstalled)?;
        with_heap(&self.heap, |allocator| allocator.bytes(block).map(f))
    }

    /// Mutate the block contents under the heap lock.
    pub fn with_mut<R>(&mut self, f: impl FnOnce(&mut [u8]) -> R) -> Result<R, HeapError> {
        let block = self.block.as_ref().ok_or(HeapError::NotInstalled)?;
        with_heap(&self.heap, |allocator| allocator.bytes_mut(block).map(f))
    }
}

impl<M: RawMutex> Drop for HeapBox<M> {
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            // A failing release records the fault inside the allocator; the
            // engine surfaces it on its next tick.
            let _ = with_heap(&self.heap, |allocator| allocator.release(block));
        }
    }
}

impl<M: RawMutex> core::fmt::Debug for HeapBox<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapBox").field("block", &self.block).finish()
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
