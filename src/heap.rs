//! Managed heap: a single contiguous region carved into header-prefixed blocks.
//!
//! Fresh memory is handed out bump-style from `top`. Blocks reclaimed by the
//! collector go on an address-ordered free list (the link lives in the first
//! word of the free block's body) and are reused first-fit, splitting off the
//! tail when the remainder can hold another block. A bitmap with one bit per
//! 8-byte granule records where allocated blocks begin, so any address can be
//! checked exactly against the set of live objects.

use alloc::vec::Vec;
use core::alloc::Layout;
use core::ptr::{self, NonNull};

use crate::error::{fatal, FatalError};
use crate::object::{ObjRef, ObjectHeader, FLAG_MARKED, HEADER_SIZE};
use crate::types::TypeDescriptor;

/// Alignment of every block and of every block size.
pub const ALIGN: usize = 8;

/// Smallest block: a header plus room for the free-list link.
pub const MIN_BLOCK: usize = HEADER_SIZE + ALIGN;

const NIL: usize = usize::MAX;

/// Align the given value upwards to the given alignment (power of two).
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// Align the given value downwards to the given alignment (power of two).
pub const fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

// ---------------------------------------------------------------------------
// HeapRegion: backing memory
// ---------------------------------------------------------------------------

/// The memory a heap is built on.
pub struct HeapRegion {
    base: NonNull<u8>,
    size: usize,
    /// Allocated from the global allocator and released on drop.
    owned: bool,
}

impl HeapRegion {
    /// Allocate a zeroed region from the global allocator.
    pub fn allocate(size: usize) -> Result<Self, &'static str> {
        let size = align_down(size, ALIGN);
        if size < MIN_BLOCK {
            return Err("heap: region too small");
        }
        let layout = Layout::from_size_align(size, ALIGN).map_err(|_| "heap: invalid layout")?;
        // SAFETY: layout has non-zero size.
        let base = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let base = NonNull::new(base).ok_or("heap: failed to allocate region")?;
        Ok(HeapRegion {
            base,
            size,
            owned: true,
        })
    }

    /// Use caller-provided memory, such as a static buffer on a bare-metal target.
    ///
    /// # Safety
    ///
    /// `base..base + size` must be valid for reads and writes, must not be
    /// accessed through any other path, and must outlive the region.
    pub unsafe fn from_raw_parts(base: *mut u8, size: usize) -> Result<Self, &'static str> {
        let base = NonNull::new(base).ok_or("heap: null region")?;
        if base.as_ptr() as usize % ALIGN != 0 {
            return Err("heap: region is not 8-byte aligned");
        }
        let size = align_down(size, ALIGN);
        if size < MIN_BLOCK {
            return Err("heap: region too small");
        }
        ptr::write_bytes(base.as_ptr(), 0, size);
        Ok(HeapRegion {
            base,
            size,
            owned: false,
        })
    }

    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        if self.owned {
            // SAFETY: same layout as in `allocate`, which already validated it.
            unsafe {
                let layout = Layout::from_size_align_unchecked(self.size, ALIGN);
                alloc::alloc::dealloc(self.base.as_ptr(), layout);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Heap
// ---------------------------------------------------------------------------

/// Heap occupancy counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub capacity: usize,
    /// Bytes in allocated blocks, headers included.
    pub used_bytes: usize,
    pub peak_used_bytes: usize,
    pub live_objects: usize,
    /// Allocations since the heap was created.
    pub allocations: u64,
    pub collections: u64,
    pub last_freed_objects: usize,
    pub last_freed_bytes: usize,
}

impl HeapStats {
    pub fn free_bytes(&self) -> usize {
        self.capacity - self.used_bytes
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepResult {
    pub freed_objects: usize,
    pub freed_bytes: usize,
    pub live_objects: usize,
    pub live_bytes: usize,
}

pub struct Heap {
    region: HeapRegion,
    /// End of the carved part of the region.
    top: usize,
    free_head: usize,
    free_bytes: usize,
    /// 1 = an allocated block starts at this granule
    starts: Vec<u64>,
    stats: HeapStats,
}

impl Heap {
    pub fn new(region: HeapRegion) -> Self {
        let granules = region.size() / ALIGN;
        let stats = HeapStats {
            capacity: region.size(),
            ..HeapStats::default()
        };
        log::debug!(
            "managed heap at {:#x}: {} KiB",
            region.base() as usize,
            region.size() / 1024
        );
        Heap {
            region,
            top: 0,
            free_head: NIL,
            free_bytes: 0,
            starts: alloc::vec![0u64; (granules + 63) / 64],
            stats,
        }
    }

    pub fn capacity(&self) -> usize {
        self.region.size()
    }

    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Block size needed for a body of `body_size` bytes, or `None` if it
    /// cannot be described by a block header.
    pub fn block_size_for(body_size: usize) -> Option<usize> {
        let size = body_size.checked_add(HEADER_SIZE + ALIGN - 1)? & !(ALIGN - 1);
        let size = size.max(MIN_BLOCK);
        if size > u32::MAX as usize {
            return None;
        }
        Some(size)
    }

    /// Allocate a block with a zeroed body of at least `body_size` bytes.
    ///
    /// Returns `None` when neither the free list nor the bump region can
    /// satisfy the request; the caller decides whether to collect.
    pub fn allocate(&mut self, ty: &'static TypeDescriptor, body_size: usize) -> Option<ObjRef> {
        let need = Self::block_size_for(body_size)?;
        let (offset, size) = self.take_free(need).or_else(|| self.bump(need))?;

        // SAFETY: `offset..offset + size` lies inside the region and belongs
        // to no other block.
        let obj = unsafe {
            let block = self.region.base().add(offset);
            self.header_at(offset).init(ty, size as u32);
            ptr::write_bytes(block.add(HEADER_SIZE), 0, size - HEADER_SIZE);
            ObjRef::from_raw(block)
        };
        self.set_start(offset);

        self.stats.used_bytes += size;
        self.stats.peak_used_bytes = self.stats.peak_used_bytes.max(self.stats.used_bytes);
        self.stats.live_objects += 1;
        self.stats.allocations += 1;
        Some(obj)
    }

    fn bump(&mut self, need: usize) -> Option<(usize, usize)> {
        let end = self.top.checked_add(need)?;
        if end > self.region.size() {
            return None;
        }
        let offset = self.top;
        self.top = end;
        Some((offset, need))
    }

    /// First fit from the free list, splitting when the tail can stand alone.
    fn take_free(&mut self, need: usize) -> Option<(usize, usize)> {
        let mut prev = NIL;
        let mut cur = self.free_head;
        while cur != NIL {
            // SAFETY: every offset on the free list is a free block inside `top`.
            let (size, next) = unsafe { (self.header_at(cur).block_size(), self.next_free(cur)) };
            if size >= need {
                let remainder = size - need;
                let (used, replacement) = if remainder >= MIN_BLOCK {
                    let tail = cur + need;
                    // SAFETY: the tail lies inside the block being split.
                    unsafe { self.write_free_block(tail, remainder, next) };
                    (need, tail)
                } else {
                    (size, next)
                };
                if prev == NIL {
                    self.free_head = replacement;
                } else {
                    // SAFETY: `prev` is a free block visited above.
                    unsafe { self.set_next_free(prev, replacement) };
                }
                self.free_bytes -= used;
                return Some((cur, used));
            }
            prev = cur;
            cur = next;
        }
        None
    }

    /// True if `obj` is the start of an allocated block in this heap.
    pub fn contains(&self, obj: ObjRef) -> bool {
        let base = self.region.base() as usize;
        let addr = obj.addr();
        if addr < base {
            return false;
        }
        let offset = addr - base;
        offset < self.top && offset % ALIGN == 0 && self.is_start(offset)
    }

    /// Every allocated object, in address order.
    pub fn objects(&self) -> Objects<'_> {
        Objects {
            heap: self,
            offset: 0,
        }
    }

    /// Reclaim every allocated block that is not marked, clear the marks of
    /// the survivors and rebuild the free list from coalesced runs.
    pub(crate) fn sweep(&mut self) -> SweepResult {
        let mut result = SweepResult::default();
        let mut offset = 0;
        let mut run_start = NIL;
        let mut run_len = 0;
        let mut tail = NIL;

        self.free_head = NIL;
        self.free_bytes = 0;

        while offset < self.top {
            // SAFETY: `offset` is a block boundary below `top`.
            let header = unsafe { self.header_at(offset) };
            let size = self.checked_block_size(offset, header);

            if header.is_allocated() && header.is_marked() {
                header.unset(FLAG_MARKED);
                result.live_objects += 1;
                result.live_bytes += size;
                if run_start != NIL {
                    self.push_free(&mut tail, run_start, run_len);
                    run_start = NIL;
                    run_len = 0;
                }
            } else {
                if header.is_allocated() {
                    result.freed_objects += 1;
                    result.freed_bytes += size;
                    self.clear_start(offset);
                }
                header.release(size as u32);
                if run_start == NIL {
                    run_start = offset;
                }
                run_len += size;
            }
            offset += size;
        }

        // A free run at the end goes back to the bump region.
        if run_start != NIL {
            self.top = run_start;
        }

        self.stats.used_bytes = result.live_bytes;
        self.stats.live_objects = result.live_objects;
        self.stats.collections += 1;
        self.stats.last_freed_objects = result.freed_objects;
        self.stats.last_freed_bytes = result.freed_bytes;
        result
    }

    fn push_free(&mut self, tail: &mut usize, start: usize, len: usize) {
        // SAFETY: `start..start + len` is a run of released blocks below `top`.
        unsafe {
            self.write_free_block(start, len, NIL);
            if *tail == NIL {
                self.free_head = start;
            } else {
                self.set_next_free(*tail, start);
            }
        }
        *tail = start;
        self.free_bytes += len;
    }

    /// Bytes sitting on the free list; memory above `top` is not counted.
    pub fn free_list_bytes(&self) -> usize {
        self.free_bytes
    }

    fn checked_block_size(&self, offset: usize, header: &ObjectHeader) -> usize {
        let size = header.block_size();
        if size < MIN_BLOCK || size % ALIGN != 0 || offset + size > self.top {
            fatal(FatalError::CorruptHeap { offset });
        }
        size
    }

    /// # Safety
    ///
    /// `offset` must be a block boundary inside the region.
    unsafe fn header_at<'a>(&self, offset: usize) -> &'a ObjectHeader {
        &*(self.region.base().add(offset) as *const ObjectHeader)
    }

    unsafe fn next_free(&self, offset: usize) -> usize {
        ptr::read(self.region.base().add(offset + HEADER_SIZE) as *const usize)
    }

    unsafe fn set_next_free(&mut self, offset: usize, next: usize) {
        ptr::write(self.region.base().add(offset + HEADER_SIZE) as *mut usize, next);
    }

    unsafe fn write_free_block(&mut self, offset: usize, size: usize, next: usize) {
        self.header_at(offset).release(size as u32);
        self.set_next_free(offset, next);
    }

    fn set_start(&mut self, offset: usize) {
        let granule = offset / ALIGN;
        debug_assert!(!self.is_start(offset), "heap: block start already set");
        self.starts[granule / 64] |= 1u64 << (granule % 64);
    }

    fn clear_start(&mut self, offset: usize) {
        let granule = offset / ALIGN;
        debug_assert!(self.is_start(offset), "heap: clearing a block that is not allocated");
        self.starts[granule / 64] &= !(1u64 << (granule % 64));
    }

    fn is_start(&self, offset: usize) -> bool {
        let granule = offset / ALIGN;
        self.starts[granule / 64] & (1u64 << (granule % 64)) != 0
    }
}

/// Iterator over allocated objects, see [`Heap::objects`].
pub struct Objects<'h> {
    heap: &'h Heap,
    offset: usize,
}

impl Iterator for Objects<'_> {
    type Item = ObjRef;

    fn next(&mut self) -> Option<ObjRef> {
        while self.offset < self.heap.top {
            let offset = self.offset;
            // SAFETY: `offset` is a block boundary below `top`.
            let header = unsafe { self.heap.header_at(offset) };
            self.offset += self.heap.checked_block_size(offset, header);
            if header.is_allocated() {
                // SAFETY: allocated block start.
                return Some(unsafe { ObjRef::from_raw(self.heap.region.base().add(offset)) });
            }
        }
        None
    }
}
