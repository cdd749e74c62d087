//! Kernel virtual address arena (component B).
//!
//! Partitions a reserved kernel virtual range into free spans, tracked both
//! address-ordered (for coalescing on free) and by size class (for fast
//! first-fit allocation). Allocations are carved off the *back* of the
//! smallest-fitting span so fragmentation concentrates away from low
//! addresses, per §4.2.
//!
//! The real allocator is self-hosting: splitting a span can need a fresh
//! span descriptor, which would normally be carved from a dedicated
//! descriptor slab fed one page at a time from the region being freed. This
//! core runs after the global heap is already up (see `mm::init`), so span
//! bookkeeping is ordinary heap-backed `alloc` collections instead of a
//! bootstrap slab; the `back`/`unback` contract callers see is unaffected.

use super::page::PAGE_SIZE;
use crate::error::KernelError;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

pub type VirtAddr = u32;

const NUM_SIZE_CLASSES: usize = 29;

fn size_class(pages: usize) -> usize {
    (usize::BITS - pages.leading_zeros() - 1).min(NUM_SIZE_CLASSES as u32 - 1) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: VirtAddr,
    pages: usize,
}

struct Arena {
    base: VirtAddr,
    limit: VirtAddr,
    /// Free spans ordered by start address, for predecessor/successor
    /// coalescing lookups.
    by_addr: BTreeMap<VirtAddr, usize>,
    classes: [Vec<Span>; NUM_SIZE_CLASSES],
}

impl Arena {
    fn new(base: VirtAddr, size: usize) -> Self {
        let mut a = Self {
            base,
            limit: base + size as u32,
            by_addr: BTreeMap::new(),
            classes: core::array::from_fn(|_| Vec::new()),
        };
        a.insert_span(Span {
            start: base,
            pages: size / PAGE_SIZE,
        });
        a
    }

    fn insert_span(&mut self, span: Span) {
        let class = size_class(span.pages);
        let idx = self.classes[class].len();
        self.classes[class].push(span);
        self.by_addr.insert(span.start, class * 1_000_000 + idx);
    }

    fn remove_span_at(&mut self, class: usize, idx: usize) -> Span {
        let span = self.classes[class].swap_remove(idx);
        self.by_addr.remove(&span.start);
        // swap_remove may have moved the last element into `idx`; fix its index.
        if idx < self.classes[class].len() {
            let moved = self.classes[class][idx];
            self.by_addr.insert(moved.start, class * 1_000_000 + idx);
        }
        span
    }

    fn alloc(&mut self, pages: usize) -> Option<VirtAddr> {
        let want_class = size_class(pages);
        for class in want_class..NUM_SIZE_CLASSES {
            if let Some(idx) = self.classes[class].iter().position(|s| s.pages >= pages) {
                let span = self.remove_span_at(class, idx);
                let alloc_start = span.start + ((span.pages - pages) * PAGE_SIZE) as u32;
                if span.pages > pages {
                    self.insert_span(Span {
                        start: span.start,
                        pages: span.pages - pages,
                    });
                }
                return Some(alloc_start);
            }
        }
        None
    }

    fn free(&mut self, addr: VirtAddr, pages: usize) {
        let mut start = addr;
        let mut total_pages = pages;

        // Coalesce with predecessor span if it ends exactly at `start`.
        if let Some((&pstart, _)) = self.by_addr.range(..start).next_back() {
            if let Some(pspan) = self.find_span(pstart) {
                if pstart + (pspan.pages * PAGE_SIZE) as u32 == start {
                    self.remove_span_exact(pspan);
                    start = pspan.start;
                    total_pages += pspan.pages;
                }
            }
        }
        // Coalesce with successor span if `start + size` matches its start.
        let end = start + (total_pages * PAGE_SIZE) as u32;
        if let Some(nspan) = self.find_span(end) {
            self.remove_span_exact(nspan);
            total_pages += nspan.pages;
        }

        self.insert_span(Span {
            start,
            pages: total_pages,
        });
    }

    fn find_span(&self, start: VirtAddr) -> Option<Span> {
        let &packed = self.by_addr.get(&start)?;
        let class = packed / 1_000_000;
        let idx = packed % 1_000_000;
        self.classes[class].get(idx).copied()
    }

    fn remove_span_exact(&mut self, span: Span) {
        let packed = self.by_addr[&span.start];
        self.remove_span_at(packed / 1_000_000, packed % 1_000_000);
    }
}

static ARENA: Mutex<Option<Arena>> = Mutex::new(None);

pub fn init(base: VirtAddr, size: usize) {
    *ARENA.lock() = Some(Arena::new(base, size));
}

/// Reserve `size` bytes of kernel virtual address space (unbacked).
pub fn alloc(size: usize) -> Result<VirtAddr, KernelError> {
    let pages = size.div_ceil(PAGE_SIZE);
    let mut arena = ARENA.lock();
    let arena = arena.as_mut().ok_or(KernelError::NotFound)?;
    arena.alloc(pages).ok_or(KernelError::OutOfMemory)
}

/// Return a previously reserved range to the arena.
pub fn free(addr: VirtAddr, size: usize) {
    let pages = size.div_ceil(PAGE_SIZE);
    let mut arena = ARENA.lock();
    if let Some(arena) = arena.as_mut() {
        arena.free(addr, pages);
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BackFlags: u32 {
        const WRITE = 1 << 0;
        const EXEC  = 1 << 1;
    }
}

/// Reserve `size` bytes and back them with fresh physical frames mapped at
/// the chosen address with `flags`.
pub fn alloc_backed(size: usize, flags: BackFlags) -> Result<VirtAddr, KernelError> {
    let addr = alloc(size)?;
    back(addr, size, flags)?;
    Ok(addr)
}

/// Map fresh physical frames under `[addr, addr+size)`, which must already
/// be reserved via [`alloc`].
pub fn back(addr: VirtAddr, size: usize, _flags: BackFlags) -> Result<VirtAddr, KernelError> {
    let pages = size.div_ceil(PAGE_SIZE);
    for i in 0..pages {
        let pa = super::buddy::alloc_page().ok_or(KernelError::OutOfMemory)?;
        let va = addr + (i * PAGE_SIZE) as u32;
        super::pagetable::map_page(va, pa, super::pagetable::PteFlags::PRESENT | super::pagetable::PteFlags::WRITABLE)
            .map_err(|_| KernelError::OutOfMemory)?;
    }
    Ok(addr)
}

/// Unmap and free the physical frames backing `[ptr, ptr+size)`.
pub fn unback(ptr: VirtAddr, size: usize) {
    let pages = size.div_ceil(PAGE_SIZE);
    for i in 0..pages {
        let va = ptr + (i * PAGE_SIZE) as u32;
        if let Some(pa) = super::pagetable::unmap_page(va) {
            super::buddy::free_page(pa);
        }
    }
}
