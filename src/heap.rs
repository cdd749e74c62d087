//! Kernel heap, backing `alloc::*` for every subsystem (slab's arena carving
//! aside — the slab cache itself still goes through here for its chunk
//! storage). Grounded in the teacher's `heap` module: a `linked_list_allocator`
//! over a static backing array, installed as `#[global_allocator]`.

use core::alloc::{GlobalAlloc, Layout};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use linked_list_allocator::LockedHeap;

const HEAP_SIZE: usize = 4 * 1024 * 1024;

#[repr(align(16))]
struct HeapStorage([u8; HEAP_SIZE]);

static mut HEAP_MEMORY: HeapStorage = HeapStorage([0; HEAP_SIZE]);
static HEAP_INIT_DONE: AtomicBool = AtomicBool::new(false);

static TOTAL_ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static TOTAL_FAILURES: AtomicUsize = AtomicUsize::new(0);

struct StatsTrackingAllocator {
    inner: LockedHeap,
}

unsafe impl GlobalAlloc for StatsTrackingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let ptr = self.inner.alloc(layout);
        if ptr.is_null() {
            TOTAL_FAILURES.fetch_add(1, Ordering::Relaxed);
        } else {
            TOTAL_ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        }
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.inner.dealloc(ptr, layout)
    }
}

#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: StatsTrackingAllocator = StatsTrackingAllocator { inner: LockedHeap::empty() };

#[cfg(test)]
static ALLOCATOR: StatsTrackingAllocator = StatsTrackingAllocator { inner: LockedHeap::empty() };

/// Initialize the kernel heap. Idempotent; later calls are a no-op.
pub fn init() {
    if HEAP_INIT_DONE.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
        unsafe {
            let base = core::ptr::addr_of_mut!(HEAP_MEMORY.0) as *mut u8;
            ALLOCATOR.inner.lock().init(base, HEAP_SIZE);
        }
    }
}

pub fn stats() -> (usize, usize) {
    (TOTAL_ALLOCATIONS.load(Ordering::Relaxed), TOTAL_FAILURES.load(Ordering::Relaxed))
}

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error_handler(layout: Layout) -> ! {
    crate::error!("out of memory: size={} align={}", layout.size(), layout.align());
    loop {
        core::hint::spin_loop();
    }
}
