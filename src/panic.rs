//! Panic handling, grounded in the teacher's `lib::panic` module: a
//! recursion guard, a panic counter, and a diagnostic dump before halting.
//! Narrowed to what this core actually tracks — no per-architecture
//! register/stack dump, since the trap-entry assembly that would capture
//! those registers is explicitly out of this core's scope (§1) — and
//! printing through the `Console`/ring-buffer logging stack (`crate::klog`)
//! this core already has, instead of a raw UART byte-writer.

use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static PANICKING: AtomicBool = AtomicBool::new(false);
static PANIC_COUNT: AtomicU64 = AtomicU64::new(0);

pub fn get_panic_count() -> u64 {
    PANIC_COUNT.load(Ordering::Relaxed)
}

pub fn is_panicking() -> bool {
    PANICKING.load(Ordering::Relaxed)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    if PANICKING.swap(true, Ordering::SeqCst) {
        // A panic inside the handler itself: print nothing further, just halt.
        loop {
            core::hint::spin_loop();
        }
    }

    let panic_num = PANIC_COUNT.fetch_add(1, Ordering::SeqCst) + 1;

    crate::error!("================ KERNEL PANIC #{} ================", panic_num);
    if let Some(location) = info.location() {
        crate::error!("at {}:{}:{}", location.file(), location.line(), location.column());
    }
    if let Some(msg) = info.payload().downcast_ref::<&str>() {
        crate::error!("message: {}", msg);
    } else if let Some(msg) = info.payload().downcast_ref::<alloc::string::String>() {
        crate::error!("message: {}", msg);
    }

    let (allocs, failures) = crate::heap::stats();
    crate::error!("heap: {} allocations, {} failures", allocs, failures);

    crate::error!("recent log history:");
    for line in crate::klog::recent_lines() {
        crate::error!("  [{}] {}", line.level.as_str(), line.as_str());
    }

    crate::error!("system halted.");
    loop {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_count_starts_at_zero() {
        assert_eq!(get_panic_count(), 0);
        assert!(!is_panicking());
    }
}
