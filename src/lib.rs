//! Kernel core: a preemptive, SMP-capable, Unix-like kernel core for 32-bit
//! x86. Compiled two ways — `no_std` for the real `halcyon_kernel` binary
//! (`src/main.rs`), and against host `std` under `cfg(test)` so every
//! module's `#[cfg(test)] mod tests` block runs with `cargo test`, the same
//! split the teacher kernel uses to keep its unit tests off real hardware.

#![cfg_attr(not(test), no_std)]
#![feature(alloc_error_handler)]

extern crate alloc;

pub mod arch;
pub mod block;
pub mod boot;
pub mod error;
pub mod heap;
pub mod klog;
pub mod mm;
pub mod panic;
pub mod process;
pub mod ringbuf;
pub mod smp;
pub mod tty;
pub mod vfs;

use boot::BootConfig;
use error::KernelError;

/// Bring up every subsystem in dependency order, from the [`BootConfig`]
/// the platform layer assembled from the boot protocol: heap, then physical
/// memory and the kernel's virtual arena, then SMP run queues, then the
/// root process. Mirrors the teacher's staged `kernel_main` sequencing,
/// narrowed to the subsystems this core owns.
pub fn boot(config: &BootConfig) -> Result<(), KernelError> {
    heap::init();
    klog::set_level(config.log_level);

    let ram_ranges = config.ram_ranges();
    let kernel_virt_base: mm::vmem::VirtAddr = 0xC000_0000;
    let kernel_virt_size: usize = 256 * 1024 * 1024;
    mm::init(&ram_ranges, kernel_virt_base, kernel_virt_size)?;

    process::init(config.num_cpus)?;

    crate::info!("boot complete: {} CPU(s), {} RAM range(s)", config.num_cpus, ram_ranges.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mm::page::PhysAddr;

    #[test]
    fn boot_brings_up_every_subsystem() {
        let base: PhysAddr = 0x10_0000;
        let config = BootConfig::single_segment(base, 16 * 1024 * 1024);
        boot(&config).unwrap();
        let (threads, _) = process::sched::global_stats();
        assert_eq!(threads, 1, "root process's thread should be registered with CPU 0");
    }
}
