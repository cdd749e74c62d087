//! Kernel entry point. Thin by design: boot-protocol parsing (Multiboot or
//! BIOS memory-map interrogation) is architecture glue this core doesn't
//! own (§1 Non-goals) — `_start` only has to assemble a [`BootConfig`] and
//! hand off to [`halcyon_kernel::boot`], mirroring how little the teacher's
//! own `_start` does before handing off to staged initialization.

#![no_std]
#![no_main]
#![cfg_attr(feature = "strict", deny(warnings))]

extern crate alloc;

use halcyon_kernel::boot::{BootConfig, RamRange};
use halcyon_kernel::klog::LogLevel;

/// Until the platform layer hands this core a real boot-protocol memory
/// map, `_start` boots against a single placeholder RAM segment sized to
/// this core's reference target (a 64 MiB 32-bit x86 VM).
fn placeholder_config() -> BootConfig {
    BootConfig {
        ram: alloc::vec![RamRange { base: 0x0010_0000, len: 64 * 1024 * 1024 }],
        num_cpus: 1,
        log_level: LogLevel::Info,
        timeslice_ticks: 10,
    }
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    let config = placeholder_config();

    if halcyon_kernel::boot(&config).is_err() {
        halt();
    }

    halcyon_kernel::info!("idle");
    halt();
}

fn halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}
