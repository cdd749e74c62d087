//! Boot-time configuration (§10.3): the handful of facts the boot-protocol
//! collaborator (an out-of-scope bootloader, per §1 Non-goals) hands the
//! kernel before any subsystem comes up. Unit tests build a [`BootConfig`]
//! by hand instead of parsing a real boot protocol, the same way the
//! teacher's own `#[cfg(test)]` modules construct fixtures in place of a
//! live bootloader handoff.

use crate::klog::LogLevel;
use crate::mm::page::PhysAddr;
use alloc::vec::Vec;

/// A single contiguous RAM range reported by the boot protocol, in the
/// `(base, len_bytes)` shape [`crate::mm::init`] already expects.
#[derive(Debug, Clone, Copy)]
pub struct RamRange {
    pub base: PhysAddr,
    pub len: usize,
}

#[derive(Debug, Clone)]
pub struct BootConfig {
    pub ram: Vec<RamRange>,
    pub num_cpus: usize,
    pub log_level: LogLevel,
    /// Scheduler quantum, in whatever tick unit the timer collaborator
    /// counts in (a millisecond tick on this core's reference platform).
    pub timeslice_ticks: u32,
}

impl BootConfig {
    /// A single-segment, single-CPU configuration; the shape every unit
    /// test that needs a `BootConfig` without a real bootloader reaches for.
    pub fn single_segment(base: PhysAddr, len: usize) -> Self {
        Self {
            ram: alloc::vec![RamRange { base, len }],
            num_cpus: 1,
            log_level: LogLevel::Info,
            timeslice_ticks: 10,
        }
    }

    pub fn ram_ranges(&self) -> Vec<(PhysAddr, usize)> {
        self.ram.iter().map(|r| (r.base, r.len)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_round_trips_into_ram_ranges() {
        let cfg = BootConfig::single_segment(0x10_0000, 64 * 1024 * 1024);
        assert_eq!(cfg.ram_ranges(), alloc::vec![(0x10_0000, 64 * 1024 * 1024)]);
        assert_eq!(cfg.num_cpus, 1);
    }
}
