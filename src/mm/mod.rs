//! Memory management core: components A through F.
//!
//! `page`/`buddy` own physical frames (A); `vmem` owns the kernel's own
//! virtual address reservations (B); `slab` carves fixed-size objects out of
//! vmem-backed pages (C); `object` is the VM object/shadow-chain model (D);
//! `address_space` is the per-process mapping tree (E); `pageout` is the
//! reclaim engine (F). `pagetable` is the MMU-contract boundary all of the
//! above share.

pub mod address_space;
pub mod buddy;
pub mod object;
pub mod page;
pub mod pageout;
pub mod pagetable;
pub mod slab;
pub mod vmem;

use crate::error::KernelError;
use page::PhysAddr;

/// Bring up the memory subsystems in dependency order: physical frames
/// first, then the kernel virtual arena they back, then the pagetable
/// contract is ready for slab/vmem to call into.
pub fn init(ram_ranges: &[(PhysAddr, usize)], kernel_virt_base: vmem::VirtAddr, kernel_virt_size: usize) -> Result<(), KernelError> {
    buddy::init_buddy(ram_ranges)?;
    vmem::init(kernel_virt_base, kernel_virt_size);
    Ok(())
}
