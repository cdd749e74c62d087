//! Hardware page-table mapping primitives.
//!
//! The actual i386 two-level page directory/page-table walk is architecture
//! glue explicitly out of this core's scope (§1); what the core depends on
//! is the *contract* — map a VA to a PA with protection flags, unmap it,
//! flush the TLB — which is what is modeled here as an address-keyed table.
//! A real arch layer backs this with `CR3`/PDE/PTE pokes; tests exercise the
//! contract directly since they can't safely poke hardware page tables on
//! the host.

use super::page::PhysAddr;
use super::vmem::VirtAddr;
use crate::error::KernelError;
use alloc::collections::BTreeMap;
use spin::Mutex;

pub const KERNEL_BASE: VirtAddr = 0xC000_0000;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const EXEC     = 1 << 3;
        /// Cleared on a COW-shared page so the next write traps (§4.5 fork).
        const COW_RO   = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Pte {
    pub phys: PhysAddr,
    pub flags: PteFlags,
}

/// One address space's VA -> PA mapping, the MMU-facing counterpart to a
/// [`crate::mm::address_space::AddressSpace`].
pub struct PageTable {
    entries: BTreeMap<VirtAddr, Pte>,
}

impl PageTable {
    pub const fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn map(&mut self, va: VirtAddr, pa: PhysAddr, flags: PteFlags) {
        self.entries.insert(va, Pte { phys: pa, flags });
    }

    pub fn unmap(&mut self, va: VirtAddr) -> Option<Pte> {
        self.entries.remove(&va)
    }

    pub fn translate(&self, va: VirtAddr) -> Option<Pte> {
        self.entries.get(&va).copied()
    }

    pub fn protect(&mut self, va: VirtAddr, flags: PteFlags) -> Result<(), KernelError> {
        let entry = self.entries.get_mut(&va).ok_or(KernelError::NotFound)?;
        entry.flags = flags;
        Ok(())
    }
}

/// Per-CPU "currently active" page table, the software stand-in for `CR3`.
static ACTIVE: Mutex<PageTable> = Mutex::new(PageTable::new());

pub fn map_page(va: VirtAddr, pa: PhysAddr, flags: PteFlags) -> Result<(), KernelError> {
    ACTIVE.lock().map(va, pa, flags);
    Ok(())
}

pub fn unmap_page(va: VirtAddr) -> Option<PhysAddr> {
    ACTIVE.lock().unmap(va).map(|pte| pte.phys)
}

pub fn translate(va: VirtAddr) -> Option<Pte> {
    ACTIVE.lock().translate(va)
}

pub fn protect_page(va: VirtAddr, flags: PteFlags) -> Result<(), KernelError> {
    ACTIVE.lock().protect(va, flags)
}

/// Clear the write bit of a mapping without unmapping it, used to arm a COW
/// fault on the next write (§4.5).
pub fn clear_write_bit(va: VirtAddr) {
    let mut table = ACTIVE.lock();
    if let Some(pte) = table.entries.get_mut(&va) {
        pte.flags.remove(PteFlags::WRITABLE);
        pte.flags.insert(PteFlags::COW_RO);
    }
}

pub fn flush_tlb(_va: VirtAddr) {}
pub fn flush_tlb_all() {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_then_translate() {
        let mut pt = PageTable::new();
        pt.map(0x1000, 0x2000, PteFlags::PRESENT | PteFlags::WRITABLE);
        let pte = pt.translate(0x1000).unwrap();
        assert_eq!(pte.phys, 0x2000);
        assert!(pte.flags.contains(PteFlags::WRITABLE));
    }

    #[test]
    fn unmap_removes_entry() {
        let mut pt = PageTable::new();
        pt.map(0x1000, 0x2000, PteFlags::PRESENT);
        assert!(pt.unmap(0x1000).is_some());
        assert!(pt.translate(0x1000).is_none());
    }
}
