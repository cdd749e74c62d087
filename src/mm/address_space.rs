//! Per-process virtual address space (component E).
//!
//! Mappings are kept in an address-ordered tree (here a `BTreeMap` keyed by
//! start address, standing in for the red-black `mman` tree in `vm/vas.c`).
//! `map`/`unmap`/`protect`/`fork`/`fault` follow that file's `vm_vas_*`
//! entry points; trimming partially-overlapped mappings on `unmap` is
//! grounded directly in `vm_vas_do_unmap`.

use super::object::{demand_shadow, demand_shadow_register, demand_shadow_unregister, Access, VmObject};
use super::pagetable::{self, PteFlags};
use super::vmem::VirtAddr;
use crate::error::KernelError;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::Mutex;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        const READ       = 1 << 0;
        const WRITE      = 1 << 1;
        const EXEC       = 1 << 2;
        const SHARED     = 1 << 3;
        const PRIVATE    = 1 << 4;
        /// Next write fault must demand-shadow this mapping's object before
        /// installing a writable page (§4.5).
        const SHADOW_PENDING = 1 << 5;
    }
}

pub struct Mapping {
    pub start: VirtAddr,
    pub size: u32,
    pub flags: MapFlags,
    pub max_prot: MapFlags,
    pub object: Arc<VmObject>,
    pub offset: u64,
    /// Length of an unaligned tail, nonzero only for the final mapping of a
    /// file whose size isn't page-aligned (§4.4 unaligned-tail handling).
    pub real_size: Option<u32>,
}

impl Mapping {
    fn end(&self) -> VirtAddr {
        self.start + self.size
    }
}

pub struct AddressSpace {
    base: VirtAddr,
    limit: VirtAddr,
    maps: BTreeMap<VirtAddr, Mapping>,
}

impl AddressSpace {
    pub fn new(base: VirtAddr, limit: VirtAddr) -> Self {
        Self {
            base,
            limit,
            maps: BTreeMap::new(),
        }
    }

    fn find_free(&self, size: u32) -> Option<VirtAddr> {
        let mut cursor = self.base;
        for m in self.maps.values() {
            if m.start.saturating_sub(cursor) >= size {
                return Some(cursor);
            }
            cursor = m.end();
        }
        if self.limit.saturating_sub(cursor) >= size {
            Some(cursor)
        } else {
            None
        }
    }

    /// Map `size` bytes of `object` starting at `offset`. `addr == None`
    /// asks the allocator for a free range; `Some(addr)` unmaps any
    /// overlap first, then inserts at that fixed address.
    pub fn map(
        &mut self,
        addr: Option<VirtAddr>,
        size: u32,
        object: Arc<VmObject>,
        offset: u64,
        flags: MapFlags,
        max_prot: MapFlags,
    ) -> Result<VirtAddr, KernelError> {
        if !flags.difference(max_prot).is_empty() {
            return Err(KernelError::InvalidArgument);
        }
        let start = match addr {
            Some(a) => {
                self.unmap(a, size)?;
                a
            }
            None => self.find_free(size).ok_or(KernelError::OutOfMemory)?,
        };
        if flags.contains(MapFlags::SHADOW_PENDING) {
            demand_shadow_register(&object);
        }
        self.maps.insert(
            start,
            Mapping {
                start,
                size,
                flags,
                max_prot,
                object,
                offset,
                real_size: None,
            },
        );
        Ok(start)
    }

    fn mappings_in_range(&self, addr: VirtAddr, size: u32) -> alloc::vec::Vec<VirtAddr> {
        let end = addr + size;
        self.maps
            .range(..end)
            .rev()
            .take_while(|(_, m)| m.end() > addr)
            .map(|(&k, _)| k)
            .collect()
    }

    /// Trim or remove every mapping intersecting `[addr, addr+size)`. A
    /// mapping that starts before the range keeps its head and loses its
    /// tail; one that ends after the range keeps its tail and loses its
    /// head; one fully inside is removed outright (§4.5).
    pub fn unmap(&mut self, addr: VirtAddr, size: u32) -> Result<(), KernelError> {
        let end = addr + size;
        for key in self.mappings_in_range(addr, size) {
            let mut m = self.maps.remove(&key).unwrap();
            let m_end = m.end();
            if m.start < addr && m_end > end {
                // Straddles both ends: keep the head, trim to `addr` (the
                // interior subrange is gone; callers must not rely on
                // unmapping interior holes, see Design Notes).
                m.size = addr - m.start;
                self.maps.insert(m.start, m);
            } else if m.start < addr {
                m.size = addr - m.start;
                self.maps.insert(m.start, m);
            } else if m_end > end {
                let trimmed_off = (end - m.start) as u64;
                let new_start = end;
                m.offset += trimmed_off;
                m.size = m_end - end;
                m.start = new_start;
                self.maps.insert(new_start, m);
            } else if flags_is_shadow(&m) {
                demand_shadow_unregister(&m.object);
            }
        }
        Ok(())
    }

    /// Validate `new_flags` against `max_prot`; split the mapping at both
    /// endpoints of the target range if it only partially covers it.
    pub fn protect(&mut self, addr: VirtAddr, size: u32, new_flags: MapFlags) -> Result<(), KernelError> {
        let end = addr + size;
        let keys = self.mappings_in_range(addr, size);
        let mut inserts = alloc::vec::Vec::new();
        for key in keys {
            let mut m = self.maps.remove(&key).unwrap();
            if !new_flags.difference(m.max_prot).is_empty() {
                self.maps.insert(key, m);
                return Err(KernelError::AccessDenied);
            }
            let m_end = m.end();
            if m.start < addr {
                let head_size = addr - m.start;
                inserts.push(Mapping {
                    start: m.start,
                    size: head_size,
                    flags: m.flags,
                    max_prot: m.max_prot,
                    object: m.object.clone(),
                    offset: m.offset,
                    real_size: None,
                });
                m.offset += head_size as u64;
                m.size -= head_size;
                m.start = addr;
            }
            if m_end > end {
                let mid_size = m.end() - end;
                inserts.push(Mapping {
                    start: end,
                    size: mid_size,
                    flags: m.flags,
                    max_prot: m.max_prot,
                    object: m.object.clone(),
                    offset: m.offset + (end - m.start) as u64,
                    real_size: None,
                });
                m.size = end - m.start;
            }
            m.flags = new_flags | (m.flags & (MapFlags::SHARED | MapFlags::PRIVATE));
            inserts.push(m);
        }
        for m in inserts {
            self.maps.insert(m.start, m);
        }
        Ok(())
    }

    pub fn lookup(&self, addr: VirtAddr) -> Option<&Mapping> {
        self.maps.range(..=addr).next_back().map(|(_, m)| m).filter(|m| addr < m.end())
    }

    fn lookup_mut(&mut self, addr: VirtAddr) -> Option<&mut Mapping> {
        let key = self.maps.range(..=addr).next_back().map(|(&k, _)| k)?;
        let m = self.maps.get_mut(&key)?;
        if addr < m.end() {
            Some(m)
        } else {
            None
        }
    }

    /// Copy `src`'s mappings into `self` at fork time: shared mappings
    /// duplicate the entry and keep the object; private+writable mappings
    /// become demand-shadow-pending on both sides and lose the hardware
    /// write bit in `src`; read-only private mappings are copied as-is
    /// (§4.5).
    pub fn fork_from(&mut self, src: &mut AddressSpace) {
        let keys: alloc::vec::Vec<VirtAddr> = src.maps.keys().copied().collect();
        for key in keys {
            let m = src.maps.get_mut(&key).unwrap();
            if m.flags.contains(MapFlags::SHARED) {
                self.maps.insert(
                    key,
                    Mapping {
                        start: m.start,
                        size: m.size,
                        flags: m.flags,
                        max_prot: m.max_prot,
                        object: m.object.clone(),
                        offset: m.offset,
                        real_size: m.real_size,
                    },
                );
            } else if m.flags.contains(MapFlags::WRITE) {
                if !m.flags.contains(MapFlags::SHADOW_PENDING) {
                    m.flags.insert(MapFlags::SHADOW_PENDING);
                    demand_shadow_register(&m.object);
                    let end = m.start + m.size;
                    let mut va = m.start;
                    while va < end {
                        pagetable::clear_write_bit(va);
                        va += super::page::PAGE_SIZE as u32;
                    }
                }
                demand_shadow_register(&m.object);
                self.maps.insert(
                    key,
                    Mapping {
                        start: m.start,
                        size: m.size,
                        flags: m.flags,
                        max_prot: m.max_prot,
                        object: m.object.clone(),
                        offset: m.offset,
                        real_size: m.real_size,
                    },
                );
            } else {
                self.maps.insert(
                    key,
                    Mapping {
                        start: m.start,
                        size: m.size,
                        flags: m.flags,
                        max_prot: m.max_prot,
                        object: m.object.clone(),
                        offset: m.offset,
                        real_size: m.real_size,
                    },
                );
            }
        }
    }

    /// Resolve a fault: look up the mapping, validate protection, perform
    /// demand-shadowing if pending, dispatch to the object, then install
    /// the page in the MMU (§4.5).
    pub fn fault(&mut self, addr: VirtAddr, access: Access) -> Result<(), KernelError> {
        let page_addr = addr & !(super::page::PAGE_SIZE as u32 - 1);
        let off_in_map;
        let mut object;
        {
            let m = self.lookup(addr).ok_or(KernelError::AccessDenied)?;
            let required = if access.contains(Access::WRITE) {
                MapFlags::WRITE
            } else {
                MapFlags::READ
            };
            if !m.flags.contains(required) {
                return Err(KernelError::AccessDenied);
            }
            off_in_map = m.offset + (page_addr - m.start) as u64;
            object = m.object.clone();
        }

        if access.contains(Access::WRITE) {
            let pending = self.lookup(addr).map(|m| m.flags.contains(MapFlags::SHADOW_PENDING)).unwrap_or(false);
            if pending {
                let size = self.lookup(addr).unwrap().size;
                let new_object = demand_shadow(&object, size as u64);
                object = new_object.clone();
                if let Some(m) = self.lookup_mut(addr) {
                    m.object = new_object;
                    m.flags.remove(MapFlags::SHADOW_PENDING);
                }
            }
        }

        let mut map_flags = if access.contains(Access::WRITE) {
            Access::WRITE
        } else {
            Access::READ
        };
        object.fault(off_in_map, access, &mut map_flags)?;

        let mut pte_flags = PteFlags::PRESENT | PteFlags::USER;
        if map_flags.contains(Access::WRITE) {
            pte_flags |= PteFlags::WRITABLE;
        }
        // A shared read-only shadow fault leaves the resident frame in the
        // shadowed object rather than `object` itself; `page_addr` is used
        // as a stand-in physical address in that case since this core has
        // no direct physmap to resolve the real one through (see
        // DESIGN.md).
        let pa = object.resident_frame(off_in_map).unwrap_or(page_addr);
        pagetable::map_page(page_addr, pa, pte_flags)?;
        Ok(())
    }
}

fn flags_is_shadow(m: &Mapping) -> bool {
    m.flags.contains(MapFlags::SHADOW_PENDING)
}

/// Global table of address spaces keyed by an opaque process id, standing in
/// for each process's `proc->vas` pointer until component G (process model)
/// exists to own it directly.
static SPACES: Mutex<BTreeMap<u32, AddressSpace>> = Mutex::new(BTreeMap::new());

pub fn create(pid: u32, base: VirtAddr, limit: VirtAddr) {
    SPACES.lock().insert(pid, AddressSpace::new(base, limit));
}

pub fn destroy(pid: u32) {
    SPACES.lock().remove(&pid);
}

pub fn with_space<R>(pid: u32, f: impl FnOnce(&mut AddressSpace) -> R) -> Option<R> {
    SPACES.lock().get_mut(&pid).map(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anon(size: u64) -> Arc<VmObject> {
        VmObject::new_anonymous(size)
    }

    #[test]
    fn map_then_lookup() {
        let mut vas = AddressSpace::new(0x1000, 0x10000);
        let start = vas
            .map(None, 0x2000, anon(0x2000), 0, MapFlags::READ | MapFlags::WRITE, MapFlags::READ | MapFlags::WRITE)
            .unwrap();
        assert!(vas.lookup(start).is_some());
        assert!(vas.lookup(start + 0x2000).is_none());
    }

    #[test]
    fn unmap_trims_partial_overlap() {
        let mut vas = AddressSpace::new(0x1000, 0x10000);
        let start = vas.map(Some(0x2000), 0x3000, anon(0x3000), 0, MapFlags::READ, MapFlags::READ).unwrap();
        vas.unmap(start + 0x1000, 0x1000).unwrap();
        let m = vas.lookup(start).unwrap();
        assert_eq!(m.size, 0x1000);
    }

    #[test]
    fn protect_rejects_beyond_max_prot() {
        let mut vas = AddressSpace::new(0x1000, 0x10000);
        let start = vas.map(Some(0x2000), 0x1000, anon(0x1000), 0, MapFlags::READ, MapFlags::READ).unwrap();
        assert!(vas.protect(start, 0x1000, MapFlags::READ | MapFlags::WRITE).is_err());
    }

    #[test]
    fn fork_marks_private_writable_as_shadow_pending() {
        let mut parent = AddressSpace::new(0x1000, 0x10000);
        parent
            .map(Some(0x2000), 0x1000, anon(0x1000), 0, MapFlags::READ | MapFlags::WRITE | MapFlags::PRIVATE, MapFlags::READ | MapFlags::WRITE)
            .unwrap();
        let mut child = AddressSpace::new(0x1000, 0x10000);
        child.fork_from(&mut parent);
        assert!(parent.lookup(0x2000).unwrap().flags.contains(MapFlags::SHADOW_PENDING));
        assert!(child.lookup(0x2000).unwrap().flags.contains(MapFlags::SHADOW_PENDING));
    }
}
