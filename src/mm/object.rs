//! VM object model and copy-on-write shadow chains (component D).
//!
//! An object is a reference-counted, offset-keyed container of pages. Three
//! variants exist: [`ObjectVariant::Anonymous`] (zero-fill on first touch),
//! [`ObjectVariant::VnodeBacked`] (pages paged in/out through a
//! [`Pager`](the filesystem collaborator, out of this module's scope except
//! for its trait contract)), and [`ObjectVariant::Shadow`] (copy-on-write
//! wrapper around another object). Grounded in `vm/object.c` and
//! `vm/shadow.c`; the shadow chain walk below is deliberately iterative,
//! mirroring `vm_shadow_chain_get`'s own comment that kernel stacks are too
//! small for recursion here.
//!
//! Page *content* in a real kernel lives in the frame the physical allocator
//! (component A) handed out, reached through the kernel's direct physical
//! map. That map is architecture glue this core doesn't own (§1), so each
//! resident [`PageSlot`] additionally carries a heap-backed content buffer
//! alongside its frame's PFN; the PFN keeps the frame's [`Page`] descriptor
//! (pin/dirty/owner bits) as the single source of truth, while the buffer is
//! what COW copies actually touch. This is the one place the object model
//! diverges from "real" memory layout for host-testability (see DESIGN.md).

use super::buddy;
use super::page::{PageOwner, PhysAddr, PAGE_SIZE};
use crate::error::KernelError;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use spin::Mutex;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u32 {
        const READ  = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// The filesystem-side collaborator a vnode-backed object pages through.
/// Implemented by the VFS core (component J); kept as a trait here so this
/// module has no upward dependency on it.
pub trait Pager: Send + Sync {
    fn pagein(&self, off: u64, buf: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError>;
    fn pageout(&self, off: u64, buf: &[u8; PAGE_SIZE]) -> Result<(), KernelError>;
}

/// Type-erased handle stored in a frame's [`PageOwner::Object`] back-pointer.
pub trait VmObjectOps: Send + Sync {
    fn size(&self) -> u64;
}

pub enum Residency {
    Found,
    NotResident,
    OutOfRange,
}

struct PageSlot {
    pfn: super::page::Pfn,
    data: Box<[u8; PAGE_SIZE]>,
    busy: bool,
}

struct ShadowLink {
    shadow: Arc<VmObject>,
    depth: usize,
    demand_shadow: u32,
    children: Vec<Weak<VmObject>>,
}

pub enum ObjectVariant {
    Anonymous,
    VnodeBacked { pager: Arc<dyn Pager> },
    Shadow,
}

struct Inner {
    pages: BTreeMap<u64, PageSlot>,
    size: u64,
    shadow: Option<ShadowLink>,
}

/// A VM object: anonymous memory, a paged-through vnode, or a COW shadow.
pub struct VmObject {
    variant: ObjectVariant,
    inner: Mutex<Inner>,
}

impl VmObjectOps for VmObject {
    fn size(&self) -> u64 {
        self.inner.lock().size
    }
}

fn zero_page() -> Box<[u8; PAGE_SIZE]> {
    Box::new([0u8; PAGE_SIZE])
}

fn alloc_frame() -> Result<(super::page::Pfn, PhysAddr), KernelError> {
    let pa = buddy::alloc_page().ok_or(KernelError::OutOfMemory)?;
    Ok((super::page::pa_to_pfn(pa), pa))
}

impl VmObject {
    pub fn new_anonymous(size: u64) -> Arc<Self> {
        Arc::new(Self {
            variant: ObjectVariant::Anonymous,
            inner: Mutex::new(Inner {
                pages: BTreeMap::new(),
                size,
                shadow: None,
            }),
        })
    }

    pub fn new_vnode_backed(size: u64, pager: Arc<dyn Pager>) -> Arc<Self> {
        Arc::new(Self {
            variant: ObjectVariant::VnodeBacked { pager },
            inner: Mutex::new(Inner {
                pages: BTreeMap::new(),
                size,
                shadow: None,
            }),
        })
    }

    fn new_shadow(shadowed: &Arc<VmObject>, size: u64, depth: usize) -> Arc<Self> {
        Arc::new(Self {
            variant: ObjectVariant::Shadow,
            inner: Mutex::new(Inner {
                pages: BTreeMap::new(),
                size,
                shadow: Some(ShadowLink {
                    shadow: shadowed.clone(),
                    depth,
                    demand_shadow: 0,
                    children: Vec::new(),
                }),
            }),
        })
    }

    pub fn is_shadow(&self) -> bool {
        matches!(self.variant, ObjectVariant::Shadow)
    }

    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Insert a fresh pinned, busy, zero-filled page at `off` (§4.4).
    pub fn page_alloc(self: &Arc<Self>, off: u64) -> Result<(), KernelError> {
        let (pfn, pa) = alloc_frame()?;
        let weak_self: Weak<VmObject> = Arc::downgrade(self);
        let this: Weak<dyn VmObjectOps> = weak_self;
        buddy::with_page_mut(pa, |page| {
            page.owner = PageOwner::Object { object: this, offset: off };
            page.pin();
            page.busy = true;
        });
        let mut inner = self.inner.lock();
        inner.pages.insert(
            off,
            PageSlot {
                pfn,
                data: zero_page(),
                busy: true,
            },
        );
        Ok(())
    }

    /// Detach the page at `off` from this object without freeing the frame.
    pub fn page_remove(&self, off: u64) -> Option<()> {
        self.inner.lock().pages.remove(&off).map(|_| ())
    }

    /// Return the resident page at `off`, pinned, or indicate why there
    /// isn't one. Busy-waiting here is a tight retry rather than a real
    /// parked wait queue since this core has no thread-blocking primitive
    /// of its own (component G owns that); callers above this layer decide
    /// whether to yield between retries.
    pub fn page_resident(&self, off: u64) -> Residency {
        let mut inner = self.inner.lock();
        if off >= inner.size {
            return Residency::OutOfRange;
        }
        match inner.pages.get_mut(&off) {
            Some(slot) => {
                slot.busy = false;
                Residency::Found
            }
            None => Residency::NotResident,
        }
    }

    fn read_slot(&self, off: u64) -> Option<Box<[u8; PAGE_SIZE]>> {
        self.inner.lock().pages.get(&off).map(|slot| slot.data.clone())
    }

    /// The physical frame currently resident at `off`, if any — what a
    /// caller above this layer (the VAS fault handler) installs into the
    /// MMU after `fault` returns its content.
    pub fn resident_frame(&self, off: u64) -> Option<PhysAddr> {
        self.inner.lock().pages.get(&off).map(|slot| super::page::pfn_to_pa(slot.pfn))
    }

    /// Shrink/grow the object. Shrinking frees pages beyond the new size and
    /// zero-fills the tail of the new last page (§4.4); growing just raises
    /// the bound, consistent with anonymous/vnode objects being sparse.
    pub fn resize(&self, new_size: u64) {
        let mut inner = self.inner.lock();
        let old = inner.size;
        inner.size = new_size;
        if new_size >= old {
            return;
        }
        let cutoff = new_size & !((PAGE_SIZE as u64) - 1);
        let stale: Vec<u64> = inner
            .pages
            .range(cutoff..)
            .map(|(&off, _)| off)
            .filter(|&off| off != cutoff)
            .collect();
        for off in stale {
            if let Some(slot) = inner.pages.remove(&off) {
                buddy::free_page(super::page::pfn_to_pa(slot.pfn));
            }
        }
        if let Some(slot) = inner.pages.get_mut(&cutoff) {
            let tail_start = (new_size - cutoff) as usize;
            slot.data[tail_start..].fill(0);
        }
    }

    /// Dispatch a fault per §4.4: anonymous objects zero-fill, shadow
    /// objects walk their chain and copy-on-write, vnode objects page in
    /// through their pager via `page_resident`.
    pub fn fault(
        self: &Arc<Self>,
        off: u64,
        access: Access,
        map_flags: &mut Access,
    ) -> Result<Box<[u8; PAGE_SIZE]>, KernelError> {
        match &self.variant {
            ObjectVariant::Anonymous => {
                if !matches!(self.page_resident(off), Residency::Found) {
                    self.page_alloc(off)?;
                }
                Ok(self.read_slot(off).unwrap_or_else(zero_page))
            }
            ObjectVariant::VnodeBacked { pager } => {
                if matches!(self.page_resident(off), Residency::NotResident) {
                    let mut buf = [0u8; PAGE_SIZE];
                    pager.pagein(off, &mut buf)?;
                    self.page_alloc(off)?;
                    self.inner.lock().pages.get_mut(&off).unwrap().data = Box::new(buf);
                }
                Ok(self.read_slot(off).unwrap_or_else(zero_page))
            }
            ObjectVariant::Shadow => shadow_fault(self, off, access, map_flags),
        }
    }
}

/// Walk `shadow -> shadow -> ... -> root`, iteratively, until a resident
/// page is found; fault the root itself if none was. Mirrors
/// `vm_shadow_chain_get`'s explicit anti-recursion comment.
fn shadow_chain_get(object: &Arc<VmObject>, off: u64) -> Result<(Arc<VmObject>, Box<[u8; PAGE_SIZE]>), KernelError> {
    let mut cur = {
        let inner = object.inner.lock();
        inner.shadow.as_ref().unwrap().shadow.clone()
    };
    loop {
        if !cur.is_shadow() {
            let mut flags = Access::READ;
            let data = cur.fault(off, Access::READ, &mut flags)?;
            return Ok((cur, data));
        }
        if let Some(data) = cur.read_slot(off) {
            return Ok((cur.clone(), data));
        }
        let next = {
            let inner = cur.inner.lock();
            inner.shadow.as_ref().unwrap().shadow.clone()
        };
        cur = next;
    }
}

fn shadow_fault(
    object: &Arc<VmObject>,
    off: u64,
    access: Access,
    map_flags: &mut Access,
) -> Result<Box<[u8; PAGE_SIZE]>, KernelError> {
    let (src_object, src_data) = shadow_chain_get(object, off)?;

    let size_to_copy = if src_object.is_shadow() {
        PAGE_SIZE as u64
    } else {
        (object.size() - off).min(PAGE_SIZE as u64)
    };

    if access.contains(Access::WRITE) || size_to_copy != PAGE_SIZE as u64 {
        object.page_alloc(off)?;
        let mut inner = object.inner.lock();
        let slot = inner.pages.get_mut(&off).unwrap();
        let n = size_to_copy as usize;
        slot.data[..n].copy_from_slice(&src_data[..n]);
        slot.data[n..].fill(0);
        let data = slot.data.clone();
        drop(inner);
        Ok(data)
    } else {
        map_flags.remove(Access::WRITE);
        Ok(src_data)
    }
}

/// Move every page of `src` at offset >= `min_off` into `dst`; a page `dst`
/// already has at that offset is dropped instead. Locking order is `dst`
/// then `src` because `dst` is always deeper in the chain (§4.4).
pub fn pages_migrate(dst: &Arc<VmObject>, src: &Arc<VmObject>, min_off: u64) {
    let mut dst_inner = dst.inner.lock();
    let mut src_inner = src.inner.lock();
    let to_move: Vec<u64> = src_inner
        .pages
        .range(min_off..)
        .map(|(&off, _)| off)
        .collect();
    for off in to_move {
        if dst_inner.pages.contains_key(&off) {
            if let Some(slot) = src_inner.pages.remove(&off) {
                buddy::free_page(super::page::pfn_to_pa(slot.pfn));
            }
        } else if let Some(slot) = src_inner.pages.remove(&off) {
            dst_inner.pages.insert(off, slot);
        }
    }
}

/// Allocate (or reuse) a shadow of `shadowed`, per the demand-shadow rule in
/// §4.4: a shadow whose only remaining reason to exist was this caller's
/// pending demand is handed back directly instead of nesting another layer.
pub fn demand_shadow(shadowed: &Arc<VmObject>, size: u64) -> Arc<VmObject> {
    if shadowed.is_shadow() {
        let mut inner = shadowed.inner.lock();
        let link = inner.shadow.as_mut().unwrap();
        if link.demand_shadow >= 1 && !shadow_needed(link) {
            link.demand_shadow -= 1;
            return shadowed.clone();
        }
    }

    let depth = if shadowed.is_shadow() {
        shadowed.inner.lock().shadow.as_ref().unwrap().depth + 1
    } else {
        1
    };
    let new_obj = VmObject::new_shadow(shadowed, size, depth);

    if shadowed.is_shadow() {
        let mut inner = shadowed.inner.lock();
        let link = inner.shadow.as_mut().unwrap();
        link.demand_shadow = link.demand_shadow.saturating_sub(1);
        link.children.push(Arc::downgrade(&new_obj));
    }
    new_obj
}

fn shadow_needed(link: &ShadowLink) -> bool {
    link.demand_shadow != 1 || !link.children.is_empty()
}

pub fn demand_shadow_register(object: &Arc<VmObject>) {
    if let Some(link) = object.inner.lock().shadow.as_mut() {
        link.demand_shadow += 1;
    }
}

/// Unregister a pending demand-shadow and, if that was the last reason the
/// object needs to exist on its own, simplify the chain.
pub fn demand_shadow_unregister(object: &Arc<VmObject>) {
    let should_simplify = {
        let mut inner = object.inner.lock();
        if let Some(link) = inner.shadow.as_mut() {
            link.demand_shadow = link.demand_shadow.saturating_sub(1);
            true
        } else {
            false
        }
    };
    if should_simplify {
        simplify(object);
    }
}

fn can_simplify(link: &ShadowLink) -> bool {
    link.children.len() == 1 && link.demand_shadow == 0
}

/// Collapse `object` into its single surviving child: migrate pages down,
/// rewire the child's shadow pointer to the grandparent, drop `object`.
/// Iterative by construction (no destructor recursion), matching the
/// REDESIGN FLAGS guidance to avoid deep recursion in the collapse path.
fn simplify(object: &Arc<VmObject>) {
    let child = {
        let inner = object.inner.lock();
        let link = match &inner.shadow {
            Some(l) if can_simplify(l) => l,
            _ => return,
        };
        match link.children.first().and_then(Weak::upgrade) {
            Some(c) => c,
            None => return,
        }
    };

    // Lock order: child before parent, per the shadow-chain convention.
    let mut child_inner = child.inner.lock();
    let mut object_inner = object.inner.lock();
    let link = match &object_inner.shadow {
        Some(l) if can_simplify(l) => l,
        _ => return,
    };
    if !link.children.first().and_then(Weak::upgrade).map(|c| Arc::ptr_eq(&c, &child)).unwrap_or(false) {
        return;
    }

    let grandparent = link.shadow.clone();
    drop(object_inner);
    drop(child_inner);
    pages_migrate(&child, object, 0);

    let mut child_inner = child.inner.lock();
    if let Some(child_link) = child_inner.shadow.as_mut() {
        child_link.shadow = grandparent;
        child_link.depth = child_link.depth.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_buddy() {
        let _ = buddy::init_buddy(&[(0x10_0000, 256 * PAGE_SIZE)]);
    }

    #[test]
    fn anonymous_fault_zero_fills() {
        setup_buddy();
        let obj = VmObject::new_anonymous(PAGE_SIZE as u64 * 4);
        let mut flags = Access::READ;
        let page = obj.fault(0, Access::READ, &mut flags).unwrap();
        assert!(page.iter().all(|&b| b == 0));
    }

    #[test]
    fn shadow_fault_shares_read_only() {
        setup_buddy();
        let root = VmObject::new_anonymous(PAGE_SIZE as u64);
        {
            let mut flags = Access::WRITE;
            root.fault(0, Access::WRITE, &mut flags).unwrap();
            root.inner.lock().pages.get_mut(&0).unwrap().data[0] = 0xAB;
        }
        let shadow = demand_shadow(&root, PAGE_SIZE as u64);
        let mut map_flags = Access::READ;
        let page = shadow.fault(0, Access::READ, &mut map_flags).unwrap();
        assert_eq!(page[0], 0xAB);
        assert!(!map_flags.contains(Access::WRITE));
    }

    #[test]
    fn shadow_fault_copies_on_write() {
        setup_buddy();
        let root = VmObject::new_anonymous(PAGE_SIZE as u64);
        {
            let mut flags = Access::WRITE;
            root.fault(0, Access::WRITE, &mut flags).unwrap();
            root.inner.lock().pages.get_mut(&0).unwrap().data[0] = 0x11;
        }
        let shadow = demand_shadow(&root, PAGE_SIZE as u64);
        let mut map_flags = Access::WRITE;
        let page = shadow.fault(0, Access::WRITE, &mut map_flags).unwrap();
        assert_eq!(page[0], 0x11);
        // The shadow must now hold its own copy, not the root's page.
        assert!(shadow.inner.lock().pages.contains_key(&0));
    }

    #[test]
    fn demand_shadow_reuses_when_uniquely_owned() {
        setup_buddy();
        let root = VmObject::new_anonymous(PAGE_SIZE as u64);
        let shadow1 = demand_shadow(&root, PAGE_SIZE as u64);
        demand_shadow_register(&shadow1);
        let shadow2 = demand_shadow(&shadow1, PAGE_SIZE as u64);
        assert!(Arc::ptr_eq(&shadow1, &shadow2));
    }

    #[test]
    fn resize_shrink_frees_tail_pages() {
        setup_buddy();
        let obj = VmObject::new_anonymous(PAGE_SIZE as u64 * 2);
        obj.page_alloc(0).unwrap();
        obj.page_alloc(PAGE_SIZE as u64).unwrap();
        obj.resize(PAGE_SIZE as u64 / 2);
        assert!(obj.inner.lock().pages.get(&(PAGE_SIZE as u64)).is_none());
        // the remaining first page's tail half must be zeroed
        let slot_ok = obj.inner.lock().pages.contains_key(&0);
        assert!(slot_ok);
    }
}
