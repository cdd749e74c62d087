//! Provider/consumer object graph (component K, §4.11): block devices and
//! the layers stacked on them (partitions, a future volume manager) are
//! linked bidirectionally, with a depth counter capped at 4 so the graph
//! can't grow into a pathological stack. Grounded in the teacher's
//! `block::BlockDevice`, extended with the provider-graph and removal
//! lifecycle the spec names that the teacher's flatter device list doesn't
//! have.

use crate::error::KernelError;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use spin::Mutex;

pub const MAX_DEPTH: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Active,
    /// Marked for removal: no new consumers may attach; existing ops drain
    /// before the provider is actually destroyed.
    Removing,
}

pub trait ProviderOps: Send + Sync {
    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<(), KernelError>;
    fn write_sectors(&self, sector: u64, buf: &[u8]) -> Result<(), KernelError>;
    fn flush(&self) -> Result<(), KernelError>;
}

pub struct Provider {
    pub name: String,
    pub sector_size: usize,
    pub capacity_sectors: u64,
    pub depth: u32,
    pub ops: Arc<dyn ProviderOps>,
    state: Mutex<ProviderState>,
    consumers: Mutex<Vec<Weak<Provider>>>,
    inflight_ops: Mutex<u32>,
}

impl Provider {
    pub fn new_root(name: String, sector_size: usize, capacity_sectors: u64, ops: Arc<dyn ProviderOps>) -> Arc<Self> {
        Arc::new(Self {
            name,
            sector_size,
            capacity_sectors,
            depth: 0,
            ops,
            state: Mutex::new(ProviderState::Active),
            consumers: Mutex::new(Vec::new()),
            inflight_ops: Mutex::new(0),
        })
    }

    /// Link a new consumer on top of `self`, rejected past [`MAX_DEPTH`] or
    /// once `self` has begun removal.
    pub fn attach_consumer(self: &Arc<Self>, name: String, sector_size: usize, capacity_sectors: u64, ops: Arc<dyn ProviderOps>) -> Result<Arc<Provider>, KernelError> {
        if *self.state.lock() == ProviderState::Removing {
            return Err(KernelError::Busy);
        }
        if self.depth + 1 > MAX_DEPTH {
            return Err(KernelError::InvalidArgument);
        }
        let child = Arc::new(Provider {
            name,
            sector_size,
            capacity_sectors,
            depth: self.depth + 1,
            ops,
            state: Mutex::new(ProviderState::Active),
            consumers: Mutex::new(Vec::new()),
            inflight_ops: Mutex::new(0),
        });
        self.consumers.lock().push(Arc::downgrade(&child));
        Ok(child)
    }

    pub fn begin_op(&self) -> Result<(), KernelError> {
        if *self.state.lock() == ProviderState::Removing {
            return Err(KernelError::Busy);
        }
        *self.inflight_ops.lock() += 1;
        Ok(())
    }

    pub fn end_op(&self) {
        let mut n = self.inflight_ops.lock();
        *n = n.saturating_sub(1);
    }

    /// §4.11: "a provider in use cannot be removed; removal marks
    /// `Removing`, drops the devfs entry, waits for all current ops, then
    /// destroys." The devfs-entry removal and the actual drop are the
    /// caller's job once this returns `Ok`; this only gates on inflight ops.
    pub fn begin_remove(&self) -> Result<(), KernelError> {
        if !self.consumers.lock().iter().any(|w| w.strong_count() > 0) {
            *self.state.lock() = ProviderState::Removing;
            return Ok(());
        }
        Err(KernelError::Busy)
    }

    pub fn removal_complete(&self) -> bool {
        *self.state.lock() == ProviderState::Removing && *self.inflight_ops.lock() == 0
    }

    pub fn state(&self) -> ProviderState {
        *self.state.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullOps;
    impl ProviderOps for NullOps {
        fn read_sectors(&self, _sector: u64, _buf: &mut [u8]) -> Result<(), KernelError> {
            Ok(())
        }
        fn write_sectors(&self, _sector: u64, _buf: &[u8]) -> Result<(), KernelError> {
            Ok(())
        }
        fn flush(&self) -> Result<(), KernelError> {
            Ok(())
        }
    }

    #[test]
    fn depth_capped_at_four() {
        let mut p = Provider::new_root("disk0".into(), 512, 1024, Arc::new(NullOps));
        for i in 0..MAX_DEPTH {
            p = p.attach_consumer(alloc::format!("layer{i}"), 512, 1024, Arc::new(NullOps)).unwrap();
        }
        assert!(p.attach_consumer("toodeep".into(), 512, 1024, Arc::new(NullOps)).is_err());
    }

    #[test]
    fn provider_with_consumers_cannot_be_removed() {
        let p = Provider::new_root("disk0".into(), 512, 1024, Arc::new(NullOps));
        let _child = p.attach_consumer("part1".into(), 512, 512, Arc::new(NullOps)).unwrap();
        assert!(p.begin_remove().is_err());
    }

    #[test]
    fn removal_waits_for_inflight_ops() {
        let p = Provider::new_root("disk0".into(), 512, 1024, Arc::new(NullOps));
        p.begin_op().unwrap();
        p.begin_remove().unwrap();
        assert!(!p.removal_complete());
        p.end_op();
        assert!(p.removal_complete());
    }

    #[test]
    fn in_removal_provider_rejects_new_ops() {
        let p = Provider::new_root("disk0".into(), 512, 1024, Arc::new(NullOps));
        p.begin_remove().unwrap();
        assert!(p.begin_op().is_err());
    }
}
