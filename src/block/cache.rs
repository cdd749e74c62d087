//! Block cache (component K, §4.11): a per-provider LRU of buffers keyed by
//! physical-sector number, sized to the device's *physical* block size so a
//! misaligned write never becomes a hardware-level read-modify-write. A
//! reader takes a shared lock; a writer takes an exclusive lock, copies the
//! range in, and issues a write-through. Grounded in the teacher's absence
//! of a cache layer (the teacher goes straight to `BlockDeviceOps`) — this
//! is new work following the eviction-hook shape the page-out engine
//! ([`crate::mm::pageout`]) already establishes for "evict the LRU front
//! under pressure".

use super::provider::Provider;
use crate::error::KernelError;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::RwLock;

struct Buffer {
    data: Vec<u8>,
    dirty: bool,
}

struct CacheInner {
    physical_block_size: usize,
    buffers: BTreeMap<u64, Buffer>,
    lru: VecDeque<u64>,
    capacity: usize,
}

impl CacheInner {
    fn touch(&mut self, sector: u64) {
        self.lru.retain(|&s| s != sector);
        self.lru.push_back(sector);
    }

    fn evict_if_over_capacity(&mut self) {
        while self.buffers.len() > self.capacity {
            if let Some(victim) = self.lru.pop_front() {
                self.buffers.remove(&victim);
            } else {
                break;
            }
        }
    }
}

pub struct Cache {
    provider: Arc<Provider>,
    inner: RwLock<CacheInner>,
}

impl Cache {
    pub fn new(provider: Arc<Provider>, physical_block_size: usize, capacity: usize) -> Self {
        Self {
            provider,
            inner: RwLock::new(CacheInner {
                physical_block_size,
                buffers: BTreeMap::new(),
                lru: VecDeque::new(),
                capacity,
            }),
        }
    }

    fn load(&self, sector: u64) -> Result<(), KernelError> {
        let block_size = self.inner.read().physical_block_size;
        let mut data = vec![0u8; block_size];
        self.provider.ops.read_sectors(sector, &mut data)?;
        let mut inner = self.inner.write();
        inner.buffers.insert(sector, Buffer { data, dirty: false });
        inner.touch(sector);
        inner.evict_if_over_capacity();
        Ok(())
    }

    /// Shared-lock read: fills the buffer on a miss, then copies out.
    pub fn read(&self, sector: u64, out: &mut [u8]) -> Result<(), KernelError> {
        if !self.inner.read().buffers.contains_key(&sector) {
            self.load(sector)?;
        }
        let mut inner = self.inner.write();
        inner.touch(sector);
        let buf = inner.buffers.get(&sector).ok_or(KernelError::Io)?;
        let n = out.len().min(buf.data.len());
        out[..n].copy_from_slice(&buf.data[..n]);
        Ok(())
    }

    /// Exclusive-lock write: memcpy's `data` into the buffer (filling it
    /// from the device first on a miss, since a partial-block write must
    /// not clobber the untouched remainder) and issues a write-through.
    pub fn write(&self, sector: u64, data: &[u8]) -> Result<(), KernelError> {
        if !self.inner.read().buffers.contains_key(&sector) {
            self.load(sector)?;
        }
        let full_block = {
            let mut inner = self.inner.write();
            inner.touch(sector);
            let buf = inner.buffers.get_mut(&sector).ok_or(KernelError::Io)?;
            let n = data.len().min(buf.data.len());
            buf.data[..n].copy_from_slice(&data[..n]);
            buf.dirty = true;
            buf.data.clone()
        };
        self.provider.ops.write_sectors(sector, &full_block)?;
        self.inner.write().buffers.get_mut(&sector).map(|b| b.dirty = false);
        Ok(())
    }

    /// Evict the LRU-front buffer (only if it's not dirty, per "any idle
    /// buffers" in §4.11 — a dirty buffer must be written through before it
    /// can be considered idle). Called by the page-out engine's reclaim
    /// path under memory pressure.
    pub fn reclaim_one(&self) -> bool {
        let mut inner = self.inner.write();
        if let Some(&front) = inner.lru.front() {
            let idle = inner.buffers.get(&front).map(|b| !b.dirty).unwrap_or(true);
            if idle {
                inner.lru.pop_front();
                inner.buffers.remove(&front);
                return true;
            }
        }
        false
    }

    pub fn cached_sectors(&self) -> usize {
        self.inner.read().buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::provider::ProviderOps;
    use spin::Mutex;

    struct MemDisk {
        data: Mutex<Vec<u8>>,
    }
    impl ProviderOps for MemDisk {
        fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> Result<(), KernelError> {
            let d = self.data.lock();
            let off = sector as usize * buf.len();
            buf.copy_from_slice(&d[off..off + buf.len()]);
            Ok(())
        }
        fn write_sectors(&self, sector: u64, buf: &[u8]) -> Result<(), KernelError> {
            let mut d = self.data.lock();
            let off = sector as usize * buf.len();
            d[off..off + buf.len()].copy_from_slice(buf);
            Ok(())
        }
        fn flush(&self) -> Result<(), KernelError> {
            Ok(())
        }
    }

    fn disk() -> Arc<Provider> {
        Provider::new_root("disk0".into(), 512, 16, Arc::new(MemDisk { data: Mutex::new(vec![0u8; 16 * 512]) }))
    }

    #[test]
    fn write_then_read_back_round_trips() {
        let cache = Cache::new(disk(), 512, 4);
        let mut pattern = vec![0xABu8; 512];
        pattern[0] = 0x01;
        cache.write(3, &pattern).unwrap();
        let mut out = vec![0u8; 512];
        cache.read(3, &mut out).unwrap();
        assert_eq!(out, pattern);
    }

    #[test]
    fn capacity_eviction_drops_lru_front() {
        let cache = Cache::new(disk(), 512, 2);
        let buf = vec![0u8; 512];
        cache.read(0, &mut buf.clone()).unwrap();
        cache.read(1, &mut buf.clone()).unwrap();
        cache.read(2, &mut buf.clone()).unwrap();
        assert_eq!(cache.cached_sectors(), 2);
    }

    #[test]
    fn reclaim_skips_dirty_buffer() {
        let cache = Cache::new(disk(), 512, 4);
        let pattern = vec![0x42u8; 512];
        cache.write(0, &pattern).unwrap();
        // write() issues a write-through and clears dirty, so the buffer is
        // idle again and reclaim should succeed.
        assert!(cache.reclaim_one());
    }
}
