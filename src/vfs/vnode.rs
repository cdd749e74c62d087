//! Vnode: the reference-counted, dual-locked VFS node (component J), grounded
//! in the teacher's `vfs::inode::{Inode, InodeOps, InodeMeta}` shape and
//! extended with the metadata/object lock split and executable-mapping
//! write-block §4.10 requires.

use crate::error::KernelError;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use spin::RwLock;

pub type Ino = u64;

static NEXT_INO: AtomicU64 = AtomicU64::new(2); // 1 is reserved for a filesystem's root.

pub fn alloc_ino() -> Ino {
    NEXT_INO.fetch_add(1, Ordering::SeqCst)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeType {
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
    Symlink,
    Fifo,
}

#[derive(Debug, Clone)]
pub struct VnodeMeta {
    pub ino: Ino,
    pub vtype: VnodeType,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u32,
    pub size: u64,
    /// Count of open-for-write handles plus shared-writable mappings;
    /// nonzero blocks `PROT_EXEC` from being set, and a nonzero
    /// `exec_count` blocks this from going above zero (§4.10).
    pub write_count: u32,
    pub exec_count: u32,
}

impl VnodeMeta {
    pub fn new(vtype: VnodeType, mode: u32) -> Self {
        Self {
            ino: alloc_ino(),
            vtype,
            mode,
            uid: 0,
            gid: 0,
            nlink: if matches!(vtype, VnodeType::Directory) { 2 } else { 1 },
            size: 0,
            write_count: 0,
            exec_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: Ino,
    pub name: String,
    pub vtype: VnodeType,
}

/// Filesystem-specific operations a vnode dispatches to. `bmap`/`pagein`/
/// `pageout` are documented (§4.10) as running under the *object* lock, not
/// the metadata lock — callers in this core hold `Vnode::object_lock`
/// themselves before calling them, mirroring the VM object pager contract
/// ([`crate::mm::object::Pager`]).
pub trait VnodeOps: Send + Sync {
    fn lookup(&self, name: &str) -> Result<Arc<Vnode>, KernelError>;
    fn create(&self, name: &str, vtype: VnodeType, mode: u32) -> Result<Arc<Vnode>, KernelError>;
    fn readdir(&self) -> Result<Vec<DirEntry>, KernelError>;
    fn read(&self, off: u64, buf: &mut [u8]) -> Result<usize, KernelError>;
    fn write(&self, off: u64, buf: &[u8]) -> Result<usize, KernelError>;
    fn truncate(&self, size: u64) -> Result<(), KernelError> {
        let _ = size;
        Err(KernelError::Unsupported)
    }
    fn unlink(&self, name: &str) -> Result<(), KernelError> {
        let _ = name;
        Err(KernelError::Unsupported)
    }
    fn symlink_target(&self) -> Result<String, KernelError> {
        Err(KernelError::Unsupported)
    }
    /// Atomically move `old_name` out of `self` into `new_dir` under
    /// `new_name`. Called with both directories' metadata write-locks
    /// already held in ascending-inode-number order (§4.10); this trait
    /// method only performs the dirent mutation itself.
    fn rename(&self, old_name: &str, new_dir: &Vnode, new_name: &str) -> Result<(), KernelError> {
        let _ = (old_name, new_dir, new_name);
        Err(KernelError::Unsupported)
    }
}

/// A reference-counted VFS node with the metadata-lock/object-lock split
/// §4.10 requires: directory ops and attribute reads/writes go through
/// `meta`; `bmap`/pagein/pageout go through `object_lock` instead, so a
/// page fault against a mapped file doesn't contend with a concurrent
/// `stat()`.
pub struct Vnode {
    pub meta: RwLock<VnodeMeta>,
    /// Serializes page-in/page-out/bmap against each other, independent of
    /// `meta`'s read/write lock.
    pub object_lock: spin::Mutex<()>,
    pub ops: Arc<dyn VnodeOps>,
}

impl Vnode {
    pub fn new(meta: VnodeMeta, ops: Arc<dyn VnodeOps>) -> Arc<Self> {
        Arc::new(Self {
            meta: RwLock::new(meta),
            object_lock: spin::Mutex::new(()),
            ops,
        })
    }

    pub fn ino(&self) -> Ino {
        self.meta.read().ino
    }

    /// Set the executable flag under the metadata write-lock; rejected if
    /// the file currently has outstanding writers (§4.10).
    pub fn mark_executable(&self) -> Result<(), KernelError> {
        let mut meta = self.meta.write();
        if meta.write_count > 0 {
            return Err(KernelError::TextBusy);
        }
        meta.exec_count += 1;
        Ok(())
    }

    pub fn unmark_executable(&self) {
        let mut meta = self.meta.write();
        meta.exec_count = meta.exec_count.saturating_sub(1);
    }

    /// Open-for-write bookkeeping: rejected while the file is an active
    /// executable image (§4.10 `ETXTBSY`).
    pub fn begin_write(&self) -> Result<(), KernelError> {
        let mut meta = self.meta.write();
        if meta.exec_count > 0 {
            return Err(KernelError::TextBusy);
        }
        meta.write_count += 1;
        Ok(())
    }

    pub fn end_write(&self) {
        let mut meta = self.meta.write();
        meta.write_count = meta.write_count.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullOps;
    impl VnodeOps for NullOps {
        fn lookup(&self, _name: &str) -> Result<Arc<Vnode>, KernelError> {
            Err(KernelError::NotFound)
        }
        fn create(&self, _name: &str, _vtype: VnodeType, _mode: u32) -> Result<Arc<Vnode>, KernelError> {
            Err(KernelError::Unsupported)
        }
        fn readdir(&self) -> Result<Vec<DirEntry>, KernelError> {
            Ok(Vec::new())
        }
        fn read(&self, _off: u64, _buf: &mut [u8]) -> Result<usize, KernelError> {
            Ok(0)
        }
        fn write(&self, _off: u64, _buf: &[u8]) -> Result<usize, KernelError> {
            Ok(0)
        }
    }

    fn file_vnode() -> Arc<Vnode> {
        Vnode::new(VnodeMeta::new(VnodeType::Regular, 0o644), Arc::new(NullOps))
    }

    #[test]
    fn executable_flag_blocks_write() {
        let v = file_vnode();
        v.mark_executable().unwrap();
        assert!(v.begin_write().is_err());
        v.unmark_executable();
        v.begin_write().unwrap();
    }

    #[test]
    fn writer_blocks_exec_flag() {
        let v = file_vnode();
        v.begin_write().unwrap();
        assert!(v.mark_executable().is_err());
        v.end_write();
        v.mark_executable().unwrap();
    }
}
