//! Per-process file descriptor table (component J, §4.10): each descriptor
//! carries close-on-exec independently of the shared open-file it refers to.
//! `fork` duplicates the table with reference increments; `execve` closes
//! CLOEXEC entries. Grounded in the teacher's `vfs::file` open-file-table
//! shape, narrowed to what this core's syscall surface needs.

use super::vnode::Vnode;
use crate::error::KernelError;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

pub type Fd = i32;

/// The shared, ref-counted open-file state multiple descriptors (across
/// `dup`/`fork`) may point at.
pub struct OpenFile {
    pub vnode: Arc<Vnode>,
    pub offset: Mutex<u64>,
    pub append: bool,
}

impl OpenFile {
    pub fn new(vnode: Arc<Vnode>, append: bool) -> Arc<Self> {
        Arc::new(Self { vnode, offset: Mutex::new(0), append })
    }
}

struct Slot {
    file: Arc<OpenFile>,
    cloexec: bool,
}

pub struct FileTable {
    slots: Vec<Option<Slot>>,
}

const MAX_FDS: usize = 256;

impl FileTable {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn open(&mut self, file: Arc<OpenFile>, cloexec: bool) -> Result<Fd, KernelError> {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(Slot { file, cloexec });
                return Ok(i as Fd);
            }
        }
        if self.slots.len() >= MAX_FDS {
            return Err(KernelError::Busy);
        }
        self.slots.push(Some(Slot { file, cloexec }));
        Ok((self.slots.len() - 1) as Fd)
    }

    pub fn get(&self, fd: Fd) -> Option<Arc<OpenFile>> {
        self.slots.get(fd as usize)?.as_ref().map(|s| s.file.clone())
    }

    pub fn close(&mut self, fd: Fd) -> Result<(), KernelError> {
        let slot = self.slots.get_mut(fd as usize).ok_or(KernelError::InvalidArgument)?;
        if slot.take().is_none() {
            return Err(KernelError::InvalidArgument);
        }
        Ok(())
    }

    pub fn set_cloexec(&mut self, fd: Fd, cloexec: bool) -> Result<(), KernelError> {
        let slot = self.slots.get_mut(fd as usize).and_then(|s| s.as_mut()).ok_or(KernelError::InvalidArgument)?;
        slot.cloexec = cloexec;
        Ok(())
    }

    /// `fork`: every live descriptor is duplicated into the child with the
    /// same fd number, sharing the same `OpenFile` (ref-incremented via
    /// `Arc::clone`) and cloexec flag.
    pub fn fork(&self) -> Self {
        Self {
            slots: self
                .slots
                .iter()
                .map(|s| s.as_ref().map(|slot| Slot { file: slot.file.clone(), cloexec: slot.cloexec }))
                .collect(),
        }
    }

    /// `execve`: drop every descriptor marked close-on-exec.
    pub fn exec_close_cloexec(&mut self) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|s| s.cloexec) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::vnode::{DirEntry, VnodeMeta, VnodeOps, VnodeType};

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

    fn a_file() -> Arc<OpenFile> {
        OpenFile::new(Vnode::new(VnodeMeta::new(VnodeType::Regular, 0o644), Arc::new(NullOps)), false)
    }

    #[test]
    fn fork_shares_open_file_independent_of_cloexec() {
        let mut t = FileTable::new();
        let fd = t.open(a_file(), true).unwrap();
        let mut child = t.fork();
        assert!(child.get(fd).is_some());
        child.exec_close_cloexec();
        assert!(child.get(fd).is_none());
        // Parent's own table is untouched by the child's exec.
        assert!(t.get(fd).is_some());
    }

    #[test]
    fn close_frees_slot_for_reuse() {
        let mut t = FileTable::new();
        let fd = t.open(a_file(), false).unwrap();
        t.close(fd).unwrap();
        let fd2 = t.open(a_file(), false).unwrap();
        assert_eq!(fd, fd2);
    }
}
