//! Mount tree (component J, §4.10): a mount binds `(filesystem, root-vnode)`
//! at a parent mount's inode number. Grounded in the teacher's
//! `vfs::mount::MountTable`, extended from a flat mount list into the
//! covered-vnode tree the spec's `..`/mountpoint-descent traversal rules
//! need.

use super::vnode::{Ino, Vnode};
use crate::error::KernelError;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::RwLock;

pub type MountId = u32;

pub struct Mount {
    pub id: MountId,
    pub fs_name: &'static str,
    pub root: Arc<Vnode>,
    /// The mount and covered vnode this mount is mounted over; `None` for
    /// the top-level root mount.
    pub covers: Option<(MountId, Arc<Vnode>)>,
}

struct Table {
    next_id: MountId,
    mounts: Vec<Mount>,
    /// (mount, covered ino) -> mount id of the filesystem mounted there.
    covering: Vec<((MountId, Ino), MountId)>,
}

impl Table {
    const fn new() -> Self {
        Self { next_id: 1, mounts: Vec::new(), covering: Vec::new() }
    }
}

static TABLE: RwLock<Table> = RwLock::new(Table::new());

pub fn mount_root(fs_name: &'static str, root: Arc<Vnode>) -> MountId {
    let mut t = TABLE.write();
    let id = t.next_id;
    t.next_id += 1;
    t.mounts.push(Mount { id, fs_name, root, covers: None });
    id
}

/// Mount a filesystem at `(parent_mount, dir_ino)`. The directory being
/// covered must exist in `parent_mount`, though this core doesn't itself
/// validate that it is empty (a filesystem policy this layer doesn't own).
pub fn mount_at(parent_mount: MountId, dir: Arc<Vnode>, fs_name: &'static str, root: Arc<Vnode>) -> Result<MountId, KernelError> {
    let mut t = TABLE.write();
    if !t.mounts.iter().any(|m| m.id == parent_mount) {
        return Err(KernelError::NotFound);
    }
    let id = t.next_id;
    t.next_id += 1;
    let dir_ino = dir.ino();
    t.mounts.push(Mount { id, fs_name, root, covers: Some((parent_mount, dir)) });
    t.covering.push(((parent_mount, dir_ino), id));
    Ok(id)
}

pub fn unmount(mount_id: MountId) -> Result<(), KernelError> {
    let mut t = TABLE.write();
    let idx = t.mounts.iter().position(|m| m.id == mount_id).ok_or(KernelError::NotFound)?;
    t.mounts.remove(idx);
    t.covering.retain(|&(_, child)| child != mount_id);
    Ok(())
}

pub fn root_of(mount_id: MountId) -> Option<Arc<Vnode>> {
    TABLE.read().mounts.iter().find(|m| m.id == mount_id).map(|m| m.root.clone())
}

/// If `(mount, ino)` is a covered mountpoint, return the mount descended
/// into (§4.10: "traversal into a directory that is a mountpoint descends
/// into the child mount").
pub fn descend(mount: MountId, ino: Ino) -> Option<MountId> {
    TABLE.read().covering.iter().find(|&&(k, _)| k == (mount, ino)).map(|&(_, child)| child)
}

/// If `mount` is itself a covering mount, return `(parent_mount,
/// covered_vnode)` — used when `..` is resolved at a mount's own root
/// (§4.10: "yields the parent mount's mountpoint").
pub fn ascend(mount: MountId) -> Option<(MountId, Arc<Vnode>)> {
    TABLE.read().mounts.iter().find(|m| m.id == mount).and_then(|m| m.covers.clone())
}

pub fn fs_name(mount: MountId) -> Option<&'static str> {
    TABLE.read().mounts.iter().find(|m| m.id == mount).map(|m| m.fs_name)
}

pub fn list() -> Vec<(MountId, &'static str)> {
    TABLE.read().mounts.iter().map(|m| (m.id, m.fs_name)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::vnode::{VnodeMeta, VnodeOps, VnodeType, DirEntry};

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

    fn dir_vnode() -> Arc<Vnode> {
        Vnode::new(VnodeMeta::new(VnodeType::Directory, 0o755), Arc::new(NullOps))
    }

    #[test]
    fn descend_then_ascend_round_trips() {
        let root_mount = mount_root("tmpfs", dir_vnode());
        let mnt = dir_vnode();
        let mnt_ino = mnt.ino();
        let child = mount_at(root_mount, mnt.clone(), "tmpfs", dir_vnode()).unwrap();

        assert_eq!(descend(root_mount, mnt_ino), Some(child));
        let (ascended_mount, ascended_vnode) = ascend(child).unwrap();
        assert_eq!(ascended_mount, root_mount);
        assert_eq!(ascended_vnode.ino(), mnt_ino);
        assert!(ascend(root_mount).is_none());

        unmount(child).unwrap();
        assert_eq!(descend(root_mount, mnt_ino), None);
    }
}
