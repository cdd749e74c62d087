//! `rename` across directories (component J, §4.10): lock both parent
//! directories in ascending inode-number order, and when the target is a
//! directory being moved across directories, walk its ancestor chain
//! (bounded) to reject moving a directory into its own descendant.

use super::mount::MountId;
use super::vnode::Vnode;
use crate::error::KernelError;
use alloc::sync::Arc;

const MAX_ANCESTOR_WALK: u32 = 64;

/// Walk `candidate`'s ancestors (via repeated `".."` lookups) looking for
/// `ancestor`. Bounded so a corrupt or cyclic directory tree can't hang the
/// walk — the spec only asks that this be "bounded", not infinite.
fn is_ancestor(ancestor: &Vnode, candidate: &Vnode) -> Result<bool, KernelError> {
    let mut cur_ino = candidate.ino();
    let ancestor_ino = ancestor.ino();
    if cur_ino == ancestor_ino {
        return Ok(true);
    }
    let mut cur = candidate.ops.lookup("..");
    for _ in 0..MAX_ANCESTOR_WALK {
        let Ok(parent) = cur else { return Ok(false) };
        let parent_ino = parent.ino();
        if parent_ino == ancestor_ino {
            return Ok(true);
        }
        if parent_ino == cur_ino {
            // Reached a filesystem root that loops `..` to itself.
            return Ok(false);
        }
        cur_ino = parent_ino;
        cur = parent.ops.lookup("..");
    }
    Ok(false)
}

pub fn rename(
    mount: MountId,
    old_dir: &Arc<Vnode>,
    old_name: &str,
    new_dir: &Arc<Vnode>,
    new_name: &str,
) -> Result<(), KernelError> {
    let (first, second) = if old_dir.ino() <= new_dir.ino() { (old_dir, new_dir) } else { (new_dir, old_dir) };
    let _first_lock = first.meta.write();
    let _second_lock = if Arc::ptr_eq(first, second) { None } else { Some(second.meta.write()) };

    if !Arc::ptr_eq(old_dir, new_dir) {
        let moving = old_dir.ops.lookup(old_name)?;
        if matches!(moving.meta.read().vtype, super::vnode::VnodeType::Directory) && is_ancestor(&moving, new_dir)? {
            return Err(KernelError::InvalidArgument);
        }
    }

    old_dir.ops.rename(old_name, new_dir, new_name)?;
    super::namei::cache_purge_dir(mount, old_dir.ino());
    if !Arc::ptr_eq(old_dir, new_dir) {
        super::namei::cache_purge_dir(mount, new_dir.ino());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::vnode::{DirEntry, VnodeMeta, VnodeOps, VnodeType};
    use alloc::collections::BTreeMap;
    use alloc::string::{String, ToString};
    use alloc::vec::Vec;
    use spin::Mutex as SpinMutex;

    struct DirOps {
        children: SpinMutex<BTreeMap<String, Arc<Vnode>>>,
        parent: SpinMutex<Option<Arc<Vnode>>>,
    }
    impl VnodeOps for DirOps {
        fn lookup(&self, name: &str) -> Result<Arc<Vnode>, KernelError> {
            if name == ".." {
                return self.parent.lock().clone().ok_or(KernelError::NotFound);
            }
            self.children.lock().get(name).cloned().ok_or(KernelError::NotFound)
        }
        fn create(&self, name: &str, vtype: VnodeType, mode: u32) -> Result<Arc<Vnode>, KernelError> {
            let v = Vnode::new(VnodeMeta::new(vtype, mode), Arc::new(DirOps { children: SpinMutex::new(BTreeMap::new()), parent: SpinMutex::new(None) }));
            self.children.lock().insert(name.to_string(), v.clone());
            Ok(v)
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
        fn rename(&self, old_name: &str, _new_dir: &Vnode, new_name: &str) -> Result<(), KernelError> {
            // Real cross-directory dirent transfer is a filesystem-specific
            // concern; this fixture only needs to exercise the ancestor
            // check above it, which rejects the move before this runs.
            let moved = self.children.lock().remove(old_name).ok_or(KernelError::NotFound)?;
            self.children.lock().insert(new_name.to_string(), moved);
            Ok(())
        }
    }

    fn dir_with_ops() -> (Arc<Vnode>, Arc<DirOps>) {
        let ops = Arc::new(DirOps { children: SpinMutex::new(BTreeMap::new()), parent: SpinMutex::new(None) });
        (Vnode::new(VnodeMeta::new(VnodeType::Directory, 0o755), ops.clone() as Arc<dyn VnodeOps>), ops)
    }

    fn create_dir_child(parent: &Arc<Vnode>, parent_ops: &Arc<DirOps>, name: &str) -> (Arc<Vnode>, Arc<DirOps>) {
        let (child, child_ops) = dir_with_ops();
        parent_ops.children.lock().insert(name.to_string(), child.clone());
        *child_ops.parent.lock() = Some(parent.clone());
        (child, child_ops)
    }

    #[test]
    fn rejects_moving_directory_into_its_own_descendant() {
        let (root, root_ops) = dir_with_ops();
        let (a, a_ops) = create_dir_child(&root, &root_ops, "a");
        let (b, _b_ops) = create_dir_child(&a, &a_ops, "b");
        // Moving `a` (child of root) into its own descendant `a/b` must be rejected.
        let err = rename(1, &root, "a", &b, "a").unwrap_err();
        assert_eq!(err, KernelError::InvalidArgument);
    }
}
