//! Path resolution (`namei`, component J, §4.10): accumulate path elements,
//! resolve `.`/`..` with mount-boundary awareness, dispatch lookups to the
//! parent vnode, follow symlinks bounded by `MAXSYMLINKS`, and honor
//! `LOCKPARENT`/`WANTPARENT`. Grounded in the teacher's flatter
//! `vfs::mod::resolve_path` walk, restructured into the state machine the
//! spec names plus the dirent lookup cache it requires.

use super::mount::{self, MountId};
use super::vnode::{Ino, Vnode};
use crate::error::KernelError;
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use spin::Mutex;

pub const MAXSYMLINKS: u32 = 8;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct NameiFlags: u32 {
        const NOFOLLOW   = 1 << 0;
        const LOCKPARENT = 1 << 1;
        const WANTPARENT = 1 << 2;
    }
}

/// `(mount, dir-ino, name)` -> child ino, consulted before dispatching to
/// the filesystem (§4.10 "lookup cache").
static DIRENT_CACHE: Mutex<BTreeMap<(MountId, Ino, String), Ino>> = Mutex::new(BTreeMap::new());

pub fn cache_insert(mount: MountId, dir_ino: Ino, name: &str, child_ino: Ino) {
    DIRENT_CACHE.lock().insert((mount, dir_ino, name.to_string()), child_ino);
}

pub fn cache_lookup(mount: MountId, dir_ino: Ino, name: &str) -> Option<Ino> {
    DIRENT_CACHE.lock().get(&(mount, dir_ino, name.to_string())).copied()
}

pub fn cache_purge_dir(mount: MountId, dir_ino: Ino) {
    DIRENT_CACHE.lock().retain(|(m, d, _), _| !(*m == mount && *d == dir_ino));
}

#[derive(Clone)]
pub struct Cursor {
    pub mount: MountId,
    pub vnode: Arc<Vnode>,
}

pub struct Resolved {
    pub target: Cursor,
    /// Present when `LOCKPARENT`/`WANTPARENT` was requested and the target
    /// has a parent directory within the same resolution (absent for `/`).
    pub parent: Option<Cursor>,
    pub last_name: String,
}

/// Resolve one path element's `..` against mount boundaries: if `cur` is a
/// mount's own root, `..` crosses into the covering mount at the covered
/// vnode (§4.10); otherwise it's an ordinary lookup on the filesystem.
fn resolve_dotdot(cur: &Cursor) -> Result<Cursor, KernelError> {
    if Arc::ptr_eq(&cur.vnode, &mount::root_of(cur.mount).ok_or(KernelError::NotFound)?) {
        if let Some((parent_mount, covered)) = mount::ascend(cur.mount) {
            return Ok(Cursor { mount: parent_mount, vnode: covered });
        }
        // Root of the root mount: `..` is a no-op.
        return Ok(cur.clone());
    }
    let parent = cur.vnode.ops.lookup("..")?;
    Ok(Cursor { mount: cur.mount, vnode: parent })
}

fn step_into(cur: &Cursor, name: &str) -> Result<Cursor, KernelError> {
    let dir_ino = cur.vnode.ino();
    let child_ino = cache_lookup(cur.mount, dir_ino, name);
    let child = if let Some(ino) = child_ino {
        // Cache only records the ino; a real filesystem would have its own
        // ino->vnode table to resurrect from. This core re-dispatches to
        // the filesystem, which is expected to consult its own cache —
        // the dirent cache's job here is to avoid a *directory scan*, not
        // to avoid the vnode lookup entirely.
        let _ = ino;
        cur.vnode.ops.lookup(name)?
    } else {
        let v = cur.vnode.ops.lookup(name)?;
        cache_insert(cur.mount, dir_ino, name, v.ino());
        v
    };

    if let Some(child_mount) = mount::descend(cur.mount, child.ino()) {
        let root = mount::root_of(child_mount).ok_or(KernelError::NotFound)?;
        return Ok(Cursor { mount: child_mount, vnode: root });
    }
    Ok(Cursor { mount: cur.mount, vnode: child })
}

/// Resolve `path` starting from `start`. Symlinks are followed unless
/// `NOFOLLOW` is set and the symlink is the final component; resolution
/// depth is capped by [`MAXSYMLINKS`].
pub fn namei(start: Cursor, path: &str, flags: NameiFlags) -> Result<Resolved, KernelError> {
    namei_bounded(start, path, flags, 0)
}

fn namei_bounded(start: Cursor, path: &str, flags: NameiFlags, depth: u32) -> Result<Resolved, KernelError> {
    if depth > MAXSYMLINKS {
        return Err(KernelError::SymlinkLoop);
    }

    let mut cur = start;
    let mut parent: Option<Cursor> = None;
    let elements: alloc::vec::Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if elements.is_empty() {
        return Ok(Resolved { target: cur, parent: None, last_name: String::new() });
    }

    for (i, name) in elements.iter().enumerate() {
        let is_last = i + 1 == elements.len();
        if *name == "." {
            continue;
        }
        if *name == ".." {
            parent = Some(cur.clone());
            cur = resolve_dotdot(&cur)?;
            continue;
        }

        if is_last && (flags.contains(NameiFlags::LOCKPARENT) || flags.contains(NameiFlags::WANTPARENT)) {
            parent = Some(cur.clone());
        }

        let next = step_into(&cur, name)?;
        let is_symlink = matches!(next.vnode.meta.read().vtype, super::vnode::VnodeType::Symlink);

        if is_symlink && !(is_last && flags.contains(NameiFlags::NOFOLLOW)) {
            let target = next.vnode.ops.symlink_target()?;
            let resolved = namei_bounded(cur.clone(), &target, flags, depth + 1)?;
            cur = resolved.target;
            if !is_last {
                parent = None;
            }
            continue;
        }

        if !is_last {
            parent = None;
        }
        cur = next;
    }

    Ok(Resolved {
        target: cur,
        parent,
        last_name: elements.last().map(|s| s.to_string()).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::vnode::{DirEntry, VnodeMeta, VnodeOps, VnodeType};
    use alloc::vec::Vec;
    use alloc::collections::BTreeMap as Map;

    struct DirOps {
        children: Mutex<Map<String, Arc<Vnode>>>,
        parent: Mutex<Option<Arc<Vnode>>>,
    }
    impl VnodeOps for DirOps {
        fn lookup(&self, name: &str) -> Result<Arc<Vnode>, KernelError> {
            if name == ".." {
                return self.parent.lock().clone().ok_or(KernelError::NotFound);
            }
            self.children.lock().get(name).cloned().ok_or(KernelError::NotFound)
        }
        fn create(&self, name: &str, vtype: VnodeType, mode: u32) -> Result<Arc<Vnode>, KernelError> {
            let v = Vnode::new(VnodeMeta::new(vtype, mode), Arc::new(DirOps { children: Mutex::new(Map::new()), parent: Mutex::new(None) }));
            self.children.lock().insert(name.to_string(), v.clone());
            Ok(v)
        }
        fn readdir(&self) -> Result<alloc::vec::Vec<DirEntry>, KernelError> {
            Ok(Vec::new())
        }
        fn read(&self, _off: u64, _buf: &mut [u8]) -> Result<usize, KernelError> {
            Ok(0)
        }
        fn write(&self, _off: u64, _buf: &[u8]) -> Result<usize, KernelError> {
            Ok(0)
        }
    }

    fn dir_with_ops() -> (Arc<Vnode>, Arc<DirOps>) {
        let ops = Arc::new(DirOps { children: Mutex::new(Map::new()), parent: Mutex::new(None) });
        (Vnode::new(VnodeMeta::new(VnodeType::Directory, 0o755), ops.clone() as Arc<dyn VnodeOps>), ops)
    }

    /// Create a directory child of `parent` and wire its fixture's `..`
    /// entry back to `parent` directly, the way `rename.rs`'s fixture does —
    /// the trait's `create` alone has no way to set a child's parent pointer.
    fn create_dir_child(parent: &Arc<Vnode>, parent_ops: &Arc<DirOps>, name: &str) -> (Arc<Vnode>, Arc<DirOps>) {
        let (child, child_ops) = dir_with_ops();
        parent_ops.children.lock().insert(name.to_string(), child.clone());
        *child_ops.parent.lock() = Some(parent.clone());
        (child, child_ops)
    }

    fn fresh_root() -> Cursor {
        let (root, root_ops) = dir_with_ops();
        let mount = mount::mount_root("testfs", root.clone());
        let (etc, etc_ops) = create_dir_child(&root, &root_ops, "etc");
        etc_ops.children.lock().insert("passwd".to_string(), Vnode::new(VnodeMeta::new(VnodeType::Regular, 0o644), Arc::new(DirOps { children: Mutex::new(Map::new()), parent: Mutex::new(Some(etc.clone())) })));
        Cursor { mount, vnode: root }
    }

    #[test]
    fn resolves_nested_path() {
        let root = fresh_root();
        let resolved = namei(root, "etc/passwd", NameiFlags::empty()).unwrap();
        assert_eq!(resolved.last_name, "passwd");
        assert_eq!(resolved.target.vnode.meta.read().vtype, VnodeType::Regular);
    }

    #[test]
    fn dotdot_returns_to_parent_directory() {
        let root = fresh_root();
        let resolved = namei(root.clone(), "etc/..", NameiFlags::empty()).unwrap();
        assert!(Arc::ptr_eq(&resolved.target.vnode, &root.vnode));
    }

    #[test]
    fn wantparent_returns_parent_cursor() {
        let root = fresh_root();
        let resolved = namei(root.clone(), "etc/passwd", NameiFlags::WANTPARENT).unwrap();
        let parent = resolved.parent.unwrap();
        assert_eq!(parent.vnode.ino(), root.vnode.ops.lookup("etc").unwrap().ino());
    }

    #[test]
    fn missing_component_is_not_found() {
        let root = fresh_root();
        assert!(matches!(namei(root, "nope", NameiFlags::empty()), Err(KernelError::NotFound)));
    }
}
