//! Filesystem core: vnodes, path resolution, the mount tree, and per-process
//! file descriptor tables (component J).

pub mod file;
pub mod mount;
pub mod namei;
pub mod procfs;
pub mod rename;
pub mod vnode;
