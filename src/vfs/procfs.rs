//! `/proc`-shaped introspection surface (§10.3): a handful of read-only
//! text files exposing the counters this core actually maintains —
//! allocator, scheduler, and process-table statistics. Grounded in the
//! teacher's `vfs::procfs` module (`ProcfsRoot`/`CpuInfoFile`/`MemInfoFile`,
//! each a tiny [`VnodeOps`] impl that formats a `String` on `read` and
//! rejects everything else), scaled down to this core's own stats functions
//! instead of the teacher's CPU/telemetry/compliance surface.

use super::vnode::{DirEntry, Vnode, VnodeMeta, VnodeOps, VnodeType};
use crate::error::KernelError;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

fn copy_text(text: &str, off: u64, buf: &mut [u8]) -> Result<usize, KernelError> {
    let bytes = text.as_bytes();
    let off = off as usize;
    if off >= bytes.len() {
        return Ok(0);
    }
    let n = (bytes.len() - off).min(buf.len());
    buf[..n].copy_from_slice(&bytes[off..off + n]);
    Ok(n)
}

/// A file whose entire content is produced fresh on each `read`, by calling
/// `render` — no separate backing store, since the content is always a
/// snapshot of live kernel counters.
struct RenderedFile<F: Fn() -> String + Send + Sync> {
    render: F,
}

impl<F: Fn() -> String + Send + Sync> VnodeOps for RenderedFile<F> {
    fn lookup(&self, _name: &str) -> Result<Arc<Vnode>, KernelError> {
        Err(KernelError::Unsupported)
    }
    fn create(&self, _name: &str, _vtype: VnodeType, _mode: u32) -> Result<Arc<Vnode>, KernelError> {
        Err(KernelError::Unsupported)
    }
    fn readdir(&self) -> Result<Vec<DirEntry>, KernelError> {
        Err(KernelError::Unsupported)
    }
    fn read(&self, off: u64, buf: &mut [u8]) -> Result<usize, KernelError> {
        copy_text(&(self.render)(), off, buf)
    }
    fn write(&self, _off: u64, _buf: &[u8]) -> Result<usize, KernelError> {
        Err(KernelError::PermissionDenied)
    }
}

fn rendered_vnode<F: Fn() -> String + Send + Sync + 'static>(render: F) -> Arc<Vnode> {
    Vnode::new(VnodeMeta::new(VnodeType::Regular, 0o444), Arc::new(RenderedFile { render }))
}

fn meminfo_vnode() -> Arc<Vnode> {
    rendered_vnode(|| {
        let stats = crate::mm::buddy::stats();
        let page_kb = crate::mm::page::PAGE_SIZE / 1024;
        format!(
            "MemTotal: {} kB\nMemFree:  {} kB\n",
            stats.total_pages * page_kb,
            stats.free_pages * page_kb,
        )
    })
}

fn schedinfo_vnode() -> Arc<Vnode> {
    rendered_vnode(|| {
        let (threads, runnable) = crate::process::sched::global_stats();
        format!("threads: {}\nrunnable: {}\n", threads, runnable)
    })
}

fn processes_vnode() -> Arc<Vnode> {
    rendered_vnode(|| {
        let mut out = String::new();
        for (pid, name, state) in crate::process::proc::snapshot() {
            let state = match state {
                crate::process::task::ProcessState::Running => "R",
                crate::process::task::ProcessState::Zombie => "Z",
                crate::process::task::ProcessState::Stopped => "T",
            };
            out.push_str(&format!("{}\t{}\t{}\n", pid, state, name));
        }
        out
    })
}

fn heap_vnode() -> Arc<Vnode> {
    rendered_vnode(|| {
        let (allocs, failures) = crate::heap::stats();
        format!("allocations: {}\nfailures: {}\n", allocs, failures)
    })
}

fn slabs_vnode() -> Arc<Vnode> {
    rendered_vnode(|| {
        let mut out = String::new();
        for (name, obj_size, align) in crate::mm::slab::registry_snapshot() {
            out.push_str(&format!("{}\tobj_size={}\talign={}\n", name, obj_size, align));
        }
        out
    })
}

/// The `/proc` directory itself: a fixed, statically-known set of entries
/// (no dynamic per-pid subdirectories, unlike the teacher's `ProcPidDir` —
/// the `processes` file covers that in flattened form instead).
struct ProcfsRoot;

const ENTRIES: &[&str] = &["meminfo", "schedinfo", "processes", "heap", "slabs"];

impl VnodeOps for ProcfsRoot {
    fn lookup(&self, name: &str) -> Result<Arc<Vnode>, KernelError> {
        match name {
            "meminfo" => Ok(meminfo_vnode()),
            "schedinfo" => Ok(schedinfo_vnode()),
            "processes" => Ok(processes_vnode()),
            "heap" => Ok(heap_vnode()),
            "slabs" => Ok(slabs_vnode()),
            _ => Err(KernelError::NotFound),
        }
    }

    fn create(&self, _name: &str, _vtype: VnodeType, _mode: u32) -> Result<Arc<Vnode>, KernelError> {
        Err(KernelError::PermissionDenied)
    }

    fn readdir(&self) -> Result<Vec<DirEntry>, KernelError> {
        Ok(ENTRIES
            .iter()
            .map(|&name| DirEntry { ino: super::vnode::alloc_ino(), name: String::from(name), vtype: VnodeType::Regular })
            .collect())
    }

    fn read(&self, _off: u64, _buf: &mut [u8]) -> Result<usize, KernelError> {
        Err(KernelError::Unsupported)
    }

    fn write(&self, _off: u64, _buf: &[u8]) -> Result<usize, KernelError> {
        Err(KernelError::PermissionDenied)
    }
}

pub fn mount_procfs() -> Arc<Vnode> {
    Vnode::new(VnodeMeta::new(VnodeType::Directory, 0o555), Arc::new(ProcfsRoot))
}
