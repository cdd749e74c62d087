//! Process/thread core: scheduling (G) and the process/session/pgrp/signal
//! model (H, I).

pub mod pid;
pub mod proc;
pub mod sched;
pub mod signal;
pub mod task;

use crate::error::KernelError;

/// Bring up the scheduler's per-CPU run queues and create the root process
/// (pid 1, its own session and group leader).
pub fn init(num_cpus: usize) -> Result<(), KernelError> {
    sched::init(num_cpus);
    proc::init_root(1, "init");
    sched::with_cpu(0, |cpu| {
        cpu.add_thread(sched::ThreadSched::new(1, sched::Priority::Normal));
        cpu.enqueue(1);
    });
    Ok(())
}
