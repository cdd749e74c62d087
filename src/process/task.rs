//! Process and thread structures (components G/H), grounded in the
//! teacher's `process::task::{ProcessState, Credentials}` shapes, narrowed
//! to 32-bit fields and extended with the session/pgrp/single-thread-mode
//! bookkeeping §4.8 requires.

use super::pid::{Pid, Tid};
use super::sched::Priority;
use super::signal::{ProcessSignals, ThreadSignals};
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Zombie,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SingleThreadMode {
    None,
    /// Other threads park at the return-to-user boundary.
    Wait,
    /// Other threads are marked for termination.
    Kill,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub euid: u32,
    pub egid: u32,
}

pub struct Thread {
    pub tid: Tid,
    pub owner: Pid,
    pub priority: Priority,
    pub signals: ThreadSignals,
    pub parked: bool,
    pub marked_for_kill: bool,
}

impl Thread {
    pub fn new(tid: Tid, owner: Pid) -> Self {
        Self {
            tid,
            owner,
            priority: Priority::Normal,
            signals: ThreadSignals::new(),
            parked: false,
            marked_for_kill: false,
        }
    }
}

pub struct Process {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub pgrp: Pid,
    pub session: Pid,
    pub children: BTreeSet<Pid>,
    pub threads: Vec<Tid>,
    pub state: ProcessState,
    pub exit_status: Option<i32>,
    pub creds: Credentials,
    pub signals: ProcessSignals,
    pub single_thread: SingleThreadMode,
    pub auto_reap: bool,
    pub name: String,
}

impl Process {
    pub fn new(pid: Pid, parent: Option<Pid>, name: &str) -> Self {
        Self {
            pid,
            parent,
            pgrp: pid,
            session: pid,
            children: BTreeSet::new(),
            threads: Vec::new(),
            state: ProcessState::Running,
            exit_status: None,
            creds: Credentials::default(),
            signals: ProcessSignals::new(),
            single_thread: SingleThreadMode::None,
            auto_reap: false,
            name: String::from(name),
        }
    }

    pub fn is_session_leader(&self) -> bool {
        self.pid == self.session
    }

    pub fn is_zombie(&self) -> bool {
        self.state == ProcessState::Zombie
    }
}
