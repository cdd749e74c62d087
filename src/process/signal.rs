//! POSIX-style signal delivery (component I), grounded in the teacher's
//! `process::signal` enum layout and `vm/signal.c`'s delivery/stop/continue
//! semantics (§4.9).

use crate::error::{Errno, KernelError};
use alloc::collections::BTreeMap;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Signal {
    Sighup = 1,
    Sigint = 2,
    Sigquit = 3,
    Sigill = 4,
    Sigtrap = 5,
    Sigabrt = 6,
    Sigbus = 7,
    Sigfpe = 8,
    Sigkill = 9,
    Sigusr1 = 10,
    Sigsegv = 11,
    Sigusr2 = 12,
    Sigpipe = 13,
    Sigalrm = 14,
    Sigterm = 15,
    Sigchld = 17,
    Sigcont = 18,
    Sigstop = 19,
    Sigtstp = 20,
    Sigttin = 21,
    Sigttou = 22,
}

impl Signal {
    /// SIGKILL, SIGSTOP, and SIGSEGV may never be blocked, ignored, or
    /// caught (§4.9).
    pub fn is_unblockable(self) -> bool {
        matches!(self, Signal::Sigkill | Signal::Sigstop | Signal::Sigsegv)
    }

    pub fn bit(self) -> u32 {
        1 << (self as u32)
    }

    pub fn default_action(self) -> Action {
        match self {
            Signal::Sigchld => Action::Ignore,
            Signal::Sigcont => Action::Continue,
            Signal::Sigstop | Signal::Sigtstp | Signal::Sigttin | Signal::Sigttou => Action::Stop,
            _ => Action::Terminate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Ignore,
    Terminate,
    Stop,
    Continue,
    Handler(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    Handler { addr: u32, mask: u32, flags: SaFlags, restorer: u32 },
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SaFlags: u32 {
        const NODEFER   = 1 << 0;
        const RESETHAND = 1 << 1;
        const ONSTACK   = 1 << 2;
        const RESTART   = 1 << 3;
    }
}

/// Process-wide signal state: the disposition table and the shared pending
/// set/count.
pub struct ProcessSignals {
    pub dispositions: BTreeMap<u32, Disposition>,
    pub pending: u32,
    pub stopped: bool,
    pub status_changed: bool,
}

impl ProcessSignals {
    pub fn new() -> Self {
        Self {
            dispositions: BTreeMap::new(),
            pending: 0,
            stopped: false,
            status_changed: false,
        }
    }

    pub fn disposition_of(&self, sig: Signal) -> Disposition {
        self.dispositions.get(&(sig as u32)).copied().unwrap_or(Disposition::Default)
    }

    pub fn set_disposition(&mut self, sig: Signal, disp: Disposition) -> Result<(), KernelError> {
        if sig.is_unblockable() && !matches!(disp, Disposition::Default) {
            return Err(KernelError::InvalidArgument);
        }
        self.dispositions.insert(sig as u32, disp);
        Ok(())
    }

    pub fn raise(&mut self, sig: Signal) {
        self.pending |= sig.bit();
    }
}

/// Per-thread signal state: its own pending set, blocking mask, alt-stack,
/// and nesting counter for handler re-entrancy.
pub struct ThreadSignals {
    pub pending: u32,
    pub mask: u32,
    pub alt_stack: Option<(u32, u32)>,
    pub on_alt_stack: bool,
    pub nesting: u32,
}

impl ThreadSignals {
    pub fn new() -> Self {
        Self {
            pending: 0,
            mask: 0,
            alt_stack: None,
            on_alt_stack: false,
            nesting: 0,
        }
    }

    pub fn raise(&mut self, sig: Signal) {
        self.pending |= sig.bit();
    }

    pub fn set_mask(&mut self, mask: u32) {
        // SIGKILL/SIGSTOP/SIGSEGV can never end up blocked regardless of request.
        self.mask = mask & !(Signal::Sigkill.bit() | Signal::Sigstop.bit() | Signal::Sigsegv.bit());
    }
}

/// A chosen signal's numeric id, recovered from a combined pending bitset
/// preferring SIGSEGV/SIGKILL first per §4.9.
fn pick_signal(pending: u32) -> Option<u32> {
    for preferred in [Signal::Sigkill as u32, Signal::Sigsegv as u32] {
        if pending & (1 << preferred) != 0 {
            return Some(preferred);
        }
    }
    if pending == 0 {
        return None;
    }
    Some(pending.trailing_zeros())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    None,
    Terminated(u32),
    Stopped,
    Continued,
    Ignored(u32),
    Handled { signo: u32, disposition_addr: u32 },
}

/// Run the delivery algorithm once (§4.9): compute the deliverable set,
/// pick a signal, apply its disposition.
pub fn deliver(proc_sig: &mut ProcessSignals, thread_sig: &mut ThreadSignals) -> DeliveryOutcome {
    let deliverable = (proc_sig.pending | thread_sig.pending) & !thread_sig.mask;
    let Some(signo) = pick_signal(deliverable) else {
        return DeliveryOutcome::None;
    };
    let sig = match signo {
        1 => Signal::Sighup,
        2 => Signal::Sigint,
        3 => Signal::Sigquit,
        4 => Signal::Sigill,
        5 => Signal::Sigtrap,
        6 => Signal::Sigabrt,
        7 => Signal::Sigbus,
        8 => Signal::Sigfpe,
        9 => Signal::Sigkill,
        10 => Signal::Sigusr1,
        11 => Signal::Sigsegv,
        12 => Signal::Sigusr2,
        13 => Signal::Sigpipe,
        14 => Signal::Sigalrm,
        15 => Signal::Sigterm,
        17 => Signal::Sigchld,
        18 => Signal::Sigcont,
        19 => Signal::Sigstop,
        20 => Signal::Sigtstp,
        21 => Signal::Sigttin,
        22 => Signal::Sigttou,
        _ => return DeliveryOutcome::None,
    };

    let clear_bit = !sig.bit();
    proc_sig.pending &= clear_bit;
    thread_sig.pending &= clear_bit;

    let disp = proc_sig.disposition_of(sig);
    match disp {
        Disposition::Ignore if !sig.is_unblockable() => DeliveryOutcome::Ignored(signo),
        Disposition::Default | Disposition::Ignore => match sig.default_action() {
            Action::Ignore => DeliveryOutcome::Ignored(signo),
            Action::Terminate => DeliveryOutcome::Terminated(signo),
            Action::Stop => {
                proc_sig.stopped = true;
                proc_sig.status_changed = true;
                DeliveryOutcome::Stopped
            }
            Action::Continue => {
                proc_sig.stopped = false;
                proc_sig.status_changed = true;
                DeliveryOutcome::Continued
            }
            Action::Handler(_) => DeliveryOutcome::Terminated(signo),
        },
        Disposition::Handler { addr, mask, flags, .. } => {
            if flags.contains(SaFlags::ONSTACK) && !thread_sig.on_alt_stack && thread_sig.alt_stack.is_some() {
                thread_sig.on_alt_stack = true;
            }
            if !flags.contains(SaFlags::NODEFER) {
                thread_sig.mask |= sig.bit();
            }
            thread_sig.mask |= mask;
            if flags.contains(SaFlags::RESETHAND) {
                proc_sig.dispositions.insert(signo, Disposition::Default);
            }
            thread_sig.nesting += 1;
            DeliveryOutcome::Handled { signo, disposition_addr: addr }
        }
    }
}

/// `sigreturn`: drop one nesting level, clear the alt-stack flag once
/// nesting returns to zero, convert a saved `ERESTART` outcome into a
/// concrete restart decision for the caller.
pub fn sigreturn(thread_sig: &mut ThreadSignals, restore_mask: u32, saved_errno: Option<Errno>) -> Option<Errno> {
    thread_sig.nesting = thread_sig.nesting.saturating_sub(1);
    if thread_sig.nesting == 0 {
        thread_sig.on_alt_stack = false;
    }
    thread_sig.set_mask(restore_mask);
    match saved_errno {
        Some(Errno::ERESTART) => Some(Errno::ERESTART),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigkill_cannot_be_ignored_or_handled() {
        let mut ps = ProcessSignals::new();
        assert!(ps.set_disposition(Signal::Sigkill, Disposition::Ignore).is_err());
    }

    #[test]
    fn blocked_signal_is_not_delivered() {
        let mut ps = ProcessSignals::new();
        let mut ts = ThreadSignals::new();
        ps.raise(Signal::Sigusr1);
        ts.set_mask(Signal::Sigusr1.bit());
        assert_eq!(deliver(&mut ps, &mut ts), DeliveryOutcome::None);
    }

    #[test]
    fn sigkill_delivered_even_if_blocked() {
        let mut ps = ProcessSignals::new();
        let mut ts = ThreadSignals::new();
        ps.raise(Signal::Sigkill);
        ts.mask = u32::MAX; // attempt to block everything
        assert_eq!(deliver(&mut ps, &mut ts), DeliveryOutcome::Terminated(Signal::Sigkill as u32));
    }

    #[test]
    fn sigsegv_cannot_be_ignored_blocked_or_masked_out() {
        let mut ps = ProcessSignals::new();
        let mut ts = ThreadSignals::new();

        assert!(ps.set_disposition(Signal::Sigsegv, Disposition::Ignore).is_err());

        ts.set_mask(u32::MAX);
        assert_eq!(ts.mask & Signal::Sigsegv.bit(), 0, "set_mask must strip SIGSEGV's bit");

        ps.raise(Signal::Sigsegv);
        assert_eq!(deliver(&mut ps, &mut ts), DeliveryOutcome::Terminated(Signal::Sigsegv as u32));
    }

    #[test]
    fn default_disposition_terminates() {
        let mut ps = ProcessSignals::new();
        let mut ts = ThreadSignals::new();
        ps.raise(Signal::Sigterm);
        assert_eq!(deliver(&mut ps, &mut ts), DeliveryOutcome::Terminated(Signal::Sigterm as u32));
    }

    #[test]
    fn sigstop_then_sigcont_toggles_process_state() {
        let mut ps = ProcessSignals::new();
        let mut ts = ThreadSignals::new();
        ps.raise(Signal::Sigstop);
        assert_eq!(deliver(&mut ps, &mut ts), DeliveryOutcome::Stopped);
        assert!(ps.stopped);
        ps.raise(Signal::Sigcont);
        assert_eq!(deliver(&mut ps, &mut ts), DeliveryOutcome::Continued);
        assert!(!ps.stopped);
    }

    #[test]
    fn handler_sets_nesting_and_defers_own_signal() {
        let mut ps = ProcessSignals::new();
        let mut ts = ThreadSignals::new();
        ps.set_disposition(Signal::Sigusr1, Disposition::Handler { addr: 0x1000, mask: 0, flags: SaFlags::empty(), restorer: 0 }).unwrap();
        ps.raise(Signal::Sigusr1);
        let outcome = deliver(&mut ps, &mut ts);
        assert_eq!(outcome, DeliveryOutcome::Handled { signo: Signal::Sigusr1 as u32, disposition_addr: 0x1000 });
        assert_eq!(ts.nesting, 1);
        assert_ne!(ts.mask & Signal::Sigusr1.bit(), 0, "NODEFER absent means own signal is blocked during handler");
    }
}
