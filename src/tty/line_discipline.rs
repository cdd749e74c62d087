//! TTY line discipline (component L, §4.12): output post-processing
//! (`ONLCR`/`OCRNL`/`ONOCR`/`ONLRET` with column tracking, tabs aligned to
//! 8), canonical-mode input accumulation, and the control characters that
//! raise signals to the foreground process group. Grounded directly in
//! `kern/tty.c`'s `tty_output`/`tty_input_c`/the `VINTR`/`VQUIT`/`VSUSP`
//! branch of its input handler — the teacher kernel doesn't have a TTY
//! layer, so this module's shape follows the original instead, rewritten
//! as safe Rust state machines instead of C flag-bit macros.

use crate::process::pid::Pid;
use alloc::collections::VecDeque;

const TAB_SIZE: usize = 8;
const CANON_BUFSIZE: usize = 256;
const INPUT_RING_CAPACITY: usize = 4096;

bitflags::bitflags! {
    pub struct OutputFlags: u32 {
        const OPOST  = 1 << 0;
        const ONLCR  = 1 << 1;
        const OCRNL  = 1 << 2;
        const ONOCR  = 1 << 3;
        const ONLRET = 1 << 4;
    }
}

bitflags::bitflags! {
    pub struct LocalFlags: u32 {
        const ICANON = 1 << 0;
        const ECHO   = 1 << 1;
        const ECHOE  = 1 << 2;
        const ECHONL = 1 << 3;
        const ISIG   = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ControlChars {
    pub vintr: u8,
    pub vquit: u8,
    pub vsusp: u8,
    pub veol: u8,
}

impl Default for ControlChars {
    fn default() -> Self {
        Self { vintr: 3, vquit: 28, vsusp: 26, veol: b'\n' }
    }
}

pub struct Termios {
    pub oflag: OutputFlags,
    pub lflag: LocalFlags,
    pub cc: ControlChars,
}

impl Default for Termios {
    fn default() -> Self {
        Self {
            oflag: OutputFlags::OPOST | OutputFlags::ONLCR | OutputFlags::ONLRET,
            lflag: LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ECHOE | LocalFlags::ISIG,
            cc: ControlChars::default(),
        }
    }
}

/// A signal the line discipline wants delivered to the foreground process
/// group, surfaced to the caller rather than reaching into the process
/// subsystem directly — keeps this module's tests free of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaisedSignal {
    Intr,
    Quit,
    Susp,
    Ttou,
    Ttin,
}

pub struct Tty {
    pub termios: Termios,
    pub fg_pgrp: Option<Pid>,
    column: usize,
    out_buf: VecDeque<u8>,
    canon_buf: [u8; CANON_BUFSIZE],
    canon_len: usize,
    input_ring: VecDeque<u8>,
}

impl Tty {
    pub fn new() -> Self {
        Self {
            termios: Termios::default(),
            fg_pgrp: None,
            column: 0,
            out_buf: VecDeque::new(),
            canon_buf: [0; CANON_BUFSIZE],
            canon_len: 0,
            input_ring: VecDeque::new(),
        }
    }

    /// Process one output byte per §4.12: `ONLCR` emits `\r` ahead of `\n`;
    /// `OCRNL` rewrites `\r` to `\n`; `ONOCR` suppresses a `\r` at column 0;
    /// tabs advance to the next multiple of 8.
    pub fn output(&mut self, mut c: u8) {
        if !self.termios.oflag.contains(OutputFlags::OPOST) {
            self.out_buf.push_back(c);
            return;
        }

        if c == b'\n' && self.termios.oflag.contains(OutputFlags::ONLCR) {
            self.out_buf.push_back(b'\r');
        } else if c == b'\r' {
            if self.termios.oflag.contains(OutputFlags::OCRNL) {
                c = b'\n';
            } else if self.termios.oflag.contains(OutputFlags::ONOCR) && self.column == 0 {
                return;
            }
        }

        self.out_buf.push_back(c);

        match c {
            b'\x08' => self.column = self.column.saturating_sub(1),
            b'\n' => {
                if self.termios.oflag.intersects(OutputFlags::ONLCR | OutputFlags::ONLRET) {
                    self.column = 0;
                }
            }
            b'\t' => self.column = (self.column / TAB_SIZE + 1) * TAB_SIZE,
            b'\r' => self.column = 0,
            _ if !c.is_ascii_control() => self.column += 1,
            _ => {}
        }
    }

    pub fn drain_output(&mut self) -> alloc::vec::Vec<u8> {
        self.out_buf.drain(..).collect()
    }

    fn echo(&mut self, c: u8) {
        if self.termios.lflag.contains(LocalFlags::ECHO) || (self.termios.lflag.contains(LocalFlags::ECHONL) && c == b'\n') {
            self.output(c);
        }
    }

    /// One input byte from the wire. Returns a signal to deliver to
    /// `fg_pgrp` when a control character (`VINTR`/`VQUIT`/`VSUSP`) fired —
    /// always flushing both buffers first, per §4.12.
    pub fn input(&mut self, c: u8) -> Option<RaisedSignal> {
        if self.termios.lflag.contains(LocalFlags::ISIG) {
            if c == self.termios.cc.vintr {
                self.flush_all();
                return Some(RaisedSignal::Intr);
            }
            if c == self.termios.cc.vquit {
                self.flush_all();
                return Some(RaisedSignal::Quit);
            }
            if c == self.termios.cc.vsusp {
                self.flush_all();
                return Some(RaisedSignal::Susp);
            }
        }

        self.echo(c);

        if self.termios.lflag.contains(LocalFlags::ICANON) {
            if c == self.termios.cc.veol {
                self.commit_canon_line();
            } else if self.canon_len < CANON_BUFSIZE {
                self.canon_buf[self.canon_len] = c;
                self.canon_len += 1;
            }
        } else {
            self.push_input(c);
        }
        None
    }

    /// Push one byte into the input ring, dropping the oldest byte first if
    /// the ring is already at `INPUT_RING_CAPACITY` — a flood-control bound
    /// on the side of "keep accepting input" rather than blocking the
    /// producer, since this module has no scheduler to block on.
    fn push_input(&mut self, c: u8) {
        if self.input_ring.len() >= INPUT_RING_CAPACITY {
            self.input_ring.pop_front();
        }
        self.input_ring.push_back(c);
    }

    /// Atomically copy the canonical line buffer to the input ring and
    /// clear it (§4.12: "on the configured EOL/newline the buffer is
    /// atomically copied to the input ring and waiters are woken" — waking
    /// waiters is the scheduler's job, signaled by this returning `true`).
    fn commit_canon_line(&mut self) {
        for i in 0..self.canon_len {
            self.push_input(self.canon_buf[i]);
        }
        self.push_input(self.termios.cc.veol);
        self.canon_len = 0;
    }

    pub fn flush_output(&mut self) {
        self.out_buf.clear();
    }

    pub fn flush_input(&mut self) {
        self.input_ring.clear();
        self.canon_len = 0;
    }

    fn flush_all(&mut self) {
        self.flush_output();
        self.flush_input();
    }

    pub fn read_line(&mut self) -> Option<alloc::vec::Vec<u8>> {
        if self.input_ring.is_empty() {
            return None;
        }
        Some(self.input_ring.drain(..).collect())
    }
}

/// §4.12: a background process writing to its controlling TTY is sent
/// `SIGTTOU` (unless ignored); reading is sent `SIGTTIN`. `is_background`
/// is `caller_pgrp != tty.fg_pgrp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackgroundAccess {
    Write,
    Read,
}

pub fn background_signal(access: BackgroundAccess, caller_pgrp: Pid, tty: &Tty) -> Option<RaisedSignal> {
    if tty.fg_pgrp == Some(caller_pgrp) {
        return None;
    }
    match access {
        BackgroundAccess::Write => Some(RaisedSignal::Ttou),
        BackgroundAccess::Read => Some(RaisedSignal::Ttin),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onlcr_inserts_cr_before_lf() {
        let mut tty = Tty::new();
        tty.output(b'\n');
        assert_eq!(tty.drain_output(), alloc::vec![b'\r', b'\n']);
    }

    #[test]
    fn tabs_align_to_eight() {
        let mut tty = Tty::new();
        tty.output(b'a');
        tty.output(b'\t');
        assert_eq!(tty.column, 8);
    }

    #[test]
    fn ocrnl_rewrites_cr_to_lf() {
        let mut tty = Tty::new();
        tty.termios.oflag |= OutputFlags::OCRNL;
        tty.output(b'\r');
        assert_eq!(tty.drain_output(), alloc::vec![b'\n']);
    }

    #[test]
    fn onocr_suppresses_cr_at_column_zero() {
        let mut tty = Tty::new();
        tty.termios.oflag |= OutputFlags::ONOCR;
        tty.output(b'\r');
        assert!(tty.drain_output().is_empty());
    }

    #[test]
    fn canonical_line_commits_on_eol() {
        let mut tty = Tty::new();
        tty.termios.lflag.remove(LocalFlags::ECHO);
        tty.input(b'h');
        tty.input(b'i');
        assert!(tty.read_line().is_none());
        tty.input(b'\n');
        assert_eq!(tty.read_line().unwrap(), alloc::vec![b'h', b'i', b'\n']);
    }

    #[test]
    fn background_write_raises_sigttou_unless_foreground() {
        let mut tty = Tty::new();
        tty.fg_pgrp = Some(5);
        assert_eq!(background_signal(BackgroundAccess::Write, 7, &tty), Some(RaisedSignal::Ttou));
        assert_eq!(background_signal(BackgroundAccess::Write, 5, &tty), None);
    }

    #[test]
    fn vintr_flushes_buffers_and_raises_signal() {
        let mut tty = Tty::new();
        tty.termios.lflag.remove(LocalFlags::ECHO);
        tty.input(b'x');
        let sig = tty.input(3);
        assert_eq!(sig, Some(RaisedSignal::Intr));
        assert!(tty.read_line().is_none());
    }

    #[test]
    fn input_ring_drops_oldest_byte_past_capacity() {
        let mut tty = Tty::new();
        tty.termios.lflag.remove(LocalFlags::ECHO);
        tty.termios.lflag.remove(LocalFlags::ICANON);
        for i in 0..INPUT_RING_CAPACITY + 1 {
            tty.input((i % 256) as u8);
        }
        let line = tty.read_line().unwrap();
        assert_eq!(line.len(), INPUT_RING_CAPACITY);
        assert_eq!(line[0], 1u8);
    }
}
