//! Kernel logging (`printk`-style) with a ring-buffered history.
//!
//! The concrete output device (a 16550 UART, a framebuffer console, ...) is
//! an out-of-scope collaborator; this module only depends on the [`Console`]
//! trait it writes through, and keeps a ring buffer of recent lines so a
//! panic handler can dump history without re-deriving it.

use crate::ringbuf::RingBuffer;
use core::fmt::{self, Write};
use core::sync::atomic::{AtomicU8, Ordering};
use spin::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

static MAX_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/// Set the maximum level that actually reaches the console (ring buffer still
/// records everything up to `Debug`).
pub fn set_level(level: LogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

fn level_enabled(level: LogLevel) -> bool {
    (level as u8) <= MAX_LEVEL.load(Ordering::Relaxed)
}

/// A line sink the logger writes formatted output through. Implemented by a
/// UART/console driver outside this crate's scope.
pub trait Console: Send + Sync {
    fn write_str(&self, s: &str);
}

struct NullConsole;
impl Console for NullConsole {
    fn write_str(&self, _s: &str) {}
}

static CONSOLE: Mutex<&'static dyn Console> = Mutex::new(&NullConsole);

/// Install the concrete console backend. Called once during boot.
pub fn set_console(console: &'static dyn Console) {
    *CONSOLE.lock() = console;
}

const LINE_CAP: usize = 200;

#[derive(Clone, Copy)]
pub struct LogLine {
    pub level: LogLevel,
    pub text: [u8; LINE_CAP],
    pub len: usize,
}

impl LogLine {
    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.text[..self.len]).unwrap_or("<invalid utf8>")
    }
}

struct LineWriter {
    buf: [u8; LINE_CAP],
    len: usize,
}

impl Write for LineWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &b in s.as_bytes() {
            if self.len >= LINE_CAP {
                break;
            }
            self.buf[self.len] = b;
            self.len += 1;
        }
        Ok(())
    }
}

static HISTORY: Mutex<RingBuffer<LogLine, 512>> = Mutex::new(RingBuffer::new());

/// Format and dispatch one log line. Called by the `error!`/`warn!`/`info!`/
/// `debug!` macros below; not usually called directly.
pub fn log(level: LogLevel, args: fmt::Arguments) {
    let mut w = LineWriter {
        buf: [0; LINE_CAP],
        len: 0,
    };
    let _ = w.write_fmt(args);
    let line = LogLine {
        level,
        text: w.buf,
        len: w.len,
    };
    HISTORY.lock().push(line);

    if level_enabled(level) {
        let console = *CONSOLE.lock();
        console.write_str("[");
        console.write_str(level.as_str());
        console.write_str("] ");
        console.write_str(line.as_str());
        console.write_str("\n");
    }
}

/// Drain the ring buffer of recent log lines (newest last), for panic dumps.
pub fn recent_lines() -> alloc::vec::Vec<LogLine> {
    HISTORY.lock().drain_all()
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::klog::log($crate::klog::LogLevel::Error, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::klog::log($crate::klog::LogLevel::Warn, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::klog::log($crate::klog::LogLevel::Info, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::klog::log($crate::klog::LogLevel::Debug, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::AtomicUsize;

    struct CountingConsole(AtomicUsize);
    impl Console for CountingConsole {
        fn write_str(&self, _s: &str) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn records_into_history() {
        log(LogLevel::Info, format_args!("hello {}", 42));
        let lines = recent_lines();
        assert!(lines.iter().any(|l| l.as_str() == "hello 42"));
    }

    #[test]
    fn level_filter() {
        set_level(LogLevel::Error);
        assert!(level_enabled(LogLevel::Error));
        assert!(!level_enabled(LogLevel::Debug));
        set_level(LogLevel::Debug);
        assert!(level_enabled(LogLevel::Debug));
    }
}
