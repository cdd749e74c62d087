//! Kernel-internal error taxonomy and the POSIX errno boundary.
//!
//! Subsystem code (mm, process, vfs, block) propagates [`KernelError`] with
//! `?`; the syscall-dispatch shim is the one place that collapses it to the
//! negative-integer ABI value via [`Errno`].

/// Internal error kind used between kernel subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    OutOfMemory,
    WouldBlock,
    Interrupted,
    RestartSyscall,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    IsDirectory,
    NotADirectory,
    ReadOnlyFilesystem,
    NotOnThisFilesystem,
    TooManyLinks,
    SymlinkLoop,
    NameTooLong,
    Busy,
    TextBusy,
    Io,
    InvalidArgument,
    Unsupported,
    AccessDenied,
    NoSpace,
    BrokenPipe,
    OutOfRange,
    NoTty,
    NoSuchProcess,
}

/// POSIX error numbers, as observed at the syscall boundary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    EPERM = 1,
    ENOENT = 2,
    ESRCH = 3,
    EINTR = 4,
    EIO = 5,
    E2BIG = 7,
    EBADF = 9,
    ECHILD = 10,
    EAGAIN = 11,
    ENOMEM = 12,
    EACCES = 13,
    EFAULT = 14,
    EBUSY = 16,
    EEXIST = 17,
    EXDEV = 18,
    ENOTDIR = 20,
    EISDIR = 21,
    EINVAL = 22,
    EMFILE = 24,
    ENOTTY = 25,
    ETXTBSY = 26,
    ENOSPC = 28,
    ESPIPE = 29,
    EROFS = 30,
    EMLINK = 31,
    EPIPE = 32,
    ENAMETOOLONG = 36,
    ENOSYS = 38,
    ELOOP = 40,
    ERESTART = 512,
}

impl From<KernelError> for Errno {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::OutOfMemory => Errno::ENOMEM,
            KernelError::WouldBlock => Errno::EAGAIN,
            KernelError::Interrupted => Errno::EINTR,
            KernelError::RestartSyscall => Errno::ERESTART,
            KernelError::NotFound => Errno::ENOENT,
            KernelError::AlreadyExists => Errno::EEXIST,
            KernelError::PermissionDenied => Errno::EPERM,
            KernelError::IsDirectory => Errno::EISDIR,
            KernelError::NotADirectory => Errno::ENOTDIR,
            KernelError::ReadOnlyFilesystem => Errno::EROFS,
            KernelError::NotOnThisFilesystem => Errno::EXDEV,
            KernelError::TooManyLinks => Errno::EMLINK,
            KernelError::SymlinkLoop => Errno::ELOOP,
            KernelError::NameTooLong => Errno::ENAMETOOLONG,
            KernelError::Busy => Errno::EBUSY,
            KernelError::TextBusy => Errno::ETXTBSY,
            KernelError::Io => Errno::EIO,
            KernelError::InvalidArgument => Errno::EINVAL,
            KernelError::Unsupported => Errno::ENOSYS,
            KernelError::AccessDenied => Errno::EACCES,
            KernelError::NoSpace => Errno::ENOSPC,
            KernelError::BrokenPipe => Errno::EPIPE,
            KernelError::OutOfRange => Errno::EINVAL,
            KernelError::NoTty => Errno::ENOTTY,
            KernelError::NoSuchProcess => Errno::ESRCH,
        }
    }
}

impl Errno {
    /// The ABI value a syscall returns for this error (a negative `isize`).
    pub fn as_isize(self) -> isize {
        -(self as i32 as isize)
    }
}

/// Crate-wide result alias for code reachable from the syscall boundary.
pub type Result<T> = core::result::Result<T, Errno>;

/// Result alias for subsystem-internal code that hasn't yet collapsed to `Errno`.
pub type KResult<T> = core::result::Result<T, KernelError>;
