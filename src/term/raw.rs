//! Raw terminal mode as a scoped, process-wide resource.

use ::lazy_static::lazy_static;
use ::nix::fcntl::{fcntl, FcntlArg, OFlag};
use ::nix::sys::termios::{self, SetArg, Termios};
use ::parking_lot::Mutex;
use ::std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use ::std::sync::{Arc, Weak};
use ::tracing::debug;

use crate::errors::Result;

lazy_static! {
    static ref RAW_MODE_HANDLE: Mutex<Weak<RawModeGuard>> = Default::default();
}

/// A RAII object which, while held, keeps stdin in raw non-canonical,
/// non-blocking mode.
///
/// The terminal line discipline is process-wide mutable state with a strict
/// teardown obligation: leaving raw mode enabled after exit wrecks the
/// user's shell. Acquisition is therefore ref-counted through a process-wide
/// registry - nested acquisitions share a single saved-state/restore pair,
/// and the original `termios` settings are reinstated when the last handle
/// is dropped, on every exit path that unwinds.
///
/// # Example
///
/// ```no_run
/// use ::unpress::term::RawModeGuard;
///
/// let guard = RawModeGuard::acquire().expect("stdin is not a tty?");
///
/// let mut buf = [0u8; 64];
/// let n = guard.read(&mut buf).expect("read failed");
///
/// // Dropping the last handle restores the original terminal mode.
/// drop(guard);
/// ```
pub struct RawModeGuard {
    /// Raw stdin descriptor. Held for the lifetime of the guard; stdin is
    /// never closed by this type.
    fd: RawFd,
    /// Original settings, reinstated on drop. Wrapped in a mutex because
    /// `Termios` has interior mutability and the guard is shared via the
    /// process-wide registry.
    saved: Mutex<Termios>,
}

impl RawModeGuard {
    /// Acquire a ref-counted handle to raw mode on stdin, entering it if
    /// this is the first outstanding handle.
    pub fn acquire() -> Result<Arc<Self>> {
        let mut handle = RAW_MODE_HANDLE.lock();
        if let Some(guard) = handle.upgrade() {
            return Ok(guard);
        }

        let guard = Arc::new(Self::enter()?);
        *handle = Arc::downgrade(&guard);
        Ok(guard)
    }

    /// Read pending input bytes without blocking.
    ///
    /// Returns `Ok(0)` when no data is available. Escape sequences can be
    /// delivered in pieces; callers should run whatever arrives through a
    /// [`Decoder`], which reassembles split sequences across reads.
    ///
    /// [`Decoder`]: crate::term::Decoder
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match ::nix::unistd::read(self.fd, buf) {
            Ok(n) => Ok(n),
            Err(::nix::errno::Errno::EAGAIN) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    pub(crate) const fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn enter() -> Result<Self> {
        let fd = ::std::io::stdin().as_raw_fd();
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };

        let saved = termios::tcgetattr(borrowed)?;

        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(borrowed, SetArg::TCSAFLUSH, &raw)?;

        // Non-blocking reads let the event loop pick up however much of a
        // multi-byte escape sequence has arrived without stalling the
        // deadline checks.
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK))?;

        debug!("Entered raw terminal mode");
        Ok(Self {
            fd,
            saved: Mutex::new(saved),
        })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let borrowed = unsafe { BorrowedFd::borrow_raw(self.fd) };
        let _ = termios::tcsetattr(borrowed, SetArg::TCSAFLUSH, &self.saved.lock());

        if let Ok(flags) = fcntl(self.fd, FcntlArg::F_GETFL) {
            let flags = OFlag::from_bits_truncate(flags) & !OFlag::O_NONBLOCK;
            let _ = fcntl(self.fd, FcntlArg::F_SETFL(flags));
        }

        debug!("Restored terminal mode");
    }
}
