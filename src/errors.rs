//! Crate-specific error and result types, plus common conversions.

use ::std::time::Duration;
use ::thiserror::Error;

/// Result type returned by fallible functions in this crate.
pub type Result<T> = ::std::result::Result<T, Error>;

/// Error type for release-inference and terminal plumbing failures.
///
/// Errors are always returned synchronously from the operation which detected
/// them; the caller decides severity. A rejected event never corrupts
/// tracking state - the offending input is simply dropped.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The supplied delays cannot support a sound release inference. Fatal at
    /// construction time: a tracker built on a broken policy would emit
    /// nonsense for every key.
    #[error("invalid repeat policy: {reason}")]
    InvalidPolicy {
        /// Which constraint the supplied delays violated.
        reason: &'static str,
    },

    /// A press timestamp regressed relative to the most recent press seen for
    /// the same key. Recoverable: the event is dropped, the key's state is
    /// left untouched, and tracking of other keys is unaffected.
    #[error("press timestamp regressed by {regression:?}")]
    NonMonotonicTime {
        /// How far behind the key's last seen press the rejected timestamp
        /// was.
        regression: Duration,
    },

    /// A terminal-level operation failed (termios, poll, or read).
    #[error("terminal I/O error: {0}")]
    Terminal(#[from] ::nix::Error),
}
