//! Logical key transition events inferred from press timing.

use ::std::time::Instant;
use ::strum::Display;

/// The three transitions a tracked key can make, without the payload.
/// Primarily useful for structured log fields and coarse matching.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The key went from unheld to held.
    Down,
    /// The key is still held and the OS emitted an auto-repeat press.
    Repeat,
    /// The key was inferred to have been released.
    Up,
}

/// A logical key transition, carrying the key identifier and the timestamp
/// at which the transition took effect.
///
/// `Down` and `Repeat` carry the timestamp of the observed press which
/// caused them. `Up` is synthetic - no release is ever observed - and
/// carries the deadline at which the release was inferred, which is the
/// latest instant the key could still have been held.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyEvent<K> {
    /// First press of a key not currently believed to be held.
    Down {
        /// The key which went down.
        key: K,
        /// When the press was observed.
        at: Instant,
    },
    /// An OS auto-repeat press of a key already believed to be held.
    Repeat {
        /// The key which repeated.
        key: K,
        /// When the repeat press was observed.
        at: Instant,
    },
    /// Inferred release of a previously held key.
    Up {
        /// The key which was released.
        key: K,
        /// The deadline at which the release was inferred.
        at: Instant,
    },
}

impl<K> KeyEvent<K> {
    /// The key this transition applies to.
    pub const fn key(&self) -> &K {
        match self {
            Self::Down { key, .. } | Self::Repeat { key, .. } | Self::Up { key, .. } => key,
        }
    }

    /// When the transition took effect.
    pub const fn at(&self) -> Instant {
        match self {
            Self::Down { at, .. } | Self::Repeat { at, .. } | Self::Up { at, .. } => *at,
        }
    }

    /// The kind of transition, without the payload.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Down { .. } => EventKind::Down,
            Self::Repeat { .. } => EventKind::Repeat,
            Self::Up { .. } => EventKind::Up,
        }
    }
}
