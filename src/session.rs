//! The deadline-driven event loop which ties the tracker to a live
//! terminal.

use ::nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use ::parking_lot::RwLock;
use ::std::ops::{ControlFlow, DerefMut};
use ::std::os::fd::BorrowedFd;
use ::std::time::{Duration, Instant};
use ::tap::Pipe;
use ::tracing::{debug, warn};

use crate::errors::{Error, Result};
use crate::input::keyboard::{KeyEvent, KeyTracker, RepeatPolicy};
use crate::term::{Decoder, Key, RawModeGuard};

/// A builder pattern object which simplifies the process of creating a
/// [`Session`].
///
/// The same builder can be re-used to create multiple sessions with the
/// same configuration.
///
/// ```no_run
/// use ::std::time::Duration;
/// use ::unpress::{RepeatPolicy, Session};
///
/// let session = Session::builder()
///     .with_policy(
///         RepeatPolicy::new(Duration::from_millis(270), Duration::from_millis(40))
///             .expect("valid delays"),
///     )
///     .build()
///     .expect("session configuration is sound");
/// ```
#[derive(Clone, Debug)]
pub struct Builder {
    policy: RepeatPolicy,
    tick_interval: Option<Duration>,
    exit_key: Option<Key>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    /// Construct a new builder. Default values will be used for all
    /// properties until explicitly set.
    pub fn new() -> Self {
        Self {
            policy: RepeatPolicy::default(),
            tick_interval: None,
            exit_key: Some(Key::Ctrl('d')),
        }
    }

    /// Set the repeat policy governing release inference.
    ///
    /// Defaults to [`RepeatPolicy::default`] if not set.
    pub fn with_policy(self, policy: RepeatPolicy) -> Self {
        Self { policy, ..self }
    }

    /// Override the cadence at which deadlines are checked.
    ///
    /// Defaults to the policy's own [`tick_interval`] if not set. Must stay
    /// below the repeat delay or releases will routinely be inferred late.
    ///
    /// [`tick_interval`]: RepeatPolicy::tick_interval
    pub fn with_tick_interval(self, interval: Duration) -> Self {
        Self {
            tick_interval: Some(interval),
            ..self
        }
    }

    /// Set the key which ends the session, or `None` to keep running until
    /// the event sink breaks.
    ///
    /// Defaults to Ctrl-D.
    pub fn with_exit_key(self, key: Option<Key>) -> Self {
        Self {
            exit_key: key,
            ..self
        }
    }

    /// Gets the currently set repeat policy.
    pub fn policy(&self) -> &RepeatPolicy {
        &self.policy
    }

    /// Gets the currently set tick interval override.
    pub fn tick_interval(&self) -> Option<Duration> {
        self.tick_interval
    }

    /// Gets the currently set exit key.
    pub fn exit_key(&self) -> Option<Key> {
        self.exit_key
    }

    /// Build a new [`Session`] with the properties of the builder.
    pub fn build(&self) -> Result<Session> {
        let tick_interval = match self.tick_interval {
            None => self.policy.tick_interval(),
            Some(interval) if interval.is_zero() => {
                return Err(Error::InvalidPolicy {
                    reason: "tick interval must be greater than zero",
                })
            }
            Some(interval) => interval,
        };

        Ok(Session {
            tracker: RwLock::new(KeyTracker::new(self.policy)),
            tick_interval,
            exit_key: self.exit_key,
        })
    }
}

/// A live release-inference session over stdin.
///
/// [`run`] owns the whole pipeline: it places the terminal in raw mode,
/// multiplexes between "bytes arrived" and "tick deadline passed", decodes
/// bytes into [`Key`]s, drives the [`KeyTracker`], and hands every inferred
/// transition to the caller's sink. The terminal is restored on every exit
/// path and the event stream is closed balanced - keys still believed held
/// at shutdown receive a final `Up`.
///
/// # Example
///
/// ```no_run
/// use ::std::ops::ControlFlow;
/// use ::unpress::{KeyEvent, Session};
///
/// let session = Session::builder().build().unwrap();
/// session
///     .run(|event| {
///         match event {
///             KeyEvent::Down { key, .. } => println!("{key:?} pressed\r"),
///             KeyEvent::Up { key, .. } => println!("{key:?} released\r"),
///             KeyEvent::Repeat { .. } => (),
///         }
///         ControlFlow::Continue(())
///     })
///     .unwrap();
/// ```
///
/// [`run`]: Self::run
pub struct Session {
    /// Tracker state. Both press handling and deadline expiry read-then-
    /// write per-key deadlines, so every mutation goes through this lock.
    tracker: RwLock<KeyTracker<Key>>,
    /// Steady cadence for deadline checks while input is silent.
    tick_interval: Duration,
    /// Key which ends the session, if any.
    exit_key: Option<Key>,
}

impl Session {
    /// Construct a [`Builder`] for a session.
    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Reads the tracker state. A write lock is held while the returned
    /// reference lives, so it must be dropped for the event loop to make
    /// progress.
    pub fn tracker(&self) -> impl DerefMut<Target = KeyTracker<Key>> + '_ {
        self.tracker.write()
    }

    /// Run the event loop until the exit key arrives or the sink breaks.
    ///
    /// Each iteration polls stdin with a timeout capped by both the tick
    /// cadence and the earliest pending deadline. Presses observed in an
    /// iteration are applied before that iteration's deadline check, so a
    /// press and an expiry landing on the same instant resolve in the
    /// press's favour. Out-of-order press timestamps are logged and dropped,
    /// as they are recoverable; terminal failures abort the loop.
    pub fn run<F>(&self, mut sink: F) -> Result<()>
    where
        F: FnMut(KeyEvent<Key>) -> ControlFlow<()>,
    {
        let raw = RawModeGuard::acquire()?;
        let mut decoder = Decoder::new();
        let mut buf = [0u8; 64];
        debug!(tick_interval = ?self.tick_interval, "Session started");

        'session: loop {
            let mut fds = [PollFd::new(
                unsafe { BorrowedFd::borrow_raw(raw.raw_fd()) },
                PollFlags::POLLIN,
            )];
            let ready = poll(&mut fds, self.poll_timeout())?;
            let now = Instant::now();

            if ready > 0 {
                let count = raw.read(&mut buf)?;
                for key in decoder.feed(&buf[..count]) {
                    if self.exit_key == Some(key) {
                        break 'session;
                    }
                    for event in self.on_press(key, now) {
                        if sink(event).is_break() {
                            break 'session;
                        }
                    }
                }
            } else if let Some(key) = decoder.flush() {
                // Input went quiet with a lone ESC pending.
                for event in self.on_press(key, now) {
                    if sink(event).is_break() {
                        break 'session;
                    }
                }
            }

            for event in self.tracker.write().tick(now) {
                if sink(event).is_break() {
                    break 'session;
                }
            }
        }

        // Close the stream balanced: whatever is still believed held gets
        // its final `Up`.
        for event in self.tracker.write().release_all(Instant::now()) {
            let _ = sink(event);
        }

        debug!("Session ended");
        Ok(())
    }

    /// Apply a single press to the tracker, demoting out-of-order
    /// timestamps to a warning.
    fn on_press(&self, key: Key, now: Instant) -> Vec<KeyEvent<Key>> {
        match self.tracker.write().on_press(key, now) {
            Ok(events) => events,
            Err(err) => {
                warn!(error = %err, ?key, "Dropped press event");
                Vec::new()
            }
        }
    }

    /// The poll timeout for one iteration: the steady tick cadence,
    /// shortened when a deadline lands sooner.
    fn poll_timeout(&self) -> PollTimeout {
        let now = Instant::now();
        self.tracker
            .read()
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
            .map_or(self.tick_interval, |until| until.min(self.tick_interval))
            .as_millis()
            .min(u128::from(u16::MAX))
            .pipe(|millis| PollTimeout::from(millis as u16))
    }
}

/// Capture the timestamps of `count` consecutive presses of a held key.
///
/// This is the raw material for [`RepeatPolicy::from_samples`]: ask the user
/// to press and hold a key, capture the auto-repeat press times, and derive
/// the terminal's real delays instead of trusting platform-typical
/// defaults. Blocks until enough presses have arrived.
pub fn capture_press_samples(count: usize) -> Result<Vec<Instant>> {
    let raw = RawModeGuard::acquire()?;
    let mut decoder = Decoder::new();
    let mut buf = [0u8; 64];
    let mut samples = Vec::with_capacity(count);

    while samples.len() < count {
        let mut fds = [PollFd::new(
            unsafe { BorrowedFd::borrow_raw(raw.raw_fd()) },
            PollFlags::POLLIN,
        )];
        poll(&mut fds, PollTimeout::NONE)?;

        let read = raw.read(&mut buf)?;
        let now = Instant::now();
        for _key in decoder.feed(&buf[..read]) {
            samples.push(now);
            if samples.len() == count {
                break;
            }
        }
    }

    Ok(samples)
}
