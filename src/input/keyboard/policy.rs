//! The timing policy which governs release inference.

use ::std::time::{Duration, Instant};
use ::tap::Pipe;

use crate::errors::{Error, Result};

/// Typical time from a key's first press to the OS emitting its first
/// auto-repeat press.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Typical time between consecutive OS auto-repeat presses once repeating
/// has started.
pub const DEFAULT_REPEAT_DELAY: Duration = Duration::from_millis(30);

/// Divisor applied to the shorter of the two delays to derive a polling
/// cadence which keeps worst-case release latency low without excessive
/// wakeups.
const TICK_DIVISOR: u32 = 4;

/// The two durations which make release inference possible.
///
/// The OS auto-repeat behaviour of a terminal keyboard is deterministic: a
/// held key produces its first repeat press after `initial_delay` and then
/// one press every `repeat_delay`. A gap in the press stream longer than the
/// currently applicable delay therefore means the key was released. This
/// type holds those two durations and nothing else; it is validated on
/// construction and immutable afterwards.
///
/// # Example
///
/// ```
/// use ::std::time::Duration;
/// use ::unpress::RepeatPolicy;
///
/// let policy = RepeatPolicy::new(
///     Duration::from_millis(270),
///     Duration::from_millis(40),
/// )
/// .expect("valid delays");
///
/// assert_eq!(policy.tick_interval(), Duration::from_millis(10));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RepeatPolicy {
    initial_delay: Duration,
    repeat_delay: Duration,
}

impl Default for RepeatPolicy {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            repeat_delay: DEFAULT_REPEAT_DELAY,
        }
    }
}

impl RepeatPolicy {
    /// Construct a validated policy.
    ///
    /// Both delays must be non-zero, and the repeat delay must not exceed the
    /// initial delay. A repeat delay longer than the initial delay is almost
    /// certainly a misconfiguration: it would break the monotonic shrinking
    /// of deadlines which the tracker relies on, so it is rejected here
    /// rather than silently tolerated.
    pub fn new(initial_delay: Duration, repeat_delay: Duration) -> Result<Self> {
        if initial_delay.is_zero() {
            return Err(Error::InvalidPolicy {
                reason: "initial delay must be greater than zero",
            });
        }
        if repeat_delay.is_zero() {
            return Err(Error::InvalidPolicy {
                reason: "repeat delay must be greater than zero",
            });
        }
        if repeat_delay > initial_delay {
            return Err(Error::InvalidPolicy {
                reason: "repeat delay must not exceed the initial delay",
            });
        }

        Ok(Self {
            initial_delay,
            repeat_delay,
        })
    }

    /// Derive a policy from press timestamps captured while a single key was
    /// held down.
    ///
    /// The first gap in `samples` yields the initial delay and the mean of
    /// the remaining gaps yields the repeat delay. Both are inflated by
    /// `margin_percent` to guard against false releases when the real
    /// keyboard occasionally repeats a little late. At least three samples
    /// are required; more samples give a better average.
    pub fn from_samples(samples: &[Instant], margin_percent: u32) -> Result<Self> {
        if samples.len() < 3 {
            return Err(Error::InvalidPolicy {
                reason: "calibration requires at least three press samples",
            });
        }

        let initial = samples[1].duration_since(samples[0]);
        let repeat = samples
            .windows(2)
            .skip(1)
            .map(|pair| pair[1].duration_since(pair[0]))
            .sum::<Duration>()
            / (samples.len() as u32 - 2);

        let margin = |delay: Duration| delay * (100 + margin_percent) / 100;
        Self::new(margin(initial), margin(repeat))
    }

    /// Time from a key's first press to its first expected auto-repeat.
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Time between consecutive expected auto-repeat presses.
    pub const fn repeat_delay(&self) -> Duration {
        self.repeat_delay
    }

    /// The recommended cadence for deadline checks: a quarter of the shorter
    /// delay, but never below one millisecond.
    pub fn tick_interval(&self) -> Duration {
        self.initial_delay
            .min(self.repeat_delay)
            .pipe(|delay| delay / TICK_DIVISOR)
            .max(Duration::from_millis(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ::pretty_assertions::assert_eq;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_default_policy_is_valid() {
        let policy = RepeatPolicy::default();
        assert_eq!(
            RepeatPolicy::new(policy.initial_delay(), policy.repeat_delay()),
            Ok(policy)
        );
    }

    #[test]
    fn test_zero_initial_delay_rejected() {
        assert!(matches!(
            RepeatPolicy::new(Duration::ZERO, 30 * MS),
            Err(Error::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn test_zero_repeat_delay_rejected() {
        assert!(matches!(
            RepeatPolicy::new(250 * MS, Duration::ZERO),
            Err(Error::InvalidPolicy { .. })
        ));
    }

    /// A repeat delay longer than the initial delay breaks deadline
    /// monotonicity and must be rejected up front.
    #[test]
    fn test_repeat_exceeding_initial_rejected() {
        assert!(matches!(
            RepeatPolicy::new(30 * MS, 250 * MS),
            Err(Error::InvalidPolicy { .. })
        ));
        // Equal delays are unusual but sound.
        assert!(RepeatPolicy::new(30 * MS, 30 * MS).is_ok());
    }

    #[test]
    fn test_tick_interval_is_quarter_of_shortest_delay() {
        let policy = RepeatPolicy::new(250 * MS, 40 * MS).unwrap();
        assert_eq!(policy.tick_interval(), 10 * MS);
    }

    /// Very short repeat delays must not produce a zero tick interval, which
    /// would turn the event loop into a busy spin.
    #[test]
    fn test_tick_interval_clamped_to_one_millisecond() {
        let policy = RepeatPolicy::new(10 * MS, 2 * MS).unwrap();
        assert_eq!(policy.tick_interval(), MS);
    }

    #[test]
    fn test_from_samples() {
        let base = Instant::now();
        // Held key: first repeat 250ms after the press, then every 30ms.
        let samples = [
            base,
            base + 250 * MS,
            base + 280 * MS,
            base + 310 * MS,
            base + 340 * MS,
        ];

        let policy = RepeatPolicy::from_samples(&samples, 0).unwrap();
        assert_eq!(policy.initial_delay(), 250 * MS);
        assert_eq!(policy.repeat_delay(), 30 * MS);

        let padded = RepeatPolicy::from_samples(&samples, 10).unwrap();
        assert_eq!(padded.initial_delay(), 275 * MS);
        assert_eq!(padded.repeat_delay(), 33 * MS);
    }

    #[test]
    fn test_from_samples_requires_three_presses() {
        let base = Instant::now();
        assert!(matches!(
            RepeatPolicy::from_samples(&[base, base + 250 * MS], 4),
            Err(Error::InvalidPolicy { .. })
        ));
    }
}
