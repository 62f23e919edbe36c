//! Per-key timing state and the release-inference state machine.

use ::std::collections::{hash_map::Entry, HashMap};
use ::std::hash::Hash;
use ::std::time::Instant;
use ::strum::Display;
use ::tracing::trace;

use super::{KeyEvent, RepeatPolicy};
use crate::errors::{Error, Result};

/// Which leg of the auto-repeat cycle a held key is in.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum Phase {
    /// Pressed once; the OS has not begun auto-repeating yet, so the next
    /// press is expected within the initial delay.
    AwaitingFirstRepeat,
    /// At least one auto-repeat press has been observed; subsequent presses
    /// are expected within the repeat delay.
    Repeating,
}

/// Timing state for a single key currently believed to be held down.
#[derive(Clone, Copy, Debug)]
struct KeyState {
    phase: Phase,
    /// Timestamp of the most recent press observed for this key.
    last_seen: Instant,
    /// Past this instant, absent a new press, the key is considered
    /// released. Always `last_seen` plus the delay applicable to `phase`.
    deadline: Instant,
}

/// The central object which turns a stream of timestamped key presses into a
/// stream of `Down`/`Repeat`/`Up` transitions.
///
/// # The Inference Problem
///
/// A terminal in raw mode only ever reports key *presses*. A press is either
/// a genuine key-down or an OS auto-repeat of a key still held; the byte
/// stream carries nothing to tell the two apart, and releases are never
/// reported at all. What *is* deterministic is the timing: the OS emits the
/// first repeat press after a fixed initial delay and subsequent repeats at
/// a fixed interval. The tracker exploits exactly that. Every tracked key
/// carries a deadline - the latest instant a follow-up press can arrive if
/// the key is still physically held. A press inside the deadline is a
/// repeat; silence past the deadline is a release.
///
/// # Driving the Tracker
///
/// Feed every observed press to [`on_press`] with its timestamp, and call
/// [`tick`] with the current time at a steady cadence (see
/// [`RepeatPolicy::tick_interval`]). `tick` is a plain function of "now":
/// the tracker manages no clock or thread of its own, which keeps it fully
/// testable with synthetic timestamps. Both calls mutate the same per-key
/// deadlines, so a host driving them from multiple threads must serialize
/// them; when a press and an expiry coincide on the same instant, whichever
/// call runs first wins, and a single-threaded driver should run `on_press`
/// first.
///
/// Per key, the reachable transitions are:
///
/// ```text
/// (untracked) -> AwaitingFirstRepeat -> Repeating -> (untracked)
///                                  \________________^
/// ```
///
/// where the short-cut is a quick tap released before auto-repeat ever
/// began. A key can cycle through this machine any number of times.
///
/// [`on_press`]: Self::on_press
/// [`tick`]: Self::tick
#[derive(Debug)]
pub struct KeyTracker<K> {
    policy: RepeatPolicy,
    /// Per-key timing state. A key is present if and only if the tracker
    /// currently believes it is physically held down.
    held: HashMap<K, KeyState>,
}

impl<K> KeyTracker<K>
where
    K: Clone + Eq + Hash,
{
    /// Construct a tracker governed by the given policy.
    pub fn new(policy: RepeatPolicy) -> Self {
        Self {
            policy,
            held: HashMap::new(),
        }
    }

    /// The policy this tracker was constructed with.
    pub const fn policy(&self) -> &RepeatPolicy {
        &self.policy
    }

    /// Process one observed press and return the transitions it implies.
    ///
    /// * An untracked key yields a single `Down`.
    /// * A tracked key pressed on or before its deadline yields a single
    ///   `Repeat` and pushes the deadline out by the repeat delay.
    /// * A tracked key pressed strictly after its deadline must have been
    ///   released and pressed again before the periodic check could run:
    ///   the overdue `Up` (timestamped at the stale deadline) is emitted
    ///   first, followed by a fresh `Down`.
    ///
    /// Timestamps must be non-decreasing per key. A press behind the key's
    /// most recent one is rejected with [`Error::NonMonotonicTime`] and
    /// mutates nothing.
    pub fn on_press(&mut self, key: K, at: Instant) -> Result<Vec<KeyEvent<K>>> {
        match self.held.entry(key.clone()) {
            Entry::Vacant(entry) => {
                entry.insert(KeyState {
                    phase: Phase::AwaitingFirstRepeat,
                    last_seen: at,
                    deadline: at + self.policy.initial_delay(),
                });
                Ok(vec![KeyEvent::Down { key, at }])
            }
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                if at < state.last_seen {
                    return Err(Error::NonMonotonicTime {
                        regression: state.last_seen.duration_since(at),
                    });
                }

                if at <= state.deadline {
                    state.phase = Phase::Repeating;
                    state.last_seen = at;
                    state.deadline = at + self.policy.repeat_delay();
                    Ok(vec![KeyEvent::Repeat { key, at }])
                } else {
                    // The deadline check has not caught up with this key yet.
                    // Close out the stale hold before starting the new one.
                    let released_at = state.deadline;
                    *state = KeyState {
                        phase: Phase::AwaitingFirstRepeat,
                        last_seen: at,
                        deadline: at + self.policy.initial_delay(),
                    };
                    Ok(vec![
                        KeyEvent::Up {
                            key: key.clone(),
                            at: released_at,
                        },
                        KeyEvent::Down { key, at },
                    ])
                }
            }
        }
    }

    /// Expire every key whose deadline has been reached.
    ///
    /// This is the mechanism which converts silence into a positive release
    /// signal - there is no other way to learn that physical contact ended.
    /// Each key with `deadline <= now` (the boundary is inclusive) is
    /// forgotten and an `Up` timestamped at its deadline is emitted.
    /// Expiries are returned in deadline order so the output stream is
    /// deterministic. Calling again with the same `now` is a no-op.
    pub fn tick(&mut self, now: Instant) -> Vec<KeyEvent<K>> {
        let mut expired: Vec<(K, Instant)> = self
            .held
            .iter()
            .filter(|(_, state)| state.deadline <= now)
            .map(|(key, state)| (key.clone(), state.deadline))
            .collect();
        expired.sort_by_key(|(_, deadline)| *deadline);

        expired
            .into_iter()
            .map(|(key, deadline)| {
                self.held.remove(&key);
                trace!(still_held = self.held.len(), "Held key expired");
                KeyEvent::Up { key, at: deadline }
            })
            .collect()
    }

    /// Returns `true` if the given key is currently believed to be held.
    pub fn is_held(&self, key: &K) -> bool {
        self.held.contains_key(key)
    }

    /// The number of keys currently believed to be held.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// The earliest pending deadline, if any key is tracked. A driver can
    /// use this to shorten its next sleep instead of always waking on the
    /// fixed cadence.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.held.values().map(|state| state.deadline).min()
    }

    /// Forget every tracked key, emitting an `Up` at `now` for each.
    ///
    /// Intended for shutdown: the host stops polling, so deadlines would
    /// never fire, yet consumers still deserve a balanced stream in which
    /// every `Down` is eventually answered by an `Up`.
    pub fn release_all(&mut self, now: Instant) -> Vec<KeyEvent<K>> {
        let mut remaining: Vec<(K, Instant)> = self
            .held
            .drain()
            .map(|(key, state)| (key, state.deadline))
            .collect();
        remaining.sort_by_key(|(_, deadline)| *deadline);

        remaining
            .into_iter()
            .map(|(key, _)| KeyEvent::Up { key, at: now })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ::pretty_assertions::assert_eq;
    use ::std::time::Duration;

    const MS: Duration = Duration::from_millis(1);

    fn tracker() -> (KeyTracker<char>, Instant) {
        let policy = RepeatPolicy::new(250 * MS, 30 * MS).unwrap();
        (KeyTracker::new(policy), Instant::now())
    }

    /// A first press is a `Down`, and a tick at the very same instant must
    /// not release anything.
    #[test]
    fn test_fresh_press_is_down() {
        let (mut tracker, t0) = tracker();

        let events = tracker.on_press('a', t0).unwrap();
        assert_eq!(events, vec![KeyEvent::Down { key: 'a', at: t0 }]);
        assert!(tracker.is_held(&'a'));

        assert_eq!(tracker.tick(t0), vec![]);
        assert!(tracker.is_held(&'a'));
    }

    /// The release boundary is inclusive: a tick at exactly the deadline
    /// fires the `Up`, timestamped at the deadline itself.
    #[test]
    fn test_release_at_exact_deadline() {
        let (mut tracker, t0) = tracker();
        tracker.on_press('a', t0).unwrap();

        assert_eq!(tracker.tick(t0 + 249 * MS), vec![]);
        assert_eq!(
            tracker.tick(t0 + 250 * MS),
            vec![KeyEvent::Up {
                key: 'a',
                at: t0 + 250 * MS,
            }]
        );
        assert!(!tracker.is_held(&'a'));
    }

    /// A second press inside the initial-delay window is the OS auto-repeat,
    /// not a fresh press.
    #[test]
    fn test_press_before_deadline_is_repeat() {
        let (mut tracker, t0) = tracker();
        tracker.on_press('a', t0).unwrap();

        let events = tracker.on_press('a', t0 + 125 * MS).unwrap();
        assert_eq!(
            events,
            vec![KeyEvent::Repeat {
                key: 'a',
                at: t0 + 125 * MS,
            }]
        );
    }

    /// Once repeating, presses keep arriving within the repeat delay and
    /// keep the key alive; the first missed repeat window releases it.
    #[test]
    fn test_repeat_chaining() {
        let (mut tracker, t0) = tracker();
        tracker.on_press('a', t0).unwrap();
        tracker.on_press('a', t0 + 250 * MS).unwrap();

        // 1ms inside the repeat window: still repeating.
        let events = tracker.on_press('a', t0 + 279 * MS).unwrap();
        assert_eq!(
            events,
            vec![KeyEvent::Repeat {
                key: 'a',
                at: t0 + 279 * MS,
            }]
        );

        // No press for a full repeat delay: released at the deadline.
        assert_eq!(
            tracker.tick(t0 + 309 * MS),
            vec![KeyEvent::Up {
                key: 'a',
                at: t0 + 309 * MS,
            }]
        );
    }

    /// The deadline shrinks from the initial delay to the repeat delay as
    /// soon as the first repeat is seen.
    #[test]
    fn test_deadline_tightens_after_first_repeat() {
        let (mut tracker, t0) = tracker();
        tracker.on_press('a', t0).unwrap();
        assert_eq!(tracker.next_deadline(), Some(t0 + 250 * MS));

        tracker.on_press('a', t0 + 100 * MS).unwrap();
        assert_eq!(tracker.next_deadline(), Some(t0 + 130 * MS));
    }

    /// Repeated ticks with the same `now` must emit the `Up` only once.
    #[test]
    fn test_tick_idempotent() {
        let (mut tracker, t0) = tracker();
        tracker.on_press('a', t0).unwrap();

        let now = t0 + 300 * MS;
        assert_eq!(tracker.tick(now).len(), 1);
        assert_eq!(tracker.tick(now), vec![]);
    }

    /// Interleaved activity on two keys never lets one key's transitions
    /// disturb the other's.
    #[test]
    fn test_keys_tracked_independently() {
        let (mut tracker, t0) = tracker();

        tracker.on_press('a', t0).unwrap();
        tracker.on_press('b', t0 + 100 * MS).unwrap();

        // 'a' repeats; 'b' is left to expire.
        let events = tracker.on_press('a', t0 + 200 * MS).unwrap();
        assert_eq!(
            events,
            vec![KeyEvent::Repeat {
                key: 'a',
                at: t0 + 200 * MS,
            }]
        );

        // 'b' expires at t0+350; 'a' (repeating, deadline t0+230) expired
        // earlier and must sort first.
        let events = tracker.tick(t0 + 400 * MS);
        assert_eq!(
            events,
            vec![
                KeyEvent::Up {
                    key: 'a',
                    at: t0 + 230 * MS,
                },
                KeyEvent::Up {
                    key: 'b',
                    at: t0 + 350 * MS,
                },
            ]
        );
        assert_eq!(tracker.held_count(), 0);
    }

    /// Pressing a key again after its `Up` was emitted is always a fresh
    /// `Down`, never a `Repeat`.
    #[test]
    fn test_press_after_release_is_down() {
        let (mut tracker, t0) = tracker();
        tracker.on_press('a', t0).unwrap();
        tracker.tick(t0 + 250 * MS);

        let events = tracker.on_press('a', t0 + 251 * MS).unwrap();
        assert_eq!(
            events,
            vec![KeyEvent::Down {
                key: 'a',
                at: t0 + 251 * MS,
            }]
        );
    }

    /// A press arriving after the deadline but before the periodic check has
    /// run must emit the overdue `Up` (at the stale deadline) and then the
    /// fresh `Down`, in that order.
    #[test]
    fn test_late_press_emits_overdue_up_then_down() {
        let (mut tracker, t0) = tracker();
        tracker.on_press('a', t0).unwrap();

        let events = tracker.on_press('a', t0 + 400 * MS).unwrap();
        assert_eq!(
            events,
            vec![
                KeyEvent::Up {
                    key: 'a',
                    at: t0 + 250 * MS,
                },
                KeyEvent::Down {
                    key: 'a',
                    at: t0 + 400 * MS,
                },
            ]
        );

        // The fresh state awaits a first repeat with a full initial delay.
        assert_eq!(tracker.next_deadline(), Some(t0 + 650 * MS));
    }

    /// A regressing timestamp is rejected and leaves the key's state
    /// completely untouched.
    #[test]
    fn test_non_monotonic_press_rejected() {
        let (mut tracker, t0) = tracker();
        tracker.on_press('a', t0 + 100 * MS).unwrap();

        let err = tracker.on_press('a', t0).unwrap_err();
        assert_eq!(
            err,
            Error::NonMonotonicTime {
                regression: 100 * MS,
            }
        );

        // State is untouched: the original deadline still stands and a press
        // inside it is still a repeat.
        assert!(tracker.is_held(&'a'));
        assert_eq!(tracker.next_deadline(), Some(t0 + 350 * MS));
        let events = tracker.on_press('a', t0 + 200 * MS).unwrap();
        assert_eq!(
            events,
            vec![KeyEvent::Repeat {
                key: 'a',
                at: t0 + 200 * MS,
            }]
        );
    }

    /// A full hold-and-release cycle driven at a 10ms tick cadence. Delays
    /// of 270/30ms and presses at 0/260/290/320ms produce one `Down`, three
    /// `Repeat`s, and the final inferred `Up` at 350ms.
    #[test]
    fn test_hold_and_release_scenario() {
        let policy = RepeatPolicy::new(270 * MS, 30 * MS).unwrap();
        let mut tracker = KeyTracker::new(policy);
        let t0 = Instant::now();

        let presses = [0u64, 260, 290, 320];
        let mut events = Vec::new();
        for elapsed_ms in 0..=40 {
            let now = t0 + Duration::from_millis(elapsed_ms * 10);
            for press in presses {
                if press == elapsed_ms * 10 {
                    events.extend(tracker.on_press('A', now).unwrap());
                }
            }
            events.extend(tracker.tick(now));
        }

        assert_eq!(
            events,
            vec![
                KeyEvent::Down { key: 'A', at: t0 },
                KeyEvent::Repeat {
                    key: 'A',
                    at: t0 + 260 * MS,
                },
                KeyEvent::Repeat {
                    key: 'A',
                    at: t0 + 290 * MS,
                },
                KeyEvent::Repeat {
                    key: 'A',
                    at: t0 + 320 * MS,
                },
                KeyEvent::Up {
                    key: 'A',
                    at: t0 + 350 * MS,
                },
            ]
        );
    }

    /// `release_all` drains every tracked key with a balanced `Up` stream,
    /// ordered by how soon each key would have expired.
    #[test]
    fn test_release_all_balances_stream() {
        let (mut tracker, t0) = tracker();
        tracker.on_press('a', t0).unwrap();
        tracker.on_press('b', t0 + 10 * MS).unwrap();
        // 'b' repeats, so its deadline (t0+230) now precedes 'a's (t0+250).
        tracker.on_press('b', t0 + 200 * MS).unwrap();

        let now = t0 + 220 * MS;
        let events = tracker.release_all(now);
        assert_eq!(
            events,
            vec![
                KeyEvent::Up { key: 'b', at: now },
                KeyEvent::Up { key: 'a', at: now },
            ]
        );
        assert_eq!(tracker.held_count(), 0);
        assert_eq!(tracker.release_all(now), vec![]);
    }
}
