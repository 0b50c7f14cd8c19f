use core::fmt;

use log::warn;
use serde::Serialize;

/// Number of low-order bits holding the per-second sequence number.
pub const SEQUENCE_BITS: u32 = 4;

// Highest sequence number that can be issued within a single second.
const SEQUENCE_MAX: u32 = (1 << SEQUENCE_BITS) - 1;

/// Highest seconds component a [`Timestamp`] can carry.
pub const SECONDS_MAX: u32 = u32::MAX >> SEQUENCE_BITS;

/// A strictly ascending time identifier.
///
/// The high-order bits count seconds since the last log reset or the last
/// uncontrolled restart, whichever is more recent. The low-order
/// [`SEQUENCE_BITS`] bits distinguish timestamps issued within the same
/// second.
///
/// A zero timestamp is never issued: on the persistent store it marks an
/// empty log slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[cfg_attr(feature = "deserialize", derive(serde::Deserialize))]
pub struct Timestamp(u32);

impl Timestamp {
    /// The empty-slot marker.
    pub const ZERO: Self = Self(0);

    /// Creates a [`Timestamp`] from its raw representation.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Creates a [`Timestamp`] for the first sequence number of a second.
    #[must_use]
    pub const fn from_seconds(seconds: u32) -> Self {
        Self::compose(seconds, 0)
    }

    /// Returns the raw representation.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns the seconds component.
    #[must_use]
    pub const fn seconds(self) -> u32 {
        self.0 >> SEQUENCE_BITS
    }

    /// Returns the per-second sequence number.
    #[must_use]
    pub const fn sequence(self) -> u8 {
        (self.0 & SEQUENCE_MAX) as u8
    }

    /// Checks whether this is the empty-slot marker.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    const fn compose(seconds: u32, sequence: u32) -> Self {
        Self((seconds << SEQUENCE_BITS) | (sequence & SEQUENCE_MAX))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.seconds(), self.sequence())
    }
}

/// An elapsed-time source.
///
/// The clock restarts from zero at every power cycle.
pub trait Clock {
    /// Returns the number of whole seconds elapsed since the last restart.
    fn elapsed_secs(&self) -> u32;

    /// Blocks until [`Clock::elapsed_secs`] returns a value strictly greater
    /// than `current`.
    ///
    /// The wait lasts at most one second.
    fn wait_for_next_second(&mut self, current: u32);
}

/// A generator of strictly ascending [`Timestamp`]s.
///
/// The generator adds a time base to the elapsed seconds of its [`Clock`].
/// After an uncontrolled restart, [`TimestampGenerator::adjust`] moves the
/// time base past the most recent persisted timestamp, so that newly issued
/// timestamps keep ascending.
#[derive(Debug)]
pub struct TimestampGenerator<C> {
    clock: C,
    base: u32,
    last_seconds: Option<u32>,
    sequence: u32,
}

impl<C: Clock> TimestampGenerator<C> {
    /// Creates a [`TimestampGenerator`] with a zero time base.
    #[must_use]
    pub const fn new(clock: C) -> Self {
        Self {
            clock,
            base: 0,
            last_seconds: None,
            sequence: 0,
        }
    }

    /// Returns the underlying [`Clock`].
    #[must_use]
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Returns the underlying [`Clock`] mutably.
    #[must_use]
    pub const fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    /// Returns the current time base.
    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// Returns the seconds component the next timestamp would carry,
    /// without issuing it.
    ///
    /// Saturates at [`SECONDS_MAX`].
    #[must_use]
    pub fn now_secs(&self) -> u32 {
        self.base
            .saturating_add(self.clock.elapsed_secs())
            .min(SECONDS_MAX)
    }

    /// Checks whether the seconds component has reached [`SECONDS_MAX`].
    ///
    /// Once exhausted, timestamps stop ascending until the time base is
    /// reset.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.now_secs() == SECONDS_MAX
    }

    /// Issues the next timestamp.
    ///
    /// # Blocking
    ///
    /// When all the sequence numbers of the current second have already been
    /// issued, this call blocks until the next second boundary (at most one
    /// second) before returning.
    ///
    /// Once [`TimestampGenerator::is_exhausted`], the last sequence number of
    /// [`SECONDS_MAX`] is issued again without blocking.
    pub fn timestamp(&mut self) -> Timestamp {
        let mut seconds = self.now_secs();

        if let Some(last) = self.last_seconds
            && seconds <= last
        {
            if self.sequence < SEQUENCE_MAX {
                self.sequence += 1;
                return Timestamp::compose(last, self.sequence);
            }
            if last == SECONDS_MAX {
                warn!("Timestamp range exhausted, repeating {SECONDS_MAX}");
                return Timestamp::compose(last, self.sequence);
            }

            while seconds <= last {
                let elapsed = self.clock.elapsed_secs();
                self.clock.wait_for_next_second(elapsed);
                seconds = self.now_secs();
            }
        }

        // Second zero starts at sequence one, zero marks an empty slot.
        self.sequence = u32::from(seconds == 0);
        self.last_seconds = Some(seconds);

        Timestamp::compose(seconds, self.sequence)
    }

    /// Moves the time base past the most recent persisted timestamp.
    ///
    /// Called once at startup with the timestamp recovered from the log.
    /// When the recovered seconds are not behind the live clock, the time
    /// base becomes the recovered seconds plus one. Otherwise the live
    /// clock is already ahead and the time base is reset.
    pub fn adjust(&mut self, most_recent: Timestamp) {
        let recovered = most_recent.seconds();
        let live = self.clock.elapsed_secs();

        if recovered >= live {
            self.base = recovered.saturating_add(1);
            self.last_seconds = None;
            self.sequence = 0;
        } else {
            self.reset();
        }
    }

    /// Resets the time base to zero.
    ///
    /// Used when no prior timestamp exists, as for a freshly cleared log.
    pub fn reset(&mut self) {
        self.base = 0;
        self.last_seconds = None;
        self.sequence = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::{SECONDS_MAX, SEQUENCE_BITS, Timestamp, TimestampGenerator};

    use crate::testing::ManualClock;

    #[test]
    fn test_timestamp_components() {
        let timestamp = Timestamp::from_raw((42 << SEQUENCE_BITS) | 7);

        assert_eq!(timestamp.seconds(), 42);
        assert_eq!(timestamp.sequence(), 7);
        assert_eq!(Timestamp::from_seconds(42).sequence(), 0);
        assert!(Timestamp::ZERO.is_zero());
    }

    #[test]
    fn test_never_issues_zero() {
        let mut generator = TimestampGenerator::new(ManualClock::new(0));

        let first = generator.timestamp();
        assert!(!first.is_zero());
        assert_eq!(first.seconds(), 0);
        assert_eq!(first.sequence(), 1);
    }

    #[test]
    fn test_sequence_within_a_second() {
        let mut generator = TimestampGenerator::new(ManualClock::new(10));

        for expected in 0..16 {
            let timestamp = generator.timestamp();
            assert_eq!(timestamp.seconds(), 10);
            assert_eq!(u32::from(timestamp.sequence()), expected);
        }
        assert_eq!(generator.clock().waits, 0);

        generator.clock_mut().advance(1);
        let timestamp = generator.timestamp();
        assert_eq!(timestamp.seconds(), 11);
        assert_eq!(timestamp.sequence(), 0);
    }

    #[test]
    fn test_blocks_when_sequence_is_exhausted() {
        let mut generator = TimestampGenerator::new(ManualClock::new(3));

        let mut previous = generator.timestamp();
        for _ in 0..40 {
            let next = generator.timestamp();
            assert!(next > previous);
            previous = next;
        }

        // 41 timestamps starting at second 3: two waits for the boundary.
        assert_eq!(generator.clock().waits, 2);
        assert_eq!(previous.seconds(), 5);
    }

    #[test]
    fn test_saturates_at_the_last_second() {
        let mut generator = TimestampGenerator::new(ManualClock::new(SECONDS_MAX - 1));
        let before = generator.timestamp();
        assert!(!generator.is_exhausted());

        generator.clock_mut().advance(1);
        assert!(generator.is_exhausted());
        let mut last = generator.timestamp();
        assert!(last > before);
        assert_eq!(last.seconds(), SECONDS_MAX);

        // Past the range the seconds saturate instead of wrapping to zero.
        generator.clock_mut().advance(1);
        for _ in 0..20 {
            let next = generator.timestamp();
            assert!(!next.is_zero());
            assert!(next >= last);
            last = next;
        }
        assert_eq!(last, Timestamp::from_raw(u32::MAX));
        assert_eq!(generator.clock().waits, 0);
    }

    #[test]
    fn test_monotonic_across_restart() {
        let mut generator = TimestampGenerator::new(ManualClock::new(100));
        let mut last = generator.timestamp();
        for step in 0..50 {
            if step % 7 == 0 {
                generator.clock_mut().advance(1);
            }
            let next = generator.timestamp();
            assert!(next > last);
            last = next;
        }

        // The elapsed clock restarts from zero.
        let mut restarted = TimestampGenerator::new(ManualClock::new(0));
        restarted.adjust(last);

        for step in 0..50 {
            if step % 5 == 0 {
                restarted.clock_mut().advance(1);
            }
            let next = restarted.timestamp();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_adjust_when_live_clock_is_ahead() {
        let mut generator = TimestampGenerator::new(ManualClock::new(500));
        generator.adjust(Timestamp::from_seconds(20));

        assert_eq!(generator.base(), 0);
        assert_eq!(generator.timestamp().seconds(), 500);
    }

    #[test]
    fn test_adjust_when_recovered_is_not_behind() {
        let mut generator = TimestampGenerator::new(ManualClock::new(20));
        generator.adjust(Timestamp::from_seconds(20));

        assert_eq!(generator.base(), 21);
        assert_eq!(generator.timestamp().seconds(), 41);
    }

    #[test]
    fn test_reset() {
        let mut generator = TimestampGenerator::new(ManualClock::new(7));
        generator.adjust(Timestamp::from_seconds(1000));
        generator.reset();

        assert_eq!(generator.base(), 0);
        assert_eq!(generator.timestamp().seconds(), 7);
    }
}
