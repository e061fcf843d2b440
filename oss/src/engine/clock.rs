// OSS — ENGINE: LOGICAL CLOCK
// LogicalTime value type plus the two shared-memory cells built on it:
// SharedClock (single writer, many readers) and Mailbox (one pending report).
//
// Both cells hold the (seconds, nanoseconds) pair packed into ONE AtomicU64,
// so a reader can never observe seconds from one tick and nanoseconds from
// another. Packed order == lexicographic order on (seconds, nanoseconds).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::sem::{BinarySemaphore, CriticalSection};

pub const NANOS_PER_SECOND: u32 = 1_000_000_000;

// ============================================================================
// LOGICAL TIME
// ============================================================================

/// Simulated time. `nanos` is always in `[0, NANOS_PER_SECOND)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogicalTime {
    // Field order matters: derived Ord compares seconds first.
    seconds: u32,
    nanos: u32,
}

impl LogicalTime {
    pub const ZERO: LogicalTime = LogicalTime { seconds: 0, nanos: 0 };

    /// Build a time, carrying any whole seconds out of `nanos`.
    pub fn new(seconds: u32, nanos: u32) -> Self {
        LogicalTime::ZERO.advance(seconds as u64 * NANOS_PER_SECOND as u64 + nanos as u64)
    }

    #[inline(always)] pub fn seconds(&self) -> u32 { self.seconds }
    #[inline(always)] pub fn nanos(&self) -> u32 { self.nanos }
    #[inline(always)] pub fn is_zero(&self) -> bool { *self == LogicalTime::ZERO }

    /// `self + duration_ns`, renormalized. Seconds saturate at `u32::MAX`.
    pub fn advance(self, duration_ns: u64) -> LogicalTime {
        let total = self.nanos as u64 + duration_ns;
        let carry = total / NANOS_PER_SECOND as u64;
        let nanos = (total % NANOS_PER_SECOND as u64) as u32;
        let seconds = (self.seconds as u64 + carry).min(u32::MAX as u64) as u32;
        LogicalTime { seconds, nanos }
    }

    #[inline(always)]
    pub fn pack(self) -> u64 { ((self.seconds as u64) << 32) | self.nanos as u64 }

    /// Inverse of `pack`. Out-of-range nanoseconds are renormalized.
    #[inline(always)]
    pub fn unpack(word: u64) -> LogicalTime {
        let seconds = (word >> 32) as u32;
        let nanos = word as u32;
        if nanos < NANOS_PER_SECOND { LogicalTime { seconds, nanos } } else { LogicalTime::new(seconds, nanos) }
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

// ============================================================================
// SHARED CLOCK
// ============================================================================

/// The simulated clock as laid out in shared memory. All-zero bytes is a
/// valid value (time 0.000000000), which is what `shmget` hands back.
#[repr(C)]
#[derive(Debug, Default)]
pub struct SharedClock { packed: AtomicU64 }

impl SharedClock {
    pub const fn new() -> Self { SharedClock { packed: AtomicU64::new(0) } }

    #[inline(always)]
    pub fn now(&self) -> LogicalTime { LogicalTime::unpack(self.packed.load(Ordering::Acquire)) }

    /// Advance by `step_ns` and return the new time.
    /// Single-writer: only the orchestrator calls this, so load+store is not a lost update.
    #[inline(always)]
    pub fn tick(&self, step_ns: u32) -> LogicalTime {
        let next = self.now().advance(step_ns as u64);
        self.packed.store(next.pack(), Ordering::Release);
        next
    }

    pub fn set(&self, time: LogicalTime) { self.packed.store(time.pack(), Ordering::Release); }

    /// True once the clock has reached or passed `target`.
    #[inline(always)]
    pub fn has_reached(&self, target: LogicalTime) -> bool { self.now() >= target }
}

// ============================================================================
// MAILBOX
// ============================================================================

/// One-slot completion report. `0.000000000` is the empty sentinel.
/// Every access goes through a live `CriticalSection`, so the
/// check-then-write of a report can never interleave with another writer.
#[repr(C)]
#[derive(Debug, Default)]
pub struct Mailbox { packed: AtomicU64 }

impl Mailbox {
    pub const fn new() -> Self { Mailbox { packed: AtomicU64::new(0) } }

    pub fn peek<L: BinarySemaphore + ?Sized>(&self, _cs: &CriticalSection<'_, L>) -> Option<LogicalTime> {
        let t = LogicalTime::unpack(self.packed.load(Ordering::Acquire));
        if t.is_zero() { None } else { Some(t) }
    }

    pub fn is_empty<L: BinarySemaphore + ?Sized>(&self, cs: &CriticalSection<'_, L>) -> bool {
        self.peek(cs).is_none()
    }

    /// Deposit a report. Refuses (returns false) when a report is already pending
    /// or when `at` is the empty sentinel.
    pub fn post<L: BinarySemaphore + ?Sized>(&self, cs: &CriticalSection<'_, L>, at: LogicalTime) -> bool {
        if at.is_zero() || !self.is_empty(cs) { return false; }
        self.packed.store(at.pack(), Ordering::Release);
        true
    }

    /// Harvest: return the pending report (if any) and leave the slot empty.
    pub fn take<L: BinarySemaphore + ?Sized>(&self, _cs: &CriticalSection<'_, L>) -> Option<LogicalTime> {
        let t = LogicalTime::unpack(self.packed.swap(0, Ordering::AcqRel));
        if t.is_zero() { None } else { Some(t) }
    }

    /// Reset to empty outside the lock. Only valid before any worker exists.
    pub fn clear_unshared(&self) { self.packed.store(0, Ordering::Release); }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_and_a_half_seconds_from_zero() {
        let end = LogicalTime::ZERO.advance(1_500_000_000);
        assert_eq!(end, LogicalTime::new(1, 500_000_000));
        assert_eq!(end.seconds(), 1);
        assert_eq!(end.nanos(), 500_000_000);
    }

    #[test]
    fn advance_renormalizes() {
        let starts = [(0, 0), (0, 999_999_999), (3, 1), (7, 500_000_000)];
        let durations = [0u64, 1, 2, 999_999_999, 1_000_000_000, 10_000_000, 2_500_000_001];
        for &(s, n) in &starts {
            let start = LogicalTime::new(s, n);
            for &d in &durations {
                let end = start.advance(d);
                assert!(end.nanos() < NANOS_PER_SECOND);
                let carry = (n as u64 + d) / NANOS_PER_SECOND as u64;
                assert_eq!(end.seconds() as u64, s as u64 + carry, "start={} d={}", start, d);
            }
        }
    }

    #[test]
    fn new_carries_excess_nanos() {
        assert_eq!(LogicalTime::new(1, 2_000_000_005), LogicalTime::new(3, 5));
    }

    #[test]
    fn ordering_is_lexicographic() {
        assert!(LogicalTime::new(1, 0) > LogicalTime::new(0, 999_999_999));
        assert!(LogicalTime::new(2, 5) < LogicalTime::new(2, 6));
        assert!(LogicalTime::new(2, 5).pack() < LogicalTime::new(2, 6).pack());
        assert!(LogicalTime::new(1, 0).pack() > LogicalTime::new(0, 999_999_999).pack());
    }

    #[test]
    fn display_pads_nanoseconds() {
        assert_eq!(LogicalTime::new(4, 7).to_string(), "4.000000007");
    }

    #[test]
    fn clock_tick_wraps_at_one_second() {
        let clock = SharedClock::new();
        clock.set(LogicalTime::new(0, 999_999_999));
        let t = clock.tick(2);
        assert_eq!(t, LogicalTime::new(1, 1));
        assert_eq!(clock.now(), t);
        assert!(clock.has_reached(LogicalTime::new(1, 1)));
        assert!(!clock.has_reached(LogicalTime::new(1, 2)));
    }

    #[test]
    fn zeroed_memory_is_time_zero() {
        // SAFETY: SharedClock is repr(C) over one AtomicU64; all-zero bytes is a valid value.
        let clock: SharedClock = unsafe { std::mem::zeroed() };
        assert_eq!(clock.now(), LogicalTime::ZERO);
    }
}
