// OSS — WORKER CYCLE
// attach → read start → draw duration → spin under the semaphore until the
// clock reaches the target and the mailbox is empty → post → done.
//
// The wait condition depends on a clock only the orchestrator advances, and
// a System V semaphore cannot notify on that, so the loop re-checks under the
// lock with a bounded backoff between attempts.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::Rng;

use crate::engine::clock::{LogicalTime, Mailbox, SharedClock};
use crate::engine::sem::BinarySemaphore;
use crate::error::{Error, Result};

/// Simulated run length of a worker, in nanoseconds.
pub const DURATION_RANGE_NS: RangeInclusive<u64> = 1..=10_000_000;

/// Draw a uniformly random duration from `DURATION_RANGE_NS`.
pub fn draw_duration<R: Rng + ?Sized>(rng: &mut R) -> u64 {
    rng.gen_range(DURATION_RANGE_NS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Report written. `at` is the clock value seen in the reporting critical
    /// section; `attempts` counts critical sections entered, including that one.
    Reported { at: LogicalTime, attempts: u64 },
    /// Told to stop (SIGTERM/SIGHUP or semaphore removed) before reporting.
    Stopped { attempts: u64 },
}

// ============================================================================
// BACKOFF
// ============================================================================

/// Spin hints for the first few misses, then yield the CPU each time.
#[derive(Debug, Default)]
struct Backoff { step: u32 }

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    fn snooze(&mut self) {
        if self.step < Self::SPIN_LIMIT {
            for _ in 0..(1u32 << self.step) { std::hint::spin_loop(); }
            self.step += 1;
        } else {
            std::thread::yield_now();
        }
    }
}

// ============================================================================
// WORKER
// ============================================================================

pub struct Worker<'a, L: BinarySemaphore + ?Sized> {
    clock: &'a SharedClock,
    mailbox: &'a Mailbox,
    lock: &'a L,
    stop: &'a AtomicBool,
}

impl<'a, L: BinarySemaphore + ?Sized> Worker<'a, L> {
    pub fn new(clock: &'a SharedClock, mailbox: &'a Mailbox, lock: &'a L, stop: &'a AtomicBool) -> Self {
        Worker { clock, mailbox, lock, stop }
    }

    /// Target completion time for a worker starting now.
    pub fn target_after(&self, duration_ns: u64) -> LogicalTime {
        self.clock.now().advance(duration_ns)
    }

    /// Spin until the report is posted or a stop is requested.
    pub fn run_until(&self, target: LogicalTime) -> Result<WorkerOutcome> {
        let mut attempts = 0u64;
        let mut backoff = Backoff::default();
        loop {
            if self.stop.load(Ordering::Acquire) {
                return Ok(WorkerOutcome::Stopped { attempts });
            }
            let cs = match self.lock.lock() {
                Ok(cs) => cs,
                Err(Error::SemaphoreRemoved(_)) => return Ok(WorkerOutcome::Stopped { attempts }),
                Err(e) => return Err(e),
            };
            // A stop can land while semop is blocked; it wins over a late report.
            if self.stop.load(Ordering::Acquire) {
                return Ok(WorkerOutcome::Stopped { attempts });
            }
            attempts += 1;
            let now = self.clock.now();
            if now >= target && self.mailbox.post(&cs, now) {
                return Ok(WorkerOutcome::Reported { at: now, attempts });
            }
            drop(cs);
            backoff.snooze();
        }
    }

    /// Full cycle: draw a duration, compute the target, wait, report.
    pub fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<WorkerOutcome> {
        let duration = draw_duration(rng);
        let target = self.target_after(duration);
        tracing::debug!(start = %self.clock.now(), duration, target = %target, "worker waiting");
        self.run_until(target)
    }
}

// ============================================================================
// TESTS
// ============================================================================
