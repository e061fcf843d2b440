// OSS — ENGINE: MUTUAL EXCLUSION
// System V binary semaphore shared by the orchestrator and every worker.
//
// acquire/release are each ONE semop(2) call: the kernel does the
// test-and-decrement atomically, so there is no load-then-store window.
// SEM_UNDO makes the kernel hand the unit back if a holder dies mid-section.

use std::io;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Resource, Result};

// ============================================================================
// TRAIT + GUARD
// ============================================================================

/// A counting semaphore used with values {0, 1}.
pub trait BinarySemaphore {
    /// Block until the counter is positive, then decrement it.
    fn acquire(&self) -> Result<()>;
    /// Increment the counter. Never blocks.
    fn release(&self) -> Result<()>;

    /// Acquire and return a guard that releases on drop.
    fn lock(&self) -> Result<CriticalSection<'_, Self>> {
        self.acquire()?;
        Ok(CriticalSection { sem: self })
    }
}

/// Proof that the caller currently holds the semaphore.
/// Mailbox mutators take `&CriticalSection` so they cannot be called unlocked.
#[must_use = "dropping the guard immediately releases the semaphore"]
pub struct CriticalSection<'a, L: BinarySemaphore + ?Sized> { sem: &'a L }

impl<L: BinarySemaphore + ?Sized> Drop for CriticalSection<'_, L> {
    fn drop(&mut self) {
        if let Err(e) = self.sem.release() {
            tracing::warn!(error = %e, "semaphore release failed");
        }
    }
}

// ============================================================================
// SYSTEM V IMPLEMENTATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemId(pub i32);

impl std::fmt::Display for SemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}

impl FromStr for SemId {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> { s.trim().parse().map(SemId) }
}

#[derive(Debug)]
pub struct SysvSemaphore {
    id: SemId,
    removed: AtomicBool,
}

impl SysvSemaphore {
    /// `semget(IPC_PRIVATE)`. The counter starts at 0 until `initialize`.
    pub fn create() -> Result<Self> {
        // SAFETY: semget takes only integer arguments and touches no caller memory.
        let id = unsafe { libc::semget(libc::IPC_PRIVATE, 1, libc::IPC_CREAT | libc::IPC_EXCL | 0o600) };
        if id < 0 {
            return Err(Error::ResourceExhausted { resource: Resource::Semaphore, source: io::Error::last_os_error() });
        }
        Ok(SysvSemaphore { id: SemId(id), removed: AtomicBool::new(false) })
    }

    /// Set the counter to 1 ("free").
    pub fn initialize(&self) -> Result<()> {
        // SAFETY: SETVAL reads its 4th argument as an int (the `val` member of union semun).
        let rc = unsafe { libc::semctl(self.id.0, 0, libc::SETVAL, 1 as libc::c_int) };
        if rc < 0 { return Err(self.os_error()); }
        Ok(())
    }

    /// Attach to a semaphore created by another process. Validates the id with GETVAL.
    pub fn open(id: SemId) -> Result<Self> {
        // SAFETY: GETVAL ignores the variadic argument; integer-only syscall.
        if unsafe { libc::semctl(id.0, 0, libc::GETVAL) } < 0 {
            return Err(Error::AttachFailure {
                resource: Resource::Semaphore, id: id.0, source: io::Error::last_os_error(),
            });
        }
        Ok(SysvSemaphore { id, removed: AtomicBool::new(false) })
    }

    #[inline(always)] pub fn id(&self) -> SemId { self.id }

    /// Current counter value (`GETVAL`).
    pub fn value(&self) -> Result<i32> {
        // SAFETY: GETVAL ignores the variadic argument; integer-only syscall.
        let v = unsafe { libc::semctl(self.id.0, 0, libc::GETVAL) };
        if v < 0 { return Err(self.os_error()); }
        Ok(v)
    }

    /// Remove the semaphore. Idempotent: a second call is a no-op.
    pub fn destroy(&self) {
        if self.removed.swap(true, Ordering::AcqRel) { return; }
        remove_semaphore(self.id);
    }

    fn semop(&self, delta: libc::c_short) -> Result<()> {
        let mut op = libc::sembuf { sem_num: 0, sem_op: delta, sem_flg: libc::SEM_UNDO as libc::c_short };
        loop {
            // SAFETY: `op` is a valid sembuf on our stack and nsops == 1.
            let rc = unsafe { libc::semop(self.id.0, &mut op, 1) };
            if rc == 0 { return Ok(()); }
            let err = io::Error::last_os_error();
            // Signal delivery (SIGCHLD, SIGALRM) interrupts a blocked semop; just retry.
            if err.raw_os_error() == Some(libc::EINTR) { continue; }
            return Err(classify(self.id, err));
        }
    }

    fn os_error(&self) -> Error { classify(self.id, io::Error::last_os_error()) }
}

impl BinarySemaphore for SysvSemaphore {
    fn acquire(&self) -> Result<()> { self.semop(-1) }
    fn release(&self) -> Result<()> { self.semop(1) }
}

fn classify(id: SemId, err: io::Error) -> Error {
    match err.raw_os_error() {
        Some(libc::EIDRM) | Some(libc::EINVAL) => Error::SemaphoreRemoved(id.0),
        _ => Error::Semaphore { id: id.0, source: err },
    }
}

/// Remove a semaphore by id. Returns false if it was already gone.
/// Safe to call from the panic hook and more than once.
pub fn remove_semaphore(id: SemId) -> bool {
    // SAFETY: IPC_RMID ignores the variadic argument; integer-only syscall.
    unsafe { libc::semctl(id.0, 0, libc::IPC_RMID) == 0 }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn fresh() -> SysvSemaphore {
        let sem = SysvSemaphore::create().expect("semget");
        sem.initialize().expect("SETVAL");
        sem
    }

    #[test]
    fn initialize_sets_free() {
        let sem = fresh();
        assert_eq!(sem.value().unwrap(), 1);
        sem.destroy();
    }

    #[test]
    fn guard_releases_on_drop() {
        let sem = fresh();
        {
            let _cs = sem.lock().unwrap();
            assert_eq!(sem.value().unwrap(), 0);
        }
        assert_eq!(sem.value().unwrap(), 1);
        sem.destroy();
    }

    #[test]
    fn destroy_is_idempotent() {
        let sem = fresh();
        let id = sem.id();
        sem.destroy();
        sem.destroy();
        assert!(!remove_semaphore(id));
        assert!(matches!(sem.acquire(), Err(Error::SemaphoreRemoved(_))));
    }

    #[test]
    fn open_rejects_unknown_id() {
        let sem = fresh();
        let id = sem.id();
        sem.destroy();
        assert!(matches!(SysvSemaphore::open(id), Err(Error::AttachFailure { .. })));
    }

    #[test]
    fn counter_stays_binary_under_contention() {
        const THREADS: usize = 8;
        const ROUNDS: u32 = 500;
        let sem = Arc::new(fresh());
        let inside = Arc::new(AtomicU32::new(0));
        let handles: Vec<_> = (0..THREADS).map(|_| {
            let sem = sem.clone();
            let inside = inside.clone();
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let _cs = sem.lock().unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0, "two holders at once");
                    let v = sem.value().unwrap();
                    assert_eq!(v, 0);
                    inside.fetch_sub(1, Ordering::SeqCst);
                }
            })
        }).collect();
        for h in handles { h.join().unwrap(); }
        assert_eq!(sem.value().unwrap(), 1);
        sem.destroy();
    }
}
