// OSS — ENGINE: SESSION RESOURCES
// The three IPC objects one simulation run shares between the orchestrator
// and its workers: clock segment, mailbox segment, semaphore.
//
// Teardown is idempotent and can run from three places: the normal drain
// path, the watchdog/interrupt abort path, and the panic hook. The panic hook
// only knows the ids (published in SESSION_IDS), so removal-by-id is the
// primitive everything else is built on.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::engine::clock::{Mailbox, SharedClock};
use crate::engine::sem::{remove_semaphore, BinarySemaphore, SemId, SysvSemaphore};
use crate::engine::shm::{create_segment, remove_segment, Mapped, SegmentId};
use crate::error::{Resource, Result};

/// The three identifiers a worker receives on its command line, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandles {
    pub clock: SegmentId,
    pub mailbox: SegmentId,
    pub semaphore: SemId,
}

impl SessionHandles {
    /// Positional arguments for a worker: `clock mailbox semaphore`.
    pub fn to_args(&self) -> [String; 3] {
        [self.clock.to_string(), self.mailbox.to_string(), self.semaphore.to_string()]
    }
}

/// Everything the orchestrator needs from the shared state of a run.
pub trait Session {
    type Lock: BinarySemaphore;

    fn clock(&self) -> &SharedClock;
    fn mailbox(&self) -> &Mailbox;
    fn lock(&self) -> &Self::Lock;
    fn handles(&self) -> SessionHandles;
    /// Destroy the shared resources. Must be idempotent.
    fn release(&self);
}

// ============================================================================
// PANIC-HOOK REGISTRY
// ============================================================================

const NO_ID: i32 = -1;

struct SessionIds { clock: AtomicI32, mailbox: AtomicI32, semaphore: AtomicI32 }

static SESSION_IDS: SessionIds = SessionIds {
    clock: AtomicI32::new(NO_ID),
    mailbox: AtomicI32::new(NO_ID),
    semaphore: AtomicI32::new(NO_ID),
};

/// Remove whatever session resources are still registered. Lock-free and
/// allocation-free; callable from a panic hook. Each id is swapped out
/// before removal so concurrent callers never remove the same id twice.
pub fn release_registered() {
    let clock = SESSION_IDS.clock.swap(NO_ID, Ordering::AcqRel);
    let mailbox = SESSION_IDS.mailbox.swap(NO_ID, Ordering::AcqRel);
    let sem = SESSION_IDS.semaphore.swap(NO_ID, Ordering::AcqRel);
    if clock != NO_ID { remove_segment(SegmentId(clock)); }
    if mailbox != NO_ID { remove_segment(SegmentId(mailbox)); }
    if sem != NO_ID { remove_semaphore(SemId(sem)); }
}

// ============================================================================
// SYSTEM V SESSION (orchestrator side)
// ============================================================================

pub struct SysvSession {
    clock: Mapped<SharedClock>,
    mailbox: Mapped<Mailbox>,
    sem: SysvSemaphore,
    released: AtomicBool,
}

impl SysvSession {
    /// Create, attach and initialize all three resources, and clear the mailbox.
    /// On any failure the pieces created so far are removed before returning.
    pub fn allocate() -> Result<Self> {
        let clock_id = create_segment::<SharedClock>(Resource::ClockSegment)?;
        SESSION_IDS.clock.store(clock_id.0, Ordering::Release);

        let built = Self::allocate_rest(clock_id);
        if built.is_err() { release_registered(); }
        built
    }

    fn allocate_rest(clock_id: SegmentId) -> Result<Self> {
        let mailbox_id = create_segment::<Mailbox>(Resource::MailboxSegment)?;
        SESSION_IDS.mailbox.store(mailbox_id.0, Ordering::Release);

        let sem = SysvSemaphore::create()?;
        SESSION_IDS.semaphore.store(sem.id().0, Ordering::Release);
        sem.initialize()?;

        let clock = Mapped::<SharedClock>::attach(clock_id, Resource::ClockSegment)?;
        let mailbox = Mapped::<Mailbox>::attach(mailbox_id, Resource::MailboxSegment)?;
        mailbox.clear_unshared();

        tracing::debug!(clock = %clock_id, mailbox = %mailbox_id, semaphore = %sem.id(), "session resources allocated");
        Ok(SysvSession { clock, mailbox, sem, released: AtomicBool::new(false) })
    }
}

impl Session for SysvSession {
    type Lock = SysvSemaphore;

    fn clock(&self) -> &SharedClock { &self.clock }
    fn mailbox(&self) -> &Mailbox { &self.mailbox }
    fn lock(&self) -> &SysvSemaphore { &self.sem }

    fn handles(&self) -> SessionHandles {
        SessionHandles { clock: self.clock.id(), mailbox: self.mailbox.id(), semaphore: self.sem.id() }
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) { return; }
        // Segments stay mapped in this process until drop; RMID only marks them.
        release_registered();
        self.sem.destroy();
        tracing::info!("shared memory and semaphore released");
    }
}

impl Drop for SysvSession {
    fn drop(&mut self) { self.release(); }
}

// ============================================================================
// TESTS
// ============================================================================
