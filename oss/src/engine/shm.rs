// OSS — ENGINE: SHARED MEMORY SEGMENTS
// System V segments holding the SharedClock and the Mailbox.
//
// A segment is addressed by its shmid (a small integer that can be passed on
// a worker's command line). Each process maps it with its own shmat; the
// mapping is dropped with shmdt when the `Mapped` view goes out of scope.

use std::io;
use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;
use std::str::FromStr;

use crate::error::{Error, Resource, Result};

/// Marker for types that may live in a shared segment: `repr(C)`, no
/// pointers, and valid when every byte is zero (what shmget hands back).
///
/// # Safety
/// Implementors must satisfy all three properties above.
pub unsafe trait SharedLayout: Sync {}

// SAFETY: both are repr(C) wrappers over a single AtomicU64; zero == empty / time 0.
unsafe impl SharedLayout for crate::engine::clock::SharedClock {}
unsafe impl SharedLayout for crate::engine::clock::Mailbox {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(pub i32);

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}

impl FromStr for SegmentId {
    type Err = std::num::ParseIntError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> { s.trim().parse().map(SegmentId) }
}

/// Create a private segment sized for one `T`. The kernel zero-fills it.
pub fn create_segment<T: SharedLayout>(resource: Resource) -> Result<SegmentId> {
    // SAFETY: shmget takes only integer arguments and touches no caller memory.
    let id = unsafe { libc::shmget(libc::IPC_PRIVATE, mem::size_of::<T>(), libc::IPC_CREAT | libc::IPC_EXCL | 0o600) };
    if id < 0 {
        return Err(Error::ResourceExhausted { resource, source: io::Error::last_os_error() });
    }
    Ok(SegmentId(id))
}

/// Mark a segment for destruction. The kernel frees it once the last
/// process detaches. Returns false if it was already gone; never panics,
/// so it is safe to call twice and from the panic hook.
pub fn remove_segment(id: SegmentId) -> bool {
    // SAFETY: IPC_RMID with a null buf is valid; integer-only otherwise.
    unsafe { libc::shmctl(id.0, libc::IPC_RMID, std::ptr::null_mut()) == 0 }
}

// ============================================================================
// MAPPED VIEW
// ============================================================================

/// One process's mapping of a segment. Derefs to `&T`; never `&mut T`,
/// since other processes write the same bytes concurrently.
pub struct Mapped<T: SharedLayout> {
    id: SegmentId,
    ptr: NonNull<T>,
    _marker: PhantomData<T>,
}

// SAFETY: T: SharedLayout implies Sync and every field of T is atomic; the
// mapping itself may be handed to another thread.
unsafe impl<T: SharedLayout> Send for Mapped<T> {}
unsafe impl<T: SharedLayout> Sync for Mapped<T> {}

impl<T: SharedLayout> Mapped<T> {
    /// `shmat` the segment. Fails with `AttachFailure` on a bad or undersized id.
    pub fn attach(id: SegmentId, resource: Resource) -> Result<Self> {
        let attach_err = |source| Error::AttachFailure { resource, id: id.0, source };

        // SAFETY: shmid_ds is plain old data; IPC_STAT fills it in.
        let mut stat: libc::shmid_ds = unsafe { mem::zeroed() };
        // SAFETY: `stat` is a valid, writable shmid_ds.
        if unsafe { libc::shmctl(id.0, libc::IPC_STAT, &mut stat) } < 0 {
            return Err(attach_err(io::Error::last_os_error()));
        }
        if (stat.shm_segsz as usize) < mem::size_of::<T>() {
            return Err(attach_err(io::Error::from_raw_os_error(libc::EINVAL)));
        }

        // SAFETY: a null address lets the kernel choose the placement; flags 0 = read/write.
        let raw = unsafe { libc::shmat(id.0, std::ptr::null(), 0) };
        if raw as isize == -1 {
            return Err(attach_err(io::Error::last_os_error()));
        }
        match NonNull::new(raw as *mut T) {
            Some(ptr) => Ok(Mapped { id, ptr, _marker: PhantomData }),
            None => Err(attach_err(io::Error::from_raw_os_error(libc::EFAULT))),
        }
    }

    #[inline(always)] pub fn id(&self) -> SegmentId { self.id }

    /// `shmdt` now instead of at end of scope.
    pub fn detach(self) { drop(self) }
}

impl<T: SharedLayout> std::ops::Deref for Mapped<T> {
    type Target = T;
    // SAFETY: the pointer was returned by shmat for a segment at least
    // size_of::<T>() bytes long and stays mapped until drop.
    fn deref(&self) -> &T { unsafe { self.ptr.as_ref() } }
}

impl<T: SharedLayout> Drop for Mapped<T> {
    fn drop(&mut self) {
        // SAFETY: ptr came from shmat and Drop runs exactly once.
        unsafe { libc::shmdt(self.ptr.as_ptr() as *const libc::c_void); }
    }
}

// ============================================================================
// TESTS
// ============================================================================
