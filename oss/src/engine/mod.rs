// OSS — ENGINE MODULE
// The shared-memory substrate both processes attach to: the logical clock and
// mailbox, the semaphore guarding them, and the process-level runtime.
// Engine owns the IPC. The orchestrator and worker only borrow it.

pub mod clock;
pub mod runtime;
pub mod sem;
pub mod session;
pub mod shm;
