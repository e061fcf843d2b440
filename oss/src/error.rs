// OSS — ERROR TAXONOMY
// Config is the only variant raised before any IPC resource exists; every
// other variant is a failure reported by the OS.

use std::io;

/// Which System V object an operation was aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    ClockSegment,
    MailboxSegment,
    Semaphore,
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Resource::ClockSegment => "clock segment",
            Resource::MailboxSegment => "mailbox segment",
            Resource::Semaphore => "semaphore",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejected CLI value; `option` is spelled as on the command line.
    #[error("Invalid argument for option {option}")]
    Config { option: &'static str },

    /// The OS refused to create a segment or semaphore. Fatal for the orchestrator.
    #[error("failed to create {resource}: {source}")]
    ResourceExhausted { resource: Resource, #[source] source: io::Error },

    /// A worker could not map a handle it was given. Fatal for that worker only.
    #[error("failed to attach {resource} {id}: {source}")]
    AttachFailure { resource: Resource, id: i32, #[source] source: io::Error },

    /// The semaphore vanished under us (orchestrator teardown).
    #[error("semaphore {0} was removed")]
    SemaphoreRemoved(i32),

    #[error("semaphore {id} operation failed: {source}")]
    Semaphore { id: i32, #[source] source: io::Error },

    #[error("failed to spawn worker {program}: {source}")]
    Spawn { program: String, #[source] source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
