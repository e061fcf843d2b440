// OSS — WORKER PROCESSES
// The seam between the orchestrator's control loop and the OS process table.
// ProcessPool forks real `user` processes; tests plug in their own pool.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use crate::engine::session::SessionHandles;
use crate::error::{Error, Result};

/// How long terminate_all waits after SIGTERM before escalating to SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Code(i32),
    Signal(i32),
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ExitKind::Code(code),
            (None, Some(sig)) => ExitKind::Signal(sig),
            (None, None) => ExitKind::Code(-1),
        }
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::Code(c) => write!(f, "exit {}", c),
            ExitKind::Signal(s) => write!(f, "signal {}", s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub pid: u32,
    pub status: ExitKind,
}

/// Spawns workers and reports the ones that have exited.
pub trait WorkerPool {
    /// Start one worker for `slot`, handing it the session handles. Returns its pid.
    fn spawn(&mut self, slot: usize, handles: &SessionHandles) -> Result<u32>;
    /// Collect every worker that has exited since the last call. Never blocks.
    fn reap(&mut self) -> Vec<WorkerExit>;
    /// Stop and reap every live worker. Returns how many were stopped.
    fn terminate_all(&mut self) -> usize;
    fn live(&self) -> usize;
}

// ============================================================================
// REAL PROCESSES
// ============================================================================

pub struct ProcessPool {
    program: PathBuf,
    children: Vec<Child>,
}

impl ProcessPool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ProcessPool { program: program.into(), children: Vec::new() }
    }
}

impl WorkerPool for ProcessPool {
    fn spawn(&mut self, slot: usize, handles: &SessionHandles) -> Result<u32> {
        let child = Command::new(&self.program)
            .args(handles.to_args())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| Error::Spawn { program: self.program.display().to_string(), source })?;
        let pid = child.id();
        tracing::debug!(pid, slot, "worker spawned");
        self.children.push(child);
        Ok(pid)
    }

    fn reap(&mut self) -> Vec<WorkerExit> {
        let mut exits = Vec::new();
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                exits.push(WorkerExit { pid: child.id(), status: status.into() });
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(pid = child.id(), error = %e, "waitpid failed");
                true
            }
        });
        exits
    }

    fn terminate_all(&mut self) -> usize {
        let count = self.children.len();
        for child in &self.children {
            // SAFETY: pid belongs to a child we have not reaped yet, so it cannot have been recycled.
            unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM); }
        }
        let deadline = Instant::now() + TERMINATE_GRACE;
        while !self.children.is_empty() && Instant::now() < deadline {
            self.reap();
            std::thread::sleep(Duration::from_millis(5));
        }
        for mut child in self.children.drain(..) {
            tracing::warn!(pid = child.id(), "worker ignored SIGTERM, killing");
            let _ = child.kill();
            let _ = child.wait();
        }
        count
    }

    fn live(&self) -> usize { self.children.len() }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        if !self.children.is_empty() { self.terminate_all(); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sem::SemId;
    use crate::engine::shm::SegmentId;

    fn handles() -> SessionHandles {
        SessionHandles { clock: SegmentId(1), mailbox: SegmentId(2), semaphore: SemId(3) }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let mut pool = ProcessPool::new("/nonexistent/oss-user-binary");
        assert!(matches!(pool.spawn(0, &handles()), Err(Error::Spawn { .. })));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn reaps_exited_children_with_status() {
        let mut pool = ProcessPool::new("/bin/false");
        let pid = pool.spawn(0, &handles()).unwrap();
        let start = Instant::now();
        let mut exits = Vec::new();
        while exits.is_empty() && start.elapsed() < Duration::from_secs(5) {
            exits = pool.reap();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(exits, vec![WorkerExit { pid, status: ExitKind::Code(1) }]);
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn terminate_all_stops_long_running_children() {
        let mut pool = ProcessPool::new("/bin/sleep");
        // `sleep 1 2 3` sleeps for six seconds.
        pool.spawn(0, &handles()).unwrap();
        pool.spawn(1, &handles()).unwrap();
        assert_eq!(pool.terminate_all(), 2);
        assert_eq!(pool.live(), 0);
    }
}
