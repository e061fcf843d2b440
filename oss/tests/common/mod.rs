// Shared fixtures: a heap-backed session and a thread-backed worker pool.
// Threads run the same Worker cycle as the `user` binary against the same
// clock, mailbox and (real SysV) semaphore the orchestrator uses.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use oss::engine::clock::{Mailbox, SharedClock};
use oss::engine::runtime::SignalState;
use oss::engine::sem::SysvSemaphore;
use oss::engine::session::{Session, SessionHandles};
use oss::engine::shm::SegmentId;
use oss::error::{Error, Result};
use oss::process::{ExitKind, WorkerExit, WorkerPool};
use oss::worker::Worker;

pub struct Shared {
    pub clock: SharedClock,
    pub mailbox: Mailbox,
    pub sem: SysvSemaphore,
}

#[derive(Clone)]
pub struct HeapSession {
    pub shared: Arc<Shared>,
    releases: Arc<AtomicUsize>,
}

impl HeapSession {
    pub fn new() -> Self {
        let sem = SysvSemaphore::create().unwrap();
        sem.initialize().unwrap();
        HeapSession {
            shared: Arc::new(Shared { clock: SharedClock::new(), mailbox: Mailbox::new(), sem }),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn release_calls(&self) -> usize { self.releases.load(Ordering::Acquire) }
}

impl Session for HeapSession {
    type Lock = SysvSemaphore;

    fn clock(&self) -> &SharedClock { &self.shared.clock }
    fn mailbox(&self) -> &Mailbox { &self.shared.mailbox }
    fn lock(&self) -> &SysvSemaphore { &self.shared.sem }

    fn handles(&self) -> SessionHandles {
        SessionHandles { clock: SegmentId(0), mailbox: SegmentId(0), semaphore: self.shared.sem.id() }
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::AcqRel);
        self.shared.sem.destroy();
    }
}

struct Live {
    pid: u32,
    stop: Arc<AtomicBool>,
    handle: JoinHandle<bool>,
}

/// Every "process" is a thread; pids are synthetic and never reused.
pub struct ThreadPool {
    shared: Arc<Shared>,
    signals: Arc<SignalState>,
    live: Vec<Live>,
    finished: Arc<Mutex<Vec<u32>>>,
    next_pid: u32,
    fail_every: Option<usize>,
    /// `(pid, slot)` of every spawn, in order.
    pub spawn_log: Arc<Mutex<Vec<(u32, usize)>>>,
}

impl ThreadPool {
    pub fn new(session: &HeapSession, signals: Arc<SignalState>) -> Self {
        ThreadPool {
            shared: session.shared.clone(),
            signals,
            live: Vec::new(),
            finished: Arc::new(Mutex::new(Vec::new())),
            next_pid: 1000,
            fail_every: None,
            spawn_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every `n`th spawn exits with status 1 at once, without touching the session.
    pub fn failing_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n);
        self
    }
}

impl WorkerPool for ThreadPool {
    fn spawn(&mut self, slot: usize, _handles: &SessionHandles) -> Result<u32> {
        let pid = self.next_pid;
        self.next_pid += 1;
        let nth = {
            let mut log = self.spawn_log.lock().unwrap();
            log.push((pid, slot));
            log.len()
        };
        let fails = self.fail_every.is_some_and(|n| nth % n == 0);
        let stop = Arc::new(AtomicBool::new(false));
        let (shared, signals, finished, flag) =
            (self.shared.clone(), self.signals.clone(), self.finished.clone(), stop.clone());
        let handle = std::thread::spawn(move || {
            if fails {
                finished.lock().unwrap().push(pid);
                signals.notify_child_exit();
                return false;
            }
            let ok = Worker::new(&shared.clock, &shared.mailbox, &shared.sem, &flag)
                .run(&mut rand::thread_rng())
                .is_ok();
            finished.lock().unwrap().push(pid);
            signals.notify_child_exit();
            ok
        });
        self.live.push(Live { pid, stop, handle });
        Ok(pid)
    }

    fn reap(&mut self) -> Vec<WorkerExit> {
        let done: Vec<u32> = std::mem::take(&mut *self.finished.lock().unwrap());
        let mut exits = Vec::new();
        for pid in done {
            if let Some(idx) = self.live.iter().position(|l| l.pid == pid) {
                let live = self.live.swap_remove(idx);
                let ok = live.handle.join().unwrap();
                exits.push(WorkerExit { pid, status: ExitKind::Code(if ok { 0 } else { 1 }) });
            }
        }
        exits
    }

    fn terminate_all(&mut self) -> usize {
        let count = self.live.len();
        for live in &self.live { live.stop.store(true, Ordering::Release); }
        for live in self.live.drain(..) { let _ = live.handle.join(); }
        self.finished.lock().unwrap().clear();
        count
    }

    fn live(&self) -> usize { self.live.len() }
}

/// Hands out pids without starting anything; spawn number `limit + 1` fails.
/// Nothing it "starts" ever exits on its own.
pub struct LimitedPool {
    pub limit: usize,
    pub live: usize,
}

impl WorkerPool for LimitedPool {
    fn spawn(&mut self, _slot: usize, _handles: &SessionHandles) -> Result<u32> {
        if self.live == self.limit {
            return Err(Error::Spawn {
                program: "limited".into(),
                source: std::io::Error::from(std::io::ErrorKind::WouldBlock),
            });
        }
        self.live += 1;
        Ok(self.live as u32)
    }
    fn reap(&mut self) -> Vec<WorkerExit> { Vec::new() }
    fn terminate_all(&mut self) -> usize { std::mem::take(&mut self.live) }
    fn live(&self) -> usize { self.live }
}

/// Refuses to start anything.
pub struct BrokenPool;

impl WorkerPool for BrokenPool {
    fn spawn(&mut self, _slot: usize, _handles: &SessionHandles) -> Result<u32> {
        Err(Error::Spawn {
            program: "broken".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })
    }
    fn reap(&mut self) -> Vec<WorkerExit> { Vec::new() }
    fn terminate_all(&mut self) -> usize { 0 }
    fn live(&self) -> usize { 0 }
}
