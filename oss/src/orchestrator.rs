// OSS — ORCHESTRATOR
// Initializing → Running → Draining as a compile-time typestate: each phase is
// a zero-sized marker and a transition consumes the orchestrator, so e.g. the
// tick loop cannot be re-entered after draining has begun. `drain` consumes the
// last state and hands back the RunReport; there is nothing left to terminate.
//
// Signal handlers never touch the session. They raise flags in SignalState;
// the Running loop drains those flags and does all harvesting and respawning
// synchronously, so every mailbox access happens on this one thread of control.

use std::io::Write;
use std::marker::PhantomData;

use crate::engine::clock::LogicalTime;
use crate::engine::runtime::SignalState;
use crate::engine::sem::BinarySemaphore;
use crate::engine::session::Session;
use crate::error::{Error, Result};
use crate::harvest_log::{Harvest, HarvestLog};
use crate::process::{ExitKind, WorkerExit, WorkerPool};

// ============================================================================
// PARAMETERS + OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorParams {
    /// Workers launched at start; also the number of slots kept busy.
    pub population: usize,
    /// Stop once this many workers have been harvested.
    pub completion_limit: usize,
    /// Stop once SharedClock.seconds reaches this value.
    pub sim_budget_secs: u32,
    /// Nanoseconds added to SharedClock per loop iteration.
    pub tick_ns: u32,
}

impl Default for OrchestratorParams {
    fn default() -> Self {
        OrchestratorParams { population: 5, completion_limit: 5, sim_budget_secs: 2, tick_ns: 2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    SimulatedTimeElapsed,
    CompletionLimit,
    Watchdog,
    Interrupted,
    /// A harvest or respawn hit an OS error; the error is returned by `drain`.
    Failed,
}

impl Termination {
    /// Watchdog and interrupt end the process with abort() after cleanup.
    pub fn is_abnormal(self) -> bool { matches!(self, Termination::Watchdog | Termination::Interrupted) }
}

/// Local bookkeeping for one live worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRecord {
    pub pid: u32,
    pub slot: usize,
}

#[derive(Debug)]
pub struct RunReport<W> {
    pub termination: Termination,
    pub completed: usize,
    pub final_time: LogicalTime,
    pub harvests: Vec<Harvest>,
    /// Workers still running at drain time and stopped by it.
    pub stopped: usize,
    pub log: W,
}

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

mod sealed { pub trait Sealed {} }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase { Initializing, Running, Draining }

pub trait RunState: sealed::Sealed {
    const PHASE: Phase;
}

#[derive(Debug)] pub struct Initializing;
#[derive(Debug)] pub struct Running;
#[derive(Debug)] pub struct Draining;

impl sealed::Sealed for Initializing {}
impl sealed::Sealed for Running {}
impl sealed::Sealed for Draining {}
impl RunState for Initializing { const PHASE: Phase = Phase::Initializing; }
impl RunState for Running { const PHASE: Phase = Phase::Running; }
impl RunState for Draining { const PHASE: Phase = Phase::Draining; }

// ============================================================================
// ORCHESTRATOR
// ============================================================================

pub struct Orchestrator<'a, S: Session, P: WorkerPool, W: Write, St: RunState> {
    params: OrchestratorParams,
    session: &'a S,
    pool: P,
    signals: &'a SignalState,
    log: HarvestLog<W>,
    records: Vec<WorkerRecord>,
    harvests: Vec<Harvest>,
    completed: usize,
    termination: Termination,
    failure: Option<Error>,
    _state: PhantomData<St>,
}

impl<'a, S: Session, P: WorkerPool, W: Write, St: RunState> Orchestrator<'a, S, P, W, St> {
    #[inline(always)] pub fn phase(&self) -> Phase { St::PHASE }
    #[inline(always)] pub fn completed(&self) -> usize { self.completed }
    pub fn records(&self) -> &[WorkerRecord] { &self.records }

    fn into_state<Next: RunState>(self) -> Orchestrator<'a, S, P, W, Next> {
        Orchestrator {
            params: self.params,
            session: self.session,
            pool: self.pool,
            signals: self.signals,
            log: self.log,
            records: self.records,
            harvests: self.harvests,
            completed: self.completed,
            termination: self.termination,
            failure: self.failure,
            _state: PhantomData,
        }
    }

    fn spawn_into(&mut self, slot: usize) -> Result<()> {
        let pid = self.pool.spawn(slot, &self.session.handles())?;
        self.records.push(WorkerRecord { pid, slot });
        Ok(())
    }

    fn fail(mut self, err: Error) -> Orchestrator<'a, S, P, W, Draining> {
        tracing::error!(error = %err, "orchestrator failure, draining");
        self.termination = Termination::Failed;
        self.failure = Some(err);
        self.into_state()
    }
}

impl<'a, S: Session, P: WorkerPool, W: Write> Orchestrator<'a, S, P, W, Initializing> {
    /// `session` must already be allocated and attached; signal handlers and
    /// the watchdog are the caller's to install (they are process-global).
    pub fn new(params: OrchestratorParams, session: &'a S, pool: P, signals: &'a SignalState, log: HarvestLog<W>) -> Self {
        Orchestrator {
            params,
            session,
            pool,
            signals,
            log,
            records: Vec::new(),
            harvests: Vec::new(),
            completed: 0,
            termination: Termination::Failed,
            failure: None,
            _state: PhantomData,
        }
    }

    /// Clear the mailbox and launch the initial population. Any failure drains
    /// immediately: there is no partial-success mode.
    pub fn launch(mut self) -> std::result::Result<Orchestrator<'a, S, P, W, Running>, Orchestrator<'a, S, P, W, Draining>> {
        let session = self.session;
        let cleared = session.lock().lock().map(|cs| { session.mailbox().take(&cs); });
        if let Err(e) = cleared { return Err(self.fail(e)); }
        for slot in 0..self.params.population {
            if let Err(e) = self.spawn_into(slot) {
                return Err(self.fail(e));
            }
        }
        tracing::info!(population = self.params.population, handles = ?self.session.handles(), "workers launched");
        Ok(self.into_state())
    }

    /// launch → run → drain.
    pub fn execute(self) -> Result<RunReport<W>> {
        match self.launch() {
            Ok(running) => running.run().drain(),
            Err(draining) => draining.drain(),
        }
    }
}

impl<'a, S: Session, P: WorkerPool, W: Write> Orchestrator<'a, S, P, W, Running> {
    /// The tight loop: advance the clock, service pending child exits, and stop
    /// on the first termination condition.
    pub fn run(mut self) -> Orchestrator<'a, S, P, W, Draining> {
        let session = self.session;
        let clock = session.clock();
        let termination = loop {
            if self.signals.watchdog_fired() { break Termination::Watchdog; }
            if self.signals.interrupted() { break Termination::Interrupted; }
            if self.signals.take_child_exit() {
                if let Err(e) = self.harvest_exited() { return self.fail(e); }
            }
            if self.completed >= self.params.completion_limit { break Termination::CompletionLimit; }
            let now = clock.tick(self.params.tick_ns);
            if now.seconds() >= self.params.sim_budget_secs { break Termination::SimulatedTimeElapsed; }
        };
        tracing::info!(?termination, completed = self.completed, clock = %clock.now(), "run loop finished");
        self.termination = termination;
        self.into_state()
    }

    fn harvest_exited(&mut self) -> Result<()> {
        for exit in self.pool.reap() {
            self.harvest_one(exit)?;
        }
        Ok(())
    }

    fn harvest_one(&mut self, exit: WorkerExit) -> Result<()> {
        // A worker that failed never posted, so a pending report belongs to
        // another child in the same reap batch and stays for its harvest.
        let (at, reported) = {
            let cs = self.session.lock().lock()?;
            let at = self.session.clock().now();
            match exit.status {
                ExitKind::Code(0) => (at, self.session.mailbox().take(&cs)),
                _ => (at, None),
            }
        };

        let Some(idx) = self.records.iter().position(|r| r.pid == exit.pid) else {
            tracing::warn!(pid = exit.pid, "exit from unknown worker ignored");
            return Ok(());
        };
        let slot = self.records.swap_remove(idx).slot;

        let harvest = Harvest { pid: exit.pid, slot, at, reported };
        self.log.record(&harvest)?;
        self.harvests.push(harvest);
        self.completed += 1;

        match (reported, exit.status) {
            (Some(r), _) => tracing::info!(pid = exit.pid, slot, clock = %at, reported = %r, "worker harvested"),
            (None, ExitKind::Code(0)) => tracing::warn!(pid = exit.pid, slot, "worker exited without reporting"),
            (None, status) => tracing::warn!(pid = exit.pid, slot, %status, "worker failed"),
        }

        if self.completed < self.params.completion_limit {
            self.spawn_into(slot)?;
        }
        Ok(())
    }
}

impl<'a, S: Session, P: WorkerPool, W: Write> Orchestrator<'a, S, P, W, Draining> {
    #[inline(always)] pub fn termination(&self) -> Termination { self.termination }

    /// Stop the remaining workers and release every shared resource, however
    /// draining was entered. Returns the failure if the run ended in one.
    pub fn drain(mut self) -> Result<RunReport<W>> {
        let stopped = self.pool.terminate_all();
        self.records.clear();
        let final_time = self.session.clock().now();
        self.session.release();
        tracing::info!(termination = ?self.termination, completed = self.completed, stopped, "terminated");

        if let Some(err) = self.failure.take() { return Err(err); }
        Ok(RunReport {
            termination: self.termination,
            completed: self.completed,
            final_time,
            harvests: self.harvests,
            stopped,
            log: self.log.into_inner(),
        })
    }
}
