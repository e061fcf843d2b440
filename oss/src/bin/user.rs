// OSS — Worker
// Attached to the orchestrator's session by the three ids on its command
// line. Waits out a random simulated duration, reports once, exits.
use anyhow::Context;
use clap::Parser;

use oss::config::WorkerArgs;
use oss::engine::clock::{Mailbox, SharedClock};
use oss::engine::runtime::{init_tracing, install_worker_handlers, EXIT_FAILURE, SIGNALS};
use oss::engine::sem::SysvSemaphore;
use oss::engine::shm::Mapped;
use oss::error::Resource;
use oss::worker::{Worker, WorkerOutcome};

fn run(args: WorkerArgs) -> anyhow::Result<WorkerOutcome> {
    install_worker_handlers().context("installing signal handlers")?;

    let clock = Mapped::<SharedClock>::attach(args.clock_segment_id, Resource::ClockSegment)?;
    let mailbox = Mapped::<Mailbox>::attach(args.message_segment_id, Resource::MailboxSegment)?;
    let sem = SysvSemaphore::open(args.semaphore_id)?;

    let outcome = Worker::new(&clock, &mailbox, &sem, SIGNALS.stop_flag())
        .run(&mut rand::thread_rng())
        .with_context(|| format!("worker {}", std::process::id()))?;

    mailbox.detach();
    clock.detach();
    Ok(outcome)
}

fn main() {
    let args = match WorkerArgs::try_parse() {
        Ok(a) => a,
        Err(e) => {
            let _ = e.print();
            std::process::exit(EXIT_FAILURE);
        }
    };
    init_tracing("warn");

    match run(args) {
        Ok(WorkerOutcome::Reported { at, attempts }) => {
            tracing::debug!(pid = std::process::id(), reported = %at, attempts, "reported");
        }
        Ok(WorkerOutcome::Stopped { attempts }) => {
            tracing::debug!(pid = std::process::id(), attempts, "stopped before reporting");
        }
        Err(e) => {
            eprintln!("user: {:#}", e);
            std::process::exit(EXIT_FAILURE);
        }
    }
}
