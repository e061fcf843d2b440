// OSS — CRATE ROOT (LIBRARY)
// A simulated clock shared between one orchestrator and a pool of workers.
//
// Module hierarchy:
//   engine/clock    — LogicalTime, SharedClock, Mailbox (packed atomics in SHM)
//   engine/sem      — binary semaphore trait, SysV implementation, critical sections
//   engine/shm      — SysV segment creation, attachment, removal
//   engine/session  — the three IPC resources as one unit, cleanup registry
//   engine/runtime  — signals, watchdog timer, fatal exit, logging
//   orchestrator    — Initializing → Running → Draining control loop
//   worker          — duration draw and report loop
//   process         — worker process pool
//   harvest_log     — per-harvest log file
//   config          — command-line surface of both binaries

pub mod config;
pub mod engine;
pub mod error;
pub mod harvest_log;
pub mod orchestrator;
pub mod process;
pub mod worker;

pub use error::{Error, Result};
