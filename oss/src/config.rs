// OSS — CONFIGURATION
// Command-line surface of both binaries. Parsing is clap's; -s/-t/-m take
// any text and read its numeric prefix, so a bad value reaches the range
// checks here and leaves through their exit status, never clap's.

use std::convert::Infallible;
use std::path::PathBuf;

use clap::Parser;

use crate::engine::clock::NANOS_PER_SECOND;
use crate::engine::sem::SemId;
use crate::engine::shm::SegmentId;
use crate::error::Error;
use crate::orchestrator::OrchestratorParams;

/// Operating System Simulator
#[derive(Debug, Clone, Parser)]
#[command(name = "oss", disable_version_flag = true)]
pub struct Config {
    /// The maximum number of user processes spawned.
    #[arg(short = 's', value_name = "INT", default_value_t = 5, value_parser = leading_int, allow_negative_numbers = true)]
    pub max_workers: i64,

    /// Specify the log file.
    #[arg(short = 'l', value_name = "PATH", default_value = "oss.out")]
    pub log_file: PathBuf,

    /// Time in seconds master will terminate itself and all children.
    #[arg(short = 't', value_name = "INT", default_value_t = 20, value_parser = leading_int, allow_negative_numbers = true)]
    pub max_run_time: i64,

    /// Simulated time in seconds master will terminate itself and all children.
    #[arg(short = 'm', value_name = "INT", default_value_t = 2, value_parser = leading_int, allow_negative_numbers = true)]
    pub max_sim_time: i64,

    /// Worker executable. Defaults to `user` next to this binary.
    #[arg(long = "worker", value_name = "PATH")]
    pub worker: Option<PathBuf>,

    /// Simulated nanoseconds added to the clock per loop iteration.
    #[arg(long = "tick", value_name = "NS", default_value_t = 2, allow_negative_numbers = true)]
    pub tick_ns: i64,

    /// Exit with status 1 instead of 0 when -s, -t or -m is out of range.
    #[arg(long = "strict-exit")]
    pub strict_exit: bool,
}

/// Validated, typed form of `Config`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub params: OrchestratorParams,
    pub watchdog_secs: u32,
    pub log_file: PathBuf,
    pub worker: PathBuf,
}

/// Numeric prefix of `arg`, as C's `atoi` reads it: leading blanks, an optional
/// sign, then digits up to the first non-digit. No digits at all reads as 0,
/// which the range check then rejects. Saturates instead of overflowing.
fn leading_int(arg: &str) -> Result<i64, Infallible> {
    let rest = arg.trim_start();
    let (negative, digits) = match rest.as_bytes().first() {
        Some(b'-') => (true, &rest[1..]),
        Some(b'+') => (false, &rest[1..]),
        _ => (false, rest),
    };
    let magnitude = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, d| acc.saturating_mul(10).saturating_add((d - b'0') as i64));
    Ok(if negative { -magnitude } else { magnitude })
}

fn positive(option: &'static str, value: i64) -> Result<u32, Error> {
    match u32::try_from(value) {
        Ok(v) if v >= 1 => Ok(v),
        _ => Err(Error::Config { option }),
    }
}

impl Config {
    /// Range-check in the order -s, -t, -m (first failure wins).
    pub fn validate(&self) -> Result<Settings, Error> {
        let workers = positive("-s", self.max_workers)?;
        let watchdog_secs = positive("-t", self.max_run_time)?;
        let sim_budget_secs = positive("-m", self.max_sim_time)?;
        let tick_ns = match positive("--tick", self.tick_ns)? {
            t if t < NANOS_PER_SECOND => t,
            _ => return Err(Error::Config { option: "--tick" }),
        };
        Ok(Settings {
            params: OrchestratorParams {
                population: workers as usize,
                completion_limit: workers as usize,
                sim_budget_secs,
                tick_ns,
            },
            watchdog_secs,
            log_file: self.log_file.clone(),
            worker: self.worker.clone().unwrap_or_else(default_worker_path),
        })
    }

    /// Exit status for an out-of-range value. The reference behavior is 0.
    pub fn invalid_exit_code(&self) -> i32 { if self.strict_exit { 1 } else { 0 } }
}

fn default_worker_path() -> PathBuf {
    std::env::current_exe()
        .map(|exe| exe.with_file_name("user"))
        .unwrap_or_else(|_| PathBuf::from("./user"))
}

// ============================================================================
// WORKER ARGUMENTS
// ============================================================================

/// Worker process for the operating system simulator
#[derive(Debug, Clone, Parser)]
#[command(name = "user", disable_version_flag = true)]
pub struct WorkerArgs {
    /// Shared clock segment id
    pub clock_segment_id: SegmentId,
    /// Mailbox segment id
    pub message_segment_id: SegmentId,
    /// Semaphore id
    pub semaphore_id: SemId,
}
