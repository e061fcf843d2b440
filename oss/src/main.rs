// OSS — Orchestrator
use clap::error::ErrorKind;
use clap::Parser;

use oss::config::Config;
use oss::engine::runtime::{
    arm_watchdog, disarm_watchdog, error_code, fatal, init_tracing, install_orchestrator_handlers,
    install_panic_cleanup, EXIT_FAILURE, E_LOG_OPEN, E_SIGNAL_SETUP, E_WATCHDOG_SETUP, SIGNALS,
};
use oss::engine::session::SysvSession;
use oss::harvest_log::HarvestLog;
use oss::orchestrator::Orchestrator;
use oss::process::ProcessPool;

fn main() {
    let config = match Config::try_parse() {
        Ok(c) => c,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(EXIT_FAILURE);
        }
    };
    init_tracing("info");

    let settings = match config.validate() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(config.invalid_exit_code());
        }
    };

    // Panic hook: remove the IPC resources even if the run loop unwinds.
    install_panic_cleanup("OSS");

    if let Err(e) = install_orchestrator_handlers() {
        fatal(E_SIGNAL_SETUP, &format!("sigaction failed: {}", e));
    }
    if let Err(e) = arm_watchdog(settings.watchdog_secs) {
        fatal(E_WATCHDOG_SETUP, &format!("setitimer failed: {}", e));
    }
    let log = match HarvestLog::create(&settings.log_file) {
        Ok(l) => l,
        Err(e) => fatal(E_LOG_OPEN, &format!("{}: {}", settings.log_file.display(), e)),
    };
    let session = match SysvSession::allocate() {
        Ok(s) => s,
        Err(e) => fatal(error_code(&e), &e.to_string()),
    };

    tracing::info!(
        workers = settings.params.population,
        sim_budget_secs = settings.params.sim_budget_secs,
        watchdog_secs = settings.watchdog_secs,
        log = %settings.log_file.display(),
        worker = %settings.worker.display(),
        "OSS starting"
    );

    let pool = ProcessPool::new(&settings.worker);
    let result = Orchestrator::new(settings.params, &session, pool, &SIGNALS, log).execute();
    disarm_watchdog();

    match result {
        Ok(report) if report.termination.is_abnormal() => {
            tracing::error!(termination = ?report.termination, clock = %report.final_time, "forced shutdown");
            drop(session);
            std::process::abort();
        }
        Ok(report) => {
            tracing::info!(completed = report.completed, clock = %report.final_time, "OSS finished");
        }
        Err(e) => {
            // drain has already released the session.
            drop(session);
            fatal(error_code(&e), &e.to_string());
        }
    }
}
