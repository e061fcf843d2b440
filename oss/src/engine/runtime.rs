// OSS — ENGINE: RUNTIME MODULE
// Process-level plumbing shared by both binaries: fatal exit diagnostics,
// async-signal-safe event flags, signal handler installation, the wall-clock
// watchdog timer, and the panic hook that tears down IPC resources.

use std::io::{self, IsTerminal};
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::session::release_registered;
use crate::error::{Error, Resource};

// ============================================================================
// FATAL EXIT + DIAGNOSTIC ERROR CODES
// ============================================================================

// Convention: 0x10-0x1F = Boot (orchestrator), 0x20-0x2F = Runtime, 0x30-0x3F = Worker.
// The diagnostic code is printed; the process exit status is always 1.

pub const E_SIGNAL_SETUP: i32   = 0x10;
pub const E_WATCHDOG_SETUP: i32 = 0x11;
pub const E_SHM_ALLOC: i32      = 0x18;
pub const E_SEM_ALLOC: i32      = 0x19;
pub const E_LOG_OPEN: i32       = 0x1A;
pub const E_SPAWN: i32          = 0x20;
pub const E_SEM_OP: i32         = 0x21;
pub const E_USAGE: i32          = 0x30;
pub const E_ATTACH: i32         = 0x31;

pub const EXIT_FAILURE: i32 = 1;

/// Last-resort exit for both binaries. Removes whatever session resources are
/// still registered, prints `[OSS FATAL 0xHH] msg` to stderr as a single
/// writev() so lines from several processes never interleave, and exits with
/// `EXIT_FAILURE`. The diagnostic code is only printed, never the status.
#[inline(never)]
pub fn fatal(code: i32, msg: &str) -> ! {
    release_registered();
    let tag = fatal_tag(code);
    let newline = b"\n";
    let iov = [
        libc::iovec { iov_base: tag.as_ptr() as *mut _, iov_len: tag.len() },
        libc::iovec { iov_base: msg.as_ptr() as *mut _, iov_len: msg.len() },
        libc::iovec { iov_base: newline.as_ptr() as *mut _, iov_len: newline.len() },
    ];
    // SAFETY: fd 2 is stderr; every iovec points at a live buffer of the stated length.
    unsafe { libc::writev(libc::STDERR_FILENO, iov.as_ptr(), iov.len() as libc::c_int); }
    std::process::exit(EXIT_FAILURE);
}

/// `[OSS FATAL 0xHH] ` for the low byte of `code`, built on the stack.
fn fatal_tag(code: i32) -> [u8; 17] {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut tag = *b"[OSS FATAL 0x00] ";
    tag[13] = HEX[((code >> 4) & 0xF) as usize];
    tag[14] = HEX[(code & 0xF) as usize];
    tag
}

/// Diagnostic code for a library error.
pub fn error_code(err: &Error) -> i32 {
    match err {
        Error::ResourceExhausted { resource: Resource::Semaphore, .. } => E_SEM_ALLOC,
        Error::ResourceExhausted { .. } => E_SHM_ALLOC,
        Error::AttachFailure { .. } => E_ATTACH,
        Error::SemaphoreRemoved(_) | Error::Semaphore { .. } => E_SEM_OP,
        Error::Spawn { .. } => E_SPAWN,
        Error::Config { .. } => E_USAGE,
        Error::Io(_) => E_LOG_OPEN,
    }
}

// ============================================================================
// SIGNAL EVENTS
// ============================================================================

/// Flags raised by signal handlers and drained by the owning loop.
/// Handlers only ever do a single atomic store, which is async-signal-safe.
#[derive(Debug, Default)]
pub struct SignalState {
    child_exited: AtomicBool,
    watchdog: AtomicBool,
    interrupted: AtomicBool,
}

impl SignalState {
    pub const fn new() -> Self {
        SignalState {
            child_exited: AtomicBool::new(false),
            watchdog: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
        }
    }

    #[inline(always)] pub fn notify_child_exit(&self) { self.child_exited.store(true, Ordering::Release); }
    #[inline(always)] pub fn fire_watchdog(&self) { self.watchdog.store(true, Ordering::Release); }
    #[inline(always)] pub fn interrupt(&self) { self.interrupted.store(true, Ordering::Release); }

    /// Consume a pending child-exit notification. Coalesces: many exits, one flag.
    #[inline(always)] pub fn take_child_exit(&self) -> bool { self.child_exited.swap(false, Ordering::AcqRel) }
    #[inline(always)] pub fn watchdog_fired(&self) -> bool { self.watchdog.load(Ordering::Acquire) }
    #[inline(always)] pub fn interrupted(&self) -> bool { self.interrupted.load(Ordering::Acquire) }

    /// The interrupt flag itself, for loops that poll a plain `AtomicBool`.
    pub fn stop_flag(&self) -> &AtomicBool { &self.interrupted }
}

/// The process-wide instance the installed handlers write to.
pub static SIGNALS: SignalState = SignalState::new();

extern "C" fn on_child_exit(_sig: libc::c_int) { SIGNALS.notify_child_exit(); }
extern "C" fn on_watchdog(_sig: libc::c_int) { SIGNALS.fire_watchdog(); }
extern "C" fn on_interrupt(_sig: libc::c_int) { SIGNALS.interrupt(); }

fn install(sig: libc::c_int, handler: extern "C" fn(libc::c_int), flags: libc::c_int) -> io::Result<()> {
    // SAFETY: `act` is fully initialized (zeroed + explicit fields) before sigaction reads it.
    // The handler is an extern "C" fn with a stable address that performs one atomic store.
    unsafe {
        let mut act: libc::sigaction = mem::zeroed();
        act.sa_sigaction = handler as *const () as libc::sighandler_t;
        act.sa_flags = flags;
        libc::sigemptyset(&mut act.sa_mask);
        if libc::sigaction(sig, &act, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// SIGCHLD → child exit, SIGALRM → watchdog, SIGINT/SIGTERM → interrupt.
pub fn install_orchestrator_handlers() -> io::Result<()> {
    install(libc::SIGCHLD, on_child_exit, libc::SA_RESTART | libc::SA_NOCLDSTOP)?;
    install(libc::SIGALRM, on_watchdog, libc::SA_RESTART)?;
    install(libc::SIGINT, on_interrupt, libc::SA_RESTART)?;
    install(libc::SIGTERM, on_interrupt, libc::SA_RESTART)?;
    Ok(())
}

/// SIGTERM/SIGINT/SIGHUP → stop. Also asks the kernel to send SIGHUP if the
/// orchestrator dies first, so no worker outlives its session.
pub fn install_worker_handlers() -> io::Result<()> {
    install(libc::SIGTERM, on_interrupt, 0)?;
    install(libc::SIGINT, on_interrupt, 0)?;
    install(libc::SIGHUP, on_interrupt, 0)?;
    // SAFETY: PR_SET_PDEATHSIG takes a signal number; no pointers involved.
    if unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGHUP as libc::c_ulong) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

// ============================================================================
// WATCHDOG TIMER
// ============================================================================

/// One-shot real-time timer: SIGALRM after `seconds` of wall-clock time.
pub fn arm_watchdog(seconds: u32) -> io::Result<()> {
    let value = libc::itimerval {
        it_interval: libc::timeval { tv_sec: 0, tv_usec: 0 },
        it_value: libc::timeval { tv_sec: seconds as libc::time_t, tv_usec: 0 },
    };
    // SAFETY: `value` is a valid itimerval; old value is not requested.
    if unsafe { libc::setitimer(libc::ITIMER_REAL, &value, ptr::null_mut()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

pub fn disarm_watchdog() {
    let _ = arm_watchdog(0);
}

// ============================================================================
// LOGGING
// ============================================================================

/// Diagnostics go to stderr; RUST_LOG overrides `default`. Safe to call twice.
pub fn init_tracing(default: &str) {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

// ============================================================================
// PANIC CLEANUP
// ============================================================================

/// Panic hook: report, remove any registered IPC resources, exit 1.
pub fn install_panic_cleanup(tag: &'static str) {
    std::panic::set_hook(Box::new(move |info| {
        eprintln!("[{}] PANIC: {}", tag, info);
        release_registered();
        std::process::exit(EXIT_FAILURE);
    }));
}

// ============================================================================
// TESTS
// ============================================================================
