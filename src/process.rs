//! The supervision primitive (spec.md §4.2).
//!
//! Three real OS processes are involved for every run: the intermediate
//! supervisor (I), the worker (W), and the timer (T). All three come from
//! raw `libc::fork`, in the same spirit as the teacher crate's willingness
//! to drop to raw `libc` calls for process signaling (see `kill.rs` there)
//! rather than reach for an async process manager.
//!
//! `start` is called from a thread inside a multi-threaded `tokio` process
//! (the HTTP server). Between `fork` and `exec`/`_exit`, I/W/T touch only
//! `libc` syscalls and plain `std::fs`/`std::io` on files already open
//! before the fork — never the inherited tokio runtime, never a `Mutex`
//! that might be held by a sibling thread that does not exist in the
//! child. The completion hook's HTTP call (inside I, via `Notifier`) uses
//! a `reqwest::blocking::Client` constructed from scratch after the fork,
//! which is safe because it spins up its own fresh runtime rather than
//! touching the parent's.

use std::time::Duration;

use anyhow::{Result, bail};

/// Outcome of the race between the worker and the timer, as observed by
/// the intermediate process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// The worker exited normally with this code.
    Exited(i32),
    /// The worker was killed by this signal before exiting.
    Signaled(i32),
    /// The timer fired before the worker exited.
    Timeout,
}

/// A boxed completion hook, run inside the intermediate process (I).
pub type CompletionHook = Box<dyn FnOnce(WorkerOutcome) + Send + 'static>;

/// A boxed worker action, run inside the worker process (W) after fork.
/// Expected to end by replacing its image (`exec`); if it returns instead,
/// it is treated as a fatal worker error (`_exit(1)`).
pub type WorkerAction = Box<dyn FnOnce() + Send + 'static>;

/// The supervision primitive described in spec.md §4.2.
///
/// Single-run: calling `start` while a previous run has not been waited or
/// killed is a programming error.
pub struct SupervisedProcess {
    timeout: Duration,
    hook: Option<CompletionHook>,
    intermediate_pid: Option<libc::pid_t>,
}

impl SupervisedProcess {
    pub fn new(timeout: Duration) -> Self {
        SupervisedProcess {
            timeout,
            hook: None,
            intermediate_pid: None,
        }
    }

    /// Register the completion hook. Must be called before `start`.
    pub fn on_complete<F>(&mut self, hook: F)
    where
        F: FnOnce(WorkerOutcome) + Send + 'static,
    {
        self.hook = Some(Box::new(hook));
    }

    /// Returns `true` if a supervised run is currently in flight.
    pub fn running(&mut self) -> bool {
        if self.intermediate_pid.is_none() {
            return false;
        }
        matches!(self.wait(false), Ok(false))
    }

    /// Fork I, which forks W and T, waits for either, runs the completion
    /// hook, and (on every exit path) kills its own process group.
    ///
    /// # Panics
    /// Panics if `start` is called while a previous run has not been
    /// reaped — this is the documented programming error, not a runtime
    /// condition callers are expected to recover from.
    pub fn start(&mut self, worker: WorkerAction) -> Result<()> {
        assert!(
            self.intermediate_pid.is_none(),
            "SupervisedProcess::start called while a previous run is still outstanding"
        );

        let hook = self
            .hook
            .take()
            .expect("on_complete must be registered before start");
        let timeout = self.timeout;

        // SAFETY: fork() duplicates the address space; between here and
        // exec/_exit in the child we only touch libc syscalls, std::fs on
        // already-open files, and (in the hook) a freshly built blocking
        // HTTP client. No tokio, no mutex shared with a sibling thread.
        let pid = unsafe { libc::fork() };
        if pid < 0 {
            bail!("fork() for intermediate process failed: {}", std::io::Error::last_os_error());
        }
        if pid == 0 {
            run_intermediate(timeout, worker, hook);
            unreachable!("run_intermediate never returns");
        }

        self.intermediate_pid = Some(pid);
        Ok(())
    }

    /// Reap I. Non-blocking mode polls once; blocking mode waits
    /// indefinitely. Returns `Ok(true)` once I has been reaped.
    pub fn wait(&mut self, blocking: bool) -> Result<bool> {
        let Some(pid) = self.intermediate_pid else {
            return Ok(true);
        };

        let flags = if blocking { 0 } else { libc::WNOHANG };
        let mut status: libc::c_int = 0;
        // SAFETY: pid is a child we forked and have not yet reaped.
        let ret = unsafe { libc::waitpid(pid, &mut status, flags) };
        if ret == pid {
            self.intermediate_pid = None;
            return Ok(true);
        }
        if ret == 0 {
            // Non-blocking: still running.
            return Ok(false);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ECHILD) {
            // Already reaped elsewhere; treat as done.
            self.intermediate_pid = None;
            return Ok(true);
        }
        bail!("waitpid({pid}) failed: {err}");
    }

    /// Send an unconditional group kill to I's process group, then block
    /// until I is reaped.
    pub fn kill(&mut self) -> Result<()> {
        let Some(pid) = self.intermediate_pid else {
            return Ok(());
        };
        // SAFETY: pid is I's pid, which is also I's process group id
        // (I calls setsid() immediately on entry).
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
        self.wait(true)?;
        Ok(())
    }
}

/// Body of the intermediate process (I). Never returns — exits the
/// process directly on every path.
fn run_intermediate(timeout: Duration, worker: WorkerAction, hook: CompletionHook) -> ! {
    // Become the leader of a new session and process group so that (a) I
    // can be killed as a group, (b) descendants' console manipulation
    // cannot reach the caller's terminal, and (c) a guest panic's
    // group-wide signal only affects this subtree.
    unsafe {
        libc::setsid();
    }

    let worker_pid = unsafe { libc::fork() };
    if worker_pid < 0 {
        // Fork failure propagates as a fatal error from I; the hook still
        // runs with a failed-like status.
        hook(WorkerOutcome::Exited(1));
        group_kill_self();
        unsafe { libc::_exit(1) };
    }
    if worker_pid == 0 {
        worker();
        // The worker action is expected to exec(); if it returns, treat
        // it as a fatal worker error.
        unsafe { libc::_exit(1) };
    }

    let timer_pid = unsafe { libc::fork() };
    if timer_pid < 0 {
        // Could not start the timer: kill the worker, reap it, and run
        // the hook with whatever status is available.
        unsafe {
            libc::kill(worker_pid, libc::SIGKILL);
        }
        let mut status: libc::c_int = 0;
        unsafe { libc::waitpid(worker_pid, &mut status, 0) };
        hook(WorkerOutcome::Exited(1));
        group_kill_self();
        unsafe { libc::_exit(1) };
    }
    if timer_pid == 0 {
        run_timer(timeout);
        unreachable!("run_timer never returns");
    }

    // Wait for whichever of W or T exits first.
    let mut status: libc::c_int = 0;
    let first = unsafe { libc::waitpid(-1, &mut status, 0) };

    let outcome = if first == worker_pid {
        // Worker finished first: stop the timer and reap it.
        unsafe {
            libc::kill(timer_pid, libc::SIGKILL);
            let mut timer_status: libc::c_int = 0;
            libc::waitpid(timer_pid, &mut timer_status, 0);
        }
        classify_status(status)
    } else {
        // Timer fired first (or waitpid raced/errored): timeout.
        // Worker is still alive; the unconditional group kill below reaps
        // it via the SIGKILL delivered to the whole process group.
        WorkerOutcome::Timeout
    };

    hook(outcome);

    // Implementers SHOULD issue the group kill on every exit path, not
    // only on timeout, to guarantee invariant §3.2 — this is the
    // strengthened discipline spec.md §4.2/§9 recommends over the source.
    group_kill_self();

    // If the worker already exited, nothing is left to clean up and this
    // is a plain successful exit. If it was a timeout, the group kill just
    // issued will have delivered SIGKILL to this very process too (it is
    // a member of its own process group); either way _exit below is the
    // last instruction that actually executes.
    unsafe { libc::_exit(0) };
}

/// Body of the timer process (T): close stdio, sleep for the timeout, exit.
fn run_timer(timeout: Duration) -> ! {
    unsafe {
        libc::close(0);
        libc::close(1);
        libc::close(2);
    }
    std::thread::sleep(timeout);
    unsafe { libc::_exit(0) };
}

/// Send an unconditional kill to the caller's own process group (negative
/// own pid), per spec.md §4.2.
fn group_kill_self() {
    let pid = unsafe { libc::getpid() };
    unsafe {
        libc::kill(-pid, libc::SIGKILL);
    }
}

fn classify_status(status: libc::c_int) -> WorkerOutcome {
    unsafe {
        if libc::WIFEXITED(status) {
            WorkerOutcome::Exited(libc::WEXITSTATUS(status))
        } else if libc::WIFSIGNALED(status) {
            WorkerOutcome::Signaled(libc::WTERMSIG(status))
        } else {
            WorkerOutcome::Exited(1)
        }
    }
}
