//! Drives a single sandbox run end to end: work-directory hygiene, VM
//! invocation, outcome classification, output extraction, and the
//! Idle/Busy handoff back to the HTTP surface (spec.md §4, §6).

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::archive;
use crate::notifier::Notifier;
use crate::paths::Paths;
use crate::process::{CompletionHook, SupervisedProcess, WorkerAction, WorkerOutcome};

/// Outcome classification surfaced to the caller, per spec.md §4.3/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Finished,
    Failed,
    Timeout,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Finished => "finished",
            ResultStatus::Failed => "failed",
            ResultStatus::Timeout => "timeout",
        }
    }
}

/// Everything a completed run produces, ready to hand to a `Notifier`.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub status: ResultStatus,
    pub exit_code: Option<i32>,
    pub test_output: Vec<u8>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Busy,
}

/// Owns sandbox artifact paths and the single `SupervisedProcess` reused
/// across runs. Cheap to clone: the mutable state lives behind `Arc`s, so
/// every clone shares the same run.
#[derive(Clone)]
pub struct Runner {
    paths: Paths,
    timeout: Duration,
    max_output_bytes: u64,
    instance_ram: String,
    state: Arc<Mutex<RunState>>,
    process: Arc<Mutex<SupervisedProcess>>,
}

impl Runner {
    pub fn new(paths: Paths, timeout: Duration, max_output_bytes: u64, instance_ram: String) -> Result<Self> {
        paths.nuke_work_dir()?;
        Ok(Runner {
            process: Arc::new(Mutex::new(SupervisedProcess::new(timeout))),
            paths,
            timeout,
            max_output_bytes,
            instance_ram,
            state: Arc::new(Mutex::new(RunState::Idle)),
        })
    }

    /// Attempt to start a run. Returns `Ok(false)` without touching
    /// anything if a run is already in flight (spec.md §4.5 busy path).
    pub fn start(&self, archive_bytes: &[u8], notifier: Option<Notifier>) -> Result<bool> {
        {
            let mut state = self.state.lock().unwrap();
            if *state == RunState::Busy {
                return Ok(false);
            }
            *state = RunState::Busy;
        }

        if let Err(e) = self.launch(archive_bytes, notifier) {
            // No reaper thread was spawned on this path, so we are
            // responsible for releasing the slot ourselves.
            *self.state.lock().unwrap() = RunState::Idle;
            return Err(e);
        }
        Ok(true)
    }

    fn launch(&self, archive_bytes: &[u8], notifier: Option<Notifier>) -> Result<()> {
        self.paths.nuke_work_dir()?;
        archive::write_input_archive(&self.paths.input_archive(), archive_bytes)?;

        let output_file = File::create(self.paths.output_tar())?;
        output_file.set_len(self.max_output_bytes)?;
        drop(output_file);

        // Opened before fork so the worker only ever touches already-open
        // files across the fork boundary (see process.rs's fork-safety note).
        let devnull = File::options().read(true).write(true).open("/dev/null")?;
        let vm_log_file = File::create(self.paths.vm_log())?;

        let worker = self.build_worker(devnull, vm_log_file);
        let hook = self.build_hook(notifier);

        let mut process = self.process.lock().unwrap();
        process.on_complete(hook);
        process.start(worker)?;
        drop(process);

        self.spawn_reaper();
        Ok(())
    }

    fn build_worker(&self, devnull: File, vm_log_file: File) -> WorkerAction {
        let kernel = self.paths.kernel().to_path_buf();
        let initrd = self.paths.initrd().to_path_buf();
        let rootfs = self.paths.rootfs().to_path_buf();
        let input_archive = self.paths.input_archive();
        let output_tar = self.paths.output_tar().to_path_buf();
        let instance_ram = self.instance_ram.clone();

        Box::new(move || {
            unsafe {
                libc::dup2(devnull.as_raw_fd(), 0);
                libc::dup2(vm_log_file.as_raw_fd(), 1);
                libc::dup2(vm_log_file.as_raw_fd(), 2);
            }

            let err = vm_command(&kernel, &initrd, &rootfs, &input_archive, &output_tar, &instance_ram).exec();
            // exec() only returns on failure.
            eprintln!("exec {} failed: {err}", kernel.display());
            unsafe { libc::_exit(127) };
        })
    }

    fn build_hook(&self, notifier: Option<Notifier>) -> CompletionHook {
        let output_tar = self.paths.output_tar().to_path_buf();

        Box::new(move |outcome| {
            let (status, exit_code) = classify(outcome, &output_tar);

            let test_output = archive::read_entry_best_effort(&output_tar, "test_output.txt");
            let stdout = archive::read_entry_best_effort(&output_tar, "stdout.txt");
            let stderr = archive::read_entry_best_effort(&output_tar, "stderr.txt");

            info!(status = status.as_str(), ?exit_code, "run completed");

            if let Some(notifier) = notifier {
                let output = RunOutput {
                    status,
                    exit_code,
                    test_output,
                    stdout,
                    stderr,
                };
                notifier.send_notification(&output);
            }
        })
    }

    /// A `std::thread`, not a tokio task: it owns the only reference that
    /// may call `wait` on the current `SupervisedProcess`, and it blocks
    /// for as long as the run takes. Flips the run back to `Idle` only
    /// once the intermediate process (and therefore the whole process
    /// group) is confirmed reaped.
    fn spawn_reaper(&self) {
        let process = Arc::clone(&self.process);
        let state = Arc::clone(&self.state);
        std::thread::spawn(move || {
            let mut guard = process.lock().unwrap();
            if let Err(e) = guard.wait(true) {
                warn!(error = %e, "failed to reap intermediate process");
            }
            drop(guard);
            *state.lock().unwrap() = RunState::Idle;
        });
    }
}

fn vm_command(
    kernel: &PathBuf,
    initrd: &PathBuf,
    rootfs: &PathBuf,
    input_archive: &PathBuf,
    output_tar: &PathBuf,
    instance_ram: &str,
) -> Command {
    let mut cmd = Command::new(kernel);
    cmd.arg(format!("initrd={}", initrd.display()))
        .arg(format!("ubdarc={}", rootfs.display()))
        .arg(format!("ubdbr={}", input_archive.display()))
        .arg(format!("ubdc={}", output_tar.display()))
        .arg(format!("mem={instance_ram}"))
        .arg("con=null");
    cmd
}

/// Classify the race outcome into the three caller-visible statuses.
///
/// A timed-out or crashed worker is unambiguous. A worker that exited
/// zero only means the VM shut down cleanly — the guest's own exit code
/// lives in `exit_code.txt` inside the output archive, so a clean VM
/// shutdown with no parseable exit code is still reported as `failed`.
fn classify(outcome: WorkerOutcome, output_tar: &std::path::Path) -> (ResultStatus, Option<i32>) {
    match outcome {
        WorkerOutcome::Timeout => (ResultStatus::Timeout, None),
        WorkerOutcome::Signaled(_) => (ResultStatus::Failed, None),
        WorkerOutcome::Exited(code) if code != 0 => (ResultStatus::Failed, None),
        WorkerOutcome::Exited(_) => {
            let inner_code = archive::read_entry(output_tar, "exit_code.txt")
                .ok()
                .flatten()
                .and_then(|bytes| parse_exit_code(&bytes));
            match inner_code {
                Some(0) => (ResultStatus::Finished, Some(0)),
                Some(code) => (ResultStatus::Failed, Some(code)),
                None => (ResultStatus::Failed, None),
            }
        }
    }
}

fn parse_exit_code(bytes: &[u8]) -> Option<i32> {
    std::str::from_utf8(bytes).ok()?.trim().parse::<i32>().ok()
}
