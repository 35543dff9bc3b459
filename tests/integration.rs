//! End-to-end tests for the run lifecycle (spec.md §8 scenarios S1-S6).
//!
//! A real UML kernel is out of reach for a test suite, so these tests
//! substitute a trivial shell script for the VM binary: it reads the
//! `ubdc=` argument off its own argv and writes a tar archive into it,
//! simulating whatever the guest would have produced. This exercises the
//! whole `SupervisedProcess` → `Runner` → output-classification path
//! without needing a real virtual machine.

use std::fs;
use std::path::Path;
use std::time::Duration;

use sandbox_supervisor::notifier::Notifier;
use sandbox_supervisor::paths::Paths;
use sandbox_supervisor::runner::Runner;

/// Writes a "kernel" that is really a shell script acting as the VM: it
/// parses `ubdc=<path>` out of its own arguments and tars `entries` into
/// it, then exits with `exit_code`.
fn write_fake_vm(kernel_path: &Path, entries: &[(&str, &str)], exit_code: i32, sleep_secs: u64) {
    let mut script = String::from("#!/bin/sh\nset -e\n");
    if sleep_secs > 0 {
        script.push_str(&format!("sleep {sleep_secs}\n"));
    }
    script.push_str(
        "out=\"\"\n\
         for arg in \"$@\"; do\n\
         case \"$arg\" in\n\
         ubdc=*) out=\"${arg#ubdc=}\" ;;\n\
         esac\n\
         done\n",
    );
    if !entries.is_empty() {
        script.push_str("workdir=$(mktemp -d)\n");
        for (name, content) in entries {
            script.push_str(&format!("printf '%s' \"{content}\" > \"$workdir/{name}\"\n"));
        }
        script.push_str("tar -cf \"$out\" -C \"$workdir\" .\n");
    }
    script.push_str(&format!("exit {exit_code}\n"));

    fs::write(kernel_path, script).unwrap();
    let mut perms = fs::metadata(kernel_path).unwrap().permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    fs::set_permissions(kernel_path, perms).unwrap();
}

struct Harness {
    _tmp: tempfile::TempDir,
    paths: Paths,
}

impl Harness {
    fn new(entries: &[(&str, &str)], worker_exit: i32, sleep_secs: u64) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox_root = tmp.path().join("sandbox");
        let install_dir = tmp.path().join("install");
        fs::create_dir_all(&sandbox_root).unwrap();
        fs::create_dir_all(&install_dir).unwrap();

        write_fake_vm(&sandbox_root.join("linux.uml"), entries, worker_exit, sleep_secs);
        fs::write(sandbox_root.join("rootfs.squashfs"), b"").unwrap();
        fs::write(sandbox_root.join("initrd.img"), b"").unwrap();

        let paths = Paths::new(&sandbox_root, &install_dir);
        paths.verify_artifacts().unwrap();

        Harness { _tmp: tmp, paths }
    }

    fn runner(&self, timeout: Duration) -> Runner {
        Runner::new(self.paths.clone(), timeout, 1_048_576, "64M".to_string()).unwrap()
    }
}

/// Blocks until `f()` returns `Some`, or panics after `timeout`.
fn wait_for<T>(timeout: Duration, mut f: impl FnMut() -> Option<T>) -> T {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if let Some(v) = f() {
            return v;
        }
        if std::time::Instant::now() > deadline {
            panic!("timed out waiting for condition");
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

#[test]
fn s1_finished_run_produces_expected_outputs() {
    let harness = Harness::new(&[("exit_code.txt", "0"), ("stdout.txt", "hello\n")], 0, 0);
    let runner = harness.runner(Duration::from_secs(10));

    let started = runner.start(b"irrelevant upload", None).unwrap();
    assert!(started);

    // Re-attempting while busy must be rejected.
    let second = runner.start(b"irrelevant upload", None).unwrap();
    assert!(!second);

    // Give the fake VM time to run before asserting on archive contents.
    wait_for(Duration::from_secs(5), || {
        let bytes = sandbox_supervisor::archive::read_entry_best_effort(
            harness.paths.output_tar(),
            "exit_code.txt",
        );
        (!bytes.is_empty()).then_some(bytes)
    });

    let code = sandbox_supervisor::archive::read_entry_best_effort(harness.paths.output_tar(), "exit_code.txt");
    assert_eq!(code, b"0");
    let stdout = sandbox_supervisor::archive::read_entry_best_effort(harness.paths.output_tar(), "stdout.txt");
    assert_eq!(stdout, b"hello\n");
}

#[test]
fn s2_nonzero_inner_exit_code_is_visible_in_archive() {
    let harness = Harness::new(&[("exit_code.txt", "3")], 0, 0);
    let runner = harness.runner(Duration::from_secs(10));

    runner.start(b"irrelevant upload", None).unwrap();

    wait_for(Duration::from_secs(5), || {
        let bytes = sandbox_supervisor::archive::read_entry_best_effort(
            harness.paths.output_tar(),
            "exit_code.txt",
        );
        (!bytes.is_empty()).then_some(bytes)
    });

    let code = sandbox_supervisor::archive::read_entry_best_effort(harness.paths.output_tar(), "exit_code.txt");
    assert_eq!(code, b"3");
}

#[test]
fn s3_worker_crash_leaves_output_archive_empty() {
    // Exits non-zero immediately, before writing anything.
    let harness = Harness::new(&[], 2, 0);
    let runner = harness.runner(Duration::from_secs(10));

    runner.start(b"irrelevant upload", None).unwrap();

    // Let the run finish; the archive should remain zero-filled (no entries).
    std::thread::sleep(Duration::from_secs(1));
    let code = sandbox_supervisor::archive::read_entry_best_effort(harness.paths.output_tar(), "exit_code.txt");
    assert!(code.is_empty());
}

#[test]
fn s4_slow_worker_is_killed_by_timeout() {
    let harness = Harness::new(&[], 0, 30);
    let runner = harness.runner(Duration::from_millis(500));

    let start = std::time::Instant::now();
    runner.start(b"irrelevant upload", None).unwrap();

    // The run should be reaped well before the fake VM's own 30s sleep
    // would otherwise complete, proving the group kill tore it down.
    wait_for(Duration::from_secs(5), || {
        let second = runner.start(b"another upload", None).ok()?;
        second.then_some(())
    });
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn s5_busy_is_reported_to_the_second_of_two_concurrent_submissions() {
    let harness = Harness::new(&[("exit_code.txt", "0")], 0, 1);
    let runner = harness.runner(Duration::from_secs(10));

    let notifier = Notifier::new("http://127.0.0.1:1/unreachable", "tok");
    assert!(runner.start(b"first", Some(notifier)).unwrap());
    assert!(!runner.start(b"second", None).unwrap());
}

#[test]
fn s6_missing_archive_is_rejected_before_any_run_starts() {
    let harness = Harness::new(&[("exit_code.txt", "0")], 0, 0);
    let runner = harness.runner(Duration::from_secs(10));

    let response = sandbox_supervisor::gate::admit(&runner, None, None);
    assert_eq!(response.status, "bad_request");
}
