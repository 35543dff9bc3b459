//! Artifact and work-area path resolution.
//!
//! A pure value object: never creates or deletes files. Callers that need
//! `work_dir` to exist (or be empty) do so explicitly via `runner`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

/// Resolved, absolute paths derived from `sandbox_files_root` and
/// `install_dir`. Constructed once at startup and read-only thereafter.
#[derive(Debug, Clone)]
pub struct Paths {
    kernel: PathBuf,
    rootfs: PathBuf,
    initrd: PathBuf,
    work_dir: PathBuf,
    output_tar: PathBuf,
    vm_log: PathBuf,
    request_lock: PathBuf,
}

impl Paths {
    /// Resolve paths from the sandbox artifact root and the supervisor's
    /// install directory. Does not touch the filesystem.
    pub fn new(sandbox_files_root: &Path, install_dir: &Path) -> Self {
        let work_dir = install_dir.join("work");
        Paths {
            kernel: sandbox_files_root.join("linux.uml"),
            rootfs: sandbox_files_root.join("rootfs.squashfs"),
            initrd: sandbox_files_root.join("initrd.img"),
            output_tar: work_dir.join("output.tar"),
            vm_log: work_dir.join("vm.log"),
            request_lock: install_dir.join("request.lock"),
            work_dir,
        }
    }

    /// Verify that the three sandbox artifacts exist. Called once at
    /// startup; absence of any is a fatal error (spec.md §7).
    pub fn verify_artifacts(&self) -> Result<()> {
        for (name, path) in [
            ("kernel", &self.kernel),
            ("rootfs", &self.rootfs),
            ("initrd", &self.initrd),
        ] {
            if !path.exists() {
                bail!("missing sandbox artifact {name} at {}", path.display());
            }
        }
        Ok(())
    }

    pub fn kernel(&self) -> &Path {
        &self.kernel
    }
    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }
    pub fn initrd(&self) -> &Path {
        &self.initrd
    }
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
    pub fn output_tar(&self) -> &Path {
        &self.output_tar
    }
    pub fn vm_log(&self) -> &Path {
        &self.vm_log
    }

    /// Path to the input archive written for the current run.
    pub fn input_archive(&self) -> PathBuf {
        self.work_dir.join("input.tar")
    }

    /// Path to the admission lock file (`RequestGate`, §4.5).
    pub fn request_lock(&self) -> &Path {
        &self.request_lock
    }

    /// Recursively remove and recreate `work_dir`, guaranteeing invariant
    /// §3.3 (the work directory is emptied before any new artifact is
    /// written).
    pub fn nuke_work_dir(&self) -> Result<()> {
        if self.work_dir.exists() {
            std::fs::remove_dir_all(&self.work_dir)
                .with_context(|| format!("remove work dir {}", self.work_dir.display()))?;
        }
        std::fs::create_dir_all(&self.work_dir)
            .with_context(|| format!("create work dir {}", self.work_dir.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_artifact_paths_under_root() {
        let paths = Paths::new(Path::new("/srv/sandbox"), Path::new("/opt/supervisor"));
        assert_eq!(paths.kernel(), Path::new("/srv/sandbox/linux.uml"));
        assert_eq!(paths.rootfs(), Path::new("/srv/sandbox/rootfs.squashfs"));
        assert_eq!(paths.initrd(), Path::new("/srv/sandbox/initrd.img"));
        assert_eq!(paths.work_dir(), Path::new("/opt/supervisor/work"));
        assert_eq!(
            paths.output_tar(),
            Path::new("/opt/supervisor/work/output.tar")
        );
        assert_eq!(paths.vm_log(), Path::new("/opt/supervisor/work/vm.log"));
    }

    #[test]
    fn verify_artifacts_fails_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::new(tmp.path(), tmp.path());
        let err = paths.verify_artifacts().unwrap_err();
        assert!(err.to_string().contains("linux.uml"));
    }

    #[test]
    fn verify_artifacts_succeeds_when_present() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("linux.uml"), b"").unwrap();
        std::fs::write(tmp.path().join("rootfs.squashfs"), b"").unwrap();
        std::fs::write(tmp.path().join("initrd.img"), b"").unwrap();
        let paths = Paths::new(tmp.path(), tmp.path());
        paths.verify_artifacts().unwrap();
    }

    #[test]
    fn nuke_work_dir_clears_stale_files() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::new(tmp.path(), tmp.path());
        paths.nuke_work_dir().unwrap();
        std::fs::write(paths.work_dir().join("stale.txt"), b"leftover").unwrap();
        paths.nuke_work_dir().unwrap();
        assert_eq!(std::fs::read_dir(paths.work_dir()).unwrap().count(), 0);
    }
}
