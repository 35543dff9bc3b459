//! Startup configuration (spec.md §7).
//!
//! Loaded once from a YAML file via `serde_yaml`, in the same spirit as the
//! teacher's use of `serde`-derived structs for every on-disk artifact
//! (`meta.json`/`state.json` in `schema.rs`) — here it's the supervisor's
//! own config rather than per-job state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::paths::Paths;

/// As parsed straight off disk. Field names match spec.md §6's recognized
/// configuration keys exactly; validation and defaulting happen in
/// `Settings::from_raw`.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    /// Wall-clock seconds before a run is killed and classified `timeout`.
    pub timeout: u64,
    /// Maximum size, in bytes, reserved for the output block device.
    pub max_output_size: u64,
    /// Opaque string passed straight through to the VM as `mem=<instance_ram>`.
    pub instance_ram: String,
    /// Directory containing `linux.uml`, `rootfs.squashfs`, `initrd.img`.
    pub sandbox_files_root: PathBuf,
    /// Directory the supervisor uses for its own state: work dir, lock file.
    pub install_dir: PathBuf,
    /// Address to bind the HTTP server to, e.g. "127.0.0.1:8080".
    pub bind_addr: String,
    /// Optional file to additionally log to, via `tracing-appender`.
    #[serde(default)]
    pub debug_log_file: Option<PathBuf>,
}

/// Validated, ready-to-use configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub timeout: Duration,
    pub max_output_bytes: u64,
    pub instance_ram: String,
    pub bind_addr: String,
    pub debug_log_file: Option<PathBuf>,
    pub paths: Paths,
}

impl Settings {
    /// Load and validate configuration from a YAML file at `path`.
    ///
    /// Bails with a descriptive error (caller treats this as fatal, per
    /// spec.md §7) if the file can't be read/parsed, or if the sandbox
    /// artifacts it points at don't exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let raw: RawConfig = serde_yaml::from_str(&text)
            .with_context(|| format!("parse config file {}", path.display()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        if raw.timeout == 0 {
            bail!("timeout must be greater than zero");
        }
        if raw.max_output_size == 0 {
            bail!("max_output_size must be greater than zero");
        }
        if raw.instance_ram.trim().is_empty() {
            bail!("instance_ram must not be empty");
        }

        let paths = Paths::new(&raw.sandbox_files_root, &raw.install_dir);
        paths.verify_artifacts()?;

        Ok(Settings {
            timeout: Duration::from_secs(raw.timeout),
            max_output_bytes: raw.max_output_size,
            instance_ram: raw.instance_ram,
            bind_addr: raw.bind_addr,
            debug_log_file: raw.debug_log_file,
            paths,
        })
    }
}
