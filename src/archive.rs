//! Thin wrapper over the `tar` crate for the two archives the sandbox
//! passes across its block devices (spec.md §6).
//!
//! The input archive is written verbatim (the guest parses it; the host
//! never looks inside it). The output archive is a raw tar stream the
//! guest writes directly onto its writable block device; the host reads
//! named entries out of it best-effort.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};

/// Read a single named entry from a tar archive file, if present.
///
/// Returns `Ok(None)` when the entry is absent or the archive cannot be
/// parsed at all (e.g. the guest never wrote anything) — callers decide
/// whether that is a best-effort miss (empty string) or a hard failure
/// (mandatory read), per spec.md §4.3.
pub fn read_entry(archive_path: &Path, entry_name: &str) -> Result<Option<Vec<u8>>> {
    let file = File::open(archive_path)
        .with_context(|| format!("open output archive {}", archive_path.display()))?;
    let mut archive = tar::Archive::new(file);

    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(_) => return Ok(None),
    };

    for entry in entries {
        let mut entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let path = match entry.path() {
            Ok(p) => p.into_owned(),
            Err(_) => continue,
        };
        if path.as_os_str() == entry_name {
            let mut buf = Vec::new();
            if entry.read_to_end(&mut buf).is_err() {
                return Ok(None);
            }
            return Ok(Some(buf));
        }
    }
    Ok(None)
}

/// Read a named entry best-effort: missing or unreadable entries become
/// an empty byte string, never an error (spec.md §3, §4.3).
pub fn read_entry_best_effort(archive_path: &Path, entry_name: &str) -> Vec<u8> {
    read_entry(archive_path, entry_name)
        .ok()
        .flatten()
        .unwrap_or_default()
}

/// Write the uploaded submission bytes verbatim to `dest`, becoming the
/// `ubdbr=` read-only input block device.
pub fn write_input_archive(dest: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(dest, bytes)
        .with_context(|| format!("write input archive {}", dest.display()))
}
