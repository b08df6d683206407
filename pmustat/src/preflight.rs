//! Pre-flight checks for pmustat
//!
//! Validates system requirements before perf is started or kernel settings
//! are touched. Provides clear, actionable error messages when requirements
//! aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use log::warn;
use std::env;
use std::path::{Path, PathBuf};

/// Oldest kernel whose perf supports `stat -j` and `--for-each-cgroup`
const MIN_KERNEL_VERSION: (u32, u32) = (5, 13);

/// Run all pre-flight checks for a live collection
///
/// Returns the resolved perf binary.
pub fn run_preflight_checks(perf: Option<&Path>) -> Result<PathBuf> {
    check_privileges()?;
    check_kernel_version();
    find_perf(perf)
}

/// Check if running with sufficient privileges for system-wide counters and
/// writing to sysfs/procfs
fn check_privileges() -> Result<()> {
    if unsafe { libc::geteuid() } == 0 {
        return Ok(());
    }

    bail!(
        "Permission denied: pmustat requires root privileges to program PMU counters \
         and adjust perf_event_mux_interval_ms.\n\n\
         Run with: sudo pmustat ..."
    );
}

/// Warn when the kernel is older than what the perf features used need
fn check_kernel_version() {
    let Ok(version_str) = std::fs::read_to_string("/proc/version") else {
        return;
    };
    if let Some(((major, minor), release)) = parse_kernel_version(&version_str) {
        if (major, minor) < MIN_KERNEL_VERSION {
            warn!(
                "Kernel {release} is older than {}.{}; perf may not support JSON output or --for-each-cgroup",
                MIN_KERNEL_VERSION.0, MIN_KERNEL_VERSION.1
            );
        }
    }
}

/// Parse version like "Linux version 5.15.0-generic ..." or "Linux version 6.1.0-arch1-1 ..."
fn parse_kernel_version(version_str: &str) -> Option<((u32, u32), &str)> {
    let release = version_str.split_whitespace().nth(2)?;
    let mut parts = release.split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts
        .next()?
        .chars()
        .take_while(char::is_ascii_digit)
        .collect::<String>()
        .parse()
        .ok()?;
    Some(((major, minor), release))
}

/// Resolve the perf binary: an explicit path, or `perf` on `PATH`
pub fn find_perf(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.is_file() {
            bail!(
                "perf not found at {}\n\n\
                 --perf must point to the perf executable.",
                path.display()
            );
        }
        return Ok(path.to_path_buf());
    }

    let search = env::var_os("PATH").context("PATH is not set, use --perf <PATH>")?;
    env::split_paths(&search).map(|dir| dir.join("perf")).find(|p| p.is_file()).with_context(|| {
        "perf not found on PATH.\n\n\
         Install it (e.g. linux-tools-$(uname -r) or the perf package) or pass --perf <PATH>."
            .to_string()
    })
}
