//! Perf multiplexing interval control
//!
//! Every PMU device under `/sys/devices/<device>/` that supports event
//! multiplexing exposes `perf_event_mux_interval_ms`. When more groups are
//! requested than there are counters, the kernel rotates groups on this
//! period. A shorter period gives each group a fairer share of short
//! sampling intervals.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::TunableError;

/// Where PMU devices live on a live system
pub const DEVICES_ROOT: &str = "/sys/devices";

/// Per-device interval file name
pub const MUX_INTERVAL_FILE: &str = "perf_event_mux_interval_ms";

/// Interval files under `root`, one per device directory that has one
pub fn mux_interval_files(root: &Path) -> Result<Vec<PathBuf>, TunableError> {
    let entries = fs::read_dir(root)
        .map_err(|source| TunableError::Read { path: root.to_path_buf(), source })?;

    let mut paths: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path().join(MUX_INTERVAL_FILE))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    Ok(paths)
}

/// Current interval of every device under `root`
///
/// Entries that cannot be read, or do not hold a number, are skipped and
/// left untouched.
pub fn read_mux_intervals(root: &Path) -> Result<BTreeMap<PathBuf, u64>, TunableError> {
    let mut intervals = BTreeMap::new();
    for path in mux_interval_files(root)? {
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                debug!("Skipping unreadable {}: {e}", path.display());
                continue;
            }
        };
        let value = content.trim();
        match value.parse::<u64>() {
            Ok(interval) => {
                intervals.insert(path, interval);
            }
            Err(_) => warn!("Skipping {} with unexpected content '{value}'", path.display()),
        }
    }
    Ok(intervals)
}

fn write_interval(path: &Path, interval: u64) -> Result<(), TunableError> {
    let value = interval.to_string();
    fs::write(path, &value).map_err(|source| TunableError::Write {
        path: path.to_path_buf(),
        value,
        source,
    })
}

/// Holds overridden multiplexing intervals and puts the old values back
///
/// Dropping the guard restores silently (errors are logged). Call
/// [`MuxIntervalGuard::restore`] to see restore errors.
#[derive(Debug)]
pub struct MuxIntervalGuard {
    /// `None` once restored
    captured: Option<BTreeMap<PathBuf, u64>>,
}

impl MuxIntervalGuard {
    /// Capture the intervals under [`DEVICES_ROOT`] and set them all to `interval_ms`
    ///
    /// # Errors
    /// Returns an error if the devices cannot be listed or a new value cannot
    /// be written. Values already overwritten are restored before the error
    /// is returned.
    pub fn apply(interval_ms: u64) -> Result<Self, TunableError> {
        Self::apply_at(Path::new(DEVICES_ROOT), interval_ms)
    }

    /// Like [`MuxIntervalGuard::apply`] for an arbitrary devices root
    pub fn apply_at(root: &Path, interval_ms: u64) -> Result<Self, TunableError> {
        let captured = read_mux_intervals(root)?;
        debug!("Captured {} perf mux intervals", captured.len());

        let guard = Self { captured: Some(captured) };
        if let Some(captured) = &guard.captured {
            for path in captured.keys() {
                // on error the guard drops here and restores what was captured
                write_interval(path, interval_ms)?;
            }
        }
        Ok(guard)
    }

    /// Write every captured value back
    ///
    /// All paths are attempted; the first failure is returned.
    pub fn restore(mut self) -> Result<(), TunableError> {
        self.restore_all()
    }

    fn restore_all(&mut self) -> Result<(), TunableError> {
        let Some(captured) = self.captured.take() else {
            return Ok(());
        };
        let mut first_error = None;
        for (path, interval) in captured {
            if let Err(e) = write_interval(&path, interval) {
                warn!("{e}");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for MuxIntervalGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore_all() {
            warn!("Failed to restore perf mux intervals: {e}");
        }
    }
}
