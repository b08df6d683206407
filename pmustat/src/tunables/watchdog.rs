//! NMI watchdog control
//!
//! The NMI watchdog permanently occupies one general-purpose counter per cpu.
//! It is switched off for the run and switched back on afterwards.

use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::TunableError;

pub const NMI_WATCHDOG_PATH: &str = "/proc/sys/kernel/nmi_watchdog";

/// Read the watchdog setting, "0" or "1"
pub fn read_watchdog(path: &Path) -> Result<String, TunableError> {
    let content = fs::read_to_string(path)
        .map_err(|source| TunableError::Read { path: path.to_path_buf(), source })?;
    let value = content.trim();
    match value {
        "0" | "1" => Ok(value.to_string()),
        _ => Err(TunableError::Parse { path: path.to_path_buf(), value: value.to_string() }),
    }
}

fn write_watchdog(path: &Path, value: &str) -> Result<(), TunableError> {
    fs::write(path, value).map_err(|source| TunableError::Write {
        path: path.to_path_buf(),
        value: value.to_string(),
        source,
    })
}

/// Holds a disabled watchdog and re-enables it on restore or drop
#[derive(Debug)]
pub struct WatchdogGuard {
    path: PathBuf,
    /// Setting to write back, `None` once restored
    previous: Option<String>,
}

impl WatchdogGuard {
    /// Disable the system watchdog if it is enabled
    ///
    /// Returns `None` when it was already off and nothing needs restoring.
    ///
    /// # Errors
    /// Returns an error if the setting cannot be read or written
    pub fn disable() -> Result<Option<Self>, TunableError> {
        Self::disable_at(Path::new(NMI_WATCHDOG_PATH))
    }

    /// Like [`WatchdogGuard::disable`] for an arbitrary control file
    pub fn disable_at(path: &Path) -> Result<Option<Self>, TunableError> {
        let previous = read_watchdog(path)?;
        if previous == "0" {
            debug!("NMI watchdog already disabled");
            return Ok(None);
        }
        debug!("Disabling NMI watchdog");
        write_watchdog(path, "0")?;
        Ok(Some(Self { path: path.to_path_buf(), previous: Some(previous) }))
    }

    /// Write the captured setting back
    pub fn restore(mut self) -> Result<(), TunableError> {
        self.restore_previous()
    }

    fn restore_previous(&mut self) -> Result<(), TunableError> {
        match self.previous.take() {
            Some(previous) => {
                debug!("Restoring NMI watchdog to {previous}");
                write_watchdog(&self.path, &previous)
            }
            None => Ok(()),
        }
    }
}

impl Drop for WatchdogGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore_previous() {
            warn!("Failed to restore NMI watchdog: {e}");
        }
    }
}
