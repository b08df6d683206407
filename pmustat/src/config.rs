//! Validated collection settings
//!
//! [`CollectionConfig`] is built once from the command line and passed by
//! reference to every component that needs it.

use regex::Regex;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Args;
use crate::domain::{ConfigError, Granularity, Pid, Scope};

/// Everything a collection run needs to know, already checked for consistency
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    pub event_file: PathBuf,
    pub scope: Scope,
    pub granularity: Granularity,
    pub pids: Vec<Pid>,
    /// Container ids, matched as substrings of cgroup paths
    pub cids: Vec<String>,
    /// Regular expression over command lines or cgroup paths
    pub filter: Option<String>,
    /// How many hot targets to discover
    pub count: usize,
    /// Target rediscovery period
    pub refresh: Duration,
    /// Total collection time, `None` for unlimited; a whole number of intervals
    pub timeout: Option<Duration>,
    /// perf print interval
    pub interval: Duration,
    pub mux_interval_ms: u64,
    pub perf_path: PathBuf,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            event_file: PathBuf::new(),
            scope: Scope::System,
            granularity: Granularity::System,
            pids: Vec::new(),
            cids: Vec::new(),
            filter: None,
            count: 5,
            refresh: Duration::from_secs(30),
            timeout: None,
            interval: Duration::from_millis(5000),
            mux_interval_ms: 125,
            perf_path: PathBuf::from("perf"),
        }
    }
}

impl CollectionConfig {
    /// Validate command-line arguments
    ///
    /// # Errors
    /// Returns the first inconsistency found
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        if args.replay.is_some() != args.topology.is_some() {
            return Err(ConfigError::ReplayNeedsTopology);
        }
        let event_file = args.event_file.clone().ok_or(ConfigError::MissingEventFile)?;

        let config = Self {
            event_file,
            scope: args.scope,
            granularity: args.granularity,
            pids: args.pid.iter().copied().map(Pid).collect(),
            cids: args.cid.iter().map(|c| c.trim().to_string()).filter(|c| !c.is_empty()).collect(),
            filter: args.filter.clone().filter(|f| !f.is_empty()),
            count: args.count,
            refresh: Duration::from_secs(args.refresh),
            timeout: (args.timeout > 0).then(|| Duration::from_secs(args.timeout)),
            interval: Duration::from_millis(args.interval),
            mux_interval_ms: args.mux_interval,
            perf_path: args.perf.clone().unwrap_or_else(|| PathBuf::from("perf")),
        };
        config.validate()?;
        Ok(config.with_rounded_timeout())
    }

    /// Check option combinations
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if self.timeout.is_some_and(|t| t < self.interval) {
            return Err(ConfigError::TimeoutShorterThanInterval);
        }
        if !self.pids.is_empty() && self.scope != Scope::Process {
            return Err(ConfigError::PidsRequireProcessScope);
        }
        if !self.cids.is_empty() && self.scope != Scope::Cgroup {
            return Err(ConfigError::CidsRequireCgroupScope);
        }
        if self.filter.is_some() {
            if self.scope == Scope::System {
                return Err(ConfigError::FilterRequiresTargetScope);
            }
            if !self.pids.is_empty() || !self.cids.is_empty() {
                return Err(ConfigError::FilterWithExplicitIds);
            }
            self.filter_regex()?;
        }
        if self.count == 0 {
            return Err(ConfigError::ZeroCount);
        }
        if self.refresh < self.interval {
            return Err(ConfigError::RefreshShorterThanInterval);
        }
        if self.granularity != Granularity::System && self.scope != Scope::System {
            return Err(ConfigError::GranularityRequiresSystemScope);
        }
        Ok(())
    }

    /// Round the timeout up to a whole number of print intervals
    fn with_rounded_timeout(mut self) -> Self {
        if let Some(timeout) = self.timeout {
            let interval_ms = self.interval.as_millis().max(1);
            let rounded = timeout.as_millis().div_ceil(interval_ms) * interval_ms;
            self.timeout = Some(Duration::from_millis(u64::try_from(rounded).unwrap_or(u64::MAX)));
        }
        self
    }

    /// The compiled discovery filter
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidFilter`] if the expression does not compile
    pub fn filter_regex(&self) -> Result<Option<Regex>, ConfigError> {
        self.filter
            .as_deref()
            .map(|f| Regex::new(f).map_err(|e| ConfigError::InvalidFilter(e.to_string())))
            .transpose()
    }

    /// Whether targets are discovered, and therefore periodically refreshed
    pub fn refreshes_targets(&self) -> bool {
        match self.scope {
            Scope::System => false,
            Scope::Process => self.pids.is_empty(),
            Scope::Cgroup => self.cids.is_empty(),
        }
    }

    /// How long one perf session may run before it must end, if at all
    ///
    /// Discovered target lists are refreshed, so their sessions end after the
    /// refresh period at the latest.
    pub fn session_limit(&self) -> Option<Duration> {
        match (self.timeout, self.refreshes_targets()) {
            (Some(timeout), true) => Some(timeout.min(self.refresh)),
            (None, true) => Some(self.refresh),
            (timeout, false) => timeout,
        }
    }
}
