//! Sampling targets: what each perf session monitors
//!
//! Targets are either given explicitly (`--pid`, `--cid`) or discovered as
//! the busiest processes or containers on the machine. Discovery sits behind
//! [`TargetDiscovery`] so the ranking can be replaced; [`ProcfsDiscovery`]
//! ranks by accumulated cpu time read from `/proc`.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;

use crate::config::CollectionConfig;
use crate::domain::{ConfigError, Pid, Scope};

/// A running process as seen in `/proc`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub ppid: Pid,
    pub command: String,
    /// Full command line, arguments joined by spaces
    pub cmdline: String,
    /// User plus system time in clock ticks
    pub cpu_ticks: u64,
    /// Unified hierarchy cgroup path, e.g. `/system.slice/docker-1cb2de.scope`
    pub cgroup: Option<String>,
}

/// One perf session's worth of monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    System,
    Process(ProcessInfo),
    /// perf's `--for-each-cgroup` covers all listed cgroups in one session
    Cgroups(Vec<String>),
}

impl Target {
    pub fn label(&self) -> TargetLabel {
        match self {
            Target::System => TargetLabel::System,
            Target::Process(p) => TargetLabel::Process { pid: p.pid, command: p.command.clone() },
            Target::Cgroups(c) => TargetLabel::Cgroups { cgroups: c.clone() },
        }
    }
}

/// Identifies the session a frame came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TargetLabel {
    System,
    Process { pid: Pid, command: String },
    Cgroups { cgroups: Vec<String> },
    /// Replayed perf output
    Recording { path: String },
}

impl fmt::Display for TargetLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetLabel::System => f.write_str("system"),
            TargetLabel::Process { pid, command } => write!(f, "{pid} ({command})"),
            TargetLabel::Cgroups { cgroups } => write!(f, "cgroups {}", cgroups.join(",")),
            TargetLabel::Recording { path } => write!(f, "recording {path}"),
        }
    }
}

/// Source of processes and cgroups to monitor
pub trait TargetDiscovery: Send + Sync {
    /// Look up one process, `None` if it no longer exists
    fn process(&self, pid: Pid) -> Result<Option<ProcessInfo>>;

    /// Up to `count` busiest processes whose command line matches `filter`
    fn hot_processes(&self, count: usize, filter: Option<&Regex>) -> Result<Vec<ProcessInfo>>;

    /// Full cgroup path of the container whose id contains `cid`
    fn cgroup(&self, cid: &str) -> Result<String>;

    /// Up to `count` busiest container cgroups whose path matches `filter`
    fn hot_cgroups(&self, count: usize, filter: Option<&Regex>) -> Result<Vec<String>>;
}

/// Resolve the targets for one collection cycle
///
/// System scope always has exactly one target. Process scope has one per
/// process; explicitly listed pids that have exited are skipped. Cgroup
/// scope has one target covering every selected cgroup.
///
/// # Errors
/// Returns [`ConfigError::NoTargets`] when nothing is left to monitor
pub fn resolve_targets(config: &CollectionConfig, discovery: &dyn TargetDiscovery) -> Result<Vec<Target>> {
    let filter = config.filter_regex()?;
    let filter = filter.as_ref();
    let targets = match config.scope {
        Scope::System => vec![Target::System],
        Scope::Process => {
            let processes = if config.pids.is_empty() {
                discovery.hot_processes(config.count, filter)?
            } else {
                let mut processes = Vec::with_capacity(config.pids.len());
                for pid in &config.pids {
                    match discovery.process(*pid)? {
                        Some(process) => processes.push(process),
                        None => info!("{pid} no longer exists, skipping"),
                    }
                }
                processes
            };
            debug!(
                "Process targets: {}",
                processes.iter().map(|p| p.pid.to_string()).collect::<Vec<_>>().join(", ")
            );
            processes.into_iter().map(Target::Process).collect()
        }
        Scope::Cgroup => {
            let cgroups = if config.cids.is_empty() {
                discovery.hot_cgroups(config.count, filter)?
            } else {
                config.cids.iter().map(|cid| discovery.cgroup(cid)).collect::<Result<Vec<_>>>()?
            };
            debug!("Cgroup targets: {}", cgroups.join(", "));
            if cgroups.is_empty() {
                Vec::new()
            } else {
                vec![Target::Cgroups(cgroups)]
            }
        }
    };

    if targets.is_empty() {
        return Err(ConfigError::NoTargets.into());
    }
    Ok(targets)
}

/// Busiest first, at most `count`, command line must match `filter`
pub fn rank_processes(mut processes: Vec<ProcessInfo>, count: usize, filter: Option<&Regex>) -> Vec<ProcessInfo> {
    processes.retain(|p| filter.map_or(true, |f| f.is_match(&p.cmdline)));
    processes.sort_by(|a, b| b.cpu_ticks.cmp(&a.cpu_ticks).then(a.pid.cmp(&b.pid)));
    processes.truncate(count);
    processes
}

/// Whether a cgroup path belongs to a docker or containerd container
pub fn is_container_cgroup(cgroup: &str) -> bool {
    (cgroup.contains("docker") || cgroup.contains("containerd")) && cgroup.ends_with(".scope")
}

/// Container cgroups ranked by the summed cpu time of their processes
pub fn rank_cgroups(processes: &[ProcessInfo], count: usize, filter: Option<&Regex>) -> Vec<String> {
    let mut totals: HashMap<&str, u64> = HashMap::new();
    for process in processes {
        let Some(cgroup) = process.cgroup.as_deref() else {
            continue;
        };
        if !is_container_cgroup(cgroup) || filter.is_some_and(|f| !f.is_match(cgroup)) {
            continue;
        }
        *totals.entry(cgroup).or_default() += process.cpu_ticks;
    }

    let mut ranked: Vec<(&str, u64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked.into_iter().take(count).map(|(cgroup, _)| cgroup.to_string()).collect()
}

/// Discovery backed by a procfs mount
#[derive(Debug, Clone)]
pub struct ProcfsDiscovery {
    root: PathBuf,
}

impl Default for ProcfsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsDiscovery {
    pub fn new() -> Self {
        Self { root: PathBuf::from("/proc") }
    }

    /// Use a procfs tree rooted somewhere else
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn read_process(&self, pid: u32) -> Option<ProcessInfo> {
        let dir = self.root.join(pid.to_string());
        let stat = fs::read_to_string(dir.join("stat")).ok()?;
        let (command, ppid, cpu_ticks) = parse_stat(&stat).ok()?;
        let cmdline = fs::read(dir.join("cmdline"))
            .map(|raw| {
                raw.split(|b| *b == 0)
                    .filter(|arg| !arg.is_empty())
                    .map(String::from_utf8_lossy)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        let cgroup = fs::read_to_string(dir.join("cgroup")).ok().and_then(|c| parse_cgroup(&c));

        Some(ProcessInfo { pid: Pid(pid), ppid: Pid(ppid), command, cmdline, cpu_ticks, cgroup })
    }

    fn all_processes(&self) -> Result<Vec<ProcessInfo>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read {}", self.root.display()))?;
        Ok(entries
            .flatten()
            .filter_map(|entry| entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()))
            .filter_map(|pid| self.read_process(pid))
            .collect())
    }
}

impl TargetDiscovery for ProcfsDiscovery {
    fn process(&self, pid: Pid) -> Result<Option<ProcessInfo>> {
        Ok(self.read_process(pid.0))
    }

    fn hot_processes(&self, count: usize, filter: Option<&Regex>) -> Result<Vec<ProcessInfo>> {
        Ok(rank_processes(self.all_processes()?, count, filter))
    }

    fn cgroup(&self, cid: &str) -> Result<String> {
        let processes = self.all_processes()?;
        let found = processes
            .iter()
            .filter_map(|p| p.cgroup.as_deref())
            .find(|cgroup| cgroup.contains(cid));
        match found {
            Some(cgroup) => Ok(cgroup.to_string()),
            None => bail!("cid not found: {cid}"),
        }
    }

    fn hot_cgroups(&self, count: usize, filter: Option<&Regex>) -> Result<Vec<String>> {
        Ok(rank_cgroups(&self.all_processes()?, count, filter))
    }
}

/// Extract command name from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_comm(stat_line: &str) -> Result<String> {
    let open = stat_line.find('(').context("Invalid stat format")?;
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    if open >= close {
        bail!("Invalid stat format");
    }
    Ok(stat_line[open + 1..close].to_string())
}

/// Command name, parent pid and utime + stime from a stat line
fn parse_stat(stat_line: &str) -> Result<(String, u32, u64)> {
    let command = extract_comm(stat_line)?;
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    // fields after the command start at field 3 (state)
    let fields: Vec<&str> = stat_line[close + 1..].split_whitespace().collect();
    let field = |n: usize| fields.get(n - 3).copied().with_context(|| format!("stat field {n} missing"));
    let ppid = field(4)?.parse::<u32>()?;
    let utime = field(14)?.parse::<u64>()?;
    let stime = field(15)?.parse::<u64>()?;
    Ok((command, ppid, utime + stime))
}

/// The unified (v2) hierarchy path from `/proc/<pid>/cgroup`
///
/// Falls back to the last listed hierarchy on v1-only systems.
fn parse_cgroup(content: &str) -> Option<String> {
    let mut last = None;
    for line in content.lines() {
        let mut parts = line.splitn(3, ':');
        let (Some(id), Some(_controllers), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        if id == "0" {
            return Some(path.to_string());
        }
        last = Some(path.to_string());
    }
    last
}
