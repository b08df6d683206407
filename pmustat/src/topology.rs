//! Processor topology
//!
//! Socket, core and thread counts plus the logical cpu → socket map used by
//! socket and cpu granularity. Read from `/proc/cpuinfo` and
//! `/sys/devices/system/cpu/online` on a live system, or loaded from a JSON
//! file when replaying recorded perf output on another machine.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::domain::{CpuId, SocketId};

/// Socket/core/thread layout of the monitored machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    socket_count: u32,
    cores_per_socket: u32,
    threads_per_core: u32,
    cpu_sockets: BTreeMap<CpuId, SocketId>,
}

/// On-disk form of a topology, e.g.
/// `{"socket_count": 2, "cores_per_socket": 4, "threads_per_core": 2}`
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TopologyFile {
    socket_count: u32,
    cores_per_socket: u32,
    threads_per_core: u32,
    /// Explicit cpu → socket map, for machines where the uniform numbering
    /// does not hold
    #[serde(default)]
    cpu_sockets: Option<BTreeMap<u32, u32>>,
}

impl Topology {
    /// Build the topology of a machine with the kernel's default numbering
    ///
    /// Logical cpus are numbered core by core, socket by socket; SMT siblings
    /// follow in a second (third, ...) pass over all cores. With 2 sockets of
    /// 2 cores and 2 threads, cpus 0,1,4,5 are socket 0 and 2,3,6,7 socket 1.
    pub fn uniform(socket_count: u32, cores_per_socket: u32, threads_per_core: u32) -> Result<Self> {
        if socket_count == 0 || cores_per_socket == 0 || threads_per_core == 0 {
            bail!("socket count, cores per socket and threads per core must be non-zero");
        }
        let cores = socket_count * cores_per_socket;
        let cpu_sockets = (0..cores * threads_per_core)
            .map(|cpu| (CpuId(cpu), SocketId((cpu % cores) / cores_per_socket)))
            .collect();
        Ok(Self { socket_count, cores_per_socket, threads_per_core, cpu_sockets })
    }

    /// Read the topology of the running system
    ///
    /// # Errors
    /// Returns an error if `/proc/cpuinfo` or the online cpu list cannot be read
    pub fn detect() -> Result<Self> {
        let cpuinfo =
            fs::read_to_string("/proc/cpuinfo").context("Failed to read /proc/cpuinfo")?;
        let online = online_cpus()?;
        Self::from_cpuinfo(&cpuinfo, &online)
    }

    /// Build a topology from `/proc/cpuinfo` content, keeping only `online` cpus
    /// (all listed processors when `online` is empty)
    pub fn from_cpuinfo(cpuinfo: &str, online: &[CpuId]) -> Result<Self> {
        let mut cpu_sockets = BTreeMap::new();
        let mut cores_per_socket = None;
        let mut siblings = None;

        for block in cpuinfo.split("\n\n").filter(|b| !b.trim().is_empty()) {
            let mut processor = None;
            let mut physical_id = 0;
            for line in block.lines() {
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                let value = value.trim();
                match key.trim() {
                    "processor" => processor = value.parse::<u32>().ok(),
                    "physical id" => physical_id = value.parse().unwrap_or(0),
                    "cpu cores" if cores_per_socket.is_none() => {
                        cores_per_socket = value.parse::<u32>().ok();
                    }
                    "siblings" if siblings.is_none() => siblings = value.parse::<u32>().ok(),
                    _ => {}
                }
            }
            let Some(cpu) = processor else {
                continue;
            };
            if online.is_empty() || online.contains(&CpuId(cpu)) {
                cpu_sockets.insert(CpuId(cpu), SocketId(physical_id));
            }
        }

        if cpu_sockets.is_empty() {
            bail!("no processors found in cpuinfo");
        }

        let socket_count = cpu_sockets.values().map(|s| s.0).max().unwrap_or(0) + 1;
        #[allow(clippy::cast_possible_truncation)]
        let cpu_total = cpu_sockets.len() as u32;
        let cores_per_socket =
            cores_per_socket.unwrap_or_else(|| (cpu_total / socket_count).max(1)).max(1);
        let threads_per_core = siblings.map_or(1, |s| (s / cores_per_socket).max(1));

        Ok(Self { socket_count, cores_per_socket, threads_per_core, cpu_sockets })
    }

    /// Load a topology from a JSON file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, is malformed, or describes
    /// an empty machine
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read topology file {}", path.display()))?;
        let file: TopologyFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse topology file {}", path.display()))?;

        let mut topology =
            Self::uniform(file.socket_count, file.cores_per_socket, file.threads_per_core)?;
        if let Some(map) = file.cpu_sockets {
            if let Some((cpu, socket)) = map.iter().find(|(_, s)| **s >= file.socket_count) {
                bail!("cpu {cpu} maps to socket {socket}, but socket count is {}", file.socket_count);
            }
            topology.cpu_sockets =
                map.into_iter().map(|(cpu, socket)| (CpuId(cpu), SocketId(socket))).collect();
        }
        Ok(topology)
    }

    pub fn socket_count(&self) -> u32 {
        self.socket_count
    }

    pub fn cores_per_socket(&self) -> u32 {
        self.cores_per_socket
    }

    pub fn threads_per_core(&self) -> u32 {
        self.threads_per_core
    }

    /// Number of per-cpu slots needed to index every known cpu
    pub fn cpu_count(&self) -> usize {
        self.cpu_sockets.keys().next_back().map_or(0, |cpu| cpu.0 as usize + 1)
    }

    /// Socket the given logical cpu belongs to
    pub fn socket_of(&self, cpu: CpuId) -> Option<SocketId> {
        self.cpu_sockets.get(&cpu).copied()
    }
}

/// Get list of online CPU IDs from /sys/devices/system/cpu/online
///
/// # Errors
/// Returns an error if the file cannot be read or parsed
pub fn online_cpus() -> Result<Vec<CpuId>> {
    let content = fs::read_to_string("/sys/devices/system/cpu/online")
        .context("Failed to read /sys/devices/system/cpu/online")?;
    parse_cpu_list(&content)
}

/// Parse a kernel cpu list like "0-3" or "0-3,8-11"
pub fn parse_cpu_list(content: &str) -> Result<Vec<CpuId>> {
    let mut cpus = Vec::new();

    for range in content.trim().split(',').filter(|r| !r.is_empty()) {
        if let Some((start, end)) = range.split_once('-') {
            let start: u32 = start.trim().parse()?;
            let end: u32 = end.trim().parse()?;
            cpus.extend((start..=end).map(CpuId));
        } else {
            cpus.push(CpuId(range.trim().parse()?));
        }
    }

    Ok(cpus)
}
