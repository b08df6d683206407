//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::domain::{Granularity, Scope};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pmustat",
    about = "Collect hardware performance counter frames through perf stat",
    after_help = "\
EXAMPLES:
    sudo pmustat -e events.txt                         System-wide, every 5 seconds
    sudo pmustat -e events.txt --granularity socket    One frame per socket
    sudo pmustat -e events.txt --scope process --pid 1234,5678
    sudo pmustat -e events.txt --scope cgroup --filter web --timeout 300
    pmustat -e events.txt --replay perfstat.json --topology topo.json"
)]
pub struct Args {
    /// Event group file (groups of perf events, ',' continues a group, ';' ends it)
    #[arg(short = 'e', long = "eventfile", value_name = "FILE")]
    pub event_file: Option<PathBuf>,

    // collection options
    /// Stop collecting after N seconds (0 = unlimited)
    #[arg(short, long, default_value_t = 0, value_name = "SECONDS")]
    pub timeout: u64,

    /// What to monitor
    #[arg(short, long, value_enum, default_value_t = Scope::System)]
    pub scope: Scope,

    /// Comma-separated process ids to monitor (process scope)
    #[arg(short, long, value_delimiter = ',', value_name = "PIDS")]
    pub pid: Vec<u32>,

    /// Comma-separated container ids to monitor (cgroup scope)
    #[arg(short, long, value_delimiter = ',', value_name = "CIDS")]
    pub cid: Vec<String>,

    /// Only discover processes or cgroups whose command line or path matches REGEX
    #[arg(short = 'F', long, value_name = "REGEX")]
    pub filter: Option<String>,

    /// Number of hottest processes or cgroups to monitor when none are given
    #[arg(short = 'n', long, default_value_t = 5)]
    pub count: usize,

    /// Re-discover hot processes or cgroups every N seconds
    #[arg(short, long, default_value_t = 30, value_name = "SECONDS")]
    pub refresh: u64,

    // output options
    /// Aggregation level (system scope only)
    #[arg(short, long, value_enum, default_value_t = Granularity::System)]
    pub granularity: Granularity,

    /// Write frames as JSON lines to FILE instead of stdout
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    // advanced options
    /// perf print interval
    #[arg(short, long, default_value_t = 5000, value_name = "MILLISECONDS")]
    pub interval: u64,

    /// Device multiplexing interval
    #[arg(short = 'x', long = "muxinterval", default_value_t = 125, value_name = "MILLISECONDS")]
    pub mux_interval: u64,

    /// perf binary to run (default: perf from PATH)
    #[arg(long, value_name = "PATH")]
    pub perf: Option<PathBuf>,

    // debug options
    /// Play back recorded `perf stat -j` output instead of running perf
    #[arg(long, value_name = "FILE", requires = "topology")]
    pub replay: Option<PathBuf>,

    /// Topology of the machine the replayed output was recorded on (JSON)
    #[arg(long, value_name = "FILE", requires = "replay")]
    pub topology: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
