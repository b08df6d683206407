//! Structured error types for pmustat
//!
//! Using thiserror for automatic Display implementation and error chaining.

use super::types::CpuId;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Invalid option combinations, caught before anything is launched
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("--granularity is relevant only for system scope")]
    GranularityRequiresSystemScope,

    #[error("--pid only valid when --scope is process")]
    PidsRequireProcessScope,

    #[error("--cid only valid when --scope is cgroup")]
    CidsRequireCgroupScope,

    #[error("--filter only valid when --scope is process or cgroup")]
    FilterRequiresTargetScope,

    #[error("--filter only valid when --pid and --cid are not specified")]
    FilterWithExplicitIds,

    #[error("invalid --filter expression: {0}")]
    InvalidFilter(String),

    #[error("--count must be one or more")]
    ZeroCount,

    #[error("--interval must be at least 1 millisecond")]
    ZeroInterval,

    #[error("--timeout must be greater than or equal to --interval")]
    TimeoutShorterThanInterval,

    #[error("--refresh must be greater than or equal to --interval")]
    RefreshShorterThanInterval,

    #[error("--replay and --topology must both be specified")]
    ReplayNeedsTopology,

    #[error("--eventfile is required")]
    MissingEventFile,

    #[error("invalid process id '{0}'")]
    InvalidPid(String),

    #[error("no targets selected")]
    NoTargets,
}

/// The batch of perf output does not line up with the event definitions
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("no event group definitions")]
    NoDefinitions,

    #[error("event group definitions not aligning with raw events")]
    GroupWrap,

    #[error("batch ended inside group {group} of {definitions} (event {event} of {group_size})")]
    IncompleteBatch { group: usize, definitions: usize, event: usize, group_size: usize },

    #[error("'{0}' is not a cpu id")]
    InvalidCpu(String),

    #[error("{0} not present in topology")]
    UnknownCpu(CpuId),
}

/// Failure of one sampling pipeline, or of a whole collection cycle
#[derive(Error, Debug)]
pub enum CollectionError {
    #[error("failed to run perf for {target}: {source}")]
    Launch {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("error from perf on exit for {target}: {status}")]
    UnexpectedExit { target: String, status: ExitStatus },

    #[error("failed reading perf output for {target}: {source}")]
    Stream {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build frames for {target}: {source}")]
    Frame {
        target: String,
        #[source]
        source: FrameError,
    },

    #[error("frame receiver closed while {0} was still sampling")]
    ReceiverClosed(String),

    #[error("error(s) from perf commands: {}", join_failures(.0))]
    Aggregate(Vec<CollectionError>),
}

fn join_failures(failures: &[CollectionError]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Reading or writing a kernel tunable failed
#[derive(Error, Debug)]
pub enum TunableError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {value} to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        value: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected content '{value}' in {}", path.display())]
    Parse { path: PathBuf, value: String },
}
