//! # pmustat - PMU Counter Frame Collector
//!
//! pmustat samples processor performance-counter events through `perf stat`
//! (system-wide, per process, or per control group) and turns perf's
//! continuous output into discrete, time-aligned [`EventFrame`]s ready for
//! metric evaluation.
//!
//! [`EventFrame`]: pmustat_common::EventFrame
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  perf stat -I <ms> -j -e {..},{..}              │
//! │          (one process per target, JSON records on stderr)       │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ newline-delimited records, one burst per interval
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     pmustat (This Crate)                        │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │   Pipeline   │──▶│  Segmenter   │──▶│    Frames    │         │
//! │  │ (per target) │   │ (idle timer) │   │ parse/split/ │         │
//! │  └──────────────┘   └──────────────┘   │   collapse   │         │
//! │         ▲                              └──────┬───────┘         │
//! │         │                                     │ frame queue     │
//! │  ┌──────────────┐                      ┌──────▼───────┐         │
//! │  │ Orchestrator │                      │     Sink     │         │
//! │  │   (cycles)   │                      │  (consumer)  │         │
//! │  └──────────────┘                      └──────────────┘         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`collection`]: perf command assembly, per-target pipelines, frame
//!   segmentation and building, target discovery, collection cycles, replay
//! - [`tunables`]: multiplexing interval and NMI watchdog overrides, restored
//!   on drop
//! - [`sink`]: the [`sink::FrameConsumer`] seam and the JSON-lines writer
//! - [`definitions`]: event group file reader
//! - [`topology`]: socket/core/thread layout and the cpu → socket map
//! - [`config`]: validated [`config::CollectionConfig`]
//! - [`cli`]: command-line argument parsing
//! - [`preflight`]: privilege and perf availability checks
//! - [`domain`]: core domain types (Pid, CpuId, SocketId, Scope) and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # System-wide, one frame per socket every 5 seconds
//! sudo ./pmustat -e events.txt --granularity socket
//!
//! # The 5 busiest processes, refreshed every 30 seconds, for 5 minutes
//! sudo ./pmustat -e events.txt --scope process --timeout 300
//!
//! # Replay output recorded on another machine
//! ./pmustat -e events.txt --replay perfstat.json --topology topo.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Group**: events the hardware schedules together on its counters
//! - **Multiplexing**: the kernel rotates groups when there are more groups
//!   than counters; `pcnt-running` reports each group's share
//! - **Uncore**: counters of shared units (memory controller, CHA), reported
//!   once per device instance and merged per frame

// Expose modules for testing
pub mod cli;
pub mod collection;
pub mod config;
pub mod definitions;
pub mod domain;
pub mod preflight;
pub mod sink;
pub mod topology;
pub mod tunables;
