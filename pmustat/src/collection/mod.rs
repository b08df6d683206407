//! Collection engine: perf sessions in, event frames out
//!
//! - [`launcher`]: perf command lines per target
//! - [`pipeline`]: runs one perf process and reads its output
//! - [`segmenter`]: cuts the output into per-interval batches
//! - [`frames`]: batch → frames ([`parser`], [`coalesce`], [`uncore`])
//! - [`targets`]: explicit and discovered processes/cgroups
//! - [`orchestrator`]: concurrent pipelines and refresh cycles
//! - [`replay`]: recorded output instead of a live perf

pub mod coalesce;
pub mod frames;
pub mod launcher;
pub mod orchestrator;
pub mod parser;
pub mod pipeline;
pub mod replay;
pub mod segmenter;
pub mod targets;
pub mod uncore;

pub use frames::{build_frames, CollectedFrame, FrameAssembler, FrameContext};
pub use launcher::{Launcher, SamplingCommand};
pub use orchestrator::{Orchestrator, RunSummary};
pub use replay::replay_file;
pub use targets::{ProcfsDiscovery, Target, TargetDiscovery, TargetLabel};
