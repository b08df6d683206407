//! perf stat command assembly
//!
//! ```text
//! perf stat -I <ms> -j -a [-A]                     -e {a,b},{c} [sleep <s>]   system
//! perf stat -I <ms> -j -p <pid>                    -e {a,b},{c} [sleep <s>]   process
//! perf stat -I <ms> -j --for-each-cgroup <c1,c2>   -e {a,b},{c}               cgroup
//! ```
//!
//! Cgroup sessions never get a `sleep` terminator; the pipeline interrupts
//! them when their time is up.

use log::debug;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use super::targets::Target;
use crate::config::CollectionConfig;
use crate::definitions::{event_expression, GroupDefinition};
use crate::domain::ConfigError;

/// A perf invocation for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub target: Target,
}

impl SamplingCommand {
    /// The command line as a single string, for logs
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// Builds perf commands from the run configuration
#[derive(Debug, Clone)]
pub struct Launcher<'a> {
    config: &'a CollectionConfig,
    definitions: &'a [GroupDefinition],
}

impl<'a> Launcher<'a> {
    pub fn new(config: &'a CollectionConfig, definitions: &'a [GroupDefinition]) -> Self {
        Self { config, definitions }
    }

    /// One command per target
    ///
    /// `limit` bounds the session length; it is rounded up to whole seconds
    /// for perf's `sleep` workload.
    ///
    /// # Errors
    /// Returns [`ConfigError::NoTargets`] for an empty target list
    pub fn commands(
        &self,
        targets: Vec<Target>,
        limit: Option<Duration>,
    ) -> Result<Vec<SamplingCommand>, ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        let expression = event_expression(self.definitions);

        Ok(targets
            .into_iter()
            .map(|target| {
                let args = self.args(&target, &expression, limit);
                let command =
                    SamplingCommand { program: self.config.perf_path.clone(), args, target };
                debug!("perf command: {}", command.display());
                command
            })
            .collect())
    }

    fn args(&self, target: &Target, expression: &str, limit: Option<Duration>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "stat".into(),
            "-I".into(),
            self.config.interval.as_millis().to_string().into(),
            "-j".into(),
        ];

        match target {
            Target::System => {
                args.push("-a".into());
                if self.config.granularity.needs_per_cpu_counts() {
                    args.push("-A".into());
                }
            }
            Target::Process(process) => {
                args.push("-p".into());
                args.push(process.pid.0.to_string().into());
            }
            Target::Cgroups(cgroups) => {
                args.push("--for-each-cgroup".into());
                args.push(cgroups.join(",").into());
            }
        }

        args.push("-e".into());
        args.push(expression.into());

        if let Some(limit) = limit.filter(|l| !l.is_zero()) {
            if !matches!(target, Target::Cgroups(_)) {
                let seconds = limit.as_millis().div_ceil(1000);
                args.push("sleep".into());
                args.push(seconds.to_string().into());
            }
        }
        args
    }
}
