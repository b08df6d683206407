//! One perf process, from spawn to exit
//!
//! perf writes its JSON records to stderr. The pipeline feeds them to a
//! [`Segmenter`] until perf closes the stream, then checks how perf exited.
//!
//! A session can be ended early by its cancellation token, either because
//! the caller cancelled the run or because the session deadline passed. perf
//! is sent SIGINT rather than killed so that it prints the interval it was
//! in the middle of; reading continues until the stream closes.

use log::{debug, warn};
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::frames::{CollectedFrame, FrameAssembler, FrameContext};
use super::launcher::SamplingCommand;
use super::segmenter::{Segmenter, LINES_PER_CPU};
use crate::domain::CollectionError;

/// Drives one [`SamplingCommand`]
#[derive(Debug)]
pub struct Pipeline {
    command: SamplingCommand,
    ctx: FrameContext,
    /// perf print interval, sizes the wait for the first line
    interval: Duration,
    /// Session length after which perf is interrupted
    deadline: Option<Duration>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        command: SamplingCommand,
        ctx: FrameContext,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self { command, ctx, interval, deadline: None, cancel }
    }

    /// Interrupt perf once `deadline` has elapsed
    #[must_use]
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run perf to completion, forwarding frames as they complete
    ///
    /// Returns the number of frames produced.
    pub async fn run(self, frames: mpsc::Sender<CollectedFrame>) -> Result<u64, CollectionError> {
        let label = self.command.target.label();
        let target = label.to_string();

        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CollectionError::Launch { target: target.clone(), source })?;
        debug!("Started perf for {target} (pid {:?})", child.id());

        let Some(stderr) = child.stderr.take() else {
            return Err(CollectionError::Launch {
                target,
                source: std::io::Error::other("perf stderr not captured"),
            });
        };

        // SIGINT once cancelled or out of time
        let session = self.cancel.child_token();
        let interrupter = child.id().map(|pid| {
            let session = session.clone();
            let deadline = self.deadline;
            tokio::spawn(async move {
                match deadline {
                    Some(deadline) => {
                        tokio::select! {
                            () = session.cancelled() => {}
                            () = tokio::time::sleep(deadline) => session.cancel(),
                        }
                    }
                    None => session.cancelled().await,
                }
                interrupt(pid);
            })
        });

        let cpus = self.ctx.topology.cpu_count().max(1);
        let segmenter = Segmenter::new(FrameAssembler::new(label, self.ctx), self.interval * 2)
            .with_capacity(cpus * LINES_PER_CPU);
        let segmented = segmenter.run(BufReader::new(stderr), &frames).await;

        if let Some(interrupter) = &interrupter {
            interrupter.abort();
        }

        let count = match segmented {
            Ok(count) => count,
            Err(e) => {
                if let Err(kill_err) = child.kill().await {
                    warn!("Failed to stop perf for {target}: {kill_err}");
                }
                return Err(e);
            }
        };

        let status = child
            .wait()
            .await
            .map_err(|source| CollectionError::Stream { target: target.clone(), source })?;

        if status.success() || session.is_cancelled() || stopped_on_request(&status) {
            debug!("perf for {target} exited ({status}) after {count} frames");
            Ok(count)
        } else {
            Err(CollectionError::UnexpectedExit { target, status })
        }
    }
}

/// perf died from an interrupt or termination request, not a crash or kill
fn stopped_on_request(status: &std::process::ExitStatus) -> bool {
    matches!(status.signal(), Some(libc::SIGINT | libc::SIGTERM))
}

/// Ask perf to print its last interval and exit
fn interrupt(pid: u32) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    debug!("Interrupting perf (pid {pid})");
    // SAFETY: kill has no memory-safety preconditions; the pid belongs to a
    // child we have not yet reaped.
    #[allow(unsafe_code)]
    let result = unsafe { libc::kill(pid, libc::SIGINT) };
    if result != 0 {
        debug!("SIGINT to {pid} failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::targets::Target;
    use crate::definitions::GroupDefinition;
    use crate::domain::{Granularity, Scope};
    use crate::topology::Topology;
    use std::ffi::OsString;
    use std::path::PathBuf;
    use std::sync::Arc;

    const RECORD: &str = r#"{"interval" : 1.0, "cpu": "", "counter-value" : "42.000000", "unit" : "", "event" : "cycles", "event-runtime" : 1000, "pcnt-running" : 100.00}"#;

    fn shell(script: &str) -> SamplingCommand {
        SamplingCommand {
            program: PathBuf::from("/bin/sh"),
            args: vec![OsString::from("-c"), OsString::from(script)],
            target: Target::System,
        }
    }

    fn pipeline(command: SamplingCommand, cancel: CancellationToken) -> Pipeline {
        let ctx = FrameContext {
            scope: Scope::System,
            granularity: Granularity::System,
            definitions: Arc::new(vec![GroupDefinition::from_names(&["cycles"])]),
            topology: Arc::new(Topology::uniform(1, 1, 1).unwrap()),
        };
        Pipeline::new(command, ctx, Duration::from_millis(200), cancel)
    }

    #[tokio::test]
    async fn test_frames_from_stderr() {
        let script = format!("printf '%s\\n' '{RECORD}' >&2; sleep 0.3; printf '%s\\n' '{RECORD}' >&2");
        let (tx, mut rx) = mpsc::channel(8);

        let count = pipeline(shell(&script), CancellationToken::new()).run(tx).await.unwrap();
        assert_eq!(count, 2);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.frame.value("cycles"), Some(42.0));
        assert_eq!(rx.recv().await.unwrap().number, 2);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let (tx, _rx) = mpsc::channel(8);
        let err = pipeline(shell("exit 3"), CancellationToken::new()).run(tx).await.unwrap_err();
        assert!(matches!(err, CollectionError::UnexpectedExit { .. }));
    }

    #[tokio::test]
    async fn test_killed_by_signal_is_an_error() {
        let (tx, _rx) = mpsc::channel(8);
        let err = pipeline(shell("kill -KILL $$"), CancellationToken::new()).run(tx).await.unwrap_err();
        assert!(matches!(err, CollectionError::UnexpectedExit { .. }));
    }

    #[tokio::test]
    async fn test_terminated_by_sigterm_is_success() {
        let (tx, _rx) = mpsc::channel(8);
        let count = pipeline(shell("kill -TERM $$"), CancellationToken::new()).run(tx).await.unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let (tx, _rx) = mpsc::channel(8);
        let command = SamplingCommand {
            program: PathBuf::from("/nonexistent/perf"),
            args: Vec::new(),
            target: Target::System,
        };
        let err = pipeline(command, CancellationToken::new()).run(tx).await.unwrap_err();
        assert!(matches!(err, CollectionError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_deadline_interrupts_and_flushes() {
        // like perf: print the last interval on SIGINT, then exit non-zero
        let script = format!(
            "emit() {{ printf '%s\\n' '{RECORD}' >&2; }}; trap 'emit; exit 130' INT; while true; do sleep 0.05; done"
        );
        let (tx, mut rx) = mpsc::channel(8);

        let count = pipeline(shell(&script), CancellationToken::new())
            .with_deadline(Some(Duration::from_millis(300)))
            .run(tx)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(rx.recv().await.unwrap().frame.value("cycles"), Some(42.0));
    }

    #[tokio::test]
    async fn test_cancel_interrupts() {
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::channel(8);
        let task = tokio::spawn(pipeline(shell("trap 'exit 0' INT; while true; do sleep 0.05; done"), cancel.clone()).run(tx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap().unwrap(), 0);
    }
}
