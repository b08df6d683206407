//! Collection cycles
//!
//! A cycle resolves the current targets, runs one [`Pipeline`] per target
//! concurrently and waits for all of them. Cycles repeat while targets are
//! discovered (process or cgroup scope without explicit ids) and the timeout
//! has not been reached, so the hot list is refreshed every `--refresh`
//! seconds.
//!
//! ```text
//!              ┌──────────── cycle ────────────┐
//! targets ──▶  │ pipeline ─┐                   │
//!              │ pipeline ─┼──▶ frame queue ───┼──▶ receiver task ──▶ FrameConsumer
//!              │ pipeline ─┘                   │
//!              │     └──────▶ completion queue │
//!              └───────────────────────────────┘
//! ```

use anyhow::Result;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::frames::{CollectedFrame, FrameContext};
use super::launcher::Launcher;
use super::pipeline::Pipeline;
use super::targets::{resolve_targets, Target, TargetDiscovery, TargetLabel};
use crate::config::CollectionConfig;
use crate::domain::CollectionError;
use crate::sink::{spawn_receiver, FrameConsumer};

/// Frames buffered between pipelines and the consumer
const FRAME_QUEUE: usize = 256;

/// What a finished run did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub cycles: u32,
    pub frames: u64,
}

/// Runs collection cycles until done, failed or cancelled
pub struct Orchestrator {
    config: CollectionConfig,
    ctx: FrameContext,
    discovery: Arc<dyn TargetDiscovery>,
}

impl Orchestrator {
    pub fn new(config: CollectionConfig, ctx: FrameContext, discovery: Arc<dyn TargetDiscovery>) -> Self {
        Self { config, ctx, discovery }
    }

    /// Collect until the timeout, the end of a non-refreshing cycle, the first
    /// failing cycle, or cancellation
    ///
    /// Every frame produced has been handed to `consumer` when this returns.
    ///
    /// # Errors
    /// Target resolution failures, and [`CollectionError::Aggregate`] holding
    /// every pipeline failure of the first cycle that had any
    pub async fn run(&self, consumer: Box<dyn FrameConsumer>, cancel: CancellationToken) -> Result<RunSummary> {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        let receiver = spawn_receiver(frame_rx, consumer);

        let cycles = self.cycles(&frame_tx, &cancel).await;
        drop(frame_tx);
        let frames = receiver.await?;

        Ok(RunSummary { cycles: cycles?, frames })
    }

    async fn cycles(&self, frames: &mpsc::Sender<CollectedFrame>, cancel: &CancellationToken) -> Result<u32> {
        let started = Instant::now();
        let mut cycle = 0;

        loop {
            let remaining = self.config.timeout.map(|t| t.saturating_sub(started.elapsed()));
            if cancel.is_cancelled() || (cycle > 0 && remaining.is_some_and(|r| r.is_zero())) {
                break;
            }
            cycle += 1;

            let limit = match (self.config.session_limit(), remaining) {
                (Some(limit), Some(remaining)) => Some(limit.min(remaining)),
                (limit, remaining) => limit.or(remaining),
            };
            self.run_cycle(cycle, limit, frames, cancel).await?;

            if !self.config.refreshes_targets() {
                break;
            }
        }
        Ok(cycle)
    }

    async fn run_cycle(
        &self,
        cycle: u32,
        limit: Option<Duration>,
        frames: &mpsc::Sender<CollectedFrame>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let targets = resolve_targets(&self.config, self.discovery.as_ref())?;
        let commands = Launcher::new(&self.config, &self.ctx.definitions).commands(targets, limit)?;
        info!("Cycle {cycle}: sampling {} target(s)", commands.len());

        let cycle_token = cancel.child_token();
        let (done_tx, mut done_rx) = mpsc::channel::<(TargetLabel, Result<u64, CollectionError>)>(commands.len());

        for command in commands {
            // perf's own sleep workload ends the other sessions
            let deadline = matches!(command.target, Target::Cgroups(_)).then_some(limit).flatten();
            let label = command.target.label();
            let pipeline = Pipeline::new(command, self.ctx.clone(), self.config.interval, cycle_token.clone())
                .with_deadline(deadline);
            let frames = frames.clone();
            let done = done_tx.clone();
            tokio::spawn(async move {
                let result = pipeline.run(frames).await;
                if done.send((label, result)).await.is_err() {
                    debug!("Completion queue closed");
                }
            });
        }
        drop(done_tx);

        let mut failures = Vec::new();
        while let Some((label, result)) = done_rx.recv().await {
            match result {
                Ok(count) => debug!("{label} finished with {count} frames"),
                Err(e) => {
                    error!("{e}");
                    failures.push(e);
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CollectionError::Aggregate(failures).into())
        }
    }
}
