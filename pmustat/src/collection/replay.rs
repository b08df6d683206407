//! Playback of recorded `perf stat -j` output
//!
//! A recording has no timing, so frames are split where the `interval`
//! timestamp changes instead of on quiet periods.

use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::frames::{CollectedFrame, FrameAssembler, FrameContext};
use super::orchestrator::RunSummary;
use super::parser::parse_event_line;
use super::targets::TargetLabel;
use crate::domain::CollectionError;
use crate::sink::{spawn_receiver, FrameConsumer};

/// Replay `path` into `consumer`
///
/// # Errors
/// Returns an error if the file cannot be read or a batch does not match
/// the event definitions
pub async fn replay_file(path: &Path, ctx: FrameContext, consumer: Box<dyn FrameConsumer>) -> Result<RunSummary> {
    let file = File::open(path).await.with_context(|| format!("Failed to open {}", path.display()))?;
    let label = TargetLabel::Recording { path: path.display().to_string() };
    info!("Replaying {}", path.display());

    let (tx, rx) = mpsc::channel(64);
    let receiver = spawn_receiver(rx, consumer);
    let replayed = replay_stream(BufReader::new(file), FrameAssembler::new(label, ctx), &tx).await;
    drop(tx);
    let frames = receiver.await?;

    replayed?;
    Ok(RunSummary { cycles: 1, frames })
}

/// Segment a recorded stream on timestamp changes
///
/// Returns the number of frames sent.
pub async fn replay_stream<R>(
    reader: R,
    mut assembler: FrameAssembler,
    frames: &mpsc::Sender<CollectedFrame>,
) -> Result<u64, CollectionError>
where
    R: AsyncBufRead + Unpin,
{
    let target = assembler.target().to_string();
    let mut lines = reader.lines();
    let mut buffer: Vec<String> = Vec::new();
    let mut previous: Option<f64> = None;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|source| CollectionError::Stream { target: target.clone(), source })?
    {
        let timestamp = match parse_event_line(&line) {
            Ok(event) => event.timestamp,
            Err(e) => {
                warn!("Skipping unrecognized line [{line}]: {e}");
                continue;
            }
        };
        // identical text within one interval
        #[allow(clippy::float_cmp)]
        let boundary = previous.is_some_and(|p| p != timestamp);
        if boundary {
            flush(&mut assembler, &mut buffer, frames).await?;
        }
        previous = Some(timestamp);
        buffer.push(line);
    }

    flush(&mut assembler, &mut buffer, frames).await?;
    Ok(assembler.count())
}

async fn flush(
    assembler: &mut FrameAssembler,
    buffer: &mut Vec<String>,
    frames: &mpsc::Sender<CollectedFrame>,
) -> Result<(), CollectionError> {
    if buffer.is_empty() {
        return Ok(());
    }
    let target = assembler.target().to_string();
    let collected = assembler
        .assemble(buffer)
        .map_err(|source| CollectionError::Frame { target: target.clone(), source })?;
    buffer.clear();
    for frame in collected {
        frames.send(frame).await.map_err(|_| CollectionError::ReceiverClosed(target.clone()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::GroupDefinition;
    use crate::domain::{Granularity, Scope};
    use crate::topology::Topology;
    use std::sync::Arc;

    fn record(event: &str, interval: f64, value: u32) -> String {
        format!(
            r#"{{"interval" : {interval}, "cpu": "", "counter-value" : "{value}", "unit" : "", "event" : "{event}", "event-runtime" : 1, "pcnt-running" : 100.00}}"#
        )
    }

    fn assembler() -> FrameAssembler {
        let ctx = FrameContext {
            scope: Scope::System,
            granularity: Granularity::System,
            definitions: Arc::new(vec![GroupDefinition::from_names(&["cycles", "instructions"])]),
            topology: Arc::new(Topology::uniform(1, 1, 1).unwrap()),
        };
        FrameAssembler::new(TargetLabel::System, ctx)
    }

    #[tokio::test]
    async fn test_one_frame_per_timestamp() {
        let text = [
            record("cycles", 5.0, 1),
            record("instructions", 5.0, 2),
            "not a record".to_string(),
            record("cycles", 10.0, 3),
            record("instructions", 10.0, 4),
            record("cycles", 15.0, 5),
            record("instructions", 15.0, 6),
        ]
        .join("\n");
        let (tx, mut rx) = mpsc::channel(8);

        let count = replay_stream(text.as_bytes(), assembler(), &tx).await.unwrap();
        assert_eq!(count, 3);
        drop(tx);

        let mut previous = Vec::new();
        let mut cycles = Vec::new();
        while let Some(frame) = rx.recv().await {
            previous.push(frame.previous_timestamp);
            cycles.push(frame.frame.value("cycles").unwrap());
        }
        assert_eq!(cycles, vec![1.0, 3.0, 5.0]);
        assert_eq!(previous, vec![0.0, 5.0, 10.0]);
    }
}
