//! Frame delivery
//!
//! All pipelines send their frames into one channel. A single receiver task
//! hands them, in arrival order, to a [`FrameConsumer`] such as a metric
//! evaluator or the [`JsonLinesWriter`].

use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::collection::CollectedFrame;

/// Something that does work with completed frames
pub trait FrameConsumer: Send {
    /// Handle one frame
    ///
    /// An error is logged and the next frame is still delivered.
    fn consume(&mut self, frame: &CollectedFrame) -> Result<()>;

    /// Called once after the last frame
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes each frame as one JSON object per line
pub struct JsonLinesWriter {
    writer: Box<dyn Write + Send>,
}

impl JsonLinesWriter {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Write to a new file at `path`
    ///
    /// # Errors
    /// Returns an error if the file cannot be created
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create export file {}", path.display()))?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

}

impl FrameConsumer for JsonLinesWriter {
    fn consume(&mut self, frame: &CollectedFrame) -> Result<()> {
        serde_json::to_writer(&mut self.writer, frame).context("Failed to serialize frame")?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush frames")
    }
}

/// Forward frames from `frames` to `consumer` until every sender is gone
///
/// The task resolves to the number of frames received.
pub fn spawn_receiver(
    mut frames: mpsc::Receiver<CollectedFrame>,
    mut consumer: Box<dyn FrameConsumer>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut received = 0;
        while let Some(frame) = frames.recv().await {
            received += 1;
            if let Err(e) = consumer.consume(&frame) {
                warn!("Failed to handle frame {} of {}: {e:#}", frame.number, frame.target);
            }
        }
        if let Err(e) = consumer.finish() {
            warn!("{e:#}");
        }
        debug!("Frame receiver done after {received} frames");
        received
    })
}
