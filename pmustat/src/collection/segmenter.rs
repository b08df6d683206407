//! Splits perf's continuous output into frames
//!
//! perf writes a whole interval's records in one burst and then stays quiet
//! until the next interval. Nothing in the output marks the end of a burst,
//! so a frame is considered complete once no line has arrived for
//! [`IDLE_WINDOW`]. Before the first line the window is longer (twice the
//! print interval) to cover perf's startup.
//!
//! ```text
//! lines:  ||||||||||                 ||||||||||                 ||||
//!                   ◀─ IDLE_WINDOW ─▶ flush      ◀─ IDLE_WINDOW ─▶ flush   EOF ─▶ flush
//! ```

use log::{debug, trace};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use super::frames::{CollectedFrame, FrameAssembler};
use crate::domain::CollectionError;

/// Quiet period that ends a burst
pub const IDLE_WINDOW: Duration = Duration::from_millis(100);

/// Rough number of records per cpu in one burst, for buffer sizing
pub const LINES_PER_CPU: usize = 150;

/// Reads one target's output and forwards its frames
#[derive(Debug)]
pub struct Segmenter {
    assembler: FrameAssembler,
    first_wait: Duration,
    capacity: usize,
}

impl Segmenter {
    /// `first_wait` is how long to wait for perf's first line before the
    /// (empty) buffer is checked
    pub fn new(assembler: FrameAssembler, first_wait: Duration) -> Self {
        Self { assembler, first_wait, capacity: LINES_PER_CPU }
    }

    /// Pre-size the line buffer
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Read until the stream closes
    ///
    /// Returns the number of frames forwarded.
    ///
    /// # Errors
    /// Read failures, batches that do not match the event definitions, and a
    /// closed frame channel end the stream early.
    pub async fn run<R>(
        mut self,
        reader: R,
        frames: &mpsc::Sender<CollectedFrame>,
    ) -> Result<u64, CollectionError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        let mut buffer: Vec<String> = Vec::with_capacity(self.capacity);

        let idle = time::sleep(self.first_wait);
        tokio::pin!(idle);
        let mut armed = true;

        loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        trace!("{line}");
                        buffer.push(line);
                        idle.as_mut().reset(Instant::now() + IDLE_WINDOW);
                        armed = true;
                    }
                    Ok(None) => break,
                    Err(source) => {
                        return Err(CollectionError::Stream {
                            target: self.assembler.target().to_string(),
                            source,
                        });
                    }
                },
                () = &mut idle, if armed => {
                    armed = false;
                    self.flush(&mut buffer, frames).await?;
                }
            }
        }

        self.flush(&mut buffer, frames).await?;
        debug!("perf output for {} closed after {} frames", self.assembler.target(), self.assembler.count());
        Ok(self.assembler.count())
    }

    async fn flush(
        &mut self,
        buffer: &mut Vec<String>,
        frames: &mpsc::Sender<CollectedFrame>,
    ) -> Result<(), CollectionError> {
        if buffer.is_empty() {
            return Ok(());
        }
        let collected = self.assembler.assemble(buffer).map_err(|source| CollectionError::Frame {
            target: self.assembler.target().to_string(),
            source,
        })?;
        buffer.clear();

        for frame in collected {
            frames
                .send(frame)
                .await
                .map_err(|_| CollectionError::ReceiverClosed(self.assembler.target().to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::frames::FrameContext;
    use crate::collection::targets::TargetLabel;
    use crate::definitions::GroupDefinition;
    use crate::domain::{FrameError, Granularity, Scope};
    use crate::topology::Topology;
    use pmustat_common::FrameEntity;
    use std::sync::Arc;
    use tokio::io::{AsyncWriteExt, BufReader};

    fn record(event: &str, cpu: usize) -> String {
        format!(
            "{{\"interval\" : 5.0, \"cpu\": \"{cpu}\", \"counter-value\" : \"1.000000\", \"unit\" : \"\", \"event\" : \"{event}\", \"event-runtime\" : 1000, \"pcnt-running\" : 100.00}}\n"
        )
    }

    fn segmenter(granularity: Granularity) -> Segmenter {
        let ctx = FrameContext {
            scope: Scope::System,
            granularity,
            definitions: Arc::new(vec![GroupDefinition::from_names(&["cycles"])]),
            topology: Arc::new(Topology::uniform(1, 4, 1).unwrap()),
        };
        Segmenter::new(FrameAssembler::new(TargetLabel::System, ctx), Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_silence_emits_one_frame() {
        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let (tx, mut rx) = mpsc::channel(16);
        let task = tokio::spawn(async move {
            segmenter(Granularity::Socket).run(BufReader::new(reader), &tx).await
        });

        // 100 lines, 50 ms apart: 5 seconds of output with no gap reaching the idle window
        for i in 0..100 {
            writer.write_all(record("cycles", i % 4).as_bytes()).await.unwrap();
            if i < 99 {
                time::sleep(Duration::from_millis(50)).await;
            }
        }
        let last_line = Instant::now();

        let frame = time::timeout(Duration::from_millis(150), rx.recv())
            .await
            .expect("frame within the idle window")
            .unwrap();
        assert!(Instant::now() - last_line <= IDLE_WINDOW + Duration::from_millis(1));
        assert_eq!(frame.number, 1);
        assert_eq!(frame.frame.entity, FrameEntity::Socket(0));
        assert_eq!(frame.frame.value("cycles"), Some(100.0));
        assert!(rx.try_recv().is_err());

        drop(writer);
        assert_eq!(task.await.unwrap().unwrap(), 1);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_close_flushes_without_timer() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let (tx, mut rx) = mpsc::channel(16);
        let start = Instant::now();

        for cpu in 0..3 {
            writer.write_all(record("cycles", cpu).as_bytes()).await.unwrap();
        }
        drop(writer);

        let frames = segmenter(Granularity::Cpu).run(BufReader::new(reader), &tx).await.unwrap();
        assert_eq!(frames, 3);
        assert!(Instant::now() - start < IDLE_WINDOW);

        let entities: Vec<FrameEntity> =
            std::iter::from_fn(|| rx.try_recv().ok()).map(|f| f.frame.entity).collect();
        assert_eq!(entities, vec![FrameEntity::Cpu(0), FrameEntity::Cpu(1), FrameEntity::Cpu(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_stream_emits_nothing() {
        let (writer, reader) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            segmenter(Granularity::System).run(BufReader::new(reader), &tx).await
        });

        // first wait elapses with an empty buffer
        time::sleep(Duration::from_secs(3)).await;
        drop(writer);

        assert_eq!(task.await.unwrap().unwrap(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_batch_is_frame_error() {
        let (mut writer, reader) = tokio::io::duplex(4096);
        let (tx, _rx) = mpsc::channel(16);

        writer.write_all(record("cycles", 0).as_bytes()).await.unwrap();
        writer.write_all(record("instructions", 0).as_bytes()).await.unwrap();
        drop(writer);

        let err = segmenter(Granularity::System).run(BufReader::new(reader), &tx).await.unwrap_err();
        assert!(matches!(err, CollectionError::Frame { source: FrameError::GroupWrap, .. }));
    }
}
