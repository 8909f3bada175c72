//! Fixed-interval audio capture loop
//!
//! Polls the input device and forwards chunks into the [`ChunkQueue`]
//! without ever waiting on the dialogue task.

use crate::chunk_queue::ChunkQueue;
use crate::config::CaptureConfig;
use crate::error::{Error, Result};
use crate::status::EngineShared;
use puppet_dialogue::AudioInput;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) struct CaptureWorker {
    input: Box<dyn AudioInput>,
    queue: ChunkQueue,
    max_per_poll: usize,
    shared: Arc<EngineShared>,
    device_errors: u64,
}

impl CaptureWorker {
    pub(crate) fn new(
        input: Box<dyn AudioInput>,
        queue: ChunkQueue,
        config: &CaptureConfig,
        shared: Arc<EngineShared>,
    ) -> Self {
        Self {
            input,
            queue,
            max_per_poll: config.max_chunks_per_poll.max(1),
            shared,
            device_errors: 0,
        }
    }

    /// Move up to `max_per_poll` ready chunks into the queue
    pub(crate) fn poll(&mut self) -> usize {
        let mut moved = 0;
        while moved < self.max_per_poll {
            match self.input.capture_chunk() {
                Ok(Some(chunk)) => {
                    self.shared.chunk_captured();
                    self.queue.push(chunk);
                    moved += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    self.device_errors += 1;
                    if self.device_errors == 1 || self.device_errors % 100 == 0 {
                        warn!(error = %e, failures = self.device_errors, "Audio capture failed");
                    }
                    break;
                }
            }
        }
        moved
    }
}

/// Handle to the running capture thread
#[derive(Debug)]
pub struct CaptureLoop {
    thread: JoinHandle<()>,
}

impl CaptureLoop {
    pub(crate) fn spawn(
        mut worker: CaptureWorker,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let thread = std::thread::Builder::new()
            .name("puppet-capture".to_string())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "Capture loop started");
                while !cancel.is_cancelled() {
                    let started = Instant::now();
                    worker.poll();
                    if let Some(rest) = interval.checked_sub(started.elapsed()) {
                        std::thread::sleep(rest);
                    }
                }
                worker.queue.close();
                debug!(
                    captured = worker.shared.chunks_captured(),
                    dropped = worker.queue.dropped(),
                    "Capture loop stopped"
                );
            })
            .map_err(|e| Error::Thread(format!("failed to spawn capture thread: {}", e)))?;
        Ok(Self { thread })
    }

    /// Wait for the thread to exit
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| Error::Thread("capture thread panicked".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use puppet_dialogue::{AudioChunk, ScriptedInput};

    struct FailingInput;

    impl AudioInput for FailingInput {
        fn capture_chunk(&mut self) -> puppet_dialogue::Result<Option<AudioChunk>> {
            Err(puppet_dialogue::Error::AudioDevice("unplugged".to_string()))
        }
    }

    fn config(max_chunks_per_poll: usize) -> CaptureConfig {
        CaptureConfig {
            max_chunks_per_poll,
            ..CaptureConfig::default()
        }
    }

    fn filled_input(chunks: usize) -> ScriptedInput {
        let input = ScriptedInput::new();
        for _ in 0..chunks {
            input.push(AudioChunk::silence(Duration::from_millis(10), 16_000));
        }
        input
    }

    #[test]
    fn test_poll_moves_bounded_batch() {
        let input = filled_input(5);
        let queue = ChunkQueue::new(16);
        let shared = Arc::new(EngineShared::new());
        let mut worker =
            CaptureWorker::new(Box::new(input.clone()), queue.clone(), &config(2), Arc::clone(&shared));

        assert_eq!(worker.poll(), 2);
        assert_eq!(worker.poll(), 2);
        assert_eq!(worker.poll(), 1);
        assert_eq!(worker.poll(), 0);
        assert_eq!(queue.len(), 5);
        assert_eq!(shared.chunks_captured(), 5);
        assert_eq!(input.pending(), 0);
    }

    #[test]
    fn test_slow_consumer_loses_oldest_chunks() {
        let queue = ChunkQueue::new(3);
        let shared = Arc::new(EngineShared::new());
        let mut worker =
            CaptureWorker::new(Box::new(filled_input(8)), queue.clone(), &config(8), shared);

        assert_eq!(worker.poll(), 8);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dropped(), 5);
    }

    #[test]
    fn test_device_error_skips_poll() {
        let queue = ChunkQueue::new(3);
        let shared = Arc::new(EngineShared::new());
        let mut worker = CaptureWorker::new(Box::new(FailingInput), queue.clone(), &config(4), shared);

        assert_eq!(worker.poll(), 0);
        assert_eq!(worker.poll(), 0);
        assert_eq!(worker.device_errors, 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_loop_closes_queue_on_cancel() {
        let queue = ChunkQueue::new(8);
        let shared = Arc::new(EngineShared::new());
        let worker = CaptureWorker::new(Box::new(filled_input(3)), queue.clone(), &config(1), shared);
        let cancel = CancellationToken::new();

        let capture = CaptureLoop::spawn(worker, Duration::from_millis(1), cancel.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        capture.join().unwrap();

        assert!(queue.is_closed());
        assert_eq!(queue.len(), 3);
    }
}
