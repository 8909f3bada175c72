//! Audio buffers and the device seams of the conversation loop
//!
//! The conversation loop never touches hardware directly. Capture goes through
//! [`AudioInput`] (polled by the engine's capture thread) and reaches the
//! state machine as a [`ChunkSource`]; playback goes through [`AudioOutput`].
//! Simulated devices are always available, real ones behind the
//! `device-audio` feature.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn samples_duration(len: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(len as f64 / f64::from(sample_rate))
}

/// A short block of mono capture samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Create a chunk
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// A silent chunk of the given length
    #[must_use]
    pub fn silence(duration: Duration, sample_rate: u32) -> Self {
        let len = (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    /// A 220 Hz sine chunk, loud enough to count as voiced
    #[must_use]
    pub fn tone(duration: Duration, sample_rate: u32, amplitude: f32) -> Self {
        let len = (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
        let step = 2.0 * std::f32::consts::PI * 220.0 / sample_rate.max(1) as f32;
        let samples = (0..len).map(|i| (i as f32 * step).sin() * amplitude).collect();
        Self::new(samples, sample_rate)
    }

    /// Playing time of the chunk
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }

    /// Root-mean-square level
    #[must_use]
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.samples.iter().map(|s| s * s).sum::<f32>() / self.samples.len() as f32).sqrt()
    }
}

/// A complete mono utterance, either captured or synthesized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioBuffer {
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a buffer
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Silence of the given length
    #[must_use]
    pub fn silent(duration: Duration, sample_rate: u32) -> Self {
        let len = (duration.as_secs_f64() * f64::from(sample_rate)).round() as usize;
        Self::new(vec![0.0; len], sample_rate)
    }

    /// Playing time of the buffer
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_duration(self.samples.len(), self.sample_rate)
    }

    /// Whether the buffer holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Encode as 16-bit mono WAV
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| Error::Asr(format!("Failed to create WAV writer: {e}")))?;
            for &sample in &self.samples {
                let amplitude = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
                writer
                    .write_sample(amplitude)
                    .map_err(|e| Error::Asr(format!("Failed to write sample: {e}")))?;
            }
            writer
                .finalize()
                .map_err(|e| Error::Asr(format!("Failed to finalize WAV: {e}")))?;
        }

        Ok(cursor.into_inner())
    }

    /// Decode WAV bytes, downmixing to mono
    pub fn from_wav(bytes: &[u8]) -> Result<Self> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| Error::Tts(format!("Invalid WAV data: {e}")))?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Tts(format!("Failed to read WAV samples: {e}")))?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| Error::Tts(format!("Failed to read WAV samples: {e}")))?
            }
        };

        let samples = if channels > 1 {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        } else {
            interleaved
        };

        Ok(Self::new(samples, spec.sample_rate))
    }
}

/// Playback device.
///
/// `play` resolves when the buffer has finished playing or playback was
/// stopped. Starting a new playback stops the previous one.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play a buffer to completion
    async fn play(&self, audio: &AudioBuffer) -> Result<()>;

    /// Stop whatever is playing
    fn stop_playback(&self);

    /// Whether something is playing
    fn is_playing(&self) -> bool;
}

/// Capture device, polled by the capture thread
pub trait AudioInput: Send {
    /// Next available chunk, if any
    fn capture_chunk(&mut self) -> Result<Option<AudioChunk>>;
}

/// Async stream of capture chunks consumed by the state machine
#[async_trait]
pub trait ChunkSource: Send {
    /// Wait for the next chunk; `None` once the source is closed
    async fn recv(&mut self) -> Option<AudioChunk>;

    /// Take a chunk that is already waiting
    fn try_recv(&mut self) -> Option<AudioChunk>;

    /// Discard every waiting chunk and return how many were dropped
    fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while self.try_recv().is_some() {
            dropped += 1;
        }
        dropped
    }
}

#[async_trait]
impl ChunkSource for mpsc::Receiver<AudioChunk> {
    async fn recv(&mut self) -> Option<AudioChunk> {
        mpsc::Receiver::recv(self).await
    }

    fn try_recv(&mut self) -> Option<AudioChunk> {
        mpsc::Receiver::try_recv(self).ok()
    }
}

/// Output that "plays" by waiting for the buffer duration
#[derive(Debug, Default)]
pub struct SimulatedOutput {
    current: Mutex<Option<(u64, CancellationToken)>>,
    generation: AtomicU64,
    plays: AtomicUsize,
    stops: AtomicUsize,
}

impl SimulatedOutput {
    /// Create a simulated output
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of playbacks started
    #[must_use]
    pub fn play_count(&self) -> usize {
        self.plays.load(Ordering::SeqCst)
    }

    /// Number of stop requests
    #[must_use]
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<(u64, CancellationToken)>> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AudioOutput for SimulatedOutput {
    async fn play(&self, audio: &AudioBuffer) -> Result<()> {
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        if let Some((_, previous)) = self.slot().replace((id, token.clone())) {
            previous.cancel();
        }
        self.plays.fetch_add(1, Ordering::SeqCst);
        debug!(duration_ms = audio.duration().as_millis() as u64, "Simulated playback started");

        tokio::select! {
            () = tokio::time::sleep(audio.duration()) => {}
            () = token.cancelled() => debug!("Simulated playback stopped"),
        }

        let mut slot = self.slot();
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            *slot = None;
        }
        Ok(())
    }

    fn stop_playback(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some((_, token)) = self.slot().take() {
            token.cancel();
        }
    }

    fn is_playing(&self) -> bool {
        self.slot().is_some()
    }
}

/// Input that replays queued chunks
#[derive(Debug, Clone, Default)]
pub struct ScriptedInput {
    queue: Arc<Mutex<VecDeque<AudioChunk>>>,
}

impl ScriptedInput {
    /// Create an empty input
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk; clones share the queue
    pub fn push(&self, chunk: AudioChunk) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(chunk);
    }

    /// Queue an utterance: `speech` of tone followed by `silence`, split into
    /// `chunk` sized blocks
    pub fn push_utterance(&self, speech: Duration, silence: Duration, chunk: Duration, sample_rate: u32) {
        let mut remaining = speech;
        while !remaining.is_zero() {
            let step = remaining.min(chunk);
            self.push(AudioChunk::tone(step, sample_rate, 0.5));
            remaining -= step;
        }
        let mut remaining = silence;
        while !remaining.is_zero() {
            let step = remaining.min(chunk);
            self.push(AudioChunk::silence(step, sample_rate));
            remaining -= step;
        }
    }

    /// Chunks not yet captured
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl AudioInput for ScriptedInput {
    fn capture_chunk(&mut self) -> Result<Option<AudioChunk>> {
        Ok(self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front())
    }
}

#[cfg(feature = "device-audio")]
pub use device::{CpalInput, RodioOutput};

#[cfg(feature = "device-audio")]
mod device {
    use super::{AudioBuffer, AudioChunk, AudioInput, AudioOutput};
    use crate::error::{Error, Result};
    use async_trait::async_trait;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{SampleFormat, StreamConfig};
    use rodio::{buffer::SamplesBuffer, OutputStream, OutputStreamHandle, Sink};
    use std::sync::{mpsc as std_mpsc, Arc, Mutex};
    use std::time::Duration;
    use tracing::{error, info, warn};

    const PLAYBACK_POLL: Duration = Duration::from_millis(20);

    /// Microphone capture through cpal.
    ///
    /// The stream lives on its own thread; samples arrive downmixed to mono.
    pub struct CpalInput {
        rx: std_mpsc::Receiver<Vec<f32>>,
        sample_rate: u32,
        shutdown: std_mpsc::Sender<()>,
    }

    impl CpalInput {
        /// Open the default input device at `sample_rate`
        pub fn open(sample_rate: u32) -> Result<Self> {
            let (tx, rx) = std_mpsc::sync_channel::<Vec<f32>>(256);
            let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
            let (shutdown, shutdown_rx) = std_mpsc::channel::<()>();

            std::thread::Builder::new()
                .name("puppet-mic".to_string())
                .spawn(move || {
                    let stream = match build_input_stream(sample_rate, tx) {
                        Ok(stream) => stream,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(Ok(()));
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    info!("Audio recording stopped");
                })
                .map_err(|e| Error::AudioDevice(format!("Failed to spawn capture thread: {e}")))?;

            ready_rx
                .recv()
                .map_err(|_| Error::AudioDevice("Capture thread exited".to_string()))??;

            Ok(Self {
                rx,
                sample_rate,
                shutdown,
            })
        }
    }

    fn build_input_stream(
        sample_rate: u32,
        tx: std_mpsc::SyncSender<Vec<f32>>,
    ) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::AudioDevice("No input device found".to_string()))?;
        info!(
            device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
            "Using input device"
        );

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::AudioDevice(format!("Failed to get configs: {e}")))?
            .find(|c| {
                c.min_sample_rate().0 <= sample_rate
                    && c.max_sample_rate().0 >= sample_rate
                    && c.sample_format() == SampleFormat::F32
            })
            .ok_or_else(|| Error::AudioDevice(format!("No config supports {sample_rate}Hz F32")))?
            .with_sample_rate(cpal::SampleRate(sample_rate));
        let config: StreamConfig = supported.into();
        let channels = usize::from(config.channels);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> = if channels > 1 {
                        data.chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                            .collect()
                    } else {
                        data.to_vec()
                    };
                    let _ = tx.try_send(samples);
                },
                move |err| error!("Audio input error: {}", err),
                None,
            )
            .map_err(|e| Error::AudioDevice(format!("Failed to build stream: {e}")))?;
        stream
            .play()
            .map_err(|e| Error::AudioDevice(format!("Failed to start stream: {e}")))?;
        info!("Audio recording started");
        Ok(stream)
    }

    impl AudioInput for CpalInput {
        fn capture_chunk(&mut self) -> Result<Option<AudioChunk>> {
            match self.rx.try_recv() {
                Ok(samples) => Ok(Some(AudioChunk::new(samples, self.sample_rate))),
                Err(std_mpsc::TryRecvError::Empty) => Ok(None),
                Err(std_mpsc::TryRecvError::Disconnected) => {
                    Err(Error::AudioDevice("Input stream closed".to_string()))
                }
            }
        }
    }

    impl Drop for CpalInput {
        fn drop(&mut self) {
            let _ = self.shutdown.send(());
        }
    }

    /// Speaker playback through rodio
    pub struct RodioOutput {
        handle: OutputStreamHandle,
        sink: Mutex<Option<Arc<Sink>>>,
        shutdown: std_mpsc::Sender<()>,
    }

    impl RodioOutput {
        /// Open the default output device
        pub fn open() -> Result<Self> {
            let (ready_tx, ready_rx) = std_mpsc::channel::<Result<OutputStreamHandle>>();
            let (shutdown, shutdown_rx) = std_mpsc::channel::<()>();

            std::thread::Builder::new()
                .name("puppet-speaker".to_string())
                .spawn(move || match OutputStream::try_default() {
                    Ok((stream, handle)) => {
                        let _ = ready_tx.send(Ok(handle));
                        let _ = shutdown_rx.recv();
                        drop(stream);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::AudioDevice(format!(
                            "Failed to get output device: {e}"
                        ))));
                    }
                })
                .map_err(|e| Error::AudioDevice(format!("Failed to spawn output thread: {e}")))?;

            let handle = ready_rx
                .recv()
                .map_err(|_| Error::AudioDevice("Output thread exited".to_string()))??;
            info!("Audio output initialized");

            Ok(Self {
                handle,
                sink: Mutex::new(None),
                shutdown,
            })
        }

        fn current(&self) -> std::sync::MutexGuard<'_, Option<Arc<Sink>>> {
            self.sink.lock().unwrap_or_else(|e| e.into_inner())
        }
    }

    #[async_trait]
    impl AudioOutput for RodioOutput {
        async fn play(&self, audio: &AudioBuffer) -> Result<()> {
            let sink = Sink::try_new(&self.handle)
                .map_err(|e| Error::Playback(format!("Failed to create sink: {e}")))?;
            sink.append(SamplesBuffer::new(1, audio.sample_rate, audio.samples.clone()));
            let sink = Arc::new(sink);

            if let Some(previous) = self.current().replace(Arc::clone(&sink)) {
                previous.stop();
            }

            while !sink.empty() {
                tokio::time::sleep(PLAYBACK_POLL).await;
            }

            let mut current = self.current();
            if current.as_ref().is_some_and(|s| Arc::ptr_eq(s, &sink)) {
                *current = None;
            }
            Ok(())
        }

        fn stop_playback(&self) {
            if let Some(sink) = self.current().take() {
                sink.stop();
            }
        }

        fn is_playing(&self) -> bool {
            self.current().as_ref().is_some_and(|s| !s.empty())
        }
    }

    impl Drop for RodioOutput {
        fn drop(&mut self) {
            self.stop_playback();
            if self.shutdown.send(()).is_err() {
                warn!("Output thread already gone");
            }
        }
    }
}
