//! End-of-utterance detection
//!
//! Voice activity flags per chunk drive a small gap-logic machine: the first
//! voiced chunk opens a segment, silence longer than the timeout closes it, and
//! a hard cap ends segments that never fall silent. Voiced spans shorter than
//! the minimum are dropped as noise.

use crate::audio::{AudioBuffer, AudioChunk};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Detector phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Voiced chunks arriving
    Speaking,
    /// Speech seen, currently silent
    SilenceDetected,
}

/// Why a segment was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentEnd {
    /// Silence outlasted the timeout
    Silence,
    /// The utterance hit the length cap
    MaxDuration,
}

/// A closed utterance ready for transcription
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Captured audio including trailing silence
    pub audio: AudioBuffer,
    /// Time from the first to the last voiced chunk
    pub voiced: Duration,
    /// Reason the segment closed
    pub reason: SegmentEnd,
}

/// Timing limits
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    /// Silence that ends an utterance
    pub silence_timeout: Duration,
    /// Maximum utterance length
    pub max_speech: Duration,
    /// Shorter voiced spans are discarded
    pub min_speech: Duration,
}

/// Gap-logic utterance detector
#[derive(Debug)]
pub struct SpeechDetector {
    config: DetectorConfig,
    state: DetectorState,
    speech_start: Option<Instant>,
    last_voiced: Option<Instant>,
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SpeechDetector {
    /// Create an idle detector
    #[must_use]
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: DetectorState::Idle,
            speech_start: None,
            last_voiced: None,
            samples: Vec::new(),
            sample_rate: 0,
        }
    }

    /// Current phase
    #[must_use]
    pub fn state(&self) -> DetectorState {
        self.state
    }

    /// Feed one chunk with its voice activity flag
    pub fn feed(&mut self, voiced: bool, chunk: &AudioChunk, now: Instant) -> Option<SpeechSegment> {
        match (self.state, voiced) {
            (DetectorState::Idle, false) => return None,
            (DetectorState::Idle, true) => {
                debug!("Speech started");
                self.state = DetectorState::Speaking;
                self.speech_start = Some(now);
                self.last_voiced = Some(now);
                self.samples.clear();
                self.sample_rate = chunk.sample_rate;
            }
            (_, true) => {
                self.state = DetectorState::Speaking;
                self.last_voiced = Some(now);
            }
            (_, false) => {
                self.state = DetectorState::SilenceDetected;
            }
        }
        self.samples.extend_from_slice(&chunk.samples);
        self.poll(now)
    }

    /// Check the timers without new audio
    pub fn poll(&mut self, now: Instant) -> Option<SpeechSegment> {
        let (start, last_voiced) = match (self.speech_start, self.last_voiced) {
            (Some(start), Some(last)) => (start, last),
            _ => return None,
        };

        if now.saturating_duration_since(start) >= self.config.max_speech {
            info!("Max speech duration reached");
            return Some(self.close(start, last_voiced, SegmentEnd::MaxDuration));
        }

        if now.saturating_duration_since(last_voiced) >= self.config.silence_timeout {
            let voiced = last_voiced.saturating_duration_since(start);
            if voiced < self.config.min_speech {
                debug!(voiced_ms = voiced.as_millis() as u64, "Discarding short noise burst");
                self.reset();
                return None;
            }
            return Some(self.close(start, last_voiced, SegmentEnd::Silence));
        }

        None
    }

    /// When [`poll`](Self::poll) may next close the segment
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        let start = self.speech_start?;
        let last_voiced = self.last_voiced?;
        Some((last_voiced + self.config.silence_timeout).min(start + self.config.max_speech))
    }

    /// Drop any partial segment
    pub fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_start = None;
        self.last_voiced = None;
        self.samples.clear();
    }

    fn close(&mut self, start: Instant, last_voiced: Instant, reason: SegmentEnd) -> SpeechSegment {
        let segment = SpeechSegment {
            audio: AudioBuffer::new(std::mem::take(&mut self.samples), self.sample_rate),
            voiced: last_voiced.saturating_duration_since(start),
            reason,
        };
        self.reset();
        segment
    }
}
