//! Speech recognition adapters

use crate::audio::{AudioBuffer, AudioChunk};
use crate::config::{AsrConfig, RecognizerKind};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Speech recognition capability
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Whether the chunk contains speech
    fn detect_activity(&self, chunk: &AudioChunk) -> bool;

    /// Transcribe an utterance; an empty string means no speech
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String>;
}

/// RMS energy voice activity detector
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    /// Create with an RMS threshold
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.max(0.0),
        }
    }

    /// Whether the chunk's RMS exceeds the threshold
    #[must_use]
    pub fn is_voiced(&self, chunk: &AudioChunk) -> bool {
        !chunk.samples.is_empty() && chunk.rms() > self.threshold
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(AsrConfig::default().vad_threshold)
    }
}

/// Recognizer that returns queued transcripts in order.
///
/// Once the queue is empty every call yields an empty transcript.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRecognizer {
    vad: EnergyVad,
    transcripts: Arc<Mutex<VecDeque<Result<String>>>>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    heard: Arc<Mutex<Vec<usize>>>,
}

impl ScriptedRecognizer {
    /// Create with the given transcripts
    #[must_use]
    pub fn new<I, S>(transcripts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            transcripts: Arc::new(Mutex::new(
                transcripts.into_iter().map(|t| Ok(t.into())).collect(),
            )),
            ..Self::default()
        }
    }

    /// Simulated processing time per call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Use a specific voice activity detector
    #[must_use]
    pub fn with_vad(mut self, vad: EnergyVad) -> Self {
        self.vad = vad;
        self
    }

    /// Queue a transcript
    pub fn push(&self, transcript: impl Into<String>) {
        self.queue().push_back(Ok(transcript.into()));
    }

    /// Queue a failure
    pub fn push_failure(&self, message: impl Into<String>) {
        self.queue().push_back(Err(Error::Asr(message.into())));
    }

    /// Number of transcribe calls made
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Sample count of every buffer handed to `transcribe`
    #[must_use]
    pub fn heard(&self) -> Vec<usize> {
        self.heard.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String>>> {
        self.transcripts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect_activity(&self, chunk: &AudioChunk) -> bool {
        self.vad.is_voiced(chunk)
    }

    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.heard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(audio.samples.len());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.queue().pop_front();
        debug!(samples = audio.samples.len(), "Scripted transcription");
        next.unwrap_or_else(|| Ok(String::new()))
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client
#[derive(Debug, Clone)]
pub struct WhisperRecognizer {
    client: Client,
    vad: EnergyVad,
    base_url: String,
    model: String,
    language: Option<String>,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl WhisperRecognizer {
    /// Build from config; the API key is read from `api_key_env`
    pub fn from_config(config: &AsrConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;

        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "API key not set - requests are sent unauthenticated");
        }

        info!(model = %config.model, base_url = %config.base_url, "Whisper recognizer initialized");

        Ok(Self {
            client,
            vad: EnergyVad::new(config.vad_threshold),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            language: config.language.clone(),
            api_key,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperRecognizer {
    fn name(&self) -> &str {
        "whisper"
    }

    fn detect_activity(&self, chunk: &AudioChunk) -> bool {
        self.vad.is_voiced(chunk)
    }

    #[instrument(skip(self, audio), fields(model = %self.model, samples = audio.samples.len()))]
    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String> {
        if audio.is_empty() {
            return Ok(String::new());
        }

        let wav = audio.to_wav()?;
        let file = Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Asr(format!("Failed to build upload: {e}")))?;
        let mut form = Form::new()
            .part("file", file)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let mut request = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout_ms))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Asr(format!("Transcription failed with status {status}")));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;
        let text = body.text.trim().to_string();
        debug!(chars = text.len(), "Transcription result");
        Ok(text)
    }
}

/// Recognizer variants selectable from configuration
#[derive(Debug, Clone)]
pub enum RecognizerBackend {
    /// Remote Whisper endpoint
    Whisper(WhisperRecognizer),
    /// Canned transcripts
    Scripted(ScriptedRecognizer),
}

impl RecognizerBackend {
    /// Select the backend named in `config`
    pub fn from_config(config: &AsrConfig) -> Result<Self> {
        Ok(match config.provider {
            RecognizerKind::Whisper => Self::Whisper(WhisperRecognizer::from_config(config)?),
            RecognizerKind::Scripted => Self::Scripted(
                ScriptedRecognizer::new(config.scripted.iter().cloned())
                    .with_vad(EnergyVad::new(config.vad_threshold)),
            ),
        })
    }

    fn inner(&self) -> &dyn SpeechRecognizer {
        match self {
            Self::Whisper(r) => r,
            Self::Scripted(r) => r,
        }
    }
}

#[async_trait]
impl SpeechRecognizer for RecognizerBackend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn detect_activity(&self, chunk: &AudioChunk) -> bool {
        self.inner().detect_activity(chunk)
    }

    async fn transcribe(&self, audio: &AudioBuffer) -> Result<String> {
        self.inner().transcribe(audio).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_vad() {
        let vad = EnergyVad::new(0.02);
        assert!(!vad.is_voiced(&AudioChunk::silence(Duration::from_millis(10), 16_000)));
        assert!(vad.is_voiced(&AudioChunk::tone(Duration::from_millis(10), 16_000, 0.5)));
        assert!(!vad.is_voiced(&AudioChunk::new(Vec::new(), 16_000)));
    }

    #[test]
    fn test_scripted_recognizer_order_then_empty() {
        let recognizer = ScriptedRecognizer::new(["hello", "again"]);
        let audio = AudioBuffer::default();
        tokio_test::block_on(async {
            assert_eq!(tokio_test::assert_ok!(recognizer.transcribe(&audio).await), "hello");
            assert_eq!(tokio_test::assert_ok!(recognizer.transcribe(&audio).await), "again");
            assert_eq!(tokio_test::assert_ok!(recognizer.transcribe(&audio).await), "");
        });
        assert_eq!(recognizer.calls(), 3);
        assert_eq!(recognizer.heard(), vec![0, 0, 0]);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let recognizer = ScriptedRecognizer::default();
        recognizer.push_failure("device unplugged");
        let err = recognizer.transcribe(&AudioBuffer::default()).await.unwrap_err();
        assert!(err.is_adapter_failure());
    }

    #[test]
    fn test_backend_selection() {
        let config = AsrConfig {
            scripted: vec!["hi".to_string()],
            ..AsrConfig::default()
        };
        let backend = RecognizerBackend::from_config(&config).unwrap();
        assert_eq!(backend.name(), "scripted");

        let config = AsrConfig {
            provider: RecognizerKind::Whisper,
            ..AsrConfig::default()
        };
        let backend = RecognizerBackend::from_config(&config).unwrap();
        assert_eq!(backend.name(), "whisper");
    }
}
