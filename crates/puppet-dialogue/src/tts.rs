//! Speech synthesis adapters and phoneme timeline estimation

use crate::audio::AudioBuffer;
use crate::config::{SynthesizerKind, TtsConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;
use puppet_anim::{MouthShape, PhonemeFrame};
use reqwest::Client;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Silence label
pub const SILENCE: &str = "sil";

/// Synthesized speech with its mouth timeline
#[derive(Debug, Clone, Default)]
pub struct Utterance {
    /// Audio to play
    pub audio: AudioBuffer,
    /// Ordered phoneme frames relative to audio start
    pub phonemes: Vec<PhonemeFrame>,
}

impl Utterance {
    /// Latest finite frame end; frames from remote backends may be unordered
    #[must_use]
    pub fn timeline_end(&self) -> Duration {
        let end = self
            .phonemes
            .iter()
            .map(|f| f.end)
            .filter(|end| end.is_finite())
            .fold(0.0_f32, f32::max);
        Duration::try_from_secs_f32(end).unwrap_or_default()
    }
}

/// Speech synthesis capability
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Synthesize `text` into audio and a phoneme timeline
    async fn synthesize(&self, text: &str) -> Result<Utterance>;
}

/// Mouth shape for a viseme label; unknown labels are a closed mouth
#[must_use]
pub fn viseme_shape(label: &str) -> MouthShape {
    let (open, jaw, form, funnel, pucker, press) = match label {
        "a" => (0.8, 0.6, 0.0, 0.0, 0.0, 0.0),
        "e" => (0.4, 0.3, 0.0, 0.0, 0.0, 0.0),
        "i" => (0.1, 0.1, 0.7, 0.0, -0.9, 0.0),
        "o" => (0.6, 0.4, 0.0, 0.6, 0.0, 0.0),
        "u" => (0.3, 0.2, 0.0, 0.8, 0.7, 0.0),
        "p" | "m" => (0.0, 0.0, 0.0, 0.0, 0.0, -1.0),
        "b" => (0.1, 0.1, 0.0, 0.0, 0.0, -0.5),
        "f" => (0.1, 0.0, 0.0, 0.0, 0.0, 0.3),
        "v" => (0.2, 0.1, 0.0, 0.0, 0.0, 0.2),
        "t" => (0.1, 0.1, 0.0, 0.0, 0.0, 0.5),
        "d" => (0.2, 0.1, 0.0, 0.0, 0.0, 0.3),
        "n" => (0.1, 0.1, 0.0, 0.0, 0.0, 0.2),
        "s" => (0.1, 0.0, 0.0, 0.0, 0.0, 0.8),
        "z" => (0.1, 0.0, 0.0, 0.0, 0.0, 0.6),
        "ʃ" => (0.2, 0.1, 0.0, 0.5, 0.3, 0.0),
        "k" | "g" | "h" => (0.3, 0.2, 0.0, 0.0, 0.0, 0.0),
        "l" => (0.3, 0.2, 0.0, 0.0, 0.0, 0.1),
        "r" => (0.3, 0.2, 0.0, 0.0, 0.2, 0.0),
        "w" => (0.2, 0.1, 0.0, 0.7, 0.6, 0.0),
        "j" => (0.1, 0.1, 0.5, 0.0, 0.0, 0.0),
        _ => (0.0, 0.0, 0.0, 0.0, 0.0, 0.0),
    };
    MouthShape {
        mouth_open_y: open,
        jaw_open: jaw,
        mouth_form: form,
        mouth_funnel: funnel,
        mouth_pucker_widen: pucker,
        mouth_press_lip_open: press,
        ..MouthShape::default()
    }
}

fn letter_viseme(c: char) -> &'static str {
    match c {
        'a' => "a",
        'e' => "e",
        'i' | 'y' => "i",
        'o' => "o",
        'u' => "u",
        'p' => "p",
        'b' => "b",
        'm' => "m",
        'f' => "f",
        'v' => "v",
        't' => "t",
        'd' => "d",
        'n' => "n",
        's' => "s",
        'z' => "z",
        'k' | 'c' | 'q' | 'x' => "k",
        'g' => "g",
        'h' => "h",
        'l' => "l",
        'r' => "r",
        'w' => "w",
        'j' => "j",
        c if c.is_alphabetic() => "a",
        _ => SILENCE,
    }
}

/// Letter-level timeline estimator for synthesizers without timing data.
///
/// Every character gets the same duration; the `sh` digraph maps to a single
/// two-character frame and runs of silence merge into one frame.
#[derive(Debug, Clone, Copy)]
pub struct PhonemeEstimator {
    seconds_per_char: f32,
}

impl Default for PhonemeEstimator {
    fn default() -> Self {
        Self::new(TtsConfig::default().seconds_per_char)
    }
}

impl PhonemeEstimator {
    /// Create with a per-character duration
    #[must_use]
    pub fn new(seconds_per_char: f32) -> Self {
        Self {
            seconds_per_char: if seconds_per_char > 0.0 { seconds_per_char } else { 0.1 },
        }
    }

    /// Estimated speaking time of `text`
    #[must_use]
    pub fn duration(&self, text: &str) -> Duration {
        Duration::from_secs_f32(text.chars().count() as f32 * self.seconds_per_char)
    }

    /// Build the phoneme timeline for `text`
    #[must_use]
    pub fn estimate(&self, text: &str) -> Vec<PhonemeFrame> {
        let chars: Vec<char> = text.chars().flat_map(char::to_lowercase).collect();
        let mut frames: Vec<PhonemeFrame> = Vec::with_capacity(chars.len());
        let mut clock = 0.0_f32;
        let mut i = 0;

        while i < chars.len() {
            let (label, width) = if chars[i] == 's' && chars.get(i + 1) == Some(&'h') {
                ("ʃ", 2)
            } else {
                (letter_viseme(chars[i]), 1)
            };
            let end = clock + self.seconds_per_char * width as f32;

            match frames.last_mut() {
                Some(last) if label == SILENCE && last.phoneme == SILENCE => last.end = end,
                _ => frames.push(PhonemeFrame::new(clock, end, label, viseme_shape(label))),
            }

            clock = end;
            i += width;
        }

        frames
    }

    /// Stretch a timeline so it ends at `target`
    #[must_use]
    pub fn fit(mut frames: Vec<PhonemeFrame>, target: Duration) -> Vec<PhonemeFrame> {
        let Some(end) = frames.last().map(|f| f.end) else {
            return frames;
        };
        if end <= 0.0 {
            return frames;
        }
        let scale = target.as_secs_f32() / end;
        for frame in &mut frames {
            frame.start *= scale;
            frame.end *= scale;
        }
        frames
    }
}

/// Silent audio of the estimated length plus the estimated timeline
#[derive(Debug, Clone)]
pub struct EstimatingSynthesizer {
    estimator: PhonemeEstimator,
    sample_rate: u32,
}

impl Default for EstimatingSynthesizer {
    fn default() -> Self {
        Self::from_config(&TtsConfig::default())
    }
}

impl EstimatingSynthesizer {
    /// Create from config
    #[must_use]
    pub fn from_config(config: &TtsConfig) -> Self {
        Self {
            estimator: PhonemeEstimator::new(config.seconds_per_char),
            sample_rate: config.sample_rate,
        }
    }

    fn render(&self, text: &str) -> Utterance {
        let phonemes = self.estimator.estimate(text);
        let audio = AudioBuffer::silent(self.estimator.duration(text), self.sample_rate.max(1));
        Utterance { audio, phonemes }
    }
}

#[async_trait]
impl SpeechSynthesizer for EstimatingSynthesizer {
    fn name(&self) -> &str {
        "estimating"
    }

    async fn synthesize(&self, text: &str) -> Result<Utterance> {
        let utterance = self.render(text);
        debug!(
            frames = utterance.phonemes.len(),
            duration_ms = utterance.audio.duration().as_millis() as u64,
            "Estimated utterance"
        );
        Ok(utterance)
    }
}

/// Estimating synthesizer with injectable failures, latency and a request log
#[derive(Debug, Clone, Default)]
pub struct ScriptedSynthesizer {
    inner: EstimatingSynthesizer,
    failures: Arc<Mutex<VecDeque<String>>>,
    texts: Arc<Mutex<Vec<String>>>,
    latency: Duration,
}

impl ScriptedSynthesizer {
    /// Create with default estimation settings
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated synthesis time per call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make the next call fail
    pub fn push_failure(&self, message: impl Into<String>) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message.into());
    }

    /// Every text synthesized so far
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of synthesis calls made
    #[must_use]
    pub fn calls(&self) -> usize {
        self.texts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn synthesize(&self, text: &str) -> Result<Utterance> {
        self.texts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match failure {
            Some(message) => Err(Error::Tts(message)),
            None => Ok(self.inner.render(text)),
        }
    }
}

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'static str,
}

/// OpenAI-compatible `/audio/speech` client.
///
/// The endpoint returns no timing data, so the estimated timeline is stretched
/// to the decoded audio length.
#[derive(Debug, Clone)]
pub struct OpenAiSpeechSynthesizer {
    client: Client,
    estimator: PhonemeEstimator,
    base_url: String,
    model: String,
    voice: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl OpenAiSpeechSynthesizer {
    /// Build from config
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))?;
        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            warn!(env = %config.api_key_env, "API key not set - requests are sent unauthenticated");
        }
        info!(model = %config.model, voice = %config.voice, "Speech synthesizer initialized");

        Ok(Self {
            client,
            estimator: PhonemeEstimator::new(config.seconds_per_char),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            api_key,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for OpenAiSpeechSynthesizer {
    fn name(&self) -> &str {
        "openai_speech"
    }

    #[instrument(skip(self, text), fields(model = %self.model, chars = text.len()))]
    async fn synthesize(&self, text: &str) -> Result<Utterance> {
        let body = SpeechRequest {
            model: &self.model,
            voice: &self.voice,
            input: text,
            response_format: "wav",
        };
        let mut request = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout_ms))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Tts(format!("Speech request failed with status {status}")));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::from_reqwest(&e, self.timeout_ms))?;

        let audio = AudioBuffer::from_wav(&bytes)?;
        let phonemes = PhonemeEstimator::fit(self.estimator.estimate(text), audio.duration());
        Ok(Utterance { audio, phonemes })
    }
}

/// Synthesizer variants selectable from configuration
#[derive(Debug, Clone)]
pub enum SynthesizerBackend {
    /// Remote speech endpoint
    OpenAiSpeech(OpenAiSpeechSynthesizer),
    /// Local timeline estimation with silent audio
    Estimating(EstimatingSynthesizer),
}

impl SynthesizerBackend {
    /// Select the backend named in `config`
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        Ok(match config.provider {
            SynthesizerKind::OpenAiSpeech => {
                Self::OpenAiSpeech(OpenAiSpeechSynthesizer::from_config(config)?)
            }
            SynthesizerKind::Estimating => Self::Estimating(EstimatingSynthesizer::from_config(config)),
        })
    }

    fn inner(&self) -> &dyn SpeechSynthesizer {
        match self {
            Self::OpenAiSpeech(s) => s,
            Self::Estimating(s) => s,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for SynthesizerBackend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    async fn synthesize(&self, text: &str) -> Result<Utterance> {
        self.inner().synthesize(text).await
    }
}
