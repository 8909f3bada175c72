//! Dialogue and adapter configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default persona prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Hiyori, a cheerful and friendly virtual character. \
Keep replies short and conversational. Express your feelings with an [EMOTION:<name>] tag, \
for example [EMOTION:happy], [EMOTION:thinking], [EMOTION:surprised] or [EMOTION:sad].";

/// Default reply for text input when the language model returns nothing
pub const DEFAULT_FALLBACK_REPLY: &str = "Sorry, I can't respond right now.";

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

/// Turn-taking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Persona prompt placed first in every context
    pub system_prompt: String,
    /// Turns kept in history (K)
    pub max_history_turns: usize,
    /// Most recent turns included in each LLM context
    pub context_turns: usize,
    /// Silence after speech that ends an utterance
    pub silence_timeout_secs: f64,
    /// Hard cap on a single utterance
    pub max_speech_duration_secs: f64,
    /// Voiced spans shorter than this are discarded as noise
    pub min_speech_duration_secs: f64,
    /// Pause in ERROR before returning to IDLE
    pub error_backoff_secs: f64,
    /// Reply used for text input when the model returns nothing
    pub fallback_reply: String,
    /// Capacity of the control channel
    pub control_capacity: usize,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_history_turns: 10,
            context_turns: 5,
            silence_timeout_secs: 2.0,
            max_speech_duration_secs: 30.0,
            min_speech_duration_secs: 0.2,
            error_backoff_secs: 1.0,
            fallback_reply: DEFAULT_FALLBACK_REPLY.to_string(),
            control_capacity: 32,
            event_capacity: 256,
        }
    }
}

impl DialogueConfig {
    /// Silence timeout as a duration
    #[must_use]
    pub fn silence_timeout(&self) -> Duration {
        secs(self.silence_timeout_secs)
    }

    /// Maximum utterance length as a duration
    #[must_use]
    pub fn max_speech_duration(&self) -> Duration {
        secs(self.max_speech_duration_secs)
    }

    /// Minimum voiced span as a duration
    #[must_use]
    pub fn min_speech_duration(&self) -> Duration {
        secs(self.min_speech_duration_secs)
    }

    /// ERROR backoff as a duration
    #[must_use]
    pub fn error_backoff(&self) -> Duration {
        secs(self.error_backoff_secs)
    }

    /// Validate bounds
    pub fn validate(&self) -> Result<()> {
        if self.max_history_turns == 0 {
            return Err(Error::Config("max_history_turns must be at least 1".to_string()));
        }
        if self.context_turns > self.max_history_turns {
            return Err(Error::Config(format!(
                "context_turns ({}) exceeds max_history_turns ({})",
                self.context_turns, self.max_history_turns
            )));
        }
        if !(self.silence_timeout_secs > 0.0) {
            return Err(Error::Config("silence_timeout_secs must be positive".to_string()));
        }
        if !(self.max_speech_duration_secs > 0.0) {
            return Err(Error::Config(
                "max_speech_duration_secs must be positive".to_string(),
            ));
        }
        if !(self.min_speech_duration_secs >= 0.0)
            || self.min_speech_duration_secs > self.max_speech_duration_secs
        {
            return Err(Error::Config(
                "min_speech_duration_secs must be within [0, max_speech_duration_secs]".to_string(),
            ));
        }
        if !(self.error_backoff_secs >= 0.0) {
            return Err(Error::Config("error_backoff_secs must be non-negative".to_string()));
        }
        if self.control_capacity == 0 || self.event_capacity == 0 {
            return Err(Error::Config("channel capacities must be positive".to_string()));
        }
        Ok(())
    }
}

/// Speech recognizer selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerKind {
    /// OpenAI-compatible `/audio/transcriptions` endpoint
    Whisper,
    /// Canned transcriptions
    #[default]
    Scripted,
}

/// Speech recognition adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    /// Backend
    pub provider: RecognizerKind,
    /// RMS level above which a chunk counts as voiced
    pub vad_threshold: f32,
    /// API base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Transcription language hint
    pub language: Option<String>,
    /// Request timeout
    pub timeout_secs: u64,
    /// Replies of the scripted recognizer, in order
    pub scripted: Vec<String>,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            provider: RecognizerKind::default(),
            vad_threshold: 0.02,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "whisper-1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            language: None,
            timeout_secs: 30,
            scripted: Vec::new(),
        }
    }
}

/// Language model selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmKind {
    /// OpenAI-compatible `/chat/completions` endpoint (OpenAI, Ollama, vLLM, ...)
    OpenAiCompatible,
    /// Anthropic Messages API
    Anthropic,
    /// Canned replies
    #[default]
    Scripted,
}

/// Language model adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Backend
    pub provider: LlmKind,
    /// API base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Maximum reply tokens
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Request timeout
    pub timeout_secs: u64,
    /// Replies of the scripted model, in order
    pub scripted: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmKind::default(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            max_tokens: 512,
            temperature: 0.7,
            timeout_secs: 60,
            scripted: Vec::new(),
        }
    }
}

/// Speech synthesizer selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesizerKind {
    /// OpenAI-compatible `/audio/speech` endpoint returning WAV
    OpenAiSpeech,
    /// Silent audio with an estimated phoneme timeline
    #[default]
    Estimating,
}

/// Speech synthesis adapter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Backend
    pub provider: SynthesizerKind,
    /// Seconds of speech per character for timeline estimation
    pub seconds_per_char: f32,
    /// Sample rate of estimated audio
    pub sample_rate: u32,
    /// API base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Voice name
    pub voice: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Request timeout
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: SynthesizerKind::default(),
            seconds_per_char: 0.1,
            sample_rate: 22_050,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "tts-1".to_string(),
            voice: "nova".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Audio device settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Use the system microphone and speakers (needs the `device-audio` feature)
    pub use_devices: bool,
    /// Capture sample rate
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            use_devices: false,
            sample_rate: 16_000,
        }
    }
}

/// All adapter settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    /// Speech recognition
    pub asr: AsrConfig,
    /// Language model
    pub llm: LlmConfig,
    /// Speech synthesis
    pub tts: TtsConfig,
    /// Audio devices
    pub audio: AudioConfig,
}

impl AdaptersConfig {
    /// Validate bounds
    pub fn validate(&self) -> Result<()> {
        if !(self.asr.vad_threshold >= 0.0) {
            return Err(Error::Config("asr.vad_threshold must be non-negative".to_string()));
        }
        if !(self.tts.seconds_per_char > 0.0) {
            return Err(Error::Config("tts.seconds_per_char must be positive".to_string()));
        }
        if self.tts.sample_rate == 0 || self.audio.sample_rate == 0 {
            return Err(Error::Config("sample rates must be positive".to_string()));
        }
        Ok(())
    }
}
