//! Error types for puppet-dialogue

use thiserror::Error;

/// Dialogue error type
#[derive(Debug, Error)]
pub enum Error {
    /// Speech recognition failed
    #[error("ASR error: {0}")]
    Asr(String),

    /// Language model call failed or returned nothing usable
    #[error("LLM error: {0}")]
    Llm(String),

    /// Speech synthesis failed
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio playback failed
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio device error
    #[error("audio device error: {0}")]
    AudioDevice(String),

    /// Network error
    #[error("network error: {0}")]
    Network(String),

    /// Timeout
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// Invalid response from a remote service
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request was cancelled by an interrupt or shutdown
    #[error("cancelled")]
    Cancelled,

    /// The state machine is no longer running
    #[error("conversation channel closed")]
    ChannelClosed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Blank text submitted as a turn
    #[error("empty input")]
    EmptyInput,

    /// Animation engine error
    #[error(transparent)]
    Animation(#[from] puppet_anim::Error),
}

impl Error {
    /// Whether this is an adapter failure that only aborts the current turn
    #[must_use]
    pub fn is_adapter_failure(&self) -> bool {
        matches!(
            self,
            Self::Asr(_)
                | Self::Llm(_)
                | Self::Tts(_)
                | Self::Playback(_)
                | Self::AudioDevice(_)
                | Self::Network(_)
                | Self::Timeout(_)
                | Self::InvalidResponse(_)
        )
    }

    /// Whether the error must stop the whole engine
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Animation(e) if e.is_fatal())
    }

    /// Map a transport error, keeping timeouts distinct
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout_ms)
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_failure_classification() {
        assert!(Error::Asr("mic".to_string()).is_adapter_failure());
        assert!(Error::Timeout(30_000).is_adapter_failure());
        assert!(!Error::Cancelled.is_adapter_failure());
        assert!(!Error::Animation(puppet_anim::Error::LockPoisoned).is_adapter_failure());
    }

    #[test]
    fn test_only_lock_poisoning_is_fatal() {
        assert!(Error::Animation(puppet_anim::Error::LockPoisoned).is_fatal());
        assert!(!Error::Llm("empty".to_string()).is_fatal());
        assert!(!Error::Animation(puppet_anim::Error::UnknownParameter("x".to_string())).is_fatal());
    }
}
