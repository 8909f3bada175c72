//! Conversation state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Phase of the turn-taking loop.
///
/// The normal cycle is `Idle → Listening → Processing → Responding →
/// Speaking → Idle`; any phase may drop to `Error`, which recovers to `Idle`
/// after a backoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// Between turns
    #[default]
    Idle,
    /// Waiting for the end of an utterance
    Listening,
    /// Transcribing and waiting for the language model
    Processing,
    /// Applying the reply's emotion and synthesizing speech
    Responding,
    /// Playing audio with lipsync
    Speaking,
    /// Backing off after an adapter failure
    Error,
}

impl ConversationState {
    /// Whether a text message may preempt this phase
    #[must_use]
    pub fn accepts_text(&self) -> bool {
        matches!(self, Self::Idle | Self::Listening)
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Processing => "processing",
            Self::Responding => "responding",
            Self::Speaking => "speaking",
            Self::Error => "error",
        };
        write!(f, "{s}")
    }
}
