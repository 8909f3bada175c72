//! Puppet Dialogue - turn-taking conversation loop
//!
//! Sequences one conversation turn at a time:
//!
//! - Listen: voice activity per capture chunk, utterance closed by a silence gap
//! - Recognize: speech recognizer adapter
//! - Think: language model adapter with a bounded history window
//! - Respond: `[EMOTION:<id>]` tags drive the avatar's expression and motion
//! - Speak: synthesized audio played alongside a lipsync timeline
//!
//! Adapters are closed sets of backends selected once from configuration.
//! Scripted backends and simulated audio devices are always compiled in so the
//! loop can run without network access or sound hardware.
//!
//! # Usage
//!
//! ```rust,ignore
//! use puppet_dialogue::{ConversationStateMachine, DialogueAdapters, DialogueConfig};
//!
//! let (machine, handle) =
//!     ConversationStateMachine::new(DialogueConfig::default(), adapters, animation, chunks)?;
//! tokio::spawn(machine.run(cancel.clone()));
//!
//! let reply = handle.send_text("Hello!").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod asr;
pub mod audio;
pub mod config;
pub mod detector;
pub mod emotion_tag;
pub mod error;
pub mod events;
pub mod history;
pub mod llm;
pub mod machine;
pub mod message;
mod pipeline;
pub mod state;
pub mod tts;

pub use asr::{EnergyVad, RecognizerBackend, ScriptedRecognizer, SpeechRecognizer, WhisperRecognizer};
pub use audio::{
    AudioBuffer, AudioChunk, AudioInput, AudioOutput, ChunkSource, ScriptedInput, SimulatedOutput,
};
#[cfg(feature = "device-audio")]
pub use audio::{CpalInput, RodioOutput};
pub use config::{AdaptersConfig, DialogueConfig};
pub use detector::{SegmentEnd, SpeechDetector, SpeechSegment};
pub use emotion_tag::{parse_emotion_tags, ParsedReply};
pub use error::{Error, Result};
pub use events::{ConversationEvent, EventBus};
pub use history::{build_context, ConversationTurn, TurnHistory};
pub use llm::{LanguageModel, LlmBackend, ScriptedLanguageModel};
pub use machine::{ConversationStateMachine, DialogueAdapters, DialogueHandle};
pub use message::{Message, MessageRole};
pub use state::ConversationState;
pub use tts::{
    EstimatingSynthesizer, PhonemeEstimator, ScriptedSynthesizer, SpeechSynthesizer,
    SynthesizerBackend, Utterance,
};
