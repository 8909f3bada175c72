//! Error types for puppet-core

use thiserror::Error;

/// Engine error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration failed validation; startup must stop
    #[error("invalid configuration: {field}: {message}")]
    ConfigInvalid {
        /// Config field path
        field: String,
        /// Detailed message
        message: String,
    },

    /// Configuration sources could not be read or deserialized
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// Animation engine error
    #[error(transparent)]
    Animation(#[from] puppet_anim::Error),

    /// Dialogue error
    #[error(transparent)]
    Dialogue(#[from] puppet_dialogue::Error),

    /// A shared lock was poisoned
    #[error("engine lock poisoned")]
    LockPoisoned,

    /// Operation not allowed in the current engine state
    #[error("invalid engine state: {0}")]
    InvalidState(String),

    /// A loop thread could not be spawned or joined
    #[error("thread error: {0}")]
    Thread(String),
}

impl Error {
    /// Shorthand for a validation failure
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error forces the engine into its error state
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::LockPoisoned | Self::Thread(_) => true,
            Self::Animation(e) => e.is_fatal(),
            Self::Dialogue(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
