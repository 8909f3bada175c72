//! Error types for puppet-anim

use thiserror::Error;

/// Animation engine error type
#[derive(Debug, Error)]
pub enum Error {
    /// A parameter declaration is malformed (range, default)
    #[error("invalid parameter '{id}': {message}")]
    InvalidParameter {
        /// Parameter identifier
        id: String,
        /// Detailed message
        message: String,
    },

    /// Parameter identifier is not declared in the store
    #[error("unknown parameter: {0}")]
    UnknownParameter(String),

    /// Invalid animation configuration
    #[error("invalid animation config: {field}: {message}")]
    InvalidConfig {
        /// Config field path
        field: String,
        /// Detailed message
        message: String,
    },

    /// Expression or motion referenced but not present in the catalog
    #[error("animation asset missing: {kind} '{name}'")]
    AssetMissing {
        /// Asset kind ("expression" or "motion group")
        kind: &'static str,
        /// Asset name
        name: String,
    },

    /// The shared engine lock was poisoned by a panicking holder
    #[error("animation lock poisoned")]
    LockPoisoned,

    /// Renderer failure
    #[error("render error: {0}")]
    Render(String),
}

impl Error {
    /// Shorthand for a config validation failure
    pub(crate) fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error should stop the whole engine
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LockPoisoned)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
