//! Engine configuration
//!
//! One immutable, fully resolved object built at startup. Each component
//! receives its own section by value or behind an `Arc`; nothing reads
//! configuration from global state.

use crate::error::{Error, Result};
use puppet_anim::AnimationConfig;
use puppet_dialogue::{AdaptersConfig, DialogueConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Render loop settings
    pub render: RenderConfig,
    /// Audio capture loop settings
    pub capture: CaptureConfig,
    /// Animation engine settings
    pub animation: AnimationConfig,
    /// Conversation settings
    pub dialogue: DialogueConfig,
    /// Adapter selection and settings
    pub adapters: AdaptersConfig,
}

/// Render loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Target frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Model name passed to the renderer backend
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_fps() -> u32 {
    60
}

fn default_model() -> String {
    "Hiyori".to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            model: default_model(),
        }
    }
}

impl RenderConfig {
    /// Nominal frame interval
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.fps.max(1)))
    }

    /// Simulation step per frame, in seconds
    #[must_use]
    pub fn frame_dt(&self) -> f32 {
        1.0 / self.fps.max(1) as f32
    }
}

/// Audio capture loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Device polling interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Chunks buffered between capture and dialogue before the oldest is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Upper bound on chunks pulled from the device per poll
    #[serde(default = "default_max_chunks_per_poll")]
    pub max_chunks_per_poll: usize,
}

fn default_poll_interval_ms() -> u64 {
    10
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_chunks_per_poll() -> usize {
    4
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            queue_capacity: default_queue_capacity(),
            max_chunks_per_poll: default_max_chunks_per_poll(),
        }
    }
}

impl CaptureConfig {
    /// Polling interval as a duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl EngineConfig {
    /// Check every section; the first problem found is reported
    pub fn validate(&self) -> Result<()> {
        if self.render.fps == 0 {
            return Err(Error::config("render.fps", "must be positive"));
        }
        if self.render.model.trim().is_empty() {
            return Err(Error::config("render.model", "must not be empty"));
        }
        if self.capture.poll_interval_ms == 0 {
            return Err(Error::config("capture.poll_interval_ms", "must be positive"));
        }
        if self.capture.queue_capacity == 0 {
            return Err(Error::config("capture.queue_capacity", "must be positive"));
        }
        if self.capture.max_chunks_per_poll == 0 {
            return Err(Error::config("capture.max_chunks_per_poll", "must be positive"));
        }

        self.animation.validate().map_err(|e| match e {
            puppet_anim::Error::InvalidConfig { field, message } => {
                Error::config(format!("animation.{}", field), message)
            }
            other => Error::config("animation", other.to_string()),
        })?;

        self.dialogue.validate().map_err(|e| match e {
            puppet_dialogue::Error::Config(message) => Error::config("dialogue", message),
            other => Error::config("dialogue", other.to_string()),
        })?;
        self.adapters.validate().map_err(|e| match e {
            puppet_dialogue::Error::Config(message) => Error::config("adapters", message),
            other => Error::config("adapters", other.to_string()),
        })?;

        Ok(())
    }
}
