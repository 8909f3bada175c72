//! Puppet Core - engine orchestration
//!
//! Ties the animation engine and the conversation loop into one running
//! avatar:
//!
//! - [`EngineConfig`]: the resolved, validated configuration
//! - [`load_config`]: layered loading from embedded defaults, files and env
//! - [`EngineOrchestrator`]: render loop, capture loop and dialogue task
//! - [`ChunkQueue`]: drop-oldest handoff from capture to dialogue
//!
//! # Usage
//!
//! ```rust,ignore
//! use puppet_core::{load_config, EngineComponents, EngineOrchestrator};
//!
//! let config = load_config(None)?;
//! let components = EngineComponents::from_config(&config)?;
//!
//! let mut engine = EngineOrchestrator::new(config)?;
//! engine.initialize(components)?;
//! engine.start()?;
//!
//! let reply = engine.dialogue()?.send_text("Hello!").await?;
//! engine.stop().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capture_loop;
pub mod chunk_queue;
pub mod config;
pub mod error;
pub mod loader;
pub mod orchestrator;
pub mod render_loop;
pub mod status;

pub use capture_loop::CaptureLoop;
pub use chunk_queue::ChunkQueue;
pub use config::{CaptureConfig, EngineConfig, RenderConfig};
pub use error::{Error, Result};
pub use loader::{load_config, load_config_from_str};
pub use orchestrator::{EngineComponents, EngineOrchestrator};
pub use render_loop::RenderLoop;
pub use status::{EngineState, EngineStatus};
