//! Puppet Anim - procedural animation parameter engine
//!
//! Computes, once per render frame, the value of every model parameter from
//! independent animation sources:
//!
//! - Blink: randomized open interval, fixed close/open phases
//! - Breathing: periodic offsets around parameter defaults
//! - Lipsync: phoneme timeline on the mouth channel
//! - Expression: named parameter poses
//! - Motion: prioritized clip queue with fades
//!
//! # Usage
//!
//! ```rust,ignore
//! use puppet_anim::{AnimationConfig, AnimationEngine, AnimationHandle};
//!
//! let engine = AnimationEngine::new(&AnimationConfig::default())?;
//! let handle = AnimationHandle::new(engine);
//!
//! handle.apply_emotion("happy")?;
//! let frame = handle.tick(1.0 / 60.0)?;
//! println!("mouth: {:?}", frame.parameters.get("ParamMouthOpenY"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod blink;
pub mod breathing;
pub mod config;
pub mod emotion;
pub mod engine;
pub mod error;
pub mod expression;
pub mod lipsync;
pub mod motion;
pub mod parameter;
pub mod render;

pub use blink::BlinkPhase;
pub use config::{AnimationConfig, EmotionEntry, ExpressionEntry, MotionGroup};
pub use engine::{AnimationEngine, AnimationHandle, FrameState};
pub use error::{Error, Result};
pub use expression::ExpressionBlend;
pub use lipsync::{LipsyncCompletion, MouthChannel, MouthShape, PhonemeFrame};
pub use motion::{MotionClip, MotionPriority, MotionSample};
pub use parameter::{ParamId, ParameterSnapshot, ParameterSpec, ParameterStore};
pub use render::{HeadlessRenderer, ModelHandle, Renderer};
