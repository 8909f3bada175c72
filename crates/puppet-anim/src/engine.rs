//! Animation parameter engine
//!
//! Composes the animation sources into one parameter vector per frame. The
//! order inside [`AnimationEngine::advance`] is fixed:
//!
//! 1. advance source clocks (blink, lipsync, motion)
//! 2. reset every target to its default
//! 3. breathing, then blink (baseline)
//! 4. lipsync on the mouth channel
//! 5. expression, with the mouth channel masked while an utterance plays
//! 6. smoothing of `current` toward `target`
//!
//! Every contribution is clamped to the parameter range as it is written.

use crate::blink::{BlinkPhase, BlinkSource};
use crate::breathing::BreathingSource;
use crate::config::{AnimationConfig, EmotionEntry};
use crate::emotion::EmotionTable;
use crate::error::{Error, Result};
use crate::expression::ExpressionSource;
use crate::lipsync::{LipsyncCompletion, LipsyncSource, PhonemeFrame};
use crate::motion::{MotionPlayer, MotionPriority, MotionSample};
use crate::parameter::{ParamId, ParameterSnapshot, ParameterStore};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

#[cfg(test)]
mod tests;

/// Everything the renderer needs for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameState {
    /// Frames advanced since creation
    pub frame_index: u64,
    /// Simulation time in seconds
    pub time: f64,
    /// Smoothed parameter values
    pub parameters: ParameterSnapshot,
    /// Active expression
    pub expression: Option<String>,
    /// Running motion clip
    pub motion: Option<MotionSample>,
    /// Blink phase
    pub blink_phase: BlinkPhase,
    /// Whether a lipsync timeline is playing
    pub speaking: bool,
}

/// The animation parameter engine
#[derive(Debug)]
pub struct AnimationEngine {
    store: ParameterStore,
    blink: BlinkSource,
    breathing: BreathingSource,
    lipsync: LipsyncSource,
    expression: ExpressionSource,
    motion: MotionPlayer,
    emotions: EmotionTable,
    neutral_expression: String,
    idle_motion_group: String,
    time: f64,
    frame_index: u64,
}

impl AnimationEngine {
    /// Validate the configuration and build every source
    pub fn new(config: &AnimationConfig) -> Result<Self> {
        config.validate()?;

        let store = ParameterStore::new(
            &config.parameters,
            config.smoothing.rate,
            config.smoothing.enabled,
        )?;
        let blink = BlinkSource::new(&config.blink, &store, config.seed)?;
        let breathing = BreathingSource::new(&config.breathing, &store)?;
        let lipsync = LipsyncSource::new(&config.lipsync, &store)?;
        let expression = ExpressionSource::new(&config.expressions, &store)?;
        let motion = MotionPlayer::new(
            config.motions.clone(),
            config.auto_idle.then(|| config.idle_motion_group.clone()),
            config.seed.map(|seed| seed.wrapping_add(1)),
        );

        let neutral = EmotionEntry {
            expression: config.neutral_expression.clone(),
            motion_group: config.idle_motion_group.clone(),
        };
        let emotions = EmotionTable::new(config.emotions.clone(), neutral);

        debug!(
            parameters = store.len(),
            expressions = config.expressions.len(),
            motion_groups = config.motions.len(),
            "Animation engine created"
        );

        Ok(Self {
            store,
            blink,
            breathing,
            lipsync,
            expression,
            motion,
            emotions,
            neutral_expression: config.neutral_expression.clone(),
            idle_motion_group: config.idle_motion_group.clone(),
            time: 0.0,
            frame_index: 0,
        })
    }

    /// Advance the simulation by `dt` seconds
    pub fn advance(&mut self, dt: f32) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.time += f64::from(dt);
        self.frame_index += 1;

        self.blink.update(dt);
        self.lipsync.update(dt);
        self.motion.update(dt);

        self.store.reset_targets();
        self.breathing.apply(&mut self.store, self.time);
        self.blink.apply(&mut self.store);
        self.lipsync.apply(&mut self.store);

        let masked: &[ParamId] = if self.lipsync.is_active() {
            self.lipsync.channel()
        } else {
            &[]
        };
        self.expression.apply(&mut self.store, masked);

        self.store.apply_smoothing(dt);
    }

    /// Snapshot of the current frame
    #[must_use]
    pub fn frame(&self) -> FrameState {
        FrameState {
            frame_index: self.frame_index,
            time: self.time,
            parameters: self.store.snapshot(),
            expression: self.expression.active().map(str::to_string),
            motion: self.motion.active(),
            blink_phase: self.blink.phase(),
            speaking: self.lipsync.is_active(),
        }
    }

    /// Parameter store
    #[must_use]
    pub fn store(&self) -> &ParameterStore {
        &self.store
    }

    /// Simulation time in seconds
    #[must_use]
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Whether a lipsync timeline is playing
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.lipsync.is_active()
    }

    /// Number of phoneme frames still pending
    #[must_use]
    pub fn pending_phonemes(&self) -> usize {
        self.lipsync.pending()
    }

    /// Active expression name
    #[must_use]
    pub fn expression(&self) -> Option<&str> {
        self.expression.active()
    }

    /// Running motion
    #[must_use]
    pub fn motion(&self) -> Option<MotionSample> {
        self.motion.active()
    }

    /// Number of queued motions
    #[must_use]
    pub fn queued_motions(&self) -> usize {
        self.motion.queued()
    }

    /// Blink phase
    #[must_use]
    pub fn blink_phase(&self) -> BlinkPhase {
        self.blink.phase()
    }

    /// Select an expression by name
    pub fn set_expression(&mut self, name: &str) -> Result<()> {
        self.expression.set(name)
    }

    /// Request a motion from a group
    pub fn play_motion(&mut self, group: &str, priority: MotionPriority) -> Result<bool> {
        self.motion.play(group, priority)
    }

    /// Apply the expression and motion mapped to an emotion tag.
    ///
    /// Unknown tags and missing assets fall back to the neutral expression and
    /// idle motion group. Returns whether the tag was known.
    pub fn apply_emotion(&mut self, tag: &str) -> bool {
        let found = self.emotions.resolve(tag);
        let known = found.known;
        let expression = found.entry.expression.clone();
        let motion_group = found.entry.motion_group.clone();

        if !known {
            warn!(emotion = %tag, "Unknown emotion tag, using neutral animation");
        }

        if let Err(e) = self.expression.set(&expression) {
            warn!(error = %e, "Falling back to neutral expression");
            self.set_neutral_expression();
        }

        let priority = if known {
            MotionPriority::Normal
        } else {
            MotionPriority::Idle
        };
        if let Err(e) = self.motion.play(&motion_group, priority) {
            warn!(error = %e, "Falling back to idle motion");
            self.play_idle_motion();
        }

        debug!(emotion = %tag, expression = %expression, motion_group = %motion_group, "Emotion applied");
        known
    }

    /// Neutral expression plus the idle motion group
    pub fn set_idle_animation(&mut self) {
        self.set_neutral_expression();
        self.play_idle_motion();
    }

    /// Install a phoneme timeline starting now
    pub fn schedule_lipsync(&mut self, frames: Vec<PhonemeFrame>) -> LipsyncCompletion {
        self.lipsync.schedule(frames)
    }

    /// Drop the pending phoneme timeline
    pub fn clear_lipsync(&mut self) {
        self.lipsync.clear();
    }

    /// Stop the running motion and drop the queue
    pub fn clear_motions(&mut self) {
        self.motion.clear();
    }

    fn set_neutral_expression(&mut self) {
        if let Err(e) = self.expression.set(&self.neutral_expression) {
            warn!(error = %e, "Neutral expression unavailable");
            self.expression.clear();
        }
    }

    fn play_idle_motion(&mut self) {
        if let Err(e) = self.motion.play(&self.idle_motion_group, MotionPriority::Idle) {
            warn!(error = %e, "Idle motion group unavailable");
        }
    }
}

/// Shared, lock-protected engine.
///
/// The render loop and the dialogue task both go through this handle, so the
/// renderer always sees a frame computed entirely before or entirely after a
/// dialogue-side update. A poisoned lock surfaces as [`Error::LockPoisoned`].
#[derive(Debug, Clone)]
pub struct AnimationHandle {
    inner: Arc<Mutex<AnimationEngine>>,
}

impl AnimationHandle {
    /// Wrap an engine
    #[must_use]
    pub fn new(engine: AnimationEngine) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }

    /// Run `f` with exclusive access to the engine
    pub fn with<R>(&self, f: impl FnOnce(&mut AnimationEngine) -> R) -> Result<R> {
        let mut engine = self.inner.lock().map_err(|_| Error::LockPoisoned)?;
        Ok(f(&mut engine))
    }

    /// Advance by `dt` and return the resulting frame
    pub fn tick(&self, dt: f32) -> Result<FrameState> {
        self.with(|engine| {
            engine.advance(dt);
            engine.frame()
        })
    }

    /// Current frame without advancing
    pub fn frame(&self) -> Result<FrameState> {
        self.with(|engine| engine.frame())
    }

    /// See [`AnimationEngine::apply_emotion`]
    pub fn apply_emotion(&self, tag: &str) -> Result<bool> {
        self.with(|engine| engine.apply_emotion(tag))
    }

    /// See [`AnimationEngine::set_idle_animation`]
    pub fn set_idle_animation(&self) -> Result<()> {
        self.with(AnimationEngine::set_idle_animation)
    }

    /// See [`AnimationEngine::schedule_lipsync`]
    pub fn schedule_lipsync(&self, frames: Vec<PhonemeFrame>) -> Result<LipsyncCompletion> {
        self.with(|engine| engine.schedule_lipsync(frames))
    }

    /// Clear lipsync and motion queues in one critical section
    pub fn interrupt(&self) -> Result<()> {
        self.with(|engine| {
            engine.clear_lipsync();
            engine.clear_motions();
        })
    }

    /// Whether a lipsync timeline is playing
    pub fn is_speaking(&self) -> Result<bool> {
        self.with(|engine| engine.is_speaking())
    }
}
