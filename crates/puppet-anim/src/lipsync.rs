//! Phoneme-driven lipsync source
//!
//! A synthesized utterance comes with an ordered phoneme timeline. While it
//! plays, the last frame whose start time has passed drives the mouth channel;
//! frames are pruned once their end is older than the configured margin. When
//! the timeline drains, the completion signal fires and the mouth relaxes
//! through ordinary smoothing.

use crate::config::LipsyncConfig;
use crate::error::Result;
use crate::parameter::{ParamId, ParameterStore};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::trace;

/// Number of mouth coefficients carried by a phoneme frame
pub const MOUTH_COEFFICIENTS: usize = 9;

/// VBridger-style mouth and jaw coefficients
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MouthShape {
    /// Vertical mouth opening
    pub mouth_open_y: f32,
    /// Jaw opening
    pub jaw_open: f32,
    /// Smile/frown
    pub mouth_form: f32,
    /// Lip shrug
    pub mouth_shrug: f32,
    /// Funnel ("oo")
    pub mouth_funnel: f32,
    /// Pucker (negative) to widen (positive)
    pub mouth_pucker_widen: f32,
    /// Lip press (negative) to open (positive)
    pub mouth_press_lip_open: f32,
    /// Horizontal mouth offset
    pub mouth_x: f32,
    /// Cheek puff
    pub cheek_puff_c: f32,
}

impl MouthShape {
    /// Coefficients in channel order
    #[must_use]
    pub fn coefficients(&self) -> [f32; MOUTH_COEFFICIENTS] {
        [
            self.mouth_open_y,
            self.jaw_open,
            self.mouth_form,
            self.mouth_shrug,
            self.mouth_funnel,
            self.mouth_pucker_widen,
            self.mouth_press_lip_open,
            self.mouth_x,
            self.cheek_puff_c,
        ]
    }
}

/// Mapping from mouth coefficients to model parameter identifiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MouthChannel {
    /// Target of `mouth_open_y`
    pub mouth_open_y: String,
    /// Target of `jaw_open`
    pub jaw_open: String,
    /// Target of `mouth_form`
    pub mouth_form: String,
    /// Target of `mouth_shrug`
    pub mouth_shrug: String,
    /// Target of `mouth_funnel`
    pub mouth_funnel: String,
    /// Target of `mouth_pucker_widen`
    pub mouth_pucker_widen: String,
    /// Target of `mouth_press_lip_open`
    pub mouth_press_lip_open: String,
    /// Target of `mouth_x`
    pub mouth_x: String,
    /// Target of `cheek_puff_c`
    pub cheek_puff_c: String,
}

impl Default for MouthChannel {
    fn default() -> Self {
        Self {
            mouth_open_y: "ParamMouthOpenY".to_string(),
            jaw_open: "ParamJawOpen".to_string(),
            mouth_form: "ParamMouthForm".to_string(),
            mouth_shrug: "ParamMouthShrug".to_string(),
            mouth_funnel: "ParamMouthFunnel".to_string(),
            mouth_pucker_widen: "ParamMouthPuckerWiden".to_string(),
            mouth_press_lip_open: "ParamMouthPressLipOpen".to_string(),
            mouth_x: "ParamMouthX".to_string(),
            cheek_puff_c: "ParamCheekPuffC".to_string(),
        }
    }
}

impl MouthChannel {
    /// Parameter identifiers in channel order
    #[must_use]
    pub fn parameter_ids(&self) -> [&str; MOUTH_COEFFICIENTS] {
        [
            &self.mouth_open_y,
            &self.jaw_open,
            &self.mouth_form,
            &self.mouth_shrug,
            &self.mouth_funnel,
            &self.mouth_pucker_widen,
            &self.mouth_press_lip_open,
            &self.mouth_x,
            &self.cheek_puff_c,
        ]
    }
}

/// One entry of a phoneme timeline, times relative to utterance start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhonemeFrame {
    /// Start offset in seconds
    pub start: f32,
    /// End offset in seconds
    pub end: f32,
    /// Phoneme or viseme label
    pub phoneme: String,
    /// Mouth coefficients while this frame is active
    pub shape: MouthShape,
}

impl PhonemeFrame {
    /// Create a frame
    #[must_use]
    pub fn new(start: f32, end: f32, phoneme: impl Into<String>, shape: MouthShape) -> Self {
        Self {
            start,
            end,
            phoneme: phoneme.into(),
            shape,
        }
    }
}

/// Resolves when a scheduled timeline has drained or was cleared
#[derive(Debug)]
pub struct LipsyncCompletion(oneshot::Receiver<()>);

impl LipsyncCompletion {
    /// Wait for completion. A cleared or replaced schedule counts as complete.
    pub async fn finished(self) {
        let _ = self.0.await;
    }
}

/// Lipsync state
#[derive(Debug)]
pub struct LipsyncSource {
    enabled: bool,
    intensity: f32,
    prune_margin: f32,
    channel: [ParamId; MOUTH_COEFFICIENTS],
    pending: VecDeque<PhonemeFrame>,
    clock: f32,
    done: Option<oneshot::Sender<()>>,
}

impl LipsyncSource {
    /// Resolve the mouth channel against the store
    pub fn new(config: &LipsyncConfig, store: &ParameterStore) -> Result<Self> {
        let ids = config.channel.parameter_ids();
        let mut channel = [store.require(ids[0])?; MOUTH_COEFFICIENTS];
        for (slot, id) in channel.iter_mut().zip(ids) {
            *slot = store.require(id)?;
        }

        Ok(Self {
            enabled: config.enabled,
            intensity: config.intensity,
            prune_margin: config.prune_margin,
            channel,
            pending: VecDeque::new(),
            clock: 0.0,
            done: None,
        })
    }

    /// Install a timeline, replacing any previous one.
    ///
    /// Playback-relative time starts at zero now. An empty timeline (or a
    /// disabled source) completes immediately.
    pub fn schedule(&mut self, mut frames: Vec<PhonemeFrame>) -> LipsyncCompletion {
        let (tx, rx) = oneshot::channel();
        self.clear();

        if !self.enabled || frames.is_empty() {
            let _ = tx.send(());
            return LipsyncCompletion(rx);
        }

        frames.sort_by(|a, b| a.start.total_cmp(&b.start));
        trace!(frames = frames.len(), "Lipsync timeline scheduled");
        self.pending = frames.into();
        self.clock = 0.0;
        self.done = Some(tx);
        LipsyncCompletion(rx)
    }

    /// Drop the pending timeline; its completion resolves
    pub fn clear(&mut self) {
        self.pending.clear();
        self.clock = 0.0;
        self.done = None;
    }

    /// Whether a timeline is in progress
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Number of frames not yet pruned
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Playback-relative time of the current timeline
    #[must_use]
    pub fn clock(&self) -> f32 {
        self.clock
    }

    /// Parameters written by this source
    #[must_use]
    pub fn channel(&self) -> &[ParamId] {
        &self.channel
    }

    /// Advance playback time and prune expired frames
    pub fn update(&mut self, dt: f32) {
        if self.pending.is_empty() {
            return;
        }
        self.clock += dt.max(0.0);

        let horizon = self.clock - self.prune_margin;
        while self.pending.front().is_some_and(|frame| frame.end < horizon) {
            self.pending.pop_front();
        }

        if self.pending.is_empty() {
            trace!(clock = self.clock, "Lipsync timeline drained");
            if let Some(tx) = self.done.take() {
                let _ = tx.send(());
            }
        }
    }

    /// Frame currently driving the mouth
    #[must_use]
    pub fn current_frame(&self) -> Option<&PhonemeFrame> {
        self.pending
            .iter()
            .take_while(|frame| frame.start <= self.clock)
            .last()
    }

    /// Write mouth targets from the current frame
    pub fn apply(&self, store: &mut ParameterStore) {
        let Some(frame) = self.current_frame() else {
            return;
        };
        for (&id, value) in self.channel.iter().zip(frame.shape.coefficients()) {
            store.set_target(id, value * self.intensity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LipsyncConfig;
    use crate::parameter::ParameterSpec;

    fn setup() -> (LipsyncSource, ParameterStore) {
        let specs: Vec<ParameterSpec> = MouthChannel::default()
            .parameter_ids()
            .iter()
            .map(|id| ParameterSpec::new(*id, -1.0, 1.0, 0.0))
            .collect();
        let store = ParameterStore::new(&specs, 5.0, true).unwrap();
        let config = LipsyncConfig {
            intensity: 1.0,
            ..LipsyncConfig::default()
        };
        (LipsyncSource::new(&config, &store).unwrap(), store)
    }

    fn open(amount: f32) -> MouthShape {
        MouthShape {
            mouth_open_y: amount,
            jaw_open: amount / 2.0,
            ..MouthShape::default()
        }
    }

    fn timeline() -> Vec<PhonemeFrame> {
        vec![
            PhonemeFrame::new(0.0, 0.1, "h", open(0.2)),
            PhonemeFrame::new(0.1, 0.2, "a", open(1.0)),
            PhonemeFrame::new(0.2, 0.3, "i", open(0.4)),
        ]
    }

    #[test]
    fn test_selects_last_started_frame() {
        let (mut lipsync, mut store) = setup();
        let _done = lipsync.schedule(timeline());
        lipsync.update(0.15);
        assert_eq!(lipsync.current_frame().unwrap().phoneme, "a");

        lipsync.apply(&mut store);
        let mouth = store.id("ParamMouthOpenY").unwrap();
        let jaw = store.id("ParamJawOpen").unwrap();
        assert_eq!(store.target(mouth), 1.0);
        assert_eq!(store.target(jaw), 0.5);
    }

    #[test]
    fn test_prunes_with_margin() {
        let (mut lipsync, _) = setup();
        let _done = lipsync.schedule(timeline());

        // First frame ends at 0.1 and survives until 0.2 with a 0.1 margin.
        lipsync.update(0.15);
        assert_eq!(lipsync.pending(), 3);
        lipsync.update(0.1);
        assert_eq!(lipsync.pending(), 2);
    }

    #[test]
    fn test_intensity_scales_shape() {
        let (_, mut store) = setup();
        let config = LipsyncConfig {
            intensity: 0.5,
            ..LipsyncConfig::default()
        };
        let mut lipsync = LipsyncSource::new(&config, &store).unwrap();
        let _done = lipsync.schedule(timeline());
        lipsync.update(0.15);
        lipsync.apply(&mut store);
        let mouth = store.id("ParamMouthOpenY").unwrap();
        assert_eq!(store.target(mouth), 0.5);
    }

    #[tokio::test]
    async fn test_completion_fires_when_drained() {
        let (mut lipsync, _) = setup();
        let done = lipsync.schedule(timeline());
        for _ in 0..30 {
            lipsync.update(1.0 / 60.0);
        }
        assert!(!lipsync.is_active());
        done.finished().await;
    }

    #[tokio::test]
    async fn test_clear_resolves_completion() {
        let (mut lipsync, _) = setup();
        let done = lipsync.schedule(timeline());
        lipsync.clear();
        assert!(!lipsync.is_active());
        assert_eq!(lipsync.pending(), 0);
        done.finished().await;
    }

    #[tokio::test]
    async fn test_empty_timeline_completes_immediately() {
        let (mut lipsync, _) = setup();
        let done = lipsync.schedule(Vec::new());
        assert!(!lipsync.is_active());
        done.finished().await;
    }

    #[test]
    fn test_nothing_applied_before_first_start() {
        let (mut lipsync, mut store) = setup();
        let _done = lipsync.schedule(vec![PhonemeFrame::new(0.5, 0.6, "o", open(1.0))]);
        lipsync.update(0.1);
        lipsync.apply(&mut store);
        let mouth = store.id("ParamMouthOpenY").unwrap();
        assert_eq!(store.target(mouth), 0.0);
    }
}
