//! Animation configuration
//!
//! A fully resolved, immutable description of the model: parameter ranges,
//! source tuning, the expression and motion catalogs and the emotion table.
//! Defaults describe a Hiyori-style model with VBridger mouth parameters.

use crate::error::{Error, Result};
use crate::expression::ExpressionBlend;
use crate::lipsync::MouthChannel;
use crate::motion::MotionClip;
use crate::parameter::{ParameterSpec, DEFAULT_SMOOTHING_RATE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Animation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Declared model parameters
    pub parameters: Vec<ParameterSpec>,
    /// Global smoothing settings
    pub smoothing: SmoothingConfig,
    /// Blink source settings
    pub blink: BlinkConfig,
    /// Breathing source settings
    pub breathing: BreathingConfig,
    /// Lipsync source settings
    pub lipsync: LipsyncConfig,
    /// Expression catalog keyed by name
    pub expressions: BTreeMap<String, ExpressionEntry>,
    /// Motion catalog keyed by group name
    pub motions: BTreeMap<String, MotionGroup>,
    /// Emotion tag to expression/motion table
    pub emotions: BTreeMap<String, EmotionEntry>,
    /// Expression applied for neutral/idle
    pub neutral_expression: String,
    /// Motion group played at idle priority
    pub idle_motion_group: String,
    /// Play the idle group automatically when no motion is queued
    pub auto_idle: bool,
    /// Fixed RNG seed for blink intervals and clip choice
    pub seed: Option<u64>,
}

/// Global smoothing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Smoothing master switch
    pub enabled: bool,
    /// Per-second convergence rate for parameters without an override
    pub rate: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate: DEFAULT_SMOOTHING_RATE,
        }
    }
}

/// Blink source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlinkConfig {
    /// Whether the blink source writes eye parameters
    pub enabled: bool,
    /// Lower bound of the open interval in seconds
    pub interval_min: f32,
    /// Upper bound of the open interval in seconds
    pub interval_max: f32,
    /// Duration of the closing phase in seconds
    pub close_duration: f32,
    /// Duration of the opening phase in seconds
    pub open_duration: f32,
    /// Eye-openness parameters driven by the blink
    pub parameters: Vec<String>,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_min: 1.5,
            interval_max: 6.0,
            close_duration: 0.06,
            open_duration: 0.10,
            parameters: vec!["ParamEyeLOpen".to_string(), "ParamEyeROpen".to_string()],
        }
    }
}

/// One periodically driven breathing parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreathingParameter {
    /// Parameter identifier
    pub parameter: String,
    /// Peak offset from the default
    pub amplitude: f32,
    /// Period in seconds
    pub cycle: f32,
}

/// Breathing source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreathingConfig {
    /// Whether the breathing source is applied
    pub enabled: bool,
    /// Driven parameters
    pub parameters: Vec<BreathingParameter>,
}

impl Default for BreathingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            parameters: vec![
                BreathingParameter {
                    parameter: "ParamBreath".to_string(),
                    amplitude: 0.5,
                    cycle: 3.5,
                },
                BreathingParameter {
                    parameter: "ParamBodyAngleY".to_string(),
                    amplitude: 1.0,
                    cycle: 3.5,
                },
            ],
        }
    }
}

/// Lipsync source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LipsyncConfig {
    /// Whether phoneme timelines drive the mouth
    pub enabled: bool,
    /// Scale applied to every mouth coefficient
    pub intensity: f32,
    /// Seconds a frame survives past its end before being pruned
    pub prune_margin: f32,
    /// Mouth coefficient to parameter mapping
    pub channel: MouthChannel,
}

impl Default for LipsyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            intensity: 0.8,
            prune_margin: 0.1,
            channel: MouthChannel::default(),
        }
    }
}

/// Expression catalog entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExpressionEntry {
    /// How the values combine with the baseline
    #[serde(default)]
    pub blend: ExpressionBlend,
    /// Parameter values of the pose
    #[serde(default)]
    pub parameters: BTreeMap<String, f32>,
}

/// Motion catalog entry: a weighted set of clips
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MotionGroup {
    /// Clips in the group
    pub clips: Vec<MotionClip>,
}

/// Emotion table entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionEntry {
    /// Expression to apply
    pub expression: String,
    /// Preferred motion group
    pub motion_group: String,
}

impl EmotionEntry {
    fn new(expression: &str, motion_group: &str) -> Self {
        Self {
            expression: expression.to_string(),
            motion_group: motion_group.to_string(),
        }
    }
}

fn default_parameters() -> Vec<ParameterSpec> {
    let mouth = |id: &str, min: f32| {
        let mut spec = ParameterSpec::new(id, min, 1.0, 0.0);
        spec.smoothing_rate = Some(20.0);
        spec
    };

    vec![
        ParameterSpec::new("ParamAngleX", -30.0, 30.0, 0.0),
        ParameterSpec::new("ParamAngleY", -30.0, 30.0, 0.0),
        ParameterSpec::new("ParamAngleZ", -30.0, 30.0, 0.0),
        ParameterSpec::new("ParamBodyAngleX", -10.0, 10.0, 0.0),
        ParameterSpec::new("ParamBodyAngleY", -10.0, 10.0, 0.0),
        ParameterSpec::new("ParamBodyAngleZ", -10.0, 10.0, 0.0),
        ParameterSpec::new("ParamBreath", 0.0, 1.0, 0.5),
        ParameterSpec::new("ParamEyeLOpen", 0.0, 1.0, 1.0).unsmoothed(),
        ParameterSpec::new("ParamEyeROpen", 0.0, 1.0, 1.0).unsmoothed(),
        ParameterSpec::new("ParamEyeLSmile", 0.0, 1.0, 0.0),
        ParameterSpec::new("ParamEyeRSmile", 0.0, 1.0, 0.0),
        ParameterSpec::new("ParamBrowLY", -1.0, 1.0, 0.0),
        ParameterSpec::new("ParamBrowRY", -1.0, 1.0, 0.0),
        ParameterSpec::new("ParamCheek", 0.0, 1.0, 0.0),
        mouth("ParamMouthOpenY", 0.0),
        mouth("ParamJawOpen", 0.0),
        mouth("ParamMouthForm", -1.0),
        mouth("ParamMouthShrug", 0.0),
        mouth("ParamMouthFunnel", 0.0),
        mouth("ParamMouthPuckerWiden", -1.0),
        mouth("ParamMouthPressLipOpen", -1.0),
        mouth("ParamMouthX", -1.0),
        mouth("ParamCheekPuffC", 0.0),
    ]
}

fn expression(blend: ExpressionBlend, values: &[(&str, f32)]) -> ExpressionEntry {
    ExpressionEntry {
        blend,
        parameters: values
            .iter()
            .map(|(id, value)| ((*id).to_string(), *value))
            .collect(),
    }
}

fn default_expressions() -> BTreeMap<String, ExpressionEntry> {
    use ExpressionBlend::{Add, Overwrite};

    let mut map = BTreeMap::new();
    map.insert("neutral".to_string(), expression(Overwrite, &[]));
    map.insert(
        "happy".to_string(),
        expression(
            Overwrite,
            &[
                ("ParamEyeLSmile", 1.0),
                ("ParamEyeRSmile", 1.0),
                ("ParamMouthForm", 1.0),
            ],
        ),
    );
    map.insert(
        "sad".to_string(),
        expression(
            Overwrite,
            &[
                ("ParamBrowLY", -0.6),
                ("ParamBrowRY", -0.6),
                ("ParamMouthForm", -0.6),
            ],
        ),
    );
    map.insert(
        "angry".to_string(),
        expression(
            Overwrite,
            &[
                ("ParamBrowLY", -1.0),
                ("ParamBrowRY", -1.0),
                ("ParamMouthForm", -0.8),
            ],
        ),
    );
    map.insert(
        "surprised".to_string(),
        expression(
            Overwrite,
            &[
                ("ParamBrowLY", 1.0),
                ("ParamBrowRY", 1.0),
                ("ParamMouthOpenY", 0.6),
            ],
        ),
    );
    map.insert(
        "thinking".to_string(),
        expression(Add, &[("ParamAngleZ", 8.0), ("ParamBrowLY", 0.4)]),
    );
    map.insert(
        "embarrassed".to_string(),
        expression(
            Overwrite,
            &[("ParamCheek", 1.0), ("ParamEyeLSmile", 0.5), ("ParamEyeRSmile", 0.5)],
        ),
    );
    map
}

fn default_motions() -> BTreeMap<String, MotionGroup> {
    let group = |clips: &[(&str, f32)]| MotionGroup {
        clips: clips
            .iter()
            .map(|(name, duration)| MotionClip::new(*name, *duration))
            .collect(),
    };

    let mut map = BTreeMap::new();
    map.insert(
        "Idle".to_string(),
        group(&[("idle_01", 4.0), ("idle_02", 5.0), ("idle_03", 6.0)]),
    );
    map.insert("Happy".to_string(), group(&[("happy_01", 2.5), ("happy_02", 3.0)]));
    map.insert("Sad".to_string(), group(&[("sad_01", 3.0)]));
    map.insert("Angry".to_string(), group(&[("angry_01", 2.0)]));
    map.insert("Surprised".to_string(), group(&[("surprised_01", 1.5)]));
    map.insert("Thinking".to_string(), group(&[("thinking_01", 3.0)]));
    map.insert("Nervous".to_string(), group(&[("nervous_01", 2.5)]));
    map
}

fn default_emotions() -> BTreeMap<String, EmotionEntry> {
    let table = [
        ("neutral", "neutral", "Idle"),
        ("happy", "happy", "Happy"),
        ("sad", "sad", "Sad"),
        ("angry", "angry", "Angry"),
        ("surprised", "surprised", "Surprised"),
        ("thinking", "thinking", "Thinking"),
        ("embarrassed", "embarrassed", "Nervous"),
        ("😊", "happy", "Happy"),
        ("😂", "happy", "Happy"),
        ("😢", "sad", "Sad"),
        ("😤", "angry", "Angry"),
        ("😲", "surprised", "Surprised"),
        ("🤔", "thinking", "Thinking"),
        ("😳", "embarrassed", "Nervous"),
        ("😅", "embarrassed", "Nervous"),
    ];
    table
        .iter()
        .map(|(tag, expression, motion)| ((*tag).to_string(), EmotionEntry::new(expression, motion)))
        .collect()
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            parameters: default_parameters(),
            smoothing: SmoothingConfig::default(),
            blink: BlinkConfig::default(),
            breathing: BreathingConfig::default(),
            lipsync: LipsyncConfig::default(),
            expressions: default_expressions(),
            motions: default_motions(),
            emotions: default_emotions(),
            neutral_expression: "neutral".to_string(),
            idle_motion_group: "Idle".to_string(),
            auto_idle: true,
            seed: None,
        }
    }
}

impl AnimationConfig {
    /// Validate cross references and numeric bounds
    pub fn validate(&self) -> Result<()> {
        let mut declared = HashSet::new();
        for spec in &self.parameters {
            spec.validate().map_err(|e| Error::config("parameters", e.to_string()))?;
            if !declared.insert(spec.id.as_str()) {
                return Err(Error::config(
                    "parameters",
                    format!("'{}' declared more than once", spec.id),
                ));
            }
        }
        let known = |id: &str| declared.contains(id);

        if !(self.smoothing.rate.is_finite() && self.smoothing.rate >= 0.0) {
            return Err(Error::config("smoothing.rate", "must be non-negative"));
        }

        let blink = &self.blink;
        if blink.interval_min < 0.0 || blink.interval_min > blink.interval_max {
            return Err(Error::config(
                "blink.interval_min",
                format!(
                    "interval [{}, {}] is not a valid range",
                    blink.interval_min, blink.interval_max
                ),
            ));
        }
        if blink.close_duration <= 0.0 || blink.open_duration <= 0.0 {
            return Err(Error::config("blink", "phase durations must be positive"));
        }
        if blink.enabled {
            for id in &blink.parameters {
                if !known(id) {
                    return Err(Error::config(
                        "blink.parameters",
                        format!("unknown parameter '{}'", id),
                    ));
                }
            }
        }

        for entry in &self.breathing.parameters {
            if !known(&entry.parameter) {
                return Err(Error::config(
                    "breathing.parameters",
                    format!("unknown parameter '{}'", entry.parameter),
                ));
            }
            if entry.cycle.is_nan() || entry.cycle <= 0.0 {
                return Err(Error::config(
                    "breathing.parameters",
                    format!("cycle for '{}' must be positive", entry.parameter),
                ));
            }
        }

        if !(0.0..=1.0).contains(&self.lipsync.intensity) {
            return Err(Error::config("lipsync.intensity", "must be within [0, 1]"));
        }
        if self.lipsync.prune_margin < 0.0 {
            return Err(Error::config("lipsync.prune_margin", "must be non-negative"));
        }
        for id in self.lipsync.channel.parameter_ids() {
            if !known(id) {
                return Err(Error::config(
                    "lipsync.channel",
                    format!("unknown parameter '{}'", id),
                ));
            }
        }

        for (name, entry) in &self.expressions {
            for id in entry.parameters.keys() {
                if !known(id) {
                    return Err(Error::config(
                        format!("expressions.{}", name),
                        format!("unknown parameter '{}'", id),
                    ));
                }
            }
        }

        for (name, group) in &self.motions {
            if group.clips.is_empty() {
                return Err(Error::config(format!("motions.{}", name), "group has no clips"));
            }
            for clip in &group.clips {
                clip.validate()
                    .map_err(|message| Error::config(format!("motions.{}", name), message))?;
            }
        }

        if !self.expressions.contains_key(&self.neutral_expression) {
            return Err(Error::config(
                "neutral_expression",
                format!("unknown expression '{}'", self.neutral_expression),
            ));
        }
        if !self.motions.contains_key(&self.idle_motion_group) {
            return Err(Error::config(
                "idle_motion_group",
                format!("unknown motion group '{}'", self.idle_motion_group),
            ));
        }

        for (tag, entry) in &self.emotions {
            if !self.expressions.contains_key(&entry.expression) {
                return Err(Error::config(
                    format!("emotions.{}", tag),
                    format!("unknown expression '{}'", entry.expression),
                ));
            }
            if !self.motions.contains_key(&entry.motion_group) {
                return Err(Error::config(
                    format!("emotions.{}", tag),
                    format!("unknown motion group '{}'", entry.motion_group),
                ));
            }
        }

        Ok(())
    }
}
