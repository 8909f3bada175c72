//! Motion playback queue
//!
//! Motion clips are pre-authored assets played by the model backend; this
//! player decides which clip runs, in what order, and with what fade weight.

use crate::config::MotionGroup;
use crate::error::{Error, Result};
use rand::distributions::WeightedIndex;
use rand::prelude::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tracing::debug;

fn default_fade() -> f32 {
    0.5
}

fn default_weight() -> f32 {
    1.0
}

/// A single clip of a motion group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionClip {
    /// Clip name (asset file stem)
    pub name: String,
    /// Length in seconds
    pub duration: f32,
    /// Fade-in time in seconds
    #[serde(default = "default_fade")]
    pub fade_in: f32,
    /// Fade-out time in seconds
    #[serde(default = "default_fade")]
    pub fade_out: f32,
    /// Relative selection weight within the group
    #[serde(default = "default_weight")]
    pub weight: f32,
}

impl MotionClip {
    /// Clip with default fades and weight
    #[must_use]
    pub fn new(name: impl Into<String>, duration: f32) -> Self {
        Self {
            name: name.into(),
            duration,
            fade_in: default_fade(),
            fade_out: default_fade(),
            weight: default_weight(),
        }
    }

    pub(crate) fn validate(&self) -> std::result::Result<(), String> {
        if self.duration.is_nan() || self.duration <= 0.0 {
            return Err(format!("clip '{}' duration must be positive", self.name));
        }
        if self.fade_in < 0.0 || self.fade_out < 0.0 {
            return Err(format!("clip '{}' fades must be non-negative", self.name));
        }
        if self.weight < 0.0 {
            return Err(format!("clip '{}' weight must be non-negative", self.name));
        }
        Ok(())
    }

    fn fade_weight(&self, elapsed: f32) -> f32 {
        let fade_in = if self.fade_in > 0.0 {
            elapsed / self.fade_in
        } else {
            1.0
        };
        let fade_out = if self.fade_out > 0.0 {
            (self.duration - elapsed) / self.fade_out
        } else {
            1.0
        };
        fade_in.min(fade_out).clamp(0.0, 1.0)
    }
}

/// Motion request priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionPriority {
    /// Played only when nothing else is running or pending
    Idle,
    /// Queued behind the running motion
    Normal,
    /// Clears the queue and plays immediately
    Force,
}

impl fmt::Display for MotionPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Normal => write!(f, "normal"),
            Self::Force => write!(f, "force"),
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveMotion {
    group: String,
    clip: MotionClip,
    priority: MotionPriority,
    elapsed: f32,
}

/// Observable state of the running motion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MotionSample {
    /// Motion group
    pub group: String,
    /// Clip name
    pub clip: String,
    /// Request priority
    pub priority: MotionPriority,
    /// Seconds since the clip started
    pub elapsed: f32,
    /// Fade weight in `[0, 1]`
    pub weight: f32,
}

/// Plays motion clips with queueing by priority
#[derive(Debug)]
pub struct MotionPlayer {
    groups: BTreeMap<String, MotionGroup>,
    queue: VecDeque<ActiveMotion>,
    current: Option<ActiveMotion>,
    idle_group: Option<String>,
    rng: StdRng,
}

impl MotionPlayer {
    /// Create a player over the catalog.
    ///
    /// With `idle_group` set, that group is played at idle priority whenever
    /// the player runs out of work.
    #[must_use]
    pub fn new(
        groups: BTreeMap<String, MotionGroup>,
        idle_group: Option<String>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            groups,
            queue: VecDeque::new(),
            current: None,
            idle_group,
            rng,
        }
    }

    /// Whether the catalog contains `group`
    #[must_use]
    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    /// Request a clip from `group`.
    ///
    /// Returns `Ok(false)` when an idle request was skipped because other
    /// motion is running or pending. A normal request preempts a running idle
    /// clip; otherwise it waits its turn.
    pub fn play(&mut self, group: &str, priority: MotionPriority) -> Result<bool> {
        let clip = self.pick_clip(group)?;
        let motion = ActiveMotion {
            group: group.to_string(),
            clip,
            priority,
            elapsed: 0.0,
        };

        match priority {
            MotionPriority::Force => {
                self.queue.clear();
                self.start(motion);
            }
            MotionPriority::Normal => {
                let idle_running = self
                    .current
                    .as_ref()
                    .map_or(true, |m| m.priority == MotionPriority::Idle);
                if idle_running && self.queue.is_empty() {
                    self.start(motion);
                } else {
                    debug!(group = %group, queued = self.queue.len() + 1, "Motion queued");
                    self.queue.push_back(motion);
                }
            }
            MotionPriority::Idle => {
                if self.current.is_some() || !self.queue.is_empty() {
                    return Ok(false);
                }
                self.start(motion);
            }
        }
        Ok(true)
    }

    /// Stop the running clip and drop everything queued
    pub fn clear(&mut self) {
        self.queue.clear();
        self.current = None;
    }

    /// Number of queued clips
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Advance the running clip and start the next one when it ends
    pub fn update(&mut self, dt: f32) {
        if let Some(current) = self.current.as_mut() {
            current.elapsed += dt.max(0.0);
            if current.elapsed >= current.clip.duration {
                debug!(group = %current.group, clip = %current.clip.name, "Motion finished");
                self.current = None;
            }
        }

        if self.current.is_none() {
            if let Some(next) = self.queue.pop_front() {
                self.start(next);
            } else if let Some(idle) = self.idle_group.clone() {
                // Idle group is validated at load; a miss just leaves the model still.
                let _ = self.play(&idle, MotionPriority::Idle);
            }
        }
    }

    /// Running clip with its fade weight
    #[must_use]
    pub fn active(&self) -> Option<MotionSample> {
        self.current.as_ref().map(|m| MotionSample {
            group: m.group.clone(),
            clip: m.clip.name.clone(),
            priority: m.priority,
            elapsed: m.elapsed,
            weight: m.clip.fade_weight(m.elapsed),
        })
    }

    fn start(&mut self, motion: ActiveMotion) {
        debug!(
            group = %motion.group,
            clip = %motion.clip.name,
            priority = %motion.priority,
            "Motion started"
        );
        self.current = Some(motion);
    }

    fn pick_clip(&mut self, group: &str) -> Result<MotionClip> {
        let clips = self
            .groups
            .get(group)
            .map(|g| g.clips.as_slice())
            .filter(|clips| !clips.is_empty())
            .ok_or_else(|| Error::AssetMissing {
                kind: "motion group",
                name: group.to_string(),
            })?;

        let index = match WeightedIndex::new(clips.iter().map(|c| c.weight)) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => self.rng.gen_range(0..clips.len()),
        };
        Ok(clips[index].clone())
    }
}
