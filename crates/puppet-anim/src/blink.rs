//! Idle blink source
//!
//! Three-phase cycle (`Open -> Closing -> Opening -> Open`) running on
//! frame-accumulated simulation time. The open phase lasts a random interval
//! drawn from `[interval_min, interval_max]`; closing and opening have fixed
//! durations and eye openness is the linear fraction within the active phase.

use crate::config::BlinkConfig;
use crate::error::Result;
use crate::parameter::{ParamId, ParameterStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::fmt;

const MIN_PHASE_DURATION: f32 = 1e-3;

/// Phase changes processed per update; the rest of a longer step is dropped
const MAX_PHASE_STEPS: usize = 64;

/// Blink phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlinkPhase {
    /// Eyes open, waiting for the next blink
    Open,
    /// Eyelids closing
    Closing,
    /// Eyelids opening
    Opening,
}

impl fmt::Display for BlinkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Opening => write!(f, "opening"),
        }
    }
}

/// Blink state machine
#[derive(Debug)]
pub struct BlinkSource {
    enabled: bool,
    interval_min: f32,
    interval_max: f32,
    close_duration: f32,
    open_duration: f32,
    params: Vec<ParamId>,
    phase: BlinkPhase,
    phase_elapsed: f32,
    open_interval: f32,
    completed_cycles: u64,
    rng: StdRng,
}

impl BlinkSource {
    /// Resolve the eye parameters and draw the first open interval
    pub fn new(config: &BlinkConfig, store: &ParameterStore, seed: Option<u64>) -> Result<Self> {
        let params = config
            .parameters
            .iter()
            .map(|id| store.require(id))
            .collect::<Result<Vec<_>>>()?;

        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let open_interval = draw_interval(&mut rng, config.interval_min, config.interval_max);

        Ok(Self {
            enabled: config.enabled,
            interval_min: config.interval_min,
            interval_max: config.interval_max,
            close_duration: config.close_duration.max(MIN_PHASE_DURATION),
            open_duration: config.open_duration.max(MIN_PHASE_DURATION),
            params,
            phase: BlinkPhase::Open,
            phase_elapsed: 0.0,
            open_interval,
            completed_cycles: 0,
            rng,
        })
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> BlinkPhase {
        self.phase
    }

    /// Whether the source writes eye parameters
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of finished close/open cycles
    #[must_use]
    pub fn completed_cycles(&self) -> u64 {
        self.completed_cycles
    }

    /// Length of the current open wait
    #[must_use]
    pub fn open_interval(&self) -> f32 {
        self.open_interval
    }

    /// Eye openness in `[0, 1]`
    #[must_use]
    pub fn openness(&self) -> f32 {
        let value = match self.phase {
            BlinkPhase::Open => 1.0,
            BlinkPhase::Closing => 1.0 - self.phase_elapsed / self.close_duration,
            BlinkPhase::Opening => self.phase_elapsed / self.open_duration,
        };
        value.clamp(0.0, 1.0)
    }

    /// Advance the cycle by `dt` seconds; a long step may cross several phases
    pub fn update(&mut self, dt: f32) {
        if !self.enabled || dt.is_nan() || dt <= 0.0 {
            return;
        }

        let mut remaining = dt;
        for _ in 0..MAX_PHASE_STEPS {
            let left = self.phase_duration() - self.phase_elapsed;
            if remaining < left {
                self.phase_elapsed += remaining;
                return;
            }
            remaining -= left.max(0.0);
            self.phase_elapsed = 0.0;
            self.next_phase();
        }
    }

    /// Write eye openness into the store
    pub fn apply(&self, store: &mut ParameterStore) {
        if !self.enabled {
            return;
        }
        let openness = self.openness();
        for &id in &self.params {
            store.set_target(id, openness * store.default_value(id));
        }
    }

    fn phase_duration(&self) -> f32 {
        match self.phase {
            BlinkPhase::Open => self.open_interval,
            BlinkPhase::Closing => self.close_duration,
            BlinkPhase::Opening => self.open_duration,
        }
    }

    fn next_phase(&mut self) {
        self.phase = match self.phase {
            BlinkPhase::Open => BlinkPhase::Closing,
            BlinkPhase::Closing => BlinkPhase::Opening,
            BlinkPhase::Opening => {
                self.completed_cycles += 1;
                self.open_interval =
                    draw_interval(&mut self.rng, self.interval_min, self.interval_max);
                BlinkPhase::Open
            }
        };
    }
}

fn draw_interval(rng: &mut StdRng, min: f32, max: f32) -> f32 {
    if max > min {
        rng.gen_range(min..=max)
    } else {
        min
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParameterSpec;

    fn setup(seed: u64) -> (BlinkSource, ParameterStore, BlinkConfig) {
        let store = ParameterStore::new(
            &[
                ParameterSpec::new("ParamEyeLOpen", 0.0, 1.0, 1.0).unsmoothed(),
                ParameterSpec::new("ParamEyeROpen", 0.0, 1.0, 1.0).unsmoothed(),
            ],
            5.0,
            true,
        )
        .unwrap();
        let config = BlinkConfig::default();
        let blink = BlinkSource::new(&config, &store, Some(seed)).unwrap();
        (blink, store, config)
    }

    #[test]
    fn test_unknown_eye_parameter_is_rejected() {
        let store = ParameterStore::new(&[], 5.0, true).unwrap();
        assert!(BlinkSource::new(&BlinkConfig::default(), &store, None).is_err());
    }

    #[test]
    fn test_phase_sequence() {
        let (mut blink, _, config) = setup(7);
        assert_eq!(blink.phase(), BlinkPhase::Open);

        blink.update(blink.open_interval());
        assert_eq!(blink.phase(), BlinkPhase::Closing);

        blink.update(config.close_duration / 2.0);
        assert!((blink.openness() - 0.5).abs() < 1e-4);

        blink.update(config.close_duration / 2.0);
        assert_eq!(blink.phase(), BlinkPhase::Opening);
        assert!(blink.openness() < 1e-4);

        blink.update(config.open_duration);
        assert_eq!(blink.phase(), BlinkPhase::Open);
        assert_eq!(blink.completed_cycles(), 1);
    }

    #[test]
    fn test_cycle_length_within_bounds() {
        let (mut blink, _, config) = setup(42);
        let dt = 0.001_f32;
        let lower = config.interval_min + config.close_duration + config.open_duration;
        let upper = config.interval_max + config.close_duration + config.open_duration;

        let tolerance = 0.01_f32;

        let mut steps_since_last = 0_u32;
        let mut cycles_seen = 0;
        for _ in 0..200_000 {
            let before = blink.completed_cycles();
            blink.update(dt);
            steps_since_last += 1;
            assert!((0.0..=1.0).contains(&blink.openness()));
            if blink.completed_cycles() > before {
                let elapsed = (f64::from(steps_since_last) * f64::from(dt)) as f32;
                assert!(elapsed >= lower - tolerance, "cycle too short: {}", elapsed);
                assert!(elapsed <= upper + tolerance, "cycle too long: {}", elapsed);
                steps_since_last = 0;
                cycles_seen += 1;
            }
        }
        assert!(cycles_seen > 10);
    }

    #[test]
    fn test_large_step_crosses_phases() {
        let (mut blink, _, config) = setup(3);
        let total = blink.open_interval() + config.close_duration + config.open_duration / 2.0;
        blink.update(total);
        assert_eq!(blink.phase(), BlinkPhase::Opening);
        assert!((blink.openness() - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_huge_step_with_zero_durations_is_bounded() {
        let (_, store, mut config) = setup(5);
        config.interval_min = 0.0;
        config.interval_max = 0.0;
        config.close_duration = 0.0;
        config.open_duration = 0.0;
        let mut blink = BlinkSource::new(&config, &store, Some(5)).unwrap();

        blink.update(1.0e9);
        assert!(blink.completed_cycles() <= MAX_PHASE_STEPS as u64);
        assert!((0.0..=1.0).contains(&blink.openness()));

        let cycles = blink.completed_cycles();
        blink.update(f32::NAN);
        blink.update(f32::INFINITY);
        assert!(blink.completed_cycles() <= cycles + MAX_PHASE_STEPS as u64);
        assert!((0.0..=1.0).contains(&blink.openness()));
    }

    #[test]
    fn test_disabled_source_leaves_eyes_untouched() {
        let (_, mut store, mut config) = setup(1);
        config.enabled = false;
        let mut blink = BlinkSource::new(&config, &store, Some(1)).unwrap();
        let eye = store.id("ParamEyeLOpen").unwrap();

        store.set_target(eye, 0.3);
        blink.update(100.0);
        blink.apply(&mut store);
        assert_eq!(store.target(eye), 0.3);
        assert_eq!(blink.phase(), BlinkPhase::Open);
    }

    #[test]
    fn test_apply_writes_openness() {
        let (mut blink, mut store, config) = setup(9);
        blink.update(blink.open_interval() + config.close_duration);
        blink.apply(&mut store);
        let eye = store.id("ParamEyeROpen").unwrap();
        assert!(store.target(eye) < 1e-4);
    }
}
