//! Idle breathing source

use crate::config::BreathingConfig;
use crate::error::Result;
use crate::parameter::{ParamId, ParameterStore};
use std::f64::consts::TAU;

#[derive(Debug, Clone, Copy)]
struct Breath {
    param: ParamId,
    amplitude: f32,
    cycle: f32,
}

/// Periodic offset around each configured parameter's default
///
/// `value = default + amplitude * sin(2π * elapsed / cycle)`; no state besides
/// the resolved parameter list.
#[derive(Debug, Clone)]
pub struct BreathingSource {
    enabled: bool,
    breaths: Vec<Breath>,
}

impl BreathingSource {
    /// Resolve configured parameters against the store
    pub fn new(config: &BreathingConfig, store: &ParameterStore) -> Result<Self> {
        let breaths = config
            .parameters
            .iter()
            .map(|entry| {
                Ok(Breath {
                    param: store.require(&entry.parameter)?,
                    amplitude: entry.amplitude,
                    cycle: entry.cycle,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            enabled: config.enabled,
            breaths,
        })
    }

    /// Write breathing targets for simulation time `elapsed`
    pub fn apply(&self, store: &mut ParameterStore, elapsed: f64) {
        if !self.enabled {
            return;
        }
        for breath in &self.breaths {
            let phase = (TAU * elapsed / f64::from(breath.cycle)).sin() as f32;
            let value = store.default_value(breath.param) + breath.amplitude * phase;
            store.set_target(breath.param, value);
        }
    }
}
