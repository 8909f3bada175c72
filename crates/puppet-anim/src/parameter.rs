//! Model parameters and the parameter store
//!
//! Every parameter carries a declared `[min, max]` range, a default, the value
//! currently handed to the renderer and the target it converges toward. Targets
//! are recomputed by the animation sources every frame; `current` follows them
//! through exponential smoothing.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Default per-second convergence speed
pub const DEFAULT_SMOOTHING_RATE: f32 = 5.0;

fn default_true() -> bool {
    true
}

/// Declared shape of a model parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter identifier (e.g. `ParamEyeLOpen`)
    pub id: String,
    /// Inclusive `[min, max]` range
    pub range: [f32; 2],
    /// Rest value
    pub default: f32,
    /// Whether `current` is smoothed toward `target`
    #[serde(default = "default_true")]
    pub smoothing: bool,
    /// Per-parameter smoothing rate override
    #[serde(default)]
    pub smoothing_rate: Option<f32>,
}

impl ParameterSpec {
    /// Create a smoothed parameter spec
    #[must_use]
    pub fn new(id: impl Into<String>, min: f32, max: f32, default: f32) -> Self {
        Self {
            id: id.into(),
            range: [min, max],
            default,
            smoothing: true,
            smoothing_rate: None,
        }
    }

    /// Disable smoothing for this parameter
    #[must_use]
    pub fn unsmoothed(mut self) -> Self {
        self.smoothing = false;
        self
    }

    /// Check range and default consistency
    pub fn validate(&self) -> Result<()> {
        let [min, max] = self.range;
        if !min.is_finite() || !max.is_finite() || !self.default.is_finite() {
            return Err(Error::InvalidParameter {
                id: self.id.clone(),
                message: "range and default must be finite".to_string(),
            });
        }
        if min > max {
            return Err(Error::InvalidParameter {
                id: self.id.clone(),
                message: format!("min {} is greater than max {}", min, max),
            });
        }
        if self.default < min || self.default > max {
            return Err(Error::InvalidParameter {
                id: self.id.clone(),
                message: format!("default {} outside [{}, {}]", self.default, min, max),
            });
        }
        if let Some(rate) = self.smoothing_rate {
            if !(rate.is_finite() && rate >= 0.0) {
                return Err(Error::InvalidParameter {
                    id: self.id.clone(),
                    message: format!("smoothing rate {} must be non-negative", rate),
                });
            }
        }
        Ok(())
    }
}

/// Index of a parameter inside a [`ParameterStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParamId(usize);

impl ParamId {
    /// Position in the parameter vector
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A single range-bounded animation control value
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Parameter identifier
    pub id: String,
    /// Lower bound
    pub min: f32,
    /// Upper bound
    pub max: f32,
    /// Rest value
    pub default: f32,
    /// Value handed to the renderer
    pub current: f32,
    /// Value `current` converges toward
    pub target: f32,
    smoothing: bool,
    rate: f32,
}

impl Parameter {
    fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.default;
        }
        value.clamp(self.min, self.max)
    }
}

/// Holds all model parameters in declaration order
#[derive(Debug, Clone)]
pub struct ParameterStore {
    params: Vec<Parameter>,
    index: HashMap<String, ParamId>,
    ids: Arc<[String]>,
}

impl ParameterStore {
    /// Build a store from declarations.
    ///
    /// `default_rate` applies to parameters without an override; when
    /// `smoothing_enabled` is false every parameter snaps to its target.
    pub fn new(specs: &[ParameterSpec], default_rate: f32, smoothing_enabled: bool) -> Result<Self> {
        let mut params = Vec::with_capacity(specs.len());
        let mut index = HashMap::with_capacity(specs.len());

        for spec in specs {
            spec.validate()?;
            if index.contains_key(&spec.id) {
                return Err(Error::InvalidParameter {
                    id: spec.id.clone(),
                    message: "declared more than once".to_string(),
                });
            }
            index.insert(spec.id.clone(), ParamId(params.len()));
            params.push(Parameter {
                id: spec.id.clone(),
                min: spec.range[0],
                max: spec.range[1],
                default: spec.default,
                current: spec.default,
                target: spec.default,
                smoothing: smoothing_enabled && spec.smoothing,
                rate: spec.smoothing_rate.unwrap_or(default_rate),
            });
        }

        let ids: Arc<[String]> = params.iter().map(|p| p.id.clone()).collect();
        Ok(Self { params, index, ids })
    }

    /// Number of parameters
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Whether the store has no parameters
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Look up a parameter by identifier
    #[must_use]
    pub fn id(&self, name: &str) -> Option<ParamId> {
        self.index.get(name).copied()
    }

    /// Look up a parameter, failing on unknown identifiers
    pub fn require(&self, name: &str) -> Result<ParamId> {
        self.id(name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))
    }

    /// Access a parameter
    #[must_use]
    pub fn get(&self, id: ParamId) -> &Parameter {
        &self.params[id.0]
    }

    /// Iterate parameters in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.params.iter()
    }

    /// Set a target, clamped to the declared range
    pub fn set_target(&mut self, id: ParamId, value: f32) {
        let param = &mut self.params[id.0];
        param.target = param.clamp(value);
    }

    /// Current target
    #[must_use]
    pub fn target(&self, id: ParamId) -> f32 {
        self.params[id.0].target
    }

    /// Current smoothed value
    #[must_use]
    pub fn current(&self, id: ParamId) -> f32 {
        self.params[id.0].current
    }

    /// Declared rest value
    #[must_use]
    pub fn default_value(&self, id: ParamId) -> f32 {
        self.params[id.0].default
    }

    /// Reset every target to its default; the first step of each frame
    pub fn reset_targets(&mut self) {
        for param in &mut self.params {
            param.target = param.default;
        }
    }

    /// Move every `current` toward its `target`.
    ///
    /// `current += (target - current) * clamp(dt * rate, 0, 1)`, or an immediate
    /// snap when smoothing is disabled for the parameter.
    pub fn apply_smoothing(&mut self, dt: f32) {
        for param in &mut self.params {
            if param.smoothing {
                let factor = (dt * param.rate).clamp(0.0, 1.0);
                let next = param.current + (param.target - param.current) * factor;
                param.current = param.clamp(next);
            } else {
                param.current = param.target;
            }
        }
    }

    /// Immutable copy of the current values for the renderer
    #[must_use]
    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            ids: Arc::clone(&self.ids),
            values: self.params.iter().map(|p| p.current).collect(),
        }
    }
}

/// The full parameter vector for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSnapshot {
    ids: Arc<[String]>,
    values: Vec<f32>,
}

impl ParameterSnapshot {
    /// Value of a named parameter
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f32> {
        self.ids
            .iter()
            .position(|id| id == name)
            .map(|i| self.values[i])
    }

    /// Values in declaration order
    #[must_use]
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Identifiers in declaration order
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// `(id, value)` pairs in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.ids
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}
