//! Expression source

use crate::config::ExpressionEntry;
use crate::error::{Error, Result};
use crate::parameter::{ParamId, ParameterStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// How expression values combine with the baseline targets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionBlend {
    /// Replace the target
    #[default]
    Overwrite,
    /// Add to the target
    Add,
    /// Multiply the target
    Multiply,
}

impl ExpressionBlend {
    fn combine(self, base: f32, value: f32) -> f32 {
        match self {
            Self::Overwrite => value,
            Self::Add => base + value,
            Self::Multiply => base * value,
        }
    }
}

#[derive(Debug, Clone)]
struct ResolvedExpression {
    blend: ExpressionBlend,
    values: Vec<(ParamId, f32)>,
}

/// Holds the expression catalog and the active selection.
///
/// An expression stays active until another one replaces it or it is cleared.
#[derive(Debug, Clone)]
pub struct ExpressionSource {
    catalog: HashMap<String, ResolvedExpression>,
    active: Option<String>,
}

impl ExpressionSource {
    /// Resolve catalog entries against the store
    pub fn new(entries: &BTreeMap<String, ExpressionEntry>, store: &ParameterStore) -> Result<Self> {
        let mut catalog = HashMap::with_capacity(entries.len());
        for (name, entry) in entries {
            let values = entry
                .parameters
                .iter()
                .map(|(id, value)| Ok((store.require(id)?, *value)))
                .collect::<Result<Vec<_>>>()?;
            catalog.insert(
                name.clone(),
                ResolvedExpression {
                    blend: entry.blend,
                    values,
                },
            );
        }
        Ok(Self {
            catalog,
            active: None,
        })
    }

    /// Whether the catalog contains `name`
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.catalog.contains_key(name)
    }

    /// Activate an expression
    pub fn set(&mut self, name: &str) -> Result<()> {
        if !self.catalog.contains_key(name) {
            return Err(Error::AssetMissing {
                kind: "expression",
                name: name.to_string(),
            });
        }
        if self.active.as_deref() != Some(name) {
            debug!(expression = %name, "Expression changed");
            self.active = Some(name.to_string());
        }
        Ok(())
    }

    /// Deactivate the current expression
    pub fn clear(&mut self) {
        self.active = None;
    }

    /// Active expression name
    #[must_use]
    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Apply the active expression, skipping parameters in `masked`
    pub fn apply(&self, store: &mut ParameterStore, masked: &[ParamId]) {
        let Some(expression) = self.active.as_ref().and_then(|name| self.catalog.get(name)) else {
            return;
        };
        for &(id, value) in &expression.values {
            if masked.contains(&id) {
                continue;
            }
            let combined = expression.blend.combine(store.target(id), value);
            store.set_target(id, combined);
        }
    }
}
