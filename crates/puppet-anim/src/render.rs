//! Renderer boundary
//!
//! The engine only produces parameter vectors. A renderer owns the model
//! backend resource and turns each [`FrameState`] into pixels; the backend's
//! internal layout is never visible from here.

use crate::engine::FrameState;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Consumes one frame per render tick
#[cfg_attr(test, mockall::automock)]
pub trait Renderer: Send {
    /// Render a frame
    fn render(&mut self, frame: &FrameState) -> Result<()>;

    /// Renderer name for logs
    fn name(&self) -> &str {
        "renderer"
    }
}

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque owned model resource.
///
/// Created once with the parameter layout it was loaded with and released on
/// drop; callers interact with it only through [`Renderer`].
#[derive(Debug)]
pub struct ModelHandle {
    id: u64,
    model: String,
    parameter_ids: Vec<String>,
}

impl ModelHandle {
    /// Acquire a handle for `model` with the given parameter layout
    pub fn create(model: impl Into<String>, parameter_ids: &[String]) -> Result<Self> {
        let model = model.into();
        if parameter_ids.is_empty() {
            return Err(Error::Render(format!("model '{}' has no parameters", model)));
        }
        let id = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
        debug!(handle = id, model = %model, parameters = parameter_ids.len(), "Model handle created");
        Ok(Self {
            id,
            model,
            parameter_ids: parameter_ids.to_vec(),
        })
    }

    /// Handle identifier
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Model name
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    fn accepts(&self, frame: &FrameState) -> bool {
        frame.parameters.ids() == self.parameter_ids.as_slice()
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        debug!(handle = self.id, model = %self.model, "Model handle destroyed");
    }
}

/// Renderer without a graphics backend; keeps the last parameter vector
#[derive(Debug)]
pub struct HeadlessRenderer {
    handle: ModelHandle,
    frames: u64,
    last: Vec<f32>,
}

impl HeadlessRenderer {
    /// Create a renderer owning `handle`
    #[must_use]
    pub fn new(handle: ModelHandle) -> Self {
        Self {
            handle,
            frames: 0,
            last: Vec::new(),
        }
    }

    /// Frames rendered so far
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Parameter values of the last frame
    #[must_use]
    pub fn last_values(&self) -> &[f32] {
        &self.last
    }

    /// Owned model handle
    #[must_use]
    pub fn handle(&self) -> &ModelHandle {
        &self.handle
    }
}

impl Renderer for HeadlessRenderer {
    fn render(&mut self, frame: &FrameState) -> Result<()> {
        if !self.handle.accepts(frame) {
            return Err(Error::Render(format!(
                "parameter layout does not match model '{}'",
                self.handle.model()
            )));
        }
        self.last.clear();
        self.last.extend_from_slice(frame.parameters.values());
        self.frames += 1;
        trace!(frame = frame.frame_index, "Headless frame");
        Ok(())
    }

    fn name(&self) -> &str {
        "headless"
    }
}
