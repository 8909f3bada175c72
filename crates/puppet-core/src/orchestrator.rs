//! Engine orchestrator
//!
//! Owns the three execution contexts and their lifecycle:
//!
//! - render loop (OS thread, fixed frame rate)
//! - capture loop (OS thread, fixed polling interval)
//! - dialogue task (Tokio task running the conversation state machine)
//!
//! Capture hands chunks to dialogue through a drop-oldest [`ChunkQueue`].
//! Dialogue and rendering meet only at the animation lock. A poisoned lock in
//! either context moves the engine to [`EngineState::Error`] and stops the
//! other contexts.

use crate::capture_loop::{CaptureLoop, CaptureWorker};
use crate::chunk_queue::ChunkQueue;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::render_loop::{RenderLoop, RenderWorker};
use crate::status::{EngineShared, EngineState, EngineStatus};
use puppet_anim::{AnimationEngine, AnimationHandle, FrameState, HeadlessRenderer, ModelHandle, Renderer};
use puppet_dialogue::{
    AudioInput, AudioOutput, ConversationStateMachine, DialogueAdapters, DialogueHandle,
    ScriptedInput, SimulatedOutput,
};
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


/// Renderer, capture device and dialogue adapters driven by the engine
pub struct EngineComponents {
    /// Consumes one frame per render tick
    pub renderer: Box<dyn Renderer>,
    /// Polled by the capture loop
    pub input: Box<dyn AudioInput>,
    /// Recognizer, language model, synthesizer and playback device
    pub adapters: DialogueAdapters,
}

impl EngineComponents {
    /// Headless renderer plus the configured adapters and audio devices.
    ///
    /// Without `adapters.audio.use_devices` the capture device is an empty
    /// [`ScriptedInput`] and playback is simulated.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let ids: Vec<String> = config
            .animation
            .parameters
            .iter()
            .map(|spec| spec.id.clone())
            .collect();
        let renderer = HeadlessRenderer::new(ModelHandle::create(&config.render.model, &ids)?);

        let (input, output) = open_audio(config)?;
        let adapters = DialogueAdapters::from_config(&config.adapters, output)?;

        Ok(Self {
            renderer: Box::new(renderer),
            input,
            adapters,
        })
    }
}

impl fmt::Debug for EngineComponents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineComponents")
            .field("renderer", &self.renderer.name())
            .field("adapters", &self.adapters)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "device-audio")]
fn open_audio(config: &EngineConfig) -> Result<(Box<dyn AudioInput>, Arc<dyn AudioOutput>)> {
    use puppet_dialogue::{CpalInput, RodioOutput};

    if config.adapters.audio.use_devices {
        let input = CpalInput::open(config.adapters.audio.sample_rate)?;
        let output = RodioOutput::open()?;
        return Ok((Box::new(input), Arc::new(output)));
    }
    Ok((Box::new(ScriptedInput::new()), Arc::new(SimulatedOutput::new())))
}

#[cfg(not(feature = "device-audio"))]
fn open_audio(config: &EngineConfig) -> Result<(Box<dyn AudioInput>, Arc<dyn AudioOutput>)> {
    if config.adapters.audio.use_devices {
        return Err(Error::config(
            "adapters.audio.use_devices",
            "built without the device-audio feature",
        ));
    }
    Ok((Box::new(ScriptedInput::new()), Arc::new(SimulatedOutput::new())))
}

/// Components assembled by `initialize` and consumed by `start`
struct Prepared {
    machine: ConversationStateMachine,
    renderer: Box<dyn Renderer>,
    input: Box<dyn AudioInput>,
}

struct Running {
    cancel: CancellationToken,
    render: RenderLoop,
    capture: CaptureLoop,
    dialogue: JoinHandle<()>,
}

/// Top-level engine: lifecycle, status and control entry points
pub struct EngineOrchestrator {
    config: Arc<EngineConfig>,
    shared: Arc<EngineShared>,
    queue: ChunkQueue,
    animation: Option<AnimationHandle>,
    dialogue: Option<DialogueHandle>,
    prepared: Option<Prepared>,
    running: Option<Running>,
}

impl EngineOrchestrator {
    /// Validate `config` and create a stopped engine
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let queue = ChunkQueue::new(config.capture.queue_capacity);
        Ok(Self {
            config: Arc::new(config),
            shared: Arc::new(EngineShared::new()),
            queue,
            animation: None,
            dialogue: None,
            prepared: None,
            running: None,
        })
    }

    /// Build the animation engine and the conversation state machine.
    ///
    /// Leaves the engine in [`EngineState::Initializing`] until
    /// [`start`](Self::start). Any failure moves it to [`EngineState::Error`].
    pub fn initialize(&mut self, components: EngineComponents) -> Result<()> {
        match self.state() {
            EngineState::Stopped | EngineState::Error => {}
            state => {
                return Err(Error::InvalidState(format!(
                    "cannot initialize while {}",
                    state
                )))
            }
        }

        self.shared.reset();
        self.shared.set_state(EngineState::Initializing);
        match self.build(components) {
            Ok(()) => {
                info!(
                    model = %self.config.render.model,
                    fps = self.config.render.fps,
                    "Engine initialized"
                );
                Ok(())
            }
            Err(e) => {
                self.shared.fail(format!("initialization failed: {}", e));
                Err(e)
            }
        }
    }

    fn build(&mut self, components: EngineComponents) -> Result<()> {
        let engine = AnimationEngine::new(&self.config.animation)?;
        let animation = AnimationHandle::new(engine);
        let queue = ChunkQueue::new(self.config.capture.queue_capacity);

        let (machine, dialogue) = ConversationStateMachine::new(
            self.config.dialogue.clone(),
            components.adapters,
            animation.clone(),
            Box::new(queue.clone()),
        )?;

        self.queue = queue;
        self.animation = Some(animation);
        self.dialogue = Some(dialogue);
        self.prepared = Some(Prepared {
            machine,
            renderer: components.renderer,
            input: components.input,
        });
        Ok(())
    }

    /// Start the render loop, capture loop and dialogue task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::InvalidState("already running".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::InvalidState("start requires a Tokio runtime".to_string()))?;
        let prepared = self
            .prepared
            .take()
            .ok_or_else(|| Error::InvalidState("not initialized".to_string()))?;
        let animation = self.animation()?.clone();

        let cancel = CancellationToken::new();
        let render = RenderLoop::spawn(
            RenderWorker::new(
                animation,
                prepared.renderer,
                &self.config.render,
                Arc::clone(&self.shared),
            ),
            self.config.render.frame_interval(),
            cancel.clone(),
        )?;

        let capture = match CaptureLoop::spawn(
            CaptureWorker::new(
                prepared.input,
                self.queue.clone(),
                &self.config.capture,
                Arc::clone(&self.shared),
            ),
            self.config.capture.poll_interval(),
            cancel.clone(),
        ) {
            Ok(capture) => capture,
            Err(e) => {
                cancel.cancel();
                if let Err(join) = render.join() {
                    warn!(error = %join, "Render loop did not stop cleanly");
                }
                self.shared.fail(e.to_string());
                return Err(e);
            }
        };

        let machine = prepared.machine;
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let dialogue = runtime.spawn(async move {
            if let Err(e) = machine.run(token.clone()).await {
                shared.fail(format!("dialogue: {}", e));
                token.cancel();
            }
        });

        self.running = Some(Running {
            cancel,
            render,
            capture,
            dialogue,
        });
        self.shared.set_state(EngineState::Running);
        info!("Engine started");
        Ok(())
    }

    /// Stop all contexts and wait for them to exit.
    ///
    /// Calling `stop` on an engine that is not running does nothing. After a
    /// fatal error the engine stays in [`EngineState::Error`].
    pub async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        debug!("Stopping engine");
        running.cancel.cancel();

        let mut result = Ok(());
        if let Err(e) = running.dialogue.await {
            result = Err(Error::Thread(format!("dialogue task failed: {}", e)));
        }

        let render = running.render;
        let capture = running.capture;
        let joined = tokio::task::spawn_blocking(move || (render.join(), capture.join()))
            .await
            .map_err(|e| Error::Thread(format!("failed to join loops: {}", e)))?;
        for loop_result in [joined.0, joined.1] {
            if let Err(e) = loop_result {
                warn!(error = %e, "Loop did not stop cleanly");
                result = Err(e);
            }
        }

        if self.shared.state() != EngineState::Error {
            self.shared.set_state(EngineState::Stopped);
        }
        info!(
            frames = self.shared.frames_rendered(),
            chunks = self.shared.chunks_captured(),
            dropped = self.queue.dropped(),
            "Engine stopped"
        );
        result
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Engine, conversation and animation state in one view
    pub fn status(&self) -> Result<EngineStatus> {
        let (expression, motion, blink_phase, speaking) = match &self.animation {
            Some(animation) => animation.with(|engine| {
                (
                    engine.expression().map(str::to_string),
                    engine.motion(),
                    Some(engine.blink_phase()),
                    engine.is_speaking(),
                )
            })?,
            None => (None, None, None, false),
        };

        Ok(EngineStatus {
            state: self.shared.state(),
            conversation: self.dialogue.as_ref().map(DialogueHandle::state),
            frames_rendered: self.shared.frames_rendered(),
            chunks_captured: self.shared.chunks_captured(),
            chunks_dropped: self.queue.dropped(),
            expression,
            motion,
            blink_phase,
            speaking,
            last_error: self.shared.last_error(),
        })
    }

    /// Apply an emotion's expression and motion outside a turn.
    ///
    /// Returns whether the tag is in the emotion table; unknown tags fall
    /// back to the neutral expression and idle motion.
    pub fn set_emotion(&self, emotion: &str) -> Result<bool> {
        let known = self.animation()?.apply_emotion(emotion)?;
        debug!(emotion = %emotion, known, "Emotion set");
        Ok(known)
    }

    /// Control handle of the conversation loop
    pub fn dialogue(&self) -> Result<&DialogueHandle> {
        self.dialogue
            .as_ref()
            .ok_or_else(|| Error::InvalidState("not initialized".to_string()))
    }

    /// Latest frame without advancing the animation
    pub fn snapshot(&self) -> Result<FrameState> {
        Ok(self.animation()?.frame()?)
    }

    /// Shared animation engine
    pub fn animation(&self) -> Result<&AnimationHandle> {
        self.animation
            .as_ref()
            .ok_or_else(|| Error::InvalidState("not initialized".to_string()))
    }

    /// Queue between the capture loop and the dialogue task
    #[must_use]
    pub fn chunk_queue(&self) -> &ChunkQueue {
        &self.queue
    }

    /// Token cancelled when the engine stops, including on a fatal error
    #[must_use]
    pub fn shutdown_token(&self) -> Option<CancellationToken> {
        self.running.as_ref().map(|running| running.cancel.clone())
    }

    /// Resolved configuration
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl fmt::Debug for EngineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineOrchestrator")
            .field("state", &self.state())
            .field("initialized", &self.animation.is_some())
            .field("running", &self.running.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for EngineOrchestrator {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
