//! Conversation state machine and its control handle
//!
//! The machine runs as a single task. Each pass of its loop picks one job
//! (listen for speech, answer a queued text message, or recover from an
//! error) and drives it while also watching the control channel and the
//! shutdown token. Controls are applied between stage polls on that same
//! task, so interruption and normal transitions never race.

use crate::asr::{RecognizerBackend, SpeechRecognizer};
use crate::audio::{AudioOutput, ChunkSource};
use crate::config::{AdaptersConfig, DialogueConfig};
use crate::error::{Error, Result};
use crate::events::{ConversationEvent, EventBus};
use crate::history::{ConversationTurn, TurnHistory};
use crate::llm::{LanguageModel, LlmBackend};
use crate::pipeline::{Job, TextRequest, TurnPipeline};
use crate::state::ConversationState;
use crate::tts::{SpeechSynthesizer, SynthesizerBackend};
use puppet_anim::AnimationHandle;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// The external services a turn talks to
#[derive(Clone)]
pub struct DialogueAdapters {
    /// Speech recognition and voice activity detection
    pub recognizer: Arc<dyn SpeechRecognizer>,
    /// Reply generation
    pub llm: Arc<dyn LanguageModel>,
    /// Speech synthesis
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Playback device
    pub output: Arc<dyn AudioOutput>,
}

impl DialogueAdapters {
    /// Build the configured backends around an output device
    pub fn from_config(config: &AdaptersConfig, output: Arc<dyn AudioOutput>) -> Result<Self> {
        config.validate()?;
        let recognizer = RecognizerBackend::from_config(&config.asr)?;
        let llm = LlmBackend::from_config(&config.llm)?;
        let synthesizer = SynthesizerBackend::from_config(&config.tts)?;
        info!(
            asr = recognizer.name(),
            llm = llm.name(),
            tts = synthesizer.name(),
            "Dialogue adapters selected"
        );
        Ok(Self {
            recognizer: Arc::new(recognizer),
            llm: Arc::new(llm),
            synthesizer: Arc::new(synthesizer),
            output,
        })
    }
}

impl fmt::Debug for DialogueAdapters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialogueAdapters")
            .field("recognizer", &self.recognizer.name())
            .field("llm", &self.llm.name())
            .field("synthesizer", &self.synthesizer.name())
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum Control {
    Interrupt {
        ack: oneshot::Sender<ConversationState>,
    },
    SendText(TextRequest),
    ClearHistory {
        ack: oneshot::Sender<()>,
    },
}

enum Outcome {
    Finished(Result<()>),
    Preempt(TextRequest),
    Interrupt(oneshot::Sender<ConversationState>),
    Shutdown,
}

/// Single-writer conversation loop
pub struct ConversationStateMachine {
    pipeline: TurnPipeline,
    control_rx: mpsc::Receiver<Control>,
    controls_open: bool,
    state_rx: watch::Receiver<ConversationState>,
    history: Arc<RwLock<TurnHistory>>,
    pending_text: VecDeque<TextRequest>,
    next: Option<Job>,
}

impl ConversationStateMachine {
    /// Create a machine and the handle used to control it
    pub fn new(
        config: DialogueConfig,
        adapters: DialogueAdapters,
        animation: AnimationHandle,
        chunks: Box<dyn ChunkSource>,
    ) -> Result<(Self, DialogueHandle)> {
        config.validate()?;
        let config = Arc::new(config);

        let (control_tx, control_rx) = mpsc::channel(config.control_capacity);
        let (state_tx, state_rx) = watch::channel(ConversationState::Idle);
        let history = Arc::new(RwLock::new(TurnHistory::new(config.max_history_turns)));
        let events = EventBus::new(config.event_capacity);

        let handle = DialogueHandle {
            control: control_tx,
            state: state_rx.clone(),
            history: Arc::clone(&history),
            events: events.clone(),
        };
        let pipeline = TurnPipeline::new(
            config,
            adapters,
            animation,
            chunks,
            state_tx,
            Arc::clone(&history),
            events,
        );

        Ok((
            Self {
                pipeline,
                control_rx,
                controls_open: true,
                state_rx,
                history,
                pending_text: VecDeque::new(),
                next: None,
            },
            handle,
        ))
    }

    /// Run until `cancel` fires.
    ///
    /// Adapter failures never end the loop; only a fatal animation error
    /// (a poisoned engine lock) is returned.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!("Conversation loop started");
        self.pipeline.enter_idle()?;

        loop {
            let job = self.next_job();
            let outcome = self.drive(job, &cancel).await;

            match outcome {
                Outcome::Finished(Ok(())) => {}
                Outcome::Finished(Err(e)) if e.is_fatal() => {
                    error!(error = %e, "Conversation loop stopped");
                    return Err(e);
                }
                Outcome::Finished(Err(e)) => self.next = Some(Job::Recover(e)),
                Outcome::Preempt(request) => self.next = Some(Job::Text(request)),
                Outcome::Interrupt(ack) => {
                    let state = self.pipeline.interrupt()?;
                    let _ = ack.send(state);
                }
                Outcome::Shutdown => {
                    self.pipeline.shutdown();
                    info!("Conversation loop stopped");
                    return Ok(());
                }
            }
        }
    }

    fn next_job(&mut self) -> Job {
        if let Some(job) = self.next.take() {
            return job;
        }
        match self.pending_text.pop_front() {
            Some(request) => Job::Text(request),
            None => Job::Listen,
        }
    }

    /// Drive one job while servicing controls
    async fn drive(&mut self, job: Job, cancel: &CancellationToken) -> Outcome {
        let stage = self.pipeline.execute(job);
        tokio::pin!(stage);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Outcome::Shutdown,
                control = self.control_rx.recv(), if self.controls_open => match control {
                    Some(Control::Interrupt { ack }) => return Outcome::Interrupt(ack),
                    Some(Control::SendText(request)) => {
                        if self.state_rx.borrow().accepts_text() {
                            return Outcome::Preempt(request);
                        }
                        debug!("Text input queued until the current turn ends");
                        self.pending_text.push_back(request);
                    }
                    Some(Control::ClearHistory { ack }) => {
                        self.history
                            .write()
                            .unwrap_or_else(|e| e.into_inner())
                            .clear();
                        info!("Conversation history cleared");
                        let _ = ack.send(());
                    }
                    None => self.controls_open = false,
                },
                result = &mut stage => return Outcome::Finished(result),
            }
        }
    }
}

/// Cloneable control surface of a running [`ConversationStateMachine`]
#[derive(Debug, Clone)]
pub struct DialogueHandle {
    control: mpsc::Sender<Control>,
    state: watch::Receiver<ConversationState>,
    history: Arc<RwLock<TurnHistory>>,
    events: EventBus,
}

impl DialogueHandle {
    /// Cancel the active turn; resolves with the state after the transition
    pub async fn interrupt(&self) -> Result<ConversationState> {
        let (ack, rx) = oneshot::channel();
        self.control
            .send(Control::Interrupt { ack })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Submit a text message as a turn and wait for the clean reply
    pub async fn send_text(&self, text: impl Into<String>) -> Result<String> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(Error::EmptyInput);
        }
        let (reply, rx) = oneshot::channel();
        self.control
            .send(Control::SendText(TextRequest { text, reply }))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::Cancelled)?
    }

    /// Snapshot of stored turns, oldest first
    #[must_use]
    pub fn history(&self) -> Vec<ConversationTurn> {
        self.history
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    /// Forget all stored turns
    pub async fn clear_history(&self) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.control
            .send(Control::ClearHistory { ack })
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConversationState> {
        self.state.clone()
    }

    /// Subscribe to conversation events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests;
