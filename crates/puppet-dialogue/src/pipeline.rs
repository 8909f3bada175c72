//! Turn stages executed by the conversation state machine.
//!
//! Every stage runs inside one future owned by the machine's run loop; the
//! loop drops that future to cancel it. All state writes happen here or in
//! [`TurnPipeline::interrupt`], both on the machine's task.

use crate::audio::ChunkSource;
use crate::config::DialogueConfig;
use crate::detector::{DetectorConfig, SpeechDetector, SpeechSegment};
use crate::emotion_tag::parse_emotion_tags;
use crate::error::{Error, Result};
use crate::events::{ConversationEvent, EventBus};
use crate::history::{build_context, ConversationTurn, TurnHistory};
use crate::machine::DialogueAdapters;
use crate::message::Message;
use crate::state::ConversationState;
use crate::tts::Utterance;
use puppet_anim::{AnimationEngine, AnimationHandle};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Extra time allowed for the lipsync timeline to drain after its last frame
const LIPSYNC_GRACE: Duration = Duration::from_secs(1);

/// A text message waiting to be answered
#[derive(Debug)]
pub(crate) struct TextRequest {
    pub(crate) text: String,
    pub(crate) reply: oneshot::Sender<Result<String>>,
}

/// Unit of work for one pass of the run loop
#[derive(Debug)]
pub(crate) enum Job {
    Listen,
    Text(TextRequest),
    Recover(Error),
}

pub(crate) struct TurnPipeline {
    config: Arc<DialogueConfig>,
    adapters: DialogueAdapters,
    animation: AnimationHandle,
    chunks: Box<dyn ChunkSource>,
    chunks_open: bool,
    detector: SpeechDetector,
    state: watch::Sender<ConversationState>,
    history: Arc<RwLock<TurnHistory>>,
    events: EventBus,
}

impl TurnPipeline {
    pub(crate) fn new(
        config: Arc<DialogueConfig>,
        adapters: DialogueAdapters,
        animation: AnimationHandle,
        chunks: Box<dyn ChunkSource>,
        state: watch::Sender<ConversationState>,
        history: Arc<RwLock<TurnHistory>>,
        events: EventBus,
    ) -> Self {
        let detector = SpeechDetector::new(DetectorConfig {
            silence_timeout: config.silence_timeout(),
            max_speech: config.max_speech_duration(),
            min_speech: config.min_speech_duration(),
        });
        Self {
            config,
            adapters,
            animation,
            chunks,
            chunks_open: true,
            detector,
            state,
            history,
            events,
        }
    }

    pub(crate) fn state(&self) -> ConversationState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConversationState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Conversation state changed");
            self.events.publish(ConversationEvent::StateChanged {
                from: previous,
                to: next,
            });
        }
    }

    /// Enter IDLE and request the idle animation
    pub(crate) fn enter_idle(&self) -> Result<()> {
        self.animation.set_idle_animation()?;
        self.set_state(ConversationState::Idle);
        Ok(())
    }

    pub(crate) async fn execute(&mut self, job: Job) -> Result<()> {
        match job {
            Job::Listen => self.voice_turn().await,
            Job::Text(request) => self.text_turn(request).await,
            Job::Recover(err) => self.recover(err).await,
        }
    }

    /// Cancel the active turn and return to IDLE.
    ///
    /// Called after the run loop has dropped the stage future, so nothing
    /// else touches playback, lipsync or the detector concurrently.
    pub(crate) fn interrupt(&mut self) -> Result<ConversationState> {
        let during = self.state();
        self.adapters.output.stop_playback();
        self.animation.interrupt()?;
        self.detector.reset();
        self.enter_idle()?;
        info!(during = %during, "Turn interrupted");
        self.events.publish(ConversationEvent::Interrupted { during });
        Ok(ConversationState::Idle)
    }

    pub(crate) fn shutdown(&mut self) {
        self.adapters.output.stop_playback();
        if let Err(e) = self.animation.interrupt() {
            warn!(error = %e, "Failed to clear animation queues on shutdown");
        }
        self.detector.reset();
        self.set_state(ConversationState::Idle);
    }

    async fn voice_turn(&mut self) -> Result<()> {
        self.set_state(ConversationState::Listening);
        let segment = self.listen().await;
        let started = Instant::now();
        let turn_id = Uuid::new_v4();
        debug!(
            turn_id = %turn_id,
            voiced_ms = segment.voiced.as_millis() as u64,
            reason = ?segment.reason,
            "Utterance captured"
        );

        self.set_state(ConversationState::Processing);
        let asr_started = Instant::now();
        let transcript = self.adapters.recognizer.transcribe(&segment.audio).await?;
        let asr_latency = asr_started.elapsed();
        let user_input = transcript.trim().to_string();
        if user_input.is_empty() {
            debug!(turn_id = %turn_id, "Empty transcription");
            self.events.publish(ConversationEvent::TurnAborted {
                reason: "no speech recognized".to_string(),
            });
            return self.enter_idle();
        }
        info!(turn_id = %turn_id, text = %user_input, "User said");
        self.events.publish(ConversationEvent::UserSpeech {
            turn_id,
            text: user_input.clone(),
        });

        let llm_started = Instant::now();
        let reply = self.adapters.llm.complete(&self.context_for(&user_input)).await;
        let llm_latency = llm_started.elapsed();
        if reply.trim().is_empty() {
            warn!(turn_id = %turn_id, "No reply for voice input");
            self.events.publish(ConversationEvent::TurnAborted {
                reason: "language model returned no reply".to_string(),
            });
            return self.enter_idle();
        }

        self.set_state(ConversationState::Responding);
        let parsed = parse_emotion_tags(&reply);
        if let Some(emotion) = &parsed.emotion {
            self.apply_emotion(turn_id, emotion)?;
        }
        self.events.publish(ConversationEvent::AssistantResponse {
            turn_id,
            text: parsed.text.clone(),
        });

        let mut turn = ConversationTurn::new(user_input, parsed.text.clone())
            .with_emotion(parsed.emotion);
        turn.id = turn_id;
        turn.asr_latency = Some(asr_latency);
        turn.llm_latency = Some(llm_latency);

        if !parsed.text.is_empty() {
            let tts_started = Instant::now();
            let utterance = self.adapters.synthesizer.synthesize(&parsed.text).await?;
            turn.tts_latency = Some(tts_started.elapsed());

            self.set_state(ConversationState::Speaking);
            self.speak(utterance).await?;
        } else {
            debug!(turn_id = %turn_id, "Reply has no speakable text");
        }

        self.finish_turn(turn, started);
        self.enter_idle()
    }

    async fn text_turn(&mut self, request: TextRequest) -> Result<()> {
        let TextRequest { text, reply } = request;
        let started = Instant::now();
        let turn_id = Uuid::new_v4();

        self.set_state(ConversationState::Processing);
        self.events.publish(ConversationEvent::UserSpeech {
            turn_id,
            text: text.clone(),
        });

        let llm_started = Instant::now();
        let raw = self.adapters.llm.complete(&self.context_for(&text)).await;
        let llm_latency = llm_started.elapsed();
        if raw.trim().is_empty() {
            warn!(turn_id = %turn_id, "No reply for text input, using fallback");
            self.events.publish(ConversationEvent::TurnAborted {
                reason: "language model returned no reply".to_string(),
            });
            self.set_state(ConversationState::Idle);
            let _ = reply.send(Ok(self.config.fallback_reply.clone()));
            return Ok(());
        }

        self.set_state(ConversationState::Responding);
        let parsed = parse_emotion_tags(&raw);
        if let Some(emotion) = &parsed.emotion {
            self.apply_emotion(turn_id, emotion)?;
        }
        self.events.publish(ConversationEvent::AssistantResponse {
            turn_id,
            text: parsed.text.clone(),
        });

        let mut turn = ConversationTurn::new(text, parsed.text.clone()).with_emotion(parsed.emotion);
        turn.id = turn_id;
        turn.llm_latency = Some(llm_latency);
        self.finish_turn(turn, started);

        // The reply's expression stays up until the next turn resets it.
        self.set_state(ConversationState::Idle);
        let _ = reply.send(Ok(parsed.text));
        Ok(())
    }

    async fn recover(&mut self, err: Error) -> Result<()> {
        error!(error = %err, "Turn failed");
        self.set_state(ConversationState::Error);
        self.adapters.output.stop_playback();
        self.animation.interrupt()?;
        self.detector.reset();
        self.events.publish(ConversationEvent::TurnAborted {
            reason: err.to_string(),
        });

        tokio::time::sleep(self.config.error_backoff()).await;
        self.enter_idle()
    }

    async fn listen(&mut self) -> SpeechSegment {
        let stale = self.chunks.drain();
        if stale > 0 {
            debug!(chunks = stale, "Discarded audio captured outside listening");
        }
        self.detector.reset();
        loop {
            let deadline = self.detector.deadline();
            let timer = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                chunk = self.chunks.recv(), if self.chunks_open => match chunk {
                    Some(chunk) => {
                        let voiced = self.adapters.recognizer.detect_activity(&chunk);
                        if let Some(segment) = self.detector.feed(voiced, &chunk, Instant::now()) {
                            return segment;
                        }
                    }
                    None => {
                        warn!("Audio capture source closed");
                        self.chunks_open = false;
                    }
                },
                () = timer => {
                    if let Some(segment) = self.detector.poll(Instant::now()) {
                        return segment;
                    }
                }
            }
        }
    }

    async fn speak(&mut self, utterance: Utterance) -> Result<()> {
        let grace = utterance.timeline_end().saturating_add(LIPSYNC_GRACE);
        let completion = self.animation.schedule_lipsync(utterance.phonemes)?;

        let animation = self.animation.clone();
        let lipsync = async move {
            if tokio::time::timeout(grace, completion.finished()).await.is_err() {
                warn!("Lipsync timeline did not drain, clearing it");
                if let Err(e) = animation.with(AnimationEngine::clear_lipsync) {
                    warn!(error = %e, "Failed to clear lipsync");
                }
            }
        };

        let (played, ()) = tokio::join!(self.adapters.output.play(&utterance.audio), lipsync);
        played
    }

    fn apply_emotion(&self, turn_id: Uuid, emotion: &str) -> Result<()> {
        let known = self.animation.apply_emotion(emotion)?;
        debug!(turn_id = %turn_id, emotion = %emotion, known, "Emotion detected");
        self.events.publish(ConversationEvent::EmotionDetected {
            turn_id,
            emotion: emotion.to_string(),
            known,
        });
        Ok(())
    }

    fn context_for(&self, user_input: &str) -> Vec<Message> {
        let history = self.history.read().unwrap_or_else(|e| e.into_inner());
        build_context(
            &self.config.system_prompt,
            &history,
            self.config.context_turns,
            user_input,
        )
    }

    fn finish_turn(&self, mut turn: ConversationTurn, started: Instant) {
        let total = started.elapsed();
        turn.total_latency = Some(total);
        let turn_id = turn.id;
        info!(
            turn_id = %turn_id,
            total_ms = total.as_millis() as u64,
            emotion = turn.emotion_detected.as_deref().unwrap_or("-"),
            "Turn completed"
        );
        self.history
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(turn);
        self.events.publish(ConversationEvent::TurnCompleted {
            turn_id,
            total_ms: total.as_millis() as u64,
        });
    }
}
