
    use super::*;
    use crate::asr::ScriptedRecognizer;
    use crate::audio::{AudioChunk, SimulatedOutput};
    use crate::llm::ScriptedLanguageModel;
    use crate::message::Message;
    use crate::tts::ScriptedSynthesizer;
    use puppet_anim::{AnimationConfig, AnimationEngine};
    use std::time::Duration;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    const RATE: u32 = 16_000;
    const CHUNK: Duration = Duration::from_millis(100);
    const FRAME: Duration = Duration::from_millis(16);

    struct Harness {
        handle: DialogueHandle,
        recognizer: ScriptedRecognizer,
        llm: ScriptedLanguageModel,
        synth: ScriptedSynthesizer,
        output: Arc<SimulatedOutput>,
        animation: AnimationHandle,
        mic: mpsc::Sender<AudioChunk>,
        events: broadcast::Receiver<ConversationEvent>,
        cancel: CancellationToken,
        task: JoinHandle<Result<()>>,
    }

    impl Harness {
        fn start(
            config: DialogueConfig,
            recognizer: ScriptedRecognizer,
            llm: ScriptedLanguageModel,
            synth: ScriptedSynthesizer,
        ) -> Self {
            let animation = AnimationHandle::new(
                AnimationEngine::new(&AnimationConfig {
                    seed: Some(7),
                    ..AnimationConfig::default()
                })
                .unwrap(),
            );
            let output = Arc::new(SimulatedOutput::new());
            let adapters = DialogueAdapters {
                recognizer: Arc::new(recognizer.clone()),
                llm: Arc::new(llm.clone()),
                synthesizer: Arc::new(synth.clone()),
                output: output.clone(),
            };
            let (mic, chunks) = mpsc::channel(64);
            let (machine, handle) =
                ConversationStateMachine::new(config, adapters, animation.clone(), Box::new(chunks))
                    .unwrap();
            let events = handle.subscribe();
            let cancel = CancellationToken::new();

            let ticker = animation.clone();
            let ticker_cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(FRAME);
                loop {
                    tokio::select! {
                        () = ticker_cancel.cancelled() => break,
                        _ = interval.tick() => {
                            let _ = ticker.tick(FRAME.as_secs_f32());
                        }
                    }
                }
            });

            let task = tokio::spawn(machine.run(cancel.clone()));

            Self {
                handle,
                recognizer,
                llm,
                synth,
                output,
                animation,
                mic,
                events,
                cancel,
                task,
            }
        }

        /// Send voiced chunks in real time for `duration`
        async fn say(&self, duration: Duration) {
            let mut remaining = duration;
            while !remaining.is_zero() {
                self.mic
                    .send(AudioChunk::tone(CHUNK, RATE, 0.5))
                    .await
                    .unwrap();
                tokio::time::sleep(CHUNK).await;
                remaining = remaining.saturating_sub(CHUNK);
            }
        }

        /// Collect the next `count` state transitions
        async fn states(&mut self, count: usize) -> Vec<ConversationState> {
            let mut states = Vec::with_capacity(count);
            while states.len() < count {
                let event = tokio::time::timeout(Duration::from_secs(300), self.events.recv())
                    .await
                    .expect("state change within timeout")
                    .expect("event bus open");
                if let ConversationEvent::StateChanged { to, .. } = event {
                    states.push(to);
                }
            }
            states
        }

        async fn wait_for(&self, state: ConversationState) {
            let mut watch = self.handle.watch_state();
            tokio::time::timeout(Duration::from_secs(300), watch.wait_for(|s| *s == state))
                .await
                .expect("state reached within timeout")
                .unwrap();
        }

        /// Playback stopped and no mouth movement left
        fn assert_quiet(&self) {
            assert!(!self.output.is_playing());
            assert!(self.output.stop_count() >= 1);
            assert!(!self.animation.is_speaking().unwrap());
            assert_eq!(self.animation.with(|e| e.pending_phonemes()).unwrap(), 0);
        }

        /// State reported by the latest `Interrupted` event received so far
        fn interrupted_during(&mut self) -> Option<ConversationState> {
            let mut during = None;
            while let Ok(event) = self.events.try_recv() {
                if let ConversationEvent::Interrupted { during: state } = event {
                    during = Some(state);
                }
            }
            during
        }

        async fn stop(self) -> Result<()> {
            self.cancel.cancel();
            self.task.await.unwrap()
        }
    }

    fn config() -> DialogueConfig {
        DialogueConfig::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_transcription_returns_to_idle() {
        let mut h = Harness::start(
            config(),
            ScriptedRecognizer::new([""]),
            ScriptedLanguageModel::new(["unused"]),
            ScriptedSynthesizer::new(),
        );

        h.say(Duration::from_secs(1)).await;
        let states = h.states(3).await;
        assert_eq!(
            states,
            vec![
                ConversationState::Listening,
                ConversationState::Processing,
                ConversationState::Idle,
            ]
        );
        assert_eq!(h.recognizer.calls(), 1);
        assert_eq!(h.llm.calls(), 0);
        assert_eq!(h.synth.calls(), 0);
        assert!(h.handle.history().is_empty());
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_voice_turn() {
        let mut h = Harness::start(
            config(),
            ScriptedRecognizer::new(["hello"]),
            ScriptedLanguageModel::new(["[EMOTION:happy] Hi!"]),
            ScriptedSynthesizer::new(),
        );

        h.say(Duration::from_secs(1)).await;
        let states = h.states(5).await;
        assert_eq!(
            states,
            vec![
                ConversationState::Listening,
                ConversationState::Processing,
                ConversationState::Responding,
                ConversationState::Speaking,
                ConversationState::Idle,
            ]
        );

        let history = h.handle.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_input, "hello");
        assert_eq!(history[0].assistant_response, "Hi!");
        assert_eq!(history[0].emotion_detected.as_deref(), Some("happy"));
        assert!(history[0].asr_latency.is_some());
        assert!(history[0].total_latency.is_some());

        assert_eq!(
            h.llm.requests()[0],
            vec![Message::system(config().system_prompt), Message::user("hello")]
        );
        assert_eq!(h.synth.texts(), vec!["Hi!"]);
        assert_eq!(h.output.play_count(), 1);
        assert!(!h.animation.is_speaking().unwrap());
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_never_starts_a_turn() {
        let h = Harness::start(
            config(),
            ScriptedRecognizer::new(["hello"]),
            ScriptedLanguageModel::new(["hi"]),
            ScriptedSynthesizer::new(),
        );

        for _ in 0..50 {
            h.mic.send(AudioChunk::silence(CHUNK, RATE)).await.unwrap();
            tokio::time::sleep(CHUNK).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.handle.state(), ConversationState::Listening);
        assert_eq!(h.recognizer.calls(), 0);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let config = DialogueConfig {
            max_history_turns: 2,
            context_turns: 2,
            ..config()
        };
        let h = Harness::start(
            config,
            ScriptedRecognizer::default(),
            ScriptedLanguageModel::new(["one", "two", "three"]),
            ScriptedSynthesizer::new(),
        );

        assert_eq!(h.handle.send_text("a").await.unwrap(), "one");
        assert_eq!(h.handle.send_text("b").await.unwrap(), "two");
        assert_eq!(h.handle.send_text("c").await.unwrap(), "three");

        let history = h.handle.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].user_input, "b");
        assert_eq!(history[1].assistant_response, "three");

        let third = &h.llm.requests()[2];
        assert_eq!(third.len(), 1 + 2 * 2 + 1);
        assert_eq!(third[1], Message::user("a"));
        assert_eq!(third[5], Message::user("c"));
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_speaking() {
        let long_reply = format!("[EMOTION:happy] {}", "la ".repeat(100));
        let mut h = Harness::start(
            config(),
            ScriptedRecognizer::new(["sing"]),
            ScriptedLanguageModel::new([long_reply]),
            ScriptedSynthesizer::new(),
        );

        h.say(Duration::from_secs(1)).await;
        h.wait_for(ConversationState::Speaking).await;
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(h.output.is_playing());
        assert!(h.animation.is_speaking().unwrap());

        let state = h.handle.interrupt().await.unwrap();
        assert_eq!(state, ConversationState::Idle);
        h.assert_quiet();
        assert!(h.handle.history().is_empty());
        assert_eq!(h.interrupted_during(), Some(ConversationState::Speaking));
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_processing_discards_result() {
        let mut h = Harness::start(
            config(),
            ScriptedRecognizer::new(["hello"]).with_latency(Duration::from_secs(5)),
            ScriptedLanguageModel::new(["hi"]),
            ScriptedSynthesizer::new(),
        );

        h.say(Duration::from_secs(1)).await;
        h.wait_for(ConversationState::Processing).await;
        assert_eq!(h.handle.interrupt().await.unwrap(), ConversationState::Idle);
        h.assert_quiet();
        assert_eq!(h.interrupted_during(), Some(ConversationState::Processing));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.llm.calls(), 0);
        assert!(h.handle.history().is_empty());
        assert_eq!(h.handle.state(), ConversationState::Listening);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_listening_drops_partial_utterance() {
        let mut h = Harness::start(
            config(),
            ScriptedRecognizer::new(["hello"]),
            ScriptedLanguageModel::new(["hi"]),
            ScriptedSynthesizer::new(),
        );

        h.say(Duration::from_millis(500)).await;
        assert_eq!(h.handle.state(), ConversationState::Listening);
        assert_eq!(h.handle.interrupt().await.unwrap(), ConversationState::Idle);
        h.assert_quiet();
        assert_eq!(h.interrupted_during(), Some(ConversationState::Listening));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.recognizer.calls(), 0);
        assert_eq!(h.handle.state(), ConversationState::Listening);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_responding_skips_playback() {
        let mut h = Harness::start(
            config(),
            ScriptedRecognizer::new(["hello"]),
            ScriptedLanguageModel::new(["[EMOTION:happy] Hi there!"]),
            ScriptedSynthesizer::new().with_latency(Duration::from_secs(5)),
        );

        h.say(Duration::from_secs(1)).await;
        h.wait_for(ConversationState::Responding).await;
        assert_eq!(h.handle.interrupt().await.unwrap(), ConversationState::Idle);
        h.assert_quiet();
        assert_eq!(h.interrupted_during(), Some(ConversationState::Responding));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.synth.calls(), 1);
        assert_eq!(h.output.play_count(), 0);
        assert!(h.handle.history().is_empty());
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_error_backoff() {
        let mut h = Harness::start(
            config(),
            ScriptedRecognizer::default(),
            ScriptedLanguageModel::default(),
            ScriptedSynthesizer::new(),
        );
        h.recognizer.push_failure("microphone unplugged");

        h.say(Duration::from_secs(1)).await;
        h.wait_for(ConversationState::Error).await;
        let interrupted_at = Instant::now();
        assert_eq!(h.handle.interrupt().await.unwrap(), ConversationState::Idle);
        h.assert_quiet();
        assert_eq!(h.interrupted_during(), Some(ConversationState::Error));

        h.wait_for(ConversationState::Listening).await;
        assert!(interrupted_at.elapsed() < config().error_backoff());
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_idle_is_a_no_op() {
        let mut h = Harness::start(
            config(),
            ScriptedRecognizer::default(),
            ScriptedLanguageModel::default(),
            ScriptedSynthesizer::new(),
        );

        assert_eq!(h.handle.state(), ConversationState::Idle);
        assert_eq!(h.handle.interrupt().await.unwrap(), ConversationState::Idle);
        h.assert_quiet();
        assert_eq!(h.interrupted_during(), Some(ConversationState::Idle));
        assert_eq!(h.recognizer.calls(), 0);
        assert!(h.handle.history().is_empty());

        h.wait_for(ConversationState::Listening).await;
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_from_previous_turn_is_discarded() {
        let long_reply = format!("[EMOTION:happy] {}", "la ".repeat(100));
        let h = Harness::start(
            config(),
            ScriptedRecognizer::new(["sing", "again"]),
            ScriptedLanguageModel::new([long_reply, "ok".to_string()]),
            ScriptedSynthesizer::new(),
        );

        h.say(Duration::from_secs(1)).await;
        h.wait_for(ConversationState::Speaking).await;
        // the avatar's own voice picked up by the microphone
        h.say(Duration::from_secs(1)).await;
        assert_eq!(h.handle.state(), ConversationState::Speaking);

        h.wait_for(ConversationState::Listening).await;
        h.say(Duration::from_secs(1)).await;
        let deadline = Instant::now() + Duration::from_secs(60);
        while h.recognizer.calls() < 2 {
            assert!(Instant::now() < deadline, "second turn never transcribed");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let heard = h.recognizer.heard();
        let one_second = RATE as usize;
        assert_eq!(heard.len(), 2);
        assert_eq!(heard[1], one_second);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_text_fallback_on_empty_reply() {
        let h = Harness::start(
            config(),
            ScriptedRecognizer::default(),
            ScriptedLanguageModel::default(),
            ScriptedSynthesizer::new(),
        );

        let reply = h.handle.send_text("anyone there?").await.unwrap();
        assert_eq!(reply, "Sorry, I can't respond right now.");
        assert!(h.handle.history().is_empty());
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_text_applies_emotion() {
        let h = Harness::start(
            config(),
            ScriptedRecognizer::default(),
            ScriptedLanguageModel::new(["[EMOTION:surprised] Really?"]),
            ScriptedSynthesizer::new(),
        );

        assert_eq!(h.handle.send_text("guess what").await.unwrap(), "Really?");
        let expression = h
            .animation
            .with(|e| e.expression().map(str::to_string))
            .unwrap();
        assert_eq!(expression.as_deref(), Some("surprised"));
        assert_eq!(
            h.handle.history()[0].emotion_detected.as_deref(),
            Some("surprised")
        );
        assert_eq!(h.synth.calls(), 0);
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_text_rejected() {
        let h = Harness::start(
            config(),
            ScriptedRecognizer::default(),
            ScriptedLanguageModel::default(),
            ScriptedSynthesizer::new(),
        );
        assert!(matches!(
            h.handle.send_text("   ").await,
            Err(Error::EmptyInput)
        ));
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_adapter_failure_backs_off_then_idles() {
        let mut h = Harness::start(
            config(),
            ScriptedRecognizer::default(),
            ScriptedLanguageModel::default(),
            ScriptedSynthesizer::new(),
        );
        h.recognizer.push_failure("microphone unplugged");

        h.say(Duration::from_secs(1)).await;
        let states = h.states(3).await;
        assert_eq!(
            states,
            vec![
                ConversationState::Listening,
                ConversationState::Processing,
                ConversationState::Error,
            ]
        );
        let entered_error = Instant::now();
        let next = h.states(1).await;
        assert_eq!(next, vec![ConversationState::Idle]);
        assert!(entered_error.elapsed() >= config().error_backoff());
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_llm_reply_in_voice_turn_returns_to_idle() {
        let mut h = Harness::start(
            config(),
            ScriptedRecognizer::new(["hello"]),
            ScriptedLanguageModel::default(),
            ScriptedSynthesizer::new(),
        );

        h.say(Duration::from_secs(1)).await;
        let states = h.states(4).await;
        assert_eq!(
            states,
            vec![
                ConversationState::Listening,
                ConversationState::Processing,
                ConversationState::Idle,
                ConversationState::Listening,
            ]
        );
        assert_eq!(h.llm.calls(), 1);
        assert_eq!(h.synth.calls(), 0);
        assert_eq!(h.output.play_count(), 0);
        assert!(h.handle.history().is_empty());
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_during_speech_waits_for_turn_end() {
        let h = Harness::start(
            config(),
            ScriptedRecognizer::new(["tell me a story"]),
            ScriptedLanguageModel::new(["Once upon a time there was a puppet.", "You're welcome."]),
            ScriptedSynthesizer::new(),
        );

        h.say(Duration::from_secs(1)).await;
        h.wait_for(ConversationState::Speaking).await;

        let handle = h.handle.clone();
        let reply = tokio::spawn(async move { handle.send_text("thanks").await });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(h.handle.state(), ConversationState::Speaking);

        assert_eq!(reply.await.unwrap().unwrap(), "You're welcome.");
        let history = h.handle.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].user_input, "tell me a story");
        assert_eq!(history[1].user_input, "thanks");
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_history() {
        let h = Harness::start(
            config(),
            ScriptedRecognizer::default(),
            ScriptedLanguageModel::new(["ok"]),
            ScriptedSynthesizer::new(),
        );
        h.handle.send_text("remember this").await.unwrap();
        assert_eq!(h.handle.history().len(), 1);
        h.handle.clear_history().await.unwrap();
        assert!(h.handle.history().is_empty());
        h.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_handle() {
        let h = Harness::start(
            config(),
            ScriptedRecognizer::default(),
            ScriptedLanguageModel::default(),
            ScriptedSynthesizer::new(),
        );
        let handle = h.handle.clone();
        h.stop().await.unwrap();
        assert!(matches!(handle.interrupt().await, Err(Error::ChannelClosed)));
    }
