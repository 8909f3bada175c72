
    use super::*;
    use crate::config::ExpressionEntry;
    use crate::expression::ExpressionBlend;
    use crate::lipsync::MouthShape;

    const DT: f32 = 1.0 / 60.0;

    fn config() -> AnimationConfig {
        AnimationConfig {
            seed: Some(11),
            ..AnimationConfig::default()
        }
    }

    fn engine() -> AnimationEngine {
        AnimationEngine::new(&config()).unwrap()
    }

    fn open_mouth(start: f32, end: f32, amount: f32) -> PhonemeFrame {
        PhonemeFrame::new(
            start,
            end,
            "a",
            MouthShape {
                mouth_open_y: amount,
                jaw_open: amount,
                ..MouthShape::default()
            },
        )
    }

    fn param(engine: &AnimationEngine, name: &str) -> (f32, f32) {
        let id = engine.store().id(name).unwrap();
        (engine.store().current(id), engine.store().target(id))
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.idle_motion_group = "Missing".to_string();
        assert!(matches!(
            AnimationEngine::new(&config),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_values_stay_in_range() {
        let mut engine = engine();
        let tags = ["happy", "sad", "unknown", "thinking", "😊"];
        for i in 0..2_000 {
            if i % 150 == 0 {
                engine.apply_emotion(tags[(i / 150) % tags.len()]);
            }
            if i % 400 == 0 {
                let _ = engine.schedule_lipsync(vec![
                    open_mouth(0.0, 0.2, 3.0),
                    open_mouth(0.2, 0.5, -2.0),
                ]);
            }
            engine.advance(DT);
            for p in engine.store().iter() {
                assert!(p.current >= p.min && p.current <= p.max, "{} current", p.id);
                assert!(p.target >= p.min && p.target <= p.max, "{} target", p.id);
            }
        }
    }

    #[test]
    fn test_frame_counters_advance() {
        let mut engine = engine();
        engine.advance(DT);
        engine.advance(DT);
        let frame = engine.frame();
        assert_eq!(frame.frame_index, 2);
        assert!((frame.time - 2.0 * f64::from(DT)).abs() < 1e-9);
        assert_eq!(frame.parameters.values().len(), engine.store().len());
    }

    #[test]
    fn test_lipsync_masks_expression_mouth() {
        let mut engine = engine();
        engine.set_expression("surprised").unwrap();
        let _done = engine.schedule_lipsync(vec![open_mouth(0.0, 1.0, 0.25)]);

        engine.advance(DT);
        let (_, target) = param(&engine, "ParamMouthOpenY");
        assert!((target - 0.25 * 0.8).abs() < 1e-6);

        // Brows are not in the mouth channel and still follow the expression.
        let (_, brow) = param(&engine, "ParamBrowLY");
        assert_eq!(brow, 1.0);
    }

    #[test]
    fn test_expression_mouth_applies_when_idle() {
        let mut engine = engine();
        engine.set_expression("surprised").unwrap();
        engine.advance(DT);
        let (_, target) = param(&engine, "ParamMouthOpenY");
        assert_eq!(target, 0.6);
    }

    #[test]
    fn test_expression_overrides_breathing() {
        let mut config = config();
        let mut entry = ExpressionEntry {
            blend: ExpressionBlend::Overwrite,
            ..ExpressionEntry::default()
        };
        entry.parameters.insert("ParamBodyAngleY".to_string(), 5.0);
        config.expressions.insert("lean".to_string(), entry);
        let mut engine = AnimationEngine::new(&config).unwrap();

        engine.set_expression("lean").unwrap();
        for _ in 0..30 {
            engine.advance(DT);
            assert_eq!(param(&engine, "ParamBodyAngleY").1, 5.0);
        }
    }

    #[test]
    fn test_mouth_relaxes_after_utterance() {
        let mut engine = engine();
        let _done = engine.schedule_lipsync(vec![open_mouth(0.0, 0.2, 1.0)]);
        for _ in 0..12 {
            engine.advance(DT);
        }
        let (speaking_value, _) = param(&engine, "ParamMouthOpenY");
        assert!(speaking_value > 0.3);

        for _ in 0..120 {
            engine.advance(DT);
        }
        assert!(!engine.is_speaking());
        let (relaxed, target) = param(&engine, "ParamMouthOpenY");
        assert_eq!(target, 0.0);
        assert!(relaxed < 0.01);
    }

    #[test]
    fn test_apply_known_emotion() {
        let mut engine = engine();
        assert!(engine.apply_emotion("happy"));
        assert_eq!(engine.expression(), Some("happy"));
        assert_eq!(engine.motion().unwrap().group, "Happy");
    }

    #[test]
    fn test_emoji_alias() {
        let mut engine = engine();
        assert!(engine.apply_emotion("😢"));
        assert_eq!(engine.expression(), Some("sad"));
    }

    #[test]
    fn test_unknown_emotion_falls_back_to_neutral() {
        let mut engine = engine();
        assert!(!engine.apply_emotion("ecstatic"));
        assert_eq!(engine.expression(), Some("neutral"));
        assert_eq!(engine.motion().unwrap().group, "Idle");
    }

    #[test]
    fn test_set_idle_animation() {
        let mut engine = engine();
        engine.apply_emotion("angry");
        engine.set_idle_animation();
        assert_eq!(engine.expression(), Some("neutral"));
        // The emotion clip keeps running; idle only plays once it finishes.
        assert_eq!(engine.motion().unwrap().group, "Angry");
    }

    #[test]
    fn test_auto_idle_motion() {
        let mut engine = engine();
        engine.advance(DT);
        let motion = engine.motion().unwrap();
        assert_eq!(motion.group, "Idle");
        assert_eq!(motion.priority, MotionPriority::Idle);
    }

    #[tokio::test]
    async fn test_handle_interrupt_clears_queues() {
        let handle = AnimationHandle::new(engine());
        let done = handle
            .schedule_lipsync(vec![open_mouth(0.0, 2.0, 1.0)])
            .unwrap();
        handle.apply_emotion("happy").unwrap();
        handle
            .with(|e| e.play_motion("Sad", MotionPriority::Normal))
            .unwrap()
            .unwrap();
        handle.tick(DT).unwrap();
        assert!(handle.is_speaking().unwrap());

        handle.interrupt().unwrap();

        let (speaking, pending, queued) = handle
            .with(|e| (e.is_speaking(), e.pending_phonemes(), e.queued_motions()))
            .unwrap();
        assert!(!speaking);
        assert_eq!(pending, 0);
        assert_eq!(queued, 0);
        done.finished().await;
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let handle = AnimationHandle::new(engine());
        let poisoner = handle.clone();
        let joined = std::thread::spawn(move || {
            let _ = poisoner.with(|_| panic!("renderer crashed"));
        })
        .join();
        assert!(joined.is_err());

        let err = handle.frame().unwrap_err();
        assert!(matches!(err, Error::LockPoisoned));
        assert!(err.is_fatal());
    }
