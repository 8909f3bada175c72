//! Fixed-rate render loop
//!
//! Runs on its own OS thread: advance the animation by the nominal frame
//! step, hand the frame to the renderer, sleep out the rest of the interval.
//! Nothing here waits on dialogue I/O; the only shared resource is the
//! animation lock, held for one tick at a time.

use crate::config::RenderConfig;
use crate::error::{Error, Result};
use crate::status::EngineShared;
use puppet_anim::{AnimationHandle, Renderer};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// One render tick at a time, independent of any thread
pub(crate) struct RenderWorker {
    animation: AnimationHandle,
    renderer: Box<dyn Renderer>,
    dt: f32,
    shared: Arc<EngineShared>,
    render_errors: u64,
}

impl RenderWorker {
    pub(crate) fn new(
        animation: AnimationHandle,
        renderer: Box<dyn Renderer>,
        config: &RenderConfig,
        shared: Arc<EngineShared>,
    ) -> Self {
        Self {
            animation,
            renderer,
            dt: config.frame_dt(),
            shared,
            render_errors: 0,
        }
    }

    /// Advance and render one frame.
    ///
    /// Renderer failures are logged and skipped; only a poisoned animation
    /// lock is returned.
    pub(crate) fn step(&mut self) -> Result<()> {
        let frame = self.animation.tick(self.dt)?;
        match self.renderer.render(&frame) {
            Ok(()) => {
                let rendered = self.shared.frame_rendered();
                trace!(frame = frame.frame_index, rendered, "Frame rendered");
            }
            Err(e) => {
                self.render_errors += 1;
                // Log the first failure and then once per second of failures
                if self.render_errors == 1 || self.render_errors % 60 == 0 {
                    warn!(
                        renderer = self.renderer.name(),
                        error = %e,
                        failures = self.render_errors,
                        "Frame not rendered"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Handle to the running render thread
#[derive(Debug)]
pub struct RenderLoop {
    thread: JoinHandle<()>,
}

impl RenderLoop {
    /// Start the loop; it runs until `cancel` fires or the animation lock is poisoned
    pub(crate) fn spawn(
        mut worker: RenderWorker,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let thread = std::thread::Builder::new()
            .name("puppet-render".to_string())
            .spawn(move || {
                info!(
                    renderer = worker.renderer.name(),
                    interval_ms = interval.as_millis() as u64,
                    "Render loop started"
                );
                while !cancel.is_cancelled() {
                    let started = Instant::now();
                    if let Err(e) = worker.step() {
                        worker.shared.fail(format!("render loop: {}", e));
                        cancel.cancel();
                        break;
                    }
                    if let Some(rest) = interval.checked_sub(started.elapsed()) {
                        std::thread::sleep(rest);
                    }
                }
                debug!(frames = worker.shared.frames_rendered(), "Render loop stopped");
            })
            .map_err(|e| Error::Thread(format!("failed to spawn render thread: {}", e)))?;
        Ok(Self { thread })
    }

    /// Wait for the thread to exit
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| Error::Thread("render thread panicked".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::EngineState;
    use mockall::predicate::*;
    use puppet_anim::{AnimationConfig, AnimationEngine, FrameState};

    mockall::mock! {
        pub Backend {}

        impl Renderer for Backend {
            fn render(&mut self, frame: &FrameState) -> puppet_anim::Result<()>;
        }
    }

    fn animation() -> AnimationHandle {
        let config = AnimationConfig {
            seed: Some(7),
            ..AnimationConfig::default()
        };
        AnimationHandle::new(AnimationEngine::new(&config).unwrap())
    }

    fn worker(renderer: MockBackend, shared: &Arc<EngineShared>) -> RenderWorker {
        RenderWorker::new(
            animation(),
            Box::new(renderer),
            &RenderConfig::default(),
            Arc::clone(shared),
        )
    }

    #[test]
    fn test_step_advances_and_renders() {
        let mut renderer = MockBackend::new();
        renderer
            .expect_render()
            .with(function(|frame: &FrameState| frame.frame_index > 0))
            .times(3)
            .returning(|_| Ok(()));
        let shared = Arc::new(EngineShared::new());
        let mut worker = worker(renderer, &shared);

        for _ in 0..3 {
            worker.step().unwrap();
        }
        assert_eq!(shared.frames_rendered(), 3);
    }

    #[test]
    fn test_render_failure_is_not_fatal() {
        let mut renderer = MockBackend::new();
        renderer
            .expect_render()
            .times(2)
            .returning(|_| Err(puppet_anim::Error::Render("device lost".to_string())));
        let shared = Arc::new(EngineShared::new());
        let mut worker = worker(renderer, &shared);

        worker.step().unwrap();
        worker.step().unwrap();
        assert_eq!(shared.frames_rendered(), 0);
        assert_eq!(worker.render_errors, 2);
    }

    #[test]
    fn test_poisoned_lock_stops_loop_with_error_state() {
        let mut renderer = MockBackend::new();
        renderer.expect_render().returning(|_| Ok(()));
        let shared = Arc::new(EngineShared::new());
        shared.set_state(EngineState::Running);

        let animation = animation();
        let poisoner = animation.clone();
        let _ = std::thread::spawn(move || {
            let _ = poisoner.with(|_| panic!("poison the engine lock"));
        })
        .join();

        let worker = RenderWorker::new(
            animation,
            Box::new(renderer),
            &RenderConfig::default(),
            Arc::clone(&shared),
        );
        let cancel = CancellationToken::new();
        let render = RenderLoop::spawn(worker, Duration::from_millis(1), cancel.clone()).unwrap();
        render.join().unwrap();

        assert!(cancel.is_cancelled());
        assert_eq!(shared.state(), EngineState::Error);
        assert!(shared.last_error().unwrap().contains("poisoned"));
    }

    #[test]
    fn test_loop_runs_until_cancelled() {
        let mut renderer = MockBackend::new();
        renderer.expect_render().returning(|_| Ok(()));
        let shared = Arc::new(EngineShared::new());
        let cancel = CancellationToken::new();

        let render = RenderLoop::spawn(
            worker(renderer, &shared),
            Duration::from_millis(2),
            cancel.clone(),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        render.join().unwrap();

        assert!(shared.frames_rendered() > 0);
    }
}
