//! Engine lifecycle state and runtime counters

use puppet_anim::{BlinkPhase, MotionSample};
use puppet_dialogue::ConversationState;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use tracing::{error, info};

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EngineState {
    /// Not running
    Stopped = 0,
    /// Building the animation engine, adapters and loops
    Initializing = 1,
    /// Loops running
    Running = 2,
    /// Stopped by a fatal error
    Error = 3,
}

impl EngineState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Stopped,
            1 => Self::Initializing,
            2 => Self::Running,
            _ => Self::Error,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Lifecycle state
    pub state: EngineState,
    /// Conversation state, if the dialogue loop exists
    pub conversation: Option<ConversationState>,
    /// Frames rendered since start
    pub frames_rendered: u64,
    /// Chunks read from the capture device
    pub chunks_captured: u64,
    /// Chunks dropped because the dialogue task fell behind
    pub chunks_dropped: u64,
    /// Active expression
    pub expression: Option<String>,
    /// Running motion clip
    pub motion: Option<MotionSample>,
    /// Blink phase
    pub blink_phase: Option<BlinkPhase>,
    /// Whether a lipsync timeline is playing
    pub speaking: bool,
    /// Reason for the error state
    pub last_error: Option<String>,
}

/// State and counters shared by the orchestrator and its loops
#[derive(Debug)]
pub(crate) struct EngineShared {
    state: AtomicU8,
    frames_rendered: AtomicU64,
    chunks_captured: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl EngineShared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(EngineState::Stopped as u8),
            frames_rendered: AtomicU64::new(0),
            chunks_captured: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, next: EngineState) {
        let previous = EngineState::from_u8(self.state.swap(next as u8, Ordering::SeqCst));
        if previous != next {
            info!(from = %previous, to = %next, "Engine state changed");
        }
    }

    /// Enter the error state; the first reason recorded wins
    pub(crate) fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, "Engine failed");
        {
            let mut last = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
            if last.is_none() {
                *last = Some(reason);
            }
        }
        self.set_state(EngineState::Error);
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn reset(&self) {
        self.frames_rendered.store(0, Ordering::Relaxed);
        self.chunks_captured.store(0, Ordering::Relaxed);
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub(crate) fn frame_rendered(&self) -> u64 {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    pub(crate) fn chunk_captured(&self) {
        self.chunks_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn chunks_captured(&self) -> u64 {
        self.chunks_captured.load(Ordering::Relaxed)
    }
}
